pub mod catalog;
pub mod prompt;
pub mod relay;
pub mod trailer;

pub use catalog::{Catalog, PgCatalog};
pub use prompt::PromptBuilder;
pub use relay::{RelayOutcome, StreamRelay};
pub use trailer::{TrailerFinder, YoutubeTrailerFinder};
