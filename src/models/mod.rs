pub mod completion;
pub mod interest;
pub mod movie;
pub mod recommendation;

pub use completion::{ChatCompletionBody, ChatMessage, ResponseFormat, Role};
pub use interest::{
    FavoriteTitle, InterestPayload, InterestRequest, Interests, MediaType, RatedTitle,
    DEFAULT_MOOD, MAX_GENRES,
};
pub use movie::{CatalogEntry, MatchRequest, MovieDetail, MovieRow, TrailerResponse};
pub use recommendation::{Recommendation, StreamEvent, SENTINEL};
