use std::sync::Arc;

use crate::services::{Catalog, PromptBuilder, StreamRelay, TrailerFinder};

/// Shared handler state; cheap to clone per request
#[derive(Clone)]
pub struct AppState {
    pub prompt_builder: PromptBuilder,
    pub relay: StreamRelay,
    pub catalog: Arc<dyn Catalog>,
    pub trailers: Arc<dyn TrailerFinder>,
}
