//! Client side of the recommendation pipeline: consumes the event stream,
//! decodes the growing list and resolves each finished title against the
//! catalog.

pub mod api;
pub mod decoder;
pub mod display;
pub mod events;
pub mod ratings_csv;
pub mod scheduler;
pub mod session;

pub use api::ApiClient;
pub use decoder::IncrementalJsonDecoder;
pub use display::{project, ItemStatus, TrailerState, ViewItem};
pub use events::{event_stream, ChunkPayload};
pub use scheduler::{ResolutionJob, ResolutionRecord, ResolutionScheduler, ResolutionTable};
pub use session::{
    run_session, SessionCommand, SessionController, SessionEvent, SessionOutcome, SessionPhase,
    SessionSnapshot, SessionState, TitleMatcher,
};

/// Errors surfaced by the client library
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
