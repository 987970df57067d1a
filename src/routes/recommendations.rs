use std::{borrow::Cow, convert::Infallible};

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::{
    error::AppResult,
    models::{InterestPayload, InterestRequest},
};

use super::AppState;

/// Events buffered between the relay task and the response body
const EVENT_BUFFER: usize = 64;

/// Streams a recommendation completion as server-sent events
///
/// The payload is validated before anything is sent upstream, so a bad request
/// gets a plain 400 instead of a stream. Once streaming, every outcome ends with
/// exactly one `[DONE]` event.
pub async fn recommend(
    State(state): State<AppState>,
    Json(payload): Json<InterestPayload>,
) -> AppResult<impl IntoResponse> {
    let request = InterestRequest::try_from(payload)?;
    let body = state.prompt_builder.build(&request);

    tracing::info!(
        interest_type = request.interests().kind(),
        media_type = ?request.media_type(),
        mood = %request.mood(),
        "Starting recommendation stream"
    );

    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let relay = state.relay.clone();
    tokio::spawn(
        async move {
            let outcome = relay.relay(&body, tx).await;
            tracing::info!(?outcome, "Recommendation stream closed");
        }
        .instrument(tracing::Span::current()),
    );

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok::<_, Infallible>(Event::default().data(event_data(event.payload())));
        }
    };

    let headers = [
        (header::CONNECTION, HeaderValue::from_static("keep-alive")),
        (HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
    ];

    Ok((headers, Sse::new(stream).keep_alive(KeepAlive::default())))
}

/// Event data without carriage returns, which the event-stream format cannot carry
///
/// Line feeds are kept; axum writes each line as its own `data:` field.
fn event_data(payload: &str) -> Cow<'_, str> {
    if payload.contains('\r') {
        Cow::Owned(payload.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(payload)
    }
}
