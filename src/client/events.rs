use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::models::StreamEvent;

use super::{ClientError, ClientResult};

/// Adapts a byte stream into a lazy stream of events
///
/// Chunks may split lines or UTF-8 sequences anywhere. Events without data
/// (comments, bare `event:`/`id:` fields) are dropped. Ends right after the
/// sentinel, or after the first transport error.
pub fn event_stream<S, B, E>(chunks: S) -> impl Stream<Item = ClientResult<StreamEvent>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ClientError> + Send,
{
    async_stream::stream! {
        let mut events = Box::pin(chunks.eventsource());

        while let Some(event) = events.next().await {
            match event {
                Ok(event) if event.data.is_empty() => {
                    tracing::debug!(event = %event.event, "Ignoring event without data");
                }
                Ok(event) => {
                    let event = StreamEvent::from_data(event.data);
                    let done = event == StreamEvent::Sentinel;
                    yield Ok(event);
                    if done {
                        return;
                    }
                }
                Err(e) => {
                    yield Err(match e {
                        EventStreamError::Transport(e) => e.into(),
                        EventStreamError::Utf8(e) => ClientError::Decode(e.to_string()),
                        EventStreamError::Parser(e) => ClientError::Decode(e.to_string()),
                    });
                    return;
                }
            }
        }
    }
}

/// Meaning of one data payload from the recommendation stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPayload {
    /// Text generated by the model (`choices[0].delta.content`)
    Content(String),
    /// In-band error reported by the server
    Error(String),
    /// Role announcements, empty deltas, usage blocks and anything unparseable
    Ignored,
}

impl ChunkPayload {
    pub fn parse(payload: &str) -> Self {
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring non-JSON data payload");
                return ChunkPayload::Ignored;
            }
        };

        if let Some(error) = value.get("error") {
            return ChunkPayload::Error(describe_error(error, &value));
        }

        match value
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
        {
            Some(content) if !content.is_empty() => ChunkPayload::Content(content.to_string()),
            _ => ChunkPayload::Ignored,
        }
    }
}

fn describe_error(error: &Value, payload: &Value) -> String {
    let mut message = match error {
        Value::String(message) => message.clone(),
        Value::Object(fields) => fields
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    };

    if let Some(status) = payload.get("status").and_then(Value::as_u64) {
        message = format!("{} (status {})", message, status);
    }
    if let Some(details) = payload.get("details").and_then(Value::as_str) {
        if !details.is_empty() {
            message = format!("{}: {}", message, details);
        }
    }

    message
}
