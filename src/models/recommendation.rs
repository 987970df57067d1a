use serde::{Deserialize, Serialize};

/// Payload of the end-of-stream marker
pub const SENTINEL: &str = "[DONE]";

/// One title suggested by the language model
///
/// Identified only by its position in the streamed list; the same title may
/// legitimately appear twice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub reason: String,
}

/// A single server-sent event as seen by both ends of the relay
///
/// Only `data:` lines survive; `event:`, `id:` and comment lines never become
/// a `StreamEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    DataLine(String),
    Sentinel,
}

impl StreamEvent {
    /// Classifies a data payload, recognising the sentinel
    pub fn from_data(payload: impl Into<String>) -> Self {
        let payload = payload.into();
        if payload.trim() == SENTINEL {
            StreamEvent::Sentinel
        } else {
            StreamEvent::DataLine(payload)
        }
    }

    /// Payload as written after `data: ` on the wire
    pub fn payload(&self) -> &str {
        match self {
            StreamEvent::DataLine(payload) => payload,
            StreamEvent::Sentinel => SENTINEL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_recognised() {
        assert_eq!(StreamEvent::from_data("[DONE]"), StreamEvent::Sentinel);
        assert_eq!(StreamEvent::from_data(" [DONE] "), StreamEvent::Sentinel);
    }

    #[test]
    fn test_data_line_kept_verbatim() {
        let event = StreamEvent::from_data(r#"{"choices":[]}"#);
        assert_eq!(event, StreamEvent::DataLine(r#"{"choices":[]}"#.to_string()));
        assert_eq!(event.payload(), r#"{"choices":[]}"#);
        assert_eq!(StreamEvent::Sentinel.payload(), SENTINEL);
    }

    #[test]
    fn test_recommendation_defaults_missing_fields() {
        let rec: Recommendation = serde_json::from_str(r#"{"title": "Heat"}"#).unwrap();
        assert_eq!(rec.year, None);
        assert_eq!(rec.reason, "");
    }
}
