use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::StreamExt;
use reqwest::Client as HttpClient;
use serde_json::json;
use tokio::sync::mpsc;

use crate::models::{ChatCompletionBody, StreamEvent, SENTINEL};

/// How a relay run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream finished normally and the sentinel was delivered
    Completed,
    /// An error payload and the sentinel were delivered
    UpstreamFailed,
    /// The downstream side went away; nothing more was sent
    ClientDisconnected,
}

#[derive(thiserror::Error, Debug)]
enum RelayError {
    #[error("client disconnected")]
    ClientGone,

    #[error("upstream returned status {status}")]
    UpstreamStatus { status: u16, body: String },

    #[error("upstream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed upstream event stream: {0}")]
    Framing(String),
}

impl From<EventStreamError<reqwest::Error>> for RelayError {
    fn from(e: EventStreamError<reqwest::Error>) -> Self {
        match e {
            EventStreamError::Transport(e) => RelayError::Transport(e),
            EventStreamError::Utf8(e) => RelayError::Framing(e.to_string()),
            EventStreamError::Parser(e) => RelayError::Framing(e.to_string()),
        }
    }
}

impl RelayError {
    /// In-band error payload sent to the client before the sentinel
    fn payload(&self) -> Option<String> {
        let value = match self {
            RelayError::ClientGone => return None,
            RelayError::UpstreamStatus { status, body } => json!({
                "error": "API request failed",
                "status": status,
                "details": body,
            }),
            RelayError::Transport(e) => json!({
                "error": format!("An internal server error occurred: {}", e),
            }),
            RelayError::Framing(e) => json!({
                "error": format!("An internal server error occurred: {}", e),
            }),
        };
        Some(value.to_string())
    }
}

/// Forwards an upstream streaming chat completion to one downstream client
///
/// The downstream side is an `mpsc::Sender<StreamEvent>`. A failed send means the
/// client is gone, which stops the upstream read. The sender is consumed, so the
/// downstream stream is released exactly once, when `relay` returns.
#[derive(Clone)]
pub struct StreamRelay {
    http_client: HttpClient,
    api_url: String,
    api_key: Option<String>,
}

impl StreamRelay {
    pub fn new(http_client: HttpClient, api_url: String, api_key: Option<String>) -> Self {
        Self {
            http_client,
            api_url,
            api_key,
        }
    }

    pub async fn relay(
        &self,
        body: &ChatCompletionBody,
        sink: mpsc::Sender<StreamEvent>,
    ) -> RelayOutcome {
        let outcome = match self.forward(body, &sink).await {
            Ok(()) => RelayOutcome::Completed,
            Err(RelayError::ClientGone) => {
                tracing::info!("Client disconnected, aborting upstream read");
                return RelayOutcome::ClientDisconnected;
            }
            Err(e) => {
                tracing::error!(error = %e, "Recommendation stream failed");
                if let Some(payload) = e.payload() {
                    if sink.send(StreamEvent::DataLine(payload)).await.is_err() {
                        tracing::info!("Client disconnected before error could be delivered");
                        return RelayOutcome::ClientDisconnected;
                    }
                }
                RelayOutcome::UpstreamFailed
            }
        };

        if sink.send(StreamEvent::Sentinel).await.is_err() {
            tracing::info!("Client disconnected before sentinel");
            return RelayOutcome::ClientDisconnected;
        }

        outcome
    }

    async fn forward(
        &self,
        body: &ChatCompletionBody,
        sink: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), RelayError> {
        let mut request = self.http_client.post(&self.api_url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        tracing::debug!(url = %self.api_url, model = %body.model, "Opening upstream completion stream");

        let response = tokio::select! {
            _ = sink.closed() => return Err(RelayError::ClientGone),
            response = request.send() => response?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %body,
                "LLM API request failed"
            );
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let mut events = std::pin::pin!(response.bytes_stream().eventsource());
        let mut forwarded = 0usize;

        loop {
            let event = tokio::select! {
                _ = sink.closed() => return Err(RelayError::ClientGone),
                event = events.next() => event,
            };

            match event {
                Some(Ok(event)) => forwarded += forward_event(event, sink).await?,
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }

        tracing::info!(forwarded, "Upstream completion stream finished");
        Ok(())
    }
}

/// Forwards the data of one upstream event; returns how many events were sent
async fn forward_event(event: Event, sink: &mpsc::Sender<StreamEvent>) -> Result<usize, RelayError> {
    if event.data.is_empty() {
        tracing::debug!(event = %event.event, id = %event.id, "Dropping upstream event without data");
        return Ok(0);
    }
    if event.data.trim() == SENTINEL {
        // The relay emits its own sentinel once the body is drained
        tracing::debug!("Upstream sentinel received");
        return Ok(0);
    }

    sink.send(StreamEvent::DataLine(event.data))
        .await
        .map_err(|_| RelayError::ClientGone)?;
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, ResponseFormat};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn body() -> ChatCompletionBody {
        ChatCompletionBody {
            model: "test-model".to_string(),
            stream: true,
            response_format: ResponseFormat::json_object(),
            messages: vec![ChatMessage::user("hi")],
        }
    }

    async fn run_relay(server: &MockServer, api_key: Option<&str>) -> (RelayOutcome, Vec<StreamEvent>) {
        let relay = StreamRelay::new(
            HttpClient::new(),
            format!("{}/v1/chat/completions", server.uri()),
            api_key.map(str::to_string),
        );
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = relay.relay(&body(), tx).await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    #[tokio::test]
    async fn test_forwards_data_lines_and_single_sentinel() {
        let server = MockServer::start().await;
        let upstream = "event: message\n\
                        data: {\"choices\":[{\"delta\":{\"content\":\"{\"}}]}\n\
                        \n\
                        : ping\n\
                        id: 4\n\
                        data: {\"choices\":[{\"delta\":{\"content\":\"}\"}}]}\n\
                        \n\
                        data: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(upstream, "text/event-stream"))
            .mount(&server)
            .await;

        let (outcome, events) = run_relay(&server, Some("secret")).await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(
            events,
            vec![
                StreamEvent::DataLine(r#"{"choices":[{"delta":{"content":"{"}}]}"#.to_string()),
                StreamEvent::DataLine(r#"{"choices":[{"delta":{"content":"}"}}]}"#.to_string()),
                StreamEvent::Sentinel,
            ]
        );
    }

    #[tokio::test]
    async fn test_carriage_return_line_endings() {
        let server = MockServer::start().await;
        let upstream = "data: {\"choices\":[]}\r\r\
                        data: {\"n\":2}\r\n\r\n\
                        data: [DONE]\r\r";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(upstream, "text/event-stream"))
            .mount(&server)
            .await;

        let (outcome, events) = run_relay(&server, None).await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(
            events,
            vec![
                StreamEvent::DataLine(r#"{"choices":[]}"#.to_string()),
                StreamEvent::DataLine(r#"{"n":2}"#.to_string()),
                StreamEvent::Sentinel,
            ]
        );
    }

    #[tokio::test]
    async fn test_upstream_error_sends_one_error_then_sentinel() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
            .expect(1)
            .mount(&server)
            .await;

        let (outcome, events) = run_relay(&server, None).await;

        assert_eq!(outcome, RelayOutcome::UpstreamFailed);
        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamEvent::DataLine(payload) => {
                let value: serde_json::Value = serde_json::from_str(payload).unwrap();
                assert_eq!(value["error"], "API request failed");
                assert_eq!(value["status"], 500);
                assert_eq!(value["details"], "model overloaded");
            }
            other => panic!("expected error payload, got {:?}", other),
        }
        assert_eq!(events[1], StreamEvent::Sentinel);
    }

    #[tokio::test]
    async fn test_transport_error_sends_error_then_sentinel() {
        let relay = StreamRelay::new(HttpClient::new(), "http://127.0.0.1:1/none".to_string(), None);
        let (tx, mut rx) = mpsc::channel(8);

        let outcome = relay.relay(&body(), tx).await;

        assert_eq!(outcome, RelayOutcome::UpstreamFailed);
        let first = rx.recv().await.unwrap();
        assert!(first.payload().contains("An internal server error occurred"));
        assert_eq!(rx.recv().await, Some(StreamEvent::Sentinel));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_client_disconnect_stops_relay() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("data: {}\n\n", "text/event-stream")
                    .set_delay(std::time::Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let relay = StreamRelay::new(
            HttpClient::new(),
            format!("{}/v1/chat/completions", server.uri()),
            None,
        );
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), relay.relay(&body(), tx))
            .await
            .expect("relay should stop promptly once the client is gone");
        assert_eq!(outcome, RelayOutcome::ClientDisconnected);
    }

    #[tokio::test]
    async fn test_client_disconnect_mid_stream_stops_upstream_read() {
        use std::time::Duration;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Sends one event, then keeps the body open until the relay hangs up
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut buf).await;

            let event = "data: {\"n\":1}\n\n";
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{}\r\n",
                event.len(),
                event
            );
            socket.write_all(head.as_bytes()).await.unwrap();

            loop {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = closed_tx.send(());
        });

        let relay = StreamRelay::new(
            HttpClient::new(),
            format!("http://{}/v1/chat/completions", address),
            None,
        );
        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(async move { relay.relay(&body(), tx).await });

        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::DataLine(r#"{"n":1}"#.to_string()))
        );
        drop(rx);

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("relay should stop promptly once the client is gone")
            .unwrap();
        assert_eq!(outcome, RelayOutcome::ClientDisconnected);

        tokio::time::timeout(Duration::from_secs(2), closed_rx)
            .await
            .expect("upstream connection should be released")
            .unwrap();
    }
}
