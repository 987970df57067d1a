use futures::Stream;
use reqwest::{Client as HttpClient, Response, StatusCode};
use serde_json::Value;

use crate::models::{
    CatalogEntry, InterestRequest, MatchRequest, MovieDetail, StreamEvent, TrailerResponse,
};

use super::{events::event_stream, session::TitleMatcher, ClientError, ClientResult};

/// HTTP client for the recommendation server
#[derive(Clone)]
pub struct ApiClient {
    http_client: HttpClient,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(HttpClient::new(), base_url)
    }

    pub fn with_client(http_client: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Submits an interest request and returns the lazy event stream
    ///
    /// Validation failures come back as `ClientError::Status` before any event.
    pub async fn submit(
        &self,
        request: &InterestRequest,
    ) -> ClientResult<impl Stream<Item = ClientResult<StreamEvent>> + Send> {
        let response = self
            .http_client
            .post(self.url("/recommendations"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request.to_payload())
            .send()
            .await?;

        let response = ensure_success(response).await?;
        tracing::debug!(kind = request.interests().kind(), "Recommendation stream opened");

        Ok(event_stream(response.bytes_stream()))
    }

    pub async fn search_titles(&self, query: &str) -> ClientResult<Vec<CatalogEntry>> {
        let response = self
            .http_client
            .get(self.url("/movies/search"))
            .query(&[("q", query)])
            .send()
            .await?;

        Ok(ensure_success(response).await?.json().await?)
    }

    pub async fn match_title(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> ClientResult<Option<MovieDetail>> {
        let response = self
            .http_client
            .post(self.url("/movies/match"))
            .json(&MatchRequest {
                title: title.to_string(),
                year,
            })
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        Ok(Some(ensure_success(response).await?.json().await?))
    }

    pub async fn find_trailer(&self, title: &str, year: Option<i32>) -> ClientResult<Option<String>> {
        let mut query = vec![("title", title.to_string())];
        if let Some(year) = year {
            query.push(("year", year.to_string()));
        }

        let response = self
            .http_client
            .get(self.url("/movies/trailer"))
            .query(&query)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let trailer: TrailerResponse = ensure_success(response).await?.json().await?;
        Ok(Some(trailer.video_id))
    }
}

/// Maps a non-success response to `ClientError::Status`, preferring the
/// server's `{"error": ...}` message
async fn ensure_success(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);

    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait::async_trait]
impl TitleMatcher for ApiClient {
    async fn match_title(&self, title: &str, year: Option<i32>) -> ClientResult<Option<MovieDetail>> {
        ApiClient::match_title(self, title, year).await
    }

    async fn find_trailer(&self, title: &str, year: Option<i32>) -> ClientResult<Option<String>> {
        ApiClient::find_trailer(self, title, year).await
    }
}
