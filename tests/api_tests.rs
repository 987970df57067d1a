use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{header as header_matcher, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cinematch_api::client::{run_session, ApiClient, ItemStatus};
use cinematch_api::error::AppResult;
use cinematch_api::models::{CatalogEntry, Interests, InterestRequest, MediaType, MovieDetail};
use cinematch_api::routes::{create_router, AppState};
use cinematch_api::services::{Catalog, PromptBuilder, StreamRelay, TrailerFinder};

const ANSWER: &str = r#"{"recommendations":[{"title":"Heat","year":1995,"reason":"A tense heist classic"},{"title":"Ronin","year":1998,"reason":"Great car chases"}]}"#;

/// Knows a single movie, "Heat"
struct FakeCatalog;

#[async_trait]
impl Catalog for FakeCatalog {
    async fn search_titles(&self, query: &str) -> AppResult<Vec<CatalogEntry>> {
        if !"heat".contains(&query.to_lowercase()) {
            return Ok(Vec::new());
        }
        Ok(vec![CatalogEntry {
            tmdb_id: 949,
            imdb_id: Some("tt0113277".to_string()),
            title: "Heat".to_string(),
            year: Some(1995),
            overview: None,
            poster_path: None,
            popularity: Some(40.0),
            vote_average: Some(7.9),
            media_type: "movie".to_string(),
        }])
    }

    async fn match_title(&self, title: &str, _year: Option<i32>) -> AppResult<Option<MovieDetail>> {
        if !title.eq_ignore_ascii_case("heat") {
            return Ok(None);
        }
        Ok(Some(MovieDetail {
            title: "Heat".to_string(),
            year: Some(1995),
            description: Some("A group of professional bank robbers...".to_string()),
            imdb_id: Some("tt0113277".to_string()),
            imdb_link: Some("https://www.imdb.com/title/tt0113277".to_string()),
            imdb_rating: Some(8.3),
            poster_path: None,
            backdrop_path: None,
            genres: vec!["Crime".to_string()],
            media_type: Some("movie".to_string()),
        }))
    }
}

struct NoTrailers;

#[async_trait]
impl TrailerFinder for NoTrailers {
    async fn find_trailer(&self, _title: &str, _year: Option<i32>) -> AppResult<Option<String>> {
        Ok(None)
    }
}

fn create_test_app(llm: &MockServer) -> Router {
    let state = AppState {
        prompt_builder: PromptBuilder::new("gpt-4o-mini"),
        relay: StreamRelay::new(
            reqwest::Client::new(),
            format!("{}/v1/chat/completions", llm.uri()),
            Some("test-key".to_string()),
        ),
        catalog: Arc::new(FakeCatalog),
        trailers: Arc::new(NoTrailers),
    };
    create_router(state)
}

/// Upstream event-stream body delivering `content` in small pieces
fn completion_body(content: &str, chunk_size: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut body = String::new();
    for piece in chars.chunks(chunk_size) {
        let piece: String = piece.iter().collect();
        let chunk = json!({"choices": [{"delta": {"content": piece}}]});
        body.push_str(&format!("data: {}\n\n", chunk));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

async fn mount_completion(llm: &MockServer, template: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header_matcher("authorization", "Bearer test-key"))
        .respond_with(template)
        .mount(llm)
        .await;
}

fn recommendation_request(payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/recommendations")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let llm = MockServer::start().await;
    let app = create_test_app(&llm);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_recommendations_stream_ends_with_one_sentinel() {
    let llm = MockServer::start().await;
    mount_completion(
        &llm,
        ResponseTemplate::new(200).set_body_raw(completion_body(ANSWER, 7), "text/event-stream"),
    )
    .await;

    let response = create_test_app(&llm)
        .oneshot(recommendation_request(json!({
            "interest_type": "genres",
            "genres": ["Crime", "Thriller"],
            "mood": "tense",
            "media_type": "movie"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(response.headers()["x-accel-buffering"], "no");

    let body = body_text(response).await;
    assert_eq!(body.matches("[DONE]").count(), 1);
    assert!(body.trim_end().ends_with("data: [DONE]"));
    assert!(body.contains("\"choices\""));
}

#[tokio::test]
async fn test_carriage_return_upstream_is_reframed() {
    let llm = MockServer::start().await;
    let upstream = "data: {\"choices\":[{\"delta\":{\"content\":\"{\"}}]}\r\rdata: [DONE]\r\r";
    mount_completion(
        &llm,
        ResponseTemplate::new(200).set_body_raw(upstream, "text/event-stream"),
    )
    .await;

    let response = create_test_app(&llm)
        .oneshot(recommendation_request(json!({
            "interest_type": "genres",
            "genres": ["Comedy"]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(!body.contains('\r'));

    let data: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .collect();
    assert_eq!(
        data,
        vec![r#"{"choices":[{"delta":{"content":"{"}}]}"#, "[DONE]"]
    );
}

#[tokio::test]
async fn test_upstream_failure_is_reported_in_band() {
    let llm = MockServer::start().await;
    mount_completion(&llm, ResponseTemplate::new(500).set_body_string("overloaded")).await;

    let response = create_test_app(&llm)
        .oneshot(recommendation_request(json!({
            "interest_type": "favorites",
            "favorite_movies": [{"title": "Heat", "year": 1995}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    let data: Vec<&str> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .collect();

    assert_eq!(data.len(), 2);
    let error: Value = serde_json::from_str(data[0]).unwrap();
    assert_eq!(error["error"], "API request failed");
    assert_eq!(error["status"], 500);
    assert_eq!(error["details"], "overloaded");
    assert_eq!(data[1], "[DONE]");
}

#[tokio::test]
async fn test_invalid_interests_are_rejected_before_streaming() {
    let llm = MockServer::start().await;
    let app = create_test_app(&llm);

    let response = app
        .clone()
        .oneshot(recommendation_request(json!({
            "interest_type": "genres",
            "genres": ["Comedy", "Drama", "Horror", "Western"]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert!(body["error"].as_str().unwrap().contains("genres"));

    let response = app
        .oneshot(recommendation_request(json!({
            "interest_type": "imdb",
            "ratings": []
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(llm.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_and_match_routes() {
    let llm = MockServer::start().await;
    let app = create_test_app(&llm);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/movies/search?q=hea")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let results: Vec<Value> = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["tmdb_id"], 949);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/movies/match")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"title": "Ronin"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_full_pipeline_resolves_every_item() {
    let llm = MockServer::start().await;
    mount_completion(
        &llm,
        ResponseTemplate::new(200).set_body_raw(completion_body(ANSWER, 5), "text/event-stream"),
    )
    .await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let app = create_test_app(&llm);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = Arc::new(ApiClient::new(format!("http://{}", address)));
    let request = InterestRequest::new(
        Interests::Genres(vec!["Crime".to_string()]),
        "tense",
        MediaType::Movie,
    )
    .unwrap();

    let events = client.submit(&request).await.unwrap();
    let outcome = run_session(Arc::clone(&client), events, None, Some(2)).await;

    assert_eq!(outcome.error, None);
    assert_eq!(outcome.items.len(), 2);

    assert_eq!(outcome.items[0].title, "Heat");
    assert_eq!(outcome.items[0].status, ItemStatus::Resolved);
    assert_eq!(outcome.items[0].reason, "A tense heist classic");
    assert_eq!(
        outcome.items[0].detail.as_ref().and_then(|d| d.imdb_rating),
        Some(8.3)
    );

    assert_eq!(outcome.items[1].title, "Ronin");
    assert_eq!(outcome.items[1].year, Some(1998));
    assert_eq!(outcome.items[1].status, ItemStatus::NoMatch);
}
