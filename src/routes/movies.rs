use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    error::{AppError, AppResult},
    models::{CatalogEntry, MatchRequest, MovieDetail, TrailerResponse},
};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: String,
}

#[derive(Debug, Deserialize)]
pub struct TrailerQuery {
    title: String,
    #[serde(default)]
    year: Option<i32>,
}

/// Catalog substring search
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> AppResult<Json<Vec<CatalogEntry>>> {
    let entries = state.catalog.search_titles(&params.q).await?;
    Ok(Json(entries))
}

/// Resolves one recommended title against the catalog
pub async fn match_title(
    State(state): State<AppState>,
    Json(request): Json<MatchRequest>,
) -> AppResult<Json<MovieDetail>> {
    state
        .catalog
        .match_title(&request.title, request.year)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Movie not found".to_string()))
}

pub async fn trailer(
    State(state): State<AppState>,
    Query(params): Query<TrailerQuery>,
) -> AppResult<Json<TrailerResponse>> {
    state
        .trailers
        .find_trailer(&params.title, params.year)
        .await?
        .map(|video_id| Json(TrailerResponse { video_id }))
        .ok_or_else(|| AppError::NotFound("Trailer not found".to_string()))
}
