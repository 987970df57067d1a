use sqlx::PgPool;

use crate::{
    cached,
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
    models::{CatalogEntry, MovieDetail, MovieRow},
};

const SEARCH_CACHE_TTL: u64 = 3600; // 1 hour
const MATCH_CACHE_TTL: u64 = 86400; // 1 day

/// Maximum rows returned by a substring search
pub const SEARCH_LIMIT: i64 = 20;

const MOVIE_COLUMNS: &str = r#"
    tmdb_id,
    imdb_id,
    title,
    overview,
    vote_average::float8 AS vote_average,
    EXTRACT(YEAR FROM release_date)::int4 AS release_year,
    poster_path,
    backdrop_path,
    popularity::float8 AS popularity,
    genres,
    media_type
"#;

/// Local movie catalog consulted for search and title resolution
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    /// Case-insensitive substring search ranked by popularity
    async fn search_titles(&self, query: &str) -> AppResult<Vec<CatalogEntry>>;

    /// Best catalog match for a recommended title, `None` if nothing matches
    ///
    /// Rows from `year` are preferred; without a year match the title alone decides.
    async fn match_title(&self, title: &str, year: Option<i32>) -> AppResult<Option<MovieDetail>>;
}

/// Escapes `ILIKE` wildcards so user input only matches literally
pub fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
    cache: Cache,
    image_base_url: String,
}

impl PgCatalog {
    pub fn new(pool: PgPool, cache: Cache, image_base_url: String) -> Self {
        Self {
            pool,
            cache,
            image_base_url,
        }
    }

    async fn query_search(&self, query: &str) -> AppResult<Vec<CatalogEntry>> {
        let sql = format!(
            "SELECT {} FROM movies WHERE title ILIKE $1 ORDER BY popularity DESC NULLS LAST LIMIT $2",
            MOVIE_COLUMNS
        );

        let rows = sqlx::query_as::<_, MovieRow>(&sql)
            .bind(like_pattern(query))
            .bind(SEARCH_LIMIT)
            .fetch_all(&self.pool)
            .await?;

        tracing::info!(query = %query, results = rows.len(), "Catalog search");

        Ok(rows
            .into_iter()
            .map(|row| row.into_catalog_entry(&self.image_base_url))
            .collect())
    }

    async fn query_match(&self, title: &str, year: Option<i32>) -> AppResult<Option<MovieDetail>> {
        let pattern = like_pattern(title);
        let title = title.trim();

        if let Some(year) = year {
            let sql = format!(
                "SELECT {} FROM movies \
                 WHERE (title ILIKE $1 OR title % $2) \
                 AND EXTRACT(YEAR FROM release_date)::int4 = $3 \
                 ORDER BY (LOWER(title) = LOWER($2)) DESC, popularity DESC NULLS LAST \
                 LIMIT 1",
                MOVIE_COLUMNS
            );

            let row = sqlx::query_as::<_, MovieRow>(&sql)
                .bind(&pattern)
                .bind(title)
                .bind(year)
                .fetch_optional(&self.pool)
                .await?;

            if let Some(row) = row {
                return Ok(Some(row.into_detail(&self.image_base_url)));
            }

            tracing::debug!(title = %title, year, "No match for year, retrying by title only");
        }

        let sql = format!(
            "SELECT {} FROM movies \
             WHERE (title ILIKE $1 OR title % $2) \
             ORDER BY (LOWER(title) = LOWER($2)) DESC, popularity DESC NULLS LAST \
             LIMIT 1",
            MOVIE_COLUMNS
        );

        let row = sqlx::query_as::<_, MovieRow>(&sql)
            .bind(&pattern)
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.into_detail(&self.image_base_url)))
    }
}

#[async_trait::async_trait]
impl Catalog for PgCatalog {
    async fn search_titles(&self, query: &str) -> AppResult<Vec<CatalogEntry>> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Search query cannot be empty".to_string(),
            ));
        }

        cached!(
            self.cache,
            CacheKey::TitleSearch(query.to_string()),
            SEARCH_CACHE_TTL,
            self.query_search(query)
        )
    }

    async fn match_title(&self, title: &str, year: Option<i32>) -> AppResult<Option<MovieDetail>> {
        if title.trim().is_empty() {
            return Err(AppError::InvalidInput("Title cannot be empty".to_string()));
        }

        let matched: AppResult<Option<MovieDetail>> = cached!(
            self.cache,
            CacheKey::TitleMatch {
                title: title.to_string(),
                year,
            },
            MATCH_CACHE_TTL,
            self.query_match(title, year)
        );
        let matched = matched?;

        match &matched {
            Some(detail) => tracing::info!(title = %title, year, matched = %detail.title, "Title matched"),
            None => tracing::info!(title = %title, year, "No catalog match"),
        }

        Ok(matched)
    }
}
