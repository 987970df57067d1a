use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client as HttpClient;
use serde_json::Value;

use crate::{
    cached,
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
};

const TRAILER_CACHE_TTL: u64 = 604800; // 1 week

static RE_INITIAL_DATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)var\s+ytInitialData\s*=\s*(\{.+?\});\s*</script>").expect("valid regex")
});
static RE_WINDOW_INITIAL_DATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)window\["ytInitialData"\]\s*=\s*(\{.+?\});\s*</script>"#)
        .expect("valid regex")
});

/// Best-effort video lookup for a displayed title
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TrailerFinder: Send + Sync {
    /// Video id of the first matching trailer, `None` when nothing usable was found
    async fn find_trailer(&self, title: &str, year: Option<i32>) -> AppResult<Option<String>>;
}

pub fn trailer_query(title: &str, year: Option<i32>) -> String {
    match year {
        Some(year) => format!("{} {} trailer", title.trim(), year),
        None => format!("{} trailer", title.trim()),
    }
}

/// Pulls the first video id out of a YouTube results page
pub fn extract_video_id(html: &str) -> Option<String> {
    let captures = RE_INITIAL_DATA
        .captures(html)
        .or_else(|| RE_WINDOW_INITIAL_DATA.captures(html))?;

    let data: Value = match serde_json::from_str(&captures[1]) {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse YouTube initial data");
            return None;
        }
    };

    let contents = &data["contents"];
    let items = match contents.get("twoColumnSearchResultsRenderer") {
        Some(search) => search.pointer(
            "/primaryContents/sectionListRenderer/contents/0/itemSectionRenderer/contents",
        ),
        None => contents
            .pointer("/twoColumnWatchNextResults/secondaryResults/secondaryResults/results"),
    }?
    .as_array()?;

    items
        .iter()
        .filter_map(|item| {
            item.get("videoRenderer")
                .or_else(|| item.get("compactVideoRenderer"))
        })
        .find_map(|renderer| renderer.get("videoId").and_then(Value::as_str))
        .map(str::to_string)
}

/// Scrapes the YouTube search page; results are cached per title and year
#[derive(Clone)]
pub struct YoutubeTrailerFinder {
    http_client: HttpClient,
    base_url: String,
    cache: Cache,
}

impl YoutubeTrailerFinder {
    pub fn new(http_client: HttpClient, base_url: String, cache: Cache) -> Self {
        Self {
            http_client,
            base_url,
            cache,
        }
    }

    async fn search(&self, query: &str) -> AppResult<Option<String>> {
        let url = format!("{}/results", self.base_url.trim_end_matches('/'));

        let response = self
            .http_client
            .get(&url)
            .query(&[("search_query", query)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::ExternalApi(format!(
                "YouTube search returned status {}",
                status
            )));
        }

        let html = response.text().await?;
        let video_id = extract_video_id(&html);
        if video_id.is_none() {
            tracing::warn!(query = %query, "No video found in YouTube results");
        }

        Ok(video_id)
    }
}

#[async_trait::async_trait]
impl TrailerFinder for YoutubeTrailerFinder {
    async fn find_trailer(&self, title: &str, year: Option<i32>) -> AppResult<Option<String>> {
        if title.trim().is_empty() {
            return Err(AppError::InvalidInput("Title cannot be empty".to_string()));
        }

        let query = trailer_query(title, year);
        cached!(
            self.cache,
            CacheKey::Trailer {
                title: title.to_string(),
                year,
            },
            TRAILER_CACHE_TTL,
            self.search(&query)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(script: &str) -> String {
        format!(
            "<html><head></head><body><script nonce=\"x\">{}</script><script>var other = 1;</script></body></html>",
            script
        )
    }

    #[test]
    fn test_extracts_first_search_result() {
        let data = r#"{"contents":{"twoColumnSearchResultsRenderer":{"primaryContents":{"sectionListRenderer":{"contents":[{"itemSectionRenderer":{"contents":[{"adSlotRenderer":{}},{"videoRenderer":{"videoId":"abc123"}},{"videoRenderer":{"videoId":"def456"}}]}}]}}}}}"#;
        let html = page(&format!("var ytInitialData = {};", data));
        assert_eq!(extract_video_id(&html), Some("abc123".to_string()));
    }

    #[test]
    fn test_extracts_from_watch_next_layout() {
        let data = r#"{"contents":{"twoColumnWatchNextResults":{"secondaryResults":{"secondaryResults":{"results":[{"compactVideoRenderer":{"videoId":"zzz999"}}]}}}}}"#;
        let html = page(&format!("window[\"ytInitialData\"] = {};", data));
        assert_eq!(extract_video_id(&html), Some("zzz999".to_string()));
    }

    #[test]
    fn test_missing_initial_data_is_none() {
        assert_eq!(extract_video_id("<html>nothing here</html>"), None);
    }

    #[test]
    fn test_unexpected_layout_is_none() {
        let html = page(r#"var ytInitialData = {"contents":{"somethingElse":{}}};"#);
        assert_eq!(extract_video_id(&html), None);
    }

    #[test]
    fn test_trailer_query() {
        assert_eq!(trailer_query("Heat ", Some(1995)), "Heat 1995 trailer");
        assert_eq!(trailer_query("Heat", None), "Heat trailer");
    }
}
