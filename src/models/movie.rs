use serde::{Deserialize, Serialize};

const IMDB_TITLE_URL: &str = "https://www.imdb.com/title";

/// Catalog detail attached to a recommendation once its title is matched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MovieDetail {
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub imdb_id: Option<String>,
    #[serde(default)]
    pub imdb_link: Option<String>,
    #[serde(default)]
    pub imdb_rating: Option<f64>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub media_type: Option<String>,
}

/// Result row of the catalog substring search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub tmdb_id: i32,
    pub imdb_id: Option<String>,
    pub title: String,
    pub year: Option<i32>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub popularity: Option<f64>,
    pub vote_average: Option<f64>,
    pub media_type: String,
}

/// Body of a title match request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRequest {
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
}

/// Body of a successful trailer lookup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrailerResponse {
    pub video_id: String,
}

/// Raw `movies` row as selected by the catalog queries
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MovieRow {
    pub tmdb_id: i32,
    pub imdb_id: Option<String>,
    pub title: Option<String>,
    pub overview: Option<String>,
    pub vote_average: Option<f64>,
    pub release_year: Option<i32>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub popularity: Option<f64>,
    pub genres: Option<String>,
    pub media_type: String,
}

fn image_url(base: &str, path: Option<String>) -> Option<String> {
    path.filter(|p| !p.is_empty())
        .map(|p| format!("{}{}", base.trim_end_matches('/'), p))
}

impl MovieRow {
    /// Genres column is stored comma separated
    pub fn genre_list(&self) -> Vec<String> {
        self.genres
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn into_detail(self, image_base_url: &str) -> MovieDetail {
        let genres = self.genre_list();
        let imdb_link = self
            .imdb_id
            .as_ref()
            .map(|id| format!("{}/{}", IMDB_TITLE_URL, id));

        MovieDetail {
            title: self.title.unwrap_or_default(),
            year: self.release_year,
            description: self.overview,
            imdb_id: self.imdb_id,
            imdb_link,
            imdb_rating: self.vote_average,
            poster_path: image_url(image_base_url, self.poster_path),
            backdrop_path: image_url(image_base_url, self.backdrop_path),
            genres,
            media_type: Some(self.media_type),
        }
    }

    pub fn into_catalog_entry(self, image_base_url: &str) -> CatalogEntry {
        CatalogEntry {
            tmdb_id: self.tmdb_id,
            imdb_id: self.imdb_id,
            title: self.title.unwrap_or_default(),
            year: self.release_year,
            overview: self.overview,
            poster_path: image_url(image_base_url, self.poster_path),
            popularity: self.popularity,
            vote_average: self.vote_average,
            media_type: self.media_type,
        }
    }
}
