use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;

use crate::error::{AppError, AppResult};

/// Maximum number of distinct genres a genres-based request may carry
pub const MAX_GENRES: usize = 3;

/// Mood value meaning "no particular mood"
pub const DEFAULT_MOOD: &str = "whatever";

/// Kind of title the user wants recommended
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Movie,
    Tv,
    Both,
}

impl MediaType {
    /// Plural noun phrase used when scoping the prompt
    pub fn describe(&self) -> &'static str {
        match self {
            MediaType::Movie => "movies",
            MediaType::Tv => "TV shows",
            MediaType::Both => "movies or TV shows",
        }
    }
}

/// A title the user rated on IMDb
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatedTitle {
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    pub user_rating: u8,
}

/// A title the user picked as a favorite
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FavoriteTitle {
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
}

/// Formats a title as `Title (Year)`, or just `Title` when the year is unknown
fn title_with_year(title: &str, year: Option<i32>) -> String {
    match year {
        Some(year) => format!("{} ({})", title, year),
        None => title.to_string(),
    }
}

impl Display for RatedTitle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {}/10",
            title_with_year(&self.title, self.year),
            self.user_rating
        )
    }
}

impl Display for FavoriteTitle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", title_with_year(&self.title, self.year))
    }
}

/// The basis the user chose for recommendations
#[derive(Debug, Clone, PartialEq)]
pub enum Interests {
    /// Top-rated titles from an IMDb ratings export
    Ratings(Vec<RatedTitle>),
    /// Hand-picked favorite titles
    Favorites(Vec<FavoriteTitle>),
    /// Up to three favorite genres
    Genres(Vec<String>),
}

impl Interests {
    /// Wire name of the variant, as used in `interest_type`
    pub fn kind(&self) -> &'static str {
        match self {
            Interests::Ratings(_) => "imdb",
            Interests::Favorites(_) => "favorites",
            Interests::Genres(_) => "genres",
        }
    }
}

/// A validated recommendation request. Built once per submission, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct InterestRequest {
    interests: Interests,
    mood: String,
    media_type: MediaType,
}

impl InterestRequest {
    /// Validates and builds a request
    ///
    /// The active payload must be non-empty and every title non-blank. Genres are
    /// de-duplicated (case-insensitively, first spelling wins) and at most
    /// `MAX_GENRES` distinct values are accepted. A blank mood falls back to
    /// `DEFAULT_MOOD`.
    pub fn new(interests: Interests, mood: impl Into<String>, media_type: MediaType) -> AppResult<Self> {
        let interests = match interests {
            Interests::Ratings(ratings) => {
                if ratings.is_empty() {
                    return Err(AppError::InvalidInput(
                        "At least one rated title is required".to_string(),
                    ));
                }
                for rating in &ratings {
                    ensure_title(&rating.title)?;
                    if !(1..=10).contains(&rating.user_rating) {
                        return Err(AppError::InvalidInput(format!(
                            "Rating for '{}' must be between 1 and 10",
                            rating.title
                        )));
                    }
                }
                Interests::Ratings(ratings)
            }
            Interests::Favorites(favorites) => {
                if favorites.is_empty() {
                    return Err(AppError::InvalidInput(
                        "At least one favorite title is required".to_string(),
                    ));
                }
                for favorite in &favorites {
                    ensure_title(&favorite.title)?;
                }
                Interests::Favorites(favorites)
            }
            Interests::Genres(genres) => Interests::Genres(distinct_genres(genres)?),
        };

        let mood = mood.into();
        let mood = if mood.trim().is_empty() {
            DEFAULT_MOOD.to_string()
        } else {
            mood.trim().to_string()
        };

        Ok(Self {
            interests,
            mood,
            media_type,
        })
    }

    pub fn interests(&self) -> &Interests {
        &self.interests
    }

    pub fn mood(&self) -> &str {
        &self.mood
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Titles supplied by the user, which must never come back as recommendations
    pub fn seen_titles(&self) -> Vec<String> {
        match &self.interests {
            Interests::Ratings(ratings) => ratings
                .iter()
                .map(|r| title_with_year(&r.title, r.year))
                .collect(),
            Interests::Favorites(favorites) => favorites.iter().map(|f| f.to_string()).collect(),
            Interests::Genres(_) => Vec::new(),
        }
    }

    /// Converts back into the wire payload accepted by the recommendations endpoint
    pub fn to_payload(&self) -> InterestPayload {
        let mut payload = InterestPayload {
            interest_type: self.interests.kind().to_string(),
            ratings: None,
            favorite_movies: None,
            genres: None,
            mood: Some(self.mood.clone()),
            media_type: Some(self.media_type),
        };

        match &self.interests {
            Interests::Ratings(ratings) => {
                payload.ratings = Some(ratings.clone());
            }
            Interests::Favorites(favorites) => {
                payload.favorite_movies = Some(favorites.clone());
            }
            Interests::Genres(genres) => {
                payload.genres = Some(genres.clone());
            }
        }

        payload
    }
}

fn ensure_title(title: &str) -> AppResult<()> {
    if title.trim().is_empty() {
        return Err(AppError::InvalidInput("Titles cannot be blank".to_string()));
    }
    Ok(())
}

fn distinct_genres(genres: Vec<String>) -> AppResult<Vec<String>> {
    let mut seen = HashSet::new();
    let mut distinct = Vec::new();

    for genre in genres {
        let genre = genre.trim().to_string();
        if genre.is_empty() {
            return Err(AppError::InvalidInput("Genres cannot be blank".to_string()));
        }
        if seen.insert(genre.to_lowercase()) {
            distinct.push(genre);
        }
    }

    if distinct.is_empty() {
        return Err(AppError::InvalidInput(
            "At least one genre is required".to_string(),
        ));
    }
    if distinct.len() > MAX_GENRES {
        return Err(AppError::InvalidInput(format!(
            "At most {} genres may be selected, got {}",
            MAX_GENRES,
            distinct.len()
        )));
    }

    Ok(distinct)
}

/// Wire shape of a recommendation request
///
/// Only the list named by `interest_type` is read; the others are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterestPayload {
    /// One of `imdb`, `favorites`, `genres`
    pub interest_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratings: Option<Vec<RatedTitle>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorite_movies: Option<Vec<FavoriteTitle>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
}

impl TryFrom<InterestPayload> for InterestRequest {
    type Error = AppError;

    fn try_from(payload: InterestPayload) -> AppResult<Self> {
        let interests = match payload.interest_type.as_str() {
            "imdb" => Interests::Ratings(payload.ratings.unwrap_or_default()),
            "favorites" => Interests::Favorites(payload.favorite_movies.unwrap_or_default()),
            "genres" => Interests::Genres(payload.genres.unwrap_or_default()),
            other => {
                return Err(AppError::InvalidInput(format!(
                    "Unknown interest type '{}'",
                    other
                )))
            }
        };

        InterestRequest::new(
            interests,
            payload.mood.unwrap_or_else(|| DEFAULT_MOOD.to_string()),
            payload.media_type.unwrap_or_default(),
        )
    }
}
