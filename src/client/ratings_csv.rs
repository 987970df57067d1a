//! Import of an IMDb "Your Ratings" CSV export.

use std::{io::Read, path::Path};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::models::RatedTitle;

use super::{ClientError, ClientResult};

/// Number of top-rated titles sent with a request
pub const MAX_IMPORTED_RATINGS: usize = 100;

#[derive(Debug, Deserialize)]
struct RatingRow {
    #[serde(rename = "Const", default)]
    imdb_id: Option<String>,
    #[serde(rename = "Your Rating", default)]
    rating: Option<String>,
    #[serde(rename = "Date Rated", default)]
    date_rated: Option<String>,
    #[serde(rename = "Title", default)]
    title: Option<String>,
    #[serde(rename = "Year", default)]
    year: Option<String>,
}

struct ImportedRating {
    rated: RatedTitle,
    date_rated: Option<NaiveDate>,
}

impl RatingRow {
    fn into_rating(self) -> Option<ImportedRating> {
        self.imdb_id.filter(|id| !id.trim().is_empty())?;

        let rating = self.rating?.trim().parse::<u8>().ok()?;
        if !(1..=10).contains(&rating) {
            return None;
        }

        let title = self.title?.replace('"', "").trim().to_string();
        if title.is_empty() {
            return None;
        }

        Some(ImportedRating {
            rated: RatedTitle {
                title,
                year: self.year.and_then(|y| y.trim().parse().ok()),
                user_rating: rating,
            },
            date_rated: self
                .date_rated
                .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok()),
        })
    }
}

/// Highest-rated titles first, most recently rated first among equals
pub fn parse_ratings<R: Read>(reader: R) -> ClientResult<Vec<RatedTitle>> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let mut ratings = Vec::new();
    let mut skipped = 0usize;
    for row in csv.deserialize::<RatingRow>() {
        let row = row.map_err(|e| ClientError::Decode(format!("CSV parsing error: {}", e)))?;
        match row.into_rating() {
            Some(rating) => ratings.push(rating),
            None => skipped += 1,
        }
    }

    if ratings.is_empty() {
        return Err(ClientError::Decode(
            "No valid ratings found. The file needs 'Const', 'Your Rating', 'Title' and 'Year' columns."
                .to_string(),
        ));
    }

    ratings.sort_by(|a, b| {
        b.rated
            .user_rating
            .cmp(&a.rated.user_rating)
            .then_with(|| b.date_rated.cmp(&a.date_rated))
    });

    tracing::info!(
        imported = ratings.len().min(MAX_IMPORTED_RATINGS),
        total = ratings.len(),
        skipped,
        "Ratings imported"
    );

    Ok(ratings
        .into_iter()
        .take(MAX_IMPORTED_RATINGS)
        .map(|r| r.rated)
        .collect())
}

pub fn read_ratings_file(path: &Path) -> ClientResult<Vec<RatedTitle>> {
    let file = std::fs::File::open(path).map_err(|e| {
        ClientError::Decode(format!("Cannot open {}: {}", path.display(), e))
    })?;
    parse_ratings(file)
}
