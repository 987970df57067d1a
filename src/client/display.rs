use serde::Serialize;

use crate::models::{MovieDetail, Recommendation};

use super::scheduler::{ResolutionRecord, ResolutionTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Not looked up yet or lookup in flight
    Loading,
    Resolved,
    /// Permanently shown without catalog detail
    NoMatch,
}

/// Manual trailer lookup state of one item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "video_id", rename_all = "snake_case")]
pub enum TrailerState {
    #[default]
    Idle,
    Searching,
    Found(String),
    NotFound,
}

/// What a front end renders for one recommendation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewItem {
    pub index: usize,
    pub title: String,
    pub year: Option<i32>,
    pub reason: String,
    pub status: ItemStatus,
    pub detail: Option<MovieDetail>,
    pub trailer: TrailerState,
}

impl ViewItem {
    pub fn is_loading(&self) -> bool {
        self.status == ItemStatus::Loading
    }
}

/// Merges the decoded list with resolution results
///
/// The title, year and reason always come from the recommendation; a resolved
/// item additionally carries its catalog detail.
pub fn project(recommendations: &[Recommendation], resolutions: &ResolutionTable) -> Vec<ViewItem> {
    recommendations
        .iter()
        .enumerate()
        .map(|(index, recommendation)| {
            let (status, detail) = match resolutions.get(index) {
                Some(ResolutionRecord::Resolved(detail)) => {
                    (ItemStatus::Resolved, Some(detail.clone()))
                }
                Some(ResolutionRecord::Failed) => (ItemStatus::NoMatch, None),
                Some(ResolutionRecord::Pending) | None => (ItemStatus::Loading, None),
            };

            ViewItem {
                index,
                title: recommendation.title.clone(),
                year: recommendation.year,
                reason: recommendation.reason.clone(),
                status,
                detail,
                trailer: TrailerState::Idle,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::scheduler::ResolutionScheduler;

    fn rec(title: &str, reason: &str) -> Recommendation {
        Recommendation {
            title: title.to_string(),
            year: Some(1999),
            reason: reason.to_string(),
        }
    }

    fn detail(title: &str) -> MovieDetail {
        MovieDetail {
            title: title.to_string(),
            year: Some(1999),
            description: Some("Catalog overview".to_string()),
            imdb_id: Some("tt0133093".to_string()),
            imdb_link: Some("https://www.imdb.com/title/tt0133093".to_string()),
            imdb_rating: Some(8.2),
            poster_path: Some("https://img/poster.jpg".to_string()),
            backdrop_path: None,
            genres: vec!["Action".to_string()],
            media_type: Some("movie".to_string()),
        }
    }

    #[test]
    fn test_project_all_states() {
        let list = vec![
            rec("The Matrix", "Mind-bending"),
            rec("Unknown Indie", "Obscure gem"),
            rec("Still Loading", "Par"),
        ];
        let mut scheduler = ResolutionScheduler::new();
        scheduler.on_list(&list);
        scheduler.record(0, Some(detail("The Matrix")));
        scheduler.record(1, None);

        let items = project(&list, scheduler.table());

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].status, ItemStatus::Resolved);
        assert_eq!(items[0].reason, "Mind-bending");
        assert_eq!(
            items[0].detail.as_ref().and_then(|d| d.poster_path.as_deref()),
            Some("https://img/poster.jpg")
        );

        assert_eq!(items[1].status, ItemStatus::NoMatch);
        assert_eq!(items[1].title, "Unknown Indie");
        assert!(items[1].detail.is_none());

        assert!(items[2].is_loading());
        assert_eq!(items[2].reason, "Par");
        assert_eq!(items[2].trailer, TrailerState::Idle);
    }

    #[test]
    fn test_project_empty() {
        assert!(project(&[], &ResolutionTable::default()).is_empty());
    }
}
