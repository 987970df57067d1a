use crate::models::{MovieDetail, Recommendation};

/// Resolution state of one list index
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionRecord {
    Pending,
    Resolved(MovieDetail),
    /// No catalog match or the lookup failed. Terminal, never retried.
    Failed,
}

/// Per-index resolution records, written once each
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionTable {
    records: Vec<Option<ResolutionRecord>>,
}

impl ResolutionTable {
    pub fn get(&self, index: usize) -> Option<&ResolutionRecord> {
        self.records.get(index).and_then(Option::as_ref)
    }

    /// Creates a `Pending` record; false if the index already has one
    fn mark_pending(&mut self, index: usize) -> bool {
        if self.records.len() <= index {
            self.records.resize(index + 1, None);
        }
        match self.records[index] {
            Some(_) => false,
            None => {
                self.records[index] = Some(ResolutionRecord::Pending);
                true
            }
        }
    }

    /// Writes a terminal `Failed` record for an index that was never looked up
    fn mark_failed(&mut self, index: usize) {
        if self.records.len() <= index {
            self.records.resize(index + 1, None);
        }
        if self.records[index].is_none() {
            self.records[index] = Some(ResolutionRecord::Failed);
        }
    }

    /// Moves a `Pending` record to its terminal state
    fn complete(&mut self, index: usize, detail: Option<MovieDetail>) -> bool {
        match self.records.get_mut(index) {
            Some(slot @ Some(ResolutionRecord::Pending)) => {
                *slot = Some(match detail {
                    Some(detail) => ResolutionRecord::Resolved(detail),
                    None => ResolutionRecord::Failed,
                });
                true
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r, Some(ResolutionRecord::Pending)))
            .count()
    }
}

/// A lookup the caller should start
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionJob {
    pub index: usize,
    pub title: String,
    pub year: Option<i32>,
}

impl ResolutionJob {
    fn new(index: usize, recommendation: &Recommendation) -> Self {
        Self {
            index,
            title: recommendation.title.clone(),
            year: recommendation.year,
        }
    }
}

/// Decides which indices of the growing list are final enough to look up
///
/// While the stream is open only indices before the tail are scheduled, since
/// the tail may still be mid-generation. Once the stream ends the tail is
/// scheduled too. Every index is scheduled at most once.
#[derive(Debug, Default)]
pub struct ResolutionScheduler {
    scheduled: usize,
    closed: bool,
    table: ResolutionTable,
}

impl ResolutionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs for indices that stopped being the tail since the last call
    pub fn on_list(&mut self, list: &[Recommendation]) -> Vec<ResolutionJob> {
        if self.closed {
            return Vec::new();
        }
        self.schedule_until(list, list.len().saturating_sub(1))
    }

    /// Jobs for everything not yet scheduled, including the tail
    pub fn on_stream_end(&mut self, list: &[Recommendation]) -> Vec<ResolutionJob> {
        if self.closed {
            return Vec::new();
        }
        let jobs = self.schedule_until(list, list.len());
        self.closed = true;
        jobs
    }

    /// Stops scheduling without treating the tail as final
    ///
    /// Indices that were never scheduled get a `Failed` record, so no item of
    /// an abandoned list is left waiting for a lookup.
    pub fn abandon(&mut self, list: &[Recommendation]) {
        if self.closed {
            return;
        }
        while self.scheduled < list.len() {
            self.table.mark_failed(self.scheduled);
            self.scheduled += 1;
        }
        self.closed = true;
    }

    /// Records a lookup result; false for an index that was not pending
    pub fn record(&mut self, index: usize, detail: Option<MovieDetail>) -> bool {
        let written = self.table.complete(index, detail);
        if !written {
            tracing::warn!(index, "Ignoring resolution for an index that is not pending");
        }
        written
    }

    pub fn table(&self) -> &ResolutionTable {
        &self.table
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn schedule_until(&mut self, list: &[Recommendation], end: usize) -> Vec<ResolutionJob> {
        let mut jobs = Vec::new();
        while self.scheduled < end {
            let index = self.scheduled;
            if self.table.mark_pending(index) {
                jobs.push(ResolutionJob::new(index, &list[index]));
            }
            self.scheduled += 1;
        }
        jobs
    }
}
