use std::{collections::HashMap, sync::Arc};

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Semaphore};

use crate::models::{MovieDetail, Recommendation, StreamEvent};

use super::{
    decoder::IncrementalJsonDecoder,
    display::{project, TrailerState, ViewItem},
    events::ChunkPayload,
    scheduler::{ResolutionJob, ResolutionScheduler},
    ClientResult,
};

/// Catalog-side lookups a session depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TitleMatcher: Send + Sync {
    /// `Ok(None)` means the catalog has no match
    async fn match_title(&self, title: &str, year: Option<i32>) -> ClientResult<Option<MovieDetail>>;

    async fn find_trailer(&self, title: &str, year: Option<i32>) -> ClientResult<Option<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "error", rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Streaming,
    Completed,
    Failed(String),
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Failed(_))
    }
}

/// Input to the session reducer
///
/// Lookup results carry the generation they were started in, so results that
/// arrive after a new submission are dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    FragmentReceived(String),
    StreamCompleted,
    StreamFailed(String),
    LookupResolved {
        generation: u64,
        index: usize,
        detail: MovieDetail,
    },
    LookupFailed {
        generation: u64,
        index: usize,
        reason: String,
    },
    TrailerRequested(usize),
    TrailerResolved {
        generation: u64,
        index: usize,
        video_id: Option<String>,
    },
}

/// Side effect requested by the reducer
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Resolve {
        generation: u64,
        job: ResolutionJob,
    },
    FindTrailer {
        generation: u64,
        index: usize,
        title: String,
        year: Option<i32>,
    },
}

/// All client state of one submission
///
/// Transitions are synchronous and return the lookups to start; nothing in
/// here performs I/O.
#[derive(Debug)]
pub struct SessionState {
    generation: u64,
    phase: SessionPhase,
    decoder: IncrementalJsonDecoder,
    scheduler: ResolutionScheduler,
    recommendations: Vec<Recommendation>,
    trailers: HashMap<usize, TrailerState>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            generation: 0,
            phase: SessionPhase::Idle,
            decoder: IncrementalJsonDecoder::new(),
            scheduler: ResolutionScheduler::new(),
            recommendations: Vec::new(),
            trailers: HashMap::new(),
        }
    }

    /// Discards everything from the previous submission and starts streaming
    pub fn reset(&mut self) {
        self.generation += 1;
        self.phase = SessionPhase::Streaming;
        self.decoder = IncrementalJsonDecoder::new();
        self.scheduler = ResolutionScheduler::new();
        self.recommendations.clear();
        self.trailers.clear();
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn recommendations(&self) -> &[Recommendation] {
        &self.recommendations
    }

    /// True once the stream is over and no lookup is outstanding
    pub fn is_settled(&self) -> bool {
        self.phase.is_terminal()
            && self.scheduler.table().pending() == 0
            && !self
                .trailers
                .values()
                .any(|t| matches!(t, TrailerState::Searching))
    }

    pub fn view(&self) -> Vec<ViewItem> {
        let mut items = project(&self.recommendations, self.scheduler.table());
        for item in &mut items {
            if let Some(trailer) = self.trailers.get(&item.index) {
                item.trailer = trailer.clone();
            }
        }
        items
    }

    pub fn apply(&mut self, event: SessionEvent) -> Vec<Job> {
        match event {
            SessionEvent::FragmentReceived(fragment) => {
                if self.phase != SessionPhase::Streaming {
                    tracing::debug!("Ignoring fragment outside of a streaming session");
                    return Vec::new();
                }
                self.recommendations = self.decoder.feed(&fragment).to_vec();
                let jobs = self.scheduler.on_list(&self.recommendations);
                self.resolve_jobs(jobs)
            }
            SessionEvent::StreamCompleted => {
                if self.phase != SessionPhase::Streaming {
                    return Vec::new();
                }
                self.recommendations = self.decoder.finish().to_vec();
                self.phase = SessionPhase::Completed;
                tracing::info!(
                    recommendations = self.recommendations.len(),
                    "Recommendation stream completed"
                );
                let jobs = self.scheduler.on_stream_end(&self.recommendations);
                self.resolve_jobs(jobs)
            }
            SessionEvent::StreamFailed(message) => {
                if self.phase.is_terminal() {
                    return Vec::new();
                }
                tracing::error!(error = %message, "Recommendation stream failed");
                self.phase = SessionPhase::Failed(message);
                if self.decoder.is_complete() {
                    // The document closed before the failure, so its tail is final
                    let jobs = self.scheduler.on_stream_end(&self.recommendations);
                    return self.resolve_jobs(jobs);
                }
                // A truncated tail is never looked up
                self.scheduler.abandon(&self.recommendations);
                Vec::new()
            }
            SessionEvent::LookupResolved {
                generation,
                index,
                detail,
            } => {
                if self.is_current(generation) {
                    self.scheduler.record(index, Some(detail));
                }
                Vec::new()
            }
            SessionEvent::LookupFailed {
                generation,
                index,
                reason,
            } => {
                if self.is_current(generation) {
                    tracing::debug!(index, reason = %reason, "Title not resolved");
                    self.scheduler.record(index, None);
                }
                Vec::new()
            }
            SessionEvent::TrailerRequested(index) => self.request_trailer(index),
            SessionEvent::TrailerResolved {
                generation,
                index,
                video_id,
            } => {
                if self.is_current(generation) {
                    let state = match video_id {
                        Some(video_id) => TrailerState::Found(video_id),
                        None => TrailerState::NotFound,
                    };
                    self.trailers.insert(index, state);
                }
                Vec::new()
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        if generation != self.generation {
            tracing::debug!(
                stale = generation,
                current = self.generation,
                "Dropping result from a previous submission"
            );
            return false;
        }
        true
    }

    fn resolve_jobs(&self, jobs: Vec<ResolutionJob>) -> Vec<Job> {
        jobs.into_iter()
            .map(|job| Job::Resolve {
                generation: self.generation,
                job,
            })
            .collect()
    }

    fn request_trailer(&mut self, index: usize) -> Vec<Job> {
        let Some(recommendation) = self.recommendations.get(index) else {
            tracing::warn!(index, "Trailer requested for an unknown item");
            return Vec::new();
        };
        if matches!(self.trailers.get(&index), Some(TrailerState::Searching)) {
            return Vec::new();
        }

        let job = Job::FindTrailer {
            generation: self.generation,
            index,
            title: recommendation.title.clone(),
            year: recommendation.year,
        };
        self.trailers.insert(index, TrailerState::Searching);
        vec![job]
    }
}

/// Manual actions accepted while a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    FindTrailer(usize),
}

/// Published after every state change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub generation: u64,
    pub phase: SessionPhase,
    pub items: Vec<ViewItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub items: Vec<ViewItem>,
    /// Whole-operation failure, if any
    pub error: Option<String>,
}

/// Drives `SessionState` from an event stream and runs the lookups it asks for
///
/// Lookups run as independent tasks and report back through a channel; the
/// controller is the only writer of the state.
pub struct SessionController<M: TitleMatcher + ?Sized + 'static> {
    matcher: Arc<M>,
    state: SessionState,
    limiter: Option<Arc<Semaphore>>,
    completions_tx: mpsc::UnboundedSender<SessionEvent>,
    completions_rx: mpsc::UnboundedReceiver<SessionEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl<M: TitleMatcher + ?Sized + 'static> SessionController<M> {
    /// `max_lookups` bounds concurrent lookups; `None` leaves them unbounded
    pub fn new(matcher: Arc<M>, max_lookups: Option<usize>) -> Self {
        let state = SessionState::new();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (snapshots, _) = watch::channel(SessionSnapshot {
            generation: state.generation(),
            phase: state.phase().clone(),
            items: Vec::new(),
        });

        Self {
            matcher,
            state,
            limiter: max_lookups.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            completions_tx,
            completions_rx,
            snapshots,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Runs one submission to completion
    ///
    /// Returns once the stream has ended, every lookup has settled and the
    /// command channel (if any) is closed.
    pub async fn run<S>(
        &mut self,
        events: S,
        mut commands: Option<mpsc::Receiver<SessionCommand>>,
    ) -> SessionOutcome
    where
        S: Stream<Item = ClientResult<StreamEvent>>,
    {
        self.state.reset();
        self.publish();

        let mut events = std::pin::pin!(events);
        let mut stream_done = false;
        let mut commands_open = commands.is_some();

        loop {
            if stream_done && !commands_open && self.state.is_settled() {
                break;
            }

            tokio::select! {
                event = events.next(), if !stream_done => {
                    let session_event = match event {
                        Some(Ok(StreamEvent::DataLine(payload))) => match ChunkPayload::parse(&payload) {
                            ChunkPayload::Content(text) => Some(SessionEvent::FragmentReceived(text)),
                            ChunkPayload::Error(message) => Some(SessionEvent::StreamFailed(message)),
                            ChunkPayload::Ignored => None,
                        },
                        Some(Ok(StreamEvent::Sentinel)) => {
                            stream_done = true;
                            Some(SessionEvent::StreamCompleted)
                        }
                        Some(Err(e)) => {
                            stream_done = true;
                            Some(SessionEvent::StreamFailed(e.to_string()))
                        }
                        None => {
                            stream_done = true;
                            Some(SessionEvent::StreamFailed(
                                "Stream ended before the end marker".to_string(),
                            ))
                        }
                    };
                    if let Some(session_event) = session_event {
                        self.dispatch(session_event);
                    }
                }
                Some(completion) = self.completions_rx.recv() => {
                    self.dispatch(completion);
                }
                command = next_command(&mut commands), if commands_open => match command {
                    Some(SessionCommand::FindTrailer(index)) => {
                        self.dispatch(SessionEvent::TrailerRequested(index));
                    }
                    None => commands_open = false,
                },
            }
        }

        SessionOutcome {
            items: self.state.view(),
            error: match self.state.phase() {
                SessionPhase::Failed(message) => Some(message.clone()),
                _ => None,
            },
        }
    }

    fn dispatch(&mut self, event: SessionEvent) {
        for job in self.state.apply(event) {
            self.spawn(job);
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshots.send_replace(SessionSnapshot {
            generation: self.state.generation(),
            phase: self.state.phase().clone(),
            items: self.state.view(),
        });
    }

    fn spawn(&self, job: Job) {
        let matcher = Arc::clone(&self.matcher);
        let limiter = self.limiter.clone();
        let completions = self.completions_tx.clone();

        tokio::spawn(async move {
            let _permit = match limiter {
                Some(limiter) => limiter.acquire_owned().await.ok(),
                None => None,
            };

            let event = match job {
                Job::Resolve { generation, job } => {
                    match matcher.match_title(&job.title, job.year).await {
                        Ok(Some(detail)) => SessionEvent::LookupResolved {
                            generation,
                            index: job.index,
                            detail,
                        },
                        Ok(None) => SessionEvent::LookupFailed {
                            generation,
                            index: job.index,
                            reason: "no catalog match".to_string(),
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, title = %job.title, "Title lookup failed");
                            SessionEvent::LookupFailed {
                                generation,
                                index: job.index,
                                reason: e.to_string(),
                            }
                        }
                    }
                }
                Job::FindTrailer {
                    generation,
                    index,
                    title,
                    year,
                } => {
                    let video_id = match matcher.find_trailer(&title, year).await {
                        Ok(video_id) => video_id,
                        Err(e) => {
                            tracing::warn!(error = %e, title = %title, "Trailer lookup failed");
                            None
                        }
                    };
                    SessionEvent::TrailerResolved {
                        generation,
                        index,
                        video_id,
                    }
                }
            };

            // The controller may be gone already
            let _ = completions.send(event);
        });
    }
}

async fn next_command(
    commands: &mut Option<mpsc::Receiver<SessionCommand>>,
) -> Option<SessionCommand> {
    match commands {
        Some(commands) => commands.recv().await,
        None => std::future::pending().await,
    }
}

/// Runs a single submission with a fresh controller
pub async fn run_session<M, S>(
    matcher: Arc<M>,
    events: S,
    commands: Option<mpsc::Receiver<SessionCommand>>,
    max_lookups: Option<usize>,
) -> SessionOutcome
where
    M: TitleMatcher + ?Sized + 'static,
    S: Stream<Item = ClientResult<StreamEvent>>,
{
    SessionController::new(matcher, max_lookups)
        .run(events, commands)
        .await
}
