//! Shared test helpers: a scripted in-memory queue client.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use genq_core::types::RequestId;
use genq_queue::client::QueueClient;
use genq_queue::error::{QueueError, QueueResult};
use genq_queue::messages::{RemoteState, StatusReport};
use genq_tracker::config::{PollOptions, TrackerConfig};
use genq_tracker::tracker::JobTracker;
use serde_json::json;

pub const MODEL: &str = "fal-ai/flux/dev";

/// One scripted answer to a status check.
#[derive(Debug, Clone)]
pub enum Step {
    Queued,
    Running,
    Completed,
    Failed(&'static str),
    NotFound,
    Transport,
}

impl Step {
    fn answer(&self, request_id: &str) -> QueueResult<StatusReport> {
        match self {
            Step::Queued => Ok(StatusReport::new(RemoteState::Queued)),
            Step::Running => Ok(StatusReport::new(RemoteState::Running)),
            Step::Completed => Ok(StatusReport::new(RemoteState::Completed)),
            Step::Failed(msg) => Ok(StatusReport::failed(*msg)),
            Step::NotFound => Err(QueueError::NotFound(request_id.to_string())),
            Step::Transport => Err(QueueError::Transport("connection reset".to_string())),
        }
    }
}

/// Queue client answering from per-id scripts.
///
/// Each status check pops the next step of the id's script; the last
/// step repeats once the script is exhausted.  Ids without a script
/// stay queued.
#[derive(Default)]
pub struct ScriptedQueueClient {
    scripts: Mutex<HashMap<RequestId, VecDeque<Step>>>,
    submitted: AtomicUsize,
    fail_submit: AtomicBool,
    status_delay: Mutex<Option<Duration>>,
    fetch_delay: Mutex<Option<Duration>>,
    pub submit_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedQueueClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the status answers for `request_id`.
    pub fn script(&self, request_id: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(request_id.to_string(), steps.into_iter().collect());
    }

    pub fn fail_submissions(&self) {
        self.fail_submit.store(true, Ordering::SeqCst);
    }

    pub fn delay_status_checks(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = Some(delay);
    }

    pub fn delay_fetches(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    pub fn submits(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_checks(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn next_step(&self, request_id: &str) -> Step {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(request_id) {
            Some(steps) if steps.len() > 1 => steps.pop_front().unwrap_or(Step::Queued),
            Some(steps) => steps.front().cloned().unwrap_or(Step::Queued),
            None => Step::Queued,
        }
    }
}

/// Result payload the scripted client returns for `request_id`.
pub fn result_for(request_id: &str) -> serde_json::Value {
    json!({
        "images": [{ "url": format!("https://cdn.example.com/{request_id}.png") }],
        "seed": 42,
    })
}

#[async_trait]
impl QueueClient for ScriptedQueueClient {
    async fn submit(&self, _model: &str, _input: &serde_json::Value) -> QueueResult<RequestId> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(QueueError::Api {
                status: 503,
                body: "service unavailable".to_string(),
            });
        }
        let n = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("req-{n}"))
    }

    async fn check_status(&self, _model: &str, request_id: &str) -> QueueResult<StatusReport> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.next_step(request_id).answer(request_id)
    }

    async fn fetch_result(
        &self,
        _model: &str,
        request_id: &str,
    ) -> QueueResult<serde_json::Value> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(result_for(request_id))
    }
}

/// Deterministic polling options: no jitter, 2s..30s backoff.
pub fn fast_poll() -> PollOptions {
    PollOptions::default()
        .without_jitter()
        .with_intervals(Duration::from_secs(2), Duration::from_secs(30))
}

pub fn test_config() -> TrackerConfig {
    TrackerConfig {
        poll: fast_poll(),
        ..TrackerConfig::default()
    }
}

/// Tracker over a fresh scripted client.
pub fn tracker() -> (Arc<ScriptedQueueClient>, JobTracker) {
    tracker_with(test_config())
}

pub fn tracker_with(config: TrackerConfig) -> (Arc<ScriptedQueueClient>, JobTracker) {
    let client = ScriptedQueueClient::new();
    let tracker = JobTracker::new(client.clone(), MODEL, config);
    (client, tracker)
}
