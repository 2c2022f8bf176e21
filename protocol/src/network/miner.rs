//! # Proof-of-Work Miner
//!
//! Searches the nonce space from zero upward for the smallest nonce whose
//! [`pow_hash`] carries the requested number of leading zeros. The miner
//! knows nothing about blocks, chains or peers.
//!
//! ```text
//!            start_mining               found
//!   Idle ───────────────────▶ Searching ───────▶ Idle (Found)
//!                                 │
//!                                 │ stop_mining / different job
//!                                 ▼
//!                               Idle (Adopted | Interrupted)
//! ```
//!
//! ## Design Decisions
//!
//! - The search runs on its own OS thread and checks an atomic cancel flag
//!   before every hash, so a stop takes effect within one hash computation.
//! - The outcome is published once on a `tokio::sync::watch` channel. Any
//!   number of waiters can subscribe, and late subscribers see the
//!   published value immediately.
//! - `start_mining` with the job that is already running joins it, and
//!   the job that was last solved returns the stored nonce without a new
//!   search. A different job cancels the running search; its waiters see
//!   [`MinerError::InterruptedWait`]. [`MiningTicket::is_fresh`] tells
//!   callers whether a new search actually started, which is what stops
//!   two idle nodes from relaying the same start command back and forth.
//! - `stop_mining(nonce)` adopts `nonce` as the outcome when it satisfies
//!   the active job, which lets one node's success end every other node's
//!   search with the same answer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::crypto::hash::{meets_difficulty, pow_hash};

/// Errors surfaced to callers waiting on a search.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MinerError {
    /// The search ended without a usable nonce: stopped with a nonce that
    /// does not satisfy the job, superseded by another job, or torn down.
    #[error("mining wait interrupted for job {data:?} at difficulty {difficulty}")]
    InterruptedWait { data: String, difficulty: u32 },
}

// ---------------------------------------------------------------------------
// Job and Outcome
// ---------------------------------------------------------------------------

/// What to search for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningJob {
    pub data: String,
    pub difficulty: u32,
}

/// How a search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MiningOutcome {
    /// This miner found the nonce itself.
    Found(u64),
    /// The search was stopped with a valid nonce found elsewhere.
    Adopted(u64),
    /// Stopped without a valid nonce, or replaced by a different job.
    Interrupted,
}

impl MiningOutcome {
    pub fn nonce(&self) -> Option<u64> {
        match self {
            MiningOutcome::Found(n) | MiningOutcome::Adopted(n) => Some(*n),
            MiningOutcome::Interrupted => None,
        }
    }
}

/// Handle on a running or finished search.
#[derive(Debug, Clone)]
pub struct MiningTicket {
    job: MiningJob,
    fresh: bool,
    outcome: watch::Receiver<Option<MiningOutcome>>,
}

impl MiningTicket {
    /// True when this call started a new search rather than joining or
    /// reusing one.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    /// Outcome if the search has already ended.
    pub fn try_outcome(&self) -> Option<MiningOutcome> {
        *self.outcome.borrow()
    }

    /// Waits for the search to end.
    pub async fn outcome(mut self) -> MiningOutcome {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(value) => (*value).unwrap_or(MiningOutcome::Interrupted),
            // Sender dropped without publishing: treat as interrupted.
            Err(_) => MiningOutcome::Interrupted,
        }
    }

    /// Waits for the search and returns the nonce.
    pub async fn wait(self) -> Result<u64, MinerError> {
        let job = self.job.clone();
        self.outcome()
            .await
            .nonce()
            .ok_or(MinerError::InterruptedWait {
                data: job.data,
                difficulty: job.difficulty,
            })
    }
}

// ---------------------------------------------------------------------------
// Miner
// ---------------------------------------------------------------------------

struct ActiveSearch {
    job: MiningJob,
    cancel: Arc<AtomicBool>,
    outcome: Arc<watch::Sender<Option<MiningOutcome>>>,
}

impl ActiveSearch {
    fn is_running(&self) -> bool {
        self.outcome.borrow().is_none()
    }

    fn is_solved(&self) -> bool {
        matches!(
            *self.outcome.borrow(),
            Some(MiningOutcome::Found(_) | MiningOutcome::Adopted(_))
        )
    }

    fn ticket(&self, fresh: bool) -> MiningTicket {
        MiningTicket {
            job: self.job.clone(),
            fresh,
            outcome: self.outcome.subscribe(),
        }
    }

    /// Cancels the worker and publishes `outcome` unless one is already set.
    fn finish(&self, outcome: MiningOutcome) -> bool {
        self.cancel.store(true, Ordering::Release);
        publish(&self.outcome, outcome)
    }
}

fn publish(sender: &watch::Sender<Option<MiningOutcome>>, outcome: MiningOutcome) -> bool {
    sender.send_if_modified(|slot| {
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        true
    })
}

/// One proof-of-work search slot.
#[derive(Default)]
pub struct Miner {
    active: Mutex<Option<ActiveSearch>>,
}

impl Miner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins searching for `job`, joins the identical search already
    /// running, or hands back the stored result when `job` was the last
    /// one solved.
    pub fn start_mining(&self, data: impl Into<String>, difficulty: u32) -> MiningTicket {
        let job = MiningJob {
            data: data.into(),
            difficulty,
        };
        let mut active = self.active.lock();

        if let Some(search) = active.as_ref() {
            if search.job == job && (search.is_running() || search.is_solved()) {
                debug!(difficulty, "reusing search for identical job");
                return search.ticket(false);
            }
            if search.is_running() {
                info!(
                    old = %search.job.data,
                    new = %job.data,
                    "restarting miner on a different job"
                );
                search.finish(MiningOutcome::Interrupted);
            }
        }

        let (sender, _) = watch::channel(None);
        let search = ActiveSearch {
            job: job.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
            outcome: Arc::new(sender),
        };
        let ticket = search.ticket(true);

        let cancel = Arc::clone(&search.cancel);
        let outcome = Arc::clone(&search.outcome);
        let spawned = thread::Builder::new()
            .name("registu-miner".into())
            .spawn(move || search_nonce(&job, &cancel, &outcome));
        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn miner thread");
            publish(&search.outcome, MiningOutcome::Interrupted);
        }

        *active = Some(search);
        ticket
    }

    /// Stops the running search. `observed` becomes the outcome if it
    /// satisfies the active job; otherwise waiters are interrupted.
    ///
    /// Returns the outcome that was published, or `None` when nothing was
    /// running.
    pub fn stop_mining(&self, observed: u64) -> Option<MiningOutcome> {
        let active = self.active.lock();
        let search = active.as_ref().filter(|s| s.is_running())?;

        let hash = pow_hash(&search.job.data, observed);
        let outcome = if meets_difficulty(&hash, search.job.difficulty) {
            MiningOutcome::Adopted(observed)
        } else {
            MiningOutcome::Interrupted
        };
        if !search.finish(outcome) {
            // The worker published first.
            return *search.outcome.borrow();
        }
        debug!(nonce = observed, ?outcome, "miner stopped");
        Some(outcome)
    }

    /// Non-blocking status query.
    pub fn is_mining(&self) -> bool {
        self.active.lock().as_ref().map_or(false, ActiveSearch::is_running)
    }

}

impl Drop for Miner {
    fn drop(&mut self) {
        if let Some(search) = self.active.get_mut().as_ref() {
            search.finish(MiningOutcome::Interrupted);
        }
    }
}

/// Sequential search from nonce 0, checking `cancel` before each hash.
fn search_nonce(
    job: &MiningJob,
    cancel: &AtomicBool,
    outcome: &watch::Sender<Option<MiningOutcome>>,
) {
    for nonce in 0..=u64::MAX {
        if cancel.load(Ordering::Acquire) {
            return;
        }
        if meets_difficulty(&pow_hash(&job.data, nonce), job.difficulty) {
            if publish(outcome, MiningOutcome::Found(nonce)) {
                debug!(nonce, difficulty = job.difficulty, "nonce found");
            }
            return;
        }
    }
    publish(outcome, MiningOutcome::Interrupted);
}
