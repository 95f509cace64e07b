//! Sticky selection among versioned endpoints (`/v4` → `/v3` → `/v2`)
//!
//! The selector probes candidates from the highest rank down and remembers
//! the first one that answers. Later calls go straight to that candidate
//! until it fails `threshold` times in a row; the call after that probes
//! from the top again.

use crate::error::{BackendError, BackendErrorKind};
use std::future::Future;
use std::sync::Mutex;
use tiered_core::EndpointCandidate;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct SelectorState {
    sticky: Option<usize>,
    consecutive_failures: u32,
}

/// Endpoint selector, one per metadata backend
#[derive(Debug)]
pub struct EndpointSelector {
    /// Sorted by descending rank
    candidates: Vec<EndpointCandidate>,
    threshold: u32,
    state: Mutex<SelectorState>,
}

/// Success, `NotFound` and `Unauthorized` all prove the endpoint is alive
fn answered(err: &BackendError) -> bool {
    matches!(
        err.kind,
        BackendErrorKind::NotFound | BackendErrorKind::Unauthorized
    )
}

impl EndpointSelector {
    pub fn new(mut candidates: Vec<EndpointCandidate>, threshold: u32) -> Self {
        candidates.sort_by(|a, b| b.version_rank.cmp(&a.version_rank));
        Self {
            candidates,
            threshold: threshold.max(1),
            state: Mutex::new(SelectorState::default()),
        }
    }

    /// Candidates in probe order
    pub fn candidates(&self) -> &[EndpointCandidate] {
        &self.candidates
    }

    /// The sticky candidate, if one has been selected
    pub fn current(&self) -> Option<EndpointCandidate> {
        let state = self.lock();
        state.sticky.map(|idx| self.candidates[idx].clone())
    }

    /// Failures in a row of the sticky candidate
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Forget the sticky candidate; the next call probes from the top
    pub fn reset(&self) {
        *self.lock() = SelectorState::default();
    }

    /// Run `op` against the sticky candidate, or probe for one
    ///
    /// `op` also receives how many candidates this call may still try,
    /// counting the one passed in (always 1 for a sticky candidate), so it can
    /// share a time budget across the probe.
    ///
    /// Returns the candidate that produced the result. An error from the
    /// sticky candidate is returned as-is without trying other candidates.
    pub async fn call<F, Fut, T>(&self, mut op: F) -> Result<(EndpointCandidate, T), BackendError>
    where
        F: FnMut(EndpointCandidate, usize) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let sticky = self.lock().sticky;

        if let Some(idx) = sticky {
            let candidate = self.candidates[idx].clone();
            return match op(candidate.clone(), 1).await {
                Ok(value) => {
                    self.record_answer(idx);
                    Ok((candidate, value))
                }
                Err(err) if answered(&err) => {
                    self.record_answer(idx);
                    Err(err)
                }
                Err(err) => {
                    self.record_failure(idx, &err);
                    Err(err)
                }
            };
        }

        self.probe(op).await
    }

    async fn probe<F, Fut, T>(&self, mut op: F) -> Result<(EndpointCandidate, T), BackendError>
    where
        F: FnMut(EndpointCandidate, usize) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut last_err = None;

        for (idx, candidate) in self.candidates.iter().enumerate() {
            debug!("Probing endpoint {} ({})", candidate.label, candidate.url);
            let left = self.candidates.len() - idx;
            match op(candidate.clone(), left).await {
                Ok(value) => {
                    self.promote(idx);
                    return Ok((candidate.clone(), value));
                }
                Err(err) if answered(&err) => {
                    self.promote(idx);
                    return Err(err);
                }
                Err(err) => {
                    debug!("Endpoint {} did not answer: {}", candidate.label, err);
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| BackendError::unavailable("no endpoint candidates")))
    }

    fn promote(&self, idx: usize) {
        let mut state = self.lock();
        if state.sticky != Some(idx) {
            info!("Selected endpoint {}", self.candidates[idx].label);
        }
        state.sticky = Some(idx);
        state.consecutive_failures = 0;
    }

    fn record_answer(&self, idx: usize) {
        let mut state = self.lock();
        if state.sticky == Some(idx) {
            state.consecutive_failures = 0;
        }
    }

    fn record_failure(&self, idx: usize, err: &BackendError) {
        let mut state = self.lock();
        // another call may already have demoted or replaced it
        if state.sticky != Some(idx) {
            return;
        }

        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            warn!(
                "Demoting endpoint {} after {} consecutive failures: {}",
                self.candidates[idx].label, state.consecutive_failures, err
            );
            *state = SelectorState::default();
        } else {
            debug!(
                "Endpoint {} failed ({}/{}): {}",
                self.candidates[idx].label, state.consecutive_failures, self.threshold, err
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SelectorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
