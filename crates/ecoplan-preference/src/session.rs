//! Serialized "apply feedback, then persist" cycles.
//!
//! A [`PreferenceSession`] owns the in-memory model and the store for the
//! lifetime of one calling session. Every feedback batch is applied to the
//! scores the store holds at that moment, inside [`StateStore::update`], so a
//! batch never overwrites updates another session persisted in between. The
//! session mutex additionally serializes callers sharing one session.

use std::sync::{Mutex, MutexGuard, PoisonError};

use ecoplan_core::{Feedback, Preference, ScoreMap};
use serde::Serialize;

use crate::error::Result;
use crate::model::{PreferenceConfig, PreferenceModel, RewardPolicy, ScoreChange};
use crate::store::StateStore;

/// Outcome of one feedback batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackReport {
    pub changes: Vec<ScoreChange>,
}

impl FeedbackReport {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug)]
struct SessionState {
    model: PreferenceModel,
    /// Feedback applied in memory but not yet written to the store.
    pending: Vec<Feedback>,
}

#[derive(Debug)]
pub struct PreferenceSession<S: StateStore> {
    store: S,
    rewards: RewardPolicy,
    state: Mutex<SessionState>,
}

impl<S: StateStore> PreferenceSession<S> {
    /// Loads persisted scores; an absent store starts cold, a corrupt one fails.
    pub fn open(store: S, config: PreferenceConfig) -> Result<Self> {
        let scores = store.load()?;

        #[cfg(feature = "telemetry")]
        tracing::debug!(entries = scores.len(), "preference state loaded");

        Ok(Self {
            store,
            rewards: config.rewards,
            state: Mutex::new(SessionState {
                model: PreferenceModel::from_scores(scores, config.learning_rate),
                pending: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn rewards(&self) -> &RewardPolicy {
        &self.rewards
    }

    /// Applies `batch` in order on top of the currently persisted scores and
    /// writes the result.
    ///
    /// If persisting fails the batch is still applied in memory and kept as
    /// pending (see [`PreferenceSession::retry_persist`]); the error is
    /// returned.
    pub fn record_feedback(&self, batch: &[Feedback]) -> Result<FeedbackReport> {
        let mut state = self.lock();
        if batch.is_empty() {
            return Ok(FeedbackReport {
                changes: Vec::new(),
            });
        }
        state.pending.extend_from_slice(batch);
        match self.flush_locked(&mut state) {
            Ok(report) => Ok(report),
            Err(err) => {
                state.model.apply_feedback(batch, &self.rewards);
                Err(err)
            }
        }
    }

    /// Writes pending feedback again after an earlier failure.
    ///
    /// Returns the applied changes, or `None` when nothing was pending.
    pub fn retry_persist(&self) -> Result<Option<FeedbackReport>> {
        let mut state = self.lock();
        if state.pending.is_empty() {
            return Ok(None);
        }
        self.flush_locked(&mut state).map(Some)
    }

    fn flush_locked(&self, state: &mut SessionState) -> Result<FeedbackReport> {
        let learning_rate = state.model.learning_rate();
        let pending = &state.pending;
        let mut changes = Vec::new();

        let outcome = self.store.update(&mut |scores| {
            let mut model = PreferenceModel::from_scores(std::mem::take(scores), learning_rate);
            changes = model.apply_feedback(pending, &self.rewards);
            *scores = model.snapshot();
        });

        match outcome {
            Ok(saved) => {
                state.model = PreferenceModel::from_scores(saved, learning_rate);
                state.pending.clear();
                Ok(FeedbackReport { changes })
            }
            Err(err) => {
                crate::log_warning(
                    "persisting preference scores failed; keeping in-memory state",
                    &err,
                );
                Err(err)
            }
        }
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.lock().pending.is_empty()
    }

    pub fn score(&self, action_id: &str) -> f64 {
        self.lock().model.score(action_id)
    }

    /// Copy of the current scores.
    pub fn scores(&self) -> ScoreMap {
        self.lock().model.snapshot()
    }

    /// Copy of the current model, e.g. to bias the optimizer.
    pub fn model(&self) -> PreferenceModel {
        self.lock().model.clone()
    }
}
