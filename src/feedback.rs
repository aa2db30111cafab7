//! Translates a (reference, outcome) pair into a Store mutation. Clamping
//! and the validation-count rule live in the Store (I2, I3); this layer's
//! job is reference resolution and batching.

use serde::Serialize;

use crate::error::{EngramError, Result};
use crate::model::{Lore, Outcome};
use crate::session::SessionTracker;
use crate::store::Store;

pub struct FeedbackEngine<'a> {
    store: &'a Store,
    session: &'a SessionTracker,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackUpdate {
    pub id: String,
    pub previous: f64,
    pub current: f64,
    pub validation_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackBatchParams {
    pub helpful: Vec<String>,
    pub not_relevant: Vec<String>,
    pub incorrect: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedbackBatchResult {
    pub updated: Vec<FeedbackUpdate>,
    pub errors: Vec<(String, String)>,
}

impl<'a> FeedbackEngine<'a> {
    pub fn new(store: &'a Store, session: &'a SessionTracker) -> Self {
        FeedbackEngine { store, session }
    }

    /// Resolve `reference` via the Session Tracker's fuzzy match, falling
    /// back to treating it as a raw lore id, then apply `outcome`'s delta.
    pub fn feedback(&self, reference: &str, outcome: Outcome) -> Result<Lore> {
        let id = self.resolve_reference(reference)?;
        let span = tracing::debug_span!("feedback.apply", id = %id, ?outcome);
        let _enter = span.enter();
        self.store.apply_feedback(&id, outcome.delta(), outcome.is_helpful())
    }

    pub fn feedback_batch(&self, params: &FeedbackBatchParams) -> FeedbackBatchResult {
        let mut result = FeedbackBatchResult::default();
        let groups = [
            (Outcome::Helpful, &params.helpful),
            (Outcome::NotRelevant, &params.not_relevant),
            (Outcome::Incorrect, &params.incorrect),
        ];
        for (outcome, refs) in groups {
            for reference in refs {
                match self.resolve_reference(reference).and_then(|id| {
                    let before = self.store.get(&id)?;
                    let after = self.store.apply_feedback(&id, outcome.delta(), outcome.is_helpful())?;
                    Ok((before, after))
                }) {
                    Ok((before, after)) => result.updated.push(FeedbackUpdate {
                        id: after.id.clone(),
                        previous: before.confidence,
                        current: after.confidence,
                        validation_count: after.validation_count,
                    }),
                    Err(err) => result.errors.push((reference.clone(), err.to_string())),
                }
            }
        }
        result
    }

    fn resolve_reference(&self, reference: &str) -> Result<String> {
        let store = self.store;
        let resolved = self.session.fuzzy_match(reference, |id| store.get(id).ok().map(|l| l.content));
        match resolved {
            Some(id) => Ok(id),
            None => {
                // Not tracked this session; treat the reference as a raw lore id.
                store.get(reference).map(|l| l.id).map_err(|_| EngramError::NotFound)
            }
        }
    }
}
