use crate::error::{EngramError, Result};
use crate::model::ChangeLogEntry;

use super::SyncEngine;
use super::transport::{PushOutcome, PushRequest, WireChangeEntry};

const PUSH_BATCH_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Default)]
pub struct PushReport {
    pub batches_sent: u32,
    pub entries_pushed: u64,
    pub last_push_seq: i64,
}

impl<'a> SyncEngine<'a> {
    /// Drain the local change log authored by this client, one batch at a
    /// time, retrying transient failures with capped exponential backoff
    /// under a single reused `push_id` per attempt.
    pub fn push(&self, ctx: &super::SyncContext) -> Result<PushReport> {
        let source_id = self.store.source_id()?;
        let mut cursor = self.store.last_push_seq()?;
        let mut report = PushReport { last_push_seq: cursor, ..Default::default() };

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(EngramError::Cancelled);
            }
            let batch = self.store.unpushed_changes(&source_id, cursor, PUSH_BATCH_LIMIT)?;
            if batch.is_empty() {
                break;
            }

            let highest_seq = batch.iter().map(|c| c.sequence).max().unwrap_or(cursor);
            let push_id = uuid::Uuid::new_v4().to_string();
            let request = build_request(&push_id, &source_id, &batch);

            let accepted = self.send_with_retry(&request, ctx)?;
            if accepted {
                self.store.set_last_push_seq(highest_seq)?;
                cursor = highest_seq;
                report.batches_sent += 1;
                report.entries_pushed += batch.len() as u64;
                report.last_push_seq = cursor;
                tracing::info!(batch_len = batch.len(), cursor, "push batch accepted");
            }
        }
        Ok(report)
    }

    fn send_with_retry(&self, request: &PushRequest, ctx: &super::SyncContext) -> Result<bool> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if ctx.cancel.is_cancelled() {
                return Err(EngramError::Cancelled);
            }
            // A transport-level `Err` (connection refused, timeout, DNS
            // failure) is a network failure exactly like an HTTP 5xx
            // response and must retry the same way, so it is folded into
            // the `Transient` arm below rather than short-circuited by `?`.
            let outcome = match self.transport.push(&self.store_id, request) {
                Ok(outcome) => outcome,
                Err(EngramError::Cancelled) => return Err(EngramError::Cancelled),
                Err(err) => PushOutcome::Transient(err.to_string()),
            };
            match outcome {
                PushOutcome::Accepted { .. } | PushOutcome::IdempotentReplay => return Ok(true),
                PushOutcome::Validation { errors } => {
                    tracing::warn!(count = errors.len(), "push validation rejected");
                    return Err(EngramError::PushValidation { errors });
                }
                PushOutcome::SchemaMismatch { client_version, server_version, detail } => {
                    tracing::error!(%client_version, %server_version, "push schema mismatch");
                    return Err(EngramError::SchemaMismatch { client_version, server_version, detail });
                }
                PushOutcome::Transient(reason) => {
                    if attempt >= self.retry.max_attempts {
                        tracing::error!(attempt, %reason, "push exhausted retries");
                        return Err(EngramError::Transport(reason));
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(attempt, ?delay, %reason, "push transient failure, retrying");
                    if ctx.cancel.is_cancelled() {
                        return Err(EngramError::Cancelled);
                    }
                    self.clock.sleep(delay);
                }
            }
        }
    }
}

fn build_request(push_id: &str, source_id: &str, batch: &[ChangeLogEntry]) -> PushRequest {
    PushRequest {
        push_id: push_id.to_string(),
        source_id: source_id.to_string(),
        schema_version: super::SCHEMA_VERSION,
        entries: batch.iter().map(to_wire).collect(),
    }
}

fn to_wire(entry: &ChangeLogEntry) -> WireChangeEntry {
    WireChangeEntry {
        sequence: entry.sequence,
        table_name: entry.table_name.clone(),
        entity_id: entry.entity_id.clone(),
        operation: entry.operation,
        payload: entry.payload.clone(),
        source_id: entry.source_id.clone(),
        created_at: entry.created_at,
        received_at: entry.received_at,
    }
}
