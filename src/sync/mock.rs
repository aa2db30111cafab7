//! In-memory transport double for exercising the Sync Engine without a
//! network, used by this crate's own integration tests and available to
//! downstream callers that want to test sync flows the same way.

use std::sync::Mutex;

use crate::error::{EngramError, Result};

use super::transport::{
    DeltaResponse, HealthResponse, PushOutcome, PushRequest, SnapshotOutcome, StoreListItem,
    StoreListResponse, Transport, WireChangeEntry,
};

#[derive(Default)]
struct MockState {
    remote_log: Vec<WireChangeEntry>,
    remote_sequence: i64,
    seen_push_ids: Vec<String>,
    snapshot_bytes: Option<Vec<u8>>,
    health: Option<HealthResponse>,
    push_script: Vec<ScriptedPushResponse>,
    snapshot_script: Vec<SnapshotOutcomeScript>,
}

pub enum ScriptedPushResponse {
    Transient,
    /// Simulates a connection-level failure (timeout, refused, DNS) that
    /// never makes it to an HTTP response at all, i.e. `Transport::push`
    /// itself returns `Err` rather than `Ok(PushOutcome::Transient(_))`.
    TransportErr,
    Accept,
}

pub enum SnapshotOutcomeScript {
    Garbage,
    RetryThenServe { retries: u32 },
}

/// Records every push it receives so tests can assert idempotency (same
/// `push_id` across retries) and exposes a small scripting surface for
/// simulating transient failures.
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        MockTransport { state: Mutex::new(MockState::default()) }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_health(&self, health: HealthResponse) {
        self.state.lock().unwrap().health = Some(health);
    }

    pub fn set_snapshot_bytes(&self, bytes: Vec<u8>) {
        self.state.lock().unwrap().snapshot_bytes = Some(bytes);
    }

    pub fn queue_push_responses(&self, script: Vec<ScriptedPushResponse>) {
        self.state.lock().unwrap().push_script = script;
    }

    /// Queue scripted snapshot outcomes, first-in-first-served (internally
    /// stored reversed since `snapshot()` pops from the back).
    pub fn queue_snapshot_responses(&self, mut script: Vec<SnapshotOutcomeScript>) {
        script.reverse();
        self.state.lock().unwrap().snapshot_script = script;
    }

    pub fn seen_push_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().seen_push_ids.clone()
    }

    pub fn remote_log(&self) -> Vec<WireChangeEntry> {
        self.state.lock().unwrap().remote_log.clone()
    }

    /// Append an entry to the simulated remote log, as if another client
    /// (or this one, for self-echo tests) had pushed it.
    pub fn inject_remote_entry(&self, mut entry: WireChangeEntry) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.remote_sequence += 1;
        entry.sequence = state.remote_sequence;
        state.remote_log.push(entry);
        state.remote_sequence
    }
}

impl Transport for MockTransport {
    fn health(&self) -> Result<HealthResponse> {
        self.state
            .lock()
            .unwrap()
            .health
            .clone()
            .ok_or_else(|| EngramError::Transport("no health configured".into()))
    }

    fn snapshot(&self, _store_id: &str) -> Result<SnapshotOutcome> {
        let mut state = self.state.lock().unwrap();
        if let Some(script) = state.snapshot_script.pop() {
            return match script {
                SnapshotOutcomeScript::Garbage => Ok(SnapshotOutcome::Body(vec![0xDE, 0xAD, 0xBE, 0xEF])),
                SnapshotOutcomeScript::RetryThenServe { retries } => {
                    if retries > 0 {
                        state.snapshot_script.push(SnapshotOutcomeScript::RetryThenServe {
                            retries: retries - 1,
                        });
                        Ok(SnapshotOutcome::Retry { after: std::time::Duration::from_millis(1) })
                    } else {
                        Ok(SnapshotOutcome::Body(state.snapshot_bytes.clone().unwrap_or_default()))
                    }
                }
            };
        }
        Ok(SnapshotOutcome::Body(state.snapshot_bytes.clone().unwrap_or_default()))
    }

    fn push(&self, _store_id: &str, request: &PushRequest) -> Result<PushOutcome> {
        let mut state = self.state.lock().unwrap();
        // Only a push_id that previously made it into the remote log counts
        // as already seen — a push_id whose only prior attempt came back
        // transient was never actually recorded server-side.
        if state.seen_push_ids.contains(&request.push_id) {
            return Ok(PushOutcome::IdempotentReplay);
        }

        if let Some(scripted) = state.push_script.first() {
            match scripted {
                ScriptedPushResponse::Transient => {
                    state.push_script.remove(0);
                    return Ok(PushOutcome::Transient("simulated 502".into()));
                }
                ScriptedPushResponse::TransportErr => {
                    state.push_script.remove(0);
                    return Err(EngramError::Transport("simulated connection refused".into()));
                }
                ScriptedPushResponse::Accept => {
                    state.push_script.remove(0);
                }
            }
        }

        state.seen_push_ids.push(request.push_id.clone());
        let mut max_seq = state.remote_sequence;
        for entry in &request.entries {
            max_seq += 1;
            let mut stored = entry.clone();
            stored.sequence = max_seq;
            state.remote_log.push(stored);
        }
        state.remote_sequence = max_seq;
        Ok(PushOutcome::Accepted { remote_sequence: max_seq })
    }

    fn delta(&self, _store_id: &str, after: i64, limit: i64) -> Result<DeltaResponse> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<WireChangeEntry> = state
            .remote_log
            .iter()
            .filter(|e| e.sequence > after)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.sequence);
        let has_more = entries.len() as i64 > limit;
        entries.truncate(limit.max(0) as usize);
        let last_sequence = entries.last().map(|e| e.sequence).unwrap_or(after);
        Ok(DeltaResponse {
            entries,
            last_sequence,
            latest_sequence: state.remote_sequence,
            has_more,
        })
    }

    fn list_stores(&self, _prefix: Option<&str>) -> Result<StoreListResponse> {
        Ok(StoreListResponse { stores: Vec::new(), total: 0 })
    }

    fn get_store_info(&self, store_id: &str) -> Result<StoreListItem> {
        Ok(StoreListItem {
            id: store_id.to_string(),
            record_count: 0,
            last_accessed: None,
            size_bytes: 0,
            description: None,
        })
    }
}
