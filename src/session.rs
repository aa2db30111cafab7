//! In-memory bijective mapping between lore ids and short session aliases
//! ("L1", "L2", ...), issued in insertion order.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct SessionState {
    alias_to_id: HashMap<String, String>,
    id_to_alias: HashMap<String, String>,
    counter: u64,
}

/// Ephemeral per-session alias tracker. Reset on `clear()` or client shutdown.
/// All state lives behind a single lock so `track` can serialize counter
/// allocation (I5: aliases are contiguous within a session).
pub struct SessionTracker {
    state: Mutex<SessionState>,
}

impl Default for SessionTracker {
    fn default() -> Self {
        SessionTracker {
            state: Mutex::new(SessionState::default()),
        }
    }
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `id`, returning its alias. Re-tracking an already-tracked id
    /// returns the original alias without advancing the counter.
    pub fn track(&self, id: &str) -> String {
        let mut state = self.state.lock().unwrap();
        if let Some(alias) = state.id_to_alias.get(id) {
            return alias.clone();
        }
        state.counter += 1;
        let alias = format!("L{}", state.counter);
        state.alias_to_id.insert(alias.clone(), id.to_string());
        state.id_to_alias.insert(id.to_string(), alias.clone());
        alias
    }

    pub fn resolve(&self, alias: &str) -> Option<String> {
        self.state.lock().unwrap().alias_to_id.get(alias).cloned()
    }

    pub fn resolve_id(&self, id: &str) -> Option<String> {
        self.state.lock().unwrap().id_to_alias.get(id).cloned()
    }

    /// Defensive snapshot of the alias-to-id mapping.
    pub fn all(&self) -> HashMap<String, String> {
        self.state.lock().unwrap().alias_to_id.clone()
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().alias_to_id.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.alias_to_id.clear();
        state.id_to_alias.clear();
        state.counter = 0;
    }

    /// Resolve a free-form reference: direct alias, then direct tracked id,
    /// then case-insensitive content substring match. First hit wins.
    pub fn fuzzy_match<F>(&self, reference: &str, content_lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = self.resolve(reference) {
            return Some(id);
        }
        let tracked_ids: Vec<String> = {
            let state = self.state.lock().unwrap();
            state.id_to_alias.keys().cloned().collect()
        };
        if tracked_ids.iter().any(|id| id == reference) {
            return Some(reference.to_string());
        }
        let needle = reference.to_lowercase();
        for id in tracked_ids {
            if let Some(content) = content_lookup(&id) {
                if content.to_lowercase().contains(&needle) {
                    return Some(id);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_is_idempotent_and_contiguous() {
        let tracker = SessionTracker::new();
        let a1 = tracker.track("id-a");
        let a2 = tracker.track("id-b");
        let a1_again = tracker.track("id-a");
        assert_eq!(a1, "L1");
        assert_eq!(a2, "L2");
        assert_eq!(a1_again, "L1");
        assert_eq!(tracker.count(), 2);
    }

    #[test]
    fn resolve_round_trips() {
        let tracker = SessionTracker::new();
        let alias = tracker.track("id-a");
        assert_eq!(tracker.resolve(&alias).as_deref(), Some("id-a"));
        assert_eq!(tracker.resolve_id("id-a").as_deref(), Some(alias.as_str()));
    }

    #[test]
    fn fuzzy_match_order_alias_then_id_then_content() {
        let tracker = SessionTracker::new();
        tracker.track("id-a");
        tracker.track("id-b");
        let lookup = |id: &str| -> Option<String> {
            match id {
                "id-a" => Some("uses a retry queue".to_string()),
                "id-b" => Some("something else".to_string()),
                _ => None,
            }
        };
        assert_eq!(tracker.fuzzy_match("L1", lookup).as_deref(), Some("id-a"));
        assert_eq!(tracker.fuzzy_match("id-b", lookup).as_deref(), Some("id-b"));
        assert_eq!(
            tracker.fuzzy_match("RETRY QUEUE", lookup).as_deref(),
            Some("id-a")
        );
        assert_eq!(tracker.fuzzy_match("nope", lookup), None);
    }

    #[test]
    fn clear_resets_counter() {
        let tracker = SessionTracker::new();
        tracker.track("id-a");
        tracker.clear();
        let alias = tracker.track("id-b");
        assert_eq!(alias, "L1");
    }
}
