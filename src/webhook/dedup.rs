use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::webhook::ReconcileOutcome;

#[derive(Debug, Clone)]
enum EntryState {
    Processing,
    Done(ReconcileOutcome),
}

#[derive(Debug)]
struct Entry {
    at: Instant,
    state: EntryState,
}

// Keyed by gateway session id; guarantees at most one successful ledger
// application per session. The placeholder is written inside the same
// lock acquisition as the lookup, before any datastore call, so two
// concurrent deliveries cannot both see "absent". Injectable so a
// multi-process deployment can swap in a shared cache.
#[derive(Clone)]
pub struct DedupCache {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

#[derive(Debug)]
pub enum Begin {
    // no entry existed; a processing placeholder is now in place
    Fresh,
    // another delivery of the same session is mid-flight
    InFlight,
    Done(ReconcileOutcome),
}

impl DedupCache {
    pub fn new(ttl: Duration) -> DedupCache {
        DedupCache {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn begin(&self, key: &str) -> Begin {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, e| e.at.elapsed() < self.ttl);
        match entries.get(key) {
            Some(entry) => match &entry.state {
                EntryState::Processing => Begin::InFlight,
                EntryState::Done(outcome) => Begin::Done(outcome.clone()),
            },
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        at: Instant::now(),
                        state: EntryState::Processing,
                    },
                );
                Begin::Fresh
            }
        }
    }

    // last writer wins: only one outcome per session id is ever legitimate
    pub fn complete(&self, key: &str, outcome: ReconcileOutcome) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                at: Instant::now(),
                state: EntryState::Done(outcome),
            },
        );
    }

    // failure path: drop the placeholder so the gateway's retry can
    // reprocess the event
    pub fn forget(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_begin_then_inflight_then_done() {
        let cache = DedupCache::new(Duration::from_secs(600));
        assert!(matches!(cache.begin("sess_1"), Begin::Fresh));
        assert!(matches!(cache.begin("sess_1"), Begin::InFlight));

        cache.complete("sess_1", ReconcileOutcome::Ignored);
        match cache.begin("sess_1") {
            Begin::Done(outcome) => assert_eq!(outcome, ReconcileOutcome::Ignored),
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn test_forget_allows_reprocessing() {
        let cache = DedupCache::new(Duration::from_secs(600));
        assert!(matches!(cache.begin("sess_1"), Begin::Fresh));
        cache.forget("sess_1");
        assert!(matches!(cache.begin("sess_1"), Begin::Fresh));
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let cache = DedupCache::new(Duration::from_millis(10));
        assert!(matches!(cache.begin("sess_1"), Begin::Fresh));
        thread::sleep(Duration::from_millis(20));
        assert!(matches!(cache.begin("sess_1"), Begin::Fresh));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_begin_yields_one_fresh() {
        let cache = DedupCache::new(Duration::from_secs(600));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || matches!(cache.begin("sess_1"), Begin::Fresh))
            })
            .collect();
        let fresh = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|fresh| *fresh)
            .count();
        assert_eq!(fresh, 1);
    }
}
