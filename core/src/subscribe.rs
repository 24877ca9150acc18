use crate::diff::{diff, NodeEdgeDiff};
use crate::state::GraphState;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

/// One subscriber's registration (§4.8). `on_change`/`on_error` are boxed
/// closures rather than a trait object per-callback pair so a caller can
/// register an ad-hoc lambda, matching the teacher's `Subscriber` being a
/// cheap, disposable handle rather than a long-lived trait impl.
pub struct Subscription {
    id: u64,
    on_change: Box<dyn FnMut(&NodeEdgeDiff) + Send>,
    on_error: Option<Box<dyn FnMut(&str) + Send>>,
    replay_pending: bool,
    glob: Option<String>,
}

pub struct SubscriptionHandle(pub u64);

#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    subs: Vec<Subscription>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. If `replay` is requested, the subscriber is
    /// marked pending and sees a diff from the empty state to current on
    /// its first post-materialize notification (§9 "Subscriber replay
    /// correctness") rather than firing immediately here, since no state
    /// may have been materialized yet.
    pub fn subscribe(
        &mut self,
        on_change: Box<dyn FnMut(&NodeEdgeDiff) + Send>,
        on_error: Option<Box<dyn FnMut(&str) + Send>>,
        replay: bool,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subs.push(Subscription {
            id,
            on_change,
            on_error,
            replay_pending: replay,
            glob: None,
        });
        SubscriptionHandle(id)
    }

    /// Like [`subscribe`](Self::subscribe) but pre-filters dispatch to
    /// entities matching `pattern` (a simple glob with `*` wildcards),
    /// implementing `watch(pattern, ...)` (§4.8).
    pub fn watch(
        &mut self,
        pattern: &str,
        on_change: Box<dyn FnMut(&NodeEdgeDiff) + Send>,
        on_error: Option<Box<dyn FnMut(&str) + Send>>,
        replay: bool,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subs.push(Subscription {
            id,
            on_change,
            on_error,
            replay_pending: replay,
            glob: Some(pattern.to_string()),
        });
        SubscriptionHandle(id)
    }

    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) {
        self.subs.retain(|s| s.id != handle.0);
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Dispatches a materialize pass: computes `diff(last_notified, new)`
    /// once, then for each subscriber either fires a replay-from-empty
    /// diff (first notification, flag cleared after) or the shared diff
    /// if non-empty and matching its glob filter. A handler panic/error is
    /// caught and routed to `on_error`, never disrupting other
    /// subscribers.
    pub fn dispatch(&mut self, last_notified: Option<&GraphState>, new: &GraphState) {
        let empty = GraphState::new();
        let shared_diff = diff(last_notified.unwrap_or(&empty), new);
        for sub in &mut self.subs {
            let d = if sub.replay_pending {
                diff(&empty, new)
            } else if shared_diff.is_empty() {
                continue;
            } else {
                shared_diff.clone()
            };
            if let Some(glob) = &sub.glob {
                if !diff_matches_glob(&d, glob) {
                    continue;
                }
            }
            let on_change = &mut sub.on_change;
            let result = catch_unwind(AssertUnwindSafe(|| (on_change)(&d)));
            sub.replay_pending = false;
            if let Err(payload) = result {
                let message = panic_message(&payload);
                if let Some(on_error) = &mut sub.on_error {
                    (on_error)(&message);
                }
            }
        }
    }

    pub fn report_error(&mut self, message: &str) {
        for sub in &mut self.subs {
            if let Some(on_error) = &mut sub.on_error {
                (on_error)(message);
            }
        }
    }
}

/// Best-effort text for a caught panic payload: `&str`/`String` payloads are
/// used directly, anything else (a custom payload type) falls back to a
/// fixed message rather than failing to format it.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "subscriber handler panicked".to_string()
    }
}

fn diff_matches_glob(d: &NodeEdgeDiff, pattern: &str) -> bool {
    d.nodes_added.iter().chain(d.nodes_removed.iter()).any(|n| glob_match(pattern, n))
        || d.edges_added
            .iter()
            .chain(d.edges_removed.iter())
            .any(|(f, t, _)| glob_match(pattern, f) || glob_match(pattern, t))
        || d.props_set
            .iter()
            .map(|(k, _)| k)
            .chain(d.props_removed.iter())
            .any(|k| glob_match(pattern, k))
}

/// Minimal glob: `*` matches any run of characters, everything else must
/// match literally.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..]))
            }
            (Some(pc), Some(tc)) if pc == tc => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot::Dot;
    use std::sync::{Arc, Mutex};

    #[test]
    fn glob_matches_prefix_wildcard() {
        assert!(glob_match("user:*", "user:alice"));
        assert!(!glob_match("user:*", "group:alice"));
        assert!(glob_match("*", "anything"));
    }

    #[test]
    fn replay_fires_once_from_empty_state() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut subs = Subscribers::new();
        subs.subscribe(
            Box::new(move |d| seen2.lock().unwrap().push(d.nodes_added.clone())),
            None,
            true,
        );
        let mut s1 = GraphState::new();
        s1.node_alive.add("a".to_string(), Dot::new("w1", 1));
        subs.dispatch(None, &s1);
        subs.dispatch(Some(&s1), &s1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec!["a".to_string()]);
    }

    #[test]
    fn non_empty_diff_dispatches_once() {
        let count = Arc::new(Mutex::new(0));
        let count2 = count.clone();
        let mut subs = Subscribers::new();
        subs.subscribe(Box::new(move |_| *count2.lock().unwrap() += 1), None, false);
        let mut s1 = GraphState::new();
        s1.node_alive.add("a".to_string(), Dot::new("w1", 1));
        subs.dispatch(None, &s1);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn panicking_handler_is_caught_and_routed_to_on_error_without_skipping_others() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors2 = errors.clone();
        let count = Arc::new(Mutex::new(0));
        let count2 = count.clone();
        let mut subs = Subscribers::new();
        subs.subscribe(
            Box::new(|_| panic!("handler blew up")),
            Some(Box::new(move |msg| errors2.lock().unwrap().push(msg.to_string()))),
            false,
        );
        subs.subscribe(Box::new(move |_| *count2.lock().unwrap() += 1), None, false);

        let mut s1 = GraphState::new();
        s1.node_alive.add("a".to_string(), Dot::new("w1", 1));
        subs.dispatch(None, &s1);

        assert_eq!(errors.lock().unwrap().as_slice(), ["handler blew up".to_string()]);
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
