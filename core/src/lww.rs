use crate::event::EventId;
use serde::{Deserialize, Serialize};

/// A single last-write-wins register. Join keeps the register with the
/// greater event id; on an exact tie the first argument wins (the caller
/// decides which side is `self`).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LwwRegister<V> {
    pub event_id: EventId,
    pub value: V,
}

/// Outcome of joining an incoming write into an existing register.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LwwOutcome {
    /// The incoming write became (or remained) the winner.
    Applied,
    /// The existing register outranks the incoming write.
    Superseded,
    /// Event ids are exactly equal; no change.
    Redundant,
}

impl<V: Clone> LwwRegister<V> {
    pub fn new(event_id: EventId, value: V) -> Self {
        Self { event_id, value }
    }

    /// Joins `incoming` into `self`, returning the outcome. `self` is left
    /// holding the winner.
    pub fn join(&mut self, incoming: &LwwRegister<V>) -> LwwOutcome {
        if incoming.event_id == self.event_id {
            LwwOutcome::Redundant
        } else if incoming.event_id > self.event_id {
            *self = incoming.clone();
            LwwOutcome::Applied
        } else {
            LwwOutcome::Superseded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eid(lamport: u64, writer: &str) -> EventId {
        EventId::new(lamport, writer, "h", 0)
    }

    #[test]
    fn higher_lamport_wins() {
        let mut a = LwwRegister::new(eid(5, "alice"), "A");
        let b = LwwRegister::new(eid(3, "bob"), "B");
        assert_eq!(a.join(&b), LwwOutcome::Superseded);
        assert_eq!(a.value, "A");
    }

    #[test]
    fn incoming_with_higher_lamport_applies() {
        let mut a = LwwRegister::new(eid(3, "bob"), "B");
        let b = LwwRegister::new(eid(5, "alice"), "A");
        assert_eq!(a.join(&b), LwwOutcome::Applied);
        assert_eq!(a.value, "A");
    }

    #[test]
    fn equal_event_id_is_redundant() {
        let mut a = LwwRegister::new(eid(5, "alice"), "A");
        let b = LwwRegister::new(eid(5, "alice"), "A");
        assert_eq!(a.join(&b), LwwOutcome::Redundant);
    }
}
