//! Roster reconciliation: the ordered set of participants believed present.
//!
//! ```text
//! full_state [A,B]   →  [A,B]        wholesale replacement
//! join C             →  [C,A,B]      unknown id: prepend
//! join A'            →  [A',B]       known id: replace in place
//! leave A            →  [B]
//! update X (unknown) →  unchanged    update never inserts
//! ```
//!
//! The reconciler is owned by the connection manager; consumers only
//! ever see cloned snapshots.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::InboundMessage;

/// A participant in a stream.
///
/// Only `user_id` has meaning to the client. Every other field the server
/// sends is kept verbatim in `extra` so display code can read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Participant {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            extra: Map::new(),
        }
    }

    /// Attach an opaque display field.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Ordered participant map keyed by `user_id`.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a roster message. Returns `true` if the roster changed.
    ///
    /// Non-roster messages are ignored and return `false`.
    pub fn apply(&mut self, message: &InboundMessage) -> bool {
        match message {
            InboundMessage::FullState { participants } => {
                self.replace_all(participants.clone());
                true
            }
            InboundMessage::Join { participant } => self.join(participant.clone()),
            InboundMessage::Leave { user_id } => self.leave(user_id),
            InboundMessage::Update { user } => self.update(user.clone()),
            InboundMessage::Pong | InboundMessage::Other { .. } => false,
        }
    }

    /// Replace the whole roster with `participants`, in the given order.
    ///
    /// A repeated `user_id` keeps the position of its first occurrence and
    /// the fields of its last.
    pub fn replace_all(&mut self, participants: Vec<Participant>) {
        self.entries.clear();
        for participant in participants {
            match self.position(&participant.user_id) {
                Some(idx) => self.entries[idx] = participant,
                None => self.entries.push(participant),
            }
        }
    }

    /// Insert at the front if new, otherwise replace in place.
    pub fn join(&mut self, participant: Participant) -> bool {
        match self.position(&participant.user_id) {
            Some(idx) => {
                if self.entries[idx] == participant {
                    return false;
                }
                self.entries[idx] = participant;
            }
            None => self.entries.insert(0, participant),
        }
        true
    }

    /// Remove the entry for `user_id`, if any.
    pub fn leave(&mut self, user_id: &str) -> bool {
        match self.position(user_id) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Replace an existing entry in place. Unknown ids are discarded.
    pub fn update(&mut self, participant: Participant) -> bool {
        match self.position(&participant.user_id) {
            Some(idx) if self.entries[idx] != participant => {
                self.entries[idx] = participant;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.entries.is_empty();
        self.entries.clear();
        changed
    }

    pub fn get(&self, user_id: &str) -> Option<&Participant> {
        self.entries.iter().find(|p| p.user_id == user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.position(user_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.entries.iter()
    }

    /// Cloned, ordered copy for observers.
    pub fn snapshot(&self) -> Vec<Participant> {
        self.entries.clone()
    }

    fn position(&self, user_id: &str) -> Option<usize> {
        self.entries.iter().position(|p| p.user_id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(roster: &Roster) -> Vec<&str> {
        roster.iter().map(|p| p.user_id.as_str()).collect()
    }

    fn ab() -> Roster {
        let mut roster = Roster::new();
        roster.replace_all(vec![Participant::new("a", "Ada"), Participant::new("b", "Bob")]);
        roster
    }

    #[test]
    fn test_full_state_keeps_order() {
        let roster = ab();
        assert_eq!(ids(&roster), vec!["a", "b"]);
    }

    #[test]
    fn test_full_state_replaces_not_merges() {
        let mut roster = ab();
        roster.apply(&InboundMessage::FullState {
            participants: vec![Participant::new("c", "Cy")],
        });
        assert_eq!(ids(&roster), vec!["c"]);
    }

    #[test]
    fn test_full_state_collapses_duplicate_ids() {
        let mut roster = Roster::new();
        roster.replace_all(vec![
            Participant::new("a", "first"),
            Participant::new("b", "Bob"),
            Participant::new("a", "second"),
        ]);
        assert_eq!(ids(&roster), vec!["a", "b"]);
        assert_eq!(roster.get("a").unwrap().name, "second");
    }

    #[test]
    fn test_join_unknown_prepends() {
        let mut roster = ab();
        assert!(roster.join(Participant::new("c", "Cy")));
        assert_eq!(ids(&roster), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_join_known_replaces_in_place() {
        let mut roster = ab();
        let renamed = Participant::new("a", "Ada L.").with_field("avatar", json!("ada.png"));
        assert!(roster.join(renamed.clone()));

        assert_eq!(ids(&roster), vec!["a", "b"]);
        assert_eq!(roster.get("a"), Some(&renamed));
    }

    #[test]
    fn test_join_identical_is_no_change() {
        let mut roster = ab();
        assert!(!roster.join(Participant::new("a", "Ada")));
    }

    #[test]
    fn test_leave() {
        let mut roster = ab();
        assert!(roster.leave("a"));
        assert_eq!(ids(&roster), vec!["b"]);
        assert!(!roster.leave("zzz"));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_update_known_replaces_in_place() {
        let mut roster = ab();
        assert!(roster.update(Participant::new("b", "Robert")));
        assert_eq!(ids(&roster), vec!["a", "b"]);
        assert_eq!(roster.get("b").unwrap().name, "Robert");
    }

    #[test]
    fn test_update_unknown_is_discarded() {
        // Unlike join, update never inserts.
        let mut roster = ab();
        let before = roster.snapshot();
        assert!(!roster.update(Participant::new("x", "Xavier")));
        assert_eq!(roster.snapshot(), before);
        assert!(!roster.contains("x"));
    }

    #[test]
    fn test_non_roster_messages_ignored() {
        let mut roster = ab();
        assert!(!roster.apply(&InboundMessage::Pong));
        assert!(!roster.apply(&InboundMessage::Other {
            kind: "chat".into(),
            payload: json!({"type": "chat"}),
        }));
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut roster = ab();
        assert!(roster.clear());
        assert!(roster.is_empty());
        assert!(!roster.clear());
    }

    #[test]
    fn test_participant_extra_fields_roundtrip() {
        let p: Participant =
            serde_json::from_value(json!({"user_id": "a", "name": "Ada", "role": "host"})).unwrap();
        assert_eq!(p.extra.get("role"), Some(&json!("host")));
        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(back, json!({"user_id": "a", "name": "Ada", "role": "host"}));
    }
}
