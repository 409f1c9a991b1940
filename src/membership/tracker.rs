//! Membership Tracker
//!
//! Turns the raw children of the election path into an ordered member list
//! and a leader, and decides whether that differs from what was seen last.
//! Does no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::node::Node;

/// Role of a coordinator relative to the current membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Own node is first in the member list
    Leader,
    /// Anything else, including not registered
    Follower,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Leader => write!(f, "LEADER"),
            Mode::Follower => write!(f, "FOLLOWER"),
        }
    }
}

/// Change event delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// Members ordered by sequence key
    pub members: Vec<Node>,
    /// First member, if any
    pub leader: Option<Node>,
    /// When the change was observed locally
    pub observed_at: DateTime<Utc>,
}

/// Tracks the last observed membership
#[derive(Debug, Default)]
pub struct MembershipTracker {
    members: Vec<Node>,
    observed: bool,
}

impl MembershipTracker {
    /// Create a tracker that has not observed anything yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse entry names into nodes ordered by sequence key; foreign entries are skipped
    pub fn parse_members<S: AsRef<str>>(names: &[S]) -> Vec<Node> {
        let mut members: Vec<Node> = names
            .iter()
            .filter_map(|name| match Node::parse(name.as_ref()) {
                Ok(node) => Some(node),
                Err(_) => {
                    tracing::trace!("Ignoring foreign entry {:?}", name.as_ref());
                    None
                }
            })
            .collect();
        members.sort();
        members.dedup();
        members
    }

    /// Feed the current children; returns an update only if membership changed
    pub fn observe<S: AsRef<str>>(&mut self, names: &[S]) -> Option<Update> {
        let members = Self::parse_members(names);

        if self.observed && members == self.members {
            return None;
        }

        self.members = members;
        self.observed = true;

        Some(Update {
            members: self.members.clone(),
            leader: self.leader(),
            observed_at: Utc::now(),
        })
    }

    /// Forget the previous snapshot so the next observation counts as a change
    pub fn reset(&mut self) {
        self.members.clear();
        self.observed = false;
    }

    /// Whether any snapshot has been observed since creation or the last reset
    pub fn has_snapshot(&self) -> bool {
        self.observed
    }

    /// Current ordered members
    pub fn members(&self) -> &[Node] {
        &self.members
    }

    /// Current leader
    pub fn leader(&self) -> Option<Node> {
        self.members.first().cloned()
    }

    /// Mode of `own` against the current snapshot
    pub fn mode_of(&self, own: Option<&Node>) -> Mode {
        match (own, self.members.first()) {
            (Some(own), Some(first)) if own == first => Mode::Leader,
            _ => Mode::Follower,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_first_observation_is_a_change() {
        let mut tracker = MembershipTracker::new();
        assert!(!tracker.has_snapshot());

        let update = tracker.observe(&names(&["b_0000000002", "a_0000000001"])).unwrap();
        assert_eq!(update.members.len(), 2);
        assert_eq!(update.leader.unwrap().data, "a");
        assert!(tracker.has_snapshot());
    }

    #[test]
    fn test_empty_first_observation_still_reported() {
        let mut tracker = MembershipTracker::new();
        let update = tracker.observe::<String>(&[]).unwrap();
        assert!(update.members.is_empty());
        assert!(update.leader.is_none());
        assert!(tracker.observe::<String>(&[]).is_none());
    }

    #[test]
    fn test_unchanged_children_in_any_order_are_not_a_change() {
        let mut tracker = MembershipTracker::new();
        tracker.observe(&names(&["a_0000000001", "b_0000000002"]));

        assert!(tracker.observe(&names(&["b_0000000002", "a_0000000001"])).is_none());
        // Foreign entries do not count either
        assert!(tracker
            .observe(&names(&["lock", "b_0000000002", "a_0000000001"]))
            .is_none());
    }

    #[test]
    fn test_leader_change_detected() {
        let mut tracker = MembershipTracker::new();
        tracker.observe(&names(&["a_0000000001", "b_0000000002"]));

        let update = tracker.observe(&names(&["b_0000000002", "c_0000000003"])).unwrap();
        assert_eq!(update.leader.as_ref().unwrap().data, "b");
        assert_eq!(tracker.leader().unwrap().key.as_u64(), 2);
    }

    #[test]
    fn test_mode_of() {
        let mut tracker = MembershipTracker::new();
        tracker.observe(&names(&["a_0000000001", "b_0000000002"]));

        let a = Node::parse("a_0000000001").unwrap();
        let b = Node::parse("b_0000000002").unwrap();
        assert_eq!(tracker.mode_of(Some(&a)), Mode::Leader);
        assert_eq!(tracker.mode_of(Some(&b)), Mode::Follower);
        assert_eq!(tracker.mode_of(None), Mode::Follower);
    }

    #[test]
    fn test_reset_forces_next_update() {
        let mut tracker = MembershipTracker::new();
        let children = names(&["a_0000000001"]);
        tracker.observe(&children);
        assert!(tracker.observe(&children).is_none());

        tracker.reset();
        assert!(tracker.members().is_empty());
        assert!(tracker.observe(&children).is_some());
    }
}
