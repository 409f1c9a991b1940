//! Membership Module
//!
//! Election entry parsing, ordering and change detection.

mod node;
mod tracker;

pub use node::{Node, SequenceKey, SEQUENCE_SEPARATOR};
pub use tracker::{MembershipTracker, Mode, Update};
