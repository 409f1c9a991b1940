//! Subscription Module
//!
//! Delivers membership updates to subscriber channels.

mod hub;

pub use hub::{SubscriberId, SubscriptionHub};
