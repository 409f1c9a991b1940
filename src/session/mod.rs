//! Session Module
//!
//! Connection handling for the coordination service: the client interface,
//! the session manager wrapping it, and an in-memory ensemble.

mod client;
mod manager;
pub mod memory;

pub use client::{CoordinationClient, SessionEvent, WatchEvent, WatchHandle};
pub use manager::{SessionManager, SessionState};
pub use memory::{MemoryClient, MemoryEnsemble};
