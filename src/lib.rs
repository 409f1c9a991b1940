//! zkcluster - Leader Election and Cluster Membership
//!
//! Leader election and live membership tracking for cooperating processes
//! that coordinate through a ZooKeeper-style service: ephemeral sequential
//! entries, one-shot watches and sessions.
//!
//! # Architecture
//!
//! Every process runs a [`Coordinator`] that registers an ephemeral
//! sequential entry under a shared election path. The member with the lowest
//! sequence key is the leader. Each coordinator watches the path's children,
//! recomputes the ordered member list when they change, and pushes an
//! [`Update`] to its subscribers.
//!
//! - [`session`]: client interface, session handling, in-memory ensemble
//! - [`membership`]: entry parsing, ordering, change detection
//! - [`subscription`]: subscriber fan-out
//! - [`coordinator`]: lifecycle, watch loop, query API
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use zkcluster::prelude::*;
//! use zkcluster::session::MemoryEnsemble;
//!
//! # async fn demo() -> zkcluster::Result<()> {
//! let ensemble = MemoryEnsemble::new();
//! let config = CoordinatorConfig::new(
//!     vec!["127.0.0.1:2181".into()],
//!     Duration::from_secs(1),
//!     "/services/scheduler",
//!     "host-a:9000",
//! );
//! let (tx, mut rx) = tokio::sync::mpsc::channel(16);
//!
//! let coordinator = Coordinator::new(ensemble.client(), config, vec![tx]).await?;
//! coordinator.start().await?;
//! if let Some(update) = rx.recv().await {
//!     println!("leader: {:?}", update.leader);
//! }
//! coordinator.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod membership;
pub mod session;
pub mod subscription;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use membership::{Mode, Node, Update};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::CoordinatorConfig;
    pub use crate::coordinator::{Coordinator, Lifecycle, Snapshot};
    pub use crate::error::{Error, Result};
    pub use crate::membership::{Mode, Node, SequenceKey, Update};
    pub use crate::session::{CoordinationClient, SessionEvent};
}
