//! Background Jobs
//!
//! - `sweeper`: Periodically removes expired records and stale pending ids
//!
//! # Usage
//!
//! ```ignore
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = cache.spawn_sweeper(shutdown_rx);
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

pub mod sweeper;

pub use sweeper::{sweeper_task, SweeperMetrics, SweeperSnapshot};
