//! numpool - stream-summation coordinator
//!
//! numpool serves one remote client at a time: it advertises an ephemeral
//! port over UDP until the client connects, spins up a pool of workers that
//! each receive their own stream of integers, and answers aggregate queries
//! while the workers run.
//!
//! # Architecture
//!
//! - **Rendezvous**: Datagram-advertised ephemeral ports, with retry and timeout
//! - **Workers**: One task per stream, each the only writer of its accumulator
//! - **Queries**: Total sum, total count and max-sum worker over live accumulators
//! - **Shutdown**: Cooperative, bounded stop of every worker at session end

pub mod config;
pub mod distributed;
pub mod error;
pub mod stats;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use distributed::{Coordinator, ControlMessage};
pub use error::SessionError;

/// Result type used throughout numpool
pub type Result<T> = std::result::Result<T, SessionError>;
