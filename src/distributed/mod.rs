//! Session networking
//!
//! # Architecture
//!
//! numpool uses a coordinator-worker architecture for one client session:
//!
//! - **Coordinator**: Rendezvous with the client, spawns workers, answers queries
//! - **Workers**: Tasks that each accept one client stream and sum its values
//! - **Client**: The remote party; this crate ships its side of the protocol too
//!
//! # Modules
//!
//! - `protocol`: Control codes and the 32-bit message codec
//! - `endpoint`: Listening/connected socket pair with a lifecycle
//! - `rendezvous`: Datagram discovery handshake and worker accept
//! - `session`: Workers and statistics of one session
//! - `coordinator`: The session protocol state machine
//! - `client`: Client side of the protocol and the load generator

pub mod client;
pub mod coordinator;
pub mod endpoint;
pub mod protocol;
pub mod rendezvous;
pub mod session;

// Re-export key types
pub use client::{Client, ClientReport, DiscoveryListener, LoadPlan, WorkerStream};
pub use coordinator::{Coordinator, SessionEnd, SessionSummary};
pub use endpoint::{ConnectionState, Endpoint};
pub use protocol::ControlMessage;
pub use session::Session;
