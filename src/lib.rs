//! Single-server PIR with client preprocessing.
//!
//! The client streams the database once per round to build primary and
//! backup hints, then retrieves entries with punctured two-sided queries
//! whose parities reveal nothing about the target to the server.

pub mod client;
pub mod config;
pub mod cost;
pub mod hints;
pub mod messages;
pub mod online;
pub mod online_client;
pub mod online_framing;
pub mod online_server;
pub mod online_transport;
pub mod params;
pub mod preprocess;
pub mod prf;
pub mod server;
pub mod updates;

pub use client::{Client, SessionStats};
pub use config::{CacheHitPolicy, ClientConfig};
pub use messages::{ClientError, ConfigError, EntryUpdate, ProtocolAbort, ServerError};
pub use params::Params;
pub use prf::Prf;
pub use server::{Db, InMemoryDb, MmapDb, Server};
