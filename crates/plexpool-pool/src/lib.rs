//! Client-pool scheduling for plexpool.
//!
//! The pool owns one wrapper per upstream session and schedules queries
//! across them: round-robin rotation, per-client exponential backoff, a
//! mode-aware quota filter, a background health monitor, and atomic JSON
//! persistence shared between the admin server and the stdio front-end.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod pool;
pub mod state_file;

pub use client::{ClientState, ClientStatus, ClientWrapper};
pub use config::{
    FallbackConfig, MonitorConfig, PoolConfig, TokenEntry, DEFAULT_CONFIG_PATH, DEFAULT_STATE_PATH,
};
pub use engine::{run_query, QueryRequest};
pub use error::{Error, Result};
pub use monitor::{run_health_check, CheckOutcome, Monitor, MonitorHandle};
pub use pool::{ClientPool, SessionFactory};
pub use state_file::{ClientRecord, PoolStateFile};
