//! # Reservoir connection pool
//!
//! A bounded pool of reusable connections shared by many concurrent tasks.
//! It hands out connections on demand, takes them back, replaces dead ones
//! transparently, enforces a hard capacity with a bounded wait and reclaims
//! connections abandoned by callers that never returned them.
//!
//! Drivers plug in through the [`Connector`] trait.

pub mod config;
pub mod connector;
pub mod error;
pub mod pool;
pub mod pooled;
pub mod reaper;
pub mod testing;

pub use config::{ConfigWarning, PoolConfig};
pub use connector::{ConnectParams, Connector};
pub use error::{Error, Result};
pub use pool::{CloseReport, Pool, PoolStats};
pub use pooled::Pooled;
pub use reaper::ReapReport;
