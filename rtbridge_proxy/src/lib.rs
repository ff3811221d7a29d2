//! # rtbridge Proxy Library
//!
//! Bridges RT-side message rings to a two-rail topic bus.
//!
//! # Module Structure
//!
//! - [`core`] - ProxyCore: registry, router and actor lifecycle
//! - [`bus`] - Command/response rails and the router thread
//! - [`actor`] - Proxy actors, backoff, transcoding
//! - [`rt`] - Loopback RT endpoint
//! - [`config`] - `ProxyConfig` TOML schema
//! - [`shutdown`] - Cancellation token
//!
//! # Architecture
//!
//! ```text
//!  clients                 ┌───────────────┐
//!  ──command rail─────────►│    Router     │──► actor inbox
//!  ◄─response rail─────────│ (one thread)  │◄── actor replies
//!                          └───────────────┘
//!                                  ▲
//!                                  │ [actor][from][payload...]
//!                          ┌───────┴───────┐  to-RT ring   ┌────────────┐
//!                          │  ProxyActor   ├──────────────►│  RT side   │
//!                          │ (per thread)  │◄──────────────┤ (loopback) │
//!                          └───────────────┘ from-RT ring  └────────────┘
//! ```

#![deny(missing_docs)]

pub mod actor;
pub mod bus;
pub mod config;
pub mod core;
pub mod error;
pub mod rt;
pub mod shutdown;

// Re-export key types for convenience
pub use crate::actor::{ActorRoles, ActorState, ActorStats, Backoff, ProxyActor};
pub use crate::bus::{Rail, RailSocket, Router};
pub use crate::config::{ActorConfig, ProxyConfig, RoleName};
pub use crate::core::ProxyCore;
pub use crate::error::{ActorError, BusError, ProxyError};
pub use crate::rt::RtEndpoint;
pub use crate::shutdown::ShutdownToken;
