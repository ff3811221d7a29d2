//! rtbridge Common Library
//!
//! This crate provides shared constants, configuration loading utilities and
//! the native payload type for all rtbridge workspace crates.
//!
//! # Module Structure
//!
//! - [`shm`] - Segment, ring and frame layout constants
//! - [`bus`] - Bus wire protocol constants (control tags, rail names)
//! - [`config`] - Configuration loading traits and types
//! - [`container`] - Native structured payload exchanged with the RT side
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use rtbridge_common::shm::consts::*;
//! use rtbridge_common::config::{ConfigLoader, SharedConfig};
//! ```

pub mod bus;
pub mod config;
pub mod consts;
pub mod container;
pub mod prelude;
pub mod shm;
