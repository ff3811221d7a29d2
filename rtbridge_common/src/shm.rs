//! Shared memory layout constants.
//!
//! - `consts`: segment table limits, alignment, ring and frame header sizes.

pub mod consts;
