//! # bpm-common
//!
//! Shared utilities and types for the BPM process manager.
//!
//! This crate provides common functionality used across all BPM crates:
//! - Container ID formation and validation
//! - Standard filesystem paths under the BOSH system root
//! - Byte-quantity parsing for resource limits
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;
pub mod quantity;

pub use error::{BpmError, BpmResult};
pub use id::ContainerId;
pub use paths::BoshPaths;
pub use quantity::ByteQuantity;
