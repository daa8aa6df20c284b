//! # bpm-oci
//!
//! Serde data model for the subset of the OCI Runtime Specification that
//! BPM generates and consumes: the bundle `config.json` written for each
//! container, and the state document reported by the container runtime.
//!
//! Only the fields BPM populates are modeled; everything else is left to
//! the runtime's defaults.

#![warn(missing_docs)]

pub mod spec;
pub mod state;

pub use spec::{
    Capabilities, Linux, MemoryResources, Mount, Namespace, NamespaceType, PidsResources, Process,
    Resources, Rlimit, Root, Spec, User,
};
pub use state::{ContainerState, ContainerStatus};
