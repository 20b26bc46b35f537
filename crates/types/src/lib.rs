#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for warden
//!
//! This crate provides the identifiers and small value types shared by the
//! registry, the job core and the event system.

pub mod ids;
pub mod progress;

pub use ids::{JobId, NativePtr, ResourceId};
pub use progress::ProgressInfo;

/// Static label describing what a registered native object is (`"dataset"`, `"band"`, ...)
pub type ResourceKind = &'static str;
