//! Chunked upload engine for stitch.
//!
//! - [`UploadTracker`]: sessions, chunk acceptance, completion detection
//! - [`MergeEngine`]: bounded worker pool that assembles artifacts
//! - [`RangeReader`]: whole-file and ranged reads of merged artifacts
//! - [`FileService`]: the three above, wired to one metadata store and one object store

pub mod error;
pub mod merge;
pub mod metrics;
pub mod reader;
pub mod service;
pub mod tracker;

pub use error::{UploadError, UploadResult};
pub use merge::MergeEngine;
pub use reader::{Artifact, RangeReader};
pub use service::FileService;
pub use tracker::{CleanupFailure, DeleteReport, UploadTracker};
