//! HTTP API server for stitch.
//!
//! Maps the chunked upload operations onto a JSON/HTTP interface:
//! - Upload session creation and chunk upload
//! - Session status and listing
//! - Whole-file and windowed downloads
//! - Deletion and merge retry

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
