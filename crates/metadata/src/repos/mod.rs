//! Repository traits for metadata operations.

pub mod chunks;
pub mod uploads;

pub use chunks::ChunkRepo;
pub use uploads::UploadRepo;
