//! Build cache for per-custom-code program binaries.

pub mod cache;
pub mod revision;

pub use cache::BuildCache;
pub use revision::ProgramRevision;
