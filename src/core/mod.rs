//! Core logic: entities, path addressing, variations, scheduling and deletion.

pub mod cascade;
pub mod config;
pub mod design;
pub mod error;
pub mod manifest;
pub mod materialize;
pub mod paths;
pub mod prune;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod xpath;
