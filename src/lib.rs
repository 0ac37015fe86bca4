//! simsweep: parameter-sweep orchestration for external simulation programs.
//!
//! Trials group Samplings, Samplings group Monads (replicate groups), Monads
//! group Simulations. Configuration variations are materialized once per
//! variation id, program builds are cached per custom code folder, and
//! deletions cascade through the hierarchy without leaving dangling manifests.

pub mod build;
pub mod cli;
pub mod core;
pub mod provenance;
pub mod transport;
