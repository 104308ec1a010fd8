//! Striped download engine
//!
//! The stripe codec, the manifest the agent replies with, the version
//! gate, round-robin reassembly and the engine that ties them to a
//! control session.

mod engine;
mod manifest;
mod stripe;
mod transfer;
mod version;

pub use engine::*;
pub use manifest::*;
pub use stripe::*;
pub use transfer::*;
pub use version::*;
