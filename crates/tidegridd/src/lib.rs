//! tidegridd — the tidegrid daemon.
//!
//! Reads `tidegrid.toml`, wires the scaling pipeline against the simulator
//! and either runs it ([`Engine`] + `Autoscaler::run`) or evaluates once.

pub mod config;
pub mod engine;

pub use config::TidegridConfig;
pub use engine::Engine;
