//! Library crate for tagfleet-sync, the state synchronisation engine behind the tag-game
//! transponder dashboard. Exposes modules for the headless binary and integration tests.

pub mod config;
pub mod dto;
pub mod error;
pub mod services;
pub mod state;

pub use config::EngineConfig;
pub use state::{Engine, SharedEngine};
