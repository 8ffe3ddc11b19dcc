//! Background tasks and pure derivations built on top of the store.

/// Mutating commands and post-command resync.
pub mod commands;
/// Single-writer queue applying snapshots to the store.
pub mod ingest;
/// Full-state pull used at startup and as fallback.
pub mod reconcile;
/// Liveness classification from heartbeat age.
pub mod status;
/// Periodic local clock tick.
pub mod ticker;
/// Countdown projection and expiry detection.
pub mod timer;
/// Push channel connection supervision.
pub mod transport;
