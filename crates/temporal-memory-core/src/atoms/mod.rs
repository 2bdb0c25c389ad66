// ── Atoms Layer ────────────────────────────────────────────────────────────
// Pure types, config, and error handling — zero side effects, no I/O.
// Dependency rule: atoms may only depend on std and external pure crates.
// Nothing here may import from engine/.

pub mod config;
pub mod error;
pub mod types;
