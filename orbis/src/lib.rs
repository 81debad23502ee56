//! Orbis Ethica node library.
//!
//! Wires the ledger worker, deliberation engine, mesh and API front door
//! into one process. The binary in `main.rs` is a thin shell around
//! [`runtime::Runtime`].

pub mod api;
pub mod config;
pub mod runtime;
