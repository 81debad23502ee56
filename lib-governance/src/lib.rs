//! Governance-tunable runtime parameters.
//!
//! Parameters follow the lifecycle defaults -> loaded from `config.json` ->
//! mutated by accepted governance transactions. Reads are lock-free snapshot
//! clones; writes are serialized through the ledger worker and take effect at
//! `height + AUTHORITY_LATENCY`.

pub mod params;
pub mod store;

pub use params::{GovernanceParams, ProposalCategory, UlfrWeights, WeightPreset};
pub use store::{GovernanceError, GovernanceStore};
