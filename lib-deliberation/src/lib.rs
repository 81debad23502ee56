//! Orbis Ethica deliberation engine.
//!
//! A council of six role-polymorphic cognitive agents evaluates ethical
//! proposals over bounded rounds. Verdicts are recorded in the memory DAG
//! and minted onto the ledger as `decision_record` and `mint_reward`
//! transactions.

pub mod agents;
pub mod council;
pub mod engine;
pub mod events;
pub mod models;
pub mod provider;
pub mod ulfr;

pub use agents::{AgentRole, CouncilAgent};
pub use council::{Council, ReputationTable, RoundVotes};
pub use engine::{DeliberationEngine, EngineError};
pub use events::DeliberationEvent;
pub use models::{
    Decision, DecisionOutcome, Proposal, ProposalDomain, RoundOutcome, RoundResult, Vote,
    VoteDecision,
};
pub use provider::{GenerativeCapability, HttpProvider, MockProvider, ProviderError};
pub use ulfr::UlfrScore;
