//! The deliberation state machine.
//!
//! Admitted -> Round(k) -> aggregate -> approved | rejected | refined |
//! timed_out. Rounds are strictly sequential within a proposal lineage;
//! across proposals the engine runs a bounded worker pool. On approval the
//! engine mints a `decision_record` and a `mint_reward` transaction and
//! publishes a terminal event.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

use lib_crypto::NodeKeypair;
use lib_governance::GovernanceStore;
use lib_ledger::{LedgerHandle, Transaction, TxError, TxKind};
use lib_memory::{MemoryDag, MemoryError, NodeKind};

use crate::agents::AgentRole;
use crate::council::Council;
use crate::events::DeliberationEvent;
use crate::models::{
    Decision, DecisionOutcome, Proposal, RoundOutcome, RoundResult, Vote, VoteDecision,
};
use crate::provider::ProviderError;
use crate::ulfr::UlfrScore;

/// Exact-threshold comparison tolerance for the Arbiter tie-break.
const THRESHOLD_EPSILON: f64 = 1e-9;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("deliberation pool at capacity")]
    Busy,

    #[error("ledger error: {0}")]
    Ledger(#[from] TxError),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
}

/// Drives proposals to terminal decisions.
pub struct DeliberationEngine {
    council: Arc<Council>,
    ledger: LedgerHandle,
    governance: GovernanceStore,
    dag: MemoryDag,
    events: broadcast::Sender<DeliberationEvent>,
    keypair: Arc<NodeKeypair>,
    permits: Arc<Semaphore>,
}

impl DeliberationEngine {
    pub fn new(
        council: Arc<Council>,
        ledger: LedgerHandle,
        governance: GovernanceStore,
        dag: MemoryDag,
        events: broadcast::Sender<DeliberationEvent>,
        keypair: Arc<NodeKeypair>,
    ) -> Self {
        let pool_size = governance.snapshot().max_concurrent_deliberations;
        Self {
            council,
            ledger,
            governance,
            dag,
            events,
            keypair,
            permits: Arc::new(Semaphore::new(pool_size)),
        }
    }

    pub fn event_sender(&self) -> broadcast::Sender<DeliberationEvent> {
        self.events.clone()
    }

    /// Run a full deliberation lineage to its terminal decision.
    ///
    /// Fails fast with [`EngineError::Busy`] when the worker pool is at
    /// capacity (the API surfaces this as 429).
    pub async fn deliberate(&self, proposal: Proposal) -> Result<Decision, EngineError> {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| EngineError::Busy)?;
        let result = self.run(proposal).await;
        drop(permit);
        result
    }

    /// Admit a proposal and deliberate in the background. The pool permit is
    /// claimed synchronously so callers can surface `Busy` immediately.
    pub fn spawn_deliberation(self: &Arc<Self>, proposal: Proposal) -> Result<(), EngineError> {
        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| EngineError::Busy)?;
        let engine = self.clone();
        tokio::spawn(async move {
            let proposal_id = proposal.id;
            if let Err(error) = engine.run(proposal).await {
                warn!(proposal = %proposal_id, %error, "deliberation failed");
            }
            drop(permit);
        });
        Ok(())
    }

    async fn run(&self, proposal: Proposal) -> Result<Decision, EngineError> {
        let params = self.governance.snapshot();
        let threshold = params.threshold(proposal.category);
        let threshold_min = params.threshold_min(proposal.category);
        let deadline = Duration::from_secs(params.round_deadline_secs);
        let quorum = params.quorum(self.council.size());

        info!(
            proposal = %proposal.id,
            category = %proposal.category,
            threshold,
            "deliberation started"
        );
        let _ = self.events.send(DeliberationEvent::Started {
            proposal_id: proposal.id,
        });

        let mut audit_refs = Vec::new();
        let mut rounds: Vec<RoundResult> = Vec::new();
        let mut current = proposal;
        let mut proposal_node = self.dag.add_node(
            NodeKind::Proposal,
            serde_json::to_value(&current).unwrap_or_default(),
            "engine",
            vec![],
        )?;
        audit_refs.push(proposal_node.clone());

        let mut round_no = 0;
        loop {
            round_no += 1;
            let memory_ctx = lineage_context(&rounds, &current);
            let round_votes = self
                .council
                .evaluate_round(&current, &memory_ctx, round_no, deadline)
                .await;

            for (role, error) in &round_votes.failures {
                warn!(proposal = %current.id, role = %role, error = %error, "agent failed to vote");
                let _ = self.events.send(DeliberationEvent::Error {
                    proposal_id: current.id,
                    kind: provider_error_kind(error).to_string(),
                    message: format!("{role}: {error}"),
                });
            }

            let votes = round_votes.votes;
            let score = self.council.weighted_score(&votes);
            let sanity = UlfrScore::mean(&votes.iter().map(|v| v.ulfr).collect::<Vec<_>>())
                .deductive_score(&params.ulfr_weights);

            // Quorum before anything else: too few votes ends the lineage.
            if votes.len() < quorum {
                let round = self
                    .record_round(
                        &current, round_no, votes, score, sanity, threshold, threshold_min,
                        RoundOutcome::TimedOut, None, &proposal_node, &mut audit_refs,
                    )?;
                rounds.push(round);
                warn!(proposal = %current.id, round_no, "quorum failed, deliberation timed out");
                return self
                    .finish(current, DecisionOutcome::TimedOut, rounds, score, audit_refs, &proposal_node)
                    .await;
            }

            let outcome = decide_round(
                score,
                sanity,
                threshold,
                round_no,
                params.max_rounds,
                params.safety_floor,
                Council::arbiter_vote(&votes),
            );

            let _ = self.events.send(DeliberationEvent::Round {
                proposal_id: current.id,
                round_no,
                votes: votes.clone(),
                score,
            });

            match outcome {
                RoundOutcome::Approved | RoundOutcome::Rejected => {
                    let terminal = if outcome == RoundOutcome::Approved {
                        DecisionOutcome::Approved
                    } else {
                        DecisionOutcome::Rejected
                    };
                    self.council
                        .reputation
                        .update_on_terminal(&votes, score, &params);
                    let round = self
                        .record_round(
                            &current, round_no, votes, score, sanity, threshold, threshold_min,
                            outcome, None, &proposal_node, &mut audit_refs,
                        )?;
                    rounds.push(round);
                    return self
                        .finish(current, terminal, rounds, score, audit_refs, &proposal_node)
                        .await;
                }
                RoundOutcome::Refined => {
                    let child = self.refine(&current, round_no, &rounds, &votes, score, sanity, threshold, threshold_min).await?;

                    let round = self
                        .record_round(
                            &current, round_no, votes, score, sanity, threshold, threshold_min,
                            RoundOutcome::Refined, Some(child.id), &proposal_node, &mut audit_refs,
                        )?;
                    rounds.push(round);

                    // The parent reaches its terminal state: superseded.
                    let parent_decision = Decision {
                        proposal_id: current.id,
                        outcome: DecisionOutcome::Refined,
                        rounds: rounds.clone(),
                        weighted_score: score,
                        audit_refs: audit_refs.clone(),
                        refined_proposal_id: Some(child.id),
                    };
                    let decision_node = self.dag.add_node(
                        NodeKind::Decision,
                        serde_json::to_value(&parent_decision).unwrap_or_default(),
                        "engine",
                        vec![proposal_node.clone()],
                    )?;
                    audit_refs.push(decision_node);

                    let child_node = self.dag.add_node(
                        NodeKind::Proposal,
                        serde_json::to_value(&child).unwrap_or_default(),
                        AgentRole::Mediator.name(),
                        vec![proposal_node.clone()],
                    )?;
                    audit_refs.push(child_node.clone());

                    let _ = self.events.send(DeliberationEvent::Refined {
                        parent_id: current.id,
                        child_id: child.id,
                    });
                    info!(parent = %current.id, child = %child.id, "proposal refined");

                    proposal_node = child_node;
                    current = child;
                }
                RoundOutcome::TimedOut => unreachable!("timeout handled by quorum check"),
            }
        }
    }

    /// Ask the Mediator for a refined child proposal. Provider failures fall
    /// back to an unchanged description so the lineage still advances.
    #[allow(clippy::too_many_arguments)]
    async fn refine(
        &self,
        current: &Proposal,
        round_no: u32,
        _rounds: &[RoundResult],
        votes: &[Vote],
        score: f64,
        sanity: f64,
        threshold: f64,
        threshold_min: f64,
    ) -> Result<Proposal, EngineError> {
        let prior = RoundResult {
            round_no,
            votes: votes.to_vec(),
            weighted_score: score,
            sanity_score: sanity,
            threshold,
            threshold_min,
            outcome: RoundOutcome::Refined,
            refined_proposal_id: None,
        };
        let mediator = self
            .council
            .agent(AgentRole::Mediator)
            .expect("standard council always has a mediator");
        let description = match mediator.refine(current, &prior).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => current.description.clone(),
            Err(error) => {
                warn!(proposal = %current.id, error = %error, "mediator refinement failed");
                let _ = self.events.send(DeliberationEvent::Error {
                    proposal_id: current.id,
                    kind: provider_error_kind(&error).to_string(),
                    message: format!("mediator: {error}"),
                });
                current.description.clone()
            }
        };
        Ok(current.refined_child(description, round_no))
    }

    /// Write the vote and round nodes for one round into the DAG.
    #[allow(clippy::too_many_arguments)]
    fn record_round(
        &self,
        proposal: &Proposal,
        round_no: u32,
        votes: Vec<Vote>,
        weighted_score: f64,
        sanity_score: f64,
        threshold: f64,
        threshold_min: f64,
        outcome: RoundOutcome,
        refined_proposal_id: Option<Uuid>,
        proposal_node: &str,
        audit_refs: &mut Vec<String>,
    ) -> Result<RoundResult, EngineError> {
        let mut vote_nodes = Vec::new();
        for vote in &votes {
            let node = self.dag.add_node(
                NodeKind::Vote,
                serde_json::to_value(vote).unwrap_or_default(),
                &vote.agent_id,
                vec![proposal_node.to_string()],
            )?;
            vote_nodes.push(node);
        }

        let round = RoundResult {
            round_no,
            votes,
            weighted_score,
            sanity_score,
            threshold,
            threshold_min,
            outcome,
            refined_proposal_id,
        };

        let mut parents = vec![proposal_node.to_string()];
        parents.extend(vote_nodes.iter().cloned());
        let round_node = self.dag.add_node(
            NodeKind::Round,
            serde_json::json!({
                "proposal_id": proposal.id.to_string(),
                "round_no": round_no,
                "weighted_score": weighted_score,
                "sanity_score": sanity_score,
                "outcome": outcome,
            }),
            "engine",
            parents,
        )?;
        audit_refs.extend(vote_nodes);
        audit_refs.push(round_node);
        Ok(round)
    }

    /// Seal the terminal decision: DAG node, events, and on approval the
    /// ledger transactions.
    async fn finish(
        &self,
        proposal: Proposal,
        outcome: DecisionOutcome,
        rounds: Vec<RoundResult>,
        score: f64,
        mut audit_refs: Vec<String>,
        proposal_node: &str,
    ) -> Result<Decision, EngineError> {
        let mut decision = Decision {
            proposal_id: proposal.id,
            outcome,
            rounds,
            weighted_score: score,
            audit_refs: Vec::new(),
            refined_proposal_id: None,
        };

        let decision_node = self.dag.add_node(
            NodeKind::Decision,
            serde_json::to_value(&decision).unwrap_or_default(),
            "engine",
            vec![proposal_node.to_string()],
        )?;
        audit_refs.push(decision_node);
        decision.audit_refs = audit_refs;

        let _ = self.events.send(DeliberationEvent::Terminal {
            proposal_id: proposal.id,
            outcome,
            score,
        });
        info!(proposal = %proposal.id, %outcome, score, "deliberation terminal");

        if outcome == DecisionOutcome::Approved {
            let params = self.governance.snapshot();
            let record = Transaction::signed(
                &self.keypair,
                TxKind::DecisionRecord,
                None,
                None,
                decision.to_tx_payload(),
            );
            let reward = Transaction::system(
                TxKind::MintReward,
                Some(proposal.submitter.clone()),
                Some(params.approval_reward),
                serde_json::json!({"proposal_id": proposal.id.to_string()}),
            );
            for tx in [record, reward] {
                let kind = tx.kind;
                if let Err(error) = self.ledger.submit_internal(tx).await {
                    warn!(%kind, %error, "failed to submit terminal transaction");
                    let _ = self.events.send(DeliberationEvent::Error {
                        proposal_id: proposal.id,
                        kind: "ledger".to_string(),
                        message: format!("{kind}: {error}"),
                    });
                }
            }
        }
        Ok(decision)
    }
}

/// Pure round-outcome rule.
///
/// The sanity floor forces rejection; an exact threshold hit defers to the
/// Arbiter; otherwise the score decides, with refinement while rounds
/// remain.
fn decide_round(
    score: f64,
    sanity: f64,
    threshold: f64,
    round_no: u32,
    max_rounds: u32,
    safety_floor: f64,
    arbiter: Option<VoteDecision>,
) -> RoundOutcome {
    if sanity < safety_floor {
        return RoundOutcome::Rejected;
    }
    let exact_tie = (score - threshold).abs() < THRESHOLD_EPSILON;
    if exact_tie {
        return if arbiter == Some(VoteDecision::Approve) {
            RoundOutcome::Approved
        } else if round_no < max_rounds {
            RoundOutcome::Refined
        } else {
            RoundOutcome::Rejected
        };
    }
    if score > threshold {
        RoundOutcome::Approved
    } else if round_no < max_rounds {
        RoundOutcome::Refined
    } else {
        RoundOutcome::Rejected
    }
}

fn provider_error_kind(error: &ProviderError) -> &'static str {
    match error {
        ProviderError::Capacity => "capacity",
        ProviderError::RateLimited => "rate_limited",
        ProviderError::Unavailable(_) => "unavailable",
    }
}

/// Compact context handed to agents: lineage refinements plus the previous
/// round's reasoning.
fn lineage_context(rounds: &[RoundResult], current: &Proposal) -> String {
    let mut ctx = String::new();
    if !current.refinements.is_empty() {
        ctx.push_str("REFINEMENT HISTORY:\n");
        for entry in &current.refinements {
            ctx.push_str(&format!("- {entry}\n"));
        }
    }
    if let Some(last) = rounds.last() {
        ctx.push_str(&format!(
            "\nPREVIOUS ROUND {} (score {:.3}):\n",
            last.round_no, last.weighted_score
        ));
        for vote in &last.votes {
            ctx.push_str(&format!(
                "- {} voted {:?}: {}\n",
                vote.agent_id, vote.decision, vote.reasoning
            ));
        }
    }
    if ctx.is_empty() {
        ctx.push_str("(first round, no prior context)");
    }
    ctx
}
