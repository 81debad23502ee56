//! Parameter definitions and defaults.

use serde::{Deserialize, Serialize};

/// Impact category of a proposal; selects the approval threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalCategory {
    Routine,
    HighImpact,
    Constitutional,
    Emergency,
}

impl std::fmt::Display for ProposalCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProposalCategory::Routine => "routine",
            ProposalCategory::HighImpact => "high_impact",
            ProposalCategory::Constitutional => "constitutional",
            ProposalCategory::Emergency => "emergency",
        };
        write!(f, "{s}")
    }
}

/// Weights for the deductive ULFR decision function.
///
/// Score = 1.0 - alpha*(1-U) - beta*(1-L) - gamma*F - delta*R, clamped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UlfrWeights {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
}

impl Default for UlfrWeights {
    fn default() -> Self {
        // Whitepaper defaults
        Self {
            alpha: 0.25,
            beta: 0.40,
            gamma: 0.20,
            delta: 0.15,
        }
    }
}

impl UlfrWeights {
    /// Normalize weights to sum to 1.0.
    pub fn normalized(&self) -> Self {
        let total = self.alpha + self.beta + self.gamma + self.delta;
        if total <= f64::EPSILON {
            return Self::default();
        }
        Self {
            alpha: self.alpha / total,
            beta: self.beta / total,
            gamma: self.gamma / total,
            delta: self.delta / total,
        }
    }
}

/// Named weight presets selectable via governance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightPreset {
    Default,
    UtilityFocused,
    CareFocused,
    RightsFocused,
    Balanced,
}

impl WeightPreset {
    pub fn weights(self) -> UlfrWeights {
        match self {
            WeightPreset::Default => UlfrWeights::default(),
            WeightPreset::UtilityFocused => UlfrWeights { alpha: 0.50, beta: 0.25, gamma: 0.15, delta: 0.10 },
            WeightPreset::CareFocused => UlfrWeights { alpha: 0.15, beta: 0.55, gamma: 0.20, delta: 0.10 },
            WeightPreset::RightsFocused => UlfrWeights { alpha: 0.20, beta: 0.20, gamma: 0.20, delta: 0.40 },
            WeightPreset::Balanced => UlfrWeights { alpha: 0.25, beta: 0.25, gamma: 0.25, delta: 0.25 },
        }
    }
}

/// Process-wide tunable parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceParams {
    /// Approval thresholds per proposal category.
    pub threshold_routine: f64,
    pub threshold_high_impact: f64,
    pub threshold_constitutional: f64,
    pub threshold_emergency: f64,
    /// Margin subtracted from the threshold for the rejection band (floored at 0.30).
    pub refinement_margin: f64,
    /// Maximum deliberation rounds per proposal lineage step.
    pub max_rounds: u32,
    /// Per-round agent deadline in seconds.
    pub round_deadline_secs: u64,
    /// Fraction of the council that must vote before the deadline.
    pub quorum_fraction: f64,
    /// Sanity score below which the round is forced to reject.
    pub safety_floor: f64,
    /// ULFR weights used for the deductive sanity score.
    pub ulfr_weights: UlfrWeights,
    /// Reward minted to a submitter when a proposal is approved, in ETHC.
    pub approval_reward: u64,
    /// Reputation update multiplier.
    pub reputation_lambda: f64,
    /// Reputation step when an agent voted with the consensus.
    pub reputation_step_aligned: f64,
    /// Reputation step when an agent voted against the consensus.
    pub reputation_step_misaligned: f64,
    /// Blocks between a governance tx being sealed and taking effect.
    pub authority_latency: u64,
    /// Gossip forwarding hop limit.
    pub max_hops: u8,
    /// Chain sync request chunk size.
    pub sync_batch: u64,
    /// Transactions per block cap.
    pub max_tx_per_block: usize,
    /// Mempool capacity.
    pub max_mempool: usize,
    /// Concurrent deliberations.
    pub max_concurrent_deliberations: usize,
}

impl Default for GovernanceParams {
    fn default() -> Self {
        Self {
            threshold_routine: 0.50,
            threshold_high_impact: 0.70,
            threshold_constitutional: 0.85,
            threshold_emergency: 0.60,
            refinement_margin: 0.10,
            max_rounds: 4,
            round_deadline_secs: 60,
            quorum_fraction: 0.60,
            safety_floor: 0.20,
            ulfr_weights: UlfrWeights::default(),
            approval_reward: 10,
            reputation_lambda: 1.0,
            reputation_step_aligned: 0.02,
            reputation_step_misaligned: 0.05,
            authority_latency: 10,
            max_hops: 7,
            sync_batch: 64,
            max_tx_per_block: 256,
            max_mempool: 10_000,
            max_concurrent_deliberations: 8,
        }
    }
}

impl GovernanceParams {
    /// Approval threshold for a category.
    pub fn threshold(&self, category: ProposalCategory) -> f64 {
        match category {
            ProposalCategory::Routine => self.threshold_routine,
            ProposalCategory::HighImpact => self.threshold_high_impact,
            ProposalCategory::Constitutional => self.threshold_constitutional,
            ProposalCategory::Emergency => self.threshold_emergency,
        }
    }

    /// Lower band boundary recorded in round results: `threshold - margin`,
    /// never below 0.30.
    pub fn threshold_min(&self, category: ProposalCategory) -> f64 {
        (self.threshold(category) - self.refinement_margin).max(0.30)
    }

    /// Minimum number of votes for a council of `council_size` agents.
    pub fn quorum(&self, council_size: usize) -> usize {
        (self.quorum_fraction * council_size as f64).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let p = GovernanceParams::default();
        assert_eq!(p.threshold(ProposalCategory::Routine), 0.50);
        assert_eq!(p.threshold(ProposalCategory::HighImpact), 0.70);
        assert_eq!(p.threshold(ProposalCategory::Constitutional), 0.85);
        assert_eq!(p.threshold(ProposalCategory::Emergency), 0.60);
    }

    #[test]
    fn test_threshold_min_floor() {
        let mut p = GovernanceParams::default();
        assert!((p.threshold_min(ProposalCategory::HighImpact) - 0.60).abs() < 1e-9);
        // Routine: 0.50 - 0.10 = 0.40, but the floor is 0.30, so 0.40 stands
        assert!((p.threshold_min(ProposalCategory::Routine) - 0.40).abs() < 1e-9);
        p.refinement_margin = 0.30;
        assert!((p.threshold_min(ProposalCategory::Routine) - 0.30).abs() < 1e-9);
    }

    #[test]
    fn test_quorum_ceiling() {
        let p = GovernanceParams::default();
        assert_eq!(p.quorum(6), 4); // ceil(3.6)
        assert_eq!(p.quorum(5), 3); // ceil(3.0)
    }

    #[test]
    fn test_weight_presets_normalize() {
        for preset in [
            WeightPreset::Default,
            WeightPreset::UtilityFocused,
            WeightPreset::CareFocused,
            WeightPreset::RightsFocused,
            WeightPreset::Balanced,
        ] {
            let w = preset.weights();
            let sum = w.alpha + w.beta + w.gamma + w.delta;
            assert!((sum - 1.0).abs() < 0.01, "{preset:?} sums to {sum}");
        }
    }
}
