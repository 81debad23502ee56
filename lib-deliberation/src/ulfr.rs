//! ULFR ethical scoring.
//!
//! Four dimensions per evaluation: Utility and Life/Care (higher is better),
//! Fairness penalty and Rights risk (higher is worse). The deductive score
//! starts from a perfect 1.0 and is penalized for missing utility, missing
//! care, unfairness and rights risk:
//!
//! `score = 1.0 - alpha*(1-U) - beta*(1-L) - gamma*F - delta*R`
//!
//! clamped to `[0, 1]`.

use serde::{Deserialize, Serialize};

use lib_governance::UlfrWeights;

/// One agent's four-dimensional ethical evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UlfrScore {
    pub utility: f64,
    pub life: f64,
    pub fairness_penalty: f64,
    pub rights_risk: f64,
}

impl UlfrScore {
    /// Construct with every dimension clamped into `[0, 1]`.
    pub fn clamped(utility: f64, life: f64, fairness_penalty: f64, rights_risk: f64) -> Self {
        let unit = |v: f64| v.clamp(0.0, 1.0);
        Self {
            utility: unit(utility),
            life: unit(life),
            fairness_penalty: unit(fairness_penalty),
            rights_risk: unit(rights_risk),
        }
    }

    /// Neutral midpoint used when an agent degrades to abstain.
    pub fn neutral() -> Self {
        Self::clamped(0.5, 0.5, 0.5, 0.5)
    }

    /// Deductive ULFR decision score under the given weights.
    pub fn deductive_score(&self, weights: &UlfrWeights) -> f64 {
        let penalty = weights.alpha * (1.0 - self.utility)
            + weights.beta * (1.0 - self.life)
            + weights.gamma * self.fairness_penalty
            + weights.delta * self.rights_risk;
        (1.0 - penalty).clamp(0.0, 1.0)
    }

    /// Unweighted component mean across a set of evaluations.
    pub fn mean(scores: &[UlfrScore]) -> UlfrScore {
        if scores.is_empty() {
            return Self::neutral();
        }
        let n = scores.len() as f64;
        Self::clamped(
            scores.iter().map(|s| s.utility).sum::<f64>() / n,
            scores.iter().map(|s| s.life).sum::<f64>() / n,
            scores.iter().map(|s| s.fairness_penalty).sum::<f64>() / n,
            scores.iter().map(|s| s.rights_risk).sum::<f64>() / n,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_score() {
        let score = UlfrScore::clamped(1.0, 1.0, 0.0, 0.0);
        assert!((score.deductive_score(&UlfrWeights::default()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_worst_score_clamps_to_zero() {
        let score = UlfrScore::clamped(0.0, 0.0, 1.0, 1.0);
        assert_eq!(score.deductive_score(&UlfrWeights::default()), 0.0);
    }

    #[test]
    fn test_default_weights_formula() {
        // U=0.8, L=0.9, F=0.2, R=0.1 with whitepaper weights:
        // 1 - 0.25*0.2 - 0.40*0.1 - 0.20*0.2 - 0.15*0.1 = 0.855
        let score = UlfrScore::clamped(0.8, 0.9, 0.2, 0.1);
        let value = score.deductive_score(&UlfrWeights::default());
        assert!((value - 0.855).abs() < 1e-9, "got {value}");
    }

    #[test]
    fn test_inputs_are_clamped() {
        let score = UlfrScore::clamped(1.5, -0.2, 2.0, -1.0);
        assert_eq!(score.utility, 1.0);
        assert_eq!(score.life, 0.0);
        assert_eq!(score.fairness_penalty, 1.0);
        assert_eq!(score.rights_risk, 0.0);
    }

    #[test]
    fn test_mean() {
        let mean = UlfrScore::mean(&[
            UlfrScore::clamped(1.0, 0.0, 0.0, 0.0),
            UlfrScore::clamped(0.0, 1.0, 1.0, 0.0),
        ]);
        assert!((mean.utility - 0.5).abs() < 1e-12);
        assert!((mean.life - 0.5).abs() < 1e-12);
        assert!((mean.fairness_penalty - 0.5).abs() < 1e-12);
        assert_eq!(mean.rights_risk, 0.0);
    }

    #[test]
    fn test_mean_of_empty_is_neutral() {
        assert_eq!(UlfrScore::mean(&[]), UlfrScore::neutral());
    }
}
