//! Tie-break policy for candidate pairs.
//!
//! Decision tree, applied to two captures within the distance threshold:
//!
//! - Same acquisition
//!   - both relative positions present and within the continuity window: no action
//!   - opposite directions: the `+` capture loses
//!   - same direction: the capture with the smaller sequence index loses
//! - Different acquisitions
//!   - opposite directions: the `+` capture loses
//!   - capture dates more than `stale_after_days` apart: the older capture loses
//!   - otherwise: the capture with the higher (worse) quality score loses
//!
//! Exact ties on sequence index or quality score produce no action, so the
//! outcome never depends on argument order.

use serde::{Deserialize, Serialize};

use crate::{Capture, ComparisonError, Direction};

/// Parameters of the tie-break policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RulePolicy {
    /// Relative-position window for a continuous same-acquisition sweep.
    pub continuity_window: f64,
    /// Whole-day capture gap beyond which recency decides.
    pub stale_after_days: i64,
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self {
            continuity_window: 100.0,
            stale_after_days: 30,
        }
    }
}

/// Classification of a candidate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairKind {
    SameAcquisition,
    DifferentAcquisition,
}

impl PairKind {
    pub fn classify(a: &Capture, b: &Capture) -> Self {
        if a.acquisition_id == b.acquisition_id {
            PairKind::SameAcquisition
        } else {
            PairKind::DifferentAcquisition
        }
    }
}

/// Branch of the decision tree that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Same acquisition, relative positions within the continuity window
    ContinuousSweep,
    /// Opposite directions; the `+` capture lost
    OppositeDirection,
    /// Same acquisition and direction; the earlier sequence index lost
    EarlierSequence,
    /// Different acquisitions; the older capture lost
    StaleCapture,
    /// Different acquisitions of similar age; the worse quality lost
    WorseQuality,
    /// Exact tie on the deciding field
    Undecided,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::ContinuousSweep => "continuous_sweep",
            DecisionReason::OppositeDirection => "opposite_direction",
            DecisionReason::EarlierSequence => "earlier_sequence",
            DecisionReason::StaleCapture => "stale_capture",
            DecisionReason::WorseQuality => "worse_quality",
            DecisionReason::Undecided => "undecided",
        }
    }
}

/// Outcome of evaluating one candidate pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision<'a> {
    NoAction { reason: DecisionReason },
    Obsolete {
        loser: &'a Capture,
        reason: DecisionReason,
    },
}

impl<'a> Decision<'a> {
    /// The capture that loses, if any.
    pub fn loser(&self) -> Option<&'a Capture> {
        match self {
            Decision::NoAction { .. } => None,
            Decision::Obsolete { loser, .. } => Some(*loser),
        }
    }

    pub fn reason(&self) -> DecisionReason {
        match self {
            Decision::NoAction { reason } | Decision::Obsolete { reason, .. } => *reason,
        }
    }
}

/// Apply the tie-break policy to a candidate pair.
///
/// Returns an error when a numeric field of either capture is non-finite;
/// the caller skips the pair.
pub fn evaluate_pair<'a>(
    a: &'a Capture,
    b: &'a Capture,
    policy: &RulePolicy,
) -> Result<Decision<'a>, ComparisonError> {
    check_finite(a)?;
    check_finite(b)?;

    let decision = match PairKind::classify(a, b) {
        PairKind::SameAcquisition => {
            if let (Some(ra), Some(rb)) = (a.relative_position, b.relative_position) {
                if (ra - rb).abs() <= policy.continuity_window {
                    return Ok(Decision::NoAction {
                        reason: DecisionReason::ContinuousSweep,
                    });
                }
            }

            if a.direction != b.direction {
                plus_loses(a, b)
            } else {
                lesser_loses(
                    a,
                    b,
                    a.sequence_index.cmp(&b.sequence_index),
                    DecisionReason::EarlierSequence,
                )
            }
        }
        PairKind::DifferentAcquisition => {
            if a.direction != b.direction {
                plus_loses(a, b)
            } else {
                let gap_days = (a.captured_at - b.captured_at).num_days().abs();
                if gap_days > policy.stale_after_days {
                    lesser_loses(
                        a,
                        b,
                        a.captured_at.cmp(&b.captured_at),
                        DecisionReason::StaleCapture,
                    )
                } else {
                    // Higher score is worse, so the greater one loses
                    lesser_loses(
                        a,
                        b,
                        b.quality.total_cmp(&a.quality),
                        DecisionReason::WorseQuality,
                    )
                }
            }
        }
    };

    Ok(decision)
}

fn check_finite(capture: &Capture) -> Result<(), ComparisonError> {
    if !capture.quality.is_finite() {
        return Err(ComparisonError::NonFiniteQuality {
            id: capture.id.clone(),
            value: capture.quality,
        });
    }
    if let Some(value) = capture.relative_position {
        if !value.is_finite() {
            return Err(ComparisonError::NonFiniteRelativePosition {
                id: capture.id.clone(),
                value,
            });
        }
    }
    Ok(())
}

fn plus_loses<'a>(a: &'a Capture, b: &'a Capture) -> Decision<'a> {
    let loser = if a.direction == Direction::Plus { a } else { b };
    Decision::Obsolete {
        loser,
        reason: DecisionReason::OppositeDirection,
    }
}

/// `ordering` compares `a` to `b`; the lesser side loses, equality is a tie.
fn lesser_loses<'a>(
    a: &'a Capture,
    b: &'a Capture,
    ordering: std::cmp::Ordering,
    reason: DecisionReason,
) -> Decision<'a> {
    match ordering {
        std::cmp::Ordering::Less => Decision::Obsolete { loser: a, reason },
        std::cmp::Ordering::Greater => Decision::Obsolete { loser: b, reason },
        std::cmp::Ordering::Equal => Decision::NoAction {
            reason: DecisionReason::Undecided,
        },
    }
}
