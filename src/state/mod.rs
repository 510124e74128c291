//! Release state for a managed service
//!
//! `ReleaseState` is the single persisted record the controller owns:
//! which blue-green color is live, and where the canary sits on the
//! fixed promotion ladder. Live orchestrator reads verify it; they do
//! not replace it.

pub mod store;

pub use store::{ConfigMapStateStore, MemoryStateStore, StateStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fixed canary traffic ladder (percent)
///
/// Stage `n` of a promotion always routes `CANARY_LADDER[n]` percent of
/// traffic to the canary. Promotion moves exactly one index at a time.
pub const CANARY_LADDER: [u8; 5] = [0, 10, 25, 50, 100];

/// Index of the last ladder stage (100%)
pub const FINAL_STAGE: usize = CANARY_LADDER.len() - 1;

/// Position of `weight` on the ladder, if it is a ladder value
pub fn stage_of(weight: u8) -> Option<usize> {
    CANARY_LADDER.iter().position(|w| *w == weight)
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    #[error("persisted release state is corrupt: {0}")]
    Corrupt(String),
}

/// One of the two blue-green variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Blue,
    Green,
}

impl Color {
    pub fn as_str(self) -> &'static str {
        match self {
            Color::Blue => "blue",
            Color::Green => "green",
        }
    }

    /// The color that is not `self`
    pub fn other(self) -> Color {
        match self {
            Color::Blue => Color::Green,
            Color::Green => Color::Blue,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blue" => Ok(Color::Blue),
            "green" => Ok(Color::Green),
            other => Err(format!("target must be blue or green, got {other:?}")),
        }
    }
}

/// A deployable variant: one orchestrator deployment per target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionTarget {
    Blue,
    Green,
    Canary,
}

impl VersionTarget {
    pub const ALL: [VersionTarget; 3] =
        [VersionTarget::Blue, VersionTarget::Green, VersionTarget::Canary];

    /// Value of the version label on this target's pods
    pub fn as_str(self) -> &'static str {
        match self {
            VersionTarget::Blue => "blue",
            VersionTarget::Green => "green",
            VersionTarget::Canary => "canary",
        }
    }
}

impl From<Color> for VersionTarget {
    fn from(color: Color) -> Self {
        match color {
            Color::Blue => VersionTarget::Blue,
            Color::Green => VersionTarget::Green,
        }
    }
}

impl fmt::Display for VersionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canary traffic weight that is guaranteed to be on the ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct LadderWeight(u8);

impl LadderWeight {
    pub const ZERO: LadderWeight = LadderWeight(0);

    pub fn at_stage(stage: usize) -> Option<LadderWeight> {
        CANARY_LADDER.get(stage).copied().map(LadderWeight)
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    pub fn stage(self) -> usize {
        // Construction only admits ladder values
        stage_of(self.0).unwrap_or(0)
    }

    /// The next stage up, or None at 100%
    pub fn next(self) -> Option<LadderWeight> {
        LadderWeight::at_stage(self.stage() + 1)
    }
}

impl TryFrom<u8> for LadderWeight {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match stage_of(value) {
            Some(_) => Ok(LadderWeight(value)),
            None => Err(format!(
                "weight must be one of {CANARY_LADDER:?}, got {value}"
            )),
        }
    }
}

impl FromStr for LadderWeight {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u8 = s
            .trim()
            .parse()
            .map_err(|_| format!("weight must be one of {CANARY_LADDER:?}, got {s:?}"))?;
        LadderWeight::try_from(value)
    }
}

impl From<LadderWeight> for u8 {
    fn from(weight: LadderWeight) -> Self {
        weight.0
    }
}

impl fmt::Display for LadderWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Blue-green section of the release record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueGreenState {
    pub active_color: Color,
}

/// Canary section of the release record
///
/// Fields are private so `canary_weight`, `canary_enabled` and
/// `promotion_stage` can only change together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawCanaryState")]
pub struct CanaryState {
    canary_weight: u8,
    canary_enabled: bool,
    promotion_stage: usize,
}

impl CanaryState {
    pub fn at(weight: LadderWeight) -> Self {
        CanaryState {
            canary_weight: weight.percent(),
            canary_enabled: weight.percent() > 0,
            promotion_stage: weight.stage(),
        }
    }

    pub fn disabled() -> Self {
        CanaryState::at(LadderWeight::ZERO)
    }

    pub fn weight(&self) -> LadderWeight {
        LadderWeight(self.canary_weight)
    }

    pub fn enabled(&self) -> bool {
        self.canary_enabled
    }

    pub fn promotion_stage(&self) -> usize {
        self.promotion_stage
    }
}

impl Default for CanaryState {
    fn default() -> Self {
        CanaryState::disabled()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCanaryState {
    canary_weight: u8,
    canary_enabled: bool,
    promotion_stage: usize,
}

impl TryFrom<RawCanaryState> for CanaryState {
    type Error = String;

    fn try_from(raw: RawCanaryState) -> Result<Self, Self::Error> {
        let weight = LadderWeight::try_from(raw.canary_weight)?;
        let expected = CanaryState::at(weight);
        if raw.promotion_stage != expected.promotion_stage {
            return Err(format!(
                "promotionStage {} does not match weight {}",
                raw.promotion_stage, raw.canary_weight
            ));
        }
        if raw.canary_enabled != expected.canary_enabled {
            return Err(format!(
                "canaryEnabled {} is inconsistent with weight {}",
                raw.canary_enabled, raw.canary_weight
            ));
        }
        Ok(expected)
    }
}

/// Release state of one managed service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseState {
    pub blue_green: BlueGreenState,
    pub canary: CanaryState,
    /// Updated only by successful switches and weight changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Default for ReleaseState {
    fn default() -> Self {
        ReleaseState {
            blue_green: BlueGreenState {
                active_color: Color::Blue,
            },
            canary: CanaryState::disabled(),
            last_transition_time: None,
        }
    }
}

impl ReleaseState {
    pub fn active_color(&self) -> Color {
        self.blue_green.active_color
    }

    pub fn with_active_color(&self, color: Color, at: DateTime<Utc>) -> ReleaseState {
        ReleaseState {
            blue_green: BlueGreenState {
                active_color: color,
            },
            last_transition_time: Some(at),
            ..self.clone()
        }
    }

    pub fn with_canary_weight(&self, weight: LadderWeight, at: DateTime<Utc>) -> ReleaseState {
        ReleaseState {
            canary: CanaryState::at(weight),
            last_transition_time: Some(at),
            ..self.clone()
        }
    }

    pub fn from_json(raw: &str) -> Result<ReleaseState, StateError> {
        serde_json::from_str(raw).map_err(|e| StateError::Corrupt(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, StateError> {
        serde_json::to_string(self).map_err(|e| StateError::Corrupt(e.to_string()))
    }
}
