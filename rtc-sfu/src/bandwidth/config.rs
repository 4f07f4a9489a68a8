use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which distributor splits a publisher's REMB across its subscribers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionAlgorithm {
    #[serde(rename = "MaxVideoBW")]
    MaxVideoBw,
    #[default]
    #[serde(rename = "TargetVideoBW")]
    TargetVideoBw,
    #[serde(rename = "StreamPriority")]
    StreamPriority,
}

/// Bandwidth distribution settings as sent by the controller.
///
/// ```json
/// {"type":"StreamPriority","strategyId":"default",
///  "strategy":[{"priority":"20","level":"0"},{"priority":"10","level":"max"}]}
/// ```
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BwDistributionConfig {
    #[serde(rename = "type")]
    pub algorithm: DistributionAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_id: Option<String>,
    #[serde(default)]
    pub strategy: StreamPriorityStrategy,
    #[serde(default)]
    pub connection_target_bw: u64,
}

impl BwDistributionConfig {
    pub fn new(algorithm: DistributionAlgorithm) -> Self {
        Self {
            algorithm,
            ..Default::default()
        }
    }

    pub fn stream_priority(strategy: StreamPriorityStrategy) -> Self {
        Self {
            algorithm: DistributionAlgorithm::StreamPriority,
            strategy,
            ..Default::default()
        }
    }

    /// Parses and validates a JSON config.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.algorithm == DistributionAlgorithm::StreamPriority && self.strategy.is_empty() {
            return Err(Error::ErrInvalidDistributionConfig(
                "StreamPriority needs at least one strategy step".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Level of one strategy step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LevelRepr", into = "LevelRepr")]
pub enum PriorityLevel {
    /// Enough bitrate for this spatial layer.
    Spatial(u8),
    /// Everything up to the leg's maximum.
    Max,
    /// Turn on slideshow below spatial layer 0. Grants nothing.
    Slideshow,
    /// Turn on fallback below the minimum layer. Grants nothing.
    Fallback,
}

impl FromStr for PriorityLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "max" => Ok(PriorityLevel::Max),
            "slideshow" => Ok(PriorityLevel::Slideshow),
            "fallback" => Ok(PriorityLevel::Fallback),
            layer => layer
                .parse()
                .map(PriorityLevel::Spatial)
                .map_err(|_| Error::ErrInvalidPriorityLevel(layer.to_owned())),
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityLevel::Spatial(layer) => write!(f, "{}", layer),
            PriorityLevel::Max => write!(f, "max"),
            PriorityLevel::Slideshow => write!(f, "slideshow"),
            PriorityLevel::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum LevelRepr {
    Number(u64),
    Text(String),
}

impl TryFrom<LevelRepr> for PriorityLevel {
    type Error = Error;

    fn try_from(repr: LevelRepr) -> Result<Self> {
        match repr {
            LevelRepr::Number(layer) => u8::try_from(layer)
                .map(PriorityLevel::Spatial)
                .map_err(|_| Error::ErrInvalidPriorityLevel(layer.to_string())),
            LevelRepr::Text(text) => text.parse(),
        }
    }
}

impl From<PriorityLevel> for LevelRepr {
    fn from(level: PriorityLevel) -> Self {
        LevelRepr::Text(level.to_string())
    }
}

/// One `(priority, level)` pair of a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPriorityStep {
    pub priority: String,
    pub level: PriorityLevel,
}

impl StreamPriorityStep {
    pub fn new(priority: impl Into<String>, level: PriorityLevel) -> Self {
        Self {
            priority: priority.into(),
            level,
        }
    }

    /// Builds a step from the textual level used in configs, e.g. `"0"` or `"max"`.
    pub fn parse(priority: impl Into<String>, level: &str) -> Result<Self> {
        Ok(Self::new(priority, level.parse()?))
    }
}

/// Ordered list of steps, consumed front to back through a cursor.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<StreamPriorityStep>", into = "Vec<StreamPriorityStep>")]
pub struct StreamPriorityStrategy {
    steps: Vec<StreamPriorityStep>,
    cursor: usize,
}

impl From<Vec<StreamPriorityStep>> for StreamPriorityStrategy {
    fn from(steps: Vec<StreamPriorityStep>) -> Self {
        Self::new(steps)
    }
}

impl From<StreamPriorityStrategy> for Vec<StreamPriorityStep> {
    fn from(strategy: StreamPriorityStrategy) -> Self {
        strategy.steps
    }
}

impl StreamPriorityStrategy {
    pub fn new(steps: Vec<StreamPriorityStep>) -> Self {
        Self { steps, cursor: 0 }
    }

    pub fn steps(&self) -> &[StreamPriorityStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Rewinds the cursor to the first step.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn has_next_step(&self) -> bool {
        self.cursor < self.steps.len()
    }

    /// Returns the step under the cursor and advances it.
    pub fn next_step(&mut self) -> Option<StreamPriorityStep> {
        let step = self.steps.get(self.cursor).cloned();
        if step.is_some() {
            self.cursor += 1;
        }
        step
    }

    /// Highest spatial level any step assigns to `priority`.
    pub fn highest_layer_for_priority(&self, priority: &str) -> Option<u8> {
        self.steps
            .iter()
            .filter(|step| step.priority == priority)
            .filter_map(|step| match step.level {
                PriorityLevel::Spatial(layer) => Some(layer),
                _ => None,
            })
            .max()
    }
}
