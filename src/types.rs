use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Symbolic class of a stage, used to look up its resource policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageClass {
    /// Small bookkeeping steps (file preparation, indexing).
    Light,
    /// Large single-shot steps (assembly, alignment).
    Heavy,
    /// Probing step that decides the fan-out width.
    Checkpoint,
    /// One batch of elementary counting units.
    Batch,
    /// Final union + filter over all batch outputs.
    Reduce,
}

impl StageClass {
    pub const ALL: [StageClass; 5] = [
        StageClass::Light,
        StageClass::Heavy,
        StageClass::Checkpoint,
        StageClass::Batch,
        StageClass::Reduce,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageClass::Light => "light",
            StageClass::Heavy => "heavy",
            StageClass::Checkpoint => "checkpoint",
            StageClass::Batch => "batch",
            StageClass::Reduce => "reduce",
        }
    }
}

impl Default for StageClass {
    fn default() -> Self {
        StageClass::Light
    }
}

impl fmt::Display for StageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(StageClass::Light),
            "heavy" => Ok(StageClass::Heavy),
            "checkpoint" => Ok(StageClass::Checkpoint),
            "batch" => Ok(StageClass::Batch),
            "reduce" => Ok(StageClass::Reduce),
            other => Err(format!(
                "invalid stage class: {other} (expected light, heavy, checkpoint, batch or reduce)"
            )),
        }
    }
}

/// What the scheduler does after a stage fails for good.
///
/// - `Drain`: stop dispatching anything new; running stages finish.
/// - `Continue`: only block dependents of the failed stage; independent
///   branches keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    Drain,
    Continue,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Drain
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drain" => Ok(FailurePolicy::Drain),
            "continue" => Ok(FailurePolicy::Continue),
            other => Err(format!(
                "invalid on_failure: {other} (expected \"drain\" or \"continue\")"
            )),
        }
    }
}
