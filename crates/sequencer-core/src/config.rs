use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SequencerError};
use crate::wait::WaitOptions;

// ---------------------------------------------------------------------------
// RetentionPolicy
// ---------------------------------------------------------------------------

/// What happens to a Command in the target list once it has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Leave it where it is.
    #[default]
    Keep,
    /// Drop it from the target list.
    Delete,
    /// Move it to the front of the opposite list.
    SendToOtherList,
    /// Leave it and repeat the whole pass per the loop count.
    Loop,
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Keep => "keep",
            Self::Delete => "delete",
            Self::SendToOtherList => "send_to_other_list",
            Self::Loop => "loop",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RetentionPolicy {
    type Err = SequencerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "keep" => Ok(Self::Keep),
            "delete" => Ok(Self::Delete),
            "send_to_other_list" => Ok(Self::SendToOtherList),
            "loop" => Ok(Self::Loop),
            other => Err(SequencerError::InvalidArgument(format!(
                "unknown retention policy '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// LoopCount
// ---------------------------------------------------------------------------

/// How many passes a `Loop` run makes.
///
/// Integer form: `0` = one pass, `N > 0` = N passes, `-1` = until cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum LoopCount {
    Times(u32),
    Forever,
}

impl LoopCount {
    /// `true` when another pass should follow `completed_passes`.
    pub fn wants_another(self, completed_passes: u32) -> bool {
        match self {
            Self::Forever => true,
            Self::Times(n) => completed_passes < n,
        }
    }
}

impl Default for LoopCount {
    fn default() -> Self {
        Self::Times(0)
    }
}

impl TryFrom<i64> for LoopCount {
    type Error = SequencerError;

    fn try_from(n: i64) -> Result<Self> {
        match n {
            -1 => Ok(Self::Forever),
            n if n >= 0 => u32::try_from(n).map(Self::Times).map_err(|_| {
                SequencerError::InvalidArgument(format!("loop count {n} is too large"))
            }),
            n => Err(SequencerError::InvalidArgument(format!(
                "loop count must be -1 or greater, got {n}"
            ))),
        }
    }
}

impl From<LoopCount> for i64 {
    fn from(count: LoopCount) -> Self {
        match count {
            LoopCount::Times(n) => i64::from(n),
            LoopCount::Forever => -1,
        }
    }
}

impl fmt::Display for LoopCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Times(n) => write!(f, "{n}"),
            Self::Forever => f.write_str("forever"),
        }
    }
}

// ---------------------------------------------------------------------------
// SequenceConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceConfig {
    #[serde(default)]
    pub policy: RetentionPolicy,
    #[serde(default)]
    pub loop_count: LoopCount,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a replaced run is given to observe its cancellation.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Upper bound on every gate and completion wait; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_timeout_ms: Option<u64>,
}

/// Keys present in a loaded config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExplicitKeys {
    pub policy: bool,
    pub loop_count: bool,
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_grace_period_ms() -> u64 {
    50
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            policy: RetentionPolicy::default(),
            loop_count: LoopCount::default(),
            poll_interval_ms: default_poll_interval_ms(),
            grace_period_ms: default_grace_period_ms(),
            wait_timeout_ms: None,
        }
    }
}

impl SequenceConfig {
    pub fn new(policy: RetentionPolicy, loop_count: LoopCount) -> Self {
        Self {
            policy,
            loop_count,
            ..Self::default()
        }
    }

    /// Read a YAML config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_explicit(path).map(|(config, _)| config)
    }

    /// Like [`load`](Self::load), also reporting which keys the file set, so
    /// callers can tell a written default from an absent one.
    pub fn load_explicit(path: &Path) -> Result<(Self, ExplicitKeys)> {
        if !path.exists() {
            return Ok((Self::default(), ExplicitKeys::default()));
        }
        let data = std::fs::read_to_string(path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&data)?;
        if value.is_null() {
            return Ok((Self::default(), ExplicitKeys::default()));
        }
        let keys = ExplicitKeys {
            policy: value.get("policy").is_some(),
            loop_count: value.get("loop_count").is_some(),
        };
        let config: Self = serde_yaml::from_value(value)?;
        config.validate()?;
        Ok((config, keys))
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(SequencerError::InvalidArgument(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: self.wait_timeout_ms.map(Duration::from_millis),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
