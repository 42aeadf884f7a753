//! Strict versus best-effort handling of recoverable failures

use std::error::Error;
use std::fmt;

/// How a recoverable failure is treated
///
/// Derived once from the configuration and threaded through every stage.
/// Every "drop or abort" decision goes through [`CompatMode::degrade`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompatMode {
    /// Any capability gap or rule failure aborts the whole sandbox.
    #[default]
    Strict,
    /// Capability gaps and rule failures are recorded and skipped.
    BestEffort,
}

impl CompatMode {
    pub fn from_best_effort(best_effort: bool) -> Self {
        if best_effort {
            CompatMode::BestEffort
        } else {
            CompatMode::Strict
        }
    }

    pub fn is_best_effort(self) -> bool {
        self == CompatMode::BestEffort
    }

    /// Strict mode returns `err`. Best-effort records `rule` as dropped and
    /// lets the caller continue.
    pub fn degrade<E>(self, rule: String, err: E, dropped: &mut Vec<DroppedRule>) -> Result<(), E>
    where
        E: Error,
    {
        match self {
            CompatMode::Strict => Err(err),
            CompatMode::BestEffort => {
                let reason = error_chain(&err);
                tracing::warn!(rule = %rule, reason = %reason, "dropping rule");
                dropped.push(DroppedRule { rule, reason });
                Ok(())
            }
        }
    }
}

/// A declared rule that was left out of the enforced ruleset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRule {
    /// `bind:8080`, `/usr (rox)`, ...
    pub rule: String,
    pub reason: String,
}

impl fmt::Display for DroppedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule, self.reason)
    }
}

/// Renders an error with all of its sources, `outer: inner: root`.
pub(crate) fn error_chain(err: &dyn Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
