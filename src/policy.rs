//! Per-node failure handling.
//!
//! A node's `error_policy` is parsed into an [`ErrorPolicy`]; after every failed
//! attempt the dispatcher asks [`PolicyEngine::handle`] what to do next.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NodeError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorStrategy {
    Retry,
    Fallback,
    Skip,
    Branch,
    #[default]
    Stop,
}

/// What to do once retries are used up.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExhaustedAction {
    Fallback,
    Skip,
    Branch,
    #[default]
    Stop,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ErrorPolicy {
    #[serde(default)]
    pub strategy: ErrorStrategy,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    /// Output used in place of the failed node's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Value>,
    /// Node id reached through the `error` port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default)]
    pub on_exhausted: ExhaustedAction,
    /// Fail fast on auth and validation errors instead of retrying them.
    #[serde(default)]
    pub retry_only_transient: bool,
}

fn default_delay_ms() -> u64 {
    1000
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            strategy: ErrorStrategy::Stop,
            max_retries: 0,
            backoff: Backoff::Fixed,
            delay_ms: default_delay_ms(),
            max_delay_ms: None,
            fallback: None,
            handler: None,
            on_exhausted: ExhaustedAction::Stop,
            retry_only_transient: false,
        }
    }
}

impl ErrorPolicy {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let policy: ErrorPolicy = serde_json::from_value(value.clone()).map_err(|e| format!("invalid error_policy: {}", e))?;
        policy.check()?;
        Ok(policy)
    }

    fn check(&self) -> Result<(), String> {
        let needs_fallback = self.strategy == ErrorStrategy::Fallback || self.exhausts_into(ExhaustedAction::Fallback);
        if needs_fallback && self.fallback.is_none() {
            return Err("fallback policy requires a 'fallback' value".to_string());
        }
        if self.uses_branch() && self.handler.is_none() {
            return Err("branch policy requires a 'handler' node".to_string());
        }
        if self.strategy == ErrorStrategy::Retry && self.max_retries == 0 {
            return Err("retry policy requires max_retries > 0".to_string());
        }
        Ok(())
    }

    fn exhausts_into(
        &self,
        action: ExhaustedAction,
    ) -> bool {
        self.strategy == ErrorStrategy::Retry && self.on_exhausted == action
    }

    /// Whether a failure can end up on the `error` port.
    pub fn uses_branch(&self) -> bool {
        self.strategy == ErrorStrategy::Branch || self.exhausts_into(ExhaustedAction::Branch)
    }

    /// Delay before retry number `n` (1-based).
    pub fn delay_for(
        &self,
        n: u32,
    ) -> Duration {
        let n = n.max(1) as u64;
        let ms = match self.backoff {
            Backoff::Fixed => self.delay_ms,
            Backoff::Linear => self.delay_ms.saturating_mul(n),
            Backoff::Exponential => self.delay_ms.saturating_mul(2u64.saturating_pow((n - 1) as u32)),
        };
        let ms = match self.max_delay_ms {
            Some(cap) => ms.min(cap),
            None => ms,
        };
        Duration::from_millis(ms)
    }
}

/// Next step after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Retry(Duration),
    UseFallback(Value),
    Skip,
    Branch(String),
    Stop,
}

pub struct PolicyEngine;

impl PolicyEngine {
    /// Decide how to continue after `err`, with `attempt` retries already performed.
    pub fn handle(
        policy: &ErrorPolicy,
        err: &NodeError,
        attempt: u32,
    ) -> Verdict {
        match policy.strategy {
            ErrorStrategy::Stop => Verdict::Stop,
            ErrorStrategy::Skip => Verdict::Skip,
            ErrorStrategy::Fallback => Self::fallback(policy),
            ErrorStrategy::Branch => Self::branch(policy),
            ErrorStrategy::Retry => {
                let retryable = !policy.retry_only_transient || err.kind.is_transient();
                if retryable && attempt < policy.max_retries {
                    let mut delay = policy.delay_for(attempt + 1);
                    if let Some(hint) = err.retry_after_ms {
                        delay = delay.max(Duration::from_millis(hint));
                    }
                    return Verdict::Retry(delay);
                }
                match policy.on_exhausted {
                    ExhaustedAction::Stop => Verdict::Stop,
                    ExhaustedAction::Skip => Verdict::Skip,
                    ExhaustedAction::Fallback => Self::fallback(policy),
                    ExhaustedAction::Branch => Self::branch(policy),
                }
            }
        }
    }

    fn fallback(policy: &ErrorPolicy) -> Verdict {
        match &policy.fallback {
            Some(value) => Verdict::UseFallback(value.clone()),
            None => Verdict::Stop,
        }
    }

    fn branch(policy: &ErrorPolicy) -> Verdict {
        match &policy.handler {
            Some(handler) => Verdict::Branch(handler.clone()),
            None => Verdict::Stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::NodeErrorKind;

    fn retry_policy(backoff: &str) -> ErrorPolicy {
        ErrorPolicy::from_value(&json!({
            "strategy": "retry",
            "max_retries": 3,
            "backoff": backoff,
            "delay_ms": 100
        }))
        .unwrap()
    }

    #[test]
    fn test_default_policy_stops() {
        let policy = ErrorPolicy::default();
        assert_eq!(PolicyEngine::handle(&policy, &NodeError::server("boom"), 0), Verdict::Stop);
    }

    #[test]
    fn test_backoff_progressions() {
        let fixed = retry_policy("fixed");
        let linear = retry_policy("linear");
        let exponential = retry_policy("exponential");
        let ms = |p: &ErrorPolicy, n| p.delay_for(n).as_millis();

        assert_eq!((ms(&fixed, 1), ms(&fixed, 2), ms(&fixed, 3)), (100, 100, 100));
        assert_eq!((ms(&linear, 1), ms(&linear, 2), ms(&linear, 3)), (100, 200, 300));
        assert_eq!((ms(&exponential, 1), ms(&exponential, 2), ms(&exponential, 3)), (100, 200, 400));

        let mut capped = exponential.clone();
        capped.max_delay_ms = Some(250);
        assert_eq!(ms(&capped, 3), 250);
    }

    #[test]
    fn test_retry_until_exhausted() {
        let policy = retry_policy("exponential");
        let err = NodeError::connection("refused");
        assert_eq!(PolicyEngine::handle(&policy, &err, 0), Verdict::Retry(Duration::from_millis(100)));
        assert_eq!(PolicyEngine::handle(&policy, &err, 1), Verdict::Retry(Duration::from_millis(200)));
        assert_eq!(PolicyEngine::handle(&policy, &err, 2), Verdict::Retry(Duration::from_millis(400)));
        assert_eq!(PolicyEngine::handle(&policy, &err, 3), Verdict::Stop);
    }

    #[test]
    fn test_rate_limit_hint_raises_delay() {
        let policy = retry_policy("fixed");
        let err = NodeError::rate_limited("slow down", Some(2000));
        assert_eq!(PolicyEngine::handle(&policy, &err, 0), Verdict::Retry(Duration::from_millis(2000)));
    }

    #[test]
    fn test_every_kind_is_retried_by_default() {
        let mut policy = retry_policy("fixed");
        policy.on_exhausted = ExhaustedAction::Skip;
        let auth = NodeError::new(NodeErrorKind::AuthError, "bad key");
        let invalid = NodeError::validation("missing field");
        assert!(matches!(PolicyEngine::handle(&policy, &auth, 0), Verdict::Retry(_)));
        assert!(matches!(PolicyEngine::handle(&policy, &invalid, 2), Verdict::Retry(_)));
        assert_eq!(PolicyEngine::handle(&policy, &auth, 3), Verdict::Skip);
    }

    #[test]
    fn test_retry_only_transient() {
        let mut policy = retry_policy("fixed");
        policy.on_exhausted = ExhaustedAction::Skip;
        policy.retry_only_transient = true;
        let err = NodeError::new(NodeErrorKind::AuthError, "bad key");
        assert_eq!(PolicyEngine::handle(&policy, &err, 0), Verdict::Skip);
        assert!(matches!(PolicyEngine::handle(&policy, &NodeError::server("500"), 0), Verdict::Retry(_)));
    }

    #[test]
    fn test_exhausted_into_fallback() {
        let policy = ErrorPolicy::from_value(&json!({
            "strategy": "retry",
            "max_retries": 1,
            "delay_ms": 0,
            "on_exhausted": "fallback",
            "fallback": { "status": "unknown" }
        }))
        .unwrap();
        let err = NodeError::server("500");
        assert_eq!(PolicyEngine::handle(&policy, &err, 1), Verdict::UseFallback(json!({ "status": "unknown" })));
    }

    #[test]
    fn test_branch_and_skip() {
        let branch = ErrorPolicy::from_value(&json!({ "strategy": "branch", "handler": "notify" })).unwrap();
        assert!(branch.uses_branch());
        assert_eq!(PolicyEngine::handle(&branch, &NodeError::server("x"), 0), Verdict::Branch("notify".to_string()));

        let skip = ErrorPolicy::from_value(&json!({ "strategy": "skip" })).unwrap();
        assert_eq!(PolicyEngine::handle(&skip, &NodeError::validation("x"), 0), Verdict::Skip);
    }

    #[test]
    fn test_malformed_policies_rejected() {
        assert!(ErrorPolicy::from_value(&json!({ "strategy": "fallback" })).is_err());
        assert!(ErrorPolicy::from_value(&json!({ "strategy": "branch" })).is_err());
        assert!(ErrorPolicy::from_value(&json!({ "strategy": "retry" })).is_err());
        assert!(ErrorPolicy::from_value(&json!({ "strategy": "explode" })).is_err());
        assert!(ErrorPolicy::from_value(&json!({ "strategy": "skip", "retries": 2 })).is_err());
    }
}
