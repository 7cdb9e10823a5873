//! Named retry tiers and the policies they resolve to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A named retry tier from the fixed catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryTier {
    /// Single attempt, no retry
    None,
    /// 2 attempts, 1s apart
    Low,
    /// 3 attempts, 2s apart
    #[default]
    Medium,
    /// 5 attempts, 5s apart
    High,
    /// 7 attempts, 10s apart
    VeryHigh,
    /// 10 attempts, 15s apart
    Extreme,
}

impl RetryTier {
    /// Every tier in the catalog, weakest first
    pub const ALL: [RetryTier; 6] = [
        RetryTier::None,
        RetryTier::Low,
        RetryTier::Medium,
        RetryTier::High,
        RetryTier::VeryHigh,
        RetryTier::Extreme,
    ];

    /// Resolve the tier to its attempt count and delay
    pub const fn policy(self) -> RetryPolicy {
        let (max_attempts, delay_secs) = match self {
            RetryTier::None => (1, 0),
            RetryTier::Low => (2, 1),
            RetryTier::Medium => (3, 2),
            RetryTier::High => (5, 5),
            RetryTier::VeryHigh => (7, 10),
            RetryTier::Extreme => (10, 15),
        };

        RetryPolicy {
            max_attempts,
            delay: Duration::from_secs(delay_secs),
            label: self.as_str(),
        }
    }

    /// Lower-case name used in configuration and metric labels
    pub const fn as_str(self) -> &'static str {
        match self {
            RetryTier::None => "none",
            RetryTier::Low => "low",
            RetryTier::Medium => "medium",
            RetryTier::High => "high",
            RetryTier::VeryHigh => "very_high",
            RetryTier::Extreme => "extreme",
        }
    }
}

impl fmt::Display for RetryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        RetryTier::ALL
            .into_iter()
            .find(|tier| tier.as_str() == normalized || tier.as_str().replace('_', "") == normalized)
            .ok_or_else(|| format!("unknown retry tier '{}'", s))
    }
}

/// Rejected custom policy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("max_attempts must be at least 1")]
pub struct InvalidRetryPolicy;

/// Attempt count plus fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    label: &'static str,
}

impl RetryPolicy {
    /// Build a policy outside the catalog
    pub fn new(max_attempts: u32, delay: Duration) -> Result<Self, InvalidRetryPolicy> {
        if max_attempts == 0 {
            return Err(InvalidRetryPolicy);
        }

        Ok(Self {
            max_attempts,
            delay,
            label: "custom",
        })
    }

    /// Total number of attempts, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Fixed wait between two attempts
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Tier name, or `custom`
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Upper bound on time spent waiting between attempts
    pub fn total_delay(&self) -> Duration {
        self.delay * (self.max_attempts - 1)
    }
}

impl From<RetryTier> for RetryPolicy {
    fn from(tier: RetryTier) -> Self {
        tier.policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_values() {
        let expected = [
            (RetryTier::None, 1, 0),
            (RetryTier::Low, 2, 1),
            (RetryTier::Medium, 3, 2),
            (RetryTier::High, 5, 5),
            (RetryTier::VeryHigh, 7, 10),
            (RetryTier::Extreme, 10, 15),
        ];

        for (tier, attempts, delay) in expected {
            let policy = tier.policy();
            assert_eq!(policy.max_attempts(), attempts, "{tier}");
            assert_eq!(policy.delay(), Duration::from_secs(delay), "{tier}");
            assert_eq!(policy.label(), tier.as_str());
        }
    }

    #[test]
    fn test_every_tier_has_at_least_one_attempt() {
        for tier in RetryTier::ALL {
            assert!(tier.policy().max_attempts() >= 1);
        }
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("low".parse::<RetryTier>().unwrap(), RetryTier::Low);
        assert_eq!("Very_High".parse::<RetryTier>().unwrap(), RetryTier::VeryHigh);
        assert_eq!("veryhigh".parse::<RetryTier>().unwrap(), RetryTier::VeryHigh);
        assert_eq!("very-high".parse::<RetryTier>().unwrap(), RetryTier::VeryHigh);
        assert!("sometimes".parse::<RetryTier>().is_err());
    }

    #[test]
    fn test_tier_serde_uses_snake_case() {
        let json = serde_json::to_string(&RetryTier::VeryHigh).unwrap();
        assert_eq!(json, "\"very_high\"");
        let tier: RetryTier = serde_json::from_str("\"extreme\"").unwrap();
        assert_eq!(tier, RetryTier::Extreme);
    }

    #[test]
    fn test_custom_policy_rejects_zero_attempts() {
        assert_eq!(
            RetryPolicy::new(0, Duration::from_millis(10)),
            Err(InvalidRetryPolicy)
        );

        let policy = RetryPolicy::new(4, Duration::from_millis(250)).unwrap();
        assert_eq!(policy.label(), "custom");
        assert_eq!(policy.total_delay(), Duration::from_millis(750));
    }
}
