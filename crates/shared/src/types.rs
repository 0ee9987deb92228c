//! Subscription tier and status vocabulary
//!
//! The tier is what a listener pays for; the status mirrors what the payment
//! processor last told us about the subscription funding it. Both are stored
//! as lowercase strings in the `users` table.

use serde::{Deserialize, Serialize};

/// Subscription tiers for listeners.
///
/// `Solo`, `Duo` and `Family` are the paid tiers, each mapped 1:1 to a Stripe
/// price. `Trial` is time-boxed and can be entered at most once per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Trial,
    Solo,
    Duo,
    Family,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Trial => "trial",
            SubscriptionTier::Solo => "solo",
            SubscriptionTier::Duo => "duo",
            SubscriptionTier::Family => "family",
        }
    }

    /// Parse a tier selector as sent by clients or stored in the database.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "free" => Some(SubscriptionTier::Free),
            "trial" => Some(SubscriptionTier::Trial),
            "solo" => Some(SubscriptionTier::Solo),
            "duo" => Some(SubscriptionTier::Duo),
            "family" => Some(SubscriptionTier::Family),
            _ => None,
        }
    }

    /// Whether this tier is funded by a Stripe subscription.
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            SubscriptionTier::Solo | SubscriptionTier::Duo | SubscriptionTier::Family
        )
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mirror of the processor's subscription status, plus the local `Refunded`
/// state set when a charge is refunded in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    Refunded,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Refunded => "refunded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "trialing" => Some(SubscriptionStatus::Trialing),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "unpaid" => Some(SubscriptionStatus::Unpaid),
            "incomplete" => Some(SubscriptionStatus::Incomplete),
            "incomplete_expired" => Some(SubscriptionStatus::IncompleteExpired),
            "paused" => Some(SubscriptionStatus::Paused),
            "refunded" => Some(SubscriptionStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_round_trip() {
        for tier in [
            SubscriptionTier::Free,
            SubscriptionTier::Trial,
            SubscriptionTier::Solo,
            SubscriptionTier::Duo,
            SubscriptionTier::Family,
        ] {
            assert_eq!(SubscriptionTier::from_str(tier.as_str()), Some(tier));
        }
    }

    #[test]
    fn test_unknown_tier_rejected() {
        assert_eq!(SubscriptionTier::from_str("platinum"), None);
        assert_eq!(SubscriptionTier::from_str("SOLO"), None);
        assert_eq!(SubscriptionTier::from_str(""), None);
    }

    #[test]
    fn test_paid_tiers() {
        assert!(!SubscriptionTier::Free.is_paid());
        assert!(!SubscriptionTier::Trial.is_paid());
        assert!(SubscriptionTier::Solo.is_paid());
        assert!(SubscriptionTier::Duo.is_paid());
        assert!(SubscriptionTier::Family.is_paid());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Refunded,
            SubscriptionStatus::IncompleteExpired,
        ] {
            assert_eq!(SubscriptionStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_tier_serde_uses_lowercase() {
        let json = serde_json::to_string(&SubscriptionTier::Family).unwrap();
        assert_eq!(json, "\"family\"");
    }
}
