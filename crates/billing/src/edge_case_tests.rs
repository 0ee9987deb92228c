// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Billing System
//!
//! Tests critical boundary conditions in:
//! - Webhook signature verification (RES-W01 to RES-W06)
//! - Price/tier mapping (RES-T01 to RES-T04)
//! - Refund amount handling (RES-RF01 to RES-RF05)
//! - Merge-write patch semantics (RES-P01 to RES-P04)

#[cfg(test)]
mod webhook_signature_tests {
    use crate::webhooks::verify_signature_at;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    const SECRET: &str = "whsec_edgecase_secret";

    fn sign_at(payload: &str, timestamp: i64) -> String {
        let key = SECRET.strip_prefix("whsec_").unwrap();
        let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    // =========================================================================
    // RES-W01: Timestamp exactly at the tolerance boundary - accepted
    // =========================================================================
    #[test]
    fn test_skew_exactly_at_tolerance_accepted() {
        let payload = r#"{"id":"evt_w01"}"#;
        let signed_at = 1_700_000_000;
        let header = sign_at(payload, signed_at);

        assert!(verify_signature_at(payload, &header, SECRET, signed_at + 300).is_ok());
        assert!(verify_signature_at(payload, &header, SECRET, signed_at - 300).is_ok());
    }

    // =========================================================================
    // RES-W02: Timestamp one second past tolerance - rejected
    // =========================================================================
    #[test]
    fn test_skew_one_past_tolerance_rejected() {
        let payload = r#"{"id":"evt_w02"}"#;
        let signed_at = 1_700_000_000;
        let header = sign_at(payload, signed_at);

        assert!(verify_signature_at(payload, &header, SECRET, signed_at + 301).is_err());
        assert!(verify_signature_at(payload, &header, SECRET, signed_at - 301).is_err());
    }

    // =========================================================================
    // RES-W03: Empty payload still verifies when signed as empty
    // =========================================================================
    #[test]
    fn test_empty_payload_signed_as_empty() {
        let now = 1_700_000_000;
        let header = sign_at("", now);

        assert!(verify_signature_at("", &header, SECRET, now).is_ok());
        assert!(verify_signature_at("{}", &header, SECRET, now).is_err());
    }

    // =========================================================================
    // RES-W04: Signature from a different timestamp - rejected
    // =========================================================================
    #[test]
    fn test_replayed_signature_with_edited_timestamp_rejected() {
        let payload = r#"{"id":"evt_w04"}"#;
        let now = 1_700_000_000;
        let header = sign_at(payload, now);

        // Splice a different (still fresh) timestamp into the header while
        // keeping the old v1 value
        let v1 = header.split("v1=").nth(1).unwrap();
        let forged = format!("t={},v1={}", now + 10, v1);

        assert!(verify_signature_at(payload, &forged, SECRET, now).is_err());
    }

    // =========================================================================
    // RES-W05: Uppercase hex signature - rejected (comparison is exact)
    // =========================================================================
    #[test]
    fn test_uppercase_hex_signature_rejected() {
        let payload = r#"{"id":"evt_w05"}"#;
        let now = 1_700_000_000;
        let header = sign_at(payload, now).to_uppercase().replace("T=", "t=").replace("V1=", "v1=");

        assert!(verify_signature_at(payload, &header, SECRET, now).is_err());
    }

    // =========================================================================
    // RES-W06: Secret without whsec_ prefix verifies the same bytes
    // =========================================================================
    #[test]
    fn test_secret_prefix_is_optional() {
        let payload = r#"{"id":"evt_w06"}"#;
        let now = 1_700_000_000;
        let header = sign_at(payload, now);

        let bare_secret = SECRET.strip_prefix("whsec_").unwrap();
        assert!(verify_signature_at(payload, &header, bare_secret, now).is_ok());
    }
}

#[cfg(test)]
mod tier_mapping_tests {
    use crate::client::PriceIds;
    use resonate_shared::SubscriptionTier;

    fn prices() -> PriceIds {
        PriceIds {
            solo: "price_1SoloAbc".to_string(),
            duo: "price_1DuoAbc".to_string(),
            family: "price_1FamAbc".to_string(),
        }
    }

    // =========================================================================
    // RES-T01: Every paid tier resolves to exactly one price and back
    // =========================================================================
    #[test]
    fn test_mapping_is_bijective_over_paid_tiers() {
        let prices = prices();
        for tier in [
            SubscriptionTier::Solo,
            SubscriptionTier::Duo,
            SubscriptionTier::Family,
        ] {
            let price = prices.price_id_for_tier(tier).unwrap();
            assert_eq!(prices.tier_for_price_id(price), Some(tier));
        }
    }

    // =========================================================================
    // RES-T02: Unmapped price resolves to no tier
    // =========================================================================
    #[test]
    fn test_unmapped_price_resolves_to_none() {
        assert_eq!(prices().tier_for_price_id("price_1Legacy"), None);
    }

    // =========================================================================
    // RES-T03: Price matching is case sensitive
    // =========================================================================
    #[test]
    fn test_price_matching_is_case_sensitive() {
        assert_eq!(prices().tier_for_price_id("PRICE_1SOLOABC"), None);
    }

    // =========================================================================
    // RES-T04: Tier selectors from clients parse strictly
    // =========================================================================
    #[test]
    fn test_tier_selector_parsing_is_strict() {
        assert_eq!(SubscriptionTier::from_str("duo"), Some(SubscriptionTier::Duo));
        assert_eq!(SubscriptionTier::from_str("Duo"), None);
        assert_eq!(SubscriptionTier::from_str(" duo"), None);
        assert_eq!(SubscriptionTier::from_str("duo "), None);
    }
}

#[cfg(test)]
mod refund_amount_tests {
    use crate::refund::is_full_refund;

    // =========================================================================
    // RES-RF01: Refund equal to the charge amount is full
    // =========================================================================
    #[test]
    fn test_exact_amount_is_full_refund() {
        assert!(is_full_refund(999, 999));
    }

    // =========================================================================
    // RES-RF02: One cent short is partial
    // =========================================================================
    #[test]
    fn test_one_cent_short_is_partial() {
        assert!(!is_full_refund(998, 999));
    }

    // =========================================================================
    // RES-RF03: Cumulative over-refund still counts as full
    // =========================================================================
    #[test]
    fn test_over_refund_is_full() {
        // amount_refunded on the charge is cumulative across refunds and can
        // exceed a single charge's amount after disputes/adjustments
        assert!(is_full_refund(1200, 999));
    }

    // =========================================================================
    // RES-RF04: Zero-amount charge refunded by zero is full
    // =========================================================================
    #[test]
    fn test_zero_amount_charge() {
        assert!(is_full_refund(0, 0));
    }

    // =========================================================================
    // RES-RF05: Nothing refunded on a real charge is partial
    // =========================================================================
    #[test]
    fn test_zero_refunded_is_partial() {
        assert!(!is_full_refund(0, 999));
    }
}

#[cfg(test)]
mod merge_patch_tests {
    use crate::subscriptions::{FieldUpdate, SubscriptionPatch};
    use resonate_shared::{SubscriptionStatus, SubscriptionTier};
    use time::OffsetDateTime;

    // =========================================================================
    // RES-P01: Past-due patch touches only the status
    // =========================================================================
    #[test]
    fn test_past_due_patch_shape() {
        let patch = SubscriptionPatch {
            status: Some(SubscriptionStatus::PastDue),
            ..Default::default()
        };

        assert!(patch.tier.is_none());
        assert_eq!(patch.period_end, FieldUpdate::Keep);
        assert_eq!(patch.cancel_at, FieldUpdate::Keep);
        assert!(patch.downgrade_reason.is_none());
    }

    // =========================================================================
    // RES-P02: Downgrade patch clears period end and cancel_at
    // =========================================================================
    #[test]
    fn test_downgrade_patch_shape() {
        let patch = SubscriptionPatch {
            tier: Some(SubscriptionTier::Free),
            status: Some(SubscriptionStatus::Canceled),
            period_end: FieldUpdate::Clear,
            cancel_at: FieldUpdate::Clear,
            downgrade_reason: Some("subscription_deleted".to_string()),
            ..Default::default()
        };

        assert_eq!(patch.period_end, FieldUpdate::Clear);
        assert_eq!(patch.cancel_at, FieldUpdate::Clear);
        assert_eq!(patch.tier, Some(SubscriptionTier::Free));
    }

    // =========================================================================
    // RES-P03: Set and Clear are distinct from Keep for nullable fields
    // =========================================================================
    #[test]
    fn test_three_state_field_update() {
        let ts = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();

        assert_ne!(FieldUpdate::Set(ts), FieldUpdate::Keep);
        assert_ne!(FieldUpdate::<OffsetDateTime>::Clear, FieldUpdate::Keep);
        assert_ne!(FieldUpdate::Set(ts), FieldUpdate::Clear);
    }

    // =========================================================================
    // RES-P04: Patches are value types; re-applying is the same write
    // =========================================================================
    #[test]
    fn test_patch_clone_is_identical() {
        let ts = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let patch = SubscriptionPatch {
            tier: Some(SubscriptionTier::Duo),
            status: Some(SubscriptionStatus::Active),
            period_end: FieldUpdate::Set(ts),
            stripe_subscription_id: Some("sub_123".to_string()),
            ..Default::default()
        };

        let again = patch.clone();
        assert_eq!(patch.period_end, again.period_end);
        assert_eq!(patch.tier, again.tier);
        assert_eq!(patch.stripe_subscription_id, again.stripe_subscription_id);
    }
}
