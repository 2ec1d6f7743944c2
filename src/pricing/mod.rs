//! Subscription tiers and the free-period policy.
//!
//! Until `free_until` every feature is open to everyone. Afterwards premium
//! features need an active subscription on a tier that covers them.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

use crate::api::error::{ApiError, ErrorDetails};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Professional,
    Enterprise,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Professional, Tier::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Professional => "professional",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Monthly price in USD
    pub fn price(&self) -> u32 {
        match self {
            Tier::Free => 0,
            Tier::Professional => 99,
            Tier::Enterprise => 499,
        }
    }

    pub fn parse(s: &str) -> Option<Tier> {
        match s.to_lowercase().as_str() {
            "free" => Some(Tier::Free),
            "professional" => Some(Tier::Professional),
            "enterprise" => Some(Tier::Enterprise),
            _ => None,
        }
    }

    /// Every premium feature this tier covers, including lower tiers' ones
    pub fn features(&self) -> Vec<&'static str> {
        PREMIUM_FEATURES
            .iter()
            .filter(|(_, tier)| tier <= self)
            .map(|(name, _)| *name)
            .collect()
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature name and the lowest tier that includes it
pub const PREMIUM_FEATURES: &[(&str, Tier)] = &[
    ("advanced_reports", Tier::Professional),
    ("api_access", Tier::Professional),
    ("webhook_integrations", Tier::Professional),
    ("bulk_operations", Tier::Professional),
    ("advanced_payroll", Tier::Professional),
    ("multi_branch", Tier::Professional),
    ("team_collaboration", Tier::Professional),
    ("custom_branding", Tier::Enterprise),
];

pub fn required_tier(feature: &str) -> Option<Tier> {
    PREMIUM_FEATURES
        .iter()
        .find(|(name, _)| *name == feature)
        .map(|(_, tier)| *tier)
}

/// Why a premium feature was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingDenied {
    #[error("Premium feature requires active subscription")]
    InactiveSubscription,
    #[error("Feature '{feature}' requires {required} subscription")]
    TierTooLow {
        feature: String,
        required: Tier,
        current: Option<Tier>,
    },
}

impl From<PricingDenied> for ApiError {
    fn from(denied: PricingDenied) -> Self {
        let message = denied.to_string();
        let mut details = HashMap::new();
        if let PricingDenied::TierTooLow {
            feature,
            required,
            current,
        } = &denied
        {
            details.insert("feature".to_string(), json!(feature));
            details.insert("required_tier".to_string(), json!(required.as_str()));
            if let Some(current) = current {
                details.insert("current_tier".to_string(), json!(current.as_str()));
            }
        }

        let err = ApiError::payment_required(message);
        if details.is_empty() {
            err
        } else {
            err.with_details(ErrorDetails::Generic(details))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PricingStatus {
    pub free_tier_active: bool,
    pub free_until: String,
    pub pricing_active_from: String,
    pub days_remaining: i64,
    pub current_date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Banner {
    pub visible: bool,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
    pub subtext: String,
    pub action: &'static str,
    pub action_url: &'static str,
    pub dismissible: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PricingPolicy {
    pub free_until: DateTime<Utc>,
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl PricingPolicy {
    pub fn new(free_until: DateTime<Utc>) -> Self {
        Self { free_until }
    }

    pub fn is_free_period(&self, now: DateTime<Utc>) -> bool {
        now <= self.free_until
    }

    pub fn active_from(&self) -> DateTime<Utc> {
        self.free_until + Duration::seconds(1)
    }

    /// Whole days left in the free period, 0 once it is over
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        if self.is_free_period(now) {
            (self.free_until - now).num_days()
        } else {
            0
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> PricingStatus {
        PricingStatus {
            free_tier_active: self.is_free_period(now),
            free_until: rfc3339(self.free_until),
            pricing_active_from: rfc3339(self.active_from()),
            days_remaining: self.days_remaining(now),
            current_date: rfc3339(now),
        }
    }

    pub fn banner(&self, now: DateTime<Utc>) -> Banner {
        if self.is_free_period(now) {
            Banner {
                visible: true,
                kind: "success",
                message: format!(
                    "Free until {}. Pricing activates from {}.",
                    self.free_until.format("%B %-d, %Y"),
                    self.active_from().format("%B %-d, %Y"),
                ),
                subtext: format!("{} days remaining in free tier.", self.days_remaining(now)),
                action: "Learn more about our pricing plans",
                action_url: "/pricing",
                dismissible: false,
            }
        } else {
            Banner {
                visible: true,
                kind: "info",
                message: "Pricing is now active. Some features require an active subscription."
                    .to_string(),
                subtext: "Upgrade to Professional or Enterprise for unlimited access.".to_string(),
                action: "View subscription plans",
                action_url: "/subscription",
                dismissible: true,
            }
        }
    }

    /// Decide whether an account may use `feature` at `now`.
    ///
    /// Without a feature name only the subscription itself is checked.
    pub fn check(
        &self,
        tier: &str,
        subscription_active: bool,
        feature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PricingDenied> {
        if self.is_free_period(now) {
            return Ok(());
        }
        if !subscription_active {
            return Err(PricingDenied::InactiveSubscription);
        }

        let Some(feature) = feature else {
            return Ok(());
        };
        let Some(required) = required_tier(feature) else {
            return Ok(());
        };

        let current = Tier::parse(tier);
        match current {
            Some(current) if current >= required => Ok(()),
            _ => Err(PricingDenied::TierTooLow {
                feature: feature.to_string(),
                required,
                // Only reported when the caller already pays for something
                current: current.filter(|t| *t != Tier::Free),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn policy() -> PricingPolicy {
        PricingPolicy::new(crate::config::default_free_until())
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_status_during_free_period() {
        let status = policy().status(at(2026, 3, 1, 12));
        assert!(status.free_tier_active);
        assert_eq!(status.free_until, "2026-03-31T23:59:59Z");
        assert_eq!(status.pricing_active_from, "2026-04-01T00:00:00Z");
        assert_eq!(status.days_remaining, 30);
        assert_eq!(status.current_date, "2026-03-01T12:00:00Z");
    }

    #[test]
    fn test_status_after_free_period() {
        let status = policy().status(at(2026, 4, 2, 0));
        assert!(!status.free_tier_active);
        assert_eq!(status.days_remaining, 0);
    }

    #[test]
    fn test_last_day_has_zero_whole_days() {
        let p = policy();
        let now = at(2026, 3, 31, 8);
        assert!(p.is_free_period(now));
        assert_eq!(p.days_remaining(now), 0);
    }

    #[test]
    fn test_banner() {
        let p = policy();
        let banner = p.banner(at(2026, 3, 21, 23));
        assert_eq!(banner.kind, "success");
        assert_eq!(
            banner.message,
            "Free until March 31, 2026. Pricing activates from April 1, 2026."
        );
        assert_eq!(banner.subtext, "10 days remaining in free tier.");
        assert!(!banner.dismissible);

        let banner = p.banner(at(2026, 6, 1, 0));
        assert_eq!(banner.kind, "info");
        assert_eq!(banner.action_url, "/subscription");
        assert!(banner.dismissible);
    }

    #[test]
    fn test_check_allows_everything_while_free() {
        let p = policy();
        let now = at(2026, 1, 1, 0);
        assert!(p.check("free", false, Some("custom_branding"), now).is_ok());
    }

    #[test]
    fn test_check_after_free_period() {
        let p = policy();
        let now = at(2026, 5, 1, 0);

        assert_eq!(
            p.check("professional", false, Some("advanced_reports"), now),
            Err(PricingDenied::InactiveSubscription)
        );
        assert!(p.check("professional", true, Some("advanced_reports"), now).is_ok());
        assert!(p.check("free", true, None, now).is_ok());
        assert!(p.check("free", true, Some("not_premium"), now).is_ok());

        let denied = p.check("free", true, Some("api_access"), now).unwrap_err();
        assert_eq!(denied.to_string(), "Feature 'api_access' requires professional subscription");

        let denied = p
            .check("professional", true, Some("custom_branding"), now)
            .unwrap_err();
        assert_eq!(
            denied,
            PricingDenied::TierTooLow {
                feature: "custom_branding".to_string(),
                required: Tier::Enterprise,
                current: Some(Tier::Professional),
            }
        );
        assert!(p.check("enterprise", true, Some("custom_branding"), now).is_ok());
        assert!(p.check("gold", true, Some("api_access"), now).is_err());
    }

    #[test]
    fn test_denial_maps_to_payment_required() {
        let err: ApiError = PricingDenied::InactiveSubscription.into();
        assert_eq!(err.status(), axum::http::StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.message(), "Premium feature requires active subscription");
    }

    #[test]
    fn test_tier_features_are_cumulative() {
        assert!(Tier::Free.features().is_empty());
        assert_eq!(Tier::Professional.features().len(), 7);
        assert!(!Tier::Professional.features().contains(&"custom_branding"));
        assert_eq!(Tier::Enterprise.features().len(), PREMIUM_FEATURES.len());
        assert!(Tier::Enterprise.features().contains(&"advanced_reports"));
        assert_eq!(Tier::Enterprise.price(), 499);
    }

    #[test]
    fn test_listed_features_pass_the_check() {
        let p = policy();
        let now = at(2026, 5, 1, 0);
        for tier in Tier::ALL {
            for feature in tier.features() {
                assert!(p.check(tier.as_str(), true, Some(feature), now).is_ok(), "{tier} {feature}");
            }
        }
    }
}
