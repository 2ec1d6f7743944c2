//! Pricing endpoints, response headers and the premium-feature guard.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
    routing::{get, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{Role, User, UserResponse};
use crate::pricing::{Banner, PricingPolicy, PricingStatus, Tier};
use crate::AppState;

use super::auth::AuthUser;
use super::error::{ApiError, ApiJson, ApiPath};

#[derive(Debug, Serialize)]
pub struct TierInfo {
    pub name: &'static str,
    pub price: u32,
    pub features: Vec<&'static str>,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(status))
        .route("/banner", get(banner))
        .route("/tiers", get(tiers))
        .route("/subscriptions/:user_id", put(update_subscription))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub tier: Option<String>,
    pub active: Option<bool>,
}

fn policy(state: &AppState) -> PricingPolicy {
    PricingPolicy::new(state.config.pricing.free_until)
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<PricingStatus> {
    Json(policy(&state).status(Utc::now()))
}

pub async fn banner(State(state): State<Arc<AppState>>) -> Json<Banner> {
    Json(policy(&state).banner(Utc::now()))
}

pub async fn tiers() -> Json<Vec<TierInfo>> {
    Json(
        Tier::ALL
            .iter()
            .map(|tier| TierInfo {
                name: tier.as_str(),
                price: tier.price(),
                features: tier.features(),
            })
            .collect(),
    )
}

/// Set an account's subscription tier and/or active flag (admin only)
pub async fn update_subscription(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(user_id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateSubscriptionRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    user.require(&[Role::Admin])?;

    let tier = match request.tier.as_deref() {
        Some(raw) => Some(Tier::parse(raw).ok_or_else(|| {
            ApiError::validation_field("tier", "tier must be one of free, professional, enterprise")
        })?),
        None => None,
    };

    let updated: Option<User> = sqlx::query_as(
        r#"UPDATE users
           SET subscription_tier = COALESCE(?, subscription_tier),
               subscription_active = COALESCE(?, subscription_active)
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(tier.map(|t| t.as_str()))
    .bind(request.active)
    .bind(user_id)
    .fetch_optional(&state.db)
    .await?;
    let updated = updated.ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::info!(
        user_id,
        tier = %updated.subscription_tier,
        active = updated.subscription_active,
        changed_by = user.id,
        "Updated subscription"
    );
    Ok(Json(updated.into()))
}

/// Reject with 402 unless `user` may use `feature` right now
pub fn require_feature(state: &AppState, user: &AuthUser, feature: &str) -> Result<(), ApiError> {
    policy(state)
        .check(
            &user.subscription_tier,
            user.subscription_active,
            Some(feature),
            Utc::now(),
        )
        .map_err(|denied| {
            tracing::debug!(user_id = user.id, feature, "Premium feature refused");
            ApiError::from(denied)
        })
}

/// Attach `X-Pricing-*` headers to every response
pub async fn pricing_headers(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let status = policy(&state).status(Utc::now());
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    let mut set = |name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    };
    set("x-pricing-free-tier-active", status.free_tier_active.to_string());
    set("x-pricing-free-until", status.free_until);
    set("x-pricing-active-from", status.pricing_active_from);
    if status.days_remaining > 0 {
        set("x-pricing-days-remaining", status.days_remaining.to_string());
    }

    response
}

#[cfg(test)]
mod tests {
    use crate::db::Role;
    use crate::testing::{send, test_config, TestApp};
    use axum::http::{Method, StatusCode};
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_headers_on_every_response() {
        let app = TestApp::new().await;

        let res = send(&app.router, Method::GET, "/api/health", None, None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.headers["x-pricing-free-tier-active"], "true");
        assert_eq!(res.headers["x-pricing-free-until"], "2100-01-01T00:00:00Z");
        assert_eq!(res.headers["x-pricing-active-from"], "2100-01-01T00:00:01Z");
        assert!(res.headers.contains_key("x-pricing-days-remaining"));

        // Errors carry them too
        let res = send(&app.router, Method::GET, "/no/such/route", None, None).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert!(res.headers.contains_key("x-pricing-free-tier-active"));
    }

    #[tokio::test]
    async fn test_headers_after_free_period() {
        let mut config = test_config();
        config.pricing.free_until = chrono::Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let app = TestApp::with_config(config).await;

        let res = send(&app.router, Method::GET, "/api/pricing/status", None, None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.headers["x-pricing-free-tier-active"], "false");
        assert!(!res.headers.contains_key("x-pricing-days-remaining"));
        assert_eq!(res.body["free_tier_active"], false);
        assert_eq!(res.body["days_remaining"], 0);
    }

    #[tokio::test]
    async fn test_premium_feature_requires_subscription() {
        let mut config = test_config();
        config.pricing.free_until = chrono::Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let app = TestApp::with_config(config).await;
        let (id, token) = app.user("analyst", Role::User).await;
        let uri = "/module/nexora-inventory/api/analytics/summary";

        let res = send(&app.router, Method::GET, uri, Some(&token), None).await;
        assert_eq!(res.status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(res.body["error"], "Premium feature requires active subscription");

        sqlx::query("UPDATE users SET subscription_active = 1 WHERE id = ?")
            .bind(id)
            .execute(&app.state.db)
            .await
            .unwrap();
        let res = send(&app.router, Method::GET, uri, Some(&token), None).await;
        assert_eq!(res.status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(res.body["details"]["required_tier"], "professional");

        sqlx::query("UPDATE users SET subscription_tier = 'professional' WHERE id = ?")
            .bind(id)
            .execute(&app.state.db)
            .await
            .unwrap();
        let res = send(&app.router, Method::GET, uri, Some(&token), None).await;
        assert_eq!(res.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_grants_subscription() {
        let mut config = test_config();
        config.pricing.free_until = chrono::Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let app = TestApp::with_config(config).await;
        let (_, admin) = app.user("root", Role::Admin).await;
        let (_, manager) = app.user("mgr", Role::Manager).await;
        let (id, token) = app.user("analyst", Role::User).await;
        let uri = format!("/api/pricing/subscriptions/{}", id);
        let analytics = "/module/nexora-inventory/api/analytics/summary";

        let res = send(&app.router, Method::GET, analytics, Some(&token), None).await;
        assert_eq!(res.status, StatusCode::PAYMENT_REQUIRED);

        let body = serde_json::json!({"tier": "professional", "active": true});
        let res = send(&app.router, Method::PUT, &uri, Some(&manager), Some(body.clone())).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);

        let res = send(&app.router, Method::PUT, &uri, Some(&admin), Some(serde_json::json!({"tier": "gold"}))).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);

        let res = send(&app.router, Method::PUT, "/api/pricing/subscriptions/999", Some(&admin), Some(body.clone())).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);

        let res = send(&app.router, Method::PUT, &uri, Some(&admin), Some(body)).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["subscription_tier"], "professional");
        assert_eq!(res.body["subscription_active"], true);

        let res = send(&app.router, Method::GET, analytics, Some(&token), None).await;
        assert_eq!(res.status, StatusCode::OK);

        // Partial update keeps the tier
        let res = send(&app.router, Method::PUT, &uri, Some(&admin), Some(serde_json::json!({"active": false}))).await;
        assert_eq!(res.body["subscription_tier"], "professional");
        assert_eq!(res.body["subscription_active"], false);
    }

    #[tokio::test]
    async fn test_banner_and_tiers() {
        let app = TestApp::new().await;

        let res = send(&app.router, Method::GET, "/api/pricing/banner", None, None).await;
        assert_eq!(res.body["type"], "success");
        assert_eq!(res.body["action_url"], "/pricing");

        let res = send(&app.router, Method::GET, "/api/pricing/tiers", None, None).await;
        let tiers = res.body.as_array().unwrap();
        assert_eq!(tiers.len(), 3);
        assert_eq!(tiers[1]["name"], "professional");
        assert_eq!(tiers[1]["price"], 99);
        assert_eq!(tiers[0]["features"], serde_json::json!([]));
        assert_eq!(tiers[1]["features"].as_array().unwrap().len(), 7);
        let enterprise = tiers[2]["features"].as_array().unwrap();
        assert_eq!(enterprise.len(), 8);
        assert!(enterprise.contains(&serde_json::json!("custom_branding")));
        assert!(enterprise.contains(&serde_json::json!("advanced_reports")));
    }
}
