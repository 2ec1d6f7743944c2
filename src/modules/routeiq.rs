//! Straight-line route planning between coordinates.
//!
//! Distances are great-circle (haversine) per leg and durations come from a
//! fixed average speed per travel profile. No external routing service is
//! consulted, so the module needs neither the database nor authentication.

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::Module;
use crate::api::error::{ApiError, ApiJson};
use crate::api::validation::validate_coordinate;
use crate::AppState;

/// Mean Earth radius in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

pub const DEFAULT_PROFILE: &str = "driving-car";

pub struct RouteIq;

impl Module for RouteIq {
    fn name(&self) -> &'static str {
        "nexora-routeiq"
    }

    fn description(&self) -> &'static str {
        "Route planning with distance and travel time estimates"
    }

    fn icon(&self) -> &'static str {
        "🗺️"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &["/api/routeiq/plan", "/api/routeiq/health"]
    }

    fn uses_database(&self) -> bool {
        false
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/api/routeiq/plan", post(plan))
            .route("/api/routeiq/health", get(health))
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RouteError {
    #[error("need at least origin and destination")]
    TooFewPoints,
    #[error("{0}")]
    InvalidCoordinate(String),
}

impl From<RouteError> for ApiError {
    fn from(err: RouteError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

/// Average speed in km/h; unknown profiles travel at driving speed
pub fn speed_kmh(profile: &str) -> f64 {
    match profile {
        "cycling-regular" => 18.0,
        "foot-walking" => 5.0,
        _ => 60.0,
    }
}

/// Great-circle distance in km between two `[lat, lon]` points in degrees
pub fn haversine(a: [f64; 2], b: [f64; 2]) -> f64 {
    let (lat1, lon1) = (a[0].to_radians(), a[1].to_radians());
    let (lat2, lon2) = (b[0].to_radians(), b[1].to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// `[lon, lat]` order, as in GeoJSON
    pub coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Segment {
    pub from: [f64; 2],
    pub to: [f64; 2],
    pub distance_km: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Route {
    pub geometry: Geometry,
    pub distance_km: f64,
    pub duration_min: f64,
    pub profile: String,
    pub segments: Vec<Segment>,
}

/// Plan a route through `points` (`[lat, lon]`, at least two)
pub fn plan_route(points: &[[f64; 2]], profile: &str) -> Result<Route, RouteError> {
    if points.len() < 2 {
        return Err(RouteError::TooFewPoints);
    }

    let segments: Vec<Segment> = points
        .windows(2)
        .map(|pair| Segment {
            from: pair[0],
            to: pair[1],
            distance_km: haversine(pair[0], pair[1]),
        })
        .collect();
    let total_km: f64 = segments.iter().map(|s| s.distance_km).sum();
    let duration_min = total_km / speed_kmh(profile) * 60.0;

    Ok(Route {
        geometry: Geometry {
            kind: "LineString",
            coordinates: points.iter().map(|[lat, lon]| [*lon, *lat]).collect(),
        },
        distance_km: round_to(total_km, 3),
        duration_min: round_to(duration_min, 1),
        profile: profile.to_string(),
        segments,
    })
}

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub origin: Option<Vec<f64>>,
    pub destination: Option<Vec<f64>>,
    #[serde(default)]
    pub waypoints: Option<Vec<Vec<f64>>>,
    pub profile: Option<String>,
}

fn to_point(raw: &[f64]) -> Result<[f64; 2], RouteError> {
    validate_coordinate(raw).map_err(RouteError::InvalidCoordinate)?;
    Ok([raw[0], raw[1]])
}

async fn plan(ApiJson(request): ApiJson<PlanRequest>) -> Result<Json<Value>, ApiError> {
    let (Some(origin), Some(destination)) = (
        request.origin.filter(|p| !p.is_empty()),
        request.destination.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("origin and destination required"));
    };

    let mut points = vec![to_point(&origin)?];
    for waypoint in request.waypoints.unwrap_or_default() {
        points.push(to_point(&waypoint)?);
    }
    points.push(to_point(&destination)?);

    let profile = request
        .profile
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_PROFILE.to_string());
    let route = plan_route(&points, &profile)?;

    tracing::debug!(
        legs = route.segments.len(),
        distance_km = route.distance_km,
        profile = %route.profile,
        "Planned route"
    );
    Ok(Json(json!({ "route": route })))
}

async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({"status": "ok", "service": "nexora-routeiq"})),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{send, TestApp};
    use axum::http::Method;

    const LONDON: [f64; 2] = [51.5074, -0.1278];
    const PARIS: [f64; 2] = [48.8566, 2.3522];

    #[test]
    fn test_haversine_known_distances() {
        let d = haversine(LONDON, PARIS);
        assert!((d - 343.5).abs() < 0.5, "London-Paris was {}", d);
        assert_eq!(haversine(PARIS, PARIS), 0.0);
        assert!((haversine(PARIS, LONDON) - d).abs() < 1e-9);
    }

    #[test]
    fn test_plan_route_profiles() {
        let driving = plan_route(&[LONDON, PARIS], "driving-car").unwrap();
        let walking = plan_route(&[LONDON, PARIS], "foot-walking").unwrap();
        let unknown = plan_route(&[LONDON, PARIS], "hovercraft").unwrap();

        assert_eq!(driving.distance_km, walking.distance_km);
        assert!((walking.duration_min / driving.duration_min - 12.0).abs() < 0.01);
        assert_eq!(unknown.duration_min, driving.duration_min);
        assert_eq!(unknown.profile, "hovercraft");
        assert_eq!(driving.geometry.coordinates[0], [LONDON[1], LONDON[0]]);

        assert_eq!(plan_route(&[LONDON], "driving-car"), Err(RouteError::TooFewPoints));
    }

    #[tokio::test]
    async fn test_plan_endpoint() {
        let app = TestApp::new().await;
        let uri = "/module/nexora-routeiq/api/routeiq/plan";

        let res = send(
            &app.router,
            Method::POST,
            uri,
            None,
            Some(json!({"origin": LONDON, "waypoints": [[50.0, 1.0]], "destination": PARIS})),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        let route = &res.body["route"];
        assert_eq!(route["geometry"]["type"], "LineString");
        assert_eq!(route["geometry"]["coordinates"].as_array().unwrap().len(), 3);
        assert_eq!(route["segments"].as_array().unwrap().len(), 2);
        assert_eq!(route["profile"], "driving-car");

        let res = send(&app.router, Method::POST, uri, None, Some(json!({"origin": LONDON}))).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "origin and destination required");

        let res = send(
            &app.router,
            Method::POST,
            uri,
            None,
            Some(json!({"origin": [95.0, 0.0], "destination": PARIS})),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);

        let res = send(&app.router, Method::GET, "/module/nexora-routeiq/api/routeiq/health", None, None).await;
        assert_eq!(res.body, json!({"status": "ok", "service": "nexora-routeiq"}));
    }
}
