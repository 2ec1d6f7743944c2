use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{AuthConfig, BootstrapAdmin};
use crate::db::{AuthResponse, DbPool, LoginRequest, RegisterRequest, Role, User, UserResponse};
use crate::AppState;

use super::error::{ApiError, ApiJson, ValidationErrorBuilder};
use super::validation::{non_empty, validate_email, validate_username};

/// Any authenticated account
pub const READ_ROLES: &[Role] = &[Role::Admin, Role::Manager, Role::User, Role::Demo];
/// Create and edit records
pub const WRITE_ROLES: &[Role] = &[Role::Admin, Role::Manager];
/// Destructive operations
pub const DELETE_ROLES: &[Role] = &[Role::Admin];

const INVALID_TOKEN: &str = "Missing or invalid token";

/// JWT claims carried by every access token
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Sign an access token for `user`
pub fn issue_token(config: &AuthConfig, user: &User) -> Result<String, ApiError> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user.id.to_string(),
        role: user.role.clone(),
        iat: now,
        exp: now + config.token_ttl_hours * 3600,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to sign access token");
        ApiError::internal("Failed to issue access token")
    })
}

/// Verify signature and expiry, returning the claims
pub fn decode_token(config: &AuthConfig, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

/// Extract the bearer token from the Authorization header
fn extract_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The caller, resolved from a bearer token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub subscription_tier: String,
    pub subscription_active: bool,
}

impl AuthUser {
    /// Reject with 403 unless the caller's role is in `allowed`
    pub fn require(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            tracing::debug!(user_id = self.id, role = %self.role, "Role check failed");
            Err(ApiError::forbidden("Insufficient permissions"))
        }
    }
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            role: user.role(),
            id: user.id,
            username: user.username,
            subscription_tier: user.subscription_tier,
            subscription_active: user.subscription_active,
        }
    }
}

/// Load the current user behind a token. The account is re-read on every
/// request so deleted or deactivated users lose access immediately.
pub async fn get_current_user(
    pool: &DbPool,
    config: &AuthConfig,
    token: &str,
) -> Result<User, ApiError> {
    let claims = decode_token(config, token).ok_or_else(|| ApiError::unauthorized(INVALID_TOKEN))?;
    let user_id: i64 = claims
        .sub
        .parse()
        .map_err(|_| ApiError::unauthorized(INVALID_TOKEN))?;

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    match user {
        Some(user) if user.is_active => Ok(user),
        _ => Err(ApiError::unauthorized(INVALID_TOKEN)),
    }
}

/// Extractor for getting the current authenticated user from a request
#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token =
            extract_token(&parts.headers).ok_or_else(|| ApiError::unauthorized(INVALID_TOKEN))?;
        let user = get_current_user(&state.db, &state.config.auth, token).await?;
        Ok(AuthUser::from(user))
    }
}

/// Routes mounted at `/api/auth` on the home app and on every module
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let (Some(username), Some(email), Some(password)) = (
        non_empty(&request.username),
        non_empty(&request.email),
        request.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };

    let mut errors = ValidationErrorBuilder::new();
    errors.check("username", validate_username(username));
    errors.check("email", validate_email(email));
    errors.finish()?;

    let requested_role = match non_empty(&request.role) {
        Some(role) if state.config.auth.allow_self_assigned_roles => {
            let role: Role = role.parse().map_err(ApiError::bad_request)?;
            if !role.is_self_assignable() {
                return Err(ApiError::bad_request(format!("Role '{}' cannot be requested", role)));
            }
            role
        }
        _ => Role::User,
    };

    let taken: Option<(String, String)> =
        sqlx::query_as("SELECT username, email FROM users WHERE username = ? OR email = ? LIMIT 1")
            .bind(username)
            .bind(email)
            .fetch_optional(&state.db)
            .await?;
    if let Some((existing_username, _)) = taken {
        return Err(if existing_username == username {
            ApiError::conflict("Username already exists")
        } else {
            ApiError::conflict("Email already exists")
        });
    }

    let password_hash = hash_password(password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;

    // The first account on a fresh install becomes the administrator
    let user: User = sqlx::query_as(
        r#"INSERT INTO users (username, email, password_hash, role)
           VALUES (?, ?, ?, CASE WHEN (SELECT COUNT(*) FROM users) = 0 THEN 'admin' ELSE ? END)
           RETURNING *"#,
    )
    .bind(username)
    .bind(email)
    .bind(&password_hash)
    .bind(requested_role.as_str())
    .fetch_one(&state.db)
    .await?;

    tracing::info!(user_id = user.id, username = %user.username, role = %user.role, "Registered user");

    let access_token = issue_token(&state.config.auth, &user)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            access_token,
        }),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (Some(username), Some(password)) = (
        non_empty(&request.username),
        request.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Missing credentials"));
    };

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = ? OR email = ?")
        .bind(username)
        .bind(username)
        .fetch_optional(&state.db)
        .await?;

    let user = match user {
        Some(user) if user.is_active && verify_password(password, &user.password_hash) => user,
        _ => {
            tracing::warn!(username = %username, "Failed login attempt");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }
    };

    let access_token = issue_token(&state.config.auth, &user)?;
    Ok(Json(AuthResponse {
        id: user.id,
        username: user.username,
        email: user.email,
        role: user.role,
        access_token,
    }))
}

pub async fn me(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> Result<Json<UserResponse>, ApiError> {
    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(caller.id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(UserResponse::from(user)))
}

/// Create the configured bootstrap administrator if it does not exist yet
pub async fn ensure_admin_user(db: &DbPool, admin: Option<&BootstrapAdmin>) -> anyhow::Result<()> {
    let Some(admin) = admin else {
        return Ok(());
    };

    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = ? OR email = ?")
        .bind(&admin.username)
        .bind(&admin.email)
        .fetch_optional(db)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let password_hash = hash_password(&admin.password)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    sqlx::query("INSERT INTO users (username, email, password_hash, role) VALUES (?, ?, ?, 'admin')")
        .bind(&admin.username)
        .bind(&admin.email)
        .bind(&password_hash)
        .execute(db)
        .await?;

    tracing::info!("Created admin user: {}", admin.username);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{send, TestApp};
    use axum::http::Method;
    use serde_json::json;

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("Demo1234").unwrap();
        assert!(verify_password("Demo1234", &hash));
        assert!(!verify_password("demo1234", &hash));
        assert!(!verify_password("Demo1234", "not-a-hash"));
    }

    #[test]
    fn test_token_rejected_with_wrong_secret() {
        let config = AuthConfig {
            jwt_secret: "one".to_string(),
            ..AuthConfig::default()
        };
        let user = User {
            id: 7,
            username: "u".to_string(),
            email: "u@example.com".to_string(),
            password_hash: String::new(),
            role: "manager".to_string(),
            is_active: true,
            subscription_tier: "free".to_string(),
            subscription_active: false,
            created_at: String::new(),
        };
        let token = issue_token(&config, &user).unwrap();

        let claims = decode_token(&config, &token).unwrap();
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.role, "manager");
        assert_eq!(claims.exp - claims.iat, 24 * 3600);

        let other = AuthConfig {
            jwt_secret: "two".to_string(),
            ..AuthConfig::default()
        };
        assert!(decode_token(&other, &token).is_none());
    }

    #[test]
    fn test_require_roles() {
        let user = AuthUser {
            id: 1,
            username: "m".to_string(),
            role: Role::Manager,
            subscription_tier: "free".to_string(),
            subscription_active: false,
        };
        assert!(user.require(WRITE_ROLES).is_ok());
        assert!(user.require(READ_ROLES).is_ok());
        let err = user.require(DELETE_ROLES).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.message(), "Insufficient permissions");
    }

    #[tokio::test]
    async fn test_register_login_me_round_trip() {
        let app = TestApp::new().await;

        let res = send(
            &app.router,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"username": "alice", "email": "alice@example.com", "password": "s3cret-pw", "role": "manager"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        // First account is always the administrator
        assert_eq!(res.body["role"], "admin");
        assert!(res.body["access_token"].as_str().unwrap().len() > 20);

        let res = send(
            &app.router,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"username": "bob", "email": "bob@example.com", "password": "pw", "role": "admin"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["role"], "user");

        // Login by email
        let res = send(
            &app.router,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"username": "bob@example.com", "password": "pw"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        let token = res.body["access_token"].as_str().unwrap().to_string();

        let res = send(&app.router, Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["username"], "bob");
        assert_eq!(res.body["subscription_tier"], "free");
        assert!(res.body.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_register_errors() {
        let app = TestApp::new().await;
        app.user("taken", Role::User).await;

        let res = send(
            &app.router,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"username": "x", "password": "pw"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "Missing required fields");

        let res = send(
            &app.router,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"username": "taken", "email": "new@example.com", "password": "pw"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CONFLICT);
        assert_eq!(res.body["error"], "Username already exists");

        let res = send(
            &app.router,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"username": "fresh", "email": "taken@example.com", "password": "pw"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CONFLICT);
        assert_eq!(res.body["error"], "Email already exists");
    }

    #[tokio::test]
    async fn test_self_assigned_roles_when_enabled() {
        let mut config = crate::testing::test_config();
        config.auth.allow_self_assigned_roles = true;
        let app = TestApp::with_config(config).await;
        app.user("first", Role::Admin).await;

        let res = send(
            &app.router,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"username": "mgr", "email": "mgr@example.com", "password": "pw", "role": "manager"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["role"], "manager");

        let res = send(
            &app.router,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"username": "x", "email": "x@example.com", "password": "pw", "role": "overlord"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_failures() {
        let app = TestApp::new().await;
        app.user("carol", Role::User).await;

        let res = send(
            &app.router,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"username": "carol"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "Missing credentials");

        let res = send(
            &app.router,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"username": "carol", "password": "wrong"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["error"], "Invalid credentials");
    }

    #[tokio::test]
    async fn test_missing_or_bad_token() {
        let app = TestApp::new().await;

        let res = send(&app.router, Method::GET, "/api/auth/me", None, None).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["error"], "Missing or invalid token");

        let res = send(&app.router, Method::GET, "/api/auth/me", Some("garbage"), None).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_deactivated_user_loses_access() {
        let app = TestApp::new().await;
        let (id, token) = app.user("dave", Role::Manager).await;

        sqlx::query("UPDATE users SET is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(&app.state.db)
            .await
            .unwrap();

        let res = send(&app.router, Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ensure_admin_user_is_idempotent() {
        let db = crate::db::init_memory().await.unwrap();
        let admin = BootstrapAdmin {
            username: "root".to_string(),
            email: "root@example.com".to_string(),
            password: "changeme".to_string(),
        };
        ensure_admin_user(&db, Some(&admin)).await.unwrap();
        ensure_admin_user(&db, Some(&admin)).await.unwrap();
        ensure_admin_user(&db, None).await.unwrap();

        let rows: Vec<(String,)> = sqlx::query_as("SELECT role FROM users")
            .fetch_all(&db)
            .await
            .unwrap();
        assert_eq!(rows, vec![("admin".to_string(),)]);
    }
}
