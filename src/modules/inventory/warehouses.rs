use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::auth::{AuthUser, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath};
use crate::api::validation::non_empty;
use crate::db::{CreateWarehouseRequest, UpdateWarehouseRequest, Warehouse};
use crate::AppState;

const DEFAULT_CAPACITY: i64 = 1000;

async fn find_warehouse(state: &AppState, id: i64) -> Result<Warehouse, ApiError> {
    sqlx::query_as("SELECT * FROM warehouses WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Warehouse not found"))
}

fn check_capacity(capacity: Option<i64>) -> Result<(), ApiError> {
    match capacity {
        Some(c) if c < 0 => Err(ApiError::validation_field("capacity", "capacity must not be negative")),
        _ => Ok(()),
    }
}

pub async fn list_warehouses(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<Warehouse>>, ApiError> {
    user.require(READ_ROLES)?;
    let warehouses = sqlx::query_as("SELECT * FROM warehouses ORDER BY id")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(warehouses))
}

pub async fn get_warehouse(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Warehouse>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_warehouse(&state, id).await?))
}

pub async fn create_warehouse(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateWarehouseRequest>,
) -> Result<(StatusCode, Json<Warehouse>), ApiError> {
    user.require(WRITE_ROLES)?;

    let (Some(name), Some(location)) = (non_empty(&request.name), non_empty(&request.location)) else {
        return Err(ApiError::bad_request("Name and location are required"));
    };
    check_capacity(request.capacity)?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM warehouses WHERE name = ?")
        .bind(name)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_some() {
        return Err(ApiError::conflict("Warehouse name already exists"));
    }

    let warehouse: Warehouse = sqlx::query_as(
        r#"INSERT INTO warehouses (name, location, capacity, manager_id)
           VALUES (?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(name)
    .bind(location)
    .bind(request.capacity.unwrap_or(DEFAULT_CAPACITY))
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(warehouse_id = warehouse.id, name = %warehouse.name, "Created warehouse");
    Ok((StatusCode::CREATED, Json(warehouse)))
}

pub async fn update_warehouse(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateWarehouseRequest>,
) -> Result<Json<Warehouse>, ApiError> {
    user.require(WRITE_ROLES)?;
    check_capacity(request.capacity)?;

    let existing = find_warehouse(&state, id).await?;

    let warehouse: Warehouse = sqlx::query_as(
        r#"UPDATE warehouses SET name = ?, location = ?, capacity = ?, is_active = ?
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(non_empty(&request.name).unwrap_or(&existing.name))
    .bind(non_empty(&request.location).unwrap_or(&existing.location))
    .bind(request.capacity.unwrap_or(existing.capacity))
    .bind(request.is_active.unwrap_or(existing.is_active))
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(warehouse))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::BASE;
    use crate::db::Role;
    use crate::testing::{send, TestApp};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_warehouse_lifecycle() {
        let app = TestApp::new().await;
        let (manager_id, token) = app.user("mgr", Role::Manager).await;
        let uri = format!("{}/api/warehouses", BASE);

        let res = send(&app.router, Method::POST, &uri, Some(&token), Some(json!({"name": "North"}))).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "Name and location are required");

        let res = send(
            &app.router,
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({"name": "North", "location": "Leeds"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["capacity"], 1000);
        assert_eq!(res.body["manager_id"], manager_id);
        assert_eq!(res.body["is_active"], true);
        let id = res.body["id"].as_i64().unwrap();

        let res = send(
            &app.router,
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({"name": "North", "location": "York"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CONFLICT);

        let res = send(
            &app.router,
            Method::PUT,
            &format!("{}/{}", uri, id),
            Some(&token),
            Some(json!({"capacity": 250, "is_active": false})),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["capacity"], 250);
        assert_eq!(res.body["location"], "Leeds");
        assert_eq!(res.body["is_active"], false);

        let res = send(&app.router, Method::PUT, &format!("{}/999", uri), Some(&token), Some(json!({}))).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.body["error"], "Warehouse not found");

        let res = send(&app.router, Method::GET, &uri, Some(&token), None).await;
        assert_eq!(res.body.as_array().unwrap().len(), 1);
    }
}
