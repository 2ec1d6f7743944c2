//! Expense reports with categories and uploaded receipts.

use axum::{
    body::Body,
    extract::{
        multipart::{Field, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::{header, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use super::Module;
use crate::api::auth::{AuthUser, DELETE_ROLES, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery, ErrorCode};
use crate::api::validation::{is_allowed_attachment, non_empty, sanitize_filename};
use crate::db::{
    fetch_page, Attachment, AttachmentResponse, DbPool, ExpenseCategory, ExpenseCategoryRequest,
    ExpenseQuery, ExpenseReport, ExpenseRequest, ExpenseResponse, Filters, Page, PageWindow,
};
use crate::utils::{ensure_dir, format_utc, now_rfc3339, parse_datetime, round2};
use crate::AppState;

const DEFAULT_PER_PAGE: i64 = 10;

pub struct Expense;

impl Module for Expense {
    fn name(&self) -> &'static str {
        "nexora-expense"
    }

    fn description(&self) -> &'static str {
        "Expense reports, categories and receipt attachments"
    }

    fn icon(&self) -> &'static str {
        "💸"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &["/api/items", "/api/categories", "/api/expenses", "/api/attachments"]
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/api/categories", get(list_categories).post(create_category))
            .route(
                "/api/categories/:id",
                axum::routing::put(update_category).delete(delete_category),
            )
            .route("/api/expenses", get(list_expenses).post(create_expense))
            .route(
                "/api/expenses/:id",
                get(get_expense).put(update_expense).delete(delete_expense),
            )
            // The size limit is enforced while streaming, against the configured maximum
            .route(
                "/api/expenses/:id/upload",
                post(upload_attachment).layer(DefaultBodyLimit::disable()),
            )
            .route(
                "/api/attachments/:id",
                get(download_attachment).delete(delete_attachment),
            )
    }
}

// -------------------------------------------------------------------------
// Categories
// -------------------------------------------------------------------------

async fn list_categories(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<ExpenseCategory>>, ApiError> {
    user.require(READ_ROLES)?;
    let categories = sqlx::query_as("SELECT * FROM expense_categories ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(categories))
}

fn category_conflict(err: sqlx::Error) -> ApiError {
    let err = ApiError::from(err);
    if err.status() == StatusCode::CONFLICT {
        ApiError::conflict("Category already exists")
    } else {
        err
    }
}

async fn create_category(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<ExpenseCategoryRequest>,
) -> Result<(StatusCode, Json<ExpenseCategory>), ApiError> {
    user.require(WRITE_ROLES)?;
    let name = non_empty(&request.name)
        .ok_or_else(|| ApiError::bad_request("Category name is required"))?;

    let category: ExpenseCategory = sqlx::query_as(
        "INSERT INTO expense_categories (name, description) VALUES (?, ?) RETURNING *",
    )
    .bind(name)
    .bind(&request.description)
    .fetch_one(&state.db)
    .await
    .map_err(category_conflict)?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn update_category(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<ExpenseCategoryRequest>,
) -> Result<Json<ExpenseCategory>, ApiError> {
    user.require(WRITE_ROLES)?;

    let category: ExpenseCategory = sqlx::query_as(
        r#"UPDATE expense_categories
           SET name = COALESCE(?, name), description = COALESCE(?, description)
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(non_empty(&request.name))
    .bind(&request.description)
    .bind(id)
    .fetch_optional(&state.db)
    .await
    .map_err(category_conflict)?
    .ok_or_else(|| ApiError::not_found("Category not found"))?;
    Ok(Json(category))
}

async fn delete_category(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    let result = sqlx::query("DELETE FROM expense_categories WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Category not found"));
    }
    Ok(Json(json!({"message": "Category deleted"})))
}

// -------------------------------------------------------------------------
// Expenses
// -------------------------------------------------------------------------

async fn find_expense(db: &DbPool, id: i64) -> Result<ExpenseReport, ApiError> {
    sqlx::query_as("SELECT * FROM expense_reports WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Expense not found"))
}

async fn attachments_for(db: &DbPool, expense_id: i64) -> Result<Vec<Attachment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM expense_attachments WHERE expense_id = ? ORDER BY id")
        .bind(expense_id)
        .fetch_all(db)
        .await
}

async fn with_attachments(db: &DbPool, report: ExpenseReport) -> Result<ExpenseResponse, ApiError> {
    let attachments = attachments_for(db, report.id).await?;
    Ok(ExpenseResponse::new(report, attachments))
}

/// Normalize a client supplied date, rejecting anything unparseable
fn expense_date(raw: &Option<String>) -> Result<Option<String>, ApiError> {
    match non_empty(raw) {
        None => Ok(None),
        Some(value) => parse_datetime(value)
            .map(|d| Some(format_utc(d)))
            .ok_or_else(|| ApiError::validation_field("date", "invalid datetime format")),
    }
}

async fn list_expenses(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    ApiQuery(query): ApiQuery<ExpenseQuery>,
) -> Result<Json<Page<ExpenseResponse>>, ApiError> {
    let mut filters = Filters::new();
    filters
        .eq("status", query.status.as_deref())
        .eq("category_id", query.category_id);

    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);
    let page: Page<ExpenseReport> = fetch_page(
        &state.db,
        "expenses",
        "*",
        "expense_reports",
        &filters,
        "date DESC, id DESC",
        window,
    )
    .await?;

    let mut responses = Vec::with_capacity(page.items.len());
    for report in page.items {
        responses.push(with_attachments(&state.db, report).await?);
    }
    Ok(Json(Page::new(page.key, responses, page.total, page.window)))
}

async fn get_expense(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ExpenseResponse>, ApiError> {
    let report = find_expense(&state.db, id).await?;
    Ok(Json(with_attachments(&state.db, report).await?))
}

async fn create_expense(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<ExpenseRequest>,
) -> Result<(StatusCode, Json<ExpenseResponse>), ApiError> {
    let (Some(title), Some(amount)) = (non_empty(&request.title), request.amount) else {
        return Err(ApiError::bad_request("Title and amount are required"));
    };
    let date = expense_date(&request.date)?.unwrap_or_else(now_rfc3339);

    let report: ExpenseReport = sqlx::query_as(
        r#"INSERT INTO expense_reports (title, amount, date, description, status, category_id, created_by)
           VALUES (?, ?, ?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(title)
    .bind(round2(amount))
    .bind(&date)
    .bind(&request.description)
    .bind(non_empty(&request.status).unwrap_or("draft"))
    .bind(request.category_id)
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(expense_id = report.id, user = %user.username, "Created expense report");
    Ok((StatusCode::CREATED, Json(ExpenseResponse::new(report, Vec::new()))))
}

async fn update_expense(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<ExpenseRequest>,
) -> Result<Json<ExpenseResponse>, ApiError> {
    let existing = find_expense(&state.db, id).await?;
    let date = expense_date(&request.date)?;

    let report: ExpenseReport = sqlx::query_as(
        r#"UPDATE expense_reports
           SET title = ?, amount = ?, date = ?, description = ?, status = ?, category_id = ?, updated_at = ?
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(non_empty(&request.title).unwrap_or(&existing.title))
    .bind(request.amount.map(round2).unwrap_or(existing.amount))
    .bind(date.unwrap_or(existing.date))
    .bind(request.description.as_ref().or(existing.description.as_ref()))
    .bind(non_empty(&request.status).unwrap_or(&existing.status))
    .bind(request.category_id.or(existing.category_id))
    .bind(now_rfc3339())
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(with_attachments(&state.db, report).await?))
}

async fn remove_file(path: &str) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path, error = %e, "Failed to remove attachment file");
        }
    }
}

async fn delete_expense(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    find_expense(&state.db, id).await?;
    let attachments = attachments_for(&state.db, id).await?;

    sqlx::query("DELETE FROM expense_reports WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;

    for attachment in &attachments {
        remove_file(&attachment.filepath).await;
    }
    Ok(Json(json!({"message": "Expense deleted"})))
}

// -------------------------------------------------------------------------
// Attachments
// -------------------------------------------------------------------------

/// Read a multipart field into memory, failing once it grows past `limit`
async fn read_field(mut field: Field<'_>, limit: usize) -> Result<Vec<u8>, ApiError> {
    let mut data = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?
    {
        if data.len() + chunk.len() > limit {
            return Err(ApiError::new(
                ErrorCode::PayloadTooLarge,
                format!("File exceeds the {} byte upload limit", limit),
            ));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn upload_attachment(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<AttachmentResponse>), ApiError> {
    find_expense(&state.db, id).await?;
    let mut multipart = multipart.map_err(|_| ApiError::bad_request("No file provided"))?;

    let field = loop {
        match multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
        {
            Some(field) if field.name() == Some("file") => break field,
            Some(_) => continue,
            None => return Err(ApiError::bad_request("No file provided")),
        }
    };

    let original = field.file_name().unwrap_or_default().to_string();
    if original.is_empty() {
        return Err(ApiError::bad_request("No file selected"));
    }
    if !is_allowed_attachment(&original) {
        return Err(ApiError::bad_request("File type not allowed"));
    }
    let mimetype = field.content_type().map(str::to_string);
    let data = read_field(field, state.config.uploads.max_bytes).await?;

    let dir = state.config.upload_dir();
    ensure_dir(&dir).map_err(|e| {
        tracing::error!(error = %e, "Failed to prepare upload directory");
        ApiError::internal("Failed to store file")
    })?;
    let filename = format!("{}_{}", uuid::Uuid::new_v4(), sanitize_filename(&original));
    let path: PathBuf = dir.join(&filename);
    tokio::fs::write(&path, &data).await.map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Failed to write attachment");
        ApiError::internal("Failed to store file")
    })?;

    let filepath = path.to_string_lossy().to_string();
    let inserted = sqlx::query_as::<_, Attachment>(
        "INSERT INTO expense_attachments (filename, filepath, mimetype, expense_id) VALUES (?, ?, ?, ?) RETURNING *",
    )
    .bind(&filename)
    .bind(&filepath)
    .bind(&mimetype)
    .bind(id)
    .fetch_one(&state.db)
    .await;

    let attachment = match inserted {
        Ok(attachment) => attachment,
        Err(e) => {
            remove_file(&filepath).await;
            return Err(e.into());
        }
    };

    tracing::info!(expense_id = id, file = %filename, bytes = data.len(), "Stored attachment");
    Ok((StatusCode::CREATED, Json(attachment.into())))
}

async fn find_attachment(db: &DbPool, id: i64) -> Result<Attachment, ApiError> {
    sqlx::query_as("SELECT * FROM expense_attachments WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Attachment not found"))
}

async fn download_attachment(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Response, ApiError> {
    let attachment = find_attachment(&state.db, id).await?;

    let data = tokio::fs::read(&attachment.filepath).await.map_err(|e| {
        tracing::error!(error = %e, path = %attachment.filepath, "Failed to read attachment");
        ApiError::not_found("Attachment not found")
    })?;

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            attachment
                .mimetype
                .as_deref()
                .unwrap_or("application/octet-stream"),
        )
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", attachment.filename),
        )
        .header(header::CONTENT_LENGTH, data.len())
        .body(Body::from(data))
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build response");
            ApiError::internal("Failed to build response")
        })
}

async fn delete_attachment(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    let attachment = find_attachment(&state.db, id).await?;

    sqlx::query("DELETE FROM expense_attachments WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    remove_file(&attachment.filepath).await;

    Ok(Json(json!({"message": "Attachment deleted"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use crate::testing::{send, send_request, TestApp};
    use axum::http::{Method, Request};

    const BASE: &str = "/module/nexora-expense";

    fn upload_request(uri: &str, token: &str, filename: &str, contents: &str) -> Request<Body> {
        let body = format!(
            "--BOUNDARY\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
             Content-Type: application/pdf\r\n\r\n\
             {}\r\n\
             --BOUNDARY--\r\n",
            filename, contents
        );
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    async fn expense(app: &TestApp, token: &str, title: &str) -> i64 {
        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/api/expenses", BASE),
            Some(token),
            Some(json!({"title": title, "amount": "12.345"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        res.body["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_categories() {
        let app = TestApp::new().await;
        let (_, manager) = app.user("mgr", Role::Manager).await;
        let (_, staff) = app.user("staff", Role::User).await;
        let uri = format!("{}/api/categories", BASE);

        let res = send(&app.router, Method::POST, &uri, Some(&manager), Some(json!({"name": ""}))).await;
        assert_eq!(res.body["error"], "Category name is required");

        let res = send(&app.router, Method::POST, &uri, Some(&manager), Some(json!({"name": "Travel"}))).await;
        assert_eq!(res.status, StatusCode::CREATED);
        let id = res.body["id"].as_i64().unwrap();

        let res = send(&app.router, Method::POST, &uri, Some(&manager), Some(json!({"name": "Travel"}))).await;
        assert_eq!(res.status, StatusCode::CONFLICT);
        assert_eq!(res.body["error"], "Category already exists");

        let res = send(&app.router, Method::POST, &uri, Some(&staff), Some(json!({"name": "Meals"}))).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);

        let res = send(&app.router, Method::DELETE, &format!("{}/{}", uri, id), Some(&manager), None).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_expense_crud_and_paging() {
        let app = TestApp::new().await;
        let (user_id, token) = app.user("staff", Role::User).await;
        let uri = format!("{}/api/expenses", BASE);

        let res = send(&app.router, Method::POST, &uri, Some(&token), Some(json!({"title": "Taxi"}))).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "Title and amount are required");

        let id = expense(&app, &token, "Taxi").await;
        for n in 0..11 {
            expense(&app, &token, &format!("Lunch {}", n)).await;
        }

        let res = send(&app.router, Method::GET, &format!("{}/{}", uri, id), Some(&token), None).await;
        assert_eq!(res.body["amount"], 12.35);
        assert_eq!(res.body["status"], "draft");
        assert_eq!(res.body["created_by"], user_id);

        let res = send(&app.router, Method::GET, &uri, Some(&token), None).await;
        assert_eq!(res.body["total"], 12);
        assert_eq!(res.body["pages"], 2);
        assert_eq!(res.body["expenses"].as_array().unwrap().len(), 10);

        let res = send(
            &app.router,
            Method::PUT,
            &format!("{}/{}", uri, id),
            Some(&token),
            Some(json!({"status": "submitted"})),
        )
        .await;
        assert_eq!(res.body["status"], "submitted");
        assert_eq!(res.body["title"], "Taxi");

        let res = send(&app.router, Method::GET, &format!("{}?status=submitted", uri), Some(&token), None).await;
        assert_eq!(res.body["total"], 1);
    }

    #[tokio::test]
    async fn test_attachment_lifecycle() {
        let app = TestApp::new().await;
        let (_, token) = app.user("staff", Role::User).await;
        let id = expense(&app, &token, "Hotel").await;
        let upload = format!("{}/api/expenses/{}/upload", BASE, id);

        let res = send_request(&app.router, upload_request(&upload, &token, "run.exe", "MZ")).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "File type not allowed");

        let res = send(&app.router, Method::POST, &upload, Some(&token), Some(json!({}))).await;
        assert_eq!(res.body["error"], "No file provided");

        let res = send_request(&app.router, upload_request(&upload, &token, "../receipt.pdf", "%PDF-1.4")).await;
        assert_eq!(res.status, StatusCode::CREATED);
        let attachment_id = res.body["id"].as_i64().unwrap();
        let stored = res.body["filename"].as_str().unwrap().to_string();
        assert!(stored.ends_with("_receipt.pdf"));
        let path = app.state.config.upload_dir().join(&stored);
        assert!(path.exists());

        let res = send(
            &app.router,
            Method::GET,
            &format!("{}/api/attachments/{}", BASE, attachment_id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.text, "%PDF-1.4");
        let disposition = res.headers[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.contains(&stored));

        let res = send(&app.router, Method::GET, &format!("{}/api/expenses/{}", BASE, id), Some(&token), None).await;
        assert_eq!(res.body["attachments"].as_array().unwrap().len(), 1);

        let res = send(&app.router, Method::DELETE, &format!("{}/api/expenses/{}", BASE, id), Some(&token), None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_upload_size_limit() {
        let mut config = crate::testing::test_config();
        config.uploads.max_bytes = 4;
        let app = TestApp::with_config(config).await;
        let (_, token) = app.user("staff", Role::User).await;
        let id = expense(&app, &token, "Hotel").await;

        let uri = format!("{}/api/expenses/{}/upload", BASE, id);
        let res = send_request(&app.router, upload_request(&uri, &token, "big.pdf", "0123456789")).await;
        assert_eq!(res.status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
