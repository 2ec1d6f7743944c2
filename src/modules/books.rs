//! Book catalogue and double-entry bookkeeping.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use super::Module;
use crate::api::auth::{AuthUser, DELETE_ROLES, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery, ValidationErrorBuilder};
use crate::api::validation::{non_empty, validate_one_of};
use crate::db::{
    fetch_page, BalanceSheet, Book, BookQuery, BookRequest, DbPool, Filters, JournalEntry,
    JournalEntryResponse, JournalLine, JournalLineRequest, JournalRequest, Ledger, LedgerAccount,
    LedgerAccountRequest, LedgerRequest, Page, PageWindow, ACCOUNT_TYPES,
};
use crate::utils::{format_utc, now_rfc3339, parse_datetime, round2};
use crate::AppState;

const DEFAULT_PER_PAGE: i64 = 10;

pub struct Books;

impl Module for Books {
    fn name(&self) -> &'static str {
        "nexora-books"
    }

    fn description(&self) -> &'static str {
        "Book catalogue, ledgers and journal entries"
    }

    fn icon(&self) -> &'static str {
        "📚"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &[
            "/api/items",
            "/api/books",
            "/api/books/ledgers",
            "/api/books/accounts",
            "/api/books/journal",
        ]
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/api/books", get(list_books).post(create_book))
            .route(
                "/api/books/:id",
                get(get_book).put(update_book).delete(delete_book),
            )
            .route("/api/books/ledgers", get(list_ledgers).post(create_ledger))
            .route("/api/books/ledgers/:id/accounts", get(list_accounts))
            .route("/api/books/ledgers/:id/balance-sheet", get(balance_sheet))
            .route("/api/books/accounts", post(create_account))
            .route("/api/books/journal", post(post_journal))
            .route("/api/books/journal/:id", get(get_journal))
    }
}

/// A duplicate ISBN gets its own message instead of the generic conflict
fn isbn_conflict(error: sqlx::Error) -> ApiError {
    match &error {
        sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed") => {
            ApiError::conflict("ISBN already exists")
        }
        _ => error.into(),
    }
}

// -------------------------------------------------------------------------
// Catalogue
// -------------------------------------------------------------------------

async fn find_book(db: &DbPool, id: i64) -> Result<Book, ApiError> {
    sqlx::query_as("SELECT * FROM books WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Book not found"))
}

async fn list_books(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<BookQuery>,
) -> Result<Json<Page<Book>>, ApiError> {
    user.require(READ_ROLES)?;
    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);
    let mut filters = Filters::new();
    filters.eq("category", query.category);

    let page = fetch_page(
        &state.db,
        "books",
        "*",
        "books",
        &filters,
        "created_at DESC, id DESC",
        window,
    )
    .await?;
    Ok(Json(page))
}

async fn get_book(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Book>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_book(&state.db, id).await?))
}

async fn create_book(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<BookRequest>,
) -> Result<(StatusCode, Json<Book>), ApiError> {
    user.require(WRITE_ROLES)?;
    let (Some(title), Some(author), Some(isbn)) = (
        non_empty(&request.title),
        non_empty(&request.author),
        non_empty(&request.isbn),
    ) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };
    if matches!(request.stock, Some(s) if s < 0) {
        return Err(ApiError::validation_field("stock", "stock cannot be negative"));
    }

    let book: Book = sqlx::query_as(
        r#"INSERT INTO books (title, author, isbn, description, price, stock, category, user_id)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(title)
    .bind(author)
    .bind(isbn)
    .bind(&request.description)
    .bind(request.price.unwrap_or(0.0))
    .bind(request.stock.unwrap_or(0))
    .bind(&request.category)
    .bind(user.id)
    .fetch_one(&state.db)
    .await
    .map_err(isbn_conflict)?;

    tracing::info!(book_id = book.id, isbn = %book.isbn, "Added book");
    Ok((StatusCode::CREATED, Json(book)))
}

async fn update_book(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<BookRequest>,
) -> Result<Json<Book>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing = find_book(&state.db, id).await?;

    let book: Book = sqlx::query_as(
        r#"UPDATE books
           SET title = ?, author = ?, isbn = ?, description = ?, price = ?, stock = ?, category = ?
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(non_empty(&request.title).unwrap_or(&existing.title))
    .bind(non_empty(&request.author).unwrap_or(&existing.author))
    .bind(non_empty(&request.isbn).unwrap_or(&existing.isbn))
    .bind(request.description.as_ref().or(existing.description.as_ref()))
    .bind(request.price.unwrap_or(existing.price))
    .bind(request.stock.unwrap_or(existing.stock))
    .bind(request.category.as_ref().or(existing.category.as_ref()))
    .bind(id)
    .fetch_one(&state.db)
    .await
    .map_err(isbn_conflict)?;
    Ok(Json(book))
}

async fn delete_book(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    let result = sqlx::query("DELETE FROM books WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Book not found"));
    }
    Ok(Json(json!({"message": "Book deleted successfully"})))
}

// -------------------------------------------------------------------------
// Ledgers and accounts
// -------------------------------------------------------------------------

async fn list_ledgers(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<Ledger>>, ApiError> {
    user.require(READ_ROLES)?;
    let ledgers = sqlx::query_as("SELECT * FROM book_ledgers ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(ledgers))
}

async fn create_ledger(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<LedgerRequest>,
) -> Result<(StatusCode, Json<Ledger>), ApiError> {
    user.require(WRITE_ROLES)?;
    let name = non_empty(&request.name).ok_or_else(|| ApiError::bad_request("name required"))?;

    let ledger: Ledger =
        sqlx::query_as("INSERT INTO book_ledgers (name, description) VALUES (?, ?) RETURNING *")
            .bind(name)
            .bind(&request.description)
            .fetch_one(&state.db)
            .await?;
    Ok((StatusCode::CREATED, Json(ledger)))
}

async fn ensure_ledger(db: &DbPool, id: i64) -> Result<(), ApiError> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM book_ledgers WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    found.map(|_| ()).ok_or_else(|| ApiError::not_found("ledger not found"))
}

async fn list_accounts(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<LedgerAccount>>, ApiError> {
    user.require(READ_ROLES)?;
    ensure_ledger(&state.db, id).await?;
    let accounts = sqlx::query_as("SELECT * FROM book_accounts WHERE ledger_id = ? ORDER BY name")
        .bind(id)
        .fetch_all(&state.db)
        .await?;
    Ok(Json(accounts))
}

async fn create_account(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<LedgerAccountRequest>,
) -> Result<(StatusCode, Json<LedgerAccount>), ApiError> {
    user.require(WRITE_ROLES)?;
    let (Some(ledger_id), Some(name)) = (request.ledger_id, non_empty(&request.name)) else {
        return Err(ApiError::bad_request("ledger_id and name required"));
    };
    let account_type = non_empty(&request.account_type).unwrap_or("asset");
    if let Err(message) = validate_one_of(account_type, ACCOUNT_TYPES, "account_type") {
        return Err(ApiError::validation_field("account_type", message));
    }
    ensure_ledger(&state.db, ledger_id).await?;

    let account: LedgerAccount = sqlx::query_as(
        "INSERT INTO book_accounts (ledger_id, name, account_type) VALUES (?, ?, ?) RETURNING *",
    )
    .bind(ledger_id)
    .bind(name)
    .bind(account_type)
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

// -------------------------------------------------------------------------
// Journal
// -------------------------------------------------------------------------

/// Two or more positive lines whose debits equal their credits
fn check_journal(lines: &[JournalLineRequest]) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if lines.len() < 2 {
        errors.add("transactions", "a journal entry needs at least two transactions");
    }
    if lines.iter().any(|line| !matches!(line.amount, Some(a) if a > 0.0)) {
        errors.add("transactions", "every amount must be positive");
    }
    let (debits, credits) = lines.iter().fold((0.0, 0.0), |(dr, cr), line| {
        let amount = line.amount.unwrap_or(0.0);
        if line.is_debit {
            (dr + amount, cr)
        } else {
            (dr, cr + amount)
        }
    });
    if round2(debits) != round2(credits) {
        errors.add(
            "transactions",
            format!("debits ({:.2}) and credits ({:.2}) must balance", debits, credits),
        );
    }
    errors.finish()
}

/// Record a balanced entry and move every account balance with it.
///
/// The entry row goes in first and each line updates its account before
/// anything is read, so the transaction holds the write lock throughout.
async fn post_journal(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<JournalRequest>,
) -> Result<(StatusCode, Json<JournalEntryResponse>), ApiError> {
    user.require(WRITE_ROLES)?;
    let lines = request
        .transactions
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("transactions required"))?;
    check_journal(lines)?;
    let date = match non_empty(&request.date) {
        Some(raw) => parse_datetime(raw)
            .map(format_utc)
            .ok_or_else(|| ApiError::validation_field("date", "date must be a date"))?,
        None => now_rfc3339(),
    };

    let mut tx = state.db.begin().await?;
    let entry: JournalEntry = sqlx::query_as(
        "INSERT INTO book_journal_entries (date, description) VALUES (?, ?) RETURNING *",
    )
    .bind(&date)
    .bind(&request.description)
    .fetch_one(&mut *tx)
    .await?;

    let mut transactions = Vec::with_capacity(lines.len());
    for line in lines {
        let amount = line.amount.unwrap_or(0.0);
        let signed = if line.is_debit { amount } else { -amount };
        let moved: Option<i64> = sqlx::query_scalar(
            "UPDATE book_accounts SET balance = ROUND(balance + ?, 2) WHERE id = ? RETURNING id",
        )
        .bind(signed)
        .bind(line.account_id)
        .fetch_optional(&mut *tx)
        .await?;
        if moved.is_none() {
            return Err(ApiError::bad_request(format!("account {} not found", line.account_id)));
        }

        let transaction: JournalLine = sqlx::query_as(
            r#"INSERT INTO book_transactions (journal_entry_id, account_id, amount, is_debit)
               VALUES (?, ?, ?, ?)
               RETURNING *"#,
        )
        .bind(entry.id)
        .bind(line.account_id)
        .bind(amount)
        .bind(line.is_debit)
        .fetch_one(&mut *tx)
        .await?;
        transactions.push(transaction);
    }
    tx.commit().await?;

    tracing::info!(entry_id = entry.id, lines = transactions.len(), "Posted journal entry");
    Ok((
        StatusCode::CREATED,
        Json(JournalEntryResponse { entry, transactions }),
    ))
}

async fn get_journal(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<JournalEntryResponse>, ApiError> {
    user.require(READ_ROLES)?;
    let entry: JournalEntry = sqlx::query_as("SELECT * FROM book_journal_entries WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("journal entry not found"))?;
    let transactions =
        sqlx::query_as("SELECT * FROM book_transactions WHERE journal_entry_id = ? ORDER BY id")
            .bind(id)
            .fetch_all(&state.db)
            .await?;
    Ok(Json(JournalEntryResponse { entry, transactions }))
}

/// Fold debit-positive account balances into balance sheet sections
fn summarize(ledger_id: i64, balances: &[(String, f64)]) -> BalanceSheet {
    let total = |kind: &str| -> f64 {
        balances
            .iter()
            .filter(|(account_type, _)| account_type == kind)
            .map(|(_, balance)| balance)
            .sum()
    };
    let credit = |kind: &str| 0.0 - total(kind);
    let assets = round2(total("asset"));
    let liabilities = round2(credit("liability"));
    let equity = round2(credit("equity"));
    let net_income = round2(credit("income") - total("expense"));

    BalanceSheet {
        ledger_id,
        assets,
        liabilities,
        equity,
        net_income,
        balanced: round2(liabilities + equity + net_income) == assets,
    }
}

async fn balance_sheet(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<BalanceSheet>, ApiError> {
    user.require(READ_ROLES)?;
    ensure_ledger(&state.db, id).await?;
    let balances: Vec<(String, f64)> =
        sqlx::query_as("SELECT account_type, balance FROM book_accounts WHERE ledger_id = ?")
            .bind(id)
            .fetch_all(&state.db)
            .await?;
    Ok(Json(summarize(id, &balances)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use crate::testing::{send, TestApp};
    use axum::http::Method;

    const BASE: &str = "/module/nexora-books/api/books";

    fn line(account_id: i64, amount: f64, is_debit: bool) -> JournalLineRequest {
        JournalLineRequest {
            account_id,
            amount: Some(amount),
            is_debit,
        }
    }

    #[test]
    fn test_check_journal() {
        assert!(check_journal(&[line(1, 50.0, true), line(2, 50.0, false)]).is_ok());
        assert!(check_journal(&[line(1, 50.0, true), line(2, 30.0, false), line(3, 20.0, false)]).is_ok());
        assert!(check_journal(&[line(1, 50.0, true)]).is_err());
        assert!(check_journal(&[line(1, 50.0, true), line(2, 49.0, false)]).is_err());
        assert!(check_journal(&[line(1, -5.0, true), line(2, -5.0, false)]).is_err());
    }

    #[test]
    fn test_summarize_balance_sheet() {
        let balances = vec![
            ("asset".to_string(), 1500.0),
            ("liability".to_string(), -400.0),
            ("equity".to_string(), -1000.0),
            ("income".to_string(), -300.0),
            ("expense".to_string(), 200.0),
        ];
        let sheet = summarize(7, &balances);
        assert_eq!(sheet.assets, 1500.0);
        assert_eq!(sheet.liabilities, 400.0);
        assert_eq!(sheet.equity, 1000.0);
        assert_eq!(sheet.net_income, 100.0);
        assert!(sheet.balanced);
    }

    #[tokio::test]
    async fn test_book_catalogue() {
        let app = TestApp::new().await;
        let (_, manager) = app.user("mgr", Role::Manager).await;
        let (_, admin) = app.user("root", Role::Admin).await;

        let res = send(&app.router, Method::POST, BASE, Some(&manager), Some(json!({"title": "Dune"}))).await;
        assert_eq!(res.body["error"], "Missing required fields");

        let dune = json!({"title": "Dune", "author": "Herbert", "isbn": "978-0441013593", "price": "9.99"});
        let res = send(&app.router, Method::POST, BASE, Some(&manager), Some(dune.clone())).await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["price"], 9.99);
        let uri = format!("{}/{}", BASE, res.body["id"]);

        let res = send(&app.router, Method::POST, BASE, Some(&manager), Some(dune)).await;
        assert_eq!(res.status, StatusCode::CONFLICT);
        assert_eq!(res.body["error"], "ISBN already exists");

        let res = send(&app.router, Method::PUT, &uri, Some(&manager), Some(json!({"stock": 4}))).await;
        assert_eq!(res.body["stock"], 4);
        assert_eq!(res.body["title"], "Dune");

        let res = send(&app.router, Method::GET, BASE, Some(&manager), None).await;
        assert_eq!(res.body["total"], 1);
        assert_eq!(res.body["per_page"], 10);

        let res = send(&app.router, Method::DELETE, &uri, Some(&manager), None).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);
        let res = send(&app.router, Method::DELETE, &uri, Some(&admin), None).await;
        assert_eq!(res.body["message"], "Book deleted successfully");
        let res = send(&app.router, Method::GET, &uri, Some(&admin), None).await;
        assert_eq!(res.body["error"], "Book not found");
    }

    async fn account(app: &TestApp, token: &str, ledger: i64, name: &str, kind: &str) -> i64 {
        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/accounts", BASE),
            Some(token),
            Some(json!({"ledger_id": ledger, "name": name, "account_type": kind})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        res.body["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_journal_moves_balances() {
        let app = TestApp::new().await;
        let (_, manager) = app.user("mgr", Role::Manager).await;

        let res = send(&app.router, Method::POST, &format!("{}/ledgers", BASE), Some(&manager), Some(json!({}))).await;
        assert_eq!(res.body["error"], "name required");
        let res = send(&app.router, Method::POST, &format!("{}/ledgers", BASE), Some(&manager), Some(json!({"name": "General"}))).await;
        let ledger = res.body["id"].as_i64().unwrap();

        let cash = account(&app, &manager, ledger, "Cash", "asset").await;
        let capital = account(&app, &manager, ledger, "Capital", "equity").await;
        let sales = account(&app, &manager, ledger, "Sales", "income").await;
        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/accounts", BASE),
            Some(&manager),
            Some(json!({"ledger_id": 999, "name": "Ghost"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);

        let journal = format!("{}/journal", BASE);
        let res = send(
            &app.router,
            Method::POST,
            &journal,
            Some(&manager),
            Some(json!({
                "description": "Owner investment",
                "transactions": [
                    {"account_id": cash, "amount": 1000, "is_debit": true},
                    {"account_id": capital, "amount": 1000, "is_debit": false}
                ]
            })),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["transactions"].as_array().unwrap().len(), 2);

        send(
            &app.router,
            Method::POST,
            &journal,
            Some(&manager),
            Some(json!({
                "transactions": [
                    {"account_id": cash, "amount": "250.50", "is_debit": true},
                    {"account_id": sales, "amount": 250.5}
                ]
            })),
        )
        .await;

        let res = send(
            &app.router,
            Method::POST,
            &journal,
            Some(&manager),
            Some(json!({
                "transactions": [
                    {"account_id": cash, "amount": 10, "is_debit": true},
                    {"account_id": 999, "amount": 10}
                ]
            })),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "account 999 not found");

        let res = send(
            &app.router,
            Method::POST,
            &journal,
            Some(&manager),
            Some(json!({"transactions": [{"account_id": cash, "amount": 10, "is_debit": true}, {"account_id": sales, "amount": 5}]})),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);

        let res = send(&app.router, Method::GET, &format!("{}/ledgers/{}/accounts", BASE, ledger), Some(&manager), None).await;
        let balances: Vec<(String, f64)> = res
            .body
            .as_array()
            .unwrap()
            .iter()
            .map(|a| (a["name"].as_str().unwrap().to_string(), a["balance"].as_f64().unwrap()))
            .collect();
        assert_eq!(
            balances,
            vec![
                ("Capital".to_string(), -1000.0),
                ("Cash".to_string(), 1250.5),
                ("Sales".to_string(), -250.5)
            ]
        );

        let res = send(&app.router, Method::GET, &format!("{}/ledgers/{}/balance-sheet", BASE, ledger), Some(&manager), None).await;
        assert_eq!(res.body["assets"], 1250.5);
        assert_eq!(res.body["equity"], 1000.0);
        assert_eq!(res.body["net_income"], 250.5);
        assert_eq!(res.body["balanced"], true);
    }
}
