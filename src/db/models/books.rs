//! Books models: the book catalogue plus ledgers, accounts and journals.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::lenient;

pub const ACCOUNT_TYPES: &[&str] = &["asset", "liability", "equity", "income", "expense"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub description: Option<String>,
    pub price: f64,
    pub stock: i64,
    pub category: Option<String>,
    pub user_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct BookRequest {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::amount")]
    pub price: Option<f64>,
    pub stock: Option<i64>,
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BookQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ledger {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct LedgerRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Balances are kept debit-positive: debits add, credits subtract
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerAccount {
    pub id: i64,
    pub ledger_id: i64,
    pub name: String,
    pub account_type: String,
    pub balance: f64,
}

#[derive(Debug, Deserialize)]
pub struct LedgerAccountRequest {
    pub ledger_id: Option<i64>,
    pub name: Option<String>,
    pub account_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JournalEntry {
    pub id: i64,
    pub date: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JournalLine {
    pub id: i64,
    pub journal_entry_id: i64,
    pub account_id: i64,
    pub amount: f64,
    pub is_debit: bool,
}

#[derive(Debug, Serialize)]
pub struct JournalEntryResponse {
    #[serde(flatten)]
    pub entry: JournalEntry,
    pub transactions: Vec<JournalLine>,
}

#[derive(Debug, Deserialize)]
pub struct JournalLineRequest {
    pub account_id: i64,
    #[serde(default, deserialize_with = "lenient::amount")]
    pub amount: Option<f64>,
    #[serde(default)]
    pub is_debit: bool,
}

#[derive(Debug, Deserialize)]
pub struct JournalRequest {
    pub date: Option<String>,
    pub description: Option<String>,
    pub transactions: Option<Vec<JournalLineRequest>>,
}

/// Credit-normal sections are reported as positive amounts
#[derive(Debug, Serialize)]
pub struct BalanceSheet {
    pub ledger_id: i64,
    pub assets: f64,
    pub liabilities: f64,
    pub equity: f64,
    pub net_income: f64,
    pub balanced: bool,
}
