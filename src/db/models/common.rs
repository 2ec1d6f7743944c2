//! Pagination and other types shared across models.

use serde::ser::{Serialize, SerializeMap, Serializer};
use sqlx::{sqlite::SqliteRow, FromRow, SqlitePool};

/// Largest page size any list endpoint will return
pub const MAX_PER_PAGE: i64 = 100;

/// Highest page number whose offset still fits in an `i64`
pub const MAX_PAGE: i64 = i64::MAX / MAX_PER_PAGE;

/// Resolved paging parameters for a list query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: i64,
    pub per_page: i64,
    pub offset: i64,
}

impl PageWindow {
    /// Normalize the raw `page`/`per_page` query values.
    ///
    /// `page` is 1-indexed and clamped to `1..=MAX_PAGE`; `per_page` falls
    /// back to the endpoint's default and is clamped to `1..=MAX_PER_PAGE`.
    pub fn new(page: Option<i64>, per_page: Option<i64>, default_per_page: i64) -> Self {
        let page = page.unwrap_or(1).clamp(1, MAX_PAGE);
        let per_page = per_page.unwrap_or(default_per_page).clamp(1, MAX_PER_PAGE);
        Self {
            page,
            per_page,
            offset: (page - 1) * per_page,
        }
    }
}

/// One page of a collection.
///
/// Serializes as `{total, pages, current_page, per_page, <key>: [...]}` where
/// `key` names the collection (`items`, `orders`, `leads`, ...).
#[derive(Debug)]
pub struct Page<T> {
    pub key: &'static str,
    pub items: Vec<T>,
    pub total: i64,
    pub window: PageWindow,
}

impl<T> Page<T> {
    pub fn new(key: &'static str, items: Vec<T>, total: i64, window: PageWindow) -> Self {
        Self {
            key,
            items,
            total,
            window,
        }
    }

    pub fn pages(&self) -> i64 {
        (self.total as f64 / self.window.per_page as f64).ceil() as i64
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            key: self.key,
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            window: self.window,
        }
    }
}

impl<T: Serialize> Serialize for Page<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(5))?;
        map.serialize_entry("total", &self.total)?;
        map.serialize_entry("pages", &self.pages())?;
        map.serialize_entry("current_page", &self.window.page)?;
        map.serialize_entry("per_page", &self.window.per_page)?;
        map.serialize_entry(self.key, &self.items)?;
        map.end()
    }
}

/// Dynamic `WHERE` clause built from optional query filters.
///
/// Values are bound as text; SQLite applies the column's numeric affinity
/// when comparing, so integer columns filter correctly.
#[derive(Debug, Default)]
pub struct Filters {
    conditions: Vec<String>,
    bindings: Vec<String>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `column = ?` when `value` is present and not blank
    pub fn eq<V: ToString>(&mut self, column: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value.map(|v| v.to_string()) {
            if !value.trim().is_empty() {
                self.conditions.push(format!("{} = ?", column));
                self.bindings.push(value);
            }
        }
        self
    }

    /// Add a raw condition with one placeholder
    pub fn push(&mut self, condition: &str, value: impl ToString) -> &mut Self {
        self.conditions.push(condition.to_string());
        self.bindings.push(value.to_string());
        self
    }

    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }
}

/// Run a filtered, paginated listing.
///
/// `from` may include joins; `select` names the projected columns and
/// `order_by` the full ordering expression.
pub async fn fetch_page<T>(
    db: &SqlitePool,
    key: &'static str,
    select: &str,
    from: &str,
    filters: &Filters,
    order_by: &str,
    window: PageWindow,
) -> Result<Page<T>, sqlx::Error>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM {} {}", from, where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for binding in &filters.bindings {
        count_query = count_query.bind(binding);
    }
    let total = count_query.fetch_one(db).await?;

    let sql = format!(
        "SELECT {} FROM {} {} ORDER BY {} LIMIT ? OFFSET ?",
        select, from, where_clause, order_by
    );
    let mut query = sqlx::query_as::<_, T>(&sql);
    for binding in &filters.bindings {
        query = query.bind(binding);
    }
    let items = query
        .bind(window.per_page)
        .bind(window.offset)
        .fetch_all(db)
        .await?;

    Ok(Page::new(key, items, total, window))
}

/// Like [`fetch_page`] without the paging
pub async fn fetch_filtered<T>(
    db: &SqlitePool,
    select: &str,
    from: &str,
    filters: &Filters,
    order_by: &str,
) -> Result<Vec<T>, sqlx::Error>
where
    T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
{
    let sql = format!(
        "SELECT {} FROM {} {} ORDER BY {}",
        select,
        from,
        filters.where_clause(),
        order_by
    );
    let mut query = sqlx::query_as::<_, T>(&sql);
    for binding in &filters.bindings {
        query = query.bind(binding);
    }
    query.fetch_all(db).await
}


/// Deserializers for loosely typed JSON inputs.
pub mod lenient {
    use serde::{de::Error, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    /// Money amount given as a JSON number or a numeric string
    pub fn amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<NumberOrText>::deserialize(deserializer)? {
            None => Ok(None),
            Some(NumberOrText::Number(n)) => Ok(Some(n)),
            Some(NumberOrText::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("invalid amount: {}", s))),
        }
    }

    /// Like [`amount`], but anything unparseable becomes `0.0`
    pub fn amount_or_zero<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(value.map(|v| match v {
            serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
            serde_json::Value::String(s) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }))
    }
}
