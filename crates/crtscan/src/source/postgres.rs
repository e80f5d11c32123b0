//! PostgreSQL record source (crt.sh `certwatch` by default).
//!
//! Holds at most one connection. Any failure drops it and the next fetch
//! reconnects from scratch; retries themselves are the paginator's job.

use super::{Page, PageRequest, PaginationMode, RecordSource, SourceRow};
use crate::error::{ConfigError, SourceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Row};
use tracing::{debug, info, warn};

/// Public guest access to the crt.sh certificate database.
pub const DEFAULT_SOURCE_URL: &str = "postgres://guest@crt.sh:5432/certwatch?sslmode=disable";

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "COPY", "GRANT",
    "REVOKE", "VACUUM", "CALL", "DO", "SET", "LOCK", "INTO",
];

/// Shape of the paged query: which table and columns, plus an optional
/// read-only predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceQuery {
    pub table: String,
    pub id_column: String,
    pub payload_column: String,
    /// Extra SQL predicate ANDed into the WHERE clause.
    pub filter: Option<String>,
}

impl Default for SourceQuery {
    fn default() -> Self {
        Self::crtsh()
    }
}

impl SourceQuery {
    /// crt.sh layout: `certificate(id, certificate)`.
    pub fn crtsh() -> Self {
        Self {
            table: "certificate".to_string(),
            id_column: "id".to_string(),
            payload_column: "certificate".to_string(),
            filter: None,
        }
    }

    /// Whether table and columns are the crt.sh defaults.
    pub fn is_crtsh_layout(&self) -> bool {
        let default = Self::crtsh();
        self.table == default.table
            && self.id_column == default.id_column
            && self.payload_column == default.payload_column
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Reject anything that is not a plain identifier or a read-only
    /// single-expression filter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier(&self.table, true)?;
        validate_identifier(&self.id_column, false)?;
        validate_identifier(&self.payload_column, false)?;
        if let Some(filter) = &self.filter {
            validate_filter(filter)?;
        }
        Ok(())
    }

    /// SQL for one page. `$1` is the cursor, `$2` the limit.
    pub fn sql(&self, mode: PaginationMode) -> String {
        let filter = self
            .filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty());
        match mode {
            PaginationMode::Keyset => {
                let extra = filter.map(|f| format!(" AND ({f})")).unwrap_or_default();
                format!(
                    "SELECT {id}, {payload} FROM {table} WHERE {id} > $1{extra} ORDER BY {id} LIMIT $2",
                    id = self.id_column,
                    payload = self.payload_column,
                    table = self.table,
                )
            }
            PaginationMode::Offset => {
                let clause = filter.map(|f| format!(" WHERE ({f})")).unwrap_or_default();
                format!(
                    "SELECT {id}, {payload} FROM {table}{clause} OFFSET $1 LIMIT $2",
                    id = self.id_column,
                    payload = self.payload_column,
                    table = self.table,
                )
            }
        }
    }
}

/// Paged reader over a PostgreSQL table.
pub struct PgSource {
    url: String,
    query: SourceQuery,
    conn: Option<PgConnection>,
}

impl PgSource {
    pub fn new(url: impl Into<String>, query: SourceQuery) -> Result<Self, ConfigError> {
        query.validate()?;
        Ok(Self {
            url: url.into(),
            query,
            conn: None,
        })
    }

    async fn connection(&mut self) -> Result<&mut PgConnection, SourceError> {
        if self.conn.is_none() {
            info!(source = %redact_url(&self.url), "Connecting to source");
            let conn = PgConnection::connect(&self.url)
                .await
                .map_err(SourceError::Connect)?;
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| SourceError::Unavailable("connection not established".to_string()))
    }
}

#[async_trait]
impl RecordSource for PgSource {
    async fn fetch(&mut self, request: PageRequest) -> Result<Page, SourceError> {
        let sql = self.query.sql(request.mode);
        let cursor = request.cursor.value();
        let limit = i64::try_from(request.limit).unwrap_or(i64::MAX);

        let conn = self.connection().await?;
        // Unnamed statements: the crt.sh replicas sit behind a pooler.
        let rows = sqlx::query(&sql)
            .persistent(false)
            .bind(cursor)
            .bind(limit)
            .fetch_all(conn)
            .await
            .map_err(SourceError::Query)?;

        let mut page = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get(0).map_err(SourceError::Query)?;
            let payload = match row.try_get::<Option<Vec<u8>>, _>(1) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(id, error = %err, "Unreadable payload column");
                    None
                }
            };
            page.push(SourceRow { id, payload });
        }
        debug!(cursor, rows = page.len(), mode = %request.mode, "Fetched page");
        Ok(Page::new(page))
    }

    async fn reset(&mut self) {
        if self.conn.take().is_some() {
            debug!("Dropped source connection");
        }
    }

    fn describe(&self) -> String {
        format!("{} ({})", redact_url(&self.url), self.query.table)
    }
}

/// Hide the password part of a connection URL.
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let Some(at) = rest[..authority_end].rfind('@') else {
        return url.to_string();
    };
    let userinfo = &rest[..at];
    match userinfo.find(':') {
        Some(colon) => format!(
            "{}{}:***{}",
            &url[..scheme_end + 3],
            &userinfo[..colon],
            &rest[at..]
        ),
        None => url.to_string(),
    }
}

fn validate_identifier(name: &str, allow_schema: bool) -> Result<(), ConfigError> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 || (parts.len() == 2 && !allow_schema) {
        return Err(ConfigError::InvalidSql(format!("'{name}' is not a plain identifier")));
    }
    for part in parts {
        let mut chars = part.chars();
        let valid_start = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::InvalidSql(format!("'{name}' is not a plain identifier")));
        }
    }
    Ok(())
}

fn validate_filter(filter: &str) -> Result<(), ConfigError> {
    let stripped = strip_literals_and_comments(filter);
    if stripped.contains(';') {
        return Err(ConfigError::InvalidSql(
            "filter must be a single expression (no ';')".to_string(),
        ));
    }
    let mut depth: i64 = 0;
    for ch in stripped.chars() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(ConfigError::InvalidSql("filter has unbalanced parentheses".to_string()));
    }
    for token in stripped
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
    {
        let upper = token.to_ascii_uppercase();
        if FORBIDDEN_KEYWORDS.contains(&upper.as_str()) {
            return Err(ConfigError::InvalidSql(format!(
                "filter contains forbidden keyword: {upper}"
            )));
        }
    }
    Ok(())
}

/// Blank out quoted literals and comments so keyword checks only see code.
fn strip_literals_and_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' => {
                let quote = ch;
                out.push(' ');
                while let Some(inner) = chars.next() {
                    if inner == quote {
                        if chars.peek() == Some(&quote) {
                            chars.next();
                            continue;
                        }
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
                out.push(' ');
            }
            _ => out.push(ch),
        }
    }
    out
}
