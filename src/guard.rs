//! Query guard for `execute_query`.
//!
//! Classifies raw SQL text before it can reach the database and bounds the
//! rows a SELECT may return. The default mode is a keyword check on the
//! leading keyword of every statement in the text; strict mode additionally
//! parses the text with sqlparser and accepts only read-only statement
//! shapes.
//!
//! The keyword check cannot see mutations hidden behind CTEs or function
//! calls. Strict mode closes the CTE gap; side-effecting functions remain
//! out of reach of both.

use crate::error::{DbError, DbResult};
use crate::models::QueryRequest;
use lazy_regex::{Lazy, Regex, lazy_regex};
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::{debug, warn};

/// Leading keywords that are always refused.
pub const DENYLIST: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "TRUNCATE", "ALTER", "INSERT", "GRANT", "REVOKE", "CREATE",
];

/// Leading keywords treated as SELECT-shaped and given a row bound.
const SELECT_SHAPED: &[&str] = &["SELECT", "WITH"];

// An existing row bound, in either spelling PostgreSQL accepts
static ROW_BOUND_REGEX: Lazy<Regex> = lazy_regex!(r"(?i)\b(LIMIT|FETCH\s+(FIRST|NEXT))\b");

/// How thoroughly SQL text is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardMode {
    /// Leading-keyword denylist only
    #[default]
    Keyword,
    /// Keyword pass plus a full parse that accepts only read-only statements
    Strict,
}

impl std::fmt::Display for GuardMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keyword => write!(f, "keyword"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

/// A statement cleared for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedQuery {
    /// Text to send to the database
    pub sql: String,
    /// Rows to return at most
    pub limit: u32,
    /// The guard appended `LIMIT <limit>` itself
    pub rewritten: bool,
}

/// Outcome of [`QueryGuard::classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryVerdict {
    Allowed(AllowedQuery),
    Rejected { reason: String },
}

impl QueryVerdict {
    fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    /// Convert a rejection into `DbError::RejectedQuery`.
    pub fn into_result(self) -> DbResult<AllowedQuery> {
        match self {
            Self::Allowed(query) => Ok(query),
            Self::Rejected { reason } => Err(DbError::rejected(reason)),
        }
    }
}

/// Stateless SQL classifier.
#[derive(Debug, Clone, Copy)]
pub struct QueryGuard {
    max_rows: u32,
    mode: GuardMode,
}

impl QueryGuard {
    pub fn new(max_rows: u32, mode: GuardMode) -> Self {
        Self {
            max_rows: max_rows.max(1),
            mode,
        }
    }

    pub fn max_rows(&self) -> u32 {
        self.max_rows
    }

    pub fn mode(&self) -> GuardMode {
        self.mode
    }

    /// Decide whether `request` may run, and in what form.
    pub fn classify(&self, request: &QueryRequest) -> QueryVerdict {
        let verdict = self.classify_inner(request);
        match &verdict {
            QueryVerdict::Rejected { reason } => {
                warn!(reason = %reason, mode = %self.mode, "Query rejected");
            }
            QueryVerdict::Allowed(allowed) if allowed.rewritten => {
                debug!(limit = allowed.limit, "Appended row bound to query");
            }
            QueryVerdict::Allowed(_) => {}
        }
        verdict
    }

    fn classify_inner(&self, request: &QueryRequest) -> QueryVerdict {
        let sql = request.sql();
        let statements = split_statements(sql);

        if statements.is_empty() {
            return QueryVerdict::rejected("empty statement");
        }

        for statement in &statements {
            let keyword = statement.keyword();
            if DENYLIST.contains(&keyword.as_str()) {
                return QueryVerdict::rejected(format!(
                    "destructive or mutating operation blocked: {keyword}"
                ));
            }
        }

        if self.mode == GuardMode::Strict {
            if let Err(reason) = check_read_only(sql) {
                return QueryVerdict::rejected(reason);
            }
        }

        let limit = request.effective_limit(self.max_rows);

        match bound_statements(sql, &statements, limit) {
            Some(bounded) => QueryVerdict::Allowed(AllowedQuery {
                sql: bounded,
                limit,
                rewritten: true,
            }),
            None => QueryVerdict::Allowed(AllowedQuery {
                sql: sql.to_string(),
                limit,
                rewritten: false,
            }),
        }
    }
}

/// One statement of a possibly multi-statement text.
#[derive(Debug, Default)]
struct StatementText {
    /// Statement text with comments replaced by a space and the contents of
    /// quoted literals and identifiers removed
    masked: String,
    /// Byte offset in the original text just past the statement's last token
    body_end: usize,
}

impl StatementText {
    /// First keyword, uppercased. Leading parentheses are skipped.
    fn keyword(&self) -> String {
        self.masked
            .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_ascii_uppercase()
    }

    fn needs_bound(&self) -> bool {
        SELECT_SHAPED.contains(&self.keyword().as_str())
            && !ROW_BOUND_REGEX.is_match(&self.masked)
    }
}

/// Split `sql` at top-level semicolons, skipping statements that hold only
/// whitespace and comments.
///
/// Quoted text (`'...'`, `E'...'`, `"..."`, `$tag$...$tag$`) and comments
/// (`--`, nested `/* */`) are recognized so that neither a semicolon nor a
/// `LIMIT` inside them counts.
fn split_statements(sql: &str) -> Vec<StatementText> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut current = StatementText::default();
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end) = quoted_end(bytes, i) {
            current.masked.push_str(if bytes[i] == b'"' { "\"\"" } else { "''" });
            current.body_end = end;
            i = end;
            continue;
        }

        match bytes[i] {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = sql[i..].find('\n').map_or(bytes.len(), |n| i + n);
                current.masked.push(' ');
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = block_comment_end(bytes, i);
                current.masked.push(' ');
            }
            b';' => {
                let finished = std::mem::take(&mut current);
                if finished.body_end > 0 {
                    statements.push(finished);
                }
                i += 1;
            }
            _ => {
                let ch = sql[i..].chars().next().unwrap_or(' ');
                current.masked.push(ch);
                if !ch.is_whitespace() {
                    current.body_end = i + ch.len_utf8();
                }
                i += ch.len_utf8();
            }
        }
    }

    if current.body_end > 0 {
        statements.push(current);
    }
    statements
}

/// End offset of the quoted token starting at `start`, or `None` if no quote
/// starts there. An unterminated quote runs to the end of the text.
fn quoted_end(bytes: &[u8], start: usize) -> Option<usize> {
    match bytes[start] {
        quote @ (b'\'' | b'"') => {
            let backslash_escapes = quote == b'\'' && is_escape_string(bytes, start);
            let mut j = start + 1;
            while j < bytes.len() {
                match bytes[j] {
                    b'\\' if backslash_escapes => j += 2,
                    b if b == quote && bytes.get(j + 1) == Some(&quote) => j += 2,
                    b if b == quote => return Some(j + 1),
                    _ => j += 1,
                }
            }
            Some(bytes.len())
        }
        b'$' => {
            let tag_len = dollar_tag_len(bytes, start)?;
            let tag = &bytes[start..start + tag_len];
            let body = start + tag_len;
            let close = bytes[body..].windows(tag_len).position(|w| w == tag);
            Some(close.map_or(bytes.len(), |n| body + n + tag_len))
        }
        _ => None,
    }
}

// E'...' strings take backslash escapes
fn is_escape_string(bytes: &[u8], quote: usize) -> bool {
    quote > 0
        && matches!(bytes[quote - 1], b'E' | b'e')
        && (quote < 2 || !is_identifier_byte(bytes[quote - 2]))
}

/// Length of a `$tag$` opener at `start`. Positional parameters (`$1`) and
/// `$` inside identifiers do not open a dollar quote.
fn dollar_tag_len(bytes: &[u8], start: usize) -> Option<usize> {
    if start > 0 && (is_identifier_byte(bytes[start - 1]) || bytes[start - 1] == b'$') {
        return None;
    }
    let mut j = start + 1;
    if bytes.get(j).is_some_and(u8::is_ascii_digit) {
        return None;
    }
    while j < bytes.len() && is_identifier_byte(bytes[j]) {
        j += 1;
    }
    (bytes.get(j) == Some(&b'$')).then_some(j + 1 - start)
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Offset just past the `*/` closing the (possibly nested) block comment
/// opened at `start`.
fn block_comment_end(bytes: &[u8], start: usize) -> usize {
    let mut depth = 1usize;
    let mut j = start + 2;
    while j < bytes.len() {
        match (bytes[j], bytes.get(j + 1)) {
            (b'/', Some(b'*')) => {
                depth += 1;
                j += 2;
            }
            (b'*', Some(b'/')) => {
                depth -= 1;
                j += 2;
                if depth == 0 {
                    return j;
                }
            }
            _ => j += 1,
        }
    }
    // Unterminated comment swallows the rest
    bytes.len()
}

/// Insert `LIMIT n` after the last token of every SELECT-shaped statement
/// that has no bound of its own. Returns `None` when nothing needed one.
///
/// A rewritten final statement loses its trailing semicolons and comments so
/// the bound lands inside the statement.
fn bound_statements(sql: &str, statements: &[StatementText], limit: u32) -> Option<String> {
    let mut out = String::with_capacity(sql.len() + 16);
    let mut copied = 0;

    for statement in statements.iter().filter(|s| s.needs_bound()) {
        out.push_str(&sql[copied..statement.body_end]);
        out.push_str(" LIMIT ");
        out.push_str(&limit.to_string());
        copied = statement.body_end;
    }

    if copied == 0 {
        return None;
    }
    if statements.last().map(|s| s.body_end) != Some(copied) {
        out.push_str(&sql[copied..]);
    }
    Some(out)
}

/// Parse `sql` and accept only read-only statements.
fn check_read_only(sql: &str) -> Result<(), String> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| format!("could not parse statement: {e}"))?;

    if statements.is_empty() {
        return Err("empty statement".to_string());
    }
    for stmt in &statements {
        check_statement(stmt)?;
    }
    Ok(())
}

fn check_statement(stmt: &Statement) -> Result<(), String> {
    match stmt {
        Statement::Query(query) => check_query(query),
        Statement::Explain { statement, .. } => match statement.as_ref() {
            Statement::Query(query) => check_query(query),
            other => Err(format!(
                "EXPLAIN of {} is not read-only",
                statement_keyword(other)
            )),
        },
        Statement::ShowVariable { .. } | Statement::ShowVariables { .. } => Ok(()),
        other => Err(format!(
            "destructive or mutating operation blocked: {} is not a read-only statement",
            statement_keyword(other)
        )),
    }
}

fn check_query(query: &Query) -> Result<(), String> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_query(&cte.query)?;
        }
    }
    check_set_expr(&query.body)
}

fn check_set_expr(expr: &SetExpr) -> Result<(), String> {
    match expr {
        SetExpr::Select(select) if select.into.is_some() => {
            Err("destructive or mutating operation blocked: SELECT ... INTO creates a table".to_string())
        }
        SetExpr::Select(_) | SetExpr::Values(_) | SetExpr::Table(_) => Ok(()),
        SetExpr::Query(query) => check_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            check_set_expr(left)?;
            check_set_expr(right)
        }
        // INSERT/UPDATE/DELETE/MERGE nested in a query, e.g. a data-modifying CTE
        _ => Err("destructive or mutating operation blocked: data-modifying statement inside a query".to_string()),
    }
}

fn statement_keyword(stmt: &Statement) -> String {
    stmt.to_string()
        .split_whitespace()
        .next()
        .unwrap_or("statement")
        .to_ascii_uppercase()
}
