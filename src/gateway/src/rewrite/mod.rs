pub mod postprocess;
pub mod visitor;

use crate::rewrite::postprocess::{max_dollar_param, prenormalize, tokenize, TokKind};
use crate::rewrite::visitor::DialectVisitor;
use crate::translate::errors::GatewayError;

use common::metrics::metric_def::GATEWAY_REWRITE_LATENCY;
use common::metrics::MetricsTimer;
use hashbrown::HashMap;
use sqlparser::ast::VisitMut;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use tracing::warn;

/// What the bridge knows about the identity column of an INSERT target when
/// the rewrite runs. `Unknown` applies the `NULL` → `DEFAULT` rewrite
/// conservatively at position 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityHint {
    Unknown,
    FirstColumn,
    NoIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub pg_sql: String,
    /// Highest `$n` in `pg_sql`.
    pub param_count: u16,
}

/// Simple-rename table for scalar functions; structural rewrites (`IF`,
/// `MATCH … AGAINST`) are handled elsewhere.
pub(crate) fn function_renames() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("NOW", "CURRENT_TIMESTAMP"),
        ("CURDATE", "CURRENT_DATE"),
        ("CURTIME", "CURRENT_TIME"),
        ("IFNULL", "COALESCE"),
        ("POW", "POWER"),
        ("RAND", "RANDOM"),
        ("GROUP_CONCAT", "STRING_AGG"),
    ])
}

/// The MySQL → PostgreSQL statement rewriter. Stateless between calls; a
/// parser is allocated per call, so independent rewrites may run from any
/// number of sessions at once.
pub struct Rewriter {
    renames: HashMap<&'static str, &'static str>,
}

impl Default for Rewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Rewriter {
    pub fn new() -> Self {
        Self {
            renames: function_renames(),
        }
    }

    pub fn rewrite(&self, sql: &str) -> Result<Rewritten, GatewayError> {
        self.rewrite_with_hint(sql, IdentityHint::Unknown)
    }

    /// parse → semantic visit → restore → ordered text passes → `$n` audit.
    pub fn rewrite_with_hint(
        &self,
        sql: &str,
        hint: IdentityHint,
    ) -> Result<Rewritten, GatewayError> {
        let _timer = MetricsTimer::new(GATEWAY_REWRITE_LATENCY);
        let normalized = prenormalize(sql);
        let mut statements =
            Parser::parse_sql(&MySqlDialect {}, &normalized).map_err(|e| GatewayError::Rewrite {
                sql: sql.to_string(),
                message: e.to_string(),
            })?;
        if statements.len() != 1 {
            return Err(GatewayError::Rewrite {
                sql: sql.to_string(),
                message: format!("expected exactly one statement, got {}", statements.len()),
            });
        }
        let mut statement = statements.remove(0);

        let mut visitor = DialectVisitor::new(&self.renames);
        let _ = statement.visit(&mut visitor);
        let marker_count = visitor.placeholder_count;
        if let Some(message) = visitor.error {
            return Err(GatewayError::Rewrite {
                sql: sql.to_string(),
                message,
            });
        }

        let restored = statement.to_string();
        let pg_sql = postprocess::postprocess(&restored, hint);
        let param_count = max_dollar_param(&pg_sql);
        if param_count != marker_count {
            warn!(
                "placeholder marker count {marker_count} disagrees with emitted $n count {param_count}: {pg_sql}"
            );
        }
        Ok(Rewritten {
            pg_sql,
            param_count,
        })
    }
}

/// Routing decision made before the rewrite pipeline is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementClass {
    Metadata,
    Set,
    Use,
    Begin,
    Commit,
    Rollback,
    Query,
}

fn leading_words(sql: &str, n: usize) -> Vec<String> {
    sql.split_whitespace()
        .take(n)
        .map(|w| w.trim_end_matches(';').to_ascii_uppercase())
        .collect()
}

pub fn classify(sql: &str) -> StatementClass {
    let words = leading_words(sql, 2);
    let Some(first) = words.first() else {
        return StatementClass::Query;
    };
    match first.as_str() {
        "SHOW" | "DESCRIBE" | "DESC" => StatementClass::Metadata,
        "SET" => StatementClass::Set,
        "USE" => StatementClass::Use,
        "BEGIN" => StatementClass::Begin,
        "START" if words.get(1).map_or(false, |w| w == "TRANSACTION") => StatementClass::Begin,
        "COMMIT" => StatementClass::Commit,
        "ROLLBACK" => StatementClass::Rollback,
        _ => StatementClass::Query,
    }
}

pub fn is_show(sql: &str) -> bool {
    classify(sql) == StatementClass::Metadata
}

pub fn is_set(sql: &str) -> bool {
    classify(sql) == StatementClass::Set
}

pub fn is_use(sql: &str) -> bool {
    classify(sql) == StatementClass::Use
}

pub fn is_begin(sql: &str) -> bool {
    classify(sql) == StatementClass::Begin
}

pub fn is_commit(sql: &str) -> bool {
    classify(sql) == StatementClass::Commit
}

pub fn is_rollback(sql: &str) -> bool {
    classify(sql) == StatementClass::Rollback
}

/// Whether a statement will produce a resultset, as advertised in the
/// COM_STMT_PREPARE reply before any execution happens.
pub fn returns_rows(sql: &str) -> bool {
    matches!(
        leading_words(sql, 1).first().map(String::as_str),
        Some("SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "DESCRIBE" | "DESC" | "VALUES" | "TABLE")
    )
}

pub fn is_insert(sql: &str) -> bool {
    matches!(
        leading_words(sql, 1).first().map(String::as_str),
        Some("INSERT")
    )
}

/// Statements whose reply is an OK packet with an affected-rows count.
pub fn modifies_rows(sql: &str) -> bool {
    matches!(
        leading_words(sql, 1).first().map(String::as_str),
        Some("INSERT" | "UPDATE" | "DELETE" | "REPLACE" | "CREATE" | "DROP" | "ALTER" | "TRUNCATE")
    )
}

pub fn is_ddl(sql: &str) -> bool {
    matches!(
        leading_words(sql, 1).first().map(String::as_str),
        Some("CREATE" | "DROP" | "ALTER" | "TRUNCATE")
    )
}

/// `(schema, table)` targeted by an INSERT, read straight off the tokens.
pub fn insert_target_table(sql: &str) -> Option<(Option<String>, String)> {
    let toks = tokenize(sql);
    let mut idx = 0;
    if !toks.get(idx)?.is_word("INSERT") {
        return None;
    }
    idx += 1;
    if toks.get(idx)?.is_word("IGNORE") {
        idx += 1;
    }
    if toks.get(idx)?.is_word("INTO") {
        idx += 1;
    }
    qualified_name_at(sql, idx)
}

/// Table targeted by a DDL statement, for eager schema-cache invalidation.
pub fn ddl_target_table(sql: &str) -> Option<(Option<String>, String)> {
    let toks = tokenize(sql);
    let first = toks.first()?;
    let mut idx = 1;
    if first.is_word("TRUNCATE") {
        if toks.get(idx)?.is_word("TABLE") {
            idx += 1;
        }
        return qualified_name_at(sql, idx);
    }
    if !(first.is_word("CREATE") || first.is_word("DROP") || first.is_word("ALTER")) {
        return None;
    }
    if !toks.get(idx)?.is_word("TABLE") {
        return None;
    }
    idx += 1;
    // IF [NOT] EXISTS
    if toks.get(idx).map_or(false, |t| t.is_word("IF")) {
        idx += 1;
        if toks.get(idx).map_or(false, |t| t.is_word("NOT")) {
            idx += 1;
        }
        if toks.get(idx).map_or(false, |t| t.is_word("EXISTS")) {
            idx += 1;
        }
    }
    qualified_name_at(sql, idx)
}

fn qualified_name_at(sql: &str, idx: usize) -> Option<(Option<String>, String)> {
    let toks = tokenize(sql);
    let first = toks.get(idx)?;
    if !matches!(first.kind, TokKind::Word | TokKind::QuotedIdent) {
        return None;
    }
    let first_name = first.ident_text()?;
    if toks.get(idx + 1).map_or(false, |t| t.is_sym('.')) {
        let second = toks.get(idx + 2)?;
        return Some((Some(first_name), second.ident_text()?));
    }
    Some((None, first_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rw(sql: &str) -> Rewritten {
        Rewriter::new().rewrite(sql).unwrap()
    }

    #[test]
    fn test_create_insert_select_scenario() {
        let create = rw(
            "CREATE TABLE t (id INT AUTO_INCREMENT PRIMARY KEY, name VARCHAR(100), price DECIMAL(10,2))",
        );
        assert_eq!(
            create.pg_sql,
            "CREATE TABLE \"t\" (\"id\" SERIAL PRIMARY KEY, \"name\" VARCHAR(100), \"price\" NUMERIC(10,2))"
        );
        assert_eq!(create.param_count, 0);

        let insert = rw("INSERT INTO t (name, price) VALUES ('Widget', 99.99)");
        assert_eq!(
            insert.pg_sql,
            "INSERT INTO \"t\" (\"name\", \"price\") VALUES ('Widget', 99.99)"
        );

        let select = rw("SELECT id, name, price FROM t");
        assert_eq!(
            select.pg_sql,
            "SELECT \"id\", \"name\", \"price\" FROM \"t\""
        );
    }

    #[test]
    fn test_placeholder_remapping() {
        let out = rw("INSERT INTO t (name, price) VALUES (?, ?)");
        assert_eq!(
            out.pg_sql,
            "INSERT INTO \"t\" (\"name\", \"price\") VALUES ($1, $2)"
        );
        assert_eq!(out.param_count, 2);

        let out = rw("SELECT * FROM t WHERE a = ? AND b IN (?, ?) AND c = '?'");
        assert_eq!(out.param_count, 3);
        assert!(out.pg_sql.contains("$1"));
        assert!(out.pg_sql.contains("($2, $3)"));
        assert!(out.pg_sql.contains("'?'"));
    }

    #[test]
    fn test_limit_swap_scenario() {
        let out = rw("SELECT * FROM t LIMIT 5, 10");
        assert_eq!(out.pg_sql, "SELECT * FROM \"t\" LIMIT 10 OFFSET 5");
    }

    #[test]
    fn test_keyword_named_identifiers_survive() {
        let out = rw(
            "CREATE TABLE test_indexes (id INT PRIMARY KEY, indexes VARCHAR(100), \
             my_key_field VARCHAR(50), INDEX idx_name (indexes))",
        );
        assert_eq!(
            out.pg_sql,
            "CREATE TABLE \"test_indexes\" (\"id\" INTEGER PRIMARY KEY, \"indexes\" VARCHAR(100), \"my_key_field\" VARCHAR(50))"
        );
    }

    #[test]
    fn test_full_text_search_scenario() {
        let out = rw(
            "SELECT title FROM docs WHERE MATCH(title, content) AGAINST('MySQL' IN BOOLEAN MODE)",
        );
        assert_eq!(
            out.pg_sql,
            "SELECT \"title\" FROM \"docs\" WHERE to_tsvector('simple', \"title\" || ' ' || \"content\") @@ to_tsquery('simple', 'MySQL')"
        );
        assert_eq!(out.pg_sql.matches("@@").count(), 1);
    }

    #[test]
    fn test_lock_in_share_mode_parses() {
        let out = rw("SELECT * FROM t WHERE id = 1 LOCK IN SHARE MODE");
        assert_eq!(out.pg_sql, "SELECT * FROM \"t\" WHERE \"id\" = 1 FOR SHARE");
    }

    #[test]
    fn test_group_concat_with_separator() {
        let out = rw("SELECT GROUP_CONCAT(name SEPARATOR '; ') FROM t");
        assert_eq!(
            out.pg_sql,
            "SELECT STRING_AGG(\"name\", '; ') FROM \"t\""
        );
    }

    #[test]
    fn test_keyword_case_insensitive() {
        let lower = rw("select * from t limit 5, 10");
        let upper = rw("SELECT * FROM t LIMIT 5, 10");
        assert_eq!(lower.pg_sql, upper.pg_sql);
    }

    #[test]
    fn test_unsigned_boundary_types() {
        let out = rw(
            "CREATE TABLE r (a TINYINT UNSIGNED, b SMALLINT UNSIGNED, c INT UNSIGNED, d BIGINT UNSIGNED)",
        );
        assert_eq!(
            out.pg_sql,
            "CREATE TABLE \"r\" (\"a\" SMALLINT, \"b\" INTEGER, \"c\" BIGINT, \"d\" NUMERIC(20,0))"
        );
    }

    #[test]
    fn test_parse_error_carries_statement() {
        let err = Rewriter::new().rewrite("SELEC * FROM t").unwrap_err();
        match err {
            GatewayError::Rewrite { sql, .. } => assert_eq!(sql, "SELEC * FROM t"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_multi_statement_rejected() {
        assert!(Rewriter::new().rewrite("SELECT 1; SELECT 2").is_err());
    }

    #[test]
    fn test_classifiers() {
        assert_eq!(classify("SHOW TABLES"), StatementClass::Metadata);
        assert_eq!(classify("  describe t"), StatementClass::Metadata);
        assert_eq!(classify("SET autocommit=1"), StatementClass::Set);
        assert_eq!(classify("USE shop"), StatementClass::Use);
        assert_eq!(classify("BEGIN"), StatementClass::Begin);
        assert_eq!(classify("START TRANSACTION"), StatementClass::Begin);
        assert_eq!(classify("commit;"), StatementClass::Commit);
        assert_eq!(classify("ROLLBACK"), StatementClass::Rollback);
        assert_eq!(classify("SELECT 1"), StatementClass::Query);
        assert!(is_show("SHOW DATABASES"));
        assert!(is_begin("start transaction"));
        assert!(returns_rows("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!returns_rows("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn test_insert_target_table() {
        assert_eq!(
            insert_target_table("INSERT INTO t (a) VALUES (1)"),
            Some((None, "t".to_string()))
        );
        assert_eq!(
            insert_target_table("INSERT INTO `shop`.`orders` VALUES (1)"),
            Some((Some("shop".to_string()), "orders".to_string()))
        );
        assert_eq!(insert_target_table("UPDATE t SET a = 1"), None);
    }

    #[test]
    fn test_ddl_target_table() {
        assert_eq!(
            ddl_target_table("ALTER TABLE orders ADD COLUMN x INT"),
            Some((None, "orders".to_string()))
        );
        assert_eq!(
            ddl_target_table("DROP TABLE IF EXISTS shop.orders"),
            Some((Some("shop".to_string()), "orders".to_string()))
        );
        assert_eq!(
            ddl_target_table("TRUNCATE TABLE t"),
            Some((None, "t".to_string()))
        );
        assert_eq!(ddl_target_table("CREATE INDEX i ON t (a)"), None);
    }
}
