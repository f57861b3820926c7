//! Rewrites MySQL catalog commands (`SHOW`, `DESCRIBE`, `USE`, `SET`) into
//! information_schema/pg_catalog queries or locally synthesized rows whose
//! shape matches what MySQL clients expect.

use crate::protocol::mysql::basic::Field;
use crate::rewrite::postprocess::{tokenize, TokKind};
use crate::server::resultset::text_field;
use crate::translate::errors::GatewayError;
use crate::translate::types::quote_literal;

/// How a metadata statement is answered.
pub enum MetaOutcome {
    /// Run this SQL on the bound backend session and relay the rows.
    BackendSql(String),
    /// Serve these rows straight from the gateway.
    LocalRows {
        fields: Vec<Field>,
        rows: Vec<Vec<Option<String>>>,
    },
}

/// Session-state changes a `SET` statement asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetDirective {
    Autocommit(bool),
    Names(String),
    SessionVar(String, String),
    UserVar(String, String),
    /// GLOBAL scope and anything else the gateway accepts as a no-op.
    Ignored,
}

fn schema_expr(database: &str) -> String {
    if database.is_empty() {
        "current_schema()".to_string()
    } else {
        quote_literal(database)
    }
}

/// Static variable table behind `SHOW VARIABLES`; `autocommit` is patched
/// in per session.
fn server_variables() -> &'static [(&'static str, &'static str)] {
    &[
        ("character_set_client", "utf8mb4"),
        ("character_set_connection", "utf8mb4"),
        ("character_set_database", "utf8mb4"),
        ("character_set_results", "utf8mb4"),
        ("character_set_server", "utf8mb4"),
        ("collation_connection", "utf8mb4_general_ci"),
        ("collation_database", "utf8mb4_general_ci"),
        ("collation_server", "utf8mb4_general_ci"),
        ("interactive_timeout", "28800"),
        ("lower_case_table_names", "0"),
        ("max_allowed_packet", "67108864"),
        (
            "sql_mode",
            "ONLY_FULL_GROUP_BY,STRICT_TRANS_TABLES,NO_ZERO_IN_DATE,NO_ZERO_DATE,ERROR_FOR_DIVISION_BY_ZERO,NO_ENGINE_SUBSTITUTION",
        ),
        ("version", "8.0.35"),
        ("version_comment", "pg-gateway"),
        ("wait_timeout", "28800"),
    ]
}

fn status_variables() -> &'static [(&'static str, &'static str)] {
    &[
        ("Questions", "0"),
        ("Threads_connected", "1"),
        ("Uptime", "0"),
    ]
}

/// `%` / `_` pattern matching, case-insensitive, for `SHOW … LIKE`.
pub fn like_match(pattern: &str, value: &str) -> bool {
    fn inner(p: &[u8], v: &[u8]) -> bool {
        match (p.first(), v.first()) {
            (None, None) => true,
            (Some(b'%'), _) => inner(&p[1..], v) || (!v.is_empty() && inner(p, &v[1..])),
            (Some(b'_'), Some(_)) => inner(&p[1..], &v[1..]),
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b) && inner(&p[1..], &v[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), value.as_bytes())
}

/// Translate a `SHOW …` / `DESCRIBE …` statement.
pub fn emulate_show(
    sql: &str,
    current_db: &str,
    autocommit: bool,
) -> Result<MetaOutcome, GatewayError> {
    let toks = tokenize(sql);
    let word = |idx: usize| -> Option<String> {
        toks.get(idx).and_then(|t| {
            if t.kind == TokKind::Word {
                Some(t.text.to_ascii_uppercase())
            } else {
                None
            }
        })
    };
    let first = word(0).unwrap_or_default();

    if first == "DESCRIBE" || first == "DESC" {
        let table = toks
            .get(1)
            .and_then(|t| t.ident_text())
            .ok_or_else(|| unsupported(sql))?;
        return Ok(MetaOutcome::BackendSql(columns_query(current_db, &table)));
    }

    if first != "SHOW" {
        return Err(unsupported(sql));
    }

    // SHOW FULL TABLES / SHOW FULL COLUMNS
    let mut idx = 1;
    if word(idx).as_deref() == Some("FULL") {
        idx += 1;
    }
    // scope words are accepted and ignored
    if matches!(word(idx).as_deref(), Some("GLOBAL") | Some("SESSION")) {
        idx += 1;
    }
    let subject = word(idx).unwrap_or_default();
    idx += 1;

    match subject.as_str() {
        "DATABASES" | "SCHEMAS" => Ok(MetaOutcome::BackendSql(
            "SELECT schema_name AS \"Database\" FROM information_schema.schemata \
             WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast') \
             ORDER BY schema_name"
                .to_string(),
        )),
        "TABLES" => {
            let mut database = current_db.to_string();
            if matches!(word(idx).as_deref(), Some("FROM") | Some("IN")) {
                database = toks
                    .get(idx + 1)
                    .and_then(|t| t.ident_text())
                    .ok_or_else(|| unsupported(sql))?;
                idx += 2;
            }
            let display = if database.is_empty() {
                "public".to_string()
            } else {
                database.clone()
            };
            let mut query = format!(
                "SELECT table_name AS \"Tables_in_{display}\" FROM information_schema.tables \
                 WHERE table_schema = {}",
                schema_expr(&database)
            );
            if let Some(pattern) = like_pattern(&toks, idx) {
                query.push_str(&format!(" AND table_name LIKE {}", quote_literal(&pattern)));
            }
            query.push_str(" ORDER BY table_name");
            Ok(MetaOutcome::BackendSql(query))
        }
        "COLUMNS" | "FIELDS" => {
            if !matches!(word(idx).as_deref(), Some("FROM") | Some("IN")) {
                return Err(unsupported(sql));
            }
            let table = toks
                .get(idx + 1)
                .and_then(|t| t.ident_text())
                .ok_or_else(|| unsupported(sql))?;
            idx += 2;
            let mut database = current_db.to_string();
            if matches!(word(idx).as_deref(), Some("FROM") | Some("IN")) {
                database = toks
                    .get(idx + 1)
                    .and_then(|t| t.ident_text())
                    .ok_or_else(|| unsupported(sql))?;
            }
            Ok(MetaOutcome::BackendSql(columns_query(&database, &table)))
        }
        "INDEX" | "INDEXES" | "KEYS" => {
            if !matches!(word(idx).as_deref(), Some("FROM") | Some("IN")) {
                return Err(unsupported(sql));
            }
            let table = toks
                .get(idx + 1)
                .and_then(|t| t.ident_text())
                .ok_or_else(|| unsupported(sql))?;
            Ok(MetaOutcome::BackendSql(index_query(current_db, &table)))
        }
        "VARIABLES" => {
            let pattern = like_pattern(&toks, idx);
            let fields = vec![text_field("Variable_name"), text_field("Value")];
            let mut rows: Vec<Vec<Option<String>>> = server_variables()
                .iter()
                .map(|(name, value)| {
                    vec![Some((*name).to_string()), Some((*value).to_string())]
                })
                .collect();
            rows.push(vec![
                Some("autocommit".to_string()),
                Some(if autocommit { "ON" } else { "OFF" }.to_string()),
            ]);
            rows.sort();
            if let Some(pattern) = pattern {
                rows.retain(|row| {
                    row[0]
                        .as_deref()
                        .map_or(false, |name| like_match(&pattern, name))
                });
            }
            Ok(MetaOutcome::LocalRows { fields, rows })
        }
        "STATUS" => {
            let pattern = like_pattern(&toks, idx);
            let fields = vec![text_field("Variable_name"), text_field("Value")];
            let mut rows: Vec<Vec<Option<String>>> = status_variables()
                .iter()
                .map(|(name, value)| {
                    vec![Some((*name).to_string()), Some((*value).to_string())]
                })
                .collect();
            if let Some(pattern) = pattern {
                rows.retain(|row| {
                    row[0]
                        .as_deref()
                        .map_or(false, |name| like_match(&pattern, name))
                });
            }
            Ok(MetaOutcome::LocalRows { fields, rows })
        }
        "WARNINGS" => Ok(MetaOutcome::LocalRows {
            fields: vec![
                text_field("Level"),
                text_field("Code"),
                text_field("Message"),
            ],
            rows: vec![],
        }),
        _ => Err(unsupported(sql)),
    }
}

fn unsupported(sql: &str) -> GatewayError {
    GatewayError::Unsupported(sql.trim().to_string())
}

fn like_pattern(toks: &[crate::rewrite::postprocess::Tok<'_>], idx: usize) -> Option<String> {
    let like = toks.get(idx)?;
    if !like.is_word("LIKE") {
        return None;
    }
    let pattern = toks.get(idx + 1)?;
    if pattern.kind != TokKind::Str || pattern.text.len() < 2 {
        return None;
    }
    Some(pattern.text[1..pattern.text.len() - 1].replace("''", "'"))
}

/// The six-column `(Field, Type, Null, Key, Default, Extra)` shape of
/// `SHOW COLUMNS` / `DESCRIBE`.
fn columns_query(database: &str, table: &str) -> String {
    let schema = schema_expr(database);
    let table = quote_literal(table);
    format!(
        "SELECT c.column_name AS \"Field\", c.data_type AS \"Type\", \
         CASE WHEN c.is_nullable = 'YES' THEN 'YES' ELSE 'NO' END AS \"Null\", \
         CASE WHEN pk.column_name IS NOT NULL THEN 'PRI' ELSE '' END AS \"Key\", \
         c.column_default AS \"Default\", \
         CASE WHEN c.column_default LIKE 'nextval%' THEN 'auto_increment' ELSE '' END AS \"Extra\" \
         FROM information_schema.columns c \
         LEFT JOIN (SELECT kcu.column_name FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
         ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
         WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = {schema} \
         AND tc.table_name = {table}) pk ON pk.column_name = c.column_name \
         WHERE c.table_schema = {schema} AND c.table_name = {table} \
         ORDER BY c.ordinal_position"
    )
}

/// The twelve-column MySQL `SHOW INDEX` shape, synthesized from pg_indexes.
fn index_query(database: &str, table: &str) -> String {
    let schema = schema_expr(database);
    let table_lit = quote_literal(table);
    format!(
        "SELECT tablename AS \"Table\", \
         CASE WHEN indexdef LIKE '%UNIQUE%' THEN 0 ELSE 1 END AS \"Non_unique\", \
         indexname AS \"Key_name\", 1 AS \"Seq_in_index\", '' AS \"Column_name\", \
         'A' AS \"Collation\", 0 AS \"Cardinality\", NULL AS \"Sub_part\", \
         NULL AS \"Packed\", '' AS \"Null\", 'BTREE' AS \"Index_type\", '' AS \"Comment\" \
         FROM pg_indexes WHERE schemaname = {schema} AND tablename = {table_lit}"
    )
}

/// Parse every assignment of a `SET` statement.
pub fn parse_set(sql: &str) -> Vec<SetDirective> {
    let toks = tokenize(sql);
    if !toks.first().map_or(false, |t| t.is_word("SET")) {
        return vec![];
    }
    // split the assignments on top-level commas
    let mut segments: Vec<(usize, usize)> = Vec::new();
    let mut depth = 0usize;
    let mut seg_start = 1;
    for (idx, t) in toks.iter().enumerate().skip(1) {
        if t.is_sym('(') {
            depth += 1;
        } else if t.is_sym(')') {
            depth = depth.saturating_sub(1);
        } else if t.is_sym(',') && depth == 0 {
            segments.push((seg_start, idx));
            seg_start = idx + 1;
        }
    }
    segments.push((seg_start, toks.len()));

    segments
        .into_iter()
        .filter(|(start, end)| end > start)
        .map(|(start, end)| parse_assignment(sql, &toks[start..end]))
        .collect()
}

fn parse_assignment(sql: &str, toks: &[crate::rewrite::postprocess::Tok<'_>]) -> SetDirective {
    let Some(first) = toks.first() else {
        return SetDirective::Ignored;
    };

    if first.is_word("NAMES") {
        let charset = toks
            .get(1)
            .and_then(|t| match t.kind {
                TokKind::Str => Some(t.text[1..t.text.len() - 1].to_string()),
                _ => t.ident_text(),
            })
            .unwrap_or_default();
        return SetDirective::Names(charset.to_lowercase());
    }

    // user variable: @name = value
    if first.is_sym('@') && toks.get(1).map_or(false, |t| !t.is_sym('@')) {
        let Some(name) = toks.get(1).and_then(|t| t.ident_text()) else {
            return SetDirective::Ignored;
        };
        return match assignment_value(sql, toks, 2) {
            Some(value) => SetDirective::UserVar(name.to_lowercase(), value),
            None => SetDirective::Ignored,
        };
    }

    // system variable: @@[scope.]name = value
    if first.is_sym('@') && toks.get(1).map_or(false, |t| t.is_sym('@')) {
        let mut idx = 2;
        let mut global = false;
        if toks.get(idx).map_or(false, |t| t.is_word("GLOBAL"))
            || toks.get(idx).map_or(false, |t| t.is_word("SESSION"))
        {
            global = toks[idx].is_word("GLOBAL");
            idx += 1;
            if toks.get(idx).map_or(false, |t| t.is_sym('.')) {
                idx += 1;
            }
        }
        let Some(name) = toks.get(idx).and_then(|t| t.ident_text()) else {
            return SetDirective::Ignored;
        };
        if global {
            return SetDirective::Ignored;
        }
        return system_var_directive(&name, assignment_value(sql, toks, idx + 1));
    }

    // bare: [GLOBAL|SESSION] name = value
    let mut idx = 0;
    let mut global = false;
    if first.is_word("GLOBAL") || first.is_word("SESSION") {
        global = first.is_word("GLOBAL");
        idx = 1;
    }
    let Some(name) = toks.get(idx).and_then(|t| t.ident_text()) else {
        return SetDirective::Ignored;
    };
    if global {
        return SetDirective::Ignored;
    }
    system_var_directive(&name, assignment_value(sql, toks, idx + 1))
}

fn system_var_directive(name: &str, value: Option<String>) -> SetDirective {
    let Some(value) = value else {
        return SetDirective::Ignored;
    };
    let lower = name.to_lowercase();
    if lower == "autocommit" {
        let on = matches!(value.to_uppercase().as_str(), "1" | "ON" | "TRUE");
        return SetDirective::Autocommit(on);
    }
    SetDirective::SessionVar(lower, value)
}

/// Everything right of the `=`, as one trimmed string with outer quotes
/// removed from a single string literal.
fn assignment_value(
    sql: &str,
    toks: &[crate::rewrite::postprocess::Tok<'_>],
    eq_idx: usize,
) -> Option<String> {
    let eq = toks.get(eq_idx)?;
    if !(eq.is_sym('=') || eq.is_sym(':')) {
        return None;
    }
    // `:=` arrives as two symbols
    let value_start = if eq.is_sym(':') { eq_idx + 2 } else { eq_idx + 1 };
    let first = toks.get(value_start)?;
    let last = toks.last()?;
    let raw = sql.get(first.start..last.end)?.trim();
    if first.kind == TokKind::Str && value_start == toks.len() - 1 && raw.len() >= 2 {
        return Some(raw[1..raw.len() - 1].replace("''", "'"));
    }
    Some(raw.to_string())
}

/// Database named by a `USE` statement.
pub fn use_target(sql: &str) -> Option<String> {
    let toks = tokenize(sql);
    if !toks.first()?.is_word("USE") {
        return None;
    }
    toks.get(1)?.ident_text()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_databases_excludes_catalogs() {
        let MetaOutcome::BackendSql(sql) = emulate_show("SHOW DATABASES", "", true).unwrap()
        else {
            panic!("expected backend sql")
        };
        assert!(sql.contains("\"Database\""));
        assert!(sql.contains("'pg_catalog'"));
        assert!(sql.contains("'information_schema'"));
        assert!(sql.contains("'pg_toast'"));
    }

    #[test]
    fn test_show_tables_alias_and_like() {
        let MetaOutcome::BackendSql(sql) =
            emulate_show("SHOW TABLES FROM shop LIKE 'ord%'", "", true).unwrap()
        else {
            panic!("expected backend sql")
        };
        assert!(sql.contains("\"Tables_in_shop\""));
        assert!(sql.contains("table_schema = 'shop'"));
        assert!(sql.contains("LIKE 'ord%'"));
    }

    #[test]
    fn test_describe_six_columns() {
        let MetaOutcome::BackendSql(sql) = emulate_show("DESCRIBE orders", "shop", true).unwrap()
        else {
            panic!("expected backend sql")
        };
        for alias in ["Field", "Type", "Null", "Key", "Default", "Extra"] {
            assert!(sql.contains(&format!("\"{alias}\"")), "{alias}");
        }
        assert!(sql.contains("'auto_increment'"));
        assert!(sql.contains("'PRI'"));
        assert!(sql.contains("table_schema = 'shop'"));
    }

    #[test]
    fn test_show_index_twelve_columns() {
        let MetaOutcome::BackendSql(sql) =
            emulate_show("SHOW INDEX FROM orders", "shop", true).unwrap()
        else {
            panic!("expected backend sql")
        };
        assert!(sql.contains("pg_indexes"));
        assert_eq!(sql.matches(" AS \"").count(), 12);
    }

    #[test]
    fn test_show_variables_like_filters() {
        let MetaOutcome::LocalRows { fields, rows } =
            emulate_show("SHOW VARIABLES LIKE 'character_set%'", "", true).unwrap()
        else {
            panic!("expected local rows")
        };
        assert_eq!(fields.len(), 2);
        assert!(!rows.is_empty());
        assert!(rows
            .iter()
            .all(|r| r[0].as_deref().unwrap().starts_with("character_set")));
    }

    #[test]
    fn test_show_variables_autocommit_tracks_session() {
        let MetaOutcome::LocalRows { rows, .. } =
            emulate_show("SHOW VARIABLES LIKE 'autocommit'", "", false).unwrap()
        else {
            panic!("expected local rows")
        };
        assert_eq!(rows[0][1].as_deref(), Some("OFF"));
    }

    #[test]
    fn test_show_warnings_empty() {
        let MetaOutcome::LocalRows { fields, rows } =
            emulate_show("SHOW WARNINGS", "", true).unwrap()
        else {
            panic!("expected local rows")
        };
        assert_eq!(fields.len(), 3);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_unknown_show_is_unsupported() {
        assert!(emulate_show("SHOW ENGINES", "", true).is_err());
    }

    #[test]
    fn test_like_match() {
        assert!(like_match("character_set%", "character_set_client"));
        assert!(like_match("Ver_ion", "version"));
        assert!(like_match("%time%", "wait_timeout"));
        assert!(!like_match("versio_", "version_comment"));
    }

    #[test]
    fn test_parse_set_autocommit() {
        assert_eq!(
            parse_set("SET autocommit=1"),
            vec![SetDirective::Autocommit(true)]
        );
        assert_eq!(
            parse_set("SET AUTOCOMMIT = OFF"),
            vec![SetDirective::Autocommit(false)]
        );
        assert_eq!(
            parse_set("SET @@autocommit = 0"),
            vec![SetDirective::Autocommit(false)]
        );
    }

    #[test]
    fn test_parse_set_variables() {
        assert_eq!(
            parse_set("SET @@sql_select_limit = 100"),
            vec![SetDirective::SessionVar(
                "sql_select_limit".to_string(),
                "100".to_string()
            )]
        );
        assert_eq!(
            parse_set("SET @greeting = 'hi'"),
            vec![SetDirective::UserVar(
                "greeting".to_string(),
                "hi".to_string()
            )]
        );
        assert_eq!(
            parse_set("SET @@GLOBAL.max_connections = 10"),
            vec![SetDirective::Ignored]
        );
        assert_eq!(
            parse_set("SET NAMES utf8mb4"),
            vec![SetDirective::Names("utf8mb4".to_string())]
        );
    }

    #[test]
    fn test_parse_set_multiple_assignments() {
        let directives = parse_set("SET autocommit=0, @@wait_timeout=60");
        assert_eq!(
            directives,
            vec![
                SetDirective::Autocommit(false),
                SetDirective::SessionVar("wait_timeout".to_string(), "60".to_string()),
            ]
        );
    }

    #[test]
    fn test_use_target() {
        assert_eq!(use_target("USE shop"), Some("shop".to_string()));
        assert_eq!(use_target("use `shop`"), Some("shop".to_string()));
        assert_eq!(use_target("SELECT 1"), None);
    }
}
