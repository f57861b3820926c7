//! The semantic half of the rewrite pipeline: everything that must stay
//! identifier-safe happens here, on the parsed tree. Purely textual
//! touch-ups are left to `postprocess`.

use hashbrown::HashMap;
use itertools::Itertools;
use sqlparser::ast::{
    CharacterLength, ColumnOption, CreateTable, DataType, ExactNumberInfo, Expr, Function,
    FunctionArg, FunctionArgExpr, FunctionArguments, Ident, KeyOrIndexDisplay, ObjectName,
    Statement, TableConstraint, TableFactor, TimezoneInfo, Value, VisitorMut,
};
use std::ops::ControlFlow;

pub struct DialectVisitor<'a> {
    renames: &'a HashMap<&'static str, &'static str>,
    /// Serial order of positional parameter markers, in visit order.
    pub placeholder_count: u16,
    /// Sticky error; once set, descent stops.
    pub error: Option<String>,
}

impl<'a> DialectVisitor<'a> {
    pub fn new(renames: &'a HashMap<&'static str, &'static str>) -> Self {
        Self {
            renames,
            placeholder_count: 0,
            error: None,
        }
    }

    fn rewrite_function(&mut self, expr: &mut Expr) {
        let Expr::Function(func) = expr else {
            return;
        };
        let Some(name_ident) = func.name.0.last() else {
            return;
        };
        let upper = name_ident.value.to_ascii_uppercase();
        if upper == "IF" {
            match take_three_args(func) {
                Some((cond, then_value, else_value)) => {
                    *expr = Expr::Case {
                        operand: None,
                        conditions: vec![cond],
                        results: vec![then_value],
                        else_result: Some(Box::new(else_value)),
                    };
                }
                None => {
                    self.error = Some("IF() takes exactly three plain arguments".to_string());
                }
            }
            return;
        }
        if let Some(replacement) = self.renames.get(upper.as_str()) {
            func.name = ObjectName(vec![Ident::new(*replacement)]);
        }
    }

    fn rewrite_create_table(&mut self, ct: &mut CreateTable) {
        quote_object_name(&mut ct.name);
        for col in &mut ct.columns {
            quote_ident(&mut col.name);
            col.data_type = translate_data_type(col.data_type.clone());
            // column charsets and comments have no PostgreSQL rendering
            col.options.retain(|def| {
                !matches!(
                    def.option,
                    ColumnOption::CharacterSet(_) | ColumnOption::Comment(_)
                )
            });
        }
        // PostgreSQL has no inline index syntax
        ct.constraints.retain(|c| {
            !matches!(
                c,
                TableConstraint::Index { .. } | TableConstraint::FulltextOrSpatial { .. }
            )
        });
        for constraint in &mut ct.constraints {
            match constraint {
                TableConstraint::Unique {
                    name,
                    index_name,
                    index_type_display,
                    columns,
                    ..
                } => {
                    // PostgreSQL rejects named inline UNIQUE constraints
                    *name = None;
                    *index_name = None;
                    *index_type_display = KeyOrIndexDisplay::None;
                    columns.iter_mut().for_each(quote_ident);
                }
                TableConstraint::PrimaryKey { columns, .. } => {
                    columns.iter_mut().for_each(quote_ident);
                }
                TableConstraint::ForeignKey {
                    columns,
                    foreign_table,
                    referred_columns,
                    ..
                } => {
                    columns.iter_mut().for_each(quote_ident);
                    quote_object_name(foreign_table);
                    referred_columns.iter_mut().for_each(quote_ident);
                }
                _ => {}
            }
        }
    }
}

impl VisitorMut for DialectVisitor<'_> {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &mut Statement) -> ControlFlow<()> {
        if self.error.is_some() {
            return ControlFlow::Break(());
        }
        match statement {
            Statement::CreateTable(ct) => self.rewrite_create_table(ct),
            Statement::Insert(ins) => {
                quote_object_name(&mut ins.table_name);
                ins.columns.iter_mut().for_each(quote_ident);
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &mut ObjectName) -> ControlFlow<()> {
        quote_object_name(relation);
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &mut TableFactor) -> ControlFlow<()> {
        match table_factor {
            TableFactor::Table {
                alias: Some(alias), ..
            }
            | TableFactor::Derived {
                alias: Some(alias), ..
            } => quote_ident(&mut alias.name),
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<()> {
        if self.error.is_some() {
            return ControlFlow::Break(());
        }
        match expr {
            Expr::Value(Value::Placeholder(p)) if p == "?" => {
                self.placeholder_count += 1;
            }
            // MySQL double-quoted strings are strings, not identifiers
            Expr::Value(Value::DoubleQuotedString(s)) => {
                *expr = Expr::Value(Value::SingleQuotedString(std::mem::take(s)));
            }
            Expr::Identifier(id) => quote_ident(id),
            Expr::CompoundIdentifier(ids) => ids.iter_mut().for_each(quote_ident),
            Expr::MatchAgainst { columns, .. } => columns.iter_mut().for_each(quote_ident),
            Expr::Function(_) => self.rewrite_function(expr),
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn quote_ident(id: &mut Ident) {
    // emitted as backticks; the post-process turns them into double quotes
    if id.quote_style.is_none() {
        id.quote_style = Some('`');
    }
}

fn quote_object_name(name: &mut ObjectName) {
    name.0.iter_mut().for_each(quote_ident);
}

fn take_three_args(func: &mut Function) -> Option<(Expr, Expr, Expr)> {
    let FunctionArguments::List(list) = &mut func.args else {
        return None;
    };
    if list.args.len() != 3
        || !list
            .args
            .iter()
            .all(|a| matches!(a, FunctionArg::Unnamed(FunctionArgExpr::Expr(_))))
    {
        return None;
    }
    let mut drained = list.args.drain(..).map(|a| match a {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => e,
        _ => unreachable!("checked above"),
    });
    let cond = drained.next()?;
    let then_value = drained.next()?;
    let else_value = drained.next()?;
    Some((cond, then_value, else_value))
}

fn varchar(length: u64) -> DataType {
    DataType::Varchar(Some(CharacterLength::IntegerLength { length, unit: None }))
}

/// Integer/unsigned reshaping plus the temporal and enum substitutions.
/// Types the text stage rewrites (BLOB, TEXT variants, JSON, DOUBLE) pass
/// through unchanged here.
fn translate_data_type(dt: DataType) -> DataType {
    match dt {
        DataType::TinyInt(_) | DataType::UnsignedTinyInt(_) => DataType::SmallInt(None),
        DataType::SmallInt(_) => DataType::SmallInt(None),
        DataType::UnsignedSmallInt(_) => DataType::Integer(None),
        DataType::MediumInt(_) => DataType::Integer(None),
        DataType::UnsignedMediumInt(_) => DataType::BigInt(None),
        DataType::Int(_) | DataType::Integer(_) => DataType::Integer(None),
        DataType::UnsignedInt(_) | DataType::UnsignedInteger(_) => DataType::BigInt(None),
        DataType::BigInt(_) => DataType::BigInt(None),
        DataType::UnsignedBigInt(_) => {
            DataType::Numeric(ExactNumberInfo::PrecisionAndScale(20, 0))
        }
        DataType::Datetime(_) => DataType::Timestamp(None, TimezoneInfo::None),
        DataType::Decimal(info) => DataType::Numeric(info),
        DataType::Enum(..) => varchar(50),
        DataType::Binary(_) | DataType::Varbinary(_) => DataType::Bytea,
        DataType::Custom(name, args) => translate_custom_type(name, args),
        other => other,
    }
}

/// Types the MySQL grammar knows but the parser surfaces as custom names.
fn translate_custom_type(name: ObjectName, args: Vec<String>) -> DataType {
    let joined = name
        .0
        .iter()
        .map(|i| i.value.to_ascii_uppercase())
        .join(".");
    match joined.as_str() {
        "YEAR" => DataType::SmallInt(None),
        "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => DataType::Blob(None),
        _ => DataType::Custom(name, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::ast::VisitMut;
    use sqlparser::dialect::MySqlDialect;
    use sqlparser::parser::Parser;

    fn visit(sql: &str) -> (String, DialectVisitor<'static>) {
        static RENAMES: std::sync::OnceLock<HashMap<&'static str, &'static str>> =
            std::sync::OnceLock::new();
        let renames = RENAMES.get_or_init(crate::rewrite::function_renames);
        let mut stmts = Parser::parse_sql(&MySqlDialect {}, sql).unwrap();
        let mut stmt = stmts.remove(0);
        let mut visitor = DialectVisitor::new(renames);
        let _ = stmt.visit(&mut visitor);
        (stmt.to_string(), visitor)
    }

    #[test]
    fn test_placeholder_counting() {
        let (_, v) = visit("SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(v.placeholder_count, 2);
    }

    #[test]
    fn test_function_renames() {
        let (sql, _) = visit("SELECT NOW(), IFNULL(a, 0), POW(2, 3), RAND()");
        assert!(sql.contains("CURRENT_TIMESTAMP()"));
        assert!(sql.contains("COALESCE(`a`, 0)"));
        assert!(sql.contains("POWER(2, 3)"));
        assert!(sql.contains("RANDOM()"));
    }

    #[test]
    fn test_if_becomes_case() {
        let (sql, v) = visit("SELECT IF(a > 1, 'big', 'small') FROM t");
        assert!(v.error.is_none());
        assert!(sql.contains("CASE WHEN `a` > 1 THEN 'big' ELSE 'small' END"));
    }

    #[test]
    fn test_create_table_reshapes() {
        let (sql, _) = visit(
            "CREATE TABLE t (a TINYINT, b SMALLINT UNSIGNED, c MEDIUMINT, d INT UNSIGNED, \
             e BIGINT UNSIGNED, f DATETIME, g DECIMAL(10,2), h ENUM('x','y'), i YEAR)",
        );
        assert!(sql.contains("`a` SMALLINT"));
        assert!(sql.contains("`b` INTEGER"));
        assert!(sql.contains("`c` INTEGER"));
        assert!(sql.contains("`d` BIGINT"));
        assert!(sql.contains("`e` NUMERIC(20,0)"));
        assert!(sql.contains("`f` TIMESTAMP"));
        assert!(sql.contains("`g` NUMERIC(10,2)"));
        assert!(sql.contains("`h` VARCHAR(50)"));
        assert!(sql.contains("`i` SMALLINT"));
    }

    #[test]
    fn test_inline_index_filtered_identifier_kept() {
        let (sql, _) = visit(
            "CREATE TABLE test_indexes (id INT PRIMARY KEY, indexes VARCHAR(100), \
             my_key_field VARCHAR(50), INDEX idx_name (indexes))",
        );
        assert!(sql.contains("`indexes` VARCHAR(100)"));
        assert!(sql.contains("`my_key_field` VARCHAR(50)"));
        assert!(!sql.contains("idx_name"));
        assert!(sql.contains("`id` INTEGER PRIMARY KEY"));
    }

    #[test]
    fn test_named_unique_loses_name() {
        let (sql, _) = visit("CREATE TABLE t (a INT, UNIQUE KEY uq_a (a))");
        assert!(!sql.contains("uq_a"));
        assert!(sql.contains("UNIQUE (`a`)"));
    }

    #[test]
    fn test_double_quoted_string_becomes_single() {
        let (sql, _) = visit("SELECT \"hello\" FROM t");
        assert!(sql.contains("'hello'"));
    }
}
