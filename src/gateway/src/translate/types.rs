use crate::protocol::mysql::binary::BinValue;
use crate::protocol::mysql::{BINARY_COLLATION, UTF8_GENERAL_CI};

use chrono::NaiveDateTime;
use mysql_common::constants::{ColumnFlags, ColumnType};

/// PostgreSQL catalog type OIDs the gateway can meet in a row description.
pub mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const CHAR: u32 = 18;
    pub const NAME: u32 = 19;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const OID: u32 = 26;
    pub const JSON: u32 = 114;
    pub const XML: u32 = 142;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const BPCHAR: u32 = 1042;
    pub const VARCHAR: u32 = 1043;
    pub const DATE: u32 = 1082;
    pub const TIME: u32 = 1083;
    pub const TIMESTAMP: u32 = 1114;
    pub const TIMESTAMPTZ: u32 = 1184;
    pub const INTERVAL: u32 = 1186;
    pub const NUMERIC: u32 = 1700;
    pub const UUID: u32 = 2950;
    pub const JSONB: u32 = 3802;
}

/// The MySQL-side description of one projected column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnProjection {
    pub tag: ColumnType,
    pub charset: u16,
    pub column_length: u32,
    pub decimals: u8,
    pub flags: ColumnFlags,
}

/// Display width used when the type modifier carries no information.
/// Never zero; the drivers treat a zero column length as malformed.
pub fn default_display_len(tag: ColumnType) -> u32 {
    match tag {
        ColumnType::MYSQL_TYPE_TINY => 4,
        ColumnType::MYSQL_TYPE_SHORT => 6,
        ColumnType::MYSQL_TYPE_INT24 | ColumnType::MYSQL_TYPE_LONG => 11,
        ColumnType::MYSQL_TYPE_LONGLONG => 20,
        ColumnType::MYSQL_TYPE_FLOAT => 12,
        ColumnType::MYSQL_TYPE_DOUBLE => 22,
        ColumnType::MYSQL_TYPE_DATE => 10,
        ColumnType::MYSQL_TYPE_TIME => 8,
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_TIMESTAMP => 19,
        ColumnType::MYSQL_TYPE_YEAR => 4,
        ColumnType::MYSQL_TYPE_VARCHAR
        | ColumnType::MYSQL_TYPE_VAR_STRING
        | ColumnType::MYSQL_TYPE_STRING => 255,
        ColumnType::MYSQL_TYPE_BLOB | ColumnType::MYSQL_TYPE_TINY_BLOB => 65_535,
        ColumnType::MYSQL_TYPE_MEDIUM_BLOB => 16_777_215,
        ColumnType::MYSQL_TYPE_LONG_BLOB | ColumnType::MYSQL_TYPE_JSON => 4_294_967_295,
        ColumnType::MYSQL_TYPE_NEWDECIMAL | ColumnType::MYSQL_TYPE_DECIMAL => 10,
        _ => 255,
    }
}

/// Decode precision and scale from a `numeric` type modifier.
/// typmod = (precision << 16 | scale) + 4, -1 when unconstrained.
pub fn numeric_precision_scale(typmod: i32) -> Option<(u16, u16)> {
    if typmod < 4 {
        return None;
    }
    let packed = (typmod - 4) as u32;
    Some((((packed >> 16) & 0xFFFF) as u16, (packed & 0xFFFF) as u16))
}

/// Display length of a varchar/bpchar column from its type modifier.
fn char_display_len(typmod: i32) -> u32 {
    if typmod > 4 {
        (typmod - 4) as u32
    } else {
        65_535
    }
}

/// Map one PostgreSQL column (OID + type modifier) to its MySQL wire shape.
pub fn project_column(type_oid: u32, typmod: i32) -> ColumnProjection {
    let binary_flags = ColumnFlags::BINARY_FLAG | ColumnFlags::NOT_NULL_FLAG;
    match type_oid {
        oid::BOOL => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_TINY,
            charset: BINARY_COLLATION,
            column_length: default_display_len(ColumnType::MYSQL_TYPE_TINY),
            decimals: 0,
            flags: binary_flags,
        },
        oid::INT2 => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_SHORT,
            charset: BINARY_COLLATION,
            column_length: default_display_len(ColumnType::MYSQL_TYPE_SHORT),
            decimals: 0,
            flags: binary_flags,
        },
        oid::INT4 | oid::OID => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_LONG,
            charset: BINARY_COLLATION,
            column_length: default_display_len(ColumnType::MYSQL_TYPE_LONG),
            decimals: 0,
            flags: binary_flags,
        },
        oid::INT8 => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_LONGLONG,
            charset: BINARY_COLLATION,
            column_length: default_display_len(ColumnType::MYSQL_TYPE_LONGLONG),
            decimals: 0,
            flags: binary_flags,
        },
        oid::FLOAT4 => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_FLOAT,
            charset: BINARY_COLLATION,
            column_length: default_display_len(ColumnType::MYSQL_TYPE_FLOAT),
            decimals: 31,
            flags: binary_flags,
        },
        oid::FLOAT8 => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_DOUBLE,
            charset: BINARY_COLLATION,
            column_length: default_display_len(ColumnType::MYSQL_TYPE_DOUBLE),
            decimals: 31,
            flags: binary_flags,
        },
        oid::NUMERIC => {
            let (column_length, decimals) = match numeric_precision_scale(typmod) {
                Some((precision, scale)) => (
                    precision as u32 + if scale > 0 { 1 } else { 0 },
                    scale as u8,
                ),
                None => (default_display_len(ColumnType::MYSQL_TYPE_NEWDECIMAL), 0),
            };
            ColumnProjection {
                tag: ColumnType::MYSQL_TYPE_NEWDECIMAL,
                charset: BINARY_COLLATION,
                column_length,
                decimals,
                flags: binary_flags,
            }
        }
        oid::VARCHAR => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_VAR_STRING,
            charset: UTF8_GENERAL_CI,
            column_length: char_display_len(typmod),
            decimals: 0,
            flags: ColumnFlags::empty(),
        },
        oid::BPCHAR | oid::CHAR | oid::NAME => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_STRING,
            charset: UTF8_GENERAL_CI,
            column_length: char_display_len(typmod),
            decimals: 0,
            flags: ColumnFlags::empty(),
        },
        oid::BYTEA => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_BLOB,
            charset: BINARY_COLLATION,
            column_length: default_display_len(ColumnType::MYSQL_TYPE_BLOB),
            decimals: 0,
            flags: ColumnFlags::BINARY_FLAG | ColumnFlags::BLOB_FLAG,
        },
        oid::JSON | oid::JSONB => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_JSON,
            charset: UTF8_GENERAL_CI,
            column_length: default_display_len(ColumnType::MYSQL_TYPE_JSON),
            decimals: 0,
            flags: ColumnFlags::empty(),
        },
        oid::DATE => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_DATE,
            charset: UTF8_GENERAL_CI,
            column_length: 10,
            decimals: 0,
            flags: ColumnFlags::empty(),
        },
        // the MySQL drivers parse date/time payloads only when the tag is in
        // the date family AND the charset advertises text
        oid::TIMESTAMP | oid::TIMESTAMPTZ => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_DATETIME,
            charset: UTF8_GENERAL_CI,
            column_length: 19,
            decimals: 0,
            flags: ColumnFlags::empty(),
        },
        oid::TIME => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_TIME,
            charset: UTF8_GENERAL_CI,
            column_length: 8,
            decimals: 0,
            flags: ColumnFlags::empty(),
        },
        // TEXT, UUID, XML, INTERVAL and anything unknown travel as text
        _ => ColumnProjection {
            tag: ColumnType::MYSQL_TYPE_VAR_STRING,
            charset: UTF8_GENERAL_CI,
            column_length: 65_535,
            decimals: 0,
            flags: ColumnFlags::empty(),
        },
    }
}

/// Project one PostgreSQL text value into its MySQL text representation.
/// NULLs never reach this function.
pub fn project_value(type_oid: u32, raw: &str) -> String {
    match type_oid {
        oid::BOOL => match raw {
            "t" | "true" => "1".to_string(),
            "f" | "false" => "0".to_string(),
            other => other.to_string(),
        },
        oid::TIMESTAMP | oid::TIMESTAMPTZ => normalize_timestamp(raw),
        oid::TIME => normalize_time(raw),
        // numeric keeps its own decimal representation so precision is
        // preserved; integers, floats and strings pass through
        _ => raw.to_string(),
    }
}

/// `2024-02-29 13:05:09.123+02` → `2024-02-29 13:05:09`
fn normalize_timestamp(raw: &str) -> String {
    let trimmed = trim_timezone(raw);
    for candidate in [trimmed.to_string(), trimmed.replace('T', " ")] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(&candidate, "%Y-%m-%d %H:%M:%S%.f") {
            return ts.format("%Y-%m-%d %H:%M:%S").to_string();
        }
    }
    // not a shape chrono knows; fall back to the date+time prefix
    if raw.len() >= 19 && raw.as_bytes()[10] == b' ' {
        raw[..19].to_string()
    } else {
        raw.to_string()
    }
}

/// Strip a trailing `+hh`, `+hh:mm` or `-hh[:mm]` offset.
fn trim_timezone(raw: &str) -> &str {
    if let Some(pos) = raw.rfind(['+', '-']) {
        // the date itself contains two dashes; only treat a sign after the
        // time separator as an offset
        if pos > 10 {
            return &raw[..pos];
        }
    }
    raw
}

/// `13:05:09.1234` → `13:05:09`
fn normalize_time(raw: &str) -> String {
    match raw.split_once('.') {
        Some((hms, _)) => hms.to_string(),
        None => raw.to_string(),
    }
}

/// Render a COM_STMT_EXECUTE argument as a PostgreSQL literal: temporal
/// values become `YYYY-MM-DD HH:MM:SS` strings, opaque bytes become
/// strings.
pub fn render_pg_literal(value: &BinValue) -> String {
    match value {
        BinValue::Null => "NULL".to_string(),
        BinValue::Int(v) => v.to_string(),
        BinValue::UInt(v) => v.to_string(),
        BinValue::Float(v) => v.to_string(),
        BinValue::Double(v) => v.to_string(),
        BinValue::Bytes(b) => quote_literal(&String::from_utf8_lossy(b)),
        BinValue::DateTime(year, month, day, hour, minute, second, _micro) => quote_literal(
            &format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"),
        ),
        BinValue::Duration(negative, days, hours, minutes, seconds, _micros) => {
            let total_hours = *days * 24 + *hours as u32;
            let sign = if *negative { "-" } else { "" };
            quote_literal(&format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}"))
        }
    }
}

/// Single-quoted PostgreSQL string literal, quote-doubled.
pub fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Double-quoted PostgreSQL identifier.
pub fn quote_ident(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// OID of a type by its `udt_name`, for fields synthesized from
/// information_schema rather than a row description.
pub fn oid_from_udt_name(name: &str) -> u32 {
    match name {
        "bool" => oid::BOOL,
        "bytea" => oid::BYTEA,
        "int2" => oid::INT2,
        "int4" => oid::INT4,
        "int8" => oid::INT8,
        "float4" => oid::FLOAT4,
        "float8" => oid::FLOAT8,
        "numeric" => oid::NUMERIC,
        "varchar" => oid::VARCHAR,
        "bpchar" => oid::BPCHAR,
        "date" => oid::DATE,
        "time" => oid::TIME,
        "timestamp" => oid::TIMESTAMP,
        "timestamptz" => oid::TIMESTAMPTZ,
        "json" => oid::JSON,
        "jsonb" => oid::JSONB,
        "uuid" => oid::UUID,
        _ => oid::TEXT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_typmod_decoding() {
        // NUMERIC(10,2): ((10 << 16) | 2) + 4
        let typmod = ((10 << 16) | 2) + 4;
        assert_eq!(numeric_precision_scale(typmod), Some((10, 2)));
        assert_eq!(numeric_precision_scale(-1), None);

        let p = project_column(oid::NUMERIC, typmod);
        assert_eq!(p.tag, ColumnType::MYSQL_TYPE_NEWDECIMAL);
        assert_eq!(p.charset, 63);
        assert_eq!(p.column_length, 11);
        assert_eq!(p.decimals, 2);
    }

    #[test]
    fn test_numeric_zero_scale_has_no_dot_slot() {
        let typmod = ((20 << 16) | 0) + 4;
        let p = project_column(oid::NUMERIC, typmod);
        assert_eq!(p.column_length, 20);
        assert_eq!(p.decimals, 0);
    }

    #[test]
    fn test_varchar_typmod() {
        let p = project_column(oid::VARCHAR, 100 + 4);
        assert_eq!(p.tag, ColumnType::MYSQL_TYPE_VAR_STRING);
        assert_eq!(p.column_length, 100);
        assert_eq!(p.charset, 33);

        let unbounded = project_column(oid::VARCHAR, -1);
        assert_eq!(unbounded.column_length, 65_535);
    }

    #[test]
    fn test_integer_projection() {
        assert_eq!(
            project_column(oid::INT2, -1).tag,
            ColumnType::MYSQL_TYPE_SHORT
        );
        assert_eq!(
            project_column(oid::INT4, -1).tag,
            ColumnType::MYSQL_TYPE_LONG
        );
        assert_eq!(
            project_column(oid::INT8, -1).tag,
            ColumnType::MYSQL_TYPE_LONGLONG
        );
        assert_eq!(project_column(oid::INT8, -1).column_length, 20);
        assert_eq!(
            project_column(oid::BOOL, -1).tag,
            ColumnType::MYSQL_TYPE_TINY
        );
    }

    #[test]
    fn test_datetime_charset_is_text() {
        let p = project_column(oid::TIMESTAMP, -1);
        assert_eq!(p.tag, ColumnType::MYSQL_TYPE_DATETIME);
        assert_eq!(p.charset, 33);
        assert_eq!(p.column_length, 19);
    }

    #[test]
    fn test_every_tag_has_nonzero_default_len() {
        for tag in [
            ColumnType::MYSQL_TYPE_TINY,
            ColumnType::MYSQL_TYPE_SHORT,
            ColumnType::MYSQL_TYPE_LONG,
            ColumnType::MYSQL_TYPE_LONGLONG,
            ColumnType::MYSQL_TYPE_FLOAT,
            ColumnType::MYSQL_TYPE_DOUBLE,
            ColumnType::MYSQL_TYPE_DATE,
            ColumnType::MYSQL_TYPE_TIME,
            ColumnType::MYSQL_TYPE_DATETIME,
            ColumnType::MYSQL_TYPE_YEAR,
            ColumnType::MYSQL_TYPE_VAR_STRING,
            ColumnType::MYSQL_TYPE_STRING,
            ColumnType::MYSQL_TYPE_BLOB,
            ColumnType::MYSQL_TYPE_MEDIUM_BLOB,
            ColumnType::MYSQL_TYPE_LONG_BLOB,
            ColumnType::MYSQL_TYPE_JSON,
            ColumnType::MYSQL_TYPE_NEWDECIMAL,
        ] {
            assert!(default_display_len(tag) > 0, "{tag:?}");
        }
    }

    #[test]
    fn test_value_projection() {
        assert_eq!(project_value(oid::BOOL, "t"), "1");
        assert_eq!(project_value(oid::BOOL, "f"), "0");
        assert_eq!(
            project_value(oid::TIMESTAMPTZ, "2024-02-29 13:05:09.1234+02"),
            "2024-02-29 13:05:09"
        );
        assert_eq!(
            project_value(oid::TIMESTAMP, "2024-02-29 13:05:09"),
            "2024-02-29 13:05:09"
        );
        assert_eq!(project_value(oid::TIME, "13:05:09.25"), "13:05:09");
        // numeric text passes through untouched, not via f64
        assert_eq!(project_value(oid::NUMERIC, "99.99"), "99.99");
        assert_eq!(
            project_value(oid::NUMERIC, "18446744073709551615"),
            "18446744073709551615"
        );
    }

    #[test]
    fn test_literal_rendering() {
        assert_eq!(render_pg_literal(&BinValue::Null), "NULL");
        assert_eq!(render_pg_literal(&BinValue::Int(-7)), "-7");
        assert_eq!(
            render_pg_literal(&BinValue::Bytes(b"it's".to_vec())),
            "'it''s'"
        );
        assert_eq!(
            render_pg_literal(&BinValue::DateTime(2024, 2, 29, 13, 5, 9, 0)),
            "'2024-02-29 13:05:09'"
        );
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("db"), "\"db\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
