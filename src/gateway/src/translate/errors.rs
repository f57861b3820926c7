use crate::protocol::mysql::error_codes::ErrorKind;

use std::fmt;
use thiserror::Error;

/// An error reported by the PostgreSQL backend, with the SQLSTATE kept
/// verbatim so it can travel into the MySQL error packet unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    pub severity: String,
    pub sqlstate: String,
    pub message: String,
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.sqlstate)
    }
}

impl std::error::Error for DbError {}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to rewrite statement: {message}; statement: {sql}")]
    Rewrite { sql: String, message: String },
    #[error("{0}")]
    Backend(#[from] DbError),
    #[error("backend protocol error: {0}")]
    BackendProtocol(String),
    #[error("malformed client packet: {0}")]
    Protocol(String),
    #[error("unknown prepared statement handler {0}")]
    UnknownStatement(u32),
    #[error("too many connections")]
    TooManyConnections,
    #[error("user {0} has exceeded the max_user_connections resource")]
    TooManyUserConnections(String),
    #[error("query execution was interrupted")]
    QueryInterrupted,
    #[error("unsupported statement: {0}")]
    Unsupported(String),
    #[error("resultset encoding failed: {0}")]
    Encoding(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The static SQLSTATE → MySQL error code table. Anything unmapped becomes
/// `ER_UNKNOWN_ERROR` carrying the original message.
pub fn mysql_error_code(sqlstate: &str) -> u16 {
    match sqlstate {
        "23505" => ErrorKind::ER_DUP_ENTRY.code(),
        "23503" => ErrorKind::ER_NO_REFERENCED_ROW_2.code(),
        "23502" => ErrorKind::ER_BAD_NULL_ERROR.code(),
        "23514" => ErrorKind::ER_CHECK_CONSTRAINT_VIOLATED.code(),
        "42P01" => ErrorKind::ER_NO_SUCH_TABLE.code(),
        "42703" => ErrorKind::ER_BAD_FIELD_ERROR.code(),
        "42601" => ErrorKind::ER_PARSE_ERROR.code(),
        "40P01" | "40001" => ErrorKind::ER_LOCK_DEADLOCK.code(),
        "57014" => ErrorKind::ER_QUERY_INTERRUPTED.code(),
        "28000" | "28P01" => ErrorKind::ER_ACCESS_DENIED_ERROR.code(),
        "3D000" => ErrorKind::ER_BAD_DB_ERROR.code(),
        "55P03" => ErrorKind::ER_LOCK_WAIT_TIMEOUT.code(),
        "22001" => ErrorKind::ER_DATA_TOO_LONG.code(),
        "22003" => ErrorKind::ER_WARN_DATA_OUT_OF_RANGE.code(),
        "22012" => ErrorKind::ER_DIVISION_BY_ZERO.code(),
        _ => ErrorKind::ER_UNKNOWN_ERROR.code(),
    }
}

fn sqlstate_bytes(state: &str) -> [u8; 5] {
    let mut out = *b"HY000";
    let bytes = state.as_bytes();
    if bytes.len() == 5 {
        out.copy_from_slice(bytes);
    }
    out
}

impl GatewayError {
    /// `(code, SQLSTATE, message)` for the MySQL error packet.
    pub fn to_mysql(&self) -> (u16, [u8; 5], String) {
        match self {
            GatewayError::Backend(db) => (
                mysql_error_code(&db.sqlstate),
                sqlstate_bytes(&db.sqlstate),
                db.message.clone(),
            ),
            GatewayError::Rewrite { message, sql } => (
                ErrorKind::ER_PARSE_ERROR.code(),
                *ErrorKind::ER_PARSE_ERROR.sqlstate(),
                format!("{message} near '{sql}'"),
            ),
            GatewayError::UnknownStatement(id) => (
                ErrorKind::ER_UNKNOWN_STMT_HANDLER.code(),
                *ErrorKind::ER_UNKNOWN_STMT_HANDLER.sqlstate(),
                format!("Unknown prepared statement handler ({id}) given to EXECUTE"),
            ),
            GatewayError::TooManyConnections => (
                ErrorKind::ER_CON_COUNT_ERROR.code(),
                *ErrorKind::ER_CON_COUNT_ERROR.sqlstate(),
                "Too many connections".to_string(),
            ),
            GatewayError::TooManyUserConnections(user) => (
                ErrorKind::ER_TOO_MANY_USER_CONNECTIONS.code(),
                *ErrorKind::ER_TOO_MANY_USER_CONNECTIONS.sqlstate(),
                format!("User {user} has exceeded the max_user_connections resource"),
            ),
            GatewayError::QueryInterrupted => (
                ErrorKind::ER_QUERY_INTERRUPTED.code(),
                *ErrorKind::ER_QUERY_INTERRUPTED.sqlstate(),
                "Query execution was interrupted".to_string(),
            ),
            GatewayError::Unsupported(what) => (
                ErrorKind::ER_NOT_SUPPORTED_YET.code(),
                *ErrorKind::ER_NOT_SUPPORTED_YET.sqlstate(),
                format!("This version of the gateway doesn't yet support '{what}'"),
            ),
            GatewayError::Protocol(msg) => (
                ErrorKind::ER_UNKNOWN_COM_ERROR.code(),
                *ErrorKind::ER_UNKNOWN_COM_ERROR.sqlstate(),
                msg.clone(),
            ),
            GatewayError::BackendProtocol(msg) | GatewayError::Encoding(msg) => (
                ErrorKind::ER_UNKNOWN_ERROR.code(),
                *ErrorKind::ER_UNKNOWN_ERROR.sqlstate(),
                msg.clone(),
            ),
            GatewayError::Io(e) => (
                ErrorKind::ER_UNKNOWN_ERROR.code(),
                *ErrorKind::ER_UNKNOWN_ERROR.sqlstate(),
                e.to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_table() {
        assert_eq!(mysql_error_code("23505"), 1062);
        assert_eq!(mysql_error_code("23503"), 1452);
        assert_eq!(mysql_error_code("23502"), 1048);
        assert_eq!(mysql_error_code("23514"), 3819);
        assert_eq!(mysql_error_code("42P01"), 1146);
        assert_eq!(mysql_error_code("42703"), 1054);
        assert_eq!(mysql_error_code("42601"), 1064);
        assert_eq!(mysql_error_code("40P01"), 1213);
        assert_eq!(mysql_error_code("40001"), 1213);
        assert_eq!(mysql_error_code("57014"), 1317);
        assert_eq!(mysql_error_code("28000"), 1045);
        assert_eq!(mysql_error_code("3D000"), 1049);
        assert_eq!(mysql_error_code("55P03"), 1205);
        assert_eq!(mysql_error_code("22001"), 1406);
        assert_eq!(mysql_error_code("22003"), 1264);
        assert_eq!(mysql_error_code("22012"), 1365);
        assert_eq!(mysql_error_code("P0001"), 1105);
    }

    #[test]
    fn test_backend_error_keeps_sqlstate_verbatim() {
        let err = GatewayError::Backend(DbError {
            severity: "ERROR".to_string(),
            sqlstate: "23505".to_string(),
            message: "duplicate key value violates unique constraint".to_string(),
        });
        let (code, state, message) = err.to_mysql();
        assert_eq!(code, 1062);
        assert_eq!(&state, b"23505");
        assert!(message.contains("duplicate key"));
    }

    #[test]
    fn test_unmapped_state_becomes_unknown_error() {
        let err = GatewayError::Backend(DbError {
            severity: "ERROR".to_string(),
            sqlstate: "0A000".to_string(),
            message: "not supported".to_string(),
        });
        let (code, state, _) = err.to_mysql();
        assert_eq!(code, 1105);
        assert_eq!(&state, b"0A000");
    }
}
