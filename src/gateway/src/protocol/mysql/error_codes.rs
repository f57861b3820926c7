/// MySQL server error kinds the gateway emits on its own behalf. Backend
/// errors keep the SQLSTATE reported by PostgreSQL and only borrow the
/// numeric code from the mapping table in `translate::errors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
#[repr(u16)]
pub enum ErrorKind {
    ER_CON_COUNT_ERROR = 1040,
    ER_ACCESS_DENIED_ERROR = 1045,
    ER_UNKNOWN_COM_ERROR = 1047,
    ER_BAD_NULL_ERROR = 1048,
    ER_BAD_DB_ERROR = 1049,
    ER_BAD_FIELD_ERROR = 1054,
    ER_DUP_ENTRY = 1062,
    ER_PARSE_ERROR = 1064,
    ER_UNKNOWN_ERROR = 1105,
    ER_NO_SUCH_TABLE = 1146,
    ER_TOO_MANY_USER_CONNECTIONS = 1203,
    ER_LOCK_WAIT_TIMEOUT = 1205,
    ER_LOCK_DEADLOCK = 1213,
    ER_NOT_SUPPORTED_YET = 1235,
    ER_UNKNOWN_STMT_HANDLER = 1243,
    ER_WARN_DATA_OUT_OF_RANGE = 1264,
    ER_QUERY_INTERRUPTED = 1317,
    ER_DIVISION_BY_ZERO = 1365,
    ER_DATA_TOO_LONG = 1406,
    ER_NO_REFERENCED_ROW_2 = 1452,
    ER_CHECK_CONSTRAINT_VIOLATED = 3819,
}

impl ErrorKind {
    /// Default SQLSTATE for the error code, used when the error does not
    /// originate from the backend (which carries its own state).
    pub fn sqlstate(&self) -> &'static [u8; 5] {
        match self {
            ErrorKind::ER_CON_COUNT_ERROR => b"08004",
            ErrorKind::ER_ACCESS_DENIED_ERROR => b"28000",
            ErrorKind::ER_UNKNOWN_COM_ERROR => b"08S01",
            ErrorKind::ER_BAD_NULL_ERROR => b"23000",
            ErrorKind::ER_BAD_DB_ERROR => b"42000",
            ErrorKind::ER_BAD_FIELD_ERROR => b"42S22",
            ErrorKind::ER_DUP_ENTRY => b"23000",
            ErrorKind::ER_PARSE_ERROR => b"42000",
            ErrorKind::ER_NOT_SUPPORTED_YET => b"42000",
            ErrorKind::ER_UNKNOWN_ERROR => b"HY000",
            ErrorKind::ER_NO_SUCH_TABLE => b"42S02",
            ErrorKind::ER_TOO_MANY_USER_CONNECTIONS => b"42000",
            ErrorKind::ER_LOCK_WAIT_TIMEOUT => b"HY000",
            ErrorKind::ER_LOCK_DEADLOCK => b"40001",
            ErrorKind::ER_UNKNOWN_STMT_HANDLER => b"HY000",
            ErrorKind::ER_WARN_DATA_OUT_OF_RANGE => b"22003",
            ErrorKind::ER_QUERY_INTERRUPTED => b"70100",
            ErrorKind::ER_DIVISION_BY_ZERO => b"22012",
            ErrorKind::ER_DATA_TOO_LONG => b"22001",
            ErrorKind::ER_NO_REFERENCED_ROW_2 => b"23000",
            ErrorKind::ER_CHECK_CONSTRAINT_VIOLATED => b"HY000",
        }
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorKind;

    #[test]
    pub fn test_error_code_values() {
        assert_eq!(ErrorKind::ER_DUP_ENTRY.code(), 1062);
        assert_eq!(ErrorKind::ER_PARSE_ERROR.code(), 1064);
        assert_eq!(ErrorKind::ER_UNKNOWN_STMT_HANDLER.code(), 1243);
        assert_eq!(ErrorKind::ER_DUP_ENTRY.sqlstate(), b"23000");
    }
}
