use crate::translate::errors::GatewayError;

use dashmap::DashMap;
use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub id: u32,
    pub mysql_sql: String,
    pub pg_sql: String,
    /// Equals the highest `$n` in `pg_sql`.
    pub param_count: u16,
    /// Parameter types bound on the first execute; later executes may omit
    /// them and rely on these.
    pub param_types: Option<Vec<(u8, u8)>>,
}

/// Per-client state, created on handshake accept and dropped on COM_QUIT or
/// transport close. Exactly one backend session is pinned to it for its
/// whole lifetime, which is what makes `lastval()` and transaction state
/// coherent.
#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub user: String,
    pub database: String,
    pub charset: String,
    pub autocommit: bool,
    pub in_transaction: bool,
    pub last_insert_id: u64,
    pub session_vars: HashMap<String, String>,
    pub user_vars: HashMap<String, String>,
    statements: HashMap<u32, PreparedStatement>,
    next_stmt_id: u32,
}

impl Session {
    pub fn new(id: u64, user: String, database: String) -> Self {
        Self {
            id,
            user,
            database,
            charset: "utf8mb4".to_string(),
            autocommit: true,
            in_transaction: false,
            last_insert_id: 0,
            session_vars: HashMap::new(),
            user_vars: HashMap::new(),
            statements: HashMap::new(),
            next_stmt_id: 0,
        }
    }

    /// Record a prepared statement under a fresh proxy-assigned id. The id
    /// has no backend counterpart.
    pub fn register_statement(
        &mut self,
        mysql_sql: String,
        pg_sql: String,
        param_count: u16,
    ) -> u32 {
        self.next_stmt_id = self.next_stmt_id.wrapping_add(1);
        let id = self.next_stmt_id;
        self.statements.insert(
            id,
            PreparedStatement {
                id,
                mysql_sql,
                pg_sql,
                param_count,
                param_types: None,
            },
        );
        id
    }

    pub fn statement(&self, id: u32) -> Option<&PreparedStatement> {
        self.statements.get(&id)
    }

    pub fn statement_mut(&mut self, id: u32) -> Option<&mut PreparedStatement> {
        self.statements.get_mut(&id)
    }

    pub fn remove_statement(&mut self, id: u32) -> bool {
        self.statements.remove(&id).is_some()
    }

    pub fn clear_statements(&mut self) {
        self.statements.clear();
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }
}

/// Process-wide registry of live sessions; provides the admission decisions
/// and the numbers behind the connection gauges.
pub struct SessionManager {
    next_session_id: AtomicU64,
    active: AtomicUsize,
    per_user: DashMap<String, usize>,
    max_connections: usize,
    max_user_connections: usize,
}

impl SessionManager {
    /// `max_user_connections == 0` means unlimited.
    pub fn new(max_connections: usize, max_user_connections: usize) -> Self {
        Self {
            next_session_id: AtomicU64::new(1),
            active: AtomicUsize::new(0),
            per_user: DashMap::new(),
            max_connections,
            max_user_connections,
        }
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn current(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Claim a connection slot, before the handshake even starts.
    pub fn try_accept(&self) -> Result<(), GatewayError> {
        let prev = self.active.fetch_add(1, Ordering::AcqRel);
        if self.max_connections > 0 && prev >= self.max_connections {
            self.active.fetch_sub(1, Ordering::AcqRel);
            return Err(GatewayError::TooManyConnections);
        }
        Ok(())
    }

    pub fn release_accept(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }

    /// Claim a per-user slot, once authentication has named the user.
    pub fn bind_user(&self, user: &str) -> Result<(), GatewayError> {
        let mut count = self.per_user.entry(user.to_string()).or_insert(0);
        if self.max_user_connections > 0 && *count >= self.max_user_connections {
            return Err(GatewayError::TooManyUserConnections(user.to_string()));
        }
        *count += 1;
        Ok(())
    }

    pub fn release_user(&self, user: &str) {
        if let Some(mut count) = self.per_user.get_mut(user) {
            *count = count.saturating_sub(1);
        }
        self.per_user.remove_if(user, |_, count| *count == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_ids_are_sequential() {
        let mut session = Session::new(1, "app".to_string(), "shop".to_string());
        let first = session.register_statement("SELECT ?".into(), "SELECT $1".into(), 1);
        let second = session.register_statement("SELECT 1".into(), "SELECT 1".into(), 0);
        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(session.statement(first).unwrap().param_count, 1);
        assert!(session.remove_statement(first));
        assert!(!session.remove_statement(first));
        assert_eq!(session.statement_count(), 1);
    }

    #[test]
    fn test_session_defaults() {
        let session = Session::new(7, "app".to_string(), String::new());
        assert!(session.autocommit);
        assert!(!session.in_transaction);
        assert_eq!(session.last_insert_id, 0);
        assert_eq!(session.charset, "utf8mb4");
    }

    #[test]
    fn test_connection_cap() {
        let mgr = SessionManager::new(2, 0);
        assert!(mgr.try_accept().is_ok());
        assert!(mgr.try_accept().is_ok());
        assert!(matches!(
            mgr.try_accept(),
            Err(GatewayError::TooManyConnections)
        ));
        mgr.release_accept();
        assert!(mgr.try_accept().is_ok());
        assert_eq!(mgr.current(), 2);
    }

    #[test]
    fn test_per_user_cap() {
        let mgr = SessionManager::new(10, 1);
        assert!(mgr.bind_user("app").is_ok());
        assert!(matches!(
            mgr.bind_user("app"),
            Err(GatewayError::TooManyUserConnections(_))
        ));
        assert!(mgr.bind_user("other").is_ok());
        mgr.release_user("app");
        assert!(mgr.bind_user("app").is_ok());
    }
}
