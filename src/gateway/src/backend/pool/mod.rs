use crate::backend::pg_session::PgSession;

pub mod pg_conn_mgr;

/// One pooled backend session. The id only exists for log correlation.
pub struct PooledPgConn {
    pub id: String,
    pub session: PgSession,
}

impl PooledPgConn {
    pub async fn close(self) {
        self.session.terminate().await;
    }
}
