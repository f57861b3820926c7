pub mod pg_session;
pub mod pool;
pub mod schema_cache;

use crate::backend::pool::pg_conn_mgr::PgConnMgr;
use crate::translate::errors::GatewayError;

use common::metrics::metric_def::GATEWAY_BACKEND_ACQUIRE_LATENCY;
use common::metrics::MetricsTimer;
use deadpool::managed::{Object, Pool};
use std::time::Duration;
use tracing::info;

/// A held pool object; one of these is pinned to a client session for its
/// whole lifetime.
pub type PooledSession = Object<PgConnMgr>;

#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub pool_size: usize,
    pub connect_timeout: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            pool_size: 50,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

pub struct BackendMgr {
    pool: Pool<PgConnMgr>,
}

impl BackendMgr {
    pub fn new(options: BackendOptions) -> Result<Self, GatewayError> {
        let pool_size = options.pool_size;
        let conn_mgr = PgConnMgr::new(options);
        let pool = Pool::builder(conn_mgr)
            .max_size(pool_size)
            .build()
            .map_err(|e| GatewayError::BackendProtocol(format!("failed to build backend pool: {e}")))?;
        info!("GatewaySrv backend conn pool initialized, max_size={pool_size}");
        Ok(Self { pool })
    }

    pub async fn acquire(&self) -> Result<PooledSession, GatewayError> {
        let _timer = MetricsTimer::new(GATEWAY_BACKEND_ACQUIRE_LATENCY);
        self.pool.get().await.map_err(|e| {
            GatewayError::BackendProtocol(format!("failed to acquire backend session: {e}"))
        })
    }

    pub fn close(&self) {
        self.pool.close();
    }
}
