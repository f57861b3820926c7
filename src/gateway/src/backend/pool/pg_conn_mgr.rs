use crate::backend::pg_session::{PgSession, PgSessionConfig};
use crate::backend::pool::PooledPgConn;
use crate::backend::BackendOptions;
use crate::translate::errors::GatewayError;

use deadpool::managed::{Metrics, RecycleError, RecycleResult};
use futures::FutureExt;
use nanoid::nanoid;
use std::future::Future;
use tracing::{debug, warn};

pub struct PgConnMgr {
    cfg: PgSessionConfig,
}

impl PgConnMgr {
    pub fn new(options: BackendOptions) -> Self {
        Self {
            cfg: PgSessionConfig {
                host: options.host,
                port: options.port,
                user: options.user,
                password: options.password,
                database: options.database,
                connect_timeout: options.connect_timeout,
            },
        }
    }
}

impl deadpool::managed::Manager for PgConnMgr {
    type Type = PooledPgConn;
    type Error = GatewayError;

    fn create(&self) -> impl Future<Output = Result<Self::Type, Self::Error>> + Send {
        async move {
            let session = PgSession::connect(&self.cfg).await?;
            let id = nanoid!();
            debug!("GatewaySrv created backend session id={id}");
            Ok(PooledPgConn { id, session })
        }
        .boxed()
    }

    fn recycle(
        &self,
        pooled_conn: &mut Self::Type,
        _metrics: &Metrics,
    ) -> impl Future<Output = RecycleResult<Self::Error>> + Send {
        async {
            if pooled_conn.session.is_broken() {
                warn!(
                    "GatewaySrv dropping broken backend session id={:?}",
                    pooled_conn.id
                );
                return Err(RecycleError::Message("backend session is broken".into()));
            }
            // leave no transaction or session state behind for the next owner
            pooled_conn.session.simple_query("ROLLBACK").await?;
            pooled_conn.session.simple_query("DISCARD ALL").await?;
            Ok(())
        }
        .boxed()
    }
}
