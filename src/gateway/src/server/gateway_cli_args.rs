use crate::backend::BackendOptions;
use crate::server::auth::AuthCredentials;
use crate::server::gateway_server::GatewayServerOptions;

use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[clap(
    name = "pg-gateway",
    version = "0.1.0",
    about = "MySQL wire-protocol gateway executing against PostgreSQL."
)]
pub struct GatewayServerArgs {
    #[clap(long, value_name = "WORKS", default_value_t = 4)]
    pub works: usize,
    #[clap(long, value_name = "PORT", default_value_t = 3306)]
    pub port: u16,
    #[clap(long, value_name = "HTTP_PORT", default_value_t = 9000)]
    pub http_port: u16,
    #[clap(long, value_name = "ENABLE METRICS COLLECTOR", default_value_t = false)]
    pub enable_metrics: bool,
    #[clap(long, value_name = "ENABLE REST API", default_value_t = false)]
    pub enable_rest: bool,
    #[clap(long, value_name = "LOG_LEVEL")]
    pub log_level: Option<String>,
    #[clap(long, value_name = "USER", default_value = "root")]
    pub mysql_user: String,
    #[clap(long, value_name = "PASSWORD", default_value = "")]
    pub mysql_password: String,
    #[clap(long, value_name = "N", default_value_t = 512)]
    pub max_connections: usize,
    #[clap(long, value_name = "N", default_value_t = 0)]
    pub max_user_connections: usize,
    /// 0 disables the statement timeout.
    #[clap(long, value_name = "MILLIS", default_value_t = 0)]
    pub statement_timeout_ms: u64,
    /// 0 disables the idle deadline on client sockets.
    #[clap(long, value_name = "SECONDS", default_value_t = 0)]
    pub client_read_timeout_secs: u64,
    #[clap(long, value_name = "SECONDS", default_value_t = 30)]
    pub schema_cache_ttl_secs: u64,
    #[clap(long, value_name = "PEM_FILE")]
    pub tls_cert: Option<String>,
    #[clap(long, value_name = "PEM_FILE")]
    pub tls_key: Option<String>,
    #[clap(flatten)]
    pub backend: BackendArgs,
}

#[derive(clap::Parser, Debug, Clone)]
pub struct BackendArgs {
    #[clap(long, value_name = "HOST", default_value = "127.0.0.1")]
    pub pg_host: String,
    #[clap(long, value_name = "PORT", default_value_t = 5432)]
    pub pg_port: u16,
    #[clap(long, value_name = "USER", default_value = "postgres")]
    pub pg_user: String,
    #[clap(long, value_name = "PASSWORD", default_value = "")]
    pub pg_password: String,
    #[clap(long, value_name = "DATABASE", default_value = "postgres")]
    pub pg_database: String,
    #[clap(long, value_name = "N", default_value_t = 50)]
    pub pg_pool_size: usize,
    #[clap(long, value_name = "MILLIS", default_value_t = 5000)]
    pub pg_connect_timeout_ms: u64,
}

impl GatewayServerArgs {
    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            host: self.backend.pg_host.clone(),
            port: self.backend.pg_port,
            user: self.backend.pg_user.clone(),
            password: self.backend.pg_password.clone(),
            database: self.backend.pg_database.clone(),
            pool_size: self.backend.pg_pool_size,
            connect_timeout: Duration::from_millis(self.backend.pg_connect_timeout_ms),
        }
    }

    pub fn server_options(&self) -> GatewayServerOptions {
        GatewayServerOptions {
            max_connections: self.max_connections,
            max_user_connections: self.max_user_connections,
            statement_timeout: match self.statement_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            client_read_timeout: match self.client_read_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            schema_cache_ttl: Duration::from_secs(self.schema_cache_ttl_secs),
            ..Default::default()
        }
    }

    pub fn credentials(&self) -> AuthCredentials {
        AuthCredentials {
            user: self.mysql_user.clone(),
            password: self.mysql_password.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = GatewayServerArgs::parse_from(["pg-gateway"]);
        assert_eq!(args.port, 3306);
        assert_eq!(args.backend.pg_port, 5432);
        assert!(args.server_options().statement_timeout.is_none());
        assert_eq!(args.credentials().user, "root");
    }

    #[test]
    fn test_statement_timeout_mapping() {
        let args =
            GatewayServerArgs::parse_from(["pg-gateway", "--statement-timeout-ms", "1500"]);
        assert_eq!(
            args.server_options().statement_timeout,
            Some(Duration::from_millis(1500))
        );
    }
}
