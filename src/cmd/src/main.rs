use clap::Parser;
use common::ShutdownMessage;
use gateway::server::gateway_cli_args::GatewayServerArgs;
use gateway::server::gateway_server::GatewayServer;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::sync::watch::Receiver;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

async fn shutdown_await(mut shutdown_rx: Box<Receiver<ShutdownMessage>>) {
    let changed_rs = &shutdown_rx.changed().await;
    if changed_rs.is_ok() {
        let canceled = shutdown_rx.borrow_and_update().clone();
        if let ShutdownMessage::Cancel(msg) = canceled {
            info!("GatewaySrv process receive shutdown msg {msg}");
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> ShutdownMessage {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        ctrl_c_v = ctrl_c => {
            let msg = format!("GatewaySrv receive ctrl_c signal  {ctrl_c_v:?}");
            ShutdownMessage::Cancel(msg)
        },
        v = terminate => {
            let msg =  format!("GatewaySrv receive terminate signal  {v:?}");
            ShutdownMessage::Cancel(msg)
        },
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> ShutdownMessage {
    let ctrl_c_v = tokio::signal::ctrl_c().await;
    ShutdownMessage::Cancel(format!("GatewaySrv receive ctrl_c signal  {ctrl_c_v:?}"))
}

fn start_metrics_and_rest(
    gateway_config: &GatewayServerArgs,
    runtime: &Runtime,
    shutdown_rx: &Receiver<ShutdownMessage>,
) {
    let http_port = gateway_config.http_port;
    if gateway_config.enable_metrics {
        common::metrics::init_metrics_context();
    }
    if gateway_config.enable_metrics || gateway_config.enable_rest {
        let enable_metric = gateway_config.enable_metrics;
        let shutdown_rx_clone = Box::new(shutdown_rx.clone());
        runtime.spawn(async move {
            web_service::http_server::GatewayRest::start_server(
                "0.0.0.0".to_string(),
                http_port,
                enable_metric,
                shutdown_await(shutdown_rx_clone),
            )
            .await
        });
    }
}

#[cfg(feature = "tls")]
fn load_tls_config(
    gateway_config: &GatewayServerArgs,
) -> anyhow::Result<Option<Arc<tokio_rustls::rustls::ServerConfig>>> {
    let (Some(cert_path), Some(key_path)) = (&gateway_config.tls_cert, &gateway_config.tls_key)
    else {
        return Ok(None);
    };
    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(std::fs::File::open(
        cert_path,
    )?))
    .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(std::fs::File::open(
        key_path,
    )?))?
    .ok_or_else(|| anyhow::anyhow!("no private key found in {key_path}"))?;
    let config = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Some(Arc::new(config)))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let gateway_config = GatewayServerArgs::parse();
    let log_level_string = gateway_config
        .log_level
        .clone()
        .unwrap_or("INFO".to_string());
    let level = Level::from_str(log_level_string.as_str())?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("INFO,hyper=INFO,tower=INFO,h2=INFO"))
        .add_directive(level.into())
        .add_directive("hyper=INFO".parse()?)
        .add_directive("h2=INFO".parse()?)
        .add_directive("tower=INFO".parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_line_number(true)
        .init();

    let works = gateway_config.works;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("PG_GATEWAY")
        .worker_threads(works)
        .build()?;

    info!("GatewaySrv running config args={:?}", gateway_config);
    let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownMessage::Init);
    start_metrics_and_rest(&gateway_config, &runtime, &shutdown_rx);

    runtime.block_on(async {
        #[cfg(feature = "tls")]
        let gateway_srv = GatewayServer::new(
            gateway_config.server_options(),
            gateway_config.backend_options(),
            gateway_config.credentials(),
            load_tls_config(&gateway_config)?,
        )?;
        #[cfg(not(feature = "tls"))]
        let gateway_srv = GatewayServer::new(
            gateway_config.server_options(),
            gateway_config.backend_options(),
            gateway_config.credentials(),
        )?;
        gateway_srv.start_cache_sweeper(shutdown_rx.clone());

        let port = gateway_config.port;
        let tcp_listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        info!("GatewaySrv listening on 0.0.0.0:{port}");
        let gateway_srv_arc = Arc::new(gateway_srv);
        loop {
            tokio::select! {
                shutdown_msg = shutdown_signal() => {
                    shutdown_tx.send(shutdown_msg.clone())?;
                    break;
                }
                rs = tcp_listener.accept() => {
                    match rs {
                        Ok((stream, _addr)) => {
                            let gateway_arc_clone = Arc::clone(&gateway_srv_arc);
                            tokio::spawn(async move {
                                if let Err(e) = gateway_arc_clone.serve_connection(stream).await {
                                    warn!("GatewaySrv connection ended with error {e:?}");
                                }
                            });
                        }
                        Err(e) => {
                            warn!("GatewaySrv accept connection err. cause by {e:?}");
                        }
                    }
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    })?;
    Ok(())
}
