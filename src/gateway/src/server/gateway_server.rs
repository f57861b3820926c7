use crate::backend::schema_cache::SchemaCache;
use crate::backend::{BackendMgr, BackendOptions};
use crate::protocol::mysql::basic::{from_packet, Command, HandshakeResponse, OkPacket};
use crate::protocol::mysql::constants::SCRAMBLE_SIZE;
use crate::protocol::mysql::error_codes::ErrorKind;
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::writers;
use crate::rewrite::Rewriter;
use crate::server::auth::{gen_user_salt, AuthCredentials};
use crate::server::bridge::QueryBridge;
use crate::server::handshake::{initial_handshake, respond_handshake, Negotiated};
use crate::server::session::{Session, SessionManager};
use crate::server::{init_sql_com_labels, CmdHandler};
use crate::translate::errors::GatewayError;

use common::metrics::metric_def::{GATEWAY_COM_LATENCY, GATEWAY_CURR_CONN, GATEWAY_MAX_CONN};
use common::metrics::{common_labels, gauge, gauge_dec, gauge_inc, MetricsTimer};
use common::ShutdownMessage;
use mysql_common::constants::StatusFlags;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch::Receiver;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct GatewayServerOptions {
    pub max_connections: usize,
    /// 0 disables the per-user cap.
    pub max_user_connections: usize,
    pub statement_timeout: Option<Duration>,
    /// Idle deadline on the client socket between commands.
    pub client_read_timeout: Option<Duration>,
    pub schema_cache_ttl: Duration,
    pub schema_cache_sweep_interval: Duration,
}

impl Default for GatewayServerOptions {
    fn default() -> Self {
        Self {
            max_connections: 512,
            max_user_connections: 0,
            statement_timeout: None,
            client_read_timeout: None,
            schema_cache_ttl: Duration::from_secs(30),
            schema_cache_sweep_interval: Duration::from_secs(60),
        }
    }
}

/// The MySQL-facing server: owns the shared pieces (backend pool, rewriter,
/// schema cache, session registry) and runs one task per client connection.
pub struct GatewayServer {
    options: GatewayServerOptions,
    backend: Arc<BackendMgr>,
    rewriter: Arc<Rewriter>,
    schema_cache: Arc<SchemaCache>,
    sessions: Arc<SessionManager>,
    credentials: AuthCredentials,
    com_labels: HashMap<u8, Vec<(&'static str, String)>>,
    #[cfg(feature = "tls")]
    tls_conf: Option<Arc<tokio_rustls::rustls::ServerConfig>>,
}

impl GatewayServer {
    pub fn new(
        options: GatewayServerOptions,
        backend_options: BackendOptions,
        credentials: AuthCredentials,
        #[cfg(feature = "tls")] tls_conf: Option<Arc<tokio_rustls::rustls::ServerConfig>>,
    ) -> Result<Self, GatewayError> {
        let backend = Arc::new(BackendMgr::new(backend_options)?);
        gauge(
            GATEWAY_MAX_CONN,
            options.max_connections as f64,
            Some(common_labels()),
        );
        Ok(Self {
            sessions: Arc::new(SessionManager::new(
                options.max_connections,
                options.max_user_connections,
            )),
            schema_cache: Arc::new(SchemaCache::new(options.schema_cache_ttl)),
            rewriter: Arc::new(Rewriter::new()),
            com_labels: init_sql_com_labels().clone(),
            backend,
            credentials,
            options,
            #[cfg(feature = "tls")]
            tls_conf,
        })
    }

    /// Periodic eviction of expired schema-cache entries.
    pub fn start_cache_sweeper(&self, mut shutdown_rx: Receiver<ShutdownMessage>) {
        let cache = Arc::clone(&self.schema_cache);
        let interval = self.options.schema_cache_sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("GatewaySrv schema cache sweeper stopped.");
                        return;
                    }
                    _ = ticker.tick() => cache.sweep(),
                }
            }
        });
    }

    /// Drive one accepted client connection to completion.
    pub async fn serve_connection(&self, stream: TcpStream) -> io::Result<()> {
        if self.sessions.try_accept().is_err() {
            let (_, write_half) = stream.into_split();
            let mut writer = PacketWriter::new(write_half);
            let _ = writers::write_err_packet(
                &mut writer,
                ErrorKind::ER_CON_COUNT_ERROR.code(),
                ErrorKind::ER_CON_COUNT_ERROR.sqlstate(),
                "Too many connections",
            )
            .await;
            return Ok(());
        }
        gauge_inc(GATEWAY_CURR_CONN, 1_f64, Some(common_labels()));
        let result = self.serve_inner(stream).await;
        gauge_dec(GATEWAY_CURR_CONN, 1_f64, Some(common_labels()));
        self.sessions.release_accept();
        result
    }

    async fn serve_inner(&self, stream: TcpStream) -> io::Result<()> {
        let conn_id = self.sessions.next_session_id();
        let scramble = gen_user_salt();
        #[cfg(feature = "tls")]
        let negotiated = initial_handshake(stream, conn_id, scramble, &self.tls_conf).await?;
        #[cfg(not(feature = "tls"))]
        let negotiated = initial_handshake(stream, conn_id, scramble).await?;
        match negotiated {
            Negotiated::Plain {
                mut reader,
                mut writer,
                handshake,
                seq,
            } => {
                self.run_session(&mut reader, &mut writer, handshake, seq, conn_id, &scramble)
                    .await
            }
            #[cfg(feature = "tls")]
            Negotiated::Tls {
                mut reader,
                mut writer,
                handshake,
                seq,
            } => {
                self.run_session(&mut reader, &mut writer, handshake, seq, conn_id, &scramble)
                    .await
            }
        }
    }

    async fn run_session<R, W>(
        &self,
        reader: &mut PacketReader<R>,
        writer: &mut PacketWriter<W>,
        handshake: HandshakeResponse,
        seq: u8,
        conn_id: u64,
        scramble: &[u8; SCRAMBLE_SIZE],
    ) -> io::Result<()>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        let user = handshake.username_str();
        let database = handshake.database_str().unwrap_or_default();
        let session = Session::new(conn_id, user.clone(), database.clone());
        let mut bridge = QueryBridge::new(
            session,
            handshake.client_flag,
            Arc::clone(&self.backend),
            Arc::clone(&self.rewriter),
            Arc::clone(&self.schema_cache),
            self.credentials.clone(),
            self.options.statement_timeout,
        );

        if !respond_handshake(reader, writer, &mut bridge, &handshake, seq, scramble).await? {
            return Ok(());
        }
        if let Err(e) = self.sessions.bind_user(&user) {
            let (code, sqlstate, message) = e.to_mysql();
            writers::write_err_packet(writer, code, &sqlstate, &message).await?;
            return Ok(());
        }
        debug!("GatewaySrv session {conn_id} authenticated as {user:?}");

        // the final connection-phase reply: switch into the requested
        // database, or a plain OK
        let accept_reply = if database.is_empty() {
            writers::write_ok_packet(
                writer,
                handshake.client_flag,
                OkPacket {
                    status_flags: StatusFlags::SERVER_STATUS_AUTOCOMMIT,
                    ..Default::default()
                },
            )
            .await
        } else {
            bridge.on_init(database.as_bytes(), writer).await
        };

        let loop_result = match accept_reply {
            Ok(()) => self.command_loop(reader, writer, &mut bridge).await,
            Err(e) => Err(e),
        };
        bridge.teardown().await;
        self.sessions.release_user(&user);
        debug!("GatewaySrv session {conn_id} closed");
        loop_result
    }

    async fn command_loop<R, W>(
        &self,
        reader: &mut PacketReader<R>,
        writer: &mut PacketWriter<W>,
        bridge: &mut QueryBridge,
    ) -> io::Result<()>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        loop {
            let next = match self.options.client_read_timeout {
                None => reader.next_async().await?,
                Some(limit) => match tokio::time::timeout(limit, reader.next_async()).await {
                    Ok(result) => result?,
                    Err(_) => {
                        debug!("GatewaySrv client idle deadline exceeded, closing");
                        return Ok(());
                    }
                },
            };
            let Some((seq, packet)) = next else {
                debug!("GatewaySrv client transport closed");
                return Ok(());
            };
            writer.set_seq(seq.wrapping_add(1));
            let com_code = packet.first().copied().unwrap_or(0);
            let _com_timer = self
                .com_labels
                .get(&com_code)
                .map(|labels| MetricsTimer::new_with_labels(GATEWAY_COM_LATENCY, labels));
            match from_packet(&packet) {
                Ok(Command::Query(sql)) => bridge.on_query(sql, writer).await?,
                Ok(Command::Prepare(sql)) => bridge.on_prepare(sql, writer).await?,
                Ok(Command::Execute { stmt, params }) => {
                    bridge.on_execute(stmt, params, writer).await?
                }
                Ok(Command::Close(stmt)) => bridge.on_close(stmt).await,
                Ok(Command::Reset(_)) => bridge.on_ping(writer).await?,
                Ok(Command::ListFields(payload)) => bridge.on_field_list(payload, writer).await?,
                Ok(Command::Init(schema)) => bridge.on_init(schema, writer).await?,
                Ok(Command::Ping) => bridge.on_ping(writer).await?,
                Ok(Command::ResetConnection) => bridge.on_reset_connection(writer).await?,
                // COM_STMT_SEND_LONG_DATA expects no reply
                Ok(Command::SendLongData { .. }) => {}
                Ok(Command::Quit) => return Ok(()),
                Err(code) => {
                    warn!("GatewaySrv unknown command {code}");
                    writers::write_err_packet(
                        writer,
                        ErrorKind::ER_UNKNOWN_COM_ERROR.code(),
                        ErrorKind::ER_UNKNOWN_COM_ERROR.sqlstate(),
                        &format!("Unknown command {com_code}"),
                    )
                    .await?;
                }
            }
        }
    }
}
