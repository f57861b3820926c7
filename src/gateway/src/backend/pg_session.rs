//! A hand-driven PostgreSQL 3.0 frontend over the simple-query protocol.
//!
//! Driving the wire directly (instead of going through a high-level driver)
//! keeps every row in text format and hands the bridge the full row
//! description, type modifier included, which the type mapper needs for
//! NUMERIC precision/scale and VARCHAR display lengths.

use crate::translate::errors::{DbError, GatewayError};

use bytes::BytesMut;
use fallible_iterator::FallibleIterator;
use hashbrown::HashMap;
use postgres_protocol::authentication;
use postgres_protocol::authentication::sasl;
use postgres_protocol::message::backend::{self, Message};
use postgres_protocol::message::frontend;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, AsyncReadExt};
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PgSessionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_timeout: Duration,
}

/// BackendKeyData needed to fire a cancel request at the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancelKey {
    pub process_id: i32,
    pub secret_key: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgColumn {
    pub name: String,
    pub type_oid: u32,
    pub type_modifier: i32,
}

/// Everything one simple-query round trip produced: the last row
/// description, the text rows under it, and the final command tag.
#[derive(Debug, Default)]
pub struct QueryOutcome {
    pub columns: Vec<PgColumn>,
    pub rows: Vec<Vec<Option<String>>>,
    pub command_tag: Option<String>,
}

impl QueryOutcome {
    pub fn returns_rows(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Affected-rows count from the command tag (`UPDATE 3`, `INSERT 0 1`).
    pub fn affected_rows(&self) -> u64 {
        self.command_tag
            .as_deref()
            .and_then(|tag| tag.rsplit(' ').next())
            .and_then(|count| count.parse().ok())
            .unwrap_or(0)
    }
}

pub struct PgSession {
    stream: TcpStream,
    recv: BytesMut,
    cancel_key: CancelKey,
    server_parameters: HashMap<String, String>,
    addr: (String, u16),
    broken: bool,
}

impl PgSession {
    pub async fn connect(cfg: &PgSessionConfig) -> Result<Self, GatewayError> {
        let connect = TcpStream::connect((cfg.host.as_str(), cfg.port));
        let stream = tokio::time::timeout(cfg.connect_timeout, connect)
            .await
            .map_err(|_| {
                GatewayError::BackendProtocol(format!(
                    "timed out connecting to {}:{}",
                    cfg.host, cfg.port
                ))
            })??;
        stream.set_nodelay(true)?;
        let mut session = Self {
            stream,
            recv: BytesMut::with_capacity(8 * 1024),
            cancel_key: CancelKey::default(),
            server_parameters: HashMap::new(),
            addr: (cfg.host.clone(), cfg.port),
            broken: false,
        };
        session.startup(cfg).await?;
        debug!(
            "GatewaySrv backend session established, server version {:?}",
            session.parameter("server_version")
        );
        Ok(session)
    }

    pub fn cancel_key(&self) -> CancelKey {
        self.cancel_key
    }

    pub fn backend_addr(&self) -> (String, u16) {
        self.addr.clone()
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.server_parameters.get(name).map(String::as_str)
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    async fn startup(&mut self, cfg: &PgSessionConfig) -> Result<(), GatewayError> {
        let mut buf = BytesMut::new();
        frontend::startup_message(
            [
                ("user", cfg.user.as_str()),
                ("database", cfg.database.as_str()),
                ("client_encoding", "UTF8"),
                ("application_name", "pg-gateway"),
            ],
            &mut buf,
        )?;
        self.stream.write_all(&buf).await?;

        loop {
            match self.read_message().await? {
                Message::AuthenticationOk => {}
                Message::AuthenticationCleartextPassword => {
                    self.send_password(cfg.password.as_bytes()).await?;
                }
                Message::AuthenticationMd5Password(body) => {
                    let hashed = authentication::md5_hash(
                        cfg.user.as_bytes(),
                        cfg.password.as_bytes(),
                        body.salt(),
                    );
                    self.send_password(hashed.as_bytes()).await?;
                }
                Message::AuthenticationSasl(body) => {
                    self.sasl_auth(cfg, &body).await?;
                }
                Message::BackendKeyData(body) => {
                    self.cancel_key = CancelKey {
                        process_id: body.process_id(),
                        secret_key: body.secret_key(),
                    };
                }
                Message::ParameterStatus(body) => {
                    self.server_parameters
                        .insert(body.name()?.to_string(), body.value()?.to_string());
                }
                Message::NoticeResponse(_) => {}
                Message::ErrorResponse(body) => return Err(parse_db_error(&body)?.into()),
                Message::ReadyForQuery(_) => return Ok(()),
                _ => {
                    return Err(GatewayError::BackendProtocol(
                        "unexpected message during startup".to_string(),
                    ))
                }
            }
        }
    }

    async fn send_password(&mut self, password: &[u8]) -> Result<(), GatewayError> {
        let mut buf = BytesMut::new();
        frontend::password_message(password, &mut buf)?;
        self.stream.write_all(&buf).await?;
        Ok(())
    }

    async fn sasl_auth(
        &mut self,
        cfg: &PgSessionConfig,
        body: &backend::AuthenticationSaslBody,
    ) -> Result<(), GatewayError> {
        let mut has_scram = false;
        let mut mechanisms = body.mechanisms();
        while let Some(mechanism) = mechanisms.next()? {
            if mechanism == sasl::SCRAM_SHA_256 {
                has_scram = true;
            }
        }
        if !has_scram {
            return Err(GatewayError::BackendProtocol(
                "backend offered no supported SASL mechanism".to_string(),
            ));
        }
        let mut scram =
            sasl::ScramSha256::new(cfg.password.as_bytes(), sasl::ChannelBinding::unsupported());
        let mut buf = BytesMut::new();
        frontend::sasl_initial_response(sasl::SCRAM_SHA_256, scram.message(), &mut buf)?;
        self.stream.write_all(&buf).await?;
        loop {
            match self.read_message().await? {
                Message::AuthenticationSaslContinue(body) => {
                    scram.update(body.data())?;
                    let mut buf = BytesMut::new();
                    frontend::sasl_response(scram.message(), &mut buf)?;
                    self.stream.write_all(&buf).await?;
                }
                Message::AuthenticationSaslFinal(body) => {
                    scram.finish(body.data())?;
                    return Ok(());
                }
                Message::ErrorResponse(body) => return Err(parse_db_error(&body)?.into()),
                _ => {
                    return Err(GatewayError::BackendProtocol(
                        "unexpected message during SASL authentication".to_string(),
                    ))
                }
            }
        }
    }

    /// One simple-query round trip. Rows always arrive in text format, and
    /// the row description carries OID and typmod per column.
    pub async fn simple_query(&mut self, sql: &str) -> Result<QueryOutcome, GatewayError> {
        let mut buf = BytesMut::new();
        frontend::query(sql, &mut buf)?;
        if let Err(e) = self.stream.write_all(&buf).await {
            self.broken = true;
            return Err(e.into());
        }

        let mut outcome = QueryOutcome::default();
        let mut error: Option<DbError> = None;
        loop {
            match self.read_message().await? {
                Message::RowDescription(body) => {
                    let mut columns = Vec::new();
                    let mut fields = body.fields();
                    while let Some(field) = fields.next()? {
                        columns.push(PgColumn {
                            name: field.name().to_string(),
                            type_oid: field.type_oid(),
                            type_modifier: field.type_modifier(),
                        });
                    }
                    outcome.columns = columns;
                    outcome.rows.clear();
                }
                Message::DataRow(body) => {
                    let buffer = body.buffer();
                    let mut values = Vec::new();
                    let mut ranges = body.ranges();
                    while let Some(range) = ranges.next()? {
                        values
                            .push(range.map(|r| String::from_utf8_lossy(&buffer[r]).to_string()));
                    }
                    outcome.rows.push(values);
                }
                Message::CommandComplete(body) => {
                    outcome.command_tag = Some(body.tag()?.to_string());
                }
                Message::EmptyQueryResponse => {}
                Message::ErrorResponse(body) => {
                    if error.is_none() {
                        error = Some(parse_db_error(&body)?);
                    }
                }
                Message::NoticeResponse(_) | Message::ParameterStatus(_) => {}
                Message::ReadyForQuery(_) => break,
                _ => {}
            }
        }
        match error {
            Some(db) => Err(db.into()),
            None => Ok(outcome),
        }
    }

    /// After an abandoned query (statement timeout + cancel) drain to the
    /// next ReadyForQuery so the session can be reused.
    pub async fn resync(&mut self, deadline: Duration) -> Result<(), GatewayError> {
        let drain = async {
            loop {
                if let Message::ReadyForQuery(_) = self.read_message().await? {
                    return Ok::<(), GatewayError>(());
                }
            }
        };
        match tokio::time::timeout(deadline, drain).await {
            Ok(result) => result,
            Err(_) => {
                self.broken = true;
                Err(GatewayError::BackendProtocol(
                    "backend did not return to idle after cancel".to_string(),
                ))
            }
        }
    }

    /// Fire a CancelRequest over a fresh connection; the server then aborts
    /// the in-flight query of the session identified by `key`.
    pub async fn cancel(addr: (String, u16), key: CancelKey) -> std::io::Result<()> {
        let mut stream = TcpStream::connect((addr.0.as_str(), addr.1)).await?;
        let mut buf = BytesMut::new();
        frontend::cancel_request(key.process_id, key.secret_key, &mut buf);
        stream.write_all(&buf).await?;
        stream.shutdown().await
    }

    pub async fn terminate(mut self) {
        let mut buf = BytesMut::new();
        frontend::terminate(&mut buf);
        let _ = self.stream.write_all(&buf).await;
        let _ = self.stream.shutdown().await;
    }

    async fn read_message(&mut self) -> Result<Message, GatewayError> {
        loop {
            match backend::Message::parse(&mut self.recv) {
                Ok(Some(message)) => return Ok(message),
                Ok(None) => {}
                Err(e) => {
                    self.broken = true;
                    return Err(GatewayError::BackendProtocol(format!(
                        "bad backend message: {e}"
                    )));
                }
            }
            let read = match self.stream.read_buf(&mut self.recv).await {
                Ok(n) => n,
                Err(e) => {
                    self.broken = true;
                    return Err(e.into());
                }
            };
            if read == 0 {
                self.broken = true;
                return Err(GatewayError::BackendProtocol(
                    "backend closed the connection".to_string(),
                ));
            }
        }
    }
}

fn parse_db_error(body: &backend::ErrorResponseBody) -> Result<DbError, GatewayError> {
    let mut severity = "ERROR".to_string();
    let mut sqlstate = "HY000".to_string();
    let mut message = String::new();
    let mut fields = body.fields();
    while let Some(field) = fields.next()? {
        match field.type_() {
            b'S' => severity = field.value().to_string(),
            b'C' => sqlstate = field.value().to_string(),
            b'M' => message = field.value().to_string(),
            _ => {}
        }
    }
    Ok(DbError {
        severity,
        sqlstate,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::QueryOutcome;

    #[test]
    fn test_affected_rows_from_command_tag() {
        let mut outcome = QueryOutcome::default();
        assert_eq!(outcome.affected_rows(), 0);
        outcome.command_tag = Some("UPDATE 3".to_string());
        assert_eq!(outcome.affected_rows(), 3);
        outcome.command_tag = Some("INSERT 0 1".to_string());
        assert_eq!(outcome.affected_rows(), 1);
        outcome.command_tag = Some("CREATE TABLE".to_string());
        assert_eq!(outcome.affected_rows(), 0);
    }

    #[test]
    fn test_returns_rows_follows_description() {
        let outcome = QueryOutcome::default();
        assert!(!outcome.returns_rows());
    }
}
