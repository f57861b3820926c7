//! The per-connection protocol bridge: terminates MySQL commands, drives
//! the pinned PostgreSQL session, and re-encodes replies.

use crate::backend::pg_session::{PgSession, QueryOutcome};
use crate::backend::schema_cache::SchemaCache;
use crate::backend::{BackendMgr, PooledSession};
use crate::protocol::mysql::basic::{Field, OkPacket};
use crate::protocol::mysql::binary::{parse_execute_params, BinValue};
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::writers;
use crate::rewrite::postprocess::{tokenize, TokKind};
use crate::rewrite::{
    classify, ddl_target_table, insert_target_table, is_ddl, is_insert, returns_rows,
    IdentityHint, Rewriter, StatementClass,
};
use crate::server::auth::{verify_native_password, AuthCredentials};
use crate::server::metadata::{self, MetaOutcome, SetDirective};
use crate::server::resultset::{self, project_outcome, Resultset, Wire};
use crate::server::session::Session;
use crate::server::CmdHandler;
use crate::translate::errors::GatewayError;
use crate::translate::types::{
    oid_from_udt_name, project_column, quote_ident, quote_literal, render_pg_literal,
};

use async_trait::async_trait;
use common::metrics::metric_def::GATEWAY_MAPPED_ERRORS;
use common::metrics::{common_labels, counter_inc};
use mysql_common::constants::{CapabilityFlags, ColumnFlags, StatusFlags};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

/// What one dispatched statement produced.
enum Reply {
    Rows(Resultset),
    Ok {
        affected_rows: u64,
        last_insert_id: u64,
    },
}

pub struct QueryBridge {
    session: Session,
    client_caps: CapabilityFlags,
    backend: Arc<BackendMgr>,
    rewriter: Arc<Rewriter>,
    schema_cache: Arc<SchemaCache>,
    credentials: AuthCredentials,
    statement_timeout: Option<Duration>,
    pg: Option<PooledSession>,
}

impl QueryBridge {
    pub fn new(
        session: Session,
        client_caps: CapabilityFlags,
        backend: Arc<BackendMgr>,
        rewriter: Arc<Rewriter>,
        schema_cache: Arc<SchemaCache>,
        credentials: AuthCredentials,
        statement_timeout: Option<Duration>,
    ) -> Self {
        Self {
            session,
            client_caps,
            backend,
            rewriter,
            schema_cache,
            credentials,
            statement_timeout,
            pg: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn ok_status(&self) -> StatusFlags {
        let mut status = StatusFlags::empty();
        if self.session.autocommit {
            status |= StatusFlags::SERVER_STATUS_AUTOCOMMIT;
        }
        if self.session.in_transaction {
            status |= StatusFlags::SERVER_STATUS_IN_TRANS;
        }
        status
    }

    /// The pinned backend session, acquired from the pool on first use and
    /// held until teardown.
    async fn pg(&mut self) -> Result<&mut PgSession, GatewayError> {
        if self.pg.is_none() {
            let mut pooled = self.backend.acquire().await?;
            if !self.session.database.is_empty() {
                let sql = format!(
                    "SET search_path TO {}",
                    quote_ident(&self.session.database)
                );
                pooled.session.simple_query(&sql).await?;
            }
            debug!(
                "GatewaySrv session {} pinned backend conn id={}",
                self.session.id, pooled.id
            );
            self.pg = Some(pooled);
        }
        match self.pg.as_mut() {
            Some(pooled) => Ok(&mut pooled.session),
            None => Err(GatewayError::BackendProtocol(
                "backend session not available".to_string(),
            )),
        }
    }

    /// Run one statement on the pinned session, with the configured
    /// statement timeout driving the backend cancel mechanism.
    async fn exec(&mut self, sql: &str) -> Result<QueryOutcome, GatewayError> {
        let limit = self.statement_timeout;
        let pg = self.pg().await?;
        match limit {
            None => pg.simple_query(sql).await,
            Some(limit) => match tokio::time::timeout(limit, pg.simple_query(sql)).await {
                Ok(result) => result,
                Err(_) => {
                    let key = pg.cancel_key();
                    let addr = pg.backend_addr();
                    tokio::spawn(async move {
                        if let Err(e) = PgSession::cancel(addr, key).await {
                            warn!("GatewaySrv backend cancel request failed: {e}");
                        }
                    });
                    if let Err(e) = pg.resync(Duration::from_secs(5)).await {
                        warn!("GatewaySrv backend resync after cancel failed: {e}");
                    }
                    Err(GatewayError::QueryInterrupted)
                }
            },
        }
    }

    async fn dispatch_sql(&mut self, sql: &str) -> Result<Reply, GatewayError> {
        match classify(sql) {
            StatementClass::Metadata => self.run_metadata(sql).await,
            StatementClass::Set => {
                self.run_set(sql).await?;
                Ok(self.simple_ok())
            }
            StatementClass::Use => {
                let database = metadata::use_target(sql)
                    .ok_or_else(|| GatewayError::Unsupported(sql.to_string()))?;
                self.switch_database(&database).await?;
                Ok(self.simple_ok())
            }
            StatementClass::Begin => {
                self.exec("BEGIN").await?;
                self.session.in_transaction = true;
                Ok(self.simple_ok())
            }
            StatementClass::Commit => {
                self.exec("COMMIT").await?;
                self.session.in_transaction = false;
                Ok(self.simple_ok())
            }
            StatementClass::Rollback => {
                self.exec("ROLLBACK").await?;
                self.session.in_transaction = false;
                Ok(self.simple_ok())
            }
            StatementClass::Query => self.run_sql(sql).await,
        }
    }

    fn simple_ok(&self) -> Reply {
        Reply::Ok {
            affected_rows: 0,
            last_insert_id: 0,
        }
    }

    async fn run_metadata(&mut self, sql: &str) -> Result<Reply, GatewayError> {
        match metadata::emulate_show(sql, &self.session.database, self.session.autocommit)? {
            MetaOutcome::BackendSql(pg_sql) => {
                let outcome = self.exec(&pg_sql).await?;
                Ok(Reply::Rows(project_outcome(&outcome)))
            }
            MetaOutcome::LocalRows { fields, rows } => {
                Ok(Reply::Rows(Resultset::new(fields, rows)))
            }
        }
    }

    async fn run_set(&mut self, sql: &str) -> Result<(), GatewayError> {
        for directive in metadata::parse_set(sql) {
            match directive {
                SetDirective::Autocommit(on) => self.set_autocommit(on).await?,
                SetDirective::Names(charset) => {
                    if charset != "utf8" && charset != "utf8mb4" {
                        return Err(GatewayError::Unsupported(format!("SET NAMES {charset}")));
                    }
                    self.session.charset = charset;
                }
                SetDirective::SessionVar(name, value) => {
                    self.session.session_vars.insert(name, value);
                }
                SetDirective::UserVar(name, value) => {
                    self.session.user_vars.insert(name, value);
                }
                SetDirective::Ignored => {}
            }
        }
        Ok(())
    }

    /// `SET AUTOCOMMIT=0` implicitly opens a transaction; `=1` commits a
    /// pending one.
    async fn set_autocommit(&mut self, on: bool) -> Result<(), GatewayError> {
        if on {
            if self.session.in_transaction {
                self.exec("COMMIT").await?;
                self.session.in_transaction = false;
            }
        } else if !self.session.in_transaction {
            self.exec("BEGIN").await?;
            self.session.in_transaction = true;
        }
        self.session.autocommit = on;
        Ok(())
    }

    async fn switch_database(&mut self, database: &str) -> Result<(), GatewayError> {
        self.session.database = database.to_string();
        if self.pg.is_some() {
            let sql = format!("SET search_path TO {}", quote_ident(database));
            self.pg().await?.simple_query(&sql).await?;
        }
        Ok(())
    }

    /// Identity-column lookup for an INSERT, feeding both the
    /// `NULL`→`DEFAULT` hint and the `RETURNING` column.
    async fn identity_column_for(&mut self, sql: &str) -> (Option<String>, IdentityHint) {
        let Some((db, table)) = insert_target_table(sql) else {
            return (None, IdentityHint::Unknown);
        };
        let database = db.unwrap_or_else(|| self.session.database.clone());
        let cache = Arc::clone(&self.schema_cache);
        let pg = match self.pg().await {
            Ok(pg) => pg,
            Err(e) => {
                warn!("GatewaySrv identity probe could not reach backend: {e}");
                return (None, IdentityHint::Unknown);
            }
        };
        match cache.auto_increment_column(pg, &database, &table).await {
            Ok(Some(column)) => (Some(column), IdentityHint::FirstColumn),
            Ok(None) => (None, IdentityHint::NoIdentity),
            Err(e) => {
                warn!("GatewaySrv identity probe failed for {database}.{table}: {e}");
                (None, IdentityHint::Unknown)
            }
        }
    }

    async fn run_sql(&mut self, sql: &str) -> Result<Reply, GatewayError> {
        let (identity_col, hint) = if is_insert(sql) {
            self.identity_column_for(sql).await
        } else {
            (None, IdentityHint::Unknown)
        };
        let rewritten = self.rewriter.rewrite_with_hint(sql, hint)?;
        self.execute_rewritten(sql, &rewritten.pg_sql, identity_col)
            .await
    }

    /// Execute a rewritten statement; for INSERTs try the `RETURNING <id>`
    /// form first so `last_insert_id` can be captured, falling back to the
    /// plain form when the backend rejects it.
    async fn execute_rewritten(
        &mut self,
        original: &str,
        pg_sql: &str,
        identity_col: Option<String>,
    ) -> Result<Reply, GatewayError> {
        if is_insert(original) {
            if let Some(column) = identity_col {
                let has_returning = tokenize(pg_sql).iter().any(|t| t.is_word("RETURNING"));
                if !has_returning {
                    let with_returning =
                        format!("{pg_sql} RETURNING {}", quote_ident(&column));
                    match self.exec(&with_returning).await {
                        Ok(outcome) => {
                            let id = outcome
                                .rows
                                .first()
                                .and_then(|row| row.first())
                                .and_then(|v| v.as_ref())
                                .and_then(|v| v.parse::<u64>().ok())
                                .unwrap_or(0);
                            if id != 0 {
                                self.session.last_insert_id = id;
                            }
                            return Ok(Reply::Ok {
                                affected_rows: outcome.affected_rows(),
                                last_insert_id: id,
                            });
                        }
                        Err(GatewayError::Backend(db)) => {
                            debug!("GatewaySrv RETURNING form rejected, retrying plain: {db}");
                        }
                        Err(other) => return Err(other),
                    }
                }
            }
        }

        let outcome = self.exec(pg_sql).await?;
        if is_ddl(original) {
            if let Some((db, table)) = ddl_target_table(original) {
                let database = db.unwrap_or_else(|| self.session.database.clone());
                self.schema_cache.invalidate(&database, &table);
            }
        }
        if outcome.returns_rows() {
            Ok(Reply::Rows(project_outcome(&outcome)))
        } else {
            Ok(Reply::Ok {
                affected_rows: outcome.affected_rows(),
                last_insert_id: 0,
            })
        }
    }

    async fn write_reply<W>(
        &mut self,
        reply: Reply,
        wire: Wire,
        w: &mut PacketWriter<W>,
    ) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        match reply {
            Reply::Rows(rs) => {
                resultset::write_resultset(w, self.client_caps, &rs, wire, self.ok_status()).await
            }
            Reply::Ok {
                affected_rows,
                last_insert_id,
            } => {
                writers::write_ok_packet(
                    w,
                    self.client_caps,
                    OkPacket {
                        header: 0x00,
                        affected_rows,
                        last_insert_id,
                        status_flags: self.ok_status(),
                        warnings: 0,
                        info: String::new(),
                    },
                )
                .await
            }
        }
    }

    async fn send_error<W>(&mut self, err: GatewayError, w: &mut PacketWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let (code, sqlstate, message) = err.to_mysql();
        counter_inc(GATEWAY_MAPPED_ERRORS, Some(common_labels()));
        debug!("GatewaySrv replying error {code}: {message}");
        writers::write_err_packet(w, code, &sqlstate, &message).await
    }

    /// Substitute `$n` markers with rendered literals; tokens inside string
    /// literals are left alone.
    fn bind_parameters(pg_sql: &str, args: &[BinValue]) -> Result<String, GatewayError> {
        let toks = tokenize(pg_sql);
        let mut edits: Vec<(usize, usize, String)> = Vec::new();
        for pair in toks.windows(2) {
            let (dollar, number) = (&pair[0], &pair[1]);
            if !dollar.is_sym('$') || number.kind != TokKind::Number || dollar.end != number.start
            {
                continue;
            }
            let index: usize = number.text.parse().map_err(|_| {
                GatewayError::Protocol(format!("bad parameter marker ${}", number.text))
            })?;
            let value = args.get(index.wrapping_sub(1)).ok_or_else(|| {
                GatewayError::Protocol(format!(
                    "statement needs parameter ${index} but only {} were bound",
                    args.len()
                ))
            })?;
            edits.push((dollar.start, number.end, render_pg_literal(value)));
        }
        let mut bound = pg_sql.to_string();
        for (start, end, text) in edits.into_iter().rev() {
            bound.replace_range(start..end, &text);
        }
        Ok(bound)
    }
}

#[async_trait]
impl CmdHandler for QueryBridge {
    async fn authenticate(&mut self, user: &str, auth_response: &[u8], scramble: &[u8]) -> bool {
        user == self.credentials.user
            && verify_native_password(scramble, &self.credentials.password, auth_response)
    }

    async fn on_init<W>(&mut self, schema: &[u8], pkt_writer: &mut PacketWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let database = String::from_utf8_lossy(schema)
            .trim_end_matches('\0')
            .to_string();
        match self.switch_database(&database).await {
            Ok(()) => {
                let reply = self.simple_ok();
                self.write_reply(reply, Wire::Text, pkt_writer).await
            }
            Err(e) => self.send_error(e, pkt_writer).await,
        }
    }

    async fn on_query<W>(&mut self, sql: &[u8], pkt_writer: &mut PacketWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let sql = String::from_utf8_lossy(sql).to_string();
        match self.dispatch_sql(sql.trim()).await {
            Ok(reply) => self.write_reply(reply, Wire::Text, pkt_writer).await,
            Err(e) => self.send_error(e, pkt_writer).await,
        }
    }

    async fn on_prepare<W>(&mut self, sql: &[u8], pkt_writer: &mut PacketWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let sql = String::from_utf8_lossy(sql).trim().to_string();
        let (pg_sql, param_count) = if classify(&sql) == StatementClass::Query {
            match self.rewriter.rewrite(&sql) {
                Ok(rewritten) => (rewritten.pg_sql, rewritten.param_count),
                Err(e) => return self.send_error(e, pkt_writer).await,
            }
        } else {
            // SHOW and friends go back through the emulator on execute
            (sql.clone(), 0)
        };
        let num_columns = if returns_rows(&sql) { 1 } else { 0 };
        let stmt_id = self
            .session
            .register_statement(sql, pg_sql, param_count);
        writers::write_prepare_ok(
            pkt_writer,
            stmt_id,
            num_columns,
            param_count,
            self.client_caps,
        )
        .await
    }

    async fn on_execute<W>(
        &mut self,
        stmt_id: u32,
        params: &[u8],
        pkt_writer: &mut PacketWriter<W>,
    ) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let Some(stmt) = self.session.statement(stmt_id).cloned() else {
            return self
                .send_error(GatewayError::UnknownStatement(stmt_id), pkt_writer)
                .await;
        };
        let (args, types) = match parse_execute_params(
            params,
            stmt.param_count as usize,
            stmt.param_types.as_deref(),
        ) {
            Ok(decoded) => decoded,
            Err(message) => {
                return self
                    .send_error(GatewayError::Protocol(message), pkt_writer)
                    .await
            }
        };
        if !types.is_empty() {
            if let Some(live) = self.session.statement_mut(stmt_id) {
                live.param_types = Some(types);
            }
        }

        let result = if classify(&stmt.mysql_sql) == StatementClass::Query {
            match Self::bind_parameters(&stmt.pg_sql, &args) {
                Ok(bound) => {
                    let (identity_col, _) = if is_insert(&stmt.mysql_sql) {
                        self.identity_column_for(&stmt.mysql_sql).await
                    } else {
                        (None, IdentityHint::Unknown)
                    };
                    self.execute_rewritten(&stmt.mysql_sql, &bound, identity_col)
                        .await
                }
                Err(e) => Err(e),
            }
        } else {
            self.dispatch_sql(&stmt.mysql_sql).await
        };

        match result {
            Ok(reply) => self.write_reply(reply, Wire::Binary, pkt_writer).await,
            Err(e) => self.send_error(e, pkt_writer).await,
        }
    }

    async fn on_close(&mut self, stmt_id: u32) {
        self.session.remove_statement(stmt_id);
    }

    async fn on_field_list<W>(
        &mut self,
        payload: &[u8],
        pkt_writer: &mut PacketWriter<W>,
    ) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let table_bytes = payload.split(|&b| b == 0).next().unwrap_or(payload);
        let table = String::from_utf8_lossy(table_bytes).to_string();
        let schema_expr = if self.session.database.is_empty() {
            "current_schema()".to_string()
        } else {
            quote_literal(&self.session.database)
        };
        let sql = format!(
            "SELECT column_name, udt_name, is_nullable FROM information_schema.columns \
             WHERE table_schema = {schema_expr} AND table_name = {} \
             ORDER BY ordinal_position",
            quote_literal(&table),
        );
        let outcome = match self.exec(&sql).await {
            Ok(outcome) => outcome,
            Err(e) => return self.send_error(e, pkt_writer).await,
        };
        let fields: Vec<_> = outcome
            .rows
            .iter()
            .map(|row| {
                let name = row.first().and_then(|v| v.clone()).unwrap_or_default();
                let udt = row.get(1).and_then(|v| v.clone()).unwrap_or_default();
                let not_null = row.get(2).and_then(|v| v.as_deref()) == Some("NO");
                let projection = project_column(oid_from_udt_name(&udt), -1);
                let mut flags = projection.flags;
                if not_null {
                    flags |= ColumnFlags::NOT_NULL_FLAG;
                }
                Field {
                    schema: self.session.database.clone(),
                    table: table.clone(),
                    org_table: table.clone(),
                    name,
                    org_name: String::new(),
                    charset: projection.charset,
                    column_length: projection.column_length,
                    column_type: projection.tag,
                    flags,
                    decimals: projection.decimals,
                }
            })
            .collect();
        // suppress the per-definition EOF and close the list explicitly
        writers::write_column_definitions(
            &fields,
            pkt_writer,
            self.client_caps | CapabilityFlags::CLIENT_DEPRECATE_EOF,
            true,
        )
        .await?;
        writers::write_resultset_end(pkt_writer, self.client_caps, self.ok_status()).await
    }

    async fn on_ping<W>(&mut self, pkt_writer: &mut PacketWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let reply = self.simple_ok();
        self.write_reply(reply, Wire::Text, pkt_writer).await
    }

    async fn on_reset_connection<W>(&mut self, pkt_writer: &mut PacketWriter<W>) -> io::Result<()>
    where
        W: AsyncWrite + Send + Unpin,
    {
        if self.session.in_transaction {
            if let Some(pooled) = self.pg.as_mut() {
                let _ = pooled.session.simple_query("ROLLBACK").await;
            }
            self.session.in_transaction = false;
        }
        self.session.clear_statements();
        self.session.user_vars.clear();
        self.session.session_vars.clear();
        self.session.last_insert_id = 0;
        self.session.autocommit = true;
        let reply = self.simple_ok();
        self.write_reply(reply, Wire::Text, pkt_writer).await
    }

    async fn teardown(&mut self) {
        if self.session.in_transaction {
            if let Some(pooled) = self.pg.as_mut() {
                let _ = pooled.session.simple_query("ROLLBACK").await;
            }
            self.session.in_transaction = false;
        }
        self.session.clear_statements();
        // dropping the pool object hands the backend session back
        self.pg = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_parameters_in_order() {
        let bound = QueryBridge::bind_parameters(
            "INSERT INTO \"t\" (\"name\", \"price\") VALUES ($1, $2)",
            &[BinValue::Bytes(b"X".to_vec()), BinValue::Double(12.5)],
        )
        .unwrap();
        assert_eq!(
            bound,
            "INSERT INTO \"t\" (\"name\", \"price\") VALUES ('X', 12.5)"
        );
    }

    #[test]
    fn test_bind_parameters_skips_literals_and_repeats() {
        let bound = QueryBridge::bind_parameters(
            "SELECT '$1' AS tag, \"a\" FROM \"t\" WHERE \"a\" = $1 OR \"b\" = $1",
            &[BinValue::Int(7)],
        )
        .unwrap();
        assert_eq!(
            bound,
            "SELECT '$1' AS tag, \"a\" FROM \"t\" WHERE \"a\" = 7 OR \"b\" = 7"
        );
    }

    #[test]
    fn test_bind_parameters_missing_argument() {
        let err = QueryBridge::bind_parameters("SELECT $1, $2", &[BinValue::Int(1)]).unwrap_err();
        assert!(matches!(err, GatewayError::Protocol(_)));
    }

    #[test]
    fn test_bind_parameters_escapes_strings() {
        let bound = QueryBridge::bind_parameters(
            "SELECT * FROM \"t\" WHERE \"name\" = $1",
            &[BinValue::Bytes(b"O'Brien".to_vec())],
        )
        .unwrap();
        assert_eq!(bound, "SELECT * FROM \"t\" WHERE \"name\" = 'O''Brien'");
    }
}
