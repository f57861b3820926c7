use crate::protocol::mysql::constants::CommandCode;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;

use async_trait::async_trait;
use common::metrics::common_labels;
use mysql_common::constants::CapabilityFlags;
use num_traits::FromPrimitive;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::io::AsyncWrite;

pub mod auth;
pub mod bridge;
pub mod gateway_cli_args;
pub mod gateway_server;
pub mod handshake;
pub mod metadata;
pub mod resultset;
pub mod session;

/// Version string announced in the initial handshake. The mysql client
/// keys protocol behavior off the leading "8.0".
pub const SERVER_VERSION: &[u8] = b"8.0.35-pg-gateway";

pub const GATEWAY_COM_METRIC_LABEL_KEY: &str = "gateway_com";

pub static DEFAULT_CAPABILITIES_ONCE: OnceLock<CapabilityFlags> = OnceLock::new();

/// Capabilities the gateway itself honors. Multi-statement support is
/// deliberately absent; the rewrite engine takes exactly one statement.
pub fn default_capabilities() -> CapabilityFlags {
    *DEFAULT_CAPABILITIES_ONCE.get_or_init(|| {
        CapabilityFlags::CLIENT_CONNECT_ATTRS
            | CapabilityFlags::CLIENT_CONNECT_WITH_DB
            | CapabilityFlags::CLIENT_DEPRECATE_EOF
            | CapabilityFlags::CLIENT_LONG_FLAG
            | CapabilityFlags::CLIENT_LONG_PASSWORD
            | CapabilityFlags::CLIENT_PLUGIN_AUTH
            | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
            | CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_TRANSACTIONS
    })
}

static GATEWAY_COM: OnceLock<HashMap<u8, Vec<(&'static str, String)>>> = OnceLock::new();

/// Per-command metric labels, keyed by the raw command byte.
pub fn init_sql_com_labels() -> &'static HashMap<u8, Vec<(&'static str, String)>> {
    GATEWAY_COM.get_or_init(|| {
        let process_labels = common_labels();
        let mut all_labels = HashMap::new();
        for code in 0..=(CommandCode::ComEnd as u8) {
            let Some(command) = CommandCode::from_u8(code) else {
                continue;
            };
            let mut labels = vec![(GATEWAY_COM_METRIC_LABEL_KEY, command.as_ref().to_string())];
            labels.extend(process_labels.iter().cloned());
            all_labels.insert(code, labels);
        }
        all_labels
    })
}

/// [`CmdHandler`] is the MySQL-facing half of the bridge: one instance per
/// client connection, fed decoded commands by the server loop. Transport
/// faults surface as `io::Error`; statement-level failures are answered
/// with MySQL error packets inside the handler.
#[async_trait]
pub trait CmdHandler: Send {
    /// Verify the scrambled `mysql_native_password` token.
    async fn authenticate(&mut self, user: &str, auth_response: &[u8], scramble: &[u8]) -> bool;

    async fn on_init<W>(
        &mut self,
        schema: &[u8],
        pkt_writer: &mut PacketWriter<W>,
    ) -> Result<(), std::io::Error>
    where
        W: AsyncWrite + Send + Unpin;

    async fn on_query<W>(
        &mut self,
        sql: &[u8],
        pkt_writer: &mut PacketWriter<W>,
    ) -> Result<(), std::io::Error>
    where
        W: AsyncWrite + Send + Unpin;

    async fn on_prepare<W>(
        &mut self,
        sql: &[u8],
        pkt_writer: &mut PacketWriter<W>,
    ) -> Result<(), std::io::Error>
    where
        W: AsyncWrite + Send + Unpin;

    async fn on_execute<W>(
        &mut self,
        stmt_id: u32,
        params: &[u8],
        pkt_writer: &mut PacketWriter<W>,
    ) -> Result<(), std::io::Error>
    where
        W: AsyncWrite + Send + Unpin;

    /// COM_STMT_CLOSE gets no reply on the wire.
    async fn on_close(&mut self, stmt_id: u32);

    async fn on_field_list<W>(
        &mut self,
        payload: &[u8],
        pkt_writer: &mut PacketWriter<W>,
    ) -> Result<(), std::io::Error>
    where
        W: AsyncWrite + Send + Unpin;

    async fn on_ping<W>(
        &mut self,
        pkt_writer: &mut PacketWriter<W>,
    ) -> Result<(), std::io::Error>
    where
        W: AsyncWrite + Send + Unpin;

    async fn on_reset_connection<W>(
        &mut self,
        pkt_writer: &mut PacketWriter<W>,
    ) -> Result<(), std::io::Error>
    where
        W: AsyncWrite + Send + Unpin;

    /// Roll back any open transaction and release the pinned backend
    /// session. Runs on COM_QUIT and on transport close.
    async fn teardown(&mut self);
}
