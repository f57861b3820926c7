use crate::protocol::mysql::constants::CommandCode;

use hashbrown::HashMap;
use mysql_common::constants::{CapabilityFlags, StatusFlags};
use num_traits::FromPrimitive;
use winnow::binary::{le_u16, le_u32, le_u8};
use winnow::prelude::*;
use winnow::token::{literal, take, take_until};
use winnow::Parser;

/// One client command, borrowed straight from the packet payload.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Query(&'a [u8]),
    ListFields(&'a [u8]),
    Close(u32),
    Reset(u32),
    Prepare(&'a [u8]),
    Init(&'a [u8]),
    Execute {
        stmt: u32,
        params: &'a [u8],
    },
    SendLongData {
        stmt: u32,
        param: u16,
        data: &'a [u8],
    },
    Ping,
    Quit,
    ResetConnection,
}

/// One column definition of a resultset, with every wire attribute set
/// explicitly. `column_length` is never zero; `charset` is 63 for binary
/// payloads and 33 for text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub schema: String,
    /// The (aliased) table this column belongs to.
    pub table: String,
    pub org_table: String,
    /// The (aliased) column name.
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: mysql_common::constants::ColumnType,
    pub flags: mysql_common::constants::ColumnFlags,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OkPacket {
    /// header, 0x00 for OK and 0xfe for the EOF-shaped trailer
    pub header: u8,
    /// affected rows in update/insert
    pub affected_rows: u64,
    /// insert_id in update/insert
    pub last_insert_id: u64,
    /// StatusFlags associated with this command
    pub status_flags: StatusFlags,
    /// Warnings
    pub warnings: u16,
    /// Extra information
    pub info: String,
}

/// `HandshakeResponse` represents the client's reply to the initial
/// handshake packet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HandshakeResponse {
    pub client_flag: CapabilityFlags,
    pub max_packet_len: u32,
    pub collation: u16,
    pub username: Option<Vec<u8>>,
    pub auth_response: Vec<u8>,
    pub auth_plugin: Vec<u8>,
    pub database: Option<Vec<u8>>,
    pub connect_attributes: Option<HashMap<String, String>>,
}

impl Default for HandshakeResponse {
    fn default() -> Self {
        Self {
            client_flag: CapabilityFlags::empty(),
            max_packet_len: 0,
            collation: 0,
            username: None,
            auth_response: vec![],
            auth_plugin: vec![],
            database: None,
            connect_attributes: None,
        }
    }
}

impl HandshakeResponse {
    pub fn username_str(&self) -> String {
        match &self.username {
            Some(username) => String::from_utf8_lossy(username).to_string(),
            None => String::new(),
        }
    }

    pub fn database_str(&self) -> Option<String> {
        self.database
            .as_ref()
            .map(|db| String::from_utf8_lossy(db).to_string())
    }
}

fn read_length_encoded_string(i: &[u8]) -> winnow::IResult<&[u8], &[u8]> {
    let (input, len) = read_length_encoded_number(i)?;
    take(len).parse_peek(input)
}

pub fn read_length_encoded_number(i: &[u8]) -> winnow::IResult<&[u8], u64> {
    let (i, b) = le_u8.parse_peek(i)?;
    let r_size: usize = match b {
        0xfb => return Ok((i, 0)),
        0xfc => 2,
        0xfd => 3,
        0xfe => 8,
        _ => return Ok((i, b as u64)),
    };
    let mut bytes = [0u8; 8];
    let (i, b) = take(r_size).parse_peek(i)?;
    bytes[..r_size].copy_from_slice(b);
    Ok((i, u64::from_le_bytes(bytes)))
}

/// Parse the HandshakeResponse41 payload. Pre-4.1 clients only ever get far
/// enough for the capability check in the server to reject them.
pub fn client_handshake_response(
    i: &[u8],
    is_after_tls: bool,
) -> winnow::IResult<&[u8], HandshakeResponse> {
    let (i, capability_flags) = le_u16.parse_peek(i)?;
    let mut capabilities = CapabilityFlags::from_bits_truncate(capability_flags as u32);
    if !capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        return Ok((
            i,
            HandshakeResponse {
                client_flag: capabilities,
                ..Default::default()
            },
        ));
    }

    let (i, cap2) = le_u16.parse_peek(i)?;
    let cap = (cap2 as u32) << 16 | capability_flags as u32;
    capabilities = CapabilityFlags::from_bits_truncate(cap);

    let (i, max_packet_len) = le_u32.parse_peek(i)?;
    let (i, collation) = take(1u8).parse_peek(i)?;
    let (i, _filler) = take(23u8).parse_peek(i)?;

    // before the TLS upgrade an SSLRequest packet stops right here
    if !is_after_tls && capabilities.contains(CapabilityFlags::CLIENT_SSL) {
        return Ok((
            i,
            HandshakeResponse {
                client_flag: capabilities,
                max_packet_len,
                collation: u16::from(collation[0]),
                ..Default::default()
            },
        ));
    }

    let (i, username) = {
        let (i, user) = take_until(1.., "\0").parse_peek(i)?;
        let (i, _) = literal(b"\0").parse_peek(i)?;
        (i, Some(user.to_owned()))
    };
    let (i, auth_response) =
        if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
            let (i, size) = read_length_encoded_number(i)?;
            take(size).parse_peek(i)?
        } else if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
            let (i, size) = le_u8.parse_peek(i)?;
            take(size).parse_peek(i)?
        } else {
            take_until(1.., "\0").parse_peek(i)?
        };

    let (i, db) = if capabilities.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB) && !i.is_empty()
    {
        let (i, db) = take_until(1.., "\0").parse_peek(i)?;
        let (i, _) = literal(b"\0").parse_peek(i)?;
        (i, Some(db))
    } else {
        (i, None)
    };

    let (i, auth_plugin) = if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
        && !i.is_empty()
    {
        let (i, auth_plugin) = take_until(1.., "\0").parse_peek(i)?;
        let (i, _) = literal("\0").parse_peek(i)?;
        (i, auth_plugin)
    } else {
        (i, &b""[..])
    };

    let (i, connect_attributes) = if capabilities.contains(CapabilityFlags::CLIENT_CONNECT_ATTRS)
        && !i.is_empty()
    {
        let (i, data_len) = read_length_encoded_number(i)?;
        let (i, data) = take(data_len).parse_peek(i)?;
        let mut input = data;
        let mut connect_attributes = HashMap::new();
        while !input.is_empty() {
            let (remaining, k) = read_length_encoded_string(input)?;
            let (remaining, v) = read_length_encoded_string(remaining)?;
            let conn_attr_key = String::from_utf8_lossy(k).to_string();
            let conn_attr_val = String::from_utf8_lossy(v).to_string();
            connect_attributes.insert(conn_attr_key, conn_attr_val);
            input = remaining;
        }
        (i, Some(connect_attributes))
    } else {
        (i, None)
    };

    Ok((
        i,
        HandshakeResponse {
            client_flag: capabilities,
            max_packet_len,
            collation: u16::from(collation[0]),
            username,
            auth_response: auth_response.to_vec(),
            auth_plugin: auth_plugin.to_vec(),
            database: db.map(|c| c.to_vec()),
            connect_attributes,
        },
    ))
}

fn parse_execute(rest: &[u8]) -> Option<Command<'_>> {
    let (rest, stmt) = le_u32::<_, winnow::error::InputError<&[u8]>>
        .parse_peek(rest)
        .ok()?;
    let (rest, _flags) = take::<_, _, winnow::error::InputError<&[u8]>>(1u8)
        .parse_peek(rest)
        .ok()?;
    let (params, _iterations) = le_u32::<_, winnow::error::InputError<&[u8]>>
        .parse_peek(rest)
        .ok()?;
    Some(Command::Execute { stmt, params })
}

fn parse_send_long_data(rest: &[u8]) -> Option<Command<'_>> {
    let (rest, stmt) = le_u32::<_, winnow::error::InputError<&[u8]>>
        .parse_peek(rest)
        .ok()?;
    let (data, param) = le_u16::<_, winnow::error::InputError<&[u8]>>
        .parse_peek(rest)
        .ok()?;
    Some(Command::SendLongData { stmt, param, data })
}

fn parse_stmt_id(rest: &[u8]) -> Option<u32> {
    le_u32::<_, winnow::error::InputError<&[u8]>>
        .parse_peek(rest)
        .ok()
        .map(|(_, id)| id)
}

/// Decode a command packet. `Err` carries the raw command byte so the
/// caller can answer with `ER_UNKNOWN_COM_ERROR`.
pub fn from_packet(pkt: &[u8]) -> Result<Command<'_>, u8> {
    let Some((&code, rest)) = pkt.split_first() else {
        return Err(0);
    };
    match CommandCode::from_u8(code) {
        Some(CommandCode::ComQuery) => Ok(Command::Query(rest)),
        Some(CommandCode::ComFieldList) => Ok(Command::ListFields(rest)),
        Some(CommandCode::ComInitDB) => Ok(Command::Init(rest)),
        Some(CommandCode::ComStmtPrepare) => Ok(Command::Prepare(rest)),
        Some(CommandCode::ComStmtExecute) => parse_execute(rest).ok_or(code),
        Some(CommandCode::ComStmtSendLongData) => parse_send_long_data(rest).ok_or(code),
        Some(CommandCode::ComStmtClose) => parse_stmt_id(rest).map(Command::Close).ok_or(code),
        Some(CommandCode::ComStmtReset) => parse_stmt_id(rest).map(Command::Reset).ok_or(code),
        Some(CommandCode::ComPing) => Ok(Command::Ping),
        Some(CommandCode::ComQuit) => Ok(Command::Quit),
        Some(CommandCode::ComResetConnection) => Ok(Command::ResetConnection),
        _ => Err(code),
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::mysql::basic::{client_handshake_response, from_packet, Command};
    use crate::protocol::mysql::packet::packet_reader::PacketReader;
    use mysql_common::constants::CapabilityFlags;
    use std::io::Cursor;

    #[tokio::test]
    pub async fn test_handshake_parse() {
        let bytes = &[
            0x5b, 0x00, 0x00, 0x01, 0x8d, 0xa6, 0xff, 0x09, 0x00, 0x00, 0x00, 0x01, 0x21, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x64, 0x65, 0x66, 0x61, 0x75, 0x6c,
            0x74, 0x00, 0x14, 0xf7, 0xd1, 0x6c, 0xe9, 0x0d, 0x2f, 0x34, 0xb0, 0x2f, 0xd8, 0x1d,
            0x18, 0xc7, 0xa4, 0xe8, 0x98, 0x97, 0x67, 0xeb, 0xad, 0x64, 0x65, 0x66, 0x61, 0x75,
            0x6c, 0x74, 0x00, 0x6d, 0x79, 0x73, 0x71, 0x6c, 0x5f, 0x6e, 0x61, 0x74, 0x69, 0x76,
            0x65, 0x5f, 0x70, 0x61, 0x73, 0x73, 0x77, 0x6f, 0x72, 0x64, 0x00,
        ];
        let cursor = Cursor::new(&bytes[..]);
        let mut packet_reader = PacketReader::new(cursor);
        let (_, packet) = packet_reader.next_async().await.unwrap().unwrap();

        let handshake_rs = client_handshake_response(&packet, false);
        assert!(handshake_rs.is_ok());
        let handshake = handshake_rs.unwrap().1;
        assert!(handshake
            .client_flag
            .contains(CapabilityFlags::CLIENT_PROTOCOL_41));
        assert!(handshake
            .client_flag
            .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB));
        assert!(handshake
            .client_flag
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF));
        assert_eq!(handshake.collation, 33);
        assert_eq!(handshake.username.unwrap(), &b"default"[..]);
        assert_eq!(handshake.database.unwrap(), &b"default"[..]);
        assert_eq!(handshake.auth_plugin, b"mysql_native_password");
        assert_eq!(handshake.max_packet_len, 16777216);
    }

    #[tokio::test]
    pub async fn test_handshake_parse_ssl_request() {
        let binary = &[
            0x25, 0x00, 0x00, 0x01, 0x85, 0xae, 0x3f, 0x20, 0x00, 0x00, 0x00, 0x01, 0x21, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x6a, 0x6f, 0x6e, 0x00, 0x00, 0x05,
        ];
        let cursor = Cursor::new(&binary[..]);
        let mut packet_reader = PacketReader::new(cursor);
        let (_, packet) = packet_reader.next_async().await.unwrap().unwrap();
        let (_, handshake) = client_handshake_response(&packet, false).unwrap();
        assert!(handshake.client_flag.contains(CapabilityFlags::CLIENT_SSL));
        // an SSLRequest stops before the username
        assert!(handshake.username.is_none());
    }

    #[test]
    pub fn test_command_decoding() {
        assert_eq!(from_packet(&[0x0e]), Ok(Command::Ping));
        assert_eq!(from_packet(&[0x01]), Ok(Command::Quit));
        assert_eq!(
            from_packet(&[0x03, b'S', b'E', b'L']),
            Ok(Command::Query(b"SEL"))
        );
        assert_eq!(
            from_packet(&[0x19, 0x05, 0x00, 0x00, 0x00]),
            Ok(Command::Close(5))
        );
        let execute = &[
            0x17, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0xaa,
        ];
        assert_eq!(
            from_packet(execute),
            Ok(Command::Execute {
                stmt: 2,
                params: &[0xaa]
            })
        );
        // COM_REFRESH is not something the gateway speaks
        assert_eq!(from_packet(&[0x07]), Err(0x07));
    }
}
