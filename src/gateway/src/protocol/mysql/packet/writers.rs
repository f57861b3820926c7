use crate::protocol::mysql::basic::{Field, OkPacket};
use crate::protocol::mysql::binary::{encode_binary_value, row_null_bitmap};
use crate::protocol::mysql::constants::AuthPluginName::AuthNativePassword;
use crate::protocol::mysql::constants::AUTH_PLUGIN_DATA_PART_1_LENGTH;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::DEFAULT_COLLATION_ID;

use byteorder::{LittleEndian, WriteBytesExt};
use mysql_common::constants::{CapabilityFlags, StatusFlags};
use mysql_common::io::WriteMysqlExt;
use std::io::{self, Write};
use tokio::io::AsyncWrite;

pub async fn write_err_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    code: u16,
    sqlstate: &[u8; 5],
    msg: &str,
) -> io::Result<()> {
    w.write_u8(0xff)?;
    w.write_u16::<LittleEndian>(code)?;
    w.write_u8(b'#')?;
    w.write_all(sqlstate)?;
    w.write_all(msg.as_bytes())?;
    w.end_packet().await?;
    w.flush_all().await
}

pub async fn write_eof_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    s: StatusFlags,
) -> io::Result<()> {
    w.write_all(&[0xfe, 0x00, 0x00])?;
    w.write_u16::<LittleEndian>(s.bits())?;
    w.end_packet().await
}

pub async fn write_ok_packet<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    client_capabilities: CapabilityFlags,
    ok_packet: OkPacket,
) -> io::Result<()> {
    w.write_u8(ok_packet.header)?; // OK packet type
    w.write_lenenc_int(ok_packet.affected_rows)?;
    w.write_lenenc_int(ok_packet.last_insert_id)?;
    if client_capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
        w.write_u16::<LittleEndian>(ok_packet.status_flags.bits())?;
        w.write_u16::<LittleEndian>(ok_packet.warnings)?;
    } else if client_capabilities.contains(CapabilityFlags::CLIENT_TRANSACTIONS) {
        w.write_u16::<LittleEndian>(ok_packet.status_flags.bits())?;
    }
    w.write_all(ok_packet.info.as_bytes())?;
    w.end_packet().await?;
    w.flush_all().await
}

/// Terminate a resultset. With CLIENT_DEPRECATE_EOF the trailer is an
/// OK packet wearing an 0xfe header, otherwise a classic EOF packet.
pub async fn write_resultset_end<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    client_capabilities: CapabilityFlags,
    status: StatusFlags,
) -> io::Result<()> {
    if client_capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
        w.write_u8(0xfe)?;
        w.write_lenenc_int(0)?;
        w.write_lenenc_int(0)?;
        w.write_u16::<LittleEndian>(status.bits())?;
        w.write_u16::<LittleEndian>(0)?; // no warnings
        w.end_packet().await?;
    } else {
        write_eof_packet(w, status).await?;
    }
    w.flush_all().await
}

pub async fn write_prepare_ok<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    stmt_id: u32,
    num_columns: u16,
    num_params: u16,
    client_capabilities: CapabilityFlags,
) -> io::Result<()> {
    // COM_STMT_PREPARE_OK
    w.write_u8(0x00)?;
    w.write_u32::<LittleEndian>(stmt_id)?;
    w.write_u16::<LittleEndian>(num_columns)?;
    w.write_u16::<LittleEndian>(num_params)?;
    w.write_u8(0x00)?;
    w.write_u16::<LittleEndian>(0)?; // number of warnings
    w.end_packet().await?;

    // the real metadata is only known at execute time; advertise
    // placeholder definitions the way other proxies do
    if num_params > 0 {
        let placeholders = vec![placeholder_field(); num_params as usize];
        write_column_definitions(&placeholders, w, client_capabilities, false).await?;
    }
    if num_columns > 0 {
        let placeholders = vec![placeholder_field(); num_columns as usize];
        write_column_definitions(&placeholders, w, client_capabilities, false).await?;
    }
    w.flush_all().await
}

fn placeholder_field() -> Field {
    Field {
        schema: String::new(),
        table: String::new(),
        org_table: String::new(),
        name: "?".to_string(),
        org_name: String::new(),
        charset: crate::protocol::mysql::UTF8_GENERAL_CI,
        column_length: 0x80,
        column_type: mysql_common::constants::ColumnType::MYSQL_TYPE_VAR_STRING,
        flags: mysql_common::constants::ColumnFlags::empty(),
        decimals: 0,
    }
}

/// Leading packet of a resultset: the column count.
pub async fn write_resultset_header<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    num_columns: usize,
) -> io::Result<()> {
    w.write_lenenc_int(num_columns as u64)?;
    w.end_packet().await
}

/// Column definitions, ColumnDefinition41 layout.
/// See: https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_query_response_text_resultset_column_definition.html
pub async fn write_column_definitions<W: AsyncWrite + Unpin>(
    fields: &[Field],
    w: &mut PacketWriter<W>,
    client_capabilities: CapabilityFlags,
    is_com_field_list: bool,
) -> io::Result<()> {
    for c in fields {
        w.write_lenenc_str(b"def")?;
        w.write_lenenc_str(c.schema.as_bytes())?;
        w.write_lenenc_str(c.table.as_bytes())?;
        w.write_lenenc_str(c.org_table.as_bytes())?;
        w.write_lenenc_str(c.name.as_bytes())?;
        w.write_lenenc_str(c.org_name.as_bytes())?;
        w.write_lenenc_int(0xC)?;
        w.write_u16::<LittleEndian>(c.charset)?;
        w.write_u32::<LittleEndian>(c.column_length)?;
        w.write_u8(c.column_type as u8)?;
        w.write_u16::<LittleEndian>(c.flags.bits())?;
        w.write_u8(c.decimals)?;
        w.write_all(&[0x00, 0x00])?; // unused filler
        if is_com_field_list {
            // default values are not reported
            w.write_all(&[0xfb])?;
        }
        w.end_packet().await?;
    }

    if !client_capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
        write_eof_packet(w, StatusFlags::empty()).await
    } else {
        Ok(())
    }
}

/// One text-protocol row: lenenc strings, 0xfb for NULL.
pub async fn write_text_row<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    values: &[Option<String>],
) -> io::Result<()> {
    for value in values {
        match value {
            Some(v) => {
                w.write_lenenc_str(v.as_bytes())?;
            }
            None => {
                w.write_u8(0xfb)?;
            }
        }
    }
    w.end_packet().await
}

/// One binary-protocol row: 0x00 header, null bitmap (offset 2), then the
/// values in the width their field tag dictates.
pub async fn write_binary_row<W: AsyncWrite + Unpin>(
    w: &mut PacketWriter<W>,
    fields: &[Field],
    values: &[Option<String>],
) -> io::Result<()> {
    w.write_u8(0x00)?;
    w.write_all(&row_null_bitmap(values))?;
    for (field, value) in fields.iter().zip(values.iter()) {
        if let Some(v) = value {
            encode_binary_value(w, field.column_type, v)?;
        }
    }
    w.end_packet().await
}

pub async fn write_initial_handshake<W: AsyncWrite + Unpin>(
    writer: &mut PacketWriter<W>,
    conn_id: u64,
    scramble: [u8; 20],
    server_version: &[u8],
    server_capabilities: CapabilityFlags,
) -> io::Result<()> {
    writer.write_all(&[10])?; // protocol 10

    writer.write_all(server_version)?;
    writer.write_all(&[0x00])?;
    // connection_id (4 bytes)
    let conn_id_bytes = &[
        conn_id as u8,
        (conn_id >> 8) as u8,
        (conn_id >> 16) as u8,
        (conn_id >> 24) as u8,
    ];
    writer.write_all(conn_id_bytes)?;
    let server_capabilities_vec = server_capabilities.bits().to_le_bytes();

    writer.write_all(&scramble[0..AUTH_PLUGIN_DATA_PART_1_LENGTH])?; // auth-plugin-data-part-1
    writer.write_all(&[0x00])?;

    writer.write_all(&server_capabilities_vec[..2])?; // lower 2 capability bytes

    writer.write_all(&DEFAULT_COLLATION_ID.to_le_bytes())?; // utf8_general_ci
    writer.write_all(&StatusFlags::SERVER_STATUS_AUTOCOMMIT.bits().to_le_bytes())?;
    writer.write_all(&server_capabilities_vec[2..4])?; // upper 2 capability bytes

    writer.write_all(&((scramble.len() + 1) as u8).to_le_bytes())?;

    writer.write_all(&[0x00; 10][..])?; // 10 bytes filler
    writer.write_all(&scramble[AUTH_PLUGIN_DATA_PART_1_LENGTH..])?; // auth-plugin-data-part-2
    writer.write_all(&[0x00])?;

    writer.write_all(AuthNativePassword.as_ref().as_bytes())?;
    writer.write_all(&[0x00])?;
    writer.end_packet().await?;
    writer.flush_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysql_common::constants::{ColumnFlags, ColumnType};

    fn field(name: &str, tag: ColumnType, charset: u16, len: u32, decimals: u8) -> Field {
        Field {
            schema: String::new(),
            table: "t".to_string(),
            org_table: "t".to_string(),
            name: name.to_string(),
            org_name: name.to_string(),
            charset,
            column_length: len,
            column_type: tag,
            flags: ColumnFlags::empty(),
            decimals,
        }
    }

    #[tokio::test]
    async fn test_err_packet_layout() {
        let mut w = PacketWriter::new(Vec::new());
        write_err_packet(&mut w, 1064, b"42000", "boom").await.unwrap();
        let payload = &w.inner_writer[4..];
        assert_eq!(payload[0], 0xff);
        assert_eq!(u16::from_le_bytes([payload[1], payload[2]]), 1064);
        assert_eq!(payload[3], b'#');
        assert_eq!(&payload[4..9], b"42000");
        assert_eq!(&payload[9..], b"boom");
    }

    #[tokio::test]
    async fn test_column_definition_carries_explicit_metadata() {
        let mut w = PacketWriter::new(Vec::new());
        let f = field("price", ColumnType::MYSQL_TYPE_NEWDECIMAL, 63, 11, 2);
        write_column_definitions(
            std::slice::from_ref(&f),
            &mut w,
            CapabilityFlags::CLIENT_DEPRECATE_EOF,
            false,
        )
        .await
        .unwrap();
        let payload = &w.inner_writer[4..];
        // find the fixed-length tail: 0x0C marker, charset, length, type, flags, decimals
        let marker = payload.iter().position(|&b| b == 0x0C).unwrap();
        let tail = &payload[marker + 1..];
        assert_eq!(u16::from_le_bytes([tail[0], tail[1]]), 63);
        assert_eq!(u32::from_le_bytes([tail[2], tail[3], tail[4], tail[5]]), 11);
        assert_eq!(tail[6], ColumnType::MYSQL_TYPE_NEWDECIMAL as u8);
        assert_eq!(tail[9], 2); // decimals
    }

    #[tokio::test]
    async fn test_text_row_null_marker() {
        let mut w = PacketWriter::new(Vec::new());
        write_text_row(&mut w, &[Some("1".to_string()), None]).await.unwrap();
        assert_eq!(&w.inner_writer[4..], &[0x01, b'1', 0xfb]);
    }

    #[tokio::test]
    async fn test_binary_row_layout() {
        let mut w = PacketWriter::new(Vec::new());
        let fields = vec![
            field("id", ColumnType::MYSQL_TYPE_LONGLONG, 63, 20, 0),
            field("name", ColumnType::MYSQL_TYPE_VAR_STRING, 33, 255, 0),
        ];
        write_binary_row(&mut w, &fields, &[Some("2".to_string()), None])
            .await
            .unwrap();
        let payload = &w.inner_writer[4..];
        assert_eq!(payload[0], 0x00);
        assert_eq!(payload[1], 0b0001_0000); // column 1 is NULL, offset 2
        assert_eq!(&payload[2..10], &2i64.to_le_bytes());
    }
}
