use num_derive::{FromPrimitive, ToPrimitive};
use strum_macros::AsRefStr;

// max packet payload length, see
// https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html
pub const MAX_PAYLOAD_LEN: usize = 16_777_215;

pub const PACKET_HEADER_LEN: usize = 4;

/// auth-plugin-data-part-1 The first 8 bytes of the scramble, sent before the
/// 1 byte padding and the capability words.
pub const AUTH_PLUGIN_DATA_PART_1_LENGTH: usize = 8;

/// The length of the random number required for password scrambling.
/// (auth-plugin-data-part-1 + auth-plugin-data-part-2)
pub const SCRAMBLE_SIZE: usize = 20;

#[derive(Debug, PartialEq, AsRefStr)]
pub enum AuthPluginName {
    #[strum(serialize = "mysql_old_password")]
    AuthMySQlOldPassword,
    #[strum(serialize = "caching_sha2_password")]
    AuthCachingSha2Password,
    #[strum(serialize = "sha256_password")]
    AuthSha256Password,
    #[strum(serialize = "mysql_native_password")]
    AuthNativePassword,
    #[strum(serialize = "auth_unknown_plugin")]
    UnKnowPluginName,
}

#[derive(Debug, PartialEq, ToPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum HeaderInfo {
    OKHeader = 0x00,
    ErrHeader = 0xff,
    EOFHeader = 0xfe,
    LocalInFileHeader = 0xfb,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, FromPrimitive, ToPrimitive, AsRefStr)]
#[repr(u8)]
pub enum CommandCode {
    ComSleep = 0,
    ComQuit,
    ComInitDB,
    ComQuery,
    ComFieldList,
    ComCreateDB,
    ComDropDB,
    ComRefresh,
    ComShutdown,
    ComStatistics,
    ComProcessInfo,
    ComConnect,
    ComProcessKill,
    ComDebug,
    ComPing,
    ComTime,
    ComDelayedInsert,
    ComChangeUser,
    ComBinlogDump,
    ComTableDump,
    ComConnectOut,
    ComRegisterSlave,
    ComStmtPrepare,
    ComStmtExecute,
    ComStmtSendLongData,
    ComStmtClose,
    ComStmtReset,
    ComSetOption,
    ComStmtFetch,
    ComDaemon,
    ComBinlogDumpGtid,
    ComResetConnection,
    ComEnd,
}

#[cfg(test)]
mod test {
    use crate::protocol::mysql::constants::*;
    use num_traits::FromPrimitive;

    #[test]
    pub fn max_packet_size_test() {
        let max_u24_size = 16_777_215;
        assert_eq!(max_u24_size, MAX_PAYLOAD_LEN);
    }

    #[test]
    pub fn test_command_code_round_trip() {
        assert_eq!(CommandCode::from_u8(3), Some(CommandCode::ComQuery));
        assert_eq!(CommandCode::from_u8(22), Some(CommandCode::ComStmtPrepare));
        assert_eq!(CommandCode::from_u8(200), None);
        assert_eq!(CommandCode::ComStmtExecute.as_ref(), "ComStmtExecute");
    }

    #[test]
    pub fn column_flag_test() {
        let enum_flag = mysql_common::constants::ColumnFlags::NOT_NULL_FLAG.bits();
        assert_eq!(1_u16, enum_flag);
    }
}
