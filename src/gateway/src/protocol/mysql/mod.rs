pub mod basic;
pub mod binary;
pub mod constants;
pub mod error_codes;
pub mod packet;

/// Collation ids the gateway advertises on the wire. Text payloads are
/// always utf8; numeric and blob columns are tagged binary.
pub const UTF8_GENERAL_CI: u16 = 33;
pub const BINARY_COLLATION: u16 = 63;
pub const DEFAULT_COLLATION_ID: u8 = UTF8_GENERAL_CI as u8;
