use byteorder::{LittleEndian, WriteBytesExt};
use mysql_common::constants::ColumnType;
use mysql_common::io::WriteMysqlExt;
use std::io::{self, Write};

/// A decoded COM_STMT_EXECUTE argument.
/// See [Binary Protocol Value](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_binary_resultset.html)
#[derive(Debug, Clone, PartialEq)]
pub enum BinValue {
    Null,
    Bytes(Vec<u8>),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    /// year, month, day, hour, minute, second, microsecond
    DateTime(u16, u8, u8, u8, u8, u8, u32),
    /// negative, days, hours, minutes, seconds, microseconds
    Duration(bool, u32, u8, u8, u8, u32),
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.pos + n > self.buf.len() {
            return Err(format!(
                "execute payload truncated at offset {} (wanted {} bytes)",
                self.pos, n
            ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64_le(&mut self) -> Result<u64, String> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn lenenc_int(&mut self) -> Result<u64, String> {
        match self.u8()? {
            0xfb => Ok(0),
            0xfc => Ok(self.u16_le()? as u64),
            0xfd => {
                let b = self.take(3)?;
                Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]) as u64)
            }
            0xfe => self.u64_le(),
            b => Ok(b as u64),
        }
    }

    fn lenenc_bytes(&mut self) -> Result<&'a [u8], String> {
        let len = self.lenenc_int()? as usize;
        self.take(len)
    }
}

const UNSIGNED_FLAG_BYTE: u8 = 0x80;

/// Decode the argument section of a COM_STMT_EXECUTE payload (everything
/// after stmt_id/flags/iteration-count). When `new_params_bound_flag` is 0
/// the client relies on the types it sent on an earlier execute, which the
/// caller passes in via `cached_types`.
///
/// Returns the decoded values plus the types to cache for the next round.
pub fn parse_execute_params(
    payload: &[u8],
    num_params: usize,
    cached_types: Option<&[(u8, u8)]>,
) -> Result<(Vec<BinValue>, Vec<(u8, u8)>), String> {
    if num_params == 0 {
        return Ok((vec![], vec![]));
    }
    let mut r = ByteReader::new(payload);
    let bitmap_len = (num_params + 7) / 8;
    let null_bitmap = r.take(bitmap_len)?.to_vec();
    let new_params_bound = r.u8()?;

    let types: Vec<(u8, u8)> = if new_params_bound == 1 {
        let mut types = Vec::with_capacity(num_params);
        for _ in 0..num_params {
            let column_type = r.u8()?;
            let flags = r.u8()?;
            types.push((column_type, flags));
        }
        types
    } else {
        cached_types
            .map(|t| t.to_vec())
            .filter(|t| t.len() == num_params)
            .ok_or_else(|| "parameter types were never bound for this statement".to_string())?
    };

    let mut values = Vec::with_capacity(num_params);
    for (i, (column_type, flags)) in types.iter().enumerate() {
        if null_bitmap[i / 8] & (1 << (i % 8)) != 0 {
            values.push(BinValue::Null);
            continue;
        }
        values.push(read_bin_value(
            &mut r,
            *column_type,
            flags & UNSIGNED_FLAG_BYTE != 0,
        )?);
    }
    Ok((values, types))
}

fn read_bin_value(r: &mut ByteReader<'_>, column_type: u8, unsigned: bool) -> Result<BinValue, String> {
    let t = column_type;
    if t == ColumnType::MYSQL_TYPE_NULL as u8 {
        return Ok(BinValue::Null);
    }
    if t == ColumnType::MYSQL_TYPE_TINY as u8 {
        let v = r.u8()?;
        return Ok(if unsigned {
            BinValue::UInt(v as u64)
        } else {
            BinValue::Int(v as i8 as i64)
        });
    }
    if t == ColumnType::MYSQL_TYPE_SHORT as u8 || t == ColumnType::MYSQL_TYPE_YEAR as u8 {
        let v = r.u16_le()?;
        return Ok(if unsigned {
            BinValue::UInt(v as u64)
        } else {
            BinValue::Int(v as i16 as i64)
        });
    }
    if t == ColumnType::MYSQL_TYPE_LONG as u8 || t == ColumnType::MYSQL_TYPE_INT24 as u8 {
        let v = r.u32_le()?;
        return Ok(if unsigned {
            BinValue::UInt(v as u64)
        } else {
            BinValue::Int(v as i32 as i64)
        });
    }
    if t == ColumnType::MYSQL_TYPE_LONGLONG as u8 {
        let v = r.u64_le()?;
        return Ok(if unsigned {
            BinValue::UInt(v)
        } else {
            BinValue::Int(v as i64)
        });
    }
    if t == ColumnType::MYSQL_TYPE_FLOAT as u8 {
        return Ok(BinValue::Float(f32::from_bits(r.u32_le()?)));
    }
    if t == ColumnType::MYSQL_TYPE_DOUBLE as u8 {
        return Ok(BinValue::Double(f64::from_bits(r.u64_le()?)));
    }
    if t == ColumnType::MYSQL_TYPE_DATE as u8
        || t == ColumnType::MYSQL_TYPE_DATETIME as u8
        || t == ColumnType::MYSQL_TYPE_TIMESTAMP as u8
    {
        let len = r.u8()?;
        let (mut year, mut month, mut day) = (0u16, 0u8, 0u8);
        let (mut hour, mut minute, mut second) = (0u8, 0u8, 0u8);
        let mut micro = 0u32;
        if len >= 4 {
            year = r.u16_le()?;
            month = r.u8()?;
            day = r.u8()?;
        }
        if len >= 7 {
            hour = r.u8()?;
            minute = r.u8()?;
            second = r.u8()?;
        }
        if len >= 11 {
            micro = r.u32_le()?;
        }
        return Ok(BinValue::DateTime(
            year, month, day, hour, minute, second, micro,
        ));
    }
    if t == ColumnType::MYSQL_TYPE_TIME as u8 {
        let len = r.u8()?;
        let mut negative = false;
        let (mut days, mut hours, mut minutes, mut seconds) = (0u32, 0u8, 0u8, 0u8);
        let mut micros = 0u32;
        if len >= 8 {
            negative = r.u8()? == 1;
            days = r.u32_le()?;
            hours = r.u8()?;
            minutes = r.u8()?;
            seconds = r.u8()?;
        }
        if len >= 12 {
            micros = r.u32_le()?;
        }
        return Ok(BinValue::Duration(
            negative, days, hours, minutes, seconds, micros,
        ));
    }
    // everything string-shaped: VARCHAR, VAR_STRING, STRING, the blob family,
    // DECIMAL/NEWDECIMAL, BIT, ENUM, SET, JSON, GEOMETRY
    Ok(BinValue::Bytes(r.lenenc_bytes()?.to_vec()))
}

/// Null bitmap of a binary resultset row; bit offset is 2 on the
/// server-to-client path.
/// See [NULL-Bitmap](https://dev.mysql.com/doc/dev/mysql-server/latest/null_bitmap.html)
pub fn row_null_bitmap(values: &[Option<String>]) -> Vec<u8> {
    let offset = 2usize;
    let mut bitmap = vec![0u8; (values.len() + offset + 7) / 8];
    for (i, v) in values.iter().enumerate() {
        if v.is_none() {
            let pos = i + offset;
            bitmap[pos / 8] |= 1 << (pos % 8);
        }
    }
    bitmap
}

fn split_date_time(text: &str) -> (u16, u8, u8, u8, u8, u8, u32) {
    let mut out = (0u16, 0u8, 0u8, 0u8, 0u8, 0u8, 0u32);
    let (date, time) = match text.split_once(' ') {
        Some((d, t)) => (d, Some(t)),
        None => (text, None),
    };
    let mut date_parts = date.splitn(3, '-');
    out.0 = date_parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    out.1 = date_parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    out.2 = date_parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    if let Some(time) = time {
        let (hms, micro) = split_seconds_fraction(time);
        let mut time_parts = hms.splitn(3, ':');
        out.3 = time_parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        out.4 = time_parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        out.5 = time_parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        out.6 = micro;
    }
    out
}

fn split_seconds_fraction(time: &str) -> (&str, u32) {
    match time.split_once('.') {
        Some((hms, frac)) => {
            let mut digits: String = frac.chars().take_while(|c| c.is_ascii_digit()).collect();
            while digits.len() < 6 {
                digits.push('0');
            }
            (hms, digits[..6].parse().unwrap_or(0))
        }
        None => (time, 0),
    }
}

/// Encode one already-projected text value in binary row format for the
/// given field tag. The text comes from the PostgreSQL row after value
/// projection, so numeric and temporal shapes are deterministic; anything
/// that fails to parse is an internal encoding error.
pub fn encode_binary_value<W: Write>(w: &mut W, tag: ColumnType, text: &str) -> io::Result<()> {
    let encoding_err =
        |what: &str| io::Error::new(io::ErrorKind::InvalidData, format!("{what}: {text:?}"));
    match tag {
        ColumnType::MYSQL_TYPE_TINY => {
            let v: i64 = text.parse().map_err(|_| encoding_err("bad TINY value"))?;
            w.write_i8(v as i8)
        }
        ColumnType::MYSQL_TYPE_SHORT | ColumnType::MYSQL_TYPE_YEAR => {
            let v: i64 = text.parse().map_err(|_| encoding_err("bad SHORT value"))?;
            w.write_i16::<LittleEndian>(v as i16)
        }
        ColumnType::MYSQL_TYPE_LONG | ColumnType::MYSQL_TYPE_INT24 => {
            let v: i64 = text.parse().map_err(|_| encoding_err("bad LONG value"))?;
            w.write_i32::<LittleEndian>(v as i32)
        }
        ColumnType::MYSQL_TYPE_LONGLONG => {
            let v: i64 = text
                .parse()
                .map_err(|_| encoding_err("bad LONGLONG value"))?;
            w.write_i64::<LittleEndian>(v)
        }
        ColumnType::MYSQL_TYPE_FLOAT => {
            let v: f32 = text.parse().map_err(|_| encoding_err("bad FLOAT value"))?;
            w.write_f32::<LittleEndian>(v)
        }
        ColumnType::MYSQL_TYPE_DOUBLE => {
            let v: f64 = text.parse().map_err(|_| encoding_err("bad DOUBLE value"))?;
            w.write_f64::<LittleEndian>(v)
        }
        ColumnType::MYSQL_TYPE_DATE
        | ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_TIMESTAMP => {
            let (year, month, day, hour, minute, second, micro) = split_date_time(text);
            if micro != 0 {
                w.write_u8(11)?;
                w.write_u16::<LittleEndian>(year)?;
                w.write_u8(month)?;
                w.write_u8(day)?;
                w.write_u8(hour)?;
                w.write_u8(minute)?;
                w.write_u8(second)?;
                w.write_u32::<LittleEndian>(micro)
            } else if hour != 0 || minute != 0 || second != 0 {
                w.write_u8(7)?;
                w.write_u16::<LittleEndian>(year)?;
                w.write_u8(month)?;
                w.write_u8(day)?;
                w.write_u8(hour)?;
                w.write_u8(minute)?;
                w.write_u8(second)
            } else if year != 0 || month != 0 || day != 0 {
                w.write_u8(4)?;
                w.write_u16::<LittleEndian>(year)?;
                w.write_u8(month)?;
                w.write_u8(day)
            } else {
                w.write_u8(0)
            }
        }
        ColumnType::MYSQL_TYPE_TIME => {
            let (hms, micros) = split_seconds_fraction(text);
            let (negative, hms) = match hms.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, hms),
            };
            let mut parts = hms.splitn(3, ':');
            let hours: u32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
            let minutes: u8 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
            let seconds: u8 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
            let days = hours / 24;
            let hours = (hours % 24) as u8;
            if micros != 0 {
                w.write_u8(12)?;
                w.write_u8(negative as u8)?;
                w.write_u32::<LittleEndian>(days)?;
                w.write_u8(hours)?;
                w.write_u8(minutes)?;
                w.write_u8(seconds)?;
                w.write_u32::<LittleEndian>(micros)
            } else if days != 0 || hours != 0 || minutes != 0 || seconds != 0 {
                w.write_u8(8)?;
                w.write_u8(negative as u8)?;
                w.write_u32::<LittleEndian>(days)?;
                w.write_u8(hours)?;
                w.write_u8(minutes)?;
                w.write_u8(seconds)
            } else {
                w.write_u8(0)
            }
        }
        _ => {
            // NEWDECIMAL, the string and blob families, JSON
            w.write_lenenc_str(text.as_bytes()).map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execute_payload(types_and_values: &[(u8, Vec<u8>)], null_mask: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(null_mask);
        payload.push(1); // new-params-bound
        for (t, _) in types_and_values {
            payload.push(*t);
            payload.push(0);
        }
        for (_, v) in types_and_values {
            payload.extend_from_slice(v);
        }
        payload
    }

    #[test]
    fn test_parse_execute_params_mixed() {
        // ('X', 12.50) bound as VAR_STRING + DOUBLE
        let payload = execute_payload(
            &[
                (
                    ColumnType::MYSQL_TYPE_VAR_STRING as u8,
                    vec![1, b'X'],
                ),
                (
                    ColumnType::MYSQL_TYPE_DOUBLE as u8,
                    12.5f64.to_le_bytes().to_vec(),
                ),
            ],
            &[0x00],
        );
        let (values, types) = parse_execute_params(&payload, 2, None).unwrap();
        assert_eq!(values[0], BinValue::Bytes(b"X".to_vec()));
        assert_eq!(values[1], BinValue::Double(12.5));
        assert_eq!(types.len(), 2);
    }

    #[test]
    fn test_parse_execute_params_null_bitmap() {
        let payload = execute_payload(
            &[
                (ColumnType::MYSQL_TYPE_NULL as u8, vec![]),
                (ColumnType::MYSQL_TYPE_LONG as u8, 7i32.to_le_bytes().to_vec()),
            ],
            &[0x01],
        );
        let (values, _) = parse_execute_params(&payload, 2, None).unwrap();
        assert_eq!(values[0], BinValue::Null);
        assert_eq!(values[1], BinValue::Int(7));
    }

    #[test]
    fn test_parse_execute_params_reuses_cached_types() {
        let mut payload = vec![0x00, 0]; // bitmap, new-params-bound = 0
        payload.extend_from_slice(&42i64.to_le_bytes());
        let cached = vec![(ColumnType::MYSQL_TYPE_LONGLONG as u8, 0)];
        let (values, types) = parse_execute_params(&payload, 1, Some(&cached)).unwrap();
        assert_eq!(values[0], BinValue::Int(42));
        assert_eq!(types, cached);

        assert!(parse_execute_params(&payload, 1, None).is_err());
    }

    #[test]
    fn test_row_null_bitmap_offset_two() {
        let bitmap = row_null_bitmap(&[None, Some("a".into()), None]);
        // bits 2 and 4 set
        assert_eq!(bitmap, vec![0b0001_0100]);
    }

    #[test]
    fn test_encode_ints_and_strings() {
        let mut buf = Vec::new();
        encode_binary_value(&mut buf, ColumnType::MYSQL_TYPE_LONGLONG, "2").unwrap();
        assert_eq!(buf, 2i64.to_le_bytes());

        let mut buf = Vec::new();
        encode_binary_value(&mut buf, ColumnType::MYSQL_TYPE_NEWDECIMAL, "99.99").unwrap();
        assert_eq!(buf, b"\x0599.99");

        let mut buf = Vec::new();
        assert!(encode_binary_value(&mut buf, ColumnType::MYSQL_TYPE_LONG, "oops").is_err());
    }

    #[test]
    fn test_encode_datetime() {
        let mut buf = Vec::new();
        encode_binary_value(
            &mut buf,
            ColumnType::MYSQL_TYPE_DATETIME,
            "2024-02-29 13:05:09",
        )
        .unwrap();
        assert_eq!(buf, vec![7, 0xe8, 0x07, 2, 29, 13, 5, 9]);

        let mut buf = Vec::new();
        encode_binary_value(&mut buf, ColumnType::MYSQL_TYPE_DATE, "2024-02-29").unwrap();
        assert_eq!(buf, vec![4, 0xe8, 0x07, 2, 29]);
    }

    #[test]
    fn test_encode_time() {
        let mut buf = Vec::new();
        encode_binary_value(&mut buf, ColumnType::MYSQL_TYPE_TIME, "13:05:09").unwrap();
        assert_eq!(buf, vec![8, 0, 0, 0, 0, 0, 13, 5, 9]);
    }
}
