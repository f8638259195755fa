use crate::messages::{
    ColumnDefinition41, ColumnType, ErrPacket, Frame, HandshakeV10, OkPacket, ServerPacket,
    AUTH_PLUGIN_NAME, DEFAULT_CHARSET, MAX_PAYLOAD_LEN, PROTOCOL_VERSION,
};
use anyhow::Result;
use bytes::{BufMut, BytesMut};
use shardgate_core::types::DataValue;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Encode and write one frame without flushing.
pub async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, frame: &Frame) -> Result<()> {
    let mut buf = BytesMut::new();
    encode_frame(frame, &mut buf);
    stream.write_all(&buf).await?;
    Ok(())
}

/// Encode, write and flush one frame.
pub async fn send_frame<S: AsyncWrite + Unpin>(stream: &mut S, frame: &Frame) -> Result<()> {
    write_frame(stream, frame).await?;
    stream.flush().await?;
    Ok(())
}

pub fn encode_frame(frame: &Frame, buf: &mut BytesMut) {
    let mut payload = BytesMut::new();
    encode_packet(&frame.packet, &mut payload);
    put_packet(buf, frame.sequence_id, &payload);
}

/// Split a payload into wire packets. Payloads of exactly 0xffffff bytes
/// are followed by an empty packet so the reader knows the payload ended.
fn put_packet(buf: &mut BytesMut, sequence_id: u8, payload: &[u8]) {
    let mut seq = sequence_id;
    let mut chunks = payload.chunks(MAX_PAYLOAD_LEN).peekable();
    if chunks.peek().is_none() {
        put_header(buf, 0, seq);
        return;
    }
    let mut last_len = 0;
    for chunk in chunks {
        put_header(buf, chunk.len(), seq);
        buf.extend_from_slice(chunk);
        seq = seq.wrapping_add(1);
        last_len = chunk.len();
    }
    if last_len == MAX_PAYLOAD_LEN {
        put_header(buf, 0, seq);
    }
}

fn put_header(buf: &mut BytesMut, len: usize, sequence_id: u8) {
    buf.put_uint_le(len as u64, 3);
    buf.put_u8(sequence_id);
}

pub fn encode_packet(packet: &ServerPacket, buf: &mut BytesMut) {
    match packet {
        ServerPacket::Handshake(handshake) => encode_handshake(handshake, buf),
        ServerPacket::Ok(ok) => encode_ok(ok, buf),
        ServerPacket::Err(err) => encode_err(err, buf),
        ServerPacket::Eof {
            warnings,
            status_flags,
        } => {
            buf.put_u8(0xfe);
            buf.put_u16_le(*warnings);
            buf.put_u16_le(*status_flags);
        }
        ServerPacket::ColumnCount(count) => put_lenenc_int(buf, *count),
        ServerPacket::ColumnDefinition(column) => encode_column_definition(column, buf),
        ServerPacket::TextRow(values) => {
            for value in values {
                match value.to_text() {
                    Some(bytes) => put_lenenc_bytes(buf, &bytes),
                    None => buf.put_u8(0xfb),
                }
            }
        }
        ServerPacket::BinaryRow {
            values,
            column_types,
        } => encode_binary_row(values, column_types, buf),
        ServerPacket::StmtPrepareOk {
            statement_id,
            columns,
            params,
            warnings,
        } => {
            buf.put_u8(0x00);
            buf.put_u32_le(*statement_id);
            buf.put_u16_le(*columns);
            buf.put_u16_le(*params);
            buf.put_u8(0);
            buf.put_u16_le(*warnings);
        }
    }
}

fn encode_handshake(handshake: &HandshakeV10, buf: &mut BytesMut) {
    let mut scramble = handshake.auth_plugin_data.clone();
    scramble.resize(20, 0);
    buf.put_u8(PROTOCOL_VERSION);
    put_cstring(buf, &handshake.server_version);
    buf.put_u32_le(handshake.connection_id);
    buf.extend_from_slice(&scramble[..8]);
    buf.put_u8(0);
    buf.put_u16_le((handshake.capabilities & 0xffff) as u16);
    buf.put_u8(DEFAULT_CHARSET);
    buf.put_u16_le(handshake.status_flags);
    buf.put_u16_le((handshake.capabilities >> 16) as u16);
    buf.put_u8(21);
    buf.put_bytes(0, 10);
    buf.extend_from_slice(&scramble[8..]);
    buf.put_u8(0);
    put_cstring(buf, AUTH_PLUGIN_NAME);
}

fn encode_ok(ok: &OkPacket, buf: &mut BytesMut) {
    buf.put_u8(0x00);
    put_lenenc_int(buf, ok.affected_rows);
    put_lenenc_int(buf, ok.last_insert_id);
    buf.put_u16_le(ok.status_flags);
    buf.put_u16_le(ok.warnings);
    buf.extend_from_slice(ok.info.as_bytes());
}

fn encode_err(err: &ErrPacket, buf: &mut BytesMut) {
    buf.put_u8(0xff);
    buf.put_u16_le(err.code);
    buf.put_u8(b'#');
    let mut state = err.sql_state.as_bytes().to_vec();
    state.resize(5, b'0');
    buf.extend_from_slice(&state[..5]);
    buf.extend_from_slice(err.message.as_bytes());
}

fn encode_column_definition(column: &ColumnDefinition41, buf: &mut BytesMut) {
    put_lenenc_bytes(buf, b"def");
    put_lenenc_bytes(buf, column.schema.as_bytes());
    put_lenenc_bytes(buf, column.table.as_bytes());
    put_lenenc_bytes(buf, column.org_table.as_bytes());
    put_lenenc_bytes(buf, column.name.as_bytes());
    put_lenenc_bytes(buf, column.org_name.as_bytes());
    put_lenenc_int(buf, 0x0c);
    buf.put_u16_le(column.character_set);
    buf.put_u32_le(column.column_length);
    buf.put_u8(column.column_type.code());
    buf.put_u16_le(column.flags);
    buf.put_u8(column.decimals);
    buf.put_u16_le(0);
}

fn encode_binary_row(values: &[DataValue], column_types: &[ColumnType], buf: &mut BytesMut) {
    buf.put_u8(0x00);
    let mut null_bitmap = vec![0u8; (values.len() + 7 + 2) / 8];
    for (idx, value) in values.iter().enumerate() {
        if value.is_null() {
            let bit = idx + 2;
            null_bitmap[bit / 8] |= 1 << (bit % 8);
        }
    }
    buf.extend_from_slice(&null_bitmap);
    for (idx, value) in values.iter().enumerate() {
        if value.is_null() {
            continue;
        }
        let column_type = column_types
            .get(idx)
            .copied()
            .unwrap_or(ColumnType::VarString);
        put_binary_value(buf, column_type, value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryValueError {
    /// Not a number, or not a whole number for an integer column.
    NotNumeric,
    OutOfRange,
}

/// Check that `value` can be written exactly under `column_type` in a
/// binary row. Rows handed to the encoder are expected to pass this.
pub fn check_binary_value(column_type: ColumnType, value: &DataValue) -> Result<(), BinaryValueError> {
    let (min, max) = match column_type {
        ColumnType::LongLong => (i64::MIN as i128, i64::MAX as i128),
        ColumnType::Long | ColumnType::Int24 => (i32::MIN as i128, i32::MAX as i128),
        ColumnType::Short | ColumnType::Year => (i16::MIN as i128, i16::MAX as i128),
        ColumnType::Tiny => (i8::MIN as i128, i8::MAX as i128),
        ColumnType::Double => {
            return value.as_f64().map(|_| ()).ok_or(BinaryValueError::NotNumeric);
        }
        ColumnType::Float => {
            let v = value.as_f64().ok_or(BinaryValueError::NotNumeric)?;
            if v.is_finite() && (v as f32).is_infinite() {
                return Err(BinaryValueError::OutOfRange);
            }
            return Ok(());
        }
        _ => return Ok(()),
    };
    let v = integer_value(value).ok_or(BinaryValueError::NotNumeric)?;
    if v < min || v > max {
        return Err(BinaryValueError::OutOfRange);
    }
    Ok(())
}

fn integer_value(value: &DataValue) -> Option<i128> {
    match value {
        DataValue::Int64(v) => Some(i128::from(*v)),
        DataValue::Bool(v) => Some(i128::from(*v)),
        DataValue::Float64(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i128),
        DataValue::String(v) => v.trim().parse().ok(),
        _ => None,
    }
}

fn put_binary_value(buf: &mut BytesMut, column_type: ColumnType, value: &DataValue) {
    let int = || integer_value(value).unwrap_or_default();
    match column_type {
        ColumnType::LongLong => buf.put_i64_le(i64::try_from(int()).unwrap_or_default()),
        ColumnType::Long | ColumnType::Int24 => {
            buf.put_i32_le(i32::try_from(int()).unwrap_or_default())
        }
        ColumnType::Short | ColumnType::Year => {
            buf.put_i16_le(i16::try_from(int()).unwrap_or_default())
        }
        ColumnType::Tiny => buf.put_i8(i8::try_from(int()).unwrap_or_default()),
        ColumnType::Double => buf.put_f64_le(value.as_f64().unwrap_or_default()),
        ColumnType::Float => buf.put_f32_le(value.as_f64().unwrap_or_default() as f32),
        ColumnType::Date | ColumnType::Datetime | ColumnType::Timestamp => {
            put_binary_datetime(buf, value)
        }
        ColumnType::Time => put_binary_time(buf, value),
        _ => put_lenenc_bytes(buf, &value.to_text().unwrap_or_default()),
    }
}

/// `YYYY-MM-DD[ HH:MM:SS[.ffffff]]` in the length-prefixed binary layout.
fn put_binary_datetime(buf: &mut BytesMut, value: &DataValue) {
    let text = String::from_utf8_lossy(&value.to_text().unwrap_or_default()).to_string();
    let (date, time) = text.split_once(' ').unwrap_or((text.as_str(), ""));
    let date_parts: Vec<u32> = date.split('-').filter_map(|p| p.parse().ok()).collect();
    if date_parts.len() != 3 {
        buf.put_u8(0);
        return;
    }
    let (clock, micros) = time.split_once('.').unwrap_or((time, ""));
    let time_parts: Vec<u8> = clock.split(':').filter_map(|p| p.parse().ok()).collect();
    let micros: u32 = micros.parse().unwrap_or(0);
    let has_time = time_parts.len() == 3 && time_parts.iter().any(|p| *p != 0);
    let len = match (has_time || micros > 0, micros > 0) {
        (_, true) => 11,
        (true, false) => 7,
        (false, false) => 4,
    };
    buf.put_u8(len);
    buf.put_u16_le(date_parts[0] as u16);
    buf.put_u8(date_parts[1] as u8);
    buf.put_u8(date_parts[2] as u8);
    if len >= 7 {
        let hms = if time_parts.len() == 3 { time_parts } else { vec![0, 0, 0] };
        buf.put_u8(hms[0]);
        buf.put_u8(hms[1]);
        buf.put_u8(hms[2]);
    }
    if len == 11 {
        buf.put_u32_le(micros);
    }
}

/// `[-]HH:MM:SS` in the length-prefixed binary layout.
fn put_binary_time(buf: &mut BytesMut, value: &DataValue) {
    let text = String::from_utf8_lossy(&value.to_text().unwrap_or_default()).to_string();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.to_string()),
        None => (false, text),
    };
    let parts: Vec<u32> = body.split(':').filter_map(|p| p.parse().ok()).collect();
    if parts.len() != 3 || parts.iter().all(|p| *p == 0) {
        buf.put_u8(0);
        return;
    }
    buf.put_u8(8);
    buf.put_u8(u8::from(negative));
    buf.put_u32_le(parts[0] / 24);
    buf.put_u8((parts[0] % 24) as u8);
    buf.put_u8(parts[1] as u8);
    buf.put_u8(parts[2] as u8);
}

pub fn put_lenenc_int(buf: &mut BytesMut, value: u64) {
    if value < 0xfb {
        buf.put_u8(value as u8);
    } else if value < 1 << 16 {
        buf.put_u8(0xfc);
        buf.put_u16_le(value as u16);
    } else if value < 1 << 24 {
        buf.put_u8(0xfd);
        buf.put_uint_le(value, 3);
    } else {
        buf.put_u8(0xfe);
        buf.put_u64_le(value);
    }
}

pub fn put_lenenc_bytes(buf: &mut BytesMut, value: &[u8]) {
    put_lenenc_int(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

fn put_cstring(buf: &mut BytesMut, value: &str) {
    buf.extend_from_slice(value.as_bytes());
    buf.put_u8(0);
}
