use crate::messages::{
    ClientCommand, ColumnType, ExecuteParameters, HandshakeResponse, Packet,
    CLIENT_CONNECT_WITH_DB, CLIENT_PLUGIN_AUTH, CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA,
    CLIENT_SECURE_CONNECTION, MAX_PAYLOAD_LEN,
};
use anyhow::{anyhow, Result};
use bytes::{Buf, Bytes, BytesMut};
use shardgate_core::types::DataValue;
use tokio::io::{AsyncRead, AsyncReadExt};

const COM_QUIT: u8 = 0x01;
const COM_INIT_DB: u8 = 0x02;
const COM_QUERY: u8 = 0x03;
const COM_PING: u8 = 0x0e;
const COM_STMT_PREPARE: u8 = 0x16;
const COM_STMT_EXECUTE: u8 = 0x17;
const COM_STMT_CLOSE: u8 = 0x19;
const COM_STMT_RESET: u8 = 0x1a;

/// Read one logical packet, joining continuation packets.
/// Returns `None` on a clean end of stream.
pub async fn read_packet<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Option<Packet>> {
    let mut header = [0u8; 4];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let first_sequence = header[3];
    let mut payload = BytesMut::new();
    loop {
        let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        let start = payload.len();
        payload.resize(start + len, 0);
        stream.read_exact(&mut payload[start..]).await?;
        if len < MAX_PAYLOAD_LEN {
            break;
        }
        stream.read_exact(&mut header).await?;
    }
    Ok(Some(Packet {
        sequence_id: first_sequence,
        payload: payload.freeze(),
    }))
}

pub fn decode_command(payload: &Bytes) -> Result<ClientCommand> {
    let mut reader = PayloadReader::new(payload.clone());
    let code = reader.u8()?;
    let command = match code {
        COM_QUIT => ClientCommand::Quit,
        COM_INIT_DB => ClientCommand::InitDb {
            schema: reader.rest_string(),
        },
        COM_QUERY => ClientCommand::Query {
            sql: reader.rest_string(),
        },
        COM_PING => ClientCommand::Ping,
        COM_STMT_PREPARE => ClientCommand::StmtPrepare {
            sql: reader.rest_string(),
        },
        COM_STMT_EXECUTE => ClientCommand::StmtExecute {
            statement_id: reader.u32()?,
            payload: reader.rest(),
        },
        COM_STMT_CLOSE => ClientCommand::StmtClose {
            statement_id: reader.u32()?,
        },
        COM_STMT_RESET => ClientCommand::StmtReset {
            statement_id: reader.u32()?,
        },
        other => ClientCommand::Unsupported { code: other },
    };
    Ok(command)
}

pub fn decode_handshake_response(payload: &Bytes) -> Result<HandshakeResponse> {
    let mut reader = PayloadReader::new(payload.clone());
    let capabilities = reader.u32()?;
    let max_packet_size = reader.u32()?;
    let character_set = reader.u8()?;
    reader.skip(23)?;
    let username = reader.cstring()?;
    let auth_response = if capabilities & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        let len = reader.lenenc_int()? as usize;
        reader.bytes(len)?
    } else if capabilities & CLIENT_SECURE_CONNECTION != 0 {
        let len = reader.u8()? as usize;
        reader.bytes(len)?
    } else {
        reader.cstring()?.into_bytes()
    };
    let database = if capabilities & CLIENT_CONNECT_WITH_DB != 0 && reader.has_remaining() {
        Some(reader.cstring()?).filter(|db| !db.is_empty())
    } else {
        None
    };
    let auth_plugin_name = if capabilities & CLIENT_PLUGIN_AUTH != 0 && reader.has_remaining() {
        Some(reader.cstring()?)
    } else {
        None
    };
    Ok(HandshakeResponse {
        capabilities,
        max_packet_size,
        character_set,
        username,
        auth_response,
        database,
        auth_plugin_name,
    })
}

/// Decode the parameter block of a COM_STMT_EXECUTE (the bytes after the
/// statement id). `bound_types` are the types sent by an earlier execution,
/// used when the client does not re-send them.
pub fn decode_execute_parameters(
    payload: &Bytes,
    parameter_count: usize,
    bound_types: &[(ColumnType, bool)],
) -> Result<ExecuteParameters> {
    let mut reader = PayloadReader::new(payload.clone());
    let _flags = reader.u8()?;
    let _iteration_count = reader.u32()?;
    if parameter_count == 0 {
        return Ok(ExecuteParameters {
            types: Vec::new(),
            values: Vec::new(),
        });
    }
    let null_bitmap = reader.bytes((parameter_count + 7) / 8)?;
    let new_params_bound = reader.u8()? == 1;
    let types = if new_params_bound {
        let mut types = Vec::with_capacity(parameter_count);
        for _ in 0..parameter_count {
            let code = reader.u8()?;
            let flags = reader.u8()?;
            let column_type = ColumnType::from_code(code)
                .ok_or_else(|| anyhow!("unknown parameter type 0x{code:02x}"))?;
            types.push((column_type, flags & 0x80 != 0));
        }
        types
    } else if bound_types.len() == parameter_count {
        bound_types.to_vec()
    } else {
        return Err(anyhow!("parameter types were never bound"));
    };
    let mut values = Vec::with_capacity(parameter_count);
    for (idx, (column_type, unsigned)) in types.iter().enumerate() {
        if null_bitmap[idx / 8] & (1 << (idx % 8)) != 0 {
            values.push(DataValue::Null);
            continue;
        }
        values.push(read_binary_value(&mut reader, *column_type, *unsigned)?);
    }
    Ok(ExecuteParameters { types, values })
}

fn read_binary_value(
    reader: &mut PayloadReader,
    column_type: ColumnType,
    unsigned: bool,
) -> Result<DataValue> {
    let value = match column_type {
        ColumnType::Null => DataValue::Null,
        ColumnType::Tiny => {
            let v = reader.u8()?;
            DataValue::Int64(if unsigned { v as i64 } else { v as i8 as i64 })
        }
        ColumnType::Short | ColumnType::Year => {
            let v = reader.u16()?;
            DataValue::Int64(if unsigned { v as i64 } else { v as i16 as i64 })
        }
        ColumnType::Long | ColumnType::Int24 => {
            let v = reader.u32()?;
            DataValue::Int64(if unsigned { v as i64 } else { v as i32 as i64 })
        }
        ColumnType::LongLong => {
            let v = reader.u64()?;
            if unsigned && v > i64::MAX as u64 {
                DataValue::String(v.to_string())
            } else {
                DataValue::Int64(v as i64)
            }
        }
        ColumnType::Float => DataValue::Float64(f32::from_bits(reader.u32()?) as f64),
        ColumnType::Double => DataValue::Float64(f64::from_bits(reader.u64()?)),
        ColumnType::Date | ColumnType::Datetime | ColumnType::Timestamp => {
            DataValue::String(read_binary_datetime(reader, column_type)?)
        }
        ColumnType::Time => DataValue::String(read_binary_time(reader)?),
        ColumnType::Blob | ColumnType::Bit => {
            let len = reader.lenenc_int()? as usize;
            DataValue::Bytes(reader.bytes(len)?)
        }
        _ => {
            let len = reader.lenenc_int()? as usize;
            DataValue::String(String::from_utf8_lossy(&reader.bytes(len)?).to_string())
        }
    };
    Ok(value)
}

fn read_binary_datetime(reader: &mut PayloadReader, column_type: ColumnType) -> Result<String> {
    let len = reader.u8()?;
    let (mut year, mut month, mut day) = (0u16, 0u8, 0u8);
    let (mut hour, mut minute, mut second, mut micros) = (0u8, 0u8, 0u8, 0u32);
    if len >= 4 {
        year = reader.u16()?;
        month = reader.u8()?;
        day = reader.u8()?;
    }
    if len >= 7 {
        hour = reader.u8()?;
        minute = reader.u8()?;
        second = reader.u8()?;
    }
    if len >= 11 {
        micros = reader.u32()?;
    }
    let date = format!("{year:04}-{month:02}-{day:02}");
    if column_type == ColumnType::Date {
        return Ok(date);
    }
    let mut text = format!("{date} {hour:02}:{minute:02}:{second:02}");
    if micros > 0 {
        text.push_str(&format!(".{micros:06}"));
    }
    Ok(text)
}

fn read_binary_time(reader: &mut PayloadReader) -> Result<String> {
    let len = reader.u8()?;
    if len == 0 {
        return Ok("00:00:00".into());
    }
    let negative = reader.u8()? == 1;
    let days = reader.u32()?;
    let hour = reader.u8()?;
    let minute = reader.u8()?;
    let second = reader.u8()?;
    if len >= 12 {
        reader.u32()?;
    }
    let hours = days * 24 + hour as u32;
    let sign = if negative { "-" } else { "" };
    Ok(format!("{sign}{hours:02}:{minute:02}:{second:02}"))
}

/// Bounds-checked little-endian reader over one packet payload.
struct PayloadReader {
    buf: Bytes,
}

impl PayloadReader {
    fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    fn ensure(&self, len: usize) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(anyhow!(
                "truncated packet: need {len} bytes, have {}",
                self.buf.remaining()
            ));
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    fn u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    fn u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    fn lenenc_int(&mut self) -> Result<u64> {
        let first = self.u8()?;
        match first {
            0xfc => Ok(self.u16()? as u64),
            0xfd => {
                self.ensure(3)?;
                Ok(self.buf.get_uint_le(3))
            }
            0xfe => self.u64(),
            0xfb | 0xff => Err(anyhow!("invalid length-encoded integer 0x{first:02x}")),
            v => Ok(v as u64),
        }
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.ensure(len)?;
        self.buf.advance(len);
        Ok(())
    }

    fn bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len).to_vec())
    }

    fn cstring(&mut self) -> Result<String> {
        let end = self
            .buf
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| anyhow!("unterminated string"))?;
        let value = String::from_utf8_lossy(&self.buf[..end]).to_string();
        self.buf.advance(end + 1);
        Ok(value)
    }

    fn rest(&mut self) -> Bytes {
        self.buf.split_to(self.buf.len())
    }

    fn rest_string(&mut self) -> String {
        String::from_utf8_lossy(&self.rest()).to_string()
    }
}
