use bytes::Bytes;
use shardgate_core::types::DataValue;
use std::sync::Arc;

pub const PROTOCOL_VERSION: u8 = 10;
pub const MAX_PAYLOAD_LEN: usize = 0xff_ffff;
/// utf8_general_ci
pub const DEFAULT_CHARSET: u8 = 33;
pub const BINARY_CHARSET: u16 = 63;

pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
pub const CLIENT_FOUND_ROWS: u32 = 0x0000_0002;
pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;

pub const SERVER_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_FOUND_ROWS
    | CLIENT_LONG_FLAG
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_PROTOCOL_41
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION
    | CLIENT_PLUGIN_AUTH;

pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;

pub const AUTH_PLUGIN_NAME: &str = "mysql_native_password";

/// MySQL column type codes (`enum_field_types`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Decimal,
    Tiny,
    Short,
    Long,
    Float,
    Double,
    Null,
    Timestamp,
    LongLong,
    Int24,
    Date,
    Time,
    Datetime,
    Year,
    Varchar,
    Bit,
    NewDecimal,
    Blob,
    VarString,
    String,
}

impl ColumnType {
    pub fn code(self) -> u8 {
        match self {
            ColumnType::Decimal => 0x00,
            ColumnType::Tiny => 0x01,
            ColumnType::Short => 0x02,
            ColumnType::Long => 0x03,
            ColumnType::Float => 0x04,
            ColumnType::Double => 0x05,
            ColumnType::Null => 0x06,
            ColumnType::Timestamp => 0x07,
            ColumnType::LongLong => 0x08,
            ColumnType::Int24 => 0x09,
            ColumnType::Date => 0x0a,
            ColumnType::Time => 0x0b,
            ColumnType::Datetime => 0x0c,
            ColumnType::Year => 0x0d,
            ColumnType::Varchar => 0x0f,
            ColumnType::Bit => 0x10,
            ColumnType::NewDecimal => 0xf6,
            ColumnType::Blob => 0xfc,
            ColumnType::VarString => 0xfd,
            ColumnType::String => 0xfe,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let ty = match code {
            0x00 => ColumnType::Decimal,
            0x01 => ColumnType::Tiny,
            0x02 => ColumnType::Short,
            0x03 => ColumnType::Long,
            0x04 => ColumnType::Float,
            0x05 => ColumnType::Double,
            0x06 => ColumnType::Null,
            0x07 => ColumnType::Timestamp,
            0x08 => ColumnType::LongLong,
            0x09 => ColumnType::Int24,
            0x0a => ColumnType::Date,
            0x0b => ColumnType::Time,
            0x0c => ColumnType::Datetime,
            0x0d => ColumnType::Year,
            0x0f => ColumnType::Varchar,
            0x10 => ColumnType::Bit,
            0xf6 => ColumnType::NewDecimal,
            0xfc => ColumnType::Blob,
            0xfd => ColumnType::VarString,
            0xfe => ColumnType::String,
            _ => return None,
        };
        Some(ty)
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::Tiny
                | ColumnType::Short
                | ColumnType::Long
                | ColumnType::Int24
                | ColumnType::LongLong
                | ColumnType::Year
                | ColumnType::Float
                | ColumnType::Double
        )
    }
}

/// Map a declared SQL type name to the MySQL column type sent to clients.
/// Unknown types are reported as VAR_STRING.
pub fn column_type_for(data_type: &str) -> ColumnType {
    let upper = data_type.to_uppercase();
    let base = upper.split('(').next().unwrap_or("").trim();
    let base = base.strip_suffix(" UNSIGNED").unwrap_or(base).trim();
    match base {
        "TINYINT" | "BOOL" | "BOOLEAN" => ColumnType::Tiny,
        "SMALLINT" => ColumnType::Short,
        "MEDIUMINT" => ColumnType::Int24,
        "INT" | "INTEGER" => ColumnType::Long,
        "BIGINT" => ColumnType::LongLong,
        "FLOAT" => ColumnType::Float,
        "DOUBLE" | "DOUBLE PRECISION" | "REAL" => ColumnType::Double,
        "DECIMAL" | "NUMERIC" | "DEC" => ColumnType::NewDecimal,
        "DATE" => ColumnType::Date,
        "TIME" => ColumnType::Time,
        "DATETIME" => ColumnType::Datetime,
        "TIMESTAMP" => ColumnType::Timestamp,
        "YEAR" => ColumnType::Year,
        "BIT" => ColumnType::Bit,
        "CHAR" => ColumnType::String,
        "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB"
        | "LONGBLOB" => ColumnType::Blob,
        _ => ColumnType::VarString,
    }
}

#[derive(Debug, Clone)]
pub struct HandshakeV10 {
    pub server_version: String,
    pub connection_id: u32,
    /// 20 bytes of scramble data.
    pub auth_plugin_data: Vec<u8>,
    pub capabilities: u32,
    pub status_flags: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

impl OkPacket {
    pub fn new(affected_rows: u64, last_insert_id: u64) -> Self {
        Self {
            affected_rows,
            last_insert_id,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            warnings: 0,
            info: String::new(),
        }
    }

    pub fn more_results(&self) -> bool {
        self.status_flags & SERVER_MORE_RESULTS_EXISTS != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub code: u16,
    pub sql_state: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition41 {
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub character_set: u16,
    pub column_length: u32,
    pub column_type: ColumnType,
    pub flags: u16,
    pub decimals: u8,
}

#[derive(Debug, Clone)]
pub enum ServerPacket {
    Handshake(HandshakeV10),
    Ok(OkPacket),
    Err(ErrPacket),
    Eof { warnings: u16, status_flags: u16 },
    ColumnCount(u64),
    ColumnDefinition(ColumnDefinition41),
    TextRow(Vec<DataValue>),
    BinaryRow {
        values: Vec<DataValue>,
        column_types: Arc<Vec<ColumnType>>,
    },
    StmtPrepareOk {
        statement_id: u32,
        columns: u16,
        params: u16,
        warnings: u16,
    },
}

impl ServerPacket {
    pub fn eof() -> Self {
        ServerPacket::Eof {
            warnings: 0,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
        }
    }
}

/// One server packet tagged with its wire sequence id.
#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence_id: u8,
    pub packet: ServerPacket,
}

impl Frame {
    pub fn new(sequence_id: u8, packet: ServerPacket) -> Self {
        Self {
            sequence_id,
            packet,
        }
    }
}

/// A raw packet as read off the wire, continuation packets already joined.
#[derive(Debug, Clone)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct HandshakeResponse {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ClientCommand {
    Quit,
    InitDb { schema: String },
    Query { sql: String },
    Ping,
    StmtPrepare { sql: String },
    /// Parameters are decoded later against the registered statement.
    StmtExecute { statement_id: u32, payload: Bytes },
    StmtClose { statement_id: u32 },
    StmtReset { statement_id: u32 },
    Unsupported { code: u8 },
}

/// Parameter types and values carried by a COM_STMT_EXECUTE.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteParameters {
    pub types: Vec<(ColumnType, bool)>,
    pub values: Vec<DataValue>,
}
