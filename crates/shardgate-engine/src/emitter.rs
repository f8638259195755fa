use shardgate_core::error::{
    ER_TRUNCATED_WRONG_VALUE_FOR_FIELD, ER_UNKNOWN_ERROR, ER_WARN_DATA_OUT_OF_RANGE,
};
use shardgate_core::types::{ColumnMeta, DataValue, Failure, MergedOutcome, Row, RowStream};
use shardgate_protocol::backend::{check_binary_value, BinaryValueError};
use shardgate_protocol::messages::{
    column_type_for, ColumnDefinition41, ColumnType, ErrPacket, OkPacket, BINARY_CHARSET,
    DEFAULT_CHARSET,
};
use shardgate_protocol::{Frame, FrameSequence, ServerPacket};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// Row encoding of the two execution paths: COM_QUERY uses text rows,
/// COM_STMT_EXECUTE uses binary rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEncoding {
    Text,
    Binary,
}

/// Turn a merged outcome into its response frames.
///
/// Every frame is numbered by a fresh counter starting at 1; nothing a shard
/// produced is forwarded as raw bytes. Rows are pulled from the merged stream
/// only as frames are requested.
pub fn emit(outcome: MergedOutcome, encoding: RowEncoding) -> FrameStream {
    let mut stream = FrameStream {
        sequence: FrameSequence::new(),
        pending: VecDeque::new(),
        rows: None,
        column_types: Arc::new(Vec::new()),
        column_labels: Vec::new(),
        rows_sent: 0,
        encoding,
    };
    match outcome {
        MergedOutcome::Failure(failure) => stream.push(error_packet(&failure)),
        MergedOutcome::Count {
            affected_rows,
            last_insert_id,
        } => stream.push(ServerPacket::Ok(OkPacket::new(affected_rows, last_insert_id))),
        MergedOutcome::Rows(result) if result.columns.is_empty() => {
            stream.push(ServerPacket::Ok(OkPacket::new(0, 0)))
        }
        MergedOutcome::Rows(result) => {
            stream.push(ServerPacket::ColumnCount(result.columns.len() as u64));
            let mut column_types = Vec::with_capacity(result.columns.len());
            for column in &result.columns {
                let definition = column_definition(column);
                column_types.push(definition.column_type);
                stream.push(ServerPacket::ColumnDefinition(definition));
            }
            stream.push(ServerPacket::eof());
            stream.column_types = Arc::new(column_types);
            stream.column_labels = result.columns.iter().map(|c| c.label.clone()).collect();
            stream.rows = Some(result.rows);
        }
    }
    stream
}

pub struct FrameStream {
    sequence: FrameSequence,
    pending: VecDeque<Frame>,
    rows: Option<RowStream>,
    column_types: Arc<Vec<ColumnType>>,
    column_labels: Vec<String>,
    rows_sent: u64,
    encoding: RowEncoding,
}

impl FrameStream {
    fn push(&mut self, packet: ServerPacket) {
        let frame = Frame::new(self.sequence.next_id(), packet);
        self.pending.push_back(frame);
    }

    fn frame(&mut self, packet: ServerPacket) -> Frame {
        Frame::new(self.sequence.next_id(), packet)
    }

    fn row_packet(&mut self, mut row: Row) -> Result<ServerPacket, Failure> {
        row.resize(self.column_types.len(), DataValue::Null);
        self.rows_sent += 1;
        if self.encoding == RowEncoding::Text {
            return Ok(ServerPacket::TextRow(row));
        }
        for (idx, value) in row.iter().enumerate() {
            if value.is_null() {
                continue;
            }
            if let Err(err) = check_binary_value(self.column_types[idx], value) {
                return Err(self.value_failure(idx, value, err));
            }
        }
        Ok(ServerPacket::BinaryRow {
            values: row,
            column_types: self.column_types.clone(),
        })
    }

    /// A value that does not fit its column's binary type ends the result
    /// with an error rather than a wrong number.
    fn value_failure(&self, idx: usize, value: &DataValue, err: BinaryValueError) -> Failure {
        let column = self.column_labels.get(idx).map(String::as_str).unwrap_or_default();
        let row = self.rows_sent;
        warn!(column, row, ?err, "value does not fit its binary column type");
        match err {
            BinaryValueError::OutOfRange => Failure::new(
                ER_WARN_DATA_OUT_OF_RANGE,
                "22003",
                format!("Out of range value for column '{column}' at row {row}"),
            ),
            BinaryValueError::NotNumeric => {
                let text = value
                    .to_text()
                    .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
                    .unwrap_or_default();
                Failure::new(
                    ER_TRUNCATED_WRONG_VALUE_FOR_FIELD,
                    "HY000",
                    format!("Incorrect value: '{text}' for column '{column}' at row {row}"),
                )
            }
        }
    }
}

impl Iterator for FrameStream {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if let Some(frame) = self.pending.pop_front() {
            return Some(frame);
        }
        let next = self.rows.as_mut()?.next();
        match next {
            Some(Ok(row)) => match self.row_packet(row) {
                Ok(packet) => Some(self.frame(packet)),
                Err(failure) => {
                    self.rows = None;
                    Some(self.frame(error_packet(&failure)))
                }
            },
            Some(Err(err)) => {
                // dropping the stream releases every shard cursor behind it
                self.rows = None;
                Some(self.frame(error_packet(&err.failure())))
            }
            None => {
                self.rows = None;
                Some(self.frame(ServerPacket::eof()))
            }
        }
    }
}

pub fn error_packet(failure: &Failure) -> ServerPacket {
    ServerPacket::Err(ErrPacket {
        code: u16::try_from(failure.code).unwrap_or(ER_UNKNOWN_ERROR as u16),
        sql_state: failure.sql_state.clone(),
        message: failure.message.clone(),
    })
}

pub fn column_definition(column: &ColumnMeta) -> ColumnDefinition41 {
    let column_type = column_type_for(&column.data_type);
    let character_set = if column_type.is_numeric() {
        BINARY_CHARSET
    } else {
        DEFAULT_CHARSET as u16
    };
    ColumnDefinition41 {
        schema: column.schema.clone(),
        table: column.table.clone(),
        org_table: column.table.clone(),
        name: column.label.clone(),
        org_name: column.name.clone(),
        character_set,
        column_length: column.display_size,
        column_type,
        flags: 0,
        decimals: column.decimals,
    }
}
