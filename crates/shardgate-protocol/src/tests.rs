#[cfg(test)]
mod tests {
    use crate::backend::{check_binary_value, encode_frame, send_frame, BinaryValueError};
    use crate::frontend::{
        decode_command, decode_execute_parameters, decode_handshake_response, read_packet,
    };
    use crate::messages::{
        column_type_for, ClientCommand, ColumnType, ErrPacket, Frame, OkPacket, ServerPacket,
        CLIENT_CONNECT_WITH_DB, CLIENT_PLUGIN_AUTH, CLIENT_PROTOCOL_41, CLIENT_SECURE_CONNECTION,
    };
    use crate::sequence::FrameSequence;
    use bytes::{Bytes, BytesMut};
    use shardgate_core::types::DataValue;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn encoded(frame: Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(&frame, &mut buf);
        buf.to_vec()
    }

    #[tokio::test]
    async fn handshake_response_parses_user_and_database() {
        let capabilities =
            CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION | CLIENT_CONNECT_WITH_DB | CLIENT_PLUGIN_AUTH;
        let mut payload = Vec::new();
        payload.extend_from_slice(&capabilities.to_le_bytes());
        payload.extend_from_slice(&16_777_216u32.to_le_bytes());
        payload.push(33);
        payload.extend_from_slice(&[0u8; 23]);
        payload.extend_from_slice(b"alice\0");
        payload.push(3);
        payload.extend_from_slice(&[1, 2, 3]);
        payload.extend_from_slice(b"sharding_db\0");
        payload.extend_from_slice(b"mysql_native_password\0");

        let mut wire = Vec::new();
        wire.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
        wire.push(1);
        wire.extend_from_slice(&payload);

        let (mut client, mut server) = tokio::io::duplex(256);
        client.write_all(&wire).await.expect("write");
        let packet = read_packet(&mut server).await.expect("read").expect("packet");
        assert_eq!(packet.sequence_id, 1);
        let response = decode_handshake_response(&packet.payload).expect("decode");
        assert_eq!(response.username, "alice");
        assert_eq!(response.auth_response, vec![1, 2, 3]);
        assert_eq!(response.database.as_deref(), Some("sharding_db"));
        assert_eq!(
            response.auth_plugin_name.as_deref(),
            Some("mysql_native_password")
        );
    }

    #[tokio::test]
    async fn read_packet_reports_clean_end_of_stream() {
        let (client, mut server) = tokio::io::duplex(16);
        drop(client);
        assert!(read_packet(&mut server).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn ok_frame_bytes() {
        let (mut client, mut server) = tokio::io::duplex(64);
        send_frame(&mut server, &Frame::new(1, ServerPacket::Ok(OkPacket::new(3, 7))))
            .await
            .expect("write");
        let mut bytes = [0u8; 11];
        client.read_exact(&mut bytes).await.expect("read");
        assert_eq!(bytes, [7, 0, 0, 1, 0x00, 3, 7, 0x02, 0, 0, 0]);
    }

    #[test]
    fn ok_packet_clears_more_results_flag() {
        assert!(!OkPacket::new(0, 0).more_results());
    }

    #[test]
    fn err_frame_bytes() {
        let bytes = encoded(Frame::new(
            1,
            ServerPacket::Err(ErrPacket {
                code: 1146,
                sql_state: "42S02".into(),
                message: "gone".into(),
            }),
        ));
        assert_eq!(&bytes[..4], &[13, 0, 0, 1]);
        assert_eq!(bytes[4], 0xff);
        assert_eq!(u16::from_le_bytes([bytes[5], bytes[6]]), 1146);
        assert_eq!(&bytes[7..13], b"#42S02");
        assert_eq!(&bytes[13..], b"gone");
    }

    #[test]
    fn text_row_encodes_null_marker() {
        let bytes = encoded(Frame::new(
            5,
            ServerPacket::TextRow(vec![
                DataValue::Int64(42),
                DataValue::Null,
                DataValue::String("ab".into()),
            ]),
        ));
        assert_eq!(&bytes[..4], &[7, 0, 0, 5]);
        assert_eq!(&bytes[4..], &[2, b'4', b'2', 0xfb, 2, b'a', b'b']);
    }

    #[test]
    fn binary_row_uses_column_types_and_null_bitmap() {
        let column_types = Arc::new(vec![ColumnType::LongLong, ColumnType::VarString]);
        let bytes = encoded(Frame::new(
            6,
            ServerPacket::BinaryRow {
                values: vec![DataValue::Int64(258), DataValue::Null],
                column_types,
            },
        ));
        let payload = &bytes[4..];
        assert_eq!(payload[0], 0x00);
        // second column is NULL: bit (1 + 2) of the bitmap
        assert_eq!(payload[1], 0b0000_1000);
        assert_eq!(&payload[2..10], &258i64.to_le_bytes());
        assert_eq!(payload.len(), 10);
    }

    #[test]
    fn binary_values_must_fit_their_column_type() {
        let fits = [
            (ColumnType::Tiny, DataValue::Int64(-128)),
            (ColumnType::Short, DataValue::String(" 32767 ".into())),
            (ColumnType::Long, DataValue::Float64(2_147_483_647.0)),
            (ColumnType::LongLong, DataValue::Int64(i64::MIN)),
            (ColumnType::LongLong, DataValue::Bool(true)),
            (ColumnType::Double, DataValue::String("2.5".into())),
            (ColumnType::Float, DataValue::Float64(1.0e30)),
            (ColumnType::VarString, DataValue::String("anything".into())),
        ];
        for (column_type, value) in fits {
            assert_eq!(check_binary_value(column_type, &value), Ok(()), "{column_type:?} {value:?}");
        }

        let out_of_range = [
            (ColumnType::Tiny, DataValue::Int64(128)),
            (ColumnType::Short, DataValue::Int64(-40_000)),
            (ColumnType::Long, DataValue::Int64(3_000_000_000)),
            (ColumnType::LongLong, DataValue::String("99999999999999999999".into())),
            (ColumnType::Float, DataValue::Float64(1.0e300)),
        ];
        for (column_type, value) in out_of_range {
            assert_eq!(
                check_binary_value(column_type, &value),
                Err(BinaryValueError::OutOfRange),
                "{column_type:?} {value:?}"
            );
        }

        let not_numeric = [
            (ColumnType::LongLong, DataValue::String("abc".into())),
            (ColumnType::Long, DataValue::Float64(1.5)),
            (ColumnType::Double, DataValue::Bytes(vec![1, 2])),
        ];
        for (column_type, value) in not_numeric {
            assert_eq!(
                check_binary_value(column_type, &value),
                Err(BinaryValueError::NotNumeric),
                "{column_type:?} {value:?}"
            );
        }
    }

    #[test]
    fn column_count_uses_length_encoding() {
        let bytes = encoded(Frame::new(1, ServerPacket::ColumnCount(300)));
        assert_eq!(&bytes[4..], &[0xfc, 0x2c, 0x01]);
    }

    #[test]
    fn decodes_query_and_statement_commands() {
        let mut query = vec![0x03];
        query.extend_from_slice(b"SELECT 1");
        match decode_command(&Bytes::from(query)).expect("decode") {
            ClientCommand::Query { sql } => assert_eq!(sql, "SELECT 1"),
            other => panic!("unexpected command: {other:?}"),
        }

        let close = Bytes::from(vec![0x19, 7, 0, 0, 0]);
        match decode_command(&close).expect("decode") {
            ClientCommand::StmtClose { statement_id } => assert_eq!(statement_id, 7),
            other => panic!("unexpected command: {other:?}"),
        }

        match decode_command(&Bytes::from(vec![0x1f])).expect("decode") {
            ClientCommand::Unsupported { code } => assert_eq!(code, 0x1f),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn execute_parameters_decode_by_type() {
        let mut payload = vec![0x00];
        payload.extend_from_slice(&1u32.to_le_bytes());
        // three params, the third is NULL
        payload.push(0b0000_0100);
        payload.push(1);
        payload.extend_from_slice(&[ColumnType::LongLong.code(), 0]);
        payload.extend_from_slice(&[ColumnType::VarString.code(), 0]);
        payload.extend_from_slice(&[ColumnType::Long.code(), 0]);
        payload.extend_from_slice(&(-5i64).to_le_bytes());
        payload.push(3);
        payload.extend_from_slice(b"bob");

        let params =
            decode_execute_parameters(&Bytes::from(payload), 3, &[]).expect("decode");
        assert_eq!(
            params.values,
            vec![
                DataValue::Int64(-5),
                DataValue::String("bob".into()),
                DataValue::Null
            ]
        );
        assert_eq!(params.types[0], (ColumnType::LongLong, false));
    }

    #[test]
    fn execute_parameters_reuse_bound_types() {
        let mut payload = vec![0x00];
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.push(0);
        payload.push(0);
        payload.extend_from_slice(&9u32.to_le_bytes());

        let bound = [(ColumnType::Long, false)];
        let params =
            decode_execute_parameters(&Bytes::from(payload.clone()), 1, &bound).expect("decode");
        assert_eq!(params.values, vec![DataValue::Int64(9)]);
        assert!(decode_execute_parameters(&Bytes::from(payload), 1, &[]).is_err());
    }

    #[test]
    fn declared_types_map_to_wire_types() {
        assert_eq!(column_type_for("BIGINT"), ColumnType::LongLong);
        assert_eq!(column_type_for("int(11)"), ColumnType::Long);
        assert_eq!(column_type_for("VARCHAR(32)"), ColumnType::VarString);
        assert_eq!(column_type_for("DECIMAL(10,2)"), ColumnType::NewDecimal);
        assert_eq!(column_type_for("something"), ColumnType::VarString);
    }

    #[test]
    fn frame_sequence_starts_at_one_and_wraps() {
        let mut seq = FrameSequence::new();
        assert_eq!(seq.next_id(), 1);
        assert_eq!(seq.next_id(), 2);
        let mut seq = FrameSequence::starting_at(255);
        assert_eq!(seq.next_id(), 255);
        assert_eq!(seq.next_id(), 0);
    }
}
