use std::io::Cursor;

use statrelay_wire::message::{MessageReader, MessageWriter, OutboundMessage};
use statrelay_wire::types::{MessageReason, MessageType, MicroTime, OwnedKeyValue, SerialType};

fn write_all(messages: &[OutboundMessage]) -> Vec<u8> {
    let mut writer = MessageWriter::new(Vec::new());
    for message in messages {
        writer.write_message(message).expect("write message");
    }
    writer.into_inner()
}

fn drain_body(
    message: &mut statrelay_wire::message::Message<'_, Cursor<Vec<u8>>>,
) -> Vec<(String, SerialType, Vec<u8>)> {
    let mut out = Vec::new();
    if let Some(body) = message.body.as_mut() {
        while let Some(kv) = body.read_next_key_value().expect("pull") {
            out.push((kv.name.to_owned(), kv.serial_type, kv.value.to_vec()));
        }
    }
    out
}

#[test]
fn keep_alive_frame_matches_golden_bytes() {
    let bytes = write_all(&[OutboundMessage {
        message_type: MessageType::KeepAlive,
        reason: MessageReason::Poll,
        timestamp: MicroTime(1_700_000_000_000_000),
        body: None,
    }]);

    let mut expected = vec![0x00, 0x04];
    expected.extend_from_slice(&1_700_000_000_000_000_i64.to_le_bytes());
    assert_eq!(bytes.len(), 10);
    assert_eq!(bytes, expected);
    assert_eq!(
        &bytes[2..],
        &[0x00, 0x40, 0x1e, 0x18, 0x24, 0x0a, 0x06, 0x00][..]
    );

    let mut reader = MessageReader::new(Cursor::new(bytes));
    let message = reader.read_next_message().expect("read").expect("frame");
    assert_eq!(message.message_type, MessageType::KeepAlive);
    assert_eq!(message.reason, MessageReason::Poll);
    assert_eq!(message.timestamp, MicroTime(1_700_000_000_000_000));
    assert!(message.body.is_none());
}

#[test]
fn one_key_full_frame_matches_golden_bytes() {
    let bytes = write_all(&[OutboundMessage {
        message_type: MessageType::TimeSeriesFull,
        reason: MessageReason::ShopEntered,
        timestamp: MicroTime(0),
        body: Some(vec![OwnedKeyValue::int16("hp", 11)]),
    }]);

    let expected = [
        0x01, 0x01, // type, reason
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // timestamp
        0xdf, // dict marker
        0x01, 0x00, // one new mapping
        0x00, 0x00, 0xd1, 0x02, 0x00, 0x68, 0x70, // id 0, Int16, "hp"
        0x01, 0x00, // one pair
        0x00, 0x00, 0x0b, 0x00, // id 0, value 11
    ];
    assert_eq!(bytes, expected);

    let mut reader = MessageReader::new(Cursor::new(bytes.to_vec()));
    let mut message = reader.read_next_message().expect("read").expect("frame");
    let decoded = drain_body(&mut message);
    assert_eq!(
        decoded,
        vec![(
            "hp".to_owned(),
            SerialType::Int16,
            11_i16.to_le_bytes().to_vec()
        )]
    );
}

#[test]
fn second_message_reuses_dictionary_ids() {
    let bytes = write_all(&[
        OutboundMessage {
            message_type: MessageType::TimeSeriesFull,
            reason: MessageReason::ShopEntered,
            timestamp: MicroTime(0),
            body: Some(vec![OwnedKeyValue::int16("hp", 11)]),
        },
        OutboundMessage {
            message_type: MessageType::TimeSeriesDiff,
            reason: MessageReason::Poll,
            timestamp: MicroTime(0),
            body: Some(vec![
                OwnedKeyValue::int16("hp", 19),
                OwnedKeyValue::float32("xp", 10.0),
            ]),
        },
    ]);

    // The second frame starts right after the first (26 bytes, see the
    // golden-bytes test above); its new-mapping block declares only "xp".
    let second = &bytes[26..];
    assert_eq!(second[10], 0xdf);
    let new_count = u16::from_le_bytes([second[11], second[12]]);
    assert_eq!(new_count, 1);

    let mut reader = MessageReader::new(Cursor::new(bytes));
    let mut first = reader.read_next_message().expect("read").expect("frame");
    drain_body(&mut first);
    drop(first);

    let mut message = reader.read_next_message().expect("read").expect("frame");
    let body = message.body.as_mut().expect("body");
    let kv = body.read_next_key_value().expect("pull").expect("hp");
    assert_eq!((kv.id, kv.name), (0, "hp"));
    let kv = body.read_next_key_value().expect("pull").expect("xp");
    assert_eq!((kv.id, kv.name), (1, "xp"));
    assert_eq!(kv.value, 10.0_f32.to_le_bytes().as_slice());
}

#[test]
fn dictionary_persists_across_source_swaps() {
    // Two bodies produced by one encoder session, delivered as two separate
    // byte sources: the shared key is declared only in the first.
    let mut writer = MessageWriter::new(Vec::new());
    writer
        .write_message(&OutboundMessage {
            message_type: MessageType::TimeSeriesFull,
            reason: MessageReason::Connect,
            timestamp: MicroTime(1),
            body: Some(vec![
                OwnedKeyValue::int16("hp", 11),
                OwnedKeyValue::string("current_character", "character_crazy"),
            ]),
        })
        .expect("write first body");
    let first_body = writer.set_sink(Vec::new());
    writer
        .write_message(&OutboundMessage {
            message_type: MessageType::TimeSeriesDiff,
            reason: MessageReason::Poll,
            timestamp: MicroTime(2),
            body: Some(vec![OwnedKeyValue::int16("hp", 3)]),
        })
        .expect("write second body");
    let second_body = writer.into_inner();

    let mut reader = MessageReader::new(Cursor::new(first_body));
    let mut message = reader.read_next_message().expect("read").expect("frame");
    drain_body(&mut message);
    drop(message);
    assert!(reader.read_next_message().expect("eof").is_none());

    reader.set_source(Cursor::new(second_body));
    let mut message = reader.read_next_message().expect("read").expect("frame");
    let decoded = drain_body(&mut message);
    assert_eq!(
        decoded,
        vec![(
            "hp".to_owned(),
            SerialType::Int16,
            3_i16.to_le_bytes().to_vec()
        )]
    );
}

#[test]
fn game_like_sequence_round_trips() {
    let now = MicroTime::now();
    let messages = vec![
        OutboundMessage {
            message_type: MessageType::KeepAlive,
            reason: MessageReason::Poll,
            timestamp: now,
            body: None,
        },
        OutboundMessage {
            message_type: MessageType::TimeSeriesFull,
            reason: MessageReason::ShopEntered,
            timestamp: now,
            body: Some(vec![
                OwnedKeyValue::int64("chal_recycling_current", 0),
                OwnedKeyValue::int64("consumables_picked_up_this_run", 2),
                OwnedKeyValue::string("current_character", "character_crazy"),
                OwnedKeyValue::int64("current_health", 11),
                OwnedKeyValue::int64("current_level", 1),
                OwnedKeyValue::float32("current_xp", 10.0),
            ]),
        },
        OutboundMessage {
            message_type: MessageType::TimeSeriesFull,
            reason: MessageReason::StartedWave,
            timestamp: now,
            body: Some(vec![
                OwnedKeyValue::int64("chal_recycling_current", 5),
                OwnedKeyValue::int64("consumables_picked_up_this_run", 3),
                OwnedKeyValue::string("current_character", "character_crazy"),
                OwnedKeyValue::int64("current_health", 19),
                OwnedKeyValue::int64("current_level", 1),
                OwnedKeyValue::float32("current_xp", 16.4),
            ]),
        },
        OutboundMessage {
            message_type: MessageType::TimeSeriesDiff,
            reason: MessageReason::Poll,
            timestamp: now,
            body: Some(vec![
                OwnedKeyValue::int64("chal_recycling_current", 7),
                OwnedKeyValue::int64("current_level", 2),
                OwnedKeyValue::float32("current_xp", 32.7),
            ]),
        },
        OutboundMessage {
            message_type: MessageType::TimeSeriesDiff,
            reason: MessageReason::Poll,
            timestamp: now,
            body: Some(vec![
                OwnedKeyValue::int64("chal_recycling_current", 7),
                OwnedKeyValue::int64("current_level", 2),
                OwnedKeyValue::float32("current_xp", 45.1),
                OwnedKeyValue::int64("effects_stat_dodge", -36),
            ]),
        },
        OutboundMessage {
            message_type: MessageType::KeepAlive,
            reason: MessageReason::Poll,
            timestamp: now,
            body: None,
        },
    ];

    let bytes = write_all(&messages);
    let mut reader = MessageReader::new(Cursor::new(bytes));

    for want in &messages {
        let mut got = reader.read_next_message().expect("read").expect("frame");
        assert_eq!(got.message_type, want.message_type);
        assert_eq!(got.reason, want.reason);
        assert_eq!(got.timestamp, want.timestamp);

        let decoded = drain_body(&mut got);
        let expected: Vec<_> = want
            .body
            .iter()
            .flatten()
            .map(|kv| (kv.name.clone(), kv.serial_type, kv.value.clone()))
            .collect();
        assert_eq!(decoded, expected);
    }
    assert!(reader.read_next_message().expect("eof").is_none());
}

#[test]
fn truncated_body_fails_after_committed_reads() {
    let bytes = write_all(&[OutboundMessage {
        message_type: MessageType::TimeSeriesFull,
        reason: MessageReason::None,
        timestamp: MicroTime(0),
        body: Some(vec![
            OwnedKeyValue::int16("hp", 1),
            OwnedKeyValue::int16("mp", 2),
        ]),
    }]);

    // Cut the stream inside the second pair's value bytes.
    let truncated = bytes[..bytes.len() - 1].to_vec();
    let mut reader = MessageReader::new(Cursor::new(truncated));
    let mut message = reader.read_next_message().expect("read").expect("frame");
    let body = message.body.as_mut().expect("body");

    let kv = body.read_next_key_value().expect("first pair").expect("hp");
    assert_eq!(kv.name, "hp");
    let err = body.read_next_key_value().expect_err("second pair truncated");
    assert!(err.is_unexpected_eof());
}
