use std::io::{Read, Write};

use crate::dict::{DictMappingTable, DictReader, DictWriter};
use crate::error::WireError;
use crate::serial::{SerialReader, SerialWriter};
use crate::types::{MessageReason, MessageType, MicroTime, OwnedKeyValue};

/// One decoded message frame.
///
/// The body, when present, borrows the reader and must be fully drained
/// before the next frame is read.
#[derive(Debug)]
pub struct Message<'a, R> {
    pub message_type: MessageType,
    pub reason: MessageReason,
    pub timestamp: MicroTime,
    pub body: Option<DictReader<'a, R>>,
}

/// Stream decoder for exporter messages.
///
/// Owns one serial reader and one dict mapping table for its whole lifetime.
/// [`MessageReader::set_source`] swaps the byte source without touching the
/// table, so key ids learned from earlier sources keep resolving — a new
/// HTTP body is a new source but the same semantic session.
#[derive(Debug)]
pub struct MessageReader<R> {
    serial: SerialReader<R>,
    mappings: DictMappingTable,
}

impl<R: Read> MessageReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            serial: SerialReader::new(source),
            mappings: DictMappingTable::new(),
        }
    }

    /// Swaps the underlying byte source. The dict mapping table is retained.
    pub fn set_source(&mut self, source: R) {
        self.serial.set_source(source);
    }

    /// Key names learned so far, in no particular order.
    pub fn mapped_key_list(&self) -> Vec<String> {
        self.mappings.values().map(|m| m.name.clone()).collect()
    }

    /// Reads the next message frame.
    ///
    /// Returns `Ok(None)` when the source is cleanly exhausted at a frame
    /// boundary; exhaustion anywhere inside a frame is an error.
    pub fn read_next_message(&mut self) -> Result<Option<Message<'_, R>>, WireError> {
        let type_byte = match self.serial.read_u8() {
            Ok(byte) => byte,
            Err(err) if err.is_unexpected_eof() => return Ok(None),
            Err(err) => return Err(err),
        };
        let message_type = MessageType::from_u8(type_byte)?;
        let reason = MessageReason::from_u8(self.serial.read_u8()?);
        let timestamp = MicroTime(self.serial.read_i64()?);

        let body = if message_type.has_body() {
            let Self { serial, mappings } = self;
            Some(DictReader::new(serial, mappings)?)
        } else {
            None
        };

        Ok(Some(Message {
            message_type,
            reason,
            timestamp,
            body,
        }))
    }
}

/// Outbound message assembled on the exporter side.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub message_type: MessageType,
    pub reason: MessageReason,
    pub timestamp: MicroTime,
    pub body: Option<Vec<OwnedKeyValue>>,
}

/// Stream encoder for exporter messages.
///
/// The dict writer's name-to-id table persists across sinks, mirroring the
/// reader side: [`MessageWriter::set_sink`] starts a new body without
/// re-declaring already-sent keys.
#[derive(Debug)]
pub struct MessageWriter<W> {
    serial: SerialWriter<W>,
    dict: DictWriter,
}

impl<W: Write> MessageWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            serial: SerialWriter::new(sink),
            dict: DictWriter::new(),
        }
    }

    /// Swaps the underlying sink, returning the previous one. The dictionary
    /// table is retained.
    pub fn set_sink(&mut self, sink: W) -> W {
        self.serial.set_sink(sink)
    }

    pub fn into_inner(self) -> W {
        self.serial.into_inner()
    }

    pub fn write_message(&mut self, message: &OutboundMessage) -> Result<(), WireError> {
        self.serial.write_u8(message.message_type as u8)?;
        self.serial.write_u8(message.reason.as_u8())?;
        self.serial.write_u64(message.timestamp.0 as u64)?;

        if let Some(body) = &message.body {
            self.dict.encode_dict(&mut self.serial, body)?;
        }
        Ok(())
    }
}
