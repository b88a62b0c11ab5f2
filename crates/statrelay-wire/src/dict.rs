use std::collections::HashMap;
use std::io::{Read, Write};

use crate::error::WireError;
use crate::serial::{SerialReader, SerialWriter};
use crate::types::{KeyValue, OwnedKeyValue, SerialType};

/// Marker byte opening every dict payload.
pub const DICT_HEADER: u8 = 0xdf;

/// One learned dictionary entry: the key id's full name and value type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictMapping {
    pub name: String,
    pub serial_type: SerialType,
}

/// Key id to mapping table shared by all payloads of one reader session.
pub type DictMappingTable = HashMap<u16, DictMapping>;

/// Lazy pull reader over one dict payload.
///
/// Construction consumes the payload header and ingests its new-mapping block
/// into the shared table; values are then pulled one at a time. The payload
/// must be fully drained before the surrounding stream is read further.
///
/// Wire layout:
/// - dict marker (u8, `0xdf`)
/// - new mapping count (u16)
/// - per new mapping: key id (u16), serial type (u8), name length (u16),
///   name bytes
/// - key/value count (u16)
/// - per pair: key id (u16), value bytes (fixed width, or u32 length + bytes
///   for strings)
#[derive(Debug)]
pub struct DictReader<'a, R> {
    serial: &'a mut SerialReader<R>,
    mappings: &'a mut DictMappingTable,
    kv_count: u16,
    read_count: u16,
}

impl<'a, R: Read> DictReader<'a, R> {
    pub(crate) fn new(
        serial: &'a mut SerialReader<R>,
        mappings: &'a mut DictMappingTable,
    ) -> Result<Self, WireError> {
        let header = serial.peek_u8()?;
        if header != DICT_HEADER {
            return Err(WireError::InvalidHeader(header));
        }
        serial.read_u8()?;

        let new_count = serial.read_u16()?;
        for _ in 0..new_count {
            let id = serial.read_u16()?;
            let serial_type = SerialType::from_u8(serial.read_u8()?)?;
            let name_len = serial.read_u16()? as usize;
            let name = String::from_utf8_lossy(serial.read_bytes(name_len)?).into_owned();
            // A redeclared id overwrites the previous mapping.
            mappings.insert(id, DictMapping { name, serial_type });
        }

        let kv_count = serial.read_u16()?;
        Ok(Self {
            serial,
            mappings,
            kv_count,
            read_count: 0,
        })
    }

    /// Total number of key/value pairs in this payload.
    pub fn len(&self) -> usize {
        usize::from(self.kv_count)
    }

    pub fn is_empty(&self) -> bool {
        self.kv_count == 0
    }

    /// Pulls the next key/value pair, or `None` at the end of the payload.
    ///
    /// The returned value bytes live in the reader's scratch buffer and the
    /// name in the shared mapping table; both are invalidated by the next
    /// pull.
    pub fn read_next_key_value(&mut self) -> Result<Option<KeyValue<'_>>, WireError> {
        if self.read_count >= self.kv_count {
            return Ok(None);
        }

        let id = self.serial.read_u16()?;
        let mapping = self
            .mappings
            .get(&id)
            .ok_or(WireError::UnknownKeyId(id))?;
        let serial_type = mapping.serial_type;

        let value = match serial_type.fixed_width() {
            Some(width) => self.serial.read_bytes(width)?,
            None => {
                let len = self.serial.read_u32()? as usize;
                self.serial.read_bytes(len)?
            }
        };

        self.read_count += 1;
        Ok(Some(KeyValue {
            id,
            name: &mapping.name,
            serial_type,
            value,
        }))
    }
}

/// Dict payload encoder.
///
/// Carries the name-to-id table across payloads; ids are assigned in
/// first-seen order starting at 0. Each payload is one header block followed
/// by one body block, both buffered and flushed together.
#[derive(Debug, Default)]
pub struct DictWriter {
    mappings: HashMap<String, WriterMapping>,
}

#[derive(Debug)]
struct WriterMapping {
    id: u16,
    serial_type: SerialType,
}

impl DictWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes one dict payload from the given entries, in order.
    ///
    /// Names never seen before get a header entry declaring their id and
    /// type; every entry appends its id and current value bytes to the body.
    pub fn encode_dict<W: Write>(
        &mut self,
        serial: &mut SerialWriter<W>,
        entries: &[OwnedKeyValue],
    ) -> Result<(), WireError> {
        if entries.len() > usize::from(u16::MAX) {
            return Err(WireError::Encode("too many key/value pairs for one payload"));
        }

        let mut header = Vec::with_capacity(1024);
        header.push(DICT_HEADER);
        header.extend_from_slice(&[0, 0]);

        let mut body = Vec::with_capacity(1024);
        body.extend_from_slice(&[0, 0]);

        let mut new_count: u16 = 0;
        for entry in entries {
            let id = match self.mappings.get(&entry.name) {
                Some(known) => known.id,
                None => {
                    if entry.name.len() > usize::from(u16::MAX) {
                        return Err(WireError::Encode("key name too long"));
                    }
                    let id = self.mappings.len() as u16;
                    self.mappings.insert(
                        entry.name.clone(),
                        WriterMapping {
                            id,
                            serial_type: entry.serial_type,
                        },
                    );
                    new_count += 1;

                    header.extend_from_slice(&id.to_le_bytes());
                    header.push(entry.serial_type as u8);
                    header.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
                    header.extend_from_slice(entry.name.as_bytes());
                    id
                }
            };

            body.extend_from_slice(&id.to_le_bytes());
            if entry.serial_type == SerialType::String {
                if entry.value.len() > u32::MAX as usize {
                    return Err(WireError::Encode("string value too long"));
                }
                body.extend_from_slice(&(entry.value.len() as u32).to_le_bytes());
            }
            body.extend_from_slice(&entry.value);
        }

        header[1..3].copy_from_slice(&new_count.to_le_bytes());
        body[..2].copy_from_slice(&(entries.len() as u16).to_le_bytes());

        serial.write_bytes(&header)?;
        serial.write_bytes(&body)?;
        Ok(())
    }
}
