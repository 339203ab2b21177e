//! Mensagens e o formato tipado
//!
//! Uma mensagem é (tipo, payload). O formato tipado serializa uma
//! sequência de entradas etiquetadas por um byte de tipo; o leitor precisa
//! consumir na mesma ordem e com os mesmos tipos do escritor.

use crate::{KResult, Status};
use alloc::string::String;
use alloc::vec::Vec;

/// Payload máximo de uma mensagem
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Uma mensagem de IPC
#[derive(Debug)]
pub struct Message {
    pub mtype: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(mtype: u32, payload: Vec<u8>) -> KResult<Self> {
        if payload.len() > MAX_MESSAGE_BYTES {
            return Err(Status::TooLarge);
        }
        Ok(Self { mtype, payload })
    }
}

/// Etiquetas de tipo do formato tipado
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Tag {
    Bool = 1,
    Str = 2,
    Bytes = 3,
    I8 = 4,
    I16 = 5,
    I32 = 6,
    I64 = 7,
    U8 = 8,
    U16 = 9,
    U32 = 10,
    U64 = 11,
}

impl Tag {
    fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Tag::Bool,
            2 => Tag::Str,
            3 => Tag::Bytes,
            4 => Tag::I8,
            5 => Tag::I16,
            6 => Tag::I32,
            7 => Tag::I64,
            8 => Tag::U8,
            9 => Tag::U16,
            10 => Tag::U32,
            11 => Tag::U64,
            _ => return None,
        })
    }
}

/// Escritor do formato tipado
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn tag(&mut self, tag: Tag) {
        self.buf.push(tag as u8);
    }

    pub fn push_bool(&mut self, value: bool) {
        self.tag(Tag::Bool);
        self.buf.push(value as u8);
    }

    pub fn push_str(&mut self, value: &str) {
        self.tag(Tag::Str);
        self.buf
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn push_bytes(&mut self, value: &[u8]) {
        self.tag(Tag::Bytes);
        self.buf
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value);
    }

    pub fn push_i8(&mut self, value: i8) {
        self.tag(Tag::I8);
        self.buf.push(value as u8);
    }

    pub fn push_i16(&mut self, value: i16) {
        self.tag(Tag::I16);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_i32(&mut self, value: i32) {
        self.tag(Tag::I32);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_i64(&mut self, value: i64) {
        self.tag(Tag::I64);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_u8(&mut self, value: u8) {
        self.tag(Tag::U8);
        self.buf.push(value);
    }

    pub fn push_u16(&mut self, value: u16) {
        self.tag(Tag::U16);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_u32(&mut self, value: u32) {
        self.tag(Tag::U32);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn push_u64(&mut self, value: u64) {
        self.tag(Tag::U64);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Consome o escritor e devolve o payload.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for MessageWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Leitor do formato tipado. Consome em ordem; tipo errado é erro de
/// protocolo.
pub struct MessageReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn expect(&mut self, want: Tag) -> KResult<()> {
        let byte = *self.buf.get(self.pos).ok_or(Status::TooSmall)?;
        let tag = Tag::from_byte(byte).ok_or(Status::TypeMismatch)?;
        if tag != want {
            return Err(Status::TypeMismatch);
        }
        self.pos += 1;
        Ok(())
    }

    fn take(&mut self, len: usize) -> KResult<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or(Status::TooSmall)?;
        if end > self.buf.len() {
            return Err(Status::TooSmall);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_len(&mut self) -> KResult<usize> {
        let bytes = self.take(4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(raw) as usize)
    }

    pub fn pop_bool(&mut self) -> KResult<bool> {
        self.expect(Tag::Bool)?;
        Ok(self.take(1)?[0] != 0)
    }

    pub fn pop_str(&mut self) -> KResult<String> {
        self.expect(Tag::Str)?;
        let len = self.take_len()?;
        let bytes = self.take(len)?;
        core::str::from_utf8(bytes)
            .map(String::from)
            .map_err(|_| Status::TypeMismatch)
    }

    pub fn pop_bytes(&mut self) -> KResult<Vec<u8>> {
        self.expect(Tag::Bytes)?;
        let len = self.take_len()?;
        Ok(Vec::from(self.take(len)?))
    }

    pub fn pop_i8(&mut self) -> KResult<i8> {
        self.expect(Tag::I8)?;
        Ok(self.take(1)?[0] as i8)
    }

    pub fn pop_i16(&mut self) -> KResult<i16> {
        self.expect(Tag::I16)?;
        let mut raw = [0u8; 2];
        raw.copy_from_slice(self.take(2)?);
        Ok(i16::from_le_bytes(raw))
    }

    pub fn pop_i32(&mut self) -> KResult<i32> {
        self.expect(Tag::I32)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(raw))
    }

    pub fn pop_i64(&mut self) -> KResult<i64> {
        self.expect(Tag::I64)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(raw))
    }

    pub fn pop_u8(&mut self) -> KResult<u8> {
        self.expect(Tag::U8)?;
        Ok(self.take(1)?[0])
    }

    pub fn pop_u16(&mut self) -> KResult<u16> {
        self.expect(Tag::U16)?;
        let mut raw = [0u8; 2];
        raw.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(raw))
    }

    pub fn pop_u32(&mut self) -> KResult<u32> {
        self.expect(Tag::U32)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    pub fn pop_u64(&mut self) -> KResult<u64> {
        self.expect(Tag::U64)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_stream() {
        let mut writer = MessageWriter::new();
        writer.push_u32(7);
        writer.push_str("anvil");
        writer.push_bool(true);
        writer.push_i64(-9);
        let payload = writer.finish();

        let mut reader = MessageReader::new(&payload);
        assert_eq!(reader.pop_u32().unwrap(), 7);
        assert_eq!(reader.pop_str().unwrap(), "anvil");
        assert!(reader.pop_bool().unwrap());
        assert_eq!(reader.pop_i64().unwrap(), -9);
        assert!(reader.is_empty());
    }

    #[test]
    fn type_mismatch_is_protocol_error() {
        let mut writer = MessageWriter::new();
        writer.push_u16(80);
        let payload = writer.finish();

        let mut reader = MessageReader::new(&payload);
        assert_eq!(reader.pop_u32().unwrap_err(), Status::TypeMismatch);
    }

    #[test]
    fn truncated_payload() {
        let mut writer = MessageWriter::new();
        writer.push_u64(1);
        let mut payload = writer.finish();
        payload.truncate(4);

        let mut reader = MessageReader::new(&payload);
        assert_eq!(reader.pop_u64().unwrap_err(), Status::TooSmall);
    }

    #[test]
    fn bytes_roundtrip() {
        let mut writer = MessageWriter::new();
        writer.push_bytes(&[1, 2, 3]);
        let payload = writer.finish();

        let mut reader = MessageReader::new(&payload);
        assert_eq!(reader.pop_bytes().unwrap(), [1, 2, 3]);
    }

    #[test]
    fn oversized_message_rejected() {
        let payload = alloc::vec![0u8; MAX_MESSAGE_BYTES + 1];
        assert_eq!(Message::new(0, payload).unwrap_err(), Status::TooLarge);
    }
}
