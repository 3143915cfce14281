// Copyright 2025 Fernando Borretti
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Just enough of the protobuf wire format to read the config blobs, media
//! index and `meta` entry of newer packages. Unknown fields are skipped.

use std::fmt::Display;
use std::fmt::Formatter;

#[derive(Debug, PartialEq)]
pub struct ProtoError(String);

impl Display for ProtoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed protobuf message: {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum WireValue<'a> {
    Varint(u64),
    Fixed64,
    Bytes(&'a [u8]),
    Fixed32,
}

/// A decoded message: its fields in wire order.
#[derive(Debug)]
pub struct Message<'a> {
    fields: Vec<(u32, WireValue<'a>)>,
}

impl<'a> Message<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, ProtoError> {
        let mut fields = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let key = read_varint(buf, &mut pos)?;
            let number = (key >> 3) as u32;
            if number == 0 {
                return Err(ProtoError("field number 0".to_string()));
            }
            let value = match key & 0x7 {
                0 => WireValue::Varint(read_varint(buf, &mut pos)?),
                1 => {
                    take(buf, &mut pos, 8)?;
                    WireValue::Fixed64
                }
                2 => {
                    let len = read_varint(buf, &mut pos)? as usize;
                    WireValue::Bytes(take(buf, &mut pos, len)?)
                }
                5 => {
                    take(buf, &mut pos, 4)?;
                    WireValue::Fixed32
                }
                other => return Err(ProtoError(format!("unsupported wire type {other}"))),
            };
            fields.push((number, value));
        }
        Ok(Self { fields })
    }

    /// Last occurrence wins, as in the protobuf spec.
    fn last(&self, number: u32) -> Option<WireValue<'a>> {
        self.fields
            .iter()
            .rev()
            .find(|(n, _)| *n == number)
            .map(|(_, v)| *v)
    }

    pub fn uint(&self, number: u32) -> Option<u64> {
        match self.last(number)? {
            WireValue::Varint(value) => Some(value),
            _ => None,
        }
    }

    pub fn bool(&self, number: u32) -> bool {
        self.uint(number).is_some_and(|v| v != 0)
    }

    pub fn bytes(&self, number: u32) -> Option<&'a [u8]> {
        match self.last(number)? {
            WireValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn string(&self, number: u32) -> Result<Option<String>, ProtoError> {
        match self.bytes(number) {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|_| ProtoError(format!("field {number} is not UTF-8"))),
            None => Ok(None),
        }
    }

    pub fn repeated_bytes(&self, number: u32) -> Vec<&'a [u8]> {
        self.fields
            .iter()
            .filter(|(n, _)| *n == number)
            .filter_map(|(_, v)| match v {
                WireValue::Bytes(bytes) => Some(*bytes),
                _ => None,
            })
            .collect()
    }
}

fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, ProtoError> {
    let mut value: u64 = 0;
    for shift in (0..64).step_by(7) {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| ProtoError("truncated varint".to_string()))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(ProtoError("varint too long".to_string()))
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], ProtoError> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| ProtoError("truncated field".to_string()))?;
    let slice = &buf[*pos..end];
    *pos = end;
    Ok(slice)
}

/// Encoder used to build fixture packages.
#[cfg(any(test, feature = "fixtures"))]
#[derive(Default)]
pub struct MessageWriter {
    buf: Vec<u8>,
}

#[cfg(any(test, feature = "fixtures"))]
impl MessageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn uint(mut self, number: u32, value: u64) -> Self {
        self.varint(u64::from(number) << 3);
        self.varint(value);
        self
    }

    pub fn bytes(mut self, number: u32, value: &[u8]) -> Self {
        self.varint((u64::from(number) << 3) | 2);
        self.varint(value.len() as u64);
        self.buf.extend_from_slice(value);
        self
    }

    pub fn string(self, number: u32, value: &str) -> Self {
        self.bytes(number, value.as_bytes())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
