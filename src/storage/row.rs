use bytes::Bytes;

use crate::error::{ChainError, Result};
use crate::primitives::bytes::{buf::Cursor, var};
use crate::types::PropValue;

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STRING: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;
const TAG_DATE: u8 = 0x06;
const TAG_DATETIME: u8 = 0x07;

const ROW_VERSION: u8 = 1;

/// Value stored under a real edge key: named properties in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgeRow {
    /// `(name, value)` pairs.
    pub props: Vec<(String, PropValue)>,
}

impl EdgeRow {
    /// Builds a row by zipping names with values.
    pub fn from_parts(names: &[String], values: &[PropValue]) -> Result<Self> {
        if names.len() != values.len() {
            return Err(ChainError::InvalidRequest(
                "property names and values differ in length",
            ));
        }
        Ok(Self {
            props: names.iter().cloned().zip(values.iter().cloned()).collect(),
        })
    }

    /// Returns the value of a property.
    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.props.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Overwrites a property, appending it when absent.
    pub fn set(&mut self, name: &str, value: PropValue) {
        match self.props.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.props.push((name.to_string(), value)),
        }
    }

    /// Encodes the row.
    pub fn encode(&self) -> Bytes {
        let mut buf = vec![ROW_VERSION];
        var::encode_u64(self.props.len() as u64, &mut buf);
        for (name, value) in &self.props {
            var::put_bytes(&mut buf, name.as_bytes());
            write_prop(&mut buf, value);
        }
        Bytes::from(buf)
    }

    /// Decodes a row written by [`EdgeRow::encode`].
    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(src);
        if cur.u8()? != ROW_VERSION {
            return Err(ChainError::Decode("unsupported edge row version"));
        }
        let count = cur.varint()?;
        let mut props = Vec::new();
        for _ in 0..count {
            let name = cur.string()?;
            let value = read_prop(&mut cur)?;
            props.push((name, value));
        }
        cur.finish()?;
        Ok(Self { props })
    }
}

pub(crate) fn write_prop(buf: &mut Vec<u8>, value: &PropValue) {
    match value {
        PropValue::Null => buf.push(TAG_NULL),
        PropValue::Bool(v) => {
            buf.push(TAG_BOOL);
            buf.push(u8::from(*v));
        }
        PropValue::Int(v) => {
            buf.push(TAG_INT);
            var::encode_i64(*v, buf);
        }
        PropValue::Float(v) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        PropValue::Str(v) => {
            buf.push(TAG_STRING);
            var::put_bytes(buf, v.as_bytes());
        }
        PropValue::Bytes(v) => {
            buf.push(TAG_BYTES);
            var::put_bytes(buf, v);
        }
        PropValue::Date(v) => {
            buf.push(TAG_DATE);
            var::encode_i64(*v, buf);
        }
        PropValue::DateTime(v) => {
            buf.push(TAG_DATETIME);
            var::encode_i64(*v, buf);
        }
    }
}

pub(crate) fn read_prop(cur: &mut Cursor<'_>) -> Result<PropValue> {
    let value = match cur.u8()? {
        TAG_NULL => PropValue::Null,
        TAG_BOOL => match cur.u8()? {
            0 => PropValue::Bool(false),
            1 => PropValue::Bool(true),
            _ => return Err(ChainError::Decode("invalid bool")),
        },
        TAG_INT => PropValue::Int(cur.zigzag()?),
        TAG_FLOAT => {
            let raw: [u8; 8] = cur
                .take(8)?
                .try_into()
                .map_err(|_| ChainError::Decode("float truncated"))?;
            PropValue::Float(f64::from_le_bytes(raw))
        }
        TAG_STRING => PropValue::Str(cur.string()?),
        TAG_BYTES => PropValue::Bytes(cur.bytes()?.to_vec()),
        TAG_DATE => PropValue::Date(cur.zigzag()?),
        TAG_DATETIME => PropValue::DateTime(cur.zigzag()?),
        _ => return Err(ChainError::Decode("unknown property tag")),
    };
    Ok(value)
}
