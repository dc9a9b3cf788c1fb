//! LDF text codec.
//!
//! The wire form is a comma-separated sequence of `KEY=TYPE:VALUE` triples,
//! usually written one per line:
//!
//! ```text
//! SERVERNAME=0:Overbuild Universe (US),
//! PATCHSERVERPORT=1:80,
//! AKAMAIDLM=7:0
//! ```
//!
//! Records describe themselves with a declared field table ([`LdfRecord`]):
//! an ordered list of keys, each paired with its kind and a getter/setter.
//! Encoding walks the table in order; decoding looks keys up in it.

use std::fmt::Write as _;

use thiserror::Error;

/// Value kinds and their single-digit type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    String,
    I32,
    F32,
    F64,
    U32,
    Bool,
}

impl Kind {
    pub fn tag(self) -> u8 {
        match self {
            Kind::String => 0,
            Kind::I32 => 1,
            Kind::F32 => 3,
            Kind::F64 => 4,
            Kind::U32 => 5,
            Kind::Bool => 7,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Kind::String),
            1 => Some(Kind::I32),
            3 => Some(Kind::F32),
            4 => Some(Kind::F64),
            5 => Some(Kind::U32),
            7 => Some(Kind::Bool),
            _ => None,
        }
    }
}

/// Getter/setter pair for one field, tagged by kind.
pub enum Access<R> {
    String(fn(&R) -> String, fn(&mut R, String)),
    I32(fn(&R) -> i32, fn(&mut R, i32)),
    F32(fn(&R) -> f32, fn(&mut R, f32)),
    F64(fn(&R) -> f64, fn(&mut R, f64)),
    U32(fn(&R) -> u32, fn(&mut R, u32)),
    Bool(fn(&R) -> bool, fn(&mut R, bool)),
}

pub struct Field<R> {
    pub key: &'static str,
    pub access: Access<R>,
}

impl<R> Field<R> {
    pub fn kind(&self) -> Kind {
        match self.access {
            Access::String(..) => Kind::String,
            Access::I32(..) => Kind::I32,
            Access::F32(..) => Kind::F32,
            Access::F64(..) => Kind::F64,
            Access::U32(..) => Kind::U32,
            Access::Bool(..) => Kind::Bool,
        }
    }

    fn write_value(&self, record: &R, out: &mut String) {
        // Writing into a String cannot fail.
        let _ = match self.access {
            Access::String(get, _) => write!(out, "{}", get(record)),
            Access::I32(get, _) => write!(out, "{}", get(record)),
            Access::F32(get, _) => write!(out, "{}", get(record)),
            Access::F64(get, _) => write!(out, "{}", get(record)),
            Access::U32(get, _) => write!(out, "{}", get(record)),
            Access::Bool(get, _) => write!(out, "{}", if get(record) { "1" } else { "0" }),
        };
    }

    fn read_value(&self, record: &mut R, raw: &str) -> Result<(), LdfError> {
        let invalid = || LdfError::InvalidValue {
            key: self.key.to_string(),
            value: raw.to_string(),
        };
        match self.access {
            Access::String(_, set) => set(record, raw.to_string()),
            Access::I32(_, set) => set(record, raw.trim().parse().map_err(|_| invalid())?),
            Access::F32(_, set) => set(record, raw.trim().parse().map_err(|_| invalid())?),
            Access::F64(_, set) => set(record, raw.trim().parse().map_err(|_| invalid())?),
            Access::U32(_, set) => set(record, raw.trim().parse().map_err(|_| invalid())?),
            Access::Bool(_, set) => match raw.trim() {
                "1" => set(record, true),
                "0" => set(record, false),
                _ => return Err(invalid()),
            },
        }
        Ok(())
    }
}

/// A record with a declared LDF field table. Fields not listed are never
/// encoded and never decoded.
pub trait LdfRecord: Sized + 'static {
    fn fields() -> &'static [Field<Self>];
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LdfError {
    #[error("input is not valid UTF-8")]
    Utf8,

    #[error("missing '=' in pair {0:?}")]
    MissingKey(String),

    #[error("missing type tag for key {0}")]
    MissingType(String),

    #[error("unknown type tag {tag:?} for key {key}")]
    UnknownType { key: String, tag: String },

    #[error("key {key} has type {found} but the field expects type {expected}")]
    TypeMismatch { key: String, expected: u8, found: u8 },

    #[error("invalid value {value:?} for key {key}")]
    InvalidValue { key: String, value: String },

    #[error("value {value:?} for key {key} cannot be encoded")]
    Unrepresentable { key: String, value: String },
}

/// Encode `record` in its declared field order, one triple per line.
///
/// A string value containing `,` or ending in a line break would not decode
/// back to itself, so it is refused.
pub fn marshal<R: LdfRecord>(record: &R) -> Result<Vec<u8>, LdfError> {
    let mut out = String::new();
    for (i, field) in R::fields().iter().enumerate() {
        if i > 0 {
            out.push_str(",\n");
        }
        out.push_str(field.key);
        out.push('=');
        out.push(char::from(b'0' + field.kind().tag()));
        out.push(':');
        let start = out.len();
        field.write_value(record, &mut out);
        let value = &out[start..];
        if value.contains(',') || value.ends_with(['\r', '\n']) {
            return Err(LdfError::Unrepresentable {
                key: field.key.to_string(),
                value: value.to_string(),
            });
        }
    }
    Ok(out.into_bytes())
}

/// Decode `data` into `record`. Keys without a declared field are skipped;
/// declared fields absent from the input keep their current value.
pub fn unmarshal<R: LdfRecord>(data: &[u8], record: &mut R) -> Result<(), LdfError> {
    let text = std::str::from_utf8(data).map_err(|_| LdfError::Utf8)?;
    let fields = R::fields();

    for raw in text.split(',') {
        let pair = raw.trim_start().trim_end_matches(['\r', '\n']);
        if pair.trim().is_empty() {
            continue;
        }

        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| LdfError::MissingKey(pair.to_string()))?;
        let key = key.trim();
        let (tag, value) = value
            .split_once(':')
            .ok_or_else(|| LdfError::MissingType(key.to_string()))?;

        let Some(field) = fields.iter().find(|f| f.key == key) else {
            continue;
        };

        let kind = tag
            .trim()
            .parse::<u8>()
            .ok()
            .and_then(Kind::from_tag)
            .ok_or_else(|| LdfError::UnknownType {
                key: key.to_string(),
                tag: tag.to_string(),
            })?;
        if kind != field.kind() {
            return Err(LdfError::TypeMismatch {
                key: key.to_string(),
                expected: field.kind().tag(),
                found: kind.tag(),
            });
        }

        field.read_value(record, value)?;
    }

    Ok(())
}

/// Decode into a fresh default record.
pub fn from_bytes<R: LdfRecord + Default>(data: &[u8]) -> Result<R, LdfError> {
    let mut record = R::default();
    unmarshal(data, &mut record)?;
    Ok(record)
}
