//! Typed attribute values

use crate::{AttributeType, IntFormat};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%y", "%Y-%b-%d"];
const TIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%d/%m/%y %H:%M:%S", "%Y-%b-%d %H:%M:%S"];

/// Failure to interpret text as a value of some attribute type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseValueError {
    #[error("'{text}' is not a valid {ty} value")]
    InvalidNumber { text: String, ty: AttributeType },

    #[error("'{text}' does not fit into {ty}")]
    OutOfBounds { text: String, ty: AttributeType },

    #[error("'{0}' is not a boolean (expected true/false/yes/no/1/0)")]
    InvalidBool(String),

    #[error("'{0}' is not a date (expected yyyy-mm-dd, dd/mm/yy or yyyy-mon-dd)")]
    InvalidDate(String),

    #[error("'{0}' is not a time (expected a date followed by HH:MM:SS)")]
    InvalidTime(String),
}

/// A typed attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    S8(i8),
    U8(u8),
    S16(i16),
    U16(u16),
    S32(i32),
    U32(u32),
    S64(i64),
    U64(u64),
    Float(f32),
    Double(f64),
    Date(NaiveDate),
    Time(NaiveDateTime),
    String(String),
    Enum(String),
    Class(String),
    /// Value of a multi-value attribute
    List(Vec<Value>),
}

impl Value {
    /// Parse text as a single value of the given type
    pub fn parse(ty: AttributeType, text: &str) -> Result<Value, ParseValueError> {
        let trimmed = text.trim();
        let value = match ty {
            AttributeType::Bool => Value::Bool(parse_bool(trimmed)?),
            AttributeType::S8 => Value::S8(narrow(trimmed, ty)?),
            AttributeType::U8 => Value::U8(narrow(trimmed, ty)?),
            AttributeType::S16 => Value::S16(narrow(trimmed, ty)?),
            AttributeType::U16 => Value::U16(narrow(trimmed, ty)?),
            AttributeType::S32 => Value::S32(narrow(trimmed, ty)?),
            AttributeType::U32 => Value::U32(narrow(trimmed, ty)?),
            AttributeType::S64 => Value::S64(narrow(trimmed, ty)?),
            AttributeType::U64 => Value::U64(narrow(trimmed, ty)?),
            AttributeType::Float => Value::Float(trimmed.parse().map_err(|_| {
                ParseValueError::InvalidNumber {
                    text: trimmed.to_string(),
                    ty,
                }
            })?),
            AttributeType::Double => Value::Double(trimmed.parse().map_err(|_| {
                ParseValueError::InvalidNumber {
                    text: trimmed.to_string(),
                    ty,
                }
            })?),
            AttributeType::Date => Value::Date(parse_date(trimmed)?),
            AttributeType::Time => Value::Time(parse_time(trimmed)?),
            AttributeType::String => Value::String(text.to_string()),
            AttributeType::Enum => Value::Enum(trimmed.to_string()),
            AttributeType::Class => Value::Class(trimmed.to_string()),
        };
        Ok(value)
    }

    /// Parse a comma separated list; blank text is an empty list
    pub fn parse_list(ty: AttributeType, text: &str) -> Result<Value, ParseValueError> {
        if text.trim().is_empty() {
            return Ok(Value::List(Vec::new()));
        }
        text.split(',')
            .map(|item| Value::parse(ty, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List)
    }

    /// The zero value of a type (false, 0, empty text, the epoch)
    pub fn zero(ty: AttributeType) -> Value {
        match ty {
            AttributeType::Bool => Value::Bool(false),
            AttributeType::S8 => Value::S8(0),
            AttributeType::U8 => Value::U8(0),
            AttributeType::S16 => Value::S16(0),
            AttributeType::U16 => Value::U16(0),
            AttributeType::S32 => Value::S32(0),
            AttributeType::U32 => Value::U32(0),
            AttributeType::S64 => Value::S64(0),
            AttributeType::U64 => Value::U64(0),
            AttributeType::Float => Value::Float(0.0),
            AttributeType::Double => Value::Double(0.0),
            AttributeType::Date => Value::Date(NaiveDate::default()),
            AttributeType::Time => Value::Time(NaiveDateTime::default()),
            AttributeType::String => Value::String(String::new()),
            AttributeType::Enum => Value::Enum(String::new()),
            AttributeType::Class => Value::Class(String::new()),
        }
    }

    /// The attribute type of a single value; `None` for lists
    pub fn attribute_type(&self) -> Option<AttributeType> {
        Some(match self {
            Value::Bool(_) => AttributeType::Bool,
            Value::S8(_) => AttributeType::S8,
            Value::U8(_) => AttributeType::U8,
            Value::S16(_) => AttributeType::S16,
            Value::U16(_) => AttributeType::U16,
            Value::S32(_) => AttributeType::S32,
            Value::U32(_) => AttributeType::U32,
            Value::S64(_) => AttributeType::S64,
            Value::U64(_) => AttributeType::U64,
            Value::Float(_) => AttributeType::Float,
            Value::Double(_) => AttributeType::Double,
            Value::Date(_) => AttributeType::Date,
            Value::Time(_) => AttributeType::Time,
            Value::String(_) => AttributeType::String,
            Value::Enum(_) => AttributeType::Enum,
            Value::Class(_) => AttributeType::Class,
            Value::List(_) => return None,
        })
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Text of string, enum and class values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) | Value::Class(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Any integer value widened to i128
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Value::S8(v) => Some(v.into()),
            Value::U8(v) => Some(v.into()),
            Value::S16(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::S32(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::S64(v) => Some(v.into()),
            Value::U64(v) => Some(v.into()),
            _ => None,
        }
    }

    /// Any numeric value as f64
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v.into()),
            Value::Double(v) => Some(v),
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    /// Order two values of compatible kinds; `None` when they cannot be compared
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (
                Value::String(a) | Value::Enum(a) | Value::Class(a),
                Value::String(b) | Value::Enum(b) | Value::Class(b),
            ) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        other => return Some(other),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => match (self.as_i128(), other.as_i128()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
            },
        }
    }

    /// Render the value, honouring the integer radix of its attribute
    pub fn format_with(&self, format: IntFormat) -> String {
        if let Value::List(items) = self {
            return items
                .iter()
                .map(|item| item.format_with(format))
                .collect::<Vec<_>>()
                .join(",");
        }

        match (self.as_i128(), format) {
            (Some(v), IntFormat::Hex) => signed_radix(v, |m| format!("0x{m:x}")),
            (Some(0), IntFormat::Octal) => "0".to_string(),
            (Some(v), IntFormat::Octal) => signed_radix(v, |m| format!("0{m:o}")),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::S8(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v}"),
            Value::S16(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::S32(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::S64(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{}", v.format(DATE_FORMATS[0])),
            Value::Time(v) => write!(f, "{}", v.format(TIME_FORMATS[0])),
            Value::String(v) | Value::Enum(v) | Value::Class(v) => f.write_str(v),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::S32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::S64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

fn signed_radix(v: i128, render: impl Fn(u128) -> String) -> String {
    if v < 0 {
        format!("-{}", render(v.unsigned_abs()))
    } else {
        render(v.unsigned_abs())
    }
}

fn parse_bool(text: &str) -> Result<bool, ParseValueError> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ParseValueError::InvalidBool(text.to_string())),
    }
}

/// Integers accept `0x` hex, leading-zero octal and plain decimal
fn parse_integer(text: &str, ty: AttributeType) -> Result<i128, ParseValueError> {
    let invalid = || ParseValueError::InvalidNumber {
        text: text.to_string(),
        ty,
    };

    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i128::from_str_radix(hex, 16).map_err(|_| invalid())?
    } else if digits.len() > 1 && digits.starts_with('0') {
        i128::from_str_radix(&digits[1..], 8).map_err(|_| invalid())?
    } else {
        digits.parse::<i128>().map_err(|_| invalid())?
    };

    Ok(if negative { -magnitude } else { magnitude })
}

fn narrow<T: TryFrom<i128>>(text: &str, ty: AttributeType) -> Result<T, ParseValueError> {
    let wide = parse_integer(text, ty)?;
    T::try_from(wide).map_err(|_| ParseValueError::OutOfBounds {
        text: text.to_string(),
        ty,
    })
}

fn parse_date(text: &str) -> Result<NaiveDate, ParseValueError> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .ok_or_else(|| ParseValueError::InvalidDate(text.to_string()))
}

fn parse_time(text: &str) -> Result<NaiveDateTime, ParseValueError> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .ok_or_else(|| ParseValueError::InvalidTime(text.to_string()))
}
