//! Attribute descriptors

use crate::{yes_no, ParseValueError, Range, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The primitive type of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    Bool,
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    S64,
    U64,
    Float,
    Double,
    Date,
    Time,
    String,
    Enum,
    /// Reference to a class name (not to an object)
    Class,
}

impl AttributeType {
    /// All attribute types, in declaration order
    pub const ALL: [AttributeType; 16] = [
        AttributeType::Bool,
        AttributeType::S8,
        AttributeType::U8,
        AttributeType::S16,
        AttributeType::U16,
        AttributeType::S32,
        AttributeType::U32,
        AttributeType::S64,
        AttributeType::U64,
        AttributeType::Float,
        AttributeType::Double,
        AttributeType::Date,
        AttributeType::Time,
        AttributeType::String,
        AttributeType::Enum,
        AttributeType::Class,
    ];

    /// True for the eight signed/unsigned integer kinds
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            AttributeType::S8
                | AttributeType::U8
                | AttributeType::S16
                | AttributeType::U16
                | AttributeType::S32
                | AttributeType::U32
                | AttributeType::S64
                | AttributeType::U64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, AttributeType::Float | AttributeType::Double)
    }

    /// True for types whose values are stored as text
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            AttributeType::String | AttributeType::Enum | AttributeType::Class
        )
    }

    /// Short type name as used in schema files ("s8", "u32", "enum", ...)
    pub fn short_name(self) -> &'static str {
        match self {
            AttributeType::Bool => "bool",
            AttributeType::S8 => "s8",
            AttributeType::U8 => "u8",
            AttributeType::S16 => "s16",
            AttributeType::U16 => "u16",
            AttributeType::S32 => "s32",
            AttributeType::U32 => "u32",
            AttributeType::S64 => "s64",
            AttributeType::U64 => "u64",
            AttributeType::Float => "float",
            AttributeType::Double => "double",
            AttributeType::Date => "date",
            AttributeType::Time => "time",
            AttributeType::String => "string",
            AttributeType::Enum => "enum",
            AttributeType::Class => "class",
        }
    }

    /// Inverse of [`AttributeType::short_name`]
    pub fn from_short_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.short_name() == name)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AttributeType::Bool => "boolean",
            AttributeType::S8 => "8-bits signed integer",
            AttributeType::U8 => "8-bits unsigned integer",
            AttributeType::S16 => "16-bits signed integer",
            AttributeType::U16 => "16-bits unsigned integer",
            AttributeType::S32 => "32-bits signed integer",
            AttributeType::U32 => "32-bits unsigned integer",
            AttributeType::S64 => "64-bits signed integer",
            AttributeType::U64 => "64-bits unsigned integer",
            AttributeType::Float => "float",
            AttributeType::Double => "double",
            AttributeType::Date => "date",
            AttributeType::Time => "time",
            AttributeType::String => "string",
            AttributeType::Enum => "enumeration",
            AttributeType::Class => "class reference",
        };
        f.write_str(text)
    }
}

/// Display radix of integer attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntFormat {
    Octal,
    Decimal,
    Hex,
    /// The attribute is not an integer
    NotApplicable,
}

impl fmt::Display for IntFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IntFormat::Octal => "octal",
            IntFormat::Decimal => "decimal",
            IntFormat::Hex => "hexadecimal",
            IntFormat::NotApplicable => "not applicable",
        })
    }
}

/// Describes one attribute of a class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    name: String,
    attribute_type: AttributeType,
    range: Range,
    int_format: IntFormat,
    is_not_null: bool,
    is_multi_value: bool,
    default_value: String,
    description: String,
}

impl AttributeSpec {
    /// Create an attribute descriptor.
    ///
    /// `range` uses the UML text form, e.g. `"A,B,C..D,*..F,G..*"`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        attribute_type: AttributeType,
        range: &str,
        int_format: IntFormat,
        is_not_null: bool,
        is_multi_value: bool,
        default_value: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            range: Range::parse(range),
            int_format,
            is_not_null,
            is_multi_value,
            default_value: default_value.into(),
            description: description.into(),
        }
    }

    /// Shorthand for a single-valued, nullable attribute without range or default.
    ///
    /// Integer types get decimal radix, everything else gets `NotApplicable`.
    pub fn simple(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        let int_format = if attribute_type.is_integer() {
            IntFormat::Decimal
        } else {
            IntFormat::NotApplicable
        };
        Self::new(name, attribute_type, "", int_format, false, false, "", "")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute_type(&self) -> AttributeType {
        self.attribute_type
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    pub fn int_format(&self) -> IntFormat {
        self.int_format
    }

    pub fn is_not_null(&self) -> bool {
        self.is_not_null
    }

    pub fn is_multi_value(&self) -> bool {
        self.is_multi_value
    }

    /// Default value as written in the schema
    pub fn default_value(&self) -> &str {
        &self.default_value
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The typed default value of a freshly created object.
    ///
    /// Multi-value defaults are comma separated; an empty default yields an
    /// empty list or the zero value of the type.
    pub fn typed_default(&self) -> Result<Value, ParseValueError> {
        if self.is_multi_value {
            Value::parse_list(self.attribute_type, &self.default_value)
        } else if self.default_value.is_empty() {
            Ok(Value::zero(self.attribute_type))
        } else {
            Value::parse(self.attribute_type, &self.default_value)
        }
    }

    pub(crate) fn write_prefixed(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        writeln!(f, "{prefix}attribute '{}'", self.name)?;
        writeln!(f, "{prefix}  type: '{}'", self.attribute_type)?;
        writeln!(f, "{prefix}  range: '{}'", self.range)?;
        if self.int_format != IntFormat::NotApplicable {
            writeln!(f, "{prefix}  integer format: '{}'", self.int_format)?;
        }
        writeln!(f, "{prefix}  is not null: {}", yes_no(self.is_not_null))?;
        writeln!(f, "{prefix}  is multi-value: {}", yes_no(self.is_multi_value))?;
        writeln!(f, "{prefix}  default value: '{}'", self.default_value)?;
        write!(f, "{prefix}  description: '{}'", self.description)
    }
}

impl fmt::Display for AttributeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_prefixed(f, "")
    }
}
