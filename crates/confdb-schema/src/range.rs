//! Attribute range constraints
//!
//! A range is a union of single values and intervals written in UML form:
//! `"A,B,C..D,*..F,G..*"` admits A, B, anything in `[C, D]`, anything up to F
//! and anything from G. `*` leaves that end of the interval open.

use crate::{AttributeType, ParseValueError, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// One member of a range union
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeItem {
    /// Exactly this value
    Value(String),
    /// Closed interval; `None` marks an unbounded end
    Interval {
        min: Option<String>,
        max: Option<String>,
    },
}

/// Parsed range constraint of an attribute
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Range {
    text: String,
    items: Vec<RangeItem>,
}

impl Range {
    /// Parse the UML text form. Parsing never fails; values are interpreted
    /// against the attribute type only when checked.
    pub fn parse(text: &str) -> Self {
        let items = text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|item| match split_interval(item) {
                Some((min, max)) => RangeItem::Interval {
                    min: bound(min),
                    max: bound(max),
                },
                None => RangeItem::Value(item.to_string()),
            })
            .collect();

        Self {
            text: text.trim().to_string(),
            items,
        }
    }

    /// The range exactly as written in the schema
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn items(&self) -> &[RangeItem] {
        &self.items
    }

    /// True if the range places no constraint on values
    pub fn is_unconstrained(&self) -> bool {
        self.items.is_empty()
    }

    /// Check whether a single (non-list) value lies inside the range.
    ///
    /// Range bounds are parsed with the attribute type; a bound that does
    /// not parse is reported as an error so that broken schemas surface.
    pub fn admits(&self, ty: AttributeType, value: &Value) -> Result<bool, ParseValueError> {
        if self.items.is_empty() {
            return Ok(true);
        }

        for item in &self.items {
            let inside = match item {
                RangeItem::Value(text) => {
                    let bound = Value::parse(ty, text)?;
                    value.compare(&bound) == Some(Ordering::Equal)
                }
                RangeItem::Interval { min, max } => {
                    let above_min = match min {
                        Some(text) => matches!(
                            value.compare(&Value::parse(ty, text)?),
                            Some(Ordering::Greater | Ordering::Equal)
                        ),
                        None => true,
                    };
                    let below_max = match max {
                        Some(text) => matches!(
                            value.compare(&Value::parse(ty, text)?),
                            Some(Ordering::Less | Ordering::Equal)
                        ),
                        None => true,
                    };
                    above_min && below_max
                }
            };

            if inside {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Check every element of a multi-value (or the value itself)
    pub fn admits_all(&self, ty: AttributeType, value: &Value) -> Result<bool, ParseValueError> {
        match value {
            Value::List(items) => {
                for item in items {
                    if !self.admits(ty, item)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            single => self.admits(ty, single),
        }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// "-5..-1" must split on the "..", not on the minus signs
fn split_interval(item: &str) -> Option<(&str, &str)> {
    let pos = item.find("..")?;
    Some((item[..pos].trim(), item[pos + 2..].trim()))
}

fn bound(text: &str) -> Option<String> {
    if text.is_empty() || text == "*" {
        None
    } else {
        Some(text.to_string())
    }
}
