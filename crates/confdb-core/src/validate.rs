//! Validation of staged attribute and relationship values

use crate::{Error, ObjectId, Result, Schema};
use confdb_schema::{AttributeSpec, AttributeType, RelationshipSpec, Value};

/// Check a value against its attribute descriptor and return it in the
/// attribute's exact type.
///
/// Integers of another width are narrowed when they fit, integers widen to
/// floating point, and text is parsed for non-text attribute types.
pub fn check_attribute_value(attribute: &AttributeSpec, value: Value) -> Result<Value> {
    let ty = attribute.attribute_type();
    let value = match (attribute.is_multi_value(), value) {
        (true, Value::List(items)) => Value::List(
            items
                .into_iter()
                .map(|item| coerce(attribute, ty, item))
                .collect::<Result<Vec<_>>>()?,
        ),
        (true, _) => {
            return Err(Error::not_valid(format!(
                "attribute '{}' is multi-value and needs a list",
                attribute.name()
            )))
        }
        (false, Value::List(_)) => {
            return Err(Error::not_valid(format!(
                "attribute '{}' is single-value and cannot hold a list",
                attribute.name()
            )))
        }
        (false, single) => coerce(attribute, ty, single)?,
    };

    if attribute.is_not_null() && is_null(&value) {
        return Err(Error::not_valid(format!(
            "attribute '{}' cannot be empty",
            attribute.name()
        )));
    }

    let inside = attribute.range().admits_all(ty, &value).map_err(|e| {
        Error::not_valid(format!("range of attribute '{}': {e}", attribute.name()))
    })?;
    if !inside {
        return Err(Error::not_valid(format!(
            "value '{value}' of attribute '{}' is outside range '{}'",
            attribute.name(),
            attribute.range()
        )));
    }

    Ok(value)
}

/// Check the number and the classes of relationship targets
pub fn check_relationship_targets(
    schema: &Schema,
    relationship: &RelationshipSpec,
    targets: &[ObjectId],
) -> Result<()> {
    let cardinality = relationship.cardinality();
    if !cardinality.admits(targets.len()) {
        return Err(Error::not_valid(format!(
            "relationship '{}' is {cardinality} and cannot hold {} object(s)",
            relationship.name(),
            targets.len()
        )));
    }

    for target in targets {
        if !schema.is_subclass_of(target.class_name(), relationship.class_type()) {
            return Err(Error::not_valid(format!(
                "object {target} is not a '{}' as required by relationship '{}'",
                relationship.class_type(),
                relationship.name()
            )));
        }
    }

    Ok(())
}

fn is_null(value: &Value) -> bool {
    match value {
        Value::List(items) => items.is_empty(),
        other => other.as_str().is_some_and(str::is_empty),
    }
}

fn coerce(attribute: &AttributeSpec, ty: AttributeType, value: Value) -> Result<Value> {
    if value.attribute_type() == Some(ty) {
        return Ok(value);
    }

    let mismatch = |value: &Value| {
        Error::not_valid(format!(
            "value '{value}' cannot be stored in {ty} attribute '{}'",
            attribute.name()
        ))
    };

    if ty.is_integer() {
        if let Some(wide) = value.as_i128() {
            return Value::parse(ty, &wide.to_string()).map_err(|_| mismatch(&value));
        }
    }

    if let (true, Some(v)) = (ty.is_float(), value.as_f64()) {
        return Ok(if ty == AttributeType::Float {
            Value::Float(v as f32)
        } else {
            Value::Double(v)
        });
    }

    match &value {
        Value::String(text) => Value::parse(ty, text).map_err(|_| mismatch(&value)),
        _ => Err(mismatch(&value)),
    }
}
