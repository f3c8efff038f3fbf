//! Class descriptors

use crate::{yes_no, AttributeSpec, RelationshipSpec};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Describes one class of the schema.
///
/// Depending on how it was obtained, the super/subclass lists and the
/// attribute/relationship lists hold either the direct members only or the
/// full inherited set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSpec {
    name: String,
    description: String,
    is_abstract: bool,
    superclasses: Vec<String>,
    subclasses: Vec<String>,
    attributes: Vec<AttributeSpec>,
    relationships: Vec<RelationshipSpec>,
}

impl ClassSpec {
    /// Start a class with no superclasses and no members
    pub fn new(name: impl Into<String>, description: impl Into<String>, is_abstract: bool) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            is_abstract,
            superclasses: Vec::new(),
            subclasses: Vec::new(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn with_superclass(mut self, name: impl Into<String>) -> Self {
        self.superclasses.push(name.into());
        self
    }

    pub fn with_subclasses(mut self, names: Vec<String>) -> Self {
        self.subclasses = names;
        self
    }

    pub fn with_attribute(mut self, attribute: AttributeSpec) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_relationship(mut self, relationship: RelationshipSpec) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Assemble a class from already computed member lists
    pub fn from_parts(
        name: impl Into<String>,
        description: impl Into<String>,
        is_abstract: bool,
        superclasses: Vec<String>,
        subclasses: Vec<String>,
        attributes: Vec<AttributeSpec>,
        relationships: Vec<RelationshipSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            is_abstract,
            superclasses,
            subclasses,
            attributes,
            relationships,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Abstract classes have no direct instances
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn superclasses(&self) -> &[String] {
        &self.superclasses
    }

    pub fn subclasses(&self) -> &[String] {
        &self.subclasses
    }

    pub fn attributes(&self) -> &[AttributeSpec] {
        &self.attributes
    }

    pub fn relationships(&self) -> &[RelationshipSpec] {
        &self.relationships
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name() == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipSpec> {
        self.relationships.iter().find(|r| r.name() == name)
    }
}

fn write_names(f: &mut fmt::Formatter<'_>, prefix: &str, names: &[String], what: &str) -> fmt::Result {
    if names.is_empty() {
        writeln!(f, "{prefix}  there are no {what}es")
    } else {
        writeln!(f, "{prefix}  {} {what}(es):", names.len())?;
        for name in names {
            writeln!(f, "{prefix}    '{name}'")?;
        }
        Ok(())
    }
}

impl fmt::Display for ClassSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = "";
        let nested = "    ";
        writeln!(f, "{prefix}class '{}'", self.name)?;
        writeln!(f, "{prefix}  is abstract: '{}'", yes_no(self.is_abstract))?;
        writeln!(f, "{prefix}  description: '{}'", self.description)?;
        write_names(f, prefix, &self.superclasses, "superclass")?;
        write_names(f, prefix, &self.subclasses, "subclass")?;

        if self.attributes.is_empty() {
            writeln!(f, "{prefix}  there are no attributes")?;
        } else {
            writeln!(f, "{prefix}  {} attribute(s):", self.attributes.len())?;
            for attribute in &self.attributes {
                attribute.write_prefixed(f, nested)?;
                writeln!(f)?;
            }
        }

        if self.relationships.is_empty() {
            writeln!(f, "{prefix}  there are no relationships")?;
        } else {
            writeln!(f, "{prefix}  {} relationship(s):", self.relationships.len())?;
            for relationship in &self.relationships {
                relationship.write_prefixed(f, nested)?;
                writeln!(f)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AttributeType;

    fn application() -> ClassSpec {
        ClassSpec::new("Application", "a runnable program", false)
            .with_superclass("Component")
            .with_attribute(AttributeSpec::simple("Program", AttributeType::String))
            .with_relationship(RelationshipSpec::new("RunsOn", "Computer", false, false, false, ""))
    }

    #[test]
    fn test_lookup_members() {
        let class = application();
        assert!(class.attribute("Program").is_some());
        assert!(class.attribute("Missing").is_none());
        assert_eq!(class.relationship("RunsOn").unwrap().class_type(), "Computer");
        assert_eq!(class.superclasses(), ["Component".to_string()]);
    }

    #[test]
    fn test_display() {
        let text = application().to_string();
        assert!(text.starts_with("class 'Application'"));
        assert!(text.contains("1 superclass(es):"));
        assert!(text.contains("there are no subclasses"));
        assert!(text.contains("    attribute 'Program'"));
        assert!(text.contains("    relationship 'RunsOn'"));
    }

    #[test]
    fn test_serde_keeps_every_field() {
        let class = application();
        let json = serde_json::to_string(&class).unwrap();
        let back: ClassSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, class);
    }
}
