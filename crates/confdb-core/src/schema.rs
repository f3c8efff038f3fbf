//! Schema registry
//!
//! Built from the direct class definitions found in all loaded storage
//! units. Construction validates the whole schema:
//! - every superclass and relationship target must be defined
//! - the superclass relation must be acyclic
//! - attribute and relationship names must be unique across the inherited union
//! - integer radix only on integer attributes, defaults inside their range

use crate::{Error, Result};
use confdb_schema::{AttributeSpec, ClassSpec, IntFormat, RelationshipSpec};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Visit state for DFS cycle detection
#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    NotVisited,
    InProgress,
    Completed,
}

/// Validated set of classes with precomputed inheritance
#[derive(Debug, Clone, Default)]
pub struct Schema {
    direct: BTreeMap<String, ClassSpec>,
    full: BTreeMap<String, ClassSpec>,
    superclasses: BTreeMap<String, Vec<String>>,
    subclasses: BTreeMap<String, Vec<String>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a schema from direct class definitions.
    ///
    /// The same class may be defined by several storage units as long as
    /// the definitions are identical.
    pub fn from_classes(classes: impl IntoIterator<Item = ClassSpec>) -> Result<Self> {
        let mut direct: BTreeMap<String, ClassSpec> = BTreeMap::new();
        for class in classes {
            match direct.get(class.name()) {
                Some(existing) if *existing != class => {
                    return Err(Error::not_valid(format!(
                        "class '{}' is defined twice with different contents",
                        class.name()
                    )));
                }
                Some(_) => {}
                None => {
                    direct.insert(class.name().to_string(), class);
                }
            }
        }

        for class in direct.values() {
            for superclass in class.superclasses() {
                if !direct.contains_key(superclass) {
                    return Err(Error::not_valid(format!(
                        "superclass '{superclass}' of class '{}' is not defined",
                        class.name()
                    )));
                }
            }
            for relationship in class.relationships() {
                if !direct.contains_key(relationship.class_type()) {
                    return Err(Error::not_valid(format!(
                        "relationship '{}' of class '{}' points to unknown class '{}'",
                        relationship.name(),
                        class.name(),
                        relationship.class_type()
                    )));
                }
            }
            for attribute in class.attributes() {
                check_attribute(class.name(), attribute)?;
            }
        }

        detect_cycles(&direct)?;

        let superclasses: BTreeMap<String, Vec<String>> = direct
            .keys()
            .map(|name| (name.clone(), all_superclasses(&direct, name)))
            .collect();

        let mut subclasses: BTreeMap<String, Vec<String>> =
            direct.keys().map(|name| (name.clone(), Vec::new())).collect();
        for (name, supers) in &superclasses {
            for superclass in supers {
                if let Some(subs) = subclasses.get_mut(superclass) {
                    subs.push(name.clone());
                }
            }
        }

        let mut full = BTreeMap::new();
        for (name, class) in &direct {
            let supers = &superclasses[name];
            let (attributes, relationships) = inherited_members(&direct, class, supers)?;
            full.insert(
                name.clone(),
                ClassSpec::from_parts(
                    name.clone(),
                    class.description(),
                    class.is_abstract(),
                    supers.clone(),
                    subclasses[name].clone(),
                    attributes,
                    relationships,
                ),
            );
        }

        debug!(target: "confdb::schema", classes = direct.len(), "schema validated");

        Ok(Self {
            direct,
            full,
            superclasses,
            subclasses,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty()
    }

    pub fn contains(&self, class: &str) -> bool {
        self.direct.contains_key(class)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.direct.keys().map(String::as_str)
    }

    /// Class descriptor; direct members only, or the full inherited view
    pub fn class(&self, name: &str, direct_only: bool) -> Result<ClassSpec> {
        if direct_only {
            let class = self
                .direct
                .get(name)
                .ok_or_else(|| Error::not_found(format!("class '{name}'")))?;
            let direct_subs = self
                .direct
                .values()
                .filter(|c| c.superclasses().iter().any(|s| s == name))
                .map(|c| c.name().to_string())
                .collect();
            Ok(class.clone().with_subclasses(direct_subs))
        } else {
            self.full
                .get(name)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("class '{name}'")))
        }
    }

    /// Effective (inherited) descriptor without cloning
    pub fn effective(&self, name: &str) -> Option<&ClassSpec> {
        self.full.get(name)
    }

    /// Map from every class to all of its superclasses, nearest first
    pub fn superclasses(&self) -> &BTreeMap<String, Vec<String>> {
        &self.superclasses
    }

    /// All subclasses of a class (transitively)
    pub fn subclasses_of(&self, name: &str) -> &[String] {
        self.subclasses.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True if `class` is `ancestor` or derives from it
    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> bool {
        class == ancestor
            || self
                .superclasses
                .get(class)
                .is_some_and(|supers| supers.iter().any(|s| s == ancestor))
    }

    pub fn attribute(&self, class: &str, name: &str) -> Option<&AttributeSpec> {
        self.full.get(class)?.attribute(name)
    }

    pub fn relationship(&self, class: &str, name: &str) -> Option<&RelationshipSpec> {
        self.full.get(class)?.relationship(name)
    }
}

fn check_attribute(class: &str, attribute: &AttributeSpec) -> Result<()> {
    let ty = attribute.attribute_type();
    if !ty.is_integer() && attribute.int_format() != IntFormat::NotApplicable {
        return Err(Error::not_valid(format!(
            "attribute '{}' of class '{class}' is a {ty} but declares an integer format",
            attribute.name()
        )));
    }

    let default = attribute.typed_default().map_err(|e| {
        Error::not_valid(format!(
            "default of attribute '{}' of class '{class}': {e}",
            attribute.name()
        ))
    })?;

    // an empty single-value default stands for "unset" and is not range checked
    if !attribute.is_multi_value() && attribute.default_value().is_empty() {
        return Ok(());
    }

    let inside = attribute.range().admits_all(ty, &default).map_err(|e| {
        Error::not_valid(format!(
            "range of attribute '{}' of class '{class}': {e}",
            attribute.name()
        ))
    })?;
    if !inside {
        return Err(Error::not_valid(format!(
            "default '{}' of attribute '{}' of class '{class}' is outside range '{}'",
            attribute.default_value(),
            attribute.name(),
            attribute.range()
        )));
    }
    Ok(())
}

fn detect_cycles(classes: &BTreeMap<String, ClassSpec>) -> Result<()> {
    let mut state: HashMap<&str, VisitState> = classes
        .keys()
        .map(|name| (name.as_str(), VisitState::NotVisited))
        .collect();
    let mut path: Vec<&str> = Vec::new();

    for name in classes.keys() {
        if state[name.as_str()] == VisitState::NotVisited {
            visit(classes, name, &mut state, &mut path)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    classes: &'a BTreeMap<String, ClassSpec>,
    node: &'a str,
    state: &mut HashMap<&'a str, VisitState>,
    path: &mut Vec<&'a str>,
) -> Result<()> {
    state.insert(node, VisitState::InProgress);
    path.push(node);

    if let Some(class) = classes.get(node) {
        for superclass in class.superclasses() {
            match state.get(superclass.as_str()) {
                Some(VisitState::InProgress) => {
                    let start = path.iter().position(|n| *n == superclass.as_str()).unwrap_or(0);
                    return Err(Error::not_valid(format!(
                        "superclass cycle: {} -> {superclass}",
                        path[start..].join(" -> ")
                    )));
                }
                Some(VisitState::NotVisited) => visit(classes, superclass, state, path)?,
                _ => {}
            }
        }
    }

    path.pop();
    state.insert(node, VisitState::Completed);
    Ok(())
}

// Breadth first so that direct superclasses come before their ancestors
fn all_superclasses(classes: &BTreeMap<String, ClassSpec>, name: &str) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut frontier: Vec<&str> = vec![name];

    while !frontier.is_empty() {
        let mut next = Vec::new();
        for class in frontier {
            let Some(spec) = classes.get(class) else {
                continue;
            };
            for superclass in spec.superclasses() {
                if seen.insert(superclass.as_str()) {
                    result.push(superclass.clone());
                    next.push(superclass.as_str());
                }
            }
        }
        frontier = next;
    }

    result
}

type Members = (Vec<AttributeSpec>, Vec<RelationshipSpec>);

// Most distant ancestor first, the class itself last
fn inherited_members(
    classes: &BTreeMap<String, ClassSpec>,
    class: &ClassSpec,
    supers: &[String],
) -> Result<Members> {
    let mut attributes: Vec<AttributeSpec> = Vec::new();
    let mut relationships: Vec<RelationshipSpec> = Vec::new();
    let mut owners: HashMap<String, String> = HashMap::new();

    let chain = supers
        .iter()
        .rev()
        .filter_map(|s| classes.get(s))
        .chain(std::iter::once(class));

    for owner in chain {
        let names = owner
            .attributes()
            .iter()
            .map(AttributeSpec::name)
            .chain(owner.relationships().iter().map(RelationshipSpec::name));
        for member in names {
            if let Some(previous) = owners.insert(member.to_string(), owner.name().to_string()) {
                return Err(Error::not_valid(format!(
                    "class '{}' inherits member '{member}' from both '{previous}' and '{}'",
                    class.name(),
                    owner.name()
                )));
            }
        }
        attributes.extend(owner.attributes().iter().cloned());
        relationships.extend(owner.relationships().iter().cloned());
    }

    Ok((attributes, relationships))
}
