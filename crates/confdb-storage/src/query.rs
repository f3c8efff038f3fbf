//! Query language of the store backends
//!
//! Class queries filter the instances of a class:
//! `port >= 1024 and not (uid = 'h1' or tags contains 'spare')`,
//! `peer -> 'h2'` (relationship references an object with that uid).
//!
//! Path queries walk relationships from an object: `cards/*` follows
//! `cards` then any relationship, an optional `@Class` suffix keeps only
//! instances of that class or its subclasses.

use crate::store::Store;
use confdb_core::{Error, ObjectRef, Query, Result, Schema};
use confdb_schema::Value;
use logos::Logos;
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum TokenKind {
    #[token("and", ignore(ascii_case))]
    And,
    #[token("or", ignore(ascii_case))]
    Or,
    #[token("not", ignore(ascii_case))]
    Not,
    #[token("contains", ignore(ascii_case))]
    Contains,

    #[token("=")]
    Eq,
    #[token("!=")]
    Ne,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("->")]
    Arrow,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    #[regex(r"-?(0[xX][0-9a-fA-F]+|[0-9]+(\.[0-9]+)?)")]
    Number,
    #[regex(r"'([^'\\]|\\.)*'")]
    #[regex(r#""([^"\\]|\\.)*""#)]
    String,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut lexer = TokenKind::lexer(source);
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(kind) => tokens.push(Token {
                kind,
                start: span.start,
                end: span.end,
            }),
            Err(_) => {
                return Err(Error::bad_query(format!(
                    "unexpected '{}' at offset {} in \"{source}\"",
                    &source[span.clone()],
                    span.start
                )))
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (CmpOp::Ne, None) => true,
            (_, None) => false,
            (CmpOp::Eq, Some(o)) => o == Ordering::Equal,
            (CmpOp::Ne, Some(o)) => o != Ordering::Equal,
            (CmpOp::Lt, Some(o)) => o == Ordering::Less,
            (CmpOp::Le, Some(o)) => o != Ordering::Greater,
            (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
            (CmpOp::Ge, Some(o)) => o != Ordering::Less,
        }
    }
}

/// Parsed class query
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        attribute: String,
        op: CmpOp,
        literal: String,
    },
    Contains {
        attribute: String,
        literal: String,
    },
    References {
        relationship: String,
        uid: String,
    },
    Not(Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

/// Pseudo-attribute naming the object uid
const UID: &str = "uid";

impl Filter {
    pub fn parse(text: &str) -> Result<Filter> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            source: text,
            tokens,
            pos: 0,
        };
        let filter = parser.or()?;
        match parser.peek() {
            None => Ok(filter),
            Some(token) => Err(parser.unexpected(token)),
        }
    }

    /// Check that every name used exists for `class`
    pub fn check(&self, schema: &Schema, class: &str) -> Result<()> {
        match self {
            Filter::Compare { attribute, .. } | Filter::Contains { attribute, .. } => {
                if schema.attribute(class, attribute).is_some() || attribute == UID {
                    Ok(())
                } else {
                    Err(Error::not_found(format!("attribute '{attribute}' of class '{class}'")))
                }
            }
            Filter::References { relationship, .. } => match schema.relationship(class, relationship) {
                Some(_) => Ok(()),
                None => Err(Error::not_found(format!("relationship '{relationship}' of class '{class}'"))),
            },
            Filter::Not(inner) => inner.check(schema, class),
            Filter::And(items) | Filter::Or(items) => items.iter().try_for_each(|f| f.check(schema, class)),
        }
    }

    pub fn matches(&self, schema: &Schema, object: &crate::StoredObject) -> Result<bool> {
        match self {
            Filter::Compare { attribute, op, literal } => {
                let (value, literal) = operands(schema, object, attribute, literal)?;
                Ok(match &value {
                    Value::List(items) => items.iter().any(|v| op.holds(v.compare(&literal))),
                    single => op.holds(single.compare(&literal)),
                })
            }
            Filter::Contains { attribute, literal } => {
                let (value, literal) = operands(schema, object, attribute, literal)?;
                Ok(match (&value, &literal) {
                    (Value::List(items), _) => items.contains(&literal),
                    (Value::String(text), Value::String(part)) => text.contains(part.as_str()),
                    (single, _) => single.compare(&literal) == Some(Ordering::Equal),
                })
            }
            Filter::References { relationship, uid } => Ok(object
                .relationships
                .get(relationship)
                .is_some_and(|targets| targets.iter().any(|t| t.uid() == uid))),
            Filter::Not(inner) => Ok(!inner.matches(schema, object)?),
            Filter::And(items) => {
                for item in items {
                    if !item.matches(schema, object)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Filter::Or(items) => {
                for item in items {
                    if item.matches(schema, object)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Stored value of an attribute and the literal parsed to its type
fn operands(
    schema: &Schema,
    object: &crate::StoredObject,
    attribute: &str,
    literal: &str,
) -> Result<(Value, Value)> {
    let Some(spec) = schema.attribute(&object.class_name, attribute) else {
        if attribute == UID {
            return Ok((Value::String(object.uid.clone()), Value::String(literal.to_string())));
        }
        return Err(Error::not_found(format!(
            "attribute '{attribute}' of class '{}'",
            object.class_name
        )));
    };
    let literal = Value::parse(spec.attribute_type(), literal)
        .map_err(|e| Error::bad_query(format!("bad literal for attribute '{attribute}': {e}")))?;
    let value = match object.attributes.get(attribute) {
        Some(value) => value.clone(),
        None => spec.typed_default()?,
    };
    Ok((value, literal))
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.peek()?;
        self.pos += 1;
        Some(token)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek().is_some_and(|t| t.kind == kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn text(&self, token: Token) -> &'a str {
        &self.source[token.start..token.end]
    }

    fn unexpected(&self, token: Token) -> Error {
        Error::bad_query(format!(
            "unexpected '{}' at offset {} in \"{}\"",
            self.text(token),
            token.start,
            self.source
        ))
    }

    fn expect_end(&self, what: &str) -> Error {
        Error::bad_query(format!("expected {what} at end of \"{}\"", self.source))
    }

    fn or(&mut self) -> Result<Filter> {
        let mut items = vec![self.and()?];
        while self.eat(TokenKind::Or) {
            items.push(self.and()?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Filter::Or(items) })
    }

    fn and(&mut self) -> Result<Filter> {
        let mut items = vec![self.unary()?];
        while self.eat(TokenKind::And) {
            items.push(self.unary()?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Filter::And(items) })
    }

    fn unary(&mut self) -> Result<Filter> {
        if self.eat(TokenKind::Not) {
            return Ok(Filter::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Filter> {
        let token = self.bump().ok_or_else(|| self.expect_end("a condition"))?;
        match token.kind {
            TokenKind::LParen => {
                let inner = self.or()?;
                if !self.eat(TokenKind::RParen) {
                    return Err(match self.peek() {
                        Some(t) => self.unexpected(t),
                        None => self.expect_end("')'"),
                    });
                }
                Ok(inner)
            }
            TokenKind::Ident => {
                let name = self.text(token).to_string();
                let op = self.bump().ok_or_else(|| self.expect_end("an operator"))?;
                let op = match op.kind {
                    TokenKind::Eq => CmpOp::Eq,
                    TokenKind::Ne => CmpOp::Ne,
                    TokenKind::Lt => CmpOp::Lt,
                    TokenKind::Le => CmpOp::Le,
                    TokenKind::Gt => CmpOp::Gt,
                    TokenKind::Ge => CmpOp::Ge,
                    TokenKind::Contains => {
                        let literal = self.literal()?;
                        return Ok(Filter::Contains { attribute: name, literal });
                    }
                    TokenKind::Arrow => {
                        let uid = self.literal()?;
                        return Ok(Filter::References { relationship: name, uid });
                    }
                    _ => return Err(self.unexpected(op)),
                };
                let literal = self.literal()?;
                Ok(Filter::Compare { attribute: name, op, literal })
            }
            _ => Err(self.unexpected(token)),
        }
    }

    fn literal(&mut self) -> Result<String> {
        let token = self.bump().ok_or_else(|| self.expect_end("a value"))?;
        match token.kind {
            TokenKind::String => Ok(unquote(self.text(token))),
            TokenKind::Number | TokenKind::Ident => Ok(self.text(token).to_string()),
            _ => Err(self.unexpected(token)),
        }
    }
}

fn unquote(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Any,
    Named(String),
}

/// Parsed path query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathQuery {
    pub steps: Vec<PathStep>,
    pub class: Option<String>,
}

impl PathQuery {
    pub fn parse(text: &str) -> Result<PathQuery> {
        let bad = |why: &str| Error::bad_query(format!("bad path \"{text}\": {why}"));
        let (body, class) = match text.rsplit_once('@') {
            Some((body, class)) => {
                let class = class.trim();
                if !is_name(class) {
                    return Err(bad("expected a class name after '@'"));
                }
                (body, Some(class.to_string()))
            }
            None => (text, None),
        };
        let body = body.trim();
        if body.is_empty() {
            return Err(bad("no relationship to follow"));
        }
        let steps = body
            .split('/')
            .map(str::trim)
            .map(|step| match step {
                "*" => Ok(PathStep::Any),
                name if is_name(name) => Ok(PathStep::Named(name.to_string())),
                _ => Err(bad("expected a relationship name or '*' between '/'")),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PathQuery { steps, class })
    }
}

fn is_name(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Syntax check: the text must be a class query or a path query
pub fn check(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Ok(());
    }
    match Filter::parse(text) {
        Ok(_) => Ok(()),
        Err(err) => PathQuery::parse(text).map(|_| ()).map_err(|_| err),
    }
}

/// Instances of `class` (and subclasses) matching the query
pub(crate) fn select(store: &Store, class: &str, query: &Query) -> Result<Vec<ObjectRef>> {
    let instances = store.instances(class)?;
    if query.is_all() {
        return Ok(instances.into_iter().map(|(obj, _)| obj).collect());
    }
    let filter = Filter::parse(query.as_str())?;
    filter.check(store.schema(), class)?;
    let mut selected = Vec::new();
    for (obj, object) in instances {
        if filter.matches(store.schema(), object)? {
            selected.push(obj);
        }
    }
    Ok(selected)
}

/// Objects reachable from `from` along a path query.
///
/// A `from` handle whose object was destroyed, renamed or moved is stale:
/// the walk fails with `NotValid`, like every other operation on that handle.
pub(crate) fn walk(store: &Store, from: &ObjectRef, query: &Query) -> Result<Vec<ObjectRef>> {
    let path = PathQuery::parse(query.as_str())?;
    store.resolve(from)?;
    if let Some(class) = &path.class {
        if !store.schema().contains(class) {
            return Err(Error::not_found(format!("class '{class}'")));
        }
    }

    let mut frontier = vec![from.clone()];
    for step in &path.steps {
        let name = match step {
            PathStep::Any => None,
            PathStep::Named(name) => Some(name.as_str()),
        };
        if let Some(name) = name {
            let known = frontier
                .iter()
                .any(|obj| store.schema().relationship(obj.class_name(), name).is_some());
            if !frontier.is_empty() && !known {
                return Err(Error::not_found(format!(
                    "relationship '{name}' on path \"{query}\" from {from}"
                )));
            }
        }
        let mut seen = HashSet::new();
        let mut next = Vec::new();
        for obj in &frontier {
            for target in store.targets(obj, name)? {
                if seen.insert(target.id().clone()) {
                    next.push(target);
                }
            }
        }
        frontier = next;
    }

    if let Some(class) = &path.class {
        frontier.retain(|obj| store.schema().is_subclass_of(obj.class_name(), class));
    }
    Ok(frontier)
}
