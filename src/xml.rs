//! Minimal XML document tree and location-path evaluation for the `xp`
//! expression function.
//!
//! Supported paths: `/a/b`, `//b`, `*`, `.`, `..`, `@attr`, `@*`, `text()`,
//! `node()` and the predicates `[n]`, `[@a]`, `[@a='v']`, `[child]`,
//! `[child='v']`, `[text()='v']`, `[.='v']`. Names match on the local part,
//! so `dc:title` and `title` select the same elements.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XmlError {
    #[error("invalid path {path:?}: {reason}")]
    Path { path: String, reason: String },
    #[error("malformed document: {0}")]
    Document(String),
}

#[derive(Debug)]
enum NodeKind {
    Root,
    Element {
        name: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Parsed document. Nodes are stored in document order.
#[derive(Debug)]
pub struct XmlDocument {
    nodes: Vec<Node>,
}

fn local(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

impl XmlDocument {
    pub fn parse(src: &str) -> Result<Self, XmlError> {
        let malformed = |e: &dyn std::fmt::Display| XmlError::Document(e.to_string());
        let mut doc = XmlDocument {
            nodes: vec![Node {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            }],
        };
        let mut open = vec![0usize];
        let mut reader = Reader::from_str(src);

        loop {
            let current = *open.last().unwrap_or(&0);
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let id = doc.push_element(current, &e)?;
                    open.push(id);
                }
                Ok(Event::Empty(e)) => {
                    doc.push_element(current, &e)?;
                }
                Ok(Event::End(_)) => {
                    if open.len() <= 1 {
                        return Err(XmlError::Document("unexpected closing tag".to_string()));
                    }
                    open.pop();
                }
                Ok(Event::Text(t)) => {
                    let text = t.unescape().map_err(|e| malformed(&e))?;
                    doc.push(current, NodeKind::Text(text.into_owned()));
                }
                Ok(Event::CData(c)) => {
                    let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    doc.push(current, NodeKind::Text(text));
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(malformed(&e)),
            }
        }

        if open.len() > 1 {
            return Err(XmlError::Document("unclosed element".to_string()));
        }
        Ok(doc)
    }

    fn push(&mut self, parent: usize, kind: NodeKind) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn push_element(&mut self, parent: usize, start: &BytesStart<'_>) -> Result<usize, XmlError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| XmlError::Document(e.to_string()))?;
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| XmlError::Document(e.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(self.push(parent, NodeKind::Element { name, attributes }))
    }

    fn element_name(&self, id: usize) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    fn attributes(&self, id: usize) -> &[(String, String)] {
        match &self.nodes[id].kind {
            NodeKind::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    /// Descendants of `id` in document order.
    fn descendants(&self, id: usize, out: &mut Vec<usize>) {
        let mut stack: Vec<usize> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.nodes[node].children.iter().rev());
        }
    }

    fn text_of(&self, id: usize, out: &mut String) {
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            match &self.nodes[node].kind {
                NodeKind::Text(text) => out.push_str(text),
                _ => stack.extend(self.nodes[node].children.iter().rev()),
            }
        }
    }

    fn string_value(&self, item: Item) -> String {
        match item.attr {
            Some(i) => self.attributes(item.node)[i].1.clone(),
            None => {
                let mut out = String::new();
                self.text_of(item.node, &mut out);
                out
            }
        }
    }
}

/// A selected node, or one of an element's attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Item {
    node: usize,
    attr: Option<usize>,
}

impl Item {
    fn node(node: usize) -> Self {
        Self { node, attr: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Attribute,
    Parent,
    SelfNode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Name(String),
    Any,
    Text,
    Node,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Subject {
    Attribute(String),
    Child(String),
    Text,
    Current,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Has(Subject),
    Equals(Subject, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    /// Preceded by `//`: apply to the context and all its descendants.
    descendant: bool,
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

/// A compiled location path.
#[derive(Debug, Clone)]
pub struct XPath {
    steps: Vec<Step>,
}

struct PathParser<'a> {
    src: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> PathParser<'a> {
    fn error(&self, reason: impl Into<String>) -> XmlError {
        XmlError::Path {
            path: self.src.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, s: &str) -> bool {
        let n = s.chars().count();
        let matches = self.chars.len() >= self.pos + n
            && self.chars[self.pos..self.pos + n].iter().copied().eq(s.chars());
        if matches {
            self.pos += n;
        }
        matches
    }

    fn expect(&mut self, s: &str) -> Result<(), XmlError> {
        if self.eat(s) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}' at {}", s, self.pos)))
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn name(&mut self) -> Result<String, XmlError> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => {}
            _ => return Err(self.error(format!("expected a name at {}", self.pos))),
        }
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
        {
            self.pos += 1;
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn literal(&mut self) -> Result<String, XmlError> {
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected a quoted literal")),
        };
        self.pos += 1;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == quote {
                let value = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                return Ok(value);
            }
            self.pos += 1;
        }
        Err(self.error("unterminated literal"))
    }

    fn step(&mut self, descendant: bool) -> Result<Step, XmlError> {
        let (axis, test) = if self.eat("..") {
            (Axis::Parent, NodeTest::Node)
        } else if self.eat(".") {
            (Axis::SelfNode, NodeTest::Node)
        } else if self.eat("@") {
            if self.eat("*") {
                (Axis::Attribute, NodeTest::Any)
            } else {
                (Axis::Attribute, NodeTest::Name(self.name()?))
            }
        } else if self.eat("*") {
            (Axis::Child, NodeTest::Any)
        } else {
            let name = self.name()?;
            if self.eat("()") {
                match name.as_str() {
                    "text" => (Axis::Child, NodeTest::Text),
                    "node" => (Axis::Child, NodeTest::Node),
                    other => return Err(self.error(format!("unsupported function {}()", other))),
                }
            } else {
                (Axis::Child, NodeTest::Name(name))
            }
        };

        let mut predicates = Vec::new();
        while self.eat("[") {
            self.skip_ws();
            predicates.push(self.predicate()?);
            self.skip_ws();
            self.expect("]")?;
        }

        Ok(Step {
            descendant,
            axis,
            test,
            predicates,
        })
    }

    fn predicate(&mut self) -> Result<Predicate, XmlError> {
        if matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            let start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
            let digits: String = self.chars[start..self.pos].iter().collect();
            return match digits.parse::<usize>() {
                Ok(n) if n > 0 => Ok(Predicate::Position(n)),
                _ => Err(self.error("positions start at 1")),
            };
        }

        let subject = if self.eat("@") {
            Subject::Attribute(self.name()?)
        } else if self.eat(".") {
            Subject::Current
        } else {
            let name = self.name()?;
            if name == "text" && self.eat("()") {
                Subject::Text
            } else {
                Subject::Child(name)
            }
        };

        self.skip_ws();
        if self.eat("=") {
            self.skip_ws();
            Ok(Predicate::Equals(subject, self.literal()?))
        } else {
            Ok(Predicate::Has(subject))
        }
    }
}

impl XPath {
    pub fn compile(src: &str) -> Result<Self, XmlError> {
        let trimmed = src.trim();
        let mut parser = PathParser {
            src,
            chars: trimmed.chars().collect(),
            pos: 0,
        };

        let mut descendant = parser.eat("//");
        if !descendant {
            parser.eat("/");
        }
        let mut steps = Vec::new();
        if parser.peek().is_none() {
            if descendant {
                return Err(parser.error("expected a step after '//'"));
            }
            return Ok(Self { steps });
        }

        loop {
            steps.push(parser.step(descendant)?);
            if parser.peek().is_none() {
                break;
            }
            descendant = parser.eat("//");
            if !descendant && !parser.eat("/") {
                return Err(parser.error(format!("unexpected character at {}", parser.pos)));
            }
        }
        Ok(Self { steps })
    }

    fn matches(doc: &XmlDocument, id: usize, test: &NodeTest) -> bool {
        match (test, &doc.nodes[id].kind) {
            (NodeTest::Node, _) => true,
            (NodeTest::Text, NodeKind::Text(_)) => true,
            (NodeTest::Any, NodeKind::Element { .. }) => true,
            (NodeTest::Name(want), NodeKind::Element { name, .. }) => name == local(want),
            _ => false,
        }
    }

    fn apply_axis(doc: &XmlDocument, item: Item, step: &Step) -> Vec<Item> {
        match (step.axis, item.attr) {
            (Axis::SelfNode, _) => vec![item],
            (Axis::Parent, Some(_)) => vec![Item::node(item.node)],
            (Axis::Parent, None) => doc.nodes[item.node]
                .parent
                .map(Item::node)
                .into_iter()
                .collect(),
            (_, Some(_)) => Vec::new(),
            (Axis::Child, None) => doc.nodes[item.node]
                .children
                .iter()
                .copied()
                .filter(|&c| Self::matches(doc, c, &step.test))
                .map(Item::node)
                .collect(),
            (Axis::Attribute, None) => doc
                .attributes(item.node)
                .iter()
                .enumerate()
                .filter(|(_, (key, _))| match &step.test {
                    NodeTest::Name(want) => key == local(want),
                    _ => true,
                })
                .map(|(i, _)| Item {
                    node: item.node,
                    attr: Some(i),
                })
                .collect(),
        }
    }

    fn subject_values(doc: &XmlDocument, item: Item, subject: &Subject) -> Vec<String> {
        if let Subject::Current = subject {
            return vec![doc.string_value(item)];
        }
        if item.attr.is_some() {
            return Vec::new();
        }
        match subject {
            Subject::Attribute(want) => doc
                .attributes(item.node)
                .iter()
                .filter(|(key, _)| key == local(want))
                .map(|(_, value)| value.clone())
                .collect(),
            Subject::Child(want) => doc.nodes[item.node]
                .children
                .iter()
                .copied()
                .filter(|&c| doc.element_name(c) == Some(local(want)))
                .map(|c| doc.string_value(Item::node(c)))
                .collect(),
            Subject::Text => doc.nodes[item.node]
                .children
                .iter()
                .copied()
                .filter(|&c| matches!(doc.nodes[c].kind, NodeKind::Text(_)))
                .map(|c| doc.string_value(Item::node(c)))
                .collect(),
            Subject::Current => Vec::new(),
        }
    }

    fn filter(doc: &XmlDocument, items: Vec<Item>, predicate: &Predicate) -> Vec<Item> {
        match predicate {
            Predicate::Position(n) => items.into_iter().skip(n - 1).take(1).collect(),
            Predicate::Has(subject) => items
                .into_iter()
                .filter(|&i| !Self::subject_values(doc, i, subject).is_empty())
                .collect(),
            Predicate::Equals(subject, want) => items
                .into_iter()
                .filter(|&i| Self::subject_values(doc, i, subject).iter().any(|v| v == want))
                .collect(),
        }
    }

    fn select(&self, doc: &XmlDocument) -> Vec<Item> {
        let mut context = vec![Item::node(0)];
        for step in &self.steps {
            let mut next = Vec::new();
            for item in context {
                let mut bases = vec![item];
                if step.descendant && item.attr.is_none() {
                    let mut below = Vec::new();
                    doc.descendants(item.node, &mut below);
                    bases.extend(below.into_iter().map(Item::node));
                }
                for base in bases {
                    let mut selected = Self::apply_axis(doc, base, step);
                    for predicate in &step.predicates {
                        selected = Self::filter(doc, selected, predicate);
                    }
                    next.extend(selected);
                }
            }
            next.sort();
            next.dedup();
            context = next;
        }
        context
    }

    /// String value of the first selected node in document order.
    pub fn string_value(&self, doc: &XmlDocument) -> Option<String> {
        self.select(doc)
            .first()
            .map(|&item| doc.string_value(item))
    }
}
