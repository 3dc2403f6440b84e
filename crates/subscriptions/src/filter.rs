//! JSONPath-style subscription filters.
//!
//! A filter matches an input when the path selects at least one node.
//! Supported syntax:
//!
//! - `$` root, `@` current node (inside predicates)
//! - `.name`, `['name']`, `["name"]`, `[n]` (negative counts from the end)
//! - `.*`, `[*]`, `..name`, `..*`
//! - `[?(<predicate>)]` with `==`, `!=`, `<`, `<=`, `>`, `>=`, `&&`, `||`,
//!   `!`, parentheses, bare paths (existence) and string, number, boolean
//!   and `null` literals
//!
//! A predicate applied to an array filters its elements; applied to any other
//! node it keeps or drops that node.

use serde_json::{Number, Value};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("invalid filter at position {pos}: {reason}")]
    Syntax { pos: usize, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Child(String),
    Index(i64),
    Wildcard,
    Descendant(String),
    DescendantAll,
    Filter(Predicate),
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Exists(Operand),
    Compare(Operand, CmpOp, Operand),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Root(Vec<Segment>),
    Current(Vec<Segment>),
    Literal(Value),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A compiled filter expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    source: String,
    segments: Vec<Segment>,
}

impl Filter {
    pub fn parse(expr: &str) -> Result<Self, FilterError> {
        let mut p = Parser::new(expr);
        p.skip_ws();
        p.expect('$')?;
        let segments = p.segments()?;
        p.skip_ws();
        if !p.at_end() {
            return Err(p.error("unexpected trailing input"));
        }
        Ok(Self {
            source: expr.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, document: &Value) -> bool {
        !select(document, document, &self.segments).is_empty()
    }
}

fn select<'v>(root: &'v Value, current: &'v Value, segments: &[Segment]) -> Vec<&'v Value> {
    let mut nodes = vec![current];
    for segment in segments {
        let mut next = Vec::new();
        for node in nodes {
            match segment {
                Segment::Child(name) => {
                    if let Some(v) = node.as_object().and_then(|m| m.get(name)) {
                        next.push(v);
                    }
                }
                Segment::Index(i) => {
                    if let Some(items) = node.as_array() {
                        let idx = if *i < 0 { items.len() as i64 + i } else { *i };
                        if let Some(v) = usize::try_from(idx).ok().and_then(|i| items.get(i)) {
                            next.push(v);
                        }
                    }
                }
                Segment::Wildcard => children(node, &mut next),
                Segment::Descendant(name) => descendants(node, &mut |v| {
                    if let Some(found) = v.as_object().and_then(|m| m.get(name)) {
                        next.push(found);
                    }
                }),
                Segment::DescendantAll => {
                    let mut direct = Vec::new();
                    children(node, &mut direct);
                    for child in direct {
                        descendants(child, &mut |v| next.push(v));
                    }
                }
                Segment::Filter(predicate) => match node {
                    Value::Array(items) => next.extend(items.iter().filter(|item| predicate.eval(root, item))),
                    other => {
                        if predicate.eval(root, other) {
                            next.push(other);
                        }
                    }
                },
            }
        }
        nodes = next;
    }
    nodes
}

fn children<'v>(node: &'v Value, out: &mut Vec<&'v Value>) {
    match node {
        Value::Object(m) => out.extend(m.values()),
        Value::Array(items) => out.extend(items.iter()),
        _ => {}
    }
}

/// Visit `node` and everything below it, depth first.
fn descendants<'v>(node: &'v Value, visit: &mut dyn FnMut(&'v Value)) {
    visit(node);
    match node {
        Value::Object(m) => m.values().for_each(|v| descendants(v, visit)),
        Value::Array(items) => items.iter().for_each(|v| descendants(v, visit)),
        _ => {}
    }
}

impl Predicate {
    fn eval(&self, root: &Value, current: &Value) -> bool {
        match self {
            Self::Exists(operand) => operand.resolve(root, current).is_some(),
            Self::Compare(l, op, r) => match (l.resolve(root, current), r.resolve(root, current)) {
                (Some(l), Some(r)) => compare(&l, *op, &r),
                _ => false,
            },
            Self::And(a, b) => a.eval(root, current) && b.eval(root, current),
            Self::Or(a, b) => a.eval(root, current) || b.eval(root, current),
            Self::Not(p) => !p.eval(root, current),
        }
    }
}

impl Operand {
    fn resolve(&self, root: &Value, current: &Value) -> Option<Value> {
        match self {
            Self::Literal(v) => Some(v.clone()),
            Self::Root(segments) => select(root, root, segments).first().map(|v| (*v).clone()),
            Self::Current(segments) => select(root, current, segments).first().map(|v| (*v).clone()),
        }
    }
}

fn compare(l: &Value, op: CmpOp, r: &Value) -> bool {
    use std::cmp::Ordering;

    let ordering = match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };

    match (op, ordering) {
        (CmpOp::Eq, Some(o)) => o == Ordering::Equal,
        (CmpOp::Ne, Some(o)) => o != Ordering::Equal,
        (CmpOp::Lt, Some(o)) => o == Ordering::Less,
        (CmpOp::Le, Some(o)) => o != Ordering::Greater,
        (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
        (CmpOp::Ge, Some(o)) => o != Ordering::Less,
        (CmpOp::Eq, None) => l == r,
        (CmpOp::Ne, None) => l != r,
        _ => false,
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: &str) -> FilterError {
        FilterError::Syntax {
            pos: self.pos,
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<(), FilterError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{c}'")))
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        let matches = token
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c));
        if matches {
            self.pos += token.chars().count();
        }
        matches
    }

    fn segments(&mut self) -> Result<Vec<Segment>, FilterError> {
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Some('.') => {
                    self.bump();
                    if self.peek() == Some('.') {
                        self.bump();
                        if self.peek() == Some('*') {
                            self.bump();
                            out.push(Segment::DescendantAll);
                        } else {
                            out.push(Segment::Descendant(self.identifier()?));
                        }
                    } else if self.peek() == Some('*') {
                        self.bump();
                        out.push(Segment::Wildcard);
                    } else {
                        out.push(Segment::Child(self.identifier()?));
                    }
                }
                Some('[') => {
                    self.bump();
                    self.skip_ws();
                    let segment = self.bracket()?;
                    self.skip_ws();
                    self.expect(']')?;
                    out.push(segment);
                }
                _ => return Ok(out),
            }
        }
    }

    fn bracket(&mut self) -> Result<Segment, FilterError> {
        match self.peek() {
            Some('*') => {
                self.bump();
                Ok(Segment::Wildcard)
            }
            Some('\'') | Some('"') => Ok(Segment::Child(self.quoted()?)),
            Some('?') => {
                self.bump();
                self.skip_ws();
                self.expect('(')?;
                let predicate = self.or_expr()?;
                self.skip_ws();
                self.expect(')')?;
                Ok(Segment::Filter(predicate))
            }
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let start = self.pos;
                self.bump();
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
                let raw: String = self.chars[start..self.pos].iter().collect();
                raw.parse()
                    .map(Segment::Index)
                    .map_err(|_| self.error("invalid array index"))
            }
            _ => Err(self.error("expected '*', a quoted name, an index or a predicate")),
        }
    }

    fn identifier(&mut self) -> Result<String, FilterError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '$')
        {
            self.bump();
        }
        if start == self.pos {
            return Err(self.error("expected a property name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn quoted(&mut self) -> Result<String, FilterError> {
        let quote = self.bump().ok_or_else(|| self.error("expected a quote"))?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn or_expr(&mut self) -> Result<Predicate, FilterError> {
        let mut left = self.and_expr()?;
        loop {
            self.skip_ws();
            if !self.eat("||") {
                return Ok(left);
            }
            let right = self.and_expr()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
    }

    fn and_expr(&mut self) -> Result<Predicate, FilterError> {
        let mut left = self.unary()?;
        loop {
            self.skip_ws();
            if !self.eat("&&") {
                return Ok(left);
            }
            let right = self.unary()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Predicate, FilterError> {
        self.skip_ws();
        match self.peek() {
            Some('!') if self.peek_at(1) != Some('=') => {
                self.bump();
                Ok(Predicate::Not(Box::new(self.unary()?)))
            }
            Some('(') => {
                self.bump();
                let inner = self.or_expr()?;
                self.skip_ws();
                self.expect(')')?;
                Ok(inner)
            }
            _ => self.comparison(),
        }
    }

    fn comparison(&mut self) -> Result<Predicate, FilterError> {
        let left = self.operand()?;
        self.skip_ws();

        let op = if self.eat("==") {
            CmpOp::Eq
        } else if self.eat("!=") {
            CmpOp::Ne
        } else if self.eat("<=") {
            CmpOp::Le
        } else if self.eat(">=") {
            CmpOp::Ge
        } else if self.eat("<") {
            CmpOp::Lt
        } else if self.eat(">") {
            CmpOp::Gt
        } else {
            return match left {
                Operand::Literal(_) => Err(self.error("a literal cannot stand alone in a predicate")),
                path => Ok(Predicate::Exists(path)),
            };
        };

        let right = self.operand()?;
        Ok(Predicate::Compare(left, op, right))
    }

    fn operand(&mut self) -> Result<Operand, FilterError> {
        self.skip_ws();
        match self.peek() {
            Some('@') => {
                self.bump();
                Ok(Operand::Current(self.segments()?))
            }
            Some('$') => {
                self.bump();
                Ok(Operand::Root(self.segments()?))
            }
            Some('\'') | Some('"') => Ok(Operand::Literal(Value::String(self.quoted()?))),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            _ if self.eat("true") => Ok(Operand::Literal(Value::Bool(true))),
            _ if self.eat("false") => Ok(Operand::Literal(Value::Bool(false))),
            _ if self.eat("null") => Ok(Operand::Literal(Value::Null)),
            _ => Err(self.error("expected a path or a literal")),
        }
    }

    fn number(&mut self) -> Result<Operand, FilterError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.bump();
        }
        let raw: String = self.chars[start..self.pos].iter().collect();

        if let Ok(i) = raw.parse::<i64>() {
            return Ok(Operand::Literal(Value::Number(i.into())));
        }
        raw.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(|n| Operand::Literal(Value::Number(n)))
            .ok_or_else(|| self.error("invalid number"))
    }
}
