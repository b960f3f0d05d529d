//! Path expressions over manifest trees.
//!
//! A subset of the Kubernetes JSONPath dialect:
//!
//! ```text
//! {$.spec.template.spec.containers[*].image}
//! $.metadata['annotations']["example.com/image"]
//! $.spec.containers[0].image
//! $.spec.containers[-1:].image
//! $..image
//! ```
//!
//! The surrounding braces and the leading `$` are optional. Evaluation never
//! fails: a missing key, an out-of-range index, or a selector applied to the
//! wrong kind of node yields no values.

use serde_json::Value;
use thiserror::Error;

/// A path expression that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {position} in '{expression}'")]
pub struct PathSyntaxError {
    pub expression: String,
    pub position: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Selector {
    Field(String),
    Index(i64),
    Slice { start: Option<i64>, end: Option<i64> },
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Apply to the current node.
    Child(Selector),
    /// Apply to the current node and every node below it.
    Descendant(Selector),
}

/// A compiled path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    source: String,
    segments: Vec<Segment>,
}

impl PathExpr {
    /// Compile a path expression.
    pub fn parse(expression: &str) -> Result<Self, PathSyntaxError> {
        let segments = Parser::new(expression).parse()?;
        Ok(Self {
            source: expression.to_string(),
            segments,
        })
    }

    /// The expression as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `root`, returning every matched node in document order.
    pub fn evaluate<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];

        for segment in &self.segments {
            let mut next = Vec::new();
            for node in current {
                match segment {
                    Segment::Child(selector) => selector.apply(node, &mut next),
                    Segment::Descendant(selector) => {
                        let mut nodes = Vec::new();
                        collect_descendants(node, &mut nodes);
                        for n in nodes {
                            selector.apply(n, &mut next);
                        }
                    }
                }
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }

        current
    }
}

impl std::fmt::Display for PathExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

impl Selector {
    fn apply<'a>(&self, node: &'a Value, out: &mut Vec<&'a Value>) {
        match (self, node) {
            (Selector::Field(name), Value::Object(map)) => {
                if let Some(v) = map.get(name) {
                    out.push(v);
                }
            }
            (Selector::Index(index), Value::Array(items)) => {
                if let Some(i) = resolve_index(*index, items.len()) {
                    out.push(&items[i]);
                }
            }
            (Selector::Slice { start, end }, Value::Array(items)) => {
                let len = items.len();
                let start = start.map_or(0, |s| clamp_bound(s, len));
                let end = end.map_or(len, |e| clamp_bound(e, len));
                if start < end {
                    out.extend(items[start..end].iter());
                }
            }
            (Selector::Wildcard, Value::Array(items)) => out.extend(items.iter()),
            (Selector::Wildcard, Value::Object(map)) => out.extend(map.values()),
            _ => {}
        }
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { len + index } else { index };
    (0..len).contains(&i).then_some(i as usize)
}

fn clamp_bound(bound: i64, len: usize) -> usize {
    let len = len as i64;
    let b = if bound < 0 { len + bound } else { bound };
    b.clamp(0, len) as usize
}

fn collect_descendants<'a>(node: &'a Value, out: &mut Vec<&'a Value>) {
    out.push(node);
    match node {
        Value::Array(items) => items.iter().for_each(|v| collect_descendants(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_descendants(v, out)),
        _ => {}
    }
}

struct Parser<'a> {
    expression: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(expression: &'a str) -> Self {
        Self {
            expression,
            chars: expression.chars().collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<Vec<Segment>, PathSyntaxError> {
        self.skip_whitespace();
        let mut end = self.chars.len();
        while end > self.pos && self.chars[end - 1].is_whitespace() {
            end -= 1;
        }

        if self.peek() == Some('{') {
            if end == 0 || self.chars[end - 1] != '}' || end - 1 == self.pos {
                return Err(self.error("unterminated '{'"));
            }
            self.pos += 1;
            end -= 1;
            self.skip_whitespace();
            while end > self.pos && self.chars[end - 1].is_whitespace() {
                end -= 1;
            }
        }
        self.chars.truncate(end);

        if self.pos >= self.chars.len() {
            return Err(self.error("empty path expression"));
        }

        if self.peek() == Some('$') {
            self.pos += 1;
        } else if self.peek().is_some_and(is_name_char) {
            // Bare leading name, e.g. `spec.containers[*].image`
            let name = self.name()?;
            return self.segments(vec![Segment::Child(Selector::Field(name))]);
        }

        self.segments(Vec::new())
    }

    fn segments(&mut self, mut segments: Vec<Segment>) -> Result<Vec<Segment>, PathSyntaxError> {
        while let Some(c) = self.peek() {
            match c {
                '.' if self.peek_at(1) == Some('.') => {
                    self.pos += 2;
                    let selector = match self.peek() {
                        Some('[') => self.bracket()?,
                        Some('*') => {
                            self.pos += 1;
                            Selector::Wildcard
                        }
                        Some(c) if is_name_char(c) => Selector::Field(self.name()?),
                        _ => return Err(self.error("expected a name after '..'")),
                    };
                    segments.push(Segment::Descendant(selector));
                }
                '.' => {
                    self.pos += 1;
                    let selector = match self.peek() {
                        Some('*') => {
                            self.pos += 1;
                            Selector::Wildcard
                        }
                        Some(c) if is_name_char(c) => Selector::Field(self.name()?),
                        // `$.` alone addresses the root
                        None if segments.is_empty() => break,
                        _ => return Err(self.error("expected a name after '.'")),
                    };
                    segments.push(Segment::Child(selector));
                }
                '[' => {
                    let selector = self.bracket()?;
                    segments.push(Segment::Child(selector));
                }
                other => {
                    return Err(self.error(&format!("unexpected character '{}'", other)));
                }
            }
        }

        Ok(segments)
    }

    fn name(&mut self) -> Result<String, PathSyntaxError> {
        let start = self.pos;
        while self.peek().is_some_and(is_name_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn bracket(&mut self) -> Result<Selector, PathSyntaxError> {
        let open = self.pos;
        self.pos += 1;
        self.skip_whitespace();

        let selector = match self.peek() {
            Some('*') => {
                self.pos += 1;
                Selector::Wildcard
            }
            Some(q @ ('\'' | '"')) => Selector::Field(self.quoted(q)?),
            Some('?') => return Err(self.error("filter expressions are not supported")),
            Some('(') => return Err(self.error("script expressions are not supported")),
            Some(_) => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c != ']') {
                    self.pos += 1;
                }
                let body: String = self.chars[start..self.pos].iter().collect();
                self.pos = start;
                let selector = self.index_or_slice(body.trim())?;
                self.pos = start + body.trim_end().chars().count();
                selector
            }
            None => {
                self.pos = open;
                return Err(self.error("unterminated '['"));
            }
        };

        self.skip_whitespace();
        match self.peek() {
            Some(']') => {
                self.pos += 1;
                Ok(selector)
            }
            Some(',') => Err(self.error("union expressions are not supported")),
            Some(_) => Err(self.error("expected ']'")),
            None => {
                self.pos = open;
                Err(self.error("unterminated '['"))
            }
        }
    }

    fn index_or_slice(&self, body: &str) -> Result<Selector, PathSyntaxError> {
        if body.is_empty() {
            return Err(self.error("empty brackets"));
        }
        if body.contains(',') {
            return Err(self.error("union expressions are not supported"));
        }

        if body.contains(':') {
            let parts: Vec<&str> = body.split(':').collect();
            if parts.len() > 3 || (parts.len() == 3 && !matches!(parts[2].trim(), "" | "1")) {
                return Err(self.error("slice steps are not supported"));
            }
            let start = self.bound(parts[0])?;
            let end = self.bound(parts[1])?;
            return Ok(Selector::Slice { start, end });
        }

        body.parse::<i64>()
            .map(Selector::Index)
            .map_err(|_| self.error(&format!("invalid array index '{}'", body)))
    }

    fn bound(&self, s: &str) -> Result<Option<i64>, PathSyntaxError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(None);
        }
        s.parse::<i64>()
            .map(Some)
            .map_err(|_| self.error(&format!("invalid slice bound '{}'", s)))
    }

    fn quoted(&mut self, quote: char) -> Result<String, PathSyntaxError> {
        let open = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                Some('\\') => {
                    match self.peek_at(1) {
                        Some(c) => out.push(c),
                        None => break,
                    }
                    self.pos += 2;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
                None => break,
            }
        }
        self.pos = open;
        Err(self.error("unterminated string"))
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Byte offset of the cursor in the original expression.
    fn byte_offset(&self) -> usize {
        self.chars.iter().take(self.pos).map(|c| c.len_utf8()).sum()
    }

    fn error(&self, message: &str) -> PathSyntaxError {
        PathSyntaxError {
            expression: self.expression.to_string(),
            position: self.byte_offset(),
            message: message.to_string(),
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '/')
}
