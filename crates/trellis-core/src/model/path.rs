//! Path addressing for data and schema nodes
//!
//! A path is a slash-separated sequence of segments, each optionally carrying
//! list-key predicates: `/routing/rib[name='main']/route[prefix='10.0.0.0/8']`.
//! Leaf-list entries use the `.` pseudo-key: `/interfaces/names[.='eth0']`.
//!
//! The same type addresses schema positions (predicates stripped) and data
//! nodes (predicates select list entries). Pattern paths may use `*` as a
//! segment wildcard.

use crate::errors::{Result, TrellisError};

/// One path segment: a node name plus optional list-key predicates
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathSegment {
    pub name: String,
    /// Key predicates in declared order; empty for non-entry segments
    pub keys: Vec<(String, String)>,
}

impl PathSegment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
        }
    }

    pub fn with_keys(name: impl Into<String>, keys: Vec<(String, String)>) -> Self {
        Self {
            name: name.into(),
            keys,
        }
    }

    /// Key-set equality, insensitive to predicate order
    pub fn same_keys(&self, other: &[(String, String)]) -> bool {
        self.keys.len() == other.len() && self.keys.iter().all(|k| other.contains(k))
    }
}

impl std::fmt::Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        for (k, v) in &self.keys {
            write!(f, "[{}='{}']", k, v)?;
        }
        Ok(())
    }
}

/// A parsed path, absolute from the tree root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Path {
    pub segments: Vec<PathSegment>,
}

impl Path {
    /// The root path (no segments)
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a path string of the form `/a/b[k='v']/c`
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` if the string is not absolute, a segment name is
    /// empty, or a key predicate is malformed.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |message: &str| TrellisError::InvalidPath {
            path: input.to_string(),
            message: message.to_string(),
        };

        let trimmed = input.trim();
        if trimmed == "/" || trimmed.is_empty() {
            return Ok(Self::root());
        }
        let rest = trimmed
            .strip_prefix('/')
            .ok_or_else(|| invalid("path must be absolute"))?;

        let mut segments = Vec::new();
        for raw in split_segments(rest) {
            if raw.is_empty() {
                return Err(invalid("empty segment"));
            }
            let (name, preds) = match raw.find('[') {
                Some(idx) => (&raw[..idx], &raw[idx..]),
                None => (raw, ""),
            };
            if name.is_empty() {
                return Err(invalid("segment has predicates but no name"));
            }
            let mut keys = Vec::new();
            let mut remainder = preds;
            while !remainder.is_empty() {
                let close = remainder
                    .find(']')
                    .ok_or_else(|| invalid("unterminated key predicate"))?;
                let body = &remainder[1..close];
                let eq = body
                    .find("='")
                    .ok_or_else(|| invalid("key predicate must be [key='value']"))?;
                let key = &body[..eq];
                let value = body[eq + 2..]
                    .strip_suffix('\'')
                    .ok_or_else(|| invalid("key value must be single-quoted"))?;
                if key.is_empty() {
                    return Err(invalid("empty key name"));
                }
                keys.push((key.to_string(), value.to_string()));
                remainder = &remainder[close + 1..];
            }
            segments.push(PathSegment {
                name: name.to_string(),
                keys,
            });
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a segment, returning the extended path
    pub fn join(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// The parent path, or None at the root
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// The schema position of this path: every predicate stripped
    pub fn schema_path(&self) -> Self {
        Self {
            segments: self
                .segments
                .iter()
                .map(|s| PathSegment::new(s.name.clone()))
                .collect(),
        }
    }

    /// Canonical schema-path string (predicates stripped)
    pub fn schema_string(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for seg in &self.segments {
            out.push('/');
            out.push_str(&seg.name);
        }
        out
    }

    /// Whether `self` is a (non-strict) ancestor-or-equal of `other`,
    /// comparing names and any keys present in `self`
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        if self.segments.len() > other.segments.len() {
            return false;
        }
        self.segments.iter().zip(&other.segments).all(|(a, b)| {
            a.name == b.name && (a.keys.is_empty() || a.same_keys(&b.keys))
        })
    }

    /// Match this data path against a pattern path.
    ///
    /// Pattern segments may be `*` (any name); a pattern segment without keys
    /// matches any entry of a matching list. The pattern must cover the whole
    /// path.
    pub fn matches_pattern(&self, pattern: &Path) -> bool {
        if pattern.segments.len() != self.segments.len() {
            return false;
        }
        pattern.segments.iter().zip(&self.segments).all(|(p, s)| {
            (p.name == "*" || p.name == s.name) && (p.keys.is_empty() || p.same_keys(&s.keys))
        })
    }
}

/// Split on `/` outside of key predicates
fn split_segments(input: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in input.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '/' if depth == 0 => {
                out.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    out.push(&input[start..]);
    out
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for seg in &self.segments {
            write!(f, "/{}", seg)?;
        }
        Ok(())
    }
}
