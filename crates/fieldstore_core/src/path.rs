//! Dot-separated paths into the value tree
//!
//! `user.address.city`, `todos.3.completed`, `todos.length`, `todos.*.completed`.
//!
//! Segments made only of decimal digits (without a leading zero) are array
//! indices, `length` is the virtual array length and `*` matches any single
//! segment. The empty string is the root path. A single `*` is the global
//! pattern that observes the whole tree as one unit.

use crate::error::{Result, StoreError};
use smallvec::SmallVec;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// One component of a [`Path`]
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// Object key
    Key(String),
    /// Array index (also addresses numeric object keys)
    Index(usize),
    /// Virtual `length` of an array
    Length,
    /// `*` - matches any single segment (patterns only)
    Wildcard,
}

impl Segment {
    /// Classify a raw segment string
    pub fn from_key(raw: &str) -> Segment {
        match raw {
            "*" => Segment::Wildcard,
            "length" => Segment::Length,
            _ if is_index(raw) => raw
                .parse::<usize>()
                .map(Segment::Index)
                .unwrap_or_else(|_| Segment::Key(raw.to_string())),
            _ => Segment::Key(raw.to_string()),
        }
    }

    /// The segment as an object key
    pub fn as_key(&self) -> Cow<'_, str> {
        match self {
            Segment::Key(k) => Cow::Borrowed(k.as_str()),
            Segment::Index(i) => Cow::Owned(i.to_string()),
            Segment::Length => Cow::Borrowed("length"),
            Segment::Wildcard => Cow::Borrowed("*"),
        }
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Segment::Wildcard)
    }
}

fn is_index(raw: &str) -> bool {
    !raw.is_empty()
        && raw.bytes().all(|b| b.is_ascii_digit())
        && (raw == "0" || !raw.starts_with('0'))
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

/// A normalized path (zero segments = the whole tree)
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: SmallVec<[Segment; 4]>,
}

impl Path {
    /// The root path
    pub fn root() -> Self {
        Self::default()
    }

    /// The global `*` pattern
    pub fn global() -> Self {
        Self::from_segments([Segment::Wildcard])
    }

    pub fn from_segments<I: IntoIterator<Item = Segment>>(segments: I) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    /// Parse and normalize a dot-separated path.
    ///
    /// The empty string is the root path. Empty segments (`a..b`, `.a`, `a.`)
    /// are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = SmallVec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(StoreError::invalid_path(raw, "empty segment"));
            }
            segments.push(Segment::from_key(part));
        }
        Ok(Self { segments })
    }

    /// Parse a path that is written to: no wildcards allowed
    pub fn parse_write(raw: &str) -> Result<Self> {
        let path = Self::parse(raw)?;
        if path.is_pattern() {
            return Err(StoreError::invalid_path(
                raw,
                "wildcards are not allowed in write paths",
            ));
        }
        Ok(path)
    }

    /// Parse a subscription pattern: must not be empty
    pub fn parse_pattern(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(StoreError::invalid_path(raw, "a non-empty path is required"));
        }
        Self::parse(raw)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Contains at least one `*`
    pub fn is_pattern(&self) -> bool {
        self.segments.iter().any(Segment::is_wildcard)
    }

    /// Exactly the global `*` pattern
    pub fn is_global(&self) -> bool {
        self.segments.len() == 1 && self.segments[0].is_wildcard()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// This path extended by one segment
    pub fn child(&self, segment: Segment) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Path { segments }
    }

    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            return None;
        }
        Some(self.prefix(self.segments.len() - 1))
    }

    /// The first `n` segments
    pub fn prefix(&self, n: usize) -> Path {
        Path {
            segments: self.segments.iter().take(n).cloned().collect(),
        }
    }

    /// Strict, non-root ancestors, outermost first (`a`, `a.b` for `a.b.c`)
    pub fn ancestors(&self) -> impl Iterator<Item = Path> + '_ {
        (1..self.segments.len()).map(move |n| self.prefix(n))
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Pattern match: equal length, `*` in `self` matches any concrete
    /// segment except the virtual `length`.
    ///
    /// Ancestor relationships are not matches; the registry handles those.
    pub fn matches(&self, concrete: &Path) -> bool {
        self.segments.len() == concrete.segments.len()
            && self
                .segments
                .iter()
                .zip(concrete.segments.iter())
                .all(|(p, c)| (p.is_wildcard() && *c != Segment::Length) || p == c)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Path::parse(s)
    }
}
