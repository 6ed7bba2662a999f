//! Symbolic absolute object identifiers (data model §3): a `/`-rooted
//! tree path where every object (Graph, Block, Port) has exactly one,
//! unique path, and moving an object renames its whole subtree atomically.

use std::fmt;

/// A `/`-delimited absolute path. Segments match `[A-Za-z_][A-Za-z0-9_]*`.
/// The root path `/` has zero segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    pub fn root() -> Self {
        Self { segments: Vec::new() }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Parse an absolute path string like `/foo/bar`. Errors if it is not
    /// rooted at `/` or any segment fails the symbol grammar.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        if !s.starts_with('/') {
            return Err(PathError::NotAbsolute);
        }
        if s == "/" {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for seg in s[1..].split('/') {
            if !is_valid_symbol(seg) {
                return Err(PathError::InvalidSegment(seg.to_string()));
            }
            segments.push(seg.to_string());
        }
        Ok(Self { segments })
    }

    /// Construct the path of a direct child with the given symbol.
    pub fn child(&self, symbol: &str) -> Result<Self, PathError> {
        if !is_valid_symbol(symbol) {
            return Err(PathError::InvalidSegment(symbol.to_string()));
        }
        let mut segments = self.segments.clone();
        segments.push(symbol.to_string());
        Ok(Self { segments })
    }

    /// The path's own symbol (the last segment), or `None` for the root.
    pub fn symbol(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        if self.segments.is_empty() {
            None
        } else {
            Some(Path { segments: self.segments[..self.segments.len() - 1].to_vec() })
        }
    }

    /// Whether `self` is `other` or a descendant of `other`.
    pub fn starts_with(&self, other: &Path) -> bool {
        self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Rewrite this path (which must be `old_prefix` or a descendant of it)
    /// so it hangs off `new_prefix` instead. Used by `Move`/rename to
    /// relocate a whole subtree (§4.0, §4.13).
    pub fn rebase(&self, old_prefix: &Path, new_prefix: &Path) -> Path {
        debug_assert!(self.starts_with(old_prefix));
        let mut segments = new_prefix.segments.clone();
        segments.extend(self.segments[old_prefix.segments.len()..].iter().cloned());
        Path { segments }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            write!(f, "/")
        } else {
            for seg in &self.segments {
                write!(f, "/{}", seg)?;
            }
            Ok(())
        }
    }
}

fn is_valid_symbol(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    NotAbsolute,
    InvalidSegment(String),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::NotAbsolute => write!(f, "path is not rooted at '/'"),
            PathError::InvalidSegment(s) => write!(f, "invalid path segment: '{}'", s),
        }
    }
}

impl std::error::Error for PathError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let p = Path::parse("/g/a").unwrap();
        assert_eq!(p.to_string(), "/g/a");
        assert_eq!(p.symbol(), Some("a"));
    }

    #[test]
    fn rejects_bad_segments() {
        assert!(Path::parse("/1bad").is_err());
        assert!(Path::parse("g/a").is_err());
    }

    #[test]
    fn child_and_parent_round_trip() {
        let root = Path::root();
        let g = root.child("g").unwrap();
        let a = g.child("a").unwrap();
        assert_eq!(a.parent().unwrap(), g);
        assert!(a.starts_with(&g));
        assert!(!g.starts_with(&a));
    }
}
