//! Nested paths into the cache tree.

use std::fmt;

/// A path into the nested cache, e.g. `["concepts", "123"]`.
///
/// Segments are always kept as strings. Containers created along a path are
/// objects, so a numeric-looking segment like `"123"` is an object key and
/// never an array index on write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CachePath(Vec<String>);

impl CachePath {
  /// The empty path, which addresses the whole store.
  pub fn root() -> Self {
    Self(Vec::new())
  }

  /// Parse a `.`-delimited path. Empty segments are dropped.
  pub fn parse(path: &str) -> Self {
    Self(
      path
        .split('.')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect(),
    )
  }

  pub fn segments(&self) -> &[String] {
    &self.0
  }

  pub fn is_root(&self) -> bool {
    self.0.is_empty()
  }

  /// Append a segment, returning the extended path.
  pub fn join(mut self, segment: impl fmt::Display) -> Self {
    self.0.push(segment.to_string());
    self
  }

  /// Split into parent path and leaf segment. `None` for the root.
  pub fn split_last(&self) -> Option<(&[String], &str)> {
    self
      .0
      .split_last()
      .map(|(last, parent)| (parent, last.as_str()))
  }
}

impl fmt::Display for CachePath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.join("."))
  }
}

impl From<&str> for CachePath {
  fn from(path: &str) -> Self {
    Self::parse(path)
  }
}

impl From<String> for CachePath {
  fn from(path: String) -> Self {
    Self::parse(&path)
  }
}

impl From<Vec<String>> for CachePath {
  fn from(segments: Vec<String>) -> Self {
    Self(segments)
  }
}

impl From<&[&str]> for CachePath {
  fn from(segments: &[&str]) -> Self {
    Self(segments.iter().map(|s| s.to_string()).collect())
  }
}

impl<const N: usize> From<[&str; N]> for CachePath {
  fn from(segments: [&str; N]) -> Self {
    Self(segments.iter().map(|s| s.to_string()).collect())
  }
}

impl From<&CachePath> for CachePath {
  fn from(path: &CachePath) -> Self {
    path.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_delimited() {
    let path = CachePath::parse("concepts.123");
    assert_eq!(path.segments(), &["concepts", "123"]);
  }

  #[test]
  fn test_parse_empty_is_root() {
    assert!(CachePath::parse("").is_root());
    assert!(CachePath::parse("..").is_root());
  }

  #[test]
  fn test_join_numbers() {
    let path = CachePath::from("edges").join(42);
    assert_eq!(path.to_string(), "edges.42");
  }

  #[test]
  fn test_split_last() {
    let path = CachePath::from(["a", "b", "c"]);
    let (parent, leaf) = path.split_last().unwrap();
    assert_eq!(parent, &["a".to_string(), "b".to_string()]);
    assert_eq!(leaf, "c");
    assert!(CachePath::root().split_last().is_none());
  }
}
