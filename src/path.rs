//! Field paths: the absolute data accessors a template span may read.

use std::fmt;

/// One accessor step in a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// `.Name` — a named field/map-key access.
    Field(String),
    /// `[*]` — an element of a sequence reached through `range`.
    Index,
}

/// An ordered sequence of accessor steps, e.g. `.User.Name` or
/// `.Items[*].Done`. Equality is structural: two paths are equal iff their
/// segment sequences match exactly, so `.Items.Done` (reading a field named
/// `Done` directly off `Items`) is distinct from `.Items[*].Done` (reading
/// `Done` off each element of `Items`).
///
/// An empty path refers to the current dot itself (`{{.}}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    /// The path referring to the current dot context.
    pub fn dot() -> Self {
        FieldPath(Vec::new())
    }

    pub fn field(name: impl Into<String>) -> Self {
        FieldPath(vec![PathSegment::Field(name.into())])
    }

    pub fn is_dot(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Append a field access, returning a new, longer path.
    pub fn join_field(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Field(name.into()));
        FieldPath(segments)
    }

    /// Append an `Index(*)` step, used when entering a `range` body.
    pub fn join_index(&self) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index);
        FieldPath(segments)
    }

    /// Concatenate two paths (used to root a relative path at a context).
    pub fn join_path(&self, other: &FieldPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        FieldPath(segments)
    }

    /// Whether `self` is `other` or a prefix of it — used by callers that
    /// want to know whether a change under `other` could invalidate a span
    /// whose dependency is the opaque path `self`.
    pub fn is_prefix_of(&self, other: &FieldPath) -> bool {
        self.0.len() <= other.0.len() && self.0 == other.0[..self.0.len()]
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, ".");
        }
        for seg in &self.0 {
            match seg {
                PathSegment::Field(name) => write!(f, ".{name}")?,
                PathSegment::Index => write!(f, "[*]")?,
            }
        }
        Ok(())
    }
}

/// Parse a simple dotted path like `.User.Name` or `.` into a [`FieldPath`].
/// Returns `None` if `raw` is not a bare dotted path (e.g. it contains a
/// function call, a pipe, or a variable) — such pipelines are opaque.
pub fn parse_dotted_path(raw: &str) -> Option<FieldPath> {
    let raw = raw.trim();
    if raw == "." {
        return Some(FieldPath::dot());
    }
    if !raw.starts_with('.') {
        return None;
    }
    let mut segments = Vec::new();
    for part in raw[1..].split('.') {
        if part.is_empty() || !is_ident(part) {
            return None;
        }
        segments.push(PathSegment::Field(part.to_string()));
    }
    if segments.is_empty() {
        return None;
    }
    Some(FieldPath(segments))
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_dot() {
        assert_eq!(parse_dotted_path(".").unwrap(), FieldPath::dot());
    }

    #[test]
    fn parses_dotted_chain() {
        let path = parse_dotted_path(".User.Name").unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Field("User".into()),
                PathSegment::Field("Name".into())
            ]
        );
    }

    #[test]
    fn rejects_function_calls() {
        assert!(parse_dotted_path("printf \"%s\" .Name").is_none());
        assert!(parse_dotted_path("$x").is_none());
    }

    #[test]
    fn range_path_distinguishes_from_bare() {
        let a = FieldPath::field("Items").join_field("Done");
        let b = FieldPath::field("Items").join_index().join_field("Done");
        assert_ne!(a, b);
    }

    #[test]
    fn prefix_matching() {
        let user = FieldPath::field("User");
        let user_name = user.join_field("Name");
        assert!(user.is_prefix_of(&user_name));
        assert!(!user_name.is_prefix_of(&user));
    }
}
