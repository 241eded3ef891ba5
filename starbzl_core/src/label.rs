//! Canonical labels of the form `[@repo]//pkg:name`.

use std::fmt;

use allocative::Allocative;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("invalid label `{0}`: missing // after repository name")]
    MissingSlashes(String),
    #[error("invalid label `{0}`: must start with // or @")]
    NotAbsolute(String),
    #[error("invalid label `{0}`: empty target name")]
    EmptyName(String),
    #[error("invalid label `{0}`: `..` path segments are not allowed")]
    UplevelReference(String),
}

/// A canonical label. An empty `repo` designates the main repository.
///
/// The rendered form is `[@repo]//pkg:name` and parsing it back yields an
/// equal label. Ordering is lexicographic on the rendered string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Allocative)]
pub struct Label {
    repo: String,
    pkg: String,
    name: String,
}

impl Label {
    pub fn new(repo: &str, pkg: &str, name: &str) -> Self {
        Self {
            repo: repo.to_owned(),
            pkg: pkg.to_owned(),
            name: name.to_owned(),
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn pkg(&self) -> &str {
        &self.pkg
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parses an absolute label: `//pkg:name`, `//pkg` or `@repo//pkg:name`.
    ///
    /// A label without an explicit `:name` takes the last segment of the
    /// package path as the target name.
    pub fn parse(s: &str) -> Result<Self, LabelError> {
        let original = s;
        let mut repo = "";
        let mut rest = s;

        if let Some(stripped) = rest.strip_prefix('@') {
            let idx = stripped
                .find("//")
                .ok_or_else(|| LabelError::MissingSlashes(original.to_owned()))?;
            repo = &stripped[..idx];
            rest = &stripped[idx..];
        }

        let rest = rest
            .strip_prefix("//")
            .ok_or_else(|| LabelError::NotAbsolute(original.to_owned()))?;

        let (pkg, name) = match rest.rfind(':') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => match rest.rfind('/') {
                Some(idx) => (rest, &rest[idx + 1..]),
                None => (rest, rest),
            },
        };

        let label = Label::new(repo, pkg, name);
        label.validate(original)?;
        Ok(label)
    }

    /// Parses a label relative to the given repository and package.
    ///
    /// `:t` and bare `t` resolve into the current package; `//p:t` stays in
    /// the current repository; `@r//p:t` is absolute.
    pub fn parse_relative(
        s: &str,
        current_repo: &str,
        current_pkg: &str,
    ) -> Result<Self, LabelError> {
        if s.starts_with('@') {
            return Self::parse(s);
        }
        if s.starts_with("//") {
            let mut label = Self::parse(s)?;
            if label.repo.is_empty() {
                label.repo = current_repo.to_owned();
            }
            return Ok(label);
        }
        let name = s.strip_prefix(':').unwrap_or(s);
        let label = Label::new(current_repo, current_pkg, name);
        label.validate(s)?;
        Ok(label)
    }

    fn validate(&self, original: &str) -> Result<(), LabelError> {
        if self.name.is_empty() {
            return Err(LabelError::EmptyName(original.to_owned()));
        }
        let has_uplevel = |path: &str| path.split('/').any(|seg| seg == "..");
        if has_uplevel(&self.pkg) || has_uplevel(&self.name) {
            return Err(LabelError::UplevelReference(original.to_owned()));
        }
        Ok(())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.repo.is_empty() {
            write!(f, "@{}", self.repo)?;
        }
        write!(f, "//{}:{}", self.pkg, self.name)
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_absolute() {
        let l = Label::parse("//foo/bar:baz").unwrap();
        assert_eq!(l.repo(), "");
        assert_eq!(l.pkg(), "foo/bar");
        assert_eq!(l.name(), "baz");
        assert_eq!(l.to_string(), "//foo/bar:baz");
    }

    #[test]
    fn parse_with_repo() {
        let l = Label::parse("@rules//pkg:t").unwrap();
        assert_eq!(l.repo(), "rules");
        assert_eq!(l.to_string(), "@rules//pkg:t");
    }

    #[test]
    fn implicit_name_is_last_segment() {
        let l = Label::parse("//foo/bar").unwrap();
        assert_eq!(l.name(), "bar");
        let l = Label::parse("//foo").unwrap();
        assert_eq!(l.name(), "foo");
    }

    #[test]
    fn round_trip() {
        for s in ["//a:b", "@r//a/b:c", "//x:y.bzl", "@z//:top"] {
            let l = Label::parse(s).unwrap();
            assert_eq!(Label::parse(&l.to_string()).unwrap(), l);
        }
    }

    #[test]
    fn relative_forms() {
        let l = Label::parse_relative(":t", "main", "some/pkg").unwrap();
        assert_eq!(l.to_string(), "@main//some/pkg:t");
        let l = Label::parse_relative("t", "", "some/pkg").unwrap();
        assert_eq!(l.to_string(), "//some/pkg:t");
        let l = Label::parse_relative("//other:t", "main", "some/pkg").unwrap();
        assert_eq!(l.repo(), "main");
        let l = Label::parse_relative("@ext//other:t", "main", "some/pkg").unwrap();
        assert_eq!(l.repo(), "ext");
    }

    #[test]
    fn errors() {
        assert!(matches!(
            Label::parse("@repo"),
            Err(LabelError::MissingSlashes(_))
        ));
        assert!(matches!(
            Label::parse("foo:bar"),
            Err(LabelError::NotAbsolute(_))
        ));
        assert!(matches!(
            Label::parse("//pkg:"),
            Err(LabelError::EmptyName(_))
        ));
        assert!(matches!(
            Label::parse("//a/../b:c"),
            Err(LabelError::UplevelReference(_))
        ));
    }

    #[test]
    fn ordering_is_lexicographic_on_rendered_string() {
        let a = Label::parse("//a:x").unwrap();
        let b = Label::parse("//b:x").unwrap();
        let ext = Label::parse("@r//a:x").unwrap();
        assert!(a < b);
        assert!(b > a);
        // '/' sorts before '@', so main-repo labels come first
        assert!(a < ext);
    }
}
