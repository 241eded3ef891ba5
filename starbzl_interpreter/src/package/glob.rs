//! File globbing within a package.
//!
//! Patterns without `**` behave like a standard glob against the package
//! directory. Patterns with `**` walk the subtree below the first `**`,
//! skipping any directory that is itself a subpackage (it has a BUILD
//! file), and apply the remainder of the pattern to basenames.

use std::collections::BTreeSet;

use anyhow::Context;
use starbzl_core::BuildFileLocator;
use starbzl_core::FileSystem;
use thiserror::Error;

#[derive(Debug, Error)]
enum GlobError {
    #[error("glob pattern '{0}' contains forbidden '?' wildcard")]
    QuestionMark(String),
    #[error("glob pattern '{0}' contains forbidden '..' reference")]
    UplevelReference(String),
    #[error("glob pattern '{0}' cannot be absolute")]
    Absolute(String),
}

fn match_options() -> glob::MatchOptions {
    glob::MatchOptions {
        require_literal_separator: true,
        require_literal_leading_dot: true,
        ..glob::MatchOptions::default()
    }
}

pub(crate) fn validate_glob_pattern(pattern: &str) -> anyhow::Result<()> {
    if pattern.contains('?') {
        return Err(GlobError::QuestionMark(pattern.to_owned()).into());
    }
    if pattern.split('/').any(|seg| seg == "..") {
        return Err(GlobError::UplevelReference(pattern.to_owned()).into());
    }
    if pattern.starts_with('/') {
        return Err(GlobError::Absolute(pattern.to_owned()).into());
    }
    Ok(())
}

/// One entry found below the package directory.
struct WalkEntry {
    rel: String,
    is_dir: bool,
    has_build_file: bool,
}

/// Walks the whole subtree, without subpackage pruning.
fn walk_all(
    fs: &dyn FileSystem,
    locator: &dyn BuildFileLocator,
    dir: &str,
    rel_prefix: &str,
    out: &mut Vec<WalkEntry>,
) -> anyhow::Result<()> {
    let entries = match fs.read_dir(dir) {
        Ok(entries) => entries,
        // A missing start directory globs to nothing.
        Err(_) => return Ok(()),
    };
    for entry in entries {
        let rel = if rel_prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", rel_prefix, entry.name)
        };
        let full = fs.join(&[dir, &entry.name]);
        if entry.is_dir {
            let has_build_file = locator.has_build_file(&full);
            out.push(WalkEntry {
                rel: rel.clone(),
                is_dir: true,
                has_build_file,
            });
            walk_all(fs, locator, &full, &rel, out)?;
        } else {
            out.push(WalkEntry {
                rel,
                is_dir: false,
                has_build_file: false,
            });
        }
    }
    Ok(())
}

/// Walks the subtree, pruning subpackages (except the start directory).
fn walk_pruned(
    fs: &dyn FileSystem,
    locator: &dyn BuildFileLocator,
    dir: &str,
    rel_prefix: &str,
    out: &mut Vec<WalkEntry>,
) -> anyhow::Result<()> {
    let entries = match fs.read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };
    for entry in entries {
        let rel = if rel_prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{}/{}", rel_prefix, entry.name)
        };
        let full = fs.join(&[dir, &entry.name]);
        if entry.is_dir {
            if locator.has_build_file(&full) {
                // Subpackage boundary: neither the directory nor anything
                // below it belongs to this package.
                continue;
            }
            out.push(WalkEntry {
                rel: rel.clone(),
                is_dir: true,
                has_build_file: false,
            });
            walk_pruned(fs, locator, &full, &rel, out)?;
        } else {
            out.push(WalkEntry {
                rel,
                is_dir: false,
                has_build_file: false,
            });
        }
    }
    Ok(())
}

fn match_simple(
    fs: &dyn FileSystem,
    locator: &dyn BuildFileLocator,
    package_dir: &str,
    pattern: &str,
    include_dirs: bool,
) -> anyhow::Result<Vec<String>> {
    let compiled = glob::Pattern::new(pattern)
        .with_context(|| format!("invalid glob pattern '{}'", pattern))?;
    let mut entries = Vec::new();
    walk_all(fs, locator, package_dir, "", &mut entries)?;
    let mut result = Vec::new();
    for entry in entries {
        if !compiled.matches_with(&entry.rel, match_options()) {
            continue;
        }
        if entry.is_dir {
            if !include_dirs || entry.has_build_file {
                continue;
            }
        }
        result.push(entry.rel);
    }
    Ok(result)
}

fn match_recursive(
    fs: &dyn FileSystem,
    locator: &dyn BuildFileLocator,
    package_dir: &str,
    pattern: &str,
    include_dirs: bool,
) -> anyhow::Result<Vec<String>> {
    let (prefix, suffix) = pattern.split_once("**").expect("caller checked for **");
    let prefix = prefix.trim_end_matches('/');
    let suffix = suffix.trim_start_matches('/');

    let start_dir = if prefix.is_empty() {
        package_dir.to_owned()
    } else {
        fs.join(&[package_dir, prefix])
    };

    let suffix_pattern = if suffix.is_empty() {
        None
    } else {
        Some(
            glob::Pattern::new(suffix)
                .with_context(|| format!("invalid glob pattern '{}'", pattern))?,
        )
    };

    let mut entries = Vec::new();
    walk_pruned(fs, locator, &start_dir, prefix, &mut entries)?;

    let mut result = Vec::new();
    for entry in entries {
        if entry.is_dir && !include_dirs {
            continue;
        }
        if let Some(suffix_pattern) = &suffix_pattern {
            let basename = entry.rel.rsplit('/').next().unwrap_or(&entry.rel);
            if !suffix_pattern.matches_with(basename, match_options()) {
                continue;
            }
        }
        result.push(entry.rel);
    }
    Ok(result)
}

fn match_pattern(
    fs: &dyn FileSystem,
    locator: &dyn BuildFileLocator,
    package_dir: &str,
    pattern: &str,
    include_dirs: bool,
) -> anyhow::Result<Vec<String>> {
    if pattern.contains("**") {
        match_recursive(fs, locator, package_dir, pattern, include_dirs)
    } else {
        match_simple(fs, locator, package_dir, pattern, include_dirs)
    }
}

/// The glob proper: union of the include patterns minus the union of the
/// exclude patterns, sorted.
pub(crate) fn glob(
    fs: &dyn FileSystem,
    locator: &dyn BuildFileLocator,
    package_dir: &str,
    include: &[String],
    exclude: &[String],
    include_dirs: bool,
) -> anyhow::Result<Vec<String>> {
    let mut matches: BTreeSet<String> = BTreeSet::new();
    for pattern in include {
        validate_glob_pattern(pattern)?;
        matches.extend(match_pattern(fs, locator, package_dir, pattern, include_dirs)?);
    }
    for pattern in exclude {
        validate_glob_pattern(pattern)?;
        for found in match_pattern(fs, locator, package_dir, pattern, include_dirs)? {
            matches.remove(&found);
        }
    }
    Ok(matches.into_iter().collect())
}

/// Directories below the package that start their own package, non-recursive
/// into a found subpackage.
pub(crate) fn subpackages(
    fs: &dyn FileSystem,
    locator: &dyn BuildFileLocator,
    package_dir: &str,
    include: &[String],
    exclude: &[String],
) -> anyhow::Result<Vec<String>> {
    fn collect_roots(
        fs: &dyn FileSystem,
        locator: &dyn BuildFileLocator,
        dir: &str,
        rel_prefix: &str,
        out: &mut Vec<String>,
    ) -> anyhow::Result<()> {
        let entries = match fs.read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries {
            if !entry.is_dir {
                continue;
            }
            let rel = if rel_prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", rel_prefix, entry.name)
            };
            let full = fs.join(&[dir, &entry.name]);
            if locator.has_build_file(&full) {
                out.push(rel);
            } else {
                collect_roots(fs, locator, &full, &rel, out)?;
            }
        }
        Ok(())
    }

    let mut roots = Vec::new();
    collect_roots(fs, locator, package_dir, "", &mut roots)?;

    let matches_any = |patterns: &[String], rel: &str| -> anyhow::Result<bool> {
        for pattern in patterns {
            validate_glob_pattern(pattern)?;
            if pattern.contains("**") {
                return Ok(true);
            }
            let compiled = glob::Pattern::new(pattern)
                .with_context(|| format!("invalid glob pattern '{}'", pattern))?;
            if compiled.matches_with(rel, match_options()) {
                return Ok(true);
            }
        }
        Ok(false)
    };

    let mut result: BTreeSet<String> = BTreeSet::new();
    for root in &roots {
        if matches_any(include, root)? && !matches_any(exclude, root)? {
            result.insert(root.clone());
        }
    }
    Ok(result.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use starbzl_core::FsBuildFileLocator;
    use starbzl_core::InMemoryFileSystem;

    use super::*;

    fn fixture() -> (Arc<InMemoryFileSystem>, FsBuildFileLocator) {
        let fs = Arc::new(InMemoryFileSystem::new());
        fs.add_file("pkg/BUILD", "");
        fs.add_file("pkg/foo.cc", "");
        fs.add_file("pkg/foo.h", "");
        fs.add_file("pkg/lib/bar.cc", "");
        fs.add_file("pkg/sub/BUILD", "");
        fs.add_file("pkg/sub/baz.cc", "");
        let locator = FsBuildFileLocator::new(fs.clone());
        (fs, locator)
    }

    #[test]
    fn simple_pattern() {
        let (fs, locator) = fixture();
        let result = glob(
            &*fs,
            &locator,
            "pkg",
            &["*.cc".to_owned()],
            &[],
            false,
        )
        .unwrap();
        assert_eq!(result, vec!["foo.cc"]);
    }

    #[test]
    fn recursive_skips_subpackages() {
        let (fs, locator) = fixture();
        let result = glob(
            &*fs,
            &locator,
            "pkg",
            &["**/*.cc".to_owned()],
            &[],
            false,
        )
        .unwrap();
        assert_eq!(result, vec!["foo.cc", "lib/bar.cc"]);
    }

    #[test]
    fn excludes_are_subtracted() {
        let (fs, locator) = fixture();
        let result = glob(
            &*fs,
            &locator,
            "pkg",
            &["**/*.cc".to_owned()],
            &["lib/*.cc".to_owned()],
            false,
        )
        .unwrap();
        assert_eq!(result, vec!["foo.cc"]);
    }

    #[test]
    fn pattern_validation() {
        let (fs, locator) = fixture();
        for bad in ["a?.cc", "../up.cc", "/abs.cc"] {
            assert!(glob(&*fs, &locator, "pkg", &[bad.to_owned()], &[], false).is_err());
        }
    }

    #[test]
    fn finds_subpackages() {
        let (fs, locator) = fixture();
        let result = subpackages(&*fs, &locator, "pkg", &["*".to_owned()], &[]).unwrap();
        assert_eq!(result, vec!["sub"]);
    }
}
