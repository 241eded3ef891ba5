//! `File`, `root` and `SymlinkEntry` values.
//!
//! Files are immutable artifact descriptors. Source files are produced by
//! the package machinery; derived files only by `ctx.actions.declare_*`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::collections::StarlarkHasher;
use starlark::environment::Methods;
use starlark::environment::MethodsBuilder;
use starlark::environment::MethodsStatic;
use starlark::starlark_module;
use starlark::starlark_simple_value;
use starlark::values::starlark_value;
use starlark::values::Heap;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Value;
use starlark::values::ValueLike;
use starbzl_core::Label;

/// A root directory beneath which files reside (`bin_dir`, source root, …).
#[derive(Debug, Clone, PartialEq, Eq, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkFileRoot {
    path: String,
}

starlark_simple_value!(StarlarkFileRoot);

impl StarlarkFileRoot {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for StarlarkFileRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<root {}>", self.path)
    }
}

#[starlark_value(type = "root")]
impl<'v> StarlarkValue<'v> for StarlarkFileRoot {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(root_methods)
    }

    fn equals(&self, other: Value<'v>) -> starlark::Result<bool> {
        Ok(matches!(other.downcast_ref::<StarlarkFileRoot>(), Some(o) if o.path == self.path))
    }
}

#[starlark_module]
fn root_methods(builder: &mut MethodsBuilder) {
    /// The exec-root-relative path of this root.
    #[starlark(attribute)]
    fn path<'v>(this: &'v StarlarkFileRoot) -> anyhow::Result<&'v str> {
        Ok(&this.path)
    }
}

/// An immutable file (artifact) descriptor.
///
/// `path` is relative to the exec root, `short_path` to the file's root.
/// Exactly one of the source/derived states is chosen at creation and the
/// value is never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkFile {
    path: String,
    short_path: String,
    root: String,
    owner: Option<Label>,
    is_source: bool,
    is_directory: bool,
    is_symlink: bool,
}

starlark_simple_value!(StarlarkFile);

impl StarlarkFile {
    /// A source file inside a package.
    pub fn source(pkg: &str, name: &str) -> Self {
        let short_path = if pkg.is_empty() {
            name.to_owned()
        } else {
            format!("{}/{}", pkg, name)
        };
        Self {
            path: short_path.clone(),
            short_path,
            root: String::new(),
            owner: None,
            is_source: true,
            is_directory: false,
            is_symlink: false,
        }
    }

    /// A derived file under an output root.
    pub fn derived(root: &str, root_relative: &str, owner: Option<Label>) -> Self {
        let path = if root.is_empty() {
            root_relative.to_owned()
        } else {
            format!("{}/{}", root, root_relative)
        };
        Self {
            path,
            short_path: root_relative.to_owned(),
            root: root.to_owned(),
            owner,
            is_source: false,
            is_directory: false,
            is_symlink: false,
        }
    }

    /// A derived tree artifact (directory).
    pub fn tree(root: &str, root_relative: &str, owner: Option<Label>) -> Self {
        let mut f = Self::derived(root, root_relative, owner);
        f.is_directory = true;
        f
    }

    /// A declared symlink.
    pub fn symlink(root: &str, root_relative: &str, owner: Option<Label>) -> Self {
        let mut f = Self::derived(root, root_relative, owner);
        f.is_symlink = true;
        f
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn short_path(&self) -> &str {
        &self.short_path
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn owner(&self) -> Option<&Label> {
        self.owner.as_ref()
    }

    pub fn is_source(&self) -> bool {
        self.is_source
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn is_symlink(&self) -> bool {
        self.is_symlink
    }

    pub fn basename(&self) -> &str {
        match self.path.rsplit_once('/') {
            Some((_, base)) => base,
            None => &self.path,
        }
    }

    pub fn dirname(&self) -> &str {
        match self.path.rsplit_once('/') {
            Some((dir, _)) => dir,
            None => "",
        }
    }

    /// Directory part of the root-relative path.
    pub fn dirname_short(&self) -> &str {
        match self.short_path.rsplit_once('/') {
            Some((dir, _)) => dir,
            None => "",
        }
    }

    pub fn extension(&self) -> &str {
        match self.basename().rsplit_once('.') {
            Some((_, ext)) => ext,
            None => "",
        }
    }
}

impl fmt::Display for StarlarkFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_source {
            write!(f, "<source file {}>", self.short_path)
        } else {
            write!(f, "<generated file {}>", self.short_path)
        }
    }
}

#[starlark_value(type = "File")]
impl<'v> StarlarkValue<'v> for StarlarkFile {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(file_methods)
    }

    fn equals(&self, other: Value<'v>) -> starlark::Result<bool> {
        Ok(matches!(
            other.downcast_ref::<StarlarkFile>(),
            Some(o) if o.path == self.path && o.root == self.root
        ))
    }

    fn compare(&self, other: Value<'v>) -> starlark::Result<Ordering> {
        match other.downcast_ref::<StarlarkFile>() {
            Some(other) => Ok(self.path.cmp(&other.path)),
            None => Err(starlark::Error::new_other(anyhow::anyhow!(
                "cannot compare File with {}",
                other.get_type()
            ))),
        }
    }

    fn write_hash(&self, hasher: &mut StarlarkHasher) -> starlark::Result<()> {
        self.path.hash(hasher);
        Ok(())
    }
}

#[starlark_module]
fn file_methods(builder: &mut MethodsBuilder) {
    /// The exec-root-relative path.
    #[starlark(attribute)]
    fn path<'v>(this: &'v StarlarkFile) -> anyhow::Result<&'v str> {
        Ok(&this.path)
    }

    /// The path relative to the file's root.
    #[starlark(attribute)]
    fn short_path<'v>(this: &'v StarlarkFile) -> anyhow::Result<&'v str> {
        Ok(&this.short_path)
    }

    #[starlark(attribute)]
    fn basename<'v>(this: &'v StarlarkFile) -> anyhow::Result<&'v str> {
        Ok(this.basename())
    }

    #[starlark(attribute)]
    fn dirname<'v>(this: &'v StarlarkFile) -> anyhow::Result<&'v str> {
        Ok(this.dirname())
    }

    /// The extension following the rightmost period, or "".
    #[starlark(attribute)]
    fn extension<'v>(this: &'v StarlarkFile) -> anyhow::Result<&'v str> {
        Ok(this.extension())
    }

    #[starlark(attribute)]
    fn root(this: &StarlarkFile) -> anyhow::Result<StarlarkFileRoot> {
        Ok(StarlarkFileRoot::new(this.root.clone()))
    }

    /// The label of the target that produced this file, or None.
    #[starlark(attribute)]
    fn owner<'v>(this: &StarlarkFile, heap: &'v Heap) -> anyhow::Result<Value<'v>> {
        Ok(match &this.owner {
            Some(label) => heap.alloc(crate::types::label::StarlarkLabel::new(label.clone())),
            None => Value::new_none(),
        })
    }

    #[starlark(attribute)]
    fn is_source(this: &StarlarkFile) -> anyhow::Result<bool> {
        Ok(this.is_source)
    }

    #[starlark(attribute)]
    fn is_directory(this: &StarlarkFile) -> anyhow::Result<bool> {
        Ok(this.is_directory)
    }

    #[starlark(attribute)]
    fn is_symlink(this: &StarlarkFile) -> anyhow::Result<bool> {
        Ok(this.is_symlink)
    }

    /// Only defined for tree artifact children.
    #[starlark(attribute)]
    fn tree_relative_path(this: &StarlarkFile) -> anyhow::Result<String> {
        let _ = this;
        anyhow::bail!("tree_relative_path not allowed for files that are not tree artifact files")
    }
}

/// A single runfiles symlink: a path in the runfiles tree plus its target.
#[derive(Debug, Clone, PartialEq, Eq, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkSymlinkEntry {
    path: String,
    target: StarlarkFile,
}

starlark_simple_value!(StarlarkSymlinkEntry);

impl StarlarkSymlinkEntry {
    pub fn new(path: impl Into<String>, target: StarlarkFile) -> Self {
        Self {
            path: path.into(),
            target,
        }
    }
}

impl fmt::Display for StarlarkSymlinkEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SymlinkEntry(path = {:?}, target_file = {})",
            self.path, self.target
        )
    }
}

#[starlark_value(type = "SymlinkEntry")]
impl<'v> StarlarkValue<'v> for StarlarkSymlinkEntry {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(symlink_entry_methods)
    }
}

#[starlark_module]
fn symlink_entry_methods(builder: &mut MethodsBuilder) {
    /// The symlink path in the runfiles tree.
    #[starlark(attribute)]
    fn path<'v>(this: &'v StarlarkSymlinkEntry) -> anyhow::Result<&'v str> {
        Ok(&this.path)
    }

    #[starlark(attribute)]
    fn target_file(this: &StarlarkSymlinkEntry) -> anyhow::Result<StarlarkFile> {
        Ok(this.target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_accessors() {
        let f = StarlarkFile::source("some/pkg", "lib/a.cc");
        assert_eq!(f.path(), "some/pkg/lib/a.cc");
        assert_eq!(f.short_path(), "some/pkg/lib/a.cc");
        assert_eq!(f.basename(), "a.cc");
        assert_eq!(f.dirname(), "some/pkg/lib");
        assert_eq!(f.extension(), "cc");
        assert!(f.is_source());
    }

    #[test]
    fn derived_file_paths() {
        let f = StarlarkFile::derived("bazel-out/bin", "pkg/out.txt", None);
        assert_eq!(f.path(), "bazel-out/bin/pkg/out.txt");
        assert_eq!(f.short_path(), "pkg/out.txt");
        assert!(!f.is_source());
        assert_eq!(f.root(), "bazel-out/bin");
    }

    #[test]
    fn extension_of_extensionless_file() {
        let f = StarlarkFile::source("", "Makefile");
        assert_eq!(f.extension(), "");
        assert_eq!(f.dirname(), "");
    }
}
