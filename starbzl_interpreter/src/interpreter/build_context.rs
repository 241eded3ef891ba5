//! Per-evaluation context, reachable from `Evaluator::extra`.
//!
//! Every native function that needs the current package or repository goes
//! through here; its absence (or the absence of a `PackageContext`) is what
//! makes BUILD-only functions fail elsewhere.

use starlark::any::ProvidesStaticType;
use starlark::eval::Evaluator;

use crate::package::PackageContext;

/// Which kind of file this evaluation is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Bzl,
    Build,
}

#[derive(ProvidesStaticType)]
pub struct BuildContext {
    file_kind: FileKind,
    current_repo: String,
    current_pkg: String,
    package: Option<PackageContext>,
}

impl BuildContext {
    pub(crate) fn for_bzl(current_repo: String, current_pkg: String) -> Self {
        Self {
            file_kind: FileKind::Bzl,
            current_repo,
            current_pkg,
            package: None,
        }
    }

    pub(crate) fn for_build(package: PackageContext) -> Self {
        Self {
            file_kind: FileKind::Build,
            current_repo: package.repo_name().to_owned(),
            current_pkg: package.package_path().to_owned(),
            package: Some(package),
        }
    }

    pub fn file_kind(&self) -> FileKind {
        self.file_kind
    }

    pub fn current_repo(&self) -> &str {
        &self.current_repo
    }

    pub fn current_pkg(&self) -> &str {
        &self.current_pkg
    }

    pub fn package(&self) -> Option<&PackageContext> {
        self.package.as_ref()
    }

    pub(crate) fn into_package(self) -> Option<PackageContext> {
        self.package
    }

    /// The context of the running evaluation.
    pub fn from_evaluator<'a>(eval: &Evaluator<'_, 'a, '_>) -> anyhow::Result<&'a BuildContext> {
        let extra = eval
            .extra
            .ok_or_else(|| anyhow::anyhow!("no evaluation context is attached to this thread"))?;
        extra
            .downcast_ref::<BuildContext>()
            .ok_or_else(|| anyhow::anyhow!("evaluation context has an unexpected type"))
    }
}
