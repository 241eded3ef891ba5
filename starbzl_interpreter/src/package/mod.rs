//! Per-package state for BUILD evaluation, and the package-level builtins.

pub mod existing_rules;
pub mod glob;
pub mod native;

use std::cell::Cell;
use std::cell::RefCell;
use std::sync::Arc;

use starlark::environment::GlobalsBuilder;
use starlark::starlark_module;
use starlark::values::none::NoneOr;
use starlark::values::none::NoneType;
use starlark::values::Value;
use starbzl_core::BuildFileLocator;
use starbzl_core::FileSystem;
use starbzl_core::Label;
use thiserror::Error;

use crate::interpreter::build_context::BuildContext;
use crate::nodes::RuleInstance;
use crate::nodes::TargetsMap;
use crate::util::string_elements;

#[derive(Debug, Error)]
enum PackageError {
    #[error("duplicate target name \"{0}\" in package \"{1}\"")]
    DuplicateTarget(String, String),
    #[error("package() can only be used once per BUILD file")]
    PackageCalledTwice,
}

/// The state of one BUILD file evaluation: the package identity, the
/// accumulated targets, and the package-level defaults.
///
/// Reached through the evaluation context; every native function fails
/// outside BUILD evaluation because no `PackageContext` is present.
pub struct PackageContext {
    package_path: String,
    repo_name: String,
    package_dir: String,
    build_file_path: String,
    fs: Arc<dyn FileSystem>,
    locator: Arc<dyn BuildFileLocator>,
    targets: RefCell<TargetsMap>,
    default_visibility: RefCell<Vec<String>>,
    default_testonly: Cell<bool>,
    default_deprecation: RefCell<Option<String>>,
    exported_files: RefCell<Vec<String>>,
    package_called: Cell<bool>,
}

impl PackageContext {
    pub fn new(
        package_path: String,
        repo_name: String,
        package_dir: String,
        build_file_path: String,
        fs: Arc<dyn FileSystem>,
        locator: Arc<dyn BuildFileLocator>,
    ) -> Self {
        Self {
            package_path,
            repo_name,
            package_dir,
            build_file_path,
            fs,
            locator,
            targets: RefCell::new(TargetsMap::new()),
            default_visibility: RefCell::new(Vec::new()),
            default_testonly: Cell::new(false),
            default_deprecation: RefCell::new(None),
            exported_files: RefCell::new(Vec::new()),
            package_called: Cell::new(false),
        }
    }

    pub fn package_path(&self) -> &str {
        &self.package_path
    }

    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    pub fn package_dir(&self) -> &str {
        &self.package_dir
    }

    pub fn build_file_path(&self) -> &str {
        &self.build_file_path
    }

    pub(crate) fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub(crate) fn locator(&self) -> &Arc<dyn BuildFileLocator> {
        &self.locator
    }

    /// Resolves a label string relative to this package.
    pub fn resolve_label(&self, input: &str) -> anyhow::Result<Label> {
        Ok(Label::parse_relative(
            input,
            &self.repo_name,
            &self.package_path,
        )?)
    }

    /// Registers a target; a second target with the same name fails.
    pub fn register_target(&self, instance: RuleInstance) -> anyhow::Result<()> {
        let mut targets = self.targets.borrow_mut();
        let name = instance.name().to_owned();
        if targets.contains_key(&name) {
            return Err(
                PackageError::DuplicateTarget(name, self.package_path.clone()).into(),
            );
        }
        targets.insert(name, instance);
        Ok(())
    }

    pub fn target_names(&self) -> Vec<String> {
        self.targets.borrow().keys().cloned().collect()
    }

    pub fn get_target(&self, name: &str) -> Option<RuleInstance> {
        self.targets.borrow().get(name).cloned()
    }

    /// Snapshot of all targets, in registration order.
    pub fn targets_snapshot(&self) -> TargetsMap {
        self.targets.borrow().clone()
    }

    pub(crate) fn into_targets(self) -> TargetsMap {
        self.targets.into_inner()
    }

    fn set_defaults(
        &self,
        visibility: Option<Vec<String>>,
        testonly: Option<bool>,
        deprecation: Option<String>,
    ) -> anyhow::Result<()> {
        if self.package_called.replace(true) {
            return Err(PackageError::PackageCalledTwice.into());
        }
        if let Some(visibility) = visibility {
            *self.default_visibility.borrow_mut() = visibility;
        }
        if let Some(testonly) = testonly {
            self.default_testonly.set(testonly);
        }
        if let Some(deprecation) = deprecation {
            *self.default_deprecation.borrow_mut() = Some(deprecation);
        }
        Ok(())
    }

    pub fn default_visibility(&self) -> Vec<String> {
        self.default_visibility.borrow().clone()
    }

    pub fn default_testonly(&self) -> bool {
        self.default_testonly.get()
    }

    pub fn default_deprecation(&self) -> Option<String> {
        self.default_deprecation.borrow().clone()
    }

    fn export_files(&self, srcs: Vec<String>) {
        self.exported_files.borrow_mut().extend(srcs);
    }

    pub fn exported_files(&self) -> Vec<String> {
        self.exported_files.borrow().clone()
    }
}

pub(crate) fn package_context_from_evaluator<'a, 'v>(
    eval: &starlark::eval::Evaluator<'v, 'a, '_>,
    function: &str,
) -> anyhow::Result<&'a PackageContext> {
    let build_ctx = BuildContext::from_evaluator(eval)?;
    build_ctx.package().ok_or_else(|| {
        anyhow::anyhow!(
            "{}() can only be called during BUILD file evaluation",
            function
        )
    })
}

/// `package()`, `licenses()` and `exports_files()`.
#[starlark_module]
pub(crate) fn register_package_functions(globals: &mut GlobalsBuilder) {
    /// Sets package-level defaults. May be called at most once.
    fn package<'v>(
        #[starlark(require = named, default = NoneOr::None)] default_visibility: NoneOr<
            Value<'v>,
        >,
        #[starlark(require = named, default = NoneOr::None)] default_testonly: NoneOr<bool>,
        #[starlark(require = named, default = NoneOr::None)] default_deprecation: NoneOr<&str>,
        #[starlark(require = named, default = NoneOr::None)] features: NoneOr<Value<'v>>,
        eval: &mut starlark::eval::Evaluator<'v, '_, '_>,
    ) -> anyhow::Result<NoneType> {
        let package = package_context_from_evaluator(eval, "package")?;
        let visibility = match default_visibility.into_option() {
            Some(v) => Some(string_elements("default_visibility", v)?),
            None => None,
        };
        // Features take effect during analysis, which never runs here.
        let _ = features;
        package.set_defaults(
            visibility,
            default_testonly.into_option(),
            default_deprecation.into_option().map(str::to_owned),
        )?;
        Ok(NoneType)
    }

    /// Deprecated; accepted for compatibility and otherwise inert.
    fn licenses<'v>(#[starlark(require = pos)] licenses: Value<'v>) -> anyhow::Result<NoneType> {
        let _ = licenses;
        Ok(NoneType)
    }

    /// Declares that files may be referenced from other packages.
    fn exports_files<'v>(
        #[starlark(require = pos)] srcs: Value<'v>,
        #[starlark(require = named, default = NoneOr::None)] visibility: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] licenses: NoneOr<Value<'v>>,
        eval: &mut starlark::eval::Evaluator<'v, '_, '_>,
    ) -> anyhow::Result<NoneType> {
        let package = package_context_from_evaluator(eval, "exports_files")?;
        let srcs = string_elements("srcs", srcs)?;
        let _ = visibility;
        let _ = licenses;
        package.export_files(srcs);
        Ok(NoneType)
    }
}
