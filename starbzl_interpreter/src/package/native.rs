//! The `native` helper namespace available during BUILD evaluation.
//!
//! These functions are registered both at the top level of the BUILD
//! predeclared environment and under the `native` namespace for macros.

use starlark::environment::GlobalsBuilder;
use starlark::starlark_module;
use starlark::values::list::AllocList;
use starlark::values::none::NoneOr;
use starlark::values::Heap;
use starlark::values::Value;

use crate::package::existing_rules::ExistingRuleView;
use crate::package::existing_rules::ExistingRulesView;
use crate::package::glob as glob_impl;
use crate::package::package_context_from_evaluator;
use crate::types::label::StarlarkLabel;
use crate::util::string_elements;

#[starlark_module]
pub(crate) fn register_native_functions(globals: &mut GlobalsBuilder) {
    /// Every file in the package matching at least one include pattern and
    /// no exclude pattern, as a sorted list of package-relative paths.
    fn glob<'v>(
        #[starlark(default = NoneOr::None)] include: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] exclude: NoneOr<Value<'v>>,
        #[starlark(require = named, default = 1)] exclude_directories: i32,
        #[starlark(require = named, default = NoneOr::None)] allow_empty: NoneOr<bool>,
        eval: &mut starlark::eval::Evaluator<'v, '_, '_>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        let package = package_context_from_evaluator(eval, "glob")?;
        let include = match include.into_option() {
            Some(v) => string_elements("include", v)?,
            None => Vec::new(),
        };
        let exclude = match exclude.into_option() {
            Some(v) => string_elements("exclude", v)?,
            None => Vec::new(),
        };
        let include_dirs = exclude_directories == 0;

        let matches = glob_impl::glob(
            &**package.fs(),
            &**package.locator(),
            package.package_dir(),
            &include,
            &exclude,
            include_dirs,
        )?;

        if !allow_empty.into_option().unwrap_or(true) && matches.is_empty() {
            anyhow::bail!("glob pattern(s) {:?} matched no files", include);
        }

        // A leading `@` would read as a repository name in a label; prefix
        // such results with `:` to keep them package-relative.
        let values: Vec<String> = matches
            .into_iter()
            .map(|m| {
                if m.starts_with('@') {
                    format!(":{}", m)
                } else {
                    m
                }
            })
            .collect();
        Ok(heap.alloc(AllocList(values)))
    }

    /// The attributes of a target declared so far, or None.
    fn existing_rule<'v>(
        #[starlark(require = pos)] name: &str,
        eval: &mut starlark::eval::Evaluator<'v, '_, '_>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        let package = package_context_from_evaluator(eval, "existing_rule")?;
        Ok(match package.get_target(name) {
            Some(instance) => heap.alloc(ExistingRuleView::from_instance(&instance)),
            None => Value::new_none(),
        })
    }

    /// A snapshot of all targets declared so far, keyed by name.
    fn existing_rules<'v>(
        eval: &mut starlark::eval::Evaluator<'v, '_, '_>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        let package = package_context_from_evaluator(eval, "existing_rules")?;
        let views = package
            .targets_snapshot()
            .values()
            .map(ExistingRuleView::from_instance)
            .collect();
        Ok(heap.alloc(ExistingRulesView::new(views)))
    }

    /// The package path, without the repository; "" for the root package.
    fn package_name(
        eval: &mut starlark::eval::Evaluator<'_, '_, '_>,
    ) -> anyhow::Result<String> {
        let package = package_context_from_evaluator(eval, "package_name")?;
        Ok(package.package_path().to_owned())
    }

    /// The repository name with a leading `@`. Deprecated; use repo_name.
    fn repository_name(
        eval: &mut starlark::eval::Evaluator<'_, '_, '_>,
    ) -> anyhow::Result<String> {
        let package = package_context_from_evaluator(eval, "repository_name")?;
        Ok(format!("@{}", package.repo_name()))
    }

    /// The repository name without decoration; "" for the main repository.
    fn repo_name(eval: &mut starlark::eval::Evaluator<'_, '_, '_>) -> anyhow::Result<String> {
        let package = package_context_from_evaluator(eval, "repo_name")?;
        Ok(package.repo_name().to_owned())
    }

    /// Converts a string to a Label in the context of this package. A Label
    /// input is returned unchanged.
    fn package_relative_label<'v>(
        #[starlark(require = pos)] input: Value<'v>,
        eval: &mut starlark::eval::Evaluator<'v, '_, '_>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        let package = package_context_from_evaluator(eval, "package_relative_label")?;
        if input.downcast_ref::<StarlarkLabel>().is_some() {
            return Ok(input);
        }
        let s = input.unpack_str().ok_or_else(|| {
            anyhow::anyhow!(
                "invalid label in package_relative_label: expected string or Label, got {}",
                input.get_type()
            )
        })?;
        let label = package.resolve_label(s)?;
        Ok(heap.alloc(StarlarkLabel::new(label)))
    }

    /// Direct subpackages of this package matching the patterns.
    fn subpackages<'v>(
        #[starlark(require = named)] include: Value<'v>,
        #[starlark(require = named, default = NoneOr::None)] exclude: NoneOr<Value<'v>>,
        #[starlark(require = named, default = false)] allow_empty: bool,
        eval: &mut starlark::eval::Evaluator<'v, '_, '_>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        let package = package_context_from_evaluator(eval, "subpackages")?;
        let include = string_elements("include", include)?;
        let exclude = match exclude.into_option() {
            Some(v) => string_elements("exclude", v)?,
            None => Vec::new(),
        };
        let matches = glob_impl::subpackages(
            &**package.fs(),
            &**package.locator(),
            package.package_dir(),
            &include,
            &exclude,
        )?;
        if !allow_empty && matches.is_empty() {
            anyhow::bail!("subpackages pattern(s) {:?} matched no subpackages", include);
        }
        Ok(heap.alloc(AllocList(matches)))
    }
}
