//! The `Label` value and the `Label()` builtin.

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::collections::StarlarkHasher;
use starlark::environment::GlobalsBuilder;
use starlark::environment::Methods;
use starlark::environment::MethodsBuilder;
use starlark::environment::MethodsStatic;
use starlark::starlark_module;
use starlark::starlark_simple_value;
use starlark::values::starlark_value;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Value;
use starlark::values::ValueLike;
use starbzl_core::Label;

/// A canonical label lifted into the Starlark heap.
#[derive(Debug, Clone, PartialEq, Eq, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkLabel {
    label: Label,
}

starlark_simple_value!(StarlarkLabel);

impl StarlarkLabel {
    pub fn new(label: Label) -> Self {
        Self { label }
    }

    pub fn label(&self) -> &Label {
        &self.label
    }
}

impl fmt::Display for StarlarkLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.label, f)
    }
}

#[starlark_value(type = "Label")]
impl<'v> StarlarkValue<'v> for StarlarkLabel {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(label_methods)
    }

    fn equals(&self, other: Value<'v>) -> starlark::Result<bool> {
        Ok(match other.downcast_ref::<StarlarkLabel>() {
            Some(other) => self.label == other.label,
            None => false,
        })
    }

    fn compare(&self, other: Value<'v>) -> starlark::Result<Ordering> {
        match other.downcast_ref::<StarlarkLabel>() {
            Some(other) => Ok(self.label.cmp(&other.label)),
            None => Err(starlark::Error::new_other(anyhow::anyhow!(
                "cannot compare Label with {}",
                other.get_type()
            ))),
        }
    }

    fn write_hash(&self, hasher: &mut StarlarkHasher) -> starlark::Result<()> {
        self.label.to_string().hash(hasher);
        Ok(())
    }
}

#[starlark_module]
fn label_methods(builder: &mut MethodsBuilder) {
    /// The target name.
    #[starlark(attribute)]
    fn name<'v>(this: &'v StarlarkLabel) -> anyhow::Result<&'v str> {
        Ok(this.label.name())
    }

    /// The package path.
    #[starlark(attribute)]
    fn package<'v>(this: &'v StarlarkLabel) -> anyhow::Result<&'v str> {
        Ok(this.label.pkg())
    }

    /// The repository name; empty for the main repository.
    #[starlark(attribute)]
    fn workspace_name<'v>(this: &'v StarlarkLabel) -> anyhow::Result<&'v str> {
        Ok(this.label.repo())
    }

    /// `external/<repo>` for external repositories, empty for the main one.
    #[starlark(attribute)]
    fn workspace_root(this: &StarlarkLabel) -> anyhow::Result<String> {
        if this.label.repo().is_empty() {
            Ok(String::new())
        } else {
            Ok(format!("external/{}", this.label.repo()))
        }
    }
}

#[starlark_module]
pub(crate) fn register_label(globals: &mut GlobalsBuilder) {
    #[allow(non_snake_case)]
    fn Label(#[starlark(require = pos)] label: &str) -> anyhow::Result<StarlarkLabel> {
        Ok(StarlarkLabel::new(starbzl_core::Label::parse(label)?))
    }
}
