//! Predeclared environments and dialects for `.bzl` and BUILD files.

use starlark::environment::Globals;
use starlark::environment::GlobalsBuilder;
use starlark::environment::LibraryExtension;
use starlark::starlark_module;
use starlark::syntax::Dialect;
use starlark::syntax::DialectTypes;
use starlark::values::Heap;
use starlark::values::Value;

use crate::aspect::register_aspect;
use crate::attrs::register_attrs;
use crate::package::native::register_native_functions;
use crate::package::register_package_functions;
use crate::providers::register_builtin_providers;
use crate::rule::register_rule;
use crate::selector::register_select;
use crate::types::depset::register_depset;
use crate::types::label::register_label;
use crate::types::provider::register_provider;
use crate::types::provider::ProviderInstance;

/// The host-library extensions shared by both file kinds: `struct`,
/// `print` and the json namespace.
fn base_builder() -> GlobalsBuilder {
    GlobalsBuilder::extended_by(&[
        LibraryExtension::StructType,
        LibraryExtension::Print,
        LibraryExtension::Json,
    ])
}

/// The host's `type()` answers with one name per value type; the dialect
/// requires provider instances to answer with their schema's name, so the
/// predeclared environment carries this replacement.
#[starlark_module]
fn register_type_builtin(globals: &mut GlobalsBuilder) {
    /// The name of the argument's type. Provider instances report the name
    /// of the provider that created them.
    fn r#type<'v>(
        #[starlark(require = pos)] a: Value<'v>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        if let Some(instance) = ProviderInstance::from_value(a) {
            return Ok(heap.alloc(instance.provider_name()));
        }
        Ok(heap.alloc(a.get_type()))
    }
}

/// The predeclared environment for `.bzl` modules.
pub(crate) fn bzl_globals() -> Globals {
    let mut builder = base_builder()
        .with(register_type_builtin)
        .with(register_label)
        .with(register_depset)
        .with(register_select)
        .with(register_provider)
        .with(register_rule)
        .with(register_aspect);
    builder.struct_("attr", register_attrs);
    register_builtin_providers(&mut builder);
    builder.build()
}

/// The predeclared environment for BUILD files: no rule/provider/aspect
/// declarations, but the package machinery and the `native` namespace,
/// whose members are also available unqualified.
pub(crate) fn build_globals() -> Globals {
    let mut builder = base_builder()
        .with(register_type_builtin)
        .with(register_label)
        .with(register_depset)
        .with(register_select)
        .with(register_package_functions)
        .with(register_native_functions);
    builder.struct_("native", register_native_functions);
    builder.build()
}

/// `.bzl` files use the extended dialect.
pub(crate) fn bzl_dialect() -> Dialect {
    Dialect {
        enable_def: true,
        enable_lambda: true,
        enable_load: true,
        enable_keyword_only_arguments: true,
        enable_types: DialectTypes::ParseOnly,
        enable_top_level_stmt: true,
        ..Dialect::Standard
    }
}

/// BUILD files may not define functions.
pub(crate) fn build_dialect() -> Dialect {
    Dialect {
        enable_def: false,
        ..bzl_dialect()
    }
}
