//! `aspect()`: rule-like values that traverse dependency edges.

use std::cell::RefCell;
use std::fmt;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::collections::SmallMap;
use starlark::environment::GlobalsBuilder;
use starlark::eval::Evaluator;
use starlark::starlark_module;
use starlark::starlark_simple_value;
use starlark::values::dict::DictRef;
use starlark::values::none::NoneOr;
use starlark::values::starlark_value;
use starlark::values::AllocValue;
use starlark::values::Freeze;
use starlark::values::Freezer;
use starlark::values::FrozenValue;
use starlark::values::Heap;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Trace;
use starlark::values::Value;

use crate::attrs::AttrDescriptor;
use crate::attrs::AttrKind;
use crate::rule::is_valid_attr_name;
use crate::util::iterable_elements;
use crate::util::string_elements;

/// How an aspect propagates along the dependency graph.
#[derive(Debug, Trace, Allocative)]
pub struct AspectTraversal<'v> {
    /// Attribute names to follow; `["*"]` follows every label attribute.
    #[trace(unsafe_ignore)]
    pub attr_aspects: Vec<String>,
    /// Optional predicate filtering propagation per target.
    pub propagation_predicate: Option<Value<'v>>,
}

/// The result of `aspect()` before freezing. Unnamed until exported.
#[derive(Debug, ProvidesStaticType, NoSerialize, Trace, Allocative)]
pub struct AspectClass<'v> {
    #[trace(unsafe_ignore)]
    #[allocative(skip)]
    name: RefCell<Option<String>>,
    implementation: Value<'v>,
    traversal: AspectTraversal<'v>,
    attrs: SmallMap<String, Value<'v>>,
    required_providers: Vec<Value<'v>>,
    required_aspect_providers: Vec<Value<'v>>,
    provides: Vec<Value<'v>>,
    requires: Vec<Value<'v>>,
    #[trace(unsafe_ignore)]
    fragments: Vec<String>,
    toolchains: Vec<Value<'v>>,
    toolchains_aspects: Vec<Value<'v>>,
    apply_to_generating_rules: bool,
    exec_compatible_with: Vec<Value<'v>>,
    exec_groups: Option<Value<'v>>,
    #[trace(unsafe_ignore)]
    doc: Option<String>,
}

impl<'v> fmt::Display for AspectClass<'v> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.name.borrow() {
            Some(name) => write!(f, "<aspect {}>", name),
            None => write!(f, "<aspect>"),
        }
    }
}

impl<'v> AllocValue<'v> for AspectClass<'v> {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex(self)
    }
}

impl<'v> Freeze for AspectClass<'v> {
    type Frozen = FrozenAspectClass;
    fn freeze(self, freezer: &Freezer) -> anyhow::Result<Self::Frozen> {
        Ok(FrozenAspectClass {
            name: self.name.into_inner(),
            implementation: self.implementation.freeze(freezer)?,
            attr_aspects: self.traversal.attr_aspects,
            propagation_predicate: self.traversal.propagation_predicate.freeze(freezer)?,
            attrs: self.attrs.freeze(freezer)?,
            required_providers: self.required_providers.freeze(freezer)?,
            required_aspect_providers: self.required_aspect_providers.freeze(freezer)?,
            provides: self.provides.freeze(freezer)?,
            requires: self.requires.freeze(freezer)?,
            fragments: self.fragments,
            toolchains: self.toolchains.freeze(freezer)?,
            toolchains_aspects: self.toolchains_aspects.freeze(freezer)?,
            apply_to_generating_rules: self.apply_to_generating_rules,
            exec_compatible_with: self.exec_compatible_with.freeze(freezer)?,
            exec_groups: self.exec_groups.freeze(freezer)?,
            doc: self.doc,
        })
    }
}

#[starlark_value(type = "aspect")]
impl<'v> StarlarkValue<'v> for AspectClass<'v> {
    fn export_as(
        &self,
        variable_name: &str,
        _eval: &mut Evaluator<'v, '_, '_>,
    ) -> starlark::Result<()> {
        let mut name = self.name.borrow_mut();
        if name.is_none() {
            *name = Some(variable_name.to_owned());
        }
        Ok(())
    }
}

/// An aspect whose defining module has been frozen.
#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct FrozenAspectClass {
    name: Option<String>,
    implementation: FrozenValue,
    attr_aspects: Vec<String>,
    propagation_predicate: Option<FrozenValue>,
    attrs: SmallMap<String, FrozenValue>,
    required_providers: Vec<FrozenValue>,
    required_aspect_providers: Vec<FrozenValue>,
    provides: Vec<FrozenValue>,
    requires: Vec<FrozenValue>,
    fragments: Vec<String>,
    toolchains: Vec<FrozenValue>,
    toolchains_aspects: Vec<FrozenValue>,
    apply_to_generating_rules: bool,
    exec_compatible_with: Vec<FrozenValue>,
    exec_groups: Option<FrozenValue>,
    doc: Option<String>,
}

starlark_simple_value!(FrozenAspectClass);

impl FrozenAspectClass {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn attr_aspects(&self) -> &[String] {
        &self.attr_aspects
    }
}

impl fmt::Display for FrozenAspectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<aspect {}>", name),
            None => write!(f, "<aspect>"),
        }
    }
}

#[starlark_value(type = "aspect")]
impl<'v> StarlarkValue<'v> for FrozenAspectClass {
    type Canonical = AspectClass<'v>;
}

#[starlark_module]
pub(crate) fn register_aspect(globals: &mut GlobalsBuilder) {
    /// Declares an aspect. Implicit (underscore) attributes must be label
    /// typed with a default; explicit ones must be bool, int or string.
    fn aspect<'v>(
        implementation: Value<'v>,
        #[starlark(require = named, default = NoneOr::None)] attr_aspects: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] toolchains_aspects: NoneOr<
            Value<'v>,
        >,
        #[starlark(require = named, default = NoneOr::None)] attrs: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] required_providers: NoneOr<
            Value<'v>,
        >,
        #[starlark(require = named, default = NoneOr::None)] required_aspect_providers: NoneOr<
            Value<'v>,
        >,
        #[starlark(require = named, default = NoneOr::None)] provides: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] requires: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] propagation_predicate: NoneOr<
            Value<'v>,
        >,
        #[starlark(require = named, default = NoneOr::None)] fragments: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] host_fragments: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] toolchains: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
        #[starlark(require = named, default = false)] apply_to_generating_rules: bool,
        #[starlark(require = named, default = NoneOr::None)] exec_compatible_with: NoneOr<
            Value<'v>,
        >,
        #[starlark(require = named, default = NoneOr::None)] exec_groups: NoneOr<Value<'v>>,
    ) -> anyhow::Result<AspectClass<'v>> {
        let _ = host_fragments;

        let attr_aspects = match attr_aspects.into_option() {
            Some(v) => string_elements("attr_aspects", v)?,
            None => Vec::new(),
        };

        let mut attr_map: SmallMap<String, Value<'v>> = SmallMap::new();
        if let Some(attrs) = attrs.into_option() {
            let dict = DictRef::from_value(attrs)
                .ok_or_else(|| anyhow::anyhow!("aspect: attrs must be a dict"))?;
            for (key, value) in dict.iter() {
                let name = key
                    .unpack_str()
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "aspect: attrs keys must be strings, got {}",
                            key.get_type()
                        )
                    })?
                    .to_owned();
                if !is_valid_attr_name(&name) {
                    anyhow::bail!(
                        "aspect: attribute name \"{}\" is not a valid identifier",
                        name
                    );
                }
                let descriptor = AttrDescriptor::from_value(value).ok_or_else(|| {
                    anyhow::anyhow!(
                        "aspect: attrs values must be attr objects, got {} for \"{}\"",
                        value.get_type(),
                        name
                    )
                })?;
                if name.starts_with('_') {
                    match descriptor.kind() {
                        AttrKind::Label | AttrKind::LabelList => {}
                        _ => anyhow::bail!(
                            "aspect: implicit attribute \"{}\" must have type label or label_list",
                            name
                        ),
                    }
                    match descriptor.default_value() {
                        Some(v) if !v.is_none() => {}
                        _ => anyhow::bail!(
                            "aspect: implicit attribute \"{}\" has no default value",
                            name
                        ),
                    }
                } else {
                    match descriptor.kind() {
                        AttrKind::Bool | AttrKind::Int | AttrKind::String => {}
                        _ => anyhow::bail!(
                            "aspect: explicit attribute \"{}\" must have type bool, int, or string",
                            name
                        ),
                    }
                }
                attr_map.insert(name, value);
            }
        }

        let propagation_predicate = propagation_predicate.into_option();
        let required_providers = match required_providers.into_option() {
            Some(v) => iterable_elements("required_providers", v)?,
            None => Vec::new(),
        };
        if apply_to_generating_rules && !required_providers.is_empty() {
            anyhow::bail!(
                "aspect: cannot have both apply_to_generating_rules=True and required_providers"
            );
        }
        if apply_to_generating_rules && propagation_predicate.is_some() {
            anyhow::bail!(
                "aspect: cannot have both apply_to_generating_rules=True and propagation_predicate"
            );
        }

        let list_or_empty = |v: NoneOr<Value<'v>>, what: &str| -> anyhow::Result<Vec<Value<'v>>> {
            match v.into_option() {
                Some(v) => iterable_elements(what, v),
                None => Ok(Vec::new()),
            }
        };

        Ok(AspectClass {
            name: RefCell::new(None),
            implementation,
            traversal: AspectTraversal {
                attr_aspects,
                propagation_predicate,
            },
            attrs: attr_map,
            required_providers,
            required_aspect_providers: list_or_empty(
                required_aspect_providers,
                "required_aspect_providers",
            )?,
            provides: list_or_empty(provides, "provides")?,
            requires: list_or_empty(requires, "requires")?,
            fragments: match fragments.into_option() {
                Some(v) => string_elements("fragments", v)?,
                None => Vec::new(),
            },
            toolchains: list_or_empty(toolchains, "toolchains")?,
            toolchains_aspects: list_or_empty(toolchains_aspects, "toolchains_aspects")?,
            apply_to_generating_rules,
            exec_compatible_with: list_or_empty(exec_compatible_with, "exec_compatible_with")?,
            exec_groups: exec_groups.into_option(),
            doc: doc.into_option().map(str::to_owned),
        })
    }
}
