//! `rule()`: schemas that declare targets when called in a BUILD file.

use std::cell::RefCell;
use std::fmt;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::collections::SmallMap;
use starlark::environment::GlobalsBuilder;
use starlark::eval::Arguments;
use starlark::eval::Evaluator;
use starlark::starlark_module;
use starlark::starlark_simple_value;
use starlark::values::dict::DictRef;
use starlark::values::list::ListRef;
use starlark::values::none::NoneOr;
use starlark::values::starlark_value;
use starlark::values::tuple::TupleRef;
use starlark::values::AllocValue;
use starlark::values::Freeze;
use starlark::values::Freezer;
use starlark::values::FrozenValue;
use starlark::values::Heap;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Trace;
use starlark::values::Value;
use starlark::values::ValueLike;
use starbzl_core::Label;

use crate::attrs::implicit_attr;
use crate::attrs::AttrDescriptor;
use crate::attrs::AttrKind;
use crate::coerced::CoercedValue;
use crate::interpreter::build_context::BuildContext;
use crate::nodes::RuleInstance;
use crate::selector::SelectorList;
use crate::selector::SelectorValue;
use crate::types::label::StarlarkLabel;
use crate::util::iterable_elements;
use crate::util::string_elements;
use crate::util::to_starlark_error;

/// Boolean rule class options.
#[derive(Debug, Clone, Copy, Default, Allocative)]
pub struct RuleFlags {
    pub test: bool,
    pub executable: bool,
    pub analysis_test: bool,
    pub output_to_genfiles: bool,
    pub dependency_resolution_rule: bool,
}

/// The result of `rule()` before freezing. Unnamed until exported.
#[derive(Debug, ProvidesStaticType, NoSerialize, Trace, Allocative)]
pub struct RuleClass<'v> {
    #[trace(unsafe_ignore)]
    #[allocative(skip)]
    name: RefCell<Option<String>>,
    implementation: Value<'v>,
    /// Attribute schemas by name, implicit attributes included.
    attrs: SmallMap<String, Value<'v>>,
    #[trace(unsafe_ignore)]
    flags: RuleFlags,
    #[trace(unsafe_ignore)]
    fragments: Vec<String>,
    toolchains: Vec<Value<'v>>,
    provides: Vec<Value<'v>>,
    exec_compatible_with: Vec<Value<'v>>,
    #[trace(unsafe_ignore)]
    doc: Option<String>,
    cfg: Option<Value<'v>>,
    exec_groups: Option<Value<'v>>,
    build_setting: Option<Value<'v>>,
    initializer: Option<Value<'v>>,
    parent: Option<Value<'v>>,
    subrules: Vec<Value<'v>>,
    extendable: Option<Value<'v>>,
}

impl<'v> fmt::Display for RuleClass<'v> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.name.borrow() {
            Some(name) => write!(f, "<rule {}>", name),
            None => write!(f, "<rule>"),
        }
    }
}

impl<'v> AllocValue<'v> for RuleClass<'v> {
    fn alloc_value(self, heap: &'v Heap) -> Value<'v> {
        heap.alloc_complex(self)
    }
}

impl<'v> Freeze for RuleClass<'v> {
    type Frozen = FrozenRuleClass;
    fn freeze(self, freezer: &Freezer) -> anyhow::Result<Self::Frozen> {
        Ok(FrozenRuleClass {
            name: self.name.into_inner(),
            implementation: self.implementation.freeze(freezer)?,
            attrs: self.attrs.freeze(freezer)?,
            flags: self.flags,
            fragments: self.fragments,
            toolchains: self.toolchains.freeze(freezer)?,
            provides: self.provides.freeze(freezer)?,
            exec_compatible_with: self.exec_compatible_with.freeze(freezer)?,
            doc: self.doc,
            cfg: self.cfg.freeze(freezer)?,
            exec_groups: self.exec_groups.freeze(freezer)?,
            build_setting: self.build_setting.freeze(freezer)?,
            initializer: self.initializer.freeze(freezer)?,
            parent: self.parent.freeze(freezer)?,
            subrules: self.subrules.freeze(freezer)?,
            extendable: self.extendable.freeze(freezer)?,
        })
    }
}

#[starlark_value(type = "rule")]
impl<'v> StarlarkValue<'v> for RuleClass<'v> {
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

    fn invoke(
        &self,
        _me: Value<'v>,
        args: &Arguments<'v, '_>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> starlark::Result<Value<'v>> {
        let attrs: Vec<(String, Value<'v>)> = self
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        call_rule(self.name.borrow().clone(), &attrs, self.flags, args, eval)
    }
}

/// A rule class whose defining module has been frozen.
#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct FrozenRuleClass {
    name: Option<String>,
    implementation: FrozenValue,
    attrs: SmallMap<String, FrozenValue>,
    flags: RuleFlags,
    fragments: Vec<String>,
    toolchains: Vec<FrozenValue>,
    provides: Vec<FrozenValue>,
    exec_compatible_with: Vec<FrozenValue>,
    doc: Option<String>,
    cfg: Option<FrozenValue>,
    exec_groups: Option<FrozenValue>,
    build_setting: Option<FrozenValue>,
    initializer: Option<FrozenValue>,
    parent: Option<FrozenValue>,
    subrules: Vec<FrozenValue>,
    extendable: Option<FrozenValue>,
}

starlark_simple_value!(FrozenRuleClass);

impl fmt::Display for FrozenRuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<rule {}>", name),
            None => write!(f, "<rule>"),
        }
    }
}

#[starlark_value(type = "rule")]
impl<'v> StarlarkValue<'v> for FrozenRuleClass {
    type Canonical = RuleClass<'v>;

    fn invoke(
        &self,
        _me: Value<'v>,
        args: &Arguments<'v, '_>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> starlark::Result<Value<'v>> {
        let attrs: Vec<(String, Value<'v>)> = self
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect();
        call_rule(self.name.clone(), &attrs, self.flags, args, eval)
    }
}

/// The pieces of a rule class needed outside the call path, regardless of
/// whether the value has been frozen.
pub(crate) struct RuleParts<'v> {
    pub name: Option<String>,
    pub implementation: Value<'v>,
    pub flags: RuleFlags,
}

pub(crate) fn rule_parts<'v>(value: Value<'v>) -> Option<RuleParts<'v>> {
    if let Some(r) = value.downcast_ref::<RuleClass>() {
        return Some(RuleParts {
            name: r.name.borrow().clone(),
            implementation: r.implementation,
            flags: r.flags,
        });
    }
    if let Some(r) = value.downcast_ref::<FrozenRuleClass>() {
        return Some(RuleParts {
            name: r.name.clone(),
            implementation: r.implementation.to_value(),
            flags: r.flags,
        });
    }
    None
}

/// Instantiates a target: validates attributes, fills defaults, derives the
/// label from the current package and registers the instance. The call
/// expression evaluates to `None`.
fn call_rule<'v>(
    rule_name: Option<String>,
    attrs: &[(String, Value<'v>)],
    flags: RuleFlags,
    args: &Arguments<'v, '_>,
    eval: &mut Evaluator<'v, '_, '_>,
) -> starlark::Result<Value<'v>> {
    let rule_name = rule_name.ok_or_else(|| {
        to_starlark_error(anyhow::anyhow!(
            "rule has not been exported (assign it to a global variable in the .bzl where it's defined)"
        ))
    })?;

    args.no_positional_args(eval.heap())?;

    let build_ctx = BuildContext::from_evaluator(eval).map_err(to_starlark_error)?;
    let package = build_ctx.package().ok_or_else(|| {
        to_starlark_error(anyhow::anyhow!(
            "{}: a rule can only be instantiated during BUILD file evaluation",
            rule_name
        ))
    })?;

    let named = args.names_map()?;
    let mut values: SmallMap<String, CoercedValue> = SmallMap::with_capacity(attrs.len());

    for (key, value) in named.iter() {
        let key = key.as_str();
        let descriptor_value = attrs.iter().find(|(name, _)| name == key).map(|(_, v)| *v);
        let Some(descriptor_value) = descriptor_value else {
            return Err(to_starlark_error(anyhow::anyhow!(
                "{}: unexpected attribute \"{}\"",
                rule_name,
                key
            )));
        };
        let descriptor = AttrDescriptor::from_value(descriptor_value).ok_or_else(|| {
            to_starlark_error(anyhow::anyhow!(
                "{}: attribute \"{}\" has an invalid schema",
                rule_name,
                key
            ))
        })?;
        let coerced = coerce_attr_value(&rule_name, key, descriptor, *value)
            .map_err(to_starlark_error)?;
        values.insert(key.to_owned(), coerced);
    }

    // Missing mandatory attributes fail; missing optional ones take their
    // declared default, falling back to the type default.
    for (attr_name, descriptor_value) in attrs {
        if values.contains_key(attr_name) {
            continue;
        }
        let Some(descriptor) = AttrDescriptor::from_value(*descriptor_value) else {
            continue;
        };
        if descriptor.mandatory() {
            return Err(to_starlark_error(anyhow::anyhow!(
                "{}: missing mandatory attribute \"{}\"",
                rule_name,
                attr_name
            )));
        }
        let default = match descriptor.default_value() {
            Some(v) => CoercedValue::from_value(v).map_err(to_starlark_error)?,
            None => descriptor.kind().implicit_default(),
        };
        values.insert(attr_name.clone(), default);
    }

    let target_name = match values.get("name").and_then(|v| v.as_str()) {
        Some(name) => name.to_owned(),
        None => {
            return Err(to_starlark_error(anyhow::anyhow!(
                "{}: missing mandatory attribute \"name\"",
                rule_name
            )))
        }
    };

    let label = Label::new(package.repo_name(), package.package_path(), &target_name);
    let instance = RuleInstance::new(
        rule_name.clone(),
        target_name,
        label,
        values,
        flags.executable || flags.test,
        flags.test,
        Some(package.build_file_path().to_owned()),
    );
    package.register_target(instance).map_err(to_starlark_error)?;

    Ok(Value::new_none())
}

/// Validates a supplied value against the descriptor kind and coerces it
/// out of the heap. Configurable (`select`) values are stored unresolved.
fn coerce_attr_value<'v>(
    rule_name: &str,
    attr_name: &str,
    descriptor: &AttrDescriptor<'v>,
    value: Value<'v>,
) -> anyhow::Result<CoercedValue> {
    if SelectorList::from_value(value).is_some() || SelectorValue::from_value(value).is_some() {
        return CoercedValue::from_value(value);
    }
    check_shape(descriptor, value).map_err(|e| {
        anyhow::anyhow!("{}: attribute \"{}\": {}", rule_name, attr_name, e)
    })?;
    let allowed = descriptor.allowed_values();
    if !allowed.is_empty() {
        let mut found = false;
        for candidate in &allowed {
            if candidate.equals(value).unwrap_or(false) {
                found = true;
                break;
            }
        }
        if !found {
            anyhow::bail!(
                "{}: attribute \"{}\": value {} is not one of the allowed values",
                rule_name,
                attr_name,
                value.to_repr()
            );
        }
    }
    CoercedValue::from_value(value)
}

fn check_shape<'v>(descriptor: &AttrDescriptor<'v>, value: Value<'v>) -> anyhow::Result<()> {
    if value.is_none() {
        // None is accepted for optional attributes and replaced by the
        // default at analysis time.
        if descriptor.mandatory() {
            anyhow::bail!("mandatory attribute cannot be None");
        }
        return Ok(());
    }

    let kind = descriptor.kind();
    let type_error = |want: &str| -> anyhow::Error {
        anyhow::anyhow!("expected {}, got {}", want, value.get_type())
    };

    match kind {
        AttrKind::String | AttrKind::Output => {
            if value.unpack_str().is_none() {
                return Err(type_error("string"));
            }
        }
        AttrKind::Int => {
            if value.unpack_i32().is_none() {
                return Err(type_error("int"));
            }
        }
        AttrKind::Bool => {
            if value.unpack_bool().is_none() {
                return Err(type_error("bool"));
            }
        }
        AttrKind::Label => {
            if value.unpack_str().is_none() && value.downcast_ref::<StarlarkLabel>().is_none() {
                return Err(type_error("label (string or Label)"));
            }
        }
        AttrKind::LabelList | AttrKind::StringList | AttrKind::IntList | AttrKind::OutputList => {
            let elements = list_elements(value).ok_or_else(|| type_error("list"))?;
            if elements.is_empty() && !descriptor.allow_empty() {
                anyhow::bail!("empty value is not allowed");
            }
            for element in elements {
                match kind {
                    AttrKind::StringList | AttrKind::OutputList => {
                        if element.unpack_str().is_none() {
                            anyhow::bail!(
                                "expected list of strings, got element of type {}",
                                element.get_type()
                            );
                        }
                    }
                    AttrKind::IntList => {
                        if element.unpack_i32().is_none() {
                            anyhow::bail!(
                                "expected list of ints, got element of type {}",
                                element.get_type()
                            );
                        }
                    }
                    AttrKind::LabelList => {
                        if element.unpack_str().is_none()
                            && element.downcast_ref::<StarlarkLabel>().is_none()
                        {
                            anyhow::bail!(
                                "expected list of labels, got element of type {}",
                                element.get_type()
                            );
                        }
                    }
                    _ => unreachable!(),
                }
            }
        }
        AttrKind::StringDict | AttrKind::StringListDict | AttrKind::LabelKeyedStringDict => {
            let dict = DictRef::from_value(value).ok_or_else(|| type_error("dict"))?;
            if dict.len() == 0 && !descriptor.allow_empty() {
                anyhow::bail!("empty value is not allowed");
            }
            for (k, v) in dict.iter() {
                match kind {
                    AttrKind::LabelKeyedStringDict => {
                        if k.unpack_str().is_none()
                            && k.downcast_ref::<StarlarkLabel>().is_none()
                        {
                            anyhow::bail!(
                                "expected label keys, got key of type {}",
                                k.get_type()
                            );
                        }
                    }
                    _ => {
                        if k.unpack_str().is_none() {
                            anyhow::bail!(
                                "expected string keys, got key of type {}",
                                k.get_type()
                            );
                        }
                    }
                }
                match kind {
                    AttrKind::StringListDict => {
                        let ok = list_elements(v)
                            .map(|els| els.iter().all(|e| e.unpack_str().is_some()))
                            .unwrap_or(false);
                        if !ok {
                            anyhow::bail!(
                                "expected lists of strings as values, got {}",
                                v.get_type()
                            );
                        }
                    }
                    _ => {
                        if v.unpack_str().is_none() {
                            anyhow::bail!(
                                "expected string values, got value of type {}",
                                v.get_type()
                            );
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn list_elements<'v>(value: Value<'v>) -> Option<Vec<Value<'v>>> {
    if let Some(list) = ListRef::from_value(value) {
        return Some(list.iter().collect());
    }
    if let Some(tuple) = TupleRef::from_value(value) {
        return Some(tuple.iter().collect());
    }
    None
}

/// Builds the schema map for a new rule class: the implicit attribute set,
/// the test/executable extras, then the user-declared attributes.
fn build_attr_map<'v>(
    user_attrs: Option<Value<'v>>,
    flags: RuleFlags,
    heap: &'v Heap,
) -> anyhow::Result<SmallMap<String, Value<'v>>> {
    let mut attrs: SmallMap<String, Value<'v>> = SmallMap::new();
    let mut add = |name: &str, kind: AttrKind, mandatory: bool, default: Option<Value<'v>>| {
        let mut descriptor = implicit_attr(kind, mandatory);
        if let Some(default) = default {
            descriptor = descriptor.with_default(default);
        }
        attrs.insert(name.to_owned(), heap.alloc(descriptor));
    };

    add("name", AttrKind::String, true, None);
    add("visibility", AttrKind::LabelList, false, Some(Value::new_none()));
    add("tags", AttrKind::StringList, false, None);
    add("testonly", AttrKind::Bool, false, None);
    add("deprecation", AttrKind::String, false, Some(Value::new_none()));
    add("features", AttrKind::StringList, false, None);

    if flags.test {
        add("size", AttrKind::String, false, Some(heap.alloc("medium")));
        add("timeout", AttrKind::String, false, Some(Value::new_none()));
        add("flaky", AttrKind::Bool, false, None);
        add("shard_count", AttrKind::Int, false, Some(heap.alloc(-1)));
        add("local", AttrKind::Bool, false, None);
        add("args", AttrKind::StringList, false, None);
    } else if flags.executable {
        add("args", AttrKind::StringList, false, None);
        add("output_licenses", AttrKind::StringList, false, None);
    }

    if let Some(user_attrs) = user_attrs {
        let dict = DictRef::from_value(user_attrs)
            .ok_or_else(|| anyhow::anyhow!("rule: attrs must be a dict"))?;
        for (key, value) in dict.iter() {
            let name = key
                .unpack_str()
                .ok_or_else(|| {
                    anyhow::anyhow!("rule: attrs keys must be strings, got {}", key.get_type())
                })?
                .to_owned();
            if !is_valid_attr_name(&name) {
                anyhow::bail!("rule: attribute name \"{}\" is not a valid identifier", name);
            }
            if name == "name" {
                anyhow::bail!("rule: 'name' is an implicit attribute and cannot be declared");
            }
            if AttrDescriptor::from_value(value).is_none() {
                anyhow::bail!(
                    "rule: attrs values must be attr objects, got {} for \"{}\"",
                    value.get_type(),
                    name
                );
            }
            attrs.insert(name, value);
        }
    }

    Ok(attrs)
}

pub(crate) fn is_valid_attr_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[starlark_module]
pub(crate) fn register_rule(globals: &mut GlobalsBuilder) {
    /// Declares a rule schema. The result must be exported by assigning it
    /// to a top-level variable before it can instantiate targets.
    fn rule<'v>(
        implementation: Value<'v>,
        #[starlark(require = named, default = false)] test: bool,
        #[starlark(require = named, default = NoneOr::None)] attrs: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] outputs: NoneOr<Value<'v>>,
        #[starlark(require = named, default = false)] executable: bool,
        #[starlark(require = named, default = false)] output_to_genfiles: bool,
        #[starlark(require = named, default = NoneOr::None)] fragments: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] host_fragments: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] toolchains: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] doc: NoneOr<&str>,
        #[starlark(require = named, default = NoneOr::None)] provides: NoneOr<Value<'v>>,
        #[starlark(require = named, default = false)] dependency_resolution_rule: bool,
        #[starlark(require = named, default = NoneOr::None)] exec_compatible_with: NoneOr<
            Value<'v>,
        >,
        #[starlark(require = named, default = false)] analysis_test: bool,
        #[starlark(require = named, default = NoneOr::None)] build_setting: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] cfg: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] exec_groups: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] initializer: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] parent: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] extendable: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] subrules: NoneOr<Value<'v>>,
        heap: &'v Heap,
    ) -> anyhow::Result<RuleClass<'v>> {
        // The deprecated implicit-outputs parameter is accepted but inert.
        let _ = outputs;
        let _ = host_fragments;

        let mut flags = RuleFlags {
            test,
            executable,
            analysis_test,
            output_to_genfiles,
            dependency_resolution_rule,
        };
        // analysis_test implies test; test rules are always executable.
        if flags.analysis_test {
            flags.test = true;
        }
        if flags.test {
            flags.executable = true;
        }

        let attrs = build_attr_map(attrs.into_option(), flags, heap)?;

        let fragments = match fragments.into_option() {
            Some(v) => string_elements("fragments", v)?,
            None => Vec::new(),
        };
        let list_or_empty = |v: NoneOr<Value<'v>>, what: &str| -> anyhow::Result<Vec<Value<'v>>> {
            match v.into_option() {
                Some(v) => iterable_elements(what, v),
                None => Ok(Vec::new()),
            }
        };

        Ok(RuleClass {
            name: RefCell::new(None),
            implementation,
            attrs,
            flags,
            fragments,
            toolchains: list_or_empty(toolchains, "toolchains")?,
            provides: list_or_empty(provides, "provides")?,
            exec_compatible_with: list_or_empty(exec_compatible_with, "exec_compatible_with")?,
            doc: doc.into_option().map(str::to_owned),
            cfg: cfg.into_option(),
            exec_groups: exec_groups.into_option(),
            build_setting: build_setting.into_option(),
            initializer: initializer.into_option(),
            parent: parent.into_option(),
            subrules: list_or_empty(subrules, "subrules")?,
            extendable: extendable.into_option(),
        })
    }
}
