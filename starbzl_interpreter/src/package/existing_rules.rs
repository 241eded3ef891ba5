//! Immutable dict-like views over the targets declared so far.

use std::fmt;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::environment::Methods;
use starlark::environment::MethodsBuilder;
use starlark::environment::MethodsStatic;
use starlark::starlark_module;
use starlark::starlark_simple_value;
use starlark::values::list::AllocList;
use starlark::values::none::NoneOr;
use starlark::values::starlark_value;
use starlark::values::Heap;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Value;
use starlark::values::ValueLike;

use crate::coerced::CoercedValue;
use crate::nodes::RuleInstance;
use crate::util::to_starlark_error;

/// Attributes whose name starts with an ASCII letter are visible in the
/// views; underscore-prefixed implicit attributes are hidden.
fn is_exportable_attribute(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}

/// The view over a single target returned by `existing_rule(name)`.
///
/// Iteration order is `name`, `kind`, then the remaining attributes sorted
/// lexicographically.
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct ExistingRuleView {
    name: String,
    kind: String,
    attrs: Vec<(String, CoercedValue)>,
}

starlark_simple_value!(ExistingRuleView);

impl ExistingRuleView {
    pub(crate) fn from_instance(instance: &RuleInstance) -> Self {
        let mut attrs: Vec<(String, CoercedValue)> = instance
            .attrs()
            .filter(|(name, _)| is_exportable_attribute(name) && *name != "name")
            .map(|(name, value)| (name.to_owned(), value.clone()))
            .collect();
        attrs.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            name: instance.name().to_owned(),
            kind: instance.kind().to_owned(),
            attrs,
        }
    }

    fn keys(&self) -> Vec<&str> {
        let mut keys = vec!["name", "kind"];
        keys.extend(self.attrs.iter().map(|(k, _)| k.as_str()));
        keys
    }

    fn lookup<'v>(&self, key: &str, heap: &'v Heap) -> Option<Value<'v>> {
        match key {
            "name" => Some(heap.alloc(self.name.as_str())),
            "kind" => Some(heap.alloc(self.kind.as_str())),
            _ => self
                .attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.to_value(heap)),
        }
    }
}

impl fmt::Display for ExistingRuleView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<existing_rule for target '{}'>", self.name)
    }
}

#[starlark_value(type = "existing_rule")]
impl<'v> StarlarkValue<'v> for ExistingRuleView {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(existing_rule_methods)
    }

    fn length(&self) -> starlark::Result<i32> {
        Ok(self.keys().len() as i32)
    }

    fn at(&self, index: Value<'v>, heap: &'v Heap) -> starlark::Result<Value<'v>> {
        let key = index.unpack_str().ok_or_else(|| {
            to_starlark_error(anyhow::anyhow!(
                "existing_rule keys are strings, got {}",
                index.get_type()
            ))
        })?;
        self.lookup(key, heap).ok_or_else(|| {
            to_starlark_error(anyhow::anyhow!("key \"{}\" not found in existing_rule", key))
        })
    }

    fn is_in(&self, other: Value<'v>) -> starlark::Result<bool> {
        Ok(match other.unpack_str() {
            Some(key) => self.keys().contains(&key),
            None => false,
        })
    }

    unsafe fn iterate(&self, me: Value<'v>, _heap: &'v Heap) -> starlark::Result<Value<'v>> {
        Ok(me)
    }

    unsafe fn iter_size_hint(&self, index: usize) -> (usize, Option<usize>) {
        let remaining = self.keys().len().saturating_sub(index);
        (remaining, Some(remaining))
    }

    unsafe fn iter_next(&self, index: usize, heap: &'v Heap) -> Option<Value<'v>> {
        self.keys().get(index).map(|key| heap.alloc(*key))
    }

    unsafe fn iter_stop(&self) {}
}

#[starlark_module]
fn existing_rule_methods(builder: &mut MethodsBuilder) {
    /// Like dict.get: the value for `key`, or `default`.
    fn get<'v>(
        this: &ExistingRuleView,
        #[starlark(require = pos)] key: &str,
        #[starlark(default = NoneOr::None)] default: NoneOr<Value<'v>>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        Ok(this
            .lookup(key, heap)
            .unwrap_or_else(|| default.into_option().unwrap_or_else(Value::new_none)))
    }

    fn keys<'v>(this: &ExistingRuleView, heap: &'v Heap) -> anyhow::Result<Value<'v>> {
        Ok(heap.alloc(AllocList(this.keys())))
    }

    fn values<'v>(this: &ExistingRuleView, heap: &'v Heap) -> anyhow::Result<Value<'v>> {
        let values: Vec<Value<'v>> = this
            .keys()
            .iter()
            .filter_map(|key| this.lookup(key, heap))
            .collect();
        Ok(heap.alloc(AllocList(values)))
    }

    fn items<'v>(this: &ExistingRuleView, heap: &'v Heap) -> anyhow::Result<Value<'v>> {
        let items: Vec<Value<'v>> = this
            .keys()
            .iter()
            .filter_map(|key| {
                this.lookup(key, heap)
                    .map(|value| heap.alloc((heap.alloc(*key), value)))
            })
            .collect();
        Ok(heap.alloc(AllocList(items)))
    }
}

/// The snapshot returned by `existing_rules()`: target name to view,
/// iterated by sorted target name.
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct ExistingRulesView {
    rules: Vec<ExistingRuleView>,
}

starlark_simple_value!(ExistingRulesView);

impl ExistingRulesView {
    pub(crate) fn new(mut rules: Vec<ExistingRuleView>) -> Self {
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Self { rules }
    }

    fn find(&self, name: &str) -> Option<&ExistingRuleView> {
        self.rules.iter().find(|r| r.name == name)
    }
}

impl fmt::Display for ExistingRulesView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<existing_rules for {} targets>", self.rules.len())
    }
}

#[starlark_value(type = "existing_rules")]
impl<'v> StarlarkValue<'v> for ExistingRulesView {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(existing_rules_methods)
    }

    fn length(&self) -> starlark::Result<i32> {
        Ok(self.rules.len() as i32)
    }

    fn at(&self, index: Value<'v>, heap: &'v Heap) -> starlark::Result<Value<'v>> {
        let key = index.unpack_str().ok_or_else(|| {
            to_starlark_error(anyhow::anyhow!(
                "existing_rules keys are strings, got {}",
                index.get_type()
            ))
        })?;
        match self.find(key) {
            Some(view) => Ok(heap.alloc(view.clone())),
            None => Err(to_starlark_error(anyhow::anyhow!(
                "target \"{}\" not found in package",
                key
            ))),
        }
    }

    fn is_in(&self, other: Value<'v>) -> starlark::Result<bool> {
        Ok(match other.unpack_str() {
            Some(key) => self.find(key).is_some(),
            None => false,
        })
    }

    unsafe fn iterate(&self, me: Value<'v>, _heap: &'v Heap) -> starlark::Result<Value<'v>> {
        Ok(me)
    }

    unsafe fn iter_size_hint(&self, index: usize) -> (usize, Option<usize>) {
        let remaining = self.rules.len().saturating_sub(index);
        (remaining, Some(remaining))
    }

    unsafe fn iter_next(&self, index: usize, heap: &'v Heap) -> Option<Value<'v>> {
        self.rules.get(index).map(|r| heap.alloc(r.name.as_str()))
    }

    unsafe fn iter_stop(&self) {}
}

#[starlark_module]
fn existing_rules_methods(builder: &mut MethodsBuilder) {
    fn get<'v>(
        this: &ExistingRulesView,
        #[starlark(require = pos)] key: &str,
        #[starlark(default = NoneOr::None)] default: NoneOr<Value<'v>>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        Ok(match this.find(key) {
            Some(view) => heap.alloc(view.clone()),
            None => default.into_option().unwrap_or_else(Value::new_none),
        })
    }

    fn keys<'v>(this: &ExistingRulesView, heap: &'v Heap) -> anyhow::Result<Value<'v>> {
        Ok(heap.alloc(AllocList(
            this.rules.iter().map(|r| r.name.as_str()),
        )))
    }

    fn values<'v>(this: &ExistingRulesView, heap: &'v Heap) -> anyhow::Result<Value<'v>> {
        let values: Vec<Value<'v>> = this
            .rules
            .iter()
            .map(|r| heap.alloc(r.clone()))
            .collect();
        Ok(heap.alloc(AllocList(values)))
    }

    fn items<'v>(this: &ExistingRulesView, heap: &'v Heap) -> anyhow::Result<Value<'v>> {
        let items: Vec<Value<'v>> = this
            .rules
            .iter()
            .map(|r| heap.alloc((heap.alloc(r.name.as_str()), heap.alloc(r.clone()))))
            .collect();
        Ok(heap.alloc(AllocList(items)))
    }
}
