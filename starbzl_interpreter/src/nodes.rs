//! Frozen targets produced by rule instantiation.

use allocative::Allocative;
use starlark::collections::SmallMap;
use starbzl_core::Label;

use crate::coerced::CoercedValue;

/// A named, heap-independent instantiation of a rule class in a package.
///
/// Attribute values are validated and defaulted at construction; the map
/// preserves declaration order of the rule's schema plus call order of the
/// remaining keyword arguments.
#[derive(Debug, Clone, Allocative)]
pub struct RuleInstance {
    rule_class_name: String,
    name: String,
    label: Label,
    attrs: SmallMap<String, CoercedValue>,
    executable: bool,
    test: bool,
    build_file_path: Option<String>,
}

impl RuleInstance {
    pub(crate) fn new(
        rule_class_name: String,
        name: String,
        label: Label,
        attrs: SmallMap<String, CoercedValue>,
        executable: bool,
        test: bool,
        build_file_path: Option<String>,
    ) -> Self {
        Self {
            rule_class_name,
            name,
            label,
            attrs,
            executable,
            test,
            build_file_path,
        }
    }

    /// The rule class name, e.g. `cc_library`.
    pub fn kind(&self) -> &str {
        &self.rule_class_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn attr(&self, name: &str) -> Option<&CoercedValue> {
        self.attrs.get(name)
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &CoercedValue)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    pub fn is_test(&self) -> bool {
        self.test
    }

    /// `<kind> rule` as reported by query-style tooling.
    pub fn target_kind(&self) -> String {
        format!("{} rule", self.rule_class_name)
    }

    pub fn build_file_path(&self) -> Option<&str> {
        self.build_file_path.as_deref()
    }
}

/// Targets of one package, keyed by name in registration order.
pub type TargetsMap = SmallMap<String, RuleInstance>;
