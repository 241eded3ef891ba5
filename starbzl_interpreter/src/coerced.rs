//! Heap-independent attribute values.
//!
//! Rule instantiation coerces attribute values out of the evaluation heap
//! into this plain representation, so targets, the facade result and the
//! `existing_rule(s)` views survive the evaluation that produced them.
//! Label-typed attributes keep their literal string form. Configurable
//! values keep the full `select` composition, unresolved.

use allocative::Allocative;
use starlark::collections::SmallMap;
use starlark::values::dict::AllocDict;
use starlark::values::dict::DictRef;
use starlark::values::list::AllocList;
use starlark::values::list::ListRef;
use starlark::values::tuple::TupleRef;
use starlark::values::Heap;
use starlark::values::Value;

use crate::selector::SelectorList;
use crate::selector::SelectorValue;
use crate::types::label::StarlarkLabel;

/// A plain attribute value.
#[derive(Debug, Clone, PartialEq, Allocative)]
pub enum CoercedValue {
    None,
    Bool(bool),
    Int(i32),
    String(String),
    Label(starbzl_core::Label),
    List(Vec<CoercedValue>),
    Dict(Vec<(CoercedValue, CoercedValue)>),
    /// A `select` composition: plain parts and selector parts, in order.
    Select(Vec<SelectEntry>),
}

#[derive(Debug, Clone, PartialEq, Allocative)]
pub enum SelectEntry {
    Value(CoercedValue),
    Selector {
        conditions: Vec<(String, CoercedValue)>,
        no_match_error: String,
    },
}

impl CoercedValue {
    /// Coerces an evaluation-heap value. Fails on value kinds that have no
    /// place in a target's attribute map.
    pub fn from_value(value: Value<'_>) -> anyhow::Result<CoercedValue> {
        if value.is_none() {
            return Ok(CoercedValue::None);
        }
        if let Some(b) = value.unpack_bool() {
            return Ok(CoercedValue::Bool(b));
        }
        if let Some(i) = value.unpack_i32() {
            return Ok(CoercedValue::Int(i));
        }
        if let Some(s) = value.unpack_str() {
            return Ok(CoercedValue::String(s.to_owned()));
        }
        if let Some(label) = value.downcast_ref::<StarlarkLabel>() {
            return Ok(CoercedValue::Label(label.label().clone()));
        }
        if let Some(list) = ListRef::from_value(value) {
            return Ok(CoercedValue::List(
                list.iter().map(CoercedValue::from_value).collect::<anyhow::Result<_>>()?,
            ));
        }
        if let Some(tuple) = TupleRef::from_value(value) {
            return Ok(CoercedValue::List(
                tuple
                    .iter()
                    .map(CoercedValue::from_value)
                    .collect::<anyhow::Result<_>>()?,
            ));
        }
        if let Some(dict) = DictRef::from_value(value) {
            let mut entries = Vec::with_capacity(dict.len());
            for (k, v) in dict.iter() {
                entries.push((CoercedValue::from_value(k)?, CoercedValue::from_value(v)?));
            }
            return Ok(CoercedValue::Dict(entries));
        }
        if let Some(list) = SelectorList::from_value(value) {
            let mut entries = Vec::new();
            for element in list.elements() {
                entries.push(SelectEntry::from_value(*element)?);
            }
            return Ok(CoercedValue::Select(entries));
        }
        if SelectorValue::from_value(value).is_some() {
            return Ok(CoercedValue::Select(vec![SelectEntry::from_value(value)?]));
        }
        anyhow::bail!(
            "value of type {} is not a valid attribute value",
            value.get_type()
        )
    }

    /// Re-allocates this value into a Starlark heap.
    pub fn to_value<'v>(&self, heap: &'v Heap) -> Value<'v> {
        match self {
            CoercedValue::None => Value::new_none(),
            CoercedValue::Bool(b) => Value::new_bool(*b),
            CoercedValue::Int(i) => heap.alloc(*i),
            CoercedValue::String(s) => heap.alloc(s.as_str()),
            CoercedValue::Label(label) => heap.alloc(StarlarkLabel::new(label.clone())),
            CoercedValue::List(items) => {
                heap.alloc(AllocList(items.iter().map(|v| v.to_value(heap))))
            }
            CoercedValue::Dict(entries) => heap.alloc(AllocDict(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_value(heap), v.to_value(heap))),
            )),
            CoercedValue::Select(entries) => {
                let elements = entries.iter().map(|e| e.to_value(heap)).collect();
                heap.alloc(SelectorList::new(elements))
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CoercedValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl SelectEntry {
    fn from_value(value: Value<'_>) -> anyhow::Result<SelectEntry> {
        if let Some(selector) = SelectorValue::from_value(value) {
            let mut conditions = Vec::new();
            for (key, v) in selector.conditions().iter() {
                conditions.push((key.clone(), CoercedValue::from_value(*v)?));
            }
            return Ok(SelectEntry::Selector {
                conditions,
                no_match_error: selector.no_match_error().to_owned(),
            });
        }
        Ok(SelectEntry::Value(CoercedValue::from_value(value)?))
    }

    fn to_value<'v>(&self, heap: &'v Heap) -> Value<'v> {
        match self {
            SelectEntry::Value(v) => v.to_value(heap),
            SelectEntry::Selector {
                conditions,
                no_match_error,
            } => {
                let conditions = conditions
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value(heap)))
                    .collect::<SmallMap<_, _>>();
                heap.alloc(SelectorValue::new(conditions, no_match_error.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use starlark::environment::Module;

    use super::*;

    #[test]
    fn scalar_round_trip() {
        let module = Module::new();
        let heap = module.heap();
        for value in [
            CoercedValue::None,
            CoercedValue::Bool(true),
            CoercedValue::Int(42),
            CoercedValue::String("hello".to_owned()),
            CoercedValue::List(vec![
                CoercedValue::String("a".to_owned()),
                CoercedValue::Int(1),
            ]),
            CoercedValue::Dict(vec![(
                CoercedValue::String("k".to_owned()),
                CoercedValue::String("v".to_owned()),
            )]),
            CoercedValue::Label(starbzl_core::Label::parse("//pkg:t").unwrap()),
        ] {
            let allocated = value.to_value(heap);
            assert_eq!(CoercedValue::from_value(allocated).unwrap(), value);
        }
    }

    #[test]
    fn files_are_not_attribute_values() {
        let module = Module::new();
        let heap = module.heap();
        let value = heap.alloc(crate::types::file::StarlarkFile::source("p", "f"));
        assert!(CoercedValue::from_value(value).is_err());
    }
}
