//! `select()` values: configurable attribute storage.
//!
//! A `SelectorValue` is one `select({...})` call; a `SelectorList` models
//! the concatenation `native + select + select + ...`. Conditions are never
//! evaluated here, only stored.

use std::fmt;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::coerce::Coerce;
use starlark::collections::SmallMap;
use starlark::environment::GlobalsBuilder;
use starlark::starlark_complex_value;
use starlark::starlark_module;
use starlark::values::dict::DictRef;
use starlark::values::starlark_value;
use starlark::values::Freeze;
use starlark::values::FreezeResult;
use starlark::values::Heap;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Trace;
use starlark::values::Value;
use starlark::values::ValueLike;

#[derive(Debug, Trace, Freeze, ProvidesStaticType, NoSerialize, Allocative)]
#[repr(C)]
pub struct SelectorValueGen<V> {
    conditions: SmallMap<String, V>,
    #[trace(unsafe_ignore)]
    #[freeze(identity)]
    no_match_error: String,
}

unsafe impl<From: Coerce<To>, To> Coerce<SelectorValueGen<To>> for SelectorValueGen<From> {}

starlark_complex_value!(pub SelectorValue);

impl<'v> SelectorValue<'v> {
    pub fn new(conditions: SmallMap<String, Value<'v>>, no_match_error: String) -> Self {
        SelectorValueGen {
            conditions,
            no_match_error,
        }
    }
}

impl<V> SelectorValueGen<V> {
    pub fn conditions(&self) -> &SmallMap<String, V> {
        &self.conditions
    }

    pub fn no_match_error(&self) -> &str {
        &self.no_match_error
    }
}

impl<V: fmt::Debug> fmt::Display for SelectorValueGen<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("select({")?;
        let mut keys: Vec<&String> = self.conditions.keys().collect();
        keys.sort();
        for (i, key) in keys.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:?}: {:?}", key, self.conditions.get(*key).unwrap())?;
        }
        f.write_str("})")
    }
}

#[starlark_value(type = "selector")]
impl<'v, V: ValueLike<'v>> StarlarkValue<'v> for SelectorValueGen<V>
where
    Self: ProvidesStaticType<'v>,
{
    fn to_bool(&self) -> bool {
        true
    }

    fn add(&self, other: Value<'v>, heap: &'v Heap) -> Option<starlark::Result<Value<'v>>> {
        Some(Ok(concat(self.to_element(heap), other, heap)))
    }

    fn radd(&self, lhs: Value<'v>, heap: &'v Heap) -> Option<starlark::Result<Value<'v>>> {
        Some(Ok(concat(lhs, self.to_element(heap), heap)))
    }

    fn bit_or(&self, other: Value<'v>, heap: &'v Heap) -> starlark::Result<Value<'v>> {
        Ok(concat(self.to_element(heap), other, heap))
    }
}

impl<'v, V: ValueLike<'v>> SelectorValueGen<V> {
    fn to_element(&self, heap: &'v Heap) -> Value<'v> {
        let conditions = self
            .conditions
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect();
        heap.alloc(SelectorValue::new(conditions, self.no_match_error.clone()))
    }
}

/// Concatenation of plain values and selectors, in call order.
#[derive(Debug, Trace, Freeze, ProvidesStaticType, NoSerialize, Allocative)]
#[repr(C)]
pub struct SelectorListGen<V> {
    elements: Vec<V>,
}

unsafe impl<From: Coerce<To>, To> Coerce<SelectorListGen<To>> for SelectorListGen<From> {}

starlark_complex_value!(pub SelectorList);

impl<'v> SelectorList<'v> {
    pub fn new(elements: Vec<Value<'v>>) -> Self {
        SelectorListGen { elements }
    }
}

impl<V> SelectorListGen<V> {
    pub fn elements(&self) -> &[V] {
        &self.elements
    }
}

impl<V: fmt::Debug> fmt::Display for SelectorListGen<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, elem) in self.elements.iter().enumerate() {
            if i > 0 {
                f.write_str(" + ")?;
            }
            write!(f, "{:?}", elem)?;
        }
        Ok(())
    }
}

#[starlark_value(type = "select")]
impl<'v, V: ValueLike<'v>> StarlarkValue<'v> for SelectorListGen<V>
where
    Self: ProvidesStaticType<'v>,
{
    fn to_bool(&self) -> bool {
        true
    }

    fn add(&self, other: Value<'v>, heap: &'v Heap) -> Option<starlark::Result<Value<'v>>> {
        let this = heap.alloc(SelectorList::new(
            self.elements.iter().map(|v| v.to_value()).collect(),
        ));
        Some(Ok(concat(this, other, heap)))
    }

    fn radd(&self, lhs: Value<'v>, heap: &'v Heap) -> Option<starlark::Result<Value<'v>>> {
        let this = heap.alloc(SelectorList::new(
            self.elements.iter().map(|v| v.to_value()).collect(),
        ));
        Some(Ok(concat(lhs, this, heap)))
    }

    fn bit_or(&self, other: Value<'v>, heap: &'v Heap) -> starlark::Result<Value<'v>> {
        let this = heap.alloc(SelectorList::new(
            self.elements.iter().map(|v| v.to_value()).collect(),
        ));
        Ok(concat(this, other, heap))
    }
}

/// Concatenates two operands into a flat `SelectorList`.
fn concat<'v>(left: Value<'v>, right: Value<'v>, heap: &'v Heap) -> Value<'v> {
    let mut elements = Vec::new();
    let mut push = |v: Value<'v>| {
        if let Some(list) = SelectorList::from_value(v) {
            elements.extend(list.elements.iter().map(|e| e.to_value()));
        } else {
            elements.push(v);
        }
    };
    push(left);
    push(right);
    heap.alloc(SelectorList::new(elements))
}

#[starlark_module]
pub(crate) fn register_select(globals: &mut GlobalsBuilder) {
    /// Creates a configurable value from a dict of condition labels.
    fn select<'v>(
        #[starlark(require = pos)] x: Value<'v>,
        #[starlark(require = named, default = "")] no_match_error: &str,
        heap: &'v Heap,
    ) -> anyhow::Result<SelectorList<'v>> {
        let dict = DictRef::from_value(x)
            .ok_or_else(|| anyhow::anyhow!("select: got {}, want dict", x.get_type()))?;
        if dict.len() == 0 {
            anyhow::bail!(
                "select({{}}) with an empty dictionary can never resolve because it includes no conditions to match"
            );
        }
        let mut conditions = SmallMap::with_capacity(dict.len());
        for (key, value) in dict.iter() {
            let key = match key.unpack_str() {
                Some(s) => s.to_owned(),
                None => key.to_str(),
            };
            conditions.insert(key, value);
        }
        let selector = heap.alloc(SelectorValue::new(conditions, no_match_error.to_owned()));
        Ok(SelectorList::new(vec![selector]))
    }
}
