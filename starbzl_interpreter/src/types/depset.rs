//! The depset (nested set) value.
//!
//! A depset is an immutable DAG of direct elements plus child depsets with
//! a declared traversal order and an element-type lock. Flattening
//! deduplicates by element equality in a deterministic, order-specific
//! traversal. Depsets are values: two independently built depsets with the
//! same order and elements compare equal.

use std::collections::HashMap;
use std::fmt;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::coerce::Coerce;
use starlark::environment::GlobalsBuilder;
use starlark::environment::Methods;
use starlark::environment::MethodsBuilder;
use starlark::environment::MethodsStatic;
use starlark::starlark_complex_value;
use starlark::starlark_module;
use starlark::values::dict::DictRef;
use starlark::values::list::AllocList;
use starlark::values::list::ListRef;
use starlark::values::none::NoneOr;
use starlark::values::starlark_value;
use starlark::values::Freeze;
use starlark::values::FreezeResult;
use starlark::values::FrozenValue;
use starlark::values::Heap;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Trace;
use starlark::values::Value;
use starlark::values::ValueLike;
use thiserror::Error;

use crate::util::iterable_elements;
use crate::util::repr_hash;

#[derive(Debug, Error)]
enum DepsetError {
    #[error("Invalid order: {0}")]
    InvalidOrder(String),
    #[error("Order '{0}' is incompatible with order '{1}'")]
    IncompatibleOrder(DepsetOrder, DepsetOrder),
    #[error("depsets cannot contain items of type '{0}'")]
    ForbiddenElement(&'static str),
    #[error("cannot add an item of type '{0}' to a depset of '{1}'")]
    TypeMismatch(String, String),
    #[error("for parameter 'transitive': got {0} in list, want depset")]
    NotADepset(&'static str),
}

/// Traversal order of a depset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Allocative)]
pub enum DepsetOrder {
    Default,
    Postorder,
    Preorder,
    Topological,
}

impl DepsetOrder {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "default" => Ok(DepsetOrder::Default),
            "postorder" => Ok(DepsetOrder::Postorder),
            "preorder" => Ok(DepsetOrder::Preorder),
            "topological" => Ok(DepsetOrder::Topological),
            _ => Err(DepsetError::InvalidOrder(s.to_owned()).into()),
        }
    }

    /// Orders are compatible iff equal, or one of them is `default`.
    pub fn is_compatible(self, other: DepsetOrder) -> bool {
        self == other || self == DepsetOrder::Default || other == DepsetOrder::Default
    }
}

impl fmt::Display for DepsetOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DepsetOrder::Default => "default",
            DepsetOrder::Postorder => "postorder",
            DepsetOrder::Preorder => "preorder",
            DepsetOrder::Topological => "topological",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Trace, Freeze, ProvidesStaticType, NoSerialize, Allocative)]
#[repr(C)]
pub struct DepsetGen<V> {
    #[trace(unsafe_ignore)]
    #[freeze(identity)]
    order: DepsetOrder,
    /// Type name of the elements; empty for an empty depset.
    #[trace(unsafe_ignore)]
    #[freeze(identity)]
    element_type: String,
    direct: Vec<V>,
    transitive: Vec<V>,
}

unsafe impl<From: Coerce<To>, To> Coerce<DepsetGen<To>> for DepsetGen<From> {}

starlark_complex_value!(pub Depset);

impl<'v> Depset<'v> {
    /// Builds a depset, enforcing element-type unification and order
    /// compatibility with every non-empty transitive child.
    pub fn build(
        order: DepsetOrder,
        direct: Vec<Value<'v>>,
        transitive: Vec<Value<'v>>,
    ) -> anyhow::Result<Depset<'v>> {
        let mut element_type = String::new();

        for elem in &direct {
            if ListRef::from_value(*elem).is_some() {
                return Err(DepsetError::ForbiddenElement("list").into());
            }
            if DictRef::from_value(*elem).is_some() {
                return Err(DepsetError::ForbiddenElement("dict").into());
            }
            let elem_type = elem.get_type();
            if element_type.is_empty() {
                element_type = elem_type.to_owned();
            } else if element_type != elem_type {
                return Err(
                    DepsetError::TypeMismatch(elem_type.to_owned(), element_type).into(),
                );
            }
        }

        for child_value in &transitive {
            let child = Depset::from_value(*child_value)
                .ok_or(DepsetError::NotADepset(child_value.get_type()))?;
            if child.is_empty() {
                continue;
            }
            if !order.is_compatible(child.order) {
                return Err(DepsetError::IncompatibleOrder(order, child.order).into());
            }
            if element_type.is_empty() {
                element_type = child.element_type.clone();
            } else if !child.element_type.is_empty() && element_type != child.element_type {
                return Err(DepsetError::TypeMismatch(
                    child.element_type.clone(),
                    element_type,
                )
                .into());
            }
        }

        Ok(DepsetGen {
            order,
            element_type,
            direct,
            transitive,
        })
    }
}

impl<V> DepsetGen<V> {
    pub fn order(&self) -> DepsetOrder {
        self.order
    }

    pub fn element_type(&self) -> &str {
        &self.element_type
    }
}

impl<'v, V: ValueLike<'v>> DepsetGen<V> {
    pub fn is_empty(&self) -> bool {
        if !self.direct.is_empty() {
            return false;
        }
        self.transitive.iter().all(|t| {
            Depset::from_value(t.to_value()).map_or(true, |child| child.is_empty())
        })
    }

    /// Flattens the depset into a deduplicated element sequence.
    ///
    /// Preorder visits direct elements before children; postorder, default
    /// and topological visit children first; topological then reverses the
    /// whole result. Deduplication is global: the first appearance wins.
    pub fn to_list(&self) -> anyhow::Result<Vec<Value<'v>>> {
        let mut seen: HashMap<u64, Vec<Value<'v>>> = HashMap::new();
        let mut result = Vec::new();
        self.walk(self.order, &mut seen, &mut result)?;
        if self.order == DepsetOrder::Topological {
            result.reverse();
        }
        Ok(result)
    }

    fn walk(
        &self,
        order: DepsetOrder,
        seen: &mut HashMap<u64, Vec<Value<'v>>>,
        result: &mut Vec<Value<'v>>,
    ) -> anyhow::Result<()> {
        if order == DepsetOrder::Preorder {
            self.add_direct(seen, result)?;
            self.add_transitive(order, seen, result)?;
        } else {
            self.add_transitive(order, seen, result)?;
            self.add_direct(seen, result)?;
        }
        Ok(())
    }

    fn add_direct(
        &self,
        seen: &mut HashMap<u64, Vec<Value<'v>>>,
        result: &mut Vec<Value<'v>>,
    ) -> anyhow::Result<()> {
        for elem in &self.direct {
            let elem = elem.to_value();
            if !already_seen(seen, elem)? {
                result.push(elem);
            }
        }
        Ok(())
    }

    fn add_transitive(
        &self,
        order: DepsetOrder,
        seen: &mut HashMap<u64, Vec<Value<'v>>>,
        result: &mut Vec<Value<'v>>,
    ) -> anyhow::Result<()> {
        for child_value in &self.transitive {
            if let Some(child) = Depset::from_value(child_value.to_value()) {
                child.walk(order, seen, result)?;
            }
        }
        Ok(())
    }
}

/// Checks membership in the seen-set, inserting on a miss. Candidates are
/// bucketed by a stable hash of the rendered element and confirmed by
/// element equality.
fn already_seen<'v>(
    seen: &mut HashMap<u64, Vec<Value<'v>>>,
    elem: Value<'v>,
) -> anyhow::Result<bool> {
    let bucket = seen.entry(repr_hash(elem)).or_default();
    for candidate in bucket.iter() {
        if candidate.to_value().equals(elem)? {
            return Ok(true);
        }
    }
    bucket.push(elem);
    Ok(false)
}

fn fmt_depset<'v, V: ValueLike<'v>>(
    depset: &DepsetGen<V>,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    f.write_str("depset([")?;
    // Equality failures during dedup cannot surface from Display; such an
    // element is simply rendered again.
    let elements = depset.to_list().unwrap_or_default();
    for (i, element) in elements.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        f.write_str(&element.to_repr())?;
    }
    f.write_str("]")?;
    if depset.order != DepsetOrder::Default {
        write!(f, ", order = \"{}\"", depset.order)?;
    }
    f.write_str(")")
}

impl<'v> fmt::Display for DepsetGen<Value<'v>> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_depset(self, f)
    }
}

impl fmt::Display for DepsetGen<FrozenValue> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_depset(self, f)
    }
}

#[starlark_value(type = "depset")]
impl<'v, V: ValueLike<'v>> StarlarkValue<'v> for DepsetGen<V>
where
    Self: ProvidesStaticType<'v> + fmt::Display,
{
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(depset_methods)
    }

    fn to_bool(&self) -> bool {
        !self.is_empty()
    }

    fn equals(&self, other: Value<'v>) -> starlark::Result<bool> {
        let Some(other) = Depset::from_value(other) else {
            return Ok(false);
        };
        if self.order != other.order {
            return Ok(false);
        }
        let left = self.to_list().map_err(starlark::Error::new_other)?;
        let right = other.to_list().map_err(starlark::Error::new_other)?;
        if left.len() != right.len() {
            return Ok(false);
        }
        for (a, b) in left.iter().zip(right.iter()) {
            if !a.equals(*b)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[starlark_module]
fn depset_methods(builder: &mut MethodsBuilder) {
    /// The flattened, deduplicated element list. Stable across calls.
    fn to_list<'v>(this: Value<'v>, heap: &'v Heap) -> anyhow::Result<Value<'v>> {
        let depset = Depset::from_value(this)
            .ok_or_else(|| anyhow::anyhow!("to_list called on non-depset"))?;
        Ok(heap.alloc(AllocList(depset.to_list()?)))
    }
}

#[starlark_module]
pub(crate) fn register_depset(globals: &mut GlobalsBuilder) {
    /// `depset(direct = None, order = "default", transitive = None)`.
    /// The deprecated positional argument is `direct`.
    fn depset<'v>(
        #[starlark(default = NoneOr::None)] direct: NoneOr<Value<'v>>,
        #[starlark(require = named, default = "default")] order: &str,
        #[starlark(require = named, default = NoneOr::None)] transitive: NoneOr<Value<'v>>,
    ) -> anyhow::Result<Depset<'v>> {
        let order = DepsetOrder::parse(order)?;
        let direct = match direct.into_option() {
            Some(v) => iterable_elements("direct", v)?,
            None => Vec::new(),
        };
        let transitive = match transitive.into_option() {
            Some(v) => iterable_elements("transitive", v)?,
            None => Vec::new(),
        };
        Depset::build(order, direct, transitive)
    }
}
