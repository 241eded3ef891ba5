//! Small helpers shared by the dialect values.

use starlark::values::list::ListRef;
use starlark::values::tuple::TupleRef;
use starlark::values::Value;

/// Collects the elements of a list or tuple value.
pub(crate) fn iterable_elements<'v>(
    what: &str,
    value: Value<'v>,
) -> anyhow::Result<Vec<Value<'v>>> {
    if let Some(list) = ListRef::from_value(value) {
        return Ok(list.iter().collect());
    }
    if let Some(tuple) = TupleRef::from_value(value) {
        return Ok(tuple.iter().collect());
    }
    anyhow::bail!(
        "for parameter '{}': got {}, want iterable",
        what,
        value.get_type()
    )
}

/// Collects a list (or tuple) of strings.
pub(crate) fn string_elements(what: &str, value: Value<'_>) -> anyhow::Result<Vec<String>> {
    iterable_elements(what, value)?
        .into_iter()
        .map(|v| match v.unpack_str() {
            Some(s) => Ok(s.to_owned()),
            None => anyhow::bail!("{} elements must be strings, got {}", what, v.get_type()),
        })
        .collect()
}

/// Wraps an internal error for the host evaluator.
pub(crate) fn to_starlark_error(e: anyhow::Error) -> starlark::Error {
    starlark::Error::new_other(e)
}

/// A stable hash of a rendered value, used to bucket candidates before an
/// equality check. Equal values of the scalar types that may appear here
/// render identically, so this never splits equal values across buckets.
pub(crate) fn repr_hash(value: Value<'_>) -> u64 {
    use std::hash::Hash;
    use std::hash::Hasher;
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.to_repr().hash(&mut hasher);
    hasher.finish()
}
