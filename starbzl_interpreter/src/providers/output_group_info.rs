//! `OutputGroupInfo`: named groups of artifacts a target can build.

use std::fmt;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::coerce::Coerce;
use starlark::collections::SmallMap;
use starlark::eval::Arguments;
use starlark::eval::Evaluator;
use starlark::starlark_complex_value;
use starlark::starlark_simple_value;
use starlark::values::list::ListRef;
use starlark::values::starlark_value;
use starlark::values::Freeze;
use starlark::values::FreezeResult;
use starlark::values::Heap;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Trace;
use starlark::values::Value;
use starlark::values::ValueLike;

use crate::types::depset::Depset;
use crate::types::depset::DepsetOrder;
use crate::types::file::StarlarkFile;
use crate::util::to_starlark_error;

#[derive(Debug, Trace, Freeze, ProvidesStaticType, NoSerialize, Allocative)]
#[repr(C)]
pub struct OutputGroupInfoGen<V> {
    groups: SmallMap<String, V>,
}

unsafe impl<From: Coerce<To>, To> Coerce<OutputGroupInfoGen<To>> for OutputGroupInfoGen<From> {}

starlark_complex_value!(pub OutputGroupInfo);

impl<V> OutputGroupInfoGen<V> {
    fn sorted_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<V: fmt::Debug> fmt::Display for OutputGroupInfoGen<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputGroupInfo({:?})", self.sorted_names())
    }
}

#[starlark_value(type = "OutputGroupInfo")]
impl<'v, V: ValueLike<'v>> StarlarkValue<'v> for OutputGroupInfoGen<V>
where
    Self: ProvidesStaticType<'v>,
{
    fn get_attr(&self, attribute: &str, _heap: &'v Heap) -> Option<Value<'v>> {
        self.groups.get(attribute).map(|v| v.to_value())
    }

    fn dir_attr(&self) -> Vec<String> {
        self.sorted_names()
    }

    fn to_bool(&self) -> bool {
        !self.groups.is_empty()
    }

    fn length(&self) -> starlark::Result<i32> {
        Ok(self.groups.len() as i32)
    }

    fn at(&self, index: Value<'v>, _heap: &'v Heap) -> starlark::Result<Value<'v>> {
        let key = index.unpack_str().ok_or_else(|| {
            to_starlark_error(anyhow::anyhow!(
                "OutputGroupInfo: key must be string, got {}",
                index.get_type()
            ))
        })?;
        match self.groups.get(key) {
            Some(v) => Ok(v.to_value()),
            None => Err(to_starlark_error(anyhow::anyhow!(
                "OutputGroupInfo has no output group \"{}\"",
                key
            ))),
        }
    }

    fn is_in(&self, other: Value<'v>) -> starlark::Result<bool> {
        Ok(match other.unpack_str() {
            Some(key) => self.groups.contains_key(key),
            None => false,
        })
    }

    unsafe fn iterate(&self, me: Value<'v>, _heap: &'v Heap) -> starlark::Result<Value<'v>> {
        Ok(me)
    }

    unsafe fn iter_size_hint(&self, index: usize) -> (usize, Option<usize>) {
        let remaining = self.groups.len().saturating_sub(index);
        (remaining, Some(remaining))
    }

    unsafe fn iter_next(&self, index: usize, heap: &'v Heap) -> Option<Value<'v>> {
        self.sorted_names()
            .get(index)
            .map(|name| heap.alloc(name.as_str()))
    }

    unsafe fn iter_stop(&self) {}
}

/// The `OutputGroupInfo` constructor: each keyword argument names a group
/// and maps to a depset of files, or a list of files.
#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct OutputGroupInfoCallable;

starlark_simple_value!(OutputGroupInfoCallable);

impl fmt::Display for OutputGroupInfoCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<provider OutputGroupInfo>")
    }
}

#[starlark_value(type = "provider")]
impl<'v> StarlarkValue<'v> for OutputGroupInfoCallable {
    fn invoke(
        &self,
        _me: Value<'v>,
        args: &Arguments<'v, '_>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> starlark::Result<Value<'v>> {
        args.no_positional_args(eval.heap())?;
        let named = args.names_map()?;

        let mut groups: SmallMap<String, Value<'v>> = SmallMap::with_capacity(named.len());
        for (key, value) in named.iter() {
            let group = key.as_str();
            let value = *value;
            let depset = if Depset::from_value(value).is_some() {
                value
            } else if let Some(list) = ListRef::from_value(value) {
                let files: Vec<Value<'v>> = list.iter().collect();
                for f in &files {
                    if f.downcast_ref::<StarlarkFile>().is_none() {
                        return Err(to_starlark_error(anyhow::anyhow!(
                            "OutputGroupInfo: output group \"{}\" contains non-File: {}",
                            group,
                            f.get_type()
                        )));
                    }
                }
                eval.heap().alloc(
                    Depset::build(DepsetOrder::Default, files, Vec::new())
                        .map_err(to_starlark_error)?,
                )
            } else {
                return Err(to_starlark_error(anyhow::anyhow!(
                    "OutputGroupInfo: output group \"{}\" must be a depset or list of Files, got {}",
                    group,
                    value.get_type()
                )));
            };
            groups.insert(group.to_owned(), depset);
        }

        Ok(eval.heap().alloc(OutputGroupInfoGen { groups }))
    }
}
