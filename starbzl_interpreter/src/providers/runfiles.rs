//! Runfiles values: the files an executable needs at runtime.
//!
//! Conceptually a symlink forest: a depset of files plus two depsets of
//! symlink entries, and the names of empty files to create. Created by
//! `ctx.runfiles(...)` and carried through `DefaultInfo`.

use std::fmt;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::coerce::Coerce;
use starlark::environment::Methods;
use starlark::environment::MethodsBuilder;
use starlark::environment::MethodsStatic;
use starlark::starlark_complex_value;
use starlark::starlark_module;
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
use crate::util::iterable_elements;

#[derive(Debug, Trace, Freeze, ProvidesStaticType, NoSerialize, Allocative)]
#[repr(C)]
pub struct RunfilesValueGen<V> {
    files: V,
    symlinks: V,
    root_symlinks: V,
    empty_filenames: V,
}

unsafe impl<From: Coerce<To>, To> Coerce<RunfilesValueGen<To>> for RunfilesValueGen<From> {}

starlark_complex_value!(pub RunfilesValue);

impl<'v> RunfilesValue<'v> {
    pub fn new(
        files: Value<'v>,
        symlinks: Value<'v>,
        root_symlinks: Value<'v>,
        empty_filenames: Value<'v>,
    ) -> Self {
        RunfilesValueGen {
            files,
            symlinks,
            root_symlinks,
            empty_filenames,
        }
    }

    /// Runfiles with no files and no symlinks.
    pub fn empty(heap: &'v Heap) -> anyhow::Result<RunfilesValue<'v>> {
        let empty = || -> anyhow::Result<Value<'v>> {
            Ok(heap.alloc(Depset::build(DepsetOrder::Default, Vec::new(), Vec::new())?))
        };
        Ok(Self::new(empty()?, empty()?, empty()?, empty()?))
    }
}

impl<'v, V: ValueLike<'v>> RunfilesValueGen<V> {
    pub fn is_empty(&self) -> bool {
        let depset_empty = |v: &V| {
            Depset::from_value(v.to_value()).map_or(true, |d| d.is_empty())
        };
        depset_empty(&self.files)
            && depset_empty(&self.symlinks)
            && depset_empty(&self.root_symlinks)
    }

    pub fn files(&self) -> Value<'v> {
        self.files.to_value()
    }
}

impl<V: fmt::Debug> fmt::Display for RunfilesValueGen<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "runfiles(files = {:?}, root_symlinks = {:?}, symlinks = {:?})",
            self.files, self.root_symlinks, self.symlinks
        )
    }
}

#[starlark_value(type = "runfiles")]
impl<'v, V: ValueLike<'v>> StarlarkValue<'v> for RunfilesValueGen<V>
where
    Self: ProvidesStaticType<'v>,
{
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(runfiles_methods)
    }

    fn to_bool(&self) -> bool {
        !self.is_empty()
    }
}

/// Merges two runfiles values into a fresh one; either operand is returned
/// unchanged when the other is empty.
fn merge_pair<'v>(
    left: Value<'v>,
    right: Value<'v>,
    heap: &'v Heap,
) -> anyhow::Result<Value<'v>> {
    let left_rf = RunfilesValue::from_value(left)
        .ok_or_else(|| anyhow::anyhow!("merge requires a runfiles value"))?;
    let right_rf = RunfilesValue::from_value(right)
        .ok_or_else(|| anyhow::anyhow!("merge: got {}, want runfiles", right.get_type()))?;
    if left_rf.is_empty() {
        return Ok(right);
    }
    if right_rf.is_empty() {
        return Ok(left);
    }
    let union = |a: &Value<'v>, b: &Value<'v>| -> anyhow::Result<Value<'v>> {
        Ok(heap.alloc(Depset::build(
            DepsetOrder::Default,
            Vec::new(),
            vec![*a, *b],
        )?))
    };
    Ok(heap.alloc(RunfilesValue::new(
        union(&left_rf.files.to_value(), &right_rf.files.to_value())?,
        union(&left_rf.symlinks.to_value(), &right_rf.symlinks.to_value())?,
        union(
            &left_rf.root_symlinks.to_value(),
            &right_rf.root_symlinks.to_value(),
        )?,
        union(
            &left_rf.empty_filenames.to_value(),
            &right_rf.empty_filenames.to_value(),
        )?,
    )))
}

#[starlark_module]
fn runfiles_methods(builder: &mut MethodsBuilder) {
    #[starlark(attribute)]
    fn files<'v>(this: Value<'v>) -> anyhow::Result<Value<'v>> {
        let rf = RunfilesValue::from_value(this)
            .ok_or_else(|| anyhow::anyhow!("not a runfiles value"))?;
        Ok(rf.files.to_value())
    }

    #[starlark(attribute)]
    fn symlinks<'v>(this: Value<'v>) -> anyhow::Result<Value<'v>> {
        let rf = RunfilesValue::from_value(this)
            .ok_or_else(|| anyhow::anyhow!("not a runfiles value"))?;
        Ok(rf.symlinks.to_value())
    }

    #[starlark(attribute)]
    fn root_symlinks<'v>(this: Value<'v>) -> anyhow::Result<Value<'v>> {
        let rf = RunfilesValue::from_value(this)
            .ok_or_else(|| anyhow::anyhow!("not a runfiles value"))?;
        Ok(rf.root_symlinks.to_value())
    }

    #[starlark(attribute)]
    fn empty_filenames<'v>(this: Value<'v>) -> anyhow::Result<Value<'v>> {
        let rf = RunfilesValue::from_value(this)
            .ok_or_else(|| anyhow::anyhow!("not a runfiles value"))?;
        Ok(rf.empty_filenames.to_value())
    }

    /// Returns runfiles including the contents of both operands.
    fn merge<'v>(
        this: Value<'v>,
        #[starlark(require = pos)] other: Value<'v>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        merge_pair(this, other, heap)
    }

    /// Returns runfiles including this and every element of the sequence.
    fn merge_all<'v>(
        this: Value<'v>,
        #[starlark(require = pos)] other: Value<'v>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        let mut acc = this;
        for rf in iterable_elements("other", other)? {
            acc = merge_pair(acc, rf, heap)?;
        }
        Ok(acc)
    }
}
