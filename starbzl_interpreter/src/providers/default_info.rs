//! `DefaultInfo`: the provider every target carries implicitly.

use std::fmt;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::coerce::Coerce;
use starlark::eval::Arguments;
use starlark::eval::Evaluator;
use starlark::starlark_complex_value;
use starlark::starlark_simple_value;
use starlark::values::starlark_value;
use starlark::values::Freeze;
use starlark::values::FreezeResult;
use starlark::values::Heap;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Trace;
use starlark::values::Value;
use starlark::values::ValueLike;

use crate::providers::runfiles::RunfilesValue;
use crate::types::depset::Depset;
use crate::types::file::StarlarkFile;
use crate::util::to_starlark_error;

#[derive(Debug, Trace, Freeze, ProvidesStaticType, NoSerialize, Allocative)]
#[repr(C)]
pub struct DefaultInfoGen<V> {
    files: Option<V>,
    runfiles: Option<V>,
    data_runfiles: Option<V>,
    default_runfiles: Option<V>,
    executable: Option<V>,
}

unsafe impl<From: Coerce<To>, To> Coerce<DefaultInfoGen<To>> for DefaultInfoGen<From> {}

starlark_complex_value!(pub DefaultInfo);

impl<'v, V: ValueLike<'v>> DefaultInfoGen<V> {
    pub fn files(&self) -> Option<Value<'v>> {
        self.files.as_ref().map(|v| v.to_value())
    }

    pub fn executable(&self) -> Option<Value<'v>> {
        self.executable.as_ref().map(|v| v.to_value())
    }
}

impl<V: fmt::Debug> fmt::Display for DefaultInfoGen<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DefaultInfo(files = {:?}, default_runfiles = {:?})",
            self.files, self.default_runfiles
        )
    }
}

#[starlark_value(type = "DefaultInfo")]
impl<'v, V: ValueLike<'v>> StarlarkValue<'v> for DefaultInfoGen<V>
where
    Self: ProvidesStaticType<'v>,
{
    fn get_attr(&self, attribute: &str, _heap: &'v Heap) -> Option<Value<'v>> {
        let opt = |v: &Option<V>| Some(v.as_ref().map_or(Value::new_none(), |v| v.to_value()));
        match attribute {
            "files" => opt(&self.files),
            "runfiles" => opt(&self.runfiles),
            "data_runfiles" => opt(&self.data_runfiles),
            // The legacy runfiles field answers for default_runfiles when
            // neither split field was given.
            "default_runfiles" => {
                if self.data_runfiles.is_none() && self.default_runfiles.is_none() {
                    opt(&self.runfiles)
                } else {
                    opt(&self.default_runfiles)
                }
            }
            "executable" => opt(&self.executable),
            "files_to_run" => Some(Value::new_none()),
            _ => None,
        }
    }

    fn dir_attr(&self) -> Vec<String> {
        [
            "data_runfiles",
            "default_runfiles",
            "executable",
            "files",
            "files_to_run",
            "runfiles",
        ]
        .map(str::to_owned)
        .to_vec()
    }
}

/// The `DefaultInfo` constructor registered in the predeclared environment.
#[derive(Debug, ProvidesStaticType, NoSerialize, Allocative)]
pub struct DefaultInfoCallable;

starlark_simple_value!(DefaultInfoCallable);

impl fmt::Display for DefaultInfoCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<provider DefaultInfo>")
    }
}

#[starlark_value(type = "provider")]
impl<'v> StarlarkValue<'v> for DefaultInfoCallable {
    fn invoke(
        &self,
        _me: Value<'v>,
        args: &Arguments<'v, '_>,
        eval: &mut Evaluator<'v, '_, '_>,
    ) -> starlark::Result<Value<'v>> {
        args.no_positional_args(eval.heap())?;
        let named = args.names_map()?;

        let mut files = None;
        let mut runfiles = None;
        let mut data_runfiles = None;
        let mut default_runfiles = None;
        let mut executable = None;

        for (key, value) in named.iter() {
            let value = *value;
            if value.is_none() {
                continue;
            }
            match key.as_str() {
                "files" => {
                    if Depset::from_value(value).is_none() {
                        return Err(to_starlark_error(anyhow::anyhow!(
                            "DefaultInfo: files must be a depset, got {}",
                            value.get_type()
                        )));
                    }
                    files = Some(value);
                }
                "runfiles" | "data_runfiles" | "default_runfiles" => {
                    if RunfilesValue::from_value(value).is_none() {
                        return Err(to_starlark_error(anyhow::anyhow!(
                            "DefaultInfo: {} must be a runfiles object, got {}",
                            key.as_str(),
                            value.get_type()
                        )));
                    }
                    match key.as_str() {
                        "runfiles" => runfiles = Some(value),
                        "data_runfiles" => data_runfiles = Some(value),
                        _ => default_runfiles = Some(value),
                    }
                }
                "executable" => {
                    if value.downcast_ref::<StarlarkFile>().is_none() {
                        return Err(to_starlark_error(anyhow::anyhow!(
                            "DefaultInfo: executable must be a File, got {}",
                            value.get_type()
                        )));
                    }
                    executable = Some(value);
                }
                other => {
                    return Err(to_starlark_error(anyhow::anyhow!(
                        "DefaultInfo: unexpected keyword argument \"{}\"",
                        other
                    )));
                }
            }
        }

        if runfiles.is_some() && (data_runfiles.is_some() || default_runfiles.is_some()) {
            return Err(to_starlark_error(anyhow::anyhow!(
                "DefaultInfo: cannot specify 'runfiles' together with 'data_runfiles' or 'default_runfiles'"
            )));
        }

        Ok(eval.heap().alloc(DefaultInfoGen {
            files,
            runfiles,
            data_runfiles,
            default_runfiles,
            executable,
        }))
    }
}
