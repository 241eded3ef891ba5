//! Built-in provider schemas: `DefaultInfo`, `OutputGroupInfo`, runfiles.

pub mod default_info;
pub mod output_group_info;
pub mod runfiles;

use starlark::environment::GlobalsBuilder;

pub use default_info::DefaultInfo;
pub use default_info::DefaultInfoCallable;
pub use output_group_info::OutputGroupInfo;
pub use output_group_info::OutputGroupInfoCallable;
pub use runfiles::RunfilesValue;

pub(crate) fn register_builtin_providers(globals: &mut GlobalsBuilder) {
    globals.set("DefaultInfo", DefaultInfoCallable);
    globals.set("OutputGroupInfo", OutputGroupInfoCallable);
}
