//! `ctx.actions`: the action-recording factory.
//!
//! Declare operations return new derived files under the bin dir. Action
//! operations append a [`DeclaredAction`] to an ordered log consumed by
//! analysis tooling; nothing is ever executed and no file is created.

use std::fmt;
use std::sync::Arc;

use allocative::Allocative;
use dupe::Dupe;
use parking_lot::Mutex;
use starlark::any::ProvidesStaticType;
use starlark::environment::Methods;
use starlark::environment::MethodsBuilder;
use starlark::environment::MethodsStatic;
use starlark::starlark_module;
use starlark::starlark_simple_value;
use starlark::values::dict::DictRef;
use starlark::values::none::NoneOr;
use starlark::values::none::NoneType;
use starlark::values::starlark_value;
use starlark::values::Heap;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Value;
use starlark::values::ValueLike;
use starbzl_core::Label;

use crate::types::depset::Depset;
use crate::types::file::StarlarkFile;
use crate::util::iterable_elements;

/// The operation a recorded action stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Allocative)]
pub enum ActionKind {
    Run,
    RunShell,
    Write,
    Symlink,
    ExpandTemplate,
    DoNothing,
}

impl ActionKind {
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Run => "run",
            ActionKind::RunShell => "run_shell",
            ActionKind::Write => "write",
            ActionKind::Symlink => "symlink",
            ActionKind::ExpandTemplate => "expand_template",
            ActionKind::DoNothing => "do_nothing",
        }
    }
}

/// One recorded action declaration.
#[derive(Debug, Clone, Allocative)]
pub struct DeclaredAction {
    pub kind: ActionKind,
    pub mnemonic: String,
    pub progress_message: Option<String>,
    pub outputs: Vec<StarlarkFile>,
    pub inputs: Vec<StarlarkFile>,
    pub tools: Vec<StarlarkFile>,
    pub executable: Option<StarlarkFile>,
    pub executable_str: Option<String>,
    pub arguments: Vec<String>,
    pub command: Option<String>,
    pub content: Option<String>,
    pub substitutions: Vec<(String, String)>,
    pub env: Vec<(String, String)>,
    pub execution_requirements: Vec<(String, String)>,
    pub is_executable: bool,
    pub use_default_shell_env: bool,
    pub target_file: Option<StarlarkFile>,
    pub target_path: Option<String>,
}

impl DeclaredAction {
    fn new(kind: ActionKind, mnemonic: &str) -> Self {
        Self {
            kind,
            mnemonic: mnemonic.to_owned(),
            progress_message: None,
            outputs: Vec::new(),
            inputs: Vec::new(),
            tools: Vec::new(),
            executable: None,
            executable_str: None,
            arguments: Vec::new(),
            command: None,
            content: None,
            substitutions: Vec::new(),
            env: Vec::new(),
            execution_requirements: Vec::new(),
            is_executable: false,
            use_default_shell_env: false,
            target_file: None,
            target_path: None,
        }
    }
}

/// The shared, ordered action log.
#[derive(Debug, Clone, Dupe, Default, Allocative)]
pub struct ActionLog {
    #[allocative(skip)]
    actions: Arc<Mutex<Vec<DeclaredAction>>>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, action: DeclaredAction) {
        self.actions.lock().push(action);
    }

    pub fn snapshot(&self) -> Vec<DeclaredAction> {
        self.actions.lock().clone()
    }
}

/// The `ctx.actions` value.
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkActions {
    label: Label,
    bin_dir: String,
    log: ActionLog,
}

starlark_simple_value!(StarlarkActions);

impl StarlarkActions {
    pub fn new(label: Label, bin_dir: String, log: ActionLog) -> Self {
        Self {
            label,
            bin_dir,
            log,
        }
    }

    /// Root-relative path of a declared file: `pkg/<filename>`, or the
    /// sibling's directory plus the filename.
    fn declared_path(&self, filename: &str, sibling: Option<&StarlarkFile>) -> String {
        match sibling {
            Some(sibling) => {
                let dir = sibling.dirname_short();
                if dir.is_empty() {
                    filename.to_owned()
                } else {
                    format!("{}/{}", dir, filename)
                }
            }
            None => {
                if self.label.pkg().is_empty() {
                    filename.to_owned()
                } else {
                    format!("{}/{}", self.label.pkg(), filename)
                }
            }
        }
    }
}

impl fmt::Display for StarlarkActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<actions for {}>", self.label)
    }
}

#[starlark_value(type = "actions")]
impl<'v> StarlarkValue<'v> for StarlarkActions {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(actions_methods)
    }
}

fn sibling_file(sibling: NoneOr<Value<'_>>) -> anyhow::Result<Option<StarlarkFile>> {
    match sibling.into_option() {
        None => Ok(None),
        Some(v) => match v.downcast_ref::<StarlarkFile>() {
            Some(f) => Ok(Some(f.clone())),
            None => anyhow::bail!("sibling must be a File, got {}", v.get_type()),
        },
    }
}

fn file_from_value(what: &str, value: Value<'_>) -> anyhow::Result<StarlarkFile> {
    value
        .downcast_ref::<StarlarkFile>()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("{} must be a File, got {}", what, value.get_type()))
}

/// Accepts a list of files or a depset of files.
fn files_from_value(what: &str, value: Value<'_>) -> anyhow::Result<Vec<StarlarkFile>> {
    if value.is_none() {
        return Ok(Vec::new());
    }
    let elements = match Depset::from_value(value) {
        Some(depset) => depset.to_list()?,
        None => iterable_elements(what, value)?,
    };
    elements
        .into_iter()
        .map(|v| file_from_value(what, v))
        .collect()
}

/// Flattens command line arguments: strings, Files and `Args` objects.
fn strings_from_arguments(what: &str, value: Value<'_>) -> anyhow::Result<Vec<String>> {
    let mut out = Vec::new();
    for element in iterable_elements(what, value)? {
        if let Some(s) = element.unpack_str() {
            out.push(s.to_owned());
        } else if let Some(f) = element.downcast_ref::<StarlarkFile>() {
            out.push(f.path().to_owned());
        } else if let Some(args) = element.downcast_ref::<StarlarkArgs>() {
            out.extend(args.values());
        } else {
            anyhow::bail!(
                "{} elements must be strings, Files or Args, got {}",
                what,
                element.get_type()
            );
        }
    }
    Ok(out)
}

fn string_dict(what: &str, value: Value<'_>) -> anyhow::Result<Vec<(String, String)>> {
    if value.is_none() {
        return Ok(Vec::new());
    }
    let dict = DictRef::from_value(value)
        .ok_or_else(|| anyhow::anyhow!("{} must be a dict, got {}", what, value.get_type()))?;
    let mut out = Vec::with_capacity(dict.len());
    for (k, v) in dict.iter() {
        let k = k
            .unpack_str()
            .ok_or_else(|| anyhow::anyhow!("{} keys must be strings, got {}", what, k.get_type()))?;
        let v = v
            .unpack_str()
            .ok_or_else(|| anyhow::anyhow!("{} values must be strings, got {}", what, v.get_type()))?;
        out.push((k.to_owned(), v.to_owned()));
    }
    Ok(out)
}

#[starlark_module]
fn actions_methods(builder: &mut MethodsBuilder) {
    /// Declares a new output file under the bin dir.
    fn declare_file<'v>(
        this: &StarlarkActions,
        #[starlark(require = pos)] filename: &str,
        #[starlark(require = named, default = NoneOr::None)] sibling: NoneOr<Value<'v>>,
    ) -> anyhow::Result<StarlarkFile> {
        let sibling = sibling_file(sibling)?;
        let path = this.declared_path(filename, sibling.as_ref());
        Ok(StarlarkFile::derived(
            &this.bin_dir,
            &path,
            Some(this.label.clone()),
        ))
    }

    /// Declares a new output directory (tree artifact).
    fn declare_directory<'v>(
        this: &StarlarkActions,
        #[starlark(require = pos)] filename: &str,
        #[starlark(require = named, default = NoneOr::None)] sibling: NoneOr<Value<'v>>,
    ) -> anyhow::Result<StarlarkFile> {
        let sibling = sibling_file(sibling)?;
        let path = this.declared_path(filename, sibling.as_ref());
        Ok(StarlarkFile::tree(
            &this.bin_dir,
            &path,
            Some(this.label.clone()),
        ))
    }

    /// Declares a new output symlink.
    fn declare_symlink<'v>(
        this: &StarlarkActions,
        #[starlark(require = pos)] filename: &str,
        #[starlark(require = named, default = NoneOr::None)] sibling: NoneOr<Value<'v>>,
    ) -> anyhow::Result<StarlarkFile> {
        let sibling = sibling_file(sibling)?;
        let path = this.declared_path(filename, sibling.as_ref());
        Ok(StarlarkFile::symlink(
            &this.bin_dir,
            &path,
            Some(this.label.clone()),
        ))
    }

    /// Records an action with no outputs and no effect.
    fn do_nothing<'v>(
        this: &StarlarkActions,
        #[starlark(require = named)] mnemonic: &str,
        #[starlark(require = named, default = NoneOr::None)] inputs: NoneOr<Value<'v>>,
    ) -> anyhow::Result<NoneType> {
        let mut action = DeclaredAction::new(ActionKind::DoNothing, mnemonic);
        if let Some(inputs) = inputs.into_option() {
            action.inputs = files_from_value("inputs", inputs)?;
        }
        this.log.record(action);
        Ok(NoneType)
    }

    /// Records a file-write action.
    fn write<'v>(
        this: &StarlarkActions,
        #[starlark(require = named)] output: Value<'v>,
        #[starlark(require = named)] content: Value<'v>,
        #[starlark(require = named, default = false)] is_executable: bool,
        #[starlark(require = named, default = NoneOr::None)] mnemonic: NoneOr<&str>,
    ) -> anyhow::Result<NoneType> {
        let output = file_from_value("output", output)?;
        let content = if let Some(s) = content.unpack_str() {
            s.to_owned()
        } else if let Some(args) = content.downcast_ref::<StarlarkArgs>() {
            args.values().join("\n")
        } else {
            anyhow::bail!(
                "content must be a string or Args, got {}",
                content.get_type()
            );
        };
        let mut action =
            DeclaredAction::new(ActionKind::Write, mnemonic.into_option().unwrap_or("FileWrite"));
        action.outputs = vec![output];
        action.content = Some(content);
        action.is_executable = is_executable;
        this.log.record(action);
        Ok(NoneType)
    }

    /// Records an executable invocation.
    fn run<'v>(
        this: &StarlarkActions,
        #[starlark(require = named)] outputs: Value<'v>,
        #[starlark(require = named, default = NoneOr::None)] inputs: NoneOr<Value<'v>>,
        #[starlark(require = named)] executable: Value<'v>,
        #[starlark(require = named, default = NoneOr::None)] tools: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] arguments: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] mnemonic: NoneOr<&str>,
        #[starlark(require = named, default = NoneOr::None)] progress_message: NoneOr<&str>,
        #[starlark(require = named, default = false)] use_default_shell_env: bool,
        #[starlark(require = named, default = NoneOr::None)] env: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] execution_requirements: NoneOr<
            Value<'v>,
        >,
    ) -> anyhow::Result<NoneType> {
        let mut action =
            DeclaredAction::new(ActionKind::Run, mnemonic.into_option().unwrap_or("Action"));
        action.outputs = files_from_value("outputs", outputs)?;
        if let Some(inputs) = inputs.into_option() {
            action.inputs = files_from_value("inputs", inputs)?;
        }
        if let Some(tools) = tools.into_option() {
            action.tools = files_from_value("tools", tools)?;
        }
        if let Some(arguments) = arguments.into_option() {
            action.arguments = strings_from_arguments("arguments", arguments)?;
        }
        if let Some(f) = executable.downcast_ref::<StarlarkFile>() {
            action.executable = Some(f.clone());
        } else if let Some(s) = executable.unpack_str() {
            action.executable_str = Some(s.to_owned());
        } else {
            anyhow::bail!(
                "executable must be a File or string, got {}",
                executable.get_type()
            );
        }
        action.progress_message = progress_message.into_option().map(str::to_owned);
        action.use_default_shell_env = use_default_shell_env;
        if let Some(env) = env.into_option() {
            action.env = string_dict("env", env)?;
        }
        if let Some(reqs) = execution_requirements.into_option() {
            action.execution_requirements = string_dict("execution_requirements", reqs)?;
        }
        this.log.record(action);
        Ok(NoneType)
    }

    /// Records a shell command invocation.
    fn run_shell<'v>(
        this: &StarlarkActions,
        #[starlark(require = named)] outputs: Value<'v>,
        #[starlark(require = named, default = NoneOr::None)] inputs: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] tools: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] arguments: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] mnemonic: NoneOr<&str>,
        #[starlark(require = named)] command: Value<'v>,
        #[starlark(require = named, default = NoneOr::None)] progress_message: NoneOr<&str>,
        #[starlark(require = named, default = false)] use_default_shell_env: bool,
        #[starlark(require = named, default = NoneOr::None)] env: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] execution_requirements: NoneOr<
            Value<'v>,
        >,
    ) -> anyhow::Result<NoneType> {
        let mut action = DeclaredAction::new(
            ActionKind::RunShell,
            mnemonic.into_option().unwrap_or("Action"),
        );
        action.outputs = files_from_value("outputs", outputs)?;
        if let Some(inputs) = inputs.into_option() {
            action.inputs = files_from_value("inputs", inputs)?;
        }
        if let Some(tools) = tools.into_option() {
            action.tools = files_from_value("tools", tools)?;
        }
        if let Some(arguments) = arguments.into_option() {
            action.arguments = strings_from_arguments("arguments", arguments)?;
        }
        if let Some(s) = command.unpack_str() {
            action.command = Some(s.to_owned());
        } else {
            // The deprecated list form contributes its elements to argv.
            match strings_from_arguments("command", command) {
                Ok(parts) => action.arguments.extend(parts),
                Err(_) => {
                    anyhow::bail!("command must be a string, got {}", command.get_type())
                }
            }
        }
        action.progress_message = progress_message.into_option().map(str::to_owned);
        action.use_default_shell_env = use_default_shell_env;
        if let Some(env) = env.into_option() {
            action.env = string_dict("env", env)?;
        }
        if let Some(reqs) = execution_requirements.into_option() {
            action.execution_requirements = string_dict("execution_requirements", reqs)?;
        }
        this.log.record(action);
        Ok(NoneType)
    }

    /// Records a template expansion.
    fn expand_template<'v>(
        this: &StarlarkActions,
        #[starlark(require = named)] template: Value<'v>,
        #[starlark(require = named)] output: Value<'v>,
        #[starlark(require = named, default = NoneOr::None)] substitutions: NoneOr<Value<'v>>,
        #[starlark(require = named, default = false)] is_executable: bool,
    ) -> anyhow::Result<NoneType> {
        let template = file_from_value("template", template)?;
        let output = file_from_value("output", output)?;
        let mut action = DeclaredAction::new(ActionKind::ExpandTemplate, "TemplateExpansion");
        action.inputs = vec![template.clone()];
        action.outputs = vec![output];
        if let Some(substitutions) = substitutions.into_option() {
            if let Some(dict) = substitutions.downcast_ref::<StarlarkTemplateDict>() {
                action.substitutions = dict.entries();
            } else {
                action.substitutions = string_dict("substitutions", substitutions)?;
            }
        }
        action.is_executable = is_executable;
        this.log.record(action);
        Ok(NoneType)
    }

    /// Records a symlink declaration. Exactly one of `target_file` and
    /// `target_path` must be given.
    fn symlink<'v>(
        this: &StarlarkActions,
        #[starlark(require = named)] output: Value<'v>,
        #[starlark(require = named, default = NoneOr::None)] target_file: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] target_path: NoneOr<&str>,
        #[starlark(require = named, default = false)] is_executable: bool,
        #[starlark(require = named, default = NoneOr::None)] progress_message: NoneOr<&str>,
    ) -> anyhow::Result<NoneType> {
        let output = file_from_value("output", output)?;
        let target_file = target_file.into_option();
        let target_path = target_path.into_option();
        if target_file.is_some() == target_path.is_some() {
            anyhow::bail!("exactly one of target_file or target_path is required");
        }
        let mut action = DeclaredAction::new(ActionKind::Symlink, "Symlink");
        action.outputs = vec![output];
        action.is_executable = is_executable;
        action.progress_message = Some(
            progress_message
                .into_option()
                .map(str::to_owned)
                .unwrap_or_else(|| "Creating symlink %{output}".to_owned()),
        );
        if let Some(target) = target_file {
            let target = file_from_value("target_file", target)?;
            action.inputs = vec![target.clone()];
            action.target_file = Some(target);
        }
        if let Some(path) = target_path {
            action.target_path = Some(path.to_owned());
        }
        this.log.record(action);
        Ok(NoneType)
    }

    /// A fresh command-line builder.
    fn args(this: &StarlarkActions) -> anyhow::Result<StarlarkArgs> {
        let _ = this;
        Ok(StarlarkArgs::default())
    }

    /// A fresh substitution builder for `expand_template`.
    fn template_dict(this: &StarlarkActions) -> anyhow::Result<StarlarkTemplateDict> {
        let _ = this;
        Ok(StarlarkTemplateDict::default())
    }
}

/// A command-line builder accumulated by `add` and friends.
#[derive(Debug, Default, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkArgs {
    #[allocative(skip)]
    values: Mutex<Vec<String>>,
}

starlark_simple_value!(StarlarkArgs);

impl StarlarkArgs {
    pub fn values(&self) -> Vec<String> {
        self.values.lock().clone()
    }

    fn push_value(&self, value: Value<'_>) -> anyhow::Result<()> {
        let rendered = if let Some(s) = value.unpack_str() {
            s.to_owned()
        } else if let Some(f) = value.downcast_ref::<StarlarkFile>() {
            f.path().to_owned()
        } else {
            value.to_str()
        };
        self.values.lock().push(rendered);
        Ok(())
    }
}

impl fmt::Display for StarlarkArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Args: {} values>", self.values.lock().len())
    }
}

#[starlark_value(type = "Args")]
impl<'v> StarlarkValue<'v> for StarlarkArgs {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(args_methods)
    }
}

#[starlark_module]
fn args_methods(builder: &mut MethodsBuilder) {
    /// Appends one value; Files contribute their exec path.
    fn add<'v>(
        this: Value<'v>,
        #[starlark(require = pos)] value: Value<'v>,
    ) -> anyhow::Result<Value<'v>> {
        let args = this
            .downcast_ref::<StarlarkArgs>()
            .ok_or_else(|| anyhow::anyhow!("not an Args value"))?;
        args.push_value(value)?;
        Ok(this)
    }

    /// Appends every element of a list or depset.
    fn add_all<'v>(
        this: Value<'v>,
        #[starlark(require = pos)] values: Value<'v>,
    ) -> anyhow::Result<Value<'v>> {
        let args = this
            .downcast_ref::<StarlarkArgs>()
            .ok_or_else(|| anyhow::anyhow!("not an Args value"))?;
        let elements = match Depset::from_value(values) {
            Some(depset) => depset.to_list()?,
            None => iterable_elements("values", values)?,
        };
        for element in elements {
            args.push_value(element)?;
        }
        Ok(this)
    }

    /// Appends the elements joined into a single argument.
    fn add_joined<'v>(
        this: Value<'v>,
        #[starlark(require = pos)] values: Value<'v>,
        #[starlark(require = named, default = ",")] join_with: &str,
    ) -> anyhow::Result<Value<'v>> {
        let args = this
            .downcast_ref::<StarlarkArgs>()
            .ok_or_else(|| anyhow::anyhow!("not an Args value"))?;
        let elements = match Depset::from_value(values) {
            Some(depset) => depset.to_list()?,
            None => iterable_elements("values", values)?,
        };
        let mut parts = Vec::with_capacity(elements.len());
        for element in elements {
            if let Some(s) = element.unpack_str() {
                parts.push(s.to_owned());
            } else if let Some(f) = element.downcast_ref::<StarlarkFile>() {
                parts.push(f.path().to_owned());
            } else {
                parts.push(element.to_str());
            }
        }
        args.values.lock().push(parts.join(join_with));
        Ok(this)
    }

    /// Accepted for compatibility; the mock recorder has no param files.
    fn use_param_file<'v>(
        this: Value<'v>,
        #[starlark(require = pos)] param_file_arg: &str,
        #[starlark(require = named, default = false)] use_always: bool,
    ) -> anyhow::Result<Value<'v>> {
        let _ = param_file_arg;
        let _ = use_always;
        Ok(this)
    }

    /// Accepted for compatibility; the mock recorder has no param files.
    fn set_param_file_format<'v>(
        this: Value<'v>,
        #[starlark(require = pos)] format: &str,
    ) -> anyhow::Result<Value<'v>> {
        let _ = format;
        Ok(this)
    }
}

/// Substitutions builder for `expand_template`.
#[derive(Debug, Default, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkTemplateDict {
    #[allocative(skip)]
    entries: Mutex<Vec<(String, String)>>,
}

starlark_simple_value!(StarlarkTemplateDict);

impl StarlarkTemplateDict {
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().clone()
    }
}

impl fmt::Display for StarlarkTemplateDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<TemplateDict: {} entries>", self.entries.lock().len())
    }
}

#[starlark_value(type = "TemplateDict")]
impl<'v> StarlarkValue<'v> for StarlarkTemplateDict {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(template_dict_methods)
    }
}

#[starlark_module]
fn template_dict_methods(builder: &mut MethodsBuilder) {
    fn add<'v>(
        this: Value<'v>,
        #[starlark(require = pos)] key: &str,
        #[starlark(require = pos)] value: &str,
    ) -> anyhow::Result<Value<'v>> {
        let dict = this
            .downcast_ref::<StarlarkTemplateDict>()
            .ok_or_else(|| anyhow::anyhow!("not a TemplateDict"))?;
        dict.entries.lock().push((key.to_owned(), value.to_owned()));
        Ok(this)
    }

    /// Appends the joined flattening of a depset under `key`.
    fn add_joined<'v>(
        this: Value<'v>,
        #[starlark(require = pos)] key: &str,
        #[starlark(require = pos)] values: Value<'v>,
        #[starlark(require = named, default = ",")] join_with: &str,
    ) -> anyhow::Result<Value<'v>> {
        let dict = this
            .downcast_ref::<StarlarkTemplateDict>()
            .ok_or_else(|| anyhow::anyhow!("not a TemplateDict"))?;
        let elements = match Depset::from_value(values) {
            Some(depset) => depset.to_list()?,
            None => iterable_elements("values", values)?,
        };
        let mut parts = Vec::with_capacity(elements.len());
        for element in elements {
            if let Some(s) = element.unpack_str() {
                parts.push(s.to_owned());
            } else if let Some(f) = element.downcast_ref::<StarlarkFile>() {
                parts.push(f.path().to_owned());
            } else {
                parts.push(element.to_str());
            }
        }
        dict.entries.lock().push((key.to_owned(), parts.join(join_with)));
        Ok(this)
    }
}
