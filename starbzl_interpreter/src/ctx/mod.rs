//! The mock rule context (`ctx`) passed to rule implementations.
//!
//! The object graph mirrors the analysis-time context of the reference
//! dialect: attribute access through `ctx.attr`, file views through
//! `ctx.files`/`ctx.file`/`ctx.executable`, predeclared outputs, and the
//! action factory. Configuration-dependent surfaces (`configuration`,
//! `fragments`, `toolchains`, `exec_groups`) are inert stub values.

pub mod actions;

use std::fmt;

use allocative::Allocative;
use starlark::any::ProvidesStaticType;
use starlark::collections::SmallMap;
use starlark::environment::Methods;
use starlark::environment::MethodsBuilder;
use starlark::environment::MethodsStatic;
use starlark::starlark_module;
use starlark::starlark_simple_value;
use starlark::values::dict::AllocDict;
use starlark::values::dict::DictRef;
use starlark::values::list::AllocList;
use starlark::values::none::NoneOr;
use starlark::values::starlark_value;
use starlark::values::Heap;
use starlark::values::NoSerialize;
use starlark::values::StarlarkValue;
use starlark::values::Value;
use starlark::values::ValueLike;
use starbzl_core::Label;

use crate::coerced::CoercedValue;
use crate::ctx::actions::StarlarkActions;
use crate::providers::runfiles::RunfilesValue;
use crate::types::depset::Depset;
use crate::types::depset::DepsetOrder;
use crate::types::file::StarlarkFile;
use crate::types::file::StarlarkFileRoot;
use crate::types::file::StarlarkSymlinkEntry;
use crate::types::label::StarlarkLabel;
use crate::util::iterable_elements;

/// Struct-like view over per-attribute values.
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct CtxAttrStruct {
    values: SmallMap<String, CoercedValue>,
}

starlark_simple_value!(CtxAttrStruct);

impl CtxAttrStruct {
    pub fn new(values: SmallMap<String, CoercedValue>) -> Self {
        Self { values }
    }
}

impl fmt::Display for CtxAttrStruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<ctx.attr>")
    }
}

#[starlark_value(type = "struct")]
impl<'v> StarlarkValue<'v> for CtxAttrStruct {
    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        self.values.get(attribute).map(|v| v.to_value(heap))
    }

    fn dir_attr(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Struct-like view over the file lists of label attributes.
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct CtxFilesStruct {
    values: SmallMap<String, Vec<StarlarkFile>>,
}

starlark_simple_value!(CtxFilesStruct);

impl CtxFilesStruct {
    pub fn new(values: SmallMap<String, Vec<StarlarkFile>>) -> Self {
        Self { values }
    }
}

impl fmt::Display for CtxFilesStruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<ctx.files>")
    }
}

#[starlark_value(type = "struct")]
impl<'v> StarlarkValue<'v> for CtxFilesStruct {
    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        self.values
            .get(attribute)
            .map(|files| heap.alloc(AllocList(files.iter().cloned())))
    }

    fn dir_attr(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Struct-like view over single files (`allow_single_file` attributes).
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct CtxFileStruct {
    values: SmallMap<String, Option<StarlarkFile>>,
}

starlark_simple_value!(CtxFileStruct);

impl CtxFileStruct {
    pub fn new(values: SmallMap<String, Option<StarlarkFile>>) -> Self {
        Self { values }
    }
}

impl fmt::Display for CtxFileStruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<ctx.file>")
    }
}

#[starlark_value(type = "struct")]
impl<'v> StarlarkValue<'v> for CtxFileStruct {
    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        self.values.get(attribute).map(|file| match file {
            Some(file) => heap.alloc(file.clone()),
            None => Value::new_none(),
        })
    }

    fn dir_attr(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Struct-like view over executables (`executable = True` attributes).
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct CtxExecutableStruct {
    values: SmallMap<String, StarlarkFile>,
}

starlark_simple_value!(CtxExecutableStruct);

impl CtxExecutableStruct {
    pub fn new(values: SmallMap<String, StarlarkFile>) -> Self {
        Self { values }
    }
}

impl fmt::Display for CtxExecutableStruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<ctx.executable>")
    }
}

#[starlark_value(type = "struct")]
impl<'v> StarlarkValue<'v> for CtxExecutableStruct {
    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        self.values.get(attribute).map(|f| heap.alloc(f.clone()))
    }

    fn dir_attr(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Predeclared outputs. `executable` answers only for executable or test
/// rules; for other rules the access is an error.
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct CtxOutputs {
    values: SmallMap<String, StarlarkFile>,
    executable: Option<StarlarkFile>,
    executable_rule: bool,
}

starlark_simple_value!(CtxOutputs);

impl CtxOutputs {
    pub fn new(
        values: SmallMap<String, StarlarkFile>,
        executable: Option<StarlarkFile>,
        executable_rule: bool,
    ) -> Self {
        Self {
            values,
            executable,
            executable_rule,
        }
    }
}

impl fmt::Display for CtxOutputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<ctx.outputs>")
    }
}

#[starlark_value(type = "ctx.outputs")]
impl<'v> StarlarkValue<'v> for CtxOutputs {
    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        if attribute == "executable" && self.executable_rule {
            return Some(match &self.executable {
                Some(f) => heap.alloc(f.clone()),
                None => Value::new_none(),
            });
        }
        self.values.get(attribute).map(|f| heap.alloc(f.clone()))
    }

    fn dir_attr(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();
        if self.executable_rule {
            names.push("executable".to_owned());
        }
        names.sort();
        names
    }
}

/// `ctx.configuration`: inert.
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkConfiguration {
    coverage_enabled: bool,
}

starlark_simple_value!(StarlarkConfiguration);

impl fmt::Display for StarlarkConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<configuration>")
    }
}

#[starlark_value(type = "configuration")]
impl<'v> StarlarkValue<'v> for StarlarkConfiguration {
    fn get_attr(&self, attribute: &str, _heap: &'v Heap) -> Option<Value<'v>> {
        match attribute {
            "coverage_enabled" => Some(Value::new_bool(self.coverage_enabled)),
            _ => None,
        }
    }

    fn dir_attr(&self) -> Vec<String> {
        vec!["coverage_enabled".to_owned()]
    }
}

/// `ctx.fragments`: every fragment resolves to an empty opaque value.
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkFragments;

starlark_simple_value!(StarlarkFragments);

impl fmt::Display for StarlarkFragments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<fragments>")
    }
}

#[starlark_value(type = "fragments")]
impl<'v> StarlarkValue<'v> for StarlarkFragments {
    fn get_attr(&self, _attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        Some(heap.alloc(StarlarkOpaque))
    }
}

/// `ctx.toolchains` / `ctx.exec_groups`: dict-like stubs answering every
/// lookup with an empty opaque value.
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkStubMapping {
    type_name: &'static str,
}

starlark_simple_value!(StarlarkStubMapping);

impl StarlarkStubMapping {
    pub fn toolchains() -> Self {
        Self {
            type_name: "toolchains",
        }
    }

    pub fn exec_groups() -> Self {
        Self {
            type_name: "exec_groups",
        }
    }
}

impl fmt::Display for StarlarkStubMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.type_name)
    }
}

#[starlark_value(type = "toolchain_context")]
impl<'v> StarlarkValue<'v> for StarlarkStubMapping {
    fn at(&self, _index: Value<'v>, heap: &'v Heap) -> starlark::Result<Value<'v>> {
        Ok(heap.alloc(StarlarkOpaque))
    }
}

/// An empty, attribute-less value used by the stubbed surfaces.
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkOpaque;

starlark_simple_value!(StarlarkOpaque);

impl fmt::Display for StarlarkOpaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("struct()")
    }
}

#[starlark_value(type = "struct")]
impl<'v> StarlarkValue<'v> for StarlarkOpaque {}

/// The rule context itself.
#[derive(Debug, Clone, ProvidesStaticType, NoSerialize, Allocative)]
pub struct StarlarkRuleContext {
    label: Label,
    workspace_name: String,
    bin_dir: String,
    genfiles_dir: String,
    build_file_path: String,
    executable_rule: bool,
    test_rule: bool,
    for_aspect: bool,
    attr: CtxAttrStruct,
    files: CtxFilesStruct,
    file: CtxFileStruct,
    executable: CtxExecutableStruct,
    outputs: CtxOutputs,
    actions: StarlarkActions,
    features: Vec<String>,
    disabled_features: Vec<String>,
    make_variables: SmallMap<String, String>,
    location_map: SmallMap<String, Vec<StarlarkFile>>,
    info_file: Option<StarlarkFile>,
    version_file: Option<StarlarkFile>,
}

starlark_simple_value!(StarlarkRuleContext);

pub(crate) struct RuleContextParts {
    pub label: Label,
    pub workspace_name: String,
    pub bin_dir: String,
    pub genfiles_dir: String,
    pub build_file_path: String,
    pub executable_rule: bool,
    pub test_rule: bool,
    pub for_aspect: bool,
    pub attr: CtxAttrStruct,
    pub files: CtxFilesStruct,
    pub file: CtxFileStruct,
    pub executable: CtxExecutableStruct,
    pub outputs: CtxOutputs,
    pub actions: StarlarkActions,
    pub features: Vec<String>,
    pub disabled_features: Vec<String>,
    pub make_variables: SmallMap<String, String>,
    pub location_map: SmallMap<String, Vec<StarlarkFile>>,
}

impl StarlarkRuleContext {
    pub(crate) fn from_parts(parts: RuleContextParts) -> Self {
        Self {
            label: parts.label,
            workspace_name: parts.workspace_name,
            bin_dir: parts.bin_dir,
            genfiles_dir: parts.genfiles_dir,
            build_file_path: parts.build_file_path,
            executable_rule: parts.executable_rule,
            test_rule: parts.test_rule,
            for_aspect: parts.for_aspect,
            attr: parts.attr,
            files: parts.files,
            file: parts.file,
            executable: parts.executable,
            outputs: parts.outputs,
            actions: parts.actions,
            features: parts.features,
            disabled_features: parts.disabled_features,
            make_variables: parts.make_variables,
            location_map: parts.location_map,
            info_file: None,
            version_file: None,
        }
    }

    fn expand_location(&self, input: &str) -> anyhow::Result<String> {
        expand_location(input, &self.location_map)
    }
}

impl fmt::Display for StarlarkRuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.for_aspect {
            write!(f, "<aspect context for {}>", self.label)
        } else {
            write!(f, "<rule context for {}>", self.label)
        }
    }
}

#[starlark_value(type = "ctx")]
impl<'v> StarlarkValue<'v> for StarlarkRuleContext {
    fn get_methods() -> Option<&'static Methods> {
        static RES: MethodsStatic = MethodsStatic::new();
        RES.methods(ctx_methods)
    }

    fn get_attr(&self, attribute: &str, heap: &'v Heap) -> Option<Value<'v>> {
        match attribute {
            "label" => Some(heap.alloc(StarlarkLabel::new(self.label.clone()))),
            "attr" => Some(heap.alloc(self.attr.clone())),
            "files" => Some(heap.alloc(self.files.clone())),
            "file" => Some(heap.alloc(self.file.clone())),
            "executable" => Some(heap.alloc(self.executable.clone())),
            "outputs" if !self.for_aspect => Some(heap.alloc(self.outputs.clone())),
            "actions" => Some(heap.alloc(self.actions.clone())),
            "bin_dir" => Some(heap.alloc(StarlarkFileRoot::new(self.bin_dir.clone()))),
            "genfiles_dir" => Some(heap.alloc(StarlarkFileRoot::new(self.genfiles_dir.clone()))),
            "workspace_name" => Some(heap.alloc(self.workspace_name.as_str())),
            "build_file_path" => Some(heap.alloc(self.build_file_path.as_str())),
            "features" => Some(heap.alloc(AllocList(self.features.iter().map(String::as_str)))),
            "disabled_features" => Some(heap.alloc(AllocList(
                self.disabled_features.iter().map(String::as_str),
            ))),
            "var" => Some(heap.alloc(AllocDict(
                self.make_variables
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            ))),
            "info_file" => Some(match &self.info_file {
                Some(f) => heap.alloc(f.clone()),
                None => Value::new_none(),
            }),
            "version_file" => Some(match &self.version_file {
                Some(f) => heap.alloc(f.clone()),
                None => Value::new_none(),
            }),
            "configuration" => Some(heap.alloc(StarlarkConfiguration {
                coverage_enabled: false,
            })),
            "fragments" => Some(heap.alloc(StarlarkFragments)),
            "toolchains" => Some(heap.alloc(StarlarkStubMapping::toolchains())),
            "exec_groups" => Some(heap.alloc(StarlarkStubMapping::exec_groups())),
            "rule" if self.for_aspect => Some(heap.alloc(self.attr.clone())),
            "aspect_ids" if self.for_aspect => {
                Some(heap.alloc(AllocList(std::iter::empty::<Value<'v>>())))
            }
            "created_actions" => Some(Value::new_none()),
            _ => None,
        }
    }

    fn dir_attr(&self) -> Vec<String> {
        let mut names = vec![
            "actions",
            "attr",
            "bin_dir",
            "build_file_path",
            "configuration",
            "created_actions",
            "disabled_features",
            "exec_groups",
            "executable",
            "features",
            "file",
            "files",
            "fragments",
            "genfiles_dir",
            "info_file",
            "label",
            "toolchains",
            "var",
            "version_file",
            "workspace_name",
        ];
        if self.for_aspect {
            names.extend(["aspect_ids", "rule"]);
        } else {
            names.push("outputs");
        }
        names.sort_unstable();
        names.into_iter().map(str::to_owned).collect()
    }
}

#[starlark_module]
fn ctx_methods(builder: &mut MethodsBuilder) {
    /// Builds a runfiles value from files, transitive files and symlinks.
    fn runfiles<'v>(
        this: &StarlarkRuleContext,
        #[starlark(require = named, default = NoneOr::None)] files: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] transitive_files: NoneOr<Value<'v>>,
        #[starlark(require = named, default = false)] collect_data: bool,
        #[starlark(require = named, default = false)] collect_default: bool,
        #[starlark(require = named, default = NoneOr::None)] symlinks: NoneOr<Value<'v>>,
        #[starlark(require = named, default = NoneOr::None)] root_symlinks: NoneOr<Value<'v>>,
        heap: &'v Heap,
    ) -> anyhow::Result<RunfilesValue<'v>> {
        let _ = this;
        // Data collection flags depend on dependency resolution, which the
        // mock context does not perform.
        let _ = collect_data;
        let _ = collect_default;

        let direct = match files.into_option() {
            Some(v) => iterable_elements("files", v)?,
            None => Vec::new(),
        };
        let mut transitive = Vec::new();
        if let Some(v) = transitive_files.into_option() {
            if Depset::from_value(v).is_some() {
                transitive.push(v);
            } else {
                anyhow::bail!(
                    "transitive_files must be a depset, got {}",
                    v.get_type()
                );
            }
        }
        let files_depset = heap.alloc(Depset::build(DepsetOrder::Default, direct, transitive)?);

        let symlink_depset = |value: NoneOr<Value<'v>>| -> anyhow::Result<Value<'v>> {
            let mut entries: Vec<Value<'v>> = Vec::new();
            if let Some(v) = value.into_option() {
                let dict = DictRef::from_value(v)
                    .ok_or_else(|| anyhow::anyhow!("symlinks must be a dict"))?;
                for (path, target) in dict.iter() {
                    let path = path.unpack_str().ok_or_else(|| {
                        anyhow::anyhow!("symlink paths must be strings, got {}", path.get_type())
                    })?;
                    let target = target
                        .downcast_ref::<StarlarkFile>()
                        .cloned()
                        .ok_or_else(|| {
                            anyhow::anyhow!(
                                "symlink targets must be Files, got {}",
                                target.get_type()
                            )
                        })?;
                    entries.push(heap.alloc(StarlarkSymlinkEntry::new(path, target)));
                }
            }
            Ok(heap.alloc(Depset::build(DepsetOrder::Default, entries, Vec::new())?))
        };

        let empty = heap.alloc(Depset::build(
            DepsetOrder::Default,
            Vec::new(),
            Vec::new(),
        )?);
        Ok(RunfilesValue::new(
            files_depset,
            symlink_depset(symlinks)?,
            symlink_depset(root_symlinks)?,
            empty,
        ))
    }

    /// Rewrites `$(location ...)` and `$(locations ...)` references.
    fn expand_location<'v>(
        this: &StarlarkRuleContext,
        #[starlark(require = pos)] input: &str,
        #[starlark(require = named, default = NoneOr::None)] targets: NoneOr<Value<'v>>,
    ) -> anyhow::Result<String> {
        // The mock context resolves against its own label map; the targets
        // parameter is accepted for signature compatibility.
        let _ = targets;
        this.expand_location(input)
    }

    /// Applies additional substitutions, then the context Make variables,
    /// then collapses `$$` to `$`.
    fn expand_make_variables<'v>(
        this: &StarlarkRuleContext,
        #[starlark(require = pos)] attribute_name: &str,
        #[starlark(require = pos)] command: &str,
        #[starlark(require = pos)] additional_substitutions: Value<'v>,
    ) -> anyhow::Result<String> {
        let _ = attribute_name;
        let mut result = command.to_owned();
        if let Some(dict) = DictRef::from_value(additional_substitutions) {
            for (k, v) in dict.iter() {
                if let (Some(k), Some(v)) = (k.unpack_str(), v.unpack_str()) {
                    result = result.replace(&format!("$({})", k), v);
                }
            }
        }
        for (k, v) in this.make_variables.iter() {
            result = result.replace(&format!("$({})", k), v);
        }
        Ok(result.replace("$$", "$"))
    }

    /// The mock resolution: a `sh -c` wrapper around the command.
    fn resolve_command<'v>(
        this: &StarlarkRuleContext,
        #[starlark(require = named, default = "")] command: &str,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        let _ = this;
        let argv = heap.alloc(AllocList(["/bin/bash", "-c", command]));
        let empty1 = heap.alloc(AllocList(std::iter::empty::<Value<'v>>()));
        let empty2 = heap.alloc(AllocList(std::iter::empty::<Value<'v>>()));
        Ok(heap.alloc((empty1, argv, empty2)))
    }

    /// The mock resolution: no inputs, no manifests.
    fn resolve_tools<'v>(
        this: &StarlarkRuleContext,
        #[starlark(require = named, default = NoneOr::None)] tools: NoneOr<Value<'v>>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        let _ = this;
        let _ = tools;
        let inputs = heap.alloc(Depset::build(
            DepsetOrder::Default,
            Vec::new(),
            Vec::new(),
        )?);
        let manifests = heap.alloc(AllocList(std::iter::empty::<Value<'v>>()));
        Ok(heap.alloc((inputs, manifests)))
    }

    /// Splits a shell option string on whitespace, honoring quotes.
    fn tokenize<'v>(
        this: &StarlarkRuleContext,
        #[starlark(require = pos)] option: &str,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        let _ = this;
        Ok(heap.alloc(AllocList(tokenize_shell(option))))
    }

    /// Converts the input to a Label in this target's package.
    fn package_relative_label<'v>(
        this: &StarlarkRuleContext,
        #[starlark(require = pos)] input: Value<'v>,
        heap: &'v Heap,
    ) -> anyhow::Result<Value<'v>> {
        if input.downcast_ref::<StarlarkLabel>().is_some() {
            return Ok(input);
        }
        let s = input.unpack_str().ok_or_else(|| {
            anyhow::anyhow!("expected string or Label, got {}", input.get_type())
        })?;
        let label = Label::parse_relative(s, this.label.repo(), this.label.pkg())?;
        Ok(heap.alloc(StarlarkLabel::new(label)))
    }

    /// Coverage is never enabled in the mock context.
    fn coverage_instrumented<'v>(
        this: &StarlarkRuleContext,
        #[starlark(default = NoneOr::None)] target: NoneOr<Value<'v>>,
    ) -> anyhow::Result<bool> {
        let _ = this;
        let _ = target;
        Ok(false)
    }
}

/// Rewrites `$(location LBL)` / `$(locations LBL)` using a label-to-files
/// map. The singular form fails when the label has more than one file.
fn expand_location(
    input: &str,
    label_map: &SmallMap<String, Vec<StarlarkFile>>,
) -> anyhow::Result<String> {
    let mut result = input.to_owned();
    loop {
        let Some(start) = result.find("$(location") else {
            return Ok(result);
        };
        let end = result[start..]
            .find(')')
            .ok_or_else(|| anyhow::anyhow!("unmatched parenthesis in $(location ...)"))?
            + start;

        let inner = &result[start + 2..end];
        let (label, plural) = if let Some(rest) = inner.strip_prefix("locations ") {
            (rest.trim(), true)
        } else if let Some(rest) = inner.strip_prefix("location ") {
            (rest.trim(), false)
        } else {
            anyhow::bail!("invalid location expansion in \"{}\"", input);
        };

        let files = label_map
            .get(label)
            .ok_or_else(|| anyhow::anyhow!("label \"{}\" not found in location expansion", label))?;
        if files.is_empty() {
            anyhow::bail!("label \"{}\" has no files", label);
        }
        if !plural && files.len() > 1 {
            anyhow::bail!(
                "label \"{}\" expands to multiple files, use $(locations ...) instead",
                label
            );
        }
        let replacement = files
            .iter()
            .map(|f| f.path().to_owned())
            .collect::<Vec<_>>()
            .join(" ");
        result.replace_range(start..=end, &replacement);
    }
}

fn tokenize_shell(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in s.chars() {
        match c {
            '"' | '\'' => match quote {
                Some(q) if q == c => quote = None,
                Some(_) => current.push(c),
                None => quote = Some(c),
            },
            ' ' | '\t' if quote.is_none() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_honors_quotes() {
        assert_eq!(
            tokenize_shell("a 'b c' \"d e\" f"),
            vec!["a", "b c", "d e", "f"]
        );
        assert_eq!(tokenize_shell("  x   y "), vec!["x", "y"]);
    }

    #[test]
    fn location_expansion() {
        let mut map = SmallMap::new();
        map.insert(
            "//pkg:dep".to_owned(),
            vec![StarlarkFile::source("pkg", "dep.txt")],
        );
        map.insert(
            "//pkg:multi".to_owned(),
            vec![
                StarlarkFile::source("pkg", "a.txt"),
                StarlarkFile::source("pkg", "b.txt"),
            ],
        );
        assert_eq!(
            expand_location("x $(location //pkg:dep) y", &map).unwrap(),
            "x pkg/dep.txt y"
        );
        assert_eq!(
            expand_location("$(locations //pkg:multi)", &map).unwrap(),
            "pkg/a.txt pkg/b.txt"
        );
        assert!(expand_location("$(location //pkg:multi)", &map).is_err());
        assert!(expand_location("$(location //pkg:missing)", &map).is_err());
    }
}
