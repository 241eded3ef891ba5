//! Mock analysis: run a rule implementation against a synthetic context
//! and observe the recorded action log. Nothing is built.

use dupe::Dupe;
use starlark::collections::SmallMap;
use starbzl_core::Label;

use crate::coerced::CoercedValue;
use crate::ctx::actions::ActionLog;
use crate::ctx::actions::DeclaredAction;
use crate::ctx::actions::StarlarkActions;
use crate::ctx::CtxAttrStruct;
use crate::ctx::CtxExecutableStruct;
use crate::ctx::CtxFileStruct;
use crate::ctx::CtxFilesStruct;
use crate::ctx::CtxOutputs;
use crate::ctx::RuleContextParts;
use crate::ctx::StarlarkRuleContext;
use crate::types::file::StarlarkFile;

/// Describes the context a rule implementation runs against.
pub struct RuleContextSpec {
    /// Label of the analyzed target, e.g. `//pkg:t`.
    pub label: String,
    pub workspace_name: String,
    pub bin_dir: String,
    pub genfiles_dir: String,
    /// Attribute values visible through `ctx.attr`.
    pub attrs: Vec<(String, CoercedValue)>,
    /// Per-attribute file lists for `ctx.files`.
    pub files: Vec<(String, Vec<StarlarkFile>)>,
    /// Per-attribute single files for `ctx.file`.
    pub file: Vec<(String, Option<StarlarkFile>)>,
    /// Per-attribute executables for `ctx.executable`.
    pub executables: Vec<(String, StarlarkFile)>,
    /// Predeclared outputs for `ctx.outputs`.
    pub outputs: Vec<(String, StarlarkFile)>,
    pub features: Vec<String>,
    pub disabled_features: Vec<String>,
    /// Make variables for `ctx.var` and `expand_make_variables`.
    pub make_variables: Vec<(String, String)>,
    /// Label string to files, consumed by `expand_location`.
    pub location_map: Vec<(String, Vec<StarlarkFile>)>,
}

impl Default for RuleContextSpec {
    fn default() -> Self {
        Self {
            label: "//:target".to_owned(),
            workspace_name: String::new(),
            bin_dir: "bazel-out/bin".to_owned(),
            genfiles_dir: "bazel-out/genfiles".to_owned(),
            attrs: Vec::new(),
            files: Vec::new(),
            file: Vec::new(),
            executables: Vec::new(),
            outputs: Vec::new(),
            features: Vec::new(),
            disabled_features: Vec::new(),
            make_variables: Vec::new(),
            location_map: Vec::new(),
        }
    }
}

/// What a rule implementation run produced: the ordered action log and the
/// rendered provider values it returned.
#[derive(Debug)]
pub struct AnalysisResult {
    pub actions: Vec<DeclaredAction>,
    pub providers: Vec<String>,
}

/// Builds the context value and the shared action log.
pub(crate) fn build_rule_context(
    spec: &RuleContextSpec,
    executable_rule: bool,
    test_rule: bool,
) -> anyhow::Result<(StarlarkRuleContext, ActionLog)> {
    let label = Label::parse(&spec.label)?;
    let log = ActionLog::new();

    let mut attrs: SmallMap<String, CoercedValue> = SmallMap::new();
    for (name, value) in &spec.attrs {
        attrs.insert(name.clone(), value.clone());
    }
    if !attrs.contains_key("name") {
        attrs.insert(
            "name".to_owned(),
            CoercedValue::String(label.name().to_owned()),
        );
    }

    let files: SmallMap<String, Vec<StarlarkFile>> = spec
        .files
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let file: SmallMap<String, Option<StarlarkFile>> = spec
        .file
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let executables: SmallMap<String, StarlarkFile> = spec
        .executables
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let outputs: SmallMap<String, StarlarkFile> = spec
        .outputs
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    // Executable and test rules get a default executable output named
    // after the target.
    let outputs_executable = if executable_rule || test_rule {
        let rel = if label.pkg().is_empty() {
            label.name().to_owned()
        } else {
            format!("{}/{}", label.pkg(), label.name())
        };
        Some(StarlarkFile::derived(
            &spec.bin_dir,
            &rel,
            Some(label.clone()),
        ))
    } else {
        None
    };

    let actions = StarlarkActions::new(label.clone(), spec.bin_dir.clone(), log.dupe());
    let build_file_path = if label.pkg().is_empty() {
        "BUILD".to_owned()
    } else {
        format!("{}/BUILD", label.pkg())
    };

    let ctx = StarlarkRuleContext::from_parts(RuleContextParts {
        label,
        workspace_name: spec.workspace_name.clone(),
        bin_dir: spec.bin_dir.clone(),
        genfiles_dir: spec.genfiles_dir.clone(),
        build_file_path,
        executable_rule: executable_rule || test_rule,
        test_rule,
        for_aspect: false,
        attr: CtxAttrStruct::new(attrs),
        files: CtxFilesStruct::new(files),
        file: CtxFileStruct::new(file),
        executable: CtxExecutableStruct::new(executables),
        outputs: CtxOutputs::new(outputs, outputs_executable, executable_rule || test_rule),
        actions,
        features: spec.features.clone(),
        disabled_features: spec.disabled_features.clone(),
        make_variables: spec
            .make_variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        location_map: spec
            .location_map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    });

    Ok((ctx, log))
}
