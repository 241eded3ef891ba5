//! The public facade: compose a file system, the loader and the evaluator.

pub mod build_context;
pub(crate) mod globals;
pub mod loader;

use std::collections::HashMap;
use std::sync::Arc;

use dupe::Dupe;

use starlark::environment::FrozenModule;
use starlark::environment::Globals;
use starlark::environment::Module;
use starlark::eval::Evaluator;
use starlark::syntax::AstModule;
use starlark::values::list::ListRef;
use starlark::values::OwnedFrozenValue;
use starlark::PrintHandler;
use starbzl_core::BuildFileLocator;
use starbzl_core::FileSystem;
use starbzl_core::FsBuildFileLocator;
use starbzl_core::OsFileSystem;
use tracing::debug;

use crate::analysis::build_rule_context;
use crate::analysis::AnalysisResult;
use crate::analysis::RuleContextSpec;
use crate::interpreter::build_context::BuildContext;
use crate::interpreter::loader::BzlLoader;
use crate::interpreter::loader::InterpreterFileLoader;
use crate::interpreter::loader::LoadPosition;
use crate::nodes::TargetsMap;
use crate::package::PackageContext;
use crate::rule::rule_parts;

type PrintCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Configuration for [`Interpreter::new`].
#[derive(Default)]
pub struct InterpreterOptions {
    /// Root of the workspace on disk; ignored when a file system is given.
    pub workspace_root: String,
    /// The file system to read from. Defaults to the OS file system rooted
    /// at `workspace_root`.
    pub file_system: Option<Arc<dyn FileSystem>>,
    /// Maps external repository names to their root directories.
    pub external_repos: HashMap<String, String>,
    /// Receives `print()` output. Defaults to standard error.
    pub print_handler: Option<PrintCallback>,
}

/// Routes `print()` output to the configured callback.
struct DialectPrintHandler {
    callback: Option<PrintCallback>,
}

impl PrintHandler for DialectPrintHandler {
    fn println(&self, text: &str) -> starlark::Result<()> {
        match &self.callback {
            Some(callback) => callback(text),
            None => eprintln!("{}", text),
        }
        Ok(())
    }
}

/// The result of evaluating one file: the frozen global environment and,
/// for BUILD files, the registered targets.
pub struct EvalResult {
    pub globals: FrozenModule,
    pub targets: TargetsMap,
    /// The package path the file was evaluated in.
    pub package: String,
}

impl EvalResult {
    pub fn global_names(&self) -> Vec<String> {
        self.globals
            .names()
            .map(|name| name.as_str().to_owned())
            .collect()
    }

    pub fn get_global(&self, name: &str) -> Option<OwnedFrozenValue> {
        self.globals.get(name).ok()
    }
}

/// The interpreter for the Bazel build-language dialect.
pub struct Interpreter {
    fs: Arc<dyn FileSystem>,
    locator: Arc<dyn BuildFileLocator>,
    loader: Arc<BzlLoader>,
    bzl_globals: Globals,
    build_globals: Globals,
    print: Arc<DialectPrintHandler>,
}

impl Interpreter {
    pub fn new(options: InterpreterOptions) -> Self {
        let fs: Arc<dyn FileSystem> = match options.file_system {
            Some(fs) => fs,
            None => Arc::new(OsFileSystem::new(options.workspace_root.clone())),
        };
        let locator: Arc<dyn BuildFileLocator> =
            Arc::new(FsBuildFileLocator::new(fs.dupe()));
        let print = Arc::new(DialectPrintHandler {
            callback: options.print_handler,
        });
        let bzl_globals = globals::bzl_globals();
        let loader = Arc::new(BzlLoader::new(
            fs.dupe(),
            options.external_repos,
            bzl_globals.clone(),
            print.clone(),
        ));
        Self {
            fs,
            locator,
            loader,
            bzl_globals,
            build_globals: globals::build_globals(),
            print,
        }
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Purges the module cache. Loads during a run are never invalidated;
    /// this is for reuse of the interpreter across runs.
    pub fn clear_module_cache(&self) {
        self.loader.clear();
    }

    /// Evaluates a file read through the configured file system.
    pub fn eval_file(&self, path: &str) -> anyhow::Result<EvalResult> {
        let source = self.fs.read(path)?;
        let source = String::from_utf8(source)
            .map_err(|_| anyhow::anyhow!("{} is not valid UTF-8", path))?;
        self.eval(path, &source)
    }

    /// Evaluates source text. A basename of `BUILD` or `BUILD.bazel`
    /// selects BUILD semantics; anything else is a `.bzl` module.
    pub fn eval(&self, filename: &str, source: &str) -> anyhow::Result<EvalResult> {
        let basename = filename.rsplit('/').next().unwrap_or(filename);
        let pkg = package_of(filename);
        debug!(file = %filename, package = %pkg, "evaluating");
        if basename == "BUILD" || basename == "BUILD.bazel" {
            self.eval_build(filename, source, &pkg)
        } else {
            self.eval_bzl(filename, source, &pkg)
        }
    }

    fn eval_bzl(&self, filename: &str, source: &str, pkg: &str) -> anyhow::Result<EvalResult> {
        let ast = AstModule::parse(filename, source.to_owned(), &globals::bzl_dialect())?;
        let file_loader = InterpreterFileLoader {
            loader: self.loader.dupe(),
            current_repo: String::new(),
            current_pkg: pkg.to_owned(),
            load_stack: Vec::new(),
        };
        let build_ctx = BuildContext::for_bzl(String::new(), pkg.to_owned());

        let module = Module::new();
        {
            let mut eval = Evaluator::new(&module);
            eval.set_loader(&file_loader);
            eval.set_print_handler(&*self.print);
            eval.extra = Some(&build_ctx);
            eval.eval_module(ast, &self.bzl_globals)?;
        }
        Ok(EvalResult {
            globals: module.freeze()?,
            targets: TargetsMap::new(),
            package: pkg.to_owned(),
        })
    }

    fn eval_build(&self, filename: &str, source: &str, pkg: &str) -> anyhow::Result<EvalResult> {
        let ast = AstModule::parse(filename, source.to_owned(), &globals::build_dialect())?;
        let file_loader = InterpreterFileLoader {
            loader: self.loader.dupe(),
            current_repo: String::new(),
            current_pkg: pkg.to_owned(),
            load_stack: Vec::new(),
        };
        let package = PackageContext::new(
            pkg.to_owned(),
            String::new(),
            pkg.to_owned(),
            filename.to_owned(),
            self.fs.dupe(),
            self.locator.dupe(),
        );
        let build_ctx = BuildContext::for_build(package);

        let module = Module::new();
        {
            let mut eval = Evaluator::new(&module);
            eval.set_loader(&file_loader);
            eval.set_print_handler(&*self.print);
            eval.extra = Some(&build_ctx);
            eval.eval_module(ast, &self.build_globals)?;
        }
        let targets = build_ctx
            .into_package()
            .map(PackageContext::into_targets)
            .unwrap_or_default();
        Ok(EvalResult {
            globals: module.freeze()?,
            targets,
            package: pkg.to_owned(),
        })
    }

    /// Loads a `.bzl` module by label and returns its frozen environment.
    pub fn load_module(&self, module: &str) -> anyhow::Result<FrozenModule> {
        self.loader.load(
            module,
            &LoadPosition {
                current_repo: "",
                current_pkg: "",
                load_stack: &[],
            },
        )
    }

    /// Runs the implementation of an exported rule against a mock context
    /// and returns the recorded action log plus the rendered providers.
    pub fn analyze(
        &self,
        module: &str,
        rule_symbol: &str,
        spec: &RuleContextSpec,
    ) -> anyhow::Result<AnalysisResult> {
        let frozen = self.load_module(module)?;
        let owned = frozen
            .get(rule_symbol)
            .map_err(|e| anyhow::anyhow!("{}: {}", rule_symbol, e))?;

        let parts = rule_parts(owned.value())
            .ok_or_else(|| anyhow::anyhow!("{} is not a rule", rule_symbol))?;
        let (ctx, log) =
            build_rule_context(spec, parts.flags.executable, parts.flags.test)?;

        let module_env = Module::new();
        module_env.frozen_heap().add_reference(frozen.frozen_heap());

        let mut providers = Vec::new();
        {
            let mut eval = Evaluator::new(&module_env);
            eval.set_print_handler(&*self.print);
            let ctx_value = module_env.heap().alloc(ctx);
            let result = eval.eval_function(parts.implementation, &[ctx_value], &[])?;
            if let Some(list) = ListRef::from_value(result) {
                providers.extend(list.iter().map(|v| v.to_repr()));
            } else if !result.is_none() {
                providers.push(result.to_repr());
            }
        }

        Ok(AnalysisResult {
            actions: log.snapshot(),
            providers,
        })
    }
}

/// The package path of a file: its directory with leading `./` and `/`
/// stripped; "" for the root package.
fn package_of(filename: &str) -> String {
    match filename.rsplit_once('/') {
        Some((dir, _)) => dir.trim_start_matches("./").trim_start_matches('/').to_owned(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_of_paths() {
        assert_eq!(package_of("BUILD"), "");
        assert_eq!(package_of("pkg/BUILD"), "pkg");
        assert_eq!(package_of("a/b/defs.bzl"), "a/b");
        assert_eq!(package_of("./pkg/BUILD.bazel"), "pkg");
    }
}
