//! The `.bzl` module loader.
//!
//! A module string resolves to a canonical label and a file path. Loaded
//! modules are cached process-wide by canonical label; the per-label entry
//! is a once-initializer, so concurrent loads of the same module block
//! until the first one publishes its result (or its error, which later
//! callers observe identically). Cycle detection is per evaluation stack:
//! the ordered list of labels currently under load travels with each
//! nested evaluation, not with the cache.

use std::collections::HashMap;
use std::sync::Arc;

use dupe::Dupe;

use parking_lot::Condvar;
use parking_lot::Mutex;
use starlark::environment::FrozenModule;
use starlark::environment::Globals;
use starlark::environment::Module;
use starlark::eval::Evaluator;
use starlark::eval::FileLoader;
use starlark::syntax::AstModule;
use starlark::PrintHandler;
use starbzl_core::FileSystem;
use starbzl_core::Label;
use thiserror::Error;
use tracing::debug;

use crate::interpreter::build_context::BuildContext;
use crate::interpreter::globals::bzl_dialect;
use crate::util::to_starlark_error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid label \"{0}\": missing // after repository name")]
    MissingSlashes(String),
    #[error("invalid label: missing colon in \"{0}\"")]
    MissingColon(String),
    #[error("file must have .bzl or .scl extension, got \"{0}\"")]
    WrongExtension(String),
    #[error("unknown repository \"{0}\"")]
    UnknownRepository(String),
    #[error("Starlark load cycle: {0:?}")]
    Cycle(Vec<String>),
}

type SharedLoadResult = Result<FrozenModule, Arc<anyhow::Error>>;

/// A once-initialized cache entry. The first caller inserts the entry and
/// evaluates; everyone else waits on the condvar for the published result.
struct LoadEntry {
    state: Mutex<Option<SharedLoadResult>>,
    ready: Condvar,
}

impl LoadEntry {
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
            ready: Condvar::new(),
        }
    }
}

/// The position a load request comes from: current repository and package,
/// and the ordered load stack for cycle detection.
pub(crate) struct LoadPosition<'a> {
    pub current_repo: &'a str,
    pub current_pkg: &'a str,
    pub load_stack: &'a [String],
}

pub struct BzlLoader {
    fs: Arc<dyn FileSystem>,
    /// Maps external repository names to their root directories.
    repo_mapping: HashMap<String, String>,
    globals: Globals,
    print: Arc<dyn PrintHandler + Send + Sync>,
    cache: Mutex<HashMap<String, Arc<LoadEntry>>>,
}

impl BzlLoader {
    pub(crate) fn new(
        fs: Arc<dyn FileSystem>,
        repo_mapping: HashMap<String, String>,
        globals: Globals,
        print: Arc<dyn PrintHandler + Send + Sync>,
    ) -> Self {
        Self {
            fs,
            repo_mapping,
            globals,
            print,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Purges every cached module. Only valid between runs; during a run
    /// the cache is never invalidated.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    /// Resolves a module string to `(canonical label, file path)`.
    fn resolve_module(
        &self,
        module: &str,
        position: &LoadPosition<'_>,
    ) -> anyhow::Result<(String, String)> {
        let (repo, pkg, file) = if let Some(rest) = module.strip_prefix('@') {
            let idx = rest
                .find("//")
                .ok_or_else(|| LoadError::MissingSlashes(module.to_owned()))?;
            let (pkg, file) = split_pkg_file(&rest[idx + 2..])?;
            (rest[..idx].to_owned(), pkg, file)
        } else if let Some(rest) = module.strip_prefix("//") {
            let (pkg, file) = split_pkg_file(rest)?;
            (position.current_repo.to_owned(), pkg, file)
        } else if let Some(rest) = module.strip_prefix(':') {
            (
                position.current_repo.to_owned(),
                position.current_pkg.to_owned(),
                rest.to_owned(),
            )
        } else {
            // Legacy package-relative form, discouraged but accepted.
            (
                position.current_repo.to_owned(),
                position.current_pkg.to_owned(),
                module.to_owned(),
            )
        };

        if !file.ends_with(".bzl") && !file.ends_with(".scl") {
            return Err(LoadError::WrongExtension(file).into());
        }

        let label = if repo.is_empty() {
            format!("//{}:{}", pkg, file)
        } else {
            format!("@{}//{}:{}", repo, pkg, file)
        };

        let repo_root = if repo.is_empty() {
            ""
        } else {
            self.repo_mapping
                .get(&repo)
                .map(String::as_str)
                .ok_or_else(|| LoadError::UnknownRepository(repo.clone()))?
        };
        let path = self.fs.join(&[repo_root, &pkg, &file]);
        Ok((label, path))
    }

    /// Loads a module, serving it from the cache when possible.
    pub(crate) fn load(
        self: &Arc<Self>,
        module: &str,
        position: &LoadPosition<'_>,
    ) -> anyhow::Result<FrozenModule> {
        let (label, path) = self
            .resolve_module(module, position)
            .with_context_load(module)?;

        if position.load_stack.iter().any(|entry| entry == &label) {
            let mut stack = position.load_stack.to_vec();
            stack.push(label);
            return Err(LoadError::Cycle(stack).into());
        }

        let (entry, is_owner) = {
            let mut cache = self.cache.lock();
            match cache.get(&label) {
                Some(entry) => (entry.dupe(), false),
                None => {
                    let entry = Arc::new(LoadEntry::new());
                    cache.insert(label.clone(), entry.dupe());
                    (entry, true)
                }
            }
        };

        let result = if is_owner {
            debug!(module = %label, "loading module");
            let result = self
                .evaluate(&label, &path, position.load_stack)
                .map_err(Arc::new);
            let mut state = entry.state.lock();
            *state = Some(result.clone());
            entry.ready.notify_all();
            result
        } else {
            debug!(module = %label, "waiting for cached module");
            let mut state = entry.state.lock();
            while state.is_none() {
                entry.ready.wait(&mut state);
            }
            state.clone().unwrap()
        };

        result.map_err(|e| anyhow::anyhow!("loading {}: {:#}", label, e))
    }

    /// Reads, parses and executes a module, extending the load stack for
    /// its own loads, and freezes the resulting environment.
    fn evaluate(
        self: &Arc<Self>,
        label: &str,
        path: &str,
        parent_stack: &[String],
    ) -> anyhow::Result<FrozenModule> {
        let source = self.fs.read(path)?;
        let source = String::from_utf8(source)
            .map_err(|_| anyhow::anyhow!("{} is not valid UTF-8", path))?;

        let parsed = Label::parse(label)?;
        let mut load_stack = parent_stack.to_vec();
        load_stack.push(label.to_owned());

        let file_loader = InterpreterFileLoader {
            loader: self.dupe(),
            current_repo: parsed.repo().to_owned(),
            current_pkg: parsed.pkg().to_owned(),
            load_stack,
        };
        let build_ctx =
            BuildContext::for_bzl(parsed.repo().to_owned(), parsed.pkg().to_owned());

        let ast = AstModule::parse(path, source, &bzl_dialect())?;
        let module = Module::new();
        {
            let mut eval = Evaluator::new(&module);
            eval.set_loader(&file_loader);
            eval.set_print_handler(&*self.print);
            eval.extra = Some(&build_ctx);
            eval.eval_module(ast, &self.globals)?;
        }
        Ok(module.freeze()?)
    }
}

fn split_pkg_file(rest: &str) -> anyhow::Result<(String, String)> {
    match rest.rsplit_once(':') {
        Some((pkg, file)) => Ok((pkg.to_owned(), file.to_owned())),
        None => Err(LoadError::MissingColon(rest.to_owned()).into()),
    }
}

trait LoadContextExt<T> {
    fn with_context_load(self, module: &str) -> anyhow::Result<T>;
}

impl<T> LoadContextExt<T> for anyhow::Result<T> {
    fn with_context_load(self, module: &str) -> anyhow::Result<T> {
        self.map_err(|e| e.context(format!("load(\"{}\")", module)))
    }
}

/// The per-evaluation `load()` implementation handed to the host
/// evaluator. It carries the current package, repository and load stack.
pub(crate) struct InterpreterFileLoader {
    pub loader: Arc<BzlLoader>,
    pub current_repo: String,
    pub current_pkg: String,
    pub load_stack: Vec<String>,
}

impl FileLoader for InterpreterFileLoader {
    fn load(&self, path: &str) -> starlark::Result<FrozenModule> {
        self.loader
            .load(
                path,
                &LoadPosition {
                    current_repo: &self.current_repo,
                    current_pkg: &self.current_pkg,
                    load_stack: &self.load_stack,
                },
            )
            .map_err(to_starlark_error)
    }
}

#[cfg(test)]
mod tests {
    use starbzl_core::InMemoryFileSystem;

    use super::*;

    struct QuietPrint;

    impl PrintHandler for QuietPrint {
        fn println(&self, _text: &str) -> starlark::Result<()> {
            Ok(())
        }
    }

    fn loader() -> Arc<BzlLoader> {
        let mut repos = HashMap::new();
        repos.insert("rules".to_owned(), "external/rules".to_owned());
        Arc::new(BzlLoader::new(
            Arc::new(InMemoryFileSystem::new()),
            repos,
            crate::interpreter::globals::bzl_globals(),
            Arc::new(QuietPrint),
        ))
    }

    fn position<'a>(repo: &'a str, pkg: &'a str, stack: &'a [String]) -> LoadPosition<'a> {
        LoadPosition {
            current_repo: repo,
            current_pkg: pkg,
            load_stack: stack,
        }
    }

    #[test]
    fn resolves_absolute_modules() {
        let loader = loader();
        let (label, path) = loader
            .resolve_module("//pkg:defs.bzl", &position("", "other", &[]))
            .unwrap();
        assert_eq!(label, "//pkg:defs.bzl");
        assert_eq!(path, "pkg/defs.bzl");
    }

    #[test]
    fn resolves_external_repositories() {
        let loader = loader();
        let (label, path) = loader
            .resolve_module("@rules//lib:defs.bzl", &position("", "", &[]))
            .unwrap();
        assert_eq!(label, "@rules//lib:defs.bzl");
        assert_eq!(path, "external/rules/lib/defs.bzl");

        let err = loader
            .resolve_module("@missing//lib:defs.bzl", &position("", "", &[]))
            .unwrap_err();
        assert!(err.to_string().contains("unknown repository"));
    }

    #[test]
    fn resolves_package_relative_modules() {
        let loader = loader();
        let (label, path) = loader
            .resolve_module(":helpers.bzl", &position("", "some/pkg", &[]))
            .unwrap();
        assert_eq!(label, "//some/pkg:helpers.bzl");
        assert_eq!(path, "some/pkg/helpers.bzl");

        let (label, _) = loader
            .resolve_module("helpers.bzl", &position("", "some/pkg", &[]))
            .unwrap();
        assert_eq!(label, "//some/pkg:helpers.bzl");
    }

    #[test]
    fn rejects_wrong_extensions_and_malformed_labels() {
        let loader = loader();
        let err = loader
            .resolve_module("//pkg:defs.txt", &position("", "", &[]))
            .unwrap_err();
        assert!(err.to_string().contains(".bzl or .scl extension"));

        let err = loader
            .resolve_module("@rules", &position("", "", &[]))
            .unwrap_err();
        assert!(err.to_string().contains("missing //"));

        let err = loader
            .resolve_module("//pkg/defs.bzl", &position("", "", &[]))
            .unwrap_err();
        assert!(err.to_string().contains("missing colon"));
    }

    #[test]
    fn cycle_detection_consults_the_stack() {
        let loader = loader();
        let stack = vec!["//:a.bzl".to_owned(), "//:b.bzl".to_owned()];
        let err = loader
            .load("//:a.bzl", &position("", "", &stack))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Starlark load cycle"), "{}", message);
        assert!(message.contains("//:a.bzl"), "{}", message);
    }
}
