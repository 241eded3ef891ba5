//! The Bazel build-language dialect layered on the starlark-rust evaluator.
//!
//! This crate wires the host evaluator (`starlark`) to the Bazel domain
//! model: labels, files, depsets, providers, rule classes and aspects, the
//! `.bzl` module loader with caching and cycle detection, per-package BUILD
//! evaluation with the `native` helper namespace, and a mock rule context
//! whose action factory records declarations instead of executing them.
//!
//! The public entry point is [`Interpreter`], which composes a file system,
//! the loader and the evaluator:
//!
//! ```
//! use std::sync::Arc;
//!
//! use starbzl_core::InMemoryFileSystem;
//! use starbzl_interpreter::Interpreter;
//! use starbzl_interpreter::InterpreterOptions;
//!
//! let fs = Arc::new(InMemoryFileSystem::new());
//! fs.add_file("pkg/BUILD", "");
//! let interp = Interpreter::new(InterpreterOptions {
//!     file_system: Some(fs),
//!     ..Default::default()
//! });
//! let result = interp.eval_file("pkg/BUILD").unwrap();
//! assert!(result.targets.is_empty());
//! ```

pub mod analysis;
pub mod aspect;
pub mod attrs;
pub mod coerced;
pub mod ctx;
pub mod interpreter;
pub mod nodes;
pub mod package;
pub mod providers;
pub mod rule;
pub mod selector;
pub mod types;
pub(crate) mod util;

pub use analysis::AnalysisResult;
pub use analysis::RuleContextSpec;
pub use ctx::actions::ActionKind;
pub use ctx::actions::DeclaredAction;
pub use interpreter::EvalResult;
pub use interpreter::Interpreter;
pub use interpreter::InterpreterOptions;
pub use nodes::RuleInstance;
