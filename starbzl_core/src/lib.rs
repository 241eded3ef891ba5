//! Core identifiers and file system abstractions for starbzl.
//!
//! This crate has no Starlark dependency. It holds the pieces the
//! interpreter builds on: canonical labels, the pluggable file system,
//! and build file location.

pub mod build_file;
pub mod fs;
pub mod label;

pub use build_file::BuildFileLocator;
pub use build_file::FsBuildFileLocator;
pub use build_file::BUILD_FILE_NAMES;
pub use fs::DirEntry;
pub use fs::FileStat;
pub use fs::FileSystem;
pub use fs::InMemoryFileSystem;
pub use fs::OsFileSystem;
pub use label::Label;
pub use label::LabelError;
