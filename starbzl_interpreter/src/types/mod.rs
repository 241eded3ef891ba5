//! Core dialect values: labels, files, depsets, providers.

pub mod depset;
pub mod file;
pub mod label;
pub mod provider;

pub use depset::Depset;
pub use depset::DepsetOrder;
pub use depset::FrozenDepset;
pub use file::StarlarkFile;
pub use file::StarlarkFileRoot;
pub use file::StarlarkSymlinkEntry;
pub use label::StarlarkLabel;
pub use provider::FrozenProviderCallable;
pub use provider::ProviderCallable;
pub use provider::ProviderInstance;
