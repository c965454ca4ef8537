//! Data model shared by the mirror engine and the CLI.
//!
//! [`CatalogIndex`] is the normalized form of a repository catalog. Both the
//! JSON and the legacy XML wire formats decode into it, and it is what the
//! mirror caches on disk between runs.

pub mod hash;
pub mod index;
mod lenient;

pub use hash::{HashAlgorithm, UnknownAlgorithm};
pub use index::{
    AppRecord, CatalogIndex, GraphicKind, IndexError, LocalizedAssets, PackageRecord, Permission,
    RepoMeta, Requests, ScreenshotKind,
};
