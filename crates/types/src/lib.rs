#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for bindist
//!
//! Package identity, the build manifest recorded with every cache entry,
//! the path sets read from and written to object files, and the mode
//! switches callers pass to the build cache.

pub mod manifest;
pub mod modes;
pub mod package;
pub mod relocation;

pub use manifest::{BuildManifest, MANIFEST_FORMAT_VERSION, MANIFEST_PATH, METADATA_DIR};
pub use modes::{OverwriteMode, RewriterKind, SigningMode, VerifyMode};
pub use package::{InstallTree, PackageId};
pub use relocation::{
    DynamicPathTag, ElfPaths, FileTreatment, MachOPaths, ObjectFormat, RPathSet,
};
