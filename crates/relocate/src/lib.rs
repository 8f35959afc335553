#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Relocation of installed trees
//!
//! Detects and rewrites absolute references to the install root in ELF and
//! Mach-O load paths, text files and symbolic links. The
//! [`RelocationEngine`] drives the per-format patchers across a tree using
//! a [`BuildManifest`](bindist_types::BuildManifest).

pub mod binary_strings;
pub mod classify;
pub mod elf;
pub mod engine;
pub mod macho;
pub mod paths;
pub mod report;
pub mod text;

pub use binary_strings::{patch_binary_strings, BinaryStringPatch};
pub use classify::{classify, needs_binary_relocation, needs_text_relocation, sniff, FileSignature};
pub use engine::RelocationEngine;
pub use paths::PrefixMap;
pub use report::{FileFailure, RelocationReport};
pub use text::{contains_install_root, relocate_links, relocate_text};
