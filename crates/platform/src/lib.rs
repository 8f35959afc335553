#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Platform layer for reading and rewriting load paths in object files.
//!
//! Two backends implement [`BinaryRewriter`] for each object format:
//! - native: edits `.dynstr` (ELF) and load command strings (Mach-O) in
//!   place, never growing the file
//! - tool: shells out to `patchelf` / `install_name_tool`, located once on
//!   first use
//!
//! Filesystem helpers for atomic rewrites live in [`fs`].

pub mod binary;
pub mod fs;
pub mod implementations;

#[cfg(feature = "fixtures")]
pub mod fixtures;

pub use binary::{probe_object, BinaryRewriter, ElfRewriter, MachORewriter, ObjectKind, ObjectProbe, RewriterSet};
pub use implementations::native::{NativeElfRewriter, NativeMachORewriter};
pub use implementations::tool::{InstallNameToolRewriter, PatchelfRewriter, ToolLocator};
