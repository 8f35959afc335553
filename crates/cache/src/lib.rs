#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Build cache packaging and install
//!
//! A [`BuildCache`] turns an installed tree into a signed, relocatable
//! archive on a [`Mirror`] and installs such archives at a new prefix,
//! recording the result in an [`InstallRegistry`].

mod archive;
mod build_cache;
mod checksum;
mod mirror;
mod registry;
mod spec_cache;

pub use archive::{create_archive, extract_archive, read_embedded_manifest, source_date_epoch};
pub use build_cache::{BuildCache, InstallOutcome};
pub use checksum::hash_file;
pub use mirror::{CacheEntry, FetchedArtifact, LocalMirror, Mirror, ARCHIVE_EXTENSION, SIGNATURE_EXTENSION};
pub use registry::{InstallRegistry, InstalledRecord, JsonRegistry};
pub use spec_cache::{AvailableSpec, SpecCache};
