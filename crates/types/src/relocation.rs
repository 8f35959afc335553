//! Path sets read from object files and per-file relocation treatment

use std::fmt;

/// Ordered search path entries; order is significant to the loader
pub type RPathSet = Vec<String>;

/// Object file container formats that carry load paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectFormat {
    Elf,
    MachO,
}

impl fmt::Display for ObjectFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elf => write!(f, "ELF"),
            Self::MachO => write!(f, "Mach-O"),
        }
    }
}

/// Dynamic section tag an ELF search path was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicPathTag {
    Rpath,
    Runpath,
}

/// Search paths of an ELF object
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElfPaths {
    pub rpaths: RPathSet,
    /// `None` when the object has neither `DT_RPATH` nor `DT_RUNPATH`
    pub tag: Option<DynamicPathTag>,
}

impl ElfPaths {
    #[must_use]
    pub fn new(rpaths: RPathSet, tag: Option<DynamicPathTag>) -> Self {
        Self { rpaths, tag }
    }

    /// Entries joined the way they are stored in the string table
    #[must_use]
    pub fn joined(&self) -> String {
        self.rpaths.join(":")
    }
}

/// Load paths of a Mach-O object
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MachOPaths {
    /// `LC_RPATH` entries
    pub rpaths: RPathSet,
    /// Dependency install names, in load command order
    pub deps: Vec<String>,
    /// `LC_ID_DYLIB`, present only for shared libraries
    pub id: Option<String>,
}

impl MachOPaths {
    #[must_use]
    pub fn new(rpaths: RPathSet, deps: Vec<String>, id: Option<String>) -> Self {
        Self { rpaths, deps, id }
    }
}

/// How the relocation engine treats a filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTreatment {
    Binary(ObjectFormat),
    Text,
    Symlink,
    Opaque,
}

impl FileTreatment {
    #[must_use]
    pub fn is_binary(self) -> bool {
        matches!(self, Self::Binary(_))
    }
}
