//! Object file probing and the rewriter abstraction

use async_trait::async_trait;
use bindist_errors::PlatformError;
use bindist_types::{ElfPaths, MachOPaths, ObjectFormat, RewriterKind};
use object::read::elf::FileHeader;
use object::{elf, Endianness, FileKind};
use std::path::Path;
use std::sync::Arc;

use crate::implementations::native::{macho_filetype, NativeElfRewriter, NativeMachORewriter};
use crate::implementations::tool::{InstallNameToolRewriter, PatchelfRewriter};

/// Reads and writes the load paths of one object format
///
/// `write_paths` receives the paths previously read so implementations can
/// refuse to touch a file that changed underneath them, and so the number
/// and order of entries can be checked against the replacement.
#[async_trait]
pub trait BinaryRewriter: Send + Sync {
    type Paths: Send + Sync + Clone;

    /// Short backend name for logs
    fn name(&self) -> &'static str;

    async fn read_paths(&self, binary: &Path) -> Result<Self::Paths, PlatformError>;

    async fn write_paths(
        &self,
        binary: &Path,
        old: &Self::Paths,
        new: &Self::Paths,
    ) -> Result<(), PlatformError>;
}

pub type ElfRewriter = Arc<dyn BinaryRewriter<Paths = ElfPaths>>;
pub type MachORewriter = Arc<dyn BinaryRewriter<Paths = MachOPaths>>;

/// One rewriter per object format
#[derive(Clone)]
pub struct RewriterSet {
    pub elf: ElfRewriter,
    pub macho: MachORewriter,
}

impl RewriterSet {
    /// Build the rewriters for a configured backend
    #[must_use]
    pub fn for_kind(kind: RewriterKind) -> Self {
        match kind {
            RewriterKind::Native => Self {
                elf: Arc::new(NativeElfRewriter::new()),
                macho: Arc::new(NativeMachORewriter::new()),
            },
            RewriterKind::Tool => Self {
                elf: Arc::new(PatchelfRewriter::new()),
                macho: Arc::new(InstallNameToolRewriter::new()),
            },
        }
    }
}

impl std::fmt::Debug for RewriterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriterSet")
            .field("elf", &self.elf.name())
            .field("macho", &self.macho.name())
            .finish()
    }
}

/// Role of an object file as far as the dynamic loader is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Executable,
    SharedLibrary,
    /// Relocatable objects, core files, bundles and the like
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectProbe {
    pub format: ObjectFormat,
    pub kind: ObjectKind,
}

/// Identify an object file from its leading bytes
///
/// Fat Mach-O containers report [`ObjectKind::Other`]; the format alone is
/// enough to treat them as relocatable.
#[must_use]
pub fn probe_object(data: &[u8]) -> Option<ObjectProbe> {
    let kind = FileKind::parse(data).ok()?;
    let (format, kind) = match kind {
        FileKind::Elf32 => (ObjectFormat::Elf, elf_kind::<elf::FileHeader32<Endianness>>(data)?),
        FileKind::Elf64 => (ObjectFormat::Elf, elf_kind::<elf::FileHeader64<Endianness>>(data)?),
        FileKind::MachO32 | FileKind::MachO64 => {
            let kind = match macho_filetype(data)? {
                object::macho::MH_EXECUTE => ObjectKind::Executable,
                object::macho::MH_DYLIB => ObjectKind::SharedLibrary,
                _ => ObjectKind::Other,
            };
            (ObjectFormat::MachO, kind)
        }
        FileKind::MachOFat32 | FileKind::MachOFat64 => (ObjectFormat::MachO, ObjectKind::Other),
        _ => return None,
    };
    Some(ObjectProbe { format, kind })
}

fn elf_kind<Elf: FileHeader<Endian = Endianness>>(data: &[u8]) -> Option<ObjectKind> {
    let header = Elf::parse(data).ok()?;
    let endian = header.endian().ok()?;
    Some(match header.e_type(endian) {
        elf::ET_EXEC => ObjectKind::Executable,
        elf::ET_DYN => ObjectKind::SharedLibrary,
        _ => ObjectKind::Other,
    })
}
