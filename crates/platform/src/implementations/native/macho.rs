//! Load command string rewriting for thin and fat Mach-O files

use async_trait::async_trait;
use bindist_errors::PlatformError;
use bindist_types::MachOPaths;
use object::macho;
use object::read::macho::{FatArch, MachOFatFile32, MachOFatFile64};
use object::FileKind;
use std::path::Path;

use super::{format_error, read_binary, write_binary};
use crate::binary::BinaryRewriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    Rpath,
    Dylib,
    Id,
}

/// A path string embedded in one load command
#[derive(Debug, Clone)]
struct PathSlot {
    kind: SlotKind,
    /// File offset of the first byte
    offset: usize,
    /// Bytes from the string start to the end of the command, NUL included
    capacity: usize,
    value: String,
}

/// Load paths of one architecture slice
#[derive(Debug, Default)]
struct Image {
    slots: Vec<PathSlot>,
    code_signed: bool,
}

impl Image {
    fn paths(&self) -> MachOPaths {
        let mut paths = MachOPaths::default();
        for slot in &self.slots {
            match slot.kind {
                SlotKind::Rpath => paths.rpaths.push(slot.value.clone()),
                SlotKind::Dylib => paths.deps.push(slot.value.clone()),
                SlotKind::Id if paths.id.is_none() => paths.id = Some(slot.value.clone()),
                SlotKind::Id => {}
            }
        }
        paths
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    big_endian: bool,
    size: usize,
}

fn read_u32(data: &[u8], offset: usize, big_endian: bool) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset.checked_add(4)?)?.try_into().ok()?;
    Some(if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    })
}

fn read_header(data: &[u8], base: usize) -> Option<Header> {
    // Read the magic as little-endian and infer byte order from it.
    match read_u32(data, base, false)? {
        macho::MH_MAGIC => Some(Header { big_endian: false, size: 28 }),
        macho::MH_CIGAM => Some(Header { big_endian: true, size: 28 }),
        macho::MH_MAGIC_64 => Some(Header { big_endian: false, size: 32 }),
        macho::MH_CIGAM_64 => Some(Header { big_endian: true, size: 32 }),
        _ => None,
    }
}

/// `filetype` field of a thin Mach-O header
#[must_use]
pub fn macho_filetype(data: &[u8]) -> Option<u32> {
    let header = read_header(data, 0)?;
    read_u32(data, 12, header.big_endian)
}

fn to_usize(value: u32) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// Walk the load commands of the thin image starting at `base`
fn parse_image(data: &[u8], base: usize) -> Result<Image, String> {
    let header = read_header(data, base).ok_or("not a Mach-O image")?;
    let be = header.big_endian;
    let ncmds = read_u32(data, base + 16, be).ok_or("truncated header")?;
    let sizeofcmds = to_usize(read_u32(data, base + 20, be).ok_or("truncated header")?);

    let commands_end = base
        .checked_add(header.size)
        .and_then(|start| start.checked_add(sizeofcmds))
        .filter(|end| *end <= data.len())
        .ok_or("load commands exceed file size")?;

    let mut image = Image::default();
    let mut offset = base + header.size;
    for _ in 0..ncmds {
        let cmd = read_u32(data, offset, be).ok_or("truncated load command")?;
        let cmdsize = to_usize(read_u32(data, offset + 4, be).ok_or("truncated load command")?);
        let end = offset
            .checked_add(cmdsize)
            .filter(|end| cmdsize >= 8 && *end <= commands_end)
            .ok_or("load command exceeds header")?;

        let (kind, min_offset) = match cmd {
            macho::LC_RPATH => (Some(SlotKind::Rpath), 12),
            macho::LC_ID_DYLIB => (Some(SlotKind::Id), 24),
            macho::LC_LOAD_DYLIB
            | macho::LC_LOAD_WEAK_DYLIB
            | macho::LC_REEXPORT_DYLIB
            | macho::LC_LAZY_LOAD_DYLIB
            | macho::LC_LOAD_UPWARD_DYLIB => (Some(SlotKind::Dylib), 24),
            macho::LC_CODE_SIGNATURE => {
                image.code_signed = true;
                (None, 0)
            }
            _ => (None, 0),
        };

        if let Some(kind) = kind {
            let str_offset = to_usize(read_u32(data, offset + 8, be).ok_or("truncated load command")?);
            if str_offset < min_offset || str_offset >= cmdsize {
                return Err(format!("load command {cmd:#x} has an invalid string offset"));
            }
            let start = offset + str_offset;
            let len = data[start..end].iter().position(|b| *b == 0).unwrap_or(end - start);
            let value = std::str::from_utf8(&data[start..start + len])
                .map_err(|_| format!("load command {cmd:#x} path is not UTF-8"))?
                .to_string();
            image.slots.push(PathSlot {
                kind,
                offset: start,
                capacity: end - start,
                value,
            });
        }
        offset = end;
    }
    Ok(image)
}

/// Byte offsets of every thin image in `data`
fn image_offsets(data: &[u8]) -> Result<Vec<usize>, String> {
    let ranges: Vec<(u64, u64)> = match FileKind::parse(data) {
        Ok(FileKind::MachO32 | FileKind::MachO64) => return Ok(vec![0]),
        Ok(FileKind::MachOFat32) => MachOFatFile32::parse(data)
            .map_err(|e| e.to_string())?
            .arches()
            .iter()
            .map(FatArch::file_range)
            .collect(),
        Ok(FileKind::MachOFat64) => MachOFatFile64::parse(data)
            .map_err(|e| e.to_string())?
            .arches()
            .iter()
            .map(FatArch::file_range)
            .collect(),
        _ => return Err("not a Mach-O file".to_string()),
    };

    ranges
        .into_iter()
        .map(|(offset, _)| usize::try_from(offset).map_err(|_| "slice offset out of range".to_string()))
        .collect()
}

fn parse_images(data: &[u8]) -> Result<Vec<Image>, String> {
    image_offsets(data)?
        .into_iter()
        .map(|base| parse_image(data, base))
        .collect()
}

fn check_shape(old: &MachOPaths, new: &MachOPaths) -> Result<(), String> {
    if old.rpaths.len() != new.rpaths.len() || old.deps.len() != new.deps.len() {
        return Err("load command count would change".to_string());
    }
    if old.id.is_some() != new.id.is_some() {
        return Err("install name can only be rewritten, not added or removed".to_string());
    }
    Ok(())
}

/// Rewrite every slice in memory; returns whether any slice was code signed
fn rewrite_in_place(
    data: &mut [u8],
    old: &MachOPaths,
    new: &MachOPaths,
) -> Result<bool, String> {
    check_shape(old, new)?;
    let images = parse_images(data)?;
    let mut code_signed = false;

    for image in &images {
        if image.paths() != *old {
            return Err("load commands do not match the paths read earlier".to_string());
        }
        code_signed |= image.code_signed;

        let mut rpaths = new.rpaths.iter();
        let mut deps = new.deps.iter();
        for slot in &image.slots {
            let replacement = match slot.kind {
                SlotKind::Rpath => rpaths.next(),
                SlotKind::Dylib => deps.next(),
                SlotKind::Id => new.id.as_ref(),
            };
            let Some(replacement) = replacement else {
                continue;
            };
            if *replacement == slot.value {
                continue;
            }
            if replacement.len() + 1 > slot.capacity {
                return Err(format!(
                    "{replacement:?} needs {} bytes but the load command holds {}",
                    replacement.len() + 1,
                    slot.capacity
                ));
            }
            let bytes = &mut data[slot.offset..slot.offset + slot.capacity];
            bytes.fill(0);
            bytes[..replacement.len()].copy_from_slice(replacement.as_bytes());
        }
    }
    Ok(code_signed)
}

/// Re-sign with an ad-hoc signature after editing a signed image
///
/// Editing load commands invalidates an existing signature and arm64 macOS
/// refuses to load such binaries.
#[cfg(target_os = "macos")]
pub(crate) async fn resign_adhoc(path: &Path) -> Result<(), PlatformError> {
    let output = tokio::process::Command::new("codesign")
        .args(["--force", "--sign", "-"])
        .arg(path)
        .output()
        .await
        .map_err(|e| PlatformError::ProcessExecutionFailed {
            command: "codesign --force --sign -".to_string(),
            message: e.to_string(),
        })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(PlatformError::BinaryOperationFailed {
            operation: "codesign".to_string(),
            binary_path: path.display().to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(not(target_os = "macos"))]
#[allow(clippy::unused_async)]
pub(crate) async fn resign_adhoc(_path: &Path) -> Result<(), PlatformError> {
    Ok(())
}

/// Edits `LC_RPATH`, dylib and `LC_ID_DYLIB` strings within each command's
/// existing size
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeMachORewriter;

impl NativeMachORewriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BinaryRewriter for NativeMachORewriter {
    type Paths = MachOPaths;

    fn name(&self) -> &'static str {
        "native-macho"
    }

    async fn read_paths(&self, binary: &Path) -> Result<MachOPaths, PlatformError> {
        let data = read_binary(binary).await?;
        let images = parse_images(&data).map_err(|e| format_error(binary, e))?;
        images
            .first()
            .map(Image::paths)
            .ok_or_else(|| format_error(binary, "fat file has no architectures"))
    }

    async fn write_paths(
        &self,
        binary: &Path,
        old: &MachOPaths,
        new: &MachOPaths,
    ) -> Result<(), PlatformError> {
        if old == new {
            return Ok(());
        }
        let mut data = read_binary(binary).await?;
        let code_signed =
            rewrite_in_place(&mut data, old, new).map_err(|e| format_error(binary, e))?;
        write_binary(binary, &data).await?;
        if code_signed {
            resign_adhoc(binary).await?;
        }
        Ok(())
    }
}
