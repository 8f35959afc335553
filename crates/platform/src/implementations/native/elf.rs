//! `DT_RPATH` / `DT_RUNPATH` rewriting inside `.dynstr`

use async_trait::async_trait;
use bindist_errors::PlatformError;
use bindist_types::{DynamicPathTag, ElfPaths};
use object::read::elf::{Dyn, FileHeader, SectionHeader};
use object::{elf, Endianness, FileKind};
use std::path::Path;

use super::{format_error, read_binary, write_binary};
use crate::binary::BinaryRewriter;

/// A search path string located in the dynamic string table
#[derive(Debug, Clone, PartialEq, Eq)]
struct DynamicString {
    tag: DynamicPathTag,
    /// File offset of the first byte
    offset: usize,
    /// Bytes available before the terminating NUL
    capacity: usize,
    value: String,
}

fn dynamic_strings(data: &[u8]) -> Result<Vec<DynamicString>, String> {
    match FileKind::parse(data) {
        Ok(FileKind::Elf32) => collect::<elf::FileHeader32<Endianness>>(data),
        Ok(FileKind::Elf64) => collect::<elf::FileHeader64<Endianness>>(data),
        _ => Err("not an ELF object".to_string()),
    }
}

fn collect<Elf: FileHeader<Endian = Endianness>>(data: &[u8]) -> Result<Vec<DynamicString>, String> {
    let header = Elf::parse(data).map_err(|e| e.to_string())?;
    let endian = header.endian().map_err(|e| e.to_string())?;
    let sections = header.sections(endian, data).map_err(|e| e.to_string())?;
    let Some((entries, strtab_index)) = sections.dynamic(endian, data).map_err(|e| e.to_string())? else {
        return Ok(Vec::new());
    };

    let strtab = sections.section(strtab_index).map_err(|e| e.to_string())?;
    let offset: u64 = strtab.sh_offset(endian).into();
    let size: u64 = strtab.sh_size(endian).into();
    let table_start = usize::try_from(offset).map_err(|_| "string table offset out of range")?;
    let table_end = usize::try_from(size)
        .ok()
        .and_then(|size| table_start.checked_add(size))
        .filter(|end| *end <= data.len())
        .ok_or("string table exceeds file size")?;

    let mut strings = Vec::new();
    for entry in entries {
        let tag = match entry.tag32(endian) {
            Some(elf::DT_NULL) => break,
            Some(elf::DT_RPATH) => DynamicPathTag::Rpath,
            Some(elf::DT_RUNPATH) => DynamicPathTag::Runpath,
            _ => continue,
        };

        let rel: u64 = entry.d_val(endian).into();
        let start = usize::try_from(rel)
            .ok()
            .and_then(|rel| table_start.checked_add(rel))
            .filter(|start| *start < table_end)
            .ok_or("search path outside string table")?;
        let len = data[start..table_end]
            .iter()
            .position(|b| *b == 0)
            .ok_or("unterminated search path")?;
        let value = std::str::from_utf8(&data[start..start + len])
            .map_err(|_| "search path is not UTF-8")?
            .to_string();

        strings.push(DynamicString {
            tag,
            offset: start,
            capacity: len,
            value,
        });
    }
    Ok(strings)
}

fn split_entries(value: &str) -> Vec<String> {
    value
        .split(':')
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Search paths recorded in an ELF image
///
/// `DT_RUNPATH` wins over `DT_RPATH` when both are present, matching the
/// dynamic loader.
///
/// # Errors
///
/// Returns a description of the problem if `data` is not a well-formed ELF
/// object.
pub fn dynamic_search_paths(data: &[u8]) -> Result<ElfPaths, String> {
    let strings = dynamic_strings(data)?;
    let chosen = strings
        .iter()
        .find(|s| s.tag == DynamicPathTag::Runpath)
        .or_else(|| strings.first());

    Ok(match chosen {
        Some(s) => ElfPaths::new(split_entries(&s.value), Some(s.tag)),
        None => ElfPaths::default(),
    })
}

/// Rewrite every search path string equal to `old` with `new`, in memory
fn rewrite_in_place(
    path: &Path,
    data: &mut [u8],
    old: &ElfPaths,
    new: &ElfPaths,
) -> Result<(), PlatformError> {
    if old.rpaths.len() != new.rpaths.len() {
        return Err(format_error(
            path,
            format!(
                "search path entry count would change from {} to {}",
                old.rpaths.len(),
                new.rpaths.len()
            ),
        ));
    }

    let strings = dynamic_strings(data).map_err(|e| format_error(path, e))?;
    let old_joined = old.joined();
    let new_joined = new.joined();
    let targets: Vec<_> = strings
        .into_iter()
        .filter(|s| split_entries(&s.value) == old.rpaths)
        .collect();

    if targets.is_empty() {
        return Err(format_error(
            path,
            format!("no DT_RPATH/DT_RUNPATH entry matches {old_joined:?}"),
        ));
    }

    for target in targets {
        if new_joined.len() > target.capacity {
            return Err(format_error(
                path,
                format!(
                    "search path {new_joined:?} needs {} bytes but only {} are reserved",
                    new_joined.len(),
                    target.capacity
                ),
            ));
        }
        let slot = &mut data[target.offset..target.offset + target.capacity];
        slot.fill(0);
        slot[..new_joined.len()].copy_from_slice(new_joined.as_bytes());
    }
    Ok(())
}

/// Edits `DT_RPATH`/`DT_RUNPATH` strings in `.dynstr` without resizing
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeElfRewriter;

impl NativeElfRewriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BinaryRewriter for NativeElfRewriter {
    type Paths = ElfPaths;

    fn name(&self) -> &'static str {
        "native-elf"
    }

    async fn read_paths(&self, binary: &Path) -> Result<ElfPaths, PlatformError> {
        let data = read_binary(binary).await?;
        dynamic_search_paths(&data).map_err(|e| format_error(binary, e))
    }

    async fn write_paths(
        &self,
        binary: &Path,
        old: &ElfPaths,
        new: &ElfPaths,
    ) -> Result<(), PlatformError> {
        if old.rpaths == new.rpaths {
            return Ok(());
        }
        let mut data = read_binary(binary).await?;
        rewrite_in_place(binary, &mut data, old, new)?;
        write_binary(binary, &data).await
    }
}
