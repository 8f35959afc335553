//! Minimal object file images for tests
//!
//! The images carry just enough structure for the loaders' path tables to
//! be parsed: an ELF64 with `.dynstr`/`.dynamic`/`.shstrtab`, and thin or
//! fat 64-bit Mach-O files with dylib and rpath load commands.

use object::{elf, macho};

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn pad_to(buf: &mut Vec<u8>, align: usize) {
    while buf.len() % align != 0 {
        buf.push(0);
    }
}

fn as_u64(v: usize) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

fn as_u32(v: usize) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

/// Search path entry of a synthetic ELF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfSearchTag {
    Rpath,
    Runpath,
}

/// Build a little-endian ELF64 shared object
///
/// `search_path` is stored as one string in `.dynstr` followed by `slack`
/// extra NUL bytes. Pass `None` for an object without a search path.
#[must_use]
pub fn elf64_shared_object(search_path: Option<(ElfSearchTag, &str)>, slack: usize) -> Vec<u8> {
    elf64_image(elf::ET_DYN, search_path, slack)
}

/// Build a little-endian ELF64 executable
#[must_use]
pub fn elf64_executable(search_path: Option<(ElfSearchTag, &str)>, slack: usize) -> Vec<u8> {
    elf64_image(elf::ET_EXEC, search_path, slack)
}

fn elf64_image(e_type: u16, search_path: Option<(ElfSearchTag, &str)>, slack: usize) -> Vec<u8> {
    const EHDR: usize = 64;
    const SHDR: usize = 64;

    let mut dynstr = vec![0u8];
    let mut dynamic: Vec<(u64, u64)> = Vec::new();
    if let Some((tag, value)) = search_path {
        let offset = dynstr.len();
        dynstr.extend_from_slice(value.as_bytes());
        dynstr.push(0);
        dynstr.extend(std::iter::repeat(0).take(slack));
        let tag = match tag {
            ElfSearchTag::Rpath => elf::DT_RPATH,
            ElfSearchTag::Runpath => elf::DT_RUNPATH,
        };
        dynamic.push((u64::from(tag), as_u64(offset)));
    }
    dynamic.push((u64::from(elf::DT_NULL), 0));

    let shstrtab = b"\0.dynstr\0.dynamic\0.shstrtab\0".to_vec();

    let mut body = vec![0u8; EHDR];
    let dynstr_off = body.len();
    body.extend_from_slice(&dynstr);
    pad_to(&mut body, 8);
    let dynamic_off = body.len();
    for (tag, val) in &dynamic {
        push_u64(&mut body, *tag);
        push_u64(&mut body, *val);
    }
    let shstrtab_off = body.len();
    body.extend_from_slice(&shstrtab);
    pad_to(&mut body, 8);
    let shoff = body.len();

    // (name, type, flags, offset, size, link, align, entsize)
    let sections: [(u32, u32, u64, usize, usize, u32, u64, u64); 4] = [
        (0, elf::SHT_NULL, 0, 0, 0, 0, 0, 0),
        (1, elf::SHT_STRTAB, u64::from(elf::SHF_ALLOC), dynstr_off, dynstr.len(), 0, 1, 0),
        (
            9,
            elf::SHT_DYNAMIC,
            u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
            dynamic_off,
            dynamic.len() * 16,
            1,
            8,
            16,
        ),
        (18, elf::SHT_STRTAB, 0, shstrtab_off, shstrtab.len(), 0, 1, 0),
    ];
    for (name, sh_type, flags, offset, size, link, align, entsize) in sections {
        push_u32(&mut body, name);
        push_u32(&mut body, sh_type);
        push_u64(&mut body, flags);
        push_u64(&mut body, 0);
        push_u64(&mut body, as_u64(offset));
        push_u64(&mut body, as_u64(size));
        push_u32(&mut body, link);
        push_u32(&mut body, 0);
        push_u64(&mut body, align);
        push_u64(&mut body, entsize);
    }

    let mut header = Vec::with_capacity(EHDR);
    header.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
    header.push(elf::ELFCLASS64);
    header.push(elf::ELFDATA2LSB);
    header.push(elf::EV_CURRENT);
    header.push(elf::ELFOSABI_NONE);
    header.resize(16, 0);
    push_u16(&mut header, e_type);
    push_u16(&mut header, elf::EM_X86_64);
    push_u32(&mut header, u32::from(elf::EV_CURRENT));
    push_u64(&mut header, 0); // e_entry
    push_u64(&mut header, 0); // e_phoff
    push_u64(&mut header, as_u64(shoff));
    push_u32(&mut header, 0); // e_flags
    push_u16(&mut header, 64); // e_ehsize
    push_u16(&mut header, 56); // e_phentsize
    push_u16(&mut header, 0); // e_phnum
    push_u16(&mut header, u16::try_from(SHDR).unwrap_or(64));
    push_u16(&mut header, 4); // e_shnum
    push_u16(&mut header, 3); // e_shstrndx
    body[..EHDR].copy_from_slice(&header);
    body
}

/// Contents of a synthetic Mach-O image
#[derive(Debug, Clone, Default)]
pub struct MachOSpec {
    pub id: Option<String>,
    pub deps: Vec<String>,
    pub rpaths: Vec<String>,
    /// Extra NUL bytes reserved after every path string
    pub slack: usize,
}

fn load_command(buf: &mut Vec<u8>, cmd: u32, fixed: &[u8], path: &str, slack: usize) {
    let start = buf.len();
    let size = (8 + fixed.len() + path.len() + 1 + slack).div_ceil(8) * 8;
    push_u32(buf, cmd);
    push_u32(buf, as_u32(size));
    buf.extend_from_slice(fixed);
    buf.extend_from_slice(path.as_bytes());
    buf.resize(start + size, 0);
}

// name offset, timestamp, current version, compatibility version
fn dylib_fixed() -> Vec<u8> {
    let mut fixed = Vec::new();
    push_u32(&mut fixed, 24);
    push_u32(&mut fixed, 2);
    push_u32(&mut fixed, 0x0001_0000);
    push_u32(&mut fixed, 0x0001_0000);
    fixed
}

/// Build a thin little-endian 64-bit Mach-O image
#[must_use]
pub fn macho64_image(spec: &MachOSpec) -> Vec<u8> {
    let mut commands = Vec::new();
    let mut ncmds = 0u32;

    if let Some(id) = &spec.id {
        let fixed = dylib_fixed();
        load_command(&mut commands, macho::LC_ID_DYLIB, &fixed, id, spec.slack);
        ncmds += 1;
    }
    for dep in &spec.deps {
        let fixed = dylib_fixed();
        load_command(&mut commands, macho::LC_LOAD_DYLIB, &fixed, dep, spec.slack);
        ncmds += 1;
    }
    for rpath in &spec.rpaths {
        let mut fixed = Vec::new();
        push_u32(&mut fixed, 12);
        load_command(&mut commands, macho::LC_RPATH, &fixed, rpath, spec.slack);
        ncmds += 1;
    }

    let filetype = if spec.id.is_some() {
        macho::MH_DYLIB
    } else {
        macho::MH_EXECUTE
    };

    let mut image = Vec::new();
    push_u32(&mut image, macho::MH_MAGIC_64);
    push_u32(&mut image, macho::CPU_TYPE_ARM64);
    push_u32(&mut image, 0);
    push_u32(&mut image, filetype);
    push_u32(&mut image, ncmds);
    push_u32(&mut image, as_u32(commands.len()));
    push_u32(&mut image, 0);
    push_u32(&mut image, 0);
    image.extend_from_slice(&commands);
    // Stand-in for segment contents
    image.extend_from_slice(&[0xAA; 64]);
    image
}

/// Wrap thin images in a 32-bit fat container
#[must_use]
pub fn macho_fat(images: &[Vec<u8>]) -> Vec<u8> {
    const ALIGN_SHIFT: u32 = 12;
    let align = 1usize << ALIGN_SHIFT;

    let mut offsets = Vec::with_capacity(images.len());
    let mut cursor = align;
    for image in images {
        offsets.push(cursor);
        cursor = (cursor + image.len()).div_ceil(align) * align;
    }

    let mut out = Vec::new();
    out.extend_from_slice(&macho::FAT_MAGIC.to_be_bytes());
    out.extend_from_slice(&as_u32(images.len()).to_be_bytes());
    for (index, (image, offset)) in images.iter().zip(&offsets).enumerate() {
        let cputype = if index == 0 {
            macho::CPU_TYPE_ARM64
        } else {
            macho::CPU_TYPE_X86_64
        };
        out.extend_from_slice(&cputype.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&as_u32(*offset).to_be_bytes());
        out.extend_from_slice(&as_u32(image.len()).to_be_bytes());
        out.extend_from_slice(&ALIGN_SHIFT.to_be_bytes());
    }
    for (image, offset) in images.iter().zip(&offsets) {
        out.resize(*offset, 0);
        out.extend_from_slice(image);
    }
    out
}
