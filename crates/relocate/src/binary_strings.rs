//! NUL-padded replacement of C strings embedded in object files
//!
//! Load commands and the dynamic section are handled by the rewriters;
//! this covers paths compiled into `.rodata` and similar sections. A
//! string can only shrink: the replacement is written in place and the
//! bytes freed at the end of the string are filled with NUL.

use bstr::ByteSlice;

use crate::paths::PrefixMap;

/// Counts of embedded strings handled by one patch pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BinaryStringPatch {
    /// Occurrences replaced
    pub patched: usize,
    /// Occurrences left alone because the replacement is longer
    pub skipped: usize,
}

impl BinaryStringPatch {
    fn add(&mut self, other: BinaryStringPatch) {
        self.patched += other.patched;
        self.skipped += other.skipped;
    }
}

/// Replace `old` with `new` inside every NUL-terminated string of `data`
///
/// The rest of each string is kept, so `/old/root/lib/x` becomes
/// `/new/lib/x` followed by enough NUL bytes to keep every offset in the
/// file stable.
pub fn patch_binary_strings(data: &mut [u8], old: &[u8], new: &[u8]) -> BinaryStringPatch {
    let mut result = BinaryStringPatch::default();
    if old.is_empty() || old == new {
        return result;
    }

    let mut pos = 0;
    while let Some(found) = data[pos..].find(old) {
        let start = pos + found;
        let end = data[start..].find_byte(0).map_or(data.len(), |n| start + n);

        // Every occurrence inside this string is handled at once
        let original = data[start..end].to_vec();
        let count = original.find_iter(old).count();
        if new.len() > old.len() {
            result.skipped += count;
        } else {
            let replaced = original.replace(old, new);
            data[start..start + replaced.len()].copy_from_slice(&replaced);
            data[start + replaced.len()..end].fill(0);
            result.patched += count;
        }
        pos = end;
    }
    result
}

/// Apply every pair of `map` in order
pub fn patch_binary_strings_with(data: &mut [u8], map: &PrefixMap) -> BinaryStringPatch {
    let mut total = BinaryStringPatch::default();
    for (old, new) in map.pairs() {
        total.add(patch_binary_strings(data, old.as_bytes(), new.as_bytes()));
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrinks_and_pads() {
        let mut data = b"\x7fXX/home/spack/opt/spack/lib/libz.so\0next\0".to_vec();
        let len = data.len();
        let result = patch_binary_strings(&mut data, b"/home/spack/opt/spack", b"/opt/sw");
        assert_eq!(result, BinaryStringPatch { patched: 1, skipped: 0 });
        assert_eq!(data.len(), len);
        assert!(data.starts_with(b"\x7fXX/opt/sw/lib/libz.so\0"));
        assert!(data.ends_with(b"\0next\0"));
        assert_eq!(data.find(b"/home/spack"), None);
    }

    #[test]
    fn handles_several_occurrences_in_one_string() {
        let mut data = b"-L/old/a:/old/b\0".to_vec();
        let result = patch_binary_strings(&mut data, b"/old", b"/n");
        assert_eq!(result.patched, 2);
        assert_eq!(&data, b"-L/n/a:/n/b\0\0\0\0\0");
    }

    #[test]
    fn longer_replacement_is_skipped() {
        let mut data = b"/short/lib\0".to_vec();
        let before = data.clone();
        let result = patch_binary_strings(&mut data, b"/short", b"/much/longer");
        assert_eq!(result, BinaryStringPatch { patched: 0, skipped: 1 });
        assert_eq!(data, before);
    }

    #[test]
    fn unterminated_string_at_end_of_data() {
        let mut data = b"xx/old/tail".to_vec();
        patch_binary_strings(&mut data, b"/old", b"/n");
        assert_eq!(&data, b"xx/n/tail\0\0");
    }
}
