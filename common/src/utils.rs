use std::path::PathBuf;

/// Searches the current directory, the current executable's path, and their
/// ancestors for an entry whose name starts with `name`.
/// If found, returns the path to `name` inside the first matching directory,
/// leaving the extension to be resolved by the caller.
pub fn search_current_ancestor_dirs_for(name: &str) -> Option<PathBuf> {
    [std::env::current_dir(), std::env::current_exe()]
        .iter()
        .filter_map(|p| p.as_ref().ok())
        .flat_map(|p| p.ancestors())
        .find(|p| {
            p.read_dir().is_ok_and(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .any(|e| e.file_name().to_str().is_some_and(|n| n.starts_with(name)))
            })
        })
        .map(|p| p.join(name))
}

/// Returns the mask with the lowest `bits` bits set.
/// `bits` greater than or equal to 64 gives all ones.
#[inline]
pub const fn low_mask(bits: u32) -> u64 {
    if bits >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::{low_mask, search_current_ancestor_dirs_for};

    #[test]
    fn low_mask_edges() {
        assert_eq!(low_mask(0), 0);
        assert_eq!(low_mask(8), 0xff);
        assert_eq!(low_mask(64), u64::MAX);
        assert_eq!(low_mask(100), u64::MAX);
    }

    #[test]
    fn missing_entry_is_not_found() {
        assert!(search_current_ancestor_dirs_for("__binsym_surely_missing_entry__").is_none());
    }
}
