//! Page arithmetic shared by the live and fake providers.

/// Page size assumed when the OS cannot report one.
pub const FALLBACK_PAGE_SIZE: u64 = 4096;

/// First page boundary strictly after `offset`.
///
/// A write starting at `offset` may extend up to (not across) this boundary.
/// Saturates instead of wrapping for offsets near `u64::MAX`.
#[must_use]
pub fn next_boundary(offset: u64, page_size: u64) -> u64 {
    (offset / page_size)
        .saturating_add(1)
        .saturating_mul(page_size)
}

/// Whether `offset` sits exactly on a page boundary.
#[must_use]
pub fn is_boundary(offset: u64, page_size: u64) -> bool {
    offset % page_size == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_after_interior_offset_is_end_of_page() {
        assert_eq!(next_boundary(0, 4096), 4096);
        assert_eq!(next_boundary(1, 4096), 4096);
        assert_eq!(next_boundary(4095, 4096), 4096);
        assert_eq!(next_boundary(4096, 4096), 8192);
        assert_eq!(next_boundary(12_345, 4096), 16_384);
    }

    #[test]
    fn works_for_unusual_page_sizes() {
        // 16 KiB pages and a deliberately odd size both hold.
        assert_eq!(next_boundary(6, 16_384), 16_384);
        assert_eq!(next_boundary(999, 1000), 1000);
        assert_eq!(next_boundary(1000, 1000), 2000);
    }

    #[test]
    fn saturates_near_the_top_of_the_range() {
        let near_max = u64::MAX - 1;
        assert_eq!(next_boundary(near_max, 4096), u64::MAX);
    }

    #[test]
    fn boundary_detection() {
        assert!(is_boundary(0, 4096));
        assert!(is_boundary(8192, 4096));
        assert!(!is_boundary(6, 4096));
        assert!(!is_boundary(4097, 4096));
    }
}
