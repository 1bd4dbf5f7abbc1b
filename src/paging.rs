//! Page arithmetic for threads.
//!
//! The root post sits on floor 1 and comments on floors 2..N, so page `p`
//! covers floors `(p - 1) * size + 1 ..= p * size` and the first page holds
//! the post plus `size - 1` comments.

use std::num::NonZeroU32;
use std::ops::RangeInclusive;

use crate::floors::ThreadEntry;

pub const DEFAULT_PAGE_SIZE: NonZeroU32 = match NonZeroU32::new(15) {
    Some(size) => size,
    None => unreachable!(),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("floor {floor} is not a valid floor number")]
pub struct InvalidFloorError {
    pub floor: i64,
}

/// Returns the page on which `target_floor` is rendered.
pub fn locate_page(target_floor: i64, page_size: NonZeroU32) -> Result<u32, InvalidFloorError> {
    if target_floor < 1 {
        return Err(InvalidFloorError {
            floor: target_floor,
        });
    }
    let size = u64::from(page_size.get());
    let floor = target_floor as u64;
    if floor <= size {
        return Ok(1);
    }
    let page = (floor - size).div_ceil(size) + 1;
    Ok(u32::try_from(page).unwrap_or(u32::MAX))
}

/// Floors shown on `page` (pages are 1-based; 0 is treated as 1).
pub fn floor_range(page: u32, page_size: NonZeroU32) -> RangeInclusive<u64> {
    let size = u64::from(page_size.get());
    let page = u64::from(page.max(1));
    ((page - 1) * size + 1)..=(page * size)
}

/// Number of pages needed for the root post plus `comment_count` comments.
pub fn total_pages(comment_count: usize, page_size: NonZeroU32) -> u32 {
    let floors = comment_count as u64 + 1;
    let pages = floors.div_ceil(u64::from(page_size.get()));
    u32::try_from(pages.max(1)).unwrap_or(u32::MAX)
}

pub fn clamp_page(page: u32, comment_count: usize, page_size: NonZeroU32) -> u32 {
    page.clamp(1, total_pages(comment_count, page_size))
}

/// Entries whose floor falls on `page`.
pub fn page_entries(entries: &[ThreadEntry], page: u32, page_size: NonZeroU32) -> &[ThreadEntry] {
    let range = floor_range(page, page_size);
    let start = entries
        .iter()
        .position(|entry| u64::from(entry.floor) >= *range.start())
        .unwrap_or(entries.len());
    let end = entries[start..]
        .iter()
        .position(|entry| u64::from(entry.floor) > *range.end())
        .map(|offset| start + offset)
        .unwrap_or(entries.len());
    &entries[start..end]
}
