mod ranges;
mod search;

pub use self::ranges::{hull, merge_overlapping_ranges};
pub use self::search::jump_targets;
