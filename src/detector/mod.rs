pub mod change;
pub mod intersection;
pub mod margin;

pub use change::{batch_fingerprint, dedupe_consecutive, snapshot_hash, ChangeTracker};
pub use intersection::CommonOddsSet;
pub use margin::{line_index, margin_index};
