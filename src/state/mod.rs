pub mod match_cache;
pub mod warning_cache;

pub use match_cache::MatchCache;
pub use warning_cache::WarningCache;
