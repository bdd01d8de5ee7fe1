pub mod errors;
pub mod lock_stats;
