pub mod persistence;
pub mod presence_cache;
