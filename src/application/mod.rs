//! Call patterns the domain services share on top of the infrastructure
//! leaves: cache-aside reads, media replacement, and typed cache keys.

pub mod cache_aside;
pub mod keys;
pub mod media;
