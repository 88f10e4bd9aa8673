//! Domain types and invariants shared by the infrastructure adapters.

pub mod media;
pub mod slug;
