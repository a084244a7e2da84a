//! On-disk building blocks: advisory locks and segment files.

pub mod header;
pub mod lock;
pub mod segment;
