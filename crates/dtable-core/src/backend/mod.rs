//! Concrete storage engines implementing [`Table`](crate::table::Table).
//!
//! | Engine | Module | `save_as` onto an existing table |
//! |---|---|---|
//! | grid-compute | [`grid`] | `NameConflict` unless `overwrite` |
//! | filesystem | [`filesystem`] | `NameConflict` unless `overwrite` |
//!
//! Relational tables are addressed by
//! [`RelationalAddress`](crate::address::RelationalAddress) but have no
//! engine in this crate.

pub mod filesystem;
pub mod grid;
