//! Package repository aggregation
//!
//! Repository dumps are fetched, parsed into normalized packages, rewritten
//! by YAML rules, stored as sorted chunks and merged into per-project groups
//! which are diffed against the database by content hash.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod normalize;
pub mod package;
pub mod packagemaker;
pub mod parsers;
pub mod repoproc;
pub mod storage;
pub mod transformer;
pub mod update;
