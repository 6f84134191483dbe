//! # hdist-profile
//!
//! Profile documents describing software stacks. Profiles form a DAG via
//! `extends`: parameter maps and package maps merge leaves-first, with
//! overlapping contributions from two bases rejected as conflicts.
//! Diamond inheritance is rejected outright.

pub mod error;
mod graph;
pub mod profile;
pub mod source;

pub use crate::error::{ProfileError, Result};
pub use crate::profile::{
    IncludeDoc, PackageEntry, PackageSpec, Profile, ProfileDoc, load_profile,
};
pub use crate::source::SourceCache;
