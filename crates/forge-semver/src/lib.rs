//! Relaxed semantic version handling.
//!
//! Contribution catalogs carry loosely-structured version strings: `"7"`,
//! `"1.6"`, `"1.8.3-2014q1"` all appear in the wild. This crate parses those
//! into a comparable form, zero-filling missing components, and provides the
//! `Option`-based comparison helpers the rest of the system uses (a missing
//! or unparsable version compares below everything and is never "newer").

mod comparator;
mod version;

pub use comparator::{compare, greater_than};
pub use version::{RelaxedVersion, VersionParseError};

/// Parse a version string, logging and swallowing failures.
///
/// Catalog entries with versions we cannot make sense of are not fatal; they
/// simply behave like entries without a version.
pub fn parse_lenient(input: &str) -> Option<RelaxedVersion> {
    match input.parse::<RelaxedVersion>() {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("ignoring unparsable version {:?}: {}", input, e);
            None
        }
    }
}
