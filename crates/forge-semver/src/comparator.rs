//! Comparison helpers over optional versions.
//!
//! Catalog entries may carry no version at all, or one we could not parse.
//! Both behave like "absent": absent sorts below every real version, and an
//! absent version is never considered newer than anything.

use std::cmp::Ordering;

use crate::RelaxedVersion;

/// Total order over optional versions. `None` compares less than every
/// `Some(_)` and equal to `None`.
pub fn compare(a: Option<&RelaxedVersion>, b: Option<&RelaxedVersion>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(b),
    }
}

/// Strict "is `a` newer than `b`". Kept separate from [`compare`] for the
/// legacy call sites that ask the question directly; agrees with `compare`
/// except that a missing `a` is unconditionally not newer.
pub fn greater_than(a: Option<&RelaxedVersion>, b: Option<&RelaxedVersion>) -> bool {
    match a {
        None => false,
        Some(_) => compare(a, b) == Ordering::Greater,
    }
}
