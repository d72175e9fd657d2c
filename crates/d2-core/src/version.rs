//! Upgrade version ranges.
//!
//! A range walks the minor component between two versions of the same
//! major: `2.34.1 → 2.36` yields `["2.34.1", "2.35", "2.36"]`. The endpoints
//! keep their literal spelling (patch suffix included); interior entries are
//! plain `major.minor`.

use crate::error::{D2Error, D2Result};

/// `(major, minor)` of a version string; anything after the minor is ignored.
fn major_minor(version: &str) -> D2Result<(&str, u32)> {
    let mut parts = version.split('.');
    let major = parts.next().filter(|m| !m.is_empty());
    let minor = parts.next();

    match (major, minor) {
        (Some(major), Some(minor)) => {
            let minor = minor.parse::<u32>().map_err(|_| {
                D2Error::Version(format!("minor component of '{version}' is not a number"))
            })?;
            Ok((major, minor))
        }
        _ => Err(D2Error::Version(format!(
            "'{version}' is not a MAJOR.MINOR[.PATCH] version"
        ))),
    }
}

/// Compute the ordered list of versions an upgrade walks through.
///
/// Fails if the majors differ, if `end` precedes `start`, or if both share a
/// minor but differ in spelling (patch-only upgrades are not a range).
pub fn version_range(start: &str, end: &str) -> D2Result<Vec<String>> {
    let (start_major, start_minor) = major_minor(start)?;
    let (end_major, end_minor) = major_minor(end)?;

    if start_major != end_major {
        return Err(D2Error::Version(format!(
            "only same major versions supported ({start} -> {end})"
        )));
    }
    if end_minor < start_minor {
        return Err(D2Error::Version(format!("{end} precedes {start}")));
    }
    if end_minor == start_minor && start != end {
        return Err(D2Error::Version(format!(
            "{start} and {end} share a minor version"
        )));
    }

    let versions = (start_minor..=end_minor)
        .map(|minor| {
            if minor == start_minor {
                start.to_string()
            } else if minor == end_minor {
                end.to_string()
            } else {
                format!("{start_major}.{minor}")
            }
        })
        .collect();

    Ok(versions)
}
