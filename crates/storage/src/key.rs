//! Archive key naming.
//!
//! Keys embed the UTC creation instant at millisecond precision with `:` and
//! `.` replaced by `-`, e.g. `boar-db-bkp-2024-05-01T03-00-00-000Z.sql`. The
//! fixed-width timestamp keeps keys lexicographically sorted by creation time.

use chrono::{DateTime, NaiveDateTime, Utc};

pub const KEY_PREFIX: &str = "boar-db-bkp-";
pub const KEY_SUFFIX: &str = ".sql";

const KEY_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

/// Build the archive key for a dump taken at `now`.
pub fn archive_key(now: DateTime<Utc>) -> String {
    let iso = now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    format!("{}{}{}", KEY_PREFIX, iso.replace(&[':', '.'][..], "-"), KEY_SUFFIX)
}

/// Recover the creation instant from a key produced by [`archive_key`].
pub fn parse_archive_key(key: &str) -> Option<DateTime<Utc>> {
    let stamp = key.strip_prefix(KEY_PREFIX)?.strip_suffix(KEY_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, KEY_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn is_archive_key(key: &str) -> bool {
    parse_archive_key(key).is_some()
}
