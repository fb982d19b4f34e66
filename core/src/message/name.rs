/*
 * name.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Mailfs, an IMAP-backed file store.
 *
 * Mailfs is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Mailfs is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Mailfs.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Canonical message file names (maildir-like).
//! Format: `<unix seconds>.R<checksum>.<host>,S=<size>-2,<flags>`
//! e.g. `1704067200.R5d41402abc4b2a76b9719d911017c592.imap.rclone.org,S=5-2,S`

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::flag::{flag_letters, Flag};
use crate::error::{Error, Result};

/// Host tag written into every synthesized name. Fixed so names stay
/// reproducible from (date, checksum, size) alone.
pub const HOST_TAG: &str = "imap.rclone.org";

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+)\.R([0-9A-Fa-f]+)\.([^,/]+),S=(\d+)-2,([SATDF]*)$")
            .expect("canonical name pattern compiles")
    })
}

/// Fields decoded from a canonical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalName {
    pub date: DateTime<Utc>,
    pub checksum: String,
    pub host: String,
    pub size: i64,
    pub flags: HashSet<Flag>,
}

impl CanonicalName {
    /// True if `name` has the shape of a canonical name. Values may still be
    /// out of range; `parse` has the final word.
    pub fn looks_like(name: &str) -> bool {
        name_regex().is_match(name)
    }

    /// Decode a canonical name. Any deviation is `InvalidName`; there is no
    /// partial result.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = || Error::InvalidName(name.to_string());
        let caps = name_regex().captures(name).ok_or_else(invalid)?;
        let secs: i64 = caps[1].parse().map_err(|_| invalid())?;
        let date = DateTime::from_timestamp(secs, 0).ok_or_else(invalid)?;
        let size: i64 = caps[4].parse().map_err(|_| invalid())?;
        let flags = caps[5].chars().filter_map(Flag::from_letter).collect();
        Ok(Self {
            date,
            checksum: caps[2].to_ascii_lowercase(),
            host: caps[3].to_string(),
            size,
            flags,
        })
    }

    /// Synthesize a name. With `flags` set, their letters follow the final comma.
    pub fn format(date: DateTime<Utc>, checksum: &str, size: i64, flags: Option<&HashSet<Flag>>) -> String {
        let mut name = format!(
            "{}.R{}.{},S={}-2,",
            date.timestamp(),
            checksum,
            HOST_TAG,
            size
        );
        if let Some(flags) = flags {
            name.push_str(&flag_letters(flags));
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    #[test]
    fn parse_full_name() {
        let n = CanonicalName::parse(&format!(
            "1704067200.R{}.imap.rclone.org,S=5-2,SF",
            HELLO_MD5
        ))
        .unwrap();
        assert_eq!(n.date.timestamp(), 1_704_067_200);
        assert_eq!(n.checksum, HELLO_MD5);
        assert_eq!(n.host, "imap.rclone.org");
        assert_eq!(n.size, 5);
        assert!(n.flags.contains(&Flag::Seen));
        assert!(n.flags.contains(&Flag::Flagged));
        assert_eq!(n.flags.len(), 2);
    }

    #[test]
    fn format_matches_wire_contract() {
        let date = DateTime::from_timestamp(1_704_067_200, 0).unwrap();
        assert_eq!(
            CanonicalName::format(date, HELLO_MD5, 5, None),
            format!("1704067200.R{}.imap.rclone.org,S=5-2,", HELLO_MD5)
        );
        let flags: HashSet<Flag> = [Flag::Seen].into_iter().collect();
        assert!(CanonicalName::format(date, HELLO_MD5, 5, Some(&flags)).ends_with("-2,S"));
        assert!(CanonicalName::format(date, HELLO_MD5, 5, Some(&HashSet::new())).ends_with("-2,"));
    }

    #[test]
    fn other_host_tags_parse() {
        let n = CanonicalName::parse("10.Rabc.mail.example.net,S=3-2,").unwrap();
        assert_eq!(n.host, "mail.example.net");
    }

    #[test]
    fn rejects_deviations() {
        for bad in [
            "",
            "INBOX",
            "notanumber.Rabc.host,S=1-2,",
            "10.Rabc.host,S=x-2,",
            "10.Rabc.host,S=1-2",
            "10.Rabc.host,S=1:2,",
            "10.Rxyz.host,S=1-2,",
            "10.Rabc.host,S=1-2,SX",
            "prefix 10.Rabc.host,S=1-2,",
            "99999999999999999999.Rabc.host,S=1-2,",
        ] {
            assert!(
                matches!(CanonicalName::parse(bad), Err(Error::InvalidName(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn shape_check_is_weaker_than_parse() {
        let overflow = "99999999999999999999.Rabc.host,S=1-2,";
        assert!(CanonicalName::looks_like(overflow));
        assert!(CanonicalName::parse(overflow).is_err());
        assert!(!CanonicalName::looks_like("Archive"));
    }
}
