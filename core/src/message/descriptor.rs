/*
 * descriptor.rs
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

//! A mail message seen as a file.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use super::flag::Flag;
use super::name::CanonicalName;
use crate::error::{Error, Result};
use crate::hash::{hash_bytes, hash_reader, NAMING_HASH};
use crate::protocol::FetchedMessage;

/// Identity and state of one message: the mailbox that holds it, its content
/// fingerprint (date, checksum, size) and its flags.
///
/// Equality compares the fingerprint only; flags change without the message
/// becoming a different file.
#[derive(Debug, Clone)]
pub struct MessageDescriptor {
    mailbox: String,
    name: Option<String>,
    date: DateTime<Utc>,
    checksum: String,
    size: i64,
    flags: HashSet<Flag>,
}

impl MessageDescriptor {
    /// Descriptor from a known fingerprint. `date` is truncated to whole seconds.
    pub fn new(mailbox: &str, date: DateTime<Utc>, checksum: impl Into<String>, size: i64) -> Self {
        Self {
            mailbox: mailbox.to_string(),
            name: None,
            date: truncate_to_seconds(date),
            checksum: checksum.into(),
            size,
            flags: HashSet::new(),
        }
    }

    /// Descriptor for a canonical name found under `mailbox`.
    pub fn parse_name(mailbox: &str, name: &str) -> Result<Self> {
        let parsed = CanonicalName::parse(name)?;
        Ok(Self {
            mailbox: mailbox.to_string(),
            name: None,
            date: parsed.date,
            checksum: parsed.checksum,
            size: parsed.size,
            flags: parsed.flags,
        })
    }

    /// Hash `content` to the end. `date` is truncated to whole seconds; `name`
    /// overrides the synthesized canonical name when given.
    pub async fn from_content<R>(
        mailbox: &str,
        name: Option<String>,
        date: DateTime<Utc>,
        content: &mut R,
        size: i64,
        flags: HashSet<Flag>,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut sums = hash_reader(content, &[NAMING_HASH]).await?;
        let checksum = sums
            .remove(&NAMING_HASH)
            .ok_or_else(|| Error::Read(std::io::Error::other("naming hash missing")))?;
        Ok(Self {
            mailbox: mailbox.to_string(),
            name,
            date: truncate_to_seconds(date),
            checksum,
            size,
            flags,
        })
    }

    /// Descriptor for a message as the server returned it. Date, size and
    /// flags come from the fetch response; the checksum is computed over the
    /// fetched body.
    pub fn from_fetched(mailbox: &str, msg: &FetchedMessage) -> Result<Self> {
        let body = msg.body.as_deref().ok_or_else(|| {
            Error::Read(std::io::Error::other(format!(
                "message {} has no body",
                msg.seq
            )))
        })?;
        Ok(Self {
            mailbox: mailbox.to_string(),
            name: None,
            date: truncate_to_seconds(msg.internal_date),
            checksum: hash_bytes(body, NAMING_HASH),
            size: msg.size as i64,
            flags: msg.flags.clone(),
        })
    }

    /// Same fingerprint with an explicit display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Synthesized name, with the flag letters when `include_flags` is set.
    pub fn canonical_name(&self, include_flags: bool) -> String {
        CanonicalName::format(
            self.date,
            &self.checksum,
            self.size,
            include_flags.then_some(&self.flags),
        )
    }

    /// The override name if set, else the canonical name with flags.
    pub fn name(&self) -> String {
        match &self.name {
            Some(n) => n.clone(),
            None => self.canonical_name(true),
        }
    }

    /// Whether `candidate` is a canonical name for the same content. Names that
    /// do not parse never match.
    pub fn matches_name(&self, candidate: &str) -> bool {
        match CanonicalName::parse(candidate) {
            Ok(n) => n.date == self.date && n.checksum == self.checksum && n.size == self.size,
            Err(_) => false,
        }
    }

    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn flags(&self) -> &HashSet<Flag> {
        &self.flags
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }
}

impl PartialEq for MessageDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.date == other.date && self.checksum == other.checksum && self.size == other.size
    }
}

impl Eq for MessageDescriptor {}

impl fmt::Display for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mailbox.is_empty() {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}/{}", self.mailbox, self.name())
        }
    }
}

fn truncate_to_seconds(date: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(date.timestamp(), 0).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    fn jan_first() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    async fn hello(flags: HashSet<Flag>) -> MessageDescriptor {
        let mut r: &[u8] = b"hello";
        MessageDescriptor::from_content("INBOX", None, jan_first(), &mut r, 5, flags)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn content_names_the_message() {
        let d = hello(HashSet::new()).await;
        assert_eq!(d.checksum(), HELLO_MD5);
        assert_eq!(
            d.canonical_name(false),
            format!("1704067200.R{}.imap.rclone.org,S=5-2,", HELLO_MD5)
        );
        assert_eq!(d.name(), d.canonical_name(true));
        assert_eq!(d.to_string(), format!("INBOX/{}", d.name()));
    }

    #[tokio::test]
    async fn name_round_trips_without_flags() {
        let d = hello([Flag::Seen].into_iter().collect()).await;
        let parsed = MessageDescriptor::parse_name("INBOX", &d.canonical_name(false)).unwrap();
        assert_eq!(parsed, d);
        assert!(parsed.flags().is_empty());
        assert!(d.canonical_name(true).ends_with(",S=5-2,S"));
    }

    #[tokio::test]
    async fn equality_ignores_flags() {
        let plain = hello(HashSet::new()).await;
        let flagged = hello([Flag::Flagged, Flag::Deleted].into_iter().collect()).await;
        assert_eq!(plain, flagged);
        assert!(flagged.has_flag(Flag::Deleted));
    }

    #[tokio::test]
    async fn matches_name_checks_all_three_fields() {
        let d = hello(HashSet::new()).await;
        assert!(d.matches_name(&d.canonical_name(false)));
        assert!(d.matches_name(&format!("{}SF", d.canonical_name(false))));
        assert!(!d.matches_name("hello.txt"));
        assert!(!d.matches_name(&format!("1704067201.R{}.imap.rclone.org,S=5-2,", HELLO_MD5)));
        assert!(!d.matches_name(&format!("1704067200.R{}.imap.rclone.org,S=6-2,", HELLO_MD5)));
        assert!(!d.matches_name("1704067200.Rabcdef.imap.rclone.org,S=5-2,"));
    }

    #[tokio::test]
    async fn empty_content_is_well_defined() {
        let mut r: &[u8] = b"";
        let d = MessageDescriptor::from_content("A", None, jan_first(), &mut r, 0, HashSet::new())
            .await
            .unwrap();
        assert_eq!(d.checksum(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn subsecond_dates_are_truncated() {
        let date = jan_first() + chrono::Duration::milliseconds(750);
        let mut r: &[u8] = b"hello";
        let d = MessageDescriptor::from_content("INBOX", None, date, &mut r, 5, HashSet::new())
            .await
            .unwrap();
        assert_eq!(d, hello(HashSet::new()).await);
    }

    #[test]
    fn fetched_size_is_authoritative() {
        let msg = FetchedMessage {
            seq: 3,
            internal_date: jan_first(),
            size: 7,
            flags: [Flag::Seen].into_iter().collect(),
            body: Some(b"hello".to_vec()),
        };
        let d = MessageDescriptor::from_fetched("INBOX", &msg).unwrap();
        assert_eq!(d.size(), 7);
        assert_eq!(d.checksum(), HELLO_MD5);
        assert!(d.name().ends_with(",S=7-2,S"));
    }

    #[test]
    fn fetched_without_body_is_read_error() {
        let msg = FetchedMessage {
            seq: 1,
            internal_date: jan_first(),
            size: 5,
            flags: HashSet::new(),
            body: None,
        };
        assert!(matches!(
            MessageDescriptor::from_fetched("INBOX", &msg),
            Err(Error::Read(_))
        ));
    }

    #[test]
    fn override_name_wins() {
        let d = MessageDescriptor::parse_name(
            "Archive",
            &format!("1704067200.R{}.imap.rclone.org,S=5-2,", HELLO_MD5),
        )
        .unwrap()
        .with_name("note.eml");
        assert_eq!(d.name(), "note.eml");
        assert_eq!(d.mailbox(), "Archive");
    }
}
