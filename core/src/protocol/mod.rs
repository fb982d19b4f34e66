/*
 * mod.rs
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

//! The protocol seam: raw IMAP operations the connection client is built on.
//!
//! `Session` is one logged-in (or about to log in) server connection. Mailbox
//! names at this level are server names, using the server's hierarchy
//! delimiter; translation to slash-separated paths happens in the client.
//! `imap` speaks the wire protocol; `memory` serves the same contract from an
//! in-process mailbox tree.

pub mod imap;
pub mod memory;

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Months, NaiveDate, Utc};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::message::Flag;

/// Size tolerance used when searching for a message by its fingerprint.
/// IMAP LARGER/SMALLER are strict, so sizes within this margin match.
pub const SIZE_TOLERANCE: i64 = 50;

/// One mailbox as reported by LIST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub attributes: Vec<String>,
    pub delimiter: Option<char>,
    pub name: String,
}

impl ListEntry {
    pub fn is_selectable(&self) -> bool {
        !self
            .attributes
            .iter()
            .any(|a| a.eq_ignore_ascii_case("\\Noselect") || a.eq_ignore_ascii_case("\\NonExistent"))
    }
}

/// What to fetch per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchItems {
    /// Flags, internal date and size.
    Metadata,
    /// Metadata plus the full body, fetched without setting `\Seen`.
    Full,
}

impl FetchItems {
    /// FETCH data item list for this selection.
    pub fn imap_items(self) -> &'static str {
        match self {
            FetchItems::Metadata => "(FLAGS INTERNALDATE RFC822.SIZE)",
            FetchItems::Full => "(FLAGS INTERNALDATE RFC822.SIZE BODY.PEEK[])",
        }
    }
}

/// A message as returned by FETCH. `seq` is only meaningful inside the
/// session that produced it.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub seq: u32,
    pub internal_date: DateTime<Utc>,
    pub size: u32,
    pub flags: HashSet<Flag>,
    pub body: Option<Vec<u8>>,
}

/// Set of message sequence numbers, kept as sorted disjoint runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceSet {
    runs: Vec<(u32, u32)>,
}

impl SequenceSet {
    /// `start..=end`; empty when `start > end` or `start == 0`.
    pub fn range(start: u32, end: u32) -> Self {
        if start == 0 || start > end {
            return Self::default();
        }
        Self {
            runs: vec![(start, end)],
        }
    }

    pub fn single(seq: u32) -> Self {
        Self::range(seq, seq)
    }

    pub fn from_numbers<I: IntoIterator<Item = u32>>(numbers: I) -> Self {
        let mut nums: Vec<u32> = numbers.into_iter().filter(|&n| n > 0).collect();
        nums.sort_unstable();
        nums.dedup();
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for n in nums {
            match runs.last_mut() {
                Some((_, end)) if *end + 1 == n => *end = n,
                _ => runs.push((n, n)),
            }
        }
        Self { runs }
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.runs
            .iter()
            .map(|(s, e)| (e - s) as usize + 1)
            .sum()
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.runs.iter().any(|&(s, e)| s <= seq && seq <= e)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.runs.iter().flat_map(|&(s, e)| s..=e)
    }
}

impl fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (s, e)) in self.runs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if s == e {
                write!(f, "{}", s)?;
            } else {
                write!(f, "{}:{}", s, e)?;
            }
        }
        Ok(())
    }
}

/// SEARCH criteria: a day window on the internal date and a strict size window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Internal date on or after this day.
    pub since: Option<NaiveDate>,
    /// Internal date strictly before this day.
    pub before: Option<NaiveDate>,
    /// Size strictly greater than this.
    pub larger: Option<u32>,
    /// Size strictly less than this.
    pub smaller: Option<u32>,
}

impl SearchCriteria {
    /// Window around a message fingerprint: one month either side of `date`
    /// (both boundary days included) and `size` plus or minus
    /// `SIZE_TOLERANCE` bytes.
    pub fn around(date: DateTime<Utc>, size: i64) -> Self {
        let since = date
            .checked_sub_months(Months::new(1))
            .unwrap_or(date)
            .date_naive();
        let before = date
            .checked_add_months(Months::new(1))
            .unwrap_or(date)
            .date_naive()
            .succ_opt();
        let larger = size - SIZE_TOLERANCE - 1;
        let smaller = size + SIZE_TOLERANCE + 1;
        Self {
            since: Some(since),
            before,
            larger: (larger >= 0).then(|| clamp_u32(larger)),
            smaller: Some(clamp_u32(smaller)),
        }
    }

    /// Evaluate the criteria against one message, with day granularity in UTC.
    pub fn matches(&self, internal_date: DateTime<Utc>, size: u32) -> bool {
        let day = internal_date.date_naive();
        self.since.map_or(true, |d| day >= d)
            && self.before.map_or(true, |d| day < d)
            && self.larger.map_or(true, |n| size > n)
            && self.smaller.map_or(true, |n| size < n)
    }

    /// SEARCH command arguments, e.g. `SINCE 1-Dec-2023 BEFORE 2-Feb-2024 SMALLER 56`.
    pub fn to_imap(&self) -> String {
        let mut parts = Vec::new();
        if let Some(d) = self.since {
            parts.push(format!("SINCE {}", imap_date(d)));
        }
        if let Some(d) = self.before {
            parts.push(format!("BEFORE {}", imap_date(d)));
        }
        if let Some(n) = self.larger {
            parts.push(format!("LARGER {}", n));
        }
        if let Some(n) = self.smaller {
            parts.push(format!("SMALLER {}", n));
        }
        if parts.is_empty() {
            "ALL".to_string()
        } else {
            parts.join(" ")
        }
    }
}

fn clamp_u32(n: i64) -> u32 {
    n.clamp(0, u32::MAX as i64) as u32
}

/// IMAP `date` form, e.g. `1-Jan-2024`.
pub fn imap_date(d: NaiveDate) -> String {
    d.format("%-d-%b-%Y").to_string()
}

/// IMAP `date-time` form, e.g. `01-Jan-2024 00:00:00 +0000`.
pub fn imap_date_time(d: DateTime<Utc>) -> String {
    d.format("%d-%b-%Y %H:%M:%S +0000").to_string()
}

/// Raw IMAP operations on one connection.
#[async_trait]
pub trait Session: Send {
    async fn login(&mut self, user: &str, pass: &str) -> Result<()>;

    /// All mailboxes (`LIST "" "*"`).
    async fn list(&mut self) -> Result<Vec<ListEntry>>;

    /// Message count without selecting (`STATUS (MESSAGES)`).
    async fn status_messages(&mut self, mailbox: &str) -> Result<u32>;

    /// Select a mailbox, returning its message count. A missing mailbox is
    /// `Error::DirNotFound`.
    async fn select(&mut self, mailbox: &str, read_only: bool) -> Result<u32>;

    /// Sequence numbers of messages in the selected mailbox matching `criteria`.
    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>>;

    /// Stream messages of the selected mailbox into `tx` as they arrive.
    /// Returns once the server has completed the command.
    async fn fetch(
        &mut self,
        set: &SequenceSet,
        items: FetchItems,
        tx: mpsc::Sender<FetchedMessage>,
    ) -> Result<()>;

    async fn append(
        &mut self,
        mailbox: &str,
        flags: &HashSet<Flag>,
        date: DateTime<Utc>,
        data: &[u8],
    ) -> Result<()>;

    /// Add `flags` to the messages in `set` of the selected mailbox.
    async fn store_flags(&mut self, set: &SequenceSet, flags: &HashSet<Flag>) -> Result<()>;

    /// Remove messages flagged `\Deleted` from the selected mailbox.
    async fn expunge(&mut self) -> Result<()>;

    async fn create(&mut self, mailbox: &str) -> Result<()>;

    async fn delete(&mut self, mailbox: &str) -> Result<()>;

    async fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    async fn logout(&mut self) -> Result<()>;
}

/// Opens new sessions. Every filesystem operation asks for a fresh one.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dial and secure a connection; the returned session is not yet logged in.
    async fn connect(&self) -> Result<Box<dyn Session>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sequence_sets_compress_runs() {
        let set = SequenceSet::from_numbers([5, 1, 2, 3, 9, 10, 3]);
        assert_eq!(set.to_string(), "1:3,5,9:10");
        assert_eq!(set.len(), 6);
        assert!(set.contains(10));
        assert!(!set.contains(4));
        assert_eq!(SequenceSet::range(1, 4).to_string(), "1:4");
        assert!(SequenceSet::range(1, 0).is_empty());
        assert_eq!(SequenceSet::single(7).iter().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn window_around_fingerprint() {
        let date = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let c = SearchCriteria::around(date, 1000);
        assert_eq!(c.since, NaiveDate::from_ymd_opt(2023, 12, 15));
        assert_eq!(c.before, NaiveDate::from_ymd_opt(2024, 2, 16));
        assert_eq!(c.larger, Some(949));
        assert_eq!(c.smaller, Some(1051));
        assert_eq!(
            c.to_imap(),
            "SINCE 15-Dec-2023 BEFORE 16-Feb-2024 LARGER 949 SMALLER 1051"
        );
    }

    #[test]
    fn window_boundaries_are_inclusive() {
        let date = Utc.with_ymd_and_hms(2024, 3, 10, 8, 30, 0).unwrap();
        let c = SearchCriteria::around(date, 100);
        let month_before = Utc.with_ymd_and_hms(2024, 2, 10, 23, 59, 59).unwrap();
        let month_after = Utc.with_ymd_and_hms(2024, 4, 10, 0, 0, 0).unwrap();
        assert!(c.matches(month_before, 100));
        assert!(c.matches(month_after, 100));
        assert!(!c.matches(Utc.with_ymd_and_hms(2024, 2, 9, 12, 0, 0).unwrap(), 100));
        assert!(!c.matches(Utc.with_ymd_and_hms(2024, 4, 11, 0, 0, 0).unwrap(), 100));
        assert!(c.matches(date, 50));
        assert!(c.matches(date, 150));
        assert!(!c.matches(date, 49));
        assert!(!c.matches(date, 151));
    }

    #[test]
    fn small_sizes_drop_lower_bound() {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let c = SearchCriteria::around(date, 5);
        assert_eq!(c.larger, None);
        assert!(c.matches(date, 0));
        assert!(!c.to_imap().contains("LARGER"));
    }

    #[test]
    fn date_forms() {
        let d = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(imap_date(d.date_naive()), "1-Jan-2024");
        assert_eq!(imap_date_time(d), "01-Jan-2024 00:00:00 +0000");
        assert_eq!(SearchCriteria::default().to_imap(), "ALL");
    }

    #[test]
    fn noselect_entries_are_not_selectable() {
        let e = ListEntry {
            attributes: vec!["\\Noselect".into()],
            delimiter: Some('/'),
            name: "Shared".into(),
        };
        assert!(!e.is_selectable());
    }
}
