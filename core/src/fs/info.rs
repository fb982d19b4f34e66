/*
 * info.rs
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

//! Narrow interfaces the store shares with its callers.

use std::any::Any;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use super::object::Object;
use crate::error::{Error, Result};
use crate::hash::HashType;

/// Boxed content stream.
pub type Content = Box<dyn AsyncRead + Send + Unpin>;

/// What the store needs to know about an object from elsewhere: the source
/// of a put, or a hint during a copy.
#[async_trait]
pub trait ObjectInfo: Send + Sync {
    /// Path relative to the root of the store that owns it.
    fn remote(&self) -> String;

    fn mod_time(&self) -> DateTime<Utc>;

    fn size(&self) -> i64;

    /// Hash of the content if already known. `None` means it must be computed.
    async fn hash(&self, _t: HashType) -> Result<Option<String>> {
        Ok(None)
    }

    async fn open(&self) -> Result<Content> {
        Err(Error::Unsupported("opening this object"))
    }
}

/// Identity of a store, for operations between two stores.
pub trait FsInfo: Send + Sync {
    fn name(&self) -> &str;
    fn root(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

/// Metadata-only `ObjectInfo`, for callers that stream content they hold.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub remote: String,
    pub mod_time: DateTime<Utc>,
    pub size: i64,
}

impl SourceInfo {
    pub fn new(remote: impl Into<String>, mod_time: DateTime<Utc>, size: i64) -> Self {
        Self {
            remote: remote.into(),
            mod_time,
            size,
        }
    }
}

#[async_trait]
impl ObjectInfo for SourceInfo {
    fn remote(&self) -> String {
        self.remote.clone()
    }

    fn mod_time(&self) -> DateTime<Utc> {
        self.mod_time
    }

    fn size(&self) -> i64 {
        self.size
    }
}

/// What the store can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub dir_move: bool,
    pub put_stream: bool,
    pub server_side_copy: bool,
    pub set_mod_time: bool,
}

/// A mailbox seen as a directory. IMAP folders carry no modification time,
/// so it is always the epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    remote: String,
}

impl Directory {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn mod_time(&self) -> DateTime<Utc> {
        DateTime::<Utc>::default()
    }
}

/// One listing entry, decided when the listing is built.
#[derive(Debug)]
pub enum DirEntry {
    Directory(Directory),
    Object(Object),
}

impl DirEntry {
    pub fn remote(&self) -> &str {
        match self {
            DirEntry::Directory(d) => d.remote(),
            DirEntry::Object(o) => o.remote(),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, DirEntry::Directory(_))
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            DirEntry::Object(o) => Some(o),
            DirEntry::Directory(_) => None,
        }
    }

    pub fn into_object(self) -> Option<Object> {
        match self {
            DirEntry::Object(o) => Some(o),
            DirEntry::Directory(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn directories_are_epoch_dated() {
        let d = DirEntry::Directory(Directory::new("Work/2023"));
        assert!(d.is_dir());
        assert_eq!(d.remote(), "Work/2023");
        assert!(d.as_object().is_none());
        assert_eq!(Directory::new("x").mod_time().timestamp(), 0);
    }

    #[tokio::test]
    async fn source_info_has_no_content() {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let info = SourceInfo::new("INBOX/note", date, 5);
        assert_eq!(info.remote(), "INBOX/note");
        assert_eq!(info.hash(HashType::Md5).await.unwrap(), None);
        assert!(matches!(info.open().await, Err(Error::Unsupported(_))));
    }
}
