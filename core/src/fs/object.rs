/*
 * object.rs
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

//! A message as a file.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::info::{Content, ObjectInfo};
use super::Shared;
use crate::error::{Error, Result};
use crate::hash::{hash_reader, HashType, NAMING_HASH};
use crate::lister::{self, FoundMessage};
use crate::message::{Flag, MessageDescriptor};
use crate::protocol::SequenceSet;
use crate::resolver::join_path;

/// One message in one mailbox. The sequence number it was listed with is
/// informational only: `open` and `remove` find the message again by its
/// fingerprint in their own connection.
pub struct Object {
    shared: Arc<Shared>,
    remote: String,
    seq: u32,
    descriptor: MessageDescriptor,
    hashes: Mutex<HashMap<HashType, String>>,
}

impl Object {
    pub(crate) fn new(shared: Arc<Shared>, dir: &str, found: FoundMessage) -> Self {
        let FoundMessage {
            seq, descriptor, ..
        } = found;
        let remote = join_path(dir, &descriptor.name());
        let hashes = HashMap::from([(NAMING_HASH, descriptor.checksum().to_string())]);
        Self {
            shared,
            remote,
            seq,
            descriptor,
            hashes: Mutex::new(hashes),
        }
    }

    /// Same message under another base name.
    pub(crate) fn renamed(mut self, name: &str) -> Self {
        let dir = match self.remote.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => String::new(),
        };
        self.descriptor = self.descriptor.with_name(name);
        self.remote = join_path(&dir, name);
        self
    }

    /// Path relative to the store root.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Base name: the canonical name with flags, unless renamed.
    pub fn name(&self) -> String {
        self.descriptor.name()
    }

    /// Server mailbox path holding the message.
    pub fn mailbox(&self) -> &str {
        self.descriptor.mailbox()
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    /// Sequence number at listing time.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn size(&self) -> i64 {
        self.descriptor.size()
    }

    pub fn mod_time(&self) -> DateTime<Utc> {
        self.descriptor.date()
    }

    pub fn flags(&self) -> &HashSet<Flag> {
        self.descriptor.flags()
    }

    pub fn storable(&self) -> bool {
        true
    }

    /// Content hash of type `t`, computed from the message body on first use.
    pub async fn hash(&self, t: HashType) -> Result<String> {
        if let Some(sum) = self.cached_hash(t) {
            return Ok(sum);
        }
        let mut content = self.open().await?;
        let mut sums = hash_reader(&mut content, &[t]).await?;
        let sum = sums
            .remove(&t)
            .ok_or_else(|| Error::Read(std::io::Error::other(format!("no {} hash", t))))?;
        self.hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(t, sum.clone());
        Ok(sum)
    }

    fn cached_hash(&self, t: HashType) -> Option<String> {
        self.hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&t)
            .cloned()
    }

    /// Message bytes, fetched in a new connection.
    pub async fn open(&self) -> Result<Cursor<Vec<u8>>> {
        let found = self.locate().await?;
        let body = found.body.ok_or_else(|| {
            Error::Read(std::io::Error::other(format!("no body for {}", self.remote)))
        })?;
        debug!("opened {} ({} bytes)", self.remote, body.len());
        Ok(Cursor::new(body))
    }

    /// Flag the message deleted and expunge the mailbox.
    pub async fn remove(&self) -> Result<()> {
        let mailbox = self.descriptor.mailbox().to_string();
        let target = self.descriptor.clone();
        let remote = self.remote.clone();
        self.shared
            .bounded(async {
                let mut client = self.shared.connect().await?;
                let result = async {
                    match lister::locate(&mut client, &mailbox, &target).await? {
                        Some(found) => {
                            client
                                .delete_messages(&mailbox, &SequenceSet::single(found.seq))
                                .await
                        }
                        None => Err(Error::ObjectNotFound(remote)),
                    }
                }
                .await;
                client.logout().await;
                result
            })
            .await
    }

    /// Messages are immutable.
    pub async fn update(&self, _content: Content, _src: &dyn ObjectInfo) -> Result<()> {
        Err(Error::Unsupported("updating a message in place"))
    }

    /// IMAP cannot change a message's date; this is accepted and ignored.
    pub async fn set_mod_time(&self, when: DateTime<Utc>) -> Result<()> {
        debug!("ignoring set modification time {} on {}", when, self.remote);
        Ok(())
    }

    async fn locate(&self) -> Result<FoundMessage> {
        let mailbox = self.descriptor.mailbox();
        let found = self
            .shared
            .bounded(async {
                let mut client = self.shared.connect().await?;
                let result = lister::locate(&mut client, mailbox, &self.descriptor).await;
                client.logout().await;
                result
            })
            .await?;
        found.ok_or_else(|| Error::ObjectNotFound(self.remote.clone()))
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("remote", &self.remote)
            .field("seq", &self.seq)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.remote)
    }
}

#[async_trait]
impl ObjectInfo for Object {
    fn remote(&self) -> String {
        self.remote.clone()
    }

    fn mod_time(&self) -> DateTime<Utc> {
        Object::mod_time(self)
    }

    fn size(&self) -> i64 {
        Object::size(self)
    }

    async fn hash(&self, t: HashType) -> Result<Option<String>> {
        Object::hash(self, t).await.map(Some)
    }

    async fn open(&self) -> Result<Content> {
        let content = Object::open(self).await?;
        Ok(Box::new(content))
    }
}
