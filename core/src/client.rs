/*
 * client.rs
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

//! Per-operation IMAP connection: login to logout.
//!
//! A `MailClient` owns one session and the mailbox list fetched at login.
//! Paths are slash-separated directories; they are translated to and from
//! the server's hierarchy delimiter here and nowhere else.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::Flag;
use crate::protocol::{Connector, FetchItems, FetchedMessage, SearchCriteria, SequenceSet, Session};

/// Messages buffered between the wire reader and the fetch callback.
const FETCH_BUFFER: usize = 10;

/// Connection lifecycle. `LoggedOut` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unconnected,
    Authenticating,
    Connected,
    LoggedOut,
}

pub struct MailClient {
    state: ClientState,
    session: Option<Box<dyn Session>>,
    delimiter: char,
    /// Every mailbox on the server, as slash-separated paths.
    mailboxes: Vec<String>,
    /// Listed mailboxes that cannot be selected (`\Noselect`), e.g. `[Gmail]`.
    unselectable: HashSet<String>,
}

impl Default for MailClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MailClient {
    pub fn new() -> Self {
        Self {
            state: ClientState::Unconnected,
            session: None,
            delimiter: '/',
            mailboxes: Vec::new(),
            unselectable: HashSet::new(),
        }
    }

    /// Connect, log in and load the mailbox list. On any failure the client
    /// is logged out before the error is returned.
    pub async fn connect(connector: &dyn Connector, user: &str, pass: &str) -> Result<Self> {
        let mut client = Self::new();
        client.open(connector).await?;
        client.login(user, pass).await?;
        Ok(client)
    }

    /// Dial the server. Moves to `Authenticating`, or `LoggedOut` on failure.
    pub async fn open(&mut self, connector: &dyn Connector) -> Result<()> {
        if self.state != ClientState::Unconnected {
            return Err(Error::protocol(
                "open connection",
                format!("client is already {:?}", self.state),
            ));
        }
        match connector.connect().await {
            Ok(session) => {
                self.session = Some(session);
                self.state = ClientState::Authenticating;
                Ok(())
            }
            Err(e) => {
                self.state = ClientState::LoggedOut;
                Err(e)
            }
        }
    }

    pub async fn login(&mut self, user: &str, pass: &str) -> Result<()> {
        let session = match (self.state, self.session.as_mut()) {
            (ClientState::Authenticating, Some(s)) => s,
            _ => return Err(Error::NotConnected("login")),
        };
        if let Err(e) = session.login(user, pass).await {
            self.logout().await;
            return Err(e);
        }
        self.state = ClientState::Connected;
        if let Err(e) = self.refresh_mailboxes().await {
            self.logout().await;
            return Err(e);
        }
        Ok(())
    }

    /// End the session. Safe to call in any state; errors are only logged.
    pub async fn logout(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.logout().await {
                debug!("logout failed: {}", e);
            }
        }
        self.state = ClientState::LoggedOut;
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    fn session(&mut self, context: &'static str) -> Result<&mut Box<dyn Session>> {
        match (self.state, self.session.as_mut()) {
            (ClientState::Connected, Some(s)) => Ok(s),
            _ => Err(Error::NotConnected(context)),
        }
    }

    fn connected(&self, context: &'static str) -> Result<()> {
        match self.state {
            ClientState::Connected => Ok(()),
            _ => Err(Error::NotConnected(context)),
        }
    }

    /// Server mailbox name for a directory path.
    pub fn dir_to_mailbox(&self, dir: &str) -> String {
        let mut delim = [0u8; 4];
        dir.trim_matches('/')
            .replace('/', self.delimiter.encode_utf8(&mut delim))
    }

    /// Directory path for a server mailbox name.
    pub fn mailbox_to_dir(&self, mailbox: &str) -> String {
        mailbox.replace(self.delimiter, "/")
    }

    /// Reload the mailbox list and hierarchy delimiter.
    pub async fn refresh_mailboxes(&mut self) -> Result<()> {
        let entries = self.session("get mailboxes")?.list().await?;
        if let Some(d) = entries.iter().find_map(|e| e.delimiter) {
            self.delimiter = d;
        }
        self.mailboxes = entries
            .iter()
            .map(|e| self.mailbox_to_dir(&e.name))
            .collect();
        self.unselectable = entries
            .iter()
            .filter(|e| !e.is_selectable())
            .map(|e| self.mailbox_to_dir(&e.name))
            .collect();
        debug!("{} mailboxes, delimiter {:?}", self.mailboxes.len(), self.delimiter);
        Ok(())
    }

    /// Names of the immediate child mailboxes of `under` ("" is the root).
    pub fn list_mailboxes(&self, under: &str) -> Result<Vec<String>> {
        self.connected("list mailboxes")?;
        let under = under.trim_matches('/');
        Ok(self
            .mailboxes
            .iter()
            .filter_map(|m| child_name(under, m))
            .map(str::to_string)
            .collect())
    }

    /// Exact match against the mailbox list loaded at login.
    pub fn has_mailbox(&self, dir: &str) -> bool {
        let dir = dir.trim_matches('/');
        self.state == ClientState::Connected && self.mailboxes.iter().any(|m| m == dir)
    }

    /// Whether `dir` is listed and can hold messages.
    pub fn is_selectable(&self, dir: &str) -> bool {
        self.has_mailbox(dir) && !self.unselectable.contains(dir.trim_matches('/'))
    }

    pub async fn create_mailbox(&mut self, dir: &str) -> Result<()> {
        let mailbox = self.dir_to_mailbox(dir);
        debug!("create mailbox {}", dir);
        self.session("create mailbox")?.create(&mailbox).await?;
        self.refresh_mailboxes().await
    }

    /// Delete an empty mailbox. A mailbox with messages is refused, never forced.
    pub async fn delete_mailbox(&mut self, dir: &str) -> Result<()> {
        self.connected("delete mailbox")?;
        if dir.trim_matches('/').is_empty() {
            return Err(Error::Unsupported("removing the root mailbox"));
        }
        if self.has_mailbox(dir) && !self.is_selectable(dir) {
            return Err(Error::NotSelectable(dir.trim_matches('/').to_string()));
        }
        let mailbox = self.dir_to_mailbox(dir);
        let session = self.session("delete mailbox")?;
        let messages = match session.select(&mailbox, true).await {
            Ok(n) => n,
            Err(Error::DirNotFound(_)) => return Err(Error::DirNotFound(dir.to_string())),
            Err(e) => return Err(e),
        };
        if messages != 0 {
            return Err(Error::MailboxNotEmpty {
                mailbox: dir.to_string(),
                messages,
            });
        }
        debug!("delete mailbox {}", dir);
        session.delete(&mailbox).await?;
        self.refresh_mailboxes().await
    }

    pub async fn rename_mailbox(&mut self, from: &str, to: &str) -> Result<()> {
        let (src, dst) = (self.dir_to_mailbox(from), self.dir_to_mailbox(to));
        debug!("rename mailbox {} to {}", from, to);
        self.session("rename mailbox")?.rename(&src, &dst).await?;
        self.refresh_mailboxes().await
    }

    /// Message count via STATUS; the root holds no messages.
    pub async fn message_count(&mut self, dir: &str) -> Result<u32> {
        self.connected("get message count")?;
        if dir.trim_matches('/').is_empty() {
            return Ok(0);
        }
        let mailbox = self.dir_to_mailbox(dir);
        match self.session("get message count")?.status_messages(&mailbox).await {
            Err(Error::DirNotFound(_)) => Err(Error::DirNotFound(dir.to_string())),
            other => other,
        }
    }

    /// Select `dir`, returning its message count.
    async fn select(&mut self, context: &'static str, dir: &str, read_only: bool) -> Result<u32> {
        let mailbox = self.dir_to_mailbox(dir);
        match self.session(context)?.select(&mailbox, read_only).await {
            Err(Error::DirNotFound(_)) => Err(Error::DirNotFound(dir.to_string())),
            other => other,
        }
    }

    pub async fn search(&mut self, dir: &str, criteria: &SearchCriteria) -> Result<Vec<u32>> {
        if self.select("search messages", dir, true).await? == 0 {
            return Ok(Vec::new());
        }
        let ids = self.session("search messages")?.search(criteria).await?;
        debug!("search {} [{}]: {} hits", dir, criteria.to_imap(), ids.len());
        Ok(ids)
    }

    /// Fetch `set` from `dir`, handing each message to `on_message` as it
    /// arrives. Completes once the server has finished the command and every
    /// delivered message has been handled.
    pub async fn fetch<F>(
        &mut self,
        dir: &str,
        set: &SequenceSet,
        items: FetchItems,
        mut on_message: F,
    ) -> Result<()>
    where
        F: FnMut(FetchedMessage),
    {
        if self.select("fetch messages", dir, true).await? == 0 || set.is_empty() {
            return Ok(());
        }
        debug!("fetch {} from {}", set, dir);
        let session = self.session("fetch messages")?;
        let (tx, mut rx) = mpsc::channel(FETCH_BUFFER);
        let reader = session.fetch(set, items, tx);
        let consumer = async {
            while let Some(msg) = rx.recv().await {
                on_message(msg);
            }
        };
        let (result, ()) = tokio::join!(reader, consumer);
        result
    }

    /// Upload a message. No duplicate check happens here.
    pub async fn append(
        &mut self,
        dir: &str,
        date: DateTime<Utc>,
        data: &[u8],
        flags: &HashSet<Flag>,
    ) -> Result<()> {
        let mailbox = self.dir_to_mailbox(dir);
        debug!("append {} bytes to {}", data.len(), dir);
        self.session("append message")?
            .append(&mailbox, flags, date, data)
            .await
    }

    pub async fn set_flags(&mut self, dir: &str, set: &SequenceSet, flags: &HashSet<Flag>) -> Result<()> {
        self.select("set flags", dir, false).await?;
        debug!("flag {} in {}", set, dir);
        self.session("set flags")?.store_flags(set, flags).await
    }

    pub async fn expunge(&mut self, dir: &str) -> Result<()> {
        self.select("expunge", dir, false).await?;
        debug!("expunge {}", dir);
        self.session("expunge")?.expunge().await
    }

    /// Flag `set` deleted, then expunge.
    pub async fn delete_messages(&mut self, dir: &str, set: &SequenceSet) -> Result<()> {
        let deleted: HashSet<Flag> = [Flag::Deleted].into_iter().collect();
        self.set_flags(dir, set, &deleted).await?;
        self.session("expunge")?.expunge().await
    }
}

/// `candidate` relative to `under` if it is an immediate child.
fn child_name<'a>(under: &str, candidate: &'a str) -> Option<&'a str> {
    let rest = if under.is_empty() {
        candidate
    } else {
        candidate.strip_prefix(under)?.strip_prefix('/')?
    };
    (!rest.is_empty() && !rest.contains('/')).then_some(rest)
}
