/*
 * memory.rs
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

//! In-process mailbox server implementing the `Session` contract.
//!
//! Sequence numbers renumber on expunge, SEARCH uses day granularity for
//! dates and strict size comparisons, and every command is recorded so tests
//! can assert on the round trips an operation made.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::{Connector, FetchItems, FetchedMessage, ListEntry, SearchCriteria, SequenceSet, Session};
use crate::error::{Error, Result};
use crate::message::{imap_flag_list, Flag};

/// A message held by the server.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub internal_date: DateTime<Utc>,
    pub flags: HashSet<Flag>,
    pub body: Vec<u8>,
}

impl StoredMessage {
    pub fn size(&self) -> u32 {
        self.body.len() as u32
    }
}

struct ServerState {
    delimiter: char,
    mailboxes: BTreeMap<String, Vec<StoredMessage>>,
    /// Hierarchy-only names, listed with `\Noselect`.
    noselect: BTreeSet<String>,
    commands: Vec<String>,
    credentials: Option<(String, String)>,
    mark_seen_on_append: bool,
}

/// Shared mailbox tree. Clones refer to the same server.
#[derive(Clone)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServer {
    /// Server with an empty INBOX and `/` as hierarchy delimiter, accepting any login.
    pub fn new() -> Self {
        Self::with_delimiter('/')
    }

    pub fn with_delimiter(delimiter: char) -> Self {
        let mut mailboxes = BTreeMap::new();
        mailboxes.insert("INBOX".to_string(), Vec::new());
        Self {
            state: Arc::new(Mutex::new(ServerState {
                delimiter,
                mailboxes,
                noselect: BTreeSet::new(),
                commands: Vec::new(),
                credentials: None,
                mark_seen_on_append: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn delimiter(&self) -> char {
        self.lock().delimiter
    }

    /// Only accept LOGIN with these credentials.
    pub fn require_login(&self, user: &str, pass: &str) {
        self.lock().credentials = Some((user.to_string(), pass.to_string()));
    }

    /// Mark appended messages `\Seen`, as some servers do.
    pub fn mark_seen_on_append(&self, on: bool) {
        self.lock().mark_seen_on_append = on;
    }

    /// Create a mailbox by server name; existing mailboxes are left alone.
    pub fn add_mailbox(&self, name: &str) {
        self.lock().mailboxes.entry(name.to_string()).or_default();
    }

    /// List `name` as `\Noselect`. It cannot be selected, examined or
    /// counted, like a Gmail `[Gmail]` folder.
    pub fn add_noselect_mailbox(&self, name: &str) {
        self.lock().noselect.insert(name.to_string());
    }

    /// Append a message directly, bypassing the command log. Returns its sequence number.
    pub fn add_message(&self, mailbox: &str, internal_date: DateTime<Utc>, flags: &[Flag], body: &[u8]) -> u32 {
        let mut state = self.lock();
        let messages = state.mailboxes.entry(mailbox.to_string()).or_default();
        messages.push(StoredMessage {
            internal_date,
            flags: flags.iter().copied().collect(),
            body: body.to_vec(),
        });
        messages.len() as u32
    }

    pub fn mailboxes(&self) -> Vec<String> {
        self.lock().mailboxes.keys().cloned().collect()
    }

    pub fn has_mailbox(&self, name: &str) -> bool {
        self.lock().mailboxes.contains_key(name)
    }

    pub fn messages(&self, mailbox: &str) -> Vec<StoredMessage> {
        self.lock()
            .mailboxes
            .get(mailbox)
            .cloned()
            .unwrap_or_default()
    }

    /// Commands received so far, e.g. `SELECT INBOX`, `CREATE Work`.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Commands whose verb is `verb`.
    pub fn commands_named(&self, verb: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.split(' ').next() == Some(verb))
            .collect()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            server: self.clone(),
        }
    }
}

/// Opens sessions on a `MemoryServer`.
#[derive(Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
}

impl MemoryConnector {
    pub fn server(&self) -> &MemoryServer {
        &self.server
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Session>> {
        self.server.lock().commands.push("CONNECT".to_string());
        Ok(Box::new(MemorySession {
            server: self.server.clone(),
            authenticated: false,
            closed: false,
            selected: None,
        }))
    }
}

struct Selected {
    mailbox: String,
    read_only: bool,
}

struct MemorySession {
    server: MemoryServer,
    authenticated: bool,
    closed: bool,
    selected: Option<Selected>,
}

impl MemorySession {
    /// Record `command` and check the session may run it.
    fn begin(&self, command: String) -> Result<MutexGuard<'_, ServerState>> {
        let context = command.clone();
        let mut state = self.server.lock();
        state.commands.push(command);
        if self.closed {
            return Err(Error::protocol(context, "connection closed"));
        }
        if !self.authenticated {
            return Err(Error::protocol(context, "BAD not authenticated"));
        }
        Ok(state)
    }

    fn selected(&self, context: &str, write: bool) -> Result<&Selected> {
        match &self.selected {
            None => Err(Error::protocol(context, "BAD no mailbox selected")),
            Some(s) if write && s.read_only => Err(Error::protocol(context, "NO mailbox is read-only")),
            Some(s) => Ok(s),
        }
    }
}

fn messages_mut<'a>(state: &'a mut ServerState, mailbox: &str, context: &str) -> Result<&'a mut Vec<StoredMessage>> {
    state
        .mailboxes
        .get_mut(mailbox)
        .ok_or_else(|| Error::protocol(context, "NO mailbox no longer exists"))
}

#[async_trait]
impl Session for MemorySession {
    async fn login(&mut self, user: &str, pass: &str) -> Result<()> {
        let mut state = self.server.lock();
        state.commands.push(format!("LOGIN {}", user));
        if self.closed {
            return Err(Error::protocol("login", "connection closed"));
        }
        if let Some((u, p)) = &state.credentials {
            if u != user || p != pass {
                return Err(Error::protocol("login", "NO [AUTHENTICATIONFAILED] invalid credentials"));
            }
        }
        self.authenticated = true;
        Ok(())
    }

    async fn list(&mut self) -> Result<Vec<ListEntry>> {
        let state = self.begin("LIST".to_string())?;
        let delimiter = Some(state.delimiter);
        let selectable = state.mailboxes.keys().map(|name| ListEntry {
            attributes: Vec::new(),
            delimiter,
            name: name.clone(),
        });
        let noselect = state.noselect.iter().map(|name| ListEntry {
            attributes: vec!["\\Noselect".to_string()],
            delimiter,
            name: name.clone(),
        });
        let mut entries: Vec<ListEntry> = selectable.chain(noselect).collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn status_messages(&mut self, mailbox: &str) -> Result<u32> {
        let state = self.begin(format!("STATUS {}", mailbox))?;
        state
            .mailboxes
            .get(mailbox)
            .map(|m| m.len() as u32)
            .ok_or_else(|| Error::DirNotFound(mailbox.to_string()))
    }

    async fn select(&mut self, mailbox: &str, read_only: bool) -> Result<u32> {
        let verb = if read_only { "EXAMINE" } else { "SELECT" };
        let count = {
            let state = self.begin(format!("{} {}", verb, mailbox))?;
            state.mailboxes.get(mailbox).map(|m| m.len() as u32)
        };
        match count {
            Some(n) => {
                self.selected = Some(Selected {
                    mailbox: mailbox.to_string(),
                    read_only,
                });
                Ok(n)
            }
            None => {
                self.selected = None;
                Err(Error::DirNotFound(mailbox.to_string()))
            }
        }
    }

    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>> {
        let command = format!("SEARCH {}", criteria.to_imap());
        let mut state = self.begin(command)?;
        let mailbox = self.selected("search", false)?.mailbox.clone();
        let messages = messages_mut(&mut state, &mailbox, "search")?;
        Ok(messages
            .iter()
            .enumerate()
            .filter(|(_, m)| criteria.matches(m.internal_date, m.size()))
            .map(|(i, _)| i as u32 + 1)
            .collect())
    }

    async fn fetch(
        &mut self,
        set: &SequenceSet,
        items: FetchItems,
        tx: mpsc::Sender<FetchedMessage>,
    ) -> Result<()> {
        let batch = {
            let mut state = self.begin(format!("FETCH {} {}", set, items.imap_items()))?;
            let mailbox = self.selected("fetch", false)?.mailbox.clone();
            let messages = messages_mut(&mut state, &mailbox, "fetch")?;
            set.iter()
                .filter_map(|seq| {
                    messages.get(seq as usize - 1).map(|m| FetchedMessage {
                        seq,
                        internal_date: m.internal_date,
                        size: m.size(),
                        flags: m.flags.clone(),
                        body: (items == FetchItems::Full).then(|| m.body.clone()),
                    })
                })
                .collect::<Vec<_>>()
        };
        for msg in batch {
            if tx.send(msg).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn append(
        &mut self,
        mailbox: &str,
        flags: &HashSet<Flag>,
        date: DateTime<Utc>,
        data: &[u8],
    ) -> Result<()> {
        let mut state = self.begin(format!("APPEND {} {}", mailbox, imap_flag_list(flags)))?;
        let mut flags = flags.clone();
        if state.mark_seen_on_append {
            flags.insert(Flag::Seen);
        }
        let messages = state
            .mailboxes
            .get_mut(mailbox)
            .ok_or_else(|| Error::protocol(format!("append to {}", mailbox), "NO [TRYCREATE] no such mailbox"))?;
        messages.push(StoredMessage {
            internal_date: date,
            flags,
            body: data.to_vec(),
        });
        Ok(())
    }

    async fn store_flags(&mut self, set: &SequenceSet, flags: &HashSet<Flag>) -> Result<()> {
        let mut state = self.begin(format!("STORE {} +FLAGS.SILENT {}", set, imap_flag_list(flags)))?;
        let mailbox = self.selected("store flags", true)?.mailbox.clone();
        let messages = messages_mut(&mut state, &mailbox, "store flags")?;
        for seq in set.iter() {
            if let Some(m) = messages.get_mut(seq as usize - 1) {
                m.flags.extend(flags.iter().copied());
            }
        }
        Ok(())
    }

    async fn expunge(&mut self) -> Result<()> {
        let mut state = self.begin("EXPUNGE".to_string())?;
        let mailbox = self.selected("expunge", true)?.mailbox.clone();
        let messages = messages_mut(&mut state, &mailbox, "expunge")?;
        messages.retain(|m| !m.flags.contains(&Flag::Deleted));
        Ok(())
    }

    async fn create(&mut self, mailbox: &str) -> Result<()> {
        let mut state = self.begin(format!("CREATE {}", mailbox))?;
        if state.mailboxes.contains_key(mailbox) {
            return Err(Error::protocol(
                format!("create mailbox {}", mailbox),
                "NO [ALREADYEXISTS] mailbox already exists",
            ));
        }
        state.mailboxes.insert(mailbox.to_string(), Vec::new());
        Ok(())
    }

    async fn delete(&mut self, mailbox: &str) -> Result<()> {
        let mut state = self.begin(format!("DELETE {}", mailbox))?;
        if state.mailboxes.remove(mailbox).is_none() {
            return Err(Error::protocol(
                format!("delete mailbox {}", mailbox),
                "NO [NONEXISTENT] no such mailbox",
            ));
        }
        drop(state);
        if self.selected.as_ref().is_some_and(|s| s.mailbox == mailbox) {
            self.selected = None;
        }
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let mut state = self.begin(format!("RENAME {} {}", from, to))?;
        let context = format!("rename mailbox {}", from);
        if state.mailboxes.contains_key(to) {
            return Err(Error::protocol(context, "NO [ALREADYEXISTS] target exists"));
        }
        let messages = state
            .mailboxes
            .remove(from)
            .ok_or_else(|| Error::protocol(context.clone(), "NO [NONEXISTENT] no such mailbox"))?;
        state.mailboxes.insert(to.to_string(), messages);
        let prefix = format!("{}{}", from, state.delimiter);
        let children: Vec<String> = state
            .mailboxes
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for child in children {
            if let Some(messages) = state.mailboxes.remove(&child) {
                let renamed = format!("{}{}{}", to, state.delimiter, &child[prefix.len()..]);
                state.mailboxes.insert(renamed, messages);
            }
        }
        if from == "INBOX" {
            state.mailboxes.insert("INBOX".to_string(), Vec::new());
        }
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        self.server.lock().commands.push("LOGOUT".to_string());
        self.closed = true;
        self.authenticated = false;
        self.selected = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    async fn session(server: &MemoryServer) -> Box<dyn Session> {
        let mut s = server.connector().connect().await.unwrap();
        s.login("user", "pass").await.unwrap();
        s
    }

    #[tokio::test]
    async fn expunge_renumbers() {
        let server = MemoryServer::new();
        server.add_message("INBOX", date(), &[], b"one");
        server.add_message("INBOX", date(), &[], b"two");
        server.add_message("INBOX", date(), &[], b"three");
        let mut s = session(&server).await;
        assert_eq!(s.select("INBOX", false).await.unwrap(), 3);
        s.store_flags(&SequenceSet::single(1), &[Flag::Deleted].into_iter().collect())
            .await
            .unwrap();
        s.expunge().await.unwrap();
        let (tx, mut rx) = mpsc::channel(10);
        s.fetch(&SequenceSet::single(1), FetchItems::Full, tx).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.body.as_deref(), Some(&b"two"[..]));
    }

    #[tokio::test]
    async fn read_only_selection_rejects_writes() {
        let server = MemoryServer::new();
        server.add_message("INBOX", date(), &[], b"x");
        let mut s = session(&server).await;
        s.select("INBOX", true).await.unwrap();
        assert!(s.expunge().await.is_err());
        assert_eq!(server.commands_named("EXAMINE"), vec!["EXAMINE INBOX"]);
    }

    #[tokio::test]
    async fn missing_mailbox_is_not_found() {
        let server = MemoryServer::new();
        let mut s = session(&server).await;
        assert!(matches!(s.select("Nope", true).await, Err(Error::DirNotFound(_))));
        assert!(matches!(s.status_messages("Nope").await, Err(Error::DirNotFound(_))));
        assert!(s.delete("Nope").await.is_err());
    }

    #[tokio::test]
    async fn login_can_be_required() {
        let server = MemoryServer::new();
        server.require_login("alice", "secret");
        let mut s = server.connector().connect().await.unwrap();
        assert!(s.login("alice", "wrong").await.is_err());
        assert!(s.list().await.is_err());
        s.login("alice", "secret").await.unwrap();
        assert_eq!(s.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rename_moves_children() {
        let server = MemoryServer::with_delimiter('.');
        server.add_mailbox("Work");
        server.add_mailbox("Work.2023");
        let mut s = session(&server).await;
        s.rename("Work", "Archive").await.unwrap();
        assert_eq!(server.mailboxes(), vec!["Archive", "Archive.2023", "INBOX"]);
    }

    #[tokio::test]
    async fn append_can_mark_seen() {
        let server = MemoryServer::new();
        server.mark_seen_on_append(true);
        let mut s = session(&server).await;
        s.append("INBOX", &HashSet::new(), date(), b"Subject: x\r\n\r\nbody")
            .await
            .unwrap();
        assert!(server.messages("INBOX")[0].flags.contains(&Flag::Seen));
        assert!(s.append("Missing", &HashSet::new(), date(), b"x").await.is_err());
    }

    #[tokio::test]
    async fn closed_session_refuses_commands() {
        let server = MemoryServer::new();
        let mut s = session(&server).await;
        s.logout().await.unwrap();
        assert!(s.list().await.is_err());
    }
}
