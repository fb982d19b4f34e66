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

//! Async IMAP client session over any byte stream: tagged commands, logical
//! response reading with literals, and the commands the file store needs.

use std::collections::HashSet;
use std::io;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::response::{
    literal_size, parse_exists, parse_fetch, parse_list, parse_search, parse_status_messages,
    quote_string, ImapStatus, Response,
};
use crate::error::{Error, Result};
use crate::message::{imap_flag_list, Flag};
use crate::protocol::{
    imap_date_time, FetchItems, FetchedMessage, ListEntry, SearchCriteria, SequenceSet, Session,
};

/// Outcome of a tagged command: the untagged responses it produced and the
/// tagged completion.
struct Completion {
    untagged: Vec<Response>,
    done: Response,
}

impl Completion {
    fn is_ok(&self) -> bool {
        self.done.status() == Some(ImapStatus::Ok)
    }

    /// Fail with `context` unless the command completed OK.
    fn ok(self, context: &str) -> Result<Vec<Response>> {
        if self.is_ok() {
            Ok(self.untagged)
        } else {
            Err(Error::protocol(context, self.done.text()))
        }
    }
}

/// One IMAP connection.
pub struct ImapSession<S> {
    stream: BufReader<S>,
    tag: u32,
}

impl<S> ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self::resume(stream, 0)
    }

    /// Continue a session on a new transport (after STARTTLS), keeping the tag sequence.
    pub fn resume(stream: S, tag: u32) -> Self {
        Self {
            stream: BufReader::new(stream),
            tag,
        }
    }

    /// Give back the transport and the last tag used. The read buffer must be
    /// empty, which holds after a completed command with nothing pipelined.
    pub fn into_inner(self) -> (S, u32) {
        (self.stream.into_inner(), self.tag)
    }

    fn next_tag(&mut self) -> String {
        self.tag = self.tag % 9999 + 1;
        format!("A{:04}", self.tag)
    }

    /// Read one logical response, following literals into the next line.
    async fn read_response(&mut self) -> io::Result<Response> {
        let mut raw = Vec::new();
        loop {
            let start = raw.len();
            let n = self.stream.read_until(b'\n', &mut raw).await?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
            }
            match literal_size(&raw[start..]) {
                Some(len) => {
                    let at = raw.len();
                    raw.resize(at + len, 0);
                    self.stream.read_exact(&mut raw[at..]).await?;
                }
                None => break,
            }
        }
        if raw.ends_with(b"\r\n") {
            raw.truncate(raw.len() - 2);
        } else if raw.ends_with(b"\n") {
            raw.truncate(raw.len() - 1);
        }
        Ok(Response::new(raw))
    }

    async fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        let w = self.stream.get_mut();
        w.write_all(line).await?;
        w.write_all(b"\r\n").await?;
        w.flush().await
    }

    async fn send(&mut self, context: &str, tag: &str, command: &str) -> Result<()> {
        if command.starts_with("LOGIN ") {
            trace!("> {} LOGIN ***", tag);
        } else {
            trace!("> {} {}", tag, command);
        }
        self.write_line(format!("{} {}", tag, command).as_bytes())
            .await
            .map_err(|e| Error::protocol(context, e.to_string()))
    }

    async fn receive(&mut self, context: &str) -> Result<Response> {
        let r = self
            .read_response()
            .await
            .map_err(|e| Error::protocol(context, e.to_string()))?;
        trace!("< {}", r.line());
        Ok(r)
    }

    /// Read until the tagged completion for `tag`.
    async fn complete(&mut self, context: &str, tag: &str) -> Result<Completion> {
        let mut untagged = Vec::new();
        loop {
            let r = self.receive(context).await?;
            if r.is_tagged(tag) {
                return Ok(Completion { untagged, done: r });
            }
            untagged.push(r);
        }
    }

    async fn command(&mut self, context: &str, command: &str) -> Result<Completion> {
        let tag = self.next_tag();
        self.send(context, &tag, command).await?;
        self.complete(context, &tag).await
    }

    /// Server greeting: `* OK` or `* PREAUTH`.
    pub async fn read_greeting(&mut self) -> Result<()> {
        let r = self.receive("read greeting").await?;
        match (r.is_untagged(), r.status()) {
            (true, Some(ImapStatus::Ok)) | (true, Some(ImapStatus::PreAuth)) => {
                debug!("greeting: {}", r.line());
                Ok(())
            }
            _ => Err(Error::protocol("read greeting", r.line())),
        }
    }

    /// STARTTLS; on success the caller performs the handshake on the inner stream.
    pub async fn starttls(&mut self) -> Result<()> {
        self.command("start TLS", "STARTTLS").await?.ok("start TLS")?;
        Ok(())
    }

    /// SELECT/EXAMINE, mapping a tagged NO to not-found.
    async fn open_mailbox(&mut self, mailbox: &str, read_only: bool) -> Result<u32> {
        let verb = if read_only { "EXAMINE" } else { "SELECT" };
        let context = format!("select mailbox {}", mailbox);
        let done = self
            .command(&context, &format!("{} {}", verb, quote_string(mailbox)))
            .await?;
        match done.done.status() {
            Some(ImapStatus::Ok) => {}
            Some(ImapStatus::No) => return Err(Error::DirNotFound(mailbox.to_string())),
            _ => return Err(Error::protocol(context, done.done.line())),
        }
        Ok(done.untagged.iter().filter_map(parse_exists).last().unwrap_or(0))
    }

    async fn fetch_into(
        &mut self,
        set: &SequenceSet,
        items: FetchItems,
        tx: mpsc::Sender<FetchedMessage>,
    ) -> Result<()> {
        let context = "fetch messages";
        let tag = self.next_tag();
        self.send(context, &tag, &format!("FETCH {} {}", set, items.imap_items()))
            .await?;
        let mut receiver_gone = false;
        loop {
            let r = self.receive(context).await?;
            if r.is_tagged(&tag) {
                return match r.status() {
                    Some(ImapStatus::Ok) => Ok(()),
                    _ => Err(Error::protocol(context, r.line())),
                };
            }
            if !r.is_untagged() || receiver_gone {
                continue;
            }
            match parse_fetch(&r) {
                Some(msg) => {
                    if tx.send(msg).await.is_err() {
                        receiver_gone = true;
                    }
                }
                None if r.line().to_ascii_uppercase().contains(" FETCH ") => {
                    warn!("unparseable FETCH response: {}", r.line());
                }
                None => {}
            }
        }
    }

    async fn append_literal(
        &mut self,
        mailbox: &str,
        flags: &HashSet<Flag>,
        date: DateTime<Utc>,
        data: &[u8],
    ) -> Result<()> {
        let context = format!("append to {}", mailbox);
        let tag = self.next_tag();
        let command = format!(
            "APPEND {} {} \"{}\" {{{}}}",
            quote_string(mailbox),
            imap_flag_list(flags),
            imap_date_time(date),
            data.len()
        );
        self.send(&context, &tag, &command).await?;
        loop {
            let r = self.receive(&context).await?;
            if r.is_continuation() {
                break;
            }
            if r.is_tagged(&tag) {
                return Err(Error::protocol(context, r.line()));
            }
        }
        let w = self.stream.get_mut();
        let written = async {
            w.write_all(data).await?;
            w.write_all(b"\r\n").await?;
            w.flush().await
        }
        .await;
        written.map_err(|e| Error::protocol(&context, e.to_string()))?;
        self.complete(&context, &tag).await?.ok(&context)?;
        Ok(())
    }
}

#[async_trait]
impl<S> Session for ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn login(&mut self, user: &str, pass: &str) -> Result<()> {
        let cmd = format!("LOGIN {} {}", quote_string(user), quote_string(pass));
        self.command("login", &cmd).await?.ok("login")?;
        Ok(())
    }

    async fn list(&mut self) -> Result<Vec<ListEntry>> {
        let untagged = self
            .command("list mailboxes", r#"LIST "" "*""#)
            .await?
            .ok("list mailboxes")?;
        Ok(untagged.iter().filter_map(parse_list).collect())
    }

    async fn status_messages(&mut self, mailbox: &str) -> Result<u32> {
        let context = format!("get message count for mailbox {}", mailbox);
        let done = self
            .command(&context, &format!("STATUS {} (MESSAGES)", quote_string(mailbox)))
            .await?;
        match done.done.status() {
            Some(ImapStatus::Ok) => {}
            Some(ImapStatus::No) => return Err(Error::DirNotFound(mailbox.to_string())),
            _ => return Err(Error::protocol(context, done.done.line())),
        }
        done.untagged
            .iter()
            .find_map(parse_status_messages)
            .ok_or_else(|| Error::protocol(context, "no MESSAGES in STATUS response"))
    }

    async fn select(&mut self, mailbox: &str, read_only: bool) -> Result<u32> {
        self.open_mailbox(mailbox, read_only).await
    }

    async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>> {
        let untagged = self
            .command("search messages", &format!("SEARCH {}", criteria.to_imap()))
            .await?
            .ok("search messages")?;
        Ok(untagged.iter().filter_map(parse_search).flatten().collect())
    }

    async fn fetch(
        &mut self,
        set: &SequenceSet,
        items: FetchItems,
        tx: mpsc::Sender<FetchedMessage>,
    ) -> Result<()> {
        self.fetch_into(set, items, tx).await
    }

    async fn append(
        &mut self,
        mailbox: &str,
        flags: &HashSet<Flag>,
        date: DateTime<Utc>,
        data: &[u8],
    ) -> Result<()> {
        self.append_literal(mailbox, flags, date, data).await
    }

    async fn store_flags(&mut self, set: &SequenceSet, flags: &HashSet<Flag>) -> Result<()> {
        let cmd = format!("STORE {} +FLAGS.SILENT {}", set, imap_flag_list(flags));
        self.command("store flags", &cmd).await?.ok("store flags")?;
        Ok(())
    }

    async fn expunge(&mut self) -> Result<()> {
        self.command("expunge", "EXPUNGE").await?.ok("expunge")?;
        Ok(())
    }

    async fn create(&mut self, mailbox: &str) -> Result<()> {
        let context = format!("create mailbox {}", mailbox);
        self.command(&context, &format!("CREATE {}", quote_string(mailbox)))
            .await?
            .ok(&context)?;
        Ok(())
    }

    async fn delete(&mut self, mailbox: &str) -> Result<()> {
        let context = format!("delete mailbox {}", mailbox);
        self.command(&context, &format!("DELETE {}", quote_string(mailbox)))
            .await?
            .ok(&context)?;
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let context = format!("rename mailbox {}", from);
        let cmd = format!("RENAME {} {}", quote_string(from), quote_string(to));
        self.command(&context, &cmd).await?.ok(&context)?;
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        // The server may close the connection right after BYE.
        match self.command("logout", "LOGOUT").await {
            Ok(_) => {}
            Err(e) => debug!("logout: {}", e),
        }
        let _ = self.stream.get_mut().shutdown().await;
        Ok(())
    }
}
