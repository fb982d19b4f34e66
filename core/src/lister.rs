/*
 * lister.rs
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

//! Directory listing and message lookup by fingerprint.
//!
//! Listing resolves the path first, then asks the connection for child
//! mailboxes and, below the root, for messages. A path ending in a canonical
//! name narrows the listing to messages with that fingerprint.

use tracing::{debug, warn};

use crate::client::MailClient;
use crate::error::{Error, Result};
use crate::message::MessageDescriptor;
use crate::protocol::{FetchItems, SearchCriteria, SequenceSet};
use crate::resolver::{join_path, resolve};

/// A message found on the server in the current session.
#[derive(Debug, Clone)]
pub struct FoundMessage {
    /// Sequence number, valid only inside the session that found it.
    pub seq: u32,
    pub descriptor: MessageDescriptor,
    pub body: Option<Vec<u8>>,
}

/// One listed entry. Paths are relative to the filesystem root.
#[derive(Debug, Clone)]
pub enum Entry {
    Mailbox { remote: String },
    Message { dir: String, found: FoundMessage },
}

/// Entries under `dir` of a filesystem rooted at `root`.
pub async fn list(client: &mut MailClient, root: &str, dir: &str) -> Result<Vec<Entry>> {
    let resolved = resolve(root, dir);
    let mailbox = resolved.mailbox.as_str();
    let file = resolved.file.as_deref();
    // Entry paths are relative to the root; the file candidate is not part of them.
    let rel = join_path("", dir);
    let rel_dir = match file {
        Some(_) => rel.rsplit_once('/').map(|(p, _)| p.to_string()).unwrap_or_default(),
        None => rel,
    };

    if resolved.is_root() && file.is_some() {
        return Ok(Vec::new());
    }
    if !resolved.is_root() && !client.has_mailbox(mailbox) {
        return Err(Error::DirNotFound(mailbox.to_string()));
    }
    let target = match file {
        Some(name) => match MessageDescriptor::parse_name(mailbox, name) {
            Ok(d) => Some(d),
            Err(Error::InvalidName(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        },
        None => None,
    };
    debug!("list {:?} in mailbox {:?} matching {:?}", dir, mailbox, file);

    let mut entries: Vec<Entry> = client
        .list_mailboxes(mailbox)?
        .into_iter()
        .filter(|name| file.map_or(true, |f| f == name))
        .map(|name| Entry::Mailbox {
            remote: join_path(&rel_dir, &name),
        })
        .collect();
    // Hierarchy-only mailboxes hold no messages; STATUS on them fails.
    if resolved.is_root() || !client.is_selectable(mailbox) {
        return Ok(entries);
    }

    let count = client.message_count(mailbox).await?;
    if count == 0 {
        return Ok(entries);
    }
    let set = match &target {
        Some(t) => candidates(client, mailbox, t).await?,
        None => SequenceSet::range(1, count),
    };
    if set.is_empty() {
        return Ok(entries);
    }
    let found = fetch_descriptors(client, mailbox, &set, false).await?;
    entries.extend(
        found
            .into_iter()
            .filter(|m| file.map_or(true, |f| m.descriptor.matches_name(f)))
            .map(|found| Entry::Message {
                dir: rel_dir.clone(),
                found,
            }),
    );
    Ok(entries)
}

/// The first message in `mailbox` with the same fingerprint as `target`,
/// with its body.
pub async fn locate(
    client: &mut MailClient,
    mailbox: &str,
    target: &MessageDescriptor,
) -> Result<Option<FoundMessage>> {
    let set = candidates(client, mailbox, target).await?;
    if set.is_empty() {
        return Ok(None);
    }
    let found = fetch_descriptors(client, mailbox, &set, true).await?;
    Ok(found.into_iter().find(|m| m.descriptor == *target))
}

/// Sequence numbers that may hold `target`: the search window, narrowed by a
/// metadata fetch to exact date and size.
async fn candidates(
    client: &mut MailClient,
    mailbox: &str,
    target: &MessageDescriptor,
) -> Result<SequenceSet> {
    let criteria = SearchCriteria::around(target.date(), target.size());
    let hits = client.search(mailbox, &criteria).await?;
    if hits.is_empty() {
        return Ok(SequenceSet::default());
    }
    let mut exact = Vec::new();
    client
        .fetch(mailbox, &SequenceSet::from_numbers(hits), FetchItems::Metadata, |m| {
            if m.internal_date.timestamp() == target.date().timestamp()
                && m.size as i64 == target.size()
            {
                exact.push(m.seq);
            }
        })
        .await?;
    Ok(SequenceSet::from_numbers(exact))
}

async fn fetch_descriptors(
    client: &mut MailClient,
    mailbox: &str,
    set: &SequenceSet,
    keep_body: bool,
) -> Result<Vec<FoundMessage>> {
    let mut found = Vec::new();
    client
        .fetch(mailbox, set, FetchItems::Full, |msg| {
            match MessageDescriptor::from_fetched(mailbox, &msg) {
                Ok(descriptor) => found.push(FoundMessage {
                    seq: msg.seq,
                    descriptor,
                    body: if keep_body { msg.body } else { None },
                }),
                Err(e) => warn!("skipping message {} in {}: {}", msg.seq, mailbox, e),
            }
        })
        .await?;
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Flag;
    use crate::protocol::memory::MemoryServer;
    use chrono::{DateTime, TimeZone, Utc};

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    const HELLO: &str = "1704067200.R5d41402abc4b2a76b9719d911017c592.imap.rclone.org,S=5-2,";

    async fn client(server: &MemoryServer) -> MailClient {
        MailClient::connect(&server.connector(), "u", "p").await.unwrap()
    }

    fn remotes(entries: &[Entry]) -> Vec<String> {
        let mut v: Vec<String> = entries
            .iter()
            .map(|e| match e {
                Entry::Mailbox { remote } => format!("{}/", remote),
                Entry::Message { dir, found } => join_path(dir, &found.descriptor.name()),
            })
            .collect();
        v.sort();
        v
    }

    #[tokio::test]
    async fn root_lists_only_mailboxes() {
        let server = MemoryServer::new();
        server.add_mailbox("Work");
        server.add_mailbox("Work/2023");
        server.add_message("INBOX", date(), &[], b"hello");
        let mut c = client(&server).await;
        let entries = list(&mut c, "", "").await.unwrap();
        assert_eq!(remotes(&entries), vec!["INBOX/", "Work/"]);
        assert!(server.commands_named("STATUS").is_empty());
        assert!(server.commands_named("FETCH").is_empty());
    }

    #[tokio::test]
    async fn mailbox_lists_children_and_messages() {
        let server = MemoryServer::new();
        server.add_mailbox("INBOX/Sub");
        server.add_message("INBOX", date(), &[Flag::Seen], b"hello");
        let mut c = client(&server).await;
        let entries = list(&mut c, "", "INBOX").await.unwrap();
        assert_eq!(
            remotes(&entries),
            vec![format!("INBOX/{}S", HELLO), "INBOX/Sub/".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_mailbox_skips_fetch() {
        let server = MemoryServer::new();
        server.add_mailbox("Empty");
        server.add_mailbox("Empty/Child");
        let mut c = client(&server).await;
        let entries = list(&mut c, "", "Empty").await.unwrap();
        assert_eq!(remotes(&entries), vec!["Empty/Child/"]);
        assert!(server.commands_named("FETCH").is_empty());
    }

    #[tokio::test]
    async fn noselect_mailbox_lists_children_only() {
        let server = MemoryServer::new();
        server.add_noselect_mailbox("Public");
        server.add_mailbox("Public/Lists");
        let mut c = client(&server).await;
        assert_eq!(remotes(&list(&mut c, "", "").await.unwrap()), vec!["INBOX/", "Public/"]);
        let entries = list(&mut c, "", "Public").await.unwrap();
        assert_eq!(remotes(&entries), vec!["Public/Lists/"]);
        assert!(list(&mut c, "Public", HELLO).await.unwrap().is_empty());
        assert!(server.commands_named("STATUS").is_empty());
        assert!(server.commands_named("FETCH").is_empty());
    }

    #[tokio::test]
    async fn missing_mailbox_is_dir_not_found() {
        let server = MemoryServer::new();
        let mut c = client(&server).await;
        assert!(matches!(
            list(&mut c, "", "Nope").await,
            Err(Error::DirNotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_candidate_narrows_to_fingerprint() {
        let server = MemoryServer::new();
        server.add_message("INBOX", date(), &[], b"hello");
        server.add_message("INBOX", date(), &[], b"world");
        server.add_message("INBOX", date() + chrono::Duration::seconds(1), &[], b"hello");
        let mut c = client(&server).await;
        let entries = list(&mut c, "INBOX", HELLO).await.unwrap();
        assert_eq!(remotes(&entries), vec![HELLO.to_string()]);
        // Metadata narrowing leaves only the exact-date candidates for the body fetch.
        let fetches = server.commands_named("FETCH");
        assert_eq!(fetches.len(), 2);
        assert!(fetches[1].starts_with("FETCH 1:2 "));
    }

    #[tokio::test]
    async fn unparseable_candidate_lists_nothing() {
        let server = MemoryServer::new();
        server.add_message("INBOX", date(), &[], b"hello");
        let mut c = client(&server).await;
        let bogus = "99999999999999999999.Rabc.imap.rclone.org,S=5-2,";
        assert!(list(&mut c, "INBOX", bogus).await.unwrap().is_empty());
        assert!(list(&mut c, "", HELLO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn locate_keeps_body() {
        let server = MemoryServer::new();
        server.add_message("INBOX", date(), &[], b"world");
        server.add_message("INBOX", date(), &[Flag::Flagged], b"hello");
        let mut c = client(&server).await;
        let target = MessageDescriptor::parse_name("INBOX", HELLO).unwrap();
        let found = locate(&mut c, "INBOX", &target).await.unwrap().unwrap();
        assert_eq!(found.seq, 2);
        assert_eq!(found.body.as_deref(), Some(&b"hello"[..]));
        assert!(found.descriptor.has_flag(Flag::Flagged));

        let other = MessageDescriptor::parse_name(
            "INBOX",
            "1704067200.R00000000000000000000000000000000.imap.rclone.org,S=5-2,",
        )
        .unwrap();
        assert!(locate(&mut c, "INBOX", &other).await.unwrap().is_none());
    }
}
