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

//! The file store: mailboxes as directories, messages as files.
//!
//! Every operation opens its own connection, logs in, does a bounded number
//! of round trips and logs out. No state outlives an operation except what an
//! `Object` carries (its fingerprint and cached hashes).

mod info;
mod object;

pub use info::{Content, DirEntry, Directory, Features, FsInfo, ObjectInfo, SourceInfo};
pub use object::Object;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::client::MailClient;
use crate::config::{ImapConfig, ImapOptions, SecurityMode};
use crate::error::{Error, Result};
use crate::hash::{HashType, NAMING_HASH};
use crate::lister::{self, Entry};
use crate::message::MessageDescriptor;
use crate::mime::validate_message;
use crate::protocol::imap::ImapConnector;
use crate::protocol::Connector;
use crate::resolver::{base_name, join_path};

/// Content type of every object.
pub const MIME_TYPE: &str = "message/rfc822";

/// Connection settings shared by a store and the objects it hands out.
pub(crate) struct Shared {
    config: ImapConfig,
    connector: Box<dyn Connector>,
}

impl Shared {
    pub(crate) async fn connect(&self) -> Result<MailClient> {
        MailClient::connect(self.connector.as_ref(), &self.config.user, &self.config.pass).await
    }

    /// Run `op` under the configured timeout. On expiry the future, and with
    /// it the connection, is dropped.
    pub(crate) async fn bounded<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, op).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(limit)),
            },
            None => op.await,
        }
    }
}

/// An IMAP account as a file store rooted at a mailbox path.
#[derive(Clone)]
pub struct ImapFs {
    name: String,
    root: String,
    shared: Arc<Shared>,
}

impl ImapFs {
    /// Store talking IMAP to the configured server.
    pub fn new(name: impl Into<String>, root: &str, config: ImapConfig) -> Self {
        let connector = ImapConnector::new(config.clone());
        Self::with_connector(name, root, config, connector)
    }

    /// Store from raw options; see `ImapConfig::from_options`.
    pub fn from_options(
        name: impl Into<String>,
        root: &str,
        opts: &ImapOptions,
        prompt: Option<&dyn Fn(&str) -> String>,
    ) -> Result<Self> {
        let config = ImapConfig::from_options(opts, prompt)?;
        Ok(Self::new(name, root, config))
    }

    /// Store over any connector. `config` supplies credentials and timeout.
    pub fn with_connector<C>(name: impl Into<String>, root: &str, config: ImapConfig, connector: C) -> Self
    where
        C: Connector + 'static,
    {
        Self {
            name: name.into(),
            root: join_path("", root),
            shared: Arc::new(Shared {
                config,
                connector: Box::new(connector),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mailbox path the store is rooted at; "" is the account root.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn config(&self) -> &ImapConfig {
        &self.shared.config
    }

    /// Message dates have whole-second resolution.
    pub fn precision(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Names always embed `NAMING_HASH`; the rest are computed on demand.
    pub fn hashes(&self) -> &'static [HashType] {
        &[HashType::Md5, HashType::Sha1]
    }

    pub fn mime_type(&self) -> &'static str {
        MIME_TYPE
    }

    pub fn features(&self) -> Features {
        Features {
            dir_move: true,
            put_stream: true,
            server_side_copy: false,
            set_mod_time: false,
        }
    }

    /// Entries directly under `dir`.
    pub async fn list(&self, dir: &str) -> Result<Vec<DirEntry>> {
        let entries = self
            .shared
            .bounded(async {
                let mut client = self.shared.connect().await?;
                let result = lister::list(&mut client, &self.root, dir).await;
                client.logout().await;
                result
            })
            .await?;
        Ok(entries
            .into_iter()
            .map(|entry| match entry {
                Entry::Mailbox { remote } => DirEntry::Directory(Directory::new(remote)),
                Entry::Message { dir, found } => {
                    DirEntry::Object(Object::new(self.shared.clone(), &dir, found))
                }
            })
            .collect())
    }

    /// The live message at `remote`. With a hint (the object being copied),
    /// the fingerprint comes from the hint's content instead of the name.
    pub async fn new_object(&self, remote: &str, hint: Option<&dyn ObjectInfo>) -> Result<Object> {
        let (dir, name) = split_remote(remote);
        let mailbox = join_path(&self.root, dir);
        let target = match hint {
            Some(h) => descriptor_from_hint(&mailbox, h).await?,
            None => MessageDescriptor::parse_name(&mailbox, name)?,
        };
        if mailbox.is_empty() {
            return Err(Error::ObjectNotFound(remote.to_string()));
        }
        let found = self
            .shared
            .bounded(async {
                let mut client = self.shared.connect().await?;
                let result = if client.is_selectable(&mailbox) {
                    lister::locate(&mut client, &mailbox, &target).await
                } else {
                    Ok(None)
                };
                client.logout().await;
                result
            })
            .await?
            .ok_or_else(|| Error::ObjectNotFound(remote.to_string()))?;
        let object = Object::new(self.shared.clone(), dir, found);
        Ok(match hint {
            Some(h) => object.renamed(base_name(&h.remote())),
            None => object,
        })
    }

    /// Store `content` as a new message in the mailbox `src.remote()` names.
    pub async fn put<R>(&self, mut content: R, src: &dyn ObjectInfo, hint: Option<&dyn ObjectInfo>) -> Result<Object>
    where
        R: AsyncRead + Unpin + Send,
    {
        let remote = src.remote();
        let (dir, name) = split_remote(&remote);
        let mailbox = join_path(&self.root, dir);
        if mailbox.is_empty() {
            return Err(Error::Unsupported("storing messages outside a mailbox"));
        }
        let mut data = Vec::new();
        content.read_to_end(&mut data).await.map_err(Error::Read)?;
        validate_message(&data)?;

        let claimed = match hint {
            Some(h) => Some(descriptor_from_hint(&mailbox, h).await?),
            None => match MessageDescriptor::parse_name(&mailbox, name) {
                Ok(d) => Some(d),
                Err(Error::InvalidName(_)) => None,
                Err(e) => return Err(e),
            },
        };
        let date = claimed.as_ref().map_or_else(|| src.mod_time(), |d| d.date());
        let stored = MessageDescriptor::from_content(
            &mailbox,
            None,
            date,
            &mut data.as_slice(),
            data.len() as i64,
            Default::default(),
        )
        .await?;
        if let Some(claimed) = &claimed {
            if *claimed != stored {
                return Err(Error::ChecksumMismatch {
                    expected: claimed.canonical_name(false),
                    actual: stored.canonical_name(false),
                });
            }
        }

        debug!("put {} into {} as {}", remote, mailbox, stored.canonical_name(false));
        let found = self
            .shared
            .bounded(async {
                let mut client = self.shared.connect().await?;
                let result = async {
                    if !client.has_mailbox(&mailbox) {
                        client.create_mailbox(&mailbox).await?;
                    }
                    client
                        .append(&mailbox, stored.date(), &data, &Default::default())
                        .await?;
                    lister::locate(&mut client, &mailbox, &stored).await
                }
                .await;
                client.logout().await;
                result
            })
            .await?
            .ok_or_else(|| Error::ObjectNotFound(stored.to_string()))?;
        let object = Object::new(self.shared.clone(), dir, found);
        Ok(match hint {
            Some(h) => object.renamed(base_name(&h.remote())),
            None => object,
        })
    }

    /// As `put`. APPEND needs the length up front, so the stream is buffered.
    pub async fn put_stream<R>(&self, content: R, src: &dyn ObjectInfo, hint: Option<&dyn ObjectInfo>) -> Result<Object>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.put(content, src, hint).await
    }

    /// Create the mailbox for `dir` unless it exists.
    pub async fn mkdir(&self, dir: &str) -> Result<()> {
        let mailbox = join_path(&self.root, dir);
        if mailbox.is_empty() {
            return Ok(());
        }
        self.shared
            .bounded(async {
                let mut client = self.shared.connect().await?;
                let result = if client.has_mailbox(&mailbox) {
                    Ok(())
                } else {
                    client.create_mailbox(&mailbox).await
                };
                client.logout().await;
                result
            })
            .await
    }

    /// Delete the mailbox for `dir` if it exists. It must be empty. Failures
    /// are terminal.
    pub async fn rmdir(&self, dir: &str) -> Result<()> {
        let mailbox = join_path(&self.root, dir);
        if mailbox.is_empty() {
            return Ok(());
        }
        self.shared
            .bounded(async {
                let mut client = self.shared.connect().await?;
                let result = if client.has_mailbox(&mailbox) {
                    client.delete_mailbox(&mailbox).await.map_err(Error::terminal)
                } else {
                    Ok(())
                };
                client.logout().await;
                result
            })
            .await
    }

    /// Rename a mailbox of `src` (another store on the same account) to
    /// `dst_remote` under this store.
    pub async fn dir_move(&self, src: &dyn FsInfo, src_remote: &str, dst_remote: &str) -> Result<()> {
        let src_fs = match src.as_any().downcast_ref::<ImapFs>() {
            Some(fs) if self.same_account(fs) => fs,
            _ => {
                debug!("can't move directory from {}: not the same IMAP account", src.name());
                return Err(Error::CantDirMove);
            }
        };
        let from = join_path(src_fs.root(), src_remote);
        let to = join_path(&self.root, dst_remote);
        if from.is_empty() || to.is_empty() {
            return Err(Error::CantDirMove);
        }
        self.shared
            .bounded(async {
                let mut client = self.shared.connect().await?;
                let result = if !client.has_mailbox(&from) {
                    Err(Error::DirNotFound(from.clone()))
                } else if client.has_mailbox(&to) {
                    Err(Error::DirExists(to.clone()))
                } else {
                    client.rename_mailbox(&from, &to).await
                };
                client.logout().await;
                result
            })
            .await
    }

    fn same_account(&self, other: &ImapFs) -> bool {
        let (a, b) = (&self.shared.config, &other.shared.config);
        a.host == b.host && a.port == b.port && a.user == b.user
    }
}

impl FsInfo for ImapFs {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> &str {
        &self.root
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for ImapFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapFs")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("config", &self.shared.config)
            .finish()
    }
}

impl fmt::Display for ImapFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.shared.config;
        let scheme = match c.security {
            SecurityMode::Tls => "imaps",
            SecurityMode::None | SecurityMode::StartTls => "imap",
        };
        write!(f, "{}://{}:{}", scheme, c.host, c.port)
    }
}

/// Directory part and base name of a remote path.
fn split_remote(remote: &str) -> (&str, &str) {
    let remote = remote.trim_matches('/');
    match remote.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", remote),
    }
}

/// Fingerprint of a hint object. Its content must be a message; the hint's
/// own hash is used when it has one.
async fn descriptor_from_hint(mailbox: &str, hint: &dyn ObjectInfo) -> Result<MessageDescriptor> {
    let mut reader = hint.open().await.map_err(Error::terminal)?;
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .await
        .map_err(|e| Error::Read(e).terminal())?;
    validate_message(&data).map_err(Error::terminal)?;
    let name = base_name(&hint.remote()).to_string();
    let descriptor = match hint.hash(NAMING_HASH).await {
        Ok(Some(sum)) => MessageDescriptor::new(mailbox, hint.mod_time(), sum, hint.size()),
        _ => {
            MessageDescriptor::from_content(
                mailbox,
                None,
                hint.mod_time(),
                &mut data.as_slice(),
                hint.size(),
                Default::default(),
            )
            .await?
        }
    };
    Ok(descriptor.with_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Flag;
    use crate::protocol::memory::MemoryServer;
    use chrono::{DateTime, TimeZone, Utc};

    const HELLO: &str = "1704067200.R5d41402abc4b2a76b9719d911017c592.imap.rclone.org,S=5-2,";
    const MESSAGE: &[u8] = b"Subject: hi\r\n\r\nhello\r\n";

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn store(server: &MemoryServer, root: &str) -> ImapFs {
        ImapFs::with_connector("mail", root, ImapConfig::new("mail.example.org", "u", "p"), server.connector())
    }

    #[test]
    fn display_names_the_server() {
        let server = MemoryServer::new();
        let fs = store(&server, "/INBOX/");
        assert_eq!(fs.to_string(), "imap://mail.example.org:143");
        assert_eq!(fs.root(), "INBOX");
        assert_eq!(fs.precision(), Duration::from_secs(1));
        assert!(fs.hashes().contains(&HashType::Sha1));
        assert_eq!(fs.mime_type(), "message/rfc822");
        assert!(!fs.features().set_mod_time);

        let mut config = ImapConfig::new("mail.example.org", "u", "p");
        config.security = SecurityMode::Tls;
        config.port = 993;
        let fs = ImapFs::with_connector("mail", "", config, server.connector());
        assert_eq!(fs.to_string(), "imaps://mail.example.org:993");
    }

    #[test]
    fn remotes_split_into_dir_and_name() {
        assert_eq!(split_remote("a/b/c"), ("a/b", "c"));
        assert_eq!(split_remote("c"), ("", "c"));
        assert_eq!(split_remote("/a/c/"), ("a", "c"));
    }

    #[tokio::test]
    async fn new_object_finds_by_name() {
        let server = MemoryServer::new();
        server.add_message("INBOX", date(), &[Flag::Seen], b"hello");
        let fs = store(&server, "");
        let obj = fs.new_object(&format!("INBOX/{}", HELLO), None).await.unwrap();
        assert_eq!(obj.remote(), format!("INBOX/{}S", HELLO));
        assert_eq!(obj.size(), 5);
        assert_eq!(obj.mod_time(), date());

        let missing = "1704067201.R5d41402abc4b2a76b9719d911017c592.imap.rclone.org,S=5-2,";
        assert!(fs
            .new_object(&format!("INBOX/{}", missing), None)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(matches!(
            fs.new_object("INBOX/notes.txt", None).await,
            Err(Error::InvalidName(_))
        ));
        assert!(fs.new_object(HELLO, None).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn put_names_by_content_and_creates_mailbox() {
        let server = MemoryServer::new();
        let fs = store(&server, "");
        let src = SourceInfo::new("Archive/2024/note.eml", date(), MESSAGE.len() as i64);
        let obj = fs.put(MESSAGE, &src, None).await.unwrap();
        assert!(server.has_mailbox("Archive/2024"));
        assert!(obj.remote().starts_with("Archive/2024/1704067200.R"));
        assert_eq!(server.messages("Archive/2024")[0].body, MESSAGE);
        assert_eq!(server.commands_named("CREATE").len(), 1);
    }

    #[tokio::test]
    async fn put_rejects_non_messages() {
        let server = MemoryServer::new();
        let fs = store(&server, "INBOX");
        let src = SourceInfo::new("x", date(), 3);
        let err = fs.put(&b"\x00\x01\x02"[..], &src, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
        assert!(!err.is_retryable());
        assert!(server.commands().is_empty());
    }

    #[tokio::test]
    async fn put_rejects_a_name_that_lies() {
        let server = MemoryServer::new();
        let fs = store(&server, "INBOX");
        let src = SourceInfo::new(HELLO, date(), 5);
        let err = fs.put(MESSAGE, &src, None).await.unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(server.messages("INBOX").is_empty());
    }

    #[tokio::test]
    async fn put_at_the_account_root_is_unsupported() {
        let server = MemoryServer::new();
        let fs = store(&server, "");
        let src = SourceInfo::new("note.eml", date(), MESSAGE.len() as i64);
        assert!(matches!(
            fs.put(MESSAGE, &src, None).await,
            Err(Error::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn put_with_hint_keeps_hint_name() {
        let server = MemoryServer::new();
        server.add_message("INBOX", date(), &[], MESSAGE);
        let source = store(&server, "INBOX");
        let listed = source.list("").await.unwrap();
        let hint = listed[0].as_object().unwrap();

        let target = store(&server, "Copies");
        let obj = target
            .put(MESSAGE, hint, Some(hint as &dyn ObjectInfo))
            .await
            .unwrap();
        assert_eq!(obj.remote(), hint.name());
        assert_eq!(server.messages("Copies").len(), 1);
    }

    #[tokio::test]
    async fn open_hash_and_remove_refind_by_fingerprint() {
        let server = MemoryServer::new();
        server.add_message("INBOX", date() - chrono::Duration::days(1), &[], b"world");
        server.add_message("INBOX", date(), &[], b"hello");
        let fs = store(&server, "INBOX");
        let mut objects: Vec<Object> = fs
            .list("")
            .await
            .unwrap()
            .into_iter()
            .filter_map(DirEntry::into_object)
            .collect();
        objects.sort_by_key(|o| o.seq());
        let hello = objects.pop().unwrap();
        let world = objects.pop().unwrap();
        assert_eq!(hello.seq(), 2);

        // Expunging the first message renumbers the second.
        world.remove().await.unwrap();

        let mut body = Vec::new();
        hello.open().await.unwrap().read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"hello");
        assert_eq!(
            hello.hash(HashType::Sha1).await.unwrap(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
        assert_eq!(
            hello.hash(HashType::Md5).await.unwrap(),
            "5d41402abc4b2a76b9719d911017c592"
        );

        hello.remove().await.unwrap();
        assert!(server.messages("INBOX").is_empty());
        assert!(hello.remove().await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn update_is_unsupported_and_set_mod_time_is_ignored() {
        let server = MemoryServer::new();
        server.add_message("INBOX", date(), &[], b"hello");
        let fs = store(&server, "INBOX");
        let obj = fs.list("").await.unwrap().remove(0).into_object().unwrap();
        let src = SourceInfo::new("x", date(), 5);
        assert!(matches!(
            obj.update(Box::new(&b"hello"[..]), &src).await,
            Err(Error::Unsupported(_))
        ));
        server.clear_commands();
        obj.set_mod_time(Utc::now()).await.unwrap();
        assert!(server.commands().is_empty());
    }

    #[tokio::test]
    async fn mkdir_and_rmdir_are_idempotent() {
        let server = MemoryServer::new();
        let fs = store(&server, "");
        fs.mkdir("Work").await.unwrap();
        fs.mkdir("Work").await.unwrap();
        assert_eq!(server.commands_named("CREATE").len(), 1);
        fs.rmdir("Work").await.unwrap();
        fs.rmdir("Work").await.unwrap();
        assert_eq!(server.commands_named("DELETE").len(), 1);
        assert!(!server.has_mailbox("Work"));
    }

    #[tokio::test]
    async fn rmdir_of_the_account_root_is_a_no_op() {
        let server = MemoryServer::new();
        let fs = store(&server, "");
        fs.rmdir("").await.unwrap();
        fs.rmdir("/").await.unwrap();
        assert!(server.commands().is_empty());
        assert!(server.has_mailbox("INBOX"));
    }

    #[tokio::test]
    async fn noselect_parent_lists_its_children() {
        let server = MemoryServer::new();
        server.add_noselect_mailbox("[Gmail]");
        server.add_mailbox("[Gmail]/Sent");
        server.add_mailbox("[Gmail]/Trash");
        let fs = store(&server, "");
        let root = fs.list("").await.unwrap();
        assert!(root.iter().any(|e| e.is_dir() && e.remote() == "[Gmail]"));

        server.clear_commands();
        let mut children: Vec<String> = fs
            .list("[Gmail]")
            .await
            .unwrap()
            .iter()
            .map(|e| e.remote().to_string())
            .collect();
        children.sort();
        assert_eq!(children, vec!["[Gmail]/Sent", "[Gmail]/Trash"]);
        assert!(server.commands_named("STATUS").is_empty());
        assert!(server.commands_named("SEARCH").is_empty());

        let err = fs.rmdir("[Gmail]").await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("not selectable"));
        assert!(server.commands_named("DELETE").is_empty());

        let name = "1704067200.R5d41402abc4b2a76b9719d911017c592.imap.rclone.org,S=5-2,";
        let missing = fs.new_object(&format!("[Gmail]/{}", name), None).await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn rmdir_of_full_mailbox_is_terminal() {
        let server = MemoryServer::new();
        server.add_message("INBOX", date(), &[], b"hello");
        let fs = store(&server, "");
        let err = fs.rmdir("INBOX").await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("not empty"));
        assert!(server.commands_named("DELETE").is_empty());
    }

    #[tokio::test]
    async fn dir_move_renames_within_the_account() {
        let server = MemoryServer::new();
        server.add_mailbox("Work");
        server.add_mailbox("Old");
        let a = store(&server, "");
        let b = store(&server, "Archive");
        server.add_mailbox("Archive");
        b.dir_move(&a, "Work", "Work").await.unwrap();
        assert!(server.has_mailbox("Archive/Work"));
        assert!(!server.has_mailbox("Work"));

        assert!(matches!(
            b.dir_move(&a, "Missing", "X").await,
            Err(Error::DirNotFound(_))
        ));
        server.add_mailbox("Archive/Old");
        assert!(matches!(
            b.dir_move(&a, "Old", "Old").await,
            Err(Error::DirExists(_))
        ));
    }

    #[tokio::test]
    async fn operations_time_out() {
        let mut config = ImapConfig::new("mail.example.org", "u", "p");
        config.timeout = Some(Duration::from_millis(20));
        let fs = ImapFs::with_connector("mail", "", config, Stalled);
        let err = fs.list("").await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    struct Stalled;

    #[async_trait::async_trait]
    impl Connector for Stalled {
        async fn connect(&self) -> Result<Box<dyn crate::protocol::Session>> {
            std::future::pending().await
        }
    }
}
