/*
 * lib.rs
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

//! Mailfs core: an IMAP account as a hierarchical file store.
//!
//! Mailboxes are directories. Messages are immutable files named by their
//! content fingerprint, `<secs>.R<md5>.imap.rclone.org,S=<size>-2,<flags>`.
//! `fs::ImapFs` is the entry point; `protocol::memory` serves the same
//! contract in-process for tests.

pub mod client;
pub mod config;
pub mod error;
pub mod fs;
pub mod hash;
pub mod lister;
pub mod message;
pub mod mime;
pub mod net;
pub mod protocol;
pub mod resolver;

pub use config::{ImapConfig, ImapOptions, SecurityMode};
pub use error::{Error, Result};
pub use fs::{DirEntry, Directory, Features, FsInfo, ImapFs, Object, ObjectInfo, SourceInfo, MIME_TYPE};
pub use hash::{HashType, NAMING_HASH};
pub use message::{Flag, MessageDescriptor, HOST_TAG};
