/*
 * error.rs
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

//! Store and protocol errors.

use std::io;
use std::time::Duration;

/// Errors from the file store, the connection client, or the IMAP wire client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A path segment does not follow the canonical message name grammar.
    #[error("invalid file name: {0}")]
    InvalidName(String),

    /// Content is not a well-formed mail message.
    #[error("invalid IMAP message: {0}")]
    InvalidMessage(String),

    /// Content stream failed while hashing or re-streaming.
    #[error("failed to read message: {0}")]
    Read(#[source] io::Error),

    /// Operation attempted without a live session.
    #[error("failed to {0}: not connected")]
    NotConnected(&'static str),

    /// Mailbox (directory) not found.
    #[error("directory not found: {0}")]
    DirNotFound(String),

    /// Message (object) not found.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Mailbox exists only as a hierarchy node (`\Noselect`).
    #[error("mailbox not selectable: {0}")]
    NotSelectable(String),

    #[error("mailbox {mailbox} not empty, has {messages} messages")]
    MailboxNotEmpty { mailbox: String, messages: u32 },

    #[error("directory already exists: {0}")]
    DirExists(String),

    /// Directory moves are only possible between two stores of this type.
    #[error("can't move directory")]
    CantDirMove,

    /// The name or source object claims a fingerprint the stored bytes do not have.
    #[error("checksum mismatch: expected {expected}, content has {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Dial or TLS handshake failure.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Server rejected a command, sent something unparseable, or the transport broke mid-command.
    #[error("failed to {context}: {message}")]
    Protocol { context: String, message: String },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    /// Any error a caller must not retry, whatever its kind.
    #[error(transparent)]
    Terminal(Box<Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn protocol(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Wrap so that `is_retryable` is false.
    pub fn terminal(self) -> Self {
        match self {
            Error::Terminal(_) => self,
            other => Error::Terminal(Box::new(other)),
        }
    }

    /// Whether a higher layer may retry the operation that produced this error.
    /// Conditions that cannot change by retrying (bad names, bad content,
    /// non-empty mailboxes, client bugs) are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Read(_) | Error::Connect { .. } | Error::Protocol { .. } | Error::Timeout(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::DirNotFound(_) | Error::ObjectNotFound(_) => true,
            Error::Terminal(inner) => inner.is_not_found(),
            _ => false,
        }
    }
}
