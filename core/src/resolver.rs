/*
 * resolver.rs
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

//! Classify a virtual path as a mailbox or a message, without network I/O.

use crate::message::CanonicalName;

/// A path split into the mailbox to query and, when the last segment has the
/// shape of a canonical message name, that name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Slash-separated mailbox path; "" is the root.
    pub mailbox: String,
    pub file: Option<String>,
}

impl Resolved {
    pub fn is_root(&self) -> bool {
        self.mailbox.is_empty()
    }
}

/// Join path pieces, dropping empty and `.` segments.
pub fn join_path(base: &str, rel: &str) -> String {
    base.split('/')
        .chain(rel.split('/'))
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Last segment of a slash-separated path.
pub fn base_name(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    path.rsplit('/').next().unwrap_or(path)
}

/// Resolve `rel` under the filesystem `root`.
pub fn resolve(root: &str, rel: &str) -> Resolved {
    let full = join_path(root, rel);
    match full.rsplit_once('/') {
        Some((parent, last)) if CanonicalName::looks_like(last) => Resolved {
            mailbox: parent.to_string(),
            file: Some(last.to_string()),
        },
        None if CanonicalName::looks_like(&full) => Resolved {
            mailbox: String::new(),
            file: Some(full),
        },
        _ => Resolved {
            mailbox: full,
            file: None,
        },
    }
}
