/*
 * flag.rs
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

//! IMAP system flags and their maildir-style letters.

use std::collections::HashSet;

/// Message flags carried in canonical names.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Flag {
    Seen,
    Answered,
    Deleted,
    Draft,
    Flagged,
}

impl Flag {
    /// All flags, in the order their letters appear in a name.
    pub const ALL: [Flag; 5] = [
        Flag::Seen,
        Flag::Answered,
        Flag::Deleted,
        Flag::Draft,
        Flag::Flagged,
    ];

    pub fn letter(self) -> char {
        match self {
            Flag::Seen => 'S',
            Flag::Answered => 'A',
            Flag::Deleted => 'T',
            Flag::Draft => 'D',
            Flag::Flagged => 'F',
        }
    }

    pub fn from_letter(c: char) -> Option<Flag> {
        Flag::ALL.into_iter().find(|f| f.letter() == c)
    }

    /// IMAP system flag token, e.g. `\Seen`.
    pub fn imap_name(self) -> &'static str {
        match self {
            Flag::Seen => "\\Seen",
            Flag::Answered => "\\Answered",
            Flag::Deleted => "\\Deleted",
            Flag::Draft => "\\Draft",
            Flag::Flagged => "\\Flagged",
        }
    }

    /// Parse an IMAP flag token (case-insensitive). Keywords and `\Recent` are not mapped.
    pub fn from_imap(token: &str) -> Option<Flag> {
        Flag::ALL
            .into_iter()
            .find(|f| f.imap_name().eq_ignore_ascii_case(token))
    }
}

/// Letters for the flags present, in canonical order.
pub fn flag_letters(flags: &HashSet<Flag>) -> String {
    Flag::ALL
        .into_iter()
        .filter(|f| flags.contains(f))
        .map(Flag::letter)
        .collect()
}

/// Known system flags among IMAP tokens; anything else is dropped.
pub fn flags_from_imap<I, S>(tokens: I) -> HashSet<Flag>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokens
        .into_iter()
        .filter_map(|t| Flag::from_imap(t.as_ref()))
        .collect()
}

/// Parenthesized IMAP flag list, e.g. `(\Seen \Flagged)`.
pub fn imap_flag_list(flags: &HashSet<Flag>) -> String {
    let tokens: Vec<&str> = Flag::ALL
        .into_iter()
        .filter(|f| flags.contains(f))
        .map(Flag::imap_name)
        .collect();
    format!("({})", tokens.join(" "))
}
