/*
 * response.rs
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

//! Parsing of IMAP server responses.
//!
//! A response is one logical line: the text up to CRLF, with any `{N}`
//! literal and the line continuing after it folded in. Status responses are
//! read as text; data responses (LIST, STATUS, SEARCH, FETCH) are tokenized
//! into values.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::message::{flags_from_imap, Flag};
use crate::protocol::{FetchedMessage, ListEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapStatus {
    Ok,
    No,
    Bad,
    PreAuth,
    Bye,
}

impl ImapStatus {
    fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "OK" => Some(ImapStatus::Ok),
            "NO" => Some(ImapStatus::No),
            "BAD" => Some(ImapStatus::Bad),
            "PREAUTH" => Some(ImapStatus::PreAuth),
            "BYE" => Some(ImapStatus::Bye),
            _ => None,
        }
    }
}

/// One logical response as read from the wire, without the final CRLF.
#[derive(Debug, Clone)]
pub struct Response {
    pub raw: Vec<u8>,
}

impl Response {
    pub fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    /// The first physical line, lossily decoded, for status checks and errors.
    pub fn line(&self) -> String {
        let end = self
            .raw
            .windows(2)
            .position(|w| w == b"\r\n")
            .unwrap_or(self.raw.len());
        String::from_utf8_lossy(&self.raw[..end]).into_owned()
    }

    pub fn is_untagged(&self) -> bool {
        self.raw.starts_with(b"* ")
    }

    pub fn is_continuation(&self) -> bool {
        self.raw.first() == Some(&b'+')
    }

    /// Whether this is the tagged completion for `tag`.
    pub fn is_tagged(&self, tag: &str) -> bool {
        self.raw.starts_with(tag.as_bytes()) && self.raw.get(tag.len()) == Some(&b' ')
    }

    /// Status word of a tagged or untagged status response (`OK`, `NO`, ...).
    pub fn status(&self) -> Option<ImapStatus> {
        let line = self.line();
        let mut words = line.split_whitespace();
        words.next()?;
        ImapStatus::parse(words.next()?)
    }

    /// Text following the status word, e.g. `[TRYCREATE] no such mailbox`.
    pub fn text(&self) -> String {
        let line = self.line();
        let mut parts = line.splitn(3, ' ');
        parts.next();
        parts.next();
        parts.next().unwrap_or("").to_string()
    }

    pub fn values(&self) -> Option<Vec<Value>> {
        Parser::new(&self.raw).parse_all()
    }
}

/// Size of the literal announced at the end of `line` (`{N}` or `{N+}`).
pub fn literal_size(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n").unwrap_or(line);
    let line = line.strip_suffix(b"}")?;
    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = &line[open + 1..];
    let digits = digits.strip_suffix(b"+").unwrap_or(digits);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// A tokenized response value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Atom(String),
    /// Quoted string or literal.
    String(Vec<u8>),
    Nil,
    List(Vec<Value>),
}

impl Value {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Value::Atom(a) => Some(a),
            _ => None,
        }
    }

    /// Atom or string content as text.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Atom(a) => Some(a.clone()),
            Value::String(s) => Some(String::from_utf8_lossy(s).into_owned()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<u32> {
        self.as_atom()?.parse().ok()
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn parse_all(mut self) -> Option<Vec<Value>> {
        let mut values = Vec::new();
        loop {
            self.skip_space();
            if self.pos >= self.data.len() {
                return Some(values);
            }
            values.push(self.value()?);
        }
    }

    fn skip_space(&mut self) {
        while self.pos < self.data.len() && matches!(self.data[self.pos], b' ' | b'\r' | b'\n') {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Option<Value> {
        match *self.data.get(self.pos)? {
            b'(' => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    self.skip_space();
                    match *self.data.get(self.pos)? {
                        b')' => {
                            self.pos += 1;
                            return Some(Value::List(items));
                        }
                        _ => items.push(self.value()?),
                    }
                }
            }
            b'"' => self.quoted(),
            b'{' => self.literal(),
            _ => {
                let atom = self.atom()?;
                if atom.eq_ignore_ascii_case("NIL") {
                    Some(Value::Nil)
                } else {
                    Some(Value::Atom(atom))
                }
            }
        }
    }

    fn quoted(&mut self) -> Option<Value> {
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            match *self.data.get(self.pos)? {
                b'\\' => {
                    out.push(*self.data.get(self.pos + 1)?);
                    self.pos += 2;
                }
                b'"' => {
                    self.pos += 1;
                    return Some(Value::String(out));
                }
                b => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
    }

    fn literal(&mut self) -> Option<Value> {
        let close = self.pos + self.data[self.pos..].iter().position(|&b| b == b'}')?;
        let n = literal_size(&self.data[self.pos..=close])?;
        let start = close + 1;
        if self.data.get(start..start + 2)? != b"\r\n" {
            return None;
        }
        let body = self.data.get(start + 2..start + 2 + n)?.to_vec();
        self.pos = start + 2 + n;
        Some(Value::String(body))
    }

    /// Atom characters, with `[...]` sections kept whole so `BODY[]` stays one token.
    fn atom(&mut self) -> Option<String> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(&b) = self.data.get(self.pos) {
            match b {
                b'[' => depth += 1,
                b']' => depth = depth.saturating_sub(1),
                b' ' | b'(' | b')' if depth == 0 => break,
                b'\r' | b'\n' | b'"' | b'{' if depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        Some(String::from_utf8_lossy(&self.data[start..self.pos]).into_owned())
    }
}

/// `* LIST (attrs) delim name`.
pub fn parse_list(response: &Response) -> Option<ListEntry> {
    let values = response.values()?;
    if values.len() < 5 || !values[1].as_atom()?.eq_ignore_ascii_case("LIST") {
        return None;
    }
    let attributes = values[2]
        .as_list()?
        .iter()
        .filter_map(Value::as_text)
        .collect();
    let delimiter = match &values[3] {
        Value::Nil => None,
        v => v.as_text()?.chars().next(),
    };
    let name = values[4].as_text()?;
    Some(ListEntry {
        attributes,
        delimiter,
        name,
    })
}

/// `* STATUS name (MESSAGES n ...)`.
pub fn parse_status_messages(response: &Response) -> Option<u32> {
    let values = response.values()?;
    if !values.get(1)?.as_atom()?.eq_ignore_ascii_case("STATUS") {
        return None;
    }
    let items = values.last()?.as_list()?;
    items
        .chunks(2)
        .find(|pair| pair[0].as_atom().is_some_and(|a| a.eq_ignore_ascii_case("MESSAGES")))
        .and_then(|pair| pair.get(1)?.as_number())
}

/// `* n EXISTS`.
pub fn parse_exists(response: &Response) -> Option<u32> {
    let line = response.line();
    let mut words = line.split_whitespace();
    if words.next()? != "*" {
        return None;
    }
    let n = words.next()?.parse().ok()?;
    words
        .next()
        .filter(|w| w.eq_ignore_ascii_case("EXISTS"))
        .map(|_| n)
}

/// `* SEARCH n n n`.
pub fn parse_search(response: &Response) -> Option<Vec<u32>> {
    let line = response.line();
    let mut words = line.split_whitespace();
    if words.next()? != "*" || !words.next()?.eq_ignore_ascii_case("SEARCH") {
        return None;
    }
    Some(words.filter_map(|w| w.parse().ok()).collect())
}

/// `* n FETCH (item value ...)`. Items may come in any order; the body is
/// `BODY[]` as a literal, a quoted string or NIL.
pub fn parse_fetch(response: &Response) -> Option<FetchedMessage> {
    let values = response.values()?;
    if values.len() < 4 || !values[2].as_atom()?.eq_ignore_ascii_case("FETCH") {
        return None;
    }
    let seq = values[1].as_number()?;
    let items = values[3].as_list()?;
    let mut internal_date = None;
    let mut size = None;
    let mut flags: HashSet<Flag> = HashSet::new();
    let mut body = None;
    for pair in items.chunks(2) {
        let (key, value) = match pair {
            [k, v] => (k.as_atom()?.to_ascii_uppercase(), v),
            _ => return None,
        };
        match key.as_str() {
            "FLAGS" => {
                flags = flags_from_imap(value.as_list()?.iter().filter_map(Value::as_text));
            }
            "INTERNALDATE" => internal_date = Some(parse_date_time(&value.as_text()?)?),
            "RFC822.SIZE" => size = Some(value.as_number()?),
            k if k.starts_with("BODY[") => {
                body = match value {
                    Value::String(b) => Some(b.clone()),
                    _ => None,
                };
            }
            _ => {}
        }
    }
    Some(FetchedMessage {
        seq,
        internal_date: internal_date?,
        size: size?,
        flags,
        body,
    })
}

/// IMAP `date-time`, e.g. ` 1-Jan-2024 00:00:00 +0000`.
pub fn parse_date_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s.trim(), "%d-%b-%Y %H:%M:%S %z")
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Quote a string for use as an IMAP astring.
pub fn quote_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
