/*
 * mime.rs
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

//! Minimal RFC 5322 well-formedness check applied before uploading content
//! as a message. Only the header block is inspected; bodies are opaque.

use crate::error::{Error, Result};

/// Accept `data` if it starts with a syntactically valid header block:
/// `Name: value` fields (with optional folded continuation lines) ended by an
/// empty line or by the end of input. Empty input, a folded first line or a
/// line without a field name are rejected.
pub fn validate_message(data: &[u8]) -> Result<()> {
    let mut fields = 0usize;
    let mut rest = data;
    loop {
        if rest.is_empty() {
            return if fields > 0 {
                Ok(())
            } else {
                Err(Error::InvalidMessage("no header fields".to_string()))
            };
        }
        let (line, next) = match rest.iter().position(|&b| b == b'\n') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, &rest[rest.len()..]),
        };
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        rest = next;

        if line.is_empty() {
            return Ok(());
        }
        if line[0] == b' ' || line[0] == b'\t' {
            if fields == 0 {
                return Err(Error::InvalidMessage(
                    "malformed initial header line".to_string(),
                ));
            }
            continue;
        }
        let colon = line.iter().position(|&b| b == b':').ok_or_else(|| {
            Error::InvalidMessage(format!(
                "malformed header line: {}",
                String::from_utf8_lossy(line)
            ))
        })?;
        if !is_field_name(&line[..colon]) {
            return Err(Error::InvalidMessage(format!(
                "invalid header field name: {}",
                String::from_utf8_lossy(&line[..colon])
            )));
        }
        fields += 1;
    }
}

/// RFC 5322 ftext: printable US-ASCII except colon, at least one character.
fn is_field_name(name: &[u8]) -> bool {
    !name.is_empty() && name.iter().all(|&b| (33..=126).contains(&b) && b != b':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_message() {
        let m = b"From: a@example.com\r\nSubject: hi\r\n\r\nbody\r\n";
        assert!(validate_message(m).is_ok());
    }

    #[test]
    fn accepts_folded_headers_and_bare_lf() {
        let m = b"Subject: a very\n\tlong subject\nTo: b@example.com\n\nbody";
        assert!(validate_message(m).is_ok());
    }

    #[test]
    fn accepts_headers_without_body() {
        assert!(validate_message(b"Subject: only headers").is_ok());
    }

    #[test]
    fn accepts_empty_header_block() {
        assert!(validate_message(b"\r\njust a body").is_ok());
    }

    #[test]
    fn rejects_plain_text() {
        assert!(matches!(
            validate_message(b"hello"),
            Err(Error::InvalidMessage(_))
        ));
        assert!(matches!(validate_message(b""), Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn rejects_bad_field_names() {
        assert!(validate_message(b"Bad Name: x\r\n\r\n").is_err());
        assert!(validate_message(b": x\r\n\r\n").is_err());
        assert!(validate_message(b" folded first\r\n\r\n").is_err());
    }
}
