/*
 * hash.rs
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

//! Content hashes. Canonical message names are pinned to `NAMING_HASH`;
//! other advertised types are only ever computed on demand.

use std::collections::HashMap;
use std::fmt;

use md5::Md5;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Hash types a store can report.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum HashType {
    Md5,
    Sha1,
}

/// The algorithm embedded in canonical message names.
pub const NAMING_HASH: HashType = HashType::Md5;

impl HashType {
    pub fn name(self) -> &'static str {
        match self {
            HashType::Md5 => "md5",
            HashType::Sha1 => "sha1",
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
}

impl Hasher {
    fn new(t: HashType) -> Self {
        match t {
            HashType::Md5 => Hasher::Md5(Md5::new()),
            HashType::Sha1 => Hasher::Sha1(Sha1::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.finalize()),
            Hasher::Sha1(h) => hex::encode(h.finalize()),
        }
    }
}

/// Several digests computed over one pass of the data.
pub struct MultiHasher {
    hashers: Vec<(HashType, Hasher)>,
}

impl MultiHasher {
    pub fn new(types: &[HashType]) -> Self {
        let mut hashers: Vec<(HashType, Hasher)> = Vec::with_capacity(types.len());
        for &t in types {
            if !hashers.iter().any(|(have, _)| *have == t) {
                hashers.push((t, Hasher::new(t)));
            }
        }
        Self { hashers }
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, h) in self.hashers.iter_mut() {
            h.update(data);
        }
    }

    /// Lowercase hex digest per requested type, each from its own algorithm.
    pub fn finish(self) -> HashMap<HashType, String> {
        self.hashers
            .into_iter()
            .map(|(t, h)| (t, h.finish()))
            .collect()
    }
}

/// Stream `reader` to the end once, returning a digest for every requested type.
pub async fn hash_reader<R>(reader: &mut R, types: &[HashType]) -> Result<HashMap<HashType, String>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = MultiHasher::new(types);
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = reader.read(&mut buf).await.map_err(Error::Read)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

/// Digest of an in-memory buffer.
pub fn hash_bytes(data: &[u8], t: HashType) -> String {
    let mut h = Hasher::new(t);
    h.update(data);
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(hash_bytes(b"hello", HashType::Md5), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(
            hash_bytes(b"hello", HashType::Sha1),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
        assert_eq!(hash_bytes(b"", HashType::Md5), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn each_type_uses_its_own_algorithm() {
        let mut reader: &[u8] = b"hello";
        let sums = hash_reader(&mut reader, &[HashType::Md5, HashType::Sha1])
            .await
            .unwrap();
        assert_eq!(sums[&HashType::Md5], hash_bytes(b"hello", HashType::Md5));
        assert_eq!(sums[&HashType::Sha1], hash_bytes(b"hello", HashType::Sha1));
        assert_eq!(sums[&HashType::Sha1].len(), 40);
    }

    #[tokio::test]
    async fn deterministic_across_calls() {
        let data = vec![7u8; 40_000];
        let mut a: &[u8] = &data;
        let mut b: &[u8] = &data;
        let x = hash_reader(&mut a, &[NAMING_HASH]).await.unwrap();
        let y = hash_reader(&mut b, &[NAMING_HASH]).await.unwrap();
        assert_eq!(x, y);
    }

    #[test]
    fn duplicate_types_collapse() {
        let mut h = MultiHasher::new(&[HashType::Md5, HashType::Md5]);
        h.update(b"abc");
        assert_eq!(h.finish().len(), 1);
    }
}
