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

//! IMAP4rev1 wire client and the connector that dials it.

mod client;
mod response;

pub use client::ImapSession;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{ImapConfig, SecurityMode};
use crate::error::Result;
use crate::net::{connect_plain, connect_tls, upgrade_to_tls, ImapStream};
use crate::protocol::{Connector, Session};

/// Dials the configured server and secures the connection per `SecurityMode`.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    config: ImapConfig,
}

impl ImapConnector {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ImapConfig {
        &self.config
    }

    async fn open(&self) -> Result<ImapSession<ImapStream>> {
        let c = &self.config;
        match c.security {
            SecurityMode::None => {
                let tcp = connect_plain(&c.host, c.port).await?;
                let mut session = ImapSession::new(ImapStream::Plain(tcp));
                session.read_greeting().await?;
                Ok(session)
            }
            SecurityMode::Tls => {
                let stream = connect_tls(&c.host, c.port, c.skip_verify).await?;
                let mut session = ImapSession::new(stream);
                session.read_greeting().await?;
                Ok(session)
            }
            SecurityMode::StartTls => {
                let tcp = connect_plain(&c.host, c.port).await?;
                let mut plain = ImapSession::new(tcp);
                plain.read_greeting().await?;
                plain.starttls().await?;
                let (tcp, tag) = plain.into_inner();
                let tls = upgrade_to_tls(tcp, &c.host, c.port, c.skip_verify).await?;
                Ok(ImapSession::resume(tls, tag))
            }
        }
    }
}

#[async_trait]
impl Connector for ImapConnector {
    async fn connect(&self) -> Result<Box<dyn Session>> {
        debug!(
            "connecting to {}:{} ({})",
            self.config.host, self.config.port, self.config.security
        );
        let session = self.open().await?;
        Ok(Box::new(session))
    }
}
