/*
 * config.rs
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

//! Connection settings for an IMAP-backed store.
//!
//! `ImapOptions` is the raw, string-typed surface handed over by whatever loads
//! configuration (files, environment, command line). `ImapConfig` is the
//! validated form the store works with. Revealing obscured passwords is left
//! to the caller: `pass` is used verbatim.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Plain IMAP port (none / STARTTLS).
pub const DEFAULT_PORT: u16 = 143;
/// IMAPS port (implicit TLS).
pub const DEFAULT_TLS_PORT: u16 = 993;
/// Per-operation deadline when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// How the connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityMode {
    /// Plaintext for the whole session.
    None,
    /// Plaintext dial, then STARTTLS before authenticating.
    #[default]
    StartTls,
    /// TLS from the first byte.
    Tls,
}

impl SecurityMode {
    pub fn default_port(self) -> u16 {
        match self {
            SecurityMode::Tls => DEFAULT_TLS_PORT,
            SecurityMode::None | SecurityMode::StartTls => DEFAULT_PORT,
        }
    }
}

impl FromStr for SecurityMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "starttls" => Ok(SecurityMode::StartTls),
            "tls" => Ok(SecurityMode::Tls),
            "none" => Ok(SecurityMode::None),
            other => Err(Error::Config(format!("invalid security: {}", other))),
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SecurityMode::None => "none",
            SecurityMode::StartTls => "starttls",
            SecurityMode::Tls => "tls",
        })
    }
}

/// Raw options as configured. Every field is optional on input.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImapOptions {
    /// IMAP host to connect to, e.g. "imap.example.com".
    pub host: String,
    /// IMAP username. Empty means the current OS user.
    pub user: String,
    /// IMAP password.
    pub pass: String,
    /// Port number; empty means 143, or 993 for TLS.
    pub port: String,
    /// Prompt for the password when `pass` is empty.
    pub ask_password: bool,
    /// Connection type: none, starttls, tls.
    pub security: String,
    /// Skip server certificate verification.
    pub no_check_certificate: bool,
    /// Per-operation deadline in seconds; 0 disables it.
    pub timeout_secs: u64,
}

impl Default for ImapOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: String::new(),
            pass: String::new(),
            port: String::new(),
            ask_password: false,
            security: "starttls".to_string(),
            no_check_certificate: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Validated connection settings.
#[derive(Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub security: SecurityMode,
    pub skip_verify: bool,
    pub timeout: Option<Duration>,
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .field("security", &self.security)
            .field("skip_verify", &self.skip_verify)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ImapConfig {
    /// Settings with defaults for everything but host and credentials.
    pub fn new(host: impl Into<String>, user: impl Into<String>, pass: impl Into<String>) -> Self {
        let security = SecurityMode::default();
        Self {
            host: host.into(),
            port: security.default_port(),
            user: user.into(),
            pass: pass.into(),
            security,
            skip_verify: true,
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }

    /// Validate raw options. `prompt` is asked for the password when
    /// `ask_password` is set and no password was configured.
    pub fn from_options(
        opts: &ImapOptions,
        prompt: Option<&dyn Fn(&str) -> String>,
    ) -> Result<Self> {
        let host = opts.host.trim();
        if host.is_empty() {
            return Err(Error::Config("host is required for IMAP".to_string()));
        }
        let user = if opts.user.is_empty() {
            current_user()
        } else {
            opts.user.clone()
        };
        let pass = match prompt {
            Some(ask) if opts.ask_password && opts.pass.is_empty() => ask("IMAP server password"),
            _ => opts.pass.clone(),
        };
        let security: SecurityMode = opts.security.parse()?;
        let port = if opts.port.trim().is_empty() {
            security.default_port()
        } else {
            opts.port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid port value: {}", opts.port)))?
        };
        let timeout = match opts.timeout_secs {
            0 => None,
            n => Some(Duration::from_secs(n)),
        };
        Ok(Self {
            host: host.to_string(),
            port,
            user,
            pass,
            security,
            skip_verify: opts.no_check_certificate,
            timeout,
        })
    }

    /// "host:port" for dialing.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(host: &str) -> ImapOptions {
        ImapOptions {
            host: host.to_string(),
            user: "alice".to_string(),
            pass: "secret".to_string(),
            ..ImapOptions::default()
        }
    }

    #[test]
    fn defaults_to_starttls_on_143() {
        let c = ImapConfig::from_options(&opts("imap.example.com"), None).unwrap();
        assert_eq!(c.security, SecurityMode::StartTls);
        assert_eq!(c.port, 143);
        assert!(c.skip_verify);
        assert_eq!(c.address(), "imap.example.com:143");
    }

    #[test]
    fn tls_defaults_to_993() {
        let mut o = opts("imap.example.com");
        o.security = " TLS ".to_string();
        let c = ImapConfig::from_options(&o, None).unwrap();
        assert_eq!(c.security, SecurityMode::Tls);
        assert_eq!(c.port, 993);
    }

    #[test]
    fn explicit_port_wins() {
        let mut o = opts("h");
        o.security = "none".to_string();
        o.port = "1143".to_string();
        let c = ImapConfig::from_options(&o, None).unwrap();
        assert_eq!(c.security, SecurityMode::None);
        assert_eq!(c.port, 1143);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ImapConfig::from_options(&opts(""), None),
            Err(Error::Config(_))
        ));
        let mut o = opts("h");
        o.security = "ssl3".to_string();
        assert!(matches!(ImapConfig::from_options(&o, None), Err(Error::Config(_))));
        let mut o = opts("h");
        o.port = "imap".to_string();
        assert!(matches!(ImapConfig::from_options(&o, None), Err(Error::Config(_))));
    }

    #[test]
    fn prompts_only_when_asked_and_empty() {
        let ask = |_: &str| "typed".to_string();
        let mut o = opts("h");
        o.ask_password = true;
        o.pass.clear();
        let c = ImapConfig::from_options(&o, Some(&ask)).unwrap();
        assert_eq!(c.pass, "typed");
        o.pass = "stored".to_string();
        let c = ImapConfig::from_options(&o, Some(&ask)).unwrap();
        assert_eq!(c.pass, "stored");
    }

    #[test]
    fn deserializes_with_defaults() {
        let o: ImapOptions =
            serde_json::from_str(r#"{"host":"imap.example.com","timeout_secs":0}"#).unwrap();
        assert_eq!(o.security, "starttls");
        assert!(o.no_check_certificate);
        let c = ImapConfig::from_options(&o, None).unwrap();
        assert_eq!(c.timeout, None);
    }

    #[test]
    fn debug_hides_password() {
        let c = ImapConfig::new("h", "u", "hunter2");
        assert!(!format!("{:?}", c).contains("hunter2"));
    }
}
