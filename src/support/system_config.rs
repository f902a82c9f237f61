//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Polliwog.
//
// Polliwog is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Polliwog is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Polliwog. If not, see <http://www.gnu.org/licenses/>.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The system-wide configuration for Polliwog.
///
/// This is stored in a file named `polliwog.toml`, conventionally under
/// `/usr/local/etc/polliwog` or `/etc/polliwog`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    /// The address the `serve` command binds.
    pub listen: String,

    /// Whether to advertise and accept `STARTTLS`.
    pub starttls_enabled: bool,

    /// If true, refuse plaintext `LOGIN` and `AUTHENTICATE` before TLS is
    /// active, and advertise `LOGINDISABLED` instead of the auth mechanisms.
    pub reject_insecure_auth: bool,

    /// If set, skip authentication entirely and greet with `PREAUTH` as this
    /// user. Intended for trusted transports such as a UNIX socket behind a
    /// frontend that already authenticated the client.
    pub preauth_user: Option<String>,

    /// Maximum size, in octets, of a single `APPEND` message. Also reported
    /// through the `APPENDLIMIT=` capability.
    pub max_append_len: u32,

    /// Number of consecutive `BAD` responses tolerated before the connection
    /// is closed with `BYE`.
    pub bad_command_limit: u32,

    /// Number of failed authentication attempts tolerated before the
    /// connection is closed.
    pub bad_auth_limit: u32,

    /// If true, do not advertise or accept `IDLE`.
    pub disable_idle: bool,

    /// How long an `IDLE` session may run before being terminated with
    /// `BYE`, in seconds. RFC 2177 suggests 29 minutes.
    pub idle_timeout_secs: u64,

    /// TLS key material, handed to the TLS collaborator verbatim.
    pub tls: TlsConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            listen: "0.0.0.0:143".to_owned(),
            starttls_enabled: true,
            reject_insecure_auth: false,
            preauth_user: None,
            max_append_len: 64 * 1024 * 1024,
            bad_command_limit: 5,
            bad_auth_limit: 3,
            disable_idle: false,
            idle_timeout_secs: 29 * 60,
            tls: TlsConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// The path to the TLS private key, which must be in PEM format.
    pub private_key: PathBuf,
    /// The path to the TLS certificate chain, which must be in PEM format.
    pub certificate_chain: PathBuf,
}
