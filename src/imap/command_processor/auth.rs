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

use std::borrow::Cow;

use log::info;

use super::defs::*;
use crate::backend::{Credentials, LoginProvider};
use crate::support::error::Error;

impl<L: LoginProvider> CommandProcessor<L> {
    pub(super) fn capability_data(&self) -> s::CapabilityData<'static> {
        let mut capabilities: Vec<Cow<'static, str>> =
            vec![Cow::Borrowed("IMAP4rev1")];

        if !self.tls_active && self.config.starttls_enabled {
            capabilities.push(Cow::Borrowed("STARTTLS"));
        }
        if self.insecure_auth_forbidden() {
            capabilities.push(Cow::Borrowed("LOGINDISABLED"));
        } else {
            capabilities.push(Cow::Borrowed("AUTH=PLAIN"));
        }

        capabilities.push(Cow::Owned(format!(
            "APPENDLIMIT={}",
            self.config.max_append_len
        )));
        capabilities.push(Cow::Borrowed("BINARY"));
        if !self.config.disable_idle {
            capabilities.push(Cow::Borrowed("IDLE"));
        }
        capabilities.push(Cow::Borrowed("LITERAL+"));
        capabilities.push(Cow::Borrowed("MULTIAPPEND"));
        capabilities.push(Cow::Borrowed("OBJECTID"));
        capabilities.push(Cow::Borrowed("UIDPLUS"));

        s::CapabilityData { capabilities }
    }

    pub(super) fn insecure_auth_forbidden(&self) -> bool {
        self.config.reject_insecure_auth && !self.tls_active
    }

    pub(super) async fn cmd_log_in(
        &mut self,
        cmd: s::LogInCommand<'_>,
    ) -> CmdResult {
        if self.insecure_auth_forbidden() {
            return Err(no(
                Some(s::RespTextCode::PrivacyRequired(())),
                "LOGIN is only allowed over TLS",
            ));
        }

        self.try_log_in(&Credentials {
            authzid: String::new(),
            authcid: cmd.userid.into_owned(),
            password: cmd.password.into_owned(),
        })
        .await
    }

    /// Validates an `AUTHENTICATE` command before any continuation.
    ///
    /// Returns `Some` if the command must be rejected outright, in which
    /// case the server must not read an authentication response.
    pub fn authenticate_start(
        &mut self,
        mechanism: &str,
    ) -> Option<s::Response<'static>> {
        if self.session.is_some() {
            return Some(no(
                Some(s::RespTextCode::ClientBug(())),
                "Command not allowed in the current state",
            ));
        }

        if !mechanism.eq_ignore_ascii_case("PLAIN") {
            return Some(no(None, "Unsupported authentication mechanism"));
        }

        if self.insecure_auth_forbidden() {
            return Some(no(
                Some(s::RespTextCode::PrivacyRequired(())),
                "AUTHENTICATE is only allowed over TLS",
            ));
        }

        None
    }

    /// Completes an `AUTHENTICATE PLAIN` exchange given the base64 payload
    /// (either the initial response or the continuation line).
    pub async fn authenticate_finish(
        &mut self,
        data: &[u8],
    ) -> s::Response<'static> {
        if b"*" == data {
            return bad(None, "AUTHENTICATE aborted");
        }

        // RFC 4616: [authzid] NUL authcid NUL passwd, base64-coded.
        // The SASL-IR form uses "=" for an empty initial response, which
        // PLAIN never has.
        let Ok(decoded) = base64::decode(data) else {
            return bad(None, "Bad base64");
        };

        let mut parts = decoded.split(|&b| 0 == b);
        let (Some(authzid), Some(authcid), Some(password), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return bad(None, "Malformed PLAIN response");
        };

        let credentials = Credentials {
            authzid: String::from_utf8_lossy(authzid).into_owned(),
            authcid: String::from_utf8_lossy(authcid).into_owned(),
            password: String::from_utf8_lossy(password).into_owned(),
        };

        match self.try_log_in(&credentials).await {
            Ok(response) | Err(response) => response,
        }
    }

    async fn try_log_in(
        &mut self,
        credentials: &Credentials,
    ) -> CmdResult {
        match self.login.login(credentials).await {
            Ok(session) => {
                self.session = Some(session);
                self.log_prefix.set_user(credentials.authcid.clone());
                info!("{} Login successful", self.log_prefix);
                Ok(s::Response::Cond(s::CondResponse {
                    cond: s::RespCondType::Ok,
                    code: Some(s::RespTextCode::Capability(
                        self.capability_data(),
                    )),
                    quip: Some(Cow::Borrowed("User logged in")),
                }))
            },
            Err(Error::InvalidAuthz) => {
                self.note_failed_auth();
                Err(no(
                    Some(s::RespTextCode::AuthorizationFailed(())),
                    "Authorisation identity rejected",
                ))
            },
            Err(e) => {
                info!("{} Login failed: {}", self.log_prefix, e);
                self.note_failed_auth();
                if self.bad_auths >= self.config.bad_auth_limit {
                    self.logged_out = true;
                    Err(bye("Too many failed logins"))
                } else {
                    Err(no(
                        Some(s::RespTextCode::AuthenticationFailed(())),
                        "Bad user or password",
                    ))
                }
            },
        }
    }

    fn note_failed_auth(&mut self) {
        self.bad_auths += 1;
    }
}
