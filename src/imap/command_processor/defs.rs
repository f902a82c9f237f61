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
use std::sync::Arc;

use log::error;

use crate::account::selected::SelectedMailbox;
use crate::backend::{LoginProvider, Session};
use crate::support::{
    error::Error, log_prefix::LogPrefix, system_config::SystemConfig,
};

pub(super) use crate::imap::syntax as s;

pub(super) static TAGLINE: &str = concat!(
    "Any backend you like, as long as it speaks IMAP (",
    env!("CARGO_PKG_NAME"),
    " ",
    env!("CARGO_PKG_VERSION"),
    " ready)"
);

/// Receives commands in the raw AST defined in the `syntax` module and emits
/// responses in that same model.
///
/// While primarily a translation layer between the wire grammar and the
/// backend traits, it also owns the connection-level IMAP state machine
/// (not-authenticated, authenticated, selected, logged out), the selected
/// mailbox view, and the cases where one IMAP command does multiple distinct
/// actions (`FETCH BODY[]` does an implicit `STORE`, `CLOSE` an implicit
/// `EXPUNGE`).
pub struct CommandProcessor<L: LoginProvider> {
    pub(super) log_prefix: LogPrefix,
    pub(super) config: Arc<SystemConfig>,
    pub(super) login: L,

    pub(super) session: Option<L::Session>,
    pub(super) selected: Option<Selected<L>>,
    pub(super) multiappend: Option<Multiappend>,

    pub(super) tls_active: bool,
    pub(super) logged_out: bool,
    pub(super) bad_auths: u32,
}

/// The selected-mailbox pair: the connection-owned view and the backend
/// handle it mirrors.
pub(super) struct Selected<L: LoginProvider> {
    pub(super) view: SelectedMailbox,
    pub(super) mailbox: <L::Session as Session>::Mailbox,
}

pub(super) struct Multiappend {
    pub(super) mailbox: String,
    pub(super) items: Vec<crate::account::model::AppendItem>,
}

/// Used for the convenient `?` operator. `Ok` and `Err` are mostly not
/// distinguished; the contained value is sent down the wire either way,
/// though on `Err` no polling happens.
pub(super) type CmdResult = Result<s::Response<'static>, s::Response<'static>>;

/// Return value from an operation that can either succeed with a value or
/// fail with an IMAP response.
pub(super) type PartialResult<T> = Result<T, s::Response<'static>>;

macro_rules! map_error {
    ($this:expr) => {
        |e| Self::catch_all_error_handling(&$this.log_prefix, e)
    };

    ($this:expr, $($($kind:ident)|+ => ($cond:ident, $code:expr),)+) => {
        |e| match e {
            $($(Error::$kind)|* => s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::$cond,
                code: $code,
                quip: Some(std::borrow::Cow::Owned(e.to_string())),
            }),)*
            e => Self::catch_all_error_handling(&$this.log_prefix, e),
        }
    };
}

macro_rules! session {
    ($this:expr) => {
        $this.session.as_mut().ok_or_else(|| {
            s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::No,
                code: Some(s::RespTextCode::ClientBug(())),
                quip: Some(std::borrow::Cow::Borrowed("Not logged in")),
            })
        })
    };
}

macro_rules! selected {
    ($this:expr) => {
        $this.selected.as_mut().ok_or_else(|| {
            s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::No,
                code: Some(s::RespTextCode::ClientBug(())),
                quip: Some(std::borrow::Cow::Borrowed(
                    "No mailbox selected",
                )),
            })
        })
    };
}

impl<L: LoginProvider> CommandProcessor<L> {
    pub fn new(
        log_prefix: LogPrefix,
        config: Arc<SystemConfig>,
        login: L,
    ) -> Self {
        CommandProcessor {
            log_prefix,
            config,
            login,
            session: None,
            selected: None,
            multiappend: None,
            tls_active: false,
            logged_out: false,
            bad_auths: 0,
        }
    }

    pub fn logged_out(&self) -> bool {
        self.logged_out
    }

    pub fn log_prefix(&self) -> &LogPrefix {
        &self.log_prefix
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_selected(&self) -> bool {
        self.selected.is_some()
    }

    /// Note that the transport completed a TLS handshake; the capability
    /// set changes accordingly.
    pub fn set_tls_active(&mut self) {
        self.tls_active = true;
    }

    pub fn tls_active(&self) -> bool {
        self.tls_active
    }

    /// The change event of the selected mailbox, for `IDLE`.
    pub fn idle_event(&self) -> Option<crate::support::event::Event> {
        use crate::backend::MailboxHandle;
        self.selected
            .as_ref()
            .map(|sel| sel.mailbox.change_event())
    }

    pub(super) fn catch_all_error_handling(
        log_prefix: &LogPrefix,
        e: Error,
    ) -> s::Response<'static> {
        error!("{} Unhandled internal error: {}", log_prefix, e);
        s::Response::Cond(s::CondResponse {
            cond: s::RespCondType::No,
            code: Some(s::RespTextCode::ServerBug(())),
            quip: Some(Cow::Borrowed(
                "Unexpected error; check server logs for details",
            )),
        })
    }
}

pub(super) fn success() -> CmdResult {
    Ok(s::Response::Cond(s::CondResponse {
        cond: s::RespCondType::Ok,
        code: None,
        quip: None,
    }))
}

pub(super) fn bad(
    code: Option<s::RespTextCode<'static>>,
    quip: &'static str,
) -> s::Response<'static> {
    s::Response::Cond(s::CondResponse {
        cond: s::RespCondType::Bad,
        code,
        quip: Some(Cow::Borrowed(quip)),
    })
}

pub(super) fn no(
    code: Option<s::RespTextCode<'static>>,
    quip: &'static str,
) -> s::Response<'static> {
    s::Response::Cond(s::CondResponse {
        cond: s::RespCondType::No,
        code,
        quip: Some(Cow::Borrowed(quip)),
    })
}

pub(super) fn ok(
    code: Option<s::RespTextCode<'static>>,
    quip: &'static str,
) -> s::Response<'static> {
    s::Response::Cond(s::CondResponse {
        cond: s::RespCondType::Ok,
        code,
        quip: Some(Cow::Borrowed(quip)),
    })
}

pub(super) fn bye(quip: &'static str) -> s::Response<'static> {
    s::Response::Cond(s::CondResponse {
        cond: s::RespCondType::Bye,
        code: None,
        quip: Some(Cow::Borrowed(quip)),
    })
}
