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
use std::io;

use log::error;
use tokio::io::AsyncWrite;

use super::defs::*;
use crate::account::model::Flag;
use crate::account::selected::ViewUpdate;
use crate::backend::{LoginProvider, MailboxHandle};
use crate::imap::response_writer::ResponseWriter;
use crate::support::error::Error;

impl<L: LoginProvider> CommandProcessor<L> {
    /// Send the greeting line.
    ///
    /// Returns false if the connection cannot proceed (a configured
    /// preauthenticated identity that the backend rejects).
    pub async fn greet<W: AsyncWrite + Unpin>(
        &mut self,
        w: &mut ResponseWriter<W>,
    ) -> io::Result<bool> {
        let preauth_user = self.config.preauth_user.clone();
        let cond = if let Some(user) = preauth_user {
            match self.login.preauth(&user).await {
                Ok(session) => {
                    self.session = Some(session);
                    self.log_prefix.set_user(user);
                    s::RespCondType::Preauth
                },
                Err(e) => {
                    error!(
                        "{} Preauth as configured user failed: {}",
                        self.log_prefix, e
                    );
                    w.send_untagged(bye("Configured identity unavailable"))?;
                    return Ok(false);
                },
            }
        } else {
            s::RespCondType::Ok
        };

        w.send_untagged(s::Response::Cond(s::CondResponse {
            cond,
            code: Some(s::RespTextCode::Capability(self.capability_data())),
            quip: Some(Cow::Borrowed(TAGLINE)),
        }))?;
        Ok(true)
    }

    /// Handles a regular command, i.e., one that the protocol level does
    /// not give special treatment to.
    ///
    /// Secondary responses go through `w`. The returned line is the final,
    /// tagged response; if its condition is `BYE` the connection will be
    /// closed after sending it.
    pub async fn handle_command<'a, W: AsyncWrite + Unpin>(
        &mut self,
        command_line: s::CommandLine<'a>,
        w: &mut ResponseWriter<W>,
    ) -> s::ResponseLine<'a> {
        let is_uid = matches!(command_line.cmd, s::Command::Uid(..));
        // FETCH, STORE, and SEARCH (the non-UID versions) are the cursed
        // commands that don't allow us to update the sequence-number
        // mapping in response.
        let allow_full_poll = !matches!(
            command_line.cmd,
            s::Command::Fetch(..)
                | s::Command::Store(..)
                | s::Command::Search(..)
        );

        if !self.command_allowed(&command_line.cmd) {
            return s::ResponseLine {
                tag: Some(command_line.tag),
                response: no(
                    Some(s::RespTextCode::ClientBug(())),
                    "Command not allowed in the current state",
                ),
            };
        }

        let res = match command_line.cmd {
            s::Command::Simple(s::SimpleCommand::Capability) => {
                self.cmd_capability(w)
            },
            s::Command::Simple(s::SimpleCommand::Check) => {
                self.cmd_check().await
            },
            s::Command::Simple(s::SimpleCommand::Close) => {
                self.cmd_close().await
            },
            s::Command::Simple(s::SimpleCommand::Expunge) => {
                self.cmd_expunge().await
            },
            s::Command::Simple(s::SimpleCommand::Idle) => {
                panic!("IDLE should be dispatched by server.rs")
            },
            s::Command::Simple(s::SimpleCommand::LogOut) => {
                self.cmd_log_out(w)
            },
            s::Command::Simple(s::SimpleCommand::Noop) => {
                self.cmd_noop("NOOP OK")
            },
            s::Command::Simple(s::SimpleCommand::StartTls) => {
                self.cmd_start_tls()
            },

            s::Command::Create(cmd) => self.cmd_create(cmd).await,
            s::Command::Delete(cmd) => self.cmd_delete(cmd).await,
            s::Command::Examine(cmd) => {
                self.select(&cmd.mailbox, w, true).await
            },
            s::Command::List(cmd) => self.cmd_list(cmd, w).await,
            s::Command::Lsub(cmd) => self.cmd_lsub(cmd, w).await,
            s::Command::Rename(cmd) => self.cmd_rename(cmd).await,
            s::Command::Select(cmd) => {
                self.select(&cmd.mailbox, w, false).await
            },
            s::Command::Status(cmd) => self.cmd_status(cmd, w).await,
            s::Command::Subscribe(cmd) => self.cmd_subscribe(cmd).await,
            s::Command::Unsubscribe(cmd) => self.cmd_unsubscribe(cmd).await,
            s::Command::LogIn(cmd) => self.cmd_log_in(cmd).await,
            s::Command::Copy(cmd) => self.cmd_copy(cmd, false).await,
            s::Command::Fetch(cmd) => self.cmd_fetch(cmd, w, false).await,
            s::Command::Store(cmd) => self.cmd_store(cmd, w, false).await,
            s::Command::Search(cmd) => self.cmd_search(cmd, w, false).await,

            s::Command::Uid(s::UidCommand::Copy(cmd)) => {
                self.cmd_copy(cmd, true).await
            },
            s::Command::Uid(s::UidCommand::Fetch(cmd)) => {
                self.cmd_fetch(cmd, w, true).await
            },
            s::Command::Uid(s::UidCommand::Search(cmd)) => {
                self.cmd_search(cmd, w, true).await
            },
            s::Command::Uid(s::UidCommand::Store(cmd)) => {
                self.cmd_store(cmd, w, true).await
            },
            s::Command::Uid(s::UidCommand::Expunge(uids)) => {
                self.cmd_uid_expunge(uids).await
            },
        };

        let mut view_ok = true;
        if res.is_ok() {
            let poll_res = if allow_full_poll {
                self.full_poll(w, is_uid).await
            } else {
                self.mini_poll(w, is_uid).await
            };

            match poll_res {
                Ok(valid) => view_ok = valid,
                Err(err) => {
                    error!("{} Poll failed: {}", self.log_prefix, err);
                },
            }
        }

        if !view_ok {
            // The UID validity changed under us (or the mailbox was
            // deleted); the selected state is unusable and the only honest
            // option is to hang up.
            self.selected = None;
            self.logged_out = true;
            return s::ResponseLine {
                tag: None,
                response: bye("Mailbox no longer usable"),
            };
        }

        let res = match res {
            Ok(res) => res,
            Err(res) => res,
        };

        if matches!(
            res,
            s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::Bye,
                ..
            })
        ) {
            // BYE is never tagged
            s::ResponseLine {
                tag: None,
                response: res,
            }
        } else {
            s::ResponseLine {
                tag: Some(command_line.tag),
                response: res,
            }
        }
    }

    /// The command legality table from RFC 3501 §6.
    ///
    /// `APPEND`, `AUTHENTICATE`, and `IDLE` are gated at the protocol level
    /// before their continuations begin.
    fn command_allowed(&self, cmd: &s::Command<'_>) -> bool {
        use s::Command as C;
        use s::SimpleCommand as SC;

        let authenticated = self.session.is_some();
        let selected = self.selected.is_some();

        match *cmd {
            C::Simple(SC::Capability)
            | C::Simple(SC::Noop)
            | C::Simple(SC::LogOut) => true,

            C::Simple(SC::StartTls) | C::LogIn(..) => !authenticated,

            C::Create(..)
            | C::Delete(..)
            | C::Examine(..)
            | C::List(..)
            | C::Lsub(..)
            | C::Rename(..)
            | C::Select(..)
            | C::Status(..)
            | C::Subscribe(..)
            | C::Unsubscribe(..) => authenticated,

            C::Simple(SC::Check)
            | C::Simple(SC::Close)
            | C::Simple(SC::Expunge)
            | C::Simple(SC::Idle)
            | C::Copy(..)
            | C::Fetch(..)
            | C::Store(..)
            | C::Search(..)
            | C::Uid(..) => selected,
        }
    }

    /// Whether `APPEND` is legal right now (checked by the server before it
    /// engages the literal flow).
    pub fn append_allowed(&self) -> bool {
        self.session.is_some()
    }

    /// Whether `IDLE` is legal right now.
    pub fn idle_allowed(&self) -> bool {
        self.selected.is_some() && !self.config.disable_idle
    }

    fn cmd_capability<W: AsyncWrite + Unpin>(
        &mut self,
        w: &mut ResponseWriter<W>,
    ) -> CmdResult {
        w.send_untagged(s::Response::Capability(self.capability_data()))
            .map_err(|_| bye("Output failed"))?;
        success()
    }

    fn cmd_noop(&mut self, quip: &'static str) -> CmdResult {
        // Nothing to do here; shared command processing takes care of the
        // actual poll operation.
        Ok(ok(None, quip))
    }

    async fn cmd_check(&mut self) -> CmdResult {
        let selected = selected!(self)?;
        selected.mailbox.check().await.map_err(map_error!(self))?;
        Ok(ok(None, "Nothing exciting"))
    }

    fn cmd_log_out<W: AsyncWrite + Unpin>(
        &mut self,
        w: &mut ResponseWriter<W>,
    ) -> CmdResult {
        self.selected = None;
        self.session = None;
        self.logged_out = true;

        // RFC 3501 requires the OK to come *after* the BYE.
        w.send_untagged(bye("Logging out."))
            .map_err(|_| bye("Output failed"))?;
        Ok(ok(None, "Logout successful."))
    }

    fn cmd_start_tls(&mut self) -> CmdResult {
        // The success path is handled by server.rs before dispatch; getting
        // here means the upgrade is not available.
        if self.tls_active {
            Err(bad(None, "Already using TLS"))
        } else {
            Err(no(None, "STARTTLS not available"))
        }
    }

    /// Full poll and flush of untagged updates, for the flows the server
    /// drives directly (`APPEND`, `IDLE`). Returns false if the view
    /// became invalid.
    pub async fn poll_flush<W: AsyncWrite + Unpin>(
        &mut self,
        w: &mut ResponseWriter<W>,
    ) -> Result<bool, Error> {
        self.full_poll(w, false).await
    }

    /// Full poll cycle: pull a snapshot, diff, and emit every kind of
    /// untagged update. Returns false if the view became invalid.
    pub(super) async fn full_poll<W: AsyncWrite + Unpin>(
        &mut self,
        w: &mut ResponseWriter<W>,
        with_uid: bool,
    ) -> Result<bool, Error> {
        let Some(ref mut sel) = self.selected else {
            return Ok(true);
        };

        let poll = sel.mailbox.poll().await?;
        sel.view.update(poll.snapshot);
        sel.view.grant_recent(&poll.recent);
        let updates = sel.view.fork();
        emit_updates(w, updates, with_uid).map_err(Error::Io)
    }

    /// Restricted poll used after `FETCH`, `STORE`, and `SEARCH`: only flag
    /// updates are reported; the sequence-number mapping is left alone.
    pub(super) async fn mini_poll<W: AsyncWrite + Unpin>(
        &mut self,
        w: &mut ResponseWriter<W>,
        with_uid: bool,
    ) -> Result<bool, Error> {
        let Some(ref mut sel) = self.selected else {
            return Ok(true);
        };

        let poll = sel.mailbox.poll().await?;
        sel.view.update(poll.snapshot);
        sel.view.grant_recent(&poll.recent);
        let updates = sel.view.mini_fork();
        emit_updates(w, updates, with_uid).map_err(Error::Io)
    }
}

/// Serialise view updates. Returns false if the view reported itself
/// invalid.
pub(super) fn emit_updates<W: AsyncWrite + Unpin>(
    w: &mut ResponseWriter<W>,
    updates: Vec<ViewUpdate>,
    with_uid: bool,
) -> io::Result<bool> {
    for update in updates {
        match update {
            ViewUpdate::Expunge(seqnum) => {
                w.send_untagged(s::Response::Expunge(seqnum.0.get()))?;
            },
            ViewUpdate::Exists(n) => {
                w.send_untagged(s::Response::Exists(n))?;
            },
            ViewUpdate::Recent(n) => {
                w.send_untagged(s::Response::Recent(n))?;
            },
            ViewUpdate::Fetch {
                seqnum,
                uid,
                flags,
                recent,
            } => {
                let mut atts = Vec::new();
                if with_uid {
                    atts.push(s::MsgAtt::Uid(uid.0.get()));
                }
                atts.push(s::MsgAtt::Flags(flags_fetch(flags, recent)));
                w.queue_fetch(seqnum.0.get(), s::MsgAtts { atts })?;
            },
            ViewUpdate::InvalidSnapshot => return Ok(false),
        }
    }

    Ok(true)
}

pub(super) fn flags_fetch(
    flags: Vec<Flag>,
    recent: bool,
) -> s::FlagsFetch {
    if recent {
        s::FlagsFetch::Recent(flags)
    } else {
        s::FlagsFetch::NotRecent(flags)
    }
}
