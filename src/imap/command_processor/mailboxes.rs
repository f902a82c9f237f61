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

use log::warn;
use tokio::io::AsyncWrite;

use super::defs::*;
use crate::account::model::*;
use crate::account::selected::SelectedMailbox;
use crate::backend::{LoginProvider, MailboxHandle, Session};
use crate::imap::response_writer::ResponseWriter;
use crate::support::error::Error;

impl<L: LoginProvider> CommandProcessor<L> {
    pub(super) async fn cmd_create(
        &mut self,
        cmd: s::CreateCommand<'_>,
    ) -> CmdResult {
        let name = canonical_mailbox_name(&cmd.mailbox);
        let session = session!(self)?;
        let id = session.create(&name).await.map_err(map_error! {
            self,
            MailboxExists | UnsafeName | BadOperationOnInbox =>
                (No, Some(s::RespTextCode::AlreadyExists(()))),
        })?;

        Ok(ok(
            Some(s::RespTextCode::MailboxId(Cow::Owned(id))),
            "Mailbox created",
        ))
    }

    pub(super) async fn cmd_delete(
        &mut self,
        cmd: s::DeleteCommand<'_>,
    ) -> CmdResult {
        let name = canonical_mailbox_name(&cmd.mailbox);
        let session = session!(self)?;
        session.delete(&name).await.map_err(map_error! {
            self,
            NxMailbox => (No, Some(s::RespTextCode::Nonexistent(()))),
            UnsafeName | BadOperationOnInbox | MailboxHasInferiors =>
                (No, None),
        })?;
        success()
    }

    pub(super) async fn cmd_rename(
        &mut self,
        cmd: s::RenameCommand<'_>,
    ) -> CmdResult {
        let src = canonical_mailbox_name(&cmd.src);
        let dst = canonical_mailbox_name(&cmd.dst);
        let session = session!(self)?;
        session.rename(&src, &dst).await.map_err(map_error! {
            self,
            NxMailbox => (No, Some(s::RespTextCode::Nonexistent(()))),
            MailboxExists => (No, Some(s::RespTextCode::AlreadyExists(()))),
            UnsafeName | BadOperationOnInbox | RenameToSelf |
            RenameIntoSelf => (No, None),
        })?;
        success()
    }

    pub(super) async fn cmd_subscribe(
        &mut self,
        cmd: s::SubscribeCommand<'_>,
    ) -> CmdResult {
        let name = canonical_mailbox_name(&cmd.mailbox);
        let session = session!(self)?;
        session.subscribe(&name).await.map_err(map_error! {
            self,
            NxMailbox => (No, Some(s::RespTextCode::Nonexistent(()))),
            UnsafeName => (No, None),
        })?;
        success()
    }

    pub(super) async fn cmd_unsubscribe(
        &mut self,
        cmd: s::UnsubscribeCommand<'_>,
    ) -> CmdResult {
        let name = canonical_mailbox_name(&cmd.mailbox);
        let session = session!(self)?;
        session.unsubscribe(&name).await.map_err(map_error! {
            self,
            NxMailbox => (No, None),
        })?;
        success()
    }

    pub(super) async fn cmd_list<W: AsyncWrite + Unpin>(
        &mut self,
        cmd: s::ListCommand<'_>,
        w: &mut ResponseWriter<W>,
    ) -> CmdResult {
        // An empty pattern returns the hierarchy delimiter alone.
        if cmd.pattern.is_empty() {
            w.send_untagged(s::Response::List(s::MailboxList {
                flags: vec![Cow::Borrowed("\\Noselect")],
                name: Cow::Borrowed(""),
            }))
            .map_err(|_| bye("Output failed"))?;
            return success();
        }

        let request = ListRequest {
            reference: cmd.reference.into_owned(),
            pattern: cmd.pattern.into_owned(),
            select_subscribed: false,
        };
        let responses = session!(self)?
            .list(&request)
            .await
            .map_err(map_error!(self))?;

        for response in responses {
            w.send_untagged(s::Response::List(mailbox_list(response)))
                .map_err(|_| bye("Output failed"))?;
        }
        success()
    }

    pub(super) async fn cmd_lsub<W: AsyncWrite + Unpin>(
        &mut self,
        cmd: s::LsubCommand<'_>,
        w: &mut ResponseWriter<W>,
    ) -> CmdResult {
        let request = ListRequest {
            reference: cmd.reference.into_owned(),
            pattern: cmd.pattern.into_owned(),
            select_subscribed: true,
        };
        let responses = session!(self)?
            .list(&request)
            .await
            .map_err(map_error!(self))?;

        for response in responses {
            w.send_untagged(s::Response::Lsub(mailbox_list(response)))
                .map_err(|_| bye("Output failed"))?;
        }
        success()
    }

    pub(super) async fn cmd_status<W: AsyncWrite + Unpin>(
        &mut self,
        cmd: s::StatusCommand<'_>,
        w: &mut ResponseWriter<W>,
    ) -> CmdResult {
        let request = StatusRequest {
            name: canonical_mailbox_name(&cmd.mailbox),
            messages: cmd.atts.contains(&s::StatusAtt::Messages),
            recent: cmd.atts.contains(&s::StatusAtt::Recent),
            uidnext: cmd.atts.contains(&s::StatusAtt::UidNext),
            uidvalidity: cmd.atts.contains(&s::StatusAtt::UidValidity),
            unseen: cmd.atts.contains(&s::StatusAtt::Unseen),
        };

        let response = session!(self)?
            .status(&request)
            .await
            .map_err(map_error! {
                self,
                NxMailbox => (No, Some(s::RespTextCode::Nonexistent(()))),
                UnsafeName => (No, None),
            })?;

        let mut atts = Vec::new();
        if let Some(messages) = response.messages {
            atts.push(s::StatusRespAtt::Messages(messages as u32));
        }
        if let Some(recent) = response.recent {
            atts.push(s::StatusRespAtt::Recent(recent as u32));
        }
        if let Some(uidnext) = response.uidnext {
            atts.push(s::StatusRespAtt::UidNext(uidnext));
        }
        if let Some(uidvalidity) = response.uidvalidity {
            atts.push(s::StatusRespAtt::UidValidity(uidvalidity));
        }
        if let Some(unseen) = response.unseen {
            atts.push(s::StatusRespAtt::Unseen(unseen as u32));
        }

        w.send_untagged(s::Response::Status(s::StatusData {
            mailbox: Cow::Owned(response.name),
            atts,
        }))
        .map_err(|_| bye("Output failed"))?;
        success()
    }

    /// Common implementation of `SELECT` and `EXAMINE`.
    pub(super) async fn select<W: AsyncWrite + Unpin>(
        &mut self,
        mailbox: &str,
        w: &mut ResponseWriter<W>,
        read_only: bool,
    ) -> CmdResult {
        // SELECT and EXAMINE cleanly discard any currently selected mailbox
        // regardless of whether they succeed. No EXPUNGE responses are
        // emitted for the old state.
        self.selected = None;

        let name = canonical_mailbox_name(mailbox);
        let init = session!(self)?
            .select(&name, read_only)
            .await
            .map_err(map_error! {
                self,
                NxMailbox => (No, Some(s::RespTextCode::Nonexistent(()))),
                UnsafeName => (No, None),
            })?;

        let mut view = SelectedMailbox::new(name, read_only, init.snapshot);
        view.grant_recent(&init.recent);
        view.note_reported_recent();

        let send = |w: &mut ResponseWriter<W>,
                    r: s::Response<'static>|
         -> PartialResult<()> {
            w.send_untagged(r).map_err(|_| bye("Output failed"))
        };

        send(w, s::Response::Flags(init.flags.clone()))?;
        send(
            w,
            s::Response::Exists(view.exists() as u32),
        )?;
        send(
            w,
            s::Response::Recent(view.recent_count() as u32),
        )?;
        if let Some(unseen) = view.first_unseen() {
            send(
                w,
                s::Response::Cond(s::CondResponse {
                    cond: s::RespCondType::Ok,
                    code: Some(s::RespTextCode::Unseen(unseen.0.get())),
                    quip: None,
                }),
            )?;
        }
        send(
            w,
            s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::Ok,
                code: Some(s::RespTextCode::PermanentFlags(
                    if init.writable { init.flags } else { vec![] },
                    init.writable,
                )),
                quip: None,
            }),
        )?;
        send(
            w,
            s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::Ok,
                code: Some(s::RespTextCode::UidNext(view.uidnext())),
                quip: None,
            }),
        )?;
        send(
            w,
            s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::Ok,
                code: Some(s::RespTextCode::UidValidity(
                    view.uid_validity(),
                )),
                quip: None,
            }),
        )?;
        send(
            w,
            s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::Ok,
                code: Some(s::RespTextCode::MailboxId(Cow::Owned(
                    init.mailbox_id,
                ))),
                quip: None,
            }),
        )?;

        self.selected = Some(Selected {
            view,
            mailbox: init.mailbox,
        });

        Ok(ok(
            Some(if read_only {
                s::RespTextCode::ReadOnly(())
            } else {
                s::RespTextCode::ReadWrite(())
            }),
            "Selected mailbox.",
        ))
    }

    pub(super) async fn cmd_close(&mut self) -> CmdResult {
        let _ = selected!(self)?;
        if let Some(mut selected) = self.selected.take() {
            if !selected.view.read_only() {
                // Implicit silent expunge; failure doesn't fail the CLOSE.
                if let Err(e) = selected.mailbox.expunge(None).await {
                    warn!(
                        "{} Implicit EXPUNGE failed: {}",
                        self.log_prefix, e
                    );
                }
            }
        }

        success()
    }
}

fn mailbox_list(response: ListResponse) -> s::MailboxList<'static> {
    s::MailboxList {
        flags: response
            .attributes
            .into_iter()
            .map(|a| Cow::Borrowed(a.name()))
            .collect(),
        name: Cow::Owned(response.name),
    }
}
