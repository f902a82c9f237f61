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

use tokio::io::AsyncWrite;

use super::commands::flags_fetch;
use super::defs::*;
use crate::account::model::*;
use crate::backend::{LoginProvider, MailboxHandle};
use crate::imap::response_writer::ResponseWriter;
use crate::support::error::Error;

impl<L: LoginProvider> CommandProcessor<L> {
    pub(super) async fn cmd_store<W: AsyncWrite + Unpin>(
        &mut self,
        cmd: s::StoreCommand<'_>,
        w: &mut ResponseWriter<W>,
        uid: bool,
    ) -> CmdResult {
        let uids = self.resolve_ids(&cmd.sequence_set, uid)?;

        let selected = selected!(self)?;
        if selected.view.read_only() {
            return Err(no(None, "Mailbox is read-only"));
        }

        let (remove_listed, remove_unlisted) = match cmd.typ {
            s::StoreCommandType::Plus => (false, false),
            s::StoreCommandType::Minus => (true, false),
            s::StoreCommandType::Eq => (false, true),
        };

        selected
            .mailbox
            .store(&StoreRequest {
                ids: &uids,
                flags: &cmd.flags,
                remove_listed,
                remove_unlisted,
            })
            .await
            .map_err(map_error! {
                self,
                MailboxReadOnly | NxFlag => (No, None),
            })?;

        // Pull the store's effect into the view now so this command
        // controls how it is reported: a loud STORE answers with the
        // resulting flags of every addressed message, a .SILENT one with
        // nothing. Either way the update is absorbed so the poll cycle
        // doesn't repeat it; changes racing in from other sessions are left
        // for the poll to find.
        let selected = selected!(self)?;
        let poll = selected
            .mailbox
            .poll()
            .await
            .map_err(map_error!(self))?;
        selected.view.update(poll.snapshot);
        selected.view.grant_recent(&poll.recent);

        if !cmd.silent {
            for uid_item in uids.items(u32::MAX) {
                if !selected.view.is_addressable(uid_item)
                    || !selected.view.still_exists(uid_item)
                {
                    continue;
                }

                let Some(seqnum) = selected.view.uid_to_seqnum(uid_item)
                else {
                    continue;
                };

                let mut atts = Vec::new();
                if uid {
                    atts.push(s::MsgAtt::Uid(uid_item.0.get()));
                }
                atts.push(s::MsgAtt::Flags(flags_fetch(
                    selected.view.flags_of(uid_item),
                    selected.view.is_recent(uid_item),
                )));
                w.queue_fetch(seqnum.0.get(), s::MsgAtts { atts })
                    .map_err(|_| bye("Output failed"))?;
            }
        }
        selected.view.silence(uids.items(u32::MAX));

        Ok(ok(None, "STORE completed"))
    }
}
