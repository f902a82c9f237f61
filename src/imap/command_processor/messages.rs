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

use chrono::prelude::*;

use super::defs::*;
use crate::account::model::*;
use crate::backend::{LoginProvider, MailboxHandle, Session};
use crate::imap::request_reader::AppendFragmentData;
use crate::support::error::Error;

impl<L: LoginProvider> CommandProcessor<L> {
    /// Begin an `APPEND` command. The message payloads arrive through
    /// `cmd_append_item` as the server streams each literal.
    pub fn cmd_append_start(&mut self, mailbox: String) {
        self.multiappend = Some(Multiappend {
            mailbox: canonical_mailbox_name(&mailbox),
            items: Vec::new(),
        });
    }

    /// Add one fully-read message to the pending `APPEND`.
    pub fn cmd_append_item(
        &mut self,
        fragment: AppendFragmentData,
        content: Vec<u8>,
    ) {
        let append = self
            .multiappend
            .as_mut()
            .expect("cmd_append_item without cmd_append_start");
        append.items.push(AppendItem {
            flags: fragment.flags.unwrap_or_default(),
            internal_date: fragment
                .internal_date
                .unwrap_or_else(|| Utc::now().fixed_offset()),
            content: Arc::new(content),
        });
    }

    /// Commit the pending `APPEND` (all messages at once, per RFC 3502).
    pub async fn cmd_append_commit(&mut self) -> CmdResult {
        let append = self
            .multiappend
            .take()
            .expect("cmd_append_commit without cmd_append_start");

        let session = session!(self)?;
        let response = session
            .append(&append.mailbox, append.items)
            .await
            .map_err(map_error! {
                self,
                NxMailbox | UnsafeName =>
                    (No, Some(s::RespTextCode::TryCreate(()))),
                MailboxFull | AppendRejected => (No, None),
            })?;

        Ok(s::Response::Cond(s::CondResponse {
            cond: s::RespCondType::Ok,
            code: Some(s::RespTextCode::AppendUid(
                response.uid_validity,
                Cow::Owned(response.uids.to_string()),
            )),
            quip: Some(Cow::Borrowed("APPEND completed.")),
        }))
    }

    /// Abandon the pending `APPEND` after a protocol or validation error.
    pub fn cmd_append_abort(&mut self) {
        self.multiappend = None;
    }

    pub(super) async fn cmd_copy(
        &mut self,
        cmd: s::CopyCommand<'_>,
        uid: bool,
    ) -> CmdResult {
        let dst = canonical_mailbox_name(&cmd.dst);
        let uids = self.resolve_ids(&cmd.sequence_set, uid)?;

        let selected = selected!(self)?;
        if uids.is_empty() {
            // Only reachable for UID COPY whose set matched nothing; RFC
            // 4315 wants that silently accepted.
            return Ok(ok(None, "COPY completed (nothing to do)"));
        }

        let response = selected
            .mailbox
            .copy(&uids, &dst)
            .await
            .map_err(map_error! {
                self,
                NxMailbox | UnsafeName =>
                    (No, Some(s::RespTextCode::TryCreate(()))),
                MailboxFull => (No, None),
            })?;

        if response.from_uids.is_empty() {
            return Ok(ok(None, "COPY completed (nothing to do)"));
        }

        Ok(s::Response::Cond(s::CondResponse {
            cond: s::RespCondType::Ok,
            code: Some(s::RespTextCode::CopyUid(
                response.uid_validity,
                Cow::Owned(response.from_uids.to_string()),
                Cow::Owned(response.to_uids.to_string()),
            )),
            quip: Some(Cow::Borrowed("COPY completed.")),
        }))
    }

    pub(super) async fn cmd_expunge(&mut self) -> CmdResult {
        let selected = selected!(self)?;
        if selected.view.read_only() {
            return Err(no(None, "Mailbox is read-only"));
        }

        // The EXPUNGE responses themselves come from the poll cycle.
        selected
            .mailbox
            .expunge(None)
            .await
            .map_err(map_error!(self))?;
        Ok(ok(None, "EXPUNGE completed"))
    }

    pub(super) async fn cmd_uid_expunge(
        &mut self,
        uids: Cow<'_, str>,
    ) -> CmdResult {
        let uids = self.parse_uid_range(&uids)?;

        let selected = selected!(self)?;
        if selected.view.read_only() {
            return Err(no(None, "Mailbox is read-only"));
        }

        // UIDs outside the current snapshot are silently ignored (RFC 4315
        // recommendation); the backend does the same for unknown UIDs.
        selected
            .mailbox
            .expunge(Some(&uids))
            .await
            .map_err(map_error!(self))?;
        Ok(ok(None, "UID EXPUNGE completed."))
    }

    /// Resolve a raw sequence set to UIDs through the view.
    pub(super) fn resolve_ids(
        &mut self,
        raw: &str,
        uid: bool,
    ) -> PartialResult<SeqRange<Uid>> {
        if uid {
            let uids = self.parse_uid_range(raw)?;
            // Suppress expunge reporting until a safe flush point so the
            // sequence numbers in our responses stay coherent.
            selected!(self)?.view.hide_expunged();
            Ok(uids)
        } else {
            let seqnums = self.parse_seqnum_range(raw)?;
            Ok(selected!(self)?.view.seqnum_range_to_uid(&seqnums))
        }
    }

    pub(super) fn parse_seqnum_range(
        &mut self,
        raw: &str,
    ) -> PartialResult<SeqRange<Seqnum>> {
        let selected = selected!(self)?;
        let max_seqnum = selected.view.max_seqnum().unwrap_or(Seqnum::MIN);
        let seqrange =
            SeqRange::parse(raw, max_seqnum).ok_or_else(|| {
                bad(
                    Some(s::RespTextCode::Parse(())),
                    "Unparsable sequence set",
                )
            })?;

        // Not explicitly described by RFC 3501, but Crispin's reading on
        // the mailing list: a seqnum outside the current snapshot is a
        // protocol violation and merits BAD.
        if seqrange.max().unwrap_or(0)
            > selected.view.max_seqnum().map_or(0, |s| s.0.get())
        {
            return Err(bad(
                Some(s::RespTextCode::ClientBug(())),
                "Message sequence number out of range",
            ));
        }

        Ok(seqrange)
    }

    pub(super) fn parse_uid_range(
        &mut self,
        raw: &str,
    ) -> PartialResult<SeqRange<Uid>> {
        let selected = selected!(self)?;
        let splat = selected.view.uid_splat();
        SeqRange::parse(raw, splat).ok_or_else(|| {
            bad(
                Some(s::RespTextCode::Parse(())),
                "Unparsable sequence set",
            )
        })
        // The client is explicitly allowed to name UIDs out of range, so
        // there is nothing else to validate.
    }
}
