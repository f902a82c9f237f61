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

use super::defs::*;
use crate::account::model::*;
use crate::account::selected::SelectedMailbox;
use crate::backend::{LoginProvider, MailboxHandle};
use crate::imap::response_writer::ResponseWriter;
use crate::support::error::Error;

impl<L: LoginProvider> CommandProcessor<L> {
    pub(super) async fn cmd_search<W: AsyncWrite + Unpin>(
        &mut self,
        cmd: s::SearchCommand<'_>,
        w: &mut ResponseWriter<W>,
        uid: bool,
    ) -> CmdResult {
        if let Some(ref charset) = cmd.charset {
            if !charset.eq_ignore_ascii_case("US-ASCII")
                && !charset.eq_ignore_ascii_case("UTF-8")
            {
                return Err(no(
                    Some(s::RespTextCode::BadCharset(())),
                    "Unsupported charset",
                ));
            }
        }

        let selected = selected!(self)?;
        if uid {
            selected.view.hide_expunged();
        }

        let mut queries = Vec::with_capacity(cmd.keys.len());
        for key in &cmd.keys {
            queries.push(translate_key(&selected.view, key)?);
        }

        let hits = selected
            .mailbox
            .search(&SearchRequest { queries })
            .await
            .map_err(map_error! {
                self,
                BadCharset => (No, Some(s::RespTextCode::BadCharset(()))),
            })?;

        let selected = selected!(self)?;
        let numbers: Vec<u32> = if uid {
            hits.iter()
                .filter(|&&hit| selected.view.is_addressable(hit))
                .map(|&hit| hit.0.get())
                .collect()
        } else {
            hits.iter()
                .filter_map(|&hit| selected.view.uid_to_seqnum(hit))
                .map(|seqnum| seqnum.0.get())
                .collect()
        };

        w.send_untagged(s::Response::Search(numbers))
            .map_err(|_| bye("Output failed"))?;
        Ok(ok(None, "SEARCH completed"))
    }
}

/// Lower a wire search key into the backend model, resolving everything
/// that depends on the connection's view: sequence sets, `*`, and the
/// `\Recent` session state.
fn translate_key(
    view: &SelectedMailbox,
    key: &s::SearchKey<'_>,
) -> PartialResult<SearchQuery> {
    use s::SimpleSearchKey as SS;

    let parse_error = || {
        bad(
            Some(s::RespTextCode::Parse(())),
            "Unparsable sequence set in search key",
        )
    };

    Ok(match *key {
        s::SearchKey::Simple(simple) => match simple {
            SS::All => SearchQuery::All,
            SS::Answered => SearchQuery::Answered,
            SS::Deleted => SearchQuery::Deleted,
            SS::Flagged => SearchQuery::Flagged,
            SS::Seen => SearchQuery::Seen,
            SS::Unanswered => SearchQuery::Unanswered,
            SS::Undeleted => SearchQuery::Undeleted,
            SS::Unflagged => SearchQuery::Unflagged,
            SS::Unseen => SearchQuery::Unseen,
            SS::Draft => SearchQuery::Draft,
            SS::Undraft => SearchQuery::Undraft,
            SS::Recent => SearchQuery::UidSet(recent_set(view)),
            SS::Old => SearchQuery::Not(Box::new(SearchQuery::UidSet(
                recent_set(view),
            ))),
            SS::New => SearchQuery::And(vec![
                SearchQuery::UidSet(recent_set(view)),
                SearchQuery::Unseen,
            ]),
        },

        s::SearchKey::Text(ref text) => {
            let value = text.value.clone().into_owned();
            match text.typ {
                s::TextSearchKeyType::Bcc => SearchQuery::Bcc(value),
                s::TextSearchKeyType::Body => SearchQuery::Body(value),
                s::TextSearchKeyType::Cc => SearchQuery::Cc(value),
                s::TextSearchKeyType::From => SearchQuery::From(value),
                s::TextSearchKeyType::Subject => {
                    SearchQuery::Subject(value)
                },
                s::TextSearchKeyType::Text => SearchQuery::Text(value),
                s::TextSearchKeyType::To => SearchQuery::To(value),
            }
        },

        s::SearchKey::Date(ref date) => match date.typ {
            s::DateSearchKeyType::Before => SearchQuery::Before(date.date),
            s::DateSearchKeyType::On => SearchQuery::On(date.date),
            s::DateSearchKeyType::Since => SearchQuery::Since(date.date),
            s::DateSearchKeyType::SentBefore => {
                SearchQuery::SentBefore(date.date)
            },
            s::DateSearchKeyType::SentOn => SearchQuery::SentOn(date.date),
            s::DateSearchKeyType::SentSince => {
                SearchQuery::SentSince(date.date)
            },
        },

        s::SearchKey::Keyword(ref flag) => {
            SearchQuery::Keyword(flag.to_string())
        },
        s::SearchKey::Unkeyword(ref flag) => {
            SearchQuery::Unkeyword(flag.to_string())
        },
        s::SearchKey::Header(ref header) => SearchQuery::Header(
            header.header.clone().into_owned(),
            header.value.clone().into_owned(),
        ),
        s::SearchKey::Larger(size) => SearchQuery::Larger(size),
        s::SearchKey::Smaller(size) => SearchQuery::Smaller(size),
        s::SearchKey::Not(ref inner) => {
            SearchQuery::Not(Box::new(translate_key(view, inner)?))
        },
        s::SearchKey::Or(ref or) => SearchQuery::Or(
            Box::new(translate_key(view, &or.a)?),
            Box::new(translate_key(view, &or.b)?),
        ),
        s::SearchKey::Uid(ref raw) => SearchQuery::UidSet(
            SeqRange::parse(raw, view.uid_splat())
                .ok_or_else(parse_error)?,
        ),
        s::SearchKey::Seqnum(ref raw) => {
            let max = view.max_seqnum().unwrap_or(Seqnum::MIN);
            let seqnums =
                SeqRange::parse(raw, max).ok_or_else(parse_error)?;
            SearchQuery::UidSet(view.seqnum_range_to_uid(&seqnums))
        },
        s::SearchKey::And(ref keys) => {
            let mut queries = Vec::with_capacity(keys.len());
            for key in keys {
                queries.push(translate_key(view, key)?);
            }
            SearchQuery::And(queries)
        },
    })
}

fn recent_set(view: &SelectedMailbox) -> SeqRange<Uid> {
    let mut set = SeqRange::new();
    for uid in view.recent_uids() {
        set.append(uid);
    }
    set
}
