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

use tokio::io::AsyncWrite;

use super::commands::flags_fetch;
use super::defs::*;
use crate::account::model::*;
use crate::account::selected::MissingUidVerdict;
use crate::backend::{LoginProvider, MailboxHandle};
use crate::imap::literal_source::LiteralSource;
use crate::imap::response_writer::ResponseWriter;
use crate::support::error::Error;

impl<L: LoginProvider> CommandProcessor<L> {
    pub(super) async fn cmd_fetch<W: AsyncWrite + Unpin>(
        &mut self,
        cmd: s::FetchCommand<'_>,
        w: &mut ResponseWriter<W>,
        uid: bool,
    ) -> CmdResult {
        let uids = self.resolve_ids(&cmd.sequence_set, uid)?;

        let atts: Vec<s::FetchAtt<'_>> = match cmd.target {
            s::FetchCommandTarget::All(()) => vec![
                s::FetchAtt::Flags(()),
                s::FetchAtt::InternalDate(()),
                s::FetchAtt::Rfc822(Some(s::FetchAttRfc822::Size)),
                s::FetchAtt::Envelope(()),
            ],
            s::FetchCommandTarget::Fast(()) => vec![
                s::FetchAtt::Flags(()),
                s::FetchAtt::InternalDate(()),
                s::FetchAtt::Rfc822(Some(s::FetchAttRfc822::Size)),
            ],
            s::FetchCommandTarget::Full(()) => vec![
                s::FetchAtt::Flags(()),
                s::FetchAtt::InternalDate(()),
                s::FetchAtt::Rfc822(Some(s::FetchAttRfc822::Size)),
                s::FetchAtt::Envelope(()),
                s::FetchAtt::ShortBodyStructure(()),
            ],
            s::FetchCommandTarget::Single(att) => vec![att],
            s::FetchCommandTarget::Multi(atts) => atts,
        };

        let fetches_body = atts.iter().any(|att| match *att {
            s::FetchAtt::Body(ref body) => !body.peek,
            s::FetchAtt::Binary(ref binary) => !binary.peek,
            s::FetchAtt::Rfc822(None)
            | s::FetchAtt::Rfc822(Some(s::FetchAttRfc822::Text)) => true,
            _ => false,
        });

        let mut missing = false;
        let mut implicit_seen = SeqRange::<Uid>::new();

        for uid_item in uids.items(u32::MAX) {
            let selected = selected!(self)?;
            let Some(seqnum) = selected.view.uid_to_seqnum(uid_item) else {
                // Only possible for UID FETCH; unknown UIDs are ignored.
                continue;
            };

            let data = match selected.mailbox.fetch(uid_item).await {
                Ok(data) => data,
                Err(Error::ExpungedMessage) | Err(Error::NxMessage) => {
                    // RFC 2180 §4.1.2 with a loop-breaker: NO the first
                    // time, BYE if the client retries before the next
                    // poll.
                    match selected.view.note_missing(uid_item) {
                        MissingUidVerdict::No => {
                            missing = true;
                            continue;
                        },
                        MissingUidVerdict::Bye => {
                            self.logged_out = true;
                            return Err(bye(
                                "Repeated fetch of expunged message",
                            ));
                        },
                    }
                },
                Err(e) => {
                    return Err(Self::catch_all_error_handling(
                        &self.log_prefix,
                        e,
                    ))
                },
            };

            if fetches_body
                && !selected.view.read_only()
                && !data.flags.contains(&Flag::Seen)
            {
                implicit_seen.append(uid_item);
            }

            let msg_atts = self
                .build_fetch_atts(uid_item, &data, &atts, uid)
                .await?;
            w.queue_fetch(seqnum.0.get(), s::MsgAtts { atts: msg_atts })
                .map_err(|_| bye("Output failed"))?;
        }

        // FETCH BODY[...] does an implicit STORE \Seen. The flag change is
        // reported through the normal poll diff.
        if !implicit_seen.is_empty() {
            let selected = selected!(self)?;
            selected
                .mailbox
                .store(&StoreRequest {
                    ids: &implicit_seen,
                    flags: &[Flag::Seen],
                    remove_listed: false,
                    remove_unlisted: false,
                })
                .await
                .map_err(map_error!(self))?;
        }

        if missing {
            Err(no(None, "Some of those messages no longer exist"))
        } else {
            Ok(ok(None, "FETCH completed"))
        }
    }

    async fn build_fetch_atts(
        &mut self,
        uid: Uid,
        data: &MessageData,
        atts: &[s::FetchAtt<'_>],
        uid_mode: bool,
    ) -> PartialResult<Vec<s::MsgAtt<'static>>> {
        let mut out = Vec::<s::MsgAtt<'static>>::new();

        // RFC 3501 requires the UID item on every UID FETCH response.
        if uid_mode {
            out.push(s::MsgAtt::Uid(uid.0.get()));
        }

        for att in atts {
            match *att {
                s::FetchAtt::Uid(()) => {
                    if !uid_mode {
                        out.push(s::MsgAtt::Uid(uid.0.get()));
                    }
                },
                s::FetchAtt::Flags(()) => {
                    let selected = selected!(self)?;
                    out.push(s::MsgAtt::Flags(flags_fetch(
                        selected.view.flags_of(uid),
                        selected.view.is_recent(uid),
                    )));
                },
                s::FetchAtt::InternalDate(()) => {
                    out.push(s::MsgAtt::InternalDate(data.internal_date));
                },
                s::FetchAtt::EmailId(()) => {
                    out.push(s::MsgAtt::EmailId(Cow::Owned(
                        data.email_id.clone(),
                    )));
                },
                s::FetchAtt::Envelope(()) => {
                    out.push(s::MsgAtt::Envelope(envelope_syntax(
                        &data.envelope,
                    )));
                },
                s::FetchAtt::ShortBodyStructure(()) => {
                    out.push(s::MsgAtt::ShortBodyStructure(body_syntax(
                        &data.body_structure,
                        false,
                    )));
                },
                s::FetchAtt::ExtendedBodyStructure(()) => {
                    out.push(s::MsgAtt::ExtendedBodyStructure(body_syntax(
                        &data.body_structure,
                        true,
                    )));
                },
                s::FetchAtt::Rfc822(None) => {
                    out.push(s::MsgAtt::Rfc822Full(LiteralSource::of_data(
                        &data.content,
                        false,
                    )));
                },
                s::FetchAtt::Rfc822(Some(s::FetchAttRfc822::Size)) => {
                    out.push(s::MsgAtt::Rfc822Size(data.size));
                },
                s::FetchAtt::Rfc822(Some(s::FetchAttRfc822::Header)) => {
                    let section = BodySection {
                        subscripts: vec![],
                        kind: SectionKind::Header,
                        partial: None,
                    };
                    let bytes = self.fetch_section(uid, &section).await?;
                    out.push(s::MsgAtt::Rfc822Header(
                        LiteralSource::of_data(&bytes, false),
                    ));
                },
                s::FetchAtt::Rfc822(Some(s::FetchAttRfc822::Text)) => {
                    let section = BodySection {
                        subscripts: vec![],
                        kind: SectionKind::Text,
                        partial: None,
                    };
                    let bytes = self.fetch_section(uid, &section).await?;
                    out.push(s::MsgAtt::Rfc822Text(LiteralSource::of_data(
                        &bytes, false,
                    )));
                },
                s::FetchAtt::Body(ref body) => {
                    let section = section_model(
                        body.section.as_ref(),
                        body.slice.as_ref(),
                    );
                    let bytes = self.fetch_section(uid, &section).await?;
                    let bytes = apply_partial(bytes, section.partial);
                    out.push(s::MsgAtt::Body(s::MsgAttBody {
                        section: body.section.as_ref().map(own_section),
                        slice_origin: section
                            .partial
                            .map(|(start, _)| start),
                        data: LiteralSource::of_data(&bytes, false),
                    }));
                },
                s::FetchAtt::Binary(ref binary) => {
                    let section = BodySection {
                        subscripts: binary.section.clone(),
                        kind: if binary.section.is_empty() {
                            SectionKind::Full
                        } else {
                            SectionKind::Text
                        },
                        partial: binary
                            .slice
                            .as_ref()
                            .map(|s| (s.start, s.length)),
                    };
                    let bytes = self.fetch_section(uid, &section).await?;
                    let bytes = apply_partial(bytes, section.partial);
                    out.push(s::MsgAtt::Binary(s::MsgAttBinary {
                        section: binary.section.clone(),
                        data: LiteralSource::of_data(&bytes, true),
                    }));
                },
            }
        }

        Ok(out)
    }

    async fn fetch_section(
        &mut self,
        uid: Uid,
        section: &BodySection,
    ) -> PartialResult<Vec<u8>> {
        let selected = selected!(self)?;
        selected
            .mailbox
            .section(uid, section)
            .await
            .map_err(map_error!(self))
            // A section that doesn't exist fetches as the empty string;
            // the general consensus is that this is kinder than NIL.
            .map(Option::unwrap_or_default)
    }
}

fn apply_partial(
    bytes: Vec<u8>,
    partial: Option<(u32, u32)>,
) -> Vec<u8> {
    let Some((start, length)) = partial else {
        return bytes;
    };

    let start = (start as usize).min(bytes.len());
    let end = (start + length as usize).min(bytes.len());
    bytes[start..end].to_vec()
}

/// Translate a wire section spec into the backend model.
fn section_model(
    section: Option<&s::SectionSpec<'_>>,
    slice: Option<&s::FetchAttBodySlice>,
) -> BodySection {
    let partial = slice.map(|s| (s.start, s.length));
    let Some(section) = section else {
        return BodySection {
            subscripts: vec![],
            kind: SectionKind::Full,
            partial,
        };
    };

    let (subscripts, text) = match *section {
        s::SectionSpec::TopLevel(ref text) => (vec![], Some(text)),
        s::SectionSpec::Sub(ref sub) => {
            (sub.subscripts.clone(), sub.text.as_ref())
        },
    };

    let kind = match text {
        None => SectionKind::Full,
        Some(&s::SectionText::Header(())) => SectionKind::Header,
        Some(&s::SectionText::Text(())) => SectionKind::Text,
        Some(&s::SectionText::Mime(())) => SectionKind::Mime,
        Some(&s::SectionText::HeaderFields(ref fields)) => {
            SectionKind::HeaderFields {
                negative: fields.negative,
                headers: fields
                    .headers
                    .iter()
                    .map(|h| h.clone().into_owned())
                    .collect(),
            }
        },
    };

    BodySection {
        subscripts,
        kind,
        partial,
    }
}

fn own_section(section: &s::SectionSpec<'_>) -> s::SectionSpec<'static> {
    match *section {
        s::SectionSpec::TopLevel(ref text) => {
            s::SectionSpec::TopLevel(own_section_text(text))
        },
        s::SectionSpec::Sub(ref sub) => {
            s::SectionSpec::Sub(s::SubSectionSpec {
                subscripts: sub.subscripts.clone(),
                text: sub.text.as_ref().map(own_section_text),
            })
        },
    }
}

fn own_section_text(
    text: &s::SectionText<'_>,
) -> s::SectionText<'static> {
    match *text {
        s::SectionText::Header(()) => s::SectionText::Header(()),
        s::SectionText::Text(()) => s::SectionText::Text(()),
        s::SectionText::Mime(()) => s::SectionText::Mime(()),
        s::SectionText::HeaderFields(ref fields) => {
            s::SectionText::HeaderFields(s::SectionTextHeaderField {
                negative: fields.negative,
                headers: fields
                    .headers
                    .iter()
                    .map(|h| Cow::Owned(h.clone().into_owned()))
                    .collect(),
            })
        },
    }
}

fn envelope_syntax(envelope: &EnvelopeData) -> s::Envelope<'static> {
    fn addresses(list: &[AddressData]) -> Vec<s::Address<'static>> {
        list.iter()
            .map(|a| s::Address {
                display_name: a
                    .display_name
                    .as_ref()
                    .map(|n| Cow::Owned(n.clone())),
                routing: None,
                local_part: Some(Cow::Owned(a.local_part.clone())),
                domain: Some(Cow::Owned(a.domain.clone())),
            })
            .collect()
    }

    fn ns(value: &Option<String>) -> Option<Cow<'static, str>> {
        value.as_ref().map(|v| Cow::Owned(v.clone()))
    }

    s::Envelope {
        date: ns(&envelope.date),
        subject: ns(&envelope.subject),
        from: addresses(&envelope.from),
        sender: addresses(&envelope.sender),
        reply_to: addresses(&envelope.reply_to),
        to: addresses(&envelope.to),
        cc: addresses(&envelope.cc),
        bcc: addresses(&envelope.bcc),
        in_reply_to: ns(&envelope.in_reply_to),
        message_id: ns(&envelope.message_id),
    }
}

fn body_syntax(
    structure: &BodyStructureData,
    extended: bool,
) -> s::Body<'static> {
    match *structure {
        BodyStructureData::SinglePart {
            ref media_type,
            ref media_subtype,
            ref content_type_parms,
            ref content_id,
            ref content_description,
            ref content_transfer_encoding,
            size_octets,
            size_lines,
        } => {
            let body_fields = s::BodyFields {
                content_type_parms: content_type_parms
                    .iter()
                    .map(|p| Cow::Owned(p.clone()))
                    .collect(),
                content_id: content_id
                    .as_ref()
                    .map(|v| Cow::Owned(v.clone())),
                content_description: content_description
                    .as_ref()
                    .map(|v| Cow::Owned(v.clone())),
                content_transfer_encoding: Cow::Owned(
                    content_transfer_encoding.clone(),
                ),
                size_octets,
            };

            let core = match size_lines {
                Some(size_lines)
                    if media_type.eq_ignore_ascii_case("TEXT") =>
                {
                    s::ClassifiedBodyType1Part::Text(s::BodyTypeText {
                        media_subtype: Cow::Owned(media_subtype.clone()),
                        body_fields,
                        size_lines,
                    })
                },
                _ => s::ClassifiedBodyType1Part::Basic(s::BodyTypeBasic {
                    media_type: Cow::Owned(media_type.clone()),
                    media_subtype: Cow::Owned(media_subtype.clone()),
                    body_fields,
                }),
            };

            s::Body::SinglePart(s::BodyType1Part {
                core,
                ext: extended.then(|| s::BodyExt1Part {
                    md5: None,
                    content_disposition: None,
                    content_language: None,
                    content_location: None,
                }),
            })
        },

        BodyStructureData::Multipart {
            ref media_subtype,
            ref parts,
        } => s::Body::Multipart(s::BodyTypeMPart {
            bodies: parts.iter().map(|p| body_syntax(p, extended)).collect(),
            media_subtype: Cow::Owned(media_subtype.clone()),
            ext: extended.then(|| s::BodyExtMPart {
                content_type_parms: vec![],
                content_disposition: None,
                content_language: None,
                content_location: None,
            }),
        }),
    }
}
