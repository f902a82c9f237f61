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

//! Code for reading and writing IMAP requests and responses.
//!
//! Most of this is written as `wire_rule!` definitions, which bind each
//! AST struct or enum to a "shape" describing its wire form; the parser
//! and the writer are both generated from the same shape, so the two can
//! never drift apart. See `grammar-macros.rs` for the shape notation.
//!
//! The code here is mainly oriented at the server. The response side can be
//! parsed back, which is what the test client uses, but it is not suitable
//! for a general-purpose client (for example, the `FLAGS` fetch item only
//! parses if `\Recent` comes first).
//!
//! `APPEND` is not handled as a whole command. This file provides the pieces
//! (`AppendCommandStart`, `AppendFragment`) and the request reader drives
//! them, since the command can be far larger than any reasonable line
//! buffer.
//!
//! Sequence sets are only recognised at the lexical level and returned as
//! strings; full interpretation requires the selected-mailbox view, so it
//! happens in the command processor via `SeqRange::parse`.

use std::borrow::Cow;
use std::io;
use std::str;

use chrono::prelude::*;
use nom::{
    branch::alt,
    bytes::complete::{is_a, is_not, tag, tag_no_case as kw},
    combinator::{map, map_opt, opt},
    *,
};

use super::lex::{LexOutput, LexWriter};
use super::literal_source::LiteralSource;
use super::utf7;
use crate::account::model::Flag;

include!("grammar-macros.rs");

// ==================== RESPONSES ====================

wire_rule! {
    [lead "CAPABILITY"]
    pub struct CapabilityData<'a> {
        capabilities: Vec<Cow<'a, str>> => (many1 (lead " " (p raw normal_atom))),
    }
}

keyword_enum! {
    pub enum RespCondType {
        Ok = "OK",
        No = "NO",
        Bad = "BAD",
        Bye = "BYE",
        Preauth = "PREAUTH",
    }
}

/// The machine-readable response codes (RFC 3501 §7.1, RFC 4315, RFC 5530,
/// RFC 7889, RFC 8474).
///
/// Too many cases for one `alt()` expansion, so the parser and writer are
/// maintained by hand.
#[derive(Debug, PartialEq, Eq)]
pub enum RespTextCode<'a> {
    Alert(()),
    AlreadyExists(()),
    AppendUid(u32, Cow<'a, str>),
    AuthenticationFailed(()),
    AuthorizationFailed(()),
    BadCharset(()),
    Capability(CapabilityData<'a>),
    ClientBug(()),
    CopyUid(u32, Cow<'a, str>, Cow<'a, str>),
    MailboxId(Cow<'a, str>),
    Nonexistent(()),
    Parse(()),
    PermanentFlags(Vec<Flag>, bool),
    PrivacyRequired(()),
    ReadOnly(()),
    ReadWrite(()),
    ServerBug(()),
    TooBig(()),
    TryCreate(()),
    UidNext(u32),
    UidValidity(u32),
    Unseen(u32),
}

impl<'a> RespTextCode<'a> {
    pub fn parse(i: &'a [u8]) -> IResult<&'a [u8], Self> {
        alt((
            alt((
                map(kw("ALERT"), |_| Self::Alert(())),
                map(kw("ALREADYEXISTS"), |_| Self::AlreadyExists(())),
                map(kw("AUTHENTICATIONFAILED"), |_| {
                    Self::AuthenticationFailed(())
                }),
                map(kw("AUTHORIZATIONFAILED"), |_| {
                    Self::AuthorizationFailed(())
                }),
                map(kw("BADCHARSET"), |_| Self::BadCharset(())),
                map(kw("CLIENTBUG"), |_| Self::ClientBug(())),
                map(kw("NONEXISTENT"), |_| Self::Nonexistent(())),
                map(kw("PARSE"), |_| Self::Parse(())),
                map(kw("PRIVACYREQUIRED"), |_| Self::PrivacyRequired(())),
                map(kw("READ-ONLY"), |_| Self::ReadOnly(())),
                map(kw("READ-WRITE"), |_| Self::ReadWrite(())),
                map(kw("SERVERBUG"), |_| Self::ServerBug(())),
                map(kw("TOOBIG"), |_| Self::TooBig(())),
                map(kw("TRYCREATE"), |_| Self::TryCreate(())),
            )),
            alt((
                map(
                    sequence::preceded(
                        kw("APPENDUID "),
                        sequence::separated_pair(number, tag(" "), sequence_set),
                    ),
                    |(validity, uids)| Self::AppendUid(validity, uids),
                ),
                map(
                    sequence::preceded(
                        kw("COPYUID "),
                        sequence::tuple((
                            number,
                            sequence::preceded(tag(" "), sequence_set),
                            sequence::preceded(tag(" "), sequence_set),
                        )),
                    ),
                    |(validity, from, to)| Self::CopyUid(validity, from, to),
                ),
                map(CapabilityData::parse, Self::Capability),
                map(
                    sequence::delimited(
                        kw("MAILBOXID ("),
                        normal_atom,
                        kw(")"),
                    ),
                    Self::MailboxId,
                ),
                permanent_flags,
                map(sequence::preceded(kw("UIDNEXT "), number), Self::UidNext),
                map(
                    sequence::preceded(kw("UIDVALIDITY "), number),
                    Self::UidValidity,
                ),
                map(sequence::preceded(kw("UNSEEN "), number), Self::Unseen),
            )),
        ))(i)
    }

    pub fn write_to(
        &mut self,
        lex: &mut LexWriter<impl LexOutput>,
    ) -> io::Result<()> {
        match *self {
            Self::Alert(()) => lex.raw("ALERT"),
            Self::AlreadyExists(()) => lex.raw("ALREADYEXISTS"),
            Self::AppendUid(validity, ref uids) => {
                lex.raw("APPENDUID ")?;
                lex.number(&validity)?;
                lex.raw(" ")?;
                lex.raw(uids)
            },
            Self::AuthenticationFailed(()) => {
                lex.raw("AUTHENTICATIONFAILED")
            },
            Self::AuthorizationFailed(()) => {
                lex.raw("AUTHORIZATIONFAILED")
            },
            Self::BadCharset(()) => lex.raw("BADCHARSET"),
            Self::Capability(ref mut caps) => caps.write_to(lex),
            Self::ClientBug(()) => lex.raw("CLIENTBUG"),
            Self::CopyUid(validity, ref from, ref to) => {
                lex.raw("COPYUID ")?;
                lex.number(&validity)?;
                lex.raw(" ")?;
                lex.raw(from)?;
                lex.raw(" ")?;
                lex.raw(to)
            },
            Self::MailboxId(ref id) => {
                lex.raw("MAILBOXID (")?;
                lex.raw(id)?;
                lex.raw(")")
            },
            Self::Nonexistent(()) => lex.raw("NONEXISTENT"),
            Self::Parse(()) => lex.raw("PARSE"),
            Self::PermanentFlags(ref flags, allow_new) => {
                lex.raw("PERMANENTFLAGS (")?;
                for (ix, flag) in flags.iter().enumerate() {
                    if 0 != ix {
                        lex.raw(" ")?;
                    }
                    lex.flag(flag)?;
                }
                if allow_new {
                    if !flags.is_empty() {
                        lex.raw(" ")?;
                    }
                    lex.raw("\\*")?;
                }
                lex.raw(")")
            },
            Self::PrivacyRequired(()) => lex.raw("PRIVACYREQUIRED"),
            Self::ReadOnly(()) => lex.raw("READ-ONLY"),
            Self::ReadWrite(()) => lex.raw("READ-WRITE"),
            Self::ServerBug(()) => lex.raw("SERVERBUG"),
            Self::TooBig(()) => lex.raw("TOOBIG"),
            Self::TryCreate(()) => lex.raw("TRYCREATE"),
            Self::UidNext(n) => {
                lex.raw("UIDNEXT ")?;
                lex.number(&n)
            },
            Self::UidValidity(n) => {
                lex.raw("UIDVALIDITY ")?;
                lex.number(&n)
            },
            Self::Unseen(n) => {
                lex.raw("UNSEEN ")?;
                lex.number(&n)
            },
        }
    }
}

fn permanent_flags(i: &[u8]) -> IResult<&[u8], RespTextCode<'_>> {
    let (i, _) = kw("PERMANENTFLAGS (")(i)?;
    let (i, flags) = multi::separated_list0(tag(" "), flag)(i)?;
    let (i, allow_new) =
        map(opt(alt((tag(" \\*"), tag("\\*")))), |o| o.is_some())(i)?;
    let (i, _) = tag(")")(i)?;
    Ok((i, RespTextCode::PermanentFlags(flags, allow_new)))
}

wire_rule! {
    []
    pub struct CondResponse<'a> {
        cond: RespCondType => (sub RespCondType),
        code: Option<RespTextCode<'a>> => (maybe (wrap " [" "]" (sub RespTextCode))),
        quip: Option<Cow<'a, str>> => (maybe (lead " " (p raw text))),
    }
}

wire_rule! {
    []
    pub struct MailboxList<'a> {
        // The hierarchy delimiter field is folded into the suffix since it
        // is always "/".
        flags: Vec<Cow<'a, str>> => (wrap "(" ") \"/\" " (list0 " " (p raw backslash_atom))),
        name: Cow<'a, str> => (p mailbox mailbox),
    }
}

wire_rule! {
    []
    pub enum StatusRespAtt {
        Messages(u32) => (lead "MESSAGES " (p number number)),
        Recent(u32) => (lead "RECENT " (p number number)),
        UidNext(u32) => (lead "UIDNEXT " (p number number)),
        UidValidity(u32) => (lead "UIDVALIDITY " (p number number)),
        Unseen(u32) => (lead "UNSEEN " (p number number)),
    }
}

wire_rule! {
    [lead "STATUS "]
    pub struct StatusData<'a> {
        mailbox: Cow<'a, str> => (trail " " (p mailbox mailbox)),
        atts: Vec<StatusRespAtt> => (wrap "(" ")" (list0 " " (sub StatusRespAtt))),
    }
}

wire_rule! {
    []
    pub struct FetchData<'a> {
        seqnum: u32 => (trail " FETCH " (p number number)),
        atts: MsgAtts<'a> => (sub MsgAtts),
    }
}

wire_rule! {
    []
    pub enum Response<'a> {
        Capability(CapabilityData<'a>) => (sub CapabilityData),
        List(MailboxList<'a>) => (lead "LIST " (sub MailboxList)),
        Lsub(MailboxList<'a>) => (lead "LSUB " (sub MailboxList)),
        Flags(Vec<Flag>) => (wrap "FLAGS (" ")" (list0 " " (p flag flag))),
        Search(Vec<u32>) => (lead "SEARCH" (many0 (lead " " (p number number)))),
        Status(StatusData<'a>) => (sub StatusData),
        Exists(u32) => (trail " EXISTS" (p number number)),
        Recent(u32) => (trail " RECENT" (p number number)),
        Expunge(u32) => (trail " EXPUNGE" (p number number)),
        Fetch(FetchData<'a>) => (sub FetchData),
        Cond(CondResponse<'a>) => (sub CondResponse),
    }
}

/// A response plus its optional tag, i.e., one full line of server output.
wire_rule! {
    []
    pub struct ResponseLine<'a> {
        tag: Option<Cow<'a, str>> => (trail " " (marked "*" (p raw tag_atom))),
        response: Response<'a> => (sub Response),
    }
}

// ==================== ENVELOPE AND BODY STRUCTURE ====================

wire_rule! {
    [wrap "(" ")"]
    pub struct Envelope<'a> {
        date: Option<Cow<'a, str>> => (trail " " (p nstring nstring)),
        subject: Option<Cow<'a, str>> => (trail " " (p nstring nstring)),
        from: Vec<Address<'a>> => (trail " " (nil_default (wrap "(" ")" (many1 (sub Address))))),
        sender: Vec<Address<'a>> => (trail " " (nil_default (wrap "(" ")" (many1 (sub Address))))),
        reply_to: Vec<Address<'a>> => (trail " " (nil_default (wrap "(" ")" (many1 (sub Address))))),
        to: Vec<Address<'a>> => (trail " " (nil_default (wrap "(" ")" (many1 (sub Address))))),
        cc: Vec<Address<'a>> => (trail " " (nil_default (wrap "(" ")" (many1 (sub Address))))),
        bcc: Vec<Address<'a>> => (trail " " (nil_default (wrap "(" ")" (many1 (sub Address))))),
        in_reply_to: Option<Cow<'a, str>> => (trail " " (p nstring nstring)),
        message_id: Option<Cow<'a, str>> => (p nstring nstring),
    }
}

wire_rule! {
    [wrap "(" ")"]
    pub struct Address<'a> {
        display_name: Option<Cow<'a, str>> => (trail " " (p nstring nstring)),
        routing: Option<Cow<'a, str>> => (trail " " (p nstring nstring)),
        local_part: Option<Cow<'a, str>> => (trail " " (p nstring nstring)),
        domain: Option<Cow<'a, str>> => (p nstring nstring),
    }
}

wire_rule! {
    [wrap "(" ")"]
    pub enum Body<'a> {
        Multipart(BodyTypeMPart<'a>) => (sub BodyTypeMPart),
        SinglePart(BodyType1Part<'a>) => (sub BodyType1Part),
    }
}

wire_rule! {
    []
    pub struct BodyTypeMPart<'a> {
        // RFC 3501 makes this 1*, disregarding the possibility of a
        // multipart with no parts; 0* represents that case as a leading
        // space, which is gross, but such is IMAP syntax.
        bodies: Vec<Body<'a>> => (trail " " (many0 (sub Body))),
        media_subtype: Cow<'a, str> => (p string string),
        ext: Option<BodyExtMPart<'a>> => (maybe (lead " " (sub BodyExtMPart))),
    }
}

wire_rule! {
    []
    pub struct BodyExtMPart<'a> {
        content_type_parms: Vec<Cow<'a, str>> => (trail " " (nil_default (wrap "(" ")" (list1 " " (p string string))))),
        content_disposition: Option<Cow<'a, str>> => (trail " " (p nstring nstring)),
        content_language: Option<Cow<'a, str>> => (trail " " (p nstring nstring)),
        content_location: Option<Cow<'a, str>> => (p nstring nstring),
    }
}

wire_rule! {
    []
    pub struct BodyType1Part<'a> {
        core: ClassifiedBodyType1Part<'a> => (sub ClassifiedBodyType1Part),
        ext: Option<BodyExt1Part<'a>> => (maybe (lead " " (sub BodyExt1Part))),
    }
}

wire_rule! {
    []
    pub enum ClassifiedBodyType1Part<'a> {
        Text(BodyTypeText<'a>) => (sub BodyTypeText),
        // Must come last so that greedy parsing has an opportunity to match
        // the TEXT content-type prefix.
        Basic(BodyTypeBasic<'a>) => (sub BodyTypeBasic),
    }
}

wire_rule! {
    []
    pub struct BodyTypeBasic<'a> {
        media_type: Cow<'a, str> => (trail " " (p string string)),
        media_subtype: Cow<'a, str> => (trail " " (p string string)),
        body_fields: BodyFields<'a> => (sub BodyFields),
    }
}

wire_rule! {
    [lead "\"TEXT\" "]
    pub struct BodyTypeText<'a> {
        media_subtype: Cow<'a, str> => (trail " " (p string string)),
        body_fields: BodyFields<'a> => (trail " " (sub BodyFields)),
        size_lines: u32 => (p number number),
    }
}

wire_rule! {
    []
    pub struct BodyFields<'a> {
        content_type_parms: Vec<Cow<'a, str>> => (trail " " (nil_default (wrap "(" ")" (list1 " " (p string string))))),
        content_id: Option<Cow<'a, str>> => (trail " " (p nstring nstring)),
        content_description: Option<Cow<'a, str>> => (trail " " (p nstring nstring)),
        content_transfer_encoding: Cow<'a, str> => (trail " " (p string string)),
        size_octets: u32 => (p number number),
    }
}

wire_rule! {
    []
    pub struct BodyExt1Part<'a> {
        md5: Option<Cow<'a, str>> => (trail " " (p nstring nstring)),
        content_disposition: Option<Cow<'a, str>> => (trail " " (p nstring nstring)),
        content_language: Option<Cow<'a, str>> => (trail " " (p nstring nstring)),
        content_location: Option<Cow<'a, str>> => (p nstring nstring),
    }
}

// ==================== FETCH ====================

wire_rule! {
    [lead "FETCH "]
    pub struct FetchCommand<'a> {
        sequence_set: Cow<'a, str> => (trail " " (p raw sequence_set)),
        target: FetchCommandTarget<'a> => (sub FetchCommandTarget),
    }
}

wire_rule! {
    []
    pub enum FetchCommandTarget<'a> {
        All(()) => (text "ALL"),
        Full(()) => (text "FULL"),
        Fast(()) => (text "FAST"),
        Single(FetchAtt<'a>) => (sub FetchAtt),
        Multi(Vec<FetchAtt<'a>>) => (wrap "(" ")" (list0 " " (sub FetchAtt))),
    }
}

wire_rule! {
    []
    pub enum FetchAtt<'a> {
        Envelope(()) => (text "ENVELOPE"),
        Flags(()) => (text "FLAGS"),
        InternalDate(()) => (text "INTERNALDATE"),
        EmailId(()) => (text "EMAILID"),
        Rfc822(Option<FetchAttRfc822>) => (lead "RFC822" (maybe (sub FetchAttRfc822))),
        Binary(FetchAttBinary) => (lead "BINARY" (sub FetchAttBinary)),
        // Must come before the body structure items to resolve the
        // ambiguity the correct way.
        Body(FetchAttBody<'a>) => (lead "BODY" (sub FetchAttBody)),
        ExtendedBodyStructure(()) => (text "BODYSTRUCTURE"),
        ShortBodyStructure(()) => (text "BODY"),
        Uid(()) => (text "UID"),
    }
}

keyword_enum! {
    pub enum FetchAttRfc822 {
        Header = ".HEADER",
        Size = ".SIZE",
        Text = ".TEXT",
    }
}

wire_rule! {
    []
    pub struct FetchAttBody<'a> {
        peek: bool => (flagged ".PEEK"),
        section: Option<SectionSpec<'a>> => (wrap "[" "]" (maybe (sub SectionSpec))),
        slice: Option<FetchAttBodySlice> => (maybe (sub FetchAttBodySlice)),
    }
}

wire_rule! {
    []
    pub struct FetchAttBinary {
        peek: bool => (flagged ".PEEK"),
        section: Vec<u32> => (wrap "[" "]" (list0 "." (p number number))),
        slice: Option<FetchAttBodySlice> => (maybe (sub FetchAttBodySlice)),
    }
}

wire_rule! {
    []
    pub enum SectionSpec<'a> {
        TopLevel(SectionText<'a>) => (sub SectionText),
        Sub(SubSectionSpec<'a>) => (sub SubSectionSpec),
    }
}

wire_rule! {
    []
    pub struct SubSectionSpec<'a> {
        subscripts: Vec<u32> => (list1 "." (p number number)),
        text: Option<SectionText<'a>> => (maybe (lead "." (sub SectionText))),
    }
}

wire_rule! {
    []
    pub enum SectionText<'a> {
        HeaderFields(SectionTextHeaderField<'a>) => (lead "HEADER.FIELDS" (sub SectionTextHeaderField)),
        Header(()) => (text "HEADER"),
        Text(()) => (text "TEXT"),
        Mime(()) => (text "MIME"),
    }
}

wire_rule! {
    []
    pub struct SectionTextHeaderField<'a> {
        negative: bool => (trail " " (flagged ".NOT")),
        headers: Vec<Cow<'a, str>> => (wrap "(" ")" (list1 " " (p astring astring))),
    }
}

wire_rule! {
    [wrap "<" ">"]
    pub struct FetchAttBodySlice {
        start: u32 => (trail "." (p number number)),
        length: u32 => (p number number),
    }
}

wire_rule! {
    [wrap "(" ")"]
    pub struct MsgAtts<'a> {
        atts: Vec<MsgAtt<'a>> => (list1 " " (sub MsgAtt)),
    }
}

wire_rule! {
    []
    pub enum MsgAtt<'a> {
        Envelope(Envelope<'a>) => (lead "ENVELOPE " (sub Envelope)),
        InternalDate(DateTime<FixedOffset>) => (lead "INTERNALDATE " (p datetime datetime)),
        Rfc822Full(LiteralSource) => (lead "RFC822 " (p literal_source literal_source)),
        Rfc822Header(LiteralSource) => (lead "RFC822.HEADER " (p literal_source literal_source)),
        Rfc822Text(LiteralSource) => (lead "RFC822.TEXT " (p literal_source literal_source)),
        Rfc822Size(u32) => (lead "RFC822.SIZE " (p number number)),
        ShortBodyStructure(Body<'a>) => (lead "BODY " (sub Body)),
        ExtendedBodyStructure(Body<'a>) => (lead "BODYSTRUCTURE " (sub Body)),
        Body(MsgAttBody<'a>) => (lead "BODY" (sub MsgAttBody)),
        Binary(MsgAttBinary) => (lead "BINARY" (sub MsgAttBinary)),
        Uid(u32) => (lead "UID " (p number number)),
        EmailId(Cow<'a, str>) => (wrap "EMAILID (" ")" (p raw normal_atom)),
        Flags(FlagsFetch) => (wrap "FLAGS (" ")" (sub FlagsFetch)),
    }
}

wire_rule! {
    []
    pub struct MsgAttBody<'a> {
        section: Option<SectionSpec<'a>> => (wrap "[" "]" (maybe (sub SectionSpec))),
        slice_origin: Option<u32> => (maybe (wrap "<" ">" (p number number))),
        data: LiteralSource => (lead " " (p literal_source literal_source)),
    }
}

wire_rule! {
    []
    pub struct MsgAttBinary {
        section: Vec<u32> => (wrap "[" "]" (list0 "." (p number number))),
        data: LiteralSource => (lead " " (p literal_source literal_source)),
    }
}

// This somewhat awkward enum accounts for the fact that \Recent is not a
// real flag. The FLAGS fetch item is the only place it can occur, so
// instead of another layer, this contortion ensures the correct number of
// spaces occur. It only parses if \Recent is the first item, which is how
// the writer always puts it.
wire_rule! {
    []
    pub enum FlagsFetch {
        Recent(Vec<Flag>) => (lead "\\Recent" (many0 (lead " " (p flag flag)))),
        NotRecent(Vec<Flag>) => (list0 " " (p flag flag)),
    }
}

// ==================== SEARCH ====================

keyword_enum! {
    pub enum SimpleSearchKey {
        All = "ALL",
        Answered = "ANSWERED",
        Deleted = "DELETED",
        Flagged = "FLAGGED",
        New = "NEW",
        Old = "OLD",
        Recent = "RECENT",
        Seen = "SEEN",
        Unanswered = "UNANSWERED",
        Undeleted = "UNDELETED",
        Unflagged = "UNFLAGGED",
        Unseen = "UNSEEN",
        Draft = "DRAFT",
        Undraft = "UNDRAFT",
    }
}

wire_rule! {
    []
    pub struct TextSearchKey<'a> {
        typ: TextSearchKeyType => (trail " " (sub TextSearchKeyType)),
        value: Cow<'a, str> => (p astring astring),
    }
}

keyword_enum! {
    pub enum TextSearchKeyType {
        Bcc = "BCC",
        Body = "BODY",
        Cc = "CC",
        From = "FROM",
        Subject = "SUBJECT",
        Text = "TEXT",
        To = "TO",
    }
}

wire_rule! {
    []
    pub struct DateSearchKey {
        typ: DateSearchKeyType => (trail " " (sub DateSearchKeyType)),
        date: NaiveDate => (p date date),
    }
}

keyword_enum! {
    pub enum DateSearchKeyType {
        Before = "BEFORE",
        On = "ON",
        Since = "SINCE",
        SentBefore = "SENTBEFORE",
        SentOn = "SENTON",
        SentSince = "SENTSINCE",
    }
}

wire_rule! {
    [lead "SEARCH "]
    pub struct SearchCommand<'a> {
        charset: Option<Cow<'a, str>> => (maybe (wrap "CHARSET " " " (p astring astring))),
        keys: Vec<SearchKey<'a>> => (list1 " " (sub SearchKey)),
    }
}

wire_rule! {
    []
    pub enum SearchKey<'a> {
        Simple(SimpleSearchKey) => (sub SimpleSearchKey),
        Text(TextSearchKey<'a>) => (sub TextSearchKey),
        Date(DateSearchKey) => (sub DateSearchKey),
        Keyword(Flag) => (lead "KEYWORD " (p flag keyword)),
        Unkeyword(Flag) => (lead "UNKEYWORD " (p flag keyword)),
        Header(SearchKeyHeader<'a>) => (lead "HEADER " (sub SearchKeyHeader)),
        Larger(u32) => (lead "LARGER " (p number number)),
        Not(Box<SearchKey<'a>>) => (lead "NOT " (boxed (sub SearchKey))),
        Or(SearchKeyOr<'a>) => (lead "OR " (sub SearchKeyOr)),
        Smaller(u32) => (lead "SMALLER " (p number number)),
        Uid(Cow<'a, str>) => (lead "UID " (p raw sequence_set)),
        Seqnum(Cow<'a, str>) => (p raw sequence_set),
        And(Vec<SearchKey<'a>>) => (wrap "(" ")" (list1 " " (sub SearchKey))),
    }
}

wire_rule! {
    []
    pub struct SearchKeyHeader<'a> {
        header: Cow<'a, str> => (trail " " (p astring astring)),
        value: Cow<'a, str> => (p astring astring),
    }
}

wire_rule! {
    []
    pub struct SearchKeyOr<'a> {
        a: Box<SearchKey<'a>> => (trail " " (boxed (sub SearchKey))),
        b: Box<SearchKey<'a>> => (boxed (sub SearchKey)),
    }
}

// ==================== COMMANDS ====================

wire_rule! {
    [lead "CREATE "]
    pub struct CreateCommand<'a> {
        mailbox: Cow<'a, str> => (p mailbox mailbox),
    }
}

wire_rule! {
    [lead "DELETE "]
    pub struct DeleteCommand<'a> {
        mailbox: Cow<'a, str> => (p mailbox mailbox),
    }
}

wire_rule! {
    [lead "EXAMINE "]
    pub struct ExamineCommand<'a> {
        mailbox: Cow<'a, str> => (p mailbox mailbox),
    }
}

wire_rule! {
    [lead "RENAME "]
    pub struct RenameCommand<'a> {
        src: Cow<'a, str> => (trail " " (p mailbox mailbox)),
        dst: Cow<'a, str> => (p mailbox mailbox),
    }
}

wire_rule! {
    [lead "SELECT "]
    pub struct SelectCommand<'a> {
        mailbox: Cow<'a, str> => (p mailbox mailbox),
    }
}

wire_rule! {
    [lead "SUBSCRIBE "]
    pub struct SubscribeCommand<'a> {
        mailbox: Cow<'a, str> => (p mailbox mailbox),
    }
}

wire_rule! {
    [lead "UNSUBSCRIBE "]
    pub struct UnsubscribeCommand<'a> {
        mailbox: Cow<'a, str> => (p mailbox mailbox),
    }
}

wire_rule! {
    [lead "LIST "]
    pub struct ListCommand<'a> {
        reference: Cow<'a, str> => (trail " " (p mailbox mailbox)),
        pattern: Cow<'a, str> => (p mailbox list_mailbox),
    }
}

wire_rule! {
    [lead "LSUB "]
    pub struct LsubCommand<'a> {
        reference: Cow<'a, str> => (trail " " (p mailbox mailbox)),
        pattern: Cow<'a, str> => (p mailbox list_mailbox),
    }
}

keyword_enum! {
    pub enum StatusAtt {
        Messages = "MESSAGES",
        Recent = "RECENT",
        UidNext = "UIDNEXT",
        UidValidity = "UIDVALIDITY",
        Unseen = "UNSEEN",
    }
}

wire_rule! {
    [lead "STATUS "]
    pub struct StatusCommand<'a> {
        mailbox: Cow<'a, str> => (trail " " (p mailbox mailbox)),
        atts: Vec<StatusAtt> => (wrap "(" ")" (list1 " " (sub StatusAtt))),
    }
}

wire_rule! {
    [lead "LOGIN "]
    pub struct LogInCommand<'a> {
        userid: Cow<'a, str> => (trail " " (p astring astring)),
        password: Cow<'a, str> => (p astring astring),
    }
}

wire_rule! {
    [lead "COPY "]
    pub struct CopyCommand<'a> {
        sequence_set: Cow<'a, str> => (trail " " (p raw sequence_set)),
        dst: Cow<'a, str> => (p mailbox mailbox),
    }
}

keyword_enum! {
    pub enum StoreCommandType {
        Plus = "+FLAGS",
        Minus = "-FLAGS",
        Eq = "FLAGS",
    }
}

wire_rule! {
    [lead "STORE "]
    pub struct StoreCommand<'a> {
        sequence_set: Cow<'a, str> => (trail " " (p raw sequence_set)),
        typ: StoreCommandType => (sub StoreCommandType),
        silent: bool => (flagged ".SILENT"),
        flags: Vec<Flag> => (lead " " (wrap_opt "(" ")" (list0 " " (p flag flag)))),
    }
}

keyword_enum! {
    pub enum SimpleCommand {
        Capability = "CAPABILITY",
        Check = "CHECK",
        Close = "CLOSE",
        Expunge = "EXPUNGE",
        Idle = "IDLE",
        LogOut = "LOGOUT",
        Noop = "NOOP",
        StartTls = "STARTTLS",
    }
}

wire_rule! {
    []
    pub enum UidCommand<'a> {
        Copy(CopyCommand<'a>) => (sub CopyCommand),
        Fetch(FetchCommand<'a>) => (sub FetchCommand),
        Search(SearchCommand<'a>) => (sub SearchCommand),
        Store(StoreCommand<'a>) => (sub StoreCommand),
        Expunge(Cow<'a, str>) => (lead "EXPUNGE " (p raw sequence_set)),
    }
}

wire_rule! {
    []
    pub enum Command<'a> {
        Simple(SimpleCommand) => (sub SimpleCommand),
        Create(CreateCommand<'a>) => (sub CreateCommand),
        Delete(DeleteCommand<'a>) => (sub DeleteCommand),
        Examine(ExamineCommand<'a>) => (sub ExamineCommand),
        List(ListCommand<'a>) => (sub ListCommand),
        Lsub(LsubCommand<'a>) => (sub LsubCommand),
        Rename(RenameCommand<'a>) => (sub RenameCommand),
        Select(SelectCommand<'a>) => (sub SelectCommand),
        Status(StatusCommand<'a>) => (sub StatusCommand),
        Subscribe(SubscribeCommand<'a>) => (sub SubscribeCommand),
        Unsubscribe(UnsubscribeCommand<'a>) => (sub UnsubscribeCommand),
        LogIn(LogInCommand<'a>) => (sub LogInCommand),
        Copy(CopyCommand<'a>) => (sub CopyCommand),
        Fetch(FetchCommand<'a>) => (sub FetchCommand),
        Store(StoreCommand<'a>) => (sub StoreCommand),
        Search(SearchCommand<'a>) => (sub SearchCommand),
        Uid(UidCommand<'a>) => (lead "UID " (sub UidCommand)),
    }
}

wire_rule! {
    []
    pub struct CommandLine<'a> {
        tag: Cow<'a, str> => (trail " " (p raw tag_atom)),
        cmd: Command<'a> => (sub Command),
    }
}

// ==================== APPEND AND AUTHENTICATE ====================

// APPEND is handled at the protocol level since its literals can be far
// larger than any reasonable command-line buffer. The request reader
// recognises the text before each literal with these rules.

wire_rule! {
    []
    pub struct AppendCommandStart<'a> {
        tag: Cow<'a, str> => (trail " " (p raw tag_atom)),
        mailbox: Cow<'a, str> => (lead "APPEND " (trail " " (p mailbox mailbox))),
        first_fragment: AppendFragment => (sub AppendFragment),
    }
}

wire_rule! {
    []
    pub struct AppendFragment {
        flags: Option<Vec<Flag>> => (maybe (wrap "(" ") " (list0 " " (p flag flag)))),
        internal_date: Option<DateTime<FixedOffset>> => (maybe (trail " " (p datetime datetime))),
    }
}

wire_rule! {
    []
    pub struct AuthenticateCommandStart<'a> {
        tag: Cow<'a, str> => (trail " " (p raw tag_atom)),
        mechanism: Cow<'a, str> => (lead "AUTHENTICATE " (p raw normal_atom)),
        initial_response: Option<Cow<'a, str>> => (maybe (lead " " (p raw base64_text))),
    }
}

/// Parse just the tag off a line that failed to parse as any command, so
/// that the `BAD` response can carry it.
pub fn parse_unknown_tag(line: &[u8]) -> Option<String> {
    let (i, tag) = tag_atom(line).ok()?;
    if i.is_empty() || i.starts_with(b" ") {
        Some(tag.into_owned())
    } else {
        None
    }
}

// ==================== PRIMITIVE PARSERS ====================

fn normal_atom(i: &[u8]) -> IResult<&[u8], Cow<'_, str>> {
    map(
        bytes::complete::take_while1(|b| match b {
            0..=b' ' => false,
            127..=255 => false,
            b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' | b']' => false,
            _ => true,
        }),
        String::from_utf8_lossy,
    )(i)
}

// Not formally part of the IMAP syntax definition; keeping the backslash
// prefix in the token makes flag and mailbox-attribute handling simpler.
// The parser will initially accept garbage like "foo\bar", but a later
// stage rejects it when coercing the value into a `Flag`.
fn backslash_atom(i: &[u8]) -> IResult<&[u8], Cow<'_, str>> {
    map(
        bytes::complete::take_while1(|b| match b {
            0..=b' ' => false,
            127..=255 => false,
            b'(' | b')' | b'{' | b'*' | b'%' | b'"' | b']' => false,
            _ => true,
        }),
        String::from_utf8_lossy,
    )(i)
}

fn astring_atom(i: &[u8]) -> IResult<&[u8], Cow<'_, str>> {
    map(
        bytes::complete::take_while1(|b| match b {
            0..=b' ' => false,
            127..=255 => false,
            b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' => false,
            _ => true,
        }),
        String::from_utf8_lossy,
    )(i)
}

fn tag_atom(i: &[u8]) -> IResult<&[u8], Cow<'_, str>> {
    map(
        bytes::complete::take_while1(|b| match b {
            0..=b' ' => false,
            127..=255 => false,
            b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' | b'+' => false,
            _ => true,
        }),
        String::from_utf8_lossy,
    )(i)
}

fn list_mailbox_atom(i: &[u8]) -> IResult<&[u8], Cow<'_, str>> {
    map(
        bytes::complete::take_while1(|b| match b {
            0..=b' ' => false,
            127..=255 => false,
            b'(' | b')' | b'{' | b'\\' | b'"' => false,
            _ => true,
        }),
        String::from_utf8_lossy,
    )(i)
}

fn base64_text(i: &[u8]) -> IResult<&[u8], Cow<'_, str>> {
    map(is_a("abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ\
              0123456789+/="), String::from_utf8_lossy)(i)
}

fn number(i: &[u8]) -> IResult<&[u8], u32> {
    map_opt(character::complete::digit1, |s: &[u8]| {
        // Leading zeroes are not valid number syntax
        if s.len() > 1 && b'0' == s[0] {
            return None;
        }
        str::from_utf8(s).ok().and_then(|s| s.parse::<u32>().ok())
    })(i)
}

fn literal(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let (i, len) = sequence::delimited(
        alt((tag("~{"), tag("{"))),
        number,
        alt((tag("+}\r\n"), tag("}\r\n"))),
    )(i)?;
    bytes::complete::take(len)(i)
}

// Only used to re-read fetch responses in the test client.
fn literal_source(i: &[u8]) -> IResult<&[u8], LiteralSource> {
    alt((
        literal_literal_source,
        map(quoted, |s| {
            LiteralSource::of_data(s.as_bytes(), false)
        }),
    ))(i)
}

fn literal_literal_source(i: &[u8]) -> IResult<&[u8], LiteralSource> {
    let (i, prefix) = alt((tag("~{"), tag("{")))(i)?;
    let binary = prefix.starts_with(b"~");
    let (i, len) =
        sequence::terminated(number, alt((tag("+}\r\n"), tag("}\r\n"))))(i)?;
    let (i, data) = bytes::complete::take(len)(i)?;

    Ok((i, LiteralSource::of_data(data, binary)))
}

fn quoted_char(i: &[u8]) -> IResult<&[u8], &[u8]> {
    sequence::preceded(tag("\\"), alt((tag("\\"), tag("\""))))(i)
}

fn quoted_string_content(i: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((quoted_char, is_not("\r\n\"\\")))(i)
}

fn quoted(i: &[u8]) -> IResult<&[u8], Cow<'_, str>> {
    sequence::delimited(
        tag("\""),
        multi::fold_many0(
            map(quoted_string_content, String::from_utf8_lossy),
            || Cow::Owned(String::new()),
            |mut accum: Cow<'_, str>, piece| {
                if accum.is_empty() {
                    piece
                } else {
                    Cow::to_mut(&mut accum).push_str(&piece);
                    accum
                }
            },
        ),
        tag("\""),
    )(i)
}

fn string(i: &[u8]) -> IResult<&[u8], Cow<'_, str>> {
    alt((quoted, map(literal, String::from_utf8_lossy)))(i)
}

fn astring(i: &[u8]) -> IResult<&[u8], Cow<'_, str>> {
    alt((astring_atom, string))(i)
}

fn nstring(i: &[u8]) -> IResult<&[u8], Option<Cow<'_, str>>> {
    alt((map(kw("NIL"), |_| None), map(string, Some)))(i)
}

fn decode_mailbox(raw: Cow<'_, str>) -> Cow<'_, str> {
    let decoded = match raw {
        Cow::Owned(s) => Cow::Owned(utf7::decode(&s).into_owned()),
        Cow::Borrowed(s) => utf7::decode(s),
    };

    if decoded.eq_ignore_ascii_case("INBOX") {
        Cow::Borrowed("INBOX")
    } else {
        decoded
    }
}

fn mailbox(i: &[u8]) -> IResult<&[u8], Cow<'_, str>> {
    map(astring, decode_mailbox)(i)
}

// "mailbox as used by LIST and LSUB", which naturally needs different
// syntax (wildcards) than other uses of mailbox names.
fn list_mailbox(i: &[u8]) -> IResult<&[u8], Cow<'_, str>> {
    map(alt((list_mailbox_atom, string)), decode_mailbox)(i)
}

fn sequence_set(i: &[u8]) -> IResult<&[u8], Cow<'_, str>> {
    map(is_a("0123456789:*,"), String::from_utf8_lossy)(i)
}

fn text(i: &[u8]) -> IResult<&[u8], Cow<'_, str>> {
    map(is_not("\r\n"), String::from_utf8_lossy)(i)
}

fn keyword(i: &[u8]) -> IResult<&[u8], Flag> {
    map_opt(normal_atom, |a| a.parse::<Flag>().ok())(i)
}

fn flag(i: &[u8]) -> IResult<&[u8], Flag> {
    alt((keyword, map_opt(backslash_atom, |s| s.parse::<Flag>().ok())))(i)
}

fn parse_u32_infallible(i: &[u8]) -> u32 {
    str::from_utf8(i).unwrap().parse::<u32>().unwrap()
}

fn one_digit(i: &[u8]) -> IResult<&[u8], u32> {
    map(
        bytes::complete::take_while_m_n(1, 1, character::is_digit),
        parse_u32_infallible,
    )(i)
}

fn two_digit(i: &[u8]) -> IResult<&[u8], u32> {
    map(
        bytes::complete::take_while_m_n(2, 2, character::is_digit),
        parse_u32_infallible,
    )(i)
}

fn four_digit(i: &[u8]) -> IResult<&[u8], u32> {
    map(
        bytes::complete::take_while_m_n(4, 4, character::is_digit),
        parse_u32_infallible,
    )(i)
}

fn time_of_day(i: &[u8]) -> IResult<&[u8], (u32, u32, u32)> {
    sequence::tuple((
        two_digit,
        sequence::preceded(tag(":"), two_digit),
        sequence::preceded(tag(":"), two_digit),
    ))(i)
}

fn numeric_zone(i: &[u8]) -> IResult<&[u8], i32> {
    map(
        sequence::pair(
            alt((tag("+"), tag("-"))),
            sequence::pair(two_digit, two_digit),
        ),
        |(sign, (h, m))| {
            let n = (h * 60 + m) as i32;
            if b"-" == sign {
                -n
            } else {
                n
            }
        },
    )(i)
}

static MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct",
    "nov", "dec",
];

fn month(i: &[u8]) -> IResult<&[u8], u32> {
    map_opt(bytes::complete::take(3usize), |name| {
        str::from_utf8(name).ok().and_then(|name| {
            MONTH_NAMES
                .iter()
                .position(|n| n.eq_ignore_ascii_case(name))
                .map(|ix| ix as u32 + 1)
        })
    })(i)
}

fn date_text(i: &[u8]) -> IResult<&[u8], NaiveDate> {
    map_opt(
        sequence::tuple((
            sequence::terminated(alt((two_digit, one_digit)), tag("-")),
            sequence::terminated(month, tag("-")),
            four_digit,
        )),
        |(d, m, y)| NaiveDate::from_ymd_opt(y as i32, m, d),
    )(i)
}

fn date(i: &[u8]) -> IResult<&[u8], NaiveDate> {
    alt((
        date_text,
        sequence::delimited(tag("\""), date_text, tag("\"")),
    ))(i)
}

fn datetime_date(i: &[u8]) -> IResult<&[u8], NaiveDate> {
    map_opt(
        sequence::tuple((
            sequence::terminated(
                alt((two_digit, sequence::preceded(tag(" "), one_digit))),
                tag("-"),
            ),
            sequence::terminated(month, tag("-")),
            four_digit,
        )),
        |(d, m, y)| NaiveDate::from_ymd_opt(y as i32, m, d),
    )(i)
}

fn datetime(i: &[u8]) -> IResult<&[u8], DateTime<FixedOffset>> {
    map_opt(
        sequence::delimited(
            tag("\""),
            sequence::tuple((
                sequence::terminated(datetime_date, tag(" ")),
                sequence::terminated(time_of_day, tag(" ")),
                numeric_zone,
            )),
            tag("\""),
        ),
        |(date, (h, m, s), zone)| {
            FixedOffset::east_opt(zone * 60).and_then(|offset| {
                date.and_hms_opt(h, m, s).and_then(|datetime| {
                    offset.from_local_datetime(&datetime).latest()
                })
            })
        },
    )(i)
}

#[cfg(test)]
mod test {
    use super::*;

    macro_rules! assert_reversible {
        ($ty:ty, $expected_text:expr, $value:expr) => {{
            let value = &mut $value;
            let mut lex = LexWriter::new(Vec::<u8>::new(), false);
            value.write_to(&mut lex).unwrap();
            let text = lex.into_inner();
            let text = str::from_utf8(&text).unwrap();
            assert_eq!($expected_text, text, "serialisation mismatch");

            let (trailing, read) = match <$ty>::parse(text.as_bytes()) {
                Ok(read) => read,
                Err(e) => panic!("Failed to parse `{}`: {}", text, e),
            };

            assert!(
                trailing.is_empty(),
                "Didn't parse all of `{}`, `{}` remained",
                text,
                String::from_utf8_lossy(trailing),
            );
            assert_eq!(value, &read);
        }};
    }

    fn s(s: &str) -> Cow<'static, str> {
        Cow::Owned(s.to_owned())
    }

    fn ns(ns: &str) -> Option<Cow<'static, str>> {
        Some(s(ns))
    }

    fn cmd(text: &str) -> Command<'_> {
        match Command::parse(text.as_bytes()) {
            Ok((b"", command)) => command,
            Ok((rest, _)) => panic!(
                "Trailing garbage parsing `{}`: {:?}",
                text,
                String::from_utf8_lossy(rest),
            ),
            Err(e) => panic!("Failed to parse `{}`: {}", text, e),
        }
    }

    #[test]
    fn simple_command_syntax() {
        assert_eq!(cmd("NOOP"), Command::Simple(SimpleCommand::Noop));
        assert_eq!(cmd("noop"), Command::Simple(SimpleCommand::Noop));
        assert_eq!(cmd("LOGOUT"), Command::Simple(SimpleCommand::LogOut));
        assert_eq!(cmd("STARTTLS"), Command::Simple(SimpleCommand::StartTls));
        assert_eq!(cmd("IDLE"), Command::Simple(SimpleCommand::Idle));
        assert!(Command::parse(b"FROBNICATE").is_err());
    }

    #[test]
    fn command_line_syntax() {
        assert_reversible!(
            CommandLine,
            "a1 NOOP",
            CommandLine {
                tag: s("a1"),
                cmd: Command::Simple(SimpleCommand::Noop),
            }
        );
        assert_reversible!(
            CommandLine,
            "a2 LOGIN demouser demopass",
            CommandLine {
                tag: s("a2"),
                cmd: Command::LogIn(LogInCommand {
                    userid: s("demouser"),
                    password: s("demopass"),
                }),
            }
        );
    }

    #[test]
    fn mailbox_management_syntax() {
        assert_reversible!(
            CreateCommand,
            "CREATE archive/2023",
            CreateCommand {
                mailbox: s("archive/2023"),
            }
        );
        assert_reversible!(
            RenameCommand,
            "RENAME old new",
            RenameCommand {
                src: s("old"),
                dst: s("new"),
            }
        );
        assert_reversible!(
            SelectCommand,
            "SELECT INBOX",
            SelectCommand { mailbox: s("INBOX") }
        );
        assert_reversible!(
            StatusCommand,
            "STATUS foo (MESSAGES RECENT UIDNEXT UIDVALIDITY UNSEEN)",
            StatusCommand {
                mailbox: s("foo"),
                atts: vec![
                    StatusAtt::Messages,
                    StatusAtt::Recent,
                    StatusAtt::UidNext,
                    StatusAtt::UidValidity,
                    StatusAtt::Unseen,
                ],
            }
        );

        // Wire form of a non-ASCII mailbox decodes to Unicode
        assert_eq!(
            Command::Select(SelectCommand { mailbox: s("föö") }),
            cmd("SELECT \"f&APYA9g-\""),
        );
        // INBOX is canonicalized
        assert_eq!(
            Command::Select(SelectCommand { mailbox: s("INBOX") }),
            cmd("SELECT inbox"),
        );
    }

    #[test]
    fn list_lsub_syntax() {
        assert_reversible!(
            ListCommand,
            "LIST \"\" INBOX",
            ListCommand {
                reference: s(""),
                pattern: s("INBOX"),
            }
        );
        assert_reversible!(
            ListCommand,
            "LIST \"\" %",
            ListCommand {
                reference: s(""),
                pattern: s("%"),
            }
        );
        assert_reversible!(
            LsubCommand,
            "LSUB foo bar*",
            LsubCommand {
                reference: s("foo"),
                pattern: s("bar*"),
            }
        );
    }

    #[test]
    fn store_syntax() {
        assert_reversible!(
            StoreCommand,
            "STORE 1:2,4 +FLAGS (\\Deleted)",
            StoreCommand {
                sequence_set: s("1:2,4"),
                typ: StoreCommandType::Plus,
                silent: false,
                flags: vec![Flag::Deleted],
            }
        );
        assert_reversible!(
            StoreCommand,
            "STORE 1 -FLAGS.SILENT (\\Seen keyword)",
            StoreCommand {
                sequence_set: s("1"),
                typ: StoreCommandType::Minus,
                silent: true,
                flags: vec![Flag::Seen, Flag::Keyword("keyword".to_owned())],
            }
        );
        // Parenthesis-free form is accepted
        assert_eq!(
            Command::Store(StoreCommand {
                sequence_set: s("1"),
                typ: StoreCommandType::Eq,
                silent: false,
                flags: vec![Flag::Flagged],
            }),
            cmd("STORE 1 FLAGS \\Flagged"),
        );
    }

    #[test]
    fn copy_and_uid_syntax() {
        assert_reversible!(
            CopyCommand,
            "COPY 1:3 dst",
            CopyCommand {
                sequence_set: s("1:3"),
                dst: s("dst"),
            }
        );
        assert_eq!(
            Command::Uid(UidCommand::Expunge(s("1:*"))),
            cmd("UID EXPUNGE 1:*"),
        );
        assert_eq!(
            Command::Uid(UidCommand::Fetch(FetchCommand {
                sequence_set: s("1:*"),
                target: FetchCommandTarget::Single(FetchAtt::Flags(())),
            })),
            cmd("UID FETCH 1:* FLAGS"),
        );
    }

    #[test]
    fn fetch_command_syntax() {
        assert_reversible!(
            FetchCommand,
            "FETCH 1:2,3:* ALL",
            FetchCommand {
                sequence_set: s("1:2,3:*"),
                target: FetchCommandTarget::All(()),
            }
        );
        assert_reversible!(
            FetchCommand,
            "FETCH 1 (FLAGS UID)",
            FetchCommand {
                sequence_set: s("1"),
                target: FetchCommandTarget::Multi(vec![
                    FetchAtt::Flags(()),
                    FetchAtt::Uid(()),
                ]),
            }
        );
        assert_reversible!(
            FetchCommand,
            "FETCH 1 BODY",
            FetchCommand {
                sequence_set: s("1"),
                target: FetchCommandTarget::Single(
                    FetchAtt::ShortBodyStructure(())
                ),
            }
        );
        assert_reversible!(
            FetchCommand,
            "FETCH 1 BODYSTRUCTURE",
            FetchCommand {
                sequence_set: s("1"),
                target: FetchCommandTarget::Single(
                    FetchAtt::ExtendedBodyStructure(())
                ),
            }
        );
        assert_reversible!(
            FetchCommand,
            "FETCH 1 RFC822.SIZE",
            FetchCommand {
                sequence_set: s("1"),
                target: FetchCommandTarget::Single(FetchAtt::Rfc822(Some(
                    FetchAttRfc822::Size
                ))),
            }
        );
        assert_reversible!(
            FetchCommand,
            "FETCH 1 BODY.PEEK[HEADER.FIELDS (From Subject)]<0.1024>",
            FetchCommand {
                sequence_set: s("1"),
                target: FetchCommandTarget::Single(FetchAtt::Body(
                    FetchAttBody {
                        peek: true,
                        section: Some(SectionSpec::TopLevel(
                            SectionText::HeaderFields(
                                SectionTextHeaderField {
                                    negative: false,
                                    headers: vec![s("From"), s("Subject")],
                                }
                            )
                        )),
                        slice: Some(FetchAttBodySlice {
                            start: 0,
                            length: 1024,
                        }),
                    }
                )),
            }
        );
        assert_reversible!(
            FetchCommand,
            "FETCH 1 BODY[1.2.MIME]",
            FetchCommand {
                sequence_set: s("1"),
                target: FetchCommandTarget::Single(FetchAtt::Body(
                    FetchAttBody {
                        peek: false,
                        section: Some(SectionSpec::Sub(SubSectionSpec {
                            subscripts: vec![1, 2],
                            text: Some(SectionText::Mime(())),
                        })),
                        slice: None,
                    }
                )),
            }
        );
        assert_reversible!(
            FetchCommand,
            "FETCH 1 BINARY.PEEK[1]",
            FetchCommand {
                sequence_set: s("1"),
                target: FetchCommandTarget::Single(FetchAtt::Binary(
                    FetchAttBinary {
                        peek: true,
                        section: vec![1],
                        slice: None,
                    }
                )),
            }
        );
        assert_reversible!(
            FetchCommand,
            "FETCH 1 EMAILID",
            FetchCommand {
                sequence_set: s("1"),
                target: FetchCommandTarget::Single(FetchAtt::EmailId(())),
            }
        );
    }

    #[test]
    fn msg_att_syntax() {
        assert_reversible!(MsgAtt, "UID 42", MsgAtt::Uid(42));
        assert_reversible!(MsgAtt, "RFC822.SIZE 1234", MsgAtt::Rfc822Size(1234));
        assert_reversible!(
            MsgAtt,
            "INTERNALDATE \" 4-Jul-2020 16:31:00 +0100\"",
            MsgAtt::InternalDate(
                FixedOffset::east_opt(3600)
                    .unwrap()
                    .with_ymd_and_hms(2020, 7, 4, 16, 31, 0)
                    .unwrap()
            )
        );
        assert_reversible!(
            MsgAtt,
            "BODY[] {3}\r\nfoo",
            MsgAtt::Body(MsgAttBody {
                section: None,
                slice_origin: None,
                data: LiteralSource::of_data(b"foo", false),
            })
        );
        assert_reversible!(
            MsgAtt,
            "BINARY[1] ~{3}\r\nfoo",
            MsgAtt::Binary(MsgAttBinary {
                section: vec![1],
                data: LiteralSource::of_data(b"foo", true),
            })
        );
        assert_reversible!(
            MsgAtt,
            "FLAGS (\\Recent \\Flagged)",
            MsgAtt::Flags(FlagsFetch::Recent(vec![Flag::Flagged]))
        );
        assert_reversible!(
            MsgAtt,
            "FLAGS (keyword)",
            MsgAtt::Flags(FlagsFetch::NotRecent(vec![Flag::Keyword(
                "keyword".to_owned()
            )]))
        );
        assert_reversible!(
            MsgAtt,
            "EMAILID (M6d99ac3275bb4e)",
            MsgAtt::EmailId(s("M6d99ac3275bb4e"))
        );

        assert_reversible!(
            MsgAtts,
            "(UID 42 FLAGS ())",
            MsgAtts {
                atts: vec![
                    MsgAtt::Uid(42),
                    MsgAtt::Flags(FlagsFetch::NotRecent(vec![]))
                ],
            }
        );
    }

    #[test]
    fn envelope_syntax() {
        // RFC 3501 section 8 example, abbreviated
        assert_reversible!(
            Envelope,
            "(\"Wed, 17 Jul 1996 02:23:25 -0700 (PDT)\" \
             \"IMAP4rev1 WG mtg summary and minutes\" \
             ((\"Terry Gray\" NIL \"gray\" \"cac.washington.edu\")) \
             ((\"Terry Gray\" NIL \"gray\" \"cac.washington.edu\")) \
             ((\"Terry Gray\" NIL \"gray\" \"cac.washington.edu\")) \
             ((NIL NIL \"imap\" \"cac.washington.edu\")) \
             NIL NIL NIL \
             \"<B27397-0100000@cac.washington.edu>\")",
            Envelope {
                date: ns("Wed, 17 Jul 1996 02:23:25 -0700 (PDT)"),
                subject: ns("IMAP4rev1 WG mtg summary and minutes"),
                from: vec![Address {
                    display_name: ns("Terry Gray"),
                    routing: None,
                    local_part: ns("gray"),
                    domain: ns("cac.washington.edu"),
                }],
                sender: vec![Address {
                    display_name: ns("Terry Gray"),
                    routing: None,
                    local_part: ns("gray"),
                    domain: ns("cac.washington.edu"),
                }],
                reply_to: vec![Address {
                    display_name: ns("Terry Gray"),
                    routing: None,
                    local_part: ns("gray"),
                    domain: ns("cac.washington.edu"),
                }],
                to: vec![Address {
                    display_name: None,
                    routing: None,
                    local_part: ns("imap"),
                    domain: ns("cac.washington.edu"),
                }],
                cc: vec![],
                bcc: vec![],
                in_reply_to: None,
                message_id: ns("<B27397-0100000@cac.washington.edu>"),
            }
        );
    }

    #[test]
    fn body_structure_syntax() {
        // RFC 3501 section 8 example
        assert_reversible!(
            Body,
            r#"("TEXT" "PLAIN" ("CHARSET" "US-ASCII") NIL NIL "7BIT" 3028 92)"#,
            Body::SinglePart(BodyType1Part {
                core: ClassifiedBodyType1Part::Text(BodyTypeText {
                    media_subtype: s("PLAIN"),
                    body_fields: BodyFields {
                        content_type_parms: vec![s("CHARSET"), s("US-ASCII")],
                        content_id: None,
                        content_description: None,
                        content_transfer_encoding: s("7BIT"),
                        size_octets: 3028,
                    },
                    size_lines: 92,
                }),
                ext: None,
            })
        );

        assert_reversible!(
            Body,
            "((\"TEXT\" \"PLAIN\" (\"CHARSET\" \"iso-8859-1\") \
             NIL NIL \"QUOTED-PRINTABLE\" 2234 63 NIL NIL NIL NIL)\
             (\"TEXT\" \"HTML\" (\"CHARSET\" \"iso-8859-1\") NIL NIL \
             \"QUOTED-PRINTABLE\" 2987 52 NIL NIL NIL NIL) \
             \"ALTERNATIVE\" (\"BOUNDARY\" \"d3438gr7324\") NIL NIL NIL)",
            Body::Multipart(BodyTypeMPart {
                bodies: vec![
                    Body::SinglePart(BodyType1Part {
                        core: ClassifiedBodyType1Part::Text(BodyTypeText {
                            media_subtype: s("PLAIN"),
                            body_fields: BodyFields {
                                content_type_parms: vec![
                                    s("CHARSET"),
                                    s("iso-8859-1"),
                                ],
                                content_id: None,
                                content_description: None,
                                content_transfer_encoding: s(
                                    "QUOTED-PRINTABLE"
                                ),
                                size_octets: 2234,
                            },
                            size_lines: 63,
                        }),
                        ext: Some(BodyExt1Part {
                            md5: None,
                            content_disposition: None,
                            content_language: None,
                            content_location: None,
                        }),
                    }),
                    Body::SinglePart(BodyType1Part {
                        core: ClassifiedBodyType1Part::Text(BodyTypeText {
                            media_subtype: s("HTML"),
                            body_fields: BodyFields {
                                content_type_parms: vec![
                                    s("CHARSET"),
                                    s("iso-8859-1"),
                                ],
                                content_id: None,
                                content_description: None,
                                content_transfer_encoding: s(
                                    "QUOTED-PRINTABLE"
                                ),
                                size_octets: 2987,
                            },
                            size_lines: 52,
                        }),
                        ext: Some(BodyExt1Part {
                            md5: None,
                            content_disposition: None,
                            content_language: None,
                            content_location: None,
                        }),
                    }),
                ],
                media_subtype: s("ALTERNATIVE"),
                ext: Some(BodyExtMPart {
                    content_type_parms: vec![s("BOUNDARY"), s("d3438gr7324")],
                    content_disposition: None,
                    content_language: None,
                    content_location: None,
                }),
            })
        );
    }

    #[test]
    fn search_key_syntax() {
        assert_reversible!(
            SearchKey,
            "ALL",
            SearchKey::Simple(SimpleSearchKey::All)
        );
        assert_reversible!(
            SearchKey,
            "BCC \"foo@bar.com\"",
            SearchKey::Text(TextSearchKey {
                typ: TextSearchKeyType::Bcc,
                value: s("foo@bar.com"),
            })
        );
        assert_reversible!(
            SearchKey,
            "BEFORE \"4-Jul-2020\"",
            SearchKey::Date(DateSearchKey {
                typ: DateSearchKeyType::Before,
                date: NaiveDate::from_ymd_opt(2020, 7, 4).unwrap(),
            })
        );
        assert_reversible!(
            SearchKey,
            "KEYWORD foo",
            SearchKey::Keyword(Flag::Keyword("foo".to_owned()))
        );
        assert_reversible!(SearchKey, "LARGER 42", SearchKey::Larger(42));
        assert_reversible!(
            SearchKey,
            "NOT LARGER 42",
            SearchKey::Not(Box::new(SearchKey::Larger(42)))
        );
        assert_reversible!(
            SearchKey,
            "OR LARGER 42 DRAFT",
            SearchKey::Or(SearchKeyOr {
                a: Box::new(SearchKey::Larger(42)),
                b: Box::new(SearchKey::Simple(SimpleSearchKey::Draft)),
            })
        );
        assert_reversible!(
            SearchKey,
            "HEADER Foo Bar",
            SearchKey::Header(SearchKeyHeader {
                header: s("Foo"),
                value: s("Bar"),
            })
        );
        assert_reversible!(
            SearchKey,
            "UID 1:2,3:*",
            SearchKey::Uid(s("1:2,3:*"))
        );
        assert_reversible!(
            SearchKey,
            "1:2,3:*",
            SearchKey::Seqnum(s("1:2,3:*"))
        );
        assert_reversible!(
            SearchKey,
            "(LARGER 42 SMALLER 56)",
            SearchKey::And(vec![SearchKey::Larger(42), SearchKey::Smaller(56)])
        );
    }

    #[test]
    fn search_command_syntax() {
        assert_reversible!(
            SearchCommand,
            "SEARCH LARGER 42 SMALLER 56",
            SearchCommand {
                charset: None,
                keys: vec![SearchKey::Larger(42), SearchKey::Smaller(56)],
            }
        );
        assert_reversible!(
            SearchCommand,
            "SEARCH CHARSET utf-8 UNSEEN",
            SearchCommand {
                charset: ns("utf-8"),
                keys: vec![SearchKey::Simple(SimpleSearchKey::Unseen)],
            }
        );
    }

    #[test]
    fn append_start_syntax() {
        let (rest, start) = AppendCommandStart::parse(
            b"a APPEND saved-messages (\\Seen) ",
        )
        .unwrap();
        assert!(rest.is_empty());
        assert_eq!("a", start.tag);
        assert_eq!("saved-messages", start.mailbox);
        assert_eq!(Some(vec![Flag::Seen]), start.first_fragment.flags);
        assert_eq!(None, start.first_fragment.internal_date);

        let (rest, start) = AppendCommandStart::parse(
            b"a APPEND dst (\\Seen) \" 4-Jul-2020 16:31:00 +0100\" ",
        )
        .unwrap();
        assert!(rest.is_empty());
        assert!(start.first_fragment.internal_date.is_some());

        let (rest, start) =
            AppendCommandStart::parse(b"5 APPEND INBOX ").unwrap();
        assert!(rest.is_empty());
        assert_eq!(None, start.first_fragment.flags);
    }

    #[test]
    fn authenticate_start_syntax() {
        let (rest, auth) =
            AuthenticateCommandStart::parse(b"a AUTHENTICATE PLAIN").unwrap();
        assert!(rest.is_empty());
        assert_eq!("PLAIN", auth.mechanism);
        assert_eq!(None, auth.initial_response);

        let (rest, auth) = AuthenticateCommandStart::parse(
            b"a AUTHENTICATE PLAIN dGVzdAB0ZXN0AHRlc3Q=",
        )
        .unwrap();
        assert!(rest.is_empty());
        assert_eq!(Some(s("dGVzdAB0ZXN0AHRlc3Q=")), auth.initial_response);
    }

    #[test]
    fn response_syntax() {
        assert_reversible!(
            ResponseLine,
            "* CAPABILITY IMAP4rev1 LITERAL+ AUTH=PLAIN",
            ResponseLine {
                tag: None,
                response: Response::Capability(CapabilityData {
                    capabilities: vec![
                        s("IMAP4rev1"),
                        s("LITERAL+"),
                        s("AUTH=PLAIN"),
                    ],
                }),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* 4 EXISTS",
            ResponseLine {
                tag: None,
                response: Response::Exists(4),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* 1 RECENT",
            ResponseLine {
                tag: None,
                response: Response::Recent(1),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* 3 EXPUNGE",
            ResponseLine {
                tag: None,
                response: Response::Expunge(3),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* SEARCH 2 3 6",
            ResponseLine {
                tag: None,
                response: Response::Search(vec![2, 3, 6]),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* SEARCH",
            ResponseLine {
                tag: None,
                response: Response::Search(vec![]),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* LIST (\\HasNoChildren) \"/\" INBOX",
            ResponseLine {
                tag: None,
                response: Response::List(MailboxList {
                    flags: vec![s("\\HasNoChildren")],
                    name: s("INBOX"),
                }),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* STATUS foo (MESSAGES 4 UNSEEN 2)",
            ResponseLine {
                tag: None,
                response: Response::Status(StatusData {
                    mailbox: s("foo"),
                    atts: vec![
                        StatusRespAtt::Messages(4),
                        StatusRespAtt::Unseen(2),
                    ],
                }),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* FLAGS (\\Answered \\Flagged)",
            ResponseLine {
                tag: None,
                response: Response::Flags(vec![Flag::Answered, Flag::Flagged]),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* 2 FETCH (UID 5 FLAGS (\\Recent \\Seen))",
            ResponseLine {
                tag: None,
                response: Response::Fetch(FetchData {
                    seqnum: 2,
                    atts: MsgAtts {
                        atts: vec![
                            MsgAtt::Uid(5),
                            MsgAtt::Flags(FlagsFetch::Recent(vec![
                                Flag::Seen
                            ])),
                        ],
                    },
                }),
            }
        );
    }

    #[test]
    fn cond_response_syntax() {
        assert_reversible!(
            ResponseLine,
            "a1 OK Completed",
            ResponseLine {
                tag: Some(s("a1")),
                response: Response::Cond(CondResponse {
                    cond: RespCondType::Ok,
                    code: None,
                    quip: ns("Completed"),
                }),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* OK [UIDNEXT 105]",
            ResponseLine {
                tag: None,
                response: Response::Cond(CondResponse {
                    cond: RespCondType::Ok,
                    code: Some(RespTextCode::UidNext(105)),
                    quip: None,
                }),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* OK [UIDVALIDITY 4097774359]",
            ResponseLine {
                tag: None,
                response: Response::Cond(CondResponse {
                    cond: RespCondType::Ok,
                    code: Some(RespTextCode::UidValidity(4097774359)),
                    quip: None,
                }),
            }
        );
        assert_reversible!(
            ResponseLine,
            "a OK [READ-WRITE] Selected mailbox.",
            ResponseLine {
                tag: Some(s("a")),
                response: Response::Cond(CondResponse {
                    cond: RespCondType::Ok,
                    code: Some(RespTextCode::ReadWrite(())),
                    quip: ns("Selected mailbox."),
                }),
            }
        );
        assert_reversible!(
            ResponseLine,
            "d OK [APPENDUID 4097774359 105] APPEND completed.",
            ResponseLine {
                tag: Some(s("d")),
                response: Response::Cond(CondResponse {
                    cond: RespCondType::Ok,
                    code: Some(RespTextCode::AppendUid(
                        4097774359,
                        s("105")
                    )),
                    quip: ns("APPEND completed."),
                }),
            }
        );
        assert_reversible!(
            ResponseLine,
            "c OK [COPYUID 1 2:4 44:46] Copied.",
            ResponseLine {
                tag: Some(s("c")),
                response: Response::Cond(CondResponse {
                    cond: RespCondType::Ok,
                    code: Some(RespTextCode::CopyUid(1, s("2:4"), s("44:46"))),
                    quip: ns("Copied."),
                }),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)]",
            ResponseLine {
                tag: None,
                response: Response::Cond(CondResponse {
                    cond: RespCondType::Ok,
                    code: Some(RespTextCode::PermanentFlags(
                        vec![Flag::Deleted, Flag::Seen],
                        true,
                    )),
                    quip: None,
                }),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* OK [PERMANENTFLAGS ()]",
            ResponseLine {
                tag: None,
                response: Response::Cond(CondResponse {
                    cond: RespCondType::Ok,
                    code: Some(RespTextCode::PermanentFlags(vec![], false)),
                    quip: None,
                }),
            }
        );
        assert_reversible!(
            ResponseLine,
            "* BYE Logging out.",
            ResponseLine {
                tag: None,
                response: Response::Cond(CondResponse {
                    cond: RespCondType::Bye,
                    code: None,
                    quip: ns("Logging out."),
                }),
            }
        );
    }

    #[test]
    fn unknown_tag_extraction() {
        assert_eq!(
            Some("a1".to_owned()),
            parse_unknown_tag(b"a1 FROBNICATE x y"),
        );
        assert_eq!(Some("a1".to_owned()), parse_unknown_tag(b"a1"));
        assert_eq!(None, parse_unknown_tag(b""));
    }
}
