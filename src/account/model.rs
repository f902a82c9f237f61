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

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::num::NonZeroU32;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::str::FromStr;
use std::sync::Arc;

use chrono::prelude::*;

use crate::support::error::Error;

/// Uniquely identifies a message within a single mailbox.
///
/// UIDs start at 1 and increase monotonically as messages are added to the
/// mailbox. Within one UID-validity epoch, UIDs are never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(pub NonZeroU32);

impl Uid {
    pub const MIN: Self = Uid(NonZeroU32::MIN);
    pub const MAX: Self = Uid(NonZeroU32::MAX);

    pub fn of(uid: u32) -> Option<Self> {
        NonZeroU32::new(uid).map(Uid)
    }

    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Uid)
    }

    #[cfg(test)]
    pub fn u(uid: u32) -> Self {
        Uid::of(uid).unwrap()
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

// Not a meaningful default, but lets types containing SeqRange<Uid> derive
// Default.
impl Default for Uid {
    fn default() -> Self {
        Uid::MIN
    }
}

impl TryFrom<u32> for Uid {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, ()> {
        Self::of(v).ok_or(())
    }
}

impl From<Uid> for u32 {
    fn from(uid: Uid) -> u32 {
        uid.0.get()
    }
}

/// The 1-based position of a message in the most recently flushed snapshot.
///
/// Sequence numbers shift as messages arrive and expunge, so they are only
/// meaningful relative to one connection's view at one point in time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seqnum(pub NonZeroU32);

impl Seqnum {
    pub const MIN: Self = Seqnum(NonZeroU32::MIN);

    pub fn of(seqnum: u32) -> Option<Self> {
        NonZeroU32::new(seqnum).map(Seqnum)
    }

    pub fn to_index(self) -> usize {
        self.0.get() as usize - 1
    }

    pub fn from_index(ix: usize) -> Self {
        Seqnum::of(u32::try_from(ix + 1).unwrap()).unwrap()
    }

    #[cfg(test)]
    pub fn u(seqnum: u32) -> Self {
        Seqnum::of(seqnum).unwrap()
    }
}

impl fmt::Debug for Seqnum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Seqnum({})", self.0.get())
    }
}

impl Default for Seqnum {
    fn default() -> Self {
        Seqnum::MIN
    }
}

impl TryFrom<u32> for Seqnum {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, ()> {
        Self::of(v).ok_or(())
    }
}

impl From<Seqnum> for u32 {
    fn from(seqnum: Seqnum) -> u32 {
        seqnum.0.get()
    }
}

/// A "sequence set" of sequence numbers or UIDs.
///
/// Internally this is maintained as a minimal sorted set of inclusive
/// ranges. It does not retain the original fragmentation, ordering, or
/// duplication, and there is no support for removal.
///
/// The `Display` format is the minimal IMAP wire form. IMAP has no way to
/// represent an empty sequence set; `Display` produces an empty (invalid)
/// string in that case.
#[derive(Clone, PartialEq, Eq)]
pub struct SeqRange<T> {
    parts: BTreeMap<u32, u32>,
    _t: PhantomData<T>,
}

impl<T> SeqRange<T> {
    pub fn new() -> Self {
        SeqRange {
            parts: BTreeMap::new(),
            _t: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl<T: TryFrom<u32> + Into<u32> + PartialOrd + Send + Sync> SeqRange<T> {
    /// Create a range containing just the given item.
    pub fn just(item: T) -> Self {
        let mut this = SeqRange::new();
        this.append(item);
        this
    }

    /// Create a range containing a single simple range.
    pub fn range(start: T, end: T) -> Self {
        let mut this = SeqRange::new();
        this.insert(start, end);
        this
    }

    /// Append a single item, which must be strictly greater than everything
    /// already inserted.
    pub fn append(&mut self, item: T) {
        let item: u32 = item.into();

        if let Some(end) = self.parts.values_mut().next_back() {
            assert!(item > *end);

            if item == *end + 1 {
                *end = item;
                return;
            }
        }

        self.parts.insert(item, item);
    }

    /// Insert the given inclusive range (in order) into this set.
    pub fn insert(&mut self, start_incl: T, end_incl: T) {
        assert!(end_incl >= start_incl);
        self.insert_raw(start_incl.into(), end_incl.into());
    }

    fn insert_raw(&mut self, start_incl: u32, mut end_incl: u32) {
        // Fuse any later ranges this one overlaps or abuts.
        loop {
            let following = self
                .parts
                .range((Excluded(start_incl), Unbounded))
                .next()
                .map(|(&start, &end)| (start, end));

            if let Some((following_start, following_end)) = following {
                if following_start - 1 <= end_incl {
                    end_incl = end_incl.max(following_end);
                    self.parts.remove(&following_start);
                    continue;
                }
            }

            break;
        }

        let preceding = self
            .parts
            .range((Unbounded, Included(end_incl)))
            .next_back()
            .map(|(&start, &end)| (start, end));
        if let Some((preceding_start, preceding_end)) = preceding {
            if preceding_end + 1 >= start_incl {
                if start_incl < preceding_start {
                    self.parts.remove(&preceding_start);
                    self.parts.insert(start_incl, end_incl.max(preceding_end));
                } else {
                    self.parts
                        .insert(preceding_start, end_incl.max(preceding_end));
                }
                return;
            }
        }

        self.parts.insert(start_incl, end_incl);
    }

    pub fn contains(&self, v: T) -> bool {
        let v: u32 = v.into();
        self.parts
            .range(..=v)
            .next_back()
            .filter(|&(_, &end)| end >= v)
            .is_some()
    }

    /// Iterate the items in this set in ascending order.
    ///
    /// Items greater than `max` are silently excluded.
    pub fn items(&self, max: impl Into<u32>) -> impl Iterator<Item = T> + '_ {
        let max: u32 = max.into();
        self.parts
            .iter()
            .map(|(&start, &end)| (start, end))
            .filter(move |&(start, _)| start <= max)
            .flat_map(move |(start, end)| start..=end.min(max))
            .filter_map(|v| T::try_from(v).ok())
    }

    /// Parse the IMAP wire form of a sequence set.
    ///
    /// `splat` is substituted for `*`.
    pub fn parse(raw: &str, splat: T) -> Option<Self> {
        fn term(r: &str, splat: u32) -> Option<u32> {
            if "*" == r {
                Some(splat)
            } else if r.len() > 1 && r.starts_with('0') {
                // Leading zeroes are not nz-number syntax
                None
            } else {
                r.parse().ok().filter(|&n| n > 0)
            }
        }

        let splat = splat.into();

        let mut this = Self::new();
        for part in raw.split(',') {
            let mut subs = part.split(':');
            match (subs.next(), subs.next(), subs.next()) {
                (Some(only), None, None) => {
                    let only = term(only, splat)?;
                    this.insert_raw(only, only);
                },
                (Some(start), Some(end), None) => {
                    let start = term(start, splat)?;
                    let end = term(end, splat)?;
                    // RFC 3501 allows the endpoints in either order
                    this.insert_raw(start.min(end), start.max(end));
                },
                _ => return None,
            }
        }

        if this.is_empty() {
            None
        } else {
            Some(this)
        }
    }

    pub fn len(&self) -> usize {
        self.parts
            .iter()
            .map(|(start, end)| end - start + 1)
            .sum::<u32>() as usize
    }

    /// The maximum raw value in this set.
    pub fn max(&self) -> Option<u32> {
        self.parts.values().next_back().copied()
    }
}

impl<T> fmt::Display for SeqRange<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (ix, (&start, &end)) in self.parts.iter().enumerate() {
            let delim = if 0 == ix { "" } else { "," };

            if start == end {
                write!(f, "{}{}", delim, start)?;
            } else {
                write!(f, "{}{}:{}", delim, start, end)?;
            }
        }

        Ok(())
    }
}

impl fmt::Debug for SeqRange<Seqnum> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[Seqnum {}]", self)
    }
}

impl fmt::Debug for SeqRange<Uid> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[Uid {}]", self)
    }
}

impl<T> Default for SeqRange<T> {
    fn default() -> Self {
        SeqRange::new()
    }
}

/// A message flag.
///
/// System flags are top-level enum values; keywords are in the `Keyword`
/// case. The `Display` form is the exact wire string; `FromStr` reverses it
/// and canonicalizes non-standard casing of the system flags.
///
/// `\Recent` is not represented here since it is not really a flag: it is
/// session-scoped and never stored.
#[derive(Clone)]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Seen,
    Keyword(String),
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Flag::Answered => write!(f, "\\Answered"),
            Flag::Deleted => write!(f, "\\Deleted"),
            Flag::Draft => write!(f, "\\Draft"),
            Flag::Flagged => write!(f, "\\Flagged"),
            Flag::Seen => write!(f, "\\Seen"),
            Flag::Keyword(ref kw) => write!(f, "{}", kw),
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <Flag as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for Flag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.eq_ignore_ascii_case("\\answered") {
            Ok(Flag::Answered)
        } else if s.eq_ignore_ascii_case("\\deleted") {
            Ok(Flag::Deleted)
        } else if s.eq_ignore_ascii_case("\\draft") {
            Ok(Flag::Draft)
        } else if s.eq_ignore_ascii_case("\\flagged") {
            Ok(Flag::Flagged)
        } else if s.eq_ignore_ascii_case("\\seen") {
            Ok(Flag::Seen)
        } else if s.starts_with('\\') {
            Err(Error::NxFlag)
        } else if !s.is_empty()
            && s.as_bytes().iter().copied().all(is_atom_char)
        {
            Ok(Flag::Keyword(s.to_owned()))
        } else {
            Err(Error::UnsafeName)
        }
    }
}

fn is_atom_char(ch: u8) -> bool {
    !matches!(
        ch,
        0..=b' '
            | 127..=255
            | b'('
            | b')'
            | b'{'
            | b'*'
            | b'%'
            | b'\\'
            | b'"'
            | b']'
    )
}

impl PartialEq for Flag {
    fn eq(&self, other: &Flag) -> bool {
        match (self, other) {
            (&Flag::Answered, &Flag::Answered)
            | (&Flag::Deleted, &Flag::Deleted)
            | (&Flag::Draft, &Flag::Draft)
            | (&Flag::Flagged, &Flag::Flagged)
            | (&Flag::Seen, &Flag::Seen) => true,
            // Keywords are conventionally case-insensitive even though RFC
            // 3501 doesn't require it. Only ASCII case-insensitivity; there
            // is no way to get non-ASCII flags within RFC 3501 anyway.
            (&Flag::Keyword(ref a), &Flag::Keyword(ref b)) => {
                a.eq_ignore_ascii_case(b)
            },
            _ => false,
        }
    }
}

impl Eq for Flag {}

/// Attributes that may be applied to mailboxes in `LIST` responses.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MailboxAttribute {
    Noselect,
    Noinferiors,
    Marked,
    Unmarked,
    HasChildren,
    HasNoChildren,
}

impl MailboxAttribute {
    pub fn name(&self) -> &'static str {
        match *self {
            MailboxAttribute::Noselect => "\\Noselect",
            MailboxAttribute::Noinferiors => "\\Noinferiors",
            MailboxAttribute::Marked => "\\Marked",
            MailboxAttribute::Unmarked => "\\Unmarked",
            MailboxAttribute::HasChildren => "\\HasChildren",
            MailboxAttribute::HasNoChildren => "\\HasNoChildren",
        }
    }
}

impl fmt::Display for MailboxAttribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Debug for MailboxAttribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <MailboxAttribute as fmt::Display>::fmt(self, f)
    }
}

/// Canonicalize a mailbox name: `INBOX` is matched case-insensitively and
/// normalised to upper case; everything else passes through.
pub fn canonical_mailbox_name(name: &str) -> String {
    if name.eq_ignore_ascii_case("INBOX") {
        "INBOX".to_owned()
    } else {
        name.to_owned()
    }
}

/// Request used for implementing `LIST` and `LSUB`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListRequest {
    /// The "reference" prefix. If non-empty, a `/` is appended (if not
    /// already there) and the pattern appended to that.
    pub reference: String,
    /// Pattern with `*` and `%` wildcards.
    pub pattern: String,
    /// Only match subscribed names (LSUB).
    pub select_subscribed: bool,
}

/// A `LIST` or `LSUB` response line.
///
/// The hierarchy delimiter is always `/` and is not included here.
#[derive(Debug, Clone, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct ListResponse {
    pub name: String,
    pub attributes: Vec<MailboxAttribute>,
}

/// The `STATUS` command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusRequest {
    pub name: String,
    pub messages: bool,
    pub recent: bool,
    pub uidnext: bool,
    pub uidvalidity: bool,
    pub unseen: bool,
}

/// The `STATUS` response; fields are set iff requested.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusResponse {
    pub name: String,
    pub messages: Option<usize>,
    pub recent: Option<usize>,
    pub uidnext: Option<u32>,
    pub uidvalidity: Option<u32>,
    pub unseen: Option<usize>,
}

/// Request information for `STORE` and `UID STORE`, addressed by UID after
/// the view has resolved sequence numbers.
#[derive(Clone, Debug)]
pub struct StoreRequest<'a> {
    pub ids: &'a SeqRange<Uid>,
    pub flags: &'a [Flag],
    /// If false, add the listed flags (`FLAGS`, `+FLAGS`). If true, remove
    /// them (`-FLAGS`).
    pub remove_listed: bool,
    /// If true, also remove any flag not listed (`FLAGS`).
    pub remove_unlisted: bool,
}

/// The `SEARCH` and `UID SEARCH` commands, with view-dependent keys
/// (sequence sets, `RECENT`, `NEW`, `OLD`) already resolved to UID sets.
#[derive(Clone, Debug, Default)]
pub struct SearchRequest {
    /// The top-level queries, which are ANDed together.
    pub queries: Vec<SearchQuery>,
}

#[derive(Clone, Debug)]
pub enum SearchQuery {
    All,
    Answered,
    Bcc(String),
    Before(NaiveDate),
    Body(String),
    Cc(String),
    Deleted,
    Draft,
    Flagged,
    From(String),
    Header(String, String),
    Keyword(String),
    Larger(u32),
    Not(Box<SearchQuery>),
    On(NaiveDate),
    Or(Box<SearchQuery>, Box<SearchQuery>),
    Seen,
    SentBefore(NaiveDate),
    SentOn(NaiveDate),
    SentSince(NaiveDate),
    Since(NaiveDate),
    Smaller(u32),
    Subject(String),
    Text(String),
    To(String),
    UidSet(SeqRange<Uid>),
    Unanswered,
    Undeleted,
    Undraft,
    Unflagged,
    Unkeyword(String),
    Unseen,
    And(Vec<SearchQuery>),
}

/// A single item to be processed by the `APPEND` command.
#[derive(Debug, Clone)]
pub struct AppendItem {
    pub flags: Vec<Flag>,
    /// The internal date; server-assigned if the client gave none.
    pub internal_date: DateTime<FixedOffset>,
    pub content: Arc<Vec<u8>>,
}

/// The response for `APPEND` (RFC 4315 `APPENDUID`).
#[derive(Debug, Clone)]
pub struct AppendResponse {
    pub uid_validity: u32,
    pub uids: SeqRange<Uid>,
}

/// The response for `COPY` and `UID COPY` (RFC 4315 `COPYUID`).
#[derive(Debug, Clone)]
pub struct CopyResponse {
    pub uid_validity: u32,
    pub from_uids: SeqRange<Uid>,
    pub to_uids: SeqRange<Uid>,
}

/// A `BODY[...]` section request, decoupled from the wire grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodySection {
    /// MIME part subscripts; empty for the top level.
    pub subscripts: Vec<u32>,
    pub kind: SectionKind,
    /// `<origin.length>` partial-fetch window.
    pub partial: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionKind {
    /// The entire (sub)part.
    Full,
    Header,
    /// `HEADER.FIELDS`, or `HEADER.FIELDS.NOT` when `negative`.
    HeaderFields {
        negative: bool,
        headers: Vec<String>,
    },
    Text,
    Mime,
}

/// Structured envelope data supplied by the backend's message parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeData {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<AddressData>,
    pub sender: Vec<AddressData>,
    pub reply_to: Vec<AddressData>,
    pub to: Vec<AddressData>,
    pub cc: Vec<AddressData>,
    pub bcc: Vec<AddressData>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressData {
    pub display_name: Option<String>,
    pub local_part: String,
    pub domain: String,
}

/// Structured body-structure data supplied by the backend's message parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyStructureData {
    SinglePart {
        media_type: String,
        media_subtype: String,
        content_type_parms: Vec<String>,
        content_id: Option<String>,
        content_description: Option<String>,
        content_transfer_encoding: String,
        size_octets: u32,
        /// Set for `TEXT/*` parts.
        size_lines: Option<u32>,
    },
    Multipart {
        media_subtype: String,
        parts: Vec<BodyStructureData>,
    },
}

/// Per-message data handed back by a backend fetch.
#[derive(Debug, Clone)]
pub struct MessageData {
    pub uid: Uid,
    pub flags: Vec<Flag>,
    pub internal_date: DateTime<FixedOffset>,
    pub size: u32,
    /// RFC 8474 EMAILID, stable across sessions.
    pub email_id: String,
    pub content: Arc<Vec<u8>>,
    pub envelope: EnvelopeData,
    pub body_structure: BodyStructureData,
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn assert_sr(
        expected_content: &[u32],
        expected_string: &str,
        seqrange: SeqRange<Uid>,
    ) {
        let actual: Vec<u32> =
            seqrange.items(u32::MAX).map(|u| u.0.get()).collect();
        assert_eq!(expected_content, &actual[..]);
        assert_eq!(expected_string, &seqrange.to_string());
    }

    #[test]
    fn seqrange_parsing() {
        assert_sr(&[1], "1", SeqRange::parse("1", Uid::u(10)).unwrap());
        assert_sr(&[10], "10", SeqRange::parse("*", Uid::u(10)).unwrap());
        assert_sr(&[1, 2], "1:2", SeqRange::parse("1:2", Uid::u(10)).unwrap());
        assert_sr(&[1, 2], "1:2", SeqRange::parse("2:1", Uid::u(10)).unwrap());
        assert_sr(
            &[9, 10],
            "9:10",
            SeqRange::parse("9:*", Uid::u(10)).unwrap(),
        );
        assert_sr(
            &[9, 10],
            "9:10",
            SeqRange::parse("*:9", Uid::u(10)).unwrap(),
        );
        assert_sr(
            &[1, 2, 9, 10],
            "1:2,9:10",
            SeqRange::parse("1:2,9:*", Uid::u(10)).unwrap(),
        );

        // Adjacent and overlapping ranges fuse
        assert_sr(
            &[1, 2, 3, 4],
            "1:4",
            SeqRange::parse("1,2,3,4", Uid::u(10)).unwrap(),
        );
        assert_sr(
            &[1, 2, 3, 4],
            "1:4",
            SeqRange::parse("1:3,2:4", Uid::u(10)).unwrap(),
        );
        assert_sr(
            &[1, 2, 3, 4],
            "1:4",
            SeqRange::parse("2:3,1:4", Uid::u(10)).unwrap(),
        );

        assert_eq!(None, SeqRange::parse("", Uid::u(10)));
        assert_eq!(None, SeqRange::parse("0", Uid::u(10)));
        assert_eq!(None, SeqRange::parse("01", Uid::u(10)));
        assert_eq!(None, SeqRange::parse("1:2:3", Uid::u(10)));
        assert_eq!(None, SeqRange::parse("x", Uid::u(10)));
    }

    #[test]
    fn seqrange_append() {
        let mut seqrange = SeqRange::new();
        seqrange.append(Uid::u(1));
        assert_eq!("1", &seqrange.to_string());
        seqrange.append(Uid::u(2));
        assert_eq!("1:2", &seqrange.to_string());
        seqrange.append(Uid::u(3));
        assert_eq!("1:3", &seqrange.to_string());
        seqrange.append(Uid::u(5));
        assert_eq!("1:3,5", &seqrange.to_string());
        seqrange.append(Uid::u(6));
        assert_eq!("1:3,5:6", &seqrange.to_string());
    }

    #[test]
    fn flag_parsing() {
        assert_eq!(Flag::Seen, "\\Seen".parse::<Flag>().unwrap());
        assert_eq!(Flag::Seen, "\\SEEN".parse::<Flag>().unwrap());
        assert_eq!(
            Flag::Keyword("NotJunk".to_owned()),
            "notjunk".parse::<Flag>().unwrap(),
        );
        assert!("\\Bogus".parse::<Flag>().is_err());
        assert!("bad flag".parse::<Flag>().is_err());
    }

    #[test]
    fn inbox_canonicalization() {
        assert_eq!("INBOX", canonical_mailbox_name("inBoX"));
        assert_eq!("Inboxes", canonical_mailbox_name("Inboxes"));
    }

    proptest! {
        #[test]
        fn seqrange_properties(
            ranges in prop::collection::vec((1u32..30, 1u32..=10), 1..=5)
        ) {
            let mut expected = Vec::new();
            let mut seqrange = SeqRange::new();

            for &(start, extent) in &ranges {
                seqrange.insert(Uid::u(start), Uid::u(start + extent));
                expected.extend(start..=start + extent);
            }

            expected.sort();
            expected.dedup();

            let actual: Vec<u32> = seqrange.items(u32::MAX).map(
                |u| u.0.get()).collect();
            assert_eq!(expected, actual);

            for i in 1..50 {
                assert_eq!(
                    expected.contains(&i),
                    seqrange.contains(Uid::u(i)),
                    "Bad contains result for {}",
                    i
                );
            }

            // Round-trips through the wire form
            assert_eq!(
                seqrange,
                SeqRange::parse(&seqrange.to_string(), Uid::MAX).unwrap());
        }
    }
}
