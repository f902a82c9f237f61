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

//! Utilities for *writing* values under IMAP's lexical rules.
//!
//! This is write-only since IMAP's lexical syntax is not separable from its
//! grammar. Every free-form string leaves the server in one of three forms,
//! chosen by a single classifier: bare atom, quoted string, or literal.
//! Mailbox names additionally pass through modified UTF-7 on the way out.

use std::fmt;
use std::io::{self, Read, Write};
use std::mem;

use chrono::prelude::*;

use super::literal_source::LiteralSource;
use super::utf7;
use crate::account::model::Flag;

/// The wire forms a free-form string can take, cheapest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StringForm {
    Atom,
    Quoted,
    Literal,
}

/// Decide how a string must be encoded.
///
/// The atom form is deliberately conservative: only `a-zA-Z0-9=?/+_.-`
/// qualifies (a set chosen to also cover RFC 2047 encoded words), and never
/// the word "NIL", which would read back as the absence marker. Quoting is
/// ruled out by controls, 8-bit bytes, backslashes, double quotes, or
/// anything 100 bytes and over; the rest becomes a literal.
fn string_form(s: &str) -> StringForm {
    let atom_safe = |b: u8| {
        b.is_ascii_alphanumeric()
            || matches!(b, b'=' | b'?' | b'/' | b'+' | b'_' | b'.' | b'-')
    };
    if !s.is_empty()
        && !s.eq_ignore_ascii_case("nil")
        && s.bytes().all(atom_safe)
    {
        return StringForm::Atom;
    }

    let quote_safe =
        |b: u8| matches!(b, b' '..=b'~') && b'"' != b && b'\\' != b;
    if s.len() < 100 && s.bytes().all(quote_safe) {
        StringForm::Quoted
    } else {
        StringForm::Literal
    }
}

pub struct LexWriter<W> {
    sink: W,
    literal_plus: bool,
}

impl<W: LexOutput> LexWriter<W> {
    /// Create a `LexWriter` over the given sink.
    ///
    /// `literal_plus` selects the non-synchronising `{n+}` literal form,
    /// which only the test client (speaking LITERAL+) uses.
    pub fn new(sink: W, literal_plus: bool) -> Self {
        LexWriter { sink, literal_plus }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.sink
    }

    pub fn raw(&mut self, text: &str) -> io::Result<()> {
        self.sink.write_all(text.as_bytes())
    }

    pub fn nil(&mut self) -> io::Result<()> {
        self.raw("NIL")
    }

    pub fn number(&mut self, value: &impl fmt::Display) -> io::Result<()> {
        write!(self.sink, "{}", value)
    }

    pub fn flag(&mut self, flag: &Flag) -> io::Result<()> {
        write!(self.sink, "{}", flag)
    }

    pub fn astring(&mut self, s: &str) -> io::Result<()> {
        match string_form(s) {
            StringForm::Atom => self.raw(s),
            _ => self.string(s),
        }
    }

    pub fn string(&mut self, s: &str) -> io::Result<()> {
        match string_form(s) {
            StringForm::Literal => self.literal(
                false,
                io::Cursor::new(s.as_bytes().to_vec()),
                s.len() as u64,
            ),
            _ => write!(self.sink, "\"{}\"", s),
        }
    }

    pub fn nstring(&mut self, s: &Option<impl AsRef<str>>) -> io::Result<()> {
        match s.as_ref() {
            None => self.nil(),
            Some(s) => self.string(s.as_ref()),
        }
    }

    /// Write a mailbox name, applying modified UTF-7 on the way out.
    pub fn mailbox(&mut self, name: &str) -> io::Result<()> {
        let wire = utf7::encode(name);
        match string_form(&wire) {
            StringForm::Atom => self.raw(&wire),
            _ => self.string(&wire),
        }
    }

    pub fn literal(
        &mut self,
        binary: bool,
        data: impl Read + Send + 'static,
        len: u64,
    ) -> io::Result<()> {
        let marker = if binary { "~" } else { "" };
        // RFC 3516 binary literals have no non-synchronising form
        let plus = if self.literal_plus && !binary { "+" } else { "" };
        write!(self.sink, "{}{{{}{}}}\r\n", marker, len, plus)?;
        self.sink.defer(data)
    }

    pub fn literal_source(&mut self, ls: &mut LiteralSource) -> io::Result<()> {
        self.literal(
            ls.binary,
            mem::replace(&mut ls.data, Box::new(&[][..])),
            ls.len,
        )
    }

    pub fn date(&mut self, date: &NaiveDate) -> io::Result<()> {
        write!(self.sink, "\"{}\"", date.format("%-d-%b-%Y"))
    }

    pub fn datetime(
        &mut self,
        datetime: &DateTime<FixedOffset>,
    ) -> io::Result<()> {
        write!(
            self.sink,
            "\"{}\"",
            datetime.format("%_d-%b-%Y %H:%M:%S %z")
        )
    }
}

/// The sink a `LexWriter` feeds.
///
/// Beyond plain `Write`, a sink can accept a large payload as a reader to
/// be replayed at the current position later, so message bodies never pass
/// through the text buffer.
pub trait LexOutput: Write {
    fn defer<R: Read + Send + 'static>(&mut self, data: R) -> io::Result<()>;
}

impl LexOutput for Vec<u8> {
    fn defer<R: Read + Send + 'static>(
        &mut self,
        mut data: R,
    ) -> io::Result<()> {
        io::copy(&mut data, self)?;
        Ok(())
    }
}

impl LexOutput for &mut Vec<u8> {
    fn defer<R: Read + Send + 'static>(
        &mut self,
        mut data: R,
    ) -> io::Result<()> {
        io::copy(&mut data, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn to_str(l: LexWriter<Vec<u8>>) -> String {
        String::from_utf8(l.into_inner()).unwrap()
    }

    #[test]
    fn string_form_classification() {
        assert_eq!(StringForm::Atom, string_form("foo"));
        assert_eq!(StringForm::Atom, string_form("=?utf-8?q?x?="));
        assert_eq!(StringForm::Quoted, string_form(""));
        assert_eq!(StringForm::Quoted, string_form("nil"));
        assert_eq!(StringForm::Quoted, string_form("foo bar"));
        assert_eq!(StringForm::Literal, string_form("foo\\bar"));
        assert_eq!(StringForm::Literal, string_form("f\u{f6}\u{f6}"));
        assert_eq!(StringForm::Literal, string_form(&"x".repeat(100)));
    }

    #[test]
    fn astring_forms() {
        let mut l = LexWriter::new(Vec::<u8>::new(), false);
        l.astring("foo").unwrap();
        l.raw(" ").unwrap();
        l.astring("nil").unwrap();
        l.raw(" ").unwrap();
        l.astring("NIL").unwrap();
        l.raw(" ").unwrap();
        l.astring("foo bar").unwrap();
        l.raw(" ").unwrap();
        l.astring("foo\\ bar").unwrap();

        assert_eq!(
            "foo \"nil\" \"NIL\" \"foo bar\" {8}\r\nfoo\\ bar",
            to_str(l),
        );
    }

    #[test]
    fn literal_plus_changes_delimiter() {
        let mut l = LexWriter::new(Vec::<u8>::new(), true);
        l.string("foo\\bar").unwrap();
        assert_eq!("{7+}\r\nfoo\\bar", to_str(l));
    }

    #[test]
    fn mailbox_applies_mutf7() {
        let mut l = LexWriter::new(Vec::<u8>::new(), false);
        l.mailbox("INBOX").unwrap();
        l.raw(" ").unwrap();
        l.mailbox("Lost & Found").unwrap();
        l.raw(" ").unwrap();
        l.mailbox("~peter/mail/台北/日本語").unwrap();

        assert_eq!(
            "INBOX \"Lost &- Found\" \"~peter/mail/&U,BTFw-/&ZeVnLIqe-\"",
            to_str(l)
        );
    }

    #[test]
    fn flags_and_numbers() {
        let mut l = LexWriter::new(Vec::<u8>::new(), false);

        l.flag(&Flag::Flagged).unwrap();
        l.raw(" ").unwrap();
        l.flag(&Flag::Keyword("foo".to_owned())).unwrap();
        l.raw(" ").unwrap();
        l.number(&42u32).unwrap();

        assert_eq!("\\Flagged foo 42", to_str(l));
    }

    #[test]
    fn dates() {
        let mut l = LexWriter::new(Vec::<u8>::new(), false);
        l.datetime(
            &FixedOffset::east_opt(3600)
                .unwrap()
                .with_ymd_and_hms(2020, 7, 4, 16, 31, 0)
                .unwrap(),
        )
        .unwrap();
        l.raw(" ").unwrap();
        l.date(&NaiveDate::from_ymd_opt(2020, 7, 4).unwrap()).unwrap();

        assert_eq!("\" 4-Jul-2020 16:31:00 +0100\" \"4-Jul-2020\"", to_str(l));
    }
}
