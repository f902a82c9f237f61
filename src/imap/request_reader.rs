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

//! Manages the state of the network input: line framing, literal
//! continuations, and the special `APPEND` flow.
//!
//! A command accumulates into an internal buffer one line at a time. When a
//! line ends with a literal token (`{n}`, `{n+}`, or `~{n}`), the caller is
//! asked to emit a continuation request (for the synchronising form), the
//! literal's octets are pulled into the buffer verbatim, and accumulation
//! continues with the next line. The zero-copy command parser then reads
//! the completed buffer.
//!
//! `APPEND` is the exception: its literals can be far larger than the
//! buffer, so the reader surfaces `AppendStart` before consuming the
//! message octets and the server streams them straight into the backend's
//! buffer.

use std::io;

use chrono::prelude::*;
use lazy_static::lazy_static;
use regex::bytes::Regex;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite,
};

use super::response_writer::ResponseWriter;
use super::syntax as s;
use crate::account::model::Flag;

lazy_static! {
    static ref LITERAL_AT_EOL: Regex =
        Regex::new(r#"~?\{([0-9]+)\+?\}$"#).unwrap();
}

pub const MAX_CMDLINE: usize = 65536;

pub struct RequestReader<R> {
    io: R,
    cmdline: Vec<u8>,
    /// Scratch line used by `read_raw_line` (IDLE `DONE` handling), kept
    /// here so a cancelled read does not lose a partial line.
    raw_line: Vec<u8>,
}

/// The pieces of an `APPEND` message header, owned so the buffer can keep
/// moving while the server streams the literal.
#[derive(Debug, Clone, Default)]
pub struct AppendFragmentData {
    pub flags: Option<Vec<Flag>>,
    pub internal_date: Option<DateTime<FixedOffset>>,
}

/// Possible outcomes of trying to read the start of a command.
pub enum CommandStart<'a> {
    /// A full line was received but it could not even be split into a tag
    /// and a command.
    Incomprehensible,
    /// A full line was received but the command could not be parsed. The
    /// value is the tag.
    Bad(String),
    /// An excessively long command was received and skipped. The value is
    /// the tag, if one could be recovered.
    TooLong(Option<String>),
    /// A complete stand-alone command.
    StandAlone(s::CommandLine<'a>),
    /// The start of an `APPEND`. No continuation has been sent; the server
    /// must either accept the literal (continuation + `append_literal` +
    /// `continue_append`) or reject it with `discard_command`.
    AppendStart {
        tag: String,
        mailbox: String,
        first: AppendFragmentData,
        size: u32,
        literal_plus: bool,
    },
    /// The start of an `AUTHENTICATE`. No continuation has been sent.
    AuthenticateStart {
        tag: String,
        mechanism: String,
        initial_response: Option<String>,
    },
}

pub enum AppendContinuation {
    /// Another message follows in the same `APPEND`.
    NextPart {
        fragment: AppendFragmentData,
        size: u32,
        literal_plus: bool,
    },
    /// The `APPEND` command is complete.
    Done,
    /// The continued syntax is invalid. The protocol has been
    /// resynchronised.
    SyntaxError,
}

impl<R: AsyncBufRead + AsyncRead + Unpin> RequestReader<R> {
    pub fn new(io: R) -> Self {
        RequestReader {
            io,
            cmdline: Vec::new(),
            raw_line: Vec::new(),
        }
    }

    pub fn into_inner(self) -> R {
        self.io
    }

    /// Whether any input is sitting in the line buffer, which would mean
    /// the client pipelined data behind the current command.
    pub fn has_buffered_input(&self) -> bool {
        !self.cmdline.is_empty()
    }

    /// Read the start of the next command.
    ///
    /// `out` is used to emit `+ go` continuation requests when a
    /// synchronising literal needs more data.
    pub async fn read_command_start<'a, W: AsyncWrite + Unpin>(
        &'a mut self,
        out: &mut ResponseWriter<W>,
    ) -> io::Result<CommandStart<'a>> {
        self.cmdline.clear();

        let mut nread = match self.buffer_next_line().await? {
            Some(n) => n,
            None => return self.command_too_long().await,
        };

        loop {
            let Some((before_len, len, literal_plus)) =
                check_literal(&self.cmdline, nread)
            else {
                break;
            };

            // APPEND gets special treatment: the literal is the message
            // itself and is not buffered here.
            if let Ok((b"", append)) =
                s::AppendCommandStart::parse(&self.cmdline[..before_len])
            {
                let start = CommandStart::AppendStart {
                    tag: append.tag.into_owned(),
                    mailbox: append.mailbox.into_owned(),
                    first: AppendFragmentData {
                        flags: append.first_fragment.flags,
                        internal_date: append.first_fragment.internal_date,
                    },
                    size: len,
                    literal_plus,
                };
                return Ok(start);
            }

            // An inline literal; check it fits, request it if
            // synchronising, and splice it into the buffer.
            if len as usize + self.cmdline.len() > MAX_CMDLINE {
                let tag = s::parse_unknown_tag(&self.cmdline);
                if literal_plus {
                    // The client has already committed to sending the
                    // over-long line, so it all has to be consumed.
                    self.discard_command(Some((len, literal_plus))).await?;
                }
                // For the synchronising form, the rejection itself aborts
                // the literal and resynchronises.
                return Ok(CommandStart::TooLong(tag));
            }

            if !literal_plus {
                out.write_continuation("go").await?;
            }

            self.cmdline.extend_from_slice(b"\r\n");
            let consumed = (&mut self.io)
                .take(len.into())
                .read_to_end(&mut self.cmdline)
                .await?;
            if consumed != len as usize {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF reading literal",
                ));
            }

            nread = match self.buffer_next_line().await? {
                Some(n) => n,
                None => return self.command_too_long().await,
            };
        }

        if let Ok((b"", auth)) =
            s::AuthenticateCommandStart::parse(&self.cmdline)
        {
            return Ok(CommandStart::AuthenticateStart {
                tag: auth.tag.into_owned(),
                mechanism: auth.mechanism.into_owned(),
                initial_response: auth
                    .initial_response
                    .map(|r| r.into_owned()),
            });
        }

        if let Ok((b"", command_line)) = s::CommandLine::parse(&self.cmdline)
        {
            return Ok(CommandStart::StandAlone(command_line));
        }

        match s::parse_unknown_tag(&self.cmdline) {
            Some(tag) => Ok(CommandStart::Bad(tag)),
            None => Ok(CommandStart::Incomprehensible),
        }
    }

    /// Read a single raw line (for `IDLE`'s `DONE` and `AUTHENTICATE`
    /// continuations). CRLF is stripped.
    ///
    /// Cancel-safe: a partial line survives cancellation and is completed
    /// by the next call.
    pub async fn read_raw_line(&mut self) -> io::Result<Vec<u8>> {
        let nread = (&mut self.io)
            .take(MAX_CMDLINE as u64)
            .read_until(b'\n', &mut self.raw_line)
            .await?;
        if 0 == nread && !self.raw_line.ends_with(b"\n") {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF reached before reading full line",
            ));
        }

        let mut line = std::mem::take(&mut self.raw_line);
        if line.ends_with(b"\n") {
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
        }
        Ok(line)
    }

    /// An `AsyncRead` covering exactly the `len` octets of an `APPEND`
    /// literal. It must be consumed in its entirety to keep the protocol
    /// consistent.
    pub fn append_literal(
        &mut self,
        len: u32,
    ) -> impl AsyncRead + Unpin + '_ {
        (&mut self.io).take(len.into())
    }

    /// Continue parsing an `APPEND` after its previous literal was fully
    /// consumed.
    pub async fn continue_append(
        &mut self,
    ) -> io::Result<AppendContinuation> {
        self.cmdline.clear();
        let nread = match self.buffer_next_line().await? {
            Some(n) => n,
            None => {
                self.skip_overlong_line().await?;
                return Ok(AppendContinuation::SyntaxError);
            },
        };

        // An empty line ends the append
        if self.cmdline.is_empty() {
            return Ok(AppendContinuation::Done);
        }

        let Some((before_len, size, literal_plus)) =
            check_literal(&self.cmdline, nread)
        else {
            return Ok(AppendContinuation::SyntaxError);
        };

        // RFC 3502 separates append messages with a space, which lands at
        // the front of the continuation line.
        let fragment_text = self.cmdline[..before_len]
            .strip_prefix(b" ")
            .unwrap_or(&self.cmdline[..before_len]);
        match s::AppendFragment::parse(fragment_text) {
            Ok((b"", fragment)) => Ok(AppendContinuation::NextPart {
                fragment: AppendFragmentData {
                    flags: fragment.flags,
                    internal_date: fragment.internal_date,
                },
                size,
                literal_plus,
            }),
            _ => {
                self.discard_command(Some((size, literal_plus))).await?;
                Ok(AppendContinuation::SyntaxError)
            },
        }
    }

    /// Discard input until the end of the current command is reached.
    ///
    /// The caller knows the command is incomplete; `literal_info` gives any
    /// unconsumed literal at the end of the current line. Non-LITERAL+
    /// literals need no skipping since the error response already aborted
    /// them.
    pub async fn discard_command(
        &mut self,
        mut literal_info: Option<(u32, bool)>,
    ) -> io::Result<()> {
        loop {
            if let Some((len, literal_plus)) = literal_info.take() {
                if !literal_plus {
                    break;
                }

                let mut remaining = u64::from(len);
                let mut sink = [0u8; 4096];
                while remaining > 0 {
                    let chunk = remaining.min(sink.len() as u64) as usize;
                    let n = self.io.read(&mut sink[..chunk]).await?;
                    if 0 == n {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "EOF discarding literal",
                        ));
                    }
                    remaining -= n as u64;
                }
            }

            self.cmdline.clear();
            let nread = match self.buffer_next_line().await? {
                Some(n) => n,
                None => {
                    self.skip_overlong_line().await?;
                    break;
                },
            };

            match check_literal(&self.cmdline, nread) {
                Some((_, len, literal_plus)) => {
                    literal_info = Some((len, literal_plus));
                },
                // Reached end of line without literal; command is done
                None => break,
            }
        }

        self.cmdline.clear();
        Ok(())
    }

    /// Read the next line, appending it to `cmdline` with the line ending
    /// removed.
    ///
    /// Returns the number of bytes added, or `None` if the command line
    /// limit was exceeded (with the partial line still buffered).
    async fn buffer_next_line(&mut self) -> io::Result<Option<usize>> {
        let budget = (MAX_CMDLINE - self.cmdline.len().min(MAX_CMDLINE)) + 1;
        let mut nread = (&mut self.io)
            .take(budget as u64)
            .read_until(b'\n', &mut self.cmdline)
            .await?;

        if 0 == nread {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF reached before reading full line",
            ));
        }

        if self.cmdline.len() > MAX_CMDLINE || !self.cmdline.ends_with(b"\n")
        {
            return Ok(None);
        }

        self.cmdline.pop();
        nread -= 1;
        if self.cmdline.ends_with(b"\r") {
            self.cmdline.pop();
            nread -= 1;
        }

        Ok(Some(nread))
    }

    async fn command_too_long(&mut self) -> io::Result<CommandStart<'_>> {
        let tag = s::parse_unknown_tag(&self.cmdline);
        self.skip_overlong_line().await?;
        Ok(CommandStart::TooLong(tag))
    }

    /// Discard the remainder of a line that overflowed the buffer.
    async fn skip_overlong_line(&mut self) -> io::Result<()> {
        if self.cmdline.ends_with(b"\n") {
            self.cmdline.clear();
            return Ok(());
        }

        let mut scratch = Vec::new();
        loop {
            scratch.clear();
            let nread = (&mut self.io)
                .take(4096)
                .read_until(b'\n', &mut scratch)
                .await?;
            if 0 == nread {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF skipping over-long line",
                ));
            }
            if scratch.ends_with(b"\n") {
                break;
            }
        }

        self.cmdline.clear();
        Ok(())
    }
}

/// Check whether the current command line ends with a literal.
///
/// Only the last `nread` bytes are checked, so that literals spliced into
/// the buffer by earlier continuations are not re-examined.
fn check_literal(
    cmdline: &[u8],
    nread: usize,
) -> Option<(usize, u32, bool)> {
    let start = cmdline.len() - nread.min(cmdline.len());
    LITERAL_AT_EOL
        .captures(&cmdline[start..])
        .and_then(|c| c.get(0).and_then(|m0| c.get(1).map(|m1| (m0, m1))))
        .and_then(|(m0, m1)| {
            std::str::from_utf8(m1.as_bytes())
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .map(|len| {
                    (
                        start + m0.start(),
                        len,
                        m0.as_bytes().contains(&b'+'),
                    )
                })
        })
}

#[cfg(test)]
mod test {
    use super::*;

    fn reader(input: &[u8]) -> RequestReader<io::Cursor<Vec<u8>>> {
        RequestReader::new(io::Cursor::new(input.to_vec()))
    }

    fn out() -> ResponseWriter<io::Cursor<Vec<u8>>> {
        ResponseWriter::new(io::Cursor::new(Vec::new()))
    }

    #[tokio::test]
    async fn reads_simple_command() {
        let mut reader = reader(b"a1 NOOP\r\n");
        match reader.read_command_start(&mut out()).await.unwrap() {
            CommandStart::StandAlone(line) => {
                assert_eq!("a1", line.tag);
                assert_eq!(
                    s::Command::Simple(s::SimpleCommand::Noop),
                    line.cmd,
                );
            },
            _ => panic!("expected StandAlone"),
        }
    }

    #[tokio::test]
    async fn splices_synchronising_literal() {
        let mut reader = reader(b"a1 LOGIN {4}\r\nfred {6}\r\nsecret\r\n");
        match reader.read_command_start(&mut out()).await.unwrap() {
            CommandStart::StandAlone(line) => match line.cmd {
                s::Command::LogIn(login) => {
                    assert_eq!("fred", login.userid);
                    assert_eq!("secret", login.password);
                },
                cmd => panic!("unexpected command: {:?}", cmd),
            },
            _ => panic!("expected StandAlone"),
        }
    }

    #[tokio::test]
    async fn accepts_non_synchronising_literal() {
        let mut reader = reader(b"a1 LOGIN {4+}\r\nfred secret\r\n");
        match reader.read_command_start(&mut out()).await.unwrap() {
            CommandStart::StandAlone(line) => match line.cmd {
                s::Command::LogIn(login) => {
                    assert_eq!("fred", login.userid);
                    assert_eq!("secret", login.password);
                },
                cmd => panic!("unexpected command: {:?}", cmd),
            },
            _ => panic!("expected StandAlone"),
        }
    }

    #[tokio::test]
    async fn surfaces_append_start_without_consuming_literal() {
        let mut reader = reader(
            b"d APPEND INBOX (\\Flagged) {38+}\r\nFrom: x\r\n\r\nbody\r\n",
        );
        let (size, literal_plus) = match reader
            .read_command_start(no_continuation)
            .await
            .unwrap()
        {
            CommandStart::AppendStart {
                tag,
                mailbox,
                first,
                size,
                literal_plus,
            } => {
                assert_eq!("d", tag);
                assert_eq!("INBOX", mailbox);
                assert_eq!(Some(vec![Flag::Flagged]), first.flags);
                (size, literal_plus)
            },
            _ => panic!("expected AppendStart"),
        };
        assert_eq!(38, size);
        assert!(literal_plus);
    }

    #[tokio::test]
    async fn bad_and_incomprehensible_lines() {
        let mut reader = reader(b"a1 FROBNICATE\r\n\"\r\n");
        assert!(matches!(
            reader.read_command_start(&mut out()).await.unwrap(),
            CommandStart::Bad(ref tag) if "a1" == tag,
        ));
        assert!(matches!(
            reader.read_command_start(&mut out()).await.unwrap(),
            CommandStart::Incomprehensible,
        ));
    }

    #[tokio::test]
    async fn raw_line_strips_crlf() {
        let mut reader = reader(b"DONE\r\n");
        assert_eq!(b"DONE".to_vec(), reader.read_raw_line().await.unwrap());
    }
}
