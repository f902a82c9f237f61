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

//! Buffered response output.
//!
//! Responses are serialised synchronously into an internal buffer through
//! `LexWriter`; large literals are retained as readers ("splices") and only
//! replayed during the async flush, so a megabyte `BODY[]` never sits in
//! the text buffer.
//!
//! Untagged `FETCH` responses are not written immediately: they queue up
//! and merge by sequence number, so a flag update discovered by the poll
//! cycle and the explicit `FETCH` data for the same message leave as one
//! response. Any non-`FETCH` response flushes the queue first, which keeps
//! ordering sane.

use std::io::{self, Read};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::lex::{LexOutput, LexWriter};
use super::syntax as s;

pub struct ResponseWriter<W> {
    io: W,
    buffer: Buffer,
    pending_fetch: Vec<(u32, s::MsgAtts<'static>)>,
    literal_plus: bool,
}

#[derive(Default)]
struct Buffer {
    text: Vec<u8>,
    splices: Vec<Splice>,
}

struct Splice {
    offset: usize,
    data: Box<dyn Read + Send>,
}

impl<W: AsyncWrite + Unpin> ResponseWriter<W> {
    pub fn new(io: W) -> Self {
        ResponseWriter {
            io,
            buffer: Buffer::default(),
            pending_fetch: Vec::new(),
            literal_plus: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.io
    }

    /// Enable non-synchronising literals on output (the client advertised
    /// `LITERAL+` by using it, or we simply always may per RFC 7888 when
    /// the capability is advertised).
    pub fn set_literal_plus(&mut self, literal_plus: bool) {
        self.literal_plus = literal_plus;
    }

    /// Buffer one full response line.
    pub fn send(&mut self, mut line: s::ResponseLine<'_>) -> io::Result<()> {
        self.flush_fetch_queue()?;
        self.write_line(&mut line)
    }

    /// Buffer an untagged response.
    pub fn send_untagged(
        &mut self,
        response: s::Response<'_>,
    ) -> io::Result<()> {
        self.send(s::ResponseLine {
            tag: None,
            response,
        })
    }

    /// Queue an untagged `FETCH` response, merging it with any queued
    /// response for the same sequence number. Within one message, a later
    /// attribute of the same kind replaces the earlier one.
    pub fn queue_fetch(
        &mut self,
        seqnum: u32,
        atts: s::MsgAtts<'static>,
    ) -> io::Result<()> {
        if let Some(&mut (_, ref mut existing)) = self
            .pending_fetch
            .iter_mut()
            .find(|&&mut (n, _)| n == seqnum)
        {
            for att in atts.atts {
                existing
                    .atts
                    .retain(|prior| att_key(prior) != att_key(&att));
                existing.atts.push(att);
            }
        } else {
            self.pending_fetch.push((seqnum, atts));
        }

        Ok(())
    }

    /// Serialise all queued `FETCH` responses.
    pub fn flush_fetch_queue(&mut self) -> io::Result<()> {
        for (seqnum, atts) in std::mem::take(&mut self.pending_fetch) {
            self.write_line(&mut s::ResponseLine {
                tag: None,
                response: s::Response::Fetch(s::FetchData { seqnum, atts }),
            })?;
        }
        Ok(())
    }

    fn write_line(&mut self, line: &mut s::ResponseLine<'_>) -> io::Result<()> {
        let literal_plus = self.literal_plus;
        let mut lex = LexWriter::new(&mut self.buffer, literal_plus);
        line.write_to(&mut lex)?;
        self.buffer.text.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Send a continuation request (`+ prompt`) and flush immediately,
    /// since the client is waiting on it.
    pub async fn write_continuation(
        &mut self,
        prompt: &str,
    ) -> io::Result<()> {
        self.flush_fetch_queue()?;
        self.buffer.text.extend_from_slice(b"+ ");
        self.buffer.text.extend_from_slice(prompt.as_bytes());
        self.buffer.text.extend_from_slice(b"\r\n");
        self.flush().await
    }

    /// Write everything buffered to the underlying stream.
    pub async fn flush(&mut self) -> io::Result<()> {
        self.flush_fetch_queue()?;

        let mut offset = 0usize;
        let mut chunk = [0u8; 4096];
        for mut splice in self.buffer.splices.drain(..) {
            if splice.offset > offset {
                self.io
                    .write_all(&self.buffer.text[offset..splice.offset])
                    .await?;
                offset = splice.offset;
            }

            loop {
                let nread = splice.data.read(&mut chunk)?;
                if 0 == nread {
                    break;
                }
                self.io.write_all(&chunk[..nread]).await?;
            }
        }

        if offset < self.buffer.text.len() {
            self.io.write_all(&self.buffer.text[offset..]).await?;
        }

        self.buffer.text.clear();
        self.io.flush().await?;
        Ok(())
    }
}

impl io::Write for &mut Buffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.text.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LexOutput for &mut Buffer {
    fn defer<R: Read + Send + 'static>(&mut self, data: R) -> io::Result<()> {
        self.splices.push(Splice {
            offset: self.text.len(),
            data: Box::new(data),
        });
        Ok(())
    }
}

/// The identity of a fetch attribute for last-writer-wins merging.
#[derive(PartialEq, Eq)]
enum AttKey {
    Envelope,
    InternalDate,
    Rfc822Full,
    Rfc822Header,
    Rfc822Text,
    Rfc822Size,
    ShortBodyStructure,
    ExtendedBodyStructure,
    Body(String),
    Binary(Vec<u32>),
    Uid,
    EmailId,
    Flags,
}

fn att_key(att: &s::MsgAtt<'_>) -> AttKey {
    match *att {
        s::MsgAtt::Envelope(..) => AttKey::Envelope,
        s::MsgAtt::InternalDate(..) => AttKey::InternalDate,
        s::MsgAtt::Rfc822Full(..) => AttKey::Rfc822Full,
        s::MsgAtt::Rfc822Header(..) => AttKey::Rfc822Header,
        s::MsgAtt::Rfc822Text(..) => AttKey::Rfc822Text,
        s::MsgAtt::Rfc822Size(..) => AttKey::Rfc822Size,
        s::MsgAtt::ShortBodyStructure(..) => AttKey::ShortBodyStructure,
        s::MsgAtt::ExtendedBodyStructure(..) => {
            AttKey::ExtendedBodyStructure
        },
        s::MsgAtt::Body(ref body) => AttKey::Body(format!(
            "{:?}<{:?}>",
            body.section, body.slice_origin,
        )),
        s::MsgAtt::Binary(ref binary) => {
            AttKey::Binary(binary.section.clone())
        },
        s::MsgAtt::Uid(..) => AttKey::Uid,
        s::MsgAtt::EmailId(..) => AttKey::EmailId,
        s::MsgAtt::Flags(..) => AttKey::Flags,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::account::model::Flag;

    fn flags_att(flags: Vec<Flag>) -> s::MsgAtts<'static> {
        s::MsgAtts {
            atts: vec![s::MsgAtt::Flags(s::FlagsFetch::NotRecent(flags))],
        }
    }

    type TestWriter = ResponseWriter<std::io::Cursor<Vec<u8>>>;

    fn writer() -> TestWriter {
        ResponseWriter::new(std::io::Cursor::new(Vec::new()))
    }

    async fn into_string(mut writer: TestWriter) -> String {
        writer.flush().await.unwrap();
        String::from_utf8(writer.into_inner().into_inner()).unwrap()
    }

    #[tokio::test]
    async fn fetch_responses_merge_by_seqnum() {
        let mut writer = writer();
        writer.queue_fetch(2, flags_att(vec![Flag::Seen])).unwrap();
        writer
            .queue_fetch(
                2,
                s::MsgAtts {
                    atts: vec![s::MsgAtt::Uid(42)],
                },
            )
            .unwrap();
        writer.queue_fetch(3, flags_att(vec![])).unwrap();

        assert_eq!(
            "* 2 FETCH (FLAGS (\\Seen) UID 42)\r\n\
             * 3 FETCH (FLAGS ())\r\n",
            into_string(writer).await,
        );
    }

    #[tokio::test]
    async fn merge_is_last_writer_wins_per_attribute() {
        let mut writer = writer();
        writer.queue_fetch(1, flags_att(vec![Flag::Seen])).unwrap();
        writer.queue_fetch(1, flags_att(vec![Flag::Deleted])).unwrap();

        assert_eq!(
            "* 1 FETCH (FLAGS (\\Deleted))\r\n",
            into_string(writer).await,
        );
    }

    #[tokio::test]
    async fn non_fetch_response_flushes_queue_first() {
        let mut writer = writer();
        writer.queue_fetch(1, flags_att(vec![])).unwrap();
        writer.send_untagged(s::Response::Exists(3)).unwrap();

        assert_eq!(
            "* 1 FETCH (FLAGS ())\r\n* 3 EXISTS\r\n",
            into_string(writer).await,
        );
    }

    #[tokio::test]
    async fn literals_spliced_in_order() {
        let mut writer = writer();
        writer
            .send_untagged(s::Response::Fetch(s::FetchData {
                seqnum: 1,
                atts: s::MsgAtts {
                    atts: vec![s::MsgAtt::Rfc822Full(
                        crate::imap::literal_source::LiteralSource::of_data(
                            b"From: x\r\n",
                            false,
                        ),
                    )],
                },
            }))
            .unwrap();

        assert_eq!(
            "* 1 FETCH (RFC822 {9}\r\nFrom: x\r\n)\r\n",
            into_string(writer).await,
        );
    }
}
