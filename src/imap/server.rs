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

//! The per-connection protocol driver.
//!
//! One `Connection` is one client, one task. It alternates between reading
//! a command, dispatching it through the `CommandProcessor`, and flushing
//! the buffered responses. The flows that interleave with raw input —
//! `AUTHENTICATE` continuations, `APPEND` literals, `IDLE`, and the
//! bad-command storm — live here rather than in the processor.
//!
//! `STARTTLS` ends the run with a `TlsHandoff` carrying the raw stream and
//! the processor; the caller performs the handshake (the TLS library is a
//! collaborator, not part of the engine) and starts a new `Connection` over
//! the upgraded stream with the same processor.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, BufReader, ReadHalf, WriteHalf,
};

use super::command_processor::CommandProcessor;
use super::request_reader::{
    AppendContinuation, AppendFragmentData, CommandStart, RequestReader,
};
use super::response_writer::ResponseWriter;
use super::syntax as s;
use crate::backend::LoginProvider;
use crate::support::{error::Error, system_config::SystemConfig};

pub struct Connection<IO, L: LoginProvider> {
    reader: RequestReader<BufReader<ReadHalf<IO>>>,
    writer: ResponseWriter<WriteHalf<IO>>,
    processor: CommandProcessor<L>,
    config: Arc<SystemConfig>,
    consecutive_bads: u32,
    send_greeting: bool,
}

/// How a `Connection::run` ended.
pub enum RunExit<IO, L: LoginProvider> {
    /// The connection is done; drop the stream.
    Closed,
    /// `STARTTLS` was accepted. The caller must run the TLS handshake over
    /// the returned stream, call `set_tls_active()` on the processor, and
    /// run a new `Connection` over the result.
    TlsHandoff(IO, CommandProcessor<L>),
}

impl<IO: AsyncRead + AsyncWrite + Unpin, L: LoginProvider>
    Connection<IO, L>
{
    pub fn new(
        io: IO,
        processor: CommandProcessor<L>,
        config: Arc<SystemConfig>,
    ) -> Self {
        Self::with_greeting(io, processor, config, true)
    }

    /// Resume a session after a TLS upgrade. No new greeting is sent.
    pub fn resume(
        io: IO,
        processor: CommandProcessor<L>,
        config: Arc<SystemConfig>,
    ) -> Self {
        Self::with_greeting(io, processor, config, false)
    }

    fn with_greeting(
        io: IO,
        processor: CommandProcessor<L>,
        config: Arc<SystemConfig>,
        send_greeting: bool,
    ) -> Self {
        let (read, write) = tokio::io::split(io);
        Connection {
            reader: RequestReader::new(BufReader::new(read)),
            writer: ResponseWriter::new(write),
            processor,
            config,
            consecutive_bads: 0,
            send_greeting,
        }
    }

    /// Run the connection until it closes or hands off for TLS.
    pub async fn run(mut self) -> Result<RunExit<IO, L>, Error> {
        if self.send_greeting {
            if !self.processor.greet(&mut self.writer).await? {
                self.writer.flush().await?;
                return Ok(RunExit::Closed);
            }
            self.writer.flush().await?;
        }

        let mut open = true;
        while open && !self.processor.logged_out() {
            let start = self
                .reader
                .read_command_start(&mut self.writer)
                .await?;

            match start {
                CommandStart::Incomprehensible => {
                    self.writer.send_untagged(cond(
                        s::RespCondType::Bad,
                        Some(s::RespTextCode::Parse(())),
                        "That doesn't look anything like an IMAP command",
                    ))?;
                    self.note_bad();
                },

                CommandStart::Bad(tag) => {
                    self.writer.send(s::ResponseLine {
                        tag: Some(Cow::Owned(tag)),
                        response: cond(
                            s::RespCondType::Bad,
                            Some(s::RespTextCode::Parse(())),
                            "Unrecognised command syntax",
                        ),
                    })?;
                    self.note_bad();
                },

                CommandStart::TooLong(tag) => {
                    match tag {
                        Some(tag) => self.writer.send(s::ResponseLine {
                            tag: Some(Cow::Owned(tag)),
                            response: cond(
                                s::RespCondType::No,
                                None,
                                "Command line too long",
                            ),
                        })?,
                        None => {
                            self.writer.send_untagged(cond(
                                s::RespCondType::Bad,
                                Some(s::RespTextCode::Parse(())),
                                "Command line too long",
                            ))?;
                            self.note_bad();
                        },
                    }
                },

                CommandStart::StandAlone(command_line) => {
                    if Self::starttls_acceptable(
                        &self.config,
                        &self.processor,
                        &command_line.cmd,
                    ) {
                        let tag = command_line.tag.into_owned();
                        return self.hand_off_tls(tag).await;
                    }

                    if matches!(
                        command_line.cmd,
                        s::Command::Simple(s::SimpleCommand::Idle)
                    ) {
                        let tag = command_line.tag.into_owned();
                        open = self.handle_idle(tag).await?;
                    } else {
                        let line = self
                            .processor
                            .handle_command(command_line, &mut self.writer)
                            .await;
                        let was_bad = is_bad(&line.response);
                        self.writer.send(line)?;
                        if was_bad {
                            self.note_bad();
                        } else {
                            self.consecutive_bads = 0;
                        }
                    }
                },

                CommandStart::AuthenticateStart {
                    tag,
                    mechanism,
                    initial_response,
                } => {
                    self.handle_authenticate(
                        tag,
                        mechanism,
                        initial_response,
                    )
                    .await?;
                },

                CommandStart::AppendStart {
                    tag,
                    mailbox,
                    first,
                    size,
                    literal_plus,
                } => {
                    self.handle_append(
                        tag,
                        mailbox,
                        first,
                        size,
                        literal_plus,
                    )
                    .await?;
                },
            }

            // `bad_command_limit` consecutive BADs are tolerated; the next
            // one disconnects.
            if self.consecutive_bads > self.config.bad_command_limit {
                self.writer.send_untagged(cond(
                    s::RespCondType::Bye,
                    None,
                    "Too many bad commands.",
                ))?;
                open = false;
            }

            self.writer.flush().await?;
        }

        self.writer.flush().await?;
        Ok(RunExit::Closed)
    }

    fn note_bad(&mut self) {
        self.consecutive_bads += 1;
    }

    fn starttls_acceptable(
        config: &SystemConfig,
        processor: &CommandProcessor<L>,
        cmd: &s::Command<'_>,
    ) -> bool {
        matches!(cmd, s::Command::Simple(s::SimpleCommand::StartTls))
            && config.starttls_enabled
            && !processor.tls_active()
            && !processor.is_authenticated()
    }

    async fn hand_off_tls(
        mut self,
        tag: String,
    ) -> Result<RunExit<IO, L>, Error> {
        // RFC 3501: the client must not pipeline anything after STARTTLS,
        // since there is no way to know which layer it belongs to.
        if self.reader.has_buffered_input() {
            self.writer.send_untagged(cond(
                s::RespCondType::Bye,
                None,
                "Data pipelined across STARTTLS",
            ))?;
            self.writer.flush().await?;
            return Ok(RunExit::Closed);
        }

        self.writer.send(s::ResponseLine {
            tag: Some(Cow::Owned(tag)),
            response: cond(
                s::RespCondType::Ok,
                None,
                "Begin TLS negotiation now.",
            ),
        })?;
        self.writer.flush().await?;

        info!(
            "{} Handing off for TLS negotiation",
            self.processor.log_prefix()
        );
        let read = self.reader.into_inner().into_inner();
        let io = read.unsplit(self.writer.into_inner());
        Ok(RunExit::TlsHandoff(io, self.processor))
    }

    async fn handle_authenticate(
        &mut self,
        tag: String,
        mechanism: String,
        initial_response: Option<String>,
    ) -> Result<(), Error> {
        if let Some(response) = self.processor.authenticate_start(&mechanism)
        {
            self.send_completion(tag, response)?;
            return Ok(());
        }

        let data = match initial_response {
            // "=" is SASL-IR for a zero-length initial response
            Some(initial) if "=" == initial => Vec::new(),
            Some(initial) => initial.into_bytes(),
            None => {
                // The space after the + is mandatory; there is no prompt
                // data for PLAIN.
                self.writer.write_continuation("").await?;
                self.reader.read_raw_line().await?
            },
        };

        let response = self.processor.authenticate_finish(&data).await;
        self.send_completion(tag, response)?;
        Ok(())
    }

    async fn handle_append(
        &mut self,
        tag: String,
        mailbox: String,
        first: AppendFragmentData,
        size: u32,
        literal_plus: bool,
    ) -> Result<(), Error> {
        if !self.processor.append_allowed() {
            self.send_completion(
                tag,
                cond(
                    s::RespCondType::No,
                    Some(s::RespTextCode::ClientBug(())),
                    "Command not allowed in the current state",
                ),
            )?;
            self.writer.flush().await?;
            self.reader
                .discard_command(Some((size, literal_plus)))
                .await?;
            return Ok(());
        }

        self.processor.cmd_append_start(mailbox);

        let mut fragment = first;
        let mut size = size;
        let mut literal_plus = literal_plus;
        loop {
            if let Some(response) = self.validate_append_size(size) {
                self.send_completion(tag, response)?;
                self.writer.flush().await?;
                self.reader
                    .discard_command(Some((size, literal_plus)))
                    .await?;
                self.processor.cmd_append_abort();
                return Ok(());
            }

            if !literal_plus {
                self.writer.write_continuation("go").await?;
            }

            let mut content = vec![0u8; size as usize];
            self.reader
                .append_literal(size)
                .read_exact(&mut content)
                .await
                .map_err(|_| {
                    Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "EOF reading APPEND literal",
                    ))
                })?;
            self.processor.cmd_append_item(fragment, content);

            match self.reader.continue_append().await? {
                AppendContinuation::Done => break,
                AppendContinuation::NextPart {
                    fragment: next_fragment,
                    size: next_size,
                    literal_plus: next_plus,
                } => {
                    fragment = next_fragment;
                    size = next_size;
                    literal_plus = next_plus;
                },
                AppendContinuation::SyntaxError => {
                    self.processor.cmd_append_abort();
                    self.send_completion(
                        tag,
                        cond(
                            s::RespCondType::Bad,
                            Some(s::RespTextCode::Parse(())),
                            "Bad APPEND syntax",
                        ),
                    )?;
                    self.note_bad();
                    return Ok(());
                },
            }
        }

        let result = self.processor.cmd_append_commit().await;
        if result.is_ok() {
            if !self
                .processor
                .poll_flush(&mut self.writer)
                .await
                .unwrap_or(true)
            {
                self.writer.send_untagged(cond(
                    s::RespCondType::Bye,
                    None,
                    "Mailbox no longer usable",
                ))?;
                return Ok(());
            }
        }

        let response = match result {
            Ok(response) | Err(response) => response,
        };
        self.send_completion(tag, response)?;
        self.consecutive_bads = 0;
        Ok(())
    }

    fn validate_append_size(
        &self,
        size: u32,
    ) -> Option<s::Response<'static>> {
        if 0 == size {
            Some(cond(
                s::RespCondType::Bad,
                None,
                "APPEND aborted by 0-size literal",
            ))
        } else if size > self.config.max_append_len {
            Some(cond(
                s::RespCondType::No,
                Some(s::RespTextCode::TooBig(())),
                "APPEND size limit exceeded",
            ))
        } else {
            None
        }
    }

    /// The full IDLE flow, starting after the `IDLE` command line has been
    /// read. Returns whether the connection remains usable.
    async fn handle_idle(&mut self, tag: String) -> Result<bool, Error> {
        if !self.processor.idle_allowed() {
            self.send_completion(
                tag,
                cond(
                    s::RespCondType::No,
                    Some(s::RespTextCode::ClientBug(())),
                    "IDLE not available in the current state",
                ),
            )?;
            return Ok(true);
        }

        let event = self
            .processor
            .idle_event()
            .expect("idle_allowed implies a selected mailbox");
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.idle_timeout_secs);

        self.writer.write_continuation("idling").await?;

        loop {
            // Clear before polling so a change arriving during the poll
            // re-fires the event rather than being lost.
            event.clear();
            if !self.processor.poll_flush(&mut self.writer).await? {
                self.writer.send_untagged(cond(
                    s::RespCondType::Bye,
                    None,
                    "Mailbox no longer usable",
                ))?;
                return Ok(false);
            }
            self.writer.flush().await?;

            tokio::select! {
                line = self.reader.read_raw_line() => {
                    let line = line?;
                    if line.eq_ignore_ascii_case(b"DONE") {
                        if !self.processor.poll_flush(&mut self.writer).await?
                        {
                            self.writer.send_untagged(cond(
                                s::RespCondType::Bye,
                                None,
                                "Mailbox no longer usable",
                            ))?;
                            return Ok(false);
                        }
                        self.send_completion(
                            tag,
                            cond(
                                s::RespCondType::Ok,
                                None,
                                "IDLE completed.",
                            ),
                        )?;
                        return Ok(true);
                    }

                    // RFC 2177: the only valid input during IDLE is DONE
                    self.writer.send_untagged(cond(
                        s::RespCondType::Bad,
                        None,
                        "Only DONE may end IDLE",
                    ))?;
                    return Ok(false);
                },

                _ = event.wait() => {
                    // Loop back around to poll
                },

                _ = tokio::time::sleep_until(deadline) => {
                    // RFC 2177 bounds an IDLE to 29 minutes
                    self.writer.send_untagged(cond(
                        s::RespCondType::Bye,
                        None,
                        "IDLE timed out",
                    ))?;
                    return Ok(false);
                },
            }
        }
    }

    fn send_completion(
        &mut self,
        tag: String,
        response: s::Response<'static>,
    ) -> Result<(), Error> {
        let tagged = !matches!(
            response,
            s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::Bye,
                ..
            })
        );
        self.writer
            .send(s::ResponseLine {
                tag: tagged.then(|| Cow::Owned(tag)),
                response,
            })
            .map_err(Error::Io)
    }
}

fn cond(
    cond: s::RespCondType,
    code: Option<s::RespTextCode<'static>>,
    quip: &'static str,
) -> s::Response<'static> {
    s::Response::Cond(s::CondResponse {
        cond,
        code,
        quip: Some(Cow::Borrowed(quip)),
    })
}

fn is_bad(response: &s::Response<'_>) -> bool {
    matches!(
        response,
        s::Response::Cond(s::CondResponse {
            cond: s::RespCondType::Bad,
            ..
        })
    )
}
