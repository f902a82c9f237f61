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

//! A primitive IMAP client used by the integration tests to drive a
//! server over an in-process stream.
//!
//! It is deliberately string-oriented: responses are returned as logical
//! lines (with any literals inlined) so tests can assert on the exact wire
//! text.

use std::io;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
    BufReader, ReadHalf, WriteHalf,
};

pub struct Client<IO> {
    read: BufReader<ReadHalf<IO>>,
    write: WriteHalf<IO>,
}

impl<IO: AsyncRead + AsyncWrite + Unpin> Client<IO> {
    pub fn new(io: IO) -> Self {
        let (read, write) = tokio::io::split(io);
        Client {
            read: BufReader::new(read),
            write,
        }
    }

    pub async fn write_raw(&mut self, data: &[u8]) -> io::Result<()> {
        self.write.write_all(data).await?;
        self.write.flush().await?;
        Ok(())
    }

    /// Read one logical response line, following any literals it carries.
    /// The trailing CRLF is stripped; literal octets appear inline.
    pub async fn read_logical_line(&mut self) -> io::Result<String> {
        let mut logical = Vec::<u8>::new();

        loop {
            let mut line = Vec::<u8>::new();
            self.read.read_until(b'\n', &mut line).await?;
            if !line.ends_with(b"\n") {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF mid-response",
                ));
            }

            match literal_length(&line) {
                Some(len) => {
                    logical.extend_from_slice(&line);
                    let mut data = vec![0u8; len];
                    self.read.read_exact(&mut data).await?;
                    logical.extend_from_slice(&data);
                },
                None => {
                    line.pop();
                    if line.ends_with(b"\r") {
                        line.pop();
                    }
                    logical.extend_from_slice(&line);
                    return Ok(String::from_utf8_lossy(&logical)
                        .into_owned());
                },
            }
        }
    }

    /// Send a command line (CRLF appended) and collect every response line
    /// through the tagged completion.
    pub async fn command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let tag = line.split(' ').next().unwrap_or("").to_owned();
        self.write_raw(format!("{}\r\n", line).as_bytes()).await?;
        self.collect_responses(&tag).await
    }

    /// Collect response lines until the one tagged `tag`.
    pub async fn collect_responses(
        &mut self,
        tag: &str,
    ) -> io::Result<Vec<String>> {
        let tag_prefix = format!("{} ", tag);
        let mut responses = Vec::new();
        loop {
            let line = self.read_logical_line().await?;
            let done = line.starts_with(&tag_prefix);
            responses.push(line);
            if done {
                return Ok(responses);
            }
        }
    }
}

/// If the line (still CRLF-terminated) ends with a server literal
/// announcement, return its length.
fn literal_length(line: &[u8]) -> Option<usize> {
    let mut trimmed = line;
    if trimmed.ends_with(b"\n") {
        trimmed = &trimmed[..trimmed.len() - 1];
    }
    if trimmed.ends_with(b"\r") {
        trimmed = &trimmed[..trimmed.len() - 1];
    }
    if !trimmed.ends_with(b"}") {
        return None;
    }

    let open = trimmed.iter().rposition(|&b| b'{' == b)?;
    let digits = &trimmed[open + 1..trimmed.len() - 1];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }

    std::str::from_utf8(digits).ok()?.parse().ok()
}
