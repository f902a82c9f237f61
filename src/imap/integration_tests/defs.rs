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

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tokio::io::DuplexStream;

use crate::backend::memory::{MemoryLogin, MemoryStore};
use crate::imap::client::Client;
use crate::imap::command_processor::CommandProcessor;
use crate::imap::server::{Connection, RunExit};
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::SystemConfig;

pub struct Setup {
    pub login: MemoryLogin,
    pub config: Arc<SystemConfig>,
}

pub fn set_up() -> Setup {
    set_up_with_config(SystemConfig::default())
}

pub fn set_up_with_config(config: SystemConfig) -> Setup {
    let store = MemoryStore::new();
    store.provision("demouser", "demopass");
    Setup {
        login: MemoryLogin::new(store),
        config: Arc::new(config),
    }
}

pub type PipeClient = Client<DuplexStream>;

impl Setup {
    /// Start a server connection over an in-process duplex stream and
    /// return a client attached to it.
    ///
    /// Must be called within a `LocalSet`.
    pub fn connect(&self, name: &'static str) -> PipeClient {
        let (client_io, server_io) = tokio::io::duplex(1024 * 1024);

        let processor = CommandProcessor::new(
            LogPrefix::new(name.to_owned()),
            Arc::clone(&self.config),
            self.login.clone(),
        );
        let config = Arc::clone(&self.config);
        tokio::task::spawn_local(async move {
            let connection = Connection::new(server_io, processor, config);
            // Dropped duplex streams surface as I/O errors, which are a
            // normal end for a test.
            let _ = connection.run().await;
        });

        Client::new(client_io)
    }

    /// Like `connect`, but when the server accepts `STARTTLS` the session
    /// is resumed over the same stream as if the handshake had happened.
    /// The test transport *is* the "TLS" layer.
    pub fn connect_with_tls_upgrade(&self, name: &'static str) -> PipeClient {
        let (client_io, server_io) = tokio::io::duplex(1024 * 1024);

        let processor = CommandProcessor::new(
            LogPrefix::new(name.to_owned()),
            Arc::clone(&self.config),
            self.login.clone(),
        );
        let config = Arc::clone(&self.config);
        tokio::task::spawn_local(async move {
            let connection =
                Connection::new(server_io, processor, Arc::clone(&config));
            match connection.run().await {
                Ok(RunExit::TlsHandoff(io, mut processor)) => {
                    processor.set_tls_active();
                    let resumed =
                        Connection::resume(io, processor, config);
                    let _ = resumed.run().await;
                },
                Ok(RunExit::Closed) | Err(_) => (),
            }
        });

        Client::new(client_io)
    }
}

/// Assert that `line` matches the anchored regex `pattern`.
pub fn assert_line_like(pattern: &str, line: &str) {
    lazy_static! {
        static ref CACHE: std::sync::Mutex<
            std::collections::HashMap<String, Regex>,
        > = std::sync::Mutex::new(std::collections::HashMap::new());
    }

    let mut cache = CACHE.lock().unwrap();
    let regex = cache
        .entry(pattern.to_owned())
        .or_insert_with(|| {
            Regex::new(&format!("^{}$", pattern)).expect("bad test regex")
        });
    assert!(
        regex.is_match(line),
        "Expected match: {:?}\n\
         Got:            {:?}",
        pattern,
        line,
    );
}

pub async fn skip_greeting(client: &mut PipeClient) {
    let greeting = client.read_logical_line().await.unwrap();
    assert!(
        greeting.starts_with("* OK [CAPABILITY"),
        "unexpected greeting: {}",
        greeting,
    );
}

pub async fn quick_log_in(client: &mut PipeClient) {
    skip_greeting(client).await;
    let responses = client
        .command("a0 LOGIN demouser demopass")
        .await
        .unwrap();
    assert_line_like("a0 OK \\[CAPABILITY [^\\]]+\\] .*", &responses[0]);
}

pub async fn quick_select(client: &mut PipeClient, mailbox: &str) {
    let responses = client
        .command(&format!("s0 SELECT {}", mailbox))
        .await
        .unwrap();
    assert_line_like(
        "s0 OK \\[READ-WRITE\\] .*",
        responses.last().unwrap(),
    );
}

pub async fn quick_append(
    client: &mut PipeClient,
    mailbox: &str,
    content: &str,
) {
    let command = format!(
        "ap APPEND {} {{{}+}}\r\n{}\r\n",
        mailbox,
        content.len(),
        content,
    );
    client.write_raw(command.as_bytes()).await.unwrap();
    let responses = client.collect_responses("ap").await.unwrap();
    assert_line_like(
        "ap OK \\[APPENDUID \\d+ \\d+\\] .*",
        responses.last().unwrap(),
    );
}

pub const TEST_MESSAGE: &str = "From: user@example.com\r\n\r\ntest message!";
