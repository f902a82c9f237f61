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

//! The `serve` command: accept loop, per-connection threads, and the TLS
//! collaborator for `STARTTLS` upgrades.
//!
//! Each connection runs on its own OS thread with a current-thread tokio
//! runtime. The engine's futures are deliberately not `Send` (a connection
//! is one logical task), so this keeps the scheduling model simple while
//! still letting connections block each other not at all.

use std::fs;
use std::io;
use std::net::TcpStream;
use std::sync::Arc;

use log::{error, info, warn};
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;

use crate::backend::memory::{MemoryLogin, MemoryStore};
use crate::imap::command_processor::CommandProcessor;
use crate::imap::server::{Connection, RunExit};
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::support::system_config::SystemConfig;

pub fn serve(config: SystemConfig) -> Result<(), Error> {
    let config = Arc::new(config);
    let tls = match load_tls(&config) {
        Ok(tls) => tls,
        Err(e) if config.starttls_enabled => {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("TLS configuration unusable: {}", e),
            )));
        },
        Err(e) => {
            warn!("TLS configuration unusable, STARTTLS disabled: {}", e);
            None
        },
    };

    // The demo backend. A deployment embedding the engine supplies its own
    // `LoginProvider` here instead.
    let store = MemoryStore::new();
    store.provision("demouser", "demopass");
    let login = MemoryLogin::new(store);

    let listener = std::net::TcpListener::bind(&config.listen)?;
    info!("Listening on {}", config.listen);

    loop {
        let (socket, addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Accept failed: {}", e);
                continue;
            },
        };

        let config = Arc::clone(&config);
        let login = login.clone();
        let tls = tls.clone();
        std::thread::spawn(move || {
            let log_prefix = LogPrefix::new(addr.to_string());
            if let Err(e) =
                run_connection(socket, log_prefix.clone(), config, login, tls)
            {
                info!("{} Connection ended: {}", log_prefix, e);
            }
        });
    }
}

fn run_connection(
    socket: TcpStream,
    log_prefix: LogPrefix,
    config: Arc<SystemConfig>,
    login: MemoryLogin,
    tls: Option<TlsAcceptor>,
) -> Result<(), Error> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        socket.set_nodelay(true)?;
        socket.set_nonblocking(true)?;
        let socket = tokio::net::TcpStream::from_std(socket)?;

        info!("{} Connection established", log_prefix);
        let processor =
            CommandProcessor::new(log_prefix.clone(), Arc::clone(&config), login);
        let connection =
            Connection::new(socket, processor, Arc::clone(&config));

        match connection.run().await? {
            RunExit::Closed => Ok(()),
            RunExit::TlsHandoff(socket, mut processor) => {
                let Some(tls) = tls else {
                    // Unreachable: STARTTLS is only advertised when the
                    // acceptor loaded.
                    return Ok(());
                };

                let socket = tls.accept(socket).await?;
                info!("{} TLS established", log_prefix);
                processor.set_tls_active();

                let connection =
                    Connection::resume(socket, processor, config);
                match connection.run().await? {
                    RunExit::Closed => Ok(()),
                    // STARTTLS within TLS is refused by the processor
                    RunExit::TlsHandoff(..) => Ok(()),
                }
            },
        }
    })
}

fn load_tls(config: &SystemConfig) -> io::Result<Option<TlsAcceptor>> {
    if config.tls.certificate_chain.as_os_str().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no certificate chain configured",
        ));
    }

    let certs = rustls_pemfile::certs(&mut io::BufReader::new(
        fs::File::open(&config.tls.certificate_chain)?,
    ))?
    .into_iter()
    .map(rustls::Certificate)
    .collect::<Vec<_>>();

    let mut keys = rustls_pemfile::pkcs8_private_keys(
        &mut io::BufReader::new(fs::File::open(&config.tls.private_key)?),
    )?;
    let key = keys.pop().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "no private key found")
    })?;

    let tls_config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, rustls::PrivateKey(key))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    Ok(Some(TlsAcceptor::from(Arc::new(tls_config))))
}
