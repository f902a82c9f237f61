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

use std::path::PathBuf;
use std::process;

use structopt::StructOpt;

use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(
    name = "polliwog",
    about = "An IMAP4rev1 server engine with pluggable storage backends"
)]
enum Options {
    /// Run the IMAP server with the demo in-memory backend.
    Serve {
        /// Path to the configuration file.
        #[structopt(short, long, parse(from_os_str))]
        config: Option<PathBuf>,
    },
}

pub fn main() {
    init_logging();

    let result = match Options::from_args() {
        Options::Serve { config } => {
            load_config(config).and_then(super::serve::serve)
        },
    };

    if let Err(e) = result {
        eprintln!("polliwog: {}", e);
        process::exit(1);
    }
}

fn load_config(
    path: Option<PathBuf>,
) -> Result<SystemConfig, crate::support::error::Error> {
    let Some(path) = path else {
        return Ok(SystemConfig::default());
    };

    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|e| {
        crate::support::error::Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e,
        ))
    })
}

fn init_logging() {
    let stderr = log4rs::append::console::ConsoleAppender::builder()
        .target(log4rs::append::console::Target::Stderr)
        .encoder(Box::new(log4rs::encode::pattern::PatternEncoder::new(
            "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}",
        )))
        .build();
    let log_config = log4rs::config::Config::builder()
        .appender(
            log4rs::config::Appender::builder()
                .build("stderr", Box::new(stderr)),
        )
        .build(
            log4rs::config::Root::builder()
                .appender("stderr")
                .build(log::LevelFilter::Info),
        )
        .unwrap();
    log4rs::init_config(log_config).unwrap();
}
