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

use std::fmt;
use std::io::{self, Read};

/// A literal to be emitted to the client.
///
/// The data is borne as an `io::Read` so that large message payloads need
/// not be buffered in their entirety just to pass through the syntax layer.
pub struct LiteralSource {
    /// The data source, exactly `len` bytes long.
    pub data: Box<dyn Read + Send>,
    pub len: u64,
    /// Whether to use the RFC 3516 `~{n}` binary syntax.
    pub binary: bool,
}

impl LiteralSource {
    pub fn of_reader(
        data: impl Read + Send + 'static,
        len: u64,
        binary: bool,
    ) -> Self {
        LiteralSource {
            data: Box::new(data),
            len,
            binary,
        }
    }

    pub fn of_data(data: &[u8], binary: bool) -> Self {
        Self::of_reader(
            io::Cursor::new(data.to_owned()),
            data.len() as u64,
            binary,
        )
    }
}

impl fmt::Debug for LiteralSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LiteralSource({}, binary={})", self.len, self.binary)
    }
}

// Literals compare by length and binariness alone; the reader is opaque.
// This is only used by the syntax round-trip tests.
impl PartialEq for LiteralSource {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.binary == other.binary
    }
}

impl Eq for LiteralSource {}
