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

//! The connection state machine: receives commands in the raw AST defined
//! in the `syntax` module, validates them against the current state,
//! delegates to the backend, and emits responses in that same AST model.

#[macro_use]
mod defs;

mod auth;
mod commands;
mod fetch;
mod flags;
mod mailboxes;
mod messages;
mod search;

pub use defs::CommandProcessor;
