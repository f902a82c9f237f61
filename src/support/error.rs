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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid credentials")]
    InvalidAuth,
    #[error("Authorisation identity not permitted")]
    InvalidAuthz,
    #[error("Unsafe mailbox name")]
    UnsafeName,
    #[error("No such mailbox")]
    NxMailbox,
    #[error("Mailbox already exists")]
    MailboxExists,
    #[error("Mailbox has inferiors")]
    MailboxHasInferiors,
    #[error("Mailbox read-only")]
    MailboxReadOnly,
    #[error("Mailbox full")]
    MailboxFull,
    #[error("Operation not allowed for INBOX")]
    BadOperationOnInbox,
    #[error("Rename source and destination are the same")]
    RenameToSelf,
    #[error("Rename destination is child of self")]
    RenameIntoSelf,
    #[error("Message expunged")]
    ExpungedMessage,
    #[error("Non-existent message")]
    NxMessage,
    #[error("Unsupported/unknown flag")]
    NxFlag,
    #[error("Append rejected by backend")]
    AppendRejected,
    #[error("Unsupported search charset")]
    BadCharset,
    #[error("Connection must be closed")]
    CloseConnection,
    #[error(transparent)]
    Io(#[from] io::Error),
}
