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

//! The contract between the protocol engine and a mail store.
//!
//! The command processor is generic over these traits. Backend calls may
//! suspend; each connection runs on a single-threaded scheduler, so the
//! futures involved need not be `Send`. A backend shared between
//! connections must provide its own interior consistency (the in-memory
//! backend holds a `tokio::sync::RwLock` per user).
//!
//! Errors use the crate-wide taxonomy in `support::error`; the command
//! processor maps them deterministically onto `NO`/`BAD` responses with the
//! appropriate response codes.

pub mod memory;

use crate::account::model::*;
use crate::account::selected::MailboxSnapshot;
use crate::support::error::Error;
use crate::support::event::Event;

/// Credentials presented by `LOGIN` or `AUTHENTICATE PLAIN`.
///
/// For `LOGIN`, the authorisation identity is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub authzid: String,
    pub authcid: String,
    pub password: String,
}

/// Authenticates credentials and produces sessions.
///
/// One provider is shared by every connection; sessions belong to a single
/// connection.
pub trait LoginProvider: Clone + Send + Sync + 'static {
    type Session: Session;

    /// Authenticate and return a session for the user, or `InvalidAuth` /
    /// `InvalidAuthz`.
    #[allow(async_fn_in_trait)]
    async fn login(
        &self,
        credentials: &Credentials,
    ) -> Result<Self::Session, Error>;

    /// Produce a session for a pre-authenticated identity (the `PREAUTH`
    /// greeting path). No password check is involved.
    #[allow(async_fn_in_trait)]
    async fn preauth(&self, user: &str) -> Result<Self::Session, Error>;
}

/// Everything produced by a successful `select()`.
pub struct SelectedInit<M> {
    pub mailbox: M,
    pub snapshot: MailboxSnapshot,
    /// UIDs whose `\Recent` ownership was just granted to this session.
    pub recent: Vec<Uid>,
    /// RFC 8474 MAILBOXID.
    pub mailbox_id: String,
    /// The flags defined in the mailbox, for the untagged `FLAGS` response.
    pub flags: Vec<Flag>,
    /// Whether the client may create new permanent flags; false also means
    /// no flags are storable at all (read-only select).
    pub writable: bool,
}

/// The per-user operations of §4.F that do not require a selected mailbox.
pub trait Session: 'static {
    type Mailbox: MailboxHandle;

    #[allow(async_fn_in_trait)]
    async fn list(
        &mut self,
        request: &ListRequest,
    ) -> Result<Vec<ListResponse>, Error>;

    #[allow(async_fn_in_trait)]
    async fn create(&mut self, name: &str) -> Result<String, Error>;

    #[allow(async_fn_in_trait)]
    async fn delete(&mut self, name: &str) -> Result<(), Error>;

    #[allow(async_fn_in_trait)]
    async fn rename(&mut self, from: &str, to: &str) -> Result<(), Error>;

    #[allow(async_fn_in_trait)]
    async fn subscribe(&mut self, name: &str) -> Result<(), Error>;

    #[allow(async_fn_in_trait)]
    async fn unsubscribe(&mut self, name: &str) -> Result<(), Error>;

    #[allow(async_fn_in_trait)]
    async fn status(
        &mut self,
        request: &StatusRequest,
    ) -> Result<StatusResponse, Error>;

    #[allow(async_fn_in_trait)]
    async fn select(
        &mut self,
        name: &str,
        read_only: bool,
    ) -> Result<SelectedInit<Self::Mailbox>, Error>;

    #[allow(async_fn_in_trait)]
    async fn append(
        &mut self,
        mailbox: &str,
        items: Vec<AppendItem>,
    ) -> Result<AppendResponse, Error>;
}

/// A fresh snapshot plus any newly granted `\Recent` ownership.
pub struct MailboxPoll {
    pub snapshot: MailboxSnapshot,
    pub recent: Vec<Uid>,
}

/// The operations available against a selected mailbox.
///
/// All message addressing is by UID; the view resolves sequence numbers
/// before calling in, and ignores UIDs that do not exist (RFC 4315 §2.1
/// behaviour falls out of that).
pub trait MailboxHandle: 'static {
    /// Capture a fresh snapshot.
    #[allow(async_fn_in_trait)]
    async fn poll(&mut self) -> Result<MailboxPoll, Error>;

    /// Fetch a single message.
    ///
    /// Returns `ExpungedMessage` if the UID was valid but the message is
    /// gone, `NxMessage` if it never existed.
    #[allow(async_fn_in_trait)]
    async fn fetch(&mut self, uid: Uid) -> Result<MessageData, Error>;

    /// Extract a `BODY[...]` section of a message. `None` means the
    /// requested part does not exist.
    #[allow(async_fn_in_trait)]
    async fn section(
        &mut self,
        uid: Uid,
        section: &BodySection,
    ) -> Result<Option<Vec<u8>>, Error>;

    #[allow(async_fn_in_trait)]
    async fn store(&mut self, request: &StoreRequest<'_>) -> Result<(), Error>;

    /// Expunge every `\Deleted` message, optionally restricted to `uids`.
    #[allow(async_fn_in_trait)]
    async fn expunge(
        &mut self,
        uids: Option<&SeqRange<Uid>>,
    ) -> Result<(), Error>;

    #[allow(async_fn_in_trait)]
    async fn search(
        &mut self,
        request: &SearchRequest,
    ) -> Result<Vec<Uid>, Error>;

    #[allow(async_fn_in_trait)]
    async fn copy(
        &mut self,
        uids: &SeqRange<Uid>,
        dst: &str,
    ) -> Result<CopyResponse, Error>;

    /// `CHECK`: request whatever checkpoint is meaningful to the backend.
    #[allow(async_fn_in_trait)]
    async fn check(&mut self) -> Result<(), Error>;

    /// The event set whenever this mailbox changes. Clones share state, so
    /// the connection can hold one across an entire `IDLE`.
    fn change_event(&self) -> Event;
}
