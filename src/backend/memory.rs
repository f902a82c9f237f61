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

//! The in-memory backend, used by the demo server and the integration
//! tests.
//!
//! Mailboxes are stored flat, keyed by their full name; hierarchy is
//! inferred from `/`-separated name prefixes, so a child can exist without
//! its parent ever having been created.
//!
//! Each mailbox's state sits behind its own `tokio::sync::RwLock`, and each
//! carries an `Event` that is set on every mutation so selected sessions
//! (and `IDLE`) can wake up and poll.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering::SeqCst};
use std::sync::{Arc, Mutex};

use chrono::prelude::*;
use rand::Rng;
use tokio::sync::RwLock;

use super::{
    Credentials, LoginProvider, MailboxHandle, MailboxPoll, SelectedInit,
    Session,
};
use crate::account::model::*;
use crate::account::selected::MailboxSnapshot;
use crate::support::error::Error;
use crate::support::event::Event;

/// The store shared by every connection.
pub struct MemoryStore {
    users: Mutex<HashMap<String, Arc<UserRecord>>>,
    next_uid_validity: AtomicU32,
    next_mailbox_id: AtomicU32,
}

struct UserRecord {
    password: String,
    tree: RwLock<BoxTree>,
}

#[derive(Default)]
struct BoxTree {
    boxes: HashMap<String, Arc<MailboxRecord>>,
    subscriptions: BTreeSet<String>,
}

struct MailboxRecord {
    id: String,
    state: RwLock<BoxState>,
    event: Event,
}

struct BoxState {
    uid_validity: u32,
    next_uid: u32,
    deleted: bool,
    messages: Vec<StoredMessage>,
}

#[derive(Clone)]
struct StoredMessage {
    uid: Uid,
    flags: Vec<Flag>,
    internal_date: DateTime<FixedOffset>,
    content: Arc<Vec<u8>>,
    /// Whether `\Recent` ownership is still up for grabs.
    recent_unclaimed: bool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryStore {
            users: Mutex::new(HashMap::new()),
            // Seed randomly so UID validity values from distinct process
            // runs are unlikely to collide.
            next_uid_validity: AtomicU32::new(
                rand::thread_rng().gen_range(1..1 << 30),
            ),
            next_mailbox_id: AtomicU32::new(1),
        })
    }

    /// Create a user with an INBOX.
    pub fn provision(&self, user: &str, password: &str) {
        let record = Arc::new(UserRecord {
            password: password.to_owned(),
            tree: RwLock::new(BoxTree::default()),
        });
        record
            .tree
            .try_write()
            .expect("fresh user tree is uncontended")
            .boxes
            .insert("INBOX".to_owned(), self.new_mailbox());
        self.users
            .lock()
            .unwrap()
            .insert(user.to_owned(), record);
    }

    fn new_mailbox(&self) -> Arc<MailboxRecord> {
        Arc::new(MailboxRecord {
            id: format!(
                "F{:08x}",
                self.next_mailbox_id.fetch_add(1, SeqCst)
            ),
            state: RwLock::new(BoxState {
                uid_validity: self.next_uid_validity.fetch_add(1, SeqCst),
                next_uid: 1,
                deleted: false,
                messages: Vec::new(),
            }),
            event: Event::new(),
        })
    }
}

/// The `LoginProvider` over a `MemoryStore`.
#[derive(Clone)]
pub struct MemoryLogin {
    store: Arc<MemoryStore>,
}

impl MemoryLogin {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        MemoryLogin { store }
    }
}

impl LoginProvider for MemoryLogin {
    type Session = MemorySession;

    async fn login(
        &self,
        credentials: &Credentials,
    ) -> Result<MemorySession, Error> {
        if !credentials.authzid.is_empty()
            && credentials.authzid != credentials.authcid
        {
            return Err(Error::InvalidAuthz);
        }

        let user = self
            .store
            .users
            .lock()
            .unwrap()
            .get(&credentials.authcid)
            .cloned()
            .ok_or(Error::InvalidAuth)?;
        if user.password != credentials.password {
            return Err(Error::InvalidAuth);
        }

        Ok(MemorySession {
            store: Arc::clone(&self.store),
            user,
        })
    }

    async fn preauth(&self, user: &str) -> Result<MemorySession, Error> {
        let user = self
            .store
            .users
            .lock()
            .unwrap()
            .get(user)
            .cloned()
            .ok_or(Error::InvalidAuth)?;
        Ok(MemorySession {
            store: Arc::clone(&self.store),
            user,
        })
    }
}

pub struct MemorySession {
    store: Arc<MemoryStore>,
    user: Arc<UserRecord>,
}

impl Session for MemorySession {
    type Mailbox = MemoryMailbox;

    async fn list(
        &mut self,
        request: &ListRequest,
    ) -> Result<Vec<ListResponse>, Error> {
        let pattern = join_reference(&request.reference, &request.pattern);
        let matcher = pattern_matcher(&pattern);

        let tree = self.user.tree.read().await;
        let names: Vec<&String> = if request.select_subscribed {
            tree.subscriptions.iter().collect()
        } else {
            let mut names: Vec<&String> = tree.boxes.keys().collect();
            names.sort();
            names
        };

        let mut responses = Vec::new();
        for name in names {
            if !matcher.is_match(name) {
                continue;
            }

            let prefix = format!("{}/", name);
            let has_children =
                tree.boxes.keys().any(|n| n.starts_with(&prefix));
            let attributes = if request.select_subscribed {
                vec![]
            } else if has_children {
                vec![MailboxAttribute::HasChildren]
            } else {
                vec![MailboxAttribute::HasNoChildren]
            };

            responses.push(ListResponse {
                name: name.clone(),
                attributes,
            });
        }

        responses.sort();
        Ok(responses)
    }

    async fn create(&mut self, name: &str) -> Result<String, Error> {
        validate_name(name)?;

        let mut tree = self.user.tree.write().await;
        if tree.boxes.contains_key(name) {
            return Err(Error::MailboxExists);
        }

        let record = self.store.new_mailbox();
        let id = record.id.clone();
        tree.boxes.insert(name.to_owned(), record);
        Ok(id)
    }

    async fn delete(&mut self, name: &str) -> Result<(), Error> {
        if "INBOX" == name {
            return Err(Error::BadOperationOnInbox);
        }

        let mut tree = self.user.tree.write().await;
        if !tree.boxes.contains_key(name) {
            return Err(Error::NxMailbox);
        }

        let prefix = format!("{}/", name);
        if tree.boxes.keys().any(|n| n.starts_with(&prefix)) {
            return Err(Error::MailboxHasInferiors);
        }

        let record = tree.boxes.remove(name).unwrap();
        record.state.write().await.deleted = true;
        record.event.set();
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), Error> {
        validate_name(to)?;
        if from == to {
            return Err(Error::RenameToSelf);
        }
        if to.starts_with(&format!("{}/", from)) {
            return Err(Error::RenameIntoSelf);
        }

        let mut tree = self.user.tree.write().await;
        if tree.boxes.contains_key(to) {
            return Err(Error::MailboxExists);
        }

        if "INBOX" == from {
            // RFC 3501: renaming INBOX moves its messages to the new
            // mailbox and leaves INBOX empty.
            let inbox = tree.boxes.get("INBOX").unwrap().clone();
            let record = self.store.new_mailbox();
            {
                let mut src = inbox.state.write().await;
                let mut dst = record.state.try_write().unwrap();
                dst.messages = std::mem::take(&mut src.messages);
                dst.next_uid = src.next_uid;
                src.next_uid = 1;
                src.uid_validity =
                    self.store.next_uid_validity.fetch_add(1, SeqCst);
            }
            inbox.event.set();
            tree.boxes.insert(to.to_owned(), record);
            return Ok(());
        }

        if !tree.boxes.contains_key(from) {
            return Err(Error::NxMailbox);
        }

        // Move the mailbox and all its inferiors
        let prefix = format!("{}/", from);
        let renamed: Vec<String> = tree
            .boxes
            .keys()
            .filter(|n| *n == from || n.starts_with(&prefix))
            .cloned()
            .collect();
        for name in renamed {
            let record = tree.boxes.remove(&name).unwrap();
            let new_name = format!("{}{}", to, &name[from.len()..]);
            tree.boxes.insert(new_name, record);
        }

        Ok(())
    }

    async fn subscribe(&mut self, name: &str) -> Result<(), Error> {
        let mut tree = self.user.tree.write().await;
        if !tree.boxes.contains_key(name) {
            return Err(Error::NxMailbox);
        }
        tree.subscriptions.insert(name.to_owned());
        Ok(())
    }

    async fn unsubscribe(&mut self, name: &str) -> Result<(), Error> {
        let mut tree = self.user.tree.write().await;
        if !tree.subscriptions.remove(name) {
            return Err(Error::NxMailbox);
        }
        Ok(())
    }

    async fn status(
        &mut self,
        request: &StatusRequest,
    ) -> Result<StatusResponse, Error> {
        let record = self.mailbox_record(&request.name).await?;
        let state = record.state.read().await;

        Ok(StatusResponse {
            name: request.name.clone(),
            messages: request.messages.then_some(state.messages.len()),
            recent: request.recent.then(|| {
                state
                    .messages
                    .iter()
                    .filter(|m| m.recent_unclaimed)
                    .count()
            }),
            uidnext: request.uidnext.then_some(state.next_uid),
            uidvalidity: request.uidvalidity.then_some(state.uid_validity),
            unseen: request.unseen.then(|| {
                state
                    .messages
                    .iter()
                    .filter(|m| !m.flags.contains(&Flag::Seen))
                    .count()
            }),
        })
    }

    async fn select(
        &mut self,
        name: &str,
        read_only: bool,
    ) -> Result<SelectedInit<MemoryMailbox>, Error> {
        let record = self.mailbox_record(name).await?;

        let mut mailbox = MemoryMailbox {
            user: Arc::clone(&self.user),
            record,
            read_only,
        };
        let poll = mailbox.poll().await?;

        let mut flags = vec![
            Flag::Answered,
            Flag::Deleted,
            Flag::Draft,
            Flag::Flagged,
            Flag::Seen,
        ];
        for uid in &poll.snapshot.uids {
            for flag in poll.snapshot.flags_of(*uid) {
                if !flags.contains(flag) {
                    flags.push(flag.clone());
                }
            }
        }

        let mailbox_id = mailbox.record.id.clone();
        Ok(SelectedInit {
            snapshot: poll.snapshot,
            recent: poll.recent,
            mailbox_id,
            flags,
            writable: !read_only,
            mailbox,
        })
    }

    async fn append(
        &mut self,
        mailbox: &str,
        items: Vec<AppendItem>,
    ) -> Result<AppendResponse, Error> {
        let record = self.mailbox_record(mailbox).await?;
        let mut state = record.state.write().await;

        let mut uids = SeqRange::new();
        for item in items {
            let uid = Uid::of(state.next_uid).ok_or(Error::MailboxFull)?;
            state.next_uid += 1;
            state.messages.push(StoredMessage {
                uid,
                flags: item.flags,
                internal_date: item.internal_date,
                content: item.content,
                recent_unclaimed: true,
            });
            uids.append(uid);
        }

        let uid_validity = state.uid_validity;
        drop(state);
        record.event.set();

        Ok(AppendResponse {
            uid_validity,
            uids,
        })
    }
}

impl MemorySession {
    async fn mailbox_record(
        &self,
        name: &str,
    ) -> Result<Arc<MailboxRecord>, Error> {
        self.user
            .tree
            .read()
            .await
            .boxes
            .get(name)
            .cloned()
            .ok_or(Error::NxMailbox)
    }
}

pub struct MemoryMailbox {
    user: Arc<UserRecord>,
    record: Arc<MailboxRecord>,
    read_only: bool,
}

impl MailboxHandle for MemoryMailbox {
    async fn poll(&mut self) -> Result<MailboxPoll, Error> {
        let mut state = self.record.state.write().await;

        let mut recent = Vec::new();
        if !self.read_only {
            for message in &mut state.messages {
                if message.recent_unclaimed {
                    message.recent_unclaimed = false;
                    recent.push(message.uid);
                }
            }
        }

        Ok(MailboxPoll {
            snapshot: snapshot_of(&state),
            recent,
        })
    }

    async fn fetch(&mut self, uid: Uid) -> Result<MessageData, Error> {
        let state = self.record.state.read().await;
        let message = find_message(&state, uid)?;

        let (headers, body_offset) = parse_headers(&message.content);
        Ok(MessageData {
            uid: message.uid,
            flags: message.flags.clone(),
            internal_date: message.internal_date,
            size: message.content.len() as u32,
            email_id: email_id(&message.content),
            envelope: envelope_of(&headers),
            body_structure: body_structure_of(
                &headers,
                &message.content[body_offset..],
            ),
            content: Arc::clone(&message.content),
        })
    }

    async fn section(
        &mut self,
        uid: Uid,
        section: &BodySection,
    ) -> Result<Option<Vec<u8>>, Error> {
        let state = self.record.state.read().await;
        let message = find_message(&state, uid)?;
        let content = &message.content[..];
        let (_, body_offset) = parse_headers(content);

        // This backend has no multipart tree; BODY[1] of a single-part
        // message addresses the body itself, anything deeper is absent.
        match section.subscripts[..] {
            [] => {},
            [1] if matches!(section.kind, SectionKind::Full) => {
                return Ok(Some(content[body_offset..].to_vec()));
            },
            _ => return Ok(None),
        }

        let data = match section.kind {
            SectionKind::Full => content.to_vec(),
            SectionKind::Header | SectionKind::Mime => {
                content[..body_offset].to_vec()
            },
            SectionKind::Text => content[body_offset..].to_vec(),
            SectionKind::HeaderFields {
                negative,
                headers: ref wanted,
            } => filter_headers(&content[..body_offset], wanted, negative),
        };

        Ok(Some(data))
    }

    async fn store(&mut self, request: &StoreRequest<'_>) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::MailboxReadOnly);
        }

        let mut state = self.record.state.write().await;
        let mut changed = false;
        for message in &mut state.messages {
            if !request.ids.contains(message.uid) {
                continue;
            }

            for flag in request.flags {
                let present = message.flags.contains(flag);
                if request.remove_listed && present {
                    message.flags.retain(|f| f != flag);
                    changed = true;
                } else if !request.remove_listed && !present {
                    message.flags.push(flag.clone());
                    changed = true;
                }
            }

            if request.remove_unlisted {
                let before = message.flags.len();
                message.flags.retain(|f| request.flags.contains(f));
                changed |= before != message.flags.len();
            }
        }

        drop(state);
        if changed {
            self.record.event.set();
        }
        Ok(())
    }

    async fn expunge(
        &mut self,
        uids: Option<&SeqRange<Uid>>,
    ) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::MailboxReadOnly);
        }

        let mut state = self.record.state.write().await;
        let before = state.messages.len();
        state.messages.retain(|m| {
            !(m.flags.contains(&Flag::Deleted)
                && uids.map_or(true, |uids| uids.contains(m.uid)))
        });
        let changed = before != state.messages.len();

        drop(state);
        if changed {
            self.record.event.set();
        }
        Ok(())
    }

    async fn search(
        &mut self,
        request: &SearchRequest,
    ) -> Result<Vec<Uid>, Error> {
        let state = self.record.state.read().await;
        let mut hits = Vec::new();
        for message in &state.messages {
            if request.queries.iter().all(|q| query_matches(q, message)) {
                hits.push(message.uid);
            }
        }
        Ok(hits)
    }

    async fn copy(
        &mut self,
        uids: &SeqRange<Uid>,
        dst: &str,
    ) -> Result<CopyResponse, Error> {
        let dst_record = self
            .user
            .tree
            .read()
            .await
            .boxes
            .get(dst)
            .cloned()
            .ok_or(Error::NxMailbox)?;

        let to_copy: Vec<StoredMessage> = {
            let state = self.record.state.read().await;
            state
                .messages
                .iter()
                .filter(|m| uids.contains(m.uid))
                .cloned()
                .collect()
        };

        let mut response = CopyResponse {
            uid_validity: 0,
            from_uids: SeqRange::new(),
            to_uids: SeqRange::new(),
        };

        let mut dst_state = dst_record.state.write().await;
        response.uid_validity = dst_state.uid_validity;
        for mut message in to_copy {
            let uid =
                Uid::of(dst_state.next_uid).ok_or(Error::MailboxFull)?;
            dst_state.next_uid += 1;
            response.from_uids.append(message.uid);
            response.to_uids.append(uid);
            message.uid = uid;
            message.recent_unclaimed = true;
            dst_state.messages.push(message);
        }

        drop(dst_state);
        dst_record.event.set();
        Ok(response)
    }

    async fn check(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn change_event(&self) -> Event {
        self.record.event.clone()
    }
}

fn snapshot_of(state: &BoxState) -> MailboxSnapshot {
    MailboxSnapshot {
        // A deleted mailbox reports UID validity 0, which no live mailbox
        // ever has, so selected views notice and force-close.
        uid_validity: if state.deleted { 0 } else { state.uid_validity },
        uidnext: state.next_uid,
        uids: state.messages.iter().map(|m| m.uid).collect(),
        flags: state
            .messages
            .iter()
            .map(|m| (m.uid, m.flags.clone()))
            .collect(),
    }
}

fn find_message(state: &BoxState, uid: Uid) -> Result<&StoredMessage, Error> {
    state
        .messages
        .iter()
        .find(|m| uid == m.uid)
        .ok_or_else(|| {
            if uid.0.get() < state.next_uid {
                Error::ExpungedMessage
            } else {
                Error::NxMessage
            }
        })
}

fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty()
        || name.starts_with('/')
        || name.ends_with('/')
        || name.contains("//")
        || name.bytes().any(|b| b < b' ' || 127 == b)
    {
        Err(Error::UnsafeName)
    } else {
        Ok(())
    }
}

fn join_reference(reference: &str, pattern: &str) -> String {
    if reference.is_empty() {
        pattern.to_owned()
    } else if reference.ends_with('/') {
        format!("{}{}", reference, pattern)
    } else {
        format!("{}/{}", reference, pattern)
    }
}

fn pattern_matcher(pattern: &str) -> regex::Regex {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '%' => re.push_str("[^/]*"),
            ch => re.push_str(&regex::escape(&ch.to_string())),
        }
    }
    re.push('$');
    // The pattern is fully escaped, so compilation cannot fail.
    regex::Regex::new(&re).expect("escaped pattern failed to compile")
}

// ==================== MESSAGE PARSING ====================

/// Split the RFC 5322 header block off the content.
///
/// Returns the unfolded (name, value) pairs and the offset of the body.
fn parse_headers(content: &[u8]) -> (Vec<(String, String)>, usize) {
    let mut headers = Vec::<(String, String)>::new();
    let mut offset = 0;

    for line in content.split_inclusive(|&b| b'\n' == b) {
        let trimmed = trim_crlf(line);
        if trimmed.is_empty() {
            offset += line.len();
            break;
        }

        if (line.starts_with(b" ") || line.starts_with(b"\t"))
            && !headers.is_empty()
        {
            // Continuation of the previous header
            let last = headers.last_mut().unwrap();
            last.1.push(' ');
            last.1.push_str(
                String::from_utf8_lossy(trimmed).trim(),
            );
        } else if let Some(colon) =
            trimmed.iter().position(|&b| b':' == b)
        {
            headers.push((
                String::from_utf8_lossy(&trimmed[..colon])
                    .trim()
                    .to_owned(),
                String::from_utf8_lossy(&trimmed[colon + 1..])
                    .trim()
                    .to_owned(),
            ));
        }

        offset += line.len();
    }

    (headers, offset.min(content.len()))
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let mut line = line;
    if line.ends_with(b"\n") {
        line = &line[..line.len() - 1];
    }
    if line.ends_with(b"\r") {
        line = &line[..line.len() - 1];
    }
    line
}

fn header_value<'a>(
    headers: &'a [(String, String)],
    name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn envelope_of(headers: &[(String, String)]) -> EnvelopeData {
    let addresses = |name: &str| -> Vec<AddressData> {
        header_value(headers, name)
            .map(parse_addresses)
            .unwrap_or_default()
    };

    EnvelopeData {
        date: header_value(headers, "Date").map(str::to_owned),
        subject: header_value(headers, "Subject").map(str::to_owned),
        from: addresses("From"),
        sender: addresses("Sender"),
        reply_to: addresses("Reply-To"),
        to: addresses("To"),
        cc: addresses("Cc"),
        bcc: addresses("Bcc"),
        in_reply_to: header_value(headers, "In-Reply-To").map(str::to_owned),
        message_id: header_value(headers, "Message-ID").map(str::to_owned),
    }
}

fn parse_addresses(value: &str) -> Vec<AddressData> {
    value
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }

            let (display_name, addr) = match (part.find('<'), part.find('>'))
            {
                (Some(open), Some(close)) if open < close => {
                    let name = part[..open].trim().trim_matches('"').trim();
                    (
                        if name.is_empty() {
                            None
                        } else {
                            Some(name.to_owned())
                        },
                        &part[open + 1..close],
                    )
                },
                _ => (None, part),
            };

            let (local_part, domain) = addr.split_once('@')?;
            Some(AddressData {
                display_name,
                local_part: local_part.to_owned(),
                domain: domain.to_owned(),
            })
        })
        .collect()
}

fn body_structure_of(
    headers: &[(String, String)],
    body: &[u8],
) -> BodyStructureData {
    let content_type = header_value(headers, "Content-Type")
        .unwrap_or("text/plain; charset=us-ascii");
    let mut parts = content_type.split(';');
    let mime_type = parts.next().unwrap_or("text/plain").trim();
    let (media_type, media_subtype) =
        mime_type.split_once('/').unwrap_or(("text", "plain"));

    let mut content_type_parms = Vec::new();
    for parm in parts {
        if let Some((name, value)) = parm.split_once('=') {
            content_type_parms.push(name.trim().to_uppercase());
            content_type_parms
                .push(value.trim().trim_matches('"').to_owned());
        }
    }

    let is_text = media_type.eq_ignore_ascii_case("text");
    BodyStructureData::SinglePart {
        media_type: media_type.to_uppercase(),
        media_subtype: media_subtype.to_uppercase(),
        content_type_parms,
        content_id: header_value(headers, "Content-ID").map(str::to_owned),
        content_description: header_value(headers, "Content-Description")
            .map(str::to_owned),
        content_transfer_encoding: header_value(
            headers,
            "Content-Transfer-Encoding",
        )
        .unwrap_or("7bit")
        .to_uppercase(),
        size_octets: body.len() as u32,
        size_lines: is_text
            .then(|| body.iter().filter(|&&b| b'\n' == b).count() as u32),
    }
}

fn filter_headers(
    headers: &[u8],
    wanted: &[String],
    negative: bool,
) -> Vec<u8> {
    let mut out = Vec::new();
    let mut keeping = false;

    for line in headers.split_inclusive(|&b| b'\n' == b) {
        if trim_crlf(line).is_empty() {
            break;
        }

        if line.starts_with(b" ") || line.starts_with(b"\t") {
            // Continuation lines follow their header's fate
            if keeping {
                out.extend_from_slice(line);
            }
            continue;
        }

        let name = line
            .iter()
            .position(|&b| b':' == b)
            .map(|colon| String::from_utf8_lossy(&line[..colon]));
        keeping = name.map_or(false, |name| {
            let listed =
                wanted.iter().any(|w| w.eq_ignore_ascii_case(name.trim()));
            listed != negative
        });
        if keeping {
            out.extend_from_slice(line);
        }
    }

    out.extend_from_slice(b"\r\n");
    out
}

/// RFC 8474 EMAILID, derived from the content with FNV-1a so that the same
/// message carries the same id wherever it is copied.
fn email_id(content: &[u8]) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &byte in content {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("M{:016x}", hash)
}

fn query_matches(query: &SearchQuery, message: &StoredMessage) -> bool {
    use self::SearchQuery as Q;

    match *query {
        Q::All => true,
        Q::Answered => message.flags.contains(&Flag::Answered),
        Q::Bcc(ref needle) => header_contains(message, "Bcc", needle),
        Q::Before(date) => message.internal_date.date_naive() < date,
        Q::Body(ref needle) => {
            let (_, offset) = parse_headers(&message.content);
            contains_ci(&message.content[offset..], needle)
        },
        Q::Cc(ref needle) => header_contains(message, "Cc", needle),
        Q::Deleted => message.flags.contains(&Flag::Deleted),
        Q::Draft => message.flags.contains(&Flag::Draft),
        Q::Flagged => message.flags.contains(&Flag::Flagged),
        Q::From(ref needle) => header_contains(message, "From", needle),
        Q::Header(ref name, ref needle) => {
            header_contains(message, name, needle)
        },
        Q::Keyword(ref kw) => {
            message.flags.contains(&Flag::Keyword(kw.clone()))
        },
        Q::Larger(size) => message.content.len() as u32 > size,
        Q::Not(ref inner) => !query_matches(inner, message),
        Q::On(date) => date == message.internal_date.date_naive(),
        Q::Or(ref a, ref b) => {
            query_matches(a, message) || query_matches(b, message)
        },
        Q::Seen => message.flags.contains(&Flag::Seen),
        Q::SentBefore(date) => {
            sent_date(message).map_or(false, |sent| sent < date)
        },
        Q::SentOn(date) => {
            sent_date(message).map_or(false, |sent| sent == date)
        },
        Q::SentSince(date) => {
            sent_date(message).map_or(false, |sent| sent >= date)
        },
        Q::Since(date) => message.internal_date.date_naive() >= date,
        Q::Smaller(size) => (message.content.len() as u32) < size,
        Q::Subject(ref needle) => {
            header_contains(message, "Subject", needle)
        },
        Q::Text(ref needle) => contains_ci(&message.content, needle),
        Q::To(ref needle) => header_contains(message, "To", needle),
        Q::UidSet(ref uids) => uids.contains(message.uid),
        Q::Unanswered => !message.flags.contains(&Flag::Answered),
        Q::Undeleted => !message.flags.contains(&Flag::Deleted),
        Q::Undraft => !message.flags.contains(&Flag::Draft),
        Q::Unflagged => !message.flags.contains(&Flag::Flagged),
        Q::Unkeyword(ref kw) => {
            !message.flags.contains(&Flag::Keyword(kw.clone()))
        },
        Q::Unseen => !message.flags.contains(&Flag::Seen),
        Q::And(ref queries) => {
            queries.iter().all(|q| query_matches(q, message))
        },
    }
}

fn header_contains(
    message: &StoredMessage,
    name: &str,
    needle: &str,
) -> bool {
    let (headers, _) = parse_headers(&message.content);
    header_value(&headers, name)
        .map_or(false, |value| contains_ci(value.as_bytes(), needle))
}

fn contains_ci(haystack: &[u8], needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }

    let needle = needle.to_ascii_lowercase();
    haystack
        .windows(needle.len())
        .any(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}

fn sent_date(message: &StoredMessage) -> Option<NaiveDate> {
    let (headers, _) = parse_headers(&message.content);
    header_value(&headers, "Date")
        .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
        .map(|d| d.date_naive())
}

#[cfg(test)]
mod test {
    use super::*;

    const MESSAGE: &[u8] = b"From: Azure Kestrel <azure@example.com>\r\n\
        To: nobody@example.net\r\n\
        Subject: a test\r\n\
        Date: Sat, 4 Jul 2020 16:31:00 +0100\r\n\
        Message-ID: <1234@example.com>\r\n\
        \r\n\
        Hello, world!\r\n";

    fn fixture() -> (Arc<MemoryStore>, MemoryLogin) {
        let store = MemoryStore::new();
        store.provision("azure", "hunter2");
        let login = MemoryLogin::new(Arc::clone(&store));
        (store, login)
    }

    fn item(content: &[u8]) -> AppendItem {
        AppendItem {
            flags: vec![],
            internal_date: Utc::now().fixed_offset(),
            content: Arc::new(content.to_vec()),
        }
    }

    async fn session(login: &MemoryLogin) -> MemorySession {
        login
            .login(&Credentials {
                authzid: String::new(),
                authcid: "azure".to_owned(),
                password: "hunter2".to_owned(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn login_checks_credentials() {
        let (_store, login) = fixture();
        assert!(session(&login).await.list(&ListRequest {
            reference: String::new(),
            pattern: "*".to_owned(),
            select_subscribed: false,
        }).await.is_ok());

        assert!(matches!(
            login
                .login(&Credentials {
                    authzid: String::new(),
                    authcid: "azure".to_owned(),
                    password: "wrong".to_owned(),
                })
                .await,
            Err(Error::InvalidAuth),
        ));
        assert!(matches!(
            login
                .login(&Credentials {
                    authzid: "someone-else".to_owned(),
                    authcid: "azure".to_owned(),
                    password: "hunter2".to_owned(),
                })
                .await,
            Err(Error::InvalidAuthz),
        ));
    }

    #[tokio::test]
    async fn append_assigns_increasing_uids() {
        let (_store, login) = fixture();
        let mut session = session(&login).await;

        let first = session
            .append("INBOX", vec![item(MESSAGE)])
            .await
            .unwrap();
        let second = session
            .append("INBOX", vec![item(MESSAGE), item(MESSAGE)])
            .await
            .unwrap();

        assert_eq!("1", first.uids.to_string());
        assert_eq!("2:3", second.uids.to_string());
        assert_eq!(first.uid_validity, second.uid_validity);
    }

    #[tokio::test]
    async fn uid_validity_changes_on_recreate() {
        let (_store, login) = fixture();
        let mut session = session(&login).await;

        session.create("junk").await.unwrap();
        let before = session
            .status(&StatusRequest {
                name: "junk".to_owned(),
                uidvalidity: true,
                ..StatusRequest::default()
            })
            .await
            .unwrap();
        session.delete("junk").await.unwrap();
        session.create("junk").await.unwrap();
        let after = session
            .status(&StatusRequest {
                name: "junk".to_owned(),
                uidvalidity: true,
                ..StatusRequest::default()
            })
            .await
            .unwrap();

        assert_ne!(before.uidvalidity, after.uidvalidity);
    }

    #[tokio::test]
    async fn recent_claimed_by_first_writable_session() {
        let (_store, login) = fixture();
        let mut session1 = session(&login).await;
        let mut session2 = session(&login).await;

        session1
            .append("INBOX", vec![item(MESSAGE)])
            .await
            .unwrap();

        let init1 = session1.select("INBOX", false).await.unwrap();
        assert_eq!(vec![Uid::u(1)], init1.recent);

        let init2 = session2.select("INBOX", false).await.unwrap();
        assert_eq!(Vec::<Uid>::new(), init2.recent);
    }

    #[tokio::test]
    async fn examine_does_not_claim_recent() {
        let (_store, login) = fixture();
        let mut session1 = session(&login).await;
        let mut session2 = session(&login).await;

        session1
            .append("INBOX", vec![item(MESSAGE)])
            .await
            .unwrap();

        let examined = session1.select("INBOX", true).await.unwrap();
        assert_eq!(Vec::<Uid>::new(), examined.recent);

        // The recency hand-off is still available to a SELECT
        let selected = session2.select("INBOX", false).await.unwrap();
        assert_eq!(vec![Uid::u(1)], selected.recent);
    }

    #[tokio::test]
    async fn envelope_and_structure_from_headers() {
        let (_store, login) = fixture();
        let mut session = session(&login).await;
        session
            .append("INBOX", vec![item(MESSAGE)])
            .await
            .unwrap();
        let mut init = session.select("INBOX", false).await.unwrap();

        let data = init.mailbox.fetch(Uid::u(1)).await.unwrap();
        assert_eq!(ns("a test"), data.envelope.subject);
        assert_eq!(
            vec![AddressData {
                display_name: Some("Azure Kestrel".to_owned()),
                local_part: "azure".to_owned(),
                domain: "example.com".to_owned(),
            }],
            data.envelope.from,
        );
        assert_eq!(Some("<1234@example.com>".to_owned()), data.envelope.message_id);
        match data.body_structure {
            BodyStructureData::SinglePart {
                ref media_type,
                ref media_subtype,
                size_octets,
                ..
            } => {
                assert_eq!("TEXT", media_type);
                assert_eq!("PLAIN", media_subtype);
                assert_eq!(15, size_octets);
            },
            ref other => panic!("unexpected structure: {:?}", other),
        }

        fn ns(s: &str) -> Option<String> {
            Some(s.to_owned())
        }
    }

    #[tokio::test]
    async fn sections_extracted() {
        let (_store, login) = fixture();
        let mut session = session(&login).await;
        session
            .append("INBOX", vec![item(MESSAGE)])
            .await
            .unwrap();
        let mut init = session.select("INBOX", false).await.unwrap();

        let text = init
            .mailbox
            .section(
                Uid::u(1),
                &BodySection {
                    subscripts: vec![],
                    kind: SectionKind::Text,
                    partial: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b"Hello, world!\r\n", &text[..]);

        let fields = init
            .mailbox
            .section(
                Uid::u(1),
                &BodySection {
                    subscripts: vec![],
                    kind: SectionKind::HeaderFields {
                        negative: false,
                        headers: vec!["subject".to_owned()],
                    },
                    partial: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b"Subject: a test\r\n\r\n", &fields[..]);

        assert_eq!(
            None,
            init.mailbox
                .section(
                    Uid::u(1),
                    &BodySection {
                        subscripts: vec![2, 1],
                        kind: SectionKind::Full,
                        partial: None,
                    },
                )
                .await
                .unwrap(),
        );
    }

    #[tokio::test]
    async fn search_queries() {
        let (_store, login) = fixture();
        let mut session = session(&login).await;
        session
            .append("INBOX", vec![item(MESSAGE)])
            .await
            .unwrap();
        let mut init = session.select("INBOX", false).await.unwrap();

        let request = SearchRequest {
            queries: vec![SearchQuery::Subject("TEST".to_owned())],
        };
        assert_eq!(
            vec![Uid::u(1)],
            init.mailbox.search(&request).await.unwrap(),
        );

        let request = SearchRequest {
            queries: vec![SearchQuery::Not(Box::new(SearchQuery::Body(
                "hello".to_owned(),
            )))],
        };
        assert_eq!(
            Vec::<Uid>::new(),
            init.mailbox.search(&request).await.unwrap(),
        );

        let request = SearchRequest {
            queries: vec![SearchQuery::SentOn(
                NaiveDate::from_ymd_opt(2020, 7, 4).unwrap(),
            )],
        };
        assert_eq!(
            vec![Uid::u(1)],
            init.mailbox.search(&request).await.unwrap(),
        );
    }

    #[tokio::test]
    async fn deleted_mailbox_invalidates_snapshot() {
        let (_store, login) = fixture();
        let mut session1 = session(&login).await;
        let mut session2 = session(&login).await;

        session1.create("doomed").await.unwrap();
        let mut init = session1.select("doomed", false).await.unwrap();

        session2.delete("doomed").await.unwrap();
        let poll = init.mailbox.poll().await.unwrap();
        assert_eq!(0, poll.snapshot.uid_validity);
    }
}
