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

//! The per-connection view over the selected mailbox.
//!
//! Nothing here does I/O; it is pure state management. The backend writes
//! fresh snapshots into the view, and the connection calls `fork()` whenever
//! it is about to flush responses. `fork()` produces the untagged updates
//! implied by the difference between the last snapshot the client was told
//! about and the current one, then rolls the view forward.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::mem;

use crate::account::model::*;

/// An immutable view of a mailbox captured at a point in time.
///
/// Sequence numbers are the 1-based indices into `uids`.
#[derive(Debug, Clone, Default)]
pub struct MailboxSnapshot {
    pub uid_validity: u32,
    /// The predicted next UID.
    pub uidnext: u32,
    /// The UIDs of the messages in the mailbox, ascending.
    pub uids: Vec<Uid>,
    /// The persistent flags of each message.
    pub flags: HashMap<Uid, Vec<Flag>>,
}

impl MailboxSnapshot {
    pub fn exists(&self) -> usize {
        self.uids.len()
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.uids.binary_search(&uid).is_ok()
    }

    pub fn flags_of(&self, uid: Uid) -> &[Flag] {
        self.flags.get(&uid).map(|f| &f[..]).unwrap_or(&[])
    }

    /// The sequence number of the first message without `\Seen`, if any.
    pub fn first_unseen(&self) -> Option<Seqnum> {
        self.uids
            .iter()
            .position(|&uid| !self.flags_of(uid).contains(&Flag::Seen))
            .map(Seqnum::from_index)
    }
}

/// An untagged update produced by `fork()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    /// `* n EXPUNGE`. Emitted in descending sequence order so every number
    /// is valid at the moment it is sent.
    Expunge(Seqnum),
    /// `* n EXISTS`
    Exists(u32),
    /// `* n RECENT`
    Recent(u32),
    /// `* seqnum FETCH (FLAGS (...) [UID uid])`
    Fetch {
        seqnum: Seqnum,
        uid: Uid,
        flags: Vec<Flag>,
        recent: bool,
    },
    /// The UID validity changed under us; the selected state is invalid and
    /// the connection must force-close the mailbox.
    InvalidSnapshot,
}

/// What to do about a `FETCH` that addressed a UID which has been expunged
/// but is still in the client's snapshot (RFC 2180 §4.1.2 plus the
/// loop-breaker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingUidVerdict {
    /// First offence since the last flush: answer NO.
    No,
    /// Repeat offence: hang up.
    Bye,
}

/// The state a connection holds for its selected mailbox.
pub struct SelectedMailbox {
    name: String,
    read_only: bool,
    /// The snapshot the client has been told about.
    prev: MailboxSnapshot,
    /// The latest snapshot from the backend.
    cur: MailboxSnapshot,
    /// Session-only flags per UID, exclusive of `\Recent`.
    session_flags: HashMap<Uid, Vec<Flag>>,
    /// UIDs this session owns `\Recent` for.
    recent: BTreeSet<Uid>,
    /// Expunged UIDs whose `EXPUNGE` must be suppressed in the next fork.
    hidden: HashSet<Uid>,
    /// One-shot: suppress all expunge reporting in the next fork.
    hide_all_expunged: bool,
    /// Expunged-but-addressable UIDs the client has already been told NO
    /// about since the last fork.
    loopbreaker: HashSet<Uid>,
    /// The RECENT count last reported.
    reported_recent: usize,
}

impl SelectedMailbox {
    /// Create a view whose first `fork()` reports nothing.
    ///
    /// The initial counts are reported by the `SELECT` response itself, not
    /// by the diff engine.
    pub fn new(
        name: String,
        read_only: bool,
        snapshot: MailboxSnapshot,
    ) -> Self {
        SelectedMailbox {
            name,
            read_only,
            prev: snapshot.clone(),
            cur: snapshot,
            session_flags: HashMap::new(),
            recent: BTreeSet::new(),
            hidden: HashSet::new(),
            hide_all_expunged: false,
            loopbreaker: HashSet::new(),
            reported_recent: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn uid_validity(&self) -> u32 {
        self.prev.uid_validity
    }

    /// The number of messages the client currently knows about.
    pub fn exists(&self) -> usize {
        self.prev.exists()
    }

    pub fn first_unseen(&self) -> Option<Seqnum> {
        self.prev.first_unseen()
    }

    pub fn uidnext(&self) -> u32 {
        self.cur.uidnext
    }

    pub fn max_seqnum(&self) -> Option<Seqnum> {
        Seqnum::of(self.prev.exists() as u32)
    }

    /// The value `*` denotes in a UID sequence set.
    pub fn uid_splat(&self) -> Uid {
        self.prev
            .uids
            .last()
            .copied()
            .unwrap_or_else(|| Uid::of(self.cur.uidnext.max(1)).unwrap())
    }

    /// Write a fresh backend snapshot into the view.
    ///
    /// Has no effect on the client-visible state until the next `fork()`.
    pub fn update(&mut self, snapshot: MailboxSnapshot) {
        self.cur = snapshot;
    }

    /// Grant this session `\Recent` ownership of the given UIDs.
    pub fn grant_recent(&mut self, uids: &[Uid]) {
        self.recent.extend(uids.iter().copied());
    }

    pub fn is_recent(&self, uid: Uid) -> bool {
        self.recent.contains(&uid)
    }

    /// The UIDs this session holds `\Recent` for, ascending.
    pub fn recent_uids(&self) -> impl Iterator<Item = Uid> + '_ {
        self.recent.iter().copied()
    }

    pub fn recent_count(&self) -> usize {
        self.recent
            .iter()
            .filter(|&&uid| self.prev.contains(uid))
            .count()
    }

    /// Record the initial RECENT count reported by the SELECT response, so
    /// the first fork does not repeat it.
    pub fn note_reported_recent(&mut self) {
        self.reported_recent = self.recent_count();
    }

    /// Set session-only flags for a UID.
    pub fn set_session_flags(&mut self, uid: Uid, flags: Vec<Flag>) {
        if flags.is_empty() {
            self.session_flags.remove(&uid);
        } else {
            self.session_flags.insert(uid, flags);
        }
    }

    /// The full client-visible flag set of a message: persistent flags from
    /// the latest snapshot plus any session flags.
    pub fn flags_of(&self, uid: Uid) -> Vec<Flag> {
        let mut flags = self.cur.flags_of(uid).to_vec();
        if let Some(session) = self.session_flags.get(&uid) {
            for flag in session {
                if !flags.contains(flag) {
                    flags.push(flag.clone());
                }
            }
        }
        flags
    }

    /// Record a UID whose expungement must not be reported in the next
    /// diff.
    pub fn hide(&mut self, uid: Uid) {
        self.hidden.insert(uid);
    }

    /// Suppress all expunge reporting in the next diff. Used while a `UID
    /// FETCH`/`UID STORE` is in flight so sequence numbers stay stable
    /// until a safe flush point.
    pub fn hide_expunged(&mut self) {
        self.hide_all_expunged = true;
    }

    /// Pretend the client has already seen the current flags of the given
    /// UIDs, suppressing the untagged `FETCH` a `.SILENT` store would
    /// otherwise produce. Flag changes from other sessions still surface.
    pub fn silence(&mut self, uids: impl IntoIterator<Item = Uid>) {
        for uid in uids {
            if let Some(flags) = self.cur.flags.get(&uid) {
                self.prev.flags.insert(uid, flags.clone());
            }
        }
    }

    /// Translate a sequence number through the client-visible snapshot.
    pub fn seqnum_to_uid(&self, seqnum: Seqnum) -> Option<Uid> {
        self.prev.uids.get(seqnum.to_index()).copied()
    }

    /// Translate a UID through the client-visible snapshot.
    pub fn uid_to_seqnum(&self, uid: Uid) -> Option<Seqnum> {
        self.prev.uids.binary_search(&uid).ok().map(Seqnum::from_index)
    }

    /// Translate a sequence-number set to a UID set, dropping anything
    /// unaddressable.
    pub fn seqnum_range_to_uid(
        &self,
        seqnums: &SeqRange<Seqnum>,
    ) -> SeqRange<Uid> {
        let mut ret = SeqRange::new();
        for seqnum in seqnums.items(u32::MAX) {
            if let Some(uid) = self.seqnum_to_uid(seqnum) {
                ret.append(uid);
            }
        }
        ret
    }

    /// Whether the UID is addressable in the client-visible snapshot.
    pub fn is_addressable(&self, uid: Uid) -> bool {
        self.prev.contains(uid)
    }

    /// Whether the UID still exists in the latest backend snapshot.
    pub fn still_exists(&self, uid: Uid) -> bool {
        self.cur.contains(uid)
    }

    /// Note a fetch of an addressable UID that no longer exists.
    pub fn note_missing(&mut self, uid: Uid) -> MissingUidVerdict {
        if self.loopbreaker.insert(uid) {
            MissingUidVerdict::No
        } else {
            MissingUidVerdict::Bye
        }
    }

    /// Diff the current snapshot against the last flushed one, producing
    /// the untagged updates to emit, and roll the view forward so that an
    /// immediate second call yields nothing.
    ///
    /// Whether the flag-change `FETCH` updates are serialized with a `UID`
    /// item is the caller's concern; the UID always travels with the
    /// update.
    pub fn fork(&mut self) -> Vec<ViewUpdate> {
        if self.cur.uid_validity != self.prev.uid_validity {
            return vec![ViewUpdate::InvalidSnapshot];
        }

        let hidden = mem::take(&mut self.hidden);
        let hide_all = mem::replace(&mut self.hide_all_expunged, false);
        let mut updates = Vec::new();

        // Expunges, descending so each sequence number is valid at the
        // moment of emission. Hidden UIDs stay in the client-visible
        // snapshot and get reported by a later fork.
        let mut retained = Vec::<Uid>::new();
        for (ix, &uid) in self.prev.uids.iter().enumerate().rev() {
            if self.cur.contains(uid) {
                continue;
            }
            if hide_all || hidden.contains(&uid) {
                retained.push(uid);
            } else {
                updates.push(ViewUpdate::Expunge(Seqnum::from_index(ix)));
                self.session_flags.remove(&uid);
                self.recent.remove(&uid);
            }
        }

        let mut visible = self.cur.uids.clone();
        visible.extend(retained.iter().copied());
        visible.sort_unstable();

        let any_new = self
            .cur
            .uids
            .iter()
            .any(|&uid| !self.prev.contains(uid));
        if any_new {
            updates.push(ViewUpdate::Exists(visible.len() as u32));
        }

        let recent_count = self
            .recent
            .iter()
            .filter(|&&uid| {
                visible.binary_search(&uid).is_ok()
            })
            .count();
        if recent_count != self.reported_recent {
            updates.push(ViewUpdate::Recent(recent_count as u32));
            self.reported_recent = recent_count;
        }

        // Flag changes on messages present in both snapshots.
        for &uid in &self.cur.uids {
            if !self.prev.contains(uid) {
                continue;
            }
            if flags_equal(self.prev.flags_of(uid), self.cur.flags_of(uid)) {
                continue;
            }

            let seqnum = Seqnum::from_index(
                visible.binary_search(&uid).expect("uid must be visible"),
            );
            updates.push(ViewUpdate::Fetch {
                seqnum,
                uid,
                flags: self.flags_of(uid),
                recent: self.recent.contains(&uid),
            });
        }

        // Roll forward: the new client-visible snapshot is the current one
        // plus any retained (hidden) messages, which keep the flags the
        // client last saw.
        let mut flags = self.cur.flags.clone();
        for &uid in &retained {
            flags.insert(uid, self.prev.flags_of(uid).to_vec());
        }
        self.prev = MailboxSnapshot {
            uid_validity: self.cur.uid_validity,
            uidnext: self.cur.uidnext,
            uids: visible,
            flags,
        };
        self.loopbreaker.clear();

        updates
    }

    /// The restricted diff used after `FETCH`, `STORE`, and `SEARCH`, which
    /// must not change the sequence-number mapping: only flag changes on
    /// messages the client already knows are reported, and the reported
    /// flags are absorbed into the client-visible snapshot.
    pub fn mini_fork(&mut self) -> Vec<ViewUpdate> {
        let mut updates = Vec::new();

        if self.cur.uid_validity != self.prev.uid_validity {
            return vec![ViewUpdate::InvalidSnapshot];
        }

        for ix in 0..self.prev.uids.len() {
            let uid = self.prev.uids[ix];
            if !self.cur.contains(uid) {
                continue;
            }
            if flags_equal(self.prev.flags_of(uid), self.cur.flags_of(uid)) {
                continue;
            }

            updates.push(ViewUpdate::Fetch {
                seqnum: Seqnum::from_index(ix),
                uid,
                flags: self.flags_of(uid),
                recent: self.recent.contains(&uid),
            });
            let flags = self.cur.flags_of(uid).to_vec();
            self.prev.flags.insert(uid, flags);
        }

        updates
    }
}

fn flags_equal(a: &[Flag], b: &[Flag]) -> bool {
    a.len() == b.len() && a.iter().all(|f| b.contains(f))
}

#[cfg(test)]
mod test {
    use super::*;

    fn snapshot(
        uid_validity: u32,
        uids: &[u32],
        flagged: &[u32],
    ) -> MailboxSnapshot {
        let uids: Vec<Uid> = uids.iter().map(|&u| Uid::u(u)).collect();
        let mut flags = HashMap::new();
        for &uid in &uids {
            let mut f = Vec::new();
            if flagged.contains(&uid.0.get()) {
                f.push(Flag::Flagged);
            }
            flags.insert(uid, f);
        }
        MailboxSnapshot {
            uid_validity,
            uidnext: uids.last().map(|u| u.0.get() + 1).unwrap_or(1),
            uids,
            flags,
        }
    }

    fn selected(uids: &[u32]) -> SelectedMailbox {
        SelectedMailbox::new(
            "INBOX".to_owned(),
            false,
            snapshot(1, uids, &[]),
        )
    }

    #[test]
    fn initial_fork_is_empty() {
        let mut mb = selected(&[1, 2, 3]);
        assert_eq!(Vec::<ViewUpdate>::new(), mb.fork());
    }

    #[test]
    fn fork_is_idempotent_without_changes() {
        let mut mb = selected(&[1, 2, 3]);
        mb.update(snapshot(1, &[1, 2, 3, 4], &[]));
        assert!(!mb.fork().is_empty());
        assert_eq!(Vec::<ViewUpdate>::new(), mb.fork());
    }

    #[test]
    fn new_messages_reported_as_exists() {
        let mut mb = selected(&[1, 2]);
        mb.update(snapshot(1, &[1, 2, 5], &[]));
        mb.grant_recent(&[Uid::u(5)]);

        assert_eq!(
            vec![ViewUpdate::Exists(3), ViewUpdate::Recent(1)],
            mb.fork(),
        );
        assert_eq!(Some(Uid::u(5)), mb.seqnum_to_uid(Seqnum::u(3)));
    }

    #[test]
    fn expunges_reported_descending() {
        // UIDs 10..13, everything but 11 expunged
        let mut mb = selected(&[10, 11, 12, 13]);
        mb.update(snapshot(1, &[11], &[]));

        assert_eq!(
            vec![
                ViewUpdate::Expunge(Seqnum::u(4)),
                ViewUpdate::Expunge(Seqnum::u(3)),
                ViewUpdate::Expunge(Seqnum::u(1)),
            ],
            mb.fork(),
        );
        assert_eq!(Some(Seqnum::u(1)), mb.uid_to_seqnum(Uid::u(11)));
        assert_eq!(1, mb.exists());
    }

    #[test]
    fn sequence_numbers_match_sorted_snapshot_after_flush() {
        let mut mb = selected(&[1, 2, 3, 4]);
        mb.update(snapshot(1, &[2, 4, 7], &[]));
        mb.fork();

        for (ix, &uid) in [2u32, 4, 7].iter().enumerate() {
            assert_eq!(
                Some(Seqnum::from_index(ix)),
                mb.uid_to_seqnum(Uid::u(uid)),
            );
        }
    }

    #[test]
    fn flag_changes_reported_as_fetch() {
        let mut mb = selected(&[1, 2]);
        mb.update(snapshot(1, &[1, 2], &[2]));

        assert_eq!(
            vec![ViewUpdate::Fetch {
                seqnum: Seqnum::u(2),
                uid: Uid::u(2),
                flags: vec![Flag::Flagged],
                recent: false,
            }],
            mb.fork(),
        );
        assert_eq!(Vec::<ViewUpdate>::new(), mb.fork());
    }

    #[test]
    fn silenced_flag_changes_not_reported() {
        let mut mb = selected(&[1, 2]);
        mb.update(snapshot(1, &[1, 2], &[2]));
        mb.silence([Uid::u(2)]);
        assert_eq!(Vec::<ViewUpdate>::new(), mb.fork());
    }

    #[test]
    fn hidden_expunge_deferred_to_next_fork() {
        let mut mb = selected(&[1, 2, 3]);
        mb.update(snapshot(1, &[1, 3], &[]));
        mb.hide(Uid::u(2));

        assert_eq!(Vec::<ViewUpdate>::new(), mb.fork());
        // Still addressable through the client snapshot
        assert_eq!(Some(Seqnum::u(2)), mb.uid_to_seqnum(Uid::u(2)));

        // The next fork reports it
        assert_eq!(vec![ViewUpdate::Expunge(Seqnum::u(2))], mb.fork());
        assert_eq!(None, mb.uid_to_seqnum(Uid::u(2)));
    }

    #[test]
    fn hide_expunged_suppresses_everything_once() {
        let mut mb = selected(&[1, 2, 3]);
        mb.update(snapshot(1, &[3], &[]));
        mb.hide_expunged();

        assert_eq!(Vec::<ViewUpdate>::new(), mb.fork());
        assert_eq!(3, mb.exists());

        assert_eq!(
            vec![
                ViewUpdate::Expunge(Seqnum::u(2)),
                ViewUpdate::Expunge(Seqnum::u(1)),
            ],
            mb.fork(),
        );
    }

    #[test]
    fn uid_validity_change_invalidates_view() {
        let mut mb = selected(&[1, 2]);
        mb.update(snapshot(2, &[1, 2], &[]));
        assert_eq!(vec![ViewUpdate::InvalidSnapshot], mb.fork());
    }

    #[test]
    fn mini_fork_reports_flags_but_not_structure() {
        let mut mb = selected(&[1, 2, 3]);
        // UID 2 expunged, UID 5 new, UID 3 flagged, all at once
        mb.update(snapshot(1, &[1, 3, 5], &[3]));

        assert_eq!(
            vec![ViewUpdate::Fetch {
                seqnum: Seqnum::u(3),
                uid: Uid::u(3),
                flags: vec![Flag::Flagged],
                recent: false,
            }],
            mb.mini_fork(),
        );
        // The mapping did not change
        assert_eq!(3, mb.exists());
        assert_eq!(Some(Seqnum::u(2)), mb.uid_to_seqnum(Uid::u(2)));

        // The structural updates arrive with the next full fork, without
        // repeating the flag fetch.
        assert_eq!(
            vec![
                ViewUpdate::Expunge(Seqnum::u(2)),
                ViewUpdate::Exists(3),
            ],
            mb.fork(),
        );
    }

    #[test]
    fn session_flags_merge_into_fetch_flags() {
        let mut mb = selected(&[1]);
        mb.set_session_flags(
            Uid::u(1),
            vec![Flag::Keyword("$Transient".to_owned())],
        );
        assert_eq!(
            vec![Flag::Keyword("$Transient".to_owned())],
            mb.flags_of(Uid::u(1)),
        );

        mb.set_session_flags(Uid::u(1), vec![]);
        assert_eq!(Vec::<Flag>::new(), mb.flags_of(Uid::u(1)));
    }

    #[test]
    fn loopbreaker_escalates_to_bye() {
        let mut mb = selected(&[1, 2]);
        mb.update(snapshot(1, &[1], &[]));

        assert_eq!(MissingUidVerdict::No, mb.note_missing(Uid::u(2)));
        assert_eq!(MissingUidVerdict::Bye, mb.note_missing(Uid::u(2)));

        // A flush clears the state
        mb.fork();
        assert_eq!(MissingUidVerdict::No, mb.note_missing(Uid::u(2)));
    }
}
