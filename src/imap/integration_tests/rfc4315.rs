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

use tokio::task::LocalSet;

use super::defs::*;

#[tokio::test]
async fn uid_expunge_reports_descending_sequence_numbers() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("uid_expunge");
            quick_log_in(&mut client).await;
            // Burn UIDs 1..=9 so the mailbox holds UIDs 10..=13, the shape
            // of the canonical scenario.
            for _ in 0..13 {
                quick_append(&mut client, "INBOX", TEST_MESSAGE).await;
            }
            quick_select(&mut client, "INBOX").await;
            let responses = client
                .command("p1 STORE 1:9 +FLAGS.SILENT (\\Deleted)")
                .await
                .unwrap();
            assert_line_like("p1 OK .*", responses.last().unwrap());
            let responses = client.command("p2 EXPUNGE").await.unwrap();
            assert_line_like("p2 OK .*", responses.last().unwrap());

            // Mark everything but UID 11 deleted
            let responses = client
                .command("p3 UID STORE 10,12,13 +FLAGS.SILENT (\\Deleted)")
                .await
                .unwrap();
            assert_line_like("p3 OK .*", responses.last().unwrap());

            let responses =
                client.command("e UID EXPUNGE 1:*").await.unwrap();
            assert_eq!("* 4 EXPUNGE", responses[0]);
            assert_eq!("* 3 EXPUNGE", responses[1]);
            assert_eq!("* 1 EXPUNGE", responses[2]);
            assert_line_like(
                "e OK UID EXPUNGE completed\\.",
                responses.last().unwrap(),
            );

            // UID 11 remains, now at sequence number 1
            let responses = client
                .command("v UID FETCH 11 UID")
                .await
                .unwrap();
            assert_eq!("* 1 FETCH (UID 11)", responses[0]);
        })
        .await;
}

#[tokio::test]
async fn uid_expunge_ignores_unknown_uids() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("uid_expunge_unknown");
            quick_log_in(&mut client).await;
            quick_append(&mut client, "INBOX", TEST_MESSAGE).await;
            quick_select(&mut client, "INBOX").await;

            // None of these UIDs are deleted, and most don't exist; the
            // command still succeeds doing nothing.
            let responses = client
                .command("e UID EXPUNGE 1:100")
                .await
                .unwrap();
            assert_line_like(
                "e OK UID EXPUNGE completed\\.",
                responses.last().unwrap(),
            );

            let responses = client
                .command("f FETCH 1 UID")
                .await
                .unwrap();
            assert_eq!("* 1 FETCH (UID 1)", responses[0]);
        })
        .await;
}

#[tokio::test]
async fn expunge_from_other_session_hidden_until_safe_point() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("hidden_main");
            quick_log_in(&mut client).await;
            for _ in 0..3 {
                quick_append(&mut client, "INBOX", TEST_MESSAGE).await;
            }
            quick_select(&mut client, "INBOX").await;

            // Another session expunges message 2 behind our back.
            let mut other = setup.connect("hidden_other");
            quick_log_in(&mut other).await;
            quick_select(&mut other, "INBOX").await;
            let responses = other
                .command("o1 UID STORE 2 +FLAGS.SILENT (\\Deleted)")
                .await
                .unwrap();
            assert_line_like("o1 OK .*", responses.last().unwrap());
            let responses =
                other.command("o2 UID EXPUNGE 2").await.unwrap();
            assert_line_like("o2 OK .*", responses.last().unwrap());

            // A UID FETCH must not shift our sequence numbers mid-command;
            // the expunge is deferred past its flush.
            let responses = client
                .command("h1 UID FETCH 1,3 UID")
                .await
                .unwrap();
            assert_eq!("* 1 FETCH (UID 1)", responses[0]);
            assert_eq!("* 3 FETCH (UID 3)", responses[1]);
            assert_line_like("h1 OK .*", &responses[2]);

            // The next command's flush reports it.
            let responses = client.command("h2 NOOP").await.unwrap();
            assert_eq!("* 2 EXPUNGE", responses[0]);
            assert_line_like("h2 OK .*", &responses[1]);
        })
        .await;
}
