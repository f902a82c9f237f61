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
use crate::support::system_config::SystemConfig;

#[tokio::test]
async fn login_select_logout() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("login_select_logout");
            quick_log_in(&mut client).await;
            for _ in 0..4 {
                quick_append(
                    &mut client,
                    "INBOX",
                    "Subject: x\r\n\r\nbody",
                )
                .await;
            }

            let responses =
                client.command("b SELECT INBOX").await.unwrap();
            assert_line_like("\\* FLAGS \\(.*\\)", &responses[0]);
            assert_eq!("* 4 EXISTS", responses[1]);
            assert_eq!("* 4 RECENT", responses[2]);
            assert_line_like("\\* OK \\[UNSEEN 1\\].*", &responses[3]);
            assert_line_like(
                "\\* OK \\[PERMANENTFLAGS \\([^)]*\\\\\\*\\)\\].*",
                &responses[4],
            );
            assert_line_like("\\* OK \\[UIDNEXT 5\\].*", &responses[5]);
            assert_line_like(
                "\\* OK \\[UIDVALIDITY \\d+\\].*",
                &responses[6],
            );
            assert_line_like(
                "b OK \\[READ-WRITE\\] Selected mailbox\\.",
                responses.last().unwrap(),
            );

            let responses = client.command("c LOGOUT").await.unwrap();
            assert_eq!("* BYE Logging out.", responses[0]);
            assert_eq!("c OK Logout successful.", responses[1]);
        })
        .await;
}

#[tokio::test]
async fn append_reports_exists_and_appenduid() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("append_scenario");
            quick_log_in(&mut client).await;
            for _ in 0..4 {
                quick_append(&mut client, "INBOX", "Subject: x\r\n\r\nold")
                    .await;
            }
            quick_select(&mut client, "INBOX").await;

            // Selecting claimed \Recent on the first four; a new message
            // arrives with its own recency.
            let command = format!(
                "d APPEND INBOX (\\Flagged) {{{}+}}\r\n{}\r\n",
                TEST_MESSAGE.len(),
                TEST_MESSAGE,
            );
            client.write_raw(command.as_bytes()).await.unwrap();
            let responses = client.collect_responses("d").await.unwrap();

            assert_eq!("* 5 EXISTS", responses[0]);
            assert_eq!("* 5 RECENT", responses[1]);
            assert_line_like(
                "d OK \\[APPENDUID \\d+ 5\\] APPEND completed\\.",
                &responses[2],
            );
        })
        .await;
}

#[tokio::test]
async fn multiappend_is_atomic_and_contiguous() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("multiappend");
            quick_log_in(&mut client).await;

            client
                .write_raw(
                    b"m APPEND INBOX {14+}\r\nSubject: a\r\n\r\n \
                      (\\Seen) {14+}\r\nSubject: b\r\n\r\n\r\n",
                )
                .await
                .unwrap();
            let responses = client.collect_responses("m").await.unwrap();
            assert_line_like(
                "m OK \\[APPENDUID \\d+ 1:2\\] APPEND completed\\.",
                responses.last().unwrap(),
            );
        })
        .await;
}

#[tokio::test]
async fn oversized_append_rejected_with_toobig() {
    LocalSet::new()
        .run_until(async {
            let mut config = SystemConfig::default();
            config.max_append_len = 16;
            let setup = set_up_with_config(config);

            let mut client = setup.connect("toobig");
            quick_log_in(&mut client).await;

            client
                .write_raw(b"t APPEND INBOX {64}\r\n")
                .await
                .unwrap();
            let responses = client.collect_responses("t").await.unwrap();
            assert_line_like(
                "t NO \\[TOOBIG\\] .*",
                responses.last().unwrap(),
            );

            // The connection is still usable
            let responses = client.command("u NOOP").await.unwrap();
            assert_line_like("u OK .*", responses.last().unwrap());
        })
        .await;
}

#[tokio::test]
async fn fetch_flags_and_body() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("fetch");
            quick_log_in(&mut client).await;
            quick_append(&mut client, "INBOX", TEST_MESSAGE).await;
            quick_select(&mut client, "INBOX").await;

            let responses = client
                .command("f1 FETCH 1 (UID FLAGS RFC822.SIZE)")
                .await
                .unwrap();
            assert_line_like(
                "\\* 1 FETCH \\(UID 1 FLAGS \\(\\\\Recent\\) \
                 RFC822\\.SIZE 39\\)",
                &responses[0],
            );
            assert_line_like("f1 OK .*", &responses[1]);

            // BODY[] implicitly stores \Seen; the flag change merges into
            // the same untagged FETCH as the body data.
            let responses =
                client.command("f2 FETCH 1 BODY[]").await.unwrap();
            assert_line_like(
                "(?s)\\* 1 FETCH \\(BODY\\[\\] \\{39\\}.* \
                 FLAGS \\(\\\\Recent \\\\Seen\\)\\)",
                &responses[0],
            );
            assert_line_like("f2 OK .*", &responses[1]);

            // Sequence numbers out of range are a client bug
            let responses = client.command("f3 FETCH 9 UID").await.unwrap();
            assert_line_like(
                "f3 BAD \\[CLIENTBUG\\] .*",
                responses.last().unwrap(),
            );
        })
        .await;
}

#[tokio::test]
async fn store_silent_suppresses_fetch() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("store");
            quick_log_in(&mut client).await;
            quick_append(&mut client, "INBOX", TEST_MESSAGE).await;
            quick_select(&mut client, "INBOX").await;

            let responses = client
                .command("s1 STORE 1 +FLAGS (\\Deleted)")
                .await
                .unwrap();
            assert_line_like(
                "\\* 1 FETCH \\(FLAGS \\(\\\\Recent \\\\Deleted\\)\\)",
                &responses[0],
            );
            assert_line_like("s1 OK .*", &responses[1]);

            let responses = client
                .command("s2 STORE 1 -FLAGS.SILENT (\\Deleted)")
                .await
                .unwrap();
            assert_eq!(1, responses.len(), "unexpected: {:?}", responses);
            assert_line_like("s2 OK .*", &responses[0]);
        })
        .await;
}

#[tokio::test]
async fn search_returns_sequence_numbers() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("search");
            quick_log_in(&mut client).await;
            quick_append(&mut client, "INBOX", "Subject: apple\r\n\r\nx")
                .await;
            quick_append(&mut client, "INBOX", "Subject: banana\r\n\r\nx")
                .await;
            quick_select(&mut client, "INBOX").await;

            let responses = client
                .command("k1 SEARCH SUBJECT banana")
                .await
                .unwrap();
            assert_eq!("* SEARCH 2", responses[0]);
            assert_line_like("k1 OK .*", &responses[1]);

            let responses = client
                .command("k2 UID SEARCH ALL")
                .await
                .unwrap();
            assert_eq!("* SEARCH 1 2", responses[0]);

            let responses = client
                .command("k3 SEARCH CHARSET KOI8-R ALL")
                .await
                .unwrap();
            assert_line_like(
                "k3 NO \\[BADCHARSET\\] .*",
                responses.last().unwrap(),
            );
        })
        .await;
}

#[tokio::test]
async fn state_gating_rejects_misplaced_commands() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("gating");
            skip_greeting(&mut client).await;

            // Selected-state command before login
            let responses = client.command("g1 EXPUNGE").await.unwrap();
            assert_line_like(
                "g1 NO \\[CLIENTBUG\\] .*",
                responses.last().unwrap(),
            );

            // Auth-state command before login
            let responses =
                client.command("g2 LIST \"\" *").await.unwrap();
            assert_line_like(
                "g2 NO \\[CLIENTBUG\\] .*",
                responses.last().unwrap(),
            );

            let responses = client
                .command("g3 LOGIN demouser demopass")
                .await
                .unwrap();
            assert_line_like("g3 OK .*", responses.last().unwrap());

            // LOGIN again is no longer legal
            let responses = client
                .command("g4 LOGIN demouser demopass")
                .await
                .unwrap();
            assert_line_like(
                "g4 NO \\[CLIENTBUG\\] .*",
                responses.last().unwrap(),
            );
        })
        .await;
}

#[tokio::test]
async fn bad_command_storm_disconnects() {
    LocalSet::new()
        .run_until(async {
            let mut config = SystemConfig::default();
            config.bad_command_limit = 3;
            let setup = set_up_with_config(config);

            let mut client = setup.connect("bad_storm");
            skip_greeting(&mut client).await;

            // Three consecutive unparseable lines produce three tagged
            // BADs and nothing more.
            for i in 0..3 {
                let tag = format!("x{}", i);
                let responses = client
                    .command(&format!("{} FROBNICATE", tag))
                    .await
                    .unwrap();
                assert_eq!(1, responses.len(), "unexpected: {:?}", responses);
                assert_line_like(
                    &format!("{} BAD \\[PARSE\\] .*", tag),
                    &responses[0],
                );
            }

            // The fourth trips the limit and the server hangs up.
            client.write_raw(b"x3 FROBNICATE\r\n").await.unwrap();
            assert_line_like(
                "x3 BAD \\[PARSE\\] .*",
                &client.read_logical_line().await.unwrap(),
            );
            assert_eq!(
                "* BYE Too many bad commands.",
                client.read_logical_line().await.unwrap(),
            );
        })
        .await;
}

#[tokio::test]
async fn good_command_resets_bad_counter() {
    LocalSet::new()
        .run_until(async {
            let mut config = SystemConfig::default();
            config.bad_command_limit = 2;
            let setup = set_up_with_config(config);

            let mut client = setup.connect("bad_reset");
            skip_greeting(&mut client).await;

            for i in 0..4 {
                let bad_tag = format!("b{}", i);
                let responses = client
                    .command(&format!("{} FROBNICATE", bad_tag))
                    .await
                    .unwrap();
                assert_line_like(
                    &format!("{} BAD \\[PARSE\\] .*", bad_tag),
                    responses.last().unwrap(),
                );

                let good_tag = format!("g{}", i);
                let responses = client
                    .command(&format!("{} NOOP", good_tag))
                    .await
                    .unwrap();
                assert_line_like(
                    &format!("{} OK .*", good_tag),
                    responses.last().unwrap(),
                );
            }
        })
        .await;
}

#[tokio::test]
async fn literal_login_with_continuation() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("literal_login");
            skip_greeting(&mut client).await;

            client.write_raw(b"l1 LOGIN {8}\r\n").await.unwrap();
            assert_eq!(
                "+ go",
                client.read_logical_line().await.unwrap(),
            );
            client
                .write_raw(b"demouser {8}\r\n")
                .await
                .unwrap();
            assert_eq!(
                "+ go",
                client.read_logical_line().await.unwrap(),
            );
            client.write_raw(b"demopass\r\n").await.unwrap();

            let responses = client.collect_responses("l1").await.unwrap();
            assert_line_like("l1 OK .*", responses.last().unwrap());
        })
        .await;
}

#[tokio::test]
async fn mailbox_management_round_trip() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("mailboxes");
            quick_log_in(&mut client).await;

            let responses = client
                .command("m1 CREATE archive/2023")
                .await
                .unwrap();
            assert_line_like(
                "m1 OK \\[MAILBOXID \\(F[0-9a-f]+\\)\\] .*",
                responses.last().unwrap(),
            );

            let responses =
                client.command("m2 LIST \"\" *").await.unwrap();
            assert!(responses
                .iter()
                .any(|line| line.contains("\"/\" INBOX")));
            assert!(responses
                .iter()
                .any(|line| line.contains("archive/2023")));

            let responses = client
                .command("m3 STATUS archive/2023 (MESSAGES UNSEEN)")
                .await
                .unwrap();
            assert_eq!(
                "* STATUS archive/2023 (MESSAGES 0 UNSEEN 0)",
                responses[0],
            );

            let responses = client
                .command("m4 SUBSCRIBE archive/2023")
                .await
                .unwrap();
            assert_line_like("m4 OK .*", responses.last().unwrap());
            let responses =
                client.command("m5 LSUB \"\" *").await.unwrap();
            assert!(responses
                .iter()
                .any(|line| line.contains("archive/2023")));

            let responses = client
                .command("m6 RENAME archive/2023 archive/2024")
                .await
                .unwrap();
            assert_line_like("m6 OK .*", responses.last().unwrap());

            let responses = client
                .command("m7 DELETE archive/2024")
                .await
                .unwrap();
            assert_line_like("m7 OK .*", responses.last().unwrap());

            let responses = client
                .command("m8 DELETE archive/2024")
                .await
                .unwrap();
            assert_line_like(
                "m8 NO \\[NONEXISTENT\\] .*",
                responses.last().unwrap(),
            );
        })
        .await;
}

#[tokio::test]
async fn copy_reports_copyuid() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("copy");
            quick_log_in(&mut client).await;
            quick_append(&mut client, "INBOX", TEST_MESSAGE).await;
            quick_append(&mut client, "INBOX", TEST_MESSAGE).await;
            quick_select(&mut client, "INBOX").await;

            let responses =
                client.command("c1 CREATE saved").await.unwrap();
            assert_line_like("c1 OK .*", responses.last().unwrap());

            let responses =
                client.command("c2 COPY 1:2 saved").await.unwrap();
            assert_line_like(
                "c2 OK \\[COPYUID \\d+ 1:2 1:2\\] COPY completed\\.",
                responses.last().unwrap(),
            );

            // Copy to a missing mailbox invites creation
            let responses =
                client.command("c3 COPY 1 missing").await.unwrap();
            assert_line_like(
                "c3 NO \\[TRYCREATE\\] .*",
                responses.last().unwrap(),
            );
        })
        .await;
}

#[tokio::test]
async fn preauth_greeting_skips_authentication() {
    LocalSet::new()
        .run_until(async {
            let mut config = SystemConfig::default();
            config.preauth_user = Some("demouser".to_owned());
            let setup = set_up_with_config(config);

            let mut client = setup.connect("preauth");
            let greeting = client.read_logical_line().await.unwrap();
            assert!(
                greeting.starts_with("* PREAUTH [CAPABILITY"),
                "unexpected greeting: {}",
                greeting,
            );

            // Already authenticated: mailbox commands work immediately
            let responses =
                client.command("p1 STATUS INBOX (MESSAGES)").await.unwrap();
            assert_eq!("* STATUS INBOX (MESSAGES 0)", responses[0]);

            // ... and LOGIN is no longer legal
            let responses = client
                .command("p2 LOGIN demouser demopass")
                .await
                .unwrap();
            assert_line_like(
                "p2 NO \\[CLIENTBUG\\] .*",
                responses.last().unwrap(),
            );
        })
        .await;
}

#[tokio::test]
async fn check_and_close() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("check_close");
            quick_log_in(&mut client).await;
            quick_append(&mut client, "INBOX", TEST_MESSAGE).await;
            quick_append(&mut client, "INBOX", TEST_MESSAGE).await;
            quick_select(&mut client, "INBOX").await;

            let responses = client.command("c1 CHECK").await.unwrap();
            assert_line_like("c1 OK .*", responses.last().unwrap());

            let responses = client
                .command("c2 STORE 1 +FLAGS.SILENT (\\Deleted)")
                .await
                .unwrap();
            assert_line_like("c2 OK .*", responses.last().unwrap());

            // CLOSE expunges silently: no untagged EXPUNGE responses
            let responses = client.command("c3 CLOSE").await.unwrap();
            assert_eq!(1, responses.len(), "unexpected: {:?}", responses);
            assert_line_like("c3 OK .*", &responses[0]);

            // The deleted message is really gone
            let responses = client.command("c4 SELECT INBOX").await.unwrap();
            assert!(responses.contains(&"* 1 EXISTS".to_owned()));

            // Selected-only commands are gated again after CLOSE+reselect
            // round trip; FETCH addresses the one survivor.
            let responses = client.command("c5 FETCH 1 UID").await.unwrap();
            assert_eq!("* 1 FETCH (UID 2)", responses[0]);
        })
        .await;
}
