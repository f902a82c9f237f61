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

//! `STARTTLS` orchestration tests. The duplex test transport stands in
//! for the TLS layer; what is under test is the state machine and the
//! capability reshaping, not the handshake.

use tokio::task::LocalSet;

use super::defs::*;
use crate::support::system_config::SystemConfig;

#[tokio::test]
async fn starttls_reshapes_capabilities() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client =
                setup.connect_with_tls_upgrade("starttls_caps");
            skip_greeting(&mut client).await;

            let responses = client.command("f CAPABILITY").await.unwrap();
            assert!(responses[0].contains(" STARTTLS"));
            assert!(responses[0].contains(" AUTH=PLAIN"));

            let responses = client.command("g STARTTLS").await.unwrap();
            assert_eq!("g OK Begin TLS negotiation now.", responses[0]);

            // No new greeting; the session continues with STARTTLS gone
            // from the capability set.
            let responses = client.command("h CAPABILITY").await.unwrap();
            assert!(!responses[0].contains(" STARTTLS"));
            assert!(responses[0].contains(" AUTH=PLAIN"));

            let responses = client
                .command("i LOGIN demouser demopass")
                .await
                .unwrap();
            assert_line_like("i OK .*", responses.last().unwrap());
        })
        .await;
}

#[tokio::test]
async fn starttls_rejected_once_active_or_authenticated() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client =
                setup.connect_with_tls_upgrade("starttls_twice");
            skip_greeting(&mut client).await;

            let responses = client.command("a STARTTLS").await.unwrap();
            assert_eq!("a OK Begin TLS negotiation now.", responses[0]);

            let responses = client.command("b STARTTLS").await.unwrap();
            assert_line_like(
                "b BAD Already using TLS",
                responses.last().unwrap(),
            );
        })
        .await;
}

#[tokio::test]
async fn insecure_auth_rejected_before_tls() {
    LocalSet::new()
        .run_until(async {
            let mut config = SystemConfig::default();
            config.reject_insecure_auth = true;
            let setup = set_up_with_config(config);

            let mut client =
                setup.connect_with_tls_upgrade("privacy_required");
            skip_greeting(&mut client).await;

            // Plaintext auth is hidden and refused before the upgrade
            let responses = client.command("a CAPABILITY").await.unwrap();
            assert!(responses[0].contains(" LOGINDISABLED"));
            assert!(!responses[0].contains(" AUTH=PLAIN"));

            let responses = client
                .command("b LOGIN demouser demopass")
                .await
                .unwrap();
            assert_line_like(
                "b NO \\[PRIVACYREQUIRED\\] .*",
                responses.last().unwrap(),
            );

            let responses = client.command("c STARTTLS").await.unwrap();
            assert_eq!("c OK Begin TLS negotiation now.", responses[0]);

            let responses = client.command("d CAPABILITY").await.unwrap();
            assert!(responses[0].contains(" AUTH=PLAIN"));

            let responses = client
                .command("e LOGIN demouser demopass")
                .await
                .unwrap();
            assert_line_like("e OK .*", responses.last().unwrap());
        })
        .await;
}

#[tokio::test]
async fn authenticate_plain_flows() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("auth_plain");
            skip_greeting(&mut client).await;

            // Continuation form
            client.write_raw(b"a AUTHENTICATE PLAIN\r\n").await.unwrap();
            assert_eq!("+ ", client.read_logical_line().await.unwrap());
            let response = base64::encode(b"\x00demouser\x00demopass");
            client
                .write_raw(format!("{}\r\n", response).as_bytes())
                .await
                .unwrap();
            let responses = client.collect_responses("a").await.unwrap();
            assert_line_like("a OK .*", responses.last().unwrap());

            // Initial-response form on a fresh connection
            let mut client = setup.connect("auth_plain_ir");
            skip_greeting(&mut client).await;
            let responses = client
                .command(&format!("b AUTHENTICATE PLAIN {}", response))
                .await
                .unwrap();
            // Already authenticated is impossible here; this is a fresh
            // connection, so it succeeds outright.
            assert_line_like("b OK .*", responses.last().unwrap());

            // Bad credentials
            let mut client = setup.connect("auth_plain_bad");
            skip_greeting(&mut client).await;
            let bad = base64::encode(b"\x00demouser\x00wrong");
            let responses = client
                .command(&format!("c AUTHENTICATE PLAIN {}", bad))
                .await
                .unwrap();
            assert_line_like(
                "c NO \\[AUTHENTICATIONFAILED\\] .*",
                responses.last().unwrap(),
            );

            // Unsupported mechanism
            let mut client = setup.connect("auth_cram");
            skip_greeting(&mut client).await;
            let responses = client
                .command("d AUTHENTICATE CRAM-MD5")
                .await
                .unwrap();
            assert_line_like("d NO .*", responses.last().unwrap());
        })
        .await;
}
