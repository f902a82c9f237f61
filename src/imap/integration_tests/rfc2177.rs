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
async fn idle_reports_injected_delivery() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("idle_main");
            quick_log_in(&mut client).await;
            for _ in 0..5 {
                quick_append(&mut client, "INBOX", TEST_MESSAGE).await;
            }
            quick_select(&mut client, "INBOX").await;

            client.write_raw(b"h IDLE\r\n").await.unwrap();
            assert_eq!(
                "+ idling",
                client.read_logical_line().await.unwrap(),
            );

            // Another session delivers a message; its change event wakes
            // the idling connection.
            let mut other = setup.connect("idle_other");
            quick_log_in(&mut other).await;
            quick_append(&mut other, "INBOX", TEST_MESSAGE).await;

            assert_eq!(
                "* 6 EXISTS",
                client.read_logical_line().await.unwrap(),
            );
            // The idler's poll claims \Recent for the new arrival on top
            // of the five it already owns.
            assert_eq!(
                "* 6 RECENT",
                client.read_logical_line().await.unwrap(),
            );

            client.write_raw(b"DONE\r\n").await.unwrap();
            let responses = client.collect_responses("h").await.unwrap();
            assert_eq!("h OK IDLE completed.", responses[0]);

            // The connection keeps working afterwards
            let responses = client.command("n NOOP").await.unwrap();
            assert_line_like("n OK .*", responses.last().unwrap());
        })
        .await;
}

#[tokio::test]
async fn idle_rejects_other_input() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("idle_bad_input");
            quick_log_in(&mut client).await;
            quick_select(&mut client, "INBOX").await;

            client.write_raw(b"h IDLE\r\n").await.unwrap();
            assert_eq!(
                "+ idling",
                client.read_logical_line().await.unwrap(),
            );

            client.write_raw(b"NONSENSE\r\n").await.unwrap();
            assert_line_like(
                "\\* BAD .*",
                &client.read_logical_line().await.unwrap(),
            );
        })
        .await;
}

#[tokio::test]
async fn idle_refused_when_disabled() {
    LocalSet::new()
        .run_until(async {
            let mut config = SystemConfig::default();
            config.disable_idle = true;
            let setup = set_up_with_config(config);

            let mut client = setup.connect("idle_disabled");
            quick_log_in(&mut client).await;
            quick_select(&mut client, "INBOX").await;

            let responses = client.command("h IDLE").await.unwrap();
            assert_line_like(
                "h NO \\[CLIENTBUG\\] .*",
                responses.last().unwrap(),
            );
        })
        .await;
}

#[tokio::test]
async fn idle_refused_outside_selected_state() {
    LocalSet::new()
        .run_until(async {
            let setup = set_up();
            let mut client = setup.connect("idle_not_selected");
            quick_log_in(&mut client).await;

            let responses = client.command("h IDLE").await.unwrap();
            assert_line_like(
                "h NO \\[CLIENTBUG\\] .*",
                responses.last().unwrap(),
            );
        })
        .await;
}
