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

//! IMAP's "modified UTF-7" (RFC 3501 §5.1.3), the wire encoding for
//! non-ASCII mailbox names.
//!
//! Decoding is extremely permissive: direct characters that should not have
//! been encoded are still accepted in their encoded form, unnecessary shift
//! sequences are permitted, and the shift-out `-` is not required at the end
//! of the string. Since names are stored as UTF-8 internally and re-encoded
//! on the way out, the distinction is moot.
//!
//! Encoding is minimal and normalised: direct characters are never encoded,
//! `&` is always written as `&-`, and every encoded run carries an explicit
//! trailing `-`.

use std::borrow::Cow;
use std::str;

const SHIFT_IN: u8 = b'&';

/// Decode the given string from modified UTF-7.
pub fn decode(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    if !bytes.contains(&SHIFT_IN) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = bytes;
    while let Some(shift) = rest.iter().position(|&b| SHIFT_IN == b) {
        out.push_str(str::from_utf8(&rest[..shift]).expect("was UTF-8"));
        rest = &rest[shift + 1..];

        let b64_end = rest
            .iter()
            .position(|&b| !is_base64_char(b))
            .unwrap_or(rest.len());

        if 0 == b64_end {
            // "&-" is a literal ampersand; a bare "&" before a non-base64
            // character is passed through.
            out.push('&');
            if rest.first().copied() == Some(b'-') {
                rest = &rest[1..];
            }
            continue;
        }

        let encoded = &rest[..b64_end];
        rest = &rest[b64_end..];
        // Consume the shift-out if present
        if rest.first().copied() == Some(b'-') {
            rest = &rest[1..];
        }

        match base64::decode_config(
            encoded,
            base64::IMAP_MUTF7.decode_allow_trailing_bits(true),
        ) {
            Ok(raw) => {
                let units: Vec<u16> = raw
                    .chunks(2)
                    // A spurious trailing byte is dropped
                    .filter(|c| 2 == c.len())
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                out.push_str(&String::from_utf16_lossy(&units));
            },
            Err(_) => {
                // Pass the whole run through undecoded
                out.push('&');
                out.push_str(str::from_utf8(encoded).expect("was UTF-8"));
            },
        }
    }

    out.push_str(str::from_utf8(rest).expect("was UTF-8"));
    Cow::Owned(out)
}

/// Encode the given string into modified UTF-7.
pub fn encode(s: &str) -> Cow<'_, str> {
    if s.bytes().all(|b| is_direct(b) && SHIFT_IN != b) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len() + 8);
    let mut pending = String::new();

    for ch in s.chars() {
        let byte = u32::from(ch);
        if byte < 128 && is_direct(byte as u8) && SHIFT_IN != byte as u8 {
            flush_encoded(&mut out, &mut pending);
            out.push(ch);
        } else if '&' == ch {
            flush_encoded(&mut out, &mut pending);
            out.push_str("&-");
        } else {
            pending.push(ch);
        }
    }

    flush_encoded(&mut out, &mut pending);
    Cow::Owned(out)
}

fn flush_encoded(dst: &mut String, pending: &mut String) {
    if pending.is_empty() {
        return;
    }

    let mut buf = Vec::<u8>::with_capacity(pending.len() * 2);
    for unit in pending.encode_utf16() {
        buf.extend_from_slice(&unit.to_be_bytes());
    }

    dst.push('&');
    dst.push_str(&base64::encode_config(&buf, base64::IMAP_MUTF7));
    dst.push('-');
    pending.clear();
}

fn is_direct(byte: u8) -> bool {
    (b' '..0x7F).contains(&byte)
}

fn is_base64_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || b'+' == ch || b',' == ch
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn encode_examples() {
        assert_eq!("INBOX", encode("INBOX"));
        assert_eq!("Lost &- Found", encode("Lost & Found"));
        // Examples from RFC 3501
        assert_eq!(
            "~peter/mail/&U,BTFw-/&ZeVnLIqe-",
            encode("~peter/mail/台北/日本語")
        );
        assert_eq!("&Jjo-!", encode("☺!"));
        assert_eq!("&U,BTF2XlZyyKng-", encode("台北日本語"));
    }

    #[test]
    fn decode_examples() {
        assert_eq!("INBOX", decode("INBOX"));
        assert_eq!("Lost & Found", decode("Lost &- Found"));
        assert_eq!(
            "~peter/mail/台北/日本語",
            decode("~peter/mail/&U,BTFw-/&ZeVnLIqe-")
        );
        assert_eq!("☺!", decode("&Jjo-!"));
        assert_eq!("台北日本語", decode("&U,BTF2XlZyyKng-"));
    }

    #[test]
    fn decode_pathological() {
        assert_eq!("hello&", decode("hello&"));
        assert_eq!("hello&.", decode("hello&."));
        assert_eq!("hello~", decode("hello&AH4"));
        assert_eq!("&&", decode("&-&-"));
    }

    proptest! {
        #[test]
        fn encoding_is_reversible(s in ".*") {
            prop_assert_eq!(&s, &decode(&encode(&s)));
        }

        #[test]
        fn decoding_never_fails(s in "[ -~]*") {
            decode(&s);
        }
    }
}
