// Advertisement codec — the compact radio wire form
//
//   presence: XXXXXXXXXXXX
//   message:  XXXXXXXXXXXX:<content>
//
// X is an uppercase hex digit. The whole payload must fit one legacy
// advertisement (31 bytes), so content gets at most 18 bytes.

use thiserror::Error;

/// Legacy advertisement payload limit
pub const MAX_ADVERTISEMENT_LEN: usize = 31;

/// Length of a short device id in hex characters
pub const DEVICE_ID_LEN: usize = 12;

/// Separator between device id and content
const SEPARATOR: char = ':';

/// Content bytes left once id and separator are in place
pub const MAX_CONTENT_LEN: usize = MAX_ADVERTISEMENT_LEN - DEVICE_ID_LEN - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Advertisement too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },
    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),
}

/// Result of decoding one radio observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advertisement {
    /// Bare device id, used for peer discovery
    PresenceOnly(String),
    /// Short text message
    Message { sender_id: String, content: String },
    /// Nothing recognizable
    Invalid,
}

/// Check that `id` is exactly 12 hex characters
pub fn is_device_id(id: &str) -> bool {
    id.len() == DEVICE_ID_LEN && id.bytes().all(|b| b.is_ascii_hexdigit())
}

fn checked_device_id(id: &str) -> Result<String, WireError> {
    if is_device_id(id) {
        Ok(id.to_ascii_uppercase())
    } else {
        Err(WireError::InvalidDeviceId(id.to_string()))
    }
}

/// Encode a presence advertisement (12 bytes)
pub fn encode_presence(device_id: &str) -> Result<Vec<u8>, WireError> {
    Ok(checked_device_id(device_id)?.into_bytes())
}

/// Encode a short message advertisement.
///
/// Refuses (never truncates) anything over the advertisement limit. The
/// limit is in bytes, so multi-byte UTF-8 content gets fewer characters.
pub fn encode_message(sender_id: &str, content: &str) -> Result<Vec<u8>, WireError> {
    let id = checked_device_id(sender_id)?;
    let len = id.len() + 1 + content.len();
    if len > MAX_ADVERTISEMENT_LEN {
        return Err(WireError::TooLarge {
            len,
            max: MAX_ADVERTISEMENT_LEN,
        });
    }

    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(id.as_bytes());
    out.push(SEPARATOR as u8);
    out.extend_from_slice(content.as_bytes());
    Ok(out)
}

/// Decode raw advertisement bytes.
///
/// Bytes that are not valid UTF-8 become U+FFFD, so binary framing such as
/// a manufacturer company id never hides the payload behind it. Leading
/// noise before the first run of 12 hex characters is skipped. Only the
/// first colon after the id separates; later colons belong to the content.
pub fn decode(payload: &[u8]) -> Advertisement {
    let text = String::from_utf8_lossy(payload);

    let Some(start) = find_device_id(&text) else {
        return Advertisement::Invalid;
    };

    // The id run is ASCII, so byte offsets are char boundaries.
    let id_end = start + DEVICE_ID_LEN;
    let sender_id = text[start..id_end].to_ascii_uppercase();
    let rest = &text[id_end..];

    match rest.strip_prefix(SEPARATOR) {
        Some(content) => Advertisement::Message {
            sender_id,
            content: content.to_string(),
        },
        None => Advertisement::PresenceOnly(sender_id),
    }
}

/// Byte offset of the first window of 12 consecutive hex digits
fn find_device_id(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut run = 0usize;
    for (i, b) in bytes.iter().enumerate() {
        if b.is_ascii_hexdigit() {
            run += 1;
            if run == DEVICE_ID_LEN {
                return Some(i + 1 - DEVICE_ID_LEN);
            }
        } else {
            run = 0;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "AAAAAAAAAAAA";

    #[test]
    fn test_presence_is_bare_id() {
        let bytes = encode_presence(ID).unwrap();
        assert_eq!(bytes, ID.as_bytes());
        assert_eq!(bytes.len(), 12);
    }

    #[test]
    fn test_presence_rejects_bad_id() {
        assert!(matches!(
            encode_presence("not-an-id"),
            Err(WireError::InvalidDeviceId(_))
        ));
    }

    #[test]
    fn test_encode_hello() {
        let bytes = encode_message(ID, "Hello").unwrap();
        assert_eq!(bytes, b"AAAAAAAAAAAA:Hello");
        assert_eq!(bytes.len(), 18);
    }

    #[test]
    fn test_encode_exact_limit() {
        let content = "x".repeat(MAX_CONTENT_LEN);
        let bytes = encode_message(ID, &content).unwrap();
        assert_eq!(bytes.len(), MAX_ADVERTISEMENT_LEN);

        let over = "x".repeat(MAX_CONTENT_LEN + 1);
        assert_eq!(
            encode_message(ID, &over),
            Err(WireError::TooLarge { len: 32, max: 31 })
        );
    }

    #[test]
    fn test_encode_counts_bytes_not_chars() {
        // 6 three-byte characters = 18 bytes, fits exactly
        assert!(encode_message(ID, "日本語日本語").is_ok());
        // 7 of them = 21 bytes, does not
        assert!(matches!(
            encode_message(ID, "日本語日本語日"),
            Err(WireError::TooLarge { len: 34, .. })
        ));
    }

    #[test]
    fn test_decode_presence() {
        assert_eq!(
            decode(b"AAAAAAAAAAAA"),
            Advertisement::PresenceOnly(ID.into())
        );
    }

    #[test]
    fn test_decode_splits_on_first_colon_only() {
        assert_eq!(
            decode(b"AAAAAAAAAAAA:Hi:there"),
            Advertisement::Message {
                sender_id: ID.into(),
                content: "Hi:there".into(),
            }
        );
    }

    #[test]
    fn test_decode_empty_content() {
        assert_eq!(
            decode(b"AAAAAAAAAAAA:"),
            Advertisement::Message {
                sender_id: ID.into(),
                content: String::new(),
            }
        );
    }

    #[test]
    fn test_decode_garbage() {
        assert_eq!(decode(b"garbage"), Advertisement::Invalid);
        assert_eq!(decode(b""), Advertisement::Invalid);
        assert_eq!(decode(b"ABCDEF12345"), Advertisement::Invalid);
    }

    #[test]
    fn test_decode_skips_binary_company_id() {
        let mut raw = vec![0xff, 0xff];
        raw.extend_from_slice(b"AAAAAAAAAAAA:Hi");
        assert_eq!(
            decode(&raw),
            Advertisement::Message {
                sender_id: ID.into(),
                content: "Hi".into(),
            }
        );

        let mut raw = vec![0x4c, 0x00, 0xc0];
        raw.extend_from_slice(b"AAAAAAAAAAAA");
        assert_eq!(decode(&raw), Advertisement::PresenceOnly(ID.into()));
    }

    #[test]
    fn test_decode_invalid_bytes_without_id() {
        assert_eq!(decode(&[0xff, 0xfe, 0xc0, 0x80]), Advertisement::Invalid);
    }

    #[test]
    fn test_decode_skips_framing_noise() {
        assert_eq!(
            decode("~~\u{25c6}3b6e0a1f9c2d:Yo".as_bytes()),
            Advertisement::Message {
                sender_id: "3B6E0A1F9C2D".into(),
                content: "Yo".into(),
            }
        );
    }

    #[test]
    fn test_decode_normalizes_case() {
        assert_eq!(
            decode(b"abcdef012345"),
            Advertisement::PresenceOnly("ABCDEF012345".into())
        );
    }

    #[test]
    fn test_decode_longer_hex_run_takes_first_twelve() {
        // No colon right after the first 12 hex chars, so this is presence
        assert_eq!(
            decode(b"ABCDEF0123456:x"),
            Advertisement::PresenceOnly("ABCDEF012345".into())
        );
    }

    #[test]
    fn test_decode_multibyte_content() {
        let raw = encode_message(ID, "héllo").unwrap();
        assert_eq!(
            decode(&raw),
            Advertisement::Message {
                sender_id: ID.into(),
                content: "héllo".into(),
            }
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode(&bytes);
        }

        #[test]
        fn encoded_messages_fit_and_decode(id in "[0-9A-F]{12}", content in "\\PC{0,18}") {
            match encode_message(&id, &content) {
                Ok(bytes) => {
                    prop_assert!(bytes.len() <= MAX_ADVERTISEMENT_LEN);
                    prop_assert_eq!(
                        decode(&bytes),
                        Advertisement::Message { sender_id: id.clone(), content: content.clone() }
                    );
                }
                Err(WireError::TooLarge { len, .. }) => prop_assert!(len > MAX_ADVERTISEMENT_LEN),
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }
}
