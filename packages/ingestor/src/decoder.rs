//! Transaction Decoder
//!
//! Decodes feed records into transactions and extracts memo payload text
//! from matched output scripts.
//!
//! Script layout (hex offsets):
//! - Post: `6a 02 6d02 <len>` then payload from offset 10
//! - Reply: `6a 02 6d03` then the 32-byte target hash at [8:72), a length
//!   byte, and payload from offset 76

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::filter::MemoAction;

/// Hex offset where a Post payload begins
pub const POST_PAYLOAD_OFFSET: usize = 10;

/// Hex range holding the transaction hash a Reply refers to
pub const REPLY_TARGET_RANGE: std::ops::Range<usize> = 8..72;

/// Hex offset where a Reply payload begins
pub const REPLY_PAYLOAD_OFFSET: usize = 76;

/// Feed op name carrying an unconfirmed transaction
pub const TRANSACTION_OP: &str = "utx";

/// Errors that can occur during decoding
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to parse feed record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected feed op: {0}")]
    UnexpectedOp(String),

    #[error("Invalid payload hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Script too short for {action} payload ({len} hex chars)")]
    PayloadOutOfBounds { action: &'static str, len: usize },

    #[error("{0} carries no text payload")]
    NoTextPayload(&'static str),
}

/// How undecodable UTF-8 sequences in a payload are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LossyPolicy {
    /// Invalid sequences are removed
    #[default]
    Drop,
    /// Each invalid sequence becomes U+FFFD
    Replace,
}

/// Envelope pushed by the feed for every unconfirmed transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedMessage {
    pub op: String,
    pub x: Transaction,
}

/// Raw transaction record
///
/// Fields we do not use are kept in `extra` so captured records
/// serialize back out unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub hash: String,
    /// Unix timestamp in seconds
    pub time: i64,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(rename = "out", default)]
    pub outputs: Vec<Output>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Input {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_out: Option<PrevOut>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrevOut {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Output {
    #[serde(default)]
    pub script: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Transaction {
    /// Address the transaction is attributed to (first input's previous output)
    pub fn sender(&self) -> Option<&str> {
        self.inputs.first()?.prev_out.as_ref()?.addr.as_deref()
    }
}

impl Output {
    /// Build an output holding only a script
    pub fn with_script(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            extra: Map::new(),
        }
    }
}

impl FeedMessage {
    /// Wrap a transaction in a `utx` envelope
    pub fn new(tx: Transaction) -> Self {
        Self {
            op: TRANSACTION_OP.to_string(),
            x: tx,
        }
    }

    /// Build a minimal transaction envelope from a sender, time and output scripts
    pub fn from_parts(hash: &str, time: i64, sender: &str, scripts: &[&str]) -> Self {
        let input = Input {
            prev_out: Some(PrevOut {
                addr: Some(sender.to_string()),
                extra: Map::new(),
            }),
            extra: Map::new(),
        };
        Self::new(Transaction {
            hash: hash.to_string(),
            time,
            inputs: vec![input],
            outputs: scripts.iter().map(|s| Output::with_script(*s)).collect(),
            extra: Map::new(),
        })
    }
}

/// Decoded memo payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMemo {
    pub action: MemoAction,
    pub text: String,
    /// Hash of the transaction being replied to (Reply only)
    pub reply_to: Option<String>,
}

/// Decode one feed record
///
/// # Returns
/// The `utx` envelope, or an error for malformed JSON and non-transaction ops
pub fn decode_feed_message(json: &str) -> Result<FeedMessage, DecodeError> {
    let message: FeedMessage = serde_json::from_str(json)?;
    if message.op != TRANSACTION_OP {
        return Err(DecodeError::UnexpectedOp(message.op));
    }
    Ok(message)
}

/// Decode the text payload of a matched memo output
///
/// # Arguments
/// * `action` - The action returned by [`crate::filter::classify`]
/// * `script` - The full hex-encoded output script
/// * `policy` - Handling of invalid UTF-8 in the payload
pub fn decode_payload(
    action: MemoAction,
    script: &str,
    policy: LossyPolicy,
) -> Result<DecodedMemo, DecodeError> {
    let (reply_to, payload_hex) = match action {
        MemoAction::Post => (None, slice_from(action, script, POST_PAYLOAD_OFFSET)?),
        MemoAction::Reply => {
            let target = script
                .get(REPLY_TARGET_RANGE)
                .ok_or(DecodeError::PayloadOutOfBounds {
                    action: action.name(),
                    len: script.len(),
                })?;
            (
                Some(target.to_string()),
                slice_from(action, script, REPLY_PAYLOAD_OFFSET)?,
            )
        }
        other => return Err(DecodeError::NoTextPayload(other.name())),
    };

    let bytes = hex_to_bytes(payload_hex)?;
    Ok(DecodedMemo {
        action,
        text: decode_text(&bytes, policy),
        reply_to,
    })
}

fn slice_from<'a>(action: MemoAction, script: &'a str, offset: usize) -> Result<&'a str, DecodeError> {
    script.get(offset..).ok_or(DecodeError::PayloadOutOfBounds {
        action: action.name(),
        len: script.len(),
    })
}

/// Convert bytes to text, applying `policy` to invalid UTF-8 sequences
pub fn decode_text(bytes: &[u8], policy: LossyPolicy) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
        if policy == LossyPolicy::Replace && !chunk.invalid().is_empty() {
            text.push(char::REPLACEMENT_CHARACTER);
        }
    }
    text
}

/// Parse a bare hex string to bytes
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(hex::decode(hex_str)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &str = "8a1e3b5f0c2d4e6f8a1e3b5f0c2d4e6f8a1e3b5f0c2d4e6f8a1e3b5f0c2d4e6f";

    fn post_script(text: &str) -> String {
        format!("6a026d02{:02x}{}", text.len(), hex::encode(text))
    }

    fn reply_script(text: &str) -> String {
        format!("6a026d03{}4c{:02x}{}", TARGET, text.len(), hex::encode(text))
    }

    // ==================== decode_payload tests ====================

    #[test]
    fn test_decode_post_payload() {
        let memo = decode_payload(MemoAction::Post, &post_script("hello"), LossyPolicy::Drop).unwrap();
        assert_eq!(memo.action, MemoAction::Post);
        assert_eq!(memo.text, "hello");
        assert_eq!(memo.reply_to, None);
    }

    #[test]
    fn test_decode_post_payload_starts_at_offset_10() {
        // The length byte is skipped, not interpreted
        let memo = decode_payload(MemoAction::Post, "6a026d02ff6869", LossyPolicy::Drop).unwrap();
        assert_eq!(memo.text, "hi");
    }

    #[test]
    fn test_decode_empty_post() {
        let memo = decode_payload(MemoAction::Post, "6a026d0200", LossyPolicy::Drop).unwrap();
        assert_eq!(memo.text, "");
    }

    #[test]
    fn test_decode_reply_payload() {
        let memo = decode_payload(MemoAction::Reply, &reply_script("nice post"), LossyPolicy::Drop).unwrap();
        assert_eq!(memo.action, MemoAction::Reply);
        assert_eq!(memo.text, "nice post");
        assert_eq!(memo.reply_to.as_deref(), Some(TARGET));
    }

    #[test]
    fn test_decode_reply_too_short_returns_error() {
        let result = decode_payload(MemoAction::Reply, "6a026d0320abcd", LossyPolicy::Drop);
        assert!(matches!(result, Err(DecodeError::PayloadOutOfBounds { .. })));
    }

    #[test]
    fn test_decode_post_too_short_returns_error() {
        let result = decode_payload(MemoAction::Post, "6a026d02", LossyPolicy::Drop);
        assert!(matches!(result, Err(DecodeError::PayloadOutOfBounds { .. })));
    }

    #[test]
    fn test_decode_odd_length_payload_returns_error() {
        let result = decode_payload(MemoAction::Post, "6a026d0205686", LossyPolicy::Drop);
        assert!(matches!(result, Err(DecodeError::InvalidHex(_))));
    }

    #[test]
    fn test_decode_non_hex_payload_returns_error() {
        let result = decode_payload(MemoAction::Post, "6a026d0205zz", LossyPolicy::Drop);
        assert!(matches!(result, Err(DecodeError::InvalidHex(_))));
    }

    #[test]
    fn test_decode_payload_with_0x_characters_returns_error() {
        let result = decode_payload(MemoAction::Post, "6a026d02050x6869", LossyPolicy::Drop);
        assert!(matches!(result, Err(DecodeError::InvalidHex(_))));
    }

    #[test]
    fn test_decode_like_has_no_text() {
        let result = decode_payload(MemoAction::LikeTip, "6a026d0420", LossyPolicy::Drop);
        assert!(matches!(result, Err(DecodeError::NoTextPayload("Like/Tip"))));
    }

    // ==================== decode_text tests ====================

    #[test]
    fn test_decode_text_drops_invalid_sequences() {
        let bytes = [b'a', 0xff, b'b', 0xc3];
        assert_eq!(decode_text(&bytes, LossyPolicy::Drop), "ab");
    }

    #[test]
    fn test_decode_text_replaces_invalid_sequences() {
        let bytes = [b'a', 0xff, b'b', 0xc3];
        assert_eq!(decode_text(&bytes, LossyPolicy::Replace), "a\u{FFFD}b\u{FFFD}");
        assert_eq!(
            decode_text(&bytes, LossyPolicy::Replace),
            String::from_utf8_lossy(&bytes)
        );
    }

    #[test]
    fn test_decode_text_keeps_multibyte() {
        let text = "memo ✓ 日本";
        assert_eq!(decode_text(text.as_bytes(), LossyPolicy::Drop), text);
    }

    // ==================== hex_to_bytes tests ====================

    #[test]
    fn test_hex_to_bytes_rejects_0x_prefix() {
        assert!(matches!(hex_to_bytes("0x6d02"), Err(DecodeError::InvalidHex(_))));
    }

    #[test]
    fn test_hex_to_bytes() {
        assert_eq!(hex_to_bytes("6d02").unwrap(), vec![0x6d, 0x02]);
    }

    #[test]
    fn test_hex_to_bytes_empty() {
        assert_eq!(hex_to_bytes("").unwrap(), Vec::<u8>::new());
    }

    // ==================== feed record tests ====================

    #[test]
    fn test_decode_feed_message() {
        let json = r#"{
            "op": "utx",
            "x": {
                "lock_time": 0,
                "ver": 1,
                "hash": "abc123",
                "time": 1600000000,
                "inputs": [{"sequence": 4294967295, "prev_out": {"addr": "1MemoAddr", "value": 1000}}],
                "out": [
                    {"value": 0, "n": 0, "script": "6a026d020568656c6c6f"},
                    {"value": 546, "n": 1, "script": "76a914", "addr": "1Change"}
                ]
            }
        }"#;

        let message = decode_feed_message(json).unwrap();
        assert_eq!(message.x.hash, "abc123");
        assert_eq!(message.x.time, 1600000000);
        assert_eq!(message.x.sender(), Some("1MemoAddr"));
        assert_eq!(message.x.outputs.len(), 2);
        assert_eq!(message.x.outputs[0].script, "6a026d020568656c6c6f");
        assert_eq!(message.x.extra.get("ver"), Some(&Value::from(1)));
    }

    #[test]
    fn test_feed_message_preserves_unknown_fields() {
        let json = r#"{"op":"utx","x":{"hash":"h","time":1,"relayed_by":"0.0.0.0","inputs":[],"out":[{"script":"6a","spent":false}]}}"#;
        let message = decode_feed_message(json).unwrap();
        let reencoded: Value = serde_json::to_value(&message).unwrap();
        assert_eq!(reencoded["x"]["relayed_by"], "0.0.0.0");
        assert_eq!(reencoded["x"]["out"][0]["spent"], false);
    }

    #[test]
    fn test_decode_feed_message_wrong_op() {
        let json = r#"{"op":"block","x":{"hash":"h","time":1}}"#;
        assert!(matches!(decode_feed_message(json), Err(DecodeError::UnexpectedOp(op)) if op == "block"));
    }

    #[test]
    fn test_decode_feed_message_invalid_json() {
        assert!(matches!(decode_feed_message("{not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_sender_missing_inputs() {
        let message = FeedMessage::from_parts("h", 1, "A", &[]);
        assert_eq!(message.x.sender(), Some("A"));

        let mut tx = message.x;
        tx.inputs.clear();
        assert_eq!(tx.sender(), None);
    }
}
