//! Memo Protocol Filtering
//!
//! Recognizes transaction outputs that carry memo protocol data.
//! Matching is a fixed-offset comparison on the hex-encoded output script:
//! `6a` (OP_RETURN) at [0:2], `02` (push length) at [2:4], and a known
//! 2-byte action code at [4:8].

use std::collections::HashMap;
use std::sync::LazyLock;

/// OP_RETURN marker, hex encoded
pub const OP_RETURN: &str = "6a";

/// Push-length marker preceding the 2-byte action code, hex encoded
pub const PREFIX_LEN: &str = "02";

/// The 6 memo actions we recognize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoAction {
    /// Post - 0x6d02
    Post,
    /// Reply - 0x6d03
    Reply,
    /// Like/Tip - 0x6d04
    LikeTip,
    /// Follow - 0x6d06
    Follow,
    /// Unfollow - 0x6d07
    Unfollow,
    /// Topic Message - 0x6d0c
    TopicMessage,
}

impl MemoAction {
    /// All recognized actions, in code order
    pub const ALL: [MemoAction; 6] = [
        MemoAction::Post,
        MemoAction::Reply,
        MemoAction::LikeTip,
        MemoAction::Follow,
        MemoAction::Unfollow,
        MemoAction::TopicMessage,
    ];

    /// Returns the 2-byte action code
    pub fn code(&self) -> [u8; 2] {
        match self {
            MemoAction::Post => [0x6d, 0x02],
            MemoAction::Reply => [0x6d, 0x03],
            MemoAction::LikeTip => [0x6d, 0x04],
            MemoAction::Follow => [0x6d, 0x06],
            MemoAction::Unfollow => [0x6d, 0x07],
            MemoAction::TopicMessage => [0x6d, 0x0c],
        }
    }

    /// Returns the human-readable action name
    pub fn name(&self) -> &'static str {
        match self {
            MemoAction::Post => "Post",
            MemoAction::Reply => "Reply",
            MemoAction::LikeTip => "Like/Tip",
            MemoAction::Follow => "Follow",
            MemoAction::Unfollow => "Unfollow",
            MemoAction::TopicMessage => "Topic Message",
        }
    }

    /// Returns the hex-encoded action code as it appears in a script
    pub fn hex(&self) -> &'static str {
        match self {
            MemoAction::Post => "6d02",
            MemoAction::Reply => "6d03",
            MemoAction::LikeTip => "6d04",
            MemoAction::Follow => "6d06",
            MemoAction::Unfollow => "6d07",
            MemoAction::TopicMessage => "6d0c",
        }
    }

    /// Whether this action carries free text we decode into history
    pub fn carries_text(&self) -> bool {
        matches!(self, MemoAction::Post | MemoAction::Reply)
    }
}

/// Static lookup table keyed by the hex action code
static MEMO_ACTIONS: LazyLock<HashMap<&'static str, MemoAction>> = LazyLock::new(|| {
    MemoAction::ALL
        .iter()
        .map(|action| (action.hex(), *action))
        .collect()
});

/// Get the memo action for a hex action code, if it is one we recognize
///
/// # Arguments
/// * `code` - Four hex characters, e.g. `"6d02"`
pub fn get_memo_action(code: &str) -> Option<MemoAction> {
    MEMO_ACTIONS.get(code).copied()
}

/// Get the human-readable action name for a hex action code
pub fn get_action_name(code: &str) -> Option<&'static str> {
    get_memo_action(code).map(|a| a.name())
}

/// Classify an output script
///
/// # Arguments
/// * `script` - The hex-encoded output script
///
/// # Returns
/// `Some(MemoAction)` if the script is a memo protocol output, `None` otherwise
pub fn classify(script: &str) -> Option<MemoAction> {
    if script.get(0..2)? != OP_RETURN || script.get(2..4)? != PREFIX_LEN {
        return None;
    }
    get_memo_action(script.get(4..8)?)
}

/// Check if an output script is a memo protocol output
pub fn is_memo_output(script: &str) -> bool {
    classify(script).is_some()
}
