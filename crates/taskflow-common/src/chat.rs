//! Chat records relayed by the hub and the two mutation rules the owning
//! CRUD layer applies before publishing: reaction toggling and read
//! receipt upserts.

use serde::{Deserialize, Serialize};

/// A persisted chat message. The hub never inspects it beyond routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: String,
    #[serde(default)]
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub reactions: Vec<ReactionBucket>,
}

/// Reference to an uploaded file. Storage lives elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// All users who reacted to a message with one emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionBucket {
    pub emoji: String,
    pub user_ids: Vec<String>,
}

/// The most recent message a user has read in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: String,
    pub last_read_message_id: String,
}

/// Toggle `user_id`'s reaction with `emoji`.
///
/// Adding to an absent bucket creates it; toggling an existing reaction
/// removes it, and a bucket left without users is removed entirely.
/// Returns `true` if the user is now reacting with `emoji`.
pub fn toggle_reaction(reactions: &mut Vec<ReactionBucket>, emoji: &str, user_id: &str) -> bool {
    let Some(idx) = reactions.iter().position(|b| b.emoji == emoji) else {
        reactions.push(ReactionBucket {
            emoji: emoji.to_string(),
            user_ids: vec![user_id.to_string()],
        });
        return true;
    };

    let bucket = &mut reactions[idx];
    if let Some(pos) = bucket.user_ids.iter().position(|u| u == user_id) {
        bucket.user_ids.remove(pos);
        if bucket.user_ids.is_empty() {
            reactions.remove(idx);
        }
        false
    } else {
        bucket.user_ids.push(user_id.to_string());
        true
    }
}

/// Record `receipt`, replacing any earlier receipt for the same user.
pub fn upsert_read_receipt(receipts: &mut Vec<ReadReceipt>, receipt: ReadReceipt) {
    receipts.retain(|r| r.user_id != receipt.user_id);
    receipts.push(receipt);
}
