//! Client-side view of a chat channel.
//!
//! Folds the hub's chat events into a bounded message history, read
//! receipts and a typing indicator. Typing pings are never cleared by the
//! hub; each receiver expires them locally.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use taskflow_common::{upsert_read_receipt, ChatEvent, ChatMessage, ReadReceipt};
use taskflow_config::EventsConfig;

#[derive(Debug, Clone)]
pub struct TimelineConfig {
    /// Maximum messages retained; the oldest are evicted first.
    pub max_messages: usize,
    /// How long a typing ping keeps its sender in the indicator.
    pub typing_timeout: Duration,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            max_messages: 500,
            typing_timeout: Duration::from_millis(3000),
        }
    }
}

impl From<&EventsConfig> for TimelineConfig {
    fn from(config: &EventsConfig) -> Self {
        Self {
            max_messages: config.history_per_channel,
            typing_timeout: config.typing_timeout(),
        }
    }
}

struct Typing {
    display_name: String,
    expires_at: Instant,
}

pub struct ChannelTimeline {
    channel: String,
    config: TimelineConfig,
    messages: VecDeque<ChatMessage>,
    read_receipts: Vec<ReadReceipt>,
    typing: HashMap<String, Typing>,
}

impl ChannelTimeline {
    pub fn new(channel: impl Into<String>, config: TimelineConfig) -> Self {
        Self {
            channel: channel.into(),
            config,
            messages: VecDeque::new(),
            read_receipts: Vec::new(),
            typing: HashMap::new(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn apply(&mut self, event: ChatEvent) -> bool {
        self.apply_at(event, Instant::now())
    }

    /// Fold one event into the view. Returns whether anything visible
    /// changed.
    pub fn apply_at(&mut self, event: ChatEvent, now: Instant) -> bool {
        match event {
            ChatEvent::MessageCreated { message } => {
                self.typing.remove(&message.author_id);
                // The sender's own echo replaces any optimistic copy.
                if let Some(existing) = self.find_mut(&message.id) {
                    *existing = message;
                    return true;
                }
                if self.messages.len() >= self.config.max_messages {
                    self.messages.pop_front();
                }
                self.messages.push_back(message);
                true
            }
            ChatEvent::MessageEdited { message } => match self.find_mut(&message.id) {
                Some(existing) => {
                    *existing = message;
                    true
                }
                None => false,
            },
            ChatEvent::MessageDeleted { message_id, .. } => {
                let before = self.messages.len();
                self.messages.retain(|m| m.id != message_id);
                self.messages.len() != before
            }
            ChatEvent::ReactionChanged {
                message_id,
                reactions,
                ..
            } => match self.find_mut(&message_id) {
                Some(existing) => {
                    existing.reactions = reactions;
                    true
                }
                None => false,
            },
            ChatEvent::ReadReceiptUpdated { receipt } => {
                upsert_read_receipt(&mut self.read_receipts, receipt);
                true
            }
            ChatEvent::TypingPing {
                user_id,
                display_name,
            } => {
                self.typing.insert(
                    user_id,
                    Typing {
                        display_name,
                        expires_at: now + self.config.typing_timeout,
                    },
                );
                true
            }
            ChatEvent::MuteChanged { .. } => false,
        }
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn read_receipts(&self) -> &[ReadReceipt] {
        &self.read_receipts
    }

    pub fn last_read_by(&self, user_id: &str) -> Option<&str> {
        self.read_receipts
            .iter()
            .find(|r| r.user_id == user_id)
            .map(|r| r.last_read_message_id.as_str())
    }

    pub fn typing_users(&mut self) -> Vec<String> {
        self.typing_users_at(Instant::now())
    }

    /// Display names of users whose last ping has not yet expired, sorted.
    /// Expired entries are dropped.
    pub fn typing_users_at(&mut self, now: Instant) -> Vec<String> {
        self.typing.retain(|_, t| t.expires_at > now);
        let mut names: Vec<String> = self
            .typing
            .values()
            .map(|t| t.display_name.clone())
            .collect();
        names.sort();
        names
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use taskflow_common::toggle_reaction;

    fn message(id: &str, author: &str, content: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            channel_id: "general".into(),
            author_id: author.into(),
            content: content.into(),
            created_at: "2024-05-01T12:00:00Z".into(),
            edited: false,
            reply_to: None,
            attachment: None,
            reactions: Vec::new(),
        }
    }

    fn timeline() -> ChannelTimeline {
        ChannelTimeline::new("general", TimelineConfig::default())
    }

    #[test]
    fn created_then_edited_then_deleted() {
        let mut t = timeline();
        assert!(t.apply(ChatEvent::MessageCreated {
            message: message("m1", "u1", "hello"),
        }));

        let mut edited = message("m1", "u1", "hello there");
        edited.edited = true;
        assert!(t.apply(ChatEvent::MessageEdited { message: edited }));
        assert_eq!(t.message("m1").unwrap().content, "hello there");
        assert!(t.message("m1").unwrap().edited);

        assert!(t.apply(ChatEvent::MessageDeleted {
            message_id: "m1".into(),
            actor_id: "u2".into(),
        }));
        assert!(t.is_empty());
        assert!(!t.apply(ChatEvent::MessageDeleted {
            message_id: "m1".into(),
            actor_id: "u2".into(),
        }));
    }

    #[test]
    fn echo_of_created_message_is_not_duplicated() {
        let mut t = timeline();
        t.apply(ChatEvent::MessageCreated {
            message: message("m1", "u1", "hello"),
        });
        t.apply(ChatEvent::MessageCreated {
            message: message("m1", "u1", "hello"),
        });
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn edit_of_unknown_message_changes_nothing() {
        let mut t = timeline();
        assert!(!t.apply(ChatEvent::MessageEdited {
            message: message("ghost", "u2", "x"),
        }));
        assert!(t.is_empty());
    }

    #[test]
    fn history_is_bounded() {
        let mut t = ChannelTimeline::new(
            "general",
            TimelineConfig {
                max_messages: 3,
                ..TimelineConfig::default()
            },
        );
        for i in 0..5 {
            t.apply(ChatEvent::MessageCreated {
                message: message(&format!("m{i}"), "u1", "x"),
            });
        }
        let ids: Vec<&str> = t.messages().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn reactions_are_replaced_wholesale() {
        let mut t = timeline();
        t.apply(ChatEvent::MessageCreated {
            message: message("m1", "u1", "hello"),
        });

        let mut reactions = Vec::new();
        toggle_reaction(&mut reactions, "👍", "u2");
        t.apply(ChatEvent::ReactionChanged {
            message_id: "m1".into(),
            actor_id: "u2".into(),
            reactions: reactions.clone(),
        });
        assert_eq!(t.message("m1").unwrap().reactions[0].user_ids, vec!["u2"]);

        toggle_reaction(&mut reactions, "👍", "u2");
        t.apply(ChatEvent::ReactionChanged {
            message_id: "m1".into(),
            actor_id: "u2".into(),
            reactions,
        });
        assert!(t.message("m1").unwrap().reactions.is_empty());
    }

    #[test]
    fn read_receipts_keep_latest_per_user() {
        let mut t = timeline();
        for id in ["m1", "m2"] {
            t.apply(ChatEvent::ReadReceiptUpdated {
                receipt: ReadReceipt {
                    user_id: "u2".into(),
                    last_read_message_id: id.into(),
                },
            });
        }
        assert_eq!(t.read_receipts().len(), 1);
        assert_eq!(t.last_read_by("u2"), Some("m2"));
    }

    #[test]
    fn typing_expires_after_timeout() {
        let mut t = timeline();
        let t0 = Instant::now();
        t.apply_at(
            ChatEvent::TypingPing {
                user_id: "u2".into(),
                display_name: "Bea".into(),
            },
            t0,
        );
        assert_eq!(t.typing_users_at(t0 + Duration::from_millis(2999)), vec!["Bea"]);
        assert!(t.typing_users_at(t0 + Duration::from_millis(3000)).is_empty());
    }

    #[test]
    fn repeated_ping_extends_typing() {
        let mut t = timeline();
        let t0 = Instant::now();
        let ping = ChatEvent::TypingPing {
            user_id: "u2".into(),
            display_name: "Bea".into(),
        };
        t.apply_at(ping.clone(), t0);
        t.apply_at(ping, t0 + Duration::from_secs(2));
        assert_eq!(t.typing_users_at(t0 + Duration::from_secs(4)), vec!["Bea"]);
    }

    #[test]
    fn message_clears_author_typing() {
        let mut t = timeline();
        let t0 = Instant::now();
        t.apply_at(
            ChatEvent::TypingPing {
                user_id: "u1".into(),
                display_name: "Ada".into(),
            },
            t0,
        );
        t.apply_at(
            ChatEvent::MessageCreated {
                message: message("m1", "u1", "done"),
            },
            t0,
        );
        assert!(t.typing_users_at(t0).is_empty());
    }

    #[test]
    fn config_from_events_section() {
        let config = TimelineConfig::from(&EventsConfig::default());
        assert_eq!(config.max_messages, 500);
        assert_eq!(config.typing_timeout, Duration::from_secs(3));
    }
}
