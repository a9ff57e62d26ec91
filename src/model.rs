use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A Telegram user subscribed to notice delivery.
///
/// The `last_notices_digest`/`last_notice_timestamp` pair is the delivery
/// cursor: it is written only by the push job, after all new notices for a
/// run have been sent. `last_notice_timestamp == 0` marks a subscriber whose
/// baseline has not been established yet.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Subscriber {
    pub id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expiry: i64,
    pub language_code: String,
    pub last_notices_digest: String,
    pub last_notice_timestamp: i64,
    pub mute_banner_notices: bool,
}

impl Subscriber {
    /// Whether the stored credentials look usable at all. An empty token pair
    /// means the record is corrupt or the login never completed.
    pub fn has_credentials(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }
}

/// Options applied when sending an [`OutgoingMessage`]. Web page previews are
/// always disabled; notices carry their own links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub silent: bool,
    pub pin: bool,
}

/// Everything the bot sends, as a closed set of message kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    /// A rendered notice. `silent` suppresses the client-side notification
    /// (used for banner notices the subscriber has muted).
    Notice { text: String, silent: bool },
    /// An error line shown to the subscriber (e.g. authorization expired).
    Error(String),
    /// A broadcast message, pinned in the chat after sending.
    Announcement(String),
}

impl OutgoingMessage {
    pub fn text(&self) -> &str {
        match self {
            OutgoingMessage::Notice { text, .. } => text,
            OutgoingMessage::Error(text) => text,
            OutgoingMessage::Announcement(text) => text,
        }
    }

    pub fn send_options(&self) -> SendOptions {
        match self {
            OutgoingMessage::Notice { silent, .. } => SendOptions {
                silent: *silent,
                pin: false,
            },
            OutgoingMessage::Error(_) => SendOptions::default(),
            OutgoingMessage::Announcement(_) => SendOptions {
                silent: false,
                pin: true,
            },
        }
    }
}
