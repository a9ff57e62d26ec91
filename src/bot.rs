//! Telegram front-end: the `Messenger` seam the push job sends through, its
//! teloxide implementation, and the on-demand command handlers.

use anyhow::Result;
use async_trait::async_trait;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{info, instrument, warn};

use crate::db::{self, Pool};
use crate::fibapi::{self, NoticeSource};
use crate::job;
use crate::locales;
use crate::model::{OutgoingMessage, Subscriber};
use crate::render;

/// The messaging front-end, as seen by the push job and command handlers.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, chat_id: i64, msg: &OutgoingMessage) -> Result<()>;
}

/// Real Telegram messenger. All messages are sent as HTML with web-page
/// previews disabled.
#[derive(Clone)]
pub struct Telegram {
    bot: Bot,
}

impl Telegram {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }
}

#[async_trait]
impl Messenger for Telegram {
    async fn send(&self, chat_id: i64, msg: &OutgoingMessage) -> Result<()> {
        let options = msg.send_options();
        let mut req = self
            .bot
            .send_message(ChatId(chat_id), msg.text())
            .parse_mode(ParseMode::Html)
            .disable_web_page_preview(true);
        if options.silent {
            req = req.disable_notification(true);
        }
        let sent = req.await?;
        if options.pin {
            self.bot.pin_chat_message(ChatId(chat_id), sent.id).await?;
        }
        Ok(())
    }
}

/// Handles one incoming Telegram message: the small command set that reads or
/// patches subscriber fields between push-job runs.
#[instrument(skip_all)]
pub async fn handle_update<S: NoticeSource, M: Messenger>(
    pool: &Pool,
    source: &S,
    messenger: &M,
    mailto_redirect_url: &str,
    msg: &Message,
) -> Result<()> {
    let chat_id = msg.chat.id.0;
    let Some(text) = msg.text() else {
        return Ok(());
    };

    match text.trim() {
        "/test" => {
            handle_test(pool, source, messenger, mailto_redirect_url, chat_id).await?;
        }
        "/toggle_mute_banner_notices" => {
            let Some(subscriber) = db::get_subscriber(pool, chat_id).await? else {
                return Ok(());
            };
            let muted = db::toggle_mute_banner_notices(pool, chat_id).await?;
            let locale = locales::get(&subscriber.language_code);
            let reply = if muted {
                locale.banner_notices_muted_message
            } else {
                locale.banner_notices_unmuted_message
            };
            messenger
                .send(chat_id, &OutgoingMessage::Error(reply.to_owned()))
                .await?;
            info!(chat_id, muted, "toggled banner notice muting");
        }
        cmd if cmd.starts_with("/lang") => {
            let code = cmd.trim_start_matches("/lang").trim();
            if locales::SUPPORTED.contains(&code) {
                db::set_language(pool, chat_id, code).await?;
                let reply = locales::get(code).preferred_language_set_message;
                messenger
                    .send(chat_id, &OutgoingMessage::Error(reply.to_owned()))
                    .await?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// `/test`: renders and sends the subscriber's latest notice as a preview.
async fn handle_test<S: NoticeSource, M: Messenger>(
    pool: &Pool,
    source: &S,
    messenger: &M,
    mailto_redirect_url: &str,
    chat_id: i64,
) -> Result<()> {
    let subscriber = match db::get_subscriber(pool, chat_id).await? {
        Some(s) if s.has_credentials() => s,
        other => {
            messenger
                .send(chat_id, &authorization_expired_reply(other.as_ref()))
                .await?;
            return Ok(());
        }
    };
    let locale = locales::get(&subscriber.language_code);

    let (notices, _digest) = match source.fetch_notices(&subscriber).await {
        Ok(fetched) => fetched,
        Err(fibapi::Error::AuthorizationExpired) => {
            messenger
                .send(chat_id, &authorization_expired_reply(Some(&subscriber)))
                .await?;
            return Ok(());
        }
        Err(err) => {
            warn!(chat_id, %err, "failed to fetch notices for /test");
            messenger
                .send(
                    chat_id,
                    &OutgoingMessage::Error(locale.internal_error_message.to_owned()),
                )
                .await?;
            return Ok(());
        }
    };

    let Some(latest) = notices.iter().max_by_key(|n| n.published_at()) else {
        messenger
            .send(
                chat_id,
                &OutgoingMessage::Error(locale.no_available_notices_message.to_owned()),
            )
            .await?;
        return Ok(());
    };

    let link_url = job::notice_link_url(pool, source, latest).await;
    let text = render::render(latest, locale, &link_url, mailto_redirect_url);
    messenger
        .send(chat_id, &OutgoingMessage::Notice { text, silent: false })
        .await?;
    Ok(())
}

/// Reply shown to a [`Subscriber`] whose stored token pair is unusable.
pub fn authorization_expired_reply(subscriber: Option<&Subscriber>) -> OutgoingMessage {
    let code = subscriber.map(|s| s.language_code.as_str()).unwrap_or("en");
    OutgoingMessage::Error(locales::get(code).authorization_expired_message.to_owned())
}
