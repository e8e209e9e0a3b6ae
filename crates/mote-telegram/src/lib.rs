//! Telegram adapter (teloxide).
//!
//! Implements the `mote-core` StatusPort by messaging the admin chats over the
//! Telegram Bot API.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use teloxide::prelude::*;
use tokio::time::sleep;

use mote_core::{domain::ChatId, errors::Error, messaging::port::StatusPort, Result};

pub struct TelegramStatus {
    bot: Bot,
    chats: Vec<ChatId>,
    connected: AtomicBool,
}

impl TelegramStatus {
    pub fn new(bot: Bot, chats: Vec<ChatId>) -> Self {
        Self {
            bot,
            chats,
            connected: AtomicBool::new(false),
        }
    }

    pub fn from_token(token: &str, chats: Vec<ChatId>) -> Self {
        Self::new(Bot::new(token), chats)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl StatusPort for TelegramStatus {
    async fn connect(&self) -> Result<()> {
        let me = self.with_retry(|| self.bot.get_me()).await?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(
            bot = %me.username(),
            chats = self.chats.len(),
            "connected to telegram"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!("disconnected from telegram");
        }
        Ok(())
    }

    /// Deliver `text` to every admin chat. Succeeds if at least one chat got it.
    async fn publish_status(&self, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::External("telegram transport is not connected".to_string()));
        }
        if self.chats.is_empty() {
            return Err(Error::Config("no admin chats configured".to_string()));
        }

        let mut delivered = 0usize;
        let mut last_err = None;
        for &chat in &self.chats {
            match self
                .with_retry(|| self.bot.send_message(Self::tg_chat(chat), text.to_string()))
                .await
            {
                Ok(_) => delivered += 1,
                Err(e) => {
                    tracing::warn!(chat = chat.0, error = %e, "status delivery failed");
                    last_err = Some(e);
                }
            }
        }

        match (delivered, last_err) {
            (0, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }
}
