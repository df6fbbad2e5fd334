//! Operator notifications.

use reqwest::blocking::Client;

use crate::{
    api::{MessageResponse, SendMessage},
    config::TelegramSettings,
    error::{Error, Result, Service},
    req::{http_client, redact, req_send},
    util::read_json,
};

/// Delivers a short text message to the operator.
pub trait Notifier {
    fn send(&self, text: &str) -> Result<()>;
}

/// Sends messages through a Telegram bot.
#[derive(Debug, Clone)]
pub struct Telegram {
    client: Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl Telegram {
    pub fn new(settings: &TelegramSettings) -> Result<Self> {
        Ok(Self {
            client: http_client(Service::Telegram)?,
            base_url: settings.url.trim_end_matches('/').to_owned(),
            token: settings.token.clone(),
            chat_id: settings.chat_id.clone(),
        })
    }
}

impl Notifier for Telegram {
    fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        log::debug!("Call endpoint: POST {}", redact(&url, &self.token));

        let req = self.client.post(&url).json(&SendMessage {
            chat_id: &self.chat_id,
            text,
        });

        let res = match req_send(Service::Telegram, req) {
            Ok(res) => res,

            // Telegram answers 400 for unknown chats and malformed chat IDs
            Err(err) if err.status() == Some(400) => {
                return Err(Error::Config(format!(
                    "Telegram rejected chat {}: {err}",
                    self.chat_id
                )));
            }

            Err(err) => return Err(err),
        };

        let res: MessageResponse = read_json(Service::Telegram, res)?;
        if !res.ok {
            return Err(Error::Api {
                service: Service::Telegram,
                reason: res
                    .description
                    .unwrap_or_else(|| "message not accepted".to_owned()),
            });
        }

        Ok(())
    }
}

/// Writes notifications to the log when no bot is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, text: &str) -> Result<()> {
        log::info!("Notification: {}", text.replace('\n', " | "));
        Ok(())
    }
}
