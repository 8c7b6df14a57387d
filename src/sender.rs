use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::RequestError;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SenderConfig;

/// Telegram rejects messages over 4096 chars; stay under it in bytes
const MAX_CHUNK_LEN: usize = 4000;

/// Upper bound on a server-requested flood wait
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// A reply addressed to one chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_id: i64,
    pub text: String,
}

/// Outcome of a single failed send-message call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiFailure {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("rejected: {0}")]
    Rejected(String),
}

impl ApiFailure {
    fn is_transient(&self) -> bool {
        matches!(self, ApiFailure::Network(_) | ApiFailure::RateLimited { .. })
    }

    /// Linear backoff, stretched to whatever wait the platform asked for
    fn retry_delay(&self, backoff: Duration, attempt: u32) -> Duration {
        let linear = backoff * attempt;
        match self {
            ApiFailure::RateLimited {
                retry_after: Some(wait),
            } => linear.max((*wait).min(MAX_RETRY_AFTER)),
            _ => linear,
        }
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("delivery to chat {chat_id} failed after {attempts} attempts: {reason}")]
    Exhausted {
        chat_id: i64,
        attempts: u32,
        reason: ApiFailure,
    },
    #[error("chat {chat_id} rejected the message: {reason}")]
    Rejected { chat_id: i64, reason: String },
}

/// The platform's send-message call
#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ApiFailure>;
}

/// [`MessageApi`] backed by the Telegram Bot API
pub struct TelegramApi {
    bot: Bot,
}

impl TelegramApi {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MessageApi for TelegramApi {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ApiFailure> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

fn classify(err: RequestError) -> ApiFailure {
    match err {
        RequestError::RetryAfter(secs) => ApiFailure::RateLimited {
            retry_after: Some(secs.duration()),
        },
        RequestError::Network(e) => ApiFailure::Network(e.to_string()),
        RequestError::Io(e) => ApiFailure::Network(e.to_string()),
        RequestError::Api(e) => ApiFailure::Rejected(e.to_string()),
        other => ApiFailure::Rejected(other.to_string()),
    }
}

/// Split long messages for Telegram's message size limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Delivers replies with a bounded number of retries and linear backoff
pub struct OutboundSender {
    api: Arc<dyn MessageApi>,
    max_retries: u32,
    backoff: Duration,
}

impl OutboundSender {
    pub fn new(api: Arc<dyn MessageApi>, config: &SenderConfig) -> Self {
        Self {
            api,
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }

    pub async fn send(&self, msg: &OutboundMessage) -> Result<(), SendError> {
        for chunk in split_message(&msg.text, MAX_CHUNK_LEN) {
            self.send_chunk(msg.chat_id, &chunk).await?;
        }
        Ok(())
    }

    async fn send_chunk(&self, chat_id: i64, text: &str) -> Result<(), SendError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let failure = match self.api.send_message(chat_id, text).await {
                Ok(()) => {
                    debug!(chat_id, attempt, "Reply delivered");
                    return Ok(());
                }
                Err(failure) => failure,
            };

            if !failure.is_transient() {
                return Err(SendError::Rejected {
                    chat_id,
                    reason: failure.to_string(),
                });
            }
            if attempt > self.max_retries {
                return Err(SendError::Exhausted {
                    chat_id,
                    attempts: attempt,
                    reason: failure,
                });
            }

            let delay = failure.retry_delay(self.backoff, attempt);
            warn!(
                chat_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Send failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingApi;
    use teloxide::types::Seconds;
    use teloxide::ApiError;

    fn sender(api: Arc<RecordingApi>, max_retries: u32) -> OutboundSender {
        OutboundSender::new(
            api,
            &SenderConfig {
                max_retries,
                backoff_ms: 1,
            },
        )
    }

    fn message(text: &str) -> OutboundMessage {
        OutboundMessage {
            chat_id: 42,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_delivers_on_first_attempt() {
        let api = Arc::new(RecordingApi::default());
        sender(api.clone(), 2).send(&message("hi")).await.unwrap();
        assert_eq!(api.attempts(), 1);
        assert_eq!(api.sent(), vec![message("hi")]);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let api = Arc::new(RecordingApi::failing_with(vec![
            ApiFailure::Network("connection reset".into()),
            ApiFailure::RateLimited { retry_after: None },
        ]));
        sender(api.clone(), 2).send(&message("hi")).await.unwrap();
        assert_eq!(api.attempts(), 3);
        assert_eq!(api.sent(), vec![message("hi")]);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let api = Arc::new(RecordingApi::failing_with(vec![
            ApiFailure::RateLimited { retry_after: None },
            ApiFailure::RateLimited { retry_after: None },
            ApiFailure::RateLimited { retry_after: None },
            ApiFailure::RateLimited { retry_after: None },
        ]));
        let err = sender(api.clone(), 2).send(&message("hi")).await.unwrap_err();
        assert!(matches!(
            err,
            SendError::Exhausted {
                chat_id: 42,
                attempts: 3,
                reason: ApiFailure::RateLimited { retry_after: None },
            }
        ));
        assert_eq!(api.attempts(), 3);
        assert!(api.sent().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_waits_for_retry_after() {
        let api = Arc::new(RecordingApi::failing_with(vec![ApiFailure::RateLimited {
            retry_after: Some(Duration::from_millis(80)),
        }]));
        let started = std::time::Instant::now();
        sender(api.clone(), 2).send(&message("hi")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(api.attempts(), 2);
        assert_eq!(api.sent(), vec![message("hi")]);
    }

    #[test]
    fn test_retry_delay() {
        let backoff = Duration::from_millis(500);
        let network = ApiFailure::Network("reset".into());
        assert_eq!(network.retry_delay(backoff, 2), Duration::from_millis(1000));

        let flood = ApiFailure::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(flood.retry_delay(backoff, 1), Duration::from_secs(7));

        let short = ApiFailure::RateLimited {
            retry_after: Some(Duration::from_millis(100)),
        };
        assert_eq!(short.retry_delay(backoff, 2), Duration::from_millis(1000));

        let huge = ApiFailure::RateLimited {
            retry_after: Some(Duration::from_secs(3600)),
        };
        assert_eq!(huge.retry_delay(backoff, 1), MAX_RETRY_AFTER);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let api = Arc::new(RecordingApi::failing_with(vec![ApiFailure::Rejected(
            "Forbidden: bot was blocked by the user".into(),
        )]));
        let err = sender(api.clone(), 2).send(&message("hi")).await.unwrap_err();
        assert!(matches!(err, SendError::Rejected { chat_id: 42, .. }));
        assert_eq!(api.attempts(), 1);
    }

    #[tokio::test]
    async fn test_long_reply_is_sent_in_chunks() {
        let api = Arc::new(RecordingApi::default());
        let text = "word ".repeat(1700);
        sender(api.clone(), 0).send(&message(&text)).await.unwrap();

        let sent = api.sent();
        assert!(sent.len() > 1);
        assert!(sent.iter().all(|m| m.chat_id == 42 && m.text.len() <= MAX_CHUNK_LEN));
        let joined: String = sent.into_iter().map(|m| m.text).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_message("hello", 4000), vec!["hello".to_string()]);
    }

    #[test]
    fn test_split_prefers_newline() {
        let chunks = split_message("aaaa\nbbbb cccc", 10);
        assert_eq!(chunks, vec!["aaaa\n".to_string(), "bbbb cccc".to_string()]);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "🚀".repeat(5);
        let chunks = split_message(&text, 6);
        assert!(chunks.iter().all(|c| c.len() <= 6));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_retry_after_keeps_the_wait() {
        let failure = classify(RequestError::RetryAfter(Seconds::from_seconds(7)));
        assert_eq!(
            failure,
            ApiFailure::RateLimited {
                retry_after: Some(Duration::from_secs(7)),
            }
        );
        assert!(failure.is_transient());
    }

    #[test]
    fn test_io_error_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let failure = classify(RequestError::Io(io.into()));
        assert!(matches!(failure, ApiFailure::Network(_)));
        assert!(failure.is_transient());
    }

    #[test]
    fn test_blocked_by_user_is_permanent() {
        let failure = classify(RequestError::Api(ApiError::BotBlocked));
        assert!(matches!(failure, ApiFailure::Rejected(_)));
        assert!(!failure.is_transient());
    }
}
