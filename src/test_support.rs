//! Stubs shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::bot::AppState;
use crate::config::SenderConfig;
use crate::dispatcher::{self, Dispatcher};
use crate::sender::{ApiFailure, MessageApi, OutboundMessage, OutboundSender};

/// Records every delivered message. Scripted failures are returned first,
/// one per attempt; a gate, when set, holds each attempt until a permit is added.
#[derive(Default)]
pub struct RecordingApi {
    sent: Mutex<Vec<OutboundMessage>>,
    failures: Mutex<VecDeque<ApiFailure>>,
    attempts: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingApi {
    pub fn failing_with(failures: Vec<ApiFailure>) -> Self {
        Self {
            failures: Mutex::new(failures.into()),
            ..Self::default()
        }
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageApi for RecordingApi {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ApiFailure> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        if let Some(failure) = self.failures.lock().unwrap().pop_front() {
            return Err(failure);
        }
        self.sent.lock().unwrap().push(OutboundMessage {
            chat_id,
            text: text.to_string(),
        });
        Ok(())
    }
}

pub fn app_with(dispatcher: Dispatcher, api: Arc<RecordingApi>) -> Arc<AppState> {
    let sender = OutboundSender::new(
        api,
        &SenderConfig {
            max_retries: 2,
            backoff_ms: 1,
        },
    );
    Arc::new(AppState::new(dispatcher, sender))
}

pub fn echo_app(api: Arc<RecordingApi>) -> Arc<AppState> {
    app_with(dispatcher::echo_bot().unwrap(), api)
}

/// Wait until `api` has delivered at least `count` messages
pub async fn wait_for_sent(api: &RecordingApi, count: usize) -> Vec<OutboundMessage> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let sent = api.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for outbound messages")
}
