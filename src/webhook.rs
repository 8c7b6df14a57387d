use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, PathRejection},
        Path, State,
    },
    http::{Method, StatusCode},
    routing::{any, get},
    Router,
};
use reqwest::Url;
use teloxide::payloads::SetWebhookSetters;
use teloxide::requests::Requester;
use teloxide::types::AllowedUpdate;
use teloxide::Bot;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::bot::{self, AppState};
use crate::config::Config;
use crate::update::Update;

#[derive(Clone)]
struct WebhookState {
    token: Arc<str>,
    app: Arc<AppState>,
    tasks: TaskTracker,
}

/// `POST /bot/{token}` for updates, `GET /` for health checks.
/// Reply tasks are spawned on `tasks` so shutdown can wait for them.
pub fn router(token: &str, app: Arc<AppState>, tasks: TaskTracker) -> Router {
    let state = WebhookState {
        token: Arc::from(token),
        app,
        tasks,
    };

    Router::new()
        .route("/", get(health))
        .route("/bot/{token}", any(receive_update))
        .with_state(state)
}

async fn health() -> &'static str {
    "Bot is running!"
}

async fn receive_update(
    State(state): State<WebhookState>,
    method: Method,
    token: Result<Path<String>, PathRejection>,
    body: Result<Bytes, BytesRejection>,
) -> StatusCode {
    // Unknown or undecodable tokens look like unknown routes, whatever the method
    let known = matches!(&token, Ok(Path(t)) if t.as_str() == &*state.token);
    if !known {
        warn!("Webhook call with unknown token rejected");
        return StatusCode::NOT_FOUND;
    }
    if method != Method::POST {
        return StatusCode::METHOD_NOT_ALLOWED;
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "Unreadable webhook body");
            return rejection.status();
        }
    };

    let update = match Update::decode(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!(error = %e, "Malformed update rejected");
            return StatusCode::BAD_REQUEST;
        }
    };

    info!(
        update_id = update.update_id(),
        chat_id = update.chat_id(),
        "Webhook update accepted"
    );

    // Acknowledge now; delivery happens off the response path
    let app = state.app.clone();
    state.tasks.spawn(async move {
        app.process_update(update).await;
    });

    StatusCode::OK
}

/// Bind the listener, register the webhook, and serve until Ctrl-C
pub async fn serve(config: &Config, bot: Bot, app: Arc<AppState>, endpoint: Url) -> Result<()> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Webhook server listening on {}", addr);

    bot.set_webhook(endpoint)
        .allowed_updates(vec![AllowedUpdate::Message])
        .await
        .context("Failed to register webhook")?;
    info!(
        "Webhook registered at {}/bot/<token>",
        config
            .telegram
            .webhook_url
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/')
    );

    let tasks = TaskTracker::new();
    let app = router(&config.telegram.bot_token, app, tasks.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(bot::shutdown_signal())
        .await
        .context("Webhook server error")?;

    // Updates already acknowledged with 200 still get their replies
    tasks.close();
    if !tasks.is_empty() {
        info!("Waiting for {} in-flight replies", tasks.len());
    }
    tasks.wait().await;

    if let Err(e) = bot.delete_webhook().await {
        warn!("Failed to remove webhook on shutdown: {}", e);
    } else {
        info!("Webhook removed");
    }

    Ok(())
}
