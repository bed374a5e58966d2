//! Reference echo bot built on `oneme-client`.
//!
//! Connects, signs in interactively on the first run (the session token is
//! persisted, so later runs resume without a code), and answers every
//! incoming text message by echoing it back into the same chat.
//!
//! Usage:
//!   ONEME_PHONE=+79991234567 oneme-echo-bot
//!
//! Env vars:
//!   ONEME_PHONE      — phone number for the interactive sign-in
//!   ONEME_STATE_DIR  — where session.json lives (default: .oneme)
//!   ONEME_WS_URL     — override the WebSocket endpoint

use std::path::PathBuf;
use std::sync::Arc;

use oneme_client::{handler_fn, Client, Event, EventKind, FileSessionStore, Opcode};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let phone = std::env::var("ONEME_PHONE").ok();
    let state_dir =
        PathBuf::from(std::env::var("ONEME_STATE_DIR").unwrap_or_else(|_| ".oneme".into()));
    let store = Arc::new(FileSessionStore::new(&state_dir)?);

    let mut builder = Client::builder().session_store(store);
    if let Some(phone) = &phone {
        builder = builder.phone(phone);
    }
    if let Ok(url) = std::env::var("ONEME_WS_URL") {
        builder = builder.websocket_url(url);
    }
    let client = builder.build()?;

    // Echo every inbound message back into its chat, skipping our own so
    // the bot never answers itself.
    let echo_client = client.clone();
    client.subscribe(
        EventKind::Message,
        None,
        handler_fn(move |event: Event| {
            let client = echo_client.clone();
            async move {
                let Event::Message(ev) = event else { return };
                let own_id = client.me().map(|me| me.id);
                if ev.message.sender.is_some() && ev.message.sender == own_id {
                    return;
                }
                let Some(text) = ev.message.text.filter(|t| !t.is_empty()) else {
                    return;
                };

                tracing::info!(chat_id = ev.chat_id, "echoing message");
                let payload = json!({
                    "chatId": ev.chat_id,
                    "message": {
                        "text": text,
                        "cid": chrono::Utc::now().timestamp_millis(),
                        "elements": [],
                        "attaches": [],
                    },
                    "notify": false,
                });
                if let Err(e) = client.send_request(Opcode::SendMessage, payload).await {
                    tracing::warn!(error = %e, "echo failed");
                }
            }
        }),
    );

    tracing::info!("connecting");
    client.connect().await?;

    if !client.is_authorized() {
        tracing::info!("no stored session, starting interactive sign-in");
        client.request_code().await?;

        println!("Enter the verification code:");
        let mut code = String::new();
        std::io::stdin().read_line(&mut code)?;
        client.sign_in(code.trim()).await?;
    }

    if let Some(me) = client.me() {
        tracing::info!(user_id = me.id, "bot is up");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    client.close().await;
    Ok(())
}
