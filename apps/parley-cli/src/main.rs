use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use parley_client::{CloseReason, HttpBackend, SessionClient};
use parley_protocol::{ApprovalId, MessageStatus, ToolCallStatus};
use parley_transcript::{ApprovalTracker, Transcript};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "parley-cli")]
#[command(about = "parley streaming chat demo")]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:8789")]
    server: String,
    #[arg(long, default_value = "demo session")]
    title: String,
    /// Approve any consent gate the agents raise instead of rejecting it.
    #[arg(long)]
    auto_approve: bool,
    /// User turns to send, in order.
    #[arg(default_values_t = [
        "创建登录页面".to_owned(),
        "find the login form styles".to_owned(),
        "deploy the site to prod".to_owned(),
    ])]
    messages: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .compact()
        .init();

    let cli = Cli::parse();
    let backend = Arc::new(HttpBackend::new(&cli.server));

    let session = backend.create_session(&cli.title).await?;
    info!(session_id = %session.id, title = %session.title, "session created");

    let client = Arc::new(SessionClient::new(
        session.id.clone(),
        backend.clone(),
        backend.clone(),
        backend.clone(),
    ));
    client.open().await?;

    // Log transcript progress as revisions land.
    let progress_task = {
        let client = client.clone();
        let mut revision = client.subscribe();
        tokio::spawn(async move {
            while revision.changed().await.is_ok() {
                client.sync_countdowns();
                let transcript = client.transcript();
                if let Some(message) = transcript.last_message() {
                    info!(
                        author = ?message.author,
                        agent = message.agent_name.as_deref().unwrap_or("-"),
                        status = ?message.status,
                        chars = message.content.chars().count(),
                        "transcript updated"
                    );
                }
            }
        })
    };

    for content in &cli.messages {
        info!(content = %content, "sending turn");
        match client.send(content).await {
            Ok(CloseReason::Done) => {}
            Ok(reason) => warn!(?reason, "turn did not finish clean"),
            Err(error) => {
                warn!(%error, "turn failed");
                continue;
            }
        }

        resolve_pending_approvals(&client, cli.auto_approve).await;
    }

    progress_task.abort();
    render(&client.transcript());
    Ok(())
}

async fn resolve_pending_approvals(client: &SessionClient, auto_approve: bool) {
    let pending: Vec<ApprovalId> = {
        let transcript = client.transcript();
        ApprovalTracker::new(&transcript)
            .pending()
            .map(|approval| approval.id.clone())
            .collect()
    };

    for id in pending {
        let remaining = client
            .countdown_remaining(&id)
            .map_or_else(|| "-".to_owned(), |left| format!("{}s", left.as_secs()));
        info!(approval_id = %id, remaining = %remaining, auto_approve, "consent gate raised");

        let decision = if auto_approve {
            client.approve(&id).await
        } else {
            client.reject(&id).await
        };
        if let Err(error) = decision {
            warn!(approval_id = %id, %error, "decision refused");
        }
    }
}

fn render(transcript: &Transcript) {
    println!("\n=== transcript ({} messages) ===", transcript.len());
    for message in transcript.messages() {
        let who = message
            .agent_name
            .as_deref()
            .unwrap_or(match message.author {
                parley_protocol::AuthorKind::User => "you",
                parley_protocol::AuthorKind::Assistant => "assistant",
                parley_protocol::AuthorKind::System => "system",
            });
        let marker = match message.status {
            MessageStatus::Error => " [failed]",
            MessageStatus::Streaming | MessageStatus::Sending => " [incomplete]",
            MessageStatus::Sent => "",
        };
        println!("{who}{marker}: {}", message.content);

        for call in &message.tool_calls {
            let outcome = match call.status {
                ToolCallStatus::Running => "still running".to_owned(),
                ToolCallStatus::Success => call.result.clone().unwrap_or_default(),
                ToolCallStatus::Error => {
                    format!("failed: {}", call.error.clone().unwrap_or_default())
                }
            };
            println!("  [tool {}] {outcome}", call.name);
        }
        if let Some(approval) = &message.approval {
            println!(
                "  [approval {} {:?}] {}",
                approval.tool_name, approval.status, approval.reason
            );
        }
    }
}
