//! WebPhone demo CLI
//!
//! Drives the call-session controller end-to-end against the scripted
//! signaling client, printing the published snapshot after every step. The
//! scripted client stands in for the vendor SDK, so the scenarios exercise
//! the real controller code paths without any network.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use webphone_core::prelude::*;
use webphone_core::testing::{FakeMediaSource, ScriptedConnector, StaticCredentialSource};
use webphone_core::{CallNotification, ClientEvent};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Caller ID the scripted credential endpoint issues
    #[arg(short, long, env = "WEBPHONE_CALLER_ID", default_value = "15550009999")]
    caller_id: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inbound scenario: ring, answer, mute, DTMF, hang up
    Inbound {
        /// Number the scripted caller presents
        #[arg(long, default_value = "15551230000")]
        from: String,
    },

    /// Outbound scenario: dial, ringback, active, transfer, remote hangup
    Outbound {
        /// Destination to dial
        #[arg(long, default_value = "15559998888")]
        to: String,

        /// Blind-transfer target once the call is active
        #[arg(long, default_value = "15553334444")]
        transfer_to: String,
    },

    /// Connect, register, and print the published snapshot as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "webphone=info".to_string()),
        )
        .init();

    let cli = Cli::parse();

    let connector = ScriptedConnector::new();
    let phone = WebPhone::builder(
        connector.clone(),
        Arc::new(StaticCredentialSource::token(
            "demo-token",
            Some(&cli.caller_id),
        )),
        Arc::new(FakeMediaSource::new()),
    )
    .build();

    phone.connect().await?;
    let client = connector
        .last_client()
        .context("scripted connector produced no client")?;
    client.emit_ready();
    settle().await;
    print_snapshot("registered", &phone);

    match cli.command {
        Commands::Inbound { from } => run_inbound(&phone, &client, &from).await?,
        Commands::Outbound { to, transfer_to } => {
            run_outbound(&phone, &client, &to, &transfer_to).await?;
        }
        Commands::Status => {
            println!("{}", serde_json::to_string_pretty(&phone.snapshot())?);
        }
    }

    phone.close().await;
    tracing::info!("scenario complete");
    Ok(())
}

async fn run_inbound(
    phone: &WebPhone<ScriptedConnector>,
    client: &webphone_core::testing::ScriptedClient,
    from: &str,
) -> Result<()> {
    let call = client.ring_in(from, "Demo Caller");
    settle().await;
    print_snapshot("ringing", phone);

    phone.answer_call().await?;
    print_snapshot("answering", phone);

    client.emit_active(&call);
    settle().await;
    print_snapshot("active", phone);

    phone.toggle_mute().await?;
    print_snapshot("muted", phone);
    phone.toggle_mute().await?;

    for digit in "12#".chars() {
        phone.send_dtmf(DtmfDigit::try_from(digit)?).await?;
    }

    phone.hangup_call().await?;
    print_snapshot("hung up", phone);

    println!("📼 operations issued on the call: {:?}", call.ops());
    Ok(())
}

async fn run_outbound(
    phone: &WebPhone<ScriptedConnector>,
    client: &webphone_core::testing::ScriptedClient,
    to: &str,
    transfer_to: &str,
) -> Result<()> {
    phone.make_call(to).await?;
    let call = client
        .placed_calls()
        .first()
        .cloned()
        .context("no call was placed")?;

    // The client echoes our own call as a generic ringing notification;
    // the controller must not mistake it for an inbound call
    client.emit(ClientEvent::Call(CallNotification::Ringing {
        call: call.clone(),
    }));
    settle().await;
    print_snapshot("dialing", phone);

    client.emit_active(&call);
    settle().await;
    print_snapshot("active", phone);

    phone.transfer_call(transfer_to).await?;
    client.emit_hangup(&call.id());
    settle().await;
    print_snapshot("after transfer", phone);

    println!("📼 operations issued on the call: {:?}", call.ops());
    Ok(())
}

/// Let the controller's event pump drain everything emitted so far
async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
}

fn print_snapshot(label: &str, phone: &WebPhone<ScriptedConnector>) {
    let snap = phone.snapshot();
    let call = snap
        .active_call
        .as_ref()
        .or(snap.incoming_call.as_ref())
        .or(snap.outbound_call.as_ref());
    match call {
        Some(info) => println!(
            "📞 [{label}] session={} call={} ({}) state={} muted={} held={}",
            snap.session,
            info.remote.number,
            info.remote.display_name,
            info.state.as_str(),
            snap.is_muted,
            snap.is_on_hold,
        ),
        None => println!("📞 [{label}] session={} idle", snap.session),
    }
}
