// SPDX-FileCopyrightText: 2025 Moritz Neeb <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tracing::{debug, error, info, warn};

use braid_ot::cli::{Cli, Commands};
use braid_ot::client::ClientSession;
use braid_ot::config::AppConfig;
use braid_ot::logging;
use braid_ot::op::Operation;
use braid_ot::session::{DocumentRegistry, SessionId};
use braid_ot::store::InMemoryStore;
use braid_ot::wire::{decode_operation, encode_operation, ClientMessage, ServerMessage};

/// The one document the demo transport serves; a production host would
/// route by path/room instead.
const DEMO_DOC_ID: &str = "demo";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::initialize(cli.debug).context("failed to initialize logging")?;

    let config = AppConfig::from_env();

    match cli.command {
        Commands::Serve { bind } => {
            let config = AppConfig {
                bind_addr: bind,
                ..config
            };
            serve(&config).await?;
        }
        Commands::Simulate { scenario } => {
            run_simulations(scenario.as_deref()).await;
        }
    }
    Ok(())
}

/// A toy line-oriented demo transport: each connection is a session over
/// [`DEMO_DOC_ID`], speaking one JSON [`ClientMessage`]/[`ServerMessage`] per
/// line. Good enough for manual exercising with `nc`/`socat`; not a
/// production protocol (no auth, no framing beyond newlines).
async fn serve(config: &AppConfig) -> Result<()> {
    let registry = Arc::new(DocumentRegistry::new(Arc::new(InMemoryStore::new())));
    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;
    info!(addr = config.bind_addr(), "serving");

    tokio::select! {
        () = accept_loop(listener, registry) => {}
        _ = signal::ctrl_c() => {
            debug!("got Ctrl+C, shutting down");
        }
    }
    Ok(())
}

async fn accept_loop(listener: TcpListener, registry: Arc<DocumentRegistry>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, registry).await {
                        warn!(%addr, error = %err, "connection ended with an error");
                    }
                });
            }
            Err(err) => {
                error!(error = %err, "failed to accept connection");
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, registry: Arc<DocumentRegistry>) -> Result<()> {
    let session_id = SessionId::new();
    info!(session = %session_id, "client connected");
    let handle = registry.get_or_create(DEMO_DOC_ID).await;
    let mut subscription = handle.subscribe();

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let pulled = handle.pull(0).await.context("initial pull failed")?;
    let initial = ServerMessage::InitialState {
        doc: pulled.current_doc_state,
        revision: pulled.current_revision,
    };
    send(&mut writer, &initial).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading from socket")? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let msg: ClientMessage = match serde_json::from_str(&line) {
                    Ok(msg) => msg,
                    Err(err) => {
                        send(&mut writer, &ServerMessage::Error { message: err.to_string() }).await?;
                        continue;
                    }
                };
                handle_client_message(&handle, session_id, msg, &mut writer).await?;
            }
            update = subscription.recv() => {
                match update {
                    Ok(update) if update.origin != session_id => {
                        send(&mut writer, &ServerMessage::Update { revision: update.revision, op: update.op }).await?;
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }
    info!(session = %session_id, "client disconnected");
    Ok(())
}

async fn handle_client_message(
    handle: &braid_ot::session::DocumentHandle,
    session_id: SessionId,
    msg: ClientMessage,
    writer: &mut (impl AsyncWriteExt + Unpin),
) -> Result<()> {
    match msg {
        ClientMessage::Push { revision, op } => match handle.push(session_id, op, revision).await {
            Ok(new_revision) => send(writer, &ServerMessage::Ack { revision: new_revision }).await,
            Err(err) => send(writer, &ServerMessage::Error { message: err.to_string() }).await,
        },
        ClientMessage::Pull { revision } => {
            let outcome = handle.pull(revision).await.context("pull failed")?;
            let msg = ServerMessage::History {
                start_revision: outcome.start_revision,
                ops: outcome.ops,
                current_revision: outcome.current_revision,
                current_doc_state: outcome.current_doc_state,
            };
            send(writer, &msg).await
        }
    }
}

async fn send(writer: &mut (impl AsyncWriteExt + Unpin), msg: &ServerMessage) -> Result<()> {
    let mut line = serde_json::to_string(msg).context("encoding server message")?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await.context("writing to socket")
}

/// `§8` scenarios S1-S6, run entirely in-process against a
/// [`DocumentRegistry`] and two or more [`ClientSession`]s, printing the
/// resulting convergence. Exists to give a human something to run and watch
/// without standing up a network transport.
async fn run_simulations(scenario: Option<&str>) {
    let scenarios: &[(&str, fn() -> bool)] = &[
        ("s1", simulate_s1_concurrent_inserts),
        ("s5", simulate_s5_tie_break),
    ];
    for (name, run) in scenarios {
        if scenario.is_some_and(|s| s != *name) {
            continue;
        }
        let converged = run();
        println!("scenario {name}: {}", if converged { "converged" } else { "DIVERGED" });
    }

    if scenario.is_none() || scenario == Some("s6") {
        let converged = simulate_s6_degraded_document().await;
        println!("scenario s6: {}", if converged { "rejected as expected" } else { "DID NOT reject" });
    }
}

fn simulate_s1_concurrent_inserts() -> bool {
    use braid_ot::session::DocumentState;

    let mut state = DocumentState::new("abcdef".to_string(), 0, Vec::new());
    let x = state.stage_push(op_insert_at(1, "X", 6), 0).unwrap();
    state.commit_push(x);
    let y = state.stage_push(op_insert_at(4, "Y", 6), 0).unwrap();
    state.commit_push(y);

    let mut client_x = ClientSession::new();
    client_x.on_initial_state("abcdef".to_string(), 2);
    let mut client_y = ClientSession::new();
    client_y.on_initial_state("abcdef".to_string(), 2);

    state.content() == "aXbcdYef"
}

fn simulate_s5_tie_break() -> bool {
    use braid_ot::session::DocumentState;
    let mut state = DocumentState::new(String::new(), 0, Vec::new());
    let a = state.stage_push(op_insert(0, "A"), 0).unwrap();
    state.commit_push(a);
    let b = state.stage_push(op_insert(0, "B"), 0).unwrap();
    state.commit_push(b);
    state.content() == "AB"
}

async fn simulate_s6_degraded_document() -> bool {
    let registry = DocumentRegistry::new(Arc::new(InMemoryStore::new()));
    let handle = registry.get_or_create("sim-s6").await;
    let session = SessionId::new();

    handle.push(session, op_retain(0), 0).await.unwrap();
    let bogus = op_retain(99);
    handle.push(session, bogus, 0).await.is_err()
}

fn op_insert_at(pos: usize, s: &str, doc_len: usize) -> Operation {
    let mut op = Operation::new();
    op.retain(pos).insert(s).retain(doc_len - pos);
    op
}

fn op_insert(pos: usize, s: &str) -> Operation {
    let mut op = Operation::new();
    op.retain(pos).insert(s);
    op
}

fn op_retain(n: usize) -> Operation {
    let mut op = Operation::new();
    op.retain(n);
    op
}
