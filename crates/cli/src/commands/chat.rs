//! `carebridge chat`: Interactive or single-message chat mode.
//!
//! Ctrl+C during a turn only cuts the wait on an upload short; the analysis
//! keeps running and is announced on a later turn.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use carebridge_agent::TurnReply;
use carebridge_core::message::Message;
use carebridge_core::report::Upload;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::runtime::{Runtime, read_upload};

pub async fn run(
    config_path: Option<&Path>,
    session: Option<String>,
    user: Option<String>,
    message: Option<String>,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let runtime = Runtime::start(config_path).await?;
    let result = chat(&runtime, session, user, message, file).await;
    runtime.stop().await;
    result
}

async fn chat(
    runtime: &Runtime,
    session: Option<String>,
    user: Option<String>,
    message: Option<String>,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let orchestrator = &runtime.orchestrator;
    let session_id = match session {
        Some(id) => id,
        None => orchestrator.create_session(user).await?.id,
    };

    if let Some(msg) = message {
        let upload = match file {
            Some(path) => Some(read_upload(&path).await?),
            None => None,
        };
        print_announcements(&orchestrator.notify_completed_reports(&session_id).await?);

        eprint!("  Thinking...");
        let reply = turn(runtime, &session_id, &msg, upload).await;
        eprint!("\r              \r");
        let reply = reply?;
        println!("{}", reply.answer);
        print_turn_notes(&reply);
        return Ok(());
    }

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║       CareBridge — Interactive Mode          ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Provider:  {}", runtime.config.provider);
    println!("  Router:    {}", runtime.config.models.router);
    println!("  Responder: {}", runtime.config.models.responder);
    println!("  Session:   {session_id}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Attach a document with: /upload <path> <message>");
    println!("  Type 'exit' to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            prompt()?;
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let (query, upload) = match parse_upload_line(line) {
            Some((path, query)) => match read_upload(Path::new(path)).await {
                Ok(upload) => (query, Some(upload)),
                Err(e) => {
                    eprintln!("  [Error] {e:#}");
                    prompt()?;
                    continue;
                }
            },
            None => (line, None),
        };

        match orchestrator.notify_completed_reports(&session_id).await {
            Ok(posted) => print_announcements(&posted),
            Err(e) => eprintln!("  [Error] {e}"),
        }

        eprint!("  ...");
        match turn(runtime, &session_id, query, upload).await {
            Ok(reply) => {
                eprint!("\r     \r");
                println!();
                for line in reply.answer.lines() {
                    println!("  Assistant > {line}");
                }
                print_turn_notes(&reply);
                println!();
            }
            Err(e) => {
                eprint!("\r     \r");
                eprintln!("  [Error] {e}");
                println!();
            }
        }
        prompt()?;
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Run one turn with Ctrl+C wired to a turn-scoped token.
async fn turn(
    runtime: &Runtime,
    session_id: &str,
    query: &str,
    upload: Option<Upload>,
) -> anyhow::Result<TurnReply> {
    let token = runtime.shutdown_token().child_token();
    let watcher = cancel_on_ctrl_c(token.clone());
    let reply = runtime
        .orchestrator
        .handle_query(session_id, query, upload, &token)
        .await;
    watcher.abort();
    reply.context("Turn failed")
}

fn cancel_on_ctrl_c(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    })
}

/// `/upload <path> <message>`; the message defaults to a request for analysis.
fn parse_upload_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("/upload ")?.trim_start();
    let (path, query) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let query = query.trim();
    Some((path, if query.is_empty() { "Please analyze this report" } else { query }))
}

fn prompt() -> anyhow::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()?;
    Ok(())
}

fn print_announcements(posted: &[Message]) {
    for message in posted {
        println!();
        for line in message.content.lines() {
            println!("  Assistant > {line}");
        }
    }
}

fn print_turn_notes(reply: &TurnReply) {
    if reply.analysis_timeout {
        println!("  (analysis still running; the result will be posted on a later turn)");
    }
    if let Some(id) = &reply.report_id {
        println!("  (report {id})");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_line_splits_path_and_message() {
        assert_eq!(
            parse_upload_line("/upload ./cbc.pdf what do my results mean?"),
            Some(("./cbc.pdf", "what do my results mean?"))
        );
        assert_eq!(
            parse_upload_line("/upload scan.png"),
            Some(("scan.png", "Please analyze this report"))
        );
        assert_eq!(parse_upload_line("hello"), None);
    }
}
