//! `carebridge session`: Session management.

use std::path::Path;

use carebridge_core::message::{Message, MessageType};

use super::runtime::Runtime;

pub async fn create(config_path: Option<&Path>, user: Option<String>) -> anyhow::Result<()> {
    let runtime = Runtime::open(config_path).await?;
    let session = runtime.orchestrator.create_session(user).await;
    runtime.stop().await;
    println!("{}", session?.id);
    Ok(())
}

pub async fn list(config_path: Option<&Path>, user: &str, limit: usize) -> anyhow::Result<()> {
    let runtime = Runtime::open(config_path).await?;
    let sessions = runtime.orchestrator.list_sessions(user, limit).await;
    runtime.stop().await;
    let sessions = sessions?;

    if sessions.is_empty() {
        println!("No sessions for {user}");
    }
    for session in &sessions {
        println!(
            "{}  {}  {}",
            session.id,
            session.updated_at.format("%Y-%m-%d %H:%M"),
            session.title
        );
    }
    Ok(())
}

pub async fn show(config_path: Option<&Path>, id: &str, limit: usize) -> anyhow::Result<()> {
    let runtime = Runtime::open(config_path).await?;
    let messages = runtime.orchestrator.history(id, limit).await;
    runtime.stop().await;

    for message in &messages? {
        println!("[{}] {}", message.index, speaker(message));
        for line in message.content.lines() {
            println!("    {line}");
        }
    }
    Ok(())
}

fn speaker(message: &Message) -> String {
    match (message.message_type, message.destination) {
        (MessageType::Agent, Some(destination)) => format!("assistant ({destination})"),
        (MessageType::Agent, None) => "assistant".into(),
        (MessageType::User, _) => "you".into(),
        (MessageType::Orchestrator, _) => "router".into(),
        (MessageType::Error, _) => "error".into(),
    }
}

pub async fn rename(config_path: Option<&Path>, id: &str, title: &str) -> anyhow::Result<()> {
    let runtime = Runtime::open(config_path).await?;
    let session = runtime.orchestrator.rename_session(id, title).await;
    runtime.stop().await;
    println!("Renamed to: {}", session?.title);
    Ok(())
}

pub async fn delete(config_path: Option<&Path>, id: &str) -> anyhow::Result<()> {
    let runtime = Runtime::open(config_path).await?;
    let deleted = runtime.orchestrator.delete_session(id).await;
    runtime.stop().await;
    deleted?;
    println!("Deleted session {id}");
    Ok(())
}
