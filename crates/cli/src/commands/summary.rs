//! `carebridge summary`: Conversation and medical summaries.

use std::path::Path;

use super::runtime::Runtime;

pub async fn show(config_path: Option<&Path>, session: &str) -> anyhow::Result<()> {
    let runtime = Runtime::open(config_path).await?;
    let info = runtime
        .orchestrator
        .summaries()
        .conversation_summary_info(session)
        .await;
    runtime.stop().await;
    let info = info?;

    match info.summary {
        Some(text) => {
            println!("Covers messages 1-{}", info.last_summarized_index);
            println!();
            println!("{text}");
        }
        None => println!("No summary yet for {session}"),
    }
    Ok(())
}

pub async fn medical(
    config_path: Option<&Path>,
    session: &str,
    reports: &[String],
) -> anyhow::Result<()> {
    let runtime = Runtime::start(config_path).await?;
    let filter = (!reports.is_empty()).then_some(reports);
    let summary = runtime
        .orchestrator
        .summaries()
        .generate_medical_summary(session, filter)
        .await;
    runtime.stop().await;

    match summary? {
        Some(summary) => {
            println!("{}", summary.text);
            if !summary.metadata.is_empty() {
                println!();
                println!("{}", serde_json::to_string_pretty(&summary.metadata)?);
            }
        }
        None => println!("Nothing to summarize: no completed reports for this session's user"),
    }
    Ok(())
}
