//! `carebridge upload`: Store a document and queue it for analysis.

use std::path::Path;

use carebridge_agent::WaitOutcome;
use tracing::info;

use super::runtime::{Runtime, read_upload};

pub async fn run(
    config_path: Option<&Path>,
    user: &str,
    file: &Path,
    wait: bool,
) -> anyhow::Result<()> {
    let runtime = Runtime::start(config_path).await?;
    let result = upload(&runtime, user, file, wait).await;
    runtime.stop().await;
    result
}

async fn upload(runtime: &Runtime, user: &str, file: &Path, wait: bool) -> anyhow::Result<()> {
    let upload = read_upload(file).await?;
    let report_id = runtime
        .orchestrator
        .analysis()
        .ingest(upload, user, None)
        .await?;
    info!(report_id = %report_id, "Upload queued");
    println!("Report ID: {report_id}");

    if !wait {
        println!("Check progress with: carebridge report status {report_id}");
        return Ok(());
    }

    let token = runtime.shutdown_token().child_token();
    let watcher = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        })
    };
    let outcome = runtime
        .orchestrator
        .wait_for_analysis(&report_id, &token)
        .await;
    watcher.abort();

    match outcome? {
        WaitOutcome::Completed(status) => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        WaitOutcome::Failed(status) => {
            println!("Analysis failed for {}", status.original_name);
            if let Some(summary) = status.summary {
                println!("{summary}");
            }
        }
        WaitOutcome::TimedOut | WaitOutcome::Cancelled => {
            println!("Analysis still running. Check later with: carebridge report status {report_id}");
        }
    }
    Ok(())
}
