//! `carebridge report`: Report status and listings.

use std::path::Path;

use carebridge_core::report::ReportCategory;

use super::runtime::Runtime;

pub async fn status(config_path: Option<&Path>, id: &str) -> anyhow::Result<()> {
    let runtime = Runtime::open(config_path).await?;
    let status = runtime.orchestrator.analysis().status(id).await;
    runtime.stop().await;

    match status? {
        Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
        None => anyhow::bail!("Report not found: {id}"),
    }
    Ok(())
}

pub async fn list(
    config_path: Option<&Path>,
    user: &str,
    category: Option<&str>,
    limit: usize,
    offset: usize,
) -> anyhow::Result<()> {
    let category = match category {
        Some(name) => Some(
            ReportCategory::parse(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown report category: {name}"))?,
        ),
        None => None,
    };

    let runtime = Runtime::open(config_path).await?;
    let reports = runtime
        .orchestrator
        .analysis()
        .user_reports(user, category, limit, offset)
        .await;
    runtime.stop().await;
    let reports = reports?;

    if reports.is_empty() {
        println!("No reports for {user}");
        return Ok(());
    }
    for report in &reports {
        println!(
            "{}  {:<10}  {:<22}  {}  {}",
            report.id,
            report.status.as_str(),
            report.category.as_str(),
            report.uploaded_at.format("%Y-%m-%d %H:%M"),
            report.original_name
        );
    }
    Ok(())
}
