//! Operator commands: `status`, `kick`, `sweep`, `dead-letters`.

use anyhow::{Context, Result};
use catchframe_pipeline::{Intake, Retrigger, Sweeper};
use catchframe_protocol::ReportId;
use catchframe_store::DeadLetter;
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};

use super::GlobalArgs;

fn parse_id(raw: &str) -> Result<ReportId> {
    ReportId::parse(raw).with_context(|| format!("Invalid report id '{}'", raw))
}

pub async fn status(global: &GlobalArgs, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let ctx = global.open_context().await?;
    let report = ctx
        .stores
        .records
        .get(&id)
        .await
        .context("Failed to read report")?
        .with_context(|| format!("Report {} not found", id))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn kick(global: &GlobalArgs, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let ctx = global.open_context().await?;
    let outcome = Intake::new(ctx)
        .kick(&id)
        .await
        .with_context(|| format!("Failed to kick report {}", id))?;
    println!("{}", retrigger_json(&id, &outcome));
    Ok(())
}

fn retrigger_json(id: &ReportId, outcome: &Retrigger) -> serde_json::Value {
    match outcome {
        Retrigger::Published { topic, status } => serde_json::json!({
            "reportId": id,
            "status": status,
            "published": topic,
        }),
        Retrigger::Terminal(status) | Retrigger::NoStage(status) => serde_json::json!({
            "reportId": id,
            "status": status,
            "published": null,
        }),
    }
}

pub async fn sweep(global: &GlobalArgs) -> Result<()> {
    let ctx = global.open_context().await?;
    let summary = Sweeper::new(ctx).sweep_once().await.context("Sweep failed")?;
    println!(
        "{}",
        serde_json::json!({
            "scanned": summary.scanned,
            "republished": summary.republished,
            "failed": summary.failed,
        })
    );
    Ok(())
}

pub async fn dead_letters(
    global: &GlobalArgs,
    topic: Option<&str>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let ctx = global.open_context().await?;
    let rows = ctx
        .stores
        .channel
        .list_dead_letters(topic, limit)
        .await
        .context("Failed to list dead letters")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("No dead letters.");
    } else {
        println!("{}", dead_letter_table(&rows));
    }
    Ok(())
}

fn dead_letter_table(rows: &[DeadLetter]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "TOPIC", "PAYLOAD", "ATTEMPTS", "REASON", "MOVED", "ERROR"]);
    for row in rows {
        table.add_row(vec![
            row.id.to_string(),
            row.topic.clone(),
            String::from_utf8_lossy(&row.payload).into_owned(),
            row.attempts.to_string(),
            row.reason.to_string(),
            row.moved_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            truncate(&row.error_message, 80),
        ]);
    }
    table
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", head)
}
