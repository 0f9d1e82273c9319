//! `lingmo models` - endpoint table with quota and circuit columns.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::state::AppState;

pub async fn list_models(state: &AppState, json: bool) -> Result<()> {
    let models = state.models.list().await?;

    if json {
        let rows: Vec<_> = models
            .iter()
            .map(|m| {
                serde_json::json!({
                    "model": m.view(),
                    "quota": state.quota.snapshot(m.id),
                    "eligible": state.quota.is_eligible(m.id),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if models.is_empty() {
        println!();
        println!("  No model endpoints configured.");
        println!(
            "  {}",
            style("Add one with POST /api/models while `lingmo serve` is running.").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Priority").fg(Color::White),
        Cell::new("Vendor").fg(Color::White),
        Cell::new("Model").fg(Color::White),
        Cell::new("Spec").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Quota").fg(Color::White),
    ]);

    for model in &models {
        let status_cell = if !model.enabled {
            Cell::new("○ disabled").fg(Color::DarkGrey)
        } else if let Some(err) = model.config_error() {
            Cell::new(format!("✗ {err}")).fg(Color::Red)
        } else if state.quota.is_eligible(model.id) {
            Cell::new("● eligible").fg(Color::Green)
        } else {
            Cell::new("◌ exhausted").fg(Color::Yellow)
        };

        let quota = state.quota.snapshot(model.id);
        let quota_text = if quota.total_tokens == 0 {
            format!("{} used / unlimited", quota.used_tokens)
        } else {
            format!(
                "{} / {} ({:.1}%)",
                quota.used_tokens,
                quota.total_tokens,
                quota.usage_ratio() * 100.0
            )
        };

        table.add_row(vec![
            Cell::new(model.id).fg(Color::Cyan),
            Cell::new(model.priority),
            Cell::new(&model.vendor),
            Cell::new(&model.model_name),
            Cell::new(model.api_spec),
            status_cell,
            Cell::new(quota_text).fg(Color::DarkGrey),
        ]);
    }

    println!("{table}");
    Ok(())
}
