//! `lingmo status` - router and settings overview.

use anyhow::Result;
use console::style;

use crate::state::AppState;

pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let router = state.router.status();
    let settings = state.settings_service.public_map();

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "models": {
                "total": state.registry.list_all().len(),
                "enabled": state.registry.enabled_count(),
            },
            "router": router,
            "settings": settings,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  {} Lingmo v{}", style("⚡").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Models ──").dim());
    println!("  Total:    {}", style(state.registry.list_all().len()).bold());
    println!("  Enabled:  {}", style(state.registry.enabled_count()).green());
    println!();

    println!("  {}", style("── Router ──").dim());
    match router.active_model_id {
        Some(id) => println!("  Active:   {}", style(id).cyan()),
        None => println!("  Active:   {}", style("none selected yet").dim()),
    }
    println!("  Version:  {}", router.version);
    for circuit in router.circuits.iter().filter(|c| c.circuit_state != "closed") {
        println!(
            "  {} model {} circuit {}",
            style("!").yellow(),
            circuit.model_id,
            circuit.circuit_state
        );
    }
    println!();

    println!("  {}", style("── Settings ──").dim());
    for (key, value) in &settings {
        let shown = if value.is_empty() {
            style("(unset)".to_string()).red()
        } else {
            style(value.clone()).white()
        };
        println!("  {key:<18} {shown}");
    }
    println!();

    println!("  {}", style("── Storage ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!();
    Ok(())
}
