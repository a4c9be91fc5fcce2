//! Override Manager command handlers (§4.E).

use crate::cli::display::{action_failure, action_success, list_table, render_list};
use crate::services::Coordinator;
use anyhow::Result;
use comfy_table::Cell;

pub async fn handle_set(
    coordinator: &Coordinator,
    glob: &str,
    duration_secs: Option<f64>,
    failsafe_revert: bool,
    staggered_revert: bool,
    json: bool,
) -> Result<()> {
    coordinator.set_override(glob, duration_secs, failsafe_revert, staggered_revert).await;
    if json {
        println!("{}", serde_json::json!({"glob": glob, "status": "set"}));
    } else {
        println!("{}", action_success(&format!("override set on {glob}")));
    }
    Ok(())
}

pub async fn handle_clear(coordinator: &Coordinator, glob: &str, json: bool) -> Result<()> {
    let cleared = coordinator.clear_override(glob).await;
    if json {
        println!("{}", serde_json::json!({"glob": glob, "cleared": cleared}));
    } else if cleared {
        println!("{}", action_success(&format!("override on {glob} cleared")));
    } else {
        println!("{}", action_failure(&format!("no override found for {glob}")));
    }
    Ok(())
}

pub async fn handle_list(coordinator: &Coordinator, json: bool) -> Result<()> {
    let entries = coordinator.list_overrides().await;
    if json {
        let as_json: Vec<_> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "glob": e.pattern.glob,
                    "end_time": e.pattern.end_time,
                    "staggered_revert": e.pattern.staggered_revert,
                    "failsafe_revert": e.failsafe_revert,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&as_json)?);
        return Ok(());
    }
    let mut table = list_table(&["glob", "expires", "failsafe revert"]);
    for entry in &entries {
        table.add_row(vec![
            Cell::new(&entry.pattern.glob),
            Cell::new(crate::cli::display::relative_time_opt(entry.pattern.end_time.as_ref())),
            Cell::new(entry.failsafe_revert),
        ]);
    }
    println!("{}", render_list("override", table, entries.len()));
    Ok(())
}
