//! `get`/`last`/`set`/`revert`/`start`/`stop`/`enable`/`disable`/
//! `list-topics` handlers — one-shot calls against a freshly-built
//! Coordinator (§4.F).

use crate::cli::display::{action_failure, action_success, list_table, render_list};
use crate::services::Coordinator;
use anyhow::Result;
use comfy_table::Cell;

pub async fn handle_get(coordinator: &Coordinator, topic: &str, regex: &str, json: bool) -> Result<()> {
    let values = coordinator.get(topic, regex).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }
    let mut table = list_table(&["topic", "value"]);
    for (topic, value) in &values {
        table.add_row(vec![Cell::new(topic), Cell::new(value)]);
    }
    println!("{}", render_list("point", table, values.len()));
    Ok(())
}

pub async fn handle_last(coordinator: &Coordinator, topic: &str, regex: &str, json: bool) -> Result<()> {
    let values = coordinator.last(topic, regex).await?;
    if json {
        let as_json: serde_json::Value = serde_json::json!(values
            .iter()
            .map(|(k, (v, at))| (k.clone(), serde_json::json!({"value": v, "last_updated": at})))
            .collect::<std::collections::HashMap<_, _>>());
        println!("{}", serde_json::to_string_pretty(&as_json)?);
        return Ok(());
    }
    let mut table = list_table(&["topic", "value", "last updated"]);
    for (topic, (value, at)) in &values {
        table.add_row(vec![
            Cell::new(topic),
            Cell::new(value),
            Cell::new(crate::cli::display::relative_time_opt(at.as_ref())),
        ]);
    }
    println!("{}", render_list("point", table, values.len()));
    Ok(())
}

pub async fn handle_set(
    coordinator: &Coordinator,
    point_id: &str,
    raw_value: &str,
    confirm: bool,
    task_id: Option<&str>,
    json: bool,
) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw_value).unwrap_or(serde_json::Value::String(raw_value.to_string()));
    match coordinator.set(point_id, value, confirm, task_id).await {
        Ok(actual) => {
            if json {
                println!("{}", serde_json::json!({"point_id": point_id, "value": actual}));
            } else {
                println!("{}", action_success(&format!("{point_id} = {actual}")));
            }
            Ok(())
        }
        Err(err) => {
            if json {
                println!("{}", serde_json::json!({"point_id": point_id, "error": err.to_string()}));
            } else {
                println!("{}", action_failure(&err.to_string()));
            }
            Err(err.into())
        }
    }
}

pub async fn handle_revert(coordinator: &Coordinator, point_id: &str, task_id: Option<&str>, json: bool) -> Result<()> {
    match coordinator.revert(point_id, task_id).await {
        Ok(()) => {
            if json {
                println!("{}", serde_json::json!({"point_id": point_id, "status": "reverted"}));
            } else {
                println!("{}", action_success(&format!("{point_id} reverted")));
            }
            Ok(())
        }
        Err(err) => {
            println!("{}", action_failure(&err.to_string()));
            Err(err.into())
        }
    }
}

pub async fn handle_start(coordinator: &Coordinator, topic: &str, json: bool) -> Result<()> {
    let matched = coordinator.start(topic).await?;
    report_toggle(topic, matched, "started", json)
}

pub async fn handle_stop(coordinator: &Coordinator, topic: &str, json: bool) -> Result<()> {
    let matched = coordinator.stop(topic).await?;
    report_toggle(topic, matched, "stopped", json)
}

pub async fn handle_enable(coordinator: &Coordinator, topic: &str, json: bool) -> Result<()> {
    let matched = coordinator.enable(topic).await;
    report_matched(topic, &matched, "enabled", json)
}

pub async fn handle_disable(coordinator: &Coordinator, topic: &str, json: bool) -> Result<()> {
    let matched = coordinator.disable(topic).await;
    report_matched(topic, &matched, "disabled", json)
}

pub async fn handle_list_topics(
    coordinator: &Coordinator,
    topic: &str,
    active: Option<bool>,
    enabled: Option<bool>,
    json: bool,
) -> Result<()> {
    let topics = coordinator.list_topics(topic, active, enabled).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&topics)?);
        return Ok(());
    }
    let mut table = list_table(&["topic"]);
    for t in &topics {
        table.add_row(vec![Cell::new(t)]);
    }
    println!("{}", render_list("topic", table, topics.len()));
    Ok(())
}

fn report_toggle(topic: &str, matched: bool, verb: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({"topic": topic, "matched": matched}));
    } else if matched {
        println!("{}", action_success(&format!("{topic} {verb}")));
    } else {
        println!("{}", action_failure(&format!("no node matched {topic}")));
    }
    Ok(())
}

fn report_matched(topic: &str, matched: &[String], verb: &str, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({"topic": topic, "matched": matched}));
    } else if matched.is_empty() {
        println!("{}", action_failure(&format!("no node matched {topic}")));
    } else {
        println!("{}", action_success(&format!("{} node(s) {verb}", matched.len())));
    }
    Ok(())
}
