//! Platform Driver CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;
use platform_driver::cli::{bootstrap, commands, Cli, Command, OverrideCommand, ReservationCommand};
use platform_driver::infrastructure::config::ConfigLoader;
use platform_driver::infrastructure::logging::{LogConfig, LogFormat, LoggerImpl, RotationPolicy};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path).context("failed to load configuration")?,
        None => ConfigLoader::load().context("failed to load configuration")?,
    };

    let _logger = LoggerImpl::init(&log_config(&config.logging)).context("failed to initialize logging")?;

    if matches!(cli.command, Command::Serve) {
        return commands::serve::handle_serve(&config).await;
    }

    let runtime = bootstrap::build(&config).await?;
    let coordinator = &*runtime.coordinator;

    match cli.command {
        Command::Serve => unreachable!("handled above"),
        Command::Get { topic, regex } => commands::equipment::handle_get(coordinator, &topic, &regex, cli.json).await,
        Command::Last { topic, regex } => commands::equipment::handle_last(coordinator, &topic, &regex, cli.json).await,
        Command::Set { point_id, value, confirm, task_id } => {
            commands::equipment::handle_set(coordinator, &point_id, &value, confirm, task_id.as_deref(), cli.json).await
        }
        Command::Revert { point_id, task_id } => {
            commands::equipment::handle_revert(coordinator, &point_id, task_id.as_deref(), cli.json).await
        }
        Command::Start { topic } => commands::equipment::handle_start(coordinator, &topic, cli.json).await,
        Command::Stop { topic } => commands::equipment::handle_stop(coordinator, &topic, cli.json).await,
        Command::Enable { topic } => commands::equipment::handle_enable(coordinator, &topic, cli.json).await,
        Command::Disable { topic } => commands::equipment::handle_disable(coordinator, &topic, cli.json).await,
        Command::ListTopics { topic, active, enabled } => {
            commands::equipment::handle_list_topics(coordinator, &topic, active, enabled, cli.json).await
        }
        Command::Reservation(cmd) => match cmd {
            ReservationCommand::New { agent_id, task_id, priority, device, start, end } => {
                commands::reservation::handle_new(
                    coordinator, &agent_id, &task_id, &priority, &device, &start, &end, cli.json,
                )
                .await
            }
            ReservationCommand::Cancel { agent_id, task_id } => {
                commands::reservation::handle_cancel(coordinator, &agent_id, &task_id, cli.json).await
            }
        },
        Command::Override(cmd) => match cmd {
            OverrideCommand::Set { glob, duration_secs, failsafe_revert, staggered_revert } => {
                commands::overrides::handle_set(coordinator, &glob, duration_secs, failsafe_revert, staggered_revert, cli.json)
                    .await
            }
            OverrideCommand::Clear { glob } => commands::overrides::handle_clear(coordinator, &glob, cli.json).await,
            OverrideCommand::List => commands::overrides::handle_list(coordinator, cli.json).await,
        },
    }
}

fn log_config(logging: &platform_driver::domain::models::config::LoggingConfig) -> LogConfig {
    LogConfig {
        level: logging.level.clone(),
        format: if logging.format == "pretty" { LogFormat::Pretty } else { LogFormat::Json },
        log_dir: logging.log_dir.clone().map(Into::into),
        enable_stdout: true,
        rotation: RotationPolicy::Daily,
        retention_days: i64::from(logging.retention_days),
    }
}
