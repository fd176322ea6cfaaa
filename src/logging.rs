use crate::checker::BatchReport;
use crate::config::LogConfig;
use crate::{CHECKER_TARGET, COMMAND_TARGET, CONSOLE_TARGET, Data, ERROR_TARGET, Error};
use poise::{Context, FrameworkError};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Filter used when neither `RUST_LOG` nor the config file sets one
pub const DEFAULT_FILTER: &str = "info,serenity=error";

/// Initialize the logging system with console and file outputs
pub fn init(config: &LogConfig) -> Result<(), Error> {
    if !config.directory.exists() {
        std::fs::create_dir_all(&config.directory)?;
    }

    // JSON lines, one file per day
    let file_appender =
        RollingFileAppender::new(Rotation::DAILY, &config.directory, &config.file_prefix);

    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(config.ansi);

    let file_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(file_appender);

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.filter.as_deref().unwrap_or(DEFAULT_FILTER))?,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(directory = %config.directory.display(), "Logging system initialized");
    Ok(())
}

/// When a command began, kept in poise's per-invocation data
#[derive(Debug, Clone, Copy)]
pub struct CommandStart(Instant);

impl CommandStart {
    #[must_use]
    pub fn now() -> Self {
        Self(Instant::now())
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.0.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Log the start of a command execution (pre-command hook)
pub async fn log_command_start(ctx: Context<'_, Data, Error>) {
    ctx.set_invocation_data(CommandStart::now()).await;

    let command_name = ctx.command().qualified_name.clone();
    let guild_id = ctx
        .guild_id()
        .map_or_else(|| "DM".to_string(), |id| id.get().to_string());
    let user_id = ctx.author().id.get().to_string();

    let args = if ctx.command().parameters.is_empty() {
        String::new()
    } else {
        format!("{:?}", ctx.invocation_string())
    };

    info!(
        target: COMMAND_TARGET,
        command = %command_name,
        guild_id = %guild_id,
        user_id = %user_id,
        arguments = %args,
        event = "start",
        "Command execution started"
    );
}

/// Log the end of a command execution (post-command hook)
pub async fn log_command_end(ctx: Context<'_, Data, Error>) {
    let duration_ms = ctx
        .invocation_data::<CommandStart>()
        .await
        .map_or(0, |start| start.elapsed_ms());

    let command_name = ctx.command().qualified_name.clone();
    let guild_id = ctx
        .guild_id()
        .map_or_else(|| "DM".to_string(), |id| id.get().to_string());
    let user_id = ctx.author().id.get().to_string();

    info!(
        target: COMMAND_TARGET,
        command = %command_name,
        guild_id = %guild_id,
        user_id = %user_id,
        duration_ms = duration_ms,
        event = "end",
        "Command execution completed"
    );
}

/// Log errors that occur during command execution
pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => {
            let command_name = ctx.command().qualified_name.clone();
            let guild_id = ctx
                .guild_id()
                .as_ref()
                .map_or_else(|| "DM".to_string(), ToString::to_string);
            let user_id = ctx.author().id.get().to_string();

            error!(
                target: ERROR_TARGET,
                command = %command_name,
                guild_id = %guild_id,
                user_id = %user_id,
                error = %error,
                "Command error"
            );
        }
        FrameworkError::ArgumentParse { error, input, ctx, .. } => {
            warn!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                input = ?input,
                error = %error,
                "Command argument could not be parsed"
            );
        }
        err => {
            error!(
                target: ERROR_TARGET,
                error_type = %std::any::type_name::<FrameworkError<'_, Data, Error>>(),
                error = ?err,
                "Other framework error"
            );
        }
    }
}

/// One structured event per batch, with per-outcome counts
pub fn log_batch_report(report: &BatchReport) {
    let slot = report
        .slot
        .map_or_else(|| "all".to_string(), |slot| slot.to_string());

    if report.errors() == 0 {
        info!(
            target: CHECKER_TARGET,
            run_id = %report.run_id,
            slot = %slot,
            offset = report.offset,
            selected = report.selected,
            checked = report.checked,
            escalated = report.escalated,
            event = "batch",
            "Ban check batch completed"
        );
    } else {
        warn!(
            target: CHECKER_TARGET,
            run_id = %report.run_id,
            slot = %slot,
            offset = report.offset,
            selected = report.selected,
            checked = report.checked,
            escalated = report.escalated,
            not_found = report.not_found,
            transient = report.transient,
            failed = report.failed,
            event = "batch",
            "Ban check batch completed with errors"
        );
    }
}

pub fn log_console(message: &str) {
    info!(
        target: CONSOLE_TARGET,
        message = %message,
        event = "console",
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_command_start_survives_task_migration() {
        let start = CommandStart::now();
        let elapsed = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
            tokio::task::yield_now().await;
            start.elapsed_ms()
        })
        .await
        .unwrap();
        assert!(elapsed >= 25);

        // Independent starts never overwrite each other
        let later = CommandStart::now();
        assert!(start.elapsed_ms() >= later.elapsed_ms());
    }

    #[test]
    fn test_log_batch_report_without_subscriber() {
        let mut report = BatchReport::new(Some(4), 40, 10);
        report.checked = 9;
        report.transient = 1;
        log_batch_report(&report);
        log_batch_report(&BatchReport::new(None, 0, 0));
    }
}
