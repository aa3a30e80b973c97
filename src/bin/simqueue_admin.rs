//! Maintenance commands for the SIM task queue.
//!
//! Usage:
//!
//! ```text
//! simqueue-admin stats
//! simqueue-admin pending [--limit <n>]
//! simqueue-admin cleanup --older-than-days <days>
//! simqueue-admin retry <task-id> [--actor <name>]
//! simqueue-admin cancel <task-id> [--actor <name>]
//! ```
//!
//! The database comes from `SIMQUEUE_DATABASE_URL`. Results are reported
//! through the tracing subscriber; set `RUST_LOG` to adjust verbosity.
//!
//! There is no recovery command. Stranded `processing` tasks are requeued
//! only when the worker process starts, since a live worker may still own
//! them.

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use mockable::DefaultClock;
use simqueue::{
    config::QueueConfig,
    queue::{
        adapters::{
            channel::{ChannelAuditSink, TracingAuditLog},
            postgres::{PostgresTaskRepository, build_pool},
        },
        domain::TaskId,
        services::QueueService,
    },
};
use std::sync::Arc;
use tracing::info;

/// Actor recorded when `--actor` is not given.
const DEFAULT_ACTOR: &str = "admin";

/// Queue maintenance tool.
#[derive(Parser, Debug)]
#[command(name = "simqueue-admin", about = "SIM task queue maintenance")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report task counts by status and tasks created today.
    Stats,
    /// List the next due pending tasks.
    Pending {
        /// Most tasks to list.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete terminal tasks older than the given age.
    Cleanup {
        /// Retention in days.
        #[arg(long)]
        older_than_days: u32,
    },
    /// Requeue a failed task.
    Retry {
        /// Task identifier.
        id: i64,
        /// Actor recorded in the audit log.
        #[arg(long, default_value = DEFAULT_ACTOR)]
        actor: String,
    },
    /// Cancel a pending or processing task.
    Cancel {
        /// Task identifier.
        id: i64,
        /// Actor recorded in the audit log.
        #[arg(long, default_value = DEFAULT_ACTOR)]
        actor: String,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = QueueConfig::from_env()?;
    let pool = build_pool(config.require_database_url()?, config.pool_size)
        .wrap_err("failed to connect to the task database")?;
    let repository = Arc::new(PostgresTaskRepository::new(pool));
    let clock = Arc::new(DefaultClock);

    let (audit, drain) = ChannelAuditSink::spawn(Arc::new(TracingAuditLog), config.channel_capacity);
    let service = QueueService::new(Arc::clone(&repository), Arc::clone(&clock), Arc::new(audit))
        .with_policy(config.queue_policy());

    match cli.command {
        Command::Stats => {
            let stats = service.get_stats().await?;
            let counts = stats.counts;
            info!(
                pending = counts.pending,
                processing = counts.processing,
                completed = counts.completed,
                failed = counts.failed,
                cancelled = counts.cancelled,
                total = counts.total(),
                created_today = stats.created_today,
                "queue statistics"
            );
        }
        Command::Pending { limit } => {
            for task in service.get_pending_tasks(limit).await? {
                info!(
                    task_id = %task.id(),
                    task_type = %task.task_type(),
                    priority = task.priority().value(),
                    msisdn = task.target().msisdn(),
                    attempt = task.attempt(),
                    next_run_at = %task.next_run_at(),
                    "pending task"
                );
            }
        }
        Command::Cleanup { older_than_days } => {
            let deleted = service
                .cleanup_old_tasks(chrono::Duration::days(i64::from(older_than_days)))
                .await?;
            info!(deleted, older_than_days, "cleanup finished");
        }
        Command::Retry { id, actor } => {
            let task = service.retry_task(TaskId::new(id), &actor).await?;
            info!(task_id = %task.id(), status = %task.status(), "task requeued");
        }
        Command::Cancel { id, actor } => {
            let task = service.cancel_task_admin(TaskId::new(id), &actor).await?;
            info!(task_id = %task.id(), status = %task.status(), "task cancelled");
        }
    }

    drop(service);
    drain.await.wrap_err("audit drain task failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;
    use rstest::rstest;

    #[rstest]
    #[case::stats(&["simqueue-admin", "stats"])]
    #[case::pending(&["simqueue-admin", "pending", "--limit", "5"])]
    #[case::cleanup(&["simqueue-admin", "cleanup", "--older-than-days", "7"])]
    #[case::retry(&["simqueue-admin", "retry", "42"])]
    #[case::cancel(&["simqueue-admin", "cancel", "42", "--actor", "ops"])]
    fn maintenance_commands_parse(#[case] args: &[&str]) {
        assert!(Cli::try_parse_from(args).is_ok());
    }

    #[test]
    fn recovery_is_left_to_worker_startup() {
        let err = Cli::try_parse_from(["simqueue-admin", "recover"])
            .expect_err("recover must not be an admin command");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn retry_defaults_the_actor() {
        let cli = Cli::try_parse_from(["simqueue-admin", "retry", "9"]).expect("valid command");
        assert!(matches!(cli.command, Command::Retry { id: 9, ref actor } if actor == "admin"));
    }
}
