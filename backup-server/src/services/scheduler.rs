use crate::state::AppState;
use backup_engine::BackupOptions;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

/// Runs snapshot then prune on a cron schedule.
pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
    running: Arc<Mutex<bool>>,
}

impl BackupScheduler {
    pub async fn new(state: Arc<AppState>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
            running: Arc::new(Mutex::new(false)),
        })
    }

    pub async fn schedule(&self, cron_expression: &str) -> anyhow::Result<()> {
        let state = self.state.clone();
        let running = self.running.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let state = state.clone();
            let running = running.clone();
            Box::pin(async move {
                {
                    let mut flag = running.lock().await;
                    if *flag {
                        tracing::warn!("Skipping scheduled backup: previous run still in progress");
                        return;
                    }
                    *flag = true;
                }
                run_scheduled_backup(state).await;
                *running.lock().await = false;
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(cron = %cron_expression, "Scheduled backup registered");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

/// One scheduled pass. Failures are logged; prune still runs when the
/// snapshot fails.
pub async fn run_scheduled_backup(state: Arc<AppState>) {
    let options = BackupOptions {
        include_sensitive: state.config.cron_include_sensitive,
        encrypt: state.config.cron_encrypt,
    };

    let service = state.service.clone();
    match tokio::task::spawn_blocking(move || service.create_backup(options)).await {
        Ok(Ok(info)) => tracing::info!(archive = %info.name, "Scheduled backup created"),
        Ok(Err(e)) => tracing::error!(error = %e, "Scheduled backup failed"),
        Err(e) => tracing::error!(error = %e, "Scheduled backup task panicked"),
    }

    let service = state.service.clone();
    match tokio::task::spawn_blocking(move || service.prune(None, false)).await {
        Ok(Ok(report)) => tracing::info!(
            deleted = report.deleted.len(),
            errors = report.errors.len(),
            "Scheduled prune finished"
        ),
        Ok(Err(e)) => tracing::error!(error = %e, "Scheduled prune failed"),
        Err(e) => tracing::error!(error = %e, "Scheduled prune task panicked"),
    }
}
