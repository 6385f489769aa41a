use std::sync::Arc;

use anyhow::{Context, Result};

use calmirror_calendar::{
    sync_token_key, CalendarClient, CalendarSync, MemoryPropertyStore, PropertyStore,
    SqlitePropertyStore,
};
use calmirror_core::{Config, JobConfig};

fn open_store(config: &Config) -> Result<SqlitePropertyStore> {
    let path = config.store_path();
    SqlitePropertyStore::new(&path)
        .with_context(|| format!("Failed to open sync state at {}", path.display()))
}

/// Store used by `sync`: the real one, or a scratch copy of it for dry runs.
fn sync_store(config: &Config, dry_run: bool) -> Result<Arc<dyn PropertyStore>> {
    let store = open_store(config)?;
    if dry_run {
        let snapshot = MemoryPropertyStore::from_properties(store.properties()?);
        Ok(Arc::new(snapshot))
    } else {
        Ok(Arc::new(store))
    }
}

pub async fn init(source: Option<&str>) -> Result<()> {
    let (config, _) = Config::load_validated()?;
    let jobs = super::selected_jobs(&config, source)?;
    let store: Arc<dyn PropertyStore> = Arc::new(open_store(&config)?);
    let token = super::access_token(&config).await?;

    for job in jobs {
        if store.get_property(&sync_token_key(&job.source))?.is_some() {
            println!("{}: already initialized", job.source);
            continue;
        }
        let mut sync = CalendarSync::new(super::client(&config, &token), store.clone(), &job.source);
        sync.initialize()
            .await
            .with_context(|| format!("Failed to initialize {}", job.source))?;
        println!("{}: sync token established", job.source);
    }
    Ok(())
}

pub async fn run(source: Option<&str>, dry_run: bool) -> Result<()> {
    let (config, _) = Config::load_validated()?;
    let jobs = super::selected_jobs(&config, source)?;
    let store = sync_store(&config, dry_run)?;
    let token = super::access_token(&config).await?;

    sync_jobs(&jobs, store, dry_run, || super::client(&config, &token)).await
}

/// Run every job in turn. A job that aborts does not stop the ones after it.
async fn sync_jobs<F>(
    jobs: &[&JobConfig],
    store: Arc<dyn PropertyStore>,
    dry_run: bool,
    client: F,
) -> Result<()>
where
    F: Fn() -> CalendarClient,
{
    let prefix = if dry_run { "[dry-run] " } else { "" };
    let mut failed = 0;
    let mut aborted = Vec::new();
    let mut first_error = None;

    for job in jobs {
        let mut sync = CalendarSync::new(client(), store.clone(), &job.source).dry_run(dry_run);
        match sync.run(job).await {
            Ok(report) => {
                println!("{}{}: {}", prefix, job.source, report);
                failed += report.failed;
            }
            Err(e) => {
                tracing::error!("Sync of {} aborted: {}", job.source, e);
                println!("{}{}: aborted ({})", prefix, job.source, e.user_message());
                aborted.push(job.source.as_str());
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_error {
        return Err(anyhow::Error::from(e)
            .context(format!("Sync aborted for {}", aborted.join(", "))));
    }
    if failed > 0 {
        anyhow::bail!(
            "{} operation(s) failed; the affected changes will be retried on the next run",
            failed
        );
    }
    Ok(())
}

pub fn reset(calendar: &str) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;
    store.delete_property(&sync_token_key(calendar))?;
    println!("{}: sync token removed, the next sync starts from now", calendar);
    Ok(())
}
