use anyhow::Result;

use calmirror_core::Config;

pub fn run() -> Result<()> {
    let config = Config::load()?;

    println!("Config file: {}", Config::config_path().display());
    println!("Sync state:  {}", config.store_path().display());
    println!();

    if config.jobs.is_empty() {
        println!("No jobs configured.");
    }
    for job in &config.jobs {
        println!("Job: {}", job.source);
        if let Some(attendee) = &job.attendee {
            println!("  add attendee  {}", attendee.email);
        }
        for target in &job.targets {
            println!("  mirror -> {} ({})", target.calendar_id, target.mode);
        }
        if let Some(backup) = &job.backup_calendar {
            println!("  backup -> {}", backup);
        }
    }

    let validation = config.validate();
    for warning in &validation.warnings {
        println!("warning: {}", warning);
    }
    for error in &validation.errors {
        println!("error:   {}", error);
    }
    if !validation.is_valid() {
        anyhow::bail!("configuration has {} error(s)", validation.errors.len());
    }
    Ok(())
}
