use anyhow::Result;

use calmirror_core::Config;

pub async fn run() -> Result<()> {
    let (config, _) = Config::load_validated()?;
    let token = super::access_token(&config).await?;
    let calendars = super::client(&config, &token).list_calendars().await?;

    if calendars.is_empty() {
        println!("No calendars found.");
        return Ok(());
    }

    for calendar in &calendars {
        let marker = if calendar.is_primary { "*" } else { " " };
        let writable = if calendar.access_role.can_write() { "" } else { " (read-only)" };
        println!(
            "{} {:<50} {:<30} {}{}",
            marker, calendar.id, calendar.summary, calendar.access_role, writable
        );
    }
    println!("\n* primary calendar (usable as \"primary\")");
    Ok(())
}
