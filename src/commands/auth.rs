use anyhow::Result;

use calmirror_auth::{GoogleOAuth2Provider, TokenStorage, GOOGLE_SERVICE};
use calmirror_core::Config;

pub async fn login() -> Result<()> {
    let (config, _) = Config::load_validated()?;
    let provider = GoogleOAuth2Provider::new(&config.google)?;
    let storage = TokenStorage::new(&config.config_dir);

    println!("Authenticating with Google...");
    let token = provider.authenticate(&storage).await?;

    println!("\nAuthenticated. Granted scopes:");
    for scope in &token.scopes {
        println!("  {}", scope);
    }
    println!("\nRun `calmirror calendars` to find calendar ids for config.toml.");
    Ok(())
}

pub fn logout() -> Result<()> {
    let config = Config::load()?;
    let storage = TokenStorage::new(&config.config_dir);

    if !storage.has_token(GOOGLE_SERVICE) {
        println!("Not signed in.");
        return Ok(());
    }
    storage.delete_token(GOOGLE_SERVICE)?;
    println!("Signed out.");
    Ok(())
}
