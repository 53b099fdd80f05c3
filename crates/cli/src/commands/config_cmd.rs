//! `rcc config` — validate and inspect the resolved configuration.

use rcc_config::AppConfig;

pub fn validate() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    println!("configuration ok ({} radios)", config.radios.len());
    Ok(())
}

pub fn show() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    print!("{}", config.redacted().to_toml());
    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::default_path().display());
}
