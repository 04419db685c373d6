use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "cinder";
pub const APP_NAME: &str = "engine";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine config directory"))?;
    Ok(dirs.config_dir().join("config.json"))
}

pub fn default_db_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("cinder.db"))
}

pub fn default_key_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("recipient.key"))
}
