use std::path::PathBuf;
use anyhow::{anyhow, Result};
use directories::{BaseDirs, ProjectDirs};

/// File name of the configuration store inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable overriding the configuration store location.
pub const CONFIG_ENV_VAR: &str = "TMAN_CONFIG";

pub fn get_global_config_dir() -> Result<PathBuf> {
    let (config_dir, _) = get_global_dirs()?;
    Ok(config_dir)
}

pub fn get_global_data_dir() -> Result<PathBuf> {
    let (_, data_dir) = get_global_dirs()?;
    Ok(data_dir)
}

/// Default location of the configuration store.
pub fn get_default_config_file() -> Result<PathBuf> {
    Ok(get_global_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Default base directory that git tools are cloned into.
pub fn get_default_install_dir() -> Result<PathBuf> {
    Ok(get_global_data_dir()?.join("tools"))
}

/// Default log file used by the scheduled update job.
pub fn get_default_log_file() -> Result<PathBuf> {
    Ok(get_global_data_dir()?.join("update.log"))
}

pub fn get_home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

pub fn get_global_dirs() -> Result<(PathBuf, PathBuf)> {
    let proj_dirs = ProjectDirs::from("org", "tman", "tman")
        .ok_or_else(|| anyhow!("Could not get project directories"))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    let data_dir = proj_dirs.data_dir().to_path_buf();

    Ok((config_dir, data_dir))
}
