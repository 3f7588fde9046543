use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::types::Settings;

/// Resolved locations of the dialogpress data directory.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Data directory (~/.dialogpress or local .dialogpress/)
    pub home: PathBuf,
    pub settings_file: PathBuf,
    pub log_file: PathBuf,
}

impl Paths {
    /// Resolve the data home:
    /// 1. DIALOGPRESS_HOME env var
    /// 2. local .dialogpress/ if it has settings.json
    /// 3. ~/.dialogpress/
    pub fn resolve(working_dir: &Path) -> Self {
        let home = if let Ok(env_home) = std::env::var("DIALOGPRESS_HOME") {
            PathBuf::from(env_home)
        } else {
            let local = working_dir.join(".dialogpress");
            if local.join("settings.json").exists() {
                local
            } else {
                dirs_home().join(".dialogpress")
            }
        };
        Self::at(home)
    }

    /// Paths rooted at an explicit directory.
    pub fn at(home: PathBuf) -> Self {
        Self {
            settings_file: home.join("settings.json"),
            log_file: home.join("logs/dialogpress.log"),
            home,
        }
    }

    pub fn ensure_log_dir(&self) -> Result<()> {
        if let Some(dir) = self.log_file.parent() {
            std::fs::create_dir_all(dir).context("Failed to create log dir")?;
        }
        Ok(())
    }
}

/// Get user home directory
fn dirs_home() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Load settings.json, apply env overrides, and validate.
pub fn get_settings(settings_file: &Path) -> Result<Settings> {
    let mut settings = read_settings_file(settings_file)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    validate_settings(&settings)?;
    Ok(settings)
}

fn read_settings_file(settings_file: &Path) -> Result<Settings> {
    if !settings_file.exists() {
        return Ok(Settings::default());
    }

    let data = std::fs::read_to_string(settings_file).context("Failed to read settings.json")?;

    match serde_json::from_str(&data) {
        Ok(s) => Ok(s),
        Err(e) => {
            warn!(
                file = %settings_file.display(),
                error = %e,
                "settings.json contains invalid JSON, using defaults"
            );
            Ok(Settings::default())
        }
    }
}

/// Credentials from the environment win over the file.
pub fn apply_env_overrides<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup("YANDEX_API_KEY").filter(|v| !v.trim().is_empty()) {
        settings.provider.api_key = Some(key);
    }
    if let Some(catalog) = lookup("YANDEX_CATALOG_ID").filter(|v| !v.trim().is_empty()) {
        settings.provider.catalog_id = Some(catalog);
    }
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    let c = &settings.compression;
    if c.threshold == 0 {
        bail!("compression.threshold must be at least 1");
    }
    if c.retain >= c.threshold {
        bail!(
            "compression.retain ({}) must be smaller than compression.threshold ({})",
            c.retain,
            c.threshold
        );
    }
    check_temperature("chat.temperature", settings.chat.temperature)?;
    check_temperature(
        "compression.summary_temperature",
        c.summary_temperature,
    )?;
    if settings.chat.max_tokens == 0 {
        bail!("chat.max_tokens must be at least 1");
    }
    if settings.provider.timeout_secs == 0 {
        bail!("provider.timeout_secs must be at least 1");
    }
    Ok(())
}

fn check_temperature(field: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("{} must be within [0, 1], got {}", field, value);
    }
    Ok(())
}

/// Mask a secret for display, keeping the last four characters.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}
