use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use serde_json::{Map, Value as JsonValue};
use tokio::fs;
use tracing::info;

use super::output::OutputFormat;
use crate::cli::context::CliContext;
use crate::config::Config;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the configuration file path in use
    Path,

    /// Set configuration value, e.g. `link.retry_base_ms 1000`
    Set {
        /// Configuration key
        key: String,

        /// Configuration value
        value: String,
    },

    /// Get configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Reset configuration to defaults
    Reset,

    /// Validate configuration
    Validate,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let path = ctx.config_path().to_path_buf();
    match args.action {
        ConfigAction::Show => {
            let config = load_config_file(&path).await?;
            output.emit(&config, || {
                println!("Current configuration ({}):", path.display());
                match serde_yaml::to_string(&config) {
                    Ok(yaml) => println!("{yaml}"),
                    Err(err) => println!("<unprintable: {err}>"),
                }
            })?;
        }
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Set { key, value } => {
            let config = load_config_file(&path).await?;
            let mut json = serde_json::to_value(&config)?;
            let segments = split_key(&key)?;
            let parsed = parse_cli_value(&value);
            set_json_value(&mut json, &segments, parsed)?;
            let config: Config = serde_json::from_value(json)
                .with_context(|| format!("invalid value for {key}"))?;
            save_config_file(&path, &config).await?;
            info!("Updated configuration key {}", key);
            println!("Saved configuration to {}", path.display());
        }
        ConfigAction::Get { key } => {
            let config = load_config_file(&path).await?;
            let json = serde_json::to_value(&config)?;
            let segments = split_key(&key)?;
            match get_json_value(&json, &segments) {
                Some(value) => output.emit(value, || match value {
                    JsonValue::String(text) => println!("{text}"),
                    other => println!("{other}"),
                })?,
                None => bail!("configuration key '{}' not found", key),
            }
        }
        ConfigAction::Reset => {
            save_config_file(&path, &Config::default()).await?;
            println!("Reset configuration at {}", path.display());
        }
        ConfigAction::Validate => {
            let config = load_config_file(&path).await?;
            validate(&config)?;
            if fs::try_exists(&path).await? {
                println!("Configuration at {} is valid", path.display());
            } else {
                println!(
                    "No configuration file at {}; defaults are valid",
                    path.display()
                );
            }
        }
    }

    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    config
        .link
        .stream_url()
        .context("link.api_url / link.websocket_url")?;
    if config.link.retry_base_ms == 0 {
        bail!("link.retry_base_ms must be positive");
    }
    if config.link.retry_max_ms < config.link.retry_base_ms {
        bail!("link.retry_max_ms must not be below link.retry_base_ms");
    }
    if config.link.send_timeout_ms == 0 {
        bail!("link.send_timeout_ms must be positive");
    }
    routewatch_core_types::RunParams::new(config.run.decimate, config.run.speed)
        .context("run defaults")?;
    Ok(())
}

async fn load_config_file(path: &Path) -> Result<Config> {
    if fs::try_exists(path).await? {
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let config =
            serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

async fn save_config_file(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let serialized = serde_yaml::to_string(config)?;
    fs::write(path, serialized)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn parse_cli_value(raw: &str) -> JsonValue {
    serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()))
}

fn split_key(key: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = key
        .split('.')
        .filter(|segment| !segment.is_empty())
        .collect();
    if segments.is_empty() {
        bail!("configuration key cannot be empty");
    }
    Ok(segments)
}

fn set_json_value(target: &mut JsonValue, path: &[&str], value: JsonValue) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        bail!("configuration key cannot be empty");
    };
    let mut current = target;
    for segment in parents {
        current = {
            let map = ensure_object(current, segment)?;
            map.entry((*segment).to_string()).or_insert(JsonValue::Null)
        };
    }
    let map = ensure_object(current, last)?;
    map.insert((*last).to_string(), value);
    Ok(())
}

fn ensure_object<'a>(
    value: &'a mut JsonValue,
    segment: &str,
) -> Result<&'a mut Map<String, JsonValue>> {
    if value.is_null() {
        *value = JsonValue::Object(Map::new());
    }
    value.as_object_mut().ok_or_else(|| {
        anyhow!(
            "{} resolves to a non-object value; cannot assign nested configuration",
            segment
        )
    })
}

fn get_json_value<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut current = value;
    for segment in path {
        match current {
            JsonValue::Object(map) => {
                current = map.get(*segment)?;
            }
            _ => return None,
        }
    }
    Some(current)
}
