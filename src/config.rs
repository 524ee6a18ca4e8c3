#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_TUBEGATE_PORT: u16 = 5000;
pub const DEFAULT_TUBEGATE_HOST: &str = "127.0.0.1";
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";

/// Browser-like User-Agent sent with every outbound request and forwarded to
/// yt-dlp. Some endpoints reject the default library agent outright.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Per-request timeout for every remote metadata/probe call, in seconds.
pub const REMOTE_TIMEOUT_SECS: u64 = 10;

/// Read-only runtime configuration. Built once at startup and handed to every
/// collaborator explicitly; nothing reads ambient process state afterwards.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub downloads_dir: PathBuf,
    pub tubegate_port: u16,
    pub tubegate_host: String,
    pub youtube_api_key: Option<String>,
    pub cookies_file: Option<PathBuf>,
}

pub fn load_runtime_settings() -> Result<RuntimeSettings> {
    resolve_runtime_settings(RuntimeOverrides::default())
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub downloads_dir: Option<PathBuf>,
    pub tubegate_port: Option<u16>,
    pub tubegate_host: Option<String>,
    pub youtube_api_key: Option<String>,
    pub cookies_file: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeSettings> {
    build_runtime_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let downloads_dir = overrides
        .downloads_dir
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("DOWNLOADS_DIR", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_DOWNLOADS_DIR.to_string());
    let tubegate_port = overrides
        .tubegate_port
        .or_else(|| {
            lookup_value("TUBEGATE_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_TUBEGATE_PORT);
    let tubegate_host = overrides
        .tubegate_host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        })
        .or_else(|| lookup_value("TUBEGATE_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TUBEGATE_HOST.to_string());
    let youtube_api_key = overrides
        .youtube_api_key
        .or_else(|| lookup_value("YOUTUBE_API_KEY", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty());
    let cookies_file = overrides
        .cookies_file
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("COOKIES_FILE", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from);
    Ok(RuntimeSettings {
        downloads_dir: PathBuf::from(downloads_dir),
        tubegate_port,
        tubegate_host,
        youtube_api_key,
        cookies_file,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> RuntimeSettings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_settings(&vars, |_| None).unwrap()
    }

    #[test]
    fn load_runtime_settings_reads_port() {
        let settings = settings_from("TUBEGATE_PORT=\"4242\"\n");
        assert_eq!(settings.tubegate_port, 4242);
    }

    #[test]
    fn load_runtime_settings_applies_defaults() {
        let settings = settings_from("");
        assert_eq!(settings.tubegate_port, DEFAULT_TUBEGATE_PORT);
        assert_eq!(settings.tubegate_host, DEFAULT_TUBEGATE_HOST);
        assert_eq!(settings.downloads_dir, PathBuf::from(DEFAULT_DOWNLOADS_DIR));
        assert!(settings.youtube_api_key.is_none());
        assert!(settings.cookies_file.is_none());
    }

    #[test]
    fn load_runtime_settings_reads_host_and_paths() {
        let settings = settings_from(
            "TUBEGATE_HOST=\"0.0.0.0\"\nDOWNLOADS_DIR=\"/var/dl\"\nCOOKIES_FILE=\"/etc/cookies.txt\"\n",
        );
        assert_eq!(settings.tubegate_host, "0.0.0.0");
        assert_eq!(settings.downloads_dir, PathBuf::from("/var/dl"));
        assert_eq!(
            settings.cookies_file,
            Some(PathBuf::from("/etc/cookies.txt"))
        );
    }

    #[test]
    fn build_runtime_settings_prefers_env_over_file() {
        let vars = read_env_file(make_config("YOUTUBE_API_KEY=\"file-key\"\n").path()).unwrap();
        let settings = build_runtime_settings(&vars, |key| {
            if key == "YOUTUBE_API_KEY" {
                Some("env-key".to_string())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(settings.youtube_api_key.as_deref(), Some("env-key"));
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export DOWNLOADS_DIR="/media/dl"
            COOKIES_FILE='/tmp/cookies.txt'
            TUBEGATE_HOST =  "0.0.0.0"
            TUBEGATE_PORT=9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("DOWNLOADS_DIR").unwrap(), "/media/dl");
        assert_eq!(vars.get("COOKIES_FILE").unwrap(), "/tmp/cookies.txt");
        assert_eq!(vars.get("TUBEGATE_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("TUBEGATE_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn build_runtime_settings_override_precedence() {
        let mut vars = HashMap::new();
        vars.insert("DOWNLOADS_DIR".to_string(), "/file-dl".to_string());
        vars.insert("TUBEGATE_HOST".to_string(), "file-host".to_string());
        vars.insert("TUBEGATE_PORT".to_string(), "7000".to_string());

        let overrides = RuntimeOverrides {
            downloads_dir: Some(PathBuf::from("/override-dl")),
            tubegate_port: Some(9000),
            tubegate_host: Some("override-host".into()),
            ..RuntimeOverrides::default()
        };

        let settings = build_runtime_settings_with_overrides(
            &vars,
            |key| {
                if key == "TUBEGATE_PORT" {
                    Some("8000".to_string())
                } else {
                    None
                }
            },
            overrides,
        )
        .unwrap();

        assert_eq!(settings.downloads_dir, PathBuf::from("/override-dl"));
        assert_eq!(settings.tubegate_port, 9000);
        assert_eq!(settings.tubegate_host, "override-host");
    }

    #[test]
    fn build_runtime_settings_ignores_blank_host() {
        let vars = read_env_file(make_config("").path()).unwrap();
        let settings = build_runtime_settings_with_overrides(
            &vars,
            |_| None,
            RuntimeOverrides {
                tubegate_host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(settings.tubegate_host, DEFAULT_TUBEGATE_HOST);
    }

    #[test]
    fn build_runtime_settings_invalid_port_defaults() {
        let vars = read_env_file(make_config("TUBEGATE_PORT=\"nope\"\n").path()).unwrap();
        let settings = build_runtime_settings(&vars, |_| None).unwrap();
        assert_eq!(settings.tubegate_port, DEFAULT_TUBEGATE_PORT);
    }
}
