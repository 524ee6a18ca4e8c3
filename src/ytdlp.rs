#![forbid(unsafe_code)]

//! Wrapper around the external yt-dlp binary: format listing, direct-URL
//! resolution, and blocking downloads.
//!
//! yt-dlp does all the heavy lifting; this module shapes its
//! `--dump-single-json` output into the records the HTTP layer serves.
//! Cookies and the configured User-Agent are applied to every invocation so
//! a restricted video behaves the same across all operations.

use crate::config::{RuntimeSettings, USER_AGENT};
use crate::resolve::{Attempt, first_success};
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
#[cfg(test)]
use std::sync::{Mutex, MutexGuard};

/// Selector handed to yt-dlp when the client does not pick a format: best
/// progressive mp4 for `<video>` compatibility, else best available.
pub const DEFAULT_FORMAT_SELECTOR: &str = "best[ext=mp4]/best";

#[cfg(test)]
static YT_DLP_STUB: Mutex<Option<PathBuf>> = Mutex::new(None);
#[cfg(test)]
static STUB_USE_LOCK: Mutex<()> = Mutex::new(());

fn yt_dlp_command() -> Command {
    #[cfg(test)]
    {
        if let Some(path) = YT_DLP_STUB.lock().unwrap().clone() {
            return Command::new(path);
        }
    }
    Command::new("yt-dlp")
}

#[cfg(test)]
fn set_ytdlp_stub_path(path: PathBuf) -> YtDlpStubGuard {
    let guard = STUB_USE_LOCK.lock().unwrap();
    {
        let mut lock = YT_DLP_STUB.lock().unwrap();
        *lock = Some(path);
    }
    YtDlpStubGuard { lock: Some(guard) }
}

#[cfg(test)]
struct YtDlpStubGuard {
    lock: Option<MutexGuard<'static, ()>>,
}

#[cfg(test)]
impl Drop for YtDlpStubGuard {
    fn drop(&mut self) {
        *YT_DLP_STUB.lock().unwrap() = None;
        self.lock.take();
    }
}

/// Runs `<name> --version` to fail loudly at startup when yt-dlp is missing.
pub fn ensure_program_available(name: &str) -> Result<()> {
    let status = Command::new(name)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!("{} is installed but returned a failure status", name),
        Err(err) => bail!("{} is not installed or not in PATH: {}", name, err),
    }
}

/// One encoding/container variant as reported by yt-dlp. Everything is left
/// optional because extractors for different sites fill different subsets.
#[derive(Debug, Clone, Deserialize)]
pub struct FormatDescriptor {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub fps: Option<f64>,
    pub tbr: Option<f64>,
    pub height: Option<i64>,
    pub width: Option<i64>,
    pub filesize: Option<i64>,
    pub url: Option<String>,
}

/// Display projection of one format for the quality picker.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FormatChoice {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub label: String,
}

/// Subset of the `--dump-single-json` payload this service reads.
#[derive(Debug, Deserialize)]
pub struct VideoDump {
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub thumbnail: Option<String>,
    /// Top-level direct URL; present when the selected format is a single
    /// progressive stream.
    pub url: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatDescriptor>,
    #[serde(default)]
    requested_downloads: Vec<RequestedDownload>,
    #[serde(rename = "_filename")]
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequestedDownload {
    filepath: Option<String>,
    #[serde(rename = "_filename")]
    filename: Option<String>,
}

/// A playable URL plus the metadata the player overlays on top of it.
#[derive(Debug, Clone, Serialize)]
pub struct DirectUrl {
    pub url: String,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub thumbnail: Option<String>,
}

/// Handle over the yt-dlp binary, carrying the per-process options that must
/// apply to every invocation.
pub struct YtDlp {
    cookies_file: Option<PathBuf>,
}

impl YtDlp {
    pub fn new(settings: &RuntimeSettings) -> Self {
        Self {
            cookies_file: settings.cookies_file.clone(),
        }
    }

    fn base_command(&self) -> Command {
        let mut command = yt_dlp_command();
        command
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg("--socket-timeout")
            .arg("15")
            .arg("--user-agent")
            .arg(USER_AGENT);
        if let Some(cookies) = &self.cookies_file
            && cookies.exists()
        {
            command
                .arg("--cookies")
                .arg(cookies.to_string_lossy().to_string());
        }
        command
    }

    fn run_dump(&self, mut command: Command, url: &str) -> Result<VideoDump> {
        let output = command
            .output()
            .with_context(|| format!("running yt-dlp for {}", url))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "yt-dlp failed for {} (status {}): {}",
                url,
                output.status,
                stderr.trim()
            );
        }

        serde_json::from_slice(&output.stdout).context("deserializing yt-dlp JSON")
    }

    /// Fetches the full info dump without downloading anything.
    pub fn dump_info(&self, url: &str, format_selector: Option<&str>) -> Result<VideoDump> {
        let mut command = self.base_command();
        command.arg("--dump-single-json").arg("--skip-download");
        if let Some(selector) = format_selector {
            command.arg("-f").arg(selector);
        }
        // `--` keeps an option-shaped url value from being parsed as a
        // yt-dlp option.
        command.arg("--").arg(url);
        self.run_dump(command, url)
    }

    /// Lists every available format, sorted best-first.
    pub fn list_formats(&self, url: &str) -> Result<Vec<FormatDescriptor>> {
        let dump = self.dump_info(url, None)?;
        let mut formats = dump.formats;
        sort_formats(&mut formats);
        Ok(formats)
    }

    /// Resolves a playable direct URL for the requested (or default) format.
    pub fn resolve_direct_url(&self, url: &str, format_id: Option<&str>) -> Result<DirectUrl> {
        let selector = format_id.unwrap_or(DEFAULT_FORMAT_SELECTOR);
        let dump = self.dump_info(url, Some(selector))?;
        pick_direct_url(&dump)
    }

    /// Downloads the video into `downloads_dir` and returns the final file
    /// path. Blocks for the full transfer; no progress, no resumability.
    pub fn download(
        &self,
        url: &str,
        format_id: Option<&str>,
        downloads_dir: &Path,
    ) -> Result<PathBuf> {
        fs::create_dir_all(downloads_dir)
            .with_context(|| format!("creating {}", downloads_dir.display()))?;

        let selector = format_id.unwrap_or(DEFAULT_FORMAT_SELECTOR);
        let output_template = downloads_dir.join("%(title)s.%(ext)s");

        let started = std::time::SystemTime::now();
        let mut command = self.base_command();
        command
            .arg("--dump-single-json")
            .arg("--no-simulate")
            .arg("-f")
            .arg(selector)
            .arg("--output")
            .arg(output_template.to_string_lossy().to_string())
            .arg("--")
            .arg(url);

        let dump = self.run_dump(command, url)?;
        locate_downloaded_file(&dump, downloads_dir, started)
    }
}

/// Stable descending sort by `(height, tbr)`, unknown values ranked as zero.
pub fn sort_formats(formats: &mut [FormatDescriptor]) {
    formats.sort_by(|a, b| {
        let height_a = a.height.unwrap_or(0);
        let height_b = b.height.unwrap_or(0);
        height_b.cmp(&height_a).then_with(|| {
            let tbr_a = a.tbr.unwrap_or(0.0);
            let tbr_b = b.tbr.unwrap_or(0.0);
            tbr_b
                .partial_cmp(&tbr_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
}

/// Projects sorted formats down to the `{format_id, ext, label}` triples the
/// quality picker renders.
pub fn simplified_formats(formats: &[FormatDescriptor]) -> Vec<FormatChoice> {
    formats
        .iter()
        .map(|format| FormatChoice {
            format_id: format.format_id.clone(),
            ext: format.ext.clone(),
            label: display_label(format),
        })
        .collect()
}

/// Pipe-joined human label: resolution, frame rate, bitrate when known, then
/// always both codecs.
fn display_label(format: &FormatDescriptor) -> String {
    let mut parts = Vec::new();
    if let Some(height) = format.height.filter(|height| *height > 0) {
        parts.push(format!("{height}p"));
    }
    if let Some(fps) = format.fps.filter(|fps| *fps > 0.0) {
        parts.push(format!("{}fps", fps as i64));
    }
    if let Some(tbr) = format.tbr.filter(|tbr| *tbr > 0.0) {
        parts.push(format!("{}kbps", tbr as i64));
    }
    parts.push(format!("v:{}", codec_or_none(format.vcodec.as_deref())));
    parts.push(format!("a:{}", codec_or_none(format.acodec.as_deref())));
    parts.join(" | ")
}

fn codec_or_none(codec: Option<&str>) -> &str {
    match codec {
        Some(value) if !value.is_empty() => value,
        _ => "none",
    }
}

/// Three-tier direct-URL selection. Progressive streams carry a top-level
/// URL; DASH delivery requires picking a specific format, where mp4 wins for
/// `<video>` compatibility.
fn pick_direct_url(dump: &VideoDump) -> Result<DirectUrl> {
    let mut top_level = || match &dump.url {
        Some(url) => Attempt::Success(url.clone()),
        None => Attempt::Failure("no top-level URL in dump".into()),
    };
    let mut mp4_format = || {
        dump.formats
            .iter()
            .find(|format| format.ext.as_deref() == Some("mp4") && format.url.is_some())
            .and_then(|format| format.url.clone())
            .map(Attempt::Success)
            .unwrap_or_else(|| Attempt::Failure("no mp4 format carries a URL".into()))
    };
    let mut any_format = || {
        dump.formats
            .iter()
            .find_map(|format| format.url.clone())
            .map(Attempt::Success)
            .unwrap_or_else(|| Attempt::Failure("no format carries a URL".into()))
    };

    let url = first_success(
        "direct URL selection",
        &mut [
            ("top-level", &mut top_level),
            ("mp4 format", &mut mp4_format),
            ("any format", &mut any_format),
        ],
    )
    .ok_or_else(|| anyhow!("no direct URL available"))?;

    Ok(DirectUrl {
        url,
        title: dump.title.clone(),
        uploader: dump.uploader.clone(),
        thumbnail: dump.thumbnail.clone(),
    })
}

/// Figures out where yt-dlp actually put the file. The dump's
/// `requested_downloads` carries the post-merge path; older payload fields
/// and a scan for files written during this transfer cover the rest.
fn locate_downloaded_file(
    dump: &VideoDump,
    downloads_dir: &Path,
    started: std::time::SystemTime,
) -> Result<PathBuf> {
    let reported = dump
        .requested_downloads
        .iter()
        .find_map(|entry| entry.filepath.clone().or_else(|| entry.filename.clone()))
        .or_else(|| dump.filename.clone());

    if let Some(path) = reported {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    newest_file_in(downloads_dir, started)?
        .ok_or_else(|| anyhow!("download finished but no file found in downloads directory"))
}

/// Newest regular file in `dir` touched at or after `since`. The downloads
/// directory is shared across requests, so files from earlier transfers must
/// not be picked up.
fn newest_file_in(dir: &Path, since: std::time::SystemTime) -> Result<Option<PathBuf>> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if modified < since {
            continue;
        }
        if newest
            .as_ref()
            .is_none_or(|(current, _)| modified > *current)
        {
            newest = Some((modified, entry.path()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}
