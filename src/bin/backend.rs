#![forbid(unsafe_code)]

//! HTTP frontend for tubegate: paste a YouTube URL, get metadata, a format
//! list, a playable direct URL, or the downloaded file.
//!
//! Every failure is rendered as HTTP 200 with an `{error}` JSON field. The
//! original service behaved that way and existing clients key off the field,
//! not the status code, so the shape is kept.

use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use axum::{
    Json, Router,
    body::Body,
    extract::{Form, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{fs::File, signal, task};
use tokio_util::io::ReaderStream;
use tubegate_tools::config::{
    RuntimeOverrides, RuntimeSettings, resolve_runtime_settings,
};
use tubegate_tools::extractor::extract_video_id;
use tubegate_tools::metadata::{MetadataResolver, remote_agent};
use tubegate_tools::security::ensure_not_root;
use tubegate_tools::ytdlp::{YtDlp, ensure_program_available, simplified_formats};

// Connectivity probes exposed by /check_connection.
const PROBE_YOUTUBE: &str = "https://www.youtube.com";
const PROBE_GOOGLE: &str = "https://www.google.com";
const PROBE_API: &str = "https://api.noembed.com";

#[derive(Debug, Clone)]
struct BackendArgs {
    settings: RuntimeSettings,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut overrides = RuntimeOverrides::default();
        for arg in iter {
            if let Some(value) = arg.strip_prefix("--downloads-dir=") {
                overrides.downloads_dir = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                overrides.tubegate_port = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                overrides.tubegate_host = Some(value.to_string());
                continue;
            }
            if let Some(value) = arg.strip_prefix("--cookies=") {
                overrides.cookies_file = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--api-key=") {
                overrides.youtube_api_key = Some(value.to_string());
                continue;
            }
            if let Some(value) = arg.strip_prefix("--env=") {
                overrides.env_path = Some(PathBuf::from(value));
                continue;
            }
            bail!("unknown argument: {arg}");
        }

        let settings = resolve_runtime_settings(overrides)?;
        Ok(Self { settings })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .with_context(|| format!("invalid port: {value}"))
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TUBEGATE_HOST")
}

#[derive(Clone)]
struct AppState {
    settings: Arc<RuntimeSettings>,
    resolver: Arc<MetadataResolver>,
    ytdlp: Arc<YtDlp>,
}

impl AppState {
    fn new(settings: RuntimeSettings) -> Self {
        let resolver = MetadataResolver::new(&settings);
        let ytdlp = YtDlp::new(&settings);
        Self {
            settings: Arc::new(settings),
            resolver: Arc::new(resolver),
            ytdlp: Arc::new(ytdlp),
        }
    }
}

/// User-visible failure. Always serialized as HTTP 200 with an `error` field;
/// see the module docs for why the status code stays 200.
#[derive(Debug)]
struct ApiError {
    message: String,
}

impl ApiError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(json!({"error": self.message}))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Form body shared by every POST route. `url` is checked per-handler so the
/// missing-field message stays exactly `"URL required"`.
#[derive(Debug, Deserialize)]
struct VideoRequest {
    url: Option<String>,
    format_id: Option<String>,
}

fn require_url(form: &VideoRequest) -> ApiResult<String> {
    form.url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::new("URL required"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let BackendArgs { settings } = BackendArgs::parse()?;

    ensure_not_root("backend")?;

    // Metadata lookups and /check_connection still work without yt-dlp, so a
    // missing binary is a warning rather than a startup failure.
    if let Err(err) = ensure_program_available("yt-dlp") {
        eprintln!("Warning: {err}; format and download routes will fail");
    }

    fs::create_dir_all(&settings.downloads_dir)
        .with_context(|| format!("creating {}", settings.downloads_dir.display()))?;

    let host = parse_host_arg(&settings.tubegate_host)?;
    let port = settings.tubegate_port;
    let state = AppState::new(settings);

    let app = Router::new()
        .route("/get_info", post(get_info))
        .route("/get_formats", post(get_formats))
        .route("/get_video_url", post(get_video_url))
        .route("/download", post(download))
        .route("/check_connection", get(check_connection))
        .with_state(state);

    let addr = SocketAddr::new(host, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    println!("tubegate listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown is affected when this fails; Ctrl+C still kills
    // the process.
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

async fn get_info(
    State(state): State<AppState>,
    Form(form): Form<VideoRequest>,
) -> ApiResult<Json<Value>> {
    let url = require_url(&form)?;
    let video_id = extract_video_id(&url).ok_or_else(|| ApiError::new("Invalid YouTube URL"))?;

    let resolver = state.resolver.clone();
    let id_for_lookup = video_id.clone();
    // The chain is total: worst case it degrades to the synthetic record.
    let info = task::spawn_blocking(move || resolver.resolve(&id_for_lookup))
        .await
        .map_err(|err| ApiError::new(format!("Unexpected error: {err}")))?;

    Ok(Json(json!({
        "success": true,
        "info": {
            "title": info.title,
            "uploader": info.uploader,
            "duration": info.duration,
            "thumbnail": info.thumbnail,
            "video_id": video_id,
        }
    })))
}

async fn get_formats(
    State(state): State<AppState>,
    Form(form): Form<VideoRequest>,
) -> ApiResult<Json<Value>> {
    let url = require_url(&form)?;

    let ytdlp = state.ytdlp.clone();
    let formats = task::spawn_blocking(move || ytdlp.list_formats(&url))
        .await
        .map_err(|err| ApiError::new(format!("Cannot list formats: {err}")))?
        .map_err(|err| ApiError::new(format!("Cannot list formats: {err:#}")))?;

    Ok(Json(json!({
        "success": true,
        "formats": simplified_formats(&formats),
    })))
}

async fn get_video_url(
    State(state): State<AppState>,
    Form(form): Form<VideoRequest>,
) -> ApiResult<Json<Value>> {
    let url = require_url(&form)?;
    let format_id = form.format_id.clone();

    let ytdlp = state.ytdlp.clone();
    let direct = task::spawn_blocking(move || ytdlp.resolve_direct_url(&url, format_id.as_deref()))
        .await
        .map_err(|err| ApiError::new(format!("Cannot build direct url: {err}")))?
        .map_err(|err| ApiError::new(format!("Cannot build direct url: {err:#}")))?;

    Ok(Json(json!({
        "success": true,
        "video_url": direct.url,
        "title": direct.title,
        "uploader": direct.uploader,
        "thumbnail": direct.thumbnail,
    })))
}

async fn download(
    State(state): State<AppState>,
    Form(form): Form<VideoRequest>,
) -> ApiResult<Response> {
    let url = require_url(&form)?;
    let format_id = form.format_id.clone();
    let downloads_dir = state.settings.downloads_dir.clone();

    let ytdlp = state.ytdlp.clone();
    // Blocking for the whole transfer: the request holds the download open.
    let path = task::spawn_blocking(move || {
        ytdlp.download(&url, format_id.as_deref(), &downloads_dir)
    })
    .await
    .map_err(|err| ApiError::new(format!("yt-dlp failed: {err}")))?
    .map_err(|err| ApiError::new(format!("yt-dlp failed: {err:#}")))?;

    serve_file_attachment(&path).await
}

/// Streams a downloaded file back as an attachment.
async fn serve_file_attachment(path: &std::path::Path) -> ApiResult<Response> {
    let file = File::open(path)
        .await
        .map_err(|err| ApiError::new(format!("Cannot open downloaded file: {err}")))?;

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    // Quotes stripped from the name keep the header parseable.
    let disposition = format!(
        "attachment; filename=\"{}\"",
        filename.replace('"', "")
    );

    let stream = ReaderStream::new(file);
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(stream))
        .map_err(|err| ApiError::new(format!("Cannot build response: {err}")))?;
    Ok(response)
}

/// A probe target only counts as accessible on an exact 200, matching what
/// clients of the original service expect from these booleans.
fn probe_success(result: Result<ureq::Response, ureq::Error>) -> bool {
    result
        .map(|response| response.status() == 200)
        .unwrap_or(false)
}

async fn check_connection(State(_state): State<AppState>) -> Json<Value> {
    let results = task::spawn_blocking(|| {
        let agent = remote_agent();
        let probe = |url: &str| probe_success(agent.get(url).call());
        (
            probe(PROBE_YOUTUBE),
            probe(PROBE_GOOGLE),
            probe(PROBE_API),
        )
    })
    .await
    .unwrap_or((false, false, false));

    Json(json!({
        "youtube_accessible": results.0,
        "google_accessible": results.1,
        "api_accessible": results.2,
    }))
}
