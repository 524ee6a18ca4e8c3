#![forbid(unsafe_code)]

//! Video metadata lookup via a chain of public endpoints.
//!
//! Three remote sources are tried in priority order (noembed, vevio, the
//! YouTube Data API), each mapped from its own response schema. When every
//! remote source fails the resolver synthesizes a placeholder from the video
//! ID, so metadata resolution never errors out. Remote responses arrive in
//! two shapes: oEmbed-style summaries carrying a top-level `title`, and
//! listing-style payloads carrying an `items` array. Schema detection is the
//! presence of one of those fields.

use crate::config::{REMOTE_TIMEOUT_SECS, RuntimeSettings, USER_AGENT};
use crate::extractor::watch_url;
use crate::resolve::{Attempt, first_success};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const NOEMBED_URL: &str = "https://noembed.com/embed";
const VEVIO_URL: &str = "https://api.vevio.com/api/vevio/videos";
const GOOGLE_API_URL: &str = "https://youtube.googleapis.com/youtube/v3/videos";

pub const UNKNOWN_UPLOADER: &str = "Unknown";
pub const PLACEHOLDER_UPLOADER: &str = "Unknown Channel";

/// Everything the frontend needs to render one video. Every field has a
/// defined default so the record stays renderable even when all remote
/// sources fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetadata {
    pub title: String,
    pub uploader: String,
    pub duration: u64,
    pub thumbnail: Option<String>,
}

/// Builds the blocking HTTP agent used for every outbound metadata/probe
/// call: fixed User-Agent, hard per-call timeout.
pub fn remote_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(REMOTE_TIMEOUT_SECS))
        .build()
}

/// Remote metadata sources in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteSource {
    Noembed,
    Vevio,
    GoogleApi,
}

impl RemoteSource {
    fn label(self) -> &'static str {
        match self {
            RemoteSource::Noembed => "noembed",
            RemoteSource::Vevio => "vevio",
            RemoteSource::GoogleApi => "youtube-data-api",
        }
    }
}

/// Stateless per-request resolver over the remote metadata sources.
pub struct MetadataResolver {
    agent: ureq::Agent,
    youtube_api_key: Option<String>,
}

impl MetadataResolver {
    pub fn new(settings: &RuntimeSettings) -> Self {
        Self {
            agent: remote_agent(),
            youtube_api_key: settings.youtube_api_key.clone(),
        }
    }

    /// The chain this resolver will walk. Without a key the official API
    /// always answers 403, so it is left out of the chain entirely.
    fn remote_sources(&self) -> Vec<RemoteSource> {
        let mut sources = vec![RemoteSource::Noembed, RemoteSource::Vevio];
        if self.youtube_api_key.is_some() {
            sources.push(RemoteSource::GoogleApi);
        }
        sources
    }

    fn lookup(&self, source: RemoteSource, video_id: &str) -> Result<VideoMetadata> {
        match source {
            RemoteSource::Noembed => self.lookup_noembed(video_id),
            RemoteSource::Vevio => self.lookup_vevio(video_id),
            RemoteSource::GoogleApi => self.lookup_google(video_id),
        }
    }

    /// Resolves metadata for a video ID. Total: when the whole remote chain
    /// fails the synthetic placeholder is returned, never an error.
    pub fn resolve(&self, video_id: &str) -> VideoMetadata {
        let mut attempts: Vec<(&'static str, Box<dyn FnMut() -> Attempt<VideoMetadata> + '_>)> =
            self.remote_sources()
                .into_iter()
                .map(|source| {
                    let attempt: Box<dyn FnMut() -> Attempt<VideoMetadata> + '_> =
                        Box::new(move || Attempt::from_result(self.lookup(source, video_id)));
                    (source.label(), attempt)
                })
                .collect();
        let mut strategies: Vec<(&str, &mut (dyn FnMut() -> Attempt<VideoMetadata> + '_))> =
            attempts
            .iter_mut()
            .map(|(label, attempt)| (*label, attempt.as_mut()))
            .collect();

        first_success("metadata lookup", &mut strategies)
            .unwrap_or_else(|| placeholder_metadata(video_id))
    }

    fn lookup_noembed(&self, video_id: &str) -> Result<VideoMetadata> {
        let payload: RemotePayload = self
            .agent
            .get(NOEMBED_URL)
            .query("url", &watch_url(video_id))
            .call()
            .context("querying noembed")?
            .into_json()
            .context("parsing noembed response")?;
        metadata_from_payload(payload)
    }

    fn lookup_vevio(&self, video_id: &str) -> Result<VideoMetadata> {
        let payload: RemotePayload = self
            .agent
            .get(&format!("{VEVIO_URL}/{video_id}"))
            .call()
            .context("querying vevio")?
            .into_json()
            .context("parsing vevio response")?;
        metadata_from_payload(payload)
    }

    fn lookup_google(&self, video_id: &str) -> Result<VideoMetadata> {
        let key = self
            .youtube_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("no API key configured"))?;
        let payload: RemotePayload = self
            .agent
            .get(GOOGLE_API_URL)
            .query("part", "snippet,contentDetails")
            .query("id", video_id)
            .query("key", key)
            .call()
            .context("querying YouTube Data API")?
            .into_json()
            .context("parsing YouTube Data API response")?;
        metadata_from_payload(payload)
    }
}

/// Synthesizes renderable metadata from nothing but the video ID. The
/// thumbnail host serves a predictable URL per video, so a best-effort image
/// still loads even when every metadata endpoint is down.
pub fn placeholder_metadata(video_id: &str) -> VideoMetadata {
    VideoMetadata {
        title: format!("Video {video_id}"),
        uploader: PLACEHOLDER_UPLOADER.to_string(),
        duration: 0,
        thumbnail: Some(format!(
            "https://img.youtube.com/vi/{video_id}/hqdefault.jpg"
        )),
    }
}

/// The two remote response schemas. Untagged deserialization doubles as the
/// schema-detection predicate: a payload with an `items` array is a listing,
/// one with a top-level `title` is a summary, anything else is a strategy
/// failure.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RemotePayload {
    Listing(ListingPayload),
    Summary(SummaryPayload),
}

/// oEmbed-style shape shared by noembed and vevio.
#[derive(Debug, Deserialize)]
struct SummaryPayload {
    title: String,
    author_name: Option<String>,
    thumbnail_url: Option<String>,
}

/// YouTube Data API v3 shape. Only the first item's snippet is read.
#[derive(Debug, Deserialize)]
struct ListingPayload {
    items: Vec<ListingItem>,
}

#[derive(Debug, Deserialize)]
struct ListingItem {
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    title: String,
    #[serde(rename = "channelTitle")]
    channel_title: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    high: Option<ThumbnailEntry>,
}

#[derive(Debug, Deserialize)]
struct ThumbnailEntry {
    url: String,
}

/// Per-schema mapping into the uniform record. None of the remote sources
/// report a usable duration, so it is fixed at 0 here.
fn metadata_from_payload(payload: RemotePayload) -> Result<VideoMetadata> {
    match payload {
        RemotePayload::Summary(summary) => Ok(VideoMetadata {
            title: summary.title,
            uploader: summary
                .author_name
                .unwrap_or_else(|| UNKNOWN_UPLOADER.to_string()),
            duration: 0,
            thumbnail: summary.thumbnail_url,
        }),
        RemotePayload::Listing(listing) => {
            let item = listing
                .items
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("listing response carried no items"))?;
            Ok(VideoMetadata {
                title: item.snippet.title,
                uploader: item
                    .snippet
                    .channel_title
                    .unwrap_or_else(|| UNKNOWN_UPLOADER.to_string()),
                duration: 0,
                thumbnail: item.snippet.thumbnails.high.map(|entry| entry.url),
            })
        }
    }
}
