#![forbid(unsafe_code)]

//! Shared library for the tubegate backend: URL identifier extraction, the
//! metadata fallback chain, and the yt-dlp collaborator wrapper.

pub mod config;
pub mod extractor;
pub mod metadata;
pub mod resolve;
pub mod security;
pub mod ytdlp;
