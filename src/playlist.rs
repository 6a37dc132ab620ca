//! Collection detection and flat enumeration of playlist items.

use crate::classify;
use crate::config;
use crate::registry::CancelToken;
use crate::runner::{Stream, ToolContext};
use crate::ytdlp::{self, CookieSource, PlaylistScope, YtDlpArgs};
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// One entry of an enumerated collection, in enumeration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionItem {
    pub item_id: String,
    pub title: String,
    pub resolved_url: String,
}

impl CollectionItem {
    pub fn new(item_id: impl Into<String>, title: impl Into<String>) -> Self {
        let item_id = item_id.into();
        let resolved_url = format!("https://www.youtube.com/watch?v={item_id}");
        Self {
            item_id,
            title: title.into(),
            resolved_url,
        }
    }
}

/// Playlists, mixes and channel lists: a `list` query parameter or a
/// `playlist` path segment.
pub fn is_collection_url(raw: &str) -> bool {
    match Url::parse(raw.trim()) {
        Ok(url) => {
            url.path().contains("playlist")
                || url
                    .query_pairs()
                    .any(|(key, value)| key == "list" && !value.is_empty())
        }
        Err(_) => raw.contains("playlist") || raw.contains("&list=") || raw.contains("?list="),
    }
}

pub fn enumerate_args(url: &str, limit: u32, cookies: &CookieSource) -> Vec<String> {
    YtDlpArgs::new()
        .flag("--flat-playlist")
        .opt("--print", ytdlp::FLAT_PLAYLIST_TEMPLATE)
        .scope(PlaylistScope::Capped(config::clamp_playlist_limit(limit)))
        .anti_bot(ytdlp::DOWNLOAD_RETRIES)
        .throttle(2, 5)
        .cookies(cookies)
        .url(url)
}

/// `id|||title`; anything without both parts is dropped.
pub fn parse_item_line(line: &str) -> Option<CollectionItem> {
    let (id, title) = line.trim().split_once(ytdlp::COLLECTION_DELIMITER)?;
    let id = id.trim();
    let title = title.trim();
    if id.is_empty() || title.is_empty() {
        return None;
    }
    Some(CollectionItem::new(id, title))
}

pub fn enumerate(
    ctx: &ToolContext,
    token: &CancelToken,
    url: &str,
    limit: u32,
    cookies: &CookieSource,
) -> Result<Vec<CollectionItem>> {
    token.check()?;
    let args = enumerate_args(url, limit, cookies);
    let mut items = Vec::new();
    let output = ctx.run_yt_dlp(token, &args, &mut |stream, line| {
        if stream == Stream::Stdout {
            if let Some(item) = parse_item_line(line) {
                items.push(item);
            }
        }
    })?;

    if !output.success() {
        if let Some(kind) = classify::classify(&output.stderr) {
            return Err(EngineError::Classified {
                kind,
                detail: output.stderr,
            });
        }
        return Err(EngineError::ExternalToolFailed {
            tool: ytdlp::TOOL_NAME.to_string(),
            code: output.status.code,
            stderr: output.stderr,
        });
    }

    log::info!(
        "session {}: enumerated {} items from {url}",
        token.session(),
        items.len()
    );
    Ok(items)
}
