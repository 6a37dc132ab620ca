//! yt-dlp argument vocabulary shared by the prober, enumerator and executor.

use crate::session::Resolution;
use std::path::{Path, PathBuf};

pub const TOOL_NAME: &str = "yt-dlp";

pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ANTI_BOT_HEADERS: [&str; 4] = [
    "Accept:text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
    "Accept-Language:en-US,en;q=0.9",
    "Accept-Encoding:gzip, deflate, br",
    "Referer:https://www.youtube.com/",
];
const YOUTUBE_EXTRACTOR_ARGS: &str = "youtube:player_client=web,web_creator;skip=translated_subs";

pub const COLLECTION_DELIMITER: &str = "|||";
pub const FLAT_PLAYLIST_TEMPLATE: &str = "%(id)s|||%(title)s";
pub const HEIGHT_TEMPLATE: &str = "%(height)s";
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

pub const PROBE_RETRIES: u32 = 3;
pub const DOWNLOAD_RETRIES: u32 = 5;

/// `-f` value for a resolution. With `allow_fallback` the strict selector is
/// followed by an unrestricted best-quality alternative.
pub fn format_selector(resolution: Resolution, allow_fallback: bool) -> String {
    match resolution {
        Resolution::Best => "bestvideo+bestaudio/best".to_string(),
        Resolution::Height(h) => {
            let strict = format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]");
            if allow_fallback {
                format!("{strict}/bestvideo+bestaudio/best")
            } else {
                strict
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieSource {
    File(PathBuf),
    Browser(String),
    None,
}

impl CookieSource {
    /// An explicit cookie file wins over browser extraction.
    pub fn pick(cookie_file: Option<&Path>, browser: Option<String>) -> Self {
        match (cookie_file, browser) {
            (Some(file), _) => CookieSource::File(file.to_path_buf()),
            (None, Some(browser)) => CookieSource::Browser(browser),
            (None, None) => CookieSource::None,
        }
    }
}

/// Which part of a collection a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistScope {
    /// `--no-playlist`: only the addressed item.
    Single,
    /// `--playlist-start N --playlist-end M`, 1-based inclusive.
    Window { start: usize, end: usize },
    /// `--playlist-end LIMIT` for a one-shot collection run.
    Capped(u32),
}

#[derive(Debug, Clone, Default)]
pub struct YtDlpArgs {
    args: Vec<String>,
}

impl YtDlpArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(mut self, flag: &str) -> Self {
        self.args.push(flag.to_string());
        self
    }

    pub fn opt(mut self, name: &str, value: impl Into<String>) -> Self {
        self.args.push(name.to_string());
        self.args.push(value.into());
        self
    }

    pub fn opt_path(self, name: &str, value: &Path) -> Self {
        let value = value.to_string_lossy().to_string();
        self.opt(name, value)
    }

    pub fn cookies(self, source: &CookieSource) -> Self {
        match source {
            CookieSource::File(path) => self.opt_path("--cookies", path),
            CookieSource::Browser(browser) => self.opt("--cookies-from-browser", browser.clone()),
            CookieSource::None => self,
        }
    }

    pub fn anti_bot(mut self, retries: u32) -> Self {
        self = self.opt("--user-agent", USER_AGENT);
        for header in ANTI_BOT_HEADERS {
            self = self.opt("--add-header", header);
        }
        self.opt("--extractor-args", YOUTUBE_EXTRACTOR_ARGS)
            .opt("--extractor-retries", retries.to_string())
            .opt("--fragment-retries", retries.to_string())
    }

    pub fn throttle(self, min_secs: u32, max_secs: u32) -> Self {
        self.opt("--sleep-interval", min_secs.to_string())
            .opt("--max-sleep-interval", max_secs.to_string())
            .opt("--source-address", "0.0.0.0")
    }

    pub fn scope(self, scope: PlaylistScope) -> Self {
        match scope {
            PlaylistScope::Single => self.flag("--no-playlist"),
            PlaylistScope::Window { start, end } => self
                .opt("--playlist-start", start.to_string())
                .opt("--playlist-end", end.to_string()),
            PlaylistScope::Capped(limit) => self.opt("--playlist-end", limit.to_string()),
        }
    }

    pub fn url(mut self, url: &str) -> Vec<String> {
        self.args.push(url.to_string());
        self.args
    }
}
