//! User preferences stored as JSON under the app's config directory.

use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_PLAYLIST_LIMIT: u32 = 1000;
pub const MAX_PLAYLIST_LIMIT: u32 = 10_000;

/// Flat preference document shared with the desktop shell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default = "default_playlist_limit")]
    pub playlist_limit: u32,
    /// Browser executable used as cookie source; empty means auto-detect.
    #[serde(default)]
    pub browser_path: String,
    #[serde(default = "default_true")]
    pub use_browser_cookies: bool,
    #[serde(default)]
    pub cookies_file_path: String,
    #[serde(default)]
    pub default_download_path: String,
    #[serde(default)]
    pub no_playlist_folder: bool,
}

fn default_playlist_limit() -> u32 {
    DEFAULT_PLAYLIST_LIMIT
}

fn default_true() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            playlist_limit: DEFAULT_PLAYLIST_LIMIT,
            browser_path: String::new(),
            use_browser_cookies: true,
            cookies_file_path: String::new(),
            default_download_path: String::new(),
            no_playlist_folder: false,
        }
    }
}

impl Preferences {
    pub fn effective_playlist_limit(&self) -> u32 {
        clamp_playlist_limit(self.playlist_limit)
    }

    pub fn default_download_dir(&self) -> Option<PathBuf> {
        let trimmed = self.default_download_path.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(PathBuf::from(trimmed))
    }

    pub fn cookies_file(&self) -> Option<PathBuf> {
        let trimmed = self.cookies_file_path.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(PathBuf::from(trimmed))
    }

    /// yt-dlp `--cookies-from-browser` value, or `None` when browser cookies
    /// are turned off.
    pub fn cookie_browser(&self) -> Option<String> {
        if !self.use_browser_cookies {
            return None;
        }
        Some(detect_browser(&self.browser_path))
    }
}

pub fn clamp_playlist_limit(value: u32) -> u32 {
    value.clamp(1, MAX_PLAYLIST_LIMIT)
}

pub fn load_preferences(paths: &AppPaths) -> Result<Preferences> {
    let path = paths.preferences_path();
    if !path.exists() {
        return Ok(Preferences::default());
    }
    let bytes = std::fs::read(&path)?;
    let mut parsed: Preferences = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::InvalidRequest(format!(
            "failed to parse preferences at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    parsed.playlist_limit = clamp_playlist_limit(parsed.playlist_limit);
    Ok(parsed)
}

pub fn save_preferences(paths: &AppPaths, prefs: &Preferences) -> Result<()> {
    let path = paths.preferences_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(prefs)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}

/// Maps a configured browser executable to the name yt-dlp expects.
/// Anything unknown or missing falls back to auto-detection.
pub fn detect_browser(preference: &str) -> String {
    let preference = preference.trim();
    let looks_like_path =
        preference.contains('\\') || preference.contains('/') || preference.ends_with(".exe");
    if looks_like_path {
        let path = Path::new(preference);
        if path.exists() {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            return browser_for_executable(&stem).to_string();
        }
        log::warn!("browser not found at {preference}, auto-detecting");
    }
    auto_detect_browser().to_string()
}

fn browser_for_executable(stem: &str) -> &'static str {
    match stem {
        "brave" => "brave",
        "chromium" => "chromium",
        "msedge" => "edge",
        "firefox" => "firefox",
        "opera" => "opera",
        "safari" => "safari",
        "vivaldi" => "vivaldi",
        "whale" => "whale",
        _ => "chrome",
    }
}

#[cfg(windows)]
fn auto_detect_browser() -> &'static str {
    let program_files = std::env::var("PROGRAMFILES").unwrap_or_else(|_| "C:\\Program Files".to_string());
    let local = std::env::var("LOCALAPPDATA").unwrap_or_default();
    let candidates: [(&str, PathBuf); 5] = [
        (
            "brave",
            Path::new(&local).join("BraveSoftware/Brave-Browser/Application/brave.exe"),
        ),
        (
            "edge",
            Path::new(&program_files).join("Microsoft/Edge/Application/msedge.exe"),
        ),
        (
            "chrome",
            Path::new(&local).join("Google/Chrome/Application/chrome.exe"),
        ),
        (
            "firefox",
            Path::new(&program_files).join("Mozilla Firefox/firefox.exe"),
        ),
        ("opera", Path::new(&local).join("Programs/Opera/opera.exe")),
    ];
    candidates
        .iter()
        .find(|(_, path)| path.exists())
        .map(|(name, _)| *name)
        .unwrap_or("chrome")
}

#[cfg(not(windows))]
fn auto_detect_browser() -> &'static str {
    "chrome"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_preferences_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let prefs = load_preferences(&paths).expect("load");
        assert_eq!(prefs, Preferences::default());
        assert!(prefs.use_browser_cookies);
        assert_eq!(prefs.effective_playlist_limit(), DEFAULT_PLAYLIST_LIMIT);
    }

    #[test]
    fn preferences_round_trip_and_clamp_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("config dir");
        std::fs::write(
            paths.preferences_path(),
            r#"{"playlistLimit": 50000, "useBrowserCookies": false, "defaultDownloadPath": "/tmp/dl"}"#,
        )
        .expect("write");

        let prefs = load_preferences(&paths).expect("load");
        assert_eq!(prefs.playlist_limit, MAX_PLAYLIST_LIMIT);
        assert!(!prefs.use_browser_cookies);
        assert_eq!(prefs.cookie_browser(), None);
        assert_eq!(prefs.default_download_dir(), Some(PathBuf::from("/tmp/dl")));

        let mut next = prefs.clone();
        next.cookies_file_path = "cookies.txt".to_string();
        save_preferences(&paths, &next).expect("save");
        let raw = std::fs::read_to_string(paths.preferences_path()).expect("read");
        assert!(raw.contains("\"cookiesFilePath\": \"cookies.txt\""));
        assert_eq!(load_preferences(&paths).expect("reload"), next);
    }

    #[test]
    fn invalid_preferences_name_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("config dir");
        std::fs::write(paths.preferences_path(), "{not json").expect("write");
        let err = load_preferences(&paths).err().expect("error");
        assert!(err.to_string().contains("preferences.json"));
    }

    #[test]
    fn clamp_playlist_limit_bounds() {
        assert_eq!(clamp_playlist_limit(0), 1);
        assert_eq!(clamp_playlist_limit(250), 250);
        assert_eq!(clamp_playlist_limit(10_001), MAX_PLAYLIST_LIMIT);
    }

    #[test]
    fn detect_browser_maps_existing_executables() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exe = dir.path().join("msedge.exe");
        std::fs::write(&exe, b"").expect("exe");
        assert_eq!(detect_browser(&exe.to_string_lossy()), "edge");

        let unknown = dir.path().join("netsurf.exe");
        std::fs::write(&unknown, b"").expect("exe");
        assert_eq!(detect_browser(&unknown.to_string_lossy()), "chrome");
    }
}
