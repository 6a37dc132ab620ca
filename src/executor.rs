//! Runs the actual download for one item, a window of a collection, or a
//! whole collection, and maps the tool's output onto the session sink.

use crate::classify::{self, ErrorKind};
use crate::events::SessionSink;
use crate::progress::parse_progress_line;
use crate::registry::CancelToken;
use crate::runner::{Stream, ToolContext};
use crate::session::{DownloadRequest, MediaKind};
use crate::ytdlp::{self, CookieSource, PlaylistScope, YtDlpArgs};
use crate::{EngineError, Result};
use std::path::Path;

pub fn download_args(
    ctx: &ToolContext,
    request: &DownloadRequest,
    url: &str,
    destination: &Path,
    scope: PlaylistScope,
    cookies: &CookieSource,
) -> Vec<String> {
    let mut args = YtDlpArgs::new();
    args = match request.media_kind {
        MediaKind::Audio => args
            .flag("-x")
            .opt("--audio-format", request.container_format.clone())
            .opt("--audio-quality", "0"),
        MediaKind::Video => args
            .opt(
                "-f",
                ytdlp::format_selector(request.desired_resolution, request.allow_lower_resolution),
            )
            .opt("--merge-output-format", request.container_format.clone()),
    };
    if let Some(ffmpeg) = ctx.tools.ffmpeg.as_deref() {
        args = args.opt_path("--ffmpeg-location", ffmpeg);
    }
    args.opt_path("-o", &destination.join(ytdlp::OUTPUT_TEMPLATE))
        .scope(scope)
        .cookies(cookies)
        .anti_bot(ytdlp::DOWNLOAD_RETRIES)
        .throttle(1, 5)
        .flag("--progress")
        .flag("--newline")
        .url(url)
}

/// Downloads a single item (`--no-playlist`).
pub fn download_one(
    ctx: &ToolContext,
    token: &CancelToken,
    sink: &dyn SessionSink,
    item_url: &str,
    request: &DownloadRequest,
    destination: &Path,
) -> Result<()> {
    download_target(
        ctx,
        token,
        sink,
        item_url,
        request,
        destination,
        PlaylistScope::Single,
    )
}

pub fn download_target(
    ctx: &ToolContext,
    token: &CancelToken,
    sink: &dyn SessionSink,
    url: &str,
    request: &DownloadRequest,
    destination: &Path,
    scope: PlaylistScope,
) -> Result<()> {
    token.check()?;
    let cookies = ctx.cookie_source(request.cookie_file().map(|p| p.as_path()));
    let args = download_args(ctx, request, url, destination, scope, &cookies);
    let session = token.session().clone();

    let mut classified: Option<ErrorKind> = None;
    let mut reported_file_in_use = false;
    let output = ctx.run_yt_dlp(token, &args, &mut |stream, line| match stream {
        Stream::Stdout => {
            if let Some(event) = parse_progress_line(line) {
                sink.progress(&session, &event);
            }
            sink.log(&session, line);
        }
        Stream::Stderr => {
            let Some(kind) = classify::classify(line) else {
                sink.log(&session, line);
                return;
            };
            classified.get_or_insert(kind);
            match kind {
                ErrorKind::FileLocked => {
                    if !reported_file_in_use {
                        let name = classify::locked_file_name(line)
                            .unwrap_or_else(|| "destination file".to_string());
                        sink.file_in_use(&session, &name);
                        reported_file_in_use = true;
                    }
                }
                ErrorKind::DiskFull => {
                    sink.log(&session, &format!("Disk full: {}", kind.remediation()));
                }
                _ if kind.suppresses_raw_line() => {
                    sink.log(&session, &format!("{}. {}", kind.summary(), kind.remediation()));
                }
                _ => sink.log(&session, line),
            }
        }
    })?;

    if output.success() {
        return Ok(());
    }
    if let Some(kind) = classified {
        return Err(EngineError::Classified {
            kind,
            detail: output.stderr,
        });
    }
    Err(EngineError::ExternalToolFailed {
        tool: ytdlp::TOOL_NAME.to_string(),
        code: output.status.code,
        stderr: output.stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Preferences;
    use crate::paths::ToolPaths;
    use crate::process::SystemLauncher;
    use crate::session::Resolution;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn ctx() -> ToolContext {
        ToolContext::new(
            Arc::new(SystemLauncher),
            ToolPaths::new("yt-dlp").with_ffmpeg("/opt/ffmpeg"),
            Preferences::default(),
        )
    }

    #[test]
    fn video_args_use_strict_selector_and_merge_format() {
        let mut request = DownloadRequest::video("u", Resolution::Height(1080));
        request.container_format = "mkv".to_string();
        let args = download_args(
            &ctx(),
            &request,
            "https://www.youtube.com/watch?v=abc",
            Path::new("/downloads"),
            PlaylistScope::Single,
            &CookieSource::File(PathBuf::from("/c/cookies.txt")),
        );
        let joined = args.join(" ");
        assert!(joined.starts_with(
            "-f bestvideo[height<=1080]+bestaudio/best[height<=1080] --merge-output-format mkv --ffmpeg-location /opt/ffmpeg"
        ));
        assert!(joined.contains("--no-playlist"));
        assert!(joined.contains("--cookies /c/cookies.txt"));
        assert!(!joined.contains("--cookies-from-browser"));
        assert!(joined.contains("--progress --newline"));
        let out_idx = args.iter().position(|a| a == "-o").expect("-o");
        assert_eq!(
            PathBuf::from(&args[out_idx + 1]),
            Path::new("/downloads").join("%(title)s.%(ext)s")
        );
    }

    #[test]
    fn audio_args_extract_with_best_quality() {
        let request = DownloadRequest::audio("u", "mp3");
        let args = download_args(
            &ctx(),
            &request,
            "u",
            Path::new("/d"),
            PlaylistScope::Window { start: 1, end: 200 },
            &CookieSource::Browser("firefox".to_string()),
        );
        let joined = args.join(" ");
        assert!(joined.starts_with("-x --audio-format mp3 --audio-quality 0"));
        assert!(!joined.contains("-f "));
        assert!(joined.contains("--playlist-start 1 --playlist-end 200"));
        assert!(joined.contains("--cookies-from-browser firefox"));
    }

    #[test]
    fn lower_resolution_allowed_adds_fallback_selector() {
        let mut request = DownloadRequest::video("u", Resolution::Height(720));
        request.allow_lower_resolution = true;
        let args = download_args(
            &ctx(),
            &request,
            "u",
            Path::new("/d"),
            PlaylistScope::Capped(1000),
            &CookieSource::None,
        );
        assert_eq!(
            args[1],
            "bestvideo[height<=720]+bestaudio/best[height<=720]/bestvideo+bestaudio/best"
        );
        assert!(args.join(" ").contains("--playlist-end 1000"));
    }
}
