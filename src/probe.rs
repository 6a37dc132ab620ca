//! Resolution probing: asks yt-dlp which height a format selector would pick
//! without downloading anything.

use crate::registry::CancelToken;
use crate::runner::{Stream, ToolContext};
use crate::session::Resolution;
use crate::ytdlp::{self, CookieSource, PlaylistScope, YtDlpArgs};
use crate::Result;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub available_height: Option<u32>,
    pub accessible: bool,
}

impl ProbeOutcome {
    fn inaccessible() -> Self {
        Self {
            available_height: None,
            accessible: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "height")]
pub enum Verification {
    /// The requested height (or better) is available.
    Exact(u32),
    /// Only a lower height is available.
    Lower(u32),
    /// Could not be determined: private, removed, region-locked, or the
    /// tool printed nothing usable.
    Inaccessible,
}

pub fn probe_args(url: &str, desired_height: u32, allow_fallback: bool, cookies: &CookieSource) -> Vec<String> {
    YtDlpArgs::new()
        .opt(
            "-f",
            ytdlp::format_selector(Resolution::Height(desired_height), allow_fallback),
        )
        .opt("--print", ytdlp::HEIGHT_TEMPLATE)
        .scope(PlaylistScope::Single)
        .cookies(cookies)
        .anti_bot(ytdlp::PROBE_RETRIES)
        .url(url)
}

/// Only the final non-blank line is authoritative; yt-dlp may print
/// warnings or chatter before it.
pub fn parse_probe_output<'a>(lines: impl IntoIterator<Item = &'a str>) -> Option<u32> {
    let last = lines
        .into_iter()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()?;
    last.parse::<u32>().ok().filter(|h| *h > 0)
}

/// Errors only on cancellation or when the tool can't be started.
pub fn probe(
    ctx: &ToolContext,
    token: &CancelToken,
    url: &str,
    desired_height: u32,
    allow_fallback: bool,
    cookies: &CookieSource,
) -> Result<ProbeOutcome> {
    token.check()?;
    let args = probe_args(url, desired_height, allow_fallback, cookies);
    let mut stdout_lines: Vec<String> = Vec::new();
    let output = ctx.run_yt_dlp(token, &args, &mut |stream, line| {
        if stream == Stream::Stdout {
            stdout_lines.push(line.to_string());
        }
    })?;

    if !output.success() {
        log::debug!(
            "session {}: probe of {url} exited {:?}: {}",
            token.session(),
            output.status.code,
            output.stderr
        );
        return Ok(ProbeOutcome::inaccessible());
    }
    match parse_probe_output(stdout_lines.iter().map(String::as_str)) {
        Some(height) => Ok(ProbeOutcome {
            available_height: Some(height),
            accessible: true,
        }),
        None => Ok(ProbeOutcome::inaccessible()),
    }
}

/// Strict probe first; only when that fails, a fallback probe to learn what
/// is actually available. `height<=N` also matches smaller formats, so the
/// reported height is compared against the request either way.
pub fn verify(
    ctx: &ToolContext,
    token: &CancelToken,
    url: &str,
    desired_height: u32,
    cookies: &CookieSource,
) -> Result<Verification> {
    let strict = probe(ctx, token, url, desired_height, false, cookies)?;
    if let Some(height) = strict.available_height {
        return Ok(compare(height, desired_height));
    }

    token.check()?;
    let fallback = probe(ctx, token, url, desired_height, true, cookies)?;
    Ok(match fallback.available_height {
        Some(height) => compare(height, desired_height),
        None => Verification::Inaccessible,
    })
}

fn compare(available: u32, desired: u32) -> Verification {
    if available < desired {
        Verification::Lower(available)
    } else {
        Verification::Exact(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_integer_wins_over_chatter() {
        let lines = [
            "WARNING: [youtube] nsig extraction failed",
            "1080",
            "[info] something else",
            "720",
            "   ",
        ];
        assert_eq!(parse_probe_output(lines), Some(720));
    }

    #[test]
    fn non_numeric_tail_is_inconclusive() {
        assert_eq!(parse_probe_output(["720", "NA"]), None);
        assert_eq!(parse_probe_output(Vec::<&str>::new()), None);
        assert_eq!(parse_probe_output(["0"]), None);
    }

    #[test]
    fn probe_args_are_metadata_only() {
        let args = probe_args(
            "https://www.youtube.com/watch?v=abc",
            1080,
            false,
            &CookieSource::Browser("chrome".to_string()),
        );
        let joined = args.join(" ");
        assert!(joined.starts_with(
            "-f bestvideo[height<=1080]+bestaudio/best[height<=1080] --print %(height)s --no-playlist"
        ));
        assert!(joined.contains("--cookies-from-browser chrome"));
        assert!(joined.contains("--extractor-retries 3"));
        assert!(!joined.contains("--progress"));
        assert_eq!(
            args.last().map(String::as_str),
            Some("https://www.youtube.com/watch?v=abc")
        );
    }

    #[test]
    fn smaller_height_is_lower_even_from_strict_probe() {
        assert_eq!(compare(720, 1080), Verification::Lower(720));
        assert_eq!(compare(1080, 1080), Verification::Exact(1080));
        assert_eq!(compare(2160, 1080), Verification::Exact(2160));
    }

    #[test]
    fn fallback_probe_args_append_unrestricted_alternative() {
        let args = probe_args("u", 720, true, &CookieSource::None);
        assert_eq!(
            args[1],
            "bestvideo[height<=720]+bestaudio/best[height<=720]/bestvideo+bestaudio/best"
        );
    }
}
