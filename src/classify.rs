//! Best-effort classification of yt-dlp stderr text.
//!
//! Matching is plain case-insensitive substring search over an ordered table;
//! the first kind with a matching phrase wins. Unrelated messages that happen
//! to contain one of the phrases will be misclassified. Text that matches
//! nothing is reported as `None`, never as success.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CookieDatabaseLocked,
    CookieDecryptionFailed,
    AuthRequired,
    FileLocked,
    DiskFull,
}

impl ErrorKind {
    pub fn summary(&self) -> &'static str {
        match self {
            ErrorKind::CookieDatabaseLocked => "browser cookie database is locked",
            ErrorKind::CookieDecryptionFailed => "browser cookies could not be decrypted",
            ErrorKind::AuthRequired => "the site requires authentication",
            ErrorKind::FileLocked => "the output file is in use",
            ErrorKind::DiskFull => "not enough disk space",
        }
    }

    pub fn remediation(&self) -> &'static str {
        match self {
            ErrorKind::CookieDatabaseLocked => {
                "Close the browser completely and try again, or pick a cookies.txt file in the settings."
            }
            ErrorKind::CookieDecryptionFailed => {
                "Run the application elevated, switch to another browser, or export a cookies.txt file."
            }
            ErrorKind::AuthRequired => {
                "Sign in to the site in your browser, or re-export the cookies file, then retry."
            }
            ErrorKind::FileLocked => {
                "Close any program that is playing or editing the file, then retry."
            }
            ErrorKind::DiskFull => "Free some disk space and try again.",
        }
    }

    /// Kinds where the raw tool line is replaced by the hint instead of
    /// being forwarded.
    pub fn suppresses_raw_line(&self) -> bool {
        matches!(
            self,
            ErrorKind::FileLocked | ErrorKind::AuthRequired | ErrorKind::DiskFull
        )
    }
}

const CLASSIFIERS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::CookieDatabaseLocked,
        &["could not copy chrome cookie database", "database is locked"],
    ),
    (
        ErrorKind::CookieDecryptionFailed,
        &[
            "failed to decrypt with dpapi",
            "cookie decryption",
            "failed to decrypt",
        ],
    ),
    (
        ErrorKind::AuthRequired,
        &[
            "sign in to confirm",
            "login required",
            "requires authentication",
            "use --cookies",
            "members-only",
            "private video",
        ],
    ),
    (
        ErrorKind::FileLocked,
        &[
            "being used by another",
            "file is in use",
            "permission denied",
            "cannot create",
            "access denied",
            "cannot access the file",
            "the process cannot access",
            "used by another application",
        ],
    ),
    (
        ErrorKind::DiskFull,
        &[
            "no space left",
            "disk full",
            "insufficient disk space",
            "not enough space",
            "out of disk space",
        ],
    ),
];

pub fn classify(text: &str) -> Option<ErrorKind> {
    let lowered = text.to_lowercase();
    CLASSIFIERS
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|p| lowered.contains(p)))
        .map(|(kind, _)| *kind)
}

/// Pulls a quoted media file name out of a file-locked message.
pub fn locked_file_name(text: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| {
            Regex::new(
                r#"(?i)['"]([^'"]+\.(?:mp4|mp3|mkv|webm|m4a|opus|flac|wav|aac|avi|mov|flv|ogg))['"]?"#,
            )
            .ok()
        })
        .as_ref()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
