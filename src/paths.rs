use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.config_dir().join("preferences.json")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.base_dir.join("bin")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn session_logs_dir(&self) -> PathBuf {
        self.logs_dir().join("sessions")
    }

    pub fn bundled_yt_dlp_path(&self) -> PathBuf {
        executable(self.bin_dir().join("yt-dlp"))
    }

    pub fn bundled_ffmpeg_path(&self) -> PathBuf {
        executable(self.bin_dir().join("ffmpeg"))
    }

    /// Tool locations: bundled copies under `bin/` when present, otherwise
    /// whatever `yt-dlp` / `ffmpeg` resolve to on PATH.
    pub fn tools(&self) -> ToolPaths {
        let bundled = self.bundled_yt_dlp_path();
        let yt_dlp = if bundled.exists() {
            bundled
        } else {
            PathBuf::from("yt-dlp")
        };
        let ffmpeg = Some(self.bundled_ffmpeg_path()).filter(|p| p.exists());
        ToolPaths { yt_dlp, ffmpeg }
    }
}

#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub yt_dlp: PathBuf,
    /// Passed as `--ffmpeg-location`; yt-dlp searches PATH when `None`.
    pub ffmpeg: Option<PathBuf>,
}

impl ToolPaths {
    pub fn new(yt_dlp: impl Into<PathBuf>) -> Self {
        Self {
            yt_dlp: yt_dlp.into(),
            ffmpeg: None,
        }
    }

    pub fn with_ffmpeg(mut self, ffmpeg: impl AsRef<Path>) -> Self {
        self.ffmpeg = Some(ffmpeg.as_ref().to_path_buf());
        self
    }
}

fn executable(mut path: PathBuf) -> PathBuf {
    if cfg!(windows) {
        path.set_extension("exe");
    }
    path
}
