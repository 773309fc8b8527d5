/// Which media formats to fetch for each item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum FormatSelection {
    Primary,
    Lossless,
    Both,
}

impl FormatSelection {
    /// Formats in download order. Primary always comes first so a partial
    /// success keeps the most widely available file.
    pub fn formats(&self) -> &'static [MediaFormat] {
        match self {
            FormatSelection::Primary => &[MediaFormat::Primary],
            FormatSelection::Lossless => &[MediaFormat::Lossless],
            FormatSelection::Both => &[MediaFormat::Primary, MediaFormat::Lossless],
        }
    }
}

/// A single downloadable rendition of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaFormat {
    Primary,
    Lossless,
}

impl MediaFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::Primary => "mp3",
            MediaFormat::Lossless => "wav",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaFormat::Primary => "primary",
            MediaFormat::Lossless => "lossless",
        }
    }
}

impl std::fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
