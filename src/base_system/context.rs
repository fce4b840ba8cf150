//! Global configuration (`Config`) and its defaults.
//!
//! Also provides the per-field metadata used to generate a commented `config.yml`.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, FieldMeta};
use crate::transfer::models::TransferLimits;

pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Bot
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: u64,
    #[serde(default)]
    pub admins: Vec<i64>,

    // Storage
    #[serde(default)]
    pub download_path: String,

    // Size limits
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_direct_upload_limit")]
    pub direct_upload_limit: u64,
    #[serde(default = "default_segment_size")]
    pub segment_size: u64,
    #[serde(default = "default_direct_upload_extensions")]
    pub direct_upload_extensions: Vec<String>,
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: default_api_base_url(),
            poll_timeout: default_poll_timeout(),
            admins: Vec::new(),
            download_path: String::new(),
            max_file_size: default_max_file_size(),
            direct_upload_limit: default_direct_upload_limit(),
            segment_size: default_segment_size(),
            direct_upload_extensions: default_direct_upload_extensions(),
            compression_level: default_compression_level(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 10] = [
            FieldMeta {
                name: "bot_token",
                description: "Bot API token issued by @BotFather",
            },
            FieldMeta {
                name: "api_base_url",
                description: "Bot API endpoint; point it at a self-hosted Bot API server to lift upload caps",
            },
            FieldMeta {
                name: "poll_timeout",
                description: "Long polling timeout for getUpdates, in seconds",
            },
            FieldMeta {
                name: "admins",
                description: "User ids allowed to use the bot; empty list means everyone",
            },
            FieldMeta {
                name: "download_path",
                description: "Root directory for per-transfer working directories (empty: current directory)",
            },
            FieldMeta {
                name: "max_file_size",
                description: "Files of this size (bytes) or larger are rejected",
            },
            FieldMeta {
                name: "direct_upload_limit",
                description: "Files below this size (bytes) are uploaded whole; larger ones are zipped into segments",
            },
            FieldMeta {
                name: "segment_size",
                description: "Maximum size (bytes) of one zip segment",
            },
            FieldMeta {
                name: "direct_upload_extensions",
                description: "Extensions the platform may fetch by URL itself when below direct_upload_limit",
            },
            FieldMeta {
                name: "compression_level",
                description: "Deflate level for zip segments, 1 (fastest) to 9 (smallest)",
            },
        ];
        &FIELDS
    }

    fn normalize(&mut self) -> Result<(), ConfigError> {
        self.bot_token = self.bot_token.trim().to_string();
        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();
        if self.api_base_url.is_empty() {
            self.api_base_url = default_api_base_url();
        }
        self.direct_upload_extensions = normalize_extensions(&self.direct_upload_extensions);
        self.compression_level = self.compression_level.clamp(1, 9);

        if self.segment_size == 0 {
            return Err(ConfigError::Validation(
                "segment_size must be greater than zero".to_string(),
            ));
        }
        if self.direct_upload_limit > self.max_file_size {
            tracing::warn!(
                target: "config",
                direct_upload_limit = self.direct_upload_limit,
                max_file_size = self.max_file_size,
                "direct_upload_limit exceeds max_file_size; every accepted file will be uploaded whole"
            );
        }
        Ok(())
    }
}

impl Config {
    /// Everyone is allowed when the admin list is empty.
    pub fn is_authorized(&self, user_id: i64) -> bool {
        self.admins.is_empty() || self.admins.contains(&user_id)
    }

    pub fn work_root(&self) -> PathBuf {
        let trimmed = self.download_path.trim();
        if trimmed.is_empty() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            PathBuf::from(trimmed)
        }
    }

    pub fn transfer_limits(&self) -> TransferLimits {
        TransferLimits {
            size_limit: self.max_file_size,
            direct_upload_threshold: self.direct_upload_limit,
            direct_upload_extensions: self.direct_upload_extensions.iter().cloned().collect(),
            max_segment_bytes: self.segment_size,
            compression_level: self.compression_level,
        }
    }
}

/// Lowercase, dedupe, and force a leading dot: `PDF` -> `.pdf`.
fn normalize_extensions(raw: &[String]) -> Vec<String> {
    let set: BTreeSet<String> = raw
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{e}"))
        .collect();
    set.into_iter().collect()
}

/// Make a string safe to use as a single path component.
///
/// Separators and characters Windows refuses are replaced, trailing dots and
/// spaces are dropped, reserved device names get a `_` prefix, and the result
/// is cut to `max_len` bytes on a char boundary.
pub fn safe_fs_name(name: &str, replacement: &str, max_len: usize) -> String {
    let repl = replacement.chars().next().unwrap_or('_');
    let mut cleaned: String = name
        .chars()
        .map(|ch| match ch {
            ':' | '"' | '<' | '>' | '/' | '\\' | '|' | '?' | '*' => repl,
            c if (c as u32) < 32 => repl,
            _ => ch,
        })
        .collect();

    while cleaned.ends_with(' ') || cleaned.ends_with('.') {
        cleaned.pop();
    }
    let trimmed = cleaned.trim_start_matches([' ', '.']);
    if trimmed.len() != cleaned.len() {
        cleaned = trimmed.to_string();
    }

    if cleaned.is_empty() {
        cleaned.push_str("unnamed");
    }

    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let stem = cleaned.split('.').next().unwrap_or("").to_uppercase();
    if RESERVED.contains(&stem.as_str()) {
        cleaned = format!("_{cleaned}");
    }

    if cleaned.len() > max_len {
        // shorten the stem, keep a short extension intact
        let ext_len = cleaned
            .rfind('.')
            .filter(|&dot| dot > 0)
            .map(|dot| cleaned.len() - dot)
            .filter(|&len| len < max_len / 2)
            .unwrap_or(0);
        let (stem, ext) = cleaned.split_at(cleaned.len() - ext_len);
        let mut end = max_len - ext_len;
        while end > 0 && !stem.is_char_boundary(end) {
            end -= 1;
        }
        cleaned = format!("{}{ext}", &stem[..end]);
    }

    cleaned
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_max_file_size() -> u64 {
    1_000_000_000
}

fn default_direct_upload_limit() -> u64 {
    // the platform's own cap for bot uploads and URL fetches
    20 * 1000 * 1000
}

fn default_segment_size() -> u64 {
    50 * 1000 * 1000
}

fn default_direct_upload_extensions() -> Vec<String> {
    [".zip", ".pdf", ".gif", ".mp3", ".ogg", ".jpg", ".png", ".mp4"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_compression_level() -> i32 {
    1
}
