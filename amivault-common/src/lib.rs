use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Region used when the caller does not name one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Interval between two describe-image calls while waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Ceiling on a single availability wait. Image copies across regions are
/// slow but never legitimately this slow.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(50 * 60);

// --- Enums ---

/// Provider-reported lifecycle state of a machine image.
///
/// Providers grow state values over time; anything unrecognized is kept
/// verbatim in `Other` instead of being rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageState {
    Pending,
    Available,
    Failed,
    Error,
    Deregistered,
    Other(String),
}

impl ImageState {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => ImageState::Pending,
            "available" => ImageState::Available,
            "failed" => ImageState::Failed,
            "error" => ImageState::Error,
            "deregistered" => ImageState::Deregistered,
            other => ImageState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ImageState::Pending => "pending",
            ImageState::Available => "available",
            ImageState::Failed => "failed",
            ImageState::Error => "error",
            ImageState::Deregistered => "deregistered",
            ImageState::Other(s) => s,
        }
    }

    /// States an availability wait can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImageState::Failed | ImageState::Error | ImageState::Deregistered
        )
    }
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Requests / outcomes ---

/// Parameters for one encryption run. Absent optionals mean "use the
/// default", never an empty-string sentinel.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EncryptImageRequest {
    pub instance_id: String,
    /// Image name; a unique `ami_<uuid>` name is generated when absent.
    pub name: Option<String>,
    /// Region the instance lives in; `DEFAULT_REGION` when absent.
    pub source_region: Option<String>,
    /// Region the encrypted image lands in; source region when absent.
    pub dest_region: Option<String>,
    /// Permit the provider to reboot the instance for a consistent image.
    /// Off by default: the image is taken crash-consistent (`NoReboot`).
    pub reboot: bool,
    /// Encryption key for the copy; provider default key when absent.
    pub kms_key_id: Option<String>,
}

impl EncryptImageRequest {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            name: None,
            source_region: None,
            dest_region: None,
            reboot: false,
            kms_key_id: None,
        }
    }
}

/// The durable output of a successful run.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EncryptedImage {
    pub image_id: String,
    /// The unencrypted intermediate that was deregistered at the end.
    pub source_image_id: String,
    pub name: String,
    pub region: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl EncryptedImage {
    /// Wall-clock duration of the run, formatted `HH:MM:SS`.
    pub fn elapsed_hms(&self) -> String {
        format_hms((self.finished_at - self.started_at).num_seconds())
    }
}

// --- Polling ---

/// Tuning for the availability waits. `timeout: None` waits forever, which
/// reproduces the historical behavior; the default is bounded.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: Some(DEFAULT_WAIT_TIMEOUT),
        }
    }
}

impl PollConfig {
    pub fn unbounded() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

pub fn format_hms(total_seconds: i64) -> String {
    let s = total_seconds.max(0);
    format!("{:02}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_hms_zero() {
        assert_eq!(format_hms(0), "00:00:00");
    }

    #[test]
    fn format_hms_rollovers() {
        assert_eq!(format_hms(59), "00:00:59");
        assert_eq!(format_hms(61), "00:01:01");
        assert_eq!(format_hms(3661), "01:01:01");
        assert_eq!(format_hms(25 * 3600), "25:00:00");
    }

    #[test]
    fn format_hms_clamps_negative() {
        assert_eq!(format_hms(-5), "00:00:00");
    }

    #[test]
    fn image_state_parses_known_values() {
        assert_eq!(ImageState::parse("available"), ImageState::Available);
        assert_eq!(ImageState::parse("PENDING"), ImageState::Pending);
        assert_eq!(ImageState::parse(" failed "), ImageState::Failed);
    }

    #[test]
    fn image_state_keeps_unknown_values() {
        assert_eq!(
            ImageState::parse("transient"),
            ImageState::Other("transient".to_string())
        );
    }

    #[test]
    fn terminal_states() {
        assert!(ImageState::Failed.is_terminal());
        assert!(ImageState::Error.is_terminal());
        assert!(ImageState::Deregistered.is_terminal());
        assert!(!ImageState::Pending.is_terminal());
        assert!(!ImageState::Available.is_terminal());
    }
}
