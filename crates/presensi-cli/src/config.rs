use chrono::{FixedOffset, NaiveTime};
use presensi_core::policy::DEFAULT_UTC_OFFSET_HOURS;
use presensi_core::{AttendancePolicy, AttendanceWindow, Settings};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub settings: Settings,
}

impl Config {
    /// Load configuration from `PRESENSI_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presensi");

        let db_path = std::env::var("PRESENSI_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("presensi.db"));

        let defaults = Settings::default();
        let policy = AttendancePolicy {
            check_in: env_window(
                "PRESENSI_CHECK_IN_START",
                "PRESENSI_CHECK_IN_END",
                defaults.policy.check_in,
            ),
            check_out: env_window(
                "PRESENSI_CHECK_OUT_START",
                "PRESENSI_CHECK_OUT_END",
                defaults.policy.check_out,
            ),
            utc_offset: utc_offset(env_i32("PRESENSI_UTC_OFFSET_HOURS", DEFAULT_UTC_OFFSET_HOURS))
                .unwrap_or(defaults.policy.utc_offset),
        };

        Self {
            db_path,
            settings: Settings {
                recognition_threshold: env_f32(
                    "PRESENSI_RECOGNITION_THRESHOLD",
                    defaults.recognition_threshold,
                ),
                duplicate_threshold: env_f32(
                    "PRESENSI_DUPLICATE_THRESHOLD",
                    defaults.duplicate_threshold,
                ),
                policy,
                max_upload_bytes: env_usize("PRESENSI_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
                upload_dir: std::env::var("PRESENSI_UPLOAD_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| data_dir.join("uploads")),
                faces_dir: std::env::var("PRESENSI_FACES_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| data_dir.join("faces")),
                default_geofence: defaults.default_geofence,
            },
        }
    }
}

fn utc_offset(hours: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(hours.checked_mul(3600)?)
}

/// Accepts `HH:MM` or `HH:MM:SS`.
fn parse_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

fn window_from(start: Option<String>, end: Option<String>, default: AttendanceWindow) -> AttendanceWindow {
    let start = start.as_deref().and_then(parse_time).unwrap_or(default.start);
    let end = end.as_deref().and_then(parse_time).unwrap_or(default.end);
    AttendanceWindow::new(start, end).unwrap_or_else(|e| {
        tracing::warn!(error = %e, default = %default, "ignoring attendance window override");
        default
    })
}

fn env_window(start_key: &str, end_key: &str, default: AttendanceWindow) -> AttendanceWindow {
    window_from(std::env::var(start_key).ok(), std::env::var(end_key).ok(), default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i32(key: &str, default: i32) -> i32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_formats() {
        assert_eq!(parse_time("06:00"), NaiveTime::from_hms_opt(6, 0, 0));
        assert_eq!(parse_time(" 07:30:15 "), NaiveTime::from_hms_opt(7, 30, 15));
        assert_eq!(parse_time("7.30"), None);
        assert_eq!(parse_time("25:00"), None);
    }

    #[test]
    fn test_window_override_and_fallback() {
        let default = AttendancePolicy::default().check_in;

        let w = window_from(Some("05:45".into()), None, default);
        assert_eq!(w.start, NaiveTime::from_hms_opt(5, 45, 0).unwrap());
        assert_eq!(w.end, default.end);

        // Inverted range keeps the default window.
        let w = window_from(Some("09:00".into()), Some("08:00".into()), default);
        assert_eq!(w, default);

        let w = window_from(Some("garbage".into()), None, default);
        assert_eq!(w, default);
    }

    #[test]
    fn test_utc_offset_range() {
        assert_eq!(utc_offset(7).unwrap().local_minus_utc(), 7 * 3600);
        assert_eq!(utc_offset(-3).unwrap().local_minus_utc(), -3 * 3600);
        assert!(utc_offset(30).is_none());
    }
}
