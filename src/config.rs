// src/config.rs
use chrono::Duration;

/// Rolling window unit for the message quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFrame {
    Minute,
    Hour,
    Day,
    Week,
}

impl TimeFrame {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "minute" => Some(TimeFrame::Minute),
            "hour" => Some(TimeFrame::Hour),
            "day" => Some(TimeFrame::Day),
            "week" => Some(TimeFrame::Week),
            _ => None,
        }
    }

    /// Trailing duration of the sliding window.
    pub fn window(&self) -> Duration {
        match self {
            TimeFrame::Minute => Duration::minutes(1),
            TimeFrame::Hour => Duration::hours(1),
            TimeFrame::Day => Duration::days(1),
            TimeFrame::Week => Duration::weeks(1),
        }
    }

    /// Label reported back to clients in quota responses.
    pub fn label(&self) -> &'static str {
        match self {
            TimeFrame::Minute => "minute",
            TimeFrame::Hour => "hour",
            TimeFrame::Day => "day",
            TimeFrame::Week => "week",
        }
    }
}

/// Process configuration, loaded once at startup and threaded explicitly.
/// Quota settings deliberately live here rather than in a global so tests
/// can build policies with different limits side by side.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub message_limit: i64,
    pub time_frame: TimeFrame,
    pub jwt_secret: String,
    pub frontend_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let message_limit = std::env::var("MESSAGE_LIMIT")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(10);

        let time_frame = std::env::var("TIME_FRAME")
            .ok()
            .and_then(|v| TimeFrame::parse(&v))
            .unwrap_or(TimeFrame::Minute);

        let jwt_secret =
            std::env::var("JWT_SECRET").unwrap_or_else(|_| "default_secret".to_string());

        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        Self {
            message_limit,
            time_frame,
            jwt_secret,
            frontend_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_frame_parse() {
        assert_eq!(TimeFrame::parse("minute"), Some(TimeFrame::Minute));
        assert_eq!(TimeFrame::parse("HOUR"), Some(TimeFrame::Hour));
        assert_eq!(TimeFrame::parse("day"), Some(TimeFrame::Day));
        assert_eq!(TimeFrame::parse("week"), Some(TimeFrame::Week));
        assert_eq!(TimeFrame::parse("fortnight"), None);
    }

    #[test]
    fn test_window_durations() {
        assert_eq!(TimeFrame::Minute.window(), Duration::seconds(60));
        assert_eq!(TimeFrame::Hour.window(), Duration::minutes(60));
        assert_eq!(TimeFrame::Day.window(), Duration::hours(24));
        assert_eq!(TimeFrame::Week.window(), Duration::days(7));
    }

    #[test]
    fn test_labels_round_trip() {
        for tf in [
            TimeFrame::Minute,
            TimeFrame::Hour,
            TimeFrame::Day,
            TimeFrame::Week,
        ] {
            assert_eq!(TimeFrame::parse(tf.label()), Some(tf));
        }
    }
}
