//! Auto-stop policy for a running scan.

use crate::post::Post;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Which condition ends a scan on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VibeMode {
    /// Only an explicit stop ends the scan.
    Manual,
    /// Stop once enough posts are collected.
    #[default]
    Count,
    /// Stop once the feed has scrolled past the time window.
    Time,
}

impl fmt::Display for VibeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VibeMode::Manual => "manual",
            VibeMode::Count => "count",
            VibeMode::Time => "time",
        };
        f.write_str(name)
    }
}

impl FromStr for VibeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(VibeMode::Manual),
            "count" => Ok(VibeMode::Count),
            "time" => Ok(VibeMode::Time),
            other => Err(format!("unknown vibe mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    TargetReached { collected: usize, target: usize },
    OutsideWindow { out_of_range: usize, window_hours: u32 },
    BatchLimit { batches: u32 },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::TargetReached { collected, target } => {
                write!(f, "Reached target post count: {collected}/{target}")
            }
            StopReason::OutsideWindow {
                out_of_range,
                window_hours,
            } => write!(
                f,
                "All new posts ({out_of_range}) are outside the {window_hours}h window"
            ),
            StopReason::BatchLimit { batches } => {
                write!(f, "Stopped after {batches} extraction batches")
            }
        }
    }
}

/// Per-batch tally of timestamps against the window cutoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeTally {
    pub in_range: usize,
    pub out_of_range: usize,
    pub unparsable: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopCondition {
    pub mode: VibeMode,
    pub target_count: usize,
    pub window_hours: u32,
}

impl StopCondition {
    pub fn manual() -> Self {
        Self {
            mode: VibeMode::Manual,
            target_count: 0,
            window_hours: 0,
        }
    }

    pub fn count(target_count: usize) -> Self {
        Self {
            mode: VibeMode::Count,
            target_count,
            window_hours: 0,
        }
    }

    pub fn time(window_hours: u32) -> Self {
        Self {
            mode: VibeMode::Time,
            target_count: 0,
            window_hours,
        }
    }

    /// Decides whether the scan should end after a batch.
    ///
    /// `latest_batch` holds only the posts the batch added.
    pub fn evaluate(
        &self,
        collected: usize,
        latest_batch: &[Post],
        now: DateTime<Utc>,
    ) -> Option<StopReason> {
        match self.mode {
            VibeMode::Manual => None,
            VibeMode::Count => (collected >= self.target_count).then_some(StopReason::TargetReached {
                collected,
                target: self.target_count,
            }),
            VibeMode::Time => {
                let cutoff = now - Duration::hours(i64::from(self.window_hours));
                let tally = tally_batch(latest_batch, cutoff);
                debug!(
                    in_range = tally.in_range,
                    out_of_range = tally.out_of_range,
                    unparsable = tally.unparsable,
                    "Time window check"
                );
                // Unparsable timestamps neither force nor prevent a stop.
                (tally.in_range == 0 && tally.out_of_range > 0).then_some(StopReason::OutsideWindow {
                    out_of_range: tally.out_of_range,
                    window_hours: self.window_hours,
                })
            }
        }
    }

    pub fn should_stop(&self, collected: usize, latest_batch: &[Post], now: DateTime<Utc>) -> bool {
        self.evaluate(collected, latest_batch, now).is_some()
    }
}

pub fn tally_batch(batch: &[Post], cutoff: DateTime<Utc>) -> TimeTally {
    let mut tally = TimeTally::default();
    for post in batch {
        match parse_timestamp(&post.timestamp) {
            Some(at) if at >= cutoff => tally.in_range += 1,
            Some(_) => tally.out_of_range += 1,
            None => tally.unparsable += 1,
        }
    }
    tally
}

/// Parses an item timestamp; zone-less values are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::UNKNOWN;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn post_at(timestamp: &str) -> Post {
        Post {
            content: format!("post at {timestamp}"),
            author: "a".to_string(),
            timestamp: timestamp.to_string(),
            id: None,
            url: None,
            has_quoted: false,
            has_reply: false,
            is_ad: false,
        }
    }

    fn hours_ago(h: i64) -> Post {
        post_at(&(now() - Duration::hours(h)).to_rfc3339())
    }

    #[test]
    fn test_manual_never_stops() {
        let cond = StopCondition::manual();
        assert!(!cond.should_stop(10_000, &[hours_ago(500)], now()));
    }

    #[test]
    fn test_count_mode_threshold() {
        let cond = StopCondition::count(3);
        assert!(!cond.should_stop(2, &[], now()));
        assert_eq!(
            cond.evaluate(3, &[], now()),
            Some(StopReason::TargetReached {
                collected: 3,
                target: 3
            })
        );
        assert!(cond.should_stop(4, &[], now()));
    }

    #[test]
    fn test_time_mode_all_out_of_range_stops() {
        let cond = StopCondition::time(24);
        let batch = [hours_ago(30), hours_ago(48)];
        assert_eq!(
            cond.evaluate(2, &batch, now()),
            Some(StopReason::OutsideWindow {
                out_of_range: 2,
                window_hours: 24
            })
        );
    }

    #[test]
    fn test_time_mode_any_in_range_keeps_going() {
        let cond = StopCondition::time(24);
        let batch = [hours_ago(30), hours_ago(2), post_at(UNKNOWN)];
        assert!(!cond.should_stop(3, &batch, now()));
    }

    #[test]
    fn test_time_mode_unparsable_is_neutral() {
        let cond = StopCondition::time(24);
        let mixed = [post_at(UNKNOWN), hours_ago(25), post_at("3h")];
        assert!(cond.should_stop(3, &mixed, now()));

        let only_unparsable = [post_at(UNKNOWN), post_at("yesterday")];
        assert!(!cond.should_stop(2, &only_unparsable, now()));
    }

    #[test]
    fn test_time_mode_empty_batch_keeps_going() {
        assert!(!StopCondition::time(1).should_stop(50, &[], now()));
    }

    #[test]
    fn test_time_mode_cutoff_is_inclusive() {
        let cond = StopCondition::time(24);
        assert!(!cond.should_stop(1, &[hours_ago(24)], now()));
    }

    #[test]
    fn test_tally_batch() {
        let cutoff = now() - Duration::hours(1);
        let batch = [hours_ago(0), hours_ago(5), post_at("")];
        assert_eq!(
            tally_batch(&batch, cutoff),
            TimeTally {
                in_range: 1,
                out_of_range: 1,
                unparsable: 1
            }
        );
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2025-05-01T10:00:00.000Z").is_some());
        assert!(parse_timestamp("2025-05-01T10:00:00+02:00").is_some());
        assert!(parse_timestamp("2025-05-01T10:00:00").is_some());
        assert!(parse_timestamp(UNKNOWN).is_none());
        assert!(parse_timestamp("May 1").is_none());
    }

    #[test]
    fn test_vibe_mode_from_str() {
        assert_eq!("Time".parse::<VibeMode>(), Ok(VibeMode::Time));
        assert!("forever".parse::<VibeMode>().is_err());
        assert_eq!(VibeMode::Count.to_string(), "count");
    }
}
