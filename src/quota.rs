//! Character-quota accounting for metered providers.
//!
//! Tracks characters consumed per service per calendar month so a long run
//! does not blow through a free tier halfway in. The tracker is explicitly
//! injected into adapters that need it; there is no process-global instance.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::warn;

/// Default free tier limits (characters per month).
const DEFAULT_LIMITS: &[(&str, u64)] = &[
    ("google_tts", 1_000_000),
    ("google_translate", 500_000),
    ("deepl_free", 500_000),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServiceUsage {
    chars_used: u64,
    month: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QuotaData {
    services: HashMap<String, ServiceUsage>,
}

#[derive(Debug)]
pub struct QuotaTracker {
    path: PathBuf,
    data: parking_lot::Mutex<QuotaData>,
}

impl QuotaTracker {
    /// Open the tracker backed by the given JSON file, creating it lazily.
    pub fn open(path: PathBuf) -> Self {
        let data = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self {
            path,
            data: parking_lot::Mutex::new(data),
        }
    }

    /// Default location: `~/.bilang_quota.json`.
    pub fn open_default() -> Self {
        let path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".bilang_quota.json");
        Self::open(path)
    }

    fn current_month() -> String {
        Utc::now().format("%Y-%m").to_string()
    }

    /// Record character usage for a service and warn when the free tier is
    /// running out. Counters reset when the month rolls over.
    pub fn add_usage(&self, service: &str, chars: u64) {
        let month = Self::current_month();
        let snapshot = {
            let mut data = self.data.lock();
            let entry = data
                .services
                .entry(service.to_string())
                .or_insert_with(|| ServiceUsage {
                    chars_used: 0,
                    month: month.clone(),
                });
            if entry.month != month {
                entry.chars_used = 0;
                entry.month = month;
            }
            entry.chars_used += chars;
            let used = entry.chars_used;
            if let Err(e) = self.save(&data) {
                warn!("Failed to persist quota file: {}", e);
            }
            used
        };

        if let Some(limit) = limit_for(service) {
            let percent = snapshot as f64 / limit as f64 * 100.0;
            if percent >= 100.0 {
                warn!(
                    "{} quota EXCEEDED: {} of {} chars ({:.1}%)",
                    service, snapshot, limit, percent
                );
            } else if percent >= 95.0 {
                warn!(
                    "{} quota at 95%! {} of {} chars used",
                    service, snapshot, limit
                );
            } else if percent >= 80.0 {
                warn!(
                    "{} quota at {:.0}% ({}/{} chars)",
                    service, percent, snapshot, limit
                );
            }
        }
    }

    /// Characters used by a service in the current month.
    pub fn usage(&self, service: &str) -> u64 {
        let month = Self::current_month();
        let data = self.data.lock();
        data.services
            .get(service)
            .filter(|u| u.month == month)
            .map(|u| u.chars_used)
            .unwrap_or(0)
    }

    /// Remaining characters for the free tier, `None` when no limit is known.
    pub fn remaining(&self, service: &str) -> Option<i64> {
        limit_for(service).map(|limit| limit as i64 - self.usage(service) as i64)
    }

    /// Human-readable usage report for the `quota` subcommand.
    pub fn format_report(&self) -> String {
        let data = self.data.lock();
        if data.services.is_empty() {
            return "No usage recorded yet.".to_string();
        }

        let mut lines = vec!["Quota usage:".to_string()];
        let mut services: Vec<_> = data.services.iter().collect();
        services.sort_by_key(|(name, _)| name.as_str());

        for (name, usage) in services {
            match limit_for(name) {
                Some(limit) => {
                    let percent = usage.chars_used as f64 / limit as f64 * 100.0;
                    lines.push(format!(
                        "  {name}: {} / {} chars ({:.1}%) in {}",
                        usage.chars_used, limit, percent, usage.month
                    ));
                }
                None => lines.push(format!(
                    "  {name}: {} chars in {} (no known limit)",
                    usage.chars_used, usage.month
                )),
            }
        }
        lines.join("\n")
    }

    fn save(&self, data: &QuotaData) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        std::fs::write(&self.path, json)
    }
}

fn limit_for(service: &str) -> Option<u64> {
    DEFAULT_LIMITS
        .iter()
        .find(|(name, _)| *name == service)
        .map(|(_, limit)| *limit)
}
