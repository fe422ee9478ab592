//! Named sample counters for the control plane.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Running summary of one named statistic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stat {
    pub samples: u64,
    pub min: f64,
    pub max: f64,
    pub total: f64,
}

impl Stat {
    fn first(value: f64) -> Self {
        Self {
            samples: 1,
            min: value,
            max: value,
            total: value,
        }
    }

    fn record(&mut self, value: f64) {
        self.samples += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.total += value;
    }

    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total / self.samples as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedStat {
    pub name: String,
    #[serde(flatten)]
    pub stat: Stat,
}

/// Snapshot returned by [`System::flush_stats`](crate::system::System::flush_stats).
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub flushed_at: DateTime<Utc>,
    /// Sorted by name.
    pub stats: Vec<NamedStat>,
}

impl StatsReport {
    pub fn get(&self, name: &str) -> Option<&Stat> {
        self.stats
            .iter()
            .find(|named| named.name == name)
            .map(|named| &named.stat)
    }
}

#[derive(Default)]
pub(crate) struct Stats {
    values: Mutex<BTreeMap<String, Stat>>,
}

impl Stats {
    pub fn sample(&self, name: &str, value: f64) {
        let mut values = self.values.lock();
        match values.get_mut(name) {
            Some(stat) => stat.record(value),
            None => {
                values.insert(name.to_string(), Stat::first(value));
            }
        }
    }

    /// Take every statistic and reset, as one step.
    pub fn flush(&self) -> StatsReport {
        let values = std::mem::take(&mut *self.values.lock());
        StatsReport {
            flushed_at: Utc::now(),
            stats: values
                .into_iter()
                .map(|(name, stat)| NamedStat { name, stat })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_snapshots_and_clears() {
        let stats = Stats::default();
        stats.sample("system.send", 3.0);
        stats.sample("system.send", 1.0);
        stats.sample("system.create", 7.0);

        let report = stats.flush();
        let send = report.get("system.send").unwrap();
        assert_eq!(send.samples, 2);
        assert_eq!(send.min, 1.0);
        assert_eq!(send.max, 3.0);
        assert_eq!(send.mean(), 2.0);
        assert_eq!(report.stats[0].name, "system.create");

        assert!(stats.flush().stats.is_empty());
    }

    #[test]
    fn test_report_serializes_flat() {
        let stats = Stats::default();
        stats.sample("system.start_timer", 0.5);
        let json = serde_json::to_value(stats.flush()).unwrap();
        assert_eq!(json["stats"][0]["name"], "system.start_timer");
        assert_eq!(json["stats"][0]["samples"], 1);
    }
}
