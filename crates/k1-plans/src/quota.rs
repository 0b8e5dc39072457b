//! Quota pre-flight evaluation

use k1_engine::adapter::QuotaUsage;
use std::collections::BTreeMap;
use std::fmt;

pub const WARN_PERCENT: u64 = 80;
pub const CRITICAL_PERCENT: u64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QuotaLevel {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaFinding {
    pub service: String,
    pub name: String,
    pub used: u64,
    pub limit: u64,
    pub percent: u64,
    pub level: QuotaLevel,
}

impl fmt::Display for QuotaFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}: {} of {} used ({}%)",
            self.service, self.name, self.used, self.limit, self.percent
        )
    }
}

/// Rounded percentage of `limit` in use. `None` for a zero limit.
pub fn percent_used(used: u64, limit: u64) -> Option<u64> {
    if limit == 0 {
        return None;
    }
    Some(((used as f64 / limit as f64) * 100.0).round() as u64)
}

pub fn level_of(percent: u64) -> QuotaLevel {
    if percent >= CRITICAL_PERCENT {
        QuotaLevel::Critical
    } else if percent >= WARN_PERCENT {
        QuotaLevel::Warning
    } else {
        QuotaLevel::Ok
    }
}

/// Quotas at warning level or above, in service order.
pub fn evaluate(quotas: &BTreeMap<String, Vec<QuotaUsage>>) -> Vec<QuotaFinding> {
    quotas
        .iter()
        .flat_map(|(service, usages)| {
            usages.iter().filter_map(move |usage| {
                let percent = percent_used(usage.used, usage.limit)?;
                let level = level_of(percent);
                (level != QuotaLevel::Ok).then(|| QuotaFinding {
                    service: service.clone(),
                    name: usage.name.clone(),
                    used: usage.used,
                    limit: usage.limit,
                    percent,
                    level,
                })
            })
        })
        .collect()
}
