//! Audience size arithmetic and campaign estimates
//!
//! Category sizes are free-form strings ("1,234,567", "1.2M - 1.6M",
//! "Below 1000", "Unknown"), so everything here starts by parsing them into
//! numeric bounds.

use crate::db::{CategoryType, TargetingCategory};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Upper bound for any combined reach figure, roughly Meta's monthly active users
pub const REACH_CAP: u64 = 3_000_000_000;

/// Campaign objective as selected in the questionnaire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignGoal {
    Awareness,
    Traffic,
    Engagement,
    Leads,
    Sales,
    AppInstalls,
}

impl CampaignGoal {
    pub const ALL: [CampaignGoal; 6] = [
        CampaignGoal::Awareness,
        CampaignGoal::Traffic,
        CampaignGoal::Engagement,
        CampaignGoal::Leads,
        CampaignGoal::Sales,
        CampaignGoal::AppInstalls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignGoal::Awareness => "awareness",
            CampaignGoal::Traffic => "traffic",
            CampaignGoal::Engagement => "engagement",
            CampaignGoal::Leads => "leads",
            CampaignGoal::Sales => "sales",
            CampaignGoal::AppInstalls => "app_installs",
        }
    }

    /// Accepts the enum values plus the labels the questionnaire shows
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "awareness" | "brand_awareness" | "reach" => Some(CampaignGoal::Awareness),
            "traffic" | "website_traffic" => Some(CampaignGoal::Traffic),
            "engagement" => Some(CampaignGoal::Engagement),
            "leads" | "lead_generation" => Some(CampaignGoal::Leads),
            "sales" | "conversions" => Some(CampaignGoal::Sales),
            "app_installs" | "app_promotion" => Some(CampaignGoal::AppInstalls),
            _ => None,
        }
    }

    /// CPM in USD, low and high
    pub fn cpm_range(&self) -> (f64, f64) {
        match self {
            CampaignGoal::Awareness => (2.5, 6.0),
            CampaignGoal::Traffic => (5.0, 10.0),
            CampaignGoal::Engagement => (4.0, 9.0),
            CampaignGoal::Leads => (8.0, 15.0),
            CampaignGoal::Sales => (10.0, 20.0),
            CampaignGoal::AppInstalls => (6.0, 12.0),
        }
    }

    /// Click-through rate in percent, low and high
    pub fn ctr_range(&self) -> (f64, f64) {
        match self {
            CampaignGoal::Awareness => (0.5, 1.0),
            CampaignGoal::Traffic => (0.9, 1.6),
            CampaignGoal::Engagement => (1.0, 2.0),
            CampaignGoal::Leads => (0.8, 1.5),
            CampaignGoal::Sales => (0.7, 1.4),
            CampaignGoal::AppInstalls => (0.6, 1.2),
        }
    }
}

/// Parse a size string into inclusive bounds. Markers like "Unknown" yield `None`.
pub fn parse_audience_size(size: &str) -> Option<(u64, u64)> {
    let text = size.trim().to_lowercase();
    if let Some(rest) = text.strip_prefix("below") {
        return parse_amount(rest).map(|n| (0, n));
    }
    if let Some(rest) = text.strip_prefix("over").or_else(|| text.strip_prefix("above")) {
        return parse_amount(rest).map(|n| (n, n));
    }

    let mut parts = text.splitn(2, |c: char| c == '-' || c == '–');
    let first = parse_amount(parts.next()?)?;
    match parts.next() {
        Some(second) => {
            let second = parse_amount(second)?;
            Some((first.min(second), first.max(second)))
        }
        None => Some((first, first)),
    }
}

/// "1,234", "12.5k", "3.2 M" -> integer
fn parse_amount(text: &str) -> Option<u64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '+')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let (number, multiplier) = match cleaned.chars().last()? {
        'k' => (&cleaned[..cleaned.len() - 1], 1_000.0),
        'm' => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        'b' => (&cleaned[..cleaned.len() - 1], 1_000_000_000.0),
        _ => (cleaned.as_str(), 1.0),
    };
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier).round() as u64)
}

/// 950 -> "950", 12_500 -> "12.5K", 3_200_000 -> "3.2M"
pub fn format_audience(n: u64) -> String {
    let scaled = |divisor: f64, suffix: &str| {
        let value = format!("{:.1}", n as f64 / divisor);
        format!("{}{}", value.trim_end_matches(".0"), suffix)
    };
    if n < 1_000 {
        n.to_string()
    } else if n < 999_950 {
        scaled(1_000.0, "K")
    } else if n < 999_950_000 {
        scaled(1_000_000.0, "M")
    } else {
        scaled(1_000_000_000.0, "B")
    }
}

/// "1.2M - 1.6M", or a single figure when the bounds agree
pub fn format_range(lower: u64, upper: u64) -> String {
    if lower == upper {
        format_audience(lower)
    } else {
        format!("{} - {}", format_audience(lower), format_audience(upper))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudienceEstimate {
    pub selected: usize,
    /// Categories whose size could be parsed
    pub sized: usize,
    pub reach_lower: Option<u64>,
    pub reach_upper: Option<u64>,
    pub reach_formatted: String,
    pub cpm: Range,
    pub ctr: Range,
    pub readiness_score: u8,
    pub notes: Vec<String>,
}

/// Used when no goal is selected
const DEFAULT_CPM: (f64, f64) = (5.0, 12.0);
const DEFAULT_CTR: (f64, f64) = (0.8, 1.5);

pub fn estimate(selection: &[TargetingCategory], goal: Option<CampaignGoal>) -> AudienceEstimate {
    let bounds: Vec<(u64, u64)> = selection
        .iter()
        .filter_map(|c| parse_audience_size(&c.size))
        .collect();

    let (reach_lower, reach_upper) = if bounds.is_empty() {
        (None, None)
    } else {
        let lower = bounds.iter().map(|(l, _)| *l).max().unwrap_or(0).min(REACH_CAP);
        let upper = bounds
            .iter()
            .fold(0u64, |acc, (_, u)| acc.saturating_add(*u))
            .min(REACH_CAP)
            .max(lower);
        (Some(lower), Some(upper))
    };

    let reach_formatted = match (reach_lower, reach_upper) {
        (Some(lower), Some(upper)) => format_range(lower, upper),
        _ => crate::db::UNKNOWN_SIZE.to_string(),
    };

    let (cpm, ctr) = goal
        .map(|g| (g.cpm_range(), g.ctr_range()))
        .unwrap_or((DEFAULT_CPM, DEFAULT_CTR));

    let types: HashSet<CategoryType> = selection.iter().map(|c| c.category_type).collect();
    let mut notes = Vec::new();
    if selection.is_empty() {
        notes.push("Select at least one category to estimate reach".to_string());
    } else {
        if types.len() == 1 {
            notes.push("Add categories from another type to sharpen targeting".to_string());
        }
        if bounds.len() < selection.len() {
            notes.push(format!(
                "{} of {} categories have no size data",
                selection.len() - bounds.len(),
                selection.len()
            ));
        }
        if reach_upper.is_some_and(|u| u < 10_000) {
            notes.push("Audience may be too narrow to deliver".to_string());
        }
    }

    AudienceEstimate {
        selected: selection.len(),
        sized: bounds.len(),
        reach_lower,
        reach_upper,
        reach_formatted,
        cpm: Range { low: cpm.0, high: cpm.1 },
        ctr: Range { low: ctr.0, high: ctr.1 },
        readiness_score: readiness_score(selection.len(), types.len(), bounds.len()),
        notes,
    }
}

/// 0-100: up to 40 for selection size (5+ categories), 30 for type diversity,
/// 30 for the share of categories with known size.
pub fn readiness_score(selected: usize, distinct_types: usize, sized: usize) -> u8 {
    if selected == 0 {
        return 0;
    }
    let size_points = selected.min(5) * 8;
    let diversity_points = distinct_types.min(3) * 10;
    let coverage_points = (sized.min(selected) * 30) / selected;
    (size_points + diversity_points + coverage_points).min(100) as u8
}
