//! Derived agronomic metrics: yields, efficiency percentages, harvest
//! windows and the small classification helpers the dashboards use.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

pub const UNDERPERFORMING_BELOW: f64 = 70.0;
pub const HARVEST_SOON_DAYS: i64 = 7;

pub fn to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn yield_per_hectare(quantity_tons: Decimal, area_hectares: Decimal) -> Decimal {
    if area_hectares <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    quantity_tons / area_hectares
}

/// Expected tonnage for an area; crops without their own figure use the baseline.
pub fn expected_yield(
    area_hectares: Decimal,
    expected_per_hectare: Option<Decimal>,
    baseline: Decimal,
) -> Decimal {
    let per_ha = match expected_per_hectare {
        Some(v) if v > Decimal::ZERO => v,
        _ => baseline,
    };
    area_hectares * per_ha
}

/// actual / expected as a percentage, capped at 100.
pub fn efficiency_percent(actual: Decimal, expected: Decimal) -> f64 {
    if expected <= Decimal::ZERO {
        return 0.0;
    }
    to_f64(actual / expected * Decimal::ONE_HUNDRED).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EfficiencyBand {
    High,
    Medium,
    Low,
}

impl EfficiencyBand {
    pub fn from_percent(pct: f64) -> Self {
        if pct >= 90.0 {
            EfficiencyBand::High
        } else if pct >= UNDERPERFORMING_BELOW {
            EfficiencyBand::Medium
        } else {
            EfficiencyBand::Low
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldYieldBasis {
    pub area_hectares: Decimal,
    pub expected_per_hectare: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FarmEfficiency {
    pub efficiency: f64,
    pub actual_yield: f64,
    pub expected_yield: f64,
    pub is_underperforming: bool,
}

pub fn farm_efficiency(
    fields: &[FieldYieldBasis],
    actual_total: Decimal,
    baseline: Decimal,
) -> FarmEfficiency {
    let expected_total: Decimal = fields
        .iter()
        .map(|f| expected_yield(f.area_hectares, f.expected_per_hectare, baseline))
        .sum();
    let efficiency = efficiency_percent(actual_total, expected_total);
    FarmEfficiency {
        efficiency,
        actual_yield: to_f64(actual_total),
        expected_yield: to_f64(expected_total),
        is_underperforming: efficiency < UNDERPERFORMING_BELOW,
    }
}

/// Whole-percent efficiency over every field that has harvests, at the
/// baseline yield. `None` when nothing has been harvested yet.
pub fn dashboard_efficiency(
    total_actual: Decimal,
    harvested_area: Decimal,
    baseline: Decimal,
) -> Option<u32> {
    if harvested_area <= Decimal::ZERO {
        return None;
    }
    let expected = harvested_area * baseline;
    if expected <= Decimal::ZERO {
        return None;
    }
    let pct = (total_actual / expected * Decimal::ONE_HUNDRED)
        .trunc()
        .to_u32()
        .unwrap_or(0);
    Some(pct.min(100))
}

pub fn prediction_confidence(harvest_count: i64, has_expected_yield: bool) -> u8 {
    let mut confidence: i32 = 85;
    if harvest_count > 3 {
        confidence += 5;
    } else if harvest_count > 1 {
        confidence += 3;
    }
    if has_expected_yield {
        confidence += 3;
    }
    confidence.clamp(75, 98) as u8
}

pub fn hectares_to_acres(hectares: Decimal) -> Decimal {
    // 1 ha = 2.47105 acres
    hectares * Decimal::new(247105, 5)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum SizeBucket {
    #[serde(rename = "0-50 acres")]
    UpTo50,
    #[serde(rename = "51-100 acres")]
    UpTo100,
    #[serde(rename = "101-200 acres")]
    UpTo200,
    #[serde(rename = "200+ acres")]
    Over200,
}

impl SizeBucket {
    pub fn for_acres(acres: Decimal) -> Self {
        if acres <= Decimal::from(50) {
            SizeBucket::UpTo50
        } else if acres <= Decimal::from(100) {
            SizeBucket::UpTo100
        } else if acres <= Decimal::from(200) {
            SizeBucket::UpTo200
        } else {
            SizeBucket::Over200
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SizeBucket::UpTo50 => "0-50 acres",
            SizeBucket::UpTo100 => "51-100 acres",
            SizeBucket::UpTo200 => "101-200 acres",
            SizeBucket::Over200 => "200+ acres",
        }
    }
}

pub fn share_percent(part: Decimal, total: Decimal) -> f64 {
    if total <= Decimal::ZERO {
        return 0.0;
    }
    round1(to_f64(part / total * Decimal::ONE_HUNDRED))
}

/// Days until the expected harvest, floored at zero.
pub fn days_to_harvest(expected: Option<NaiveDate>, today: NaiveDate) -> Option<i64> {
    expected.map(|d| (d - today).num_days().max(0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "days", rename_all = "snake_case")]
pub enum HarvestWindow {
    NoDate,
    Ready,
    Soon(i64),
    Remaining(i64),
}

impl HarvestWindow {
    pub fn classify(expected: Option<NaiveDate>, today: NaiveDate) -> Self {
        match days_to_harvest(expected, today) {
            None => HarvestWindow::NoDate,
            Some(0) => HarvestWindow::Ready,
            Some(d) if d <= HARVEST_SOON_DAYS => HarvestWindow::Soon(d),
            Some(d) => HarvestWindow::Remaining(d),
        }
    }
}

pub fn truncate_label(name: &str, max_chars: usize) -> String {
    if name.chars().count() > max_chars {
        let head: String = name.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        name.to_string()
    }
}

/// "Farm A", "Farm B", ... for anonymised chart labels.
pub fn farm_letter_label(index: usize) -> String {
    let letter = (b'A' + (index % 26) as u8) as char;
    format!("Farm {}", letter)
}
