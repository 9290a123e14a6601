//! Stock status and FIFO depletion shared by both inventory books.

use crate::error::{HarvestError, HarvestResult};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const EXPIRING_WITHIN_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Expired,
    Expiring,
    LowStock,
    Good,
}

impl StockStatus {
    /// Expired wins over expiring, which wins over low stock.
    pub fn classify(
        quantity: Decimal,
        expiry_date: NaiveDate,
        threshold: Decimal,
        today: NaiveDate,
    ) -> Self {
        let days_left = (expiry_date - today).num_days();
        if days_left < 0 {
            StockStatus::Expired
        } else if days_left <= EXPIRING_WITHIN_DAYS {
            StockStatus::Expiring
        } else if quantity < threshold {
            StockStatus::LowStock
        } else {
            StockStatus::Good
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Expired => "expired",
            StockStatus::Expiring => "expiring",
            StockStatus::LowStock => "low_stock",
            StockStatus::Good => "good",
        }
    }

    pub fn parse(s: &str) -> HarvestResult<Self> {
        match s.trim() {
            "expired" => Ok(StockStatus::Expired),
            "expiring" => Ok(StockStatus::Expiring),
            "low_stock" => Ok(StockStatus::LowStock),
            "good" => Ok(StockStatus::Good),
            other => Err(HarvestError::validation(format!("Unknown status: {}", other))),
        }
    }
}

/// Badge labels shown next to a legacy inventory row.
pub fn status_labels(
    quantity: Decimal,
    expiry_date: NaiveDate,
    is_reserved: bool,
    threshold: Decimal,
    today: NaiveDate,
) -> Vec<String> {
    let mut labels = Vec::new();
    if is_reserved {
        labels.push("Reserved".to_string());
    }
    let days_left = (expiry_date - today).num_days();
    if days_left < 0 {
        labels.push("Expired".to_string());
    } else if days_left <= EXPIRING_WITHIN_DAYS {
        labels.push(format!("Expires in {} days", days_left));
    }
    if quantity < threshold {
        labels.push("Low Stock".to_string());
    }
    if labels.is_empty() {
        labels.push("Good".to_string());
    }
    labels
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch {
    pub id: i32,
    pub date_stored: NaiveDate,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FifoDraw {
    pub id: i32,
    pub taken: Decimal,
    pub previous: Decimal,
    pub remaining: Decimal,
}

impl FifoDraw {
    pub fn empties_batch(&self) -> bool {
        self.remaining <= Decimal::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shortfall {
    pub available: Decimal,
    pub requested: Decimal,
}

/// Plans a removal oldest-first. Nothing is planned when stock is short.
pub fn plan_fifo_removal(batches: &[Batch], requested: Decimal) -> Result<Vec<FifoDraw>, Shortfall> {
    let available: Decimal = batches.iter().map(|b| b.quantity.max(Decimal::ZERO)).sum();
    if requested > available {
        return Err(Shortfall { available, requested });
    }

    let mut ordered: Vec<&Batch> = batches.iter().filter(|b| b.quantity > Decimal::ZERO).collect();
    ordered.sort_by_key(|b| (b.date_stored, b.id));

    let mut left = requested;
    let mut draws = Vec::new();
    for batch in ordered {
        if left <= Decimal::ZERO {
            break;
        }
        let taken = left.min(batch.quantity);
        draws.push(FifoDraw {
            id: batch.id,
            taken,
            previous: batch.quantity,
            remaining: batch.quantity - taken,
        });
        left -= taken;
    }
    Ok(draws)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkAction {
    UpdateLocation(String),
    UpdateCondition(String),
    MarkExpired,
    Reserve,
    Unreserve,
}

pub const STORAGE_CONDITIONS: [&str; 5] = ["dry", "ambient", "cold", "frozen", "controlled"];

impl BulkAction {
    /// SET clause for the update; a value, when present, binds as `$3`.
    pub fn set_clause(&self) -> (&'static str, Option<&str>) {
        match self {
            BulkAction::UpdateLocation(loc) => ("storage_location = $3", Some(loc.as_str())),
            BulkAction::UpdateCondition(cond) => ("storage_condition = $3", Some(cond.as_str())),
            BulkAction::MarkExpired => ("expiry_date = CURRENT_DATE - 1", None),
            BulkAction::Reserve => ("is_reserved = TRUE", None),
            BulkAction::Unreserve => ("is_reserved = FALSE", None),
        }
    }

    pub fn parse(
        action: &str,
        new_location: Option<&str>,
        new_condition: Option<&str>,
    ) -> HarvestResult<Self> {
        let non_blank = |v: Option<&str>| v.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        match action.trim() {
            "update_location" => non_blank(new_location)
                .map(BulkAction::UpdateLocation)
                .ok_or_else(|| HarvestError::validation("New storage location is required")),
            "update_condition" => {
                let cond = non_blank(new_condition)
                    .ok_or_else(|| HarvestError::validation("New storage condition is required"))?;
                validate_condition(&cond)?;
                Ok(BulkAction::UpdateCondition(cond))
            }
            "mark_expired" => Ok(BulkAction::MarkExpired),
            "reserve" => Ok(BulkAction::Reserve),
            "unreserve" => Ok(BulkAction::Unreserve),
            other => Err(HarvestError::validation(format!("Unknown bulk action: {}", other))),
        }
    }
}

pub fn validate_expiry(date_stored: NaiveDate, expiry: NaiveDate) -> HarvestResult<()> {
    if expiry < date_stored {
        return Err(HarvestError::validation(
            "Expiry date cannot be before the storage date",
        ));
    }
    Ok(())
}

pub fn validate_condition(condition: &str) -> HarvestResult<()> {
    if STORAGE_CONDITIONS.contains(&condition) {
        Ok(())
    } else {
        Err(HarvestError::validation(format!(
            "Storage condition must be one of {}",
            STORAGE_CONDITIONS.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_status_priority() {
        let today = d(2024, 6, 1);
        let t = dec("100");
        assert_eq!(StockStatus::classify(dec("5"), d(2024, 5, 31), t, today), StockStatus::Expired);
        assert_eq!(StockStatus::classify(dec("5"), d(2024, 6, 8), t, today), StockStatus::Expiring);
        assert_eq!(StockStatus::classify(dec("500"), d(2024, 6, 1), t, today), StockStatus::Expiring);
        assert_eq!(StockStatus::classify(dec("5"), d(2024, 6, 9), t, today), StockStatus::LowStock);
        assert_eq!(StockStatus::classify(dec("100"), d(2024, 9, 1), t, today), StockStatus::Good);
    }

    #[test]
    fn test_status_labels() {
        let today = d(2024, 6, 1);
        let labels = status_labels(dec("20"), d(2024, 6, 4), true, dec("100"), today);
        assert_eq!(labels, vec!["Reserved", "Expires in 3 days", "Low Stock"]);
        let good = status_labels(dec("200"), d(2025, 1, 1), false, dec("100"), today);
        assert_eq!(good, vec!["Good"]);
        let expired = status_labels(dec("200"), d(2024, 5, 1), false, dec("100"), today);
        assert_eq!(expired, vec!["Expired"]);
    }

    #[test]
    fn test_fifo_takes_oldest_first() {
        let batches = [
            Batch { id: 3, date_stored: d(2024, 3, 1), quantity: dec("40") },
            Batch { id: 1, date_stored: d(2024, 1, 1), quantity: dec("10") },
            Batch { id: 2, date_stored: d(2024, 2, 1), quantity: dec("25") },
        ];
        let plan = plan_fifo_removal(&batches, dec("30")).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!((plan[0].id, plan[0].taken), (1, dec("10")));
        assert!(plan[0].empties_batch());
        assert_eq!((plan[1].id, plan[1].taken, plan[1].remaining), (2, dec("20"), dec("5")));
        assert!(!plan[1].empties_batch());
    }

    #[test]
    fn test_fifo_ties_break_on_id() {
        let batches = [
            Batch { id: 9, date_stored: d(2024, 1, 1), quantity: dec("5") },
            Batch { id: 4, date_stored: d(2024, 1, 1), quantity: dec("5") },
        ];
        let plan = plan_fifo_removal(&batches, dec("5")).unwrap();
        assert_eq!(plan[0].id, 4);
    }

    #[test]
    fn test_fifo_shortfall_plans_nothing() {
        let batches = [Batch { id: 1, date_stored: d(2024, 1, 1), quantity: dec("12.5") }];
        let err = plan_fifo_removal(&batches, dec("13")).unwrap_err();
        assert_eq!(err.available, dec("12.5"));
        assert_eq!(err.requested, dec("13"));
    }

    #[test]
    fn test_fifo_exact_amount_empties_everything() {
        let batches = [
            Batch { id: 1, date_stored: d(2024, 1, 1), quantity: dec("2") },
            Batch { id: 2, date_stored: d(2024, 1, 2), quantity: dec("3") },
        ];
        let plan = plan_fifo_removal(&batches, dec("5")).unwrap();
        assert!(plan.iter().all(FifoDraw::empties_batch));
    }

    #[test]
    fn test_bulk_action_parse() {
        assert_eq!(
            BulkAction::parse("update_location", Some(" Barn 2 "), None).unwrap(),
            BulkAction::UpdateLocation("Barn 2".into())
        );
        assert!(BulkAction::parse("update_location", Some(""), None).is_err());
        assert!(BulkAction::parse("update_condition", None, Some("humid")).is_err());
        assert_eq!(
            BulkAction::parse("update_condition", None, Some("cold")).unwrap(),
            BulkAction::UpdateCondition("cold".into())
        );
        assert_eq!(BulkAction::parse("reserve", None, None).unwrap(), BulkAction::Reserve);
        assert!(BulkAction::parse("delete", None, None).is_err());
    }

    #[test]
    fn test_bulk_set_clause_binds_only_values() {
        assert_eq!(BulkAction::MarkExpired.set_clause(), ("expiry_date = CURRENT_DATE - 1", None));
        let action = BulkAction::UpdateCondition("cold".into());
        let (sql, value) = action.set_clause();
        assert!(sql.contains("$3"));
        assert_eq!(value, Some("cold"));
    }

    #[test]
    fn test_expiry_not_before_storage() {
        let stored = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert!(validate_expiry(stored, stored).is_ok());
        assert!(validate_expiry(stored, stored.pred_opt().unwrap()).is_err());
    }
}
