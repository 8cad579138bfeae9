use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkflowError;

// Split-fulfillment approval is signalled by appending this literal to the
// manager notes; detection is substring containment.
pub const SPLIT_FULFILLMENT_APPROVED_NOTE: &str = "Split Fulfillment Approved";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorQuote {
    pub vendor_id: Uuid,
    pub unit_price: Decimal,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub discount_percent: Option<Decimal>,
    #[serde(default)]
    pub gst_percent: Option<Decimal>,
}

pub fn validate_quotes(quotes: &[VendorQuote]) -> Result<(), WorkflowError> {
    if quotes.is_empty() {
        return Err(WorkflowError::validation(
            "at least one vendor quote is required",
        ));
    }

    let mut seen = HashSet::new();
    for quote in quotes {
        if !seen.insert(quote.vendor_id) {
            return Err(WorkflowError::validation(
                "vendor ids must be unique within a quote set",
            ));
        }
        if quote.unit_price <= Decimal::ZERO {
            return Err(WorkflowError::validation(
                "quote unit price must be greater than zero",
            ));
        }
        for percent in [quote.discount_percent, quote.gst_percent]
            .into_iter()
            .flatten()
        {
            if percent < Decimal::ZERO || percent > Decimal::from(100) {
                return Err(WorkflowError::validation(
                    "quote percentages must be between 0 and 100",
                ));
            }
        }
    }
    Ok(())
}

pub fn ensure_selected_vendor(
    quotes: &[VendorQuote],
    vendor_id: Uuid,
) -> Result<(), WorkflowError> {
    if quotes.iter().any(|quote| quote.vendor_id == vendor_id) {
        return Ok(());
    }
    Err(WorkflowError::business_rule(
        "selected vendor is not part of the submitted quotes",
    ))
}

pub fn quote_total(quote: &VendorQuote, quantity: i64) -> Decimal {
    let base = quote
        .amount
        .unwrap_or_else(|| quote.unit_price * Decimal::from(quantity));
    let hundred = Decimal::from(100);
    let discounted = match quote.discount_percent {
        Some(discount) => base * (hundred - discount) / hundred,
        None => base,
    };
    let taxed = match quote.gst_percent {
        Some(gst) => discounted * (hundred + gst) / hundred,
        None => discounted,
    };
    taxed.round_dp(2)
}

pub fn has_split_fulfillment_approval(manager_notes: Option<&str>) -> bool {
    manager_notes.is_some_and(|notes| notes.contains(SPLIT_FULFILLMENT_APPROVED_NOTE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(unit_price: &str) -> VendorQuote {
        VendorQuote {
            vendor_id: Uuid::new_v4(),
            unit_price: unit_price.parse().unwrap(),
            amount: None,
            unit: None,
            discount_percent: None,
            gst_percent: None,
        }
    }

    #[test]
    fn an_empty_quote_set_is_rejected() {
        assert_eq!(
            validate_quotes(&[]).unwrap_err(),
            WorkflowError::Validation("at least one vendor quote is required".to_string())
        );
    }

    #[test]
    fn duplicate_vendor_ids_are_rejected() {
        let first = quote("10.00");
        let mut second = quote("12.00");
        second.vendor_id = first.vendor_id;
        assert_eq!(
            validate_quotes(&[first, second]).unwrap_err(),
            WorkflowError::Validation("vendor ids must be unique within a quote set".to_string())
        );
    }

    #[test]
    fn prices_and_percentages_are_bounded() {
        let mut bad_price = quote("0");
        bad_price.unit_price = Decimal::ZERO;
        assert!(validate_quotes(&[bad_price]).is_err());

        let mut bad_gst = quote("10.00");
        bad_gst.gst_percent = Some(Decimal::from(101));
        assert!(validate_quotes(&[bad_gst]).is_err());

        let mut negative_discount = quote("10.00");
        negative_discount.discount_percent = Some(Decimal::from(-1));
        assert!(validate_quotes(&[negative_discount]).is_err());

        let mut fine = quote("10.00");
        fine.discount_percent = Some(Decimal::from(5));
        fine.gst_percent = Some(Decimal::from(18));
        assert!(validate_quotes(&[fine]).is_ok());
    }

    #[test]
    fn selected_vendor_must_be_a_member_of_the_quotes() {
        let quotes = vec![quote("10.00"), quote("11.50")];
        assert!(ensure_selected_vendor(&quotes, quotes[1].vendor_id).is_ok());
        assert_eq!(
            ensure_selected_vendor(&quotes, Uuid::new_v4()).unwrap_err(),
            WorkflowError::BusinessRule(
                "selected vendor is not part of the submitted quotes".to_string()
            )
        );
    }

    #[test]
    fn totals_apply_discount_then_gst() {
        let mut priced = quote("100.00");
        priced.discount_percent = Some(Decimal::from(10));
        priced.gst_percent = Some(Decimal::from(18));
        // 100 * 10 = 1000, -10% = 900, +18% = 1062
        assert_eq!(quote_total(&priced, 10), "1062.00".parse().unwrap());
    }

    #[test]
    fn an_explicit_amount_overrides_the_unit_price() {
        let mut flat = quote("999.00");
        flat.amount = Some("250.00".parse().unwrap());
        assert_eq!(quote_total(&flat, 4), "250.00".parse().unwrap());
    }

    #[test]
    fn split_approval_is_detected_by_substring() {
        assert!(!has_split_fulfillment_approval(None));
        assert!(!has_split_fulfillment_approval(Some("looks fine")));
        assert!(has_split_fulfillment_approval(Some(
            "reviewed on site\nSplit Fulfillment Approved"
        )));
    }

    #[test]
    fn quotes_round_trip_through_json() {
        let mut original = quote("12.50");
        original.unit = Some("bags".to_string());
        original.gst_percent = Some(Decimal::from(18));
        let encoded = serde_json::to_value(vec![original.clone()]).unwrap();
        let decoded: Vec<VendorQuote> = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, vec![original]);
    }
}
