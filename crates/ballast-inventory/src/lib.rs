use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    #[error("stock quantity must be greater than zero")]
    NonPositiveQuantity,
    #[error("insufficient stock for {item}: have {available}, need {requested}")]
    Insufficient {
        item: String,
        available: i64,
        requested: i64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockPosition {
    pub item_name: String,
    pub central_stock: i64,
}

impl StockPosition {
    pub fn new(item_name: impl Into<String>, central_stock: i64) -> Self {
        Self {
            item_name: item_name.into(),
            central_stock,
        }
    }

    pub fn receive(&mut self, quantity: i64) -> Result<(), StockError> {
        if quantity <= 0 {
            return Err(StockError::NonPositiveQuantity);
        }
        self.central_stock += quantity;
        Ok(())
    }

    pub fn issue(&mut self, quantity: i64) -> Result<(), StockError> {
        if quantity <= 0 {
            return Err(StockError::NonPositiveQuantity);
        }
        if quantity > self.central_stock {
            return Err(StockError::Insufficient {
                item: self.item_name.clone(),
                available: self.central_stock,
                requested: quantity,
            });
        }
        self.central_stock -= quantity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_accumulates() {
        let mut position = StockPosition::new("cement", 10);
        position.receive(25).unwrap();
        assert_eq!(position.central_stock, 35);
    }

    #[test]
    fn issue_decrements() {
        let mut position = StockPosition::new("cement", 60);
        position.issue(40).unwrap();
        assert_eq!(position.central_stock, 20);
    }

    #[test]
    fn issue_beyond_stock_fails_and_leaves_stock_untouched() {
        let mut position = StockPosition::new("rebar", 30);
        let err = position.issue(45).unwrap_err();
        assert_eq!(
            err,
            StockError::Insufficient {
                item: "rebar".to_string(),
                available: 30,
                requested: 45,
            }
        );
        assert_eq!(position.central_stock, 30);
    }

    #[test]
    fn repeated_issue_fails_once_stock_runs_out() {
        let mut position = StockPosition::new("rebar", 60);
        position.issue(40).unwrap();
        let err = position.issue(40).unwrap_err();
        assert_eq!(
            err,
            StockError::Insufficient {
                item: "rebar".to_string(),
                available: 20,
                requested: 40,
            }
        );
        assert_eq!(position.central_stock, 20);
    }

    #[test]
    fn non_positive_quantities_rejected() {
        let mut position = StockPosition::new("sand", 10);
        assert_eq!(position.receive(0), Err(StockError::NonPositiveQuantity));
        assert_eq!(position.issue(-5), Err(StockError::NonPositiveQuantity));
        assert_eq!(position.central_stock, 10);
    }
}
