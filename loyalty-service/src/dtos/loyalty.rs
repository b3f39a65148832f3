use serde::{Deserialize, Serialize};

use crate::models::Transaction;

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Body of earn and redeem requests.
#[derive(Debug, Deserialize)]
pub struct PointsRequest {
    pub points: i64,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub transactions: Vec<Transaction>,
    pub count: usize,
}

impl From<Vec<Transaction>> for HistoryResponse {
    fn from(transactions: Vec<Transaction>) -> Self {
        Self {
            count: transactions.len(),
            transactions,
        }
    }
}
