use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Amounts are stored in SQLite as integer minor units (cents).
pub fn to_cents(amount: Decimal) -> Option<i64> {
    let scaled = amount.checked_mul(Decimal::ONE_HUNDRED)?;
    if !scaled.fract().is_zero() {
        return None;
    }
    scaled.to_i64()
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub account_type: String,
    pub institution: Option<String>,
    pub last_four: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Payee {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub bank_description: Option<String>,
    pub payee_id: Option<i64>,
    pub check_number: Option<String>,
    pub reconciled: bool,
    pub import_batch_id: Option<i64>,
    pub reconciled_batch_id: Option<i64>,
}

/// Read-only projection of an unreconciled ledger transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub id: i64,
    pub account_id: i64,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub payee_id: Option<i64>,
    pub payee_name: Option<String>,
    pub reconciled: bool,
}

impl MatchCandidate {
    pub fn days_from(&self, date: NaiveDate) -> i64 {
        (self.date - date).num_days().abs()
    }
}

/// One normalized statement line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRow {
    pub line: usize,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_suffix: Option<String>,
}

/// A statement line the normalizer refused, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedLine {
    pub line: usize,
    pub raw: Vec<String>,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Duplicate,
    Exact,
    Probable,
    New,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Exact => "exact",
            Self::Probable => "probable",
            Self::New => "new",
        }
    }

    pub fn default_action(&self) -> RowAction {
        match self {
            Self::Duplicate => RowAction::Skip,
            Self::Exact | Self::Probable => RowAction::Match,
            Self::New => RowAction::Create,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowAction {
    Create,
    Skip,
    Match,
}

impl RowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Skip => "skip",
            Self::Match => "match",
        }
    }
}

impl FromStr for RowAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "skip" => Ok(Self::Skip),
            "match" => Ok(Self::Match),
            _ => Err(format!("unknown action '{s}'")),
        }
    }
}

impl fmt::Display for RowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classifier verdict for one import row, plus the defaults it implies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowResult {
    pub row: usize,
    pub match_type: MatchType,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub suggested_payee_id: Option<i64>,
    #[serde(default)]
    pub suggested_payee_name: Option<String>,
    pub action: RowAction,
    #[serde(default)]
    pub matched_transaction_id: Option<i64>,
    #[serde(default)]
    pub duplicate_of: Option<i64>,
    #[serde(default)]
    pub candidates: Vec<MatchCandidate>,
}

/// User edits for one row, layered over its `RowResult` at confirm time.
///
/// `action` stays a raw string so an unrecognized value is rejected during
/// confirm validation instead of at deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowOverride {
    pub row: usize,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub matched_transaction_id: Option<i64>,
    #[serde(default)]
    pub payee_id: Option<i64>,
    #[serde(default)]
    pub payee_name: Option<String>,
}

impl RowOverride {
    pub fn for_row(row: usize) -> Self {
        Self {
            row,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Confirmed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown batch status: {s}")),
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportBatch {
    pub id: i64,
    pub user_id: i64,
    pub account_id: i64,
    pub status: BatchStatus,
    pub source_name: Option<String>,
    pub checksum: Option<String>,
    pub rows: Vec<ImportRow>,
    pub rejected: Vec<RejectedLine>,
    pub match_results: Vec<RowResult>,
    pub matched_count: i64,
    pub created_count: i64,
    pub skipped_count: i64,
    pub error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub confirmed_at: Option<NaiveDateTime>,
}

impl ImportBatch {
    pub fn count_of(&self, match_type: MatchType) -> usize {
        self.match_results
            .iter()
            .filter(|r| r.match_type == match_type)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PayeeAlias {
    pub id: i64,
    pub user_id: i64,
    pub payee_id: i64,
    pub payee_name: String,
    pub bank_description: String,
    pub normalized_pattern: String,
    pub times_matched: i64,
    pub last_matched_at: NaiveDateTime,
}

/// Outcome of a successful confirm, with the touched ledger entities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfirmSummary {
    pub batch_id: i64,
    pub created: usize,
    pub reconciled: usize,
    pub skipped: usize,
    pub created_transactions: Vec<Transaction>,
    pub reconciled_transactions: Vec<Transaction>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_cents_conversion() {
        assert_eq!(to_cents(dec!(-42.00)), Some(-4200));
        assert_eq!(to_cents(dec!(2800)), Some(280000));
        assert_eq!(to_cents(dec!(0.015)), None);
        assert_eq!(to_cents(dec!(100000000000000000000)), None);
        assert_eq!(to_cents(Decimal::MAX), None);
        assert_eq!(from_cents(-777_77), dec!(-777.77));
    }

    #[test]
    fn test_default_actions() {
        assert_eq!(MatchType::Duplicate.default_action(), RowAction::Skip);
        assert_eq!(MatchType::Exact.default_action(), RowAction::Match);
        assert_eq!(MatchType::Probable.default_action(), RowAction::Match);
        assert_eq!(MatchType::New.default_action(), RowAction::Create);
    }

    #[test]
    fn test_row_action_parsing() {
        assert_eq!("MATCH".parse::<RowAction>(), Ok(RowAction::Match));
        assert_eq!(" skip ".parse::<RowAction>(), Ok(RowAction::Skip));
        assert!("ignore".parse::<RowAction>().is_err());
    }

    #[test]
    fn test_row_result_serializes_snake_case() {
        let result = RowResult {
            row: 0,
            match_type: MatchType::New,
            score: None,
            suggested_payee_id: None,
            suggested_payee_name: None,
            action: RowAction::Create,
            matched_transaction_id: None,
            duplicate_of: None,
            candidates: vec![],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["match_type"], "new");
        assert_eq!(json["action"], "create");
    }
}
