use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ParseError, Result};
use crate::models::{to_cents, ImportRow, RejectedLine};

// ---------------------------------------------------------------------------
// Amount format (supplied by the user's locale settings)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecimalSeparator {
    #[default]
    Dot,
    Comma,
}

impl DecimalSeparator {
    pub fn as_char(&self) -> char {
        match self {
            Self::Dot => '.',
            Self::Comma => ',',
        }
    }
}

impl FromStr for DecimalSeparator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "." | "dot" => Ok(Self::Dot),
            "," | "comma" => Ok(Self::Comma),
            other => Err(format!("unknown decimal separator '{other}' (use dot or comma)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigitGrouping {
    #[serde(rename = "none")]
    Ungrouped,
    Space,
    #[default]
    Comma,
    Dot,
}

impl FromStr for DigitGrouping {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "" | "none" => Ok(Self::Ungrouped),
            " " | "space" => Ok(Self::Space),
            "," | "comma" => Ok(Self::Comma),
            "." | "dot" => Ok(Self::Dot),
            other => Err(format!("unknown digit grouping '{other}' (use none, space, comma or dot)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AmountFormat {
    #[serde(default)]
    pub decimal_separator: DecimalSeparator,
    #[serde(default)]
    pub digit_grouping: DigitGrouping,
}

impl fmt::Display for AmountFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let grouping = match self.digit_grouping {
            DigitGrouping::Ungrouped => "none",
            DigitGrouping::Space => "space",
            DigitGrouping::Comma => "comma",
            DigitGrouping::Dot => "dot",
        };
        write!(f, "decimal '{}', grouping {grouping}", self.decimal_separator.as_char())
    }
}

// ---------------------------------------------------------------------------
// Column mapping (supplied by the CSV front end)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub date_column: usize,
    pub description_column: usize,
    #[serde(default)]
    pub amount_column: Option<usize>,
    #[serde(default)]
    pub debit_column: Option<usize>,
    #[serde(default)]
    pub credit_column: Option<usize>,
    #[serde(default)]
    pub check_number_column: Option<usize>,
    #[serde(default)]
    pub card_column: Option<usize>,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub skip_rows: usize,
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_delimiter() -> char {
    ','
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            date_column: 0,
            description_column: 1,
            amount_column: Some(2),
            debit_column: None,
            credit_column: None,
            check_number_column: None,
            card_column: None,
            date_format: default_date_format(),
            delimiter: default_delimiter(),
            skip_rows: 0,
        }
    }
}

impl ColumnMapping {
    pub fn validate(&self) -> std::result::Result<(), ParseError> {
        if self.amount_column.is_none() && self.debit_column.is_none() && self.credit_column.is_none() {
            return Err(ParseError::new(
                "column mapping needs an amount column or a debit/credit column",
            ));
        }
        if !self.delimiter.is_ascii() {
            return Err(ParseError::new(format!(
                "delimiter '{}' must be a single ASCII character",
                self.delimiter
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Field parsers
// ---------------------------------------------------------------------------

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹', '"', '\''];

/// Parse a statement amount under the user's separator convention.
///
/// When both `.` and `,` occur, whichever occurs last is the decimal
/// separator. A lone separator is decimal if it is the configured one,
/// grouping if it repeats or is followed by exactly three digits.
pub fn parse_amount(raw: &str, format: &AmountFormat) -> std::result::Result<Decimal, ParseError> {
    let invalid = || ParseError::new(format!("invalid amount '{}'", raw.trim()));

    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !CURRENCY_SYMBOLS.contains(c))
        .collect();
    let mut body = cleaned.trim_matches(|c: char| c.is_ascii_alphabetic());

    let mut negative = false;
    if let Some(inner) = body.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        body = inner;
    }
    if let Some(rest) = body.strip_prefix('-') {
        negative = !negative;
        body = rest;
    } else if let Some(rest) = body.strip_prefix('+') {
        body = rest;
    } else if let Some(rest) = body.strip_suffix('-') {
        negative = !negative;
        body = rest;
    }

    if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return Err(invalid());
    }
    if !body.chars().any(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let decimal = match (body.rfind('.'), body.rfind(',')) {
        (Some(dot), Some(comma)) => Some(if dot > comma { dot } else { comma }),
        (Some(pos), None) => lone_separator_decimal(body, '.', pos, format),
        (None, Some(pos)) => lone_separator_decimal(body, ',', pos, format),
        (None, None) => None,
    };

    let (int_part, frac_part) = match decimal {
        Some(pos) => (&body[..pos], &body[pos + 1..]),
        None => (body, ""),
    };
    let int_digits: String = int_part.chars().filter(|c| c.is_ascii_digit()).collect();
    if !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if frac_part.len() > 2 {
        return Err(ParseError::new(format!(
            "amount '{}' has more than two decimal places",
            raw.trim()
        )));
    }

    let int_digits = if int_digits.is_empty() { "0".to_string() } else { int_digits };
    let text = if frac_part.is_empty() {
        int_digits
    } else {
        format!("{int_digits}.{frac_part}")
    };
    let value = Decimal::from_str(&text).map_err(|_| invalid())?;
    if to_cents(value).is_none() {
        return Err(ParseError::new(format!("amount '{}' is out of range", raw.trim())));
    }
    Ok(if negative { -value } else { value })
}

/// Position of the decimal separator when only one kind of separator occurs.
fn lone_separator_decimal(body: &str, sep: char, pos: usize, format: &AmountFormat) -> Option<usize> {
    if body.matches(sep).count() > 1 {
        return None;
    }
    if sep == format.decimal_separator.as_char() {
        return Some(pos);
    }
    let digits_after = body.len() - pos - 1;
    if digits_after == 3 {
        None
    } else {
        Some(pos)
    }
}

/// Translate `DD/MM/YYYY`-style token patterns into chrono syntax.
fn chrono_pattern(format: &str) -> String {
    if format.contains('%') {
        return format.to_string();
    }
    format
        .replace("YYYY", "%Y")
        .replace("YY", "%y")
        .replace("MM", "%m")
        .replace("DD", "%d")
}

pub fn parse_date(raw: &str, format: &str) -> std::result::Result<NaiveDate, ParseError> {
    let raw = raw.trim();
    let pattern = chrono_pattern(format);
    if let Ok(date) = NaiveDate::parse_from_str(raw, &pattern) {
        return Ok(date);
    }
    // Some banks append a time of day to the booking date.
    if let Some(head) = raw.split(|c: char| c.is_whitespace() || c == 'T').next() {
        if head != raw {
            if let Ok(date) = NaiveDate::parse_from_str(head, &pattern) {
                return Ok(date);
            }
        }
    }
    Err(ParseError::new(format!("date '{raw}' does not match format '{format}'")))
}

static CARD_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:CARTE|CARD|CB)\s*[X*#]+\s*(\d{4})\b").expect("valid card regex")
});

pub fn card_suffix_from_description(description: &str) -> Option<String> {
    CARD_SUFFIX
        .captures(description)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn last_four_digits(field: &str) -> Option<String> {
    let digits: Vec<char> = field.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    Some(digits[digits.len() - 4..].iter().collect())
}

// ---------------------------------------------------------------------------
// Line normalization
// ---------------------------------------------------------------------------

fn field<'a>(fields: &'a [String], idx: usize, name: &str) -> std::result::Result<&'a str, ParseError> {
    fields.get(idx).map(|s| s.trim()).ok_or_else(|| {
        ParseError::new(format!(
            "{name} column {idx} is missing (line has {} fields)",
            fields.len()
        ))
    })
}

fn optional_field<'a>(fields: &'a [String], idx: Option<usize>) -> Option<&'a str> {
    idx.and_then(|i| fields.get(i))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

pub fn normalize_line(
    line: usize,
    fields: &[String],
    mapping: &ColumnMapping,
    format: &AmountFormat,
) -> std::result::Result<ImportRow, ParseError> {
    let date = parse_date(field(fields, mapping.date_column, "date")?, &mapping.date_format)?;

    let amount = match mapping.amount_column {
        Some(idx) => parse_amount(field(fields, idx, "amount")?, format)?,
        None => {
            let debit = optional_field(fields, mapping.debit_column)
                .map(|raw| parse_amount(raw, format))
                .transpose()?;
            let credit = optional_field(fields, mapping.credit_column)
                .map(|raw| parse_amount(raw, format))
                .transpose()?;
            match (debit, credit) {
                (None, None) => return Err(ParseError::new("line has neither a debit nor a credit")),
                (debit, credit) => {
                    credit.unwrap_or_default().abs() - debit.unwrap_or_default().abs()
                }
            }
        }
    };

    let description = field(fields, mapping.description_column, "description")?
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if description.is_empty() {
        return Err(ParseError::new("description is empty"));
    }

    let check_number = optional_field(fields, mapping.check_number_column).map(str::to_string);
    let card_suffix = match optional_field(fields, mapping.card_column) {
        Some(card) => last_four_digits(card),
        None => card_suffix_from_description(&description),
    };

    Ok(ImportRow {
        line,
        date,
        amount,
        description,
        check_number,
        card_suffix,
    })
}

/// Split raw lines into normalized rows and rejected lines, keeping input order.
pub fn normalize_all(
    lines: &[(usize, Vec<String>)],
    mapping: &ColumnMapping,
    format: &AmountFormat,
) -> (Vec<ImportRow>, Vec<RejectedLine>) {
    let mut rows = Vec::new();
    let mut rejected = Vec::new();
    for (line, fields) in lines {
        match normalize_line(*line, fields, mapping, format) {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::debug!(line, error = %e, "rejected statement line");
                rejected.push(RejectedLine {
                    line: *line,
                    raw: fields.clone(),
                    error: e.message,
                });
            }
        }
    }
    tracing::debug!(parsed = rows.len(), rejected = rejected.len(), "normalized statement");
    (rows, rejected)
}

// ---------------------------------------------------------------------------
// Statement files
// ---------------------------------------------------------------------------

pub struct Statement {
    pub source_name: Option<String>,
    pub checksum: String,
    pub lines: Vec<(usize, Vec<String>)>,
}

pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub fn parse_statement_bytes(data: &[u8], mapping: &ColumnMapping) -> Result<Vec<(usize, Vec<String>)>> {
    mapping.validate()?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(mapping.delimiter as u8)
        .from_reader(data);

    let mut lines = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result?;
        if idx < mapping.skip_rows {
            continue;
        }
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(idx + 1);
        lines.push((line, record.iter().map(str::to_string).collect()));
    }
    Ok(lines)
}

pub fn read_statement(path: &Path, mapping: &ColumnMapping) -> Result<Statement> {
    let data = std::fs::read(path)?;
    let lines = parse_statement_bytes(&data, mapping)?;
    Ok(Statement {
        source_name: path.file_name().and_then(|n| n.to_str()).map(str::to_string),
        checksum: checksum(&data),
        lines,
    })
}
