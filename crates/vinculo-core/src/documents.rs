//! Fiscal document types.
//!
//! Value types for the national person identifier ([`Cpf`]), the employer
//! registration identifier ([`Cnpj`]) and the competence period
//! ([`Competence`]), each validated on construction. Parsing accepts the
//! punctuated display forms and normalizes to bare digits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error produced when a fiscal document fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// Wrong number of digits for the document kind.
    #[error("{kind} must have {expected} digits, got {actual}")]
    InvalidLength {
        kind: &'static str,
        expected: &'static str,
        actual: usize,
    },

    /// All digits identical (e.g. "11111111111") - formally passes the
    /// checksum but is never issued.
    #[error("{kind} with repeated digits is not a valid document")]
    RepeatedDigits { kind: &'static str },

    /// Check digits do not match the mod-11 computation.
    #[error("{kind} check digits do not match")]
    ChecksumMismatch { kind: &'static str },

    /// Period string is not in the `YYYY-MM` form or out of bounds.
    #[error("invalid competence period: {reason}")]
    InvalidPeriod { reason: String },
}

fn strip_non_digits(input: &str) -> String {
    input.chars().filter(char::is_ascii_digit).collect()
}

fn all_same(digits: &str) -> bool {
    let mut chars = digits.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => false,
    }
}

fn mod11_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    let remainder = sum % 11;
    if remainder < 2 {
        0
    } else {
        11 - remainder
    }
}

fn digit_values(digits: &str) -> Vec<u32> {
    digits.chars().filter_map(|c| c.to_digit(10)).collect()
}

/// National person identifier (11 digits, two mod-11 check digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cpf(String);

impl Cpf {
    /// Parse and validate a CPF. Accepts punctuated input
    /// (`"123.456.789-09"`) and normalizes to 11 digits.
    pub fn parse(input: &str) -> Result<Self, DocumentError> {
        let digits = strip_non_digits(input);
        if digits.len() != 11 {
            return Err(DocumentError::InvalidLength {
                kind: "CPF",
                expected: "11",
                actual: digits.len(),
            });
        }
        if all_same(&digits) {
            return Err(DocumentError::RepeatedDigits { kind: "CPF" });
        }

        let values = digit_values(&digits);
        // First pass over digits 0..9 with weights 10..2, second pass over
        // digits 0..10 with weights 11..2.
        let first_weights: Vec<u32> = (2..=10).rev().collect();
        let second_weights: Vec<u32> = (2..=11).rev().collect();
        let first = mod11_digit(&values[..9], &first_weights);
        let second = mod11_digit(&values[..10], &second_weights);

        if first != values[9] || second != values[10] {
            return Err(DocumentError::ChecksumMismatch { kind: "CPF" });
        }
        Ok(Self(digits))
    }

    /// The normalized 11-digit form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cpf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Cpf {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Cpf {
    type Error = DocumentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Cpf> for String {
    fn from(value: Cpf) -> Self {
        value.0
    }
}

/// Employer registration identifier.
///
/// Either the full 14-digit registration or the 8-digit registration root
/// (the root alone carries no check digits and is accepted as-is after the
/// repeated-digit screen).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cnpj(String);

/// Weight vectors for the two CNPJ check digits.
const CNPJ_FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const CNPJ_SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

impl Cnpj {
    /// Parse and validate a CNPJ. Accepts punctuated input
    /// (`"11.222.333/0001-81"`) and normalizes to bare digits.
    pub fn parse(input: &str) -> Result<Self, DocumentError> {
        let digits = strip_non_digits(input);
        match digits.len() {
            8 => {
                if all_same(&digits) {
                    return Err(DocumentError::RepeatedDigits { kind: "CNPJ" });
                }
                Ok(Self(digits))
            }
            14 => {
                if all_same(&digits) {
                    return Err(DocumentError::RepeatedDigits { kind: "CNPJ" });
                }
                let values = digit_values(&digits);
                let first = mod11_digit(&values[..12], &CNPJ_FIRST_WEIGHTS);
                let second = mod11_digit(&values[..13], &CNPJ_SECOND_WEIGHTS);
                if first != values[12] || second != values[13] {
                    return Err(DocumentError::ChecksumMismatch { kind: "CNPJ" });
                }
                Ok(Self(digits))
            }
            other => Err(DocumentError::InvalidLength {
                kind: "CNPJ",
                expected: "8 or 14",
                actual: other,
            }),
        }
    }

    /// The normalized digit form (8 or 14 digits).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 8-digit registration root.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.0[..8]
    }

    /// Whether this is the full 14-digit registration.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.0.len() == 14
    }
}

impl fmt::Display for Cnpj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Cnpj {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Cnpj {
    type Error = DocumentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Cnpj> for String {
    fn from(value: Cnpj) -> Self {
        value.0
    }
}

/// A reporting competence period in `YYYY-MM` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Competence {
    year: u16,
    month: u8,
}

impl Competence {
    /// Years outside this window are treated as data-entry mistakes.
    pub const MIN_YEAR: u16 = 2000;
    pub const MAX_YEAR: u16 = 2100;

    /// Build from numeric parts.
    pub fn new(year: u16, month: u8) -> Result<Self, DocumentError> {
        if !(1..=12).contains(&month) {
            return Err(DocumentError::InvalidPeriod {
                reason: format!("month {month} outside 1..=12"),
            });
        }
        if !(Self::MIN_YEAR..=Self::MAX_YEAR).contains(&year) {
            return Err(DocumentError::InvalidPeriod {
                reason: format!("year {year} outside {}..={}", Self::MIN_YEAR, Self::MAX_YEAR),
            });
        }
        Ok(Self { year, month })
    }

    /// Parse from the `YYYY-MM` wire form.
    pub fn parse(input: &str) -> Result<Self, DocumentError> {
        let (year_part, month_part) =
            input.split_once('-').ok_or_else(|| DocumentError::InvalidPeriod {
                reason: format!("'{input}' is not in YYYY-MM form"),
            })?;
        if year_part.len() != 4 || month_part.len() != 2 {
            return Err(DocumentError::InvalidPeriod {
                reason: format!("'{input}' is not in YYYY-MM form"),
            });
        }
        let year: u16 = year_part.parse().map_err(|_| DocumentError::InvalidPeriod {
            reason: format!("year '{year_part}' is not numeric"),
        })?;
        let month: u8 = month_part.parse().map_err(|_| DocumentError::InvalidPeriod {
            reason: format!("month '{month_part}' is not numeric"),
        })?;
        Self::new(year, month)
    }

    #[must_use]
    pub fn year(&self) -> u16 {
        self.year
    }

    #[must_use]
    pub fn month(&self) -> u8 {
        self.month
    }
}

impl fmt::Display for Competence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Competence {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Competence {
    type Error = DocumentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Competence> for String {
    fn from(value: Competence) -> Self {
        value.to_string()
    }
}
