//! Grid addresses for labware slots.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reasons an address string fails to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    /// Input was empty.
    Empty,
    /// Row part was not a letter or a positive number.
    BadRow(String),
    /// Column part was not a positive number.
    BadColumn(String),
}

/// Immutable 1-based (row, column) position on a labware grid.
///
/// Ordering is row-major: every address in row 1 precedes every address in
/// row 2, and within a row addresses order by column. Rendered as the row
/// letter followed by the column number (`A1`, `H12`) for rows up to 26,
/// falling back to `row,column` above that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    /// 1-based row.
    pub row: u32,
    /// 1-based column.
    pub column: u32,
}

impl Address {
    /// Constructs an address from 1-based row and column.
    pub const fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    /// Iterates every address of a `num_rows` x `num_columns` grid in
    /// row-major order.
    pub fn grid(num_rows: u32, num_columns: u32) -> impl Iterator<Item = Address> {
        (1..=num_rows).flat_map(move |row| (1..=num_columns).map(move |column| Address { row, column }))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if (1..=26).contains(&self.row) {
            let letter = (b'A' + (self.row - 1) as u8) as char;
            write!(f, "{letter}{}", self.column)
        } else {
            write!(f, "{},{}", self.row, self.column)
        }
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressParseError::Empty);
        }

        if let Some((row_part, col_part)) = s.split_once(',') {
            let row: u32 = row_part
                .trim()
                .parse()
                .ok()
                .filter(|r| *r >= 1)
                .ok_or_else(|| AddressParseError::BadRow(row_part.to_string()))?;
            let column: u32 = col_part
                .trim()
                .parse()
                .ok()
                .filter(|c| *c >= 1)
                .ok_or_else(|| AddressParseError::BadColumn(col_part.to_string()))?;
            return Ok(Self { row, column });
        }

        let mut chars = s.chars();
        let first = chars.next().ok_or(AddressParseError::Empty)?;
        if !first.is_ascii_alphabetic() {
            return Err(AddressParseError::BadRow(first.to_string()));
        }
        let row = u32::from(first.to_ascii_uppercase() as u8 - b'A') + 1;
        let rest = chars.as_str();
        let column: u32 = rest
            .parse()
            .ok()
            .filter(|c| *c >= 1)
            .ok_or_else(|| AddressParseError::BadColumn(rest.to_string()))?;
        Ok(Self { row, column })
    }
}
