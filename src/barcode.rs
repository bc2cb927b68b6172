//! Checksummed labware barcode generation and verification.
//!
//! A barcode is `prefix` + the seed rendered as uppercase hex (zero-padded to
//! at least [`SEED_HEX_WIDTH`] digits) + one check digit. The check digit is
//! a weighted sum over the hex body: digits are read least-significant
//! first, every digit at an odd 0-based position is tripled, and the check
//! digit is the negation of the total modulo 16. Any single-digit
//! transcription error changes the sum by a value coprime to 16, so
//! re-verification catches it without a store lookup.

use crate::types::BarcodeSeed;

/// Minimum width of the hex seed body.
pub const SEED_HEX_WIDTH: usize = 4;

/// Barcode generation/verification failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarcodeError {
    /// Barcode does not start with the expected prefix.
    BadPrefix {
        /// Prefix the barcode was expected to carry.
        expected: String,
    },
    /// Barcode body is too short to hold a seed and check digit.
    TooShort,
    /// A character in the body is not a hex digit.
    NonHexDigit(char),
    /// Recomputed check digit disagrees with the barcode's.
    ChecksumMismatch {
        /// Check digit recomputed from the body.
        expected: char,
        /// Check digit present on the barcode.
        found: char,
    },
}

/// Derives the barcode for `seed` under `prefix`.
pub fn generate(prefix: &str, seed: BarcodeSeed) -> String {
    let body = format!("{seed:0width$X}", width = SEED_HEX_WIDTH);
    // The body is uppercase hex by construction, so the checksum cannot fail.
    let check = checksum_digit(&body).unwrap_or('0');
    format!("{prefix}{body}{check}")
}

/// Computes the check digit for a hex body.
pub fn checksum_digit(body: &str) -> Result<char, BarcodeError> {
    if body.is_empty() {
        return Err(BarcodeError::TooShort);
    }
    let mut sum: u32 = 0;
    for (i, ch) in body.chars().rev().enumerate() {
        let value = ch.to_digit(16).ok_or(BarcodeError::NonHexDigit(ch))?;
        sum += if i % 2 == 1 { value * 3 } else { value };
    }
    let check = (16 - (sum % 16)) % 16;
    let digit = char::from_digit(check, 16).ok_or(BarcodeError::TooShort)?;
    Ok(digit.to_ascii_uppercase())
}

/// Checks a full barcode against `prefix` and its own check digit, returning
/// the embedded seed.
pub fn verify(prefix: &str, barcode: &str) -> Result<BarcodeSeed, BarcodeError> {
    let rest = barcode.strip_prefix(prefix).ok_or(BarcodeError::BadPrefix {
        expected: prefix.to_string(),
    })?;
    if rest.len() < SEED_HEX_WIDTH + 1 {
        return Err(BarcodeError::TooShort);
    }
    let (body, check) = rest.split_at(rest.len() - 1);
    let found = check.chars().next().ok_or(BarcodeError::TooShort)?;
    let expected = checksum_digit(body)?;
    if found.to_ascii_uppercase() != expected {
        return Err(BarcodeError::ChecksumMismatch { expected, found });
    }
    let seed = BarcodeSeed::from_str_radix(body, 16).map_err(|_| {
        body.chars()
            .find(|c| !c.is_ascii_hexdigit())
            .map(BarcodeError::NonHexDigit)
            .unwrap_or(BarcodeError::TooShort)
    })?;
    Ok(seed)
}
