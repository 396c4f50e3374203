//! # Whitelist CSV Input Gate
//!
//! Parses and validates an uploaded whitelist before anything touches a
//! store. The gate is deliberately strict: every row must carry a valid,
//! checksum-clean, non-zero address and a representable amount, addresses
//! must be unique after checksum normalization, and the row count must stay
//! within bounds. Anything less fails the whole upload — a whitelist is a
//! financial artifact, not a best-effort import.
//!
//! Format: a header row naming the `WhitelistAddress` and `WhitelistAmount`
//! columns (in either order), then one entry per line. Lines are trimmed and
//! empty lines skipped.

use std::collections::HashSet;

use alloy_primitives::U256;

use crate::address::EthAddress;
use crate::amount::parse_token_amount;
use crate::config::{MAX_AMOUNT_LEN, MAX_WHITELIST_ROWS};
use crate::error::ServiceError;

/// Required header column for the address.
pub const COLUMN_ADDRESS: &str = "WhitelistAddress";

/// Required header column for the token amount.
pub const COLUMN_AMOUNT: &str = "WhitelistAmount";

/// One validated whitelist row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistEntry {
    /// The validated, checksum-normalizable address.
    pub address: EthAddress,
    /// The exact wei amount.
    pub amount_wei: U256,
}

/// Parses and validates a whitelist CSV, returning entries in file order.
pub fn parse_whitelist_csv(bytes: &[u8]) -> Result<Vec<WhitelistEntry>, ServiceError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ServiceError::validation("whitelist is not valid UTF-8"))?;

    let mut lines = text
        .lines()
        .map(str::trim)
        .enumerate()
        .filter(|(_, line)| !line.is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| ServiceError::validation("whitelist is empty"))?;
    let (address_col, amount_col) = parse_header(header)?;
    let min_fields = address_col.max(amount_col) + 1;

    let mut entries = Vec::new();
    let mut seen = HashSet::new();

    for (line_idx, line) in lines {
        let row = line_idx + 1; // 1-based, including the header line
        if entries.len() == MAX_WHITELIST_ROWS {
            return Err(ServiceError::validation(format!(
                "whitelist exceeds the maximum of {MAX_WHITELIST_ROWS} rows"
            )));
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < min_fields {
            return Err(ServiceError::validation(format!(
                "row {row}: expected {min_fields} columns, found {}",
                fields.len()
            )));
        }

        let address = EthAddress::parse_checked(fields[address_col])
            .map_err(|e| ServiceError::validation(format!("row {row}: {e}")))?;

        let raw_amount = fields[amount_col];
        if raw_amount.is_empty() || raw_amount.len() > MAX_AMOUNT_LEN {
            return Err(ServiceError::validation(format!(
                "row {row}: amount must be between 1 and {MAX_AMOUNT_LEN} characters"
            )));
        }
        let amount_wei = parse_token_amount(raw_amount)
            .map_err(|e| ServiceError::validation(format!("row {row}: {e}")))?;

        if !seen.insert(*address.as_bytes()) {
            return Err(ServiceError::validation(format!(
                "row {row}: duplicate address {}",
                address.checksummed()
            )));
        }

        entries.push(WhitelistEntry {
            address,
            amount_wei,
        });
    }

    if entries.is_empty() {
        return Err(ServiceError::validation("whitelist contains no entries"));
    }

    Ok(entries)
}

/// Locates the two required columns in the header row.
fn parse_header(header: &str) -> Result<(usize, usize), ServiceError> {
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let address_col = columns.iter().position(|c| *c == COLUMN_ADDRESS);
    let amount_col = columns.iter().position(|c| *c == COLUMN_AMOUNT);
    match (address_col, amount_col) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(ServiceError::validation(format!(
            "whitelist header must name the {COLUMN_ADDRESS} and {COLUMN_AMOUNT} columns"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECKSUMMED: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    /// Builds a CSV with `n` distinct lowercase addresses.
    fn csv_with_rows(n: usize) -> String {
        let mut out = String::from("WhitelistAddress,WhitelistAmount\n");
        for i in 1..=n {
            out.push_str(&format!("0x{i:040x},1250\n"));
        }
        out
    }

    fn expect_validation(csv: &str, needle: &str) {
        match parse_whitelist_csv(csv.as_bytes()) {
            Err(ServiceError::Validation(msg)) => {
                assert!(msg.contains(needle), "message {msg:?} missing {needle:?}")
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn parses_a_simple_whitelist() {
        let csv = "WhitelistAddress,WhitelistAmount\n\
                   0x0000000000000000000000000000000000000001,6666.67\n\
                   0x0000000000000000000000000000000000000002,1250\n";
        let entries = parse_whitelist_csv(csv.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].amount_wei.to_string(), "6666670000000000000000");
    }

    #[test]
    fn columns_may_appear_in_either_order() {
        let csv = format!("WhitelistAmount,WhitelistAddress\n42,{CHECKSUMMED}\n");
        let entries = parse_whitelist_csv(csv.as_bytes()).unwrap();
        assert_eq!(entries[0].address.checksummed(), CHECKSUMMED);
        assert_eq!(entries[0].amount_wei.to_string(), "42000000000000000000");
    }

    #[test]
    fn blank_lines_and_padding_are_tolerated() {
        let csv = "\n  WhitelistAddress , WhitelistAmount  \n\n\
                   \t0x0000000000000000000000000000000000000001 , 1 \n\n";
        let entries = parse_whitelist_csv(csv.as_bytes()).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn missing_header_fails() {
        expect_validation(
            "0x0000000000000000000000000000000000000001,1\n",
            "header",
        );
    }

    #[test]
    fn empty_input_fails() {
        expect_validation("", "empty");
        expect_validation("WhitelistAddress,WhitelistAmount\n", "no entries");
    }

    #[test]
    fn short_row_fails_with_row_number() {
        let csv = "WhitelistAddress,WhitelistAmount\n0x0000000000000000000000000000000000000001\n";
        expect_validation(csv, "row 2");
    }

    #[test]
    fn zero_address_fails() {
        let csv = format!(
            "WhitelistAddress,WhitelistAmount\n0x{},1\n",
            "0".repeat(40)
        );
        expect_validation(&csv, "zero address");
    }

    #[test]
    fn bad_checksum_fails() {
        // Lowercase one letter of a valid checksum form.
        let broken = CHECKSUMMED.replace("Ef1BeAed", "ef1BeAed");
        let csv = format!("WhitelistAddress,WhitelistAmount\n{broken},1\n");
        expect_validation(&csv, "EIP-55");
    }

    #[test]
    fn duplicate_addresses_fail_even_across_casings() {
        let csv = format!(
            "WhitelistAddress,WhitelistAmount\n{},1\n{},2\n",
            CHECKSUMMED.to_ascii_lowercase(),
            CHECKSUMMED
        );
        expect_validation(&csv, "duplicate address");
    }

    #[test]
    fn oversized_amount_fails() {
        let csv = format!(
            "WhitelistAddress,WhitelistAmount\n0x{:040x},{}\n",
            1,
            "9".repeat(31)
        );
        expect_validation(&csv, "row 2");
    }

    #[test]
    fn row_cap_boundary() {
        // Exactly at the cap succeeds.
        let at_cap = csv_with_rows(MAX_WHITELIST_ROWS);
        assert_eq!(
            parse_whitelist_csv(at_cap.as_bytes()).unwrap().len(),
            MAX_WHITELIST_ROWS
        );

        // One over fails.
        let over = csv_with_rows(MAX_WHITELIST_ROWS + 1);
        expect_validation(&over, "maximum");
    }
}
