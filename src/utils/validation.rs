//! Validation utilities

use bigdecimal::BigDecimal;
use std::collections::HashSet;

use crate::types::*;

/// Round an amount to the smallest currency unit
pub fn round_to_minor(amount: &BigDecimal, scale: i64) -> BigDecimal {
    amount.round(scale)
}

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: &BigDecimal) -> LedgerResult<()> {
    if *amount <= BigDecimal::from(0) {
        Err(LedgerError::Validation(
            "Amount must be positive".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate that a journal description is usable
pub fn validate_description(description: &str) -> LedgerResult<()> {
    if description.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Journal description cannot be empty".to_string(),
        ));
    }

    if description.len() > 500 {
        return Err(LedgerError::Validation(
            "Journal description cannot exceed 500 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate a source id used as an idempotency key
pub fn validate_source_id(source_id: &str) -> LedgerResult<()> {
    if source_id.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Source id cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Round every line to `scale` and check the double-entry rules.
///
/// Returns the rounded lines. Rejects fewer than two lines, non-positive
/// amounts after rounding, and any difference between debit and credit
/// totals.
pub fn normalize_lines(lines: Vec<JournalLine>, scale: i64) -> LedgerResult<Vec<JournalLine>> {
    if lines.len() < 2 {
        return Err(LedgerError::Validation(
            "Journal entry must have at least two lines for double-entry bookkeeping".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut rounded = Vec::with_capacity(lines.len());
    for mut line in lines {
        if line.account_id.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Journal line account cannot be empty".to_string(),
            ));
        }
        if !seen.insert(line.id) {
            return Err(LedgerError::Validation(format!(
                "Journal line {} appears more than once",
                line.id
            )));
        }
        line.amount = round_to_minor(&line.amount, scale);
        validate_positive_amount(&line.amount).map_err(|_| {
            LedgerError::Validation(format!(
                "Line amount for account '{}' must be positive after rounding, got {}",
                line.account_id, line.amount
            ))
        })?;
        rounded.push(line);
    }

    let debits = total_debits(&rounded);
    let credits = total_credits(&rounded);
    if debits != credits {
        return Err(LedgerError::Unbalanced { debits, credits });
    }

    Ok(rounded)
}
