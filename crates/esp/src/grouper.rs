//! Batch grouper: split ordered queue items under count and byte budgets.
//!
//! Batches are emitted greedily in input order; when the next item
//! would violate either limit, the current batch is closed and a new
//! one is opened. A single item exceeding the byte budget on its own
//! still becomes its own batch — validation can reject it post hoc.

use postbote_core::model::{EspKind, QueueItem};

use crate::error::EspError;
use crate::limits::{estimate_item_bytes, max_batch_bytes, max_batch_size};

/// Split `items` into batches for `kind`, preserving order.
pub fn split_batches(items: Vec<QueueItem>, kind: &EspKind) -> Vec<Vec<QueueItem>> {
    let count_limit = max_batch_size(kind);
    let byte_limit = max_batch_bytes(kind);

    let mut batches = Vec::new();
    let mut current: Vec<QueueItem> = Vec::new();
    let mut current_bytes = 0usize;

    for item in items {
        let item_bytes = estimate_item_bytes(&item.email, &item.substitution_data);
        let over_count = current.len() + 1 > count_limit;
        let over_bytes = current_bytes + item_bytes > byte_limit;

        if !current.is_empty() && (over_count || over_bytes) {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        current_bytes += item_bytes;
        current.push(item);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Reject a batch that exceeds either budget.
pub fn validate_batch(batch: &[QueueItem], kind: &EspKind) -> Result<(), EspError> {
    let count_limit = max_batch_size(kind);
    if batch.len() > count_limit {
        return Err(EspError::OverBudget(format!(
            "{} recipients exceeds {} limit of {}",
            batch.len(),
            kind,
            count_limit
        )));
    }

    let bytes: usize = batch
        .iter()
        .map(|i| estimate_item_bytes(&i.email, &i.substitution_data))
        .sum();
    let byte_limit = max_batch_bytes(kind);
    if bytes > byte_limit {
        return Err(EspError::OverBudget(format!(
            "{} estimated bytes exceeds {} limit of {}",
            bytes, kind, byte_limit
        )));
    }

    Ok(())
}
