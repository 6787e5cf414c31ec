//! Per-vendor batch budgets and item size estimation.

use postbote_core::model::{EspKind, SubstitutionData};

const MIB: usize = 1024 * 1024;

/// Maximum recipients per batch call.
pub fn max_batch_size(kind: &EspKind) -> usize {
    match kind {
        EspKind::Sparkpost => 2000,
        EspKind::Ses => 50,
        EspKind::Mailgun => 1000,
        EspKind::Sendgrid => 1000,
        EspKind::Pmta => 100,
        EspKind::Other(_) => 100,
    }
}

/// Maximum serialized payload bytes per batch call.
pub fn max_batch_bytes(kind: &EspKind) -> usize {
    match kind {
        EspKind::Sparkpost => 5 * MIB,
        EspKind::Ses => 10 * MIB,
        EspKind::Mailgun => 25 * MIB,
        EspKind::Sendgrid => 30 * MIB,
        EspKind::Pmta | EspKind::Other(_) => 10 * MIB,
    }
}

/// Estimated wire contribution of one queue item: address, three
/// UUIDs, the serialized substitution map, and structural overhead.
pub fn estimate_item_bytes(email: &str, substitution_data: &SubstitutionData) -> usize {
    let subst_len = serde_json::to_string(substitution_data)
        .map(|s| s.len())
        .unwrap_or(0);
    email.len() + 3 * 36 + subst_len + 200
}

#[cfg(test)]
mod tests {
    use super::*;
    use postbote_core::model::SubstValue;

    #[test]
    fn vendor_count_limits() {
        assert_eq!(max_batch_size(&EspKind::Sparkpost), 2000);
        assert_eq!(max_batch_size(&EspKind::Ses), 50);
        assert_eq!(max_batch_size(&EspKind::Mailgun), 1000);
        assert_eq!(max_batch_size(&EspKind::Sendgrid), 1000);
        assert_eq!(max_batch_size(&EspKind::Other("mystery".into())), 100);
    }

    #[test]
    fn vendor_byte_limits() {
        assert_eq!(max_batch_bytes(&EspKind::Sparkpost), 5 * MIB);
        assert_eq!(max_batch_bytes(&EspKind::Ses), 10 * MIB);
        assert_eq!(max_batch_bytes(&EspKind::Mailgun), 25 * MIB);
        assert_eq!(max_batch_bytes(&EspKind::Sendgrid), 30 * MIB);
    }

    #[test]
    fn estimate_grows_with_substitutions() {
        let empty = SubstitutionData::new();
        let mut data = SubstitutionData::new();
        data.insert("first_name".into(), SubstValue::Str("Ada".into()));

        let small = estimate_item_bytes("a@x.y", &empty);
        let larger = estimate_item_bytes("a@x.y", &data);
        assert!(larger > small);
        // Fixed parts: address + 3 UUIDs + overhead + "{}".
        assert_eq!(small, 5 + 108 + 2 + 200);
    }
}
