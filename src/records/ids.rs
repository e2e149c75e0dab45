use uuid::Uuid;

use super::model::{Identified, Record};

/// Fresh identifier for a locally created record.
///
/// Version 4 UUIDs carry 122 random bits, so concurrent clients can mint ids
/// without coordinating.
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// Assigns an identifier if the record has none. Returns true when one was minted.
pub fn ensure_id(record: &mut Record) -> bool {
    if record.id().trim().is_empty() {
        record.set_id(new_record_id());
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::records::model::SavingsBalance;

    #[test]
    fn ids_are_unique_v4() {
        let ids: HashSet<String> = (0..10_000).map(|_| new_record_id()).collect();
        assert_eq!(ids.len(), 10_000);

        let parsed = Uuid::parse_str(ids.iter().next().unwrap()).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn ensure_id_keeps_existing() {
        let mut record = Record::SavingsBalance(SavingsBalance {
            id: "keep-me".into(),
            user_id: "u1".into(),
            balance: 0.0,
            created_at: None,
        });
        assert!(!ensure_id(&mut record));
        assert_eq!(record.id(), "keep-me");

        record.set_id(String::new());
        assert!(ensure_id(&mut record));
        assert_eq!(record.id().len(), 36);
    }
}
