//! Database tests

use super::*;
use crate::models::*;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_candidate(notification_id: i64, matched_text: &str) -> NewCandidateEvent {
        NewCandidateEvent {
            categories: vec![],
            source_notification_id: notification_id,
            source_notification_key: format!("key-{}", notification_id),
            source_notification_group: "group".to_string(),
            source_package: "com.chase.sig.android".to_string(),
            source_post_time: 1_696_700_000_000,
            matched_text: matched_text.to_string(),
            amount_cents: 200,
            title: "Chase Bank Spending".to_string(),
            direction: Direction::Spend,
            account: Some("Chase Freedom".to_string()),
            date: Some("Oct 7, 2023".to_string()),
            merchant: Some("My Favorite Merchant".to_string()),
            description: None,
        }
    }

    fn sample_transaction(name: &str, categories: Vec<i64>) -> NewTransaction {
        NewTransaction {
            categories,
            name: name.to_string(),
            amount_cents: 999,
            date: NaiveDate::from_ymd_opt(2023, 10, 7).unwrap(),
            direction: Direction::Spend,
            note: "note".to_string(),
        }
    }

    #[test]
    fn test_in_memory_db() {
        let db = Database::in_memory().unwrap();
        assert!(db.list_rules().unwrap().is_empty());
        assert!(db.list_candidates().unwrap().is_empty());
        assert!(db.list_transactions().unwrap().is_empty());
    }

    #[test]
    fn test_rule_crud_and_pattern_cascade() {
        let db = Database::in_memory().unwrap();

        let created = db
            .create_rule(
                "My Bank",
                Direction::Spend,
                &["com.example.bank".to_string()],
                &[
                    r"spent \$(?P<amount>[\d.]+)".to_string(),
                    r"paid \$(?P<amount>[\d.]+)".to_string(),
                ],
            )
            .unwrap();

        assert!(!created.rule.system);
        assert!(created.rule.enabled);
        assert!(created.rule.tainted_on.is_none());
        assert_eq!(created.patterns.len(), 2);
        assert_eq!(created.patterns[0].position, 0);
        assert_eq!(created.patterns[1].position, 1);
        assert_eq!(created.rule.scope, vec!["com.example.bank".to_string()]);

        // Delete cascades patterns and scope rows in the same transaction
        assert!(db.delete_rule(&created.rule.id).unwrap());
        assert!(db.get_rule(&created.rule.id).unwrap().is_none());

        let conn = db.conn().unwrap();
        let orphans: i64 = conn
            .query_row("SELECT COUNT(*) FROM match_patterns", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
        let scopes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM notification_rule_scopes",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(scopes, 0);
    }

    #[test]
    fn test_update_taints_system_rules_only() {
        let db = Database::in_memory().unwrap();

        // User rule: edits never taint
        let user_rule = db
            .create_rule("Mine", Direction::Spend, &[], &[])
            .unwrap()
            .rule;
        let edited = db.update_rule(&user_rule.with_name("Mine v2")).unwrap();
        assert!(edited.tainted_on.is_none());

        // System rule: first edit stamps tainted_on, later edits keep it
        db.upsert_system_rule(
            "builtin-test",
            "Built-in",
            Direction::Spend,
            &[],
            &[r"(?P<amount>\d+)".to_string()],
        )
        .unwrap();
        let system = db.get_rule("builtin-test").unwrap().unwrap();
        assert!(system.system);

        let tainted = db.update_rule(&system.with_name("Edited")).unwrap();
        let first_taint = tainted.tainted_on.unwrap();

        let again = db.update_rule(&tainted.with_name("Edited twice")).unwrap();
        assert_eq!(again.tainted_on.unwrap(), first_taint);
    }

    #[test]
    fn test_enabled_scope_filter() {
        let db = Database::in_memory().unwrap();
        db.create_rule(
            "Scoped",
            Direction::Spend,
            &["com.a".to_string(), "com.b".to_string()],
            &[r"(?P<amount>\d+)".to_string()],
        )
        .unwrap();

        assert_eq!(db.list_enabled_rules_for_package("com.a").unwrap().len(), 1);
        assert_eq!(db.list_enabled_rules_for_package("com.b").unwrap().len(), 1);
        assert!(db
            .list_enabled_rules_for_package("com.c")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_candidate_upsert_dedup() {
        let db = Database::in_memory().unwrap();

        let first = db.upsert_candidate(&sample_candidate(1, "matched")).unwrap();
        assert!(first.is_insert());

        // Identical identity key: same row, fields refreshed
        let mut redelivery = sample_candidate(1, "matched");
        redelivery.amount_cents = 300;
        redelivery.merchant = Some("Updated Merchant".to_string());
        let second = db.upsert_candidate(&redelivery).unwrap();
        assert!(!second.is_insert());
        assert_eq!(second.event().id, first.event().id);
        assert_eq!(second.event().amount_cents, 300);
        assert_eq!(
            second.event().merchant.as_deref(),
            Some("Updated Merchant")
        );

        // Different matched_text is a different identity
        let third = db.upsert_candidate(&sample_candidate(1, "other text")).unwrap();
        assert!(third.is_insert());
        assert_eq!(db.list_candidates().unwrap().len(), 2);
    }

    #[test]
    fn test_candidate_consumption_is_monotonic() {
        let db = Database::in_memory().unwrap();
        let event = db
            .upsert_candidate(&sample_candidate(1, "m"))
            .unwrap()
            .event()
            .clone();
        assert!(!event.used);
        assert_eq!(db.list_unused_candidates().unwrap().len(), 1);

        let consumed = db.mark_candidate_used(event.id).unwrap();
        assert!(consumed.used);
        assert!(db.list_unused_candidates().unwrap().is_empty());

        // Idempotent
        let again = db.mark_candidate_used(event.id).unwrap();
        assert!(again.used);

        // A redelivery merge never resets the flag
        let merged = db.upsert_candidate(&sample_candidate(1, "m")).unwrap();
        assert!(merged.event().used);
        assert!(db.list_unused_candidates().unwrap().is_empty());
    }

    #[test]
    fn test_candidate_lookup_by_notification_key() {
        let db = Database::in_memory().unwrap();
        db.upsert_candidate(&sample_candidate(1, "a")).unwrap();
        db.upsert_candidate(&sample_candidate(2, "b")).unwrap();

        let hits = db.list_candidates_by_notification_key("key-2").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_notification_id, 2);
    }

    #[test]
    fn test_transaction_crud_with_categories() {
        let db = Database::in_memory().unwrap();
        let groceries = db.upsert_category("Groceries").unwrap();
        let dining = db.upsert_category("Dining").unwrap();

        let tx = db
            .insert_transaction(&sample_transaction("Milk", vec![groceries.id]))
            .unwrap();
        assert_eq!(tx.categories, vec![groceries.id]);
        assert!(tx.automatic_id.is_none());

        assert_eq!(
            db.list_transactions_by_category(groceries.id).unwrap().len(),
            1
        );
        assert!(db
            .list_transactions_by_category(dining.id)
            .unwrap()
            .is_empty());

        // Re-categorize
        let mut edited = tx.clone();
        edited.categories = vec![dining.id];
        edited.name = "Lunch".to_string();
        let stored = db.update_transaction(&edited).unwrap();
        assert_eq!(stored.categories, vec![dining.id]);
        assert!(db
            .list_transactions_by_category(groceries.id)
            .unwrap()
            .is_empty());

        assert!(db.delete_transaction(tx.id).unwrap());
        assert!(db.list_transactions().unwrap().is_empty());

        // Junction rows cascaded
        let conn = db.conn().unwrap();
        let junction: i64 = conn
            .query_row("SELECT COUNT(*) FROM transaction_categories", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(junction, 0);
    }

    #[test]
    fn test_transaction_from_candidate() {
        let db = Database::in_memory().unwrap();
        let candidate = db
            .upsert_candidate(&sample_candidate(1, "m"))
            .unwrap()
            .event()
            .clone();

        let tx = db
            .insert_transaction_from_candidate(&sample_transaction("Auto", vec![]), candidate.id)
            .unwrap();
        assert_eq!(tx.automatic_id, Some(candidate.id));
        assert!(tx.automatic_created_date.is_some());

        // The used flip happened in the same storage transaction
        assert!(db.get_candidate(candidate.id).unwrap().unwrap().used);

        // Unknown candidate is rejected
        assert!(db
            .insert_transaction_from_candidate(&sample_transaction("Bad", vec![]), 9999)
            .is_err());
    }

    #[test]
    fn test_candidate_feeds_at_most_one_transaction() {
        let db = Database::in_memory().unwrap();
        let candidate = db
            .upsert_candidate(&sample_candidate(1, "m"))
            .unwrap()
            .event()
            .clone();

        db.insert_transaction_from_candidate(&sample_transaction("First", vec![]), candidate.id)
            .unwrap();

        // The consumption claim lives inside the storage transaction, so a
        // second insert fails even when the caller's used check was stale
        let second = db
            .insert_transaction_from_candidate(&sample_transaction("Second", vec![]), candidate.id);
        assert!(second.is_err());
        assert_eq!(db.list_transactions().unwrap().len(), 1);
        assert!(db.get_candidate(candidate.id).unwrap().unwrap().used);
    }

    #[test]
    fn test_candidate_delete_cascades_to_transaction() {
        let db = Database::in_memory().unwrap();
        let candidate = db
            .upsert_candidate(&sample_candidate(1, "m"))
            .unwrap()
            .event()
            .clone();
        let tx = db
            .insert_transaction_from_candidate(&sample_transaction("Auto", vec![]), candidate.id)
            .unwrap();

        assert!(db.delete_candidate(candidate.id).unwrap());
        assert!(db.get_transaction(tx.id).unwrap().is_none());
    }

    #[test]
    fn test_category_and_source_upsert_dedupe() {
        let db = Database::in_memory().unwrap();

        let a = db.upsert_category("Groceries").unwrap();
        let b = db.upsert_category("Groceries").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(db.list_categories().unwrap().len(), 1);

        let checking = db.upsert_source("Checking").unwrap();
        let same = db.upsert_source("Checking").unwrap();
        assert_eq!(checking.id, same.id);
        let renamed = db.rename_source(checking.id, "Main Checking").unwrap();
        assert_eq!(renamed.name, "Main Checking");
    }

    #[test]
    fn test_soft_reset_preserves_configuration() {
        let db = Database::in_memory().unwrap();
        db.create_rule(
            "Keep me",
            Direction::Spend,
            &["com.example.bank".to_string()],
            &[r"(?P<amount>\d+)".to_string()],
        )
        .unwrap();
        db.upsert_category("Groceries").unwrap();
        db.upsert_candidate(&sample_candidate(1, "m")).unwrap();
        db.insert_transaction(&sample_transaction("T", vec![])).unwrap();

        db.soft_reset().unwrap();

        assert_eq!(db.list_rules().unwrap().len(), 1);
        assert_eq!(db.list_categories().unwrap().len(), 1);
        assert!(db.list_candidates().unwrap().is_empty());
        assert!(db.list_transactions().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_on_disk_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("centime.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::new_unencrypted(path).unwrap();
            db.upsert_category("Groceries").unwrap();
        }

        let db = Database::new_unencrypted(path).unwrap();
        assert_eq!(db.list_categories().unwrap().len(), 1);
        assert_eq!(db.path(), path);
    }

    #[test]
    fn test_reopen_encrypted_database_with_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("centime-enc.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::new_with_key(path, Some("hunter2")).unwrap();
            db.upsert_source("Checking").unwrap();
        }

        let db = Database::new_with_key(path, Some("hunter2")).unwrap();
        assert_eq!(db.list_sources().unwrap().len(), 1);
    }
}
