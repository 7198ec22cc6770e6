//! Database tests

use super::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_db() {
        let db = Database::in_memory().unwrap();
        assert!(db.list_products(None, false).unwrap().is_empty());
        assert!(db.dataset_versions().unwrap().is_empty());
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = Database::in_memory().unwrap();
        // Re-running the additive migration against an initialized file
        // must be a no-op.
        db.run_migrations().unwrap();
        db.run_migrations().unwrap();
    }

    #[test]
    fn test_operations_schema_exists() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();

        let result: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('pending_operations')
                 WHERE name IN ('id', 'kind', 'payload', 'local_order_id', 'status',
                                'retries', 'created_at', 'updated_at', 'next_attempt_at',
                                'signature', 'last_error', 'last_response')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(
            result, 12,
            "pending_operations table should have 12 expected columns"
        );
    }

    #[test]
    fn test_foreign_keys_are_enforced() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();

        // A payment without its order must be impossible
        let result = conn.execute(
            "INSERT INTO offline_payments (local_order_id, method, amount, created_at)
             VALUES ('00000000-0000-0000-0000-000000000000', 'CASH', 1.0, '2024-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err(), "payment without order should violate FK");
    }

    #[test]
    fn test_status_check_constraints() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();

        let result = conn.execute(
            "INSERT INTO pending_operations (id, kind, payload, status, created_at, updated_at)
             VALUES ('x', 'ORDER', '{}', 'SHIPPED', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err(), "unknown status should violate CHECK");
    }

    #[test]
    fn test_wal_and_foreign_keys_pragmas() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();

        let journal: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal.to_lowercase(), "wal");

        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_unreadable_path_refused() {
        // A directory at the database path is unreadable as a file
        let dir = tempfile::TempDir::new().unwrap();
        let result = Database::open(dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_clear_reference_cache_spares_outbound_state() {
        let db = Database::in_memory().unwrap();
        db.cache_dataset(
            crate::models::DatasetKey::Products,
            &[serde_json::json!({"id": 1, "name": "Cola", "price": 2.0})],
            &[],
            "1",
        )
        .unwrap();
        let enqueued = db
            .record_order(serde_json::json!({"total": 2.0}), &[])
            .unwrap();

        db.clear_reference_cache().unwrap();

        assert!(db.list_products(None, false).unwrap().is_empty());
        assert!(db.dataset_versions().unwrap().is_empty());
        // The queue and its order survive
        assert!(db.get_operation(enqueued.operation_id).unwrap().is_some());
        assert!(db
            .get_offline_order(enqueued.local_order_id)
            .unwrap()
            .is_some());
    }
}
