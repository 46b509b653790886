use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    account_type TEXT NOT NULL,
    institution TEXT,
    last_four TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (user_id, name),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS payees (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (user_id, name),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS import_batches (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    account_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'confirmed', 'failed')),
    source_name TEXT,
    checksum TEXT,
    parsed_data TEXT NOT NULL,
    rejected_data TEXT NOT NULL DEFAULT '[]',
    match_results TEXT NOT NULL,
    matched_count INTEGER NOT NULL DEFAULT 0,
    created_count INTEGER NOT NULL DEFAULT 0,
    skipped_count INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    confirmed_at TEXT,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    amount_cents INTEGER NOT NULL,
    description TEXT NOT NULL,
    bank_description TEXT,
    payee_id INTEGER,
    check_number TEXT,
    reconciled INTEGER NOT NULL DEFAULT 0,
    import_batch_id INTEGER,
    reconciled_batch_id INTEGER,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
    FOREIGN KEY (payee_id) REFERENCES payees(id) ON DELETE SET NULL,
    FOREIGN KEY (import_batch_id) REFERENCES import_batches(id) ON DELETE SET NULL,
    FOREIGN KEY (reconciled_batch_id) REFERENCES import_batches(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_open
    ON transactions (account_id, reconciled, amount_cents);

CREATE INDEX IF NOT EXISTS idx_transactions_statement
    ON transactions (account_id, date, amount_cents);

CREATE TABLE IF NOT EXISTS payee_aliases (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL,
    payee_id INTEGER NOT NULL,
    bank_description TEXT NOT NULL,
    normalized_pattern TEXT NOT NULL,
    times_matched INTEGER NOT NULL DEFAULT 1,
    last_matched_at TEXT NOT NULL DEFAULT (datetime('now')),
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (user_id, normalized_pattern),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (payee_id) REFERENCES payees(id) ON DELETE CASCADE
);
";

pub const DB_FILE: &str = "budgie.db";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    // Concurrent confirms queue on the write lock instead of failing fast.
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::ledger;

    pub struct Fixture {
        pub _dir: tempfile::TempDir,
        pub conn: Connection,
        pub user_id: i64,
        pub account_id: i64,
    }

    /// Fresh database with one user and one checking account.
    pub fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        let user_id = ledger::ensure_user(&conn, "alice").unwrap();
        let account_id =
            ledger::add_account(&conn, user_id, "Compte Courant", "checking", None, None).unwrap();
        Fixture {
            _dir: dir,
            conn,
            user_id,
            account_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &["users", "accounts", "payees", "transactions", "import_batches", "payee_aliases"] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_batch_status_is_constrained() {
        let (_dir, conn) = test_db();
        conn.execute("INSERT INTO users (name) VALUES ('u')", []).unwrap();
        conn.execute(
            "INSERT INTO accounts (user_id, name, account_type) VALUES (1, 'a', 'checking')",
            [],
        )
        .unwrap();
        let bad = conn.execute(
            "INSERT INTO import_batches (user_id, account_id, status, parsed_data, match_results) \
             VALUES (1, 1, 'reviewed', '[]', '[]')",
            [],
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_aliases_cascade_with_user() {
        let (_dir, conn) = test_db();
        conn.execute("INSERT INTO users (name) VALUES ('u')", []).unwrap();
        conn.execute("INSERT INTO payees (user_id, name) VALUES (1, 'Bistrot')", []).unwrap();
        conn.execute(
            "INSERT INTO payee_aliases (user_id, payee_id, bank_description, normalized_pattern) \
             VALUES (1, 1, 'CB BISTROT 12', 'cb bistrot')",
            [],
        )
        .unwrap();
        conn.execute("DELETE FROM users WHERE id = 1", []).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM payee_aliases", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
