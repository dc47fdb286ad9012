use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("portal.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS branches(
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            password_hash TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            usn TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            username TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            branch TEXT NOT NULL,
            year INTEGER NOT NULL DEFAULT 1,
            semester INTEGER NOT NULL DEFAULT 1,
            serial INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(branch) REFERENCES branches(code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_branch_sem ON students(branch, semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS term_marks(
            usn TEXT NOT NULL,
            term INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(usn, term),
            FOREIGN KEY(usn) REFERENCES students(usn)
        )",
        [],
    )?;

    // Raw cells persist exactly as entered; coercion happens on read in calc.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_scores(
            usn TEXT NOT NULL,
            term INTEGER NOT NULL,
            subject TEXT NOT NULL,
            position INTEGER NOT NULL,
            ia1 TEXT NOT NULL DEFAULT '',
            ia2 TEXT NOT NULL DEFAULT '',
            ia3 TEXT NOT NULL DEFAULT '',
            attendance TEXT NOT NULL DEFAULT '',
            PRIMARY KEY(usn, term, subject),
            FOREIGN KEY(usn, term) REFERENCES term_marks(usn, term)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_scores_record ON subject_scores(usn, term, position)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notes(
            id TEXT PRIMARY KEY,
            branch TEXT NOT NULL,
            semester INTEGER NOT NULL,
            subject TEXT NOT NULL,
            module TEXT NOT NULL,
            filename TEXT NOT NULL,
            filepath TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(branch) REFERENCES branches(code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notes_branch_sem ON notes(branch, semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Workspaces created before notes tracked their uploader need the column.
    ensure_notes_uploader(&conn)?;

    seed_default_branches(&conn)?;

    Ok(conn)
}

fn ensure_notes_uploader(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "notes", "uploader")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE notes ADD COLUMN uploader TEXT", [])?;
    Ok(())
}

/// Seeds the stock branch set on first open so a fresh workspace is usable
/// without any setup calls. Existing rows are never touched.
fn seed_default_branches(conn: &Connection) -> anyhow::Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM branches", [], |r| r.get(0))?;
    if count > 0 {
        return Ok(());
    }

    let seed = [
        ("CSE", "CSE", "csepass"),
        ("AIDS", "CS-AIDS", "aids123"),
        ("AIML", "AIML", "aimlpass"),
        ("CIVIL", "CIVIL", "civil123"),
    ];
    for (code, name, password) in seed {
        conn.execute(
            "INSERT INTO branches(code, name, password_hash) VALUES(?, ?, ?)",
            (code, name, hash_secret(password)),
        )?;
    }
    Ok(())
}

/// SHA-256 hex digest for seeded credentials. Login verification itself is
/// owned by the host application.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
