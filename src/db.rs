use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("writedesk.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    ensure_schema(&conn)?;
    Ok(conn)
}

pub fn ensure_schema(conn: &Connection) -> anyhow::Result<()> {
    // The legacy source blob. Read-only to the migrator; rollback leaves it
    // in place so a pair can be re-migrated.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS legacy_project_data(
            activity_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            UNIQUE(activity_id, user_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_metadata(
            id TEXT PRIMARY KEY,
            activity_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            current_tab TEXT NOT NULL,
            instructor_instructions TEXT NOT NULL,
            UNIQUE(activity_id, user_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_ideas(
            id TEXT PRIMARY KEY,
            activity_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            idea_id TEXT NOT NULL,
            content TEXT NOT NULL,
            location TEXT NOT NULL,
            section_id TEXT,
            ai_generated INTEGER NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_project_ideas_scope ON project_ideas(activity_id, user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_content(
            id TEXT PRIMARY KEY,
            activity_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            phase TEXT NOT NULL,
            content TEXT NOT NULL,
            word_count INTEGER NOT NULL,
            UNIQUE(activity_id, user_id, phase)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_chat(
            id TEXT PRIMARY KEY,
            activity_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_project_chat_scope ON project_chat(activity_id, user_id)",
        [],
    )?;

    // Kept for the host application's history features. Nothing in the
    // migration path writes them.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS project_versions(
            id TEXT PRIMARY KEY,
            activity_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            snapshot TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS activity_log(
            id TEXT PRIMARY KEY,
            activity_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            action TEXT NOT NULL,
            detail TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}
