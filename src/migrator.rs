use crate::parser::{self, ParseError, ParsedProject};
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ideas_migrated: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_messages_migrated: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_records_migrated: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_records_migrated: Option<usize>,
}

impl MigrationResult {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ideas_migrated: None,
            chat_messages_migrated: None,
            content_records_migrated: None,
            metadata_records_migrated: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Moves one (activity, user) pair's legacy blob into the normalized tables,
/// all-or-nothing. The legacy row itself is never written, so a pair can be
/// migrated again after a rollback.
pub struct DataMigrator<'a> {
    conn: &'a Connection,
}

impl<'a> DataMigrator<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Never propagates an error: every failure anywhere in the pipeline is
    /// folded into a `{success:false, message}` result.
    pub fn migrate(&self, activity_id: i64, user_id: i64) -> MigrationResult {
        match self.try_migrate(activity_id, user_id) {
            Ok(result) => result,
            Err(e) => MigrationResult::failure(e.to_string()),
        }
    }

    fn try_migrate(&self, activity_id: i64, user_id: i64) -> anyhow::Result<MigrationResult> {
        let Some(raw) = self.fetch_legacy_content(activity_id, user_id)? else {
            return Ok(MigrationResult::failure("No data found"));
        };

        // The legacy decoder could not tell a decode failure from a literal
        // null; both count as undecodable here.
        let decoded = serde_json::from_str::<serde_json::Value>(&raw)
            .ok()
            .filter(|v| !v.is_null());
        let Some(decoded) = decoded else {
            return Ok(MigrationResult::failure("Invalid JSON data"));
        };

        let parsed = match parser::parse(&decoded) {
            Ok(p) => p,
            Err(e @ ParseError::InvalidJsonData) => {
                return Ok(MigrationResult::failure(e.to_string()))
            }
        };

        // Dropping the transaction on any error path below rolls back every
        // group; partial writes are never visible.
        let tx = self.conn.unchecked_transaction()?;
        write_metadata(&tx, activity_id, user_id, &parsed)?;
        let ideas_migrated = write_ideas(&tx, activity_id, user_id, &parsed)?;
        let content_records_migrated = write_content(&tx, activity_id, user_id, &parsed)?;
        let chat_messages_migrated = write_chat(&tx, activity_id, user_id, &parsed)?;
        tx.commit()?;

        Ok(MigrationResult {
            success: true,
            message: None,
            ideas_migrated: Some(ideas_migrated),
            chat_messages_migrated: Some(chat_messages_migrated),
            content_records_migrated: Some(content_records_migrated),
            metadata_records_migrated: Some(1),
        })
    }

    /// Deletes every normalized row for the pair in one transaction. Does not
    /// restore the legacy blob; it was never touched.
    pub fn rollback(&self, activity_id: i64, user_id: i64) -> RollbackResult {
        match self.try_rollback(activity_id, user_id) {
            Ok(()) => RollbackResult {
                success: true,
                message: None,
            },
            Err(e) => RollbackResult {
                success: false,
                message: Some(e.to_string()),
            },
        }
    }

    fn try_rollback(&self, activity_id: i64, user_id: i64) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for table in [
            "project_metadata",
            "project_ideas",
            "project_content",
            "project_chat",
        ] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE activity_id = ? AND user_id = ?"),
                (activity_id, user_id),
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn fetch_legacy_content(
        &self,
        activity_id: i64,
        user_id: i64,
    ) -> anyhow::Result<Option<String>> {
        let content = self
            .conn
            .query_row(
                "SELECT content FROM legacy_project_data WHERE activity_id = ? AND user_id = ?",
                (activity_id, user_id),
                |row| row.get(0),
            )
            .optional()?;
        Ok(content)
    }
}

// Upsert by (activity_id, user_id), keeping the existing row's id on update.
fn write_metadata(
    tx: &Transaction,
    activity_id: i64,
    user_id: i64,
    parsed: &ParsedProject,
) -> anyhow::Result<()> {
    let m = &parsed.metadata;
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM project_metadata WHERE activity_id = ? AND user_id = ?",
            (activity_id, user_id),
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            tx.execute(
                "UPDATE project_metadata
                 SET title = ?, description = ?, current_tab = ?, instructor_instructions = ?
                 WHERE id = ?",
                (
                    &m.title,
                    &m.description,
                    &m.current_tab,
                    &m.instructor_instructions,
                    &id,
                ),
            )?;
        }
        None => {
            tx.execute(
                "INSERT INTO project_metadata(id, activity_id, user_id, title, description, current_tab, instructor_instructions)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    activity_id,
                    user_id,
                    &m.title,
                    &m.description,
                    &m.current_tab,
                    &m.instructor_instructions,
                ),
            )?;
        }
    }
    Ok(())
}

// Replace-all: the parsed set is the full truth for the pair. Anything less
// would let stale ideas accumulate across re-migrations.
fn write_ideas(
    tx: &Transaction,
    activity_id: i64,
    user_id: i64,
    parsed: &ParsedProject,
) -> anyhow::Result<usize> {
    tx.execute(
        "DELETE FROM project_ideas WHERE activity_id = ? AND user_id = ?",
        (activity_id, user_id),
    )?;

    let mut ins = tx.prepare(
        "INSERT INTO project_ideas(id, activity_id, user_id, idea_id, content, location, section_id, ai_generated, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (sort_order, idea) in parsed.ideas.iter().enumerate() {
        ins.execute((
            Uuid::new_v4().to_string(),
            activity_id,
            user_id,
            &idea.id,
            &idea.content,
            &idea.location,
            idea.section_id.as_deref(),
            idea.ai_generated as i64,
            sort_order as i64,
        ))?;
    }
    Ok(parsed.ideas.len())
}

// Upsert per phase. Phases absent from this parse are left alone on purpose;
// do not turn this into a delete-all.
fn write_content(
    tx: &Transaction,
    activity_id: i64,
    user_id: i64,
    parsed: &ParsedProject,
) -> anyhow::Result<usize> {
    let mut written = 0usize;
    for (phase, pc) in &parsed.content {
        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM project_content WHERE activity_id = ? AND user_id = ? AND phase = ?",
                (activity_id, user_id, phase),
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE project_content SET content = ?, word_count = ? WHERE id = ?",
                    (&pc.content, pc.word_count, &id),
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO project_content(id, activity_id, user_id, phase, content, word_count)
                     VALUES(?, ?, ?, ?, ?, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        activity_id,
                        user_id,
                        phase,
                        &pc.content,
                        pc.word_count,
                    ),
                )?;
            }
        }
        written += 1;
    }
    Ok(written)
}

// Replace-all, same pattern as ideas.
fn write_chat(
    tx: &Transaction,
    activity_id: i64,
    user_id: i64,
    parsed: &ParsedProject,
) -> anyhow::Result<usize> {
    tx.execute(
        "DELETE FROM project_chat WHERE activity_id = ? AND user_id = ?",
        (activity_id, user_id),
    )?;

    let mut ins = tx.prepare(
        "INSERT INTO project_chat(id, activity_id, user_id, role, content, timestamp, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (sort_order, msg) in parsed.chat.iter().enumerate() {
        ins.execute((
            Uuid::new_v4().to_string(),
            activity_id,
            user_id,
            &msg.role,
            &msg.content,
            &msg.timestamp,
            sort_order as i64,
        ))?;
    }
    Ok(parsed.chat.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        db::ensure_schema(&conn).expect("install schema");
        conn
    }

    fn seed_legacy(conn: &Connection, activity_id: i64, user_id: i64, content: &str) {
        conn.execute(
            "INSERT INTO legacy_project_data(activity_id, user_id, content)
             VALUES(?, ?, ?)
             ON CONFLICT(activity_id, user_id) DO UPDATE SET content = excluded.content",
            (activity_id, user_id, content),
        )
        .expect("seed legacy row");
    }

    fn count_rows(conn: &Connection, table: &str, activity_id: i64, user_id: i64) -> i64 {
        conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE activity_id = ? AND user_id = ?"),
            (activity_id, user_id),
            |row| row.get(0),
        )
        .expect("count rows")
    }

    fn scenario_blob() -> String {
        json!({
            "metadata": {"title": "T", "currentTab": "write"},
            "plan": {
                "ideas": [{"id": "i1", "content": "c1", "location": "brainstorm", "aiGenerated": false}]
            },
            "write": {"content": "<p>x</p>", "wordCount": 10},
            "chatHistory": [{"role": "user", "content": "hi", "timestamp": "2025-01-27T10:30:00.000Z"}]
        })
        .to_string()
    }

    #[test]
    fn missing_source_reports_no_data_and_writes_nothing() {
        let conn = test_conn();
        let result = DataMigrator::new(&conn).migrate(5, 9);
        assert!(!result.success);
        assert_eq!(result.message.as_deref(), Some("No data found"));
        assert_eq!(result.ideas_migrated, None);
        assert_eq!(count_rows(&conn, "project_metadata", 5, 9), 0);
    }

    #[test]
    fn undecodable_source_reports_invalid_json() {
        let conn = test_conn();
        for bad in ["not json", "null", "[1, 2]", "\"just a string\""] {
            seed_legacy(&conn, 1, 1, bad);
            let result = DataMigrator::new(&conn).migrate(1, 1);
            assert!(!result.success, "content: {bad}");
            assert_eq!(result.message.as_deref(), Some("Invalid JSON data"));
        }
        assert_eq!(count_rows(&conn, "project_metadata", 1, 1), 0);
    }

    #[test]
    fn scenario_migration_reports_per_group_counts() {
        let conn = test_conn();
        seed_legacy(&conn, 2, 3, &scenario_blob());
        let result = DataMigrator::new(&conn).migrate(2, 3);

        assert!(result.success, "message: {:?}", result.message);
        assert_eq!(result.message, None);
        assert_eq!(result.ideas_migrated, Some(1));
        assert_eq!(result.chat_messages_migrated, Some(1));
        assert_eq!(result.content_records_migrated, Some(1));
        assert_eq!(result.metadata_records_migrated, Some(1));

        let (tab, title): (String, String) = conn
            .query_row(
                "SELECT current_tab, title FROM project_metadata WHERE activity_id = 2 AND user_id = 3",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("metadata row");
        assert_eq!(tab, "write");
        assert_eq!(title, "T");

        let (body, words): (String, i64) = conn
            .query_row(
                "SELECT content, word_count FROM project_content
                 WHERE activity_id = 2 AND user_id = 3 AND phase = 'write'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("content row");
        assert_eq!(body, "<p>x</p>");
        assert_eq!(words, 10);
    }

    #[test]
    fn empty_blob_still_writes_the_metadata_row() {
        let conn = test_conn();
        seed_legacy(&conn, 4, 4, "{}");
        let result = DataMigrator::new(&conn).migrate(4, 4);
        assert!(result.success);
        assert_eq!(result.ideas_migrated, Some(0));
        assert_eq!(result.metadata_records_migrated, Some(1));
        let tab: String = conn
            .query_row(
                "SELECT current_tab FROM project_metadata WHERE activity_id = 4 AND user_id = 4",
                [],
                |row| row.get(0),
            )
            .expect("metadata row");
        assert_eq!(tab, "plan");
    }

    #[test]
    fn rerun_converges_and_preserves_metadata_identity() {
        let conn = test_conn();
        seed_legacy(&conn, 1, 2, &scenario_blob());
        let migrator = DataMigrator::new(&conn);

        assert!(migrator.migrate(1, 2).success);
        let first_id: String = conn
            .query_row(
                "SELECT id FROM project_metadata WHERE activity_id = 1 AND user_id = 2",
                [],
                |row| row.get(0),
            )
            .expect("metadata id");

        assert!(migrator.migrate(1, 2).success);
        assert_eq!(count_rows(&conn, "project_metadata", 1, 2), 1);
        assert_eq!(count_rows(&conn, "project_ideas", 1, 2), 1);
        assert_eq!(count_rows(&conn, "project_chat", 1, 2), 1);
        assert_eq!(count_rows(&conn, "project_content", 1, 2), 1);

        let second_id: String = conn
            .query_row(
                "SELECT id FROM project_metadata WHERE activity_id = 1 AND user_id = 2",
                [],
                |row| row.get(0),
            )
            .expect("metadata id");
        assert_eq!(first_id, second_id);
    }

    #[test]
    fn rerun_replaces_ideas_and_chat_wholesale() {
        let conn = test_conn();
        let migrator = DataMigrator::new(&conn);

        let first = json!({
            "plan": {"ideas": [
                {"id": "i1", "content": "a"},
                {"id": "i2", "content": "b"}
            ]},
            "chatHistory": [
                {"role": "user", "content": "one", "timestamp": "t1"},
                {"role": "assistant", "content": "two", "timestamp": "t2"}
            ]
        });
        seed_legacy(&conn, 7, 7, &first.to_string());
        assert!(migrator.migrate(7, 7).success);

        let second = json!({
            "plan": {"ideas": [{"id": "i3", "content": "c"}]},
            "chatHistory": [{"role": "user", "content": "three", "timestamp": "t3"}]
        });
        seed_legacy(&conn, 7, 7, &second.to_string());
        let result = migrator.migrate(7, 7);
        assert_eq!(result.ideas_migrated, Some(1));
        assert_eq!(result.chat_messages_migrated, Some(1));

        let idea_id: String = conn
            .query_row(
                "SELECT idea_id FROM project_ideas WHERE activity_id = 7 AND user_id = 7",
                [],
                |row| row.get(0),
            )
            .expect("single idea row");
        assert_eq!(idea_id, "i3");
        assert_eq!(count_rows(&conn, "project_chat", 7, 7), 1);
    }

    #[test]
    fn ideas_keep_parse_order() {
        let conn = test_conn();
        let blob = json!({
            "plan": {"ideas": [
                {"id": "z", "content": "first"},
                {"id": "a", "content": "second"},
                {"id": "m", "content": "third"}
            ]}
        });
        seed_legacy(&conn, 8, 8, &blob.to_string());
        assert!(DataMigrator::new(&conn).migrate(8, 8).success);

        let mut stmt = conn
            .prepare(
                "SELECT idea_id FROM project_ideas
                 WHERE activity_id = 8 AND user_id = 8 ORDER BY sort_order",
            )
            .expect("prepare");
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .expect("query")
            .collect::<Result<_, _>>()
            .expect("rows");
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[test]
    fn absent_phase_is_left_untouched_on_rerun() {
        let conn = test_conn();
        let migrator = DataMigrator::new(&conn);

        let both = json!({
            "write": {"content": "draft one", "wordCount": 2},
            "edit": {"content": "polish one", "wordCount": 2}
        });
        seed_legacy(&conn, 3, 3, &both.to_string());
        assert_eq!(migrator.migrate(3, 3).content_records_migrated, Some(2));

        let write_only = json!({"write": {"content": "draft two", "wordCount": 2}});
        seed_legacy(&conn, 3, 3, &write_only.to_string());
        assert_eq!(migrator.migrate(3, 3).content_records_migrated, Some(1));

        let edit_body: String = conn
            .query_row(
                "SELECT content FROM project_content
                 WHERE activity_id = 3 AND user_id = 3 AND phase = 'edit'",
                [],
                |row| row.get(0),
            )
            .expect("edit row survives");
        assert_eq!(edit_body, "polish one");
        let write_body: String = conn
            .query_row(
                "SELECT content FROM project_content
                 WHERE activity_id = 3 AND user_id = 3 AND phase = 'write'",
                [],
                |row| row.get(0),
            )
            .expect("write row");
        assert_eq!(write_body, "draft two");
    }

    #[test]
    fn chat_write_failure_rolls_back_every_group() {
        let conn = test_conn();
        seed_legacy(&conn, 6, 6, &scenario_blob());
        conn.execute_batch(
            "CREATE TRIGGER force_chat_failure BEFORE INSERT ON project_chat
             BEGIN SELECT RAISE(ABORT, 'forced chat failure'); END",
        )
        .expect("install trigger");

        let result = DataMigrator::new(&conn).migrate(6, 6);
        assert!(!result.success);
        assert!(
            result
                .message
                .as_deref()
                .unwrap_or_default()
                .contains("forced chat failure"),
            "message: {:?}",
            result.message
        );

        assert_eq!(count_rows(&conn, "project_metadata", 6, 6), 0);
        assert_eq!(count_rows(&conn, "project_ideas", 6, 6), 0);
        assert_eq!(count_rows(&conn, "project_content", 6, 6), 0);
        assert_eq!(count_rows(&conn, "project_chat", 6, 6), 0);

        // With the failure gone the same pair migrates cleanly.
        conn.execute_batch("DROP TRIGGER force_chat_failure")
            .expect("drop trigger");
        assert!(DataMigrator::new(&conn).migrate(6, 6).success);
    }

    #[test]
    fn rollback_clears_normalized_rows_but_keeps_the_legacy_blob() {
        let conn = test_conn();
        seed_legacy(&conn, 9, 9, &scenario_blob());
        let migrator = DataMigrator::new(&conn);
        assert!(migrator.migrate(9, 9).success);

        let rb = migrator.rollback(9, 9);
        assert!(rb.success);
        assert_eq!(rb.message, None);
        for table in [
            "project_metadata",
            "project_ideas",
            "project_content",
            "project_chat",
        ] {
            assert_eq!(count_rows(&conn, table, 9, 9), 0, "table: {table}");
        }
        assert_eq!(count_rows(&conn, "legacy_project_data", 9, 9), 1);

        // Re-migration from the preserved blob works.
        assert!(migrator.migrate(9, 9).success);
        assert_eq!(count_rows(&conn, "project_ideas", 9, 9), 1);
    }

    #[test]
    fn rollback_scopes_to_the_requested_pair() {
        let conn = test_conn();
        let migrator = DataMigrator::new(&conn);
        seed_legacy(&conn, 1, 1, &scenario_blob());
        seed_legacy(&conn, 1, 2, &scenario_blob());
        assert!(migrator.migrate(1, 1).success);
        assert!(migrator.migrate(1, 2).success);

        assert!(migrator.rollback(1, 1).success);
        assert_eq!(count_rows(&conn, "project_metadata", 1, 1), 0);
        assert_eq!(count_rows(&conn, "project_metadata", 1, 2), 1);
        assert_eq!(count_rows(&conn, "project_ideas", 1, 2), 1);
    }
}
