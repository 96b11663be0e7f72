use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};

fn pair_params(req: &Request) -> Option<(i64, i64)> {
    let activity_id = req.params.get("activityId")?.as_i64()?;
    let user_id = req.params.get("userId")?.as_i64()?;
    Some((activity_id, user_id))
}

// The normalized read path. Keys mirror the legacy document's camelCase so
// the host application can swap data sources without remapping.
fn handle_project_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some((activity_id, user_id)) = pair_params(req) else {
        return err(
            &req.id,
            "bad_params",
            "missing params.activityId / params.userId",
            None,
        );
    };

    match fetch_project(conn, activity_id, user_id) {
        Ok(project) => ok(&req.id, project),
        Err(e) => err(&req.id, "db_read_failed", e.to_string(), None),
    }
}

fn fetch_project(conn: &Connection, activity_id: i64, user_id: i64) -> anyhow::Result<Value> {
    let metadata: Option<Value> = conn
        .query_row(
            "SELECT title, description, current_tab, instructor_instructions
             FROM project_metadata WHERE activity_id = ? AND user_id = ?",
            (activity_id, user_id),
            |row| {
                Ok(json!({
                    "title": row.get::<_, String>(0)?,
                    "description": row.get::<_, String>(1)?,
                    "currentTab": row.get::<_, String>(2)?,
                    "instructorInstructions": row.get::<_, String>(3)?,
                }))
            },
        )
        .optional()?;

    let mut ideas_stmt = conn.prepare(
        "SELECT idea_id, content, location, section_id, ai_generated
         FROM project_ideas WHERE activity_id = ? AND user_id = ?
         ORDER BY sort_order",
    )?;
    let ideas = ideas_stmt
        .query_map((activity_id, user_id), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "content": row.get::<_, String>(1)?,
                "location": row.get::<_, String>(2)?,
                "sectionId": row.get::<_, Option<String>>(3)?,
                "aiGenerated": row.get::<_, i64>(4)? != 0,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut content_stmt = conn.prepare(
        "SELECT phase, content, word_count
         FROM project_content WHERE activity_id = ? AND user_id = ?",
    )?;
    let mut content = serde_json::Map::new();
    let phases = content_stmt.query_map((activity_id, user_id), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    for phase in phases {
        let (phase, body, word_count) = phase?;
        content.insert(phase, json!({ "content": body, "wordCount": word_count }));
    }

    let mut chat_stmt = conn.prepare(
        "SELECT role, content, timestamp
         FROM project_chat WHERE activity_id = ? AND user_id = ?
         ORDER BY sort_order",
    )?;
    let chat = chat_stmt
        .query_map((activity_id, user_id), |row| {
            Ok(json!({
                "role": row.get::<_, String>(0)?,
                "content": row.get::<_, String>(1)?,
                "timestamp": row.get::<_, String>(2)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "metadata": metadata,
        "ideas": ideas,
        "content": content,
        "chat": chat,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "project.get" => Some(handle_project_get(state, req)),
        _ => None,
    }
}
