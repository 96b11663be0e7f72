use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn pair_params(req: &Request) -> Option<(i64, i64)> {
    let activity_id = req.params.get("activityId")?.as_i64()?;
    let user_id = req.params.get("userId")?.as_i64()?;
    Some((activity_id, user_id))
}

// Seeding/backfill seam: stores the raw blob verbatim. The migrator only ever
// reads this table.
fn handle_legacy_put(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let Some(content) = req.params.get("content").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.content", None);
    };

    let res = conn.execute(
        "INSERT INTO legacy_project_data(activity_id, user_id, content)
         VALUES(?, ?, ?)
         ON CONFLICT(activity_id, user_id) DO UPDATE SET content = excluded.content",
        (activity_id, user_id, content),
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "legacy_project_data" })),
        ),
    }
}

fn handle_legacy_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let content: Result<Option<String>, _> = conn
        .query_row(
            "SELECT content FROM legacy_project_data WHERE activity_id = ? AND user_id = ?",
            (activity_id, user_id),
            |row| row.get(0),
        )
        .optional();
    match content {
        Ok(content) => ok(&req.id, json!({ "content": content })),
        Err(e) => err(&req.id, "db_read_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "legacy.put" => Some(handle_legacy_put(state, req)),
        "legacy.get" => Some(handle_legacy_get(state, req)),
        _ => None,
    }
}
