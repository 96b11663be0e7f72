use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::migrator::DataMigrator;
use serde_json::json;

fn pair_params(req: &Request) -> Option<(i64, i64)> {
    let activity_id = req.params.get("activityId")?.as_i64()?;
    let user_id = req.params.get("userId")?.as_i64()?;
    Some((activity_id, user_id))
}

// Migration failures are expected, reportable outcomes, so they ride inside
// an ok envelope as {success:false, message}; only IPC-level problems use the
// error envelope.
fn handle_migration_run(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let result = DataMigrator::new(conn).migrate(activity_id, user_id);
    ok(
        &req.id,
        serde_json::to_value(result).unwrap_or_else(|_| json!({ "success": false })),
    )
}

fn handle_migration_rollback(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let result = DataMigrator::new(conn).rollback(activity_id, user_id);
    ok(
        &req.id,
        serde_json::to_value(result).unwrap_or_else(|_| json!({ "success": false })),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "migration.run" => Some(handle_migration_run(state, req)),
        "migration.rollback" => Some(handle_migration_rollback(state, req)),
        _ => None,
    }
}
