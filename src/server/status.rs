//! Status endpoint.

use axum::Json;
use axum::extract::State;

use super::AppState;
use crate::scheduler::RelayStatus;

/// Returns the scheduler's latest status.
///
/// ```ignore
/// GET /status HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {
///   "state": "idle",
///   "cycles": 42,
///   "store": { "pending": 0, "sent": 318 },
///   ...
/// }
/// ```
pub async fn status_handler(State(app_state): State<AppState>) -> Json<RelayStatus> {
    Json(app_state.current())
}
