use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use sync_domain::envelope::{WipeRequest, WipeResponse};
use sync_domain::Error;
use sync_storage::User;

use crate::state::AppState;

const CONFIRM_TOKEN: &str = "WIPE";

pub async fn wipe(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<User>,
    Json(body): Json<WipeRequest>,
) -> Result<impl IntoResponse, Error> {
    if body.confirm != CONFIRM_TOKEN {
        return Err(Error::validation(format!("confirm must equal \"{CONFIRM_TOKEN}\"")));
    }
    let epoch = state.epoch.wipe(user.id).await?;
    Ok(Json(WipeResponse { epoch }))
}
