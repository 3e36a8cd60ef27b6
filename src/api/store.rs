/// Data store endpoints
use crate::{
    account::TokenType,
    api::{auth::email_activation_link, ClientIp},
    auth::AuthContext,
    context::AppContext,
    error::{PadlockError, PadlockResult},
    templates,
};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};

/// GET/HEAD /store/ - the account's data, empty if nothing was stored
pub async fn read_store(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> PadlockResult<Response> {
    let data = ctx.account_manager.read_data(auth.email()).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data.content,
    )
        .into_response())
}

/// PUT /store/ - replace the account's data with the request body.
/// The size limit comes from the `DefaultBodyLimit` set on the endpoint.
pub async fn write_store(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    body: Result<Bytes, BytesRejection>,
) -> PadlockResult<StatusCode> {
    let content = body.map_err(|rejection| match rejection.status() {
        StatusCode::PAYLOAD_TOO_LARGE => PadlockError::PayloadTooLarge {
            limit: ctx.config.storage.max_data_size,
        },
        _ => PadlockError::BadRequest(format!("Failed to read body: {}", rejection.body_text())),
    })?;

    ctx.account_manager
        .write_data(auth.email(), content.to_vec())
        .await?;
    tracing::debug!(email = auth.email(), size = content.len(), "Data store updated");
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /store/ - ask for confirmation by email. The mailed login link
/// opens the dashboard where the deletion can be carried out.
pub async fn request_delete_store(
    State(ctx): State<AppContext>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    auth: AuthContext,
) -> PadlockResult<StatusCode> {
    let request = ctx
        .account_manager
        .request_token(auth.email(), TokenType::Web, Some("/dashboard/".to_string()))
        .await?;

    email_activation_link(&ctx, &ip, &headers, &request, templates::delete_store_email).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /deletestore/ - delete the account's data
pub async fn delete_store(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> PadlockResult<Html<String>> {
    ctx.account_manager.delete_data(auth.email()).await?;
    Ok(Html(templates::store_deleted_page(auth.email())))
}
