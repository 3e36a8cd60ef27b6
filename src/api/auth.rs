/// Token request and activation endpoints
use crate::{
    account::{AuthRequest, TokenType},
    api::{middleware::notify_deprecated_version, ClientIp, FormFields, API_VERSION},
    auth::WebSession,
    context::AppContext,
    error::{PadlockError, PadlockResult},
    templates,
};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::SignedCookieJar;
use serde::Deserialize;
use serde_json::json;

/// Where web sessions land after activation unless the request says otherwise
pub const DEFAULT_REDIRECT: &str = "/dashboard/";

/// Login form
pub async fn login_page() -> Html<String> {
    Html(templates::login_page())
}

/// PUT/POST /auth/ - request an auth token (api by default)
pub async fn request_api_token(
    State(ctx): State<AppContext>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    form: FormFields,
) -> PadlockResult<Response> {
    request_token(&ctx, &ip, &headers, &form, TokenType::Api).await
}

/// POST /login/ - request a login link (web token by default)
pub async fn request_login_link(
    State(ctx): State<AppContext>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    form: FormFields,
) -> PadlockResult<Response> {
    request_token(&ctx, &ip, &headers, &form, TokenType::Web).await
}

async fn request_token(
    ctx: &AppContext,
    ip: &str,
    headers: &HeaderMap,
    form: &FormFields,
    default_type: TokenType,
) -> PadlockResult<Response> {
    let email = form
        .value("email")
        .ok_or_else(|| PadlockError::BadRequest("email is required".to_string()))?;

    let token_type = match form.value("type") {
        Some(raw) => raw.parse::<TokenType>().map_err(PadlockError::BadRequest)?,
        None => default_type,
    };
    let redirect = (token_type == TokenType::Web).then(|| DEFAULT_REDIRECT.to_string());

    let request = ctx
        .account_manager
        .request_token(email, token_type, redirect)
        .await?;

    email_activation_link(ctx, ip, headers, &request, |link| {
        templates::activation_email(link, token_type)
    })
    .await?;

    let response = match token_type {
        TokenType::Api => (
            StatusCode::ACCEPTED,
            Json(json!({
                "email": request.auth_token.email,
                "token": request.auth_token.token,
            })),
        )
            .into_response(),
        TokenType::Web => Html(templates::login_link_sent_page(email)).into_response(),
    };

    Ok(response)
}

/// Activation link for a pending request
pub fn activation_link(ctx: &AppContext, headers: &HeaderMap, code: &str) -> String {
    format!(
        "{}/activate/?v={}&t={}",
        ctx.base_url(headers),
        API_VERSION,
        urlencoding::encode(code)
    )
}

/// Mail the activation link of `request` to its account. Silently skipped
/// when the email quotas for this ip or address are exhausted.
pub async fn email_activation_link<F>(
    ctx: &AppContext,
    ip: &str,
    headers: &HeaderMap,
    request: &AuthRequest,
    compose: F,
) -> PadlockResult<()>
where
    F: FnOnce(&str) -> (String, String),
{
    let email = &request.auth_token.email;
    if !ctx.email_limiter.allow(ip, email) {
        tracing::info!(ip, email = %email, "Email quota exhausted, activation link not sent");
        return Ok(());
    }

    let (subject, body) = compose(&activation_link(ctx, headers, &request.code));
    ctx.mailer.send(email, &subject, &body).await
}

#[derive(Debug, Deserialize)]
pub struct ActivateParams {
    t: Option<String>,
}

/// GET /activate/?t=<code> - activate a pending token
///
/// Api tokens get a confirmation page. Web tokens start a session and
/// redirect to wherever the request asked for.
pub async fn activate_auth_token(
    State(ctx): State<AppContext>,
    jar: SignedCookieJar,
    uri: Uri,
) -> PadlockResult<Response> {
    let Query(ActivateParams { t }) = Query::try_from_uri(&uri)
        .map_err(|e| PadlockError::BadRequest(format!("Invalid query: {}", e)))?;
    let code = t
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PadlockError::BadRequest("activation code missing".to_string()))?;

    let request = ctx.account_manager.activate_token(code).await?;
    let auth_token = &request.auth_token;

    match auth_token.token_type {
        TokenType::Api => {
            Ok(Html(templates::activation_success_page(&auth_token.email)).into_response())
        }
        TokenType::Web => {
            let session = WebSession::new(auth_token);
            let jar = jar.add(session.to_cookie(ctx.config.is_tls()));
            let target = request.redirect.as_deref().unwrap_or(DEFAULT_REDIRECT);
            Ok((jar, Redirect::to(target)).into_response())
        }
    }
}

/// PUT / - entry point of clients predating api versioning
pub async fn legacy_put(
    State(ctx): State<AppContext>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    form: FormFields,
) -> PadlockError {
    notify_deprecated_version(&ctx, &headers, &ip, &form);
    PadlockError::UnsupportedApiVersion {
        version: 0,
        required: API_VERSION,
    }
}
