/// Web dashboard endpoints
use crate::{
    api::FormFields,
    auth::{AuthContext, WebSession},
    context::AppContext,
    error::{PadlockError, PadlockResult},
    templates,
};
use axum::{
    extract::State,
    response::{Html, Redirect},
};
use axum_extra::extract::cookie::SignedCookieJar;

/// GET / - dashboard for logged in browsers, login form for everyone else
pub async fn root(jar: SignedCookieJar) -> Redirect {
    if WebSession::from_jar(&jar).is_some() {
        Redirect::to("/dashboard/")
    } else {
        Redirect::to("/login/")
    }
}

pub async fn dashboard(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> PadlockResult<Html<String>> {
    let account = ctx.account_manager.get_account(auth.email()).await?;
    let has_data = !ctx
        .account_manager
        .read_data(auth.email())
        .await?
        .content
        .is_empty();

    Ok(Html(templates::dashboard_page(
        &account,
        &auth.auth_token.token,
        auth.csrf_token().unwrap_or_default(),
        has_data,
    )))
}

/// GET /logout/ - revoke the session's token and clear the cookie
pub async fn logout(
    State(ctx): State<AppContext>,
    jar: SignedCookieJar,
    auth: AuthContext,
) -> PadlockResult<(SignedCookieJar, Redirect)> {
    match ctx
        .account_manager
        .revoke_token(auth.email(), &auth.auth_token.token)
        .await
    {
        Ok(_) | Err(PadlockError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    Ok((jar.remove(WebSession::removal_cookie()), Redirect::to("/login/")))
}

/// POST /revoke/ - revoke one of the account's tokens
pub async fn revoke_token(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    form: FormFields,
) -> PadlockResult<Redirect> {
    let token = form
        .value("token")
        .ok_or_else(|| PadlockError::BadRequest("token is required".to_string()))?;

    ctx.account_manager.revoke_token(auth.email(), token).await?;
    Ok(Redirect::to("/dashboard/"))
}
