/// Request pipeline layers
///
/// Per endpoint (outermost first): [`check_method`], [`authenticate`],
/// [`check_version`], [`check_csrf`]. Router wide: [`translate_errors`]
/// around a panic catcher built with [`handle_panic`].
use crate::{
    account::TokenType,
    api::{
        client_ip, client_ip_from,
        form::{buffer_form, FormFields},
        AuthType, Endpoint,
    },
    auth::{AuthContext, Credentials, WebSession, CSRF_FIELD, CSRF_HEADER},
    context::AppContext,
    error::{ErrorReport, PadlockError, Severity},
    mailer::send_in_background,
    templates,
};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::SignedCookieJar;
use std::{any::Any, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Media type prefix carrying the api version in the `Accept` header
pub const VERSION_MEDIA_TYPE: &str = "application/vnd.padlock;version=";

/// Endpoint declaration as seen by the pipeline layers
#[derive(Clone)]
pub struct EndpointState {
    pub ctx: AppContext,
    pub methods: Arc<[Method]>,
    pub version: u32,
    pub auth: AuthType,
}

impl EndpointState {
    pub fn new(ctx: AppContext, endpoint: &Endpoint) -> Self {
        Self {
            ctx,
            methods: endpoint.methods.clone().into(),
            version: endpoint.version,
            auth: endpoint.auth,
        }
    }
}

/// Reject methods the endpoint does not declare
pub async fn check_method(
    State(endpoint): State<EndpointState>,
    request: Request,
    next: Next,
) -> Result<Response, PadlockError> {
    if !endpoint.methods.contains(request.method()) {
        return Err(PadlockError::MethodNotAllowed {
            method: request.method().clone(),
            allowed: endpoint.methods.to_vec(),
        });
    }

    Ok(next.run(request).await)
}

/// Authenticate request and add the [`AuthContext`] to extensions
pub async fn authenticate(
    State(endpoint): State<EndpointState>,
    mut request: Request,
    next: Next,
) -> Result<Response, PadlockError> {
    let auth = match endpoint.auth {
        AuthType::None => None,
        AuthType::Api => Some(authenticate_api(&endpoint.ctx, request.headers()).await?),
        AuthType::Web => Some(authenticate_web(&endpoint.ctx, request.headers()).await?),
    };

    if let Some(auth) = auth {
        request.extensions_mut().insert(auth);
    }

    Ok(next.run(request).await)
}

async fn authenticate_api(ctx: &AppContext, headers: &HeaderMap) -> Result<AuthContext, PadlockError> {
    let credentials = Credentials::from_headers(headers).ok_or(PadlockError::InvalidAuthToken {
        email: None,
        token: None,
    })?;

    let auth_token = ctx
        .account_manager
        .authenticate(&credentials.email, &credentials.token)
        .await?;

    Ok(AuthContext {
        auth_token,
        session: None,
    })
}

async fn authenticate_web(ctx: &AppContext, headers: &HeaderMap) -> Result<AuthContext, PadlockError> {
    let jar = SignedCookieJar::from_headers(headers, ctx.cookie_key.clone());
    let session = WebSession::from_jar(&jar).ok_or(PadlockError::InvalidAuthToken {
        email: None,
        token: None,
    })?;

    let auth_token = ctx
        .account_manager
        .authenticate(&session.email, &session.token)
        .await?;

    // Api tokens never open a browser session
    if auth_token.token_type != TokenType::Web {
        return Err(PadlockError::InvalidAuthToken {
            email: Some(session.email),
            token: Some(session.token),
        });
    }

    Ok(AuthContext {
        auth_token,
        session: Some(session),
    })
}

/// Api version requested by the client: `Accept` header, else the
/// `api_version` form field, else the `v` query parameter. Missing or
/// unparsable values count as version 0.
pub fn requested_version(headers: &HeaderMap, form: &FormFields, query: Option<&str>) -> u32 {
    let from_accept = headers
        .get(header::ACCEPT)
        .and_then(|h| h.to_str().ok())
        .and_then(|accept| accept.trim().strip_prefix(VERSION_MEDIA_TYPE))
        .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string);

    from_accept
        .or_else(|| form.value("api_version").map(str::to_string))
        .or_else(|| FormFields::from_query(query).value("v").map(str::to_string))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Reject clients older than the endpoint requires
pub async fn check_version(
    State(endpoint): State<EndpointState>,
    request: Request,
    next: Next,
) -> Result<Response, PadlockError> {
    if endpoint.version == 0 {
        return Ok(next.run(request).await);
    }

    let (request, form) = buffer_form(request).await?;
    let version = requested_version(request.headers(), &form, request.uri().query());

    if version < endpoint.version {
        // Clients predating versioning get told by email to update
        if version == 0 {
            notify_deprecated_version(&endpoint.ctx, request.headers(), &client_ip(&request), &form);
        }

        return Err(PadlockError::UnsupportedApiVersion {
            version,
            required: endpoint.version,
        });
    }

    Ok(next.run(request).await)
}

/// Email the owner of an outdated client asking them to update.
///
/// The address comes from the request's credentials, else the `email` form
/// field. Sending is subject to the email quotas and happens in the
/// background.
pub fn notify_deprecated_version(
    ctx: &AppContext,
    headers: &HeaderMap,
    ip: &str,
    form: &FormFields,
) -> Option<JoinHandle<()>> {
    let email = Credentials::from_headers(headers)
        .map(|c| c.email)
        .or_else(|| form.value("email").map(str::to_string))?;

    if !ctx.email_limiter.allow(ip, &email) {
        info!(ip, email = %email, "Email quota exhausted, skipping deprecated version notice");
        return None;
    }

    info!(ip, email = %email, "Sending deprecated version notice");
    let (subject, body) = templates::deprecated_version_email();
    Some(send_in_background(ctx.mailer.clone(), email, subject, body))
}

fn is_safe_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

/// Require state changing requests on web endpoints to echo the session's
/// CSRF token, either in the `X-CSRF-Token` header or the `csrf_token` field
pub async fn check_csrf(
    State(endpoint): State<EndpointState>,
    request: Request,
    next: Next,
) -> Result<Response, PadlockError> {
    if endpoint.auth != AuthType::Web || is_safe_method(request.method()) {
        return Ok(next.run(request).await);
    }

    let expected = request
        .extensions()
        .get::<AuthContext>()
        .and_then(|auth| auth.csrf_token())
        .map(str::to_string)
        .ok_or(PadlockError::InvalidCsrfToken)?;

    let (request, form) = buffer_form(request).await?;
    let supplied = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|h| h.to_str().ok())
        .or_else(|| form.get(CSRF_FIELD));

    if supplied != Some(expected.as_str()) {
        return Err(PadlockError::InvalidCsrfToken);
    }

    Ok(next.run(request).await)
}

/// What the error translation layer remembers about a request
struct RequestSummary {
    ip: String,
    method: Method,
    uri: String,
    accept: String,
    dump: String,
}

impl RequestSummary {
    fn new(request: &Request) -> Self {
        let mut dump = format!("{} {} {:?}\n", request.method(), request.uri(), request.version());
        for (name, value) in request.headers() {
            let value = if name == header::AUTHORIZATION || name == header::COOKIE {
                "[redacted]"
            } else {
                value.to_str().unwrap_or("[binary]")
            };
            dump.push_str(&format!("{}: {}\n", name, value));
        }

        Self {
            ip: client_ip_from(request.headers(), request.extensions()),
            method: request.method().clone(),
            uri: request.uri().to_string(),
            accept: request
                .headers()
                .get(header::ACCEPT)
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            dump,
        }
    }

    fn line(&self) -> String {
        format!("{} {} {}", self.ip, self.method, self.uri)
    }
}

/// Log errors raised further down the pipeline and render them in the
/// format the client asked for
pub async fn translate_errors(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Response {
    let summary = RequestSummary::new(&request);
    let response = next.run(request).await;

    let Some(report) = response.extensions().get::<ErrorReport>().cloned() else {
        return response;
    };

    log_error(&ctx, &report, &summary);
    render_error(response, &report, &summary.accept)
}

fn log_error(ctx: &AppContext, report: &ErrorReport, summary: &RequestSummary) {
    match report.severity {
        Severity::Info => info!("{} - {}", summary.line(), report.detail),
        Severity::Error => {
            error!("{} - {}\nRequest:\n{}", summary.line(), report.detail, summary.dump);

            if report.status == StatusCode::INTERNAL_SERVER_ERROR {
                if let Some(to) = &ctx.config.logging.notify_errors {
                    let (subject, body) = templates::error_notification_email(
                        &format!("{} - {}", summary.line(), report.detail),
                        &summary.dump,
                    );
                    send_in_background(ctx.mailer.clone(), to.clone(), subject, body);
                }
            }
        }
    }
}

fn render_error(response: Response, report: &ErrorReport, accept: &str) -> Response {
    let (mut parts, _) = response.into_parts();

    let (content_type, body) =
        if accept.starts_with("application/json") || accept.starts_with("application/vnd.padlock") {
            (
                "application/json",
                serde_json::to_string(&report.body()).unwrap_or_default(),
            )
        } else if accept.contains("text/html") {
            ("text/html; charset=utf-8", templates::error_page(&report.message))
        } else {
            ("text/plain; charset=utf-8", report.message.clone())
        };

    parts
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(body))
}

/// Turn a handler panic into a server error. Logging and operator
/// notification happen in [`translate_errors`].
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    PadlockError::Server(format!("handler panicked: {}", detail)).into_response()
}
