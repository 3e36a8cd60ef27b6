/// API routes and handlers
///
/// Every endpoint is declared once in [`endpoints`] together with the methods
/// it accepts, the api version it requires and how it authenticates. The
/// request pipeline in [`middleware`] is built from that declaration.
pub mod auth;
pub mod dashboard;
pub mod form;
pub mod middleware;
pub mod store;

pub use form::FormFields;

use crate::context::AppContext;
use axum::{
    async_trait,
    extract::{ConnectInfo, DefaultBodyLimit, FromRequestParts, Request},
    http::{request::Parts, Extensions, HeaderMap, Method},
    routing::{get, get_service, post, MethodRouter},
    Router,
};
use std::{convert::Infallible, net::SocketAddr};
use tower::ServiceBuilder;
use tower_http::services::ServeDir;

/// Api version current clients speak
pub const API_VERSION: u32 = 1;

/// How an endpoint authenticates its requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    /// Public endpoint
    None,
    /// `Authorization` header with an api token
    Api,
    /// Signed session cookie with a web token, plus CSRF protection
    Web,
}

/// Declaration of a single endpoint
pub struct Endpoint {
    pub path: &'static str,
    pub methods: Vec<Method>,
    /// Minimum api version; 0 accepts any client
    pub version: u32,
    pub auth: AuthType,
    pub handler: MethodRouter<AppContext>,
}

impl Endpoint {
    fn new(path: &'static str, methods: &[Method], handler: MethodRouter<AppContext>) -> Self {
        Self {
            path,
            methods: methods.to_vec(),
            version: 0,
            auth: AuthType::None,
            handler,
        }
    }

    fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    fn auth(mut self, auth: AuthType) -> Self {
        self.auth = auth;
        self
    }
}

/// The endpoint table
pub fn endpoints(ctx: &AppContext) -> Vec<Endpoint> {
    // Request paths keep their `/static/` prefix, which maps onto
    // `<assets>/static/`
    let static_files = ServeDir::new(&ctx.config.server.assets_path);

    vec![
        Endpoint::new(
            "/auth/",
            &[Method::PUT, Method::POST],
            axum::routing::put(auth::request_api_token).post(auth::request_api_token),
        )
        .version(API_VERSION),
        Endpoint::new(
            "/login/",
            &[Method::GET, Method::POST],
            get(auth::login_page).post(auth::request_login_link),
        ),
        Endpoint::new("/activate/", &[Method::GET], get(auth::activate_auth_token)),
        Endpoint::new(
            "/store/",
            &[Method::GET, Method::HEAD, Method::PUT, Method::DELETE],
            get(store::read_store)
                .put(store::write_store)
                .delete(store::request_delete_store)
                .layer(DefaultBodyLimit::max(ctx.config.storage.max_data_size)),
        )
        .version(API_VERSION)
        .auth(AuthType::Api),
        Endpoint::new("/deletestore/", &[Method::POST], post(store::delete_store))
            .auth(AuthType::Web),
        Endpoint::new("/dashboard/", &[Method::GET], get(dashboard::dashboard))
            .auth(AuthType::Web),
        Endpoint::new("/logout/", &[Method::GET], get(dashboard::logout)).auth(AuthType::Web),
        Endpoint::new("/revoke/", &[Method::POST], post(dashboard::revoke_token))
            .auth(AuthType::Web),
        Endpoint::new(
            "/static/*path",
            &[Method::GET, Method::HEAD],
            get_service(static_files),
        ),
        Endpoint::new(
            "/",
            &[Method::GET, Method::PUT],
            get(dashboard::root).put(auth::legacy_put),
        ),
    ]
}

/// Build API routes. Each endpoint gets its own request pipeline:
/// method check, authentication, version check and CSRF check, in that order.
pub fn routes(ctx: &AppContext) -> Router {
    endpoints(ctx)
        .into_iter()
        .fold(Router::new(), |router, endpoint| {
            let state = middleware::EndpointState::new(ctx.clone(), &endpoint);
            let service = ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::check_method,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::authenticate,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::check_version,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state,
                    middleware::check_csrf,
                ))
                .service(endpoint.handler.with_state::<()>(ctx.clone()));

            router.route_service(endpoint.path, service)
        })
}

/// Best guess at the client's address: `X-Real-IP` when set by a reverse
/// proxy, else the peer address of the connection.
pub fn client_ip_from(headers: &HeaderMap, extensions: &Extensions) -> String {
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn client_ip(request: &Request) -> String {
    client_ip_from(request.headers(), request.extensions())
}

/// Extractor for the client address
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip_from(&parts.headers, &parts.extensions)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_client_ip_prefers_real_ip_header() {
        let mut request = Request::builder()
            .uri("/")
            .header("x-real-ip", "10.1.2.3")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 0, 1], 4000))));
        assert_eq!(client_ip(&request), "10.1.2.3");

        request.headers_mut().remove("x-real-ip");
        assert_eq!(client_ip(&request), "192.168.0.1");

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(client_ip(&request), "unknown");
    }
}
