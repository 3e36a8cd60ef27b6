/// Application context and dependency injection
use crate::{
    account::AccountManager,
    config::ServerConfig,
    error::PadlockResult,
    mailer::Sender,
    rate_limit::{EmailRateLimiter, RequestThrottle},
    storage::Store,
};
use axum::{
    extract::FromRef,
    http::{header, HeaderMap},
};
use axum_extra::extract::cookie::Key;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub account_manager: Arc<AccountManager>,
    pub mailer: Arc<dyn Sender>,
    pub email_limiter: Arc<EmailRateLimiter>,
    pub request_throttle: Arc<RequestThrottle>,
    pub cookie_key: Key,
}

impl AppContext {
    /// Create a new application context. The store is expected to be open.
    pub fn new(config: ServerConfig, store: Store, mailer: Arc<dyn Sender>) -> PadlockResult<Self> {
        config.validate()?;

        let cookie_key = config.cookie_key()?;
        let account_manager = Arc::new(AccountManager::new(store, config.token_policy()));
        let email_limiter = Arc::new(config.email_rate_limiter());
        let request_throttle = Arc::new(RequestThrottle::new(
            config.rate_limit.requests_per_minute,
        ));

        Ok(Self {
            config: Arc::new(config),
            account_manager,
            mailer,
            email_limiter,
            request_throttle,
            cookie_key,
        })
    }

    pub fn store(&self) -> &Store {
        self.account_manager.store()
    }

    /// Base url for generated links. Falls back to the request's `Host`
    /// header when no public host is configured.
    pub fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(host) = &self.config.server.host {
            let host = host.trim_end_matches('/');
            if host.starts_with("http://") || host.starts_with("https://") {
                return host.to_string();
            }
            return format!("{}://{}", self.scheme(), host);
        }

        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("localhost");
        format!("{}://{}", self.scheme(), host)
    }

    fn scheme(&self) -> &'static str {
        if self.config.is_tls() {
            "https"
        } else {
            "http"
        }
    }
}

impl FromRef<AppContext> for Key {
    fn from_ref(ctx: &AppContext) -> Self {
        ctx.cookie_key.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::RecordingSender;

    fn context(host: Option<&str>) -> AppContext {
        let mut config = ServerConfig::default();
        config.server.host = host.map(str::to_string);
        AppContext::new(config, Store::memory(), Arc::new(RecordingSender::new())).unwrap()
    }

    #[test]
    fn test_base_url_prefers_configured_host() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "evil.example.com".parse().unwrap());

        assert_eq!(
            context(Some("cloud.example.com:8080")).base_url(&headers),
            "http://cloud.example.com:8080"
        );
        assert_eq!(
            context(Some("https://cloud.example.com/")).base_url(&headers),
            "https://cloud.example.com"
        );
        assert_eq!(context(None).base_url(&headers), "http://evil.example.com");
        assert_eq!(context(None).base_url(&HeaderMap::new()), "http://localhost");
    }
}
