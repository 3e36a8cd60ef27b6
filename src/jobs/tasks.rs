/// Cleanup tasks run by the server
use crate::{account::AuthRequest, jobs::StorageCleaner, storage::Store};
use std::time::Duration;

/// How often pending auth requests are swept
pub const AUTH_REQUEST_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cleaner removing auth requests that were never activated
pub fn auth_request_cleaner(store: Store) -> StorageCleaner<AuthRequest> {
    StorageCleaner::new(store, |request: &AuthRequest, now| request.is_stale(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AuthToken, TokenType};
    use chrono::{Duration as ChronoDuration, Utc};

    #[tokio::test]
    async fn test_stale_auth_requests_are_removed() {
        let store = Store::memory();
        store.open().await.unwrap();

        let fresh = AuthRequest::new(AuthToken::new("a@example.com", TokenType::Api), None);
        let mut stale = AuthRequest::new(AuthToken::new("b@example.com", TokenType::Api), None);
        stale.created = Utc::now() - ChronoDuration::hours(25);
        store.put(&fresh).await.unwrap();
        store.put(&stale).await.unwrap();

        let report = auth_request_cleaner(store.clone()).sweep().await;
        assert_eq!(report.deleted, 1);

        assert!(store
            .find::<AuthRequest>(fresh.code.as_bytes())
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find::<AuthRequest>(stale.code.as_bytes())
            .await
            .unwrap()
            .is_none());
    }
}
