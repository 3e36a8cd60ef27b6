/// Account manager: the auth token state machine
///
/// Tokens are requested (stored as pending `AuthRequest`s), activated via
/// the emailed code (moved into the owning `Account`), used for
/// authentication until they expire, and revoked on user request.
///
/// Every operation is a plain read-modify-write over the store. Two
/// concurrent updates of the same account can lose one of the writes.
use crate::{
    account::{Account, AuthRequest, AuthToken, DataStore, TokenType},
    error::{PadlockError, PadlockResult},
    storage::{StorageError, Store},
};
use chrono::{Duration, Utc};

/// Idle lifetime of activated tokens, per token type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    pub api_max_age: Duration,
    pub web_max_age: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            api_max_age: Duration::days(365),
            web_max_age: Duration::days(7),
        }
    }
}

impl TokenPolicy {
    pub fn max_age(&self, token_type: TokenType) -> Duration {
        match token_type {
            TokenType::Api => self.api_max_age,
            TokenType::Web => self.web_max_age,
        }
    }
}

/// Account manager service
pub struct AccountManager {
    store: Store,
    policy: TokenPolicy,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(store: Store, policy: TokenPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Create a pending token for `email`. The account does not need to exist.
    pub async fn request_token(
        &self,
        email: &str,
        token_type: TokenType,
        redirect: Option<String>,
    ) -> PadlockResult<AuthRequest> {
        validate_email(email)?;

        let request = AuthRequest::new(AuthToken::new(email, token_type), redirect);
        self.store.put(&request).await?;

        tracing::info!(email, token_type = %token_type, "Auth token requested");
        Ok(request)
    }

    /// Promote a pending request into its account's token set.
    ///
    /// The request is consumed: a second activation with the same code fails
    /// with `NotFound`. Requests older than the activation window are treated
    /// as missing.
    pub async fn activate_token(&self, code: &str) -> PadlockResult<AuthRequest> {
        let not_found = || PadlockError::NotFound("activation code".to_string());

        let mut request = match self.store.get::<AuthRequest>(code.as_bytes()).await {
            Ok(request) => request,
            Err(StorageError::NotFound) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        if request.is_stale(now) {
            self.store.delete(&request).await?;
            return Err(not_found());
        }

        let email = request.auth_token.email.clone();
        let mut account = self
            .store
            .find::<Account>(email.as_bytes())
            .await?
            .unwrap_or_else(|| Account::new(email.clone()));

        request.auth_token.activated = Some(now);
        account.add_auth_token(request.auth_token.clone());

        self.store.delete(&request).await?;
        self.store.put(&account).await?;

        tracing::info!(
            email = %email,
            token_type = %request.auth_token.token_type,
            "Auth token activated"
        );
        Ok(request)
    }

    /// Validate presented credentials and record the use.
    ///
    /// A missing account yields `InvalidAuthToken` just like a wrong token so
    /// callers cannot probe for existing accounts.
    pub async fn authenticate(&self, email: &str, token: &str) -> PadlockResult<AuthToken> {
        let invalid = || PadlockError::InvalidAuthToken {
            email: Some(email.to_string()),
            token: Some(token.to_string()),
        };

        let mut account = match self.store.get::<Account>(email.as_bytes()).await {
            Ok(account) => account,
            Err(StorageError::NotFound) => return Err(invalid()),
            Err(e) => return Err(e.into()),
        };

        let mut auth_token = account.find_auth_token(token).cloned().ok_or_else(invalid)?;

        let now = Utc::now();
        if auth_token.is_expired(self.policy.max_age(auth_token.token_type), now) {
            return Err(PadlockError::ExpiredAuthToken {
                email: email.to_string(),
                token: token.to_string(),
            });
        }

        auth_token.last_used = Some(now);
        account.add_auth_token(auth_token.clone());
        self.store.put(&account).await?;

        Ok(auth_token)
    }

    /// Remove a token from its account
    pub async fn revoke_token(&self, email: &str, token: &str) -> PadlockResult<AuthToken> {
        let mut account = self.get_account(email).await?;
        let removed = account
            .remove_auth_token(token)
            .ok_or_else(|| PadlockError::NotFound("auth token".to_string()))?;
        self.store.put(&account).await?;

        tracing::info!(email, token_type = %removed.token_type, "Auth token revoked");
        Ok(removed)
    }

    pub async fn get_account(&self, email: &str) -> PadlockResult<Account> {
        match self.store.get::<Account>(email.as_bytes()).await {
            Ok(account) => Ok(account),
            Err(StorageError::NotFound) => Err(PadlockError::NotFound(format!(
                "account {}",
                email
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Explicitly provision an account. Existing accounts are left untouched.
    pub async fn create_account(&self, email: &str) -> PadlockResult<Account> {
        validate_email(email)?;

        if let Some(account) = self.store.find::<Account>(email.as_bytes()).await? {
            return Ok(account);
        }

        let account = Account::new(email);
        self.store.put(&account).await?;
        tracing::info!(email, "Account created");
        Ok(account)
    }

    /// Administrative delete of an account together with its data
    pub async fn delete_account(&self, email: &str) -> PadlockResult<()> {
        let account = self.get_account(email).await?;
        self.store.delete(&DataStore::new(email, Vec::new())).await?;
        self.store.delete(&account).await?;
        tracing::info!(email, "Account deleted");
        Ok(())
    }

    /// Emails of all existing accounts
    pub async fn list_accounts(&self) -> PadlockResult<Vec<String>> {
        Ok(self
            .store
            .list::<Account>()
            .await?
            .into_iter()
            .map(|key| String::from_utf8_lossy(&key).into_owned())
            .collect())
    }

    /// Data blob of an account, empty if nothing was stored yet
    pub async fn read_data(&self, email: &str) -> PadlockResult<DataStore> {
        Ok(self
            .store
            .find::<DataStore>(email.as_bytes())
            .await?
            .unwrap_or_else(|| DataStore::new(email, Vec::new())))
    }

    pub async fn write_data(&self, email: &str, content: Vec<u8>) -> PadlockResult<()> {
        self.store.put(&DataStore::new(email, content)).await?;
        Ok(())
    }

    pub async fn delete_data(&self, email: &str) -> PadlockResult<()> {
        self.store.delete(&DataStore::new(email, Vec::new())).await?;
        tracing::info!(email, "Data store deleted");
        Ok(())
    }
}

/// Reject anything that is not a syntactically valid email address
pub fn validate_email(email: &str) -> PadlockResult<()> {
    email
        .parse::<lettre::Address>()
        .map(|_| ())
        .map_err(|_| PadlockError::BadRequest(format!("invalid email address '{}'", email)))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_manager() -> AccountManager {
        let store = Store::memory();
        store.open().await.unwrap();
        AccountManager::new(store, TokenPolicy::default())
    }

    #[tokio::test]
    async fn test_token_unusable_before_activation() {
        let manager = create_test_manager().await;
        let request = manager
            .request_token("u@example.com", TokenType::Api, None)
            .await
            .unwrap();

        let result = manager
            .authenticate("u@example.com", &request.auth_token.token)
            .await;
        assert!(matches!(result, Err(PadlockError::InvalidAuthToken { .. })));

        manager.activate_token(&request.code).await.unwrap();

        let token = manager
            .authenticate("u@example.com", &request.auth_token.token)
            .await
            .unwrap();
        assert!(token.last_used.is_some());
        assert!(token.activated.is_some());
    }

    #[tokio::test]
    async fn test_activation_is_single_use() {
        let manager = create_test_manager().await;
        let request = manager
            .request_token("u@example.com", TokenType::Api, None)
            .await
            .unwrap();

        manager.activate_token(&request.code).await.unwrap();
        let second = manager.activate_token(&request.code).await;
        assert!(matches!(second, Err(PadlockError::NotFound(_))));

        let account = manager.get_account("u@example.com").await.unwrap();
        assert_eq!(account.auth_tokens.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_request_cannot_be_activated() {
        let manager = create_test_manager().await;
        let mut request = manager
            .request_token("u@example.com", TokenType::Api, None)
            .await
            .unwrap();
        request.created = Utc::now() - Duration::hours(25);
        manager.store().put(&request).await.unwrap();

        let result = manager.activate_token(&request.code).await;
        assert!(matches!(result, Err(PadlockError::NotFound(_))));
        assert!(manager
            .store()
            .find::<AuthRequest>(request.code.as_bytes())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_account_is_invalid_not_missing() {
        let manager = create_test_manager().await;
        let result = manager.authenticate("nobody@example.com", "token").await;
        assert!(matches!(result, Err(PadlockError::InvalidAuthToken { .. })));
    }

    #[tokio::test]
    async fn test_wrong_token_is_invalid() {
        let manager = create_test_manager().await;
        let request = manager
            .request_token("u@example.com", TokenType::Api, None)
            .await
            .unwrap();
        manager.activate_token(&request.code).await.unwrap();

        let prefix = &request.auth_token.token[..8];
        let result = manager.authenticate("u@example.com", prefix).await;
        assert!(matches!(result, Err(PadlockError::InvalidAuthToken { .. })));

        // Token of one account does not open another
        manager.create_account("other@example.com").await.unwrap();
        let result = manager
            .authenticate("other@example.com", &request.auth_token.token)
            .await;
        assert!(matches!(result, Err(PadlockError::InvalidAuthToken { .. })));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let manager = create_test_manager().await;
        let request = manager
            .request_token("u@example.com", TokenType::Web, None)
            .await
            .unwrap();
        manager.activate_token(&request.code).await.unwrap();

        let mut account = manager.get_account("u@example.com").await.unwrap();
        let mut token = account.auth_tokens[0].clone();
        token.activated = Some(Utc::now() - Duration::days(30));
        token.last_used = Some(Utc::now() - Duration::days(8));
        account.add_auth_token(token.clone());
        manager.store().put(&account).await.unwrap();

        let result = manager.authenticate("u@example.com", &token.token).await;
        assert!(matches!(result, Err(PadlockError::ExpiredAuthToken { .. })));
    }

    #[tokio::test]
    async fn test_revoked_token_is_invalid() {
        let manager = create_test_manager().await;
        let request = manager
            .request_token("u@example.com", TokenType::Api, None)
            .await
            .unwrap();
        manager.activate_token(&request.code).await.unwrap();

        manager
            .revoke_token("u@example.com", &request.auth_token.token)
            .await
            .unwrap();

        let result = manager
            .authenticate("u@example.com", &request.auth_token.token)
            .await;
        assert!(matches!(result, Err(PadlockError::InvalidAuthToken { .. })));

        let again = manager
            .revoke_token("u@example.com", &request.auth_token.token)
            .await;
        assert!(matches!(again, Err(PadlockError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_activation_keeps_existing_tokens() {
        let manager = create_test_manager().await;
        for _ in 0..3 {
            let request = manager
                .request_token("u@example.com", TokenType::Api, None)
                .await
                .unwrap();
            manager.activate_token(&request.code).await.unwrap();
        }

        let account = manager.get_account("u@example.com").await.unwrap();
        assert_eq!(account.auth_tokens.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_email_rejected() {
        let manager = create_test_manager().await;
        let result = manager
            .request_token("not an email", TokenType::Api, None)
            .await;
        assert!(matches!(result, Err(PadlockError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_data_store_lifecycle() {
        let manager = create_test_manager().await;
        assert!(manager
            .read_data("u@example.com")
            .await
            .unwrap()
            .content
            .is_empty());

        manager
            .write_data("u@example.com", b"ciphertext".to_vec())
            .await
            .unwrap();
        assert_eq!(
            manager.read_data("u@example.com").await.unwrap().content,
            b"ciphertext"
        );

        manager.delete_data("u@example.com").await.unwrap();
        assert!(manager
            .read_data("u@example.com")
            .await
            .unwrap()
            .content
            .is_empty());
    }

    #[tokio::test]
    async fn test_account_administration() {
        let manager = create_test_manager().await;
        manager.create_account("a@example.com").await.unwrap();
        manager.create_account("b@example.com").await.unwrap();
        manager.write_data("a@example.com", b"x".to_vec()).await.unwrap();

        let mut accounts = manager.list_accounts().await.unwrap();
        accounts.sort();
        assert_eq!(accounts, vec!["a@example.com", "b@example.com"]);

        manager.delete_account("a@example.com").await.unwrap();
        assert_eq!(manager.list_accounts().await.unwrap(), vec!["b@example.com"]);
        assert!(manager
            .read_data("a@example.com")
            .await
            .unwrap()
            .content
            .is_empty());
        assert!(matches!(
            manager.delete_account("a@example.com").await,
            Err(PadlockError::NotFound(_))
        ));
    }
}
