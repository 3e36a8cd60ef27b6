/// Url-encoded form handling
///
/// Several pipeline stages look at form fields (api version, CSRF token,
/// deprecated-client email) before the handler runs. The body is read once,
/// parsed, cached in the request extensions and put back for the handler.
use crate::error::{PadlockError, PadlockResult};
use axum::{
    async_trait,
    body::{to_bytes, Body},
    extract::{FromRequest, Request},
    http::{header, Method},
};
use std::{collections::HashMap, sync::Arc};

/// Upper bound for buffered form bodies
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Parsed url-encoded fields. The first occurrence of a name wins.
#[derive(Debug, Clone, Default)]
pub struct FormFields(Arc<HashMap<String, String>>);

impl FormFields {
    pub fn parse(raw: &[u8]) -> Self {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(raw).unwrap_or_default();

        let mut fields = HashMap::new();
        for (name, value) in pairs {
            fields.entry(name).or_insert(value);
        }

        Self(Arc::new(fields))
    }

    pub fn from_query(query: Option<&str>) -> Self {
        query.map(|q| Self::parse(q.as_bytes())).unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Trimmed, non-empty value of a field
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(str::trim).filter(|v| !v.is_empty())
    }
}

fn has_form_body(request: &Request) -> bool {
    let method = request.method();
    if method != Method::POST && method != Method::PUT && method != Method::PATCH {
        return false;
    }

    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

/// Parse the form body of `request` if it has one, leaving the body intact.
/// Repeated calls reuse the cached result.
pub async fn buffer_form(mut request: Request) -> PadlockResult<(Request, FormFields)> {
    if let Some(fields) = request.extensions().get::<FormFields>() {
        let fields = fields.clone();
        return Ok((request, fields));
    }

    let fields = if has_form_body(&request) {
        let (parts, body) = request.into_parts();
        let bytes = to_bytes(body, MAX_BODY_SIZE)
            .await
            .map_err(|e| PadlockError::BadRequest(format!("Failed to read body: {}", e)))?;
        let fields = FormFields::parse(&bytes);
        request = Request::from_parts(parts, Body::from(bytes));
        fields
    } else {
        FormFields::default()
    };

    request.extensions_mut().insert(fields.clone());
    Ok((request, fields))
}

#[async_trait]
impl<S: Send + Sync> FromRequest<S> for FormFields {
    type Rejection = PadlockError;

    async fn from_request(request: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let (_, fields) = buffer_form(request).await?;
        Ok(fields)
    }
}
