use crate::fetch::HttpClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
///
/// The header name and value are validated once at construction so a bad
/// endpoint entry fails at startup instead of on every request.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    value: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .with_context(|| format!("invalid header name '{header_name}'"))?;
        let mut value = HeaderValue::from_str(key).context("API key is not a valid header value")?;
        value.set_sensitive(true);
        Ok(Self {
            inner,
            header_name,
            value,
        })
    }

    /// `Authorization: Bearer <key>`.
    pub fn bearer(inner: C, key: &str) -> Result<Self> {
        Self::new(inner, "Authorization", &format!("Bearer {key}"))
    }
}

impl<C> ApiKey<C> {
    fn authorize(&self, req: &mut reqwest::Request) {
        req.headers_mut()
            .insert(self.header_name.clone(), self.value.clone());
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.authorize(&mut req);
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;

    fn get(url: &str) -> reqwest::Request {
        reqwest::Request::new(reqwest::Method::GET, url.parse().unwrap())
    }

    #[test]
    fn test_header_injected_and_marked_sensitive() {
        let client = ApiKey::new(BasicClient::new().unwrap(), "X-Api-Key", "s3cret").unwrap();
        let mut req = get("https://example.org/alerts");
        client.authorize(&mut req);

        let value = &req.headers()["x-api-key"];
        assert_eq!(value, "s3cret");
        assert!(value.is_sensitive());
    }

    #[test]
    fn test_bearer_token() {
        let client = ApiKey::bearer(BasicClient::new().unwrap(), "tok").unwrap();
        let mut req = get("https://example.org/alerts");
        client.authorize(&mut req);
        assert_eq!(req.headers()["authorization"], "Bearer tok");
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        assert!(ApiKey::new(BasicClient::new().unwrap(), "bad header", "k").is_err());
    }
}
