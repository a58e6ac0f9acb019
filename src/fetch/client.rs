use async_trait::async_trait;
use reqwest::{Request, Response};
use std::sync::Arc;

/// Outbound HTTP seam shared by every network-backed provider.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

/// Lets auth decorators wrap one pooled client shared by many endpoints.
#[async_trait]
impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        self.as_ref().execute(req).await
    }
}
