use async_trait::async_trait;

use super::error::BrowserResult;

/// What the manifest extractor needs from a loaded page.
#[async_trait]
pub trait PageProbe: Send + Sync {
    async fn navigate(&self, url: &str) -> BrowserResult<()>;

    async fn reload(&self) -> BrowserResult<()>;

    /// Bodies of the textual network responses observed since the last load.
    async fn response_bodies(&self) -> BrowserResult<Vec<String>>;

    /// Serialized DOM after scripts have run.
    async fn rendered_markup(&self) -> BrowserResult<String>;

    /// Evaluates an expression that yields an array of strings.
    async fn evaluate_strings(&self, script: &str) -> BrowserResult<Vec<String>>;

    /// Evaluates an expression for its side effects.
    async fn execute(&self, script: &str) -> BrowserResult<()>;

    async fn close(&self) -> BrowserResult<()>;
}
