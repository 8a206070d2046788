use async_trait::async_trait;

/// Renders JavaScript-heavy pages and reports the PDF links they reveal
///
/// Invoked only when ordinary extraction finds nothing on a page. Callers
/// treat any error as "no additional links".
#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    async fn reveal_pdf_links(&self, url: &str) -> crate::Result<Vec<String>>;
}
