use serde::{Deserialize, Serialize};

/// Body of `POST /add-url` as sent by the browser extension.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUrlRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub design_keywords: Vec<String>,
    #[serde(default)]
    pub critical_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddUrlResponse {
    pub success: bool,
    pub total_urls: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_urls: Option<usize>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { success: false, error: error.into(), total_urls: None }
    }

    pub fn with_total(mut self, total: usize) -> Self {
        self.total_urls = Some(total);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String, // RFC 3339
}

/// On-disk `all_urls.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlList {
    #[serde(default)]
    pub urls: Vec<String>,
}
