use serde::Deserialize;

/// Detail object of a non-2xx response body.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiErrorDetail {
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,

    /// Provider-specific error type.
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,

    /// Offending parameter, if the provider names one.
    #[serde(default)]
    pub param: Option<String>,
}

/// Body of a non-2xx response: `{"error": {"message": ...}}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiErrorBody {
    /// The error detail, when present.
    #[serde(default)]
    pub error: Option<ApiErrorDetail>,
}

impl ApiErrorBody {
    /// Parse a body, returning `None` when it is not the expected JSON shape.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    /// The error message, if the body carries one.
    pub fn message(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.message.as_deref())
    }
}
