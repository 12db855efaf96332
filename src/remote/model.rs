use serde::Deserialize;

/// Error body returned by PostgREST-style endpoints.
#[derive(Deserialize, Debug, Default)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl ApiErrorBody {
    /// Best single-line description of the failure.
    pub fn summary(&self) -> Option<String> {
        let message = self.message.as_deref()?.trim();
        if message.is_empty() {
            return None;
        }
        Some(match self.details.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(details) => format!("{message} ({details})"),
            None => message.to_string(),
        })
    }
}
