use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    Javascript,
    Python,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptRequest {
    pub language: ScriptLanguage,
    pub code: String,
    pub answer: String,
    pub expected: Option<String>,
}

/// External sandbox running user-supplied scoring code. Returns the script's
/// numeric result; the engine clamps it to [0, 1].
#[async_trait]
pub trait ScriptSandbox: Send + Sync {
    async fn execute(&self, request: ScriptRequest) -> Result<f64>;
}
