//! HTTP-backed collaborators and the JSONL event sink used by the CLI.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use evalrun_core::config::EndpointConfig;
use evalrun_core::{
	AgentExecutor, AgentOutput, AgentRequest, CancellationToken, EventSink, JudgeRequest, JudgeVerdict, LlmJudge,
	RunEvent, ScriptRequest, ScriptSandbox,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

struct Endpoint {
	client: reqwest::Client,
	url: String,
	headers: BTreeMap<String, String>,
}

impl Endpoint {
	fn new(url: String, headers: BTreeMap<String, String>, timeout: Duration) -> Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.context("Failed to build HTTP client")?;
		Ok(Self { client, url, headers })
	}

	async fn post<T: DeserializeOwned>(&self, body: &Value) -> Result<T> {
		let mut req = self.client.post(&self.url).json(body);
		for (name, value) in &self.headers {
			req = req.header(name, value);
		}
		let resp = req.send().await?;
		let status = resp.status();
		if !status.is_success() {
			let text = resp.text().await.unwrap_or_default();
			anyhow::bail!("HTTP {} from {}: {}", status.as_u16(), self.url, text);
		}
		resp.json::<T>().await.with_context(|| format!("Invalid response from {}", self.url))
	}
}

/// Agent reached over HTTP. The endpoint answers either with a bare string
/// or with an object carrying `output` and optional usage counters.
pub struct HttpAgent {
	endpoint: Endpoint,
}

impl HttpAgent {
	pub fn new(url: String, headers: BTreeMap<String, String>, timeout: Duration) -> Result<Self> {
		Ok(Self {
			endpoint: Endpoint::new(url, headers, timeout)?,
		})
	}
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentReply {
	#[serde(default)]
	output: String,
	#[serde(default)]
	cost: f64,
	#[serde(default)]
	tokens: u64,
	#[serde(default)]
	steps: u32,
	#[serde(default)]
	tool_calls: u32,
	#[serde(default)]
	llm_calls: u32,
	#[serde(default)]
	completion_reason: Option<String>,
	#[serde(default)]
	operation_id: Option<String>,
}

fn agent_output(reply: Value) -> Result<AgentOutput> {
	if let Value::String(text) = reply {
		return Ok(AgentOutput::text(text));
	}
	let reply: AgentReply = serde_json::from_value(reply).context("agent reply must be a string or an object")?;
	Ok(AgentOutput {
		output: reply.output,
		cost: reply.cost,
		tokens: reply.tokens,
		steps: reply.steps,
		tool_calls: reply.tool_calls,
		llm_calls: reply.llm_calls,
		completion_reason: reply.completion_reason,
		operation_id: reply.operation_id,
	})
}

#[async_trait]
impl AgentExecutor for HttpAgent {
	async fn invoke(&self, request: AgentRequest, cancel: CancellationToken) -> Result<AgentOutput> {
		let body = json!({
			"testCaseId": request.test_case_id,
			"threadId": request.thread_id,
			"input": request.input,
			"systemPrompt": request.system_prompt,
			"maxSteps": request.max_steps,
			"agent": request.agent,
		});
		tokio::select! {
			_ = cancel.cancelled() => anyhow::bail!("agent call cancelled"),
			reply = self.endpoint.post::<Value>(&body) => agent_output(reply?),
		}
	}
}

/// LLM judge behind an HTTP endpoint returning `{ "score": f, "reason"?: s }`.
pub struct HttpJudge {
	endpoint: Endpoint,
}

impl HttpJudge {
	/// `fallback` applies when the endpoint sets no timeout of its own.
	pub fn new(config: &EndpointConfig, fallback: Duration) -> Result<Self> {
		let timeout = config.timeout.map(Duration::from_millis).unwrap_or(fallback);
		Ok(Self {
			endpoint: Endpoint::new(config.url.clone(), config.headers.clone(), timeout)?,
		})
	}
}

#[derive(Debug, Deserialize)]
struct Verdict {
	score: f64,
	#[serde(default)]
	reason: Option<String>,
}

#[async_trait]
impl LlmJudge for HttpJudge {
	async fn judge(&self, request: JudgeRequest) -> Result<JudgeVerdict> {
		let body = json!({
			"kind": request.kind,
			"criteria": request.criteria,
			"answer": request.answer,
			"expected": request.expected,
			"input": request.input,
			"model": request.model,
			"provider": request.provider,
			"systemRole": request.system_role,
		});
		let verdict: Verdict = self.endpoint.post(&body).await?;
		Ok(JudgeVerdict {
			score: verdict.score,
			reason: verdict.reason,
		})
	}
}

/// Script sandbox behind an HTTP endpoint returning a number or `{ "score": f }`.
pub struct HttpSandbox {
	endpoint: Endpoint,
}

impl HttpSandbox {
	/// `fallback` applies when the endpoint sets no timeout of its own.
	pub fn new(config: &EndpointConfig, fallback: Duration) -> Result<Self> {
		let timeout = config.timeout.map(Duration::from_millis).unwrap_or(fallback);
		Ok(Self {
			endpoint: Endpoint::new(config.url.clone(), config.headers.clone(), timeout)?,
		})
	}
}

fn sandbox_score(reply: &Value) -> Result<f64> {
	reply
		.as_f64()
		.or_else(|| reply.get("score").and_then(Value::as_f64))
		.with_context(|| format!("sandbox returned no numeric score: {reply}"))
}

#[async_trait]
impl ScriptSandbox for HttpSandbox {
	async fn execute(&self, request: ScriptRequest) -> Result<f64> {
		let reply: Value = self.endpoint.post(&serde_json::to_value(&request)?).await?;
		sandbox_score(&reply)
	}
}

/// Appends every run event as one JSON line.
pub struct JsonlEventSink {
	file: Mutex<tokio::fs::File>,
}

impl JsonlEventSink {
	pub async fn create(path: &Path) -> Result<Self> {
		let file = tokio::fs::File::create(path)
			.await
			.with_context(|| format!("Failed to create {:?}", path))?;
		Ok(Self { file: Mutex::new(file) })
	}
}

#[async_trait]
impl EventSink for JsonlEventSink {
	async fn emit(&self, event: RunEvent) -> Result<()> {
		let mut line = serde_json::to_vec(&event)?;
		line.push(b'\n');
		let mut file = self.file.lock().await;
		file.write_all(&line).await?;
		file.flush().await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_agent_reply_as_string() {
		let out = agent_output(json!("42")).unwrap();
		assert_eq!(out.output, "42");
		assert_eq!(out.tokens, 0);
	}

	#[test]
	fn test_agent_reply_as_object() {
		let out = agent_output(json!({
			"output": "B",
			"cost": 0.02,
			"tokens": 120,
			"steps": 3,
			"toolCalls": 2,
			"llmCalls": 1,
			"completionReason": "done"
		}))
		.unwrap();
		assert_eq!(out.output, "B");
		assert_eq!(out.tokens, 120);
		assert_eq!(out.tool_calls, 2);
		assert_eq!(out.completion_reason.as_deref(), Some("done"));
	}

	#[test]
	fn test_agent_reply_rejects_numbers() {
		assert!(agent_output(json!(7)).is_err());
	}

	#[test]
	fn test_sandbox_score_shapes() {
		assert_eq!(sandbox_score(&json!(0.5)).unwrap(), 0.5);
		assert_eq!(sandbox_score(&json!({"score": 1})).unwrap(), 1.0);
		assert!(sandbox_score(&json!({"ok": true})).is_err());
	}
}
