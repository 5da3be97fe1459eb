use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::types::AgentSnapshot;

/// One agent invocation for a single thread of a test case.
#[derive(Debug, Clone)]
pub struct AgentRequest {
	pub test_case_id: String,
	pub thread_id: String,
	pub input: String,
	pub system_prompt: Option<String>,
	pub agent: Option<AgentSnapshot>,
	pub max_steps: Option<u32>,
	pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
	pub output: String,
	pub cost: f64,
	pub tokens: u64,
	pub steps: u32,
	pub tool_calls: u32,
	pub llm_calls: u32,
	pub completion_reason: Option<String>,
	pub operation_id: Option<String>,
}

impl AgentOutput {
	pub fn text(output: impl Into<String>) -> Self {
		Self {
			output: output.into(),
			..Self::default()
		}
	}

	pub fn with_usage(mut self, cost: f64, tokens: u64) -> Self {
		self.cost = cost;
		self.tokens = tokens;
		self
	}
}

/// The system under evaluation. Implementations should stop work once
/// `cancel` fires; the engine drops the call regardless.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
	async fn invoke(&self, request: AgentRequest, cancel: CancellationToken) -> Result<AgentOutput>;
}

/// Wrap an async closure as an `AgentExecutor`.
pub fn from_async_fn<F, Fut>(f: F) -> Arc<dyn AgentExecutor>
where
	F: Send + Sync + 'static + Fn(AgentRequest) -> Fut,
	Fut: Future<Output = Result<AgentOutput>> + Send + 'static,
{
	struct ClosureAgent<F, Fut>
	where
		F: Send + Sync + 'static + Fn(AgentRequest) -> Fut,
		Fut: Future<Output = Result<AgentOutput>> + Send + 'static,
	{
		f: F,
	}

	#[async_trait]
	impl<F, Fut> AgentExecutor for ClosureAgent<F, Fut>
	where
		F: Send + Sync + 'static + Fn(AgentRequest) -> Fut,
		Fut: Future<Output = Result<AgentOutput>> + Send + 'static,
	{
		async fn invoke(&self, request: AgentRequest, _cancel: CancellationToken) -> Result<AgentOutput> {
			(self.f)(request).await
		}
	}

	Arc::new(ClosureAgent { f })
}
