//! Change events for external persistence and streaming.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::types::{EvalRunMetrics, RunStatus, RunTopicResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RunEvent {
	#[serde(rename_all = "camelCase")]
	StatusChanged {
		run_id: String,
		from: RunStatus,
		to: RunStatus,
	},
	/// One per finished test case; upsert keyed by (run, test case).
	TopicUpserted(RunTopicResult),
	#[serde(rename_all = "camelCase")]
	MetricsUpdated {
		run_id: String,
		metrics: EvalRunMetrics,
		/// Set on the last update of a run.
		#[serde(rename = "final")]
		is_final: bool,
	},
}

/// Receives run events. A failing sink is logged and otherwise ignored.
#[async_trait]
pub trait EventSink: Send + Sync {
	async fn emit(&self, event: RunEvent) -> Result<()>;
}

pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
	async fn emit(&self, _event: RunEvent) -> Result<()> {
		Ok(())
	}
}

/// Forwards events into a tokio channel.
pub struct ChannelSink {
	tx: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelSink {
	pub fn new() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(Self { tx }, rx)
	}
}

#[async_trait]
impl EventSink for ChannelSink {
	async fn emit(&self, event: RunEvent) -> Result<()> {
		self.tx
			.send(event)
			.map_err(|_| anyhow::anyhow!("event receiver dropped"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_channel_sink() {
		let (sink, mut rx) = ChannelSink::new();
		sink.emit(RunEvent::StatusChanged {
			run_id: "r".to_string(),
			from: RunStatus::Idle,
			to: RunStatus::Pending,
		})
		.await
		.unwrap();
		let event = rx.recv().await.unwrap();
		assert!(matches!(event, RunEvent::StatusChanged { to: RunStatus::Pending, .. }));

		drop(rx);
		assert!(sink.emit(RunEvent::StatusChanged {
			run_id: "r".to_string(),
			from: RunStatus::Pending,
			to: RunStatus::Running,
		})
		.await
		.is_err());
	}

	#[test]
	fn test_event_wire_shape() {
		let event = RunEvent::MetricsUpdated {
			run_id: "r".to_string(),
			metrics: EvalRunMetrics::new(2),
			is_final: true,
		};
		let value = serde_json::to_value(&event).unwrap();
		assert_eq!(value["event"], "metricsUpdated");
		assert_eq!(value["runId"], "r");
		assert_eq!(value["final"], true);
		assert_eq!(value["metrics"]["totalCases"], 2);
	}
}
