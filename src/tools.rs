//! Clinic tools offered to responders
//!
//! Tools are stateless singletons; everything a call needs arrives in a
//! [`ToolContext`]. Every call is recorded as a [`ToolInvocation`] for audit.

mod billing;
mod clinic;
mod scheduling;

pub use billing::GetInvoicesTool;
pub use clinic::{
    Appointment, AppointmentRequest, ClinicRecords, HttpClinic, InMemoryClinic, Invoice,
    InvoiceStatus, Slot,
};
pub use scheduling::{CreateAppointmentTool, GetAvailableSlotsTool};

use crate::llm::ToolDefinition;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Result from tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }

    /// Serialize a value as the tool's output
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(s) => Self::success(s),
            Err(e) => Self::error(format!("Failed to encode result: {e}")),
        }
    }
}

impl From<ToolError> for ToolOutput {
    fn from(e: ToolError) -> Self {
        ToolOutput::error(e.to_string())
    }
}

/// Audit entry stored on the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub input: Value,
    pub output: String,
    pub success: bool,
    pub role: String,
    pub at: DateTime<Utc>,
}

/// Per-call context
#[derive(Clone)]
pub struct ToolContext {
    pub cancel: CancellationToken,
    pub conversation_id: String,
    pub tenant_id: String,
    records: Arc<dyn ClinicRecords>,
}

impl ToolContext {
    pub fn new(
        cancel: CancellationToken,
        conversation_id: impl Into<String>,
        tenant_id: impl Into<String>,
        records: Arc<dyn ClinicRecords>,
    ) -> Self {
        Self {
            cancel,
            conversation_id: conversation_id.into(),
            tenant_id: tenant_id.into(),
            records,
        }
    }

    pub fn records(&self) -> &Arc<dyn ClinicRecords> {
        &self.records
    }
}

/// A tool a responder can call
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> String;

    fn input_schema(&self) -> Value;

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput;
}

/// Collection of tools available to responders
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    records: Arc<dyn ClinicRecords>,
}

impl ToolRegistry {
    /// Standard clinic tools over the given records
    pub fn clinic(records: Arc<dyn ClinicRecords>) -> Self {
        Self {
            tools: vec![
                Arc::new(GetAvailableSlotsTool),
                Arc::new(CreateAppointmentTool),
                Arc::new(GetInvoicesTool),
            ],
            records,
        }
    }

    /// Definitions for the named tools, in registry order
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|t| names.iter().any(|n| n == t.name()))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn context(&self, cancel: CancellationToken, conversation_id: &str, tenant_id: &str) -> ToolContext {
        ToolContext::new(cancel, conversation_id, tenant_id, Arc::clone(&self.records))
    }

    /// Execute a tool by name; `None` if no such tool exists
    pub async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        let tool = self.tools.iter().find(|t| t.name() == name)?;
        if ctx.cancel.is_cancelled() {
            return Some(ToolOutput::error("cancelled"));
        }
        Some(tool.run(input, ctx).await)
    }
}

/// Deserialize tool input, reporting a readable error
pub(crate) fn parse_input<T: serde::de::DeserializeOwned>(input: Value) -> Result<T, ToolOutput> {
    serde_json::from_value(input).map_err(|e| ToolOutput::error(format!("Invalid input: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definitions_filtered_by_name() {
        let registry = ToolRegistry::clinic(Arc::new(InMemoryClinic::new()));
        assert_eq!(
            registry.names(),
            vec!["get_available_slots", "create_appointment", "get_invoices"]
        );

        let defs = registry.definitions_for(&["get_invoices".to_string(), "unknown".to_string()]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "get_invoices");
        assert!(defs[0].input_schema["properties"]["patient_ref"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_none() {
        let registry = ToolRegistry::clinic(Arc::new(InMemoryClinic::new()));
        let ctx = registry.context(CancellationToken::new(), "c1", "t1");
        assert!(registry.execute("drill", json!({}), ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_context_short_circuits() {
        let registry = ToolRegistry::clinic(Arc::new(InMemoryClinic::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = registry.context(cancel, "c1", "t1");
        let output = registry
            .execute("get_invoices", json!({"patient_ref": "p-1"}), ctx)
            .await
            .unwrap();
        assert!(!output.success);
    }
}
