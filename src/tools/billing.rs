//! Invoice lookup

use super::{parse_input, Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct InvoicesInput {
    patient_ref: String,
}

pub struct GetInvoicesTool;

#[async_trait]
impl Tool for GetInvoicesTool {
    fn name(&self) -> &str {
        "get_invoices"
    }

    fn description(&self) -> String {
        "Fetch a patient's invoices (amounts in minor currency units) with their status."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["patient_ref"],
            "properties": {
                "patient_ref": {"type": "string", "description": "Clinic patient reference"}
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input: InvoicesInput = match parse_input(input) {
            Ok(i) => i,
            Err(output) => return output,
        };
        if input.patient_ref.trim().is_empty() {
            return ToolOutput::error("Invalid input: patient_ref is empty");
        }

        match ctx
            .records()
            .invoices(&ctx.tenant_id, input.patient_ref.trim())
            .await
        {
            Ok(invoices) => ToolOutput::json(&json!({ "invoices": invoices })),
            Err(e) => e.into(),
        }
    }
}
