//! Slot lookup and appointment booking

use super::{parse_input, AppointmentRequest, Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

/// Longest range a single slot query may cover
const MAX_RANGE_DAYS: i64 = 31;

#[derive(Debug, Deserialize)]
struct SlotsInput {
    from: NaiveDate,
    to: NaiveDate,
}

pub struct GetAvailableSlotsTool;

#[async_trait]
impl Tool for GetAvailableSlotsTool {
    fn name(&self) -> &str {
        "get_available_slots"
    }

    fn description(&self) -> String {
        "List open appointment slots between two dates (inclusive, YYYY-MM-DD). \
         Always check availability before proposing a time."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["from", "to"],
            "properties": {
                "from": {"type": "string", "format": "date", "description": "First day to search"},
                "to": {"type": "string", "format": "date", "description": "Last day to search"}
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input: SlotsInput = match parse_input(input) {
            Ok(i) => i,
            Err(output) => return output,
        };
        if (input.to - input.from).num_days() > MAX_RANGE_DAYS {
            return ToolOutput::error(format!(
                "Invalid input: range may span at most {MAX_RANGE_DAYS} days"
            ));
        }

        match ctx
            .records()
            .available_slots(&ctx.tenant_id, input.from, input.to)
            .await
        {
            Ok(slots) => ToolOutput::json(&json!({ "slots": slots })),
            Err(e) => e.into(),
        }
    }
}

pub struct CreateAppointmentTool;

#[async_trait]
impl Tool for CreateAppointmentTool {
    fn name(&self) -> &str {
        "create_appointment"
    }

    fn description(&self) -> String {
        "Book an open slot for a patient. Only call this after the patient has confirmed \
         the slot."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["slot_id", "patient_ref"],
            "properties": {
                "slot_id": {"type": "string"},
                "patient_ref": {"type": "string", "description": "Clinic patient reference"},
                "reason": {"type": "string", "description": "Reason for the visit"}
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let request: AppointmentRequest = match parse_input(input) {
            Ok(r) => r,
            Err(output) => return output,
        };

        match ctx
            .records()
            .create_appointment(&ctx.tenant_id, &request)
            .await
        {
            Ok(appointment) => {
                tracing::info!(
                    conv_id = %ctx.conversation_id,
                    tenant = %ctx.tenant_id,
                    appointment_id = %appointment.appointment_id,
                    "Appointment created"
                );
                ToolOutput::json(&appointment)
            }
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ClinicRecords, InMemoryClinic, Slot};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn context(clinic: Arc<InMemoryClinic>) -> ToolContext {
        ToolContext::new(CancellationToken::new(), "conv-1", "t1", clinic)
    }

    fn clinic_with_slot() -> Arc<InMemoryClinic> {
        let clinic = Arc::new(InMemoryClinic::new());
        clinic.add_slot(
            "t1",
            Slot {
                slot_id: "s1".to_string(),
                starts_at: NaiveDate::from_ymd_opt(2026, 4, 7)
                    .unwrap()
                    .and_hms_opt(14, 30, 0)
                    .unwrap(),
                duration_minutes: 45,
                provider: "Dr. Ortega".to_string(),
            },
        );
        clinic
    }

    #[tokio::test]
    async fn test_slots_listed_as_json() {
        let clinic = clinic_with_slot();
        let output = GetAvailableSlotsTool
            .run(json!({"from": "2026-04-01", "to": "2026-04-10"}), context(clinic))
            .await;
        assert!(output.success, "{}", output.output);
        let parsed: Value = serde_json::from_str(&output.output).unwrap();
        assert_eq!(parsed["slots"][0]["slot_id"], "s1");
    }

    #[tokio::test]
    async fn test_slots_input_validation() {
        let clinic = clinic_with_slot();
        let bad_date = GetAvailableSlotsTool
            .run(json!({"from": "next tuesday", "to": "2026-04-10"}), context(clinic.clone()))
            .await;
        assert!(!bad_date.success);

        let too_wide = GetAvailableSlotsTool
            .run(json!({"from": "2026-01-01", "to": "2026-06-01"}), context(clinic))
            .await;
        assert!(!too_wide.success);
        assert!(too_wide.output.contains("31 days"));
    }

    #[tokio::test]
    async fn test_booking_and_conflict() {
        let clinic = clinic_with_slot();
        let input = json!({"slot_id": "s1", "patient_ref": "p-9", "reason": "cleaning"});
        let booked = CreateAppointmentTool
            .run(input.clone(), context(clinic.clone()))
            .await;
        assert!(booked.success, "{}", booked.output);

        let again = CreateAppointmentTool.run(input, context(clinic.clone())).await;
        assert!(!again.success);
        assert!(again.output.starts_with("Conflict"));

        let remaining = clinic
            .available_slots(
                "t1",
                NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 4, 30).unwrap(),
            )
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }
}
