//! Clinic records collaborator
//!
//! Slots, appointments and invoices live in the clinic's own system; the
//! tools reach them through [`ClinicRecords`].

use super::ToolError;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// An open appointment slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub slot_id: String,
    pub starts_at: NaiveDateTime,
    pub duration_minutes: u32,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRequest {
    pub slot_id: String,
    pub patient_ref: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub appointment_id: String,
    pub slot_id: String,
    pub patient_ref: String,
    pub starts_at: NaiveDateTime,
    pub provider: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Open,
    Paid,
    Overdue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: String,
    pub patient_ref: String,
    pub issued_on: NaiveDate,
    /// Minor currency units
    pub amount_cents: i64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub description: String,
}

/// Read and write access to the clinic's records for one tenant
#[async_trait]
pub trait ClinicRecords: Send + Sync {
    async fn available_slots(
        &self,
        tenant: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, ToolError>;

    async fn create_appointment(
        &self,
        tenant: &str,
        request: &AppointmentRequest,
    ) -> Result<Appointment, ToolError>;

    async fn invoices(&self, tenant: &str, patient_ref: &str) -> Result<Vec<Invoice>, ToolError>;
}

#[async_trait]
impl<T: ClinicRecords + ?Sized> ClinicRecords for Arc<T> {
    async fn available_slots(
        &self,
        tenant: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, ToolError> {
        (**self).available_slots(tenant, from, to).await
    }

    async fn create_appointment(
        &self,
        tenant: &str,
        request: &AppointmentRequest,
    ) -> Result<Appointment, ToolError> {
        (**self).create_appointment(tenant, request).await
    }

    async fn invoices(&self, tenant: &str, patient_ref: &str) -> Result<Vec<Invoice>, ToolError> {
        (**self).invoices(tenant, patient_ref).await
    }
}

// ============================================================================
// In-memory records
// ============================================================================

#[derive(Debug, Default)]
struct Records {
    slots: Vec<(String, Slot)>,
    appointments: Vec<(String, Appointment)>,
    invoices: Vec<(String, Invoice)>,
}

/// Records held in process, keyed by tenant
#[derive(Debug, Default)]
pub struct InMemoryClinic {
    records: Mutex<Records>,
}

impl InMemoryClinic {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn add_slot(&self, tenant: &str, slot: Slot) {
        self.records().slots.push((tenant.to_string(), slot));
    }

    #[cfg(test)]
    pub fn add_invoice(&self, tenant: &str, invoice: Invoice) {
        self.records().invoices.push((tenant.to_string(), invoice));
    }

    #[cfg(test)]
    pub fn appointments(&self, tenant: &str) -> Vec<Appointment> {
        self.records()
            .appointments
            .iter()
            .filter(|(t, _)| t == tenant)
            .map(|(_, a)| a.clone())
            .collect()
    }
}

#[async_trait]
impl ClinicRecords for InMemoryClinic {
    async fn available_slots(
        &self,
        tenant: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, ToolError> {
        if to < from {
            return Err(ToolError::InvalidInput(format!(
                "range end {to} is before start {from}"
            )));
        }
        let records = self.records();
        let mut slots: Vec<Slot> = records
            .slots
            .iter()
            .filter(|(t, _)| t == tenant)
            .map(|(_, s)| s)
            .filter(|s| {
                let day = s.starts_at.date();
                day >= from && day <= to
            })
            .filter(|s| {
                !records
                    .appointments
                    .iter()
                    .any(|(t, a)| t == tenant && a.slot_id == s.slot_id)
            })
            .cloned()
            .collect();
        slots.sort_by_key(|s| s.starts_at);
        Ok(slots)
    }

    async fn create_appointment(
        &self,
        tenant: &str,
        request: &AppointmentRequest,
    ) -> Result<Appointment, ToolError> {
        let mut records = self.records();
        let slot = records
            .slots
            .iter()
            .find(|(t, s)| t == tenant && s.slot_id == request.slot_id)
            .map(|(_, s)| s.clone())
            .ok_or_else(|| ToolError::NotFound(format!("slot {}", request.slot_id)))?;

        if records
            .appointments
            .iter()
            .any(|(t, a)| t == tenant && a.slot_id == request.slot_id)
        {
            return Err(ToolError::Conflict(format!(
                "slot {} is already booked",
                request.slot_id
            )));
        }

        let appointment = Appointment {
            appointment_id: uuid::Uuid::new_v4().to_string(),
            slot_id: slot.slot_id,
            patient_ref: request.patient_ref.clone(),
            starts_at: slot.starts_at,
            provider: slot.provider,
            reason: request.reason.clone(),
        };
        records
            .appointments
            .push((tenant.to_string(), appointment.clone()));
        Ok(appointment)
    }

    async fn invoices(&self, tenant: &str, patient_ref: &str) -> Result<Vec<Invoice>, ToolError> {
        Ok(self
            .records()
            .invoices
            .iter()
            .filter(|(t, i)| t == tenant && i.patient_ref == patient_ref)
            .map(|(_, i)| i.clone())
            .collect())
    }
}

// ============================================================================
// HTTP records
// ============================================================================

/// Clinic records served by the practice-management API
pub struct HttpClinic {
    client: Client,
    base_url: String,
}

impl HttpClinic {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::Unavailable(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, tenant: &str, path: &str) -> String {
        format!("{}/tenants/{tenant}/{path}", self.base_url)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ToolError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                400 | 422 => ToolError::InvalidInput(body),
                404 => ToolError::NotFound(body),
                409 => ToolError::Conflict(body),
                _ => ToolError::Unavailable(format!("HTTP {status}: {body}")),
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ToolError::Unavailable(format!("Malformed response: {e}")))
    }
}

fn transport_error(e: &reqwest::Error) -> ToolError {
    ToolError::Unavailable(format!("Request failed: {e}"))
}

#[async_trait]
impl ClinicRecords for HttpClinic {
    async fn available_slots(
        &self,
        tenant: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Slot>, ToolError> {
        let response = self
            .client
            .get(self.url(tenant, "slots"))
            .query(&[("from", from.to_string()), ("to", to.to_string())])
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        Self::decode(response).await
    }

    async fn create_appointment(
        &self,
        tenant: &str,
        request: &AppointmentRequest,
    ) -> Result<Appointment, ToolError> {
        let response = self
            .client
            .post(self.url(tenant, "appointments"))
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        Self::decode(response).await
    }

    async fn invoices(&self, tenant: &str, patient_ref: &str) -> Result<Vec<Invoice>, ToolError> {
        let response = self
            .client
            .get(self.url(tenant, &format!("patients/{patient_ref}/invoices")))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        Self::decode(response).await
    }
}
