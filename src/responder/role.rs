//! Responder roles and their descriptors

use crate::escalation::EscalationLevel;
use crate::rules::RuleSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of responder roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Coordinator,
    Medical,
    Billing,
    Scheduling,
    Financial,
    Operations,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Coordinator,
        Role::Medical,
        Role::Billing,
        Role::Scheduling,
        Role::Financial,
        Role::Operations,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Coordinator => "coordinator",
            Role::Medical => "medical",
            Role::Billing => "billing",
            Role::Scheduling => "scheduling",
            Role::Financial => "financial",
            Role::Operations => "operations",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that distinguishes one specialist from another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    pub role: Role,
    pub persona: String,
    /// Names of the clinic tools this role may call
    #[serde(default)]
    pub tools: Vec<String>,
    /// Escalation keywords layered over the shared table
    #[serde(default)]
    pub escalation_rules: Vec<RuleSpec<EscalationLevel>>,
}

impl RoleDescriptor {
    pub fn new(role: Role, persona: impl Into<String>) -> Self {
        Self {
            role,
            persona: persona.into(),
            tools: Vec::new(),
            escalation_rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|t| (*t).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_escalation_rules(mut self, rules: Vec<RuleSpec<EscalationLevel>>) -> Self {
        self.escalation_rules = rules;
        self
    }
}

/// Built-in descriptors, one per role
pub fn default_descriptors() -> Vec<RoleDescriptor> {
    vec![
        RoleDescriptor::new(
            Role::Coordinator,
            "You are the front-desk coordinator for a dental and medical clinic. Greet patients, \
             answer general questions briefly, and hand the conversation to the right specialist \
             when the request is about symptoms, appointments, invoices, insurance or clinic \
             logistics.",
        ),
        RoleDescriptor::new(
            Role::Medical,
            "You are the clinic's triage assistant. Ask about symptoms calmly, never diagnose or \
             prescribe, and escalate to a doctor whenever symptoms could be serious. You may look \
             up available slots to offer an urgent visit.",
        )
        .with_tools(&["get_available_slots"])
        .with_escalation_rules(vec![RuleSpec::new(
            r"\b(infection|infecci[oó]n|abscess|absceso|pus)\b",
            EscalationLevel::DoctorRequired,
        )]),
        RoleDescriptor::new(
            Role::Billing,
            "You are the clinic's billing assistant. Look up the patient's invoices before \
             answering questions about charges, balances or receipts, and quote amounts exactly \
             as the records show them.",
        )
        .with_tools(&["get_invoices"]),
        RoleDescriptor::new(
            Role::Scheduling,
            "You are the clinic's scheduling assistant. Check availability before proposing a \
             time, confirm the date, time and reason with the patient, and only then create the \
             appointment.",
        )
        .with_tools(&["get_available_slots", "create_appointment"]),
        RoleDescriptor::new(
            Role::Financial,
            "You are the clinic's financial counsellor. Explain insurance coverage, copays and \
             payment plans in plain language. Use the patient's invoices when discussing what \
             they owe.",
        )
        .with_tools(&["get_invoices"]),
        RoleDescriptor::new(
            Role::Operations,
            "You answer questions about clinic operations: opening hours, address, parking, \
             accessibility and what to bring to a visit.",
        )
        .with_tools(&["get_available_slots"]),
    ]
}

/// Ordered keyword routing table; first match wins
pub fn default_routing_rules() -> Vec<RuleSpec<Role>> {
    vec![
        RuleSpec::new(
            r"\b(pain|hurts?|ache|bleed(ing)?|swollen|swelling|fever|infection|emergency|urgent|medication|prescription|dolor|duele|sangr(ado|a)|hinchad[oa]|fiebre|urgencia|emergencia)\b",
            Role::Medical,
        ),
        RuleSpec::new(
            r"\b(insurance|copay|coverage|financing|payment plan|installments?|seguro|cobertura|financiamiento)\b",
            Role::Financial,
        ),
        RuleSpec::new(
            r"\b(invoice|bill|billing|charged?|payment|receipt|balance|refund|factura|pago|cobro|recibo)\b",
            Role::Billing,
        ),
        RuleSpec::new(
            r"\b(appointment|book|booking|reschedule|schedule|cancel|slot|availability|available|cita|agendar|reservar|cancelar)\b",
            Role::Scheduling,
        ),
        RuleSpec::new(
            r"\b(hours|open|close[sd]?|address|parking|directions|location|wheelchair|horario|direcci[oó]n|estacionamiento)\b",
            Role::Operations,
        ),
    ]
}
