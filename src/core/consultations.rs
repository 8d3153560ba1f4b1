/// Consultation listing, creation and details

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::config::NetworkConfig;
use super::response::{error_field, is_present, mentions_error, parse_json};
use super::rpc::{MessageRequest, RpcClient, RpcError};
use super::session::{LocalStore, Role, UserMetadata};
use crate::utils::{actions, short_id, DEFAULT_DOCTOR_LANGUAGE, DEFAULT_PATIENT_LANGUAGE};

fn no_consultations_text(role: Role) -> String {
    format!("No consultations found for this {}", role)
}

/// Decide what to stage from a consultations reply
///
/// `Ok` carries the payload to hand to the list view, `Err` the message to
/// show instead.
pub fn classify_consultations(reply: Result<String, RpcError>, role: Role) -> Result<Value, String> {
    let reply = match reply {
        Ok(reply) if is_present(&reply) => reply,
        Ok(_) => return Err("Failed to fetch consultations".to_string()),
        Err(e) => {
            debug!(error = %e, "consultations lookup failed");
            return Err("Failed to fetch consultations".to_string());
        }
    };

    let empty = no_consultations_text(role);
    if reply.contains(&empty) {
        return Ok(Value::Array(Vec::new()));
    }
    if mentions_error(&reply) {
        return Err(reply);
    }

    match parse_json(&reply) {
        Some(data) => match error_field(&data) {
            Some(error) if error == empty => Ok(Value::Array(Vec::new())),
            Some(error) => Err(error),
            None => Ok(data),
        },
        None if !reply.contains("You don't have") => Ok(Value::Array(Vec::new())),
        None => Err("Failed to parse consultations data".to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsultationStatus {
    Active,
    Pending,
}

impl fmt::Display for ConsultationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsultationStatus::Active => f.write_str("active"),
            ConsultationStatus::Pending => f.write_str("pending"),
        }
    }
}

/// One row of the consultations list
#[derive(Debug, Clone, PartialEq)]
pub struct ConsultationSummary {
    pub consultation_id: String,
    pub patient_id: Option<String>,
    pub doctor_id: Option<String>,
    pub title: String,
    pub status: ConsultationStatus,
}

impl ConsultationSummary {
    /// Display name of the counterpart in the list
    pub fn other_participant(&self, viewer: Role) -> &'static str {
        match viewer {
            Role::Patient => "Doctor",
            Role::Doctor => "Patient",
        }
    }
}

/// Turn the staged payload into list rows
///
/// Doctors receive bare consultation ids, patients receive objects.
pub fn summarize_staged(data: &Value, viewer: &UserMetadata) -> Vec<ConsultationSummary> {
    let Some(entries) = data.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match viewer.role {
            Some(Role::Doctor) => {
                let id = entry.as_str()?;
                Some(ConsultationSummary {
                    consultation_id: id.to_string(),
                    patient_id: None,
                    doctor_id: Some(viewer.id.clone()),
                    title: format!("Consultation {}", short_id(id)),
                    status: ConsultationStatus::Active,
                })
            }
            _ => {
                let id = entry.get("consultation_id")?.as_str()?;
                let text = |key: &str| entry.get(key).and_then(Value::as_str).map(str::to_string);
                let doctor_id = text("doctor_id").filter(|d| !d.is_empty());
                Some(ConsultationSummary {
                    consultation_id: id.to_string(),
                    patient_id: text("patient_id"),
                    status: if doctor_id.is_some() {
                        ConsultationStatus::Active
                    } else {
                        ConsultationStatus::Pending
                    },
                    doctor_id,
                    title: format!("Consultation {}", short_id(id)),
                })
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsultationState {
    Triage,
    Doctor,
    Prescription,
}

impl fmt::Display for ConsultationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsultationState::Triage => f.write_str("TRIAGE"),
            ConsultationState::Doctor => f.write_str("DOCTOR"),
            ConsultationState::Prescription => f.write_str("PRESCRIPTION"),
        }
    }
}

/// Snapshot held by a consultation process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultationDetails {
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub doctor_id: Option<String>,
    pub state: ConsultationState,
    #[serde(default, deserialize_with = "super::response::optional_string_or_number")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub patient_language: Option<String>,
    #[serde(default)]
    pub doctor_language: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub role: String,
}

impl ConsultationDetails {
    fn patient_language(&self) -> String {
        self.patient_language
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| DEFAULT_PATIENT_LANGUAGE.to_string())
    }

    fn doctor_language(&self) -> String {
        self.doctor_language
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| DEFAULT_DOCTOR_LANGUAGE.to_string())
    }

    /// (source, target) languages for messages written by `role`
    pub fn languages_for(&self, role: Role) -> (String, String) {
        match role {
            Role::Patient => (self.patient_language(), self.doctor_language()),
            Role::Doctor => (self.doctor_language(), self.patient_language()),
        }
    }

    /// Who the viewer is talking to: the counterpart, or the triage agent
    /// while the patient is alone in triage
    pub fn other_participant(&self, viewer_id: &str, triage_process: &str) -> Option<Participant> {
        match (&self.patient_id, &self.doctor_id) {
            (Some(patient), Some(doctor)) => {
                let viewer_is_patient = viewer_id == patient;
                Some(Participant {
                    id: if viewer_is_patient { doctor.clone() } else { patient.clone() },
                    name: if viewer_is_patient { "Dr. Assistant" } else { "Patient" }.to_string(),
                    role: if viewer_is_patient { "doctor" } else { "patient" }.to_string(),
                })
            }
            (Some(_), None) if self.state == ConsultationState::Triage => Some(Participant {
                id: triage_process.to_string(),
                name: "Triage Agent".to_string(),
                role: "triage".to_string(),
            }),
            _ => None,
        }
    }
}

pub struct ConsultationManager {
    rpc: Arc<RpcClient>,
    network: NetworkConfig,
    store: LocalStore,
}

impl ConsultationManager {
    pub fn new(rpc: Arc<RpcClient>, network: NetworkConfig, store: LocalStore) -> Self {
        Self { rpc, network, store }
    }

    /// Fetch the user's consultations and stage them for the list view
    pub async fn fetch(&self, role: Role) -> Result<()> {
        let action = match role {
            Role::Doctor => actions::GET_DOCTOR_CONSULTATIONS,
            Role::Patient => actions::GET_PATIENT_CONSULTATIONS,
        };
        let request = MessageRequest::new(self.network.orchestrator()?).action(action);
        let payload = classify_consultations(self.rpc.dispatch(request).await, role)
            .map_err(|message| anyhow!(message))?;

        self.store.stage_consultations(&payload)?;
        Ok(())
    }

    /// Consume the staged consultations
    pub fn list(&self, viewer: &UserMetadata) -> Result<Vec<ConsultationSummary>> {
        Ok(self
            .store
            .take_consultations()?
            .map(|data| summarize_staged(&data, viewer))
            .unwrap_or_default())
    }

    /// Start a new consultation; returns its id (the consultation process)
    pub async fn create(&self) -> Result<String> {
        let request = MessageRequest::new(self.network.orchestrator()?)
            .action(actions::CREATE_CONSULTATION);

        let reply = match self.rpc.dispatch(request).await {
            Ok(reply) if is_present(&reply) => reply,
            _ => bail!("Failed to create consultation"),
        };
        if mentions_error(&reply) {
            bail!(reply);
        }

        let Some(data) = parse_json(&reply) else {
            bail!(reply);
        };
        if data.get("success").and_then(Value::as_bool).unwrap_or(false) {
            if let Some(id) = data
                .pointer("/consultation/consultation_id")
                .and_then(Value::as_str)
            {
                return Ok(id.to_string());
            }
        }
        match error_field(&data) {
            Some(error) => bail!(error),
            None => bail!("Failed to create consultation"),
        }
    }

    pub async fn details(&self, consultation_id: &str) -> Result<ConsultationDetails> {
        let request = MessageRequest::new(consultation_id).action(actions::GET_CONSULTATION_DETAILS);
        let reply = self
            .rpc
            .dispatch(request)
            .await
            .map_err(|e| anyhow!("Failed to fetch consultation details: {}", e))?;

        if let Some(error) = parse_json(&reply).as_ref().and_then(error_field) {
            bail!(error);
        }
        serde_json::from_str(&reply).map_err(|e| {
            warn!(reply = %reply, "unexpected consultation details");
            anyhow!("Failed to parse consultation details: {}", e)
        })
    }
}
