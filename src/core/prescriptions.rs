/// Prescriptions held by the pharmacist process

use anyhow::{anyhow, bail, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use super::config::NetworkConfig;
use super::consultations::ConsultationDetails;
use super::response::{is_present, number_or_string, parse_json};
use super::rpc::{MessageRequest, RpcClient};
use super::session::Role;
use crate::utils::{actions, date_to_ms, tags};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    #[serde(default)]
    pub drug_name: String,
    #[serde(default, deserialize_with = "number_or_string")]
    pub frequency: i64,
    #[serde(rename = "startTimestamp", default, deserialize_with = "number_or_string")]
    pub start_timestamp: i64,
    #[serde(rename = "endTimestamp", default, deserialize_with = "number_or_string")]
    pub end_timestamp: i64,
    #[serde(rename = "nextReminderTimestamp", default, deserialize_with = "number_or_string")]
    pub next_reminder_timestamp: i64,
    #[serde(default)]
    pub patient_id: String,
    /// The pharmacist spells this key `consultaiton_id`
    #[serde(rename = "consultaiton_id", alias = "consultation_id", default)]
    pub consultation_id: String,
}

impl Prescription {
    pub fn is_active_at(&self, now_ms: i64) -> bool {
        now_ms >= self.start_timestamp && now_ms <= self.end_timestamp
    }
}

/// Parse a `GetPrescriptions` reply, newest first; anything but an array is empty
pub fn parse_prescriptions(reply: &str) -> Result<Vec<Prescription>> {
    let value = parse_json(reply).ok_or_else(|| anyhow!("Failed to parse prescriptions"))?;
    let Value::Array(entries) = value else {
        return Ok(Vec::new());
    };

    let mut prescriptions: Vec<Prescription> = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(prescription) => Some(prescription),
            Err(e) => {
                warn!(error = %e, "skipping malformed prescription");
                None
            }
        })
        .collect();
    prescriptions.sort_by(|a, b| b.start_timestamp.cmp(&a.start_timestamp));

    Ok(prescriptions)
}

/// One medication entered by a doctor
#[derive(Debug, Clone, PartialEq)]
pub struct Medication {
    pub drug_name: String,
    pub frequency: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FromStr for Medication {
    type Err = String;

    /// `name:frequency:YYYY-MM-DD:YYYY-MM-DD`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.rsplitn(4, ':').collect();
        let [end, start, frequency, drug_name] = parts.as_slice() else {
            return Err(format!(
                "invalid medication `{}` (expected name:frequency:start:end)",
                s
            ));
        };

        let drug_name = drug_name.trim();
        if drug_name.is_empty() {
            return Err("medication name cannot be empty".to_string());
        }
        let frequency: u32 = frequency
            .trim()
            .parse()
            .map_err(|_| format!("invalid frequency `{}`", frequency))?;
        let parse_date = |text: &str| {
            NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .map_err(|_| format!("invalid date `{}` (expected YYYY-MM-DD)", text))
        };
        let start = parse_date(*start)?;
        let end = parse_date(*end)?;
        if end < start {
            return Err(format!("{} ends before it starts", drug_name));
        }

        Ok(Self {
            drug_name: drug_name.to_string(),
            frequency,
            start,
            end,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrescriptionSummary {
    pub sent: usize,
    pub failed: usize,
}

impl PrescriptionSummary {
    pub fn message(&self) -> String {
        let plural = |n: usize| if n == 1 { "" } else { "s" };
        match (self.sent, self.failed) {
            (0, _) => "Failed to send prescriptions. Please try again.".to_string(),
            (sent, 0) => format!("Successfully sent {} prescription{}", sent, plural(sent)),
            (sent, failed) => format!("Sent {} prescription{}, {} failed", sent, plural(sent), failed),
        }
    }

    pub fn all_sent(&self) -> bool {
        self.sent > 0 && self.failed == 0
    }
}

pub struct PrescriptionManager {
    rpc: Arc<RpcClient>,
    network: NetworkConfig,
}

impl PrescriptionManager {
    pub fn new(rpc: Arc<RpcClient>, network: NetworkConfig) -> Self {
        Self { rpc, network }
    }

    pub async fn list(&self) -> Result<Vec<Prescription>> {
        let request = MessageRequest::new(self.network.pharmacist()?).action(actions::GET_PRESCRIPTIONS);
        let reply = self
            .rpc
            .dispatch(request)
            .await
            .map_err(|e| {
                debug!(error = %e, "prescriptions lookup failed");
                anyhow!("Failed to fetch prescriptions")
            })?;
        parse_prescriptions(&reply)
    }

    /// Send each medication as its own prescription
    pub async fn add(
        &self,
        consultation_id: &str,
        details: &ConsultationDetails,
        prescriber: Role,
        medications: &[Medication],
    ) -> Result<PrescriptionSummary> {
        let pharmacist = self.network.pharmacist()?;
        if medications.is_empty() {
            bail!("No medications to prescribe");
        }

        let (language, _) = details.languages_for(prescriber);
        let patient_id = details.patient_id.clone().unwrap_or_default();
        let mut summary = PrescriptionSummary::default();

        for medication in medications {
            let request = MessageRequest::new(pharmacist)
                .action(actions::ADD_PRESCRIPTION)
                .tag(tags::PATIENT_ID, patient_id.clone())
                .tag(tags::CONSULTATION_ID, consultation_id)
                .tag(tags::DRUG_NAME, medication.drug_name.clone())
                .tag(tags::FREQUENCY, medication.frequency.to_string())
                .tag(tags::PATIENT_LANGUAGE, language.clone())
                .tag(tags::START, date_to_ms(medication.start).to_string())
                .tag(tags::END, date_to_ms(medication.end).to_string());

            match self.rpc.dispatch(request).await {
                Ok(reply) if is_present(&reply) => summary.sent += 1,
                outcome => {
                    warn!(drug = %medication.drug_name, ?outcome, "failed to add prescription");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}
