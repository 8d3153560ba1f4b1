/// Consultify network constants
///
/// Action names, tag names and defaults shared by every flow that talks to
/// the process network.

use std::time::Duration;

/// Default time a dispatch waits for its result before giving up
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Fixed delay between two result polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

/// Default chat refresh period (`CONSULTIFY_MESSAGE_POLLING_RATE`)
pub const DEFAULT_MESSAGE_POLLING_RATE_MS: u64 = 1_000;

/// Production messenger and compute units
pub const DEFAULT_MU_URL: &str = "https://mu.ao-testnet.xyz";
pub const DEFAULT_CU_URL: &str = "https://cu.ao-testnet.xyz";

/// Local units used when `CONSULTIFY_ENVIRONMENT=DEVELOPMENT`
pub const DEV_MU_URL: &str = "http://localhost:4002";
pub const DEV_CU_URL: &str = "http://localhost:4004";

/// Attestation verification node
pub const DEFAULT_HYPERBEAM_URL: &str = "http://72.46.85.207:8734";

pub const APP_NAME: &str = "Consultify";

/// Local store keys
pub const USER_METADATA_KEY: &str = "userMetadata";
pub const CONSULTATIONS_DATA_KEY: &str = "consultationsData";

/// Tags attached to every message so the units route it as an ao message
pub const PROTOCOL_TAGS: &[(&str, &str)] = &[
    ("Data-Protocol", "ao"),
    ("Variant", "ao.TN.1"),
    ("Type", "Message"),
    ("SDK", "consultify"),
];

/// Tag names
pub mod tags {
    pub const ACTION: &str = "Action";
    pub const RECIPIENT: &str = "Recipient";
    pub const QUANTITY: &str = "Quantity";
    pub const LANGUAGE_PREFERENCE: &str = "LanguagePreference";
    pub const SPECIALTY_TYPE: &str = "SpecialtyType";
    pub const MESSAGE_ID: &str = "MessageID";
    pub const CONSULTATION_ID: &str = "ConsultationID";
    pub const SENDER_ID: &str = "SenderID";
    pub const SOURCE_LANGUAGE: &str = "SourceLanguage";
    pub const TARGET_LANGUAGE: &str = "TargetLanguage";
    pub const PATIENT_ID: &str = "PatientID";
    pub const DRUG_NAME: &str = "DrugName";
    pub const FREQUENCY: &str = "Frequency";
    pub const PATIENT_LANGUAGE: &str = "PatientLanguage";
    pub const START: &str = "Start";
    pub const END: &str = "End";
}

/// Action values understood by the orchestrator, pharmacist, token ledger
/// and consultation processes
pub mod actions {
    pub const GET_DOCTOR_DETAILS: &str = "GetDoctorDetails";
    pub const GET_PATIENT_DETAILS: &str = "GetPatientDetails";
    pub const REGISTER_DOCTOR: &str = "RegisterDoctor";
    pub const REGISTER_PATIENT: &str = "RegisterPatient";
    pub const GET_DOCTOR_CONSULTATIONS: &str = "GetDoctorConsultations";
    pub const GET_PATIENT_CONSULTATIONS: &str = "GetPatientConsultations";
    pub const CREATE_CONSULTATION: &str = "Create";
    pub const GET_CONSULTATION_DETAILS: &str = "GetConsultationDetails";
    pub const GET_MESSAGES: &str = "GetMessages";
    pub const MESSAGE_RESPONSE: &str = "Message-Response";
    pub const ADD_PRESCRIPTION: &str = "AddPrescription";
    pub const GET_PRESCRIPTIONS: &str = "GetPrescriptions";
    pub const GET_USER_NOTIFICATIONS: &str = "GetUserNotifications";
    pub const REQUEST_TOKENS: &str = "RequestTokens";
    pub const GET_USDA_BALANCE: &str = "GetUSDABalance";
    pub const BALANCE: &str = "Balance";
    pub const TRANSFER: &str = "Transfer";
    pub const WITHDRAW_USDA: &str = "WithdrawUSDA";
    pub const STAKE_USDA: &str = "StakeUSDA";
    pub const UNSTAKE_USDA: &str = "UnstakeUSDA";
}

/// Tokens granted by one successful faucet request
pub const FAUCET_GRANT: u32 = 50;

pub const DEFAULT_DOCTOR_LANGUAGE: &str = "en";
pub const DEFAULT_PATIENT_LANGUAGE: &str = "fr";
pub const DEFAULT_SPECIALIZATION: &str = "General Medicine";
