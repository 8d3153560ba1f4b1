/// Wallet identity: who the connected wallet is, onboarding and profile restore

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::config::NetworkConfig;
use super::response::{error_field, is_present, mentions_error, parse_json, reports_not_found, reports_success};
use super::rpc::{MessageRequest, RpcClient, RpcError};
use super::session::{LocalStore, Role, UserMetadata};
use crate::utils::{actions, tags, DEFAULT_DOCTOR_LANGUAGE, DEFAULT_SPECIALIZATION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserKind {
    Doctor,
    Patient,
    /// Not registered as either; needs onboarding
    New,
}

impl From<Role> for UserKind {
    fn from(role: Role) -> Self {
        match role {
            Role::Doctor => UserKind::Doctor,
            Role::Patient => UserKind::Patient,
        }
    }
}

/// Result of one details lookup
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found(Value),
    NotFound,
    /// No reply, unparseable reply, or an error other than "not found"
    Failed,
}

impl LookupOutcome {
    pub fn from_reply(reply: Result<String, RpcError>) -> Self {
        let reply = match reply {
            Ok(reply) if is_present(&reply) => reply,
            Ok(_) => return LookupOutcome::Failed,
            Err(e) => {
                debug!(error = %e, "details lookup failed");
                return LookupOutcome::Failed;
            }
        };

        let Some(value) = parse_json(&reply) else {
            warn!(reply = %reply, "details lookup returned non-JSON reply");
            return LookupOutcome::Failed;
        };

        match error_field(&value) {
            Some(error) if reports_not_found(&error) => LookupOutcome::NotFound,
            Some(_) => LookupOutcome::Failed,
            None => LookupOutcome::Found(value),
        }
    }
}

/// Doctor wins over patient; anything inconclusive counts as a new user
pub fn classify_lookups(doctor: &LookupOutcome, patient: &LookupOutcome) -> UserKind {
    match (doctor, patient) {
        (LookupOutcome::Found(_), _) => UserKind::Doctor,
        (_, LookupOutcome::Found(_)) => UserKind::Patient,
        _ => UserKind::New,
    }
}

/// Onboarding answers
#[derive(Debug, Clone)]
pub struct Registration {
    pub role: Role,
    pub name: String,
    pub language: String,
    pub specialization: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProfileState {
    Ready {
        user: UserMetadata,
        /// Details record held by the orchestrator, when it could be read
        details: Option<Value>,
    },
    /// Restored from the network but no display name is known yet
    NeedsName(UserMetadata),
}

pub struct IdentityManager {
    rpc: Arc<RpcClient>,
    network: NetworkConfig,
    store: LocalStore,
}

impl IdentityManager {
    pub fn new(rpc: Arc<RpcClient>, network: NetworkConfig, store: LocalStore) -> Self {
        Self { rpc, network, store }
    }

    fn details_request(&self, role: Role) -> Result<MessageRequest> {
        let action = match role {
            Role::Doctor => actions::GET_DOCTOR_DETAILS,
            Role::Patient => actions::GET_PATIENT_DETAILS,
        };
        Ok(MessageRequest::new(self.network.orchestrator()?).action(action))
    }

    /// Classify the connected wallet, preferring the local session
    pub async fn check_user(&self) -> Result<UserKind> {
        if let Some(role) = self.store.current_user()?.and_then(|user| user.role) {
            debug!(%role, "using stored session");
            return Ok(role.into());
        }

        let doctor_request = self.details_request(Role::Doctor)?;
        let patient_request = self.details_request(Role::Patient)?;
        let (doctor, patient) = futures::future::join(
            self.rpc.dispatch(doctor_request),
            self.rpc.dispatch(patient_request),
        )
        .await;

        let doctor = LookupOutcome::from_reply(doctor);
        let patient = LookupOutcome::from_reply(patient);
        let kind = classify_lookups(&doctor, &patient);
        debug!(?kind, "classified wallet from details lookups");

        Ok(kind)
    }

    /// Store the session and register it with the orchestrator
    pub async fn register(&self, registration: Registration) -> Result<UserMetadata> {
        let orchestrator = self.network.orchestrator()?.to_string();

        let specialization = registration
            .specialization
            .filter(|s| !s.trim().is_empty());
        let metadata = UserMetadata {
            id: Uuid::new_v4().to_string(),
            name: registration.name,
            role: Some(registration.role),
            language: registration.language,
            specialization: specialization.clone(),
            onboarding_completed: true,
        };
        self.store
            .save_user_metadata(&metadata)
            .context("Failed to store user session")?;

        let action = match registration.role {
            Role::Doctor => actions::REGISTER_DOCTOR,
            Role::Patient => actions::REGISTER_PATIENT,
        };
        let mut request = MessageRequest::new(orchestrator)
            .action(action)
            .tag(tags::LANGUAGE_PREFERENCE, metadata.language.clone());
        if registration.role == Role::Doctor {
            if let Some(specialty) = &specialization {
                request = request.tag(tags::SPECIALTY_TYPE, specialty.clone());
            }
        }

        let outcome = match self.rpc.dispatch(request).await {
            Err(e) => {
                debug!(error = %e, "registration dispatch failed");
                Err(anyhow!("Failed to communicate with the network"))
            }
            Ok(reply) if reports_success(&reply) => Ok(()),
            Ok(reply) if reply.trim().is_empty() => Err(anyhow!("Registration failed")),
            Ok(reply) => Err(anyhow!(reply)),
        };

        if let Err(e) = outcome {
            self.store.sign_out().context("Failed to roll back user session")?;
            return Err(e);
        }

        Ok(metadata)
    }

    /// Load the session for a dashboard, restoring it from the network if needed
    pub async fn load_profile(&self, role: Role) -> Result<ProfileState> {
        let mut metadata = self.store.user_metadata()?;
        let mut details = None;

        if !metadata.onboarding_completed {
            let reply = self.rpc.dispatch(self.details_request(role)?).await;
            if let Some(data) = restorable(reply) {
                metadata = restore_metadata(role, &data, &metadata.name);
                details = Some(data);
                if metadata.name.is_empty() {
                    return Ok(ProfileState::NeedsName(metadata));
                }
                self.store.save_user_metadata(&metadata)?;
            }
        }

        if !metadata.onboarding_completed {
            bail!("User not found or onboarding not completed");
        }
        if metadata.name.is_empty() {
            return Ok(ProfileState::NeedsName(metadata));
        }
        if metadata.role != Some(role) {
            bail!("Access denied: this dashboard is for {}s only", role);
        }

        if details.is_none() {
            details = restorable(self.rpc.dispatch(self.details_request(role)?).await);
        }

        Ok(ProfileState::Ready { user: metadata, details })
    }

    /// Give a restored profile its display name and persist it
    pub fn complete_profile(&self, mut metadata: UserMetadata, name: &str) -> Result<UserMetadata> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Name cannot be empty");
        }
        metadata.name = name.to_string();
        self.store.save_user_metadata(&metadata)?;
        Ok(metadata)
    }

    pub fn sign_out(&self) -> Result<bool> {
        Ok(self.store.sign_out()?)
    }
}

/// Details record worth restoring from: a JSON reply without any error
fn restorable(reply: Result<String, RpcError>) -> Option<Value> {
    let reply = reply.ok()?;
    if !is_present(&reply) || mentions_error(&reply) {
        return None;
    }
    parse_json(&reply).filter(|data| data.is_object() && error_field(data).is_none())
}

fn restore_metadata(role: Role, data: &Value, known_name: &str) -> UserMetadata {
    let text = |key: &str| {
        data.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let id_key = match role {
        Role::Doctor => "doctor_id",
        Role::Patient => "patient_id",
    };

    UserMetadata {
        id: text(id_key).unwrap_or_default(),
        name: known_name.to_string(),
        role: Some(role),
        language: text("language_preference").unwrap_or_else(|| DEFAULT_DOCTOR_LANGUAGE.to_string()),
        specialization: match role {
            Role::Doctor => Some(text("specialty_type").unwrap_or_else(|| DEFAULT_SPECIALIZATION.to_string())),
            Role::Patient => None,
        },
        onboarding_completed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signer::WalletSigner;
    use crate::core::transport::{MockTransport, ProcessResult, ResultMessage};
    use serde_json::json;
    use tempfile::TempDir;

    const ORCHESTRATOR: &str = "JArYBF-D8q2OmZ4Mok00sD2Y_6SYEQ7Hjx-6VZ_jl3g";

    fn network() -> NetworkConfig {
        NetworkConfig {
            orchestrator_process: Some(ORCHESTRATOR.to_string()),
            ..NetworkConfig::default()
        }
    }

    /// Transport answering each action with a fixed reply
    fn transport(replies: Vec<(&'static str, &'static str)>) -> MockTransport {
        let mut transport = MockTransport::new();
        transport.expect_submit().returning(|_, item| {
            Ok(item.tag("Action").unwrap_or_default().to_string())
        });
        transport.expect_result().returning(move |_, action| {
            let data = replies
                .iter()
                .find(|(name, _)| action.to_string() == *name)
                .map(|(_, reply)| json!(reply));
            Ok(ProcessResult {
                messages: vec![ResultMessage { data, tags: vec![] }],
                error: None,
            })
        });
        transport
    }

    fn manager(transport: MockTransport) -> (TempDir, IdentityManager) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path().join("storage.json"));
        let rpc = RpcClient::new(Arc::new(transport), Arc::new(WalletSigner::from_seed(&[5u8; 32])));
        (dir, IdentityManager::new(Arc::new(rpc), network(), store))
    }

    #[test]
    fn test_lookup_outcomes() {
        assert_eq!(
            LookupOutcome::from_reply(Ok(r#"{"error":"Doctor not found"}"#.to_string())),
            LookupOutcome::NotFound
        );
        assert_eq!(
            LookupOutcome::from_reply(Ok(r#"{"error":"Unauthorized"}"#.to_string())),
            LookupOutcome::Failed
        );
        assert_eq!(LookupOutcome::from_reply(Ok("oops".to_string())), LookupOutcome::Failed);
        assert_eq!(
            LookupOutcome::from_reply(Err(RpcError::Cancelled)),
            LookupOutcome::Failed
        );
        assert!(matches!(
            LookupOutcome::from_reply(Ok(r#"{"doctor_id":"d"}"#.to_string())),
            LookupOutcome::Found(_)
        ));
    }

    #[test]
    fn test_classify_lookups() {
        let found = LookupOutcome::Found(json!({}));
        assert_eq!(classify_lookups(&LookupOutcome::NotFound, &LookupOutcome::NotFound), UserKind::New);
        assert_eq!(classify_lookups(&found, &LookupOutcome::NotFound), UserKind::Doctor);
        assert_eq!(classify_lookups(&LookupOutcome::NotFound, &found), UserKind::Patient);
        assert_eq!(classify_lookups(&found, &found), UserKind::Doctor);
        assert_eq!(classify_lookups(&LookupOutcome::Failed, &LookupOutcome::NotFound), UserKind::New);
        assert_eq!(classify_lookups(&LookupOutcome::NotFound, &LookupOutcome::Failed), UserKind::New);
        assert_eq!(classify_lookups(&LookupOutcome::Failed, &LookupOutcome::Failed), UserKind::New);
        assert_eq!(classify_lookups(&LookupOutcome::Failed, &found), UserKind::Patient);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_user_both_not_found_is_new() {
        let (_dir, identity) = manager(transport(vec![
            ("GetDoctorDetails", r#"{"error":"Doctor not found"}"#),
            ("GetPatientDetails", r#"{"error":"Patient not found"}"#),
        ]));
        assert_eq!(identity.check_user().await.unwrap(), UserKind::New);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_user_patient_found() {
        let (_dir, identity) = manager(transport(vec![
            ("GetDoctorDetails", r#"{"error":"Doctor not found"}"#),
            ("GetPatientDetails", r#"{"patient_id":"p-1","language_preference":"fr"}"#),
        ]));
        assert_eq!(identity.check_user().await.unwrap(), UserKind::Patient);
    }

    #[tokio::test]
    async fn test_check_user_prefers_stored_session() {
        let mut transport = MockTransport::new();
        transport.expect_submit().never();
        let (_dir, identity) = manager(transport);
        identity
            .store
            .save_user_metadata(&UserMetadata {
                id: "p".to_string(),
                name: "Pat".to_string(),
                role: Some(Role::Patient),
                language: "fr".to_string(),
                specialization: None,
                onboarding_completed: true,
            })
            .unwrap();

        assert_eq!(identity.check_user().await.unwrap(), UserKind::Patient);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_success_keeps_session() {
        let (_dir, identity) = manager(transport(vec![(
            "RegisterDoctor",
            "Doctor registered successfully",
        )]));
        let user = identity
            .register(Registration {
                role: Role::Doctor,
                name: "Dr. Ada".to_string(),
                language: "en".to_string(),
                specialization: Some("Cardiology".to_string()),
            })
            .await
            .unwrap();

        assert!(Uuid::parse_str(&user.id).is_ok());
        assert_eq!(identity.store.current_user().unwrap(), Some(user));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_rejection_rolls_back_session() {
        let (_dir, identity) = manager(transport(vec![(
            "RegisterPatient",
            "Patient already registered",
        )]));
        let err = identity
            .register(Registration {
                role: Role::Patient,
                name: "Pat".to_string(),
                language: "fr".to_string(),
                specialization: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Patient already registered");
        assert_eq!(identity.store.current_user().unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_profile_restores_without_name() {
        let (_dir, identity) = manager(transport(vec![(
            "GetDoctorDetails",
            r#"{"doctor_id":"d-9"}"#,
        )]));

        let state = identity.load_profile(Role::Doctor).await.unwrap();
        let ProfileState::NeedsName(metadata) = state else {
            panic!("expected NeedsName, got {:?}", state);
        };
        assert_eq!(metadata.id, "d-9");
        assert_eq!(metadata.language, "en");
        assert_eq!(metadata.specialization.as_deref(), Some("General Medicine"));

        let user = identity.complete_profile(metadata, "Dr. Who").unwrap();
        assert_eq!(identity.store.current_user().unwrap(), Some(user));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_profile_role_mismatch() {
        let (_dir, identity) = manager(transport(vec![]));
        identity
            .store
            .save_user_metadata(&UserMetadata {
                id: "p".to_string(),
                name: "Pat".to_string(),
                role: Some(Role::Patient),
                language: "fr".to_string(),
                specialization: None,
                onboarding_completed: true,
            })
            .unwrap();

        let err = identity.load_profile(Role::Doctor).await.unwrap_err();
        assert!(err.to_string().starts_with("Access denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_profile_unknown_user() {
        let (_dir, identity) = manager(transport(vec![(
            "GetPatientDetails",
            r#"{"error":"Patient not found"}"#,
        )]));
        let err = identity.load_profile(Role::Patient).await.unwrap_err();
        assert_eq!(err.to_string(), "User not found or onboarding not completed");
    }
}
