// TestDependencies - mock implementations for testing
//
// Provides an in-memory CRM and primary store that can be injected into
// ServerDeps for tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use highlevel_client::{ApiRequest, ApiResponse, CustomFieldValue, Endpoint, Pipeline, PipelineStage};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use super::{BaseAuditLog, BaseCrmTransport, BaseSyncStore, ServerDeps};
use crate::config::CrmConfig;
use crate::domains::crm::models::appointment::STATUS_COMPLETED;
use crate::domains::crm::models::{
    ActorKind, Appointment, BackfillFilter, CrmSyncLog, NewCrmSyncLog, PatientProfile,
    PractitionerProfile,
};
use crate::domains::crm::stages::{PatientStage, PractitionerStage};

pub const PRACTITIONER_PIPELINE_ID: &str = "pipe-practitioner";
pub const PATIENT_PIPELINE_ID: &str = "pipe-patient";

// =============================================================================
// Mock CRM Transport
// =============================================================================

/// How the mock transport should fail every request until recovered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// The exchange never completes
    Network,
    /// The CRM answers with this status
    Status(u16),
}

#[derive(Debug, Clone)]
pub struct MockContact {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub tags: Vec<String>,
    pub custom_fields: Vec<CustomFieldValue>,
}

impl MockContact {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "email": self.email,
            "firstName": self.first_name,
            "lastName": self.last_name,
            "phone": self.phone,
            "tags": self.tags,
        })
    }
}

#[derive(Default)]
struct MockCrmState {
    contacts: Vec<MockContact>,
    opportunities: HashMap<String, Value>,
    pipelines: Vec<Pipeline>,
    notes: Vec<(String, String)>,
    messages: Vec<(String, String)>,
    workflow_triggers: Vec<(String, String)>,
    requests: Vec<ApiRequest>,
    failure: Option<TransportFailure>,
    next_id: u32,
}

impl MockCrmState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn contact_mut(&mut self, id: &str) -> Option<&mut MockContact> {
        self.contacts.iter_mut().find(|c| c.id == id)
    }
}

/// In-memory CRM keyed by contact email. Records every request it receives.
pub struct MockCrmTransport {
    state: Arc<Mutex<MockCrmState>>,
    latency: Option<Duration>,
}

impl MockCrmTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockCrmState::default())),
            latency: None,
        }
    }

    /// Seed an existing remote contact
    pub fn with_contact(self, id: &str, email: &str) -> Self {
        self.state.lock().unwrap().contacts.push(MockContact {
            id: id.to_string(),
            email: email.to_string(),
            first_name: None,
            last_name: None,
            phone: None,
            tags: Vec::new(),
            custom_fields: Vec::new(),
        });
        self
    }

    /// Seed a pipeline; stage ids are `<pipeline>-stage-<n>`
    pub fn with_pipeline(self, id: &str, name: &str, stage_names: &[&str]) -> Self {
        let stages = stage_names
            .iter()
            .enumerate()
            .map(|(i, stage)| PipelineStage {
                id: format!("{}-stage-{}", id, i + 1),
                name: stage.to_string(),
                position: Some(i as i64),
            })
            .collect();
        self.state.lock().unwrap().pipelines.push(Pipeline {
            id: id.to_string(),
            name: name.to_string(),
            stages,
        });
        self
    }

    /// Seed both actor pipelines with their standard stages
    pub fn with_default_pipelines(self) -> Self {
        let practitioner: Vec<&str> = PractitionerStage::ALL.iter().map(|s| s.name()).collect();
        let patient: Vec<&str> = PatientStage::ALL.iter().map(|s| s.name()).collect();
        self.with_pipeline(PRACTITIONER_PIPELINE_ID, "Practitioners", &practitioner)
            .with_pipeline(PATIENT_PIPELINE_ID, "Patients", &patient)
    }

    /// Seed an existing opportunity
    pub fn with_opportunity(self, id: &str, pipeline_id: &str, stage_id: Option<&str>) -> Self {
        self.state.lock().unwrap().opportunities.insert(
            id.to_string(),
            json!({
                "id": id,
                "pipelineId": pipeline_id,
                "pipelineStageId": stage_id,
                "status": "open",
            }),
        );
        self
    }

    /// Delay every request, to widen race windows in concurrency tests
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_with(&self, failure: TransportFailure) {
        self.state.lock().unwrap().failure = Some(failure);
    }

    pub fn recover(&self) {
        self.state.lock().unwrap().failure = None;
    }

    /// All requests received, in order
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn count_matching(&self, predicate: impl Fn(&Endpoint) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| predicate(&r.endpoint))
            .count()
    }

    pub fn contacts(&self) -> Vec<MockContact> {
        self.state.lock().unwrap().contacts.clone()
    }

    pub fn contact(&self, id: &str) -> Option<MockContact> {
        self.contacts().into_iter().find(|c| c.id == id)
    }

    pub fn contact_by_email(&self, email: &str) -> Option<MockContact> {
        self.contacts()
            .into_iter()
            .find(|c| c.email.eq_ignore_ascii_case(email))
    }

    pub fn opportunity(&self, id: &str) -> Option<Value> {
        self.state.lock().unwrap().opportunities.get(id).cloned()
    }

    pub fn opportunities(&self) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .opportunities
            .values()
            .cloned()
            .collect()
    }

    pub fn notes_for(&self, contact_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .notes
            .iter()
            .filter(|(id, _)| id == contact_id)
            .map(|(_, body)| body.clone())
            .collect()
    }

    /// (contact id, message) pairs
    pub fn messages(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().messages.clone()
    }

    /// (contact id, workflow id) pairs
    pub fn workflow_triggers(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().workflow_triggers.clone()
    }

    pub fn stage_id(&self, pipeline_id: &str, stage_name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .pipelines
            .iter()
            .find(|p| p.id == pipeline_id)?
            .stages
            .iter()
            .find(|s| s.name == stage_name)
            .map(|s| s.id.clone())
    }

    fn handle(state: &mut MockCrmState, request: &ApiRequest) -> ApiResponse {
        let body = request.body.clone().unwrap_or(Value::Null);
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
        let tags: Vec<String> = body
            .get("tags")
            .and_then(|t| serde_json::from_value(t.clone()).ok())
            .unwrap_or_default();

        match &request.endpoint {
            Endpoint::CreateContact => {
                let contact = MockContact {
                    id: state.next_id("contact"),
                    email: text("email").unwrap_or_default(),
                    first_name: text("firstName"),
                    last_name: text("lastName"),
                    phone: text("phone"),
                    tags,
                    custom_fields: Vec::new(),
                };
                let json = contact.to_json();
                state.contacts.push(contact);
                respond(201, json!({ "contact": json }))
            }
            Endpoint::UpdateContact { contact_id } => {
                let custom_fields: Vec<CustomFieldValue> = body
                    .get("customFields")
                    .and_then(|c| serde_json::from_value(c.clone()).ok())
                    .unwrap_or_default();
                let Some(contact) = state.contact_mut(contact_id) else {
                    return not_found("Contact not found");
                };
                if let Some(v) = text("firstName") {
                    contact.first_name = Some(v);
                }
                if let Some(v) = text("lastName") {
                    contact.last_name = Some(v);
                }
                if let Some(v) = text("email") {
                    contact.email = v;
                }
                if let Some(v) = text("phone") {
                    contact.phone = Some(v);
                }
                for field in custom_fields {
                    contact.custom_fields.retain(|f| f.key != field.key);
                    contact.custom_fields.push(field);
                }
                respond(200, json!({ "succeeded": true, "contact": contact.to_json() }))
            }
            Endpoint::SearchDuplicateContact { email } => {
                let found = state
                    .contacts
                    .iter()
                    .find(|c| c.email.eq_ignore_ascii_case(email))
                    .map(MockContact::to_json);
                respond(200, json!({ "contact": found }))
            }
            Endpoint::AddTags { contact_id } => {
                let Some(contact) = state.contact_mut(contact_id) else {
                    return not_found("Contact not found");
                };
                for tag in tags {
                    if !contact.tags.contains(&tag) {
                        contact.tags.push(tag);
                    }
                }
                respond(201, json!({ "tags": contact.tags }))
            }
            Endpoint::RemoveTags { contact_id } => {
                let Some(contact) = state.contact_mut(contact_id) else {
                    return not_found("Contact not found");
                };
                contact.tags.retain(|t| !tags.contains(t));
                respond(200, json!({ "tags": contact.tags }))
            }
            Endpoint::CreateOpportunity => {
                let id = state.next_id("opp");
                let mut stored = body.as_object().cloned().unwrap_or_default();
                stored.insert("id".to_string(), Value::String(id.clone()));
                let stored = Value::Object(stored);
                state.opportunities.insert(id, stored.clone());
                respond(201, json!({ "opportunity": stored }))
            }
            Endpoint::UpdateOpportunity { opportunity_id } => {
                let Some(existing) = state.opportunities.get_mut(opportunity_id) else {
                    return not_found("Opportunity not found");
                };
                if let (Some(target), Some(patch)) = (existing.as_object_mut(), body.as_object()) {
                    merge(target, patch);
                }
                respond(200, json!({ "opportunity": existing.clone() }))
            }
            Endpoint::ListPipelines => respond(200, json!({ "pipelines": state.pipelines })),
            Endpoint::AddNote { contact_id } => {
                if state.contact_mut(contact_id).is_none() {
                    return not_found("Contact not found");
                }
                let note = text("body").unwrap_or_default();
                state.notes.push((contact_id.clone(), note.clone()));
                let id = state.next_id("note");
                respond(201, json!({ "note": { "id": id, "body": note } }))
            }
            Endpoint::SendMessage => {
                let contact_id = text("contactId").unwrap_or_default();
                let message = text("message").unwrap_or_default();
                state.messages.push((contact_id, message));
                let id = state.next_id("msg");
                respond(200, json!({ "messageId": id, "conversationId": "conv-1" }))
            }
            Endpoint::AddToWorkflow {
                contact_id,
                workflow_id,
            } => {
                state
                    .workflow_triggers
                    .push((contact_id.clone(), workflow_id.clone()));
                respond(200, json!({ "succeded": true }))
            }
        }
    }
}

fn respond(status: u16, body: Value) -> ApiResponse {
    ApiResponse { status, body }
}

fn not_found(message: &str) -> ApiResponse {
    respond(404, json!({ "statusCode": 404, "message": message }))
}

fn merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}

impl Default for MockCrmTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseCrmTransport for MockCrmTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        match state.failure {
            Some(TransportFailure::Network) => {
                return Err(anyhow::anyhow!("connection reset by peer"));
            }
            Some(TransportFailure::Status(status)) => {
                return Ok(respond(status, json!({ "message": "simulated failure" })));
            }
            None => {}
        }

        Ok(Self::handle(&mut state, request))
    }
}

// =============================================================================
// Mock Sync Store (primary store slice + audit log)
// =============================================================================

#[derive(Default)]
struct MockStoreState {
    practitioners: Vec<PractitionerProfile>,
    patients: Vec<PatientProfile>,
    appointments: Vec<Appointment>,
    care: HashMap<Uuid, Uuid>,
    logs: Vec<CrmSyncLog>,
    unavailable: bool,
}

pub struct MockSyncStore {
    state: Arc<Mutex<MockStoreState>>,
}

impl MockSyncStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockStoreState::default())),
        }
    }

    pub fn with_practitioner(self, practitioner: PractitionerProfile) -> Self {
        self.state.lock().unwrap().practitioners.push(practitioner);
        self
    }

    pub fn with_patient(self, patient: PatientProfile) -> Self {
        self.state.lock().unwrap().patients.push(patient);
        self
    }

    pub fn with_appointment(self, appointment: Appointment) -> Self {
        self.state.lock().unwrap().appointments.push(appointment);
        self
    }

    /// Assign a practitioner to a patient
    pub fn with_care_relationship(self, patient_id: Uuid, practitioner_id: Uuid) -> Self {
        self.state
            .lock()
            .unwrap()
            .care
            .insert(patient_id, practitioner_id);
        self
    }

    /// Seed an audit entry directly (e.g. a historical failure to retry)
    pub fn with_log(self, log: CrmSyncLog) -> Self {
        self.state.lock().unwrap().logs.push(log);
        self
    }

    pub fn practitioner(&self, user_id: Uuid) -> Option<PractitionerProfile> {
        self.state
            .lock()
            .unwrap()
            .practitioners
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned()
    }

    pub fn patient(&self, user_id: Uuid) -> Option<PatientProfile> {
        self.state
            .lock()
            .unwrap()
            .patients
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned()
    }

    /// Make every primary-store read and write fail until `recover_store`.
    /// The audit log keeps working.
    pub fn fail_store(&self) {
        self.state.lock().unwrap().unavailable = true;
    }

    pub fn recover_store(&self) {
        self.state.lock().unwrap().unavailable = false;
    }

    fn available(&self) -> Result<()> {
        if self.state.lock().unwrap().unavailable {
            anyhow::bail!("connection refused");
        }
        Ok(())
    }

    /// All audit entries in insertion order
    pub fn audit_entries(&self) -> Vec<CrmSyncLog> {
        self.state.lock().unwrap().logs.clone()
    }

    fn name_of(state: &MockStoreState, user_id: Uuid) -> Option<String> {
        state
            .practitioners
            .iter()
            .find(|p| p.user_id == user_id)
            .map(PractitionerProfile::full_name)
            .or_else(|| {
                state
                    .patients
                    .iter()
                    .find(|p| p.user_id == user_id)
                    .map(PatientProfile::full_name)
            })
    }
}

impl Default for MockSyncStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseSyncStore for MockSyncStore {
    async fn find_practitioner(&self, user_id: Uuid) -> Result<Option<PractitionerProfile>> {
        self.available()?;
        Ok(self.practitioner(user_id))
    }

    async fn find_patient(&self, user_id: Uuid) -> Result<Option<PatientProfile>> {
        self.available()?;
        Ok(self.patient(user_id))
    }

    async fn find_appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>> {
        self.available()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .appointments
            .iter()
            .find(|a| a.id == appointment_id)
            .cloned())
    }

    async fn find_user_name(&self, user_id: Uuid) -> Result<Option<String>> {
        self.available()?;
        Ok(Self::name_of(&self.state.lock().unwrap(), user_id))
    }

    async fn assigned_practitioner_name(&self, patient_id: Uuid) -> Result<Option<String>> {
        self.available()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .care
            .get(&patient_id)
            .and_then(|practitioner_id| Self::name_of(&state, *practitioner_id)))
    }

    async fn completed_revenue_minor(&self, patient_id: Uuid) -> Result<i64> {
        self.available()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .appointments
            .iter()
            .filter(|a| a.patient_id == patient_id && a.status == STATUS_COMPLETED)
            .filter_map(|a| a.amount_minor)
            .sum())
    }

    async fn find_contact_id(&self, kind: ActorKind, user_id: Uuid) -> Result<Option<String>> {
        self.available()?;
        Ok(match kind {
            ActorKind::Practitioner => self.practitioner(user_id).and_then(|p| p.crm_contact_id),
            ActorKind::Patient => self.patient(user_id).and_then(|p| p.crm_contact_id),
        })
    }

    async fn save_contact_id(
        &self,
        kind: ActorKind,
        user_id: Uuid,
        contact_id: &str,
    ) -> Result<()> {
        self.available()?;
        let mut state = self.state.lock().unwrap();
        match kind {
            ActorKind::Practitioner => {
                if let Some(p) = state.practitioners.iter_mut().find(|p| p.user_id == user_id) {
                    p.crm_contact_id = Some(contact_id.to_string());
                }
            }
            ActorKind::Patient => {
                if let Some(p) = state.patients.iter_mut().find(|p| p.user_id == user_id) {
                    p.crm_contact_id = Some(contact_id.to_string());
                }
            }
        }
        Ok(())
    }

    async fn save_opportunity_id(
        &self,
        kind: ActorKind,
        user_id: Uuid,
        opportunity_id: &str,
    ) -> Result<()> {
        self.available()?;
        let mut state = self.state.lock().unwrap();
        match kind {
            ActorKind::Practitioner => {
                if let Some(p) = state.practitioners.iter_mut().find(|p| p.user_id == user_id) {
                    p.crm_opportunity_id = Some(opportunity_id.to_string());
                }
            }
            ActorKind::Patient => {
                if let Some(p) = state.patients.iter_mut().find(|p| p.user_id == user_id) {
                    p.crm_opportunity_id = Some(opportunity_id.to_string());
                }
            }
        }
        Ok(())
    }

    async fn find_actor_ids(&self, kind: ActorKind, filter: BackfillFilter) -> Result<Vec<Uuid>> {
        self.available()?;
        let state = self.state.lock().unwrap();
        let include = |contact_id: &Option<String>| match filter {
            BackfillFilter::Unsynced => contact_id.is_none(),
            BackfillFilter::All => true,
        };
        Ok(match kind {
            ActorKind::Practitioner => state
                .practitioners
                .iter()
                .filter(|p| include(&p.crm_contact_id))
                .map(|p| p.user_id)
                .collect(),
            ActorKind::Patient => state
                .patients
                .iter()
                .filter(|p| include(&p.crm_contact_id))
                .map(|p| p.user_id)
                .collect(),
        })
    }
}

#[async_trait]
impl BaseAuditLog for MockSyncStore {
    async fn record(&self, entry: NewCrmSyncLog) -> Result<CrmSyncLog> {
        let log = entry.into_log();
        self.state.lock().unwrap().logs.push(log.clone());
        Ok(log)
    }

    async fn find(&self, id: Uuid) -> Result<Option<CrmSyncLog>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .logs
            .iter()
            .find(|l| l.id == id)
            .cloned())
    }

    async fn recent(&self, failed_only: bool, limit: i64) -> Result<Vec<CrmSyncLog>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .logs
            .iter()
            .rev()
            .filter(|l| !failed_only || !l.success)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn practitioner_fixture(first_name: &str, last_name: &str, discipline: &str) -> PractitionerProfile {
    PractitionerProfile {
        user_id: Uuid::new_v4(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: format!("{}.{}@example.com", first_name, last_name).to_lowercase(),
        phone: Some("+447700900001".to_string()),
        discipline: Some(discipline.to_string()),
        qualifications: Some("BSc (Hons)".to_string()),
        years_experience: Some(6),
        registration_body: Some("British Acupuncture Council".to_string()),
        crm_contact_id: None,
        crm_opportunity_id: None,
    }
}

pub fn patient_fixture(first_name: &str, last_name: &str, goals: &[&str]) -> PatientProfile {
    PatientProfile {
        user_id: Uuid::new_v4(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email: format!("{}.{}@example.com", first_name, last_name).to_lowercase(),
        phone: Some("+447700900002".to_string()),
        goals: goals.iter().map(|g| g.to_string()).collect(),
        motivation_level: Some("high".to_string()),
        diet_type: Some("vegetarian".to_string()),
        crm_contact_id: None,
        crm_opportunity_id: None,
    }
}

pub fn appointment_fixture(
    patient_id: Uuid,
    practitioner_id: Uuid,
    status: &str,
    amount_minor: i64,
    starts_at: DateTime<Utc>,
) -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        patient_id,
        practitioner_id,
        status: status.to_string(),
        amount_minor: Some(amount_minor),
        session_type: Some("Initial consultation".to_string()),
        starts_at,
        video_join_url: Some("https://video.example.com/room/abc".to_string()),
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

/// Builder for ServerDeps backed entirely by in-memory mocks
pub struct TestDependencies {
    pub transport: Arc<MockCrmTransport>,
    pub store: Arc<MockSyncStore>,
    pub crm_config: CrmConfig,
    credentials: bool,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            transport: Arc::new(MockCrmTransport::new().with_default_pipelines()),
            store: Arc::new(MockSyncStore::new()),
            crm_config: CrmConfig {
                api_key: Some("test-key".to_string()),
                location_id: Some("test-location".to_string()),
                practitioner_pipeline_id: Some(PRACTITIONER_PIPELINE_ID.to_string()),
                patient_pipeline_id: Some(PATIENT_PIPELINE_ID.to_string()),
                reengagement_workflow_id: None,
                base_url: None,
                timeout_secs: 15,
            },
            credentials: true,
        }
    }

    pub fn mock_transport(mut self, transport: MockCrmTransport) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    pub fn mock_store(mut self, store: MockSyncStore) -> Self {
        self.store = Arc::new(store);
        self
    }

    /// Simulate missing API key / location id
    pub fn without_credentials(mut self) -> Self {
        self.credentials = false;
        self.crm_config.api_key = None;
        self
    }

    pub fn without_pipelines(mut self) -> Self {
        self.crm_config.practitioner_pipeline_id = None;
        self.crm_config.patient_pipeline_id = None;
        self
    }

    pub fn with_reengagement_workflow(mut self, workflow_id: &str) -> Self {
        self.crm_config.reengagement_workflow_id = Some(workflow_id.to_string());
        self
    }

    pub fn deps(&self) -> ServerDeps {
        let transport = self
            .credentials
            .then(|| self.transport.clone() as Arc<dyn BaseCrmTransport>);
        ServerDeps::new(
            self.store.clone(),
            self.store.clone(),
            transport,
            self.crm_config.clone(),
        )
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
