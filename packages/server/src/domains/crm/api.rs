//! Audited CRM client.
//!
//! Every operation writes exactly one `crm_sync_logs` row and never returns an
//! error: failures come back as `None`, `false` or an empty list. When
//! credentials are missing the call is recorded as failed without touching
//! the network.

use std::sync::Arc;

use highlevel_client::{
    ApiRequest, Contact, ContactEnvelope, ContactInput, DuplicateContactResponse, Endpoint,
    MessageInput, Opportunity, OpportunityEnvelope, OpportunityInput, PipelineStage,
    PipelinesResponse,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::domains::crm::error::RetryError;
use crate::domains::crm::models::{CrmEvent, CrmSyncLog, NewCrmSyncLog};
use crate::kernel::{BaseAuditLog, BaseCrmTransport};

pub const CREDENTIALS_MISSING: &str = "CRM credentials not configured";

/// Result of one audited call
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub success: bool,
    pub body: Value,
    pub error: Option<String>,
    /// Id of the audit row, `None` only if the audit write itself failed
    pub log_id: Option<Uuid>,
}

impl CallOutcome {
    fn decode<T: DeserializeOwned>(&self, event: CrmEvent) -> Option<T> {
        if !self.success {
            return None;
        }
        match serde_json::from_value(self.body.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(event = %event, error = %e, "Unexpected CRM response shape");
                None
            }
        }
    }
}

/// Attribution recorded alongside a call
#[derive(Debug, Clone, Default)]
struct CallTarget {
    user_id: Option<Uuid>,
    contact_id: Option<String>,
    target_id: Option<String>,
}

impl CallTarget {
    fn user(user_id: Option<Uuid>) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    fn contact(contact_id: &str, user_id: Option<Uuid>) -> Self {
        Self {
            user_id,
            contact_id: Some(contact_id.to_string()),
            target_id: None,
        }
    }

    fn with_target(mut self, target_id: &str) -> Self {
        self.target_id = Some(target_id.to_string());
        self
    }
}

#[derive(Clone)]
pub struct CrmApi {
    transport: Option<Arc<dyn BaseCrmTransport>>,
    audit_log: Arc<dyn BaseAuditLog>,
}

impl CrmApi {
    pub fn new(
        transport: Option<Arc<dyn BaseCrmTransport>>,
        audit_log: Arc<dyn BaseAuditLog>,
    ) -> Self {
        Self {
            transport,
            audit_log,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    async fn execute(&self, event: CrmEvent, request: ApiRequest, target: CallTarget) -> CallOutcome {
        let request_payload = audit_payload(&request);

        let (success, body, error) = match &self.transport {
            None => (false, Value::Null, Some(CREDENTIALS_MISSING.to_string())),
            Some(transport) => match transport.send(&request).await {
                Ok(response) => {
                    let success = response.is_success();
                    let error = (!success).then(|| format!("HTTP {}", response.status));
                    (success, response.body, error)
                }
                Err(e) => (false, Value::Null, Some(e.to_string())),
            },
        };

        if success {
            debug!(event = %event, user_id = ?target.user_id, "CRM call succeeded");
        } else {
            warn!(
                event = %event,
                user_id = ?target.user_id,
                error = error.as_deref().unwrap_or_default(),
                "CRM call failed"
            );
        }

        let entry = NewCrmSyncLog {
            event,
            user_id: target.user_id,
            contact_id: target.contact_id,
            target_id: target.target_id,
            request_payload,
            response_payload: (!body.is_null()).then(|| body.clone()),
            success,
            error: error.clone(),
        };

        let log_id = match self.audit_log.record(entry).await {
            Ok(row) => Some(row.id),
            Err(e) => {
                error!(event = %event, error = %e, "Failed to write CRM sync log");
                None
            }
        };

        CallOutcome {
            success,
            body,
            error,
            log_id,
        }
    }

    pub async fn create_contact(&self, input: &ContactInput, user_id: Option<Uuid>) -> Option<Contact> {
        self.execute(
            CrmEvent::CreateContact,
            ApiRequest::create_contact(input),
            CallTarget::user(user_id),
        )
        .await
        .decode::<ContactEnvelope>(CrmEvent::CreateContact)
        .map(|envelope| envelope.contact)
    }

    pub async fn update_contact(
        &self,
        contact_id: &str,
        input: &ContactInput,
        user_id: Option<Uuid>,
    ) -> Option<Contact> {
        self.execute(
            CrmEvent::UpdateContact,
            ApiRequest::update_contact(contact_id, input),
            CallTarget::contact(contact_id, user_id),
        )
        .await
        .decode::<ContactEnvelope>(CrmEvent::UpdateContact)
        .map(|envelope| envelope.contact)
    }

    pub async fn get_contact_by_email(&self, email: &str, user_id: Option<Uuid>) -> Option<Contact> {
        self.execute(
            CrmEvent::LookupByEmail,
            ApiRequest::search_duplicate_contact(email),
            CallTarget::user(user_id),
        )
        .await
        .decode::<DuplicateContactResponse>(CrmEvent::LookupByEmail)
        .and_then(|found| found.contact)
    }

    pub async fn add_tags(&self, contact_id: &str, tags: &[String], user_id: Option<Uuid>) -> bool {
        self.execute(
            CrmEvent::AddTag,
            ApiRequest::add_tags(contact_id, tags),
            CallTarget::contact(contact_id, user_id),
        )
        .await
        .success
    }

    pub async fn remove_tags(&self, contact_id: &str, tags: &[String], user_id: Option<Uuid>) -> bool {
        self.execute(
            CrmEvent::RemoveTag,
            ApiRequest::remove_tags(contact_id, tags),
            CallTarget::contact(contact_id, user_id),
        )
        .await
        .success
    }

    pub async fn create_opportunity(
        &self,
        input: &OpportunityInput,
        user_id: Option<Uuid>,
    ) -> Option<Opportunity> {
        let target = CallTarget {
            user_id,
            contact_id: input.contact_id.clone(),
            target_id: input.pipeline_id.clone(),
        };
        self.execute(
            CrmEvent::CreateOpportunity,
            ApiRequest::create_opportunity(input),
            target,
        )
        .await
        .decode::<OpportunityEnvelope>(CrmEvent::CreateOpportunity)
        .map(|envelope| envelope.opportunity)
    }

    pub async fn update_opportunity(
        &self,
        opportunity_id: &str,
        input: &OpportunityInput,
        user_id: Option<Uuid>,
    ) -> Option<Opportunity> {
        self.execute(
            CrmEvent::UpdateOpportunity,
            ApiRequest::update_opportunity(opportunity_id, input),
            CallTarget::user(user_id).with_target(opportunity_id),
        )
        .await
        .decode::<OpportunityEnvelope>(CrmEvent::UpdateOpportunity)
        .map(|envelope| envelope.opportunity)
    }

    pub async fn move_opportunity_stage(
        &self,
        opportunity_id: &str,
        stage_id: &str,
        user_id: Option<Uuid>,
    ) -> bool {
        let input = OpportunityInput {
            pipeline_stage_id: Some(stage_id.to_string()),
            ..Default::default()
        };
        self.execute(
            CrmEvent::MoveStage,
            ApiRequest::update_opportunity(opportunity_id, &input),
            CallTarget::user(user_id).with_target(opportunity_id),
        )
        .await
        .success
    }

    /// Stages of one pipeline in the order the CRM returns them. Empty when the
    /// call fails or the pipeline does not exist.
    pub async fn get_pipeline_stages(
        &self,
        pipeline_id: &str,
        user_id: Option<Uuid>,
    ) -> Vec<PipelineStage> {
        self.execute(
            CrmEvent::GetStages,
            ApiRequest::list_pipelines(),
            CallTarget::user(user_id).with_target(pipeline_id),
        )
        .await
        .decode::<PipelinesResponse>(CrmEvent::GetStages)
        .and_then(|response| {
            response
                .pipelines
                .into_iter()
                .find(|pipeline| pipeline.id == pipeline_id)
        })
        .map(|pipeline| pipeline.stages)
        .unwrap_or_default()
    }

    pub async fn add_note(&self, contact_id: &str, body: &str, user_id: Option<Uuid>) -> bool {
        self.execute(
            CrmEvent::AddNote,
            ApiRequest::add_note(contact_id, body),
            CallTarget::contact(contact_id, user_id),
        )
        .await
        .success
    }

    pub async fn send_sms(&self, contact_id: &str, message: &str, user_id: Option<Uuid>) -> bool {
        self.execute(
            CrmEvent::SendSms,
            ApiRequest::send_message(&MessageInput::sms(contact_id, message)),
            CallTarget::contact(contact_id, user_id),
        )
        .await
        .success
    }

    pub async fn trigger_workflow(
        &self,
        contact_id: &str,
        workflow_id: &str,
        user_id: Option<Uuid>,
    ) -> bool {
        self.execute(
            CrmEvent::TriggerWorkflow,
            ApiRequest::add_to_workflow(contact_id, workflow_id),
            CallTarget::contact(contact_id, user_id).with_target(workflow_id),
        )
        .await
        .success
    }

    /// Re-issue a logged call with its original payload and attribution.
    /// Writes a new audit row; the original is left as it was.
    pub async fn replay(&self, entry: &CrmSyncLog) -> Result<CallOutcome, RetryError> {
        let event = entry
            .event()
            .map_err(|_| RetryError::UnknownEvent(entry.event_type.clone()))?;
        let request = rebuild_request(event, entry)?;
        let target = CallTarget {
            user_id: entry.user_id,
            contact_id: entry.contact_id.clone(),
            target_id: entry.target_id.clone(),
        };
        Ok(self.execute(event, request, target).await)
    }
}

/// What gets stored as `request_payload`: the JSON body, or for body-less GETs
/// the parameters needed to repeat them.
fn audit_payload(request: &ApiRequest) -> Value {
    match (&request.body, &request.endpoint) {
        (Some(body), _) => body.clone(),
        (None, Endpoint::SearchDuplicateContact { email }) => json!({ "email": email }),
        (None, _) => json!({}),
    }
}

fn rebuild_request(event: CrmEvent, entry: &CrmSyncLog) -> Result<ApiRequest, RetryError> {
    let not_replayable = |reason: &str| RetryError::NotReplayable {
        id: entry.id,
        reason: reason.to_string(),
    };
    let contact_id = || {
        entry
            .contact_id
            .clone()
            .ok_or_else(|| not_replayable("entry has no contact id"))
    };
    let target_id = || {
        entry
            .target_id
            .clone()
            .ok_or_else(|| not_replayable("entry has no target id"))
    };
    let body = (!entry.request_payload.is_null()).then(|| entry.request_payload.clone());

    let endpoint = match event {
        CrmEvent::CreateContact => Endpoint::CreateContact,
        CrmEvent::UpdateContact => Endpoint::UpdateContact {
            contact_id: contact_id()?,
        },
        CrmEvent::LookupByEmail => {
            let email = entry
                .request_payload
                .get("email")
                .and_then(Value::as_str)
                .ok_or_else(|| not_replayable("payload has no email"))?;
            return Ok(ApiRequest::search_duplicate_contact(email));
        }
        CrmEvent::AddTag => Endpoint::AddTags {
            contact_id: contact_id()?,
        },
        CrmEvent::RemoveTag => Endpoint::RemoveTags {
            contact_id: contact_id()?,
        },
        CrmEvent::CreateOpportunity => Endpoint::CreateOpportunity,
        CrmEvent::UpdateOpportunity | CrmEvent::MoveStage => Endpoint::UpdateOpportunity {
            opportunity_id: target_id()?,
        },
        CrmEvent::GetStages => return Ok(ApiRequest::list_pipelines()),
        CrmEvent::AddNote => Endpoint::AddNote {
            contact_id: contact_id()?,
        },
        CrmEvent::SendSms => Endpoint::SendMessage,
        CrmEvent::TriggerWorkflow => Endpoint::AddToWorkflow {
            contact_id: contact_id()?,
            workflow_id: target_id()?,
        },
    };

    Ok(ApiRequest::new(endpoint, body))
}
