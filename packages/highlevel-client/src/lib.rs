//! Pure HighLevel (LeadConnector) REST API client.
//!
//! Covers the contact, opportunity, pipeline, note, conversation and workflow
//! endpoints. Requests are described as data ([`ApiRequest`]) so callers can
//! log, persist and replay them; [`HighLevelClient::send`] executes one and
//! hands back the status and parsed body without judging the status code.
//!
//! # Example
//!
//! ```rust,ignore
//! use highlevel_client::{ApiRequest, HighLevelClient, HighLevelOptions};
//!
//! let client = HighLevelClient::new(HighLevelOptions::new("api-key", "location-id"))?;
//! let response = client.send(&ApiRequest::list_pipelines()).await?;
//! if response.is_success() {
//!     let pipelines: highlevel_client::PipelinesResponse =
//!         serde_json::from_value(response.body)?;
//! }
//! ```

pub mod error;
pub mod types;

pub use error::{HighLevelError, Result};
pub use types::*;

use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

pub const DEFAULT_BASE_URL: &str = "https://services.leadconnectorhq.com";

/// Value of the `Version` header the v2 API requires on every call.
pub const API_VERSION: &str = "2021-07-28";

#[derive(Debug, Clone)]
pub struct HighLevelOptions {
    pub api_key: String,
    pub location_id: String,
    pub base_url: String,
    pub api_version: String,
    pub timeout: Duration,
}

impl HighLevelOptions {
    pub fn new(api_key: impl Into<String>, location_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            location_id: location_id.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: API_VERSION.to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Every endpoint the client knows how to call, with its path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    CreateContact,
    UpdateContact { contact_id: String },
    SearchDuplicateContact { email: String },
    AddTags { contact_id: String },
    RemoveTags { contact_id: String },
    CreateOpportunity,
    UpdateOpportunity { opportunity_id: String },
    ListPipelines,
    AddNote { contact_id: String },
    SendMessage,
    AddToWorkflow { contact_id: String, workflow_id: String },
}

impl Endpoint {
    pub fn method(&self) -> Method {
        match self {
            Endpoint::SearchDuplicateContact { .. } | Endpoint::ListPipelines => Method::GET,
            Endpoint::UpdateContact { .. } | Endpoint::UpdateOpportunity { .. } => Method::PUT,
            Endpoint::RemoveTags { .. } => Method::DELETE,
            _ => Method::POST,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Endpoint::CreateContact => "/contacts/".to_string(),
            Endpoint::UpdateContact { contact_id } => format!("/contacts/{}", contact_id),
            Endpoint::SearchDuplicateContact { .. } => "/contacts/search/duplicate".to_string(),
            Endpoint::AddTags { contact_id } | Endpoint::RemoveTags { contact_id } => {
                format!("/contacts/{}/tags", contact_id)
            }
            Endpoint::CreateOpportunity => "/opportunities/".to_string(),
            Endpoint::UpdateOpportunity { opportunity_id } => {
                format!("/opportunities/{}", opportunity_id)
            }
            Endpoint::ListPipelines => "/opportunities/pipelines".to_string(),
            Endpoint::AddNote { contact_id } => format!("/contacts/{}/notes", contact_id),
            Endpoint::SendMessage => "/conversations/messages".to_string(),
            Endpoint::AddToWorkflow {
                contact_id,
                workflow_id,
            } => format!("/contacts/{}/workflow/{}", contact_id, workflow_id),
        }
    }

    /// Query parameters, excluding `locationId` which the client appends itself.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Endpoint::SearchDuplicateContact { email } => vec![("email", email.clone())],
            _ => Vec::new(),
        }
    }

    /// Whether the API scopes this endpoint by location through the query string.
    fn location_in_query(&self) -> bool {
        matches!(
            self,
            Endpoint::SearchDuplicateContact { .. } | Endpoint::ListPipelines
        )
    }

    /// Whether the API expects `locationId` inside the JSON body.
    fn location_in_body(&self) -> bool {
        matches!(self, Endpoint::CreateContact | Endpoint::CreateOpportunity)
    }
}

/// One HTTP exchange to perform: an endpoint plus an optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub endpoint: Endpoint,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(endpoint: Endpoint, body: Option<Value>) -> Self {
        Self { endpoint, body }
    }

    fn with_body<T: Serialize>(endpoint: Endpoint, body: &T) -> Self {
        // Serializing these plain structs cannot fail; fall back to null rather than panic.
        let body = serde_json::to_value(body).unwrap_or(Value::Null);
        Self::new(endpoint, Some(body))
    }

    pub fn create_contact(input: &ContactInput) -> Self {
        Self::with_body(Endpoint::CreateContact, input)
    }

    pub fn update_contact(contact_id: &str, input: &ContactInput) -> Self {
        Self::with_body(
            Endpoint::UpdateContact {
                contact_id: contact_id.to_string(),
            },
            input,
        )
    }

    pub fn search_duplicate_contact(email: &str) -> Self {
        Self::new(
            Endpoint::SearchDuplicateContact {
                email: email.to_string(),
            },
            None,
        )
    }

    pub fn add_tags(contact_id: &str, tags: &[String]) -> Self {
        Self::with_body(
            Endpoint::AddTags {
                contact_id: contact_id.to_string(),
            },
            &TagsInput {
                tags: tags.to_vec(),
            },
        )
    }

    pub fn remove_tags(contact_id: &str, tags: &[String]) -> Self {
        Self::with_body(
            Endpoint::RemoveTags {
                contact_id: contact_id.to_string(),
            },
            &TagsInput {
                tags: tags.to_vec(),
            },
        )
    }

    pub fn create_opportunity(input: &OpportunityInput) -> Self {
        Self::with_body(Endpoint::CreateOpportunity, input)
    }

    pub fn update_opportunity(opportunity_id: &str, input: &OpportunityInput) -> Self {
        Self::with_body(
            Endpoint::UpdateOpportunity {
                opportunity_id: opportunity_id.to_string(),
            },
            input,
        )
    }

    pub fn list_pipelines() -> Self {
        Self::new(Endpoint::ListPipelines, None)
    }

    pub fn add_note(contact_id: &str, body: &str) -> Self {
        Self::with_body(
            Endpoint::AddNote {
                contact_id: contact_id.to_string(),
            },
            &NoteInput {
                body: body.to_string(),
            },
        )
    }

    pub fn send_message(input: &MessageInput) -> Self {
        Self::with_body(Endpoint::SendMessage, input)
    }

    pub fn add_to_workflow(contact_id: &str, workflow_id: &str) -> Self {
        Self::new(
            Endpoint::AddToWorkflow {
                contact_id: contact_id.to_string(),
                workflow_id: workflow_id.to_string(),
            },
            Some(Value::Object(Default::default())),
        )
    }
}

/// Status and parsed body of a completed exchange, whatever the status code.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Parse a response body leniently: JSON when possible, the raw text otherwise,
/// null when empty.
pub fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

pub struct HighLevelClient {
    client: reqwest::Client,
    options: HighLevelOptions,
}

impl HighLevelClient {
    pub fn new(options: HighLevelOptions) -> Result<Self> {
        if options.api_key.trim().is_empty() {
            return Err(HighLevelError::Config("api key is empty".to_string()));
        }
        if options.location_id.trim().is_empty() {
            return Err(HighLevelError::Config("location id is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()?;

        Ok(Self { client, options })
    }

    /// Execute one request. Transport failures are errors; any HTTP status is
    /// returned as an [`ApiResponse`] with its body parsed.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let endpoint = &request.endpoint;
        let url = format!(
            "{}{}",
            self.options.base_url.trim_end_matches('/'),
            endpoint.path()
        );

        let mut query = endpoint.query();
        if endpoint.location_in_query() {
            query.push(("locationId", self.options.location_id.clone()));
        }

        let mut builder = self
            .client
            .request(endpoint.method(), &url)
            .bearer_auth(&self.options.api_key)
            .header("Version", &self.options.api_version)
            .header("Accept", "application/json");

        if !query.is_empty() {
            builder = builder.query(&query);
        }

        if let Some(body) = &request.body {
            let body = if endpoint.location_in_body() {
                with_location(body.clone(), &self.options.location_id)
            } else {
                body.clone()
            };
            builder = builder.json(&body);
        }

        tracing::debug!(method = %endpoint.method(), path = %endpoint.path(), "HighLevel request");

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;

        Ok(ApiResponse {
            status,
            body: parse_body(&text),
        })
    }
}

fn with_location(body: Value, location_id: &str) -> Value {
    match body {
        Value::Object(mut map) => {
            map.entry("locationId")
                .or_insert_with(|| Value::String(location_id.to_string()));
            Value::Object(map)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoints_map_to_rest_routes() {
        let update = Endpoint::UpdateOpportunity {
            opportunity_id: "opp-1".into(),
        };
        assert_eq!(update.method(), Method::PUT);
        assert_eq!(update.path(), "/opportunities/opp-1");

        let remove = Endpoint::RemoveTags {
            contact_id: "c-1".into(),
        };
        assert_eq!(remove.method(), Method::DELETE);
        assert_eq!(remove.path(), "/contacts/c-1/tags");

        let workflow = Endpoint::AddToWorkflow {
            contact_id: "c-1".into(),
            workflow_id: "wf-9".into(),
        };
        assert_eq!(workflow.method(), Method::POST);
        assert_eq!(workflow.path(), "/contacts/c-1/workflow/wf-9");
    }

    #[test]
    fn duplicate_search_carries_email_in_query() {
        let request = ApiRequest::search_duplicate_contact("a@b.com");
        assert_eq!(request.endpoint.method(), Method::GET);
        assert_eq!(request.endpoint.query(), vec![("email", "a@b.com".to_string())]);
        assert!(request.body.is_none());
    }

    #[test]
    fn contact_input_omits_unset_fields() {
        let input = ContactInput {
            first_name: Some("Ada".into()),
            email: Some("ada@example.com".into()),
            ..Default::default()
        };
        let request = ApiRequest::update_contact("c-1", &input);
        assert_eq!(
            request.body,
            Some(json!({"firstName": "Ada", "email": "ada@example.com"}))
        );
    }

    #[test]
    fn opportunity_status_serializes_lowercase() {
        let input = OpportunityInput {
            status: Some(OpportunityStatus::Lost),
            ..Default::default()
        };
        let request = ApiRequest::update_opportunity("opp-1", &input);
        assert_eq!(request.body, Some(json!({"status": "lost"})));
    }

    #[test]
    fn location_is_added_to_create_bodies_only_when_missing() {
        let body = with_location(json!({"name": "x"}), "loc-1");
        assert_eq!(body, json!({"name": "x", "locationId": "loc-1"}));

        let body = with_location(json!({"locationId": "other"}), "loc-1");
        assert_eq!(body, json!({"locationId": "other"}));
    }

    #[test]
    fn parse_body_is_lenient() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"ok\":true}"), json!({"ok": true}));
        assert_eq!(parse_body("Bad Gateway"), json!("Bad Gateway"));
    }

    #[test]
    fn response_status_classification() {
        let ok = ApiResponse {
            status: 201,
            body: json!({"contact": {"id": "c-1"}}),
        };
        assert!(ok.is_success());

        let rejected = ApiResponse {
            status: 422,
            body: json!({"message": "invalid"}),
        };
        assert!(!rejected.is_success());
    }

    #[test]
    fn empty_options_are_rejected() {
        assert!(matches!(
            HighLevelClient::new(HighLevelOptions::new("", "loc")),
            Err(HighLevelError::Config(_))
        ));
    }
}
