//! Arcade HTTP tool provider.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{AuthorizationStatus, AuthorizationTicket, CatalogPage, ToolDefinition, ToolProvider};
use crate::core::events::ToolOutput;
use crate::error::AuthorizationWaitError;
use crate::providers::ProviderError;
use crate::providers::shared::USER_AGENT;

pub const DEFAULT_BASE_URL: &str = "https://api.arcade.dev";

/// Longest server-side wait accepted by the status endpoint.
const MAX_STATUS_WAIT_SECS: u64 = 59;
const STATUS_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ArcadeConfig {
    pub api_key: String,
    pub base_url: String,
}

pub struct ArcadeClient {
    config: ArcadeConfig,
    http: reqwest::Client,
}

impl ArcadeClient {
    pub fn new(config: ArcadeConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
                .unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
        headers
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .headers(self.headers())
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = ProviderError::http_status(status.as_u16(), &body);
            warn!(status = status.as_u16(), "arcade request failed: {}", err.message);
            return Err(err.into());
        }

        Ok(response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?)
    }

    async fn auth_status(&self, authorization_id: &str, wait_secs: u64) -> Result<AuthResponse> {
        let wait = wait_secs.to_string();
        let request = self
            .http
            .get(self.url("/v1/auth/status"))
            .query(&[("id", authorization_id), ("wait", wait.as_str())]);
        self.send(request).await
    }
}

#[async_trait]
impl ToolProvider for ArcadeClient {
    async fn list_toolkit(
        &self,
        toolkit: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<CatalogPage> {
        let limit = limit.to_string();
        let request = self.http.get(self.url("/v1/tools")).query(&[
            ("toolkit", toolkit),
            ("limit", limit.as_str()),
            ("user_id", user_id),
        ]);
        let page: ToolListResponse = self.send(request).await?;
        let tools: Vec<ToolDefinition> = page.items.into_iter().map(ToolDefinition::from).collect();
        Ok(CatalogPage {
            total: page.total_count.unwrap_or(tools.len()),
            tools,
        })
    }

    async fn get_tool(&self, name: &str, user_id: &str) -> Result<ToolDefinition> {
        let request = self
            .http
            .get(self.url(&format!("/v1/tools/{}", qualify(name))))
            .query(&[("user_id", user_id)]);
        let item: ArcadeTool = self.send(request).await?;
        Ok(item.into())
    }

    async fn authorize(&self, tool: &ToolDefinition, user_id: &str) -> Result<AuthorizationTicket> {
        let request = self
            .http
            .post(self.url("/v1/tools/authorize"))
            .json(&AuthorizeRequest {
                tool_name: &tool.qualified_name,
                user_id,
            });
        let response: AuthResponse = self
            .send(request)
            .await
            .with_context(|| format!("start authorization for {}", tool.qualified_name))?;
        debug!(tool = %tool.name, status = ?response.status, "authorization requested");
        Ok(response.into_ticket())
    }

    async fn wait_for_completion(
        &self,
        authorization_id: &str,
        timeout: Duration,
    ) -> std::result::Result<(), AuthorizationWaitError> {
        let deadline = Instant::now() + timeout;
        let timed_out = || AuthorizationWaitError::Timeout {
            authorization_id: authorization_id.to_string(),
            timeout_secs: timeout.as_secs(),
        };

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out());
            }
            let wait_secs = remaining.as_secs().min(MAX_STATUS_WAIT_SECS);

            let response =
                match tokio::time::timeout(remaining, self.auth_status(authorization_id, wait_secs))
                    .await
                {
                    Err(_) => return Err(timed_out()),
                    Ok(Err(err)) => return Err(AuthorizationWaitError::Provider(format!("{err:#}"))),
                    Ok(Ok(response)) => response,
                };

            match response.status {
                AuthorizationStatus::Completed => return Ok(()),
                AuthorizationStatus::Failed => {
                    return Err(AuthorizationWaitError::Failed {
                        authorization_id: authorization_id.to_string(),
                    });
                }
                AuthorizationStatus::Pending => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(STATUS_RETRY_DELAY.min(remaining)).await;
                }
            }
        }
    }

    async fn execute(
        &self,
        tool: &ToolDefinition,
        input: &Value,
        user_id: &str,
    ) -> Result<ToolOutput> {
        let request = self
            .http
            .post(self.url("/v1/tools/execute"))
            .json(&ExecuteRequest {
                tool_name: &tool.qualified_name,
                input,
                user_id,
            });
        let response: ExecuteResponse = self
            .send(request)
            .await
            .with_context(|| format!("execute {}", tool.qualified_name))?;
        Ok(response.into_output())
    }
}

/// `Dropbox_DownloadFile` -> `Dropbox.DownloadFile`. Already-qualified names pass through.
fn qualify(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        name.replacen('_', ".", 1)
    }
}

#[derive(Debug, Deserialize)]
struct ToolListResponse {
    #[serde(default)]
    items: Vec<ArcadeTool>,
    #[serde(default)]
    total_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ArcadeTool {
    name: String,
    #[serde(default)]
    qualified_name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    toolkit: Option<ArcadeToolkit>,
    #[serde(default)]
    input: ArcadeInput,
    #[serde(default)]
    requirements: Option<ArcadeRequirements>,
}

#[derive(Debug, Deserialize)]
struct ArcadeToolkit {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ArcadeInput {
    #[serde(default)]
    parameters: Vec<ArcadeParameter>,
}

#[derive(Debug, Deserialize)]
struct ArcadeParameter {
    name: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    description: Option<String>,
    value_schema: ValueSchema,
}

#[derive(Debug, Deserialize)]
struct ValueSchema {
    val_type: String,
    #[serde(default)]
    inner_val_type: Option<String>,
    #[serde(default, rename = "enum")]
    enum_values: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ArcadeRequirements {
    #[serde(default)]
    authorization: Option<Value>,
}

impl From<ArcadeTool> for ToolDefinition {
    fn from(tool: ArcadeTool) -> Self {
        let toolkit = tool.toolkit.map(|t| t.name);
        let qualified_name = tool.qualified_name.unwrap_or_else(|| match &toolkit {
            Some(toolkit) => format!("{toolkit}.{}", tool.name),
            None => tool.name.clone(),
        });
        let requires_authorization = tool
            .requirements
            .and_then(|r| r.authorization)
            .is_some_and(|auth| !auth.is_null());

        ToolDefinition {
            name: qualified_name.replace('.', "_"),
            qualified_name,
            description: tool.description,
            input_schema: parameters_schema(&tool.input.parameters),
            requires_authorization,
            requires_approval: false,
        }
    }
}

fn parameters_schema(parameters: &[ArcadeParameter]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in parameters {
        let mut schema = match json_type(&param.value_schema.val_type) {
            "array" => {
                let inner = param.value_schema.inner_val_type.as_deref().unwrap_or("string");
                json!({"type": "array", "items": {"type": json_type(inner)}})
            }
            other => json!({"type": other}),
        };
        if let Some(description) = &param.description {
            schema["description"] = json!(description);
        }
        if let Some(values) = &param.value_schema.enum_values {
            schema["enum"] = json!(values);
        }
        if param.required {
            required.push(param.name.clone());
        }
        properties.insert(param.name.clone(), schema);
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn json_type(val_type: &str) -> &str {
    match val_type {
        "json" => "object",
        other => other,
    }
}

#[derive(Serialize)]
struct AuthorizeRequest<'a> {
    tool_name: &'a str,
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    status: AuthorizationStatus,
}

impl AuthResponse {
    fn into_ticket(self) -> AuthorizationTicket {
        AuthorizationTicket {
            id: self.id.unwrap_or_default(),
            url: self.url,
            status: self.status,
        }
    }
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    tool_name: &'a str,
    input: &'a Value,
    user_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    output: Option<ExecuteOutput>,
}

#[derive(Debug, Deserialize)]
struct ExecuteOutput {
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    error: Option<ExecuteError>,
}

#[derive(Debug, Deserialize)]
struct ExecuteError {
    message: String,
    #[serde(default)]
    developer_message: Option<String>,
}

impl ExecuteResponse {
    fn into_output(self) -> ToolOutput {
        let output = self.output.unwrap_or(ExecuteOutput {
            value: None,
            error: None,
        });
        if let Some(error) = output.error {
            return ToolOutput::failure("tool_error", error.message, error.developer_message);
        }
        if !self.success {
            return ToolOutput::failure("tool_error", "Tool execution failed", None);
        }
        ToolOutput::success(output.value.unwrap_or(Value::Null))
    }
}
