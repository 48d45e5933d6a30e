//! Home Assistant service call on key press.

use common::{Field, HandlerConfig, ModuleInfo};
use serde_json::json;

use super::required;
use crate::handler::{BoxFuture, HandlerError, KeyContext, KeyHandler, SourceError};

pub const NAME: &str = "Lights";

pub fn info() -> ModuleInfo {
    ModuleInfo {
        name: NAME.to_string(),
        icon_fields: None,
        key_fields: Some(vec![
            Field::text("Domain", "domain"),
            Field::text("Service", "service"),
            Field::text("Entity Id", "entity_id"),
            Field::text("Api Key", "api_key"),
            Field::text("Base Url", "base_url"),
        ]),
        lcd_fields: None,
        knob_fields: None,
    }
}

#[derive(Debug, PartialEq)]
struct ServiceCall<'a> {
    url: String,
    api_key: &'a str,
    entity_id: &'a str,
}

impl<'a> ServiceCall<'a> {
    fn from_config(config: &'a HandlerConfig) -> Result<Self, HandlerError> {
        let entity_id = required(config, "entity_id")?;
        let api_key = required(config, "api_key")?;
        let domain = required(config, "domain")?;
        let service = required(config, "service")?;
        let base_url = required(config, "base_url")?;

        Ok(Self {
            url: format!("http://{}/api/services/{}/{}", base_url, domain, service),
            api_key,
            entity_id,
        })
    }
}

pub struct LightsKey {
    client: reqwest::Client,
}

impl LightsKey {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl KeyHandler for LightsKey {
    fn key<'a>(&'a self, ctx: KeyContext<'a>) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            let call = ServiceCall::from_config(ctx.config)?;

            let response = self
                .client
                .post(&call.url)
                .bearer_auth(call.api_key)
                .json(&json!({ "entity_id": call.entity_id }))
                .send()
                .await
                .map_err(|e| SourceError::Write(format!("POST {}: {}", call.url, e)))?;

            let status = response.status();
            if !status.is_success() {
                let reason = format!("POST {}: status {}", call.url, status);
                return Err(SourceError::Write(reason).into());
            }

            log::debug!("Lights: called {} for {}", call.url, call.entity_id);
            Ok(())
        })
    }
}
