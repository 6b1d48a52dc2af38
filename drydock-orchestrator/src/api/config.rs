//! Configuration API Handlers
//!
//! Exposes the placeholder catalogue, a validation report of the configured
//! runner environment templates and a summary of the settings in effect.

use axum::{Json, extract::State};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::AppState;
use crate::service::placeholders::{self, PLACEHOLDERS, TemplateReport};

/// Key the command override is reported under
const COMMAND_TEMPLATE_KEY: &str = "RUNNER_COMMAND";

#[derive(Debug, Serialize)]
pub struct PlaceholderInfo {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct TemplateValidation {
    /// `true` when the settings are valid and every template only uses known
    /// placeholders
    pub is_valid: bool,
    pub templates: BTreeMap<String, TemplateReport>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Settings in effect, without the platform token
#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    pub orchestrator_id: String,
    pub runner_image: String,
    pub container_runtime: String,
    pub github_api_url: String,
    pub auto_create_runners: bool,
    pub discovery_mode: &'static str,
    pub organization: Option<String>,
    pub reconcile_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub provisioning_timeout_secs: u64,
    pub runner_ttl_secs: u64,
    pub max_concurrent_creations: usize,
    pub has_configuration: bool,
    pub total_variables: usize,
    pub variable_names: Vec<String>,
    pub has_command_override: bool,
    pub available_placeholders: Vec<String>,
}

/// GET /config/placeholders
pub async fn list_placeholders() -> Json<Vec<PlaceholderInfo>> {
    Json(
        PLACEHOLDERS
            .iter()
            .map(|(name, description)| PlaceholderInfo {
                name: format!("{{{}}}", name),
                description: description.to_string(),
            })
            .collect(),
    )
}

/// GET /config/validate
pub async fn validate_templates(State(state): State<Arc<AppState>>) -> Json<TemplateValidation> {
    let mut templates: BTreeMap<String, TemplateReport> = state
        .config
        .env_templates
        .iter()
        .map(|(name, template)| (name.clone(), placeholders::validate_template(template)))
        .collect();

    if let Some(command) = &state.config.command_override {
        templates.insert(
            COMMAND_TEMPLATE_KEY.to_string(),
            placeholders::validate_template(command),
        );
    }

    let mut errors: Vec<String> = state
        .config
        .validate()
        .err()
        .map(|e| e.to_string())
        .into_iter()
        .collect();

    for (name, report) in &templates {
        if !report.is_valid {
            errors.push(format!(
                "{} references unknown placeholders: {}",
                name,
                report.invalid_placeholders.join(", ")
            ));
        }
    }

    let is_valid = errors.is_empty();
    if !is_valid {
        tracing::warn!("Configuration has {} problem(s)", errors.len());
    }

    Json(TemplateValidation {
        is_valid,
        templates,
        errors,
        warnings: state.config.warnings(),
        recommendations: state.config.recommendations(),
    })
}

/// GET /config/info
pub async fn config_info(State(state): State<Arc<AppState>>) -> Json<ConfigSummary> {
    let config = &state.config;
    let variable_names: Vec<String> = config.env_templates.keys().cloned().collect();

    Json(ConfigSummary {
        orchestrator_id: state.service.orchestrator_id().to_string(),
        runner_image: config.runner_image.clone(),
        container_runtime: config.container_runtime.clone(),
        github_api_url: config.github_api_url.clone(),
        auto_create_runners: config.auto_create_runners,
        discovery_mode: config.discovery_mode.as_str(),
        organization: config.organization.clone(),
        reconcile_interval_secs: config.reconcile_interval.as_secs(),
        cleanup_interval_secs: config.cleanup_interval.as_secs(),
        provisioning_timeout_secs: config.provisioning_timeout.as_secs(),
        runner_ttl_secs: config.runner_ttl.as_secs(),
        max_concurrent_creations: config.max_concurrent_creations,
        has_configuration: !variable_names.is_empty(),
        total_variables: variable_names.len(),
        variable_names,
        has_command_override: config.command_override.is_some(),
        available_placeholders: PLACEHOLDERS
            .iter()
            .map(|(name, _)| format!("{{{}}}", name))
            .collect(),
    })
}
