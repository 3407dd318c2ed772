//! Versioned configuration values: system parameters and notification templates.
//!
//! Each value has exactly one current version. Updates are validated before they replace it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::UserId;

/// Numeric limits and channel switches that drive the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemParameters {
    pub response_form_validity_hours: u32,
    pub max_items_per_request: u32,
    pub enable_line_notifications: bool,
    pub enable_email_notifications: bool,
}

impl Default for SystemParameters {
    fn default() -> Self {
        Self {
            response_form_validity_hours: 48,
            max_items_per_request: 10,
            enable_line_notifications: true,
            enable_email_notifications: true,
        }
    }
}

impl SystemParameters {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.response_form_validity_hours == 0 {
            return Err(SettingsError::OutOfRange {
                field: "response_form_validity_hours",
            });
        }
        if self.max_items_per_request == 0 {
            return Err(SettingsError::OutOfRange {
                field: "max_items_per_request",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKey {
    BuildingRequest,
    AllocationComplete,
    ApprovalNotification,
}

/// Delivery channel a template is sent through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Line,
    Email,
}

impl TemplateKey {
    pub const ALL: [TemplateKey; 3] = [
        TemplateKey::BuildingRequest,
        TemplateKey::AllocationComplete,
        TemplateKey::ApprovalNotification,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            TemplateKey::BuildingRequest => "building_request",
            TemplateKey::AllocationComplete => "allocation_complete",
            TemplateKey::ApprovalNotification => "approval_notification",
        }
    }

    /// Building managers are reached over LINE, applicants by email.
    pub const fn channel(self) -> Channel {
        match self {
            TemplateKey::BuildingRequest | TemplateKey::AllocationComplete => Channel::Line,
            TemplateKey::ApprovalNotification => Channel::Email,
        }
    }

    fn required_in_subject(self) -> &'static [&'static str] {
        match self {
            TemplateKey::ApprovalNotification => &["requestId"],
            _ => &[],
        }
    }

    fn required_in_body(self) -> &'static [&'static str] {
        match self {
            TemplateKey::BuildingRequest => &["formUrl"],
            TemplateKey::AllocationComplete => &["buildingName", "requestId"],
            TemplateKey::ApprovalNotification => &["username"],
        }
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
}

impl MessageTemplate {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Replace every `{{name}}` with its substitution; unknown placeholders stay as written.
    pub fn render(&self, substitutions: &BTreeMap<String, String>) -> RenderedMessage {
        RenderedMessage {
            subject: render(&self.subject, substitutions),
            body: render(&self.body, substitutions),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Single left-to-right pass. Substituted values are copied verbatim and never rescanned.
pub fn render(text: &str, substitutions: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        match substitutions.get(&after[..close]) {
            Some(value) => {
                out.push_str(value);
                rest = &after[close + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn contains_placeholder(text: &str, name: &str) -> bool {
    text.contains(&format!("{{{{{name}}}}}"))
}

/// Template key to message mapping. Every key always has a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTemplates {
    templates: BTreeMap<TemplateKey, MessageTemplate>,
}

impl Default for NotificationTemplates {
    fn default() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert(
            TemplateKey::BuildingRequest,
            MessageTemplate::new(
                "Equipment availability request",
                "A new equipment loan request needs your availability. Respond here: {{formUrl}}",
            ),
        );
        templates.insert(
            TemplateKey::AllocationComplete,
            MessageTemplate::new(
                "Equipment allocation complete",
                "{{buildingName}}: equipment for request {{requestId}} has been allocated.",
            ),
        );
        templates.insert(
            TemplateKey::ApprovalNotification,
            MessageTemplate::new(
                "Loan request {{requestId}} approved",
                "Dear {{username}}, your equipment loan request has been approved.",
            ),
        );
        Self { templates }
    }
}

impl NotificationTemplates {
    pub fn get(&self, key: TemplateKey) -> Option<&MessageTemplate> {
        self.templates.get(&key)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        for key in TemplateKey::ALL {
            let template = self
                .templates
                .get(&key)
                .ok_or(SettingsError::MissingTemplate { key })?;
            validate_template(key, template)?;
        }
        Ok(())
    }

    fn with(&self, key: TemplateKey, template: MessageTemplate) -> Self {
        let mut next = self.clone();
        next.templates.insert(key, template);
        next
    }
}

fn validate_template(key: TemplateKey, template: &MessageTemplate) -> Result<(), SettingsError> {
    if template.subject.trim().is_empty() || template.body.trim().is_empty() {
        return Err(SettingsError::EmptyTemplate { key });
    }
    for name in key.required_in_subject() {
        if !contains_placeholder(&template.subject, name) {
            return Err(SettingsError::MissingPlaceholder {
                key,
                part: "subject",
                placeholder: name,
            });
        }
    }
    for name in key.required_in_body() {
        if !contains_placeholder(&template.body, name) {
            return Err(SettingsError::MissingPlaceholder {
                key,
                part: "body",
                placeholder: name,
            });
        }
    }
    Ok(())
}

/// A configuration value together with its revision metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Versioned<T> {
    pub version: u32,
    pub updated_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
    pub value: T,
}

impl<T> Versioned<T> {
    fn initial(value: T) -> Self {
        Self {
            version: 1,
            updated_by: None,
            updated_at: Utc::now(),
            value,
        }
    }

    fn next(&self, value: T, updated_by: UserId) -> Self {
        Self {
            version: self.version + 1,
            updated_by: Some(updated_by),
            updated_at: Utc::now(),
            value,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("{field} must be greater than zero")]
    OutOfRange { field: &'static str },
    #[error("template {key} is missing")]
    MissingTemplate { key: TemplateKey },
    #[error("template {key} must have a subject and a body")]
    EmptyTemplate { key: TemplateKey },
    #[error("template {key} {part} must contain {{{{{placeholder}}}}}")]
    MissingPlaceholder {
        key: TemplateKey,
        part: &'static str,
        placeholder: &'static str,
    },
    #[error("settings registry lock poisoned")]
    Poisoned,
}

/// Holder of the current configuration versions, shared by the service and the adapters.
#[derive(Debug)]
pub struct SettingsRegistry {
    parameters: RwLock<Versioned<SystemParameters>>,
    templates: RwLock<Versioned<NotificationTemplates>>,
}

impl Default for SettingsRegistry {
    fn default() -> Self {
        Self {
            parameters: RwLock::new(Versioned::initial(SystemParameters::default())),
            templates: RwLock::new(Versioned::initial(NotificationTemplates::default())),
        }
    }
}

impl SettingsRegistry {
    pub fn new(
        parameters: SystemParameters,
        templates: NotificationTemplates,
    ) -> Result<Self, SettingsError> {
        parameters.validate()?;
        templates.validate()?;
        Ok(Self {
            parameters: RwLock::new(Versioned::initial(parameters)),
            templates: RwLock::new(Versioned::initial(templates)),
        })
    }

    pub fn parameters(&self) -> Result<Versioned<SystemParameters>, SettingsError> {
        self.parameters
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| SettingsError::Poisoned)
    }

    pub fn templates(&self) -> Result<Versioned<NotificationTemplates>, SettingsError> {
        self.templates
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| SettingsError::Poisoned)
    }

    pub fn template(&self, key: TemplateKey) -> Result<MessageTemplate, SettingsError> {
        self.templates()?
            .value
            .get(key)
            .cloned()
            .ok_or(SettingsError::MissingTemplate { key })
    }

    /// Whether the channel of `key` is switched on.
    pub fn channel_enabled(&self, key: TemplateKey) -> Result<bool, SettingsError> {
        let parameters = self.parameters()?.value;
        Ok(match key.channel() {
            Channel::Line => parameters.enable_line_notifications,
            Channel::Email => parameters.enable_email_notifications,
        })
    }

    pub fn update_parameters(
        &self,
        parameters: SystemParameters,
        updated_by: UserId,
    ) -> Result<u32, SettingsError> {
        parameters.validate()?;
        let mut guard = self
            .parameters
            .write()
            .map_err(|_| SettingsError::Poisoned)?;
        *guard = guard.next(parameters, updated_by);
        Ok(guard.version)
    }

    pub fn update_template(
        &self,
        key: TemplateKey,
        template: MessageTemplate,
        updated_by: UserId,
    ) -> Result<u32, SettingsError> {
        validate_template(key, &template)?;
        let mut guard = self
            .templates
            .write()
            .map_err(|_| SettingsError::Poisoned)?;
        let next = guard.value.with(key, template);
        *guard = guard.next(next, updated_by);
        Ok(guard.version)
    }
}
