use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::domain::{BuildingId, RequestId, UserId};
use super::settings::{SettingsRegistry, TemplateKey};

/// Who a notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Building(BuildingId),
    Applicant(UserId),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Building(id) => write!(f, "building:{id}"),
            Recipient::Applicant(id) => write!(f, "applicant:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub template: TemplateKey,
    pub recipient: Recipient,
    pub substitutions: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(template: TemplateKey, recipient: Recipient) -> Self {
        Self {
            template,
            recipient,
            substitutions: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.substitutions.insert(name.to_string(), value.into());
        self
    }
}

/// Outbound message delivery (LINE, email). Implementations report failure instead of panicking.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), DispatchError>;
}

/// Renders the request document and returns where it was stored.
pub trait DocumentGenerator: Send + Sync {
    fn generate(&self, request_id: &RequestId) -> Result<String, DispatchError>;
}

/// Failure of an external collaborator. Logged and swallowed; never aborts an operation.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("external call exceeded {0:?}")]
    Timeout(Duration),
    #[error("external service failed: {0}")]
    Failed(String),
    #[error("external call aborted: {0}")]
    Panicked(String),
}

/// Runs notification and document side effects off the request path, bounded by a timeout.
pub struct SideEffects<N, D> {
    sink: Arc<N>,
    documents: Arc<D>,
    settings: Arc<SettingsRegistry>,
    timeout: Duration,
}

impl<N, D> SideEffects<N, D>
where
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    pub fn new(
        sink: Arc<N>,
        documents: Arc<D>,
        settings: Arc<SettingsRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            sink,
            documents,
            settings,
            timeout,
        }
    }

    /// Deliver one notification. Returns whether the sink accepted it.
    pub async fn notify(&self, notification: Notification) -> bool {
        let template = notification.template;
        let recipient = notification.recipient.clone();

        match self.settings.channel_enabled(template) {
            Ok(true) => {}
            Ok(false) => {
                info!(%template, %recipient, "notification channel disabled; skipping");
                return false;
            }
            Err(error) => {
                warn!(%template, %recipient, %error, "could not read notification settings");
                return false;
            }
        }

        let sink = Arc::clone(&self.sink);
        match self.bounded(move || sink.notify(&notification)).await {
            Ok(()) => true,
            Err(error) => {
                warn!(%template, %recipient, %error, "notification failed");
                false
            }
        }
    }

    /// Generate the request document, returning its reference when it was produced.
    pub async fn generate_document(&self, request_id: &RequestId) -> Option<String> {
        let documents = Arc::clone(&self.documents);
        let id = request_id.clone();
        match self.bounded(move || documents.generate(&id)).await {
            Ok(path) => Some(path),
            Err(error) => {
                warn!(request_id = %request_id, %error, "document generation failed");
                None
            }
        }
    }

    async fn bounded<T, F>(&self, work: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> Result<T, DispatchError> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(self.timeout, tokio::task::spawn_blocking(work)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(DispatchError::Panicked(join.to_string())),
            Err(_) => Err(DispatchError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::loans::settings::{NotificationTemplates, SystemParameters};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Notification>>,
    }

    impl NotificationSink for Recorder {
        fn notify(&self, notification: &Notification) -> Result<(), DispatchError> {
            self.sent
                .lock()
                .expect("recorder mutex poisoned")
                .push(notification.clone());
            Ok(())
        }
    }

    struct Slow;

    impl NotificationSink for Slow {
        fn notify(&self, _notification: &Notification) -> Result<(), DispatchError> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        }
    }

    struct Exploding;

    impl DocumentGenerator for Exploding {
        fn generate(&self, _request_id: &RequestId) -> Result<String, DispatchError> {
            panic!("renderer crashed");
        }
    }

    struct Fixed;

    impl DocumentGenerator for Fixed {
        fn generate(&self, request_id: &RequestId) -> Result<String, DispatchError> {
            Ok(format!("docs/{request_id}.pdf"))
        }
    }

    fn building_notice() -> Notification {
        Notification::new(
            TemplateKey::BuildingRequest,
            Recipient::Building(BuildingId::from("b-1")),
        )
        .with("formUrl", "http://localhost/form/abc")
    }

    #[tokio::test]
    async fn delivered_notification_reports_success() {
        let sink = Arc::new(Recorder::default());
        let effects = SideEffects::new(
            sink.clone(),
            Arc::new(Fixed),
            Arc::new(SettingsRegistry::default()),
            Duration::from_secs(1),
        );

        assert!(effects.notify(building_notice()).await);
        let sent = sink.sent.lock().expect("recorder mutex poisoned");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].substitutions["formUrl"], "http://localhost/form/abc");
    }

    #[tokio::test]
    async fn slow_sink_times_out() {
        let effects = SideEffects::new(
            Arc::new(Slow),
            Arc::new(Fixed),
            Arc::new(SettingsRegistry::default()),
            Duration::from_millis(20),
        );
        assert!(!effects.notify(building_notice()).await);
    }

    #[tokio::test]
    async fn disabled_channel_is_not_delivered() {
        let sink = Arc::new(Recorder::default());
        let settings = SettingsRegistry::new(
            SystemParameters {
                enable_line_notifications: false,
                ..SystemParameters::default()
            },
            NotificationTemplates::default(),
        )
        .expect("valid settings");
        let effects = SideEffects::new(
            sink.clone(),
            Arc::new(Fixed),
            Arc::new(settings),
            Duration::from_secs(1),
        );

        assert!(!effects.notify(building_notice()).await);
        assert!(sink.sent.lock().expect("recorder mutex poisoned").is_empty());
    }

    #[tokio::test]
    async fn panicking_generator_yields_no_document() {
        let effects = SideEffects::new(
            Arc::new(Recorder::default()),
            Arc::new(Exploding),
            Arc::new(SettingsRegistry::default()),
            Duration::from_secs(1),
        );
        assert_eq!(
            effects.generate_document(&RequestId::from("req-1")).await,
            None
        );
    }
}
