use chrono::NaiveDate;
use loan_desk::config::WorkflowConfig;
use loan_desk::error::AppError;
use loan_desk::workflows::loans::{
    Building, BuildingId, DispatchError, DocumentGenerator, Equipment, EquipmentId,
    LoanWorkflowService, MemoryLoanStore, Notification, NotificationSink, NotificationTemplates,
    RenderedMessage, RepositoryError, RequestId, SettingsRegistry, SideEffects, WorkflowError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;

pub(crate) type LoanService =
    LoanWorkflowService<MemoryLoanStore, TracingNotificationSink, StorageDocumentGenerator>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Messages kept for inspection; older ones are dropped once the outbox is full.
pub(crate) const OUTBOX_CAPACITY: usize = 256;

/// Renders templates from the settings registry and logs the message instead of delivering it.
pub(crate) struct TracingNotificationSink {
    settings: Arc<SettingsRegistry>,
    capacity: usize,
    outbox: Mutex<VecDeque<(String, RenderedMessage)>>,
}

impl TracingNotificationSink {
    pub(crate) fn new(settings: Arc<SettingsRegistry>) -> Self {
        Self::with_capacity(settings, OUTBOX_CAPACITY)
    }

    pub(crate) fn with_capacity(settings: Arc<SettingsRegistry>, capacity: usize) -> Self {
        Self {
            settings,
            capacity,
            outbox: Mutex::new(VecDeque::with_capacity(capacity.min(OUTBOX_CAPACITY))),
        }
    }

    /// The most recent rendered messages with their recipient, oldest first.
    pub(crate) fn outbox(&self) -> Vec<(String, RenderedMessage)> {
        self.outbox
            .lock()
            .map(|guard| guard.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, notification: &Notification) -> Result<(), DispatchError> {
        let template = self
            .settings
            .template(notification.template)
            .map_err(|err| DispatchError::Failed(err.to_string()))?;
        let message = template.render(&notification.substitutions);
        let recipient = notification.recipient.to_string();

        info!(
            template = %notification.template,
            %recipient,
            subject = %message.subject,
            "notification dispatched"
        );

        let mut outbox = self
            .outbox
            .lock()
            .map_err(|_| DispatchError::Failed("outbox mutex poisoned".to_string()))?;
        if self.capacity == 0 {
            return Ok(());
        }
        while outbox.len() >= self.capacity {
            outbox.pop_front();
        }
        outbox.push_back((recipient, message));
        Ok(())
    }
}

/// Stands in for the PDF renderer: reports where the document for a request is stored.
pub(crate) struct StorageDocumentGenerator {
    root: String,
}

impl StorageDocumentGenerator {
    pub(crate) fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for StorageDocumentGenerator {
    fn default() -> Self {
        Self::new("storage")
    }
}

impl DocumentGenerator for StorageDocumentGenerator {
    fn generate(&self, request_id: &RequestId) -> Result<String, DispatchError> {
        Ok(format!("{}/requests/{}.pdf", self.root, request_id))
    }
}

/// Buildings and equipment available to a fresh in-memory deployment.
pub(crate) fn seed_catalog(store: &MemoryLoanStore) -> Result<(), RepositoryError> {
    for (id, name) in [
        ("bld-engineering", "Engineering Building"),
        ("bld-humanities", "Humanities Building"),
        ("bld-library", "Central Library"),
    ] {
        store.add_building(Building {
            id: BuildingId::from(id),
            name: name.to_string(),
            enabled: true,
        })?;
    }
    for (id, name, description) in [
        ("eq-speaker", "PA speaker", "Powered speaker with stand"),
        ("eq-microphone", "Wireless microphone", "Handheld UHF microphone"),
        ("eq-projector", "Projector", "3500 lumen LCD projector"),
        ("eq-table", "Folding table", "180 cm banquet table"),
    ] {
        store.add_equipment(Equipment {
            id: EquipmentId::from(id),
            name: name.to_string(),
            description: Some(description.to_string()),
            enabled: true,
        })?;
    }
    Ok(())
}

pub(crate) struct Wiring {
    pub(crate) service: Arc<LoanService>,
    pub(crate) store: Arc<MemoryLoanStore>,
    pub(crate) sink: Arc<TracingNotificationSink>,
}

/// Assemble the workflow service over seeded in-memory infrastructure.
pub(crate) fn build_loan_service(config: &WorkflowConfig) -> Result<Wiring, AppError> {
    let settings = Arc::new(SettingsRegistry::new(
        config.parameters.clone(),
        NotificationTemplates::default(),
    )?);

    let store = Arc::new(MemoryLoanStore::new());
    seed_catalog(&store).map_err(WorkflowError::from)?;

    let sink = Arc::new(TracingNotificationSink::new(settings.clone()));
    let effects = SideEffects::new(
        sink.clone(),
        Arc::new(StorageDocumentGenerator::default()),
        settings.clone(),
        config.side_effect_timeout,
    );
    let service = Arc::new(LoanWorkflowService::new(
        store.clone(),
        settings,
        effects,
        config.form_base_url.clone(),
    ));

    Ok(Wiring {
        service,
        store,
        sink,
    })
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loan_desk::workflows::loans::{LoanStore, Recipient, TemplateKey};

    #[test]
    fn sink_renders_templates_from_registry() {
        let sink = TracingNotificationSink::new(Arc::new(SettingsRegistry::default()));
        sink.notify(
            &Notification::new(
                TemplateKey::ApprovalNotification,
                Recipient::Applicant("student-1".into()),
            )
            .with("requestId", "req-42")
            .with("username", "Arisa"),
        )
        .expect("delivered");

        let outbox = sink.outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].0, "applicant:student-1");
        assert!(outbox[0].1.subject.contains("req-42"));
        assert!(outbox[0].1.body.contains("Arisa"));
    }

    #[test]
    fn outbox_keeps_only_the_newest_messages() {
        let sink =
            TracingNotificationSink::with_capacity(Arc::new(SettingsRegistry::default()), 2);
        for id in ["req-1", "req-2", "req-3"] {
            sink.notify(
                &Notification::new(
                    TemplateKey::ApprovalNotification,
                    Recipient::Applicant("student-1".into()),
                )
                .with("requestId", id)
                .with("username", "Arisa"),
            )
            .expect("delivered");
        }

        let subjects: Vec<_> = sink
            .outbox()
            .into_iter()
            .map(|(_, message)| message.subject)
            .collect();
        assert_eq!(subjects.len(), 2);
        assert!(subjects[0].contains("req-2"));
        assert!(subjects[1].contains("req-3"));
    }

    #[test]
    fn wiring_seeds_catalog() {
        let wiring = build_loan_service(&WorkflowConfig::default()).expect("wiring builds");
        let (buildings, equipment) = wiring
            .store
            .read(|tables| (tables.buildings.len(), tables.equipment.len()))
            .expect("read");
        assert_eq!((buildings, equipment), (3, 4));
        assert!(wiring
            .service
            .form_url("abc")
            .ends_with("/building-response/abc"));
    }

    #[test]
    fn parse_date_rejects_garbage() {
        assert!(parse_date("2025-12-01").is_ok());
        assert!(parse_date("December first").is_err());
    }
}
