use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::workflows::loans::{
    loan_router, Actor, AvailabilityDeclaration, Building, BuildingId, DispatchError,
    DocumentGenerator, Equipment, EquipmentId, LedgerTables, LoanStore, LoanWorkflowService,
    MemoryLoanStore, NewLoanRequest, Notification, NotificationSink, RepositoryError, RequestId,
    RequestItemId, RequestedEquipment, ResponseSubmission, SettingsRegistry, SideEffects,
};

pub(super) const SCIENCE: &str = "b-science";
pub(super) const ARTS: &str = "b-arts";
pub(super) const OLD_GYM: &str = "b-old-gym";
pub(super) const CHAIRS: &str = "eq-chairs";
pub(super) const PROJECTORS: &str = "eq-projectors";
pub(super) const RETIRED: &str = "eq-retired";

pub(super) type TestService<D = StoredDocuments> =
    LoanWorkflowService<MemoryLoanStore, RecordingSink, D>;

pub(super) fn applicant() -> Actor {
    Actor::applicant("u-applicant", "Kanya")
}

pub(super) fn other_applicant() -> Actor {
    Actor::applicant("u-other", "Somsak")
}

pub(super) fn staff() -> Actor {
    Actor::academic_staff("u-staff", "Dr. Wichai")
}

pub(super) fn seeded_store() -> Arc<MemoryLoanStore> {
    let store = MemoryLoanStore::new();
    for (id, name, enabled) in [
        (SCIENCE, "Science Building", true),
        (ARTS, "Arts Building", true),
        (OLD_GYM, "Old Gym", false),
    ] {
        store
            .add_building(Building {
                id: BuildingId::from(id),
                name: name.to_string(),
                enabled,
            })
            .expect("building seeded");
    }
    for (id, name, enabled) in [
        (CHAIRS, "Folding chair", true),
        (PROJECTORS, "Projector", true),
        (RETIRED, "Overhead projector", false),
    ] {
        store
            .add_equipment(Equipment {
                id: EquipmentId::from(id),
                name: name.to_string(),
                description: None,
                enabled,
            })
            .expect("equipment seeded");
    }
    Arc::new(store)
}

pub(super) fn build_service() -> (TestService, Arc<MemoryLoanStore>, Arc<RecordingSink>) {
    build_service_with(StoredDocuments)
}

pub(super) fn build_service_with<D>(
    documents: D,
) -> (TestService<D>, Arc<MemoryLoanStore>, Arc<RecordingSink>)
where
    D: DocumentGenerator + 'static,
{
    build_service_with_settings(documents, SettingsRegistry::default())
}

pub(super) fn build_service_with_settings<D>(
    documents: D,
    settings: SettingsRegistry,
) -> (TestService<D>, Arc<MemoryLoanStore>, Arc<RecordingSink>)
where
    D: DocumentGenerator + 'static,
{
    let store = seeded_store();
    let sink = Arc::new(RecordingSink::default());
    let settings = Arc::new(settings);
    let effects = SideEffects::new(
        sink.clone(),
        Arc::new(documents),
        settings.clone(),
        Duration::from_secs(2),
    );
    let service = LoanWorkflowService::new(
        store.clone(),
        settings,
        effects,
        "https://loans.example.edu/respond",
    );
    (service, store, sink)
}

pub(super) fn new_request() -> NewLoanRequest {
    NewLoanRequest {
        start_date: NaiveDate::from_ymd_opt(2025, 11, 3).expect("valid date"),
        end_date: NaiveDate::from_ymd_opt(2025, 11, 5).expect("valid date"),
        venue: "Convention Hall".to_string(),
        purpose: "Faculty open house".to_string(),
        items: vec![
            RequestedEquipment {
                equipment_id: EquipmentId::from(CHAIRS),
                quantity: 5,
            },
            RequestedEquipment {
                equipment_id: EquipmentId::from(PROJECTORS),
                quantity: 3,
            },
        ],
    }
}

/// Item ids of a request in the order they were requested.
pub(super) fn item_ids(store: &MemoryLoanStore, request_id: &RequestId) -> Vec<RequestItemId> {
    store
        .read(|tables| {
            tables
                .items_for(request_id)
                .map(|item| item.id.clone())
                .collect()
        })
        .expect("read items")
}

pub(super) fn declaration(
    building: &str,
    quantities: &[(&RequestItemId, u32)],
) -> ResponseSubmission {
    ResponseSubmission {
        building_id: BuildingId::from(building),
        items: quantities
            .iter()
            .map(|(item_id, available_quantity)| AvailabilityDeclaration {
                item_id: (*item_id).clone(),
                available_quantity: *available_quantity,
            })
            .collect(),
    }
}

/// Create a request and open the inquiry. Returns the request, its token, and its item ids.
pub(super) async fn open_inquiry<D>(
    service: &TestService<D>,
    store: &MemoryLoanStore,
) -> (RequestId, String, Vec<RequestItemId>)
where
    D: DocumentGenerator + 'static,
{
    let created = service
        .create_request(&applicant(), new_request())
        .expect("request created");
    let inquiry = service
        .approve_inquiry(&staff(), &created.request_id)
        .await
        .expect("inquiry approved");
    let items = item_ids(store, &created.request_id);
    (created.request_id, inquiry.token.token, items)
}

/// Open the inquiry and record the first building's answer so the request awaits allocation.
pub(super) async fn awaiting_allocation<D>(
    service: &TestService<D>,
    store: &MemoryLoanStore,
) -> (RequestId, String, Vec<RequestItemId>)
where
    D: DocumentGenerator + 'static,
{
    let (request_id, token, items) = open_inquiry(service, store).await;
    service
        .submit_response(
            &token,
            declaration(SCIENCE, &[(&items[0], 3), (&items[1], 3)]),
            Some("10.0.0.8".to_string()),
        )
        .expect("science responded");
    service
        .submit_response(
            &token,
            declaration(ARTS, &[(&items[0], 2), (&items[1], 0)]),
            None,
        )
        .expect("arts responded");
    (request_id, token, items)
}

#[derive(Default)]
pub(super) struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub(super) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("sink mutex poisoned").clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: &Notification) -> Result<(), DispatchError> {
        self.sent
            .lock()
            .expect("sink mutex poisoned")
            .push(notification.clone());
        Ok(())
    }
}

pub(super) struct StoredDocuments;

impl DocumentGenerator for StoredDocuments {
    fn generate(&self, request_id: &RequestId) -> Result<String, DispatchError> {
        Ok(format!("storage/requests/{request_id}.pdf"))
    }
}

pub(super) struct BrokenDocuments;

impl DocumentGenerator for BrokenDocuments {
    fn generate(&self, _request_id: &RequestId) -> Result<String, DispatchError> {
        Err(DispatchError::Failed("renderer offline".to_string()))
    }
}

pub(super) struct UnavailableStore;

impl LoanStore for UnavailableStore {
    fn read<T>(&self, _query: impl FnOnce(&LedgerTables) -> T) -> Result<T, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn transaction<T, E>(
        &self,
        _work: impl FnOnce(&mut LedgerTables) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<RepositoryError>,
    {
        Err(RepositoryError::Unavailable("database offline".to_string()).into())
    }
}

/// Passes reads through to a shared store but lets only a fixed number of transactions commit.
pub(super) struct FlakyStore {
    inner: Arc<MemoryLoanStore>,
    commits_left: AtomicUsize,
}

impl FlakyStore {
    pub(super) fn new(inner: Arc<MemoryLoanStore>, commits: usize) -> Self {
        Self {
            inner,
            commits_left: AtomicUsize::new(commits),
        }
    }
}

impl LoanStore for FlakyStore {
    fn read<T>(&self, query: impl FnOnce(&LedgerTables) -> T) -> Result<T, RepositoryError> {
        self.inner.read(query)
    }

    fn transaction<T, E>(
        &self,
        work: impl FnOnce(&mut LedgerTables) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<RepositoryError>,
    {
        let admitted = self
            .commits_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if admitted.is_err() {
            return Err(RepositoryError::Unavailable("connection dropped".to_string()).into());
        }
        self.inner.transaction(work)
    }
}

/// A service over an arbitrary store, with the default settings and stored documents.
pub(super) fn build_service_over<S>(
    store: S,
) -> (
    LoanWorkflowService<S, RecordingSink, StoredDocuments>,
    Arc<RecordingSink>,
)
where
    S: LoanStore + 'static,
{
    let settings = Arc::new(SettingsRegistry::default());
    let sink = Arc::new(RecordingSink::default());
    let effects = SideEffects::new(
        sink.clone(),
        Arc::new(StoredDocuments),
        settings.clone(),
        Duration::from_secs(2),
    );
    let service = LoanWorkflowService::new(
        Arc::new(store),
        settings,
        effects,
        "https://loans.example.edu/respond",
    );
    (service, sink)
}

pub(super) fn unavailable_router() -> axum::Router {
    let settings = Arc::new(SettingsRegistry::default());
    let effects = SideEffects::new(
        Arc::new(RecordingSink::default()),
        Arc::new(StoredDocuments),
        settings.clone(),
        Duration::from_secs(1),
    );
    loan_router(Arc::new(LoanWorkflowService::new(
        Arc::new(UnavailableStore),
        settings,
        effects,
        "https://loans.example.edu/respond",
    )))
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
