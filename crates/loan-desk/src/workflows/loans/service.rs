use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::access::Actor;
use super::allocation;
use super::dispatch::{DocumentGenerator, Notification, NotificationSink, Recipient, SideEffects};
use super::domain::{
    AllocationPlan, BuildingId, DateRange, LoanRequest, NewLoanRequest, RequestId, RequestItem,
    RequestItemId, RequestStatus, ResponseSubmission, UserId,
};
use super::errors::WorkflowError;
use super::lifecycle::{self, Caller, Transition};
use super::responses;
use super::settings::{SettingsError, SettingsRegistry, TemplateKey};
use super::store::{LedgerTables, LoanStore, RepositoryError};
use super::tokens::{TokenGrant, TokenIssuer};
use super::views::{
    active_tokens, item_views, AllocationOutcome, AllocationSummary, InquiryOutcome,
    RequestDetail, ResendOutcome, ResponseAggregate, ResponseForm, ResponseReceipt, StatusChange,
};

const MAX_VENUE_CHARS: usize = 100;
const DOCUMENT_WARNING: &str = "document generation failed; retry later";
const UNRECORDED_DOCUMENT_WARNING: &str =
    "document generated but its reference was not saved; resend to record it";

/// Service orchestrating the loan request lifecycle over a transactional store.
pub struct LoanWorkflowService<S, N, D> {
    store: Arc<S>,
    settings: Arc<SettingsRegistry>,
    effects: SideEffects<N, D>,
    form_base_url: String,
}

impl<S, N, D> LoanWorkflowService<S, N, D>
where
    S: LoanStore + 'static,
    N: NotificationSink + 'static,
    D: DocumentGenerator + 'static,
{
    pub fn new(
        store: Arc<S>,
        settings: Arc<SettingsRegistry>,
        effects: SideEffects<N, D>,
        form_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            settings,
            effects,
            form_base_url: form_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn settings(&self) -> &SettingsRegistry {
        &self.settings
    }

    /// Link a building manager follows to answer an inquiry.
    pub fn form_url(&self, token: &str) -> String {
        format!("{}/{}", self.form_base_url, token)
    }

    /// Create a request and its items in one unit of work.
    pub fn create_request(
        &self,
        actor: &Actor,
        input: NewLoanRequest,
    ) -> Result<StatusChange, WorkflowError> {
        actor.require_applicant()?;
        let max_items = self
            .settings
            .parameters()
            .map_err(unavailable)?
            .value
            .max_items_per_request;

        let dates = validate_intake(&input, max_items)?;
        let now = Utc::now();
        let request_id = RequestId::generate();

        self.store.transaction(|tables: &mut LedgerTables| {
            for (index, item) in input.items.iter().enumerate() {
                match tables.equipment(&item.equipment_id) {
                    Some(equipment) if equipment.enabled => {}
                    _ => {
                        return Err(WorkflowError::NotFound {
                            entity: "equipment",
                            id: format!("{} (items[{index}])", item.equipment_id),
                        })
                    }
                }
            }

            tables.requests.insert(
                request_id.clone(),
                LoanRequest {
                    id: request_id.clone(),
                    applicant: actor.user_id.clone(),
                    applicant_name: actor.name.clone(),
                    dates,
                    venue: input.venue.trim().to_string(),
                    purpose: input.purpose.trim().to_string(),
                    status: RequestStatus::PendingReview,
                    created_at: now,
                    updated_at: None,
                    notes: None,
                    document: None,
                    notification_sent: false,
                },
            );
            tables
                .items
                .extend(input.items.iter().map(|item| RequestItem {
                    id: RequestItemId::generate(),
                    request_id: request_id.clone(),
                    equipment_id: item.equipment_id.clone(),
                    requested_quantity: item.quantity,
                    approved_quantity: None,
                }));
            lifecycle::seed(tables, &request_id, actor.operator(), now);
            Ok(())
        })?;

        info!(request_id = %request_id, applicant = %actor.user_id, "loan request created");
        Ok(StatusChange {
            request_id,
            status: RequestStatus::PendingReview,
        })
    }

    pub fn request_detail(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<RequestDetail, WorkflowError> {
        self.store
            .read(|tables| {
                let request = tables
                    .request(request_id)
                    .ok_or_else(|| WorkflowError::not_found("request", request_id))?;
                actor.ensure_can_view(request)?;

                let active_tokens = if request.status.accepts_building_responses() {
                    active_tokens(tables, request_id)
                } else {
                    Vec::new()
                };

                Ok::<_, WorkflowError>(RequestDetail {
                    request: request.clone(),
                    items: item_views(tables, request_id),
                    history: tables.history_for(request_id).cloned().collect(),
                    active_tokens,
                })
            })
            .map_err(WorkflowError::from)?
    }

    /// The applicant withdraws a request that staff have not acted on yet.
    pub fn close_request(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<StatusChange, WorkflowError> {
        let status = self.store.transaction(|tables: &mut LedgerTables| {
            lifecycle::apply(
                tables,
                request_id,
                Transition::Close,
                Caller::Actor(actor),
                Some("closed by applicant".to_string()),
                Utc::now(),
            )
        })?;

        info!(request_id = %request_id, "loan request closed");
        Ok(StatusChange {
            request_id: request_id.clone(),
            status,
        })
    }

    pub fn reject_request(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        reason: &str,
    ) -> Result<StatusChange, WorkflowError> {
        let staff = actor.require_staff()?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(WorkflowError::validation(
                "reason",
                "a rejection reason is required",
            ));
        }

        let status = self.store.transaction(|tables: &mut LedgerTables| {
            let status = lifecycle::apply(
                tables,
                request_id,
                Transition::Reject,
                Caller::Staff(&staff),
                Some(reason.to_string()),
                Utc::now(),
            )?;
            if let Some(request) = tables.request_mut(request_id) {
                request.notes = Some(reason.to_string());
            }
            Ok::<_, WorkflowError>(status)
        })?;

        info!(request_id = %request_id, staff = %staff.user_id(), "loan request rejected");
        Ok(StatusChange {
            request_id: request_id.clone(),
            status,
        })
    }

    /// Open the building inquiry: move the request on, issue a token, and notify every enabled
    /// building with the form link.
    pub async fn approve_inquiry(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<InquiryOutcome, WorkflowError> {
        let staff = actor.require_staff()?;
        let issuer = self.token_issuer()?;

        let (status, grant, buildings) = self.store.transaction(|tables: &mut LedgerTables| {
            let now = Utc::now();
            let status = lifecycle::apply(
                tables,
                request_id,
                Transition::ApproveInquiry,
                Caller::Staff(&staff),
                Some("inquiry approved; buildings asked for availability".to_string()),
                now,
            )?;
            let grant = issuer.issue(tables, request_id, now)?;
            let buildings: Vec<BuildingId> =
                tables.enabled_buildings().map(|b| b.id.clone()).collect();
            Ok::<_, WorkflowError>((status, grant, buildings))
        })?;

        info!(
            request_id = %request_id,
            staff = %staff.user_id(),
            buildings = buildings.len(),
            "building inquiry opened"
        );

        let form_url = self.form_url(&grant.token);
        let mut notification_sent = false;
        for building in buildings {
            let notification = Notification::new(
                TemplateKey::BuildingRequest,
                Recipient::Building(building),
            )
            .with("formUrl", form_url.clone())
            .with("requestId", request_id.to_string());
            notification_sent |= self.effects.notify(notification).await;
        }

        Ok(InquiryOutcome {
            request_id: request_id.clone(),
            status,
            token: grant,
            notification_sent,
        })
    }

    /// Issue an additional response token for a request without changing its status.
    pub fn issue_response_token(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<TokenGrant, WorkflowError> {
        actor.require_staff()?;
        let issuer = self.token_issuer()?;
        let grant = self
            .store
            .transaction(|tables: &mut LedgerTables| issuer.issue(tables, request_id, Utc::now()))?;
        info!(request_id = %request_id, expires_at = %grant.expires_at, "response token issued");
        Ok(grant)
    }

    pub fn response_form(
        &self,
        token: &str,
        building: Option<&BuildingId>,
    ) -> Result<ResponseForm, WorkflowError> {
        self.store
            .read(|tables| responses::form(tables, token, building, Utc::now()))
            .map_err(WorkflowError::from)?
    }

    pub fn submit_response(
        &self,
        token: &str,
        submission: ResponseSubmission,
        ip_address: Option<String>,
    ) -> Result<ResponseReceipt, WorkflowError> {
        let receipt = self.store.transaction(|tables: &mut LedgerTables| {
            responses::submit(tables, token, submission, ip_address, Utc::now())
        })?;
        info!(
            request_id = %receipt.request_id,
            building_id = %receipt.building_id,
            resubmitted = receipt.resubmitted,
            status = %receipt.status,
            "building response recorded"
        );
        Ok(receipt)
    }

    pub fn building_responses(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<ResponseAggregate, WorkflowError> {
        actor.require_staff()?;
        self.store
            .read(|tables| responses::aggregate(tables, request_id))
            .map_err(WorkflowError::from)?
    }

    /// Commit the allocation plan, then generate the document and notify buildings and the
    /// applicant. Side-effect failures never undo the allocation.
    pub async fn allocate(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        plan: AllocationPlan,
    ) -> Result<AllocationOutcome, WorkflowError> {
        let staff = actor.require_staff()?;

        let (written, applicant, applicant_name, buildings) =
            self.store.transaction(|tables: &mut LedgerTables| {
                let written = allocation::apply(tables, request_id, &plan, &staff, Utc::now())?;
                let request = tables
                    .request(request_id)
                    .ok_or_else(|| WorkflowError::not_found("request", request_id))?;
                let applicant = request.applicant.clone();
                let applicant_name = request.applicant_name.clone();
                Ok::<_, WorkflowError>((
                    written,
                    applicant,
                    applicant_name,
                    allocation::allocated_buildings(tables, request_id),
                ))
            })?;

        info!(
            request_id = %request_id,
            staff = %staff.user_id(),
            allocations = written,
            "allocation committed"
        );

        let document = self.effects.generate_document(request_id).await;
        let mut warning = document.is_none().then(|| DOCUMENT_WARNING.to_string());
        if let Some(path) = &document {
            if !self.record_document(request_id, path) {
                warning = Some(UNRECORDED_DOCUMENT_WARNING.to_string());
            }
        }

        for (building_id, building_name) in buildings {
            let notification = Notification::new(
                TemplateKey::AllocationComplete,
                Recipient::Building(building_id),
            )
            .with("buildingName", building_name)
            .with("requestId", request_id.to_string());
            self.effects.notify(notification).await;
        }

        let notification_sent = match &document {
            Some(_) => {
                self.notify_applicant(request_id, applicant, applicant_name)
                    .await
            }
            None => false,
        };

        Ok(AllocationOutcome {
            request_id: request_id.clone(),
            status: RequestStatus::Completed,
            allocations_written: written,
            document,
            warning,
            notification_sent,
        })
    }

    pub fn allocation_summary(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<AllocationSummary, WorkflowError> {
        self.store
            .read(|tables| {
                let request = tables
                    .request(request_id)
                    .ok_or_else(|| WorkflowError::not_found("request", request_id))?;
                actor.ensure_can_view(request)?;
                Ok::<_, WorkflowError>(AllocationSummary {
                    request_id: request.id.clone(),
                    status: request.status,
                    document: request.document.clone(),
                    notification_sent: request.notification_sent,
                    notes: request.notes.clone(),
                    items: item_views(tables, request_id),
                })
            })
            .map_err(WorkflowError::from)?
    }

    /// Send the approval notification again, regenerating the document when none is stored.
    pub async fn resend_notification(
        &self,
        actor: &Actor,
        request_id: &RequestId,
    ) -> Result<ResendOutcome, WorkflowError> {
        actor.require_staff()?;
        let request = self
            .store
            .read(|tables| tables.request(request_id).cloned())?
            .ok_or_else(|| WorkflowError::not_found("request", request_id))?;
        if request.status != RequestStatus::Completed {
            return Err(WorkflowError::InvalidState {
                action: "resend the approval notification for",
                current: request.status,
            });
        }

        let document = match request.document {
            Some(path) => Some(path),
            None => {
                let generated = self.effects.generate_document(request_id).await;
                if let Some(path) = &generated {
                    self.record_document(request_id, path);
                }
                generated
            }
        };

        let notification_sent = match &document {
            Some(_) => {
                self.notify_applicant(request_id, request.applicant, request.applicant_name)
                    .await
            }
            None => false,
        };

        Ok(ResendOutcome {
            request_id: request_id.clone(),
            document,
            notification_sent,
        })
    }

    fn token_issuer(&self) -> Result<TokenIssuer, WorkflowError> {
        let parameters = self.settings.parameters().map_err(unavailable)?.value;
        Ok(TokenIssuer::new(parameters.response_form_validity_hours))
    }

    /// Store the document reference. Runs after the main commit, so a failure is logged and
    /// reported as `false` rather than returned.
    fn record_document(&self, request_id: &RequestId, path: &str) -> bool {
        let recorded = self.store.transaction(|tables: &mut LedgerTables| {
            if let Some(request) = tables.request_mut(request_id) {
                request.document = Some(path.to_string());
            }
            Ok::<_, WorkflowError>(())
        });
        match recorded {
            Ok(()) => true,
            Err(error) => {
                warn!(request_id = %request_id, %error, "could not record document reference");
                false
            }
        }
    }

    async fn notify_applicant(
        &self,
        request_id: &RequestId,
        applicant: UserId,
        applicant_name: String,
    ) -> bool {
        let notification = Notification::new(
            TemplateKey::ApprovalNotification,
            Recipient::Applicant(applicant),
        )
        .with("requestId", request_id.to_string())
        .with("username", applicant_name);

        let sent = self.effects.notify(notification).await;
        if sent {
            let recorded = self.store.transaction(|tables: &mut LedgerTables| {
                if let Some(request) = tables.request_mut(request_id) {
                    request.notification_sent = true;
                }
                Ok::<_, WorkflowError>(())
            });
            if let Err(error) = recorded {
                warn!(request_id = %request_id, %error, "could not record applicant notification");
            }
        }
        sent
    }
}

fn unavailable(error: SettingsError) -> WorkflowError {
    WorkflowError::Repository(RepositoryError::Unavailable(error.to_string()))
}

fn validate_intake(input: &NewLoanRequest, max_items: u32) -> Result<DateRange, WorkflowError> {
    if input.items.is_empty() {
        return Err(WorkflowError::validation(
            "items",
            "at least one item is required",
        ));
    }
    if input.items.len() > max_items as usize {
        return Err(WorkflowError::validation(
            "items",
            format!("no more than {max_items} items may be requested"),
        ));
    }
    for (index, item) in input.items.iter().enumerate() {
        if item.quantity == 0 {
            return Err(WorkflowError::validation(
                format!("items[{index}].quantity"),
                "quantity must be greater than zero",
            ));
        }
    }

    let dates = DateRange::new(input.start_date, input.end_date).ok_or_else(|| {
        WorkflowError::validation("end_date", "end date must not be before start date")
    })?;

    let venue = input.venue.trim();
    if venue.is_empty() || venue.chars().count() > MAX_VENUE_CHARS {
        return Err(WorkflowError::validation(
            "venue",
            format!("venue must be between 1 and {MAX_VENUE_CHARS} characters"),
        ));
    }
    if input.purpose.trim().is_empty() {
        return Err(WorkflowError::validation("purpose", "purpose is required"));
    }

    Ok(dates)
}
