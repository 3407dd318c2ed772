//! Request state machine and its status-history ledger.
//!
//! ```text
//! pending_review -> pending_building_response -> pending_allocation -> completed
//!       |-> rejected
//!       `-> closed
//! ```

use chrono::{DateTime, Utc};

use super::access::{Actor, StaffContext};
use super::domain::{BuildingId, Operator, RequestId, RequestStatus, StatusHistoryEntry};
use super::errors::WorkflowError;
use super::store::LedgerTables;

/// Who is allowed to fire a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Only the applicant who owns the request.
    Owner,
    Staff,
    /// A building holding a valid response token.
    TokenHolder,
}

impl Trigger {
    const fn refusal(self) -> &'static str {
        match self {
            Trigger::Owner => "only the applicant who filed the request may do this",
            Trigger::Staff => "staff role required",
            Trigger::TokenHolder => "only a building holding a response token may do this",
        }
    }
}

/// The party asking for a transition. Checked against [`Transition::trigger`].
#[derive(Debug, Clone, Copy)]
pub enum Caller<'a> {
    Actor(&'a Actor),
    Staff(&'a StaffContext),
    /// A building whose response token was already resolved by the caller.
    Building(&'a BuildingId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Close,
    Reject,
    ApproveInquiry,
    FirstBuildingResponse,
    Allocate,
}

impl Transition {
    pub const fn source(self) -> RequestStatus {
        match self {
            Transition::Close | Transition::Reject | Transition::ApproveInquiry => {
                RequestStatus::PendingReview
            }
            Transition::FirstBuildingResponse => RequestStatus::PendingBuildingResponse,
            Transition::Allocate => RequestStatus::PendingAllocation,
        }
    }

    pub const fn target(self) -> RequestStatus {
        match self {
            Transition::Close => RequestStatus::Closed,
            Transition::Reject => RequestStatus::Rejected,
            Transition::ApproveInquiry => RequestStatus::PendingBuildingResponse,
            Transition::FirstBuildingResponse => RequestStatus::PendingAllocation,
            Transition::Allocate => RequestStatus::Completed,
        }
    }

    pub const fn trigger(self) -> Trigger {
        match self {
            Transition::Close => Trigger::Owner,
            Transition::Reject | Transition::ApproveInquiry | Transition::Allocate => {
                Trigger::Staff
            }
            Transition::FirstBuildingResponse => Trigger::TokenHolder,
        }
    }

    pub const fn action(self) -> &'static str {
        match self {
            Transition::Close => "close",
            Transition::Reject => "reject",
            Transition::ApproveInquiry => "approve the inquiry for",
            Transition::FirstBuildingResponse => "record a first building response for",
            Transition::Allocate => "allocate equipment for",
        }
    }
}

/// Check the caller against who may fire the transition and name the operator to record.
pub fn authorize(
    tables: &LedgerTables,
    request_id: &RequestId,
    transition: Transition,
    caller: Caller<'_>,
) -> Result<Operator, WorkflowError> {
    let request = tables
        .request(request_id)
        .ok_or_else(|| WorkflowError::not_found("request", request_id))?;

    let trigger = transition.trigger();
    let operator = match (trigger, caller) {
        (Trigger::Owner, Caller::Actor(actor)) if actor.owns(request) => Some(actor.operator()),
        (Trigger::Staff, Caller::Staff(staff)) => Some(staff.operator()),
        (Trigger::Staff, Caller::Actor(actor)) => actor.staff().map(|staff| staff.operator()),
        (Trigger::TokenHolder, Caller::Building(building)) => {
            Some(Operator::Building(building.clone()))
        }
        _ => None,
    };
    operator.ok_or(WorkflowError::Forbidden(trigger.refusal()))
}

/// Fail with `InvalidState` unless the request currently sits in the transition's source state.
pub fn ensure_source(
    tables: &LedgerTables,
    request_id: &RequestId,
    transition: Transition,
) -> Result<(), WorkflowError> {
    let request = tables
        .request(request_id)
        .ok_or_else(|| WorkflowError::not_found("request", request_id))?;
    if request.status != transition.source() {
        return Err(WorkflowError::InvalidState {
            action: transition.action(),
            current: request.status,
        });
    }
    Ok(())
}

/// Move the request along one edge and append exactly one history entry. The caller is
/// checked before the current status.
pub fn apply(
    tables: &mut LedgerTables,
    request_id: &RequestId,
    transition: Transition,
    caller: Caller<'_>,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<RequestStatus, WorkflowError> {
    let operator = authorize(tables, request_id, transition, caller)?;
    ensure_source(tables, request_id, transition)?;

    let target = transition.target();
    if let Some(request) = tables.request_mut(request_id) {
        request.status = target;
        request.updated_at = Some(now);
    }
    append(tables, request_id, target, operator, notes, now);
    Ok(target)
}

/// Record an event that does not change the status.
pub fn annotate(
    tables: &mut LedgerTables,
    request_id: &RequestId,
    operator: Operator,
    notes: String,
    now: DateTime<Utc>,
) -> Result<RequestStatus, WorkflowError> {
    let status = tables
        .request(request_id)
        .map(|request| request.status)
        .ok_or_else(|| WorkflowError::not_found("request", request_id))?;
    append(tables, request_id, status, operator, Some(notes), now);
    Ok(status)
}

/// Seed the ledger of a freshly created request.
pub(crate) fn seed(
    tables: &mut LedgerTables,
    request_id: &RequestId,
    operator: Operator,
    now: DateTime<Utc>,
) {
    append(
        tables,
        request_id,
        RequestStatus::PendingReview,
        operator,
        Some("request created".to_string()),
        now,
    );
}

fn append(
    tables: &mut LedgerTables,
    request_id: &RequestId,
    status: RequestStatus,
    operator: Operator,
    notes: Option<String>,
    timestamp: DateTime<Utc>,
) {
    tables.history.push(StatusHistoryEntry {
        request_id: request_id.clone(),
        status,
        timestamp,
        operator,
        notes,
    });
}
