//! Equipment loan requests: intake, building availability inquiry, allocation, and the
//! notifications that follow.
//!
//! Every state-changing operation runs as one [`LoanStore::transaction`]; notification and
//! document side effects run after commit through [`SideEffects`] and never undo it.

pub mod access;
pub mod allocation;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod lifecycle;
pub mod responses;
pub mod router;
pub mod service;
pub mod settings;
pub mod store;
pub mod tokens;
pub mod views;

#[cfg(test)]
mod tests;

pub use access::{Actor, Role, StaffContext};
pub use dispatch::{
    DispatchError, DocumentGenerator, Notification, NotificationSink, Recipient, SideEffects,
};
pub use domain::{
    Allocation, AllocationPlan, AvailabilityDeclaration, Building, BuildingAllocation,
    BuildingId, BuildingResponse, DateRange, Equipment, EquipmentId, ItemAllocation, LoanRequest,
    NewLoanRequest, Operator, RequestId, RequestItem, RequestItemId, RequestStatus,
    RequestedEquipment, ResponseSubmission, ResponseToken, StatusHistoryEntry, UserId,
};
pub use errors::WorkflowError;
pub use lifecycle::{Caller, Transition, Trigger};
pub use router::{error_response, loan_router};
pub use service::LoanWorkflowService;
pub use settings::{
    MessageTemplate, NotificationTemplates, RenderedMessage, SettingsError, SettingsRegistry,
    SystemParameters, TemplateKey, Versioned,
};
pub use store::{LedgerTables, LoanStore, MemoryLoanStore, RepositoryError};
pub use tokens::{TokenGrant, TokenIssuer};
pub use views::{
    AllocationOutcome, AllocationSummary, InquiryOutcome, ItemAvailability, ItemView,
    RequestDetail, ResendOutcome, ResponseAggregate, ResponseForm, ResponseReceipt, ResponseView,
    StatusChange,
};
