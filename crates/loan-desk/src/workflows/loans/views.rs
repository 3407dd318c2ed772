//! Read models returned by workflow operations and serialised by the router.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::domain::{
    Building, BuildingId, EquipmentId, LoanRequest, RequestId, RequestItemId, RequestStatus,
    ResponseId, StatusHistoryEntry, UserId,
};
use super::store::LedgerTables;
use super::tokens::TokenGrant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub request_id: RequestId,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InquiryOutcome {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub token: TokenGrant,
    /// True when at least one building notification was accepted by the sink.
    pub notification_sent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationView {
    pub building_id: BuildingId,
    pub building_name: String,
    pub allocated_quantity: u32,
    pub allocated_by: UserId,
    pub allocated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemView {
    pub item_id: RequestItemId,
    pub equipment_id: EquipmentId,
    pub equipment_name: String,
    pub requested_quantity: u32,
    pub approved_quantity: Option<u32>,
    pub allocations: Vec<AllocationView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenView {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestDetail {
    pub request: LoanRequest,
    pub items: Vec<ItemView>,
    pub history: Vec<StatusHistoryEntry>,
    /// Non-finished tokens, newest first. Only populated while buildings may respond.
    pub active_tokens: Vec<TokenView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormItem {
    pub item_id: RequestItemId,
    pub equipment_name: String,
    pub requested_quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclaredItem {
    pub item_id: RequestItemId,
    pub equipment_name: String,
    pub available_quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseView {
    pub response_id: ResponseId,
    pub building_id: BuildingId,
    pub building_name: String,
    pub submitted_at: DateTime<Utc>,
    pub items: Vec<DeclaredItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseForm {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub venue: String,
    pub expires_at: DateTime<Utc>,
    pub items: Vec<FormItem>,
    pub buildings: Vec<Building>,
    /// The editing building's earlier answer under this token.
    pub preload: Option<ResponseView>,
    pub submitted: Vec<ResponseView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseReceipt {
    pub request_id: RequestId,
    pub response_id: ResponseId,
    pub building_id: BuildingId,
    pub status: RequestStatus,
    pub resubmitted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemAvailability {
    pub item_id: RequestItemId,
    pub equipment_name: String,
    pub requested_quantity: u32,
    /// Sum over every building's declaration; wide enough that no mix of `u32` answers overflows.
    pub total_available: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseAggregate {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub responses: Vec<ResponseView>,
    pub totals: Vec<ItemAvailability>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationOutcome {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub allocations_written: usize,
    pub document: Option<String>,
    pub warning: Option<String>,
    pub notification_sent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationSummary {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub document: Option<String>,
    pub notification_sent: bool,
    pub notes: Option<String>,
    pub items: Vec<ItemView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResendOutcome {
    pub request_id: RequestId,
    pub document: Option<String>,
    pub notification_sent: bool,
}

pub(crate) fn item_views(tables: &LedgerTables, request_id: &RequestId) -> Vec<ItemView> {
    tables
        .items_for(request_id)
        .map(|item| ItemView {
            item_id: item.id.clone(),
            equipment_id: item.equipment_id.clone(),
            equipment_name: tables.equipment_name(&item.equipment_id),
            requested_quantity: item.requested_quantity,
            approved_quantity: item.approved_quantity,
            allocations: tables
                .allocations_of(&item.id)
                .map(|allocation| AllocationView {
                    building_id: allocation.building_id.clone(),
                    building_name: tables.building_name(&allocation.building_id),
                    allocated_quantity: allocation.allocated_quantity,
                    allocated_by: allocation.allocated_by.clone(),
                    allocated_at: allocation.allocated_at,
                })
                .collect(),
        })
        .collect()
}

pub(crate) fn response_view(
    tables: &LedgerTables,
    response_id: &ResponseId,
) -> Option<ResponseView> {
    let response = tables
        .responses
        .iter()
        .find(|response| &response.id == response_id)?;
    let items = tables
        .response_items_of(&response.id)
        .map(|declared| DeclaredItem {
            item_id: declared.request_item_id.clone(),
            equipment_name: tables
                .items
                .iter()
                .find(|item| item.id == declared.request_item_id)
                .map(|item| tables.equipment_name(&item.equipment_id))
                .unwrap_or_else(|| declared.request_item_id.to_string()),
            available_quantity: declared.available_quantity,
        })
        .collect();

    Some(ResponseView {
        response_id: response.id.clone(),
        building_id: response.building_id.clone(),
        building_name: tables.building_name(&response.building_id),
        submitted_at: response.submitted_at,
        items,
    })
}

/// All responses for a request, newest submission first. Ties keep the later insertion first.
pub(crate) fn response_views(tables: &LedgerTables, request_id: &RequestId) -> Vec<ResponseView> {
    let mut views: Vec<ResponseView> = tables
        .responses_for(request_id)
        .filter_map(|response| response_view(tables, &response.id))
        .collect();
    views.reverse();
    views.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
    views
}

pub(crate) fn availability_totals(
    tables: &LedgerTables,
    request_id: &RequestId,
) -> Vec<ItemAvailability> {
    let mut totals: BTreeMap<&RequestItemId, u64> = BTreeMap::new();
    for response in tables.responses_for(request_id) {
        for declared in tables.response_items_of(&response.id) {
            let total = totals.entry(&declared.request_item_id).or_default();
            *total = total.saturating_add(u64::from(declared.available_quantity));
        }
    }

    tables
        .items_for(request_id)
        .map(|item| ItemAvailability {
            item_id: item.id.clone(),
            equipment_name: tables.equipment_name(&item.equipment_id),
            requested_quantity: item.requested_quantity,
            total_available: totals.get(&item.id).copied().unwrap_or(0),
        })
        .collect()
}

pub(crate) fn active_tokens(tables: &LedgerTables, request_id: &RequestId) -> Vec<TokenView> {
    let mut tokens: Vec<TokenView> = tables
        .tokens_for(request_id)
        .filter(|record| !record.finished)
        .map(|record| TokenView {
            token: record.token.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            used: record.used,
        })
        .collect();
    tokens.reverse();
    tokens.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    tokens
}
