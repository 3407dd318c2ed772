//! Building response collection: form access, idempotent per-building submission, aggregation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::domain::{
    BuildingId, BuildingResponse, Operator, RequestId, RequestStatus, ResponseId, ResponseItem,
    ResponseSubmission,
};
use super::errors::WorkflowError;
use super::lifecycle::{self, Caller, Transition};
use super::store::LedgerTables;
use super::tokens;
use super::views::{
    availability_totals, response_view, response_views, FormItem, ResponseAggregate,
    ResponseForm, ResponseReceipt,
};

fn ensure_accepting(status: RequestStatus, action: &'static str) -> Result<(), WorkflowError> {
    if status.accepts_building_responses() {
        Ok(())
    } else {
        Err(WorkflowError::InvalidState {
            action,
            current: status,
        })
    }
}

/// Everything a building needs to fill in (or edit) its availability.
pub fn form(
    tables: &LedgerTables,
    token: &str,
    building: Option<&BuildingId>,
    now: DateTime<Utc>,
) -> Result<ResponseForm, WorkflowError> {
    let record = tokens::resolve_usable(tables, token, now)?;
    let request = tables
        .request(&record.request_id)
        .ok_or_else(|| WorkflowError::not_found("request", &record.request_id))?;
    ensure_accepting(request.status, "open the response form for")?;

    let items = tables
        .items_for(&request.id)
        .map(|item| FormItem {
            item_id: item.id.clone(),
            equipment_name: tables.equipment_name(&item.equipment_id),
            requested_quantity: item.requested_quantity,
        })
        .collect();

    let preload = building
        .and_then(|building_id| tables.response_for_building(&record.id, building_id))
        .and_then(|response| response_view(tables, &response.id));

    Ok(ResponseForm {
        request_id: request.id.clone(),
        status: request.status,
        start_date: request.dates.start,
        end_date: request.dates.end,
        venue: request.venue.clone(),
        expires_at: record.expires_at,
        items,
        buildings: tables.enabled_buildings().cloned().collect(),
        preload,
        submitted: response_views(tables, &request.id),
    })
}

/// Record one building's availability under a token, replacing its earlier answer if any.
pub fn submit(
    tables: &mut LedgerTables,
    token: &str,
    submission: ResponseSubmission,
    ip_address: Option<String>,
    now: DateTime<Utc>,
) -> Result<ResponseReceipt, WorkflowError> {
    let (token_id, request_id) = {
        let record = tokens::resolve_usable(tables, token, now)?;
        (record.id.clone(), record.request_id.clone())
    };
    let status = tables
        .request(&request_id)
        .map(|request| request.status)
        .ok_or_else(|| WorkflowError::not_found("request", &request_id))?;
    ensure_accepting(status, "submit a building response for")?;

    let building_name = match tables.building(&submission.building_id) {
        Some(building) if building.enabled => building.name.clone(),
        _ => return Err(WorkflowError::not_found("building", &submission.building_id)),
    };
    validate_items(tables, &request_id, &submission)?;

    let existing = tables
        .response_for_building(&token_id, &submission.building_id)
        .map(|response| response.id.clone());
    let resubmitted = existing.is_some();

    let response_id = match existing {
        Some(response_id) => {
            tables
                .response_items
                .retain(|item| item.response_id != response_id);
            if let Some(response) = tables.response_mut(&response_id) {
                response.submitted_at = now;
                response.ip_address = ip_address;
            }
            response_id
        }
        None => {
            let response_id = ResponseId::generate();
            tables.responses.push(BuildingResponse {
                id: response_id.clone(),
                request_id: request_id.clone(),
                building_id: submission.building_id.clone(),
                token_id: token_id.clone(),
                submitted_at: now,
                ip_address,
            });
            if let Some(record) = tables.token_mut(&token_id) {
                record.used = true;
            }
            response_id
        }
    };

    tables
        .response_items
        .extend(submission.items.iter().map(|declared| ResponseItem {
            response_id: response_id.clone(),
            request_item_id: declared.item_id.clone(),
            available_quantity: declared.available_quantity,
        }));

    let status = if status == RequestStatus::PendingBuildingResponse {
        lifecycle::apply(
            tables,
            &request_id,
            Transition::FirstBuildingResponse,
            Caller::Building(&submission.building_id),
            Some(format!("{building_name} submitted the first availability response")),
            now,
        )?
    } else {
        let verb = if resubmitted {
            "updated its"
        } else {
            "submitted an"
        };
        lifecycle::annotate(
            tables,
            &request_id,
            Operator::Building(submission.building_id.clone()),
            format!("{building_name} {verb} availability response"),
            now,
        )?
    };

    Ok(ResponseReceipt {
        request_id,
        response_id,
        building_id: submission.building_id,
        status,
        resubmitted,
    })
}

fn validate_items(
    tables: &LedgerTables,
    request_id: &RequestId,
    submission: &ResponseSubmission,
) -> Result<(), WorkflowError> {
    if submission.items.is_empty() {
        return Err(WorkflowError::validation(
            "items",
            "at least one item must be declared",
        ));
    }

    let mut seen = BTreeSet::new();
    for (index, declared) in submission.items.iter().enumerate() {
        let belongs = tables
            .items_for(request_id)
            .any(|item| item.id == declared.item_id);
        if !belongs {
            return Err(WorkflowError::not_found("request item", &declared.item_id));
        }
        if !seen.insert(&declared.item_id) {
            return Err(WorkflowError::validation(
                format!("items[{index}].item_id"),
                "item declared more than once",
            ));
        }
    }
    Ok(())
}

/// Staff view of every response collected for a request.
pub fn aggregate(
    tables: &LedgerTables,
    request_id: &RequestId,
) -> Result<ResponseAggregate, WorkflowError> {
    let request = tables
        .request(request_id)
        .ok_or_else(|| WorkflowError::not_found("request", request_id))?;

    Ok(ResponseAggregate {
        request_id: request.id.clone(),
        status: request.status,
        responses: response_views(tables, request_id),
        totals: availability_totals(tables, request_id),
    })
}
