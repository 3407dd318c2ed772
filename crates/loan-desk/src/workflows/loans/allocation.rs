use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::access::StaffContext;
use super::domain::{Allocation, AllocationId, AllocationPlan, BuildingId, RequestId};
use super::errors::WorkflowError;
use super::lifecycle::{self, Caller, Transition};
use super::store::LedgerTables;
use super::tokens;

const DEFAULT_NOTE: &str = "allocation completed";

/// Check every item of the plan before anything is written.
pub fn validate_plan(
    tables: &LedgerTables,
    request_id: &RequestId,
    plan: &AllocationPlan,
) -> Result<(), WorkflowError> {
    if plan.allocations.is_empty() {
        return Err(WorkflowError::validation(
            "allocations",
            "at least one item allocation is required",
        ));
    }

    let mut seen = BTreeSet::new();
    for (index, entry) in plan.allocations.iter().enumerate() {
        if !tables
            .items_for(request_id)
            .any(|item| item.id == entry.item_id)
        {
            return Err(WorkflowError::not_found("request item", &entry.item_id));
        }
        if !seen.insert(&entry.item_id) {
            return Err(WorkflowError::validation(
                format!("allocations[{index}].item_id"),
                "item allocated more than once",
            ));
        }

        let field = format!("allocations[{index}].building_allocations");
        for (position, share) in entry.building_allocations.iter().enumerate() {
            if tables.building(&share.building_id).is_none() {
                return Err(WorkflowError::not_found("building", &share.building_id));
            }
            if share.allocated_quantity == 0 {
                return Err(WorkflowError::validation(
                    format!("{field}[{position}].allocated_quantity"),
                    "allocated quantity must be greater than zero",
                ));
            }
        }

        match (entry.approved_quantity, entry.building_allocations.is_empty()) {
            (0, false) => {
                return Err(WorkflowError::validation(
                    field,
                    "an item approved with quantity 0 cannot have building allocations",
                ))
            }
            (0, true) => {}
            (_, true) => {
                return Err(WorkflowError::validation(
                    field,
                    "an approved item needs at least one building allocation",
                ))
            }
            (approved, false) => {
                let total: u64 = entry
                    .building_allocations
                    .iter()
                    .map(|share| u64::from(share.allocated_quantity))
                    .sum();
                if total != u64::from(approved) {
                    return Err(WorkflowError::validation(
                        field,
                        format!(
                            "allocated total {total} does not match approved quantity {approved}"
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Write the plan, complete the request, and close every response token. Returns the number of
/// allocation rows written.
pub fn apply(
    tables: &mut LedgerTables,
    request_id: &RequestId,
    plan: &AllocationPlan,
    staff: &StaffContext,
    now: DateTime<Utc>,
) -> Result<usize, WorkflowError> {
    lifecycle::ensure_source(tables, request_id, Transition::Allocate)?;
    validate_plan(tables, request_id, plan)?;

    let mut written = 0;
    for entry in &plan.allocations {
        if let Some(item) = tables.item_mut(&entry.item_id) {
            item.approved_quantity = Some(entry.approved_quantity);
        }
        tables
            .allocations
            .retain(|allocation| allocation.request_item_id != entry.item_id);
        if entry.approved_quantity == 0 {
            continue;
        }
        for share in &entry.building_allocations {
            tables.allocations.push(Allocation {
                id: AllocationId::generate(),
                request_item_id: entry.item_id.clone(),
                building_id: share.building_id.clone(),
                allocated_quantity: share.allocated_quantity,
                allocated_by: staff.user_id().clone(),
                allocated_at: now,
            });
            written += 1;
        }
    }

    let notes = plan
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|notes| !notes.is_empty())
        .map(str::to_string);
    if let Some(request) = tables.request_mut(request_id) {
        if notes.is_some() {
            request.notes = notes.clone();
        }
    }

    lifecycle::apply(
        tables,
        request_id,
        Transition::Allocate,
        Caller::Staff(staff),
        Some(notes.unwrap_or_else(|| DEFAULT_NOTE.to_string())),
        now,
    )?;
    tokens::finish_all(tables, request_id);

    Ok(written)
}

/// Distinct buildings that received a non-zero allocation for the request, with their names.
pub fn allocated_buildings(
    tables: &LedgerTables,
    request_id: &RequestId,
) -> Vec<(BuildingId, String)> {
    let mut seen = BTreeSet::new();
    let mut buildings = Vec::new();
    for item in tables.items_for(request_id) {
        for allocation in tables.allocations_of(&item.id) {
            if allocation.allocated_quantity > 0 && seen.insert(allocation.building_id.clone()) {
                buildings.push((
                    allocation.building_id.clone(),
                    tables.building_name(&allocation.building_id),
                ));
            }
        }
    }
    buildings
}
