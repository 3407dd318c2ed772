use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

record_id!(
    /// Identifier of a loan request.
    RequestId
);
record_id!(
    /// Identifier of a line item inside a loan request.
    RequestItemId
);
record_id!(BuildingId);
record_id!(EquipmentId);
record_id!(
    /// Reference to an authenticated user (applicant or staff).
    UserId
);
record_id!(TokenId);
record_id!(ResponseId);
record_id!(AllocationId);

/// Lifecycle status of a loan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    PendingReview,
    PendingBuildingResponse,
    PendingAllocation,
    Completed,
    Rejected,
    Closed,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        RequestStatus::PendingReview,
        RequestStatus::PendingBuildingResponse,
        RequestStatus::PendingAllocation,
        RequestStatus::Completed,
        RequestStatus::Rejected,
        RequestStatus::Closed,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            RequestStatus::PendingReview => "pending_review",
            RequestStatus::PendingBuildingResponse => "pending_building_response",
            RequestStatus::PendingAllocation => "pending_allocation",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Closed => "closed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Rejected | RequestStatus::Closed
        )
    }

    /// Buildings may answer while the inquiry is open and after the first answer moved the
    /// request on to allocation.
    pub const fn accepts_building_responses(self) -> bool {
        matches!(
            self,
            RequestStatus::PendingBuildingResponse | RequestStatus::PendingAllocation
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inclusive borrowing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// The central aggregate: an applicant's equipment borrowing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRequest {
    pub id: RequestId,
    pub applicant: UserId,
    pub applicant_name: String,
    pub dates: DateRange,
    pub venue: String,
    pub purpose: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub document: Option<String>,
    pub notification_sent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestItem {
    pub id: RequestItemId,
    pub request_id: RequestId,
    pub equipment_id: EquipmentId,
    pub requested_quantity: u32,
    /// `None` until allocated; `Some(0)` means the item was not approved.
    pub approved_quantity: Option<u32>,
}

/// Who performed a recorded transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Operator {
    User(UserId),
    Building(BuildingId),
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::User(id) => write!(f, "user:{id}"),
            Operator::Building(id) => write!(f, "building:{id}"),
        }
    }
}

/// Append-only audit row written for every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub timestamp: DateTime<Utc>,
    pub operator: Operator,
    pub notes: Option<String>,
}

/// Time-limited credential letting buildings answer an inquiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseToken {
    pub id: TokenId,
    pub request_id: RequestId,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub finished: bool,
}

impl ResponseToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// One building's availability declaration under one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingResponse {
    pub id: ResponseId,
    pub request_id: RequestId,
    pub building_id: BuildingId,
    pub token_id: TokenId,
    pub submitted_at: DateTime<Utc>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseItem {
    pub response_id: ResponseId,
    pub request_item_id: RequestItemId,
    pub available_quantity: u32,
}

/// Final assignment of part of an approved quantity to one building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub request_item_id: RequestItemId,
    pub building_id: BuildingId,
    pub allocated_quantity: u32,
    pub allocated_by: UserId,
    pub allocated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    pub id: BuildingId,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: EquipmentId,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
}

/// Applicant input for a new request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLoanRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub venue: String,
    pub purpose: String,
    pub items: Vec<RequestedEquipment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedEquipment {
    pub equipment_id: EquipmentId,
    pub quantity: u32,
}

/// A building's answer submitted through a response token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSubmission {
    pub building_id: BuildingId,
    pub items: Vec<AvailabilityDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityDeclaration {
    pub item_id: RequestItemId,
    pub available_quantity: u32,
}

/// Staff input for the allocation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub allocations: Vec<ItemAllocation>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAllocation {
    pub item_id: RequestItemId,
    pub approved_quantity: u32,
    #[serde(default)]
    pub building_allocations: Vec<BuildingAllocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingAllocation {
    pub building_id: BuildingId,
    pub allocated_quantity: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_range_rejects_inverted_window() {
        let start = NaiveDate::from_ymd_opt(2025, 5, 10).expect("valid");
        let end = NaiveDate::from_ymd_opt(2025, 5, 9).expect("valid");
        assert!(DateRange::new(start, end).is_none());
        assert_eq!(DateRange::new(start, start).map(|range| range.days()), Some(1));
    }

    #[test]
    fn status_labels_match_wire_format() {
        for status in RequestStatus::ALL {
            let json = serde_json::to_value(status).expect("serializes");
            assert_eq!(json, serde_json::Value::String(status.label().to_string()));
        }
    }

    #[test]
    fn only_inquiry_statuses_accept_responses() {
        let accepting: Vec<_> = RequestStatus::ALL
            .into_iter()
            .filter(|status| status.accepts_building_responses())
            .collect();
        assert_eq!(
            accepting,
            vec![
                RequestStatus::PendingBuildingResponse,
                RequestStatus::PendingAllocation
            ]
        );
    }
}
