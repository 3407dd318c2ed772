use serde::{Deserialize, Serialize};

use super::domain::{LoanRequest, Operator, UserId};
use super::errors::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Applicant,
    AcademicStaff,
    SystemAdmin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "applicant" => Some(Role::Applicant),
            "academic_staff" | "staff" => Some(Role::AcademicStaff),
            "system_admin" | "admin" => Some(Role::SystemAdmin),
            _ => None,
        }
    }

    pub const fn is_staff(self) -> bool {
        matches!(self, Role::AcademicStaff | Role::SystemAdmin)
    }
}

/// An authenticated caller as presented by the upstream gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub name: String,
    pub roles: Vec<Role>,
}

/// Proof that the caller holds a staff role. Staff operations take one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffContext {
    user_id: UserId,
}

impl StaffContext {
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn operator(&self) -> Operator {
        Operator::User(self.user_id.clone())
    }
}

impl Actor {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            name: name.into(),
            roles,
        }
    }

    pub fn applicant(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(user_id, name, vec![Role::Applicant])
    }

    pub fn academic_staff(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(user_id, name, vec![Role::AcademicStaff])
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn staff(&self) -> Option<StaffContext> {
        self.roles.iter().any(|role| role.is_staff()).then(|| StaffContext {
            user_id: self.user_id.clone(),
        })
    }

    pub fn operator(&self) -> Operator {
        Operator::User(self.user_id.clone())
    }

    pub(crate) fn require_staff(&self) -> Result<StaffContext, WorkflowError> {
        self.staff()
            .ok_or(WorkflowError::Forbidden("staff role required"))
    }

    pub(crate) fn require_applicant(&self) -> Result<(), WorkflowError> {
        if self.has_role(Role::Applicant) {
            Ok(())
        } else {
            Err(WorkflowError::Forbidden("applicant role required"))
        }
    }

    pub(crate) fn owns(&self, request: &LoanRequest) -> bool {
        request.applicant == self.user_id
    }

    /// Owners and staff may read a request.
    pub(crate) fn ensure_can_view(&self, request: &LoanRequest) -> Result<(), WorkflowError> {
        if self.owns(request) || self.staff().is_some() {
            Ok(())
        } else {
            Err(WorkflowError::Forbidden("only the applicant or staff may view this request"))
        }
    }
}
