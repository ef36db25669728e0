//! Application types

use serde::{Deserialize, Serialize};
use server_fn_rpc::{Validate, ValidationIssue, ValidationResult};

// =============================================================================
// User Types
// =============================================================================

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u32,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

impl User {
    pub fn new(id: u32, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Input for getting a user by ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUserInput {
    pub id: u32,
}

/// Input for creating a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserInput {
    pub name: String,
    pub email: String,
}

impl Validate for CreateUserInput {
    fn validate(&self) -> ValidationResult {
        let mut issues = Vec::new();
        if self.name.trim().is_empty() {
            issues.push(ValidationIssue::required("name"));
        }
        if !self.email.contains('@') {
            issues.push(ValidationIssue::invalid("email", "Invalid email format"));
        }
        ValidationResult::from_issues(issues)
    }
}

/// Input for updating a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUserInput {
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Validate for UpdateUserInput {
    fn validate(&self) -> ValidationResult {
        match &self.email {
            Some(email) if !email.contains('@') => ValidationResult::from_issues(vec![
                ValidationIssue::invalid("email", "Invalid email format"),
            ]),
            _ => ValidationResult::ok(),
        }
    }
}

/// Input for deleting a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUserInput {
    pub id: u32,
}

// =============================================================================
// General Types
// =============================================================================

/// Input for greeting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreetInput {
    pub name: String,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Generic acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

impl SuccessResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}
