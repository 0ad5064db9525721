//! Bearer-token claims and caller roles.
//!
//! Identity is asserted by an upstream login; this module only signs and
//! verifies the access tokens that carry it.

pub mod jwt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::pass::Stage;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),
}

/// Caller role carried in the access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Guard,
    HostelOffice,
    OfficeSecretary,
    Dugc,
    Hod,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Guard => "guard",
            Role::HostelOffice => "hostel_office",
            Role::OfficeSecretary => "office_secretary",
            Role::Dugc => "dugc",
            Role::Hod => "hod",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AuthError> {
        match s {
            "student" => Ok(Role::Student),
            "guard" => Ok(Role::Guard),
            "hostel_office" => Ok(Role::HostelOffice),
            "office_secretary" => Ok(Role::OfficeSecretary),
            "dugc" => Ok(Role::Dugc),
            "hod" => Ok(Role::Hod),
            "admin" => Ok(Role::Admin),
            other => Err(AuthError::UnknownRole(other.to_string())),
        }
    }

    /// Approval stage this role decides, if it is a reviewer role.
    pub fn reviews(&self) -> Option<Stage> {
        match self {
            Role::HostelOffice => Some(Stage::HostelOffice),
            Role::OfficeSecretary => Some(Stage::OfficeSecretary),
            Role::Dugc => Some(Stage::Dugc),
            Role::Hod => Some(Stage::Hod),
            Role::Student | Role::Guard | Role::Admin => None,
        }
    }
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: student id for students, staff id otherwise.
    pub sub: String,
    pub email: String,
    /// Role names, e.g. `["guard"]`.
    pub roles: Vec<String>,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
}

impl TokenClaims {
    /// Known roles in the claims; unknown names are ignored.
    pub fn roles(&self) -> Vec<Role> {
        self.roles.iter().filter_map(|r| Role::parse(r).ok()).collect()
    }
}
