use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use warden_core::claims::RoleClaims;
use warden_core::tuple::{PermissionCheck, PermissionResult, RelationTuple, Subject, SubjectError, SubjectSet};

use crate::permissions::PublicCheckInput;
use crate::roles::RoleChange;

#[derive(Debug, Deserialize)]
pub struct PublicCheckRequest {
    pub namespace: String,
    pub object: String,
    pub relation: String,
}

impl From<PublicCheckRequest> for PublicCheckInput {
    fn from(req: PublicCheckRequest) -> Self {
        Self {
            namespace: req.namespace,
            object: req.object,
            relation: req.relation,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct SubjectSetRequest {
    pub namespace: String,
    pub object: String,
    pub relation: String,
}

#[derive(Debug, Deserialize)]
pub struct SubjectRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub set: Option<SubjectSetRequest>,
}

impl TryFrom<SubjectRequest> for Subject {
    type Error = SubjectError;

    fn try_from(req: SubjectRequest) -> Result<Self, Self::Error> {
        let set = req
            .set
            .map(|s| SubjectSet::new(s.namespace, s.object, s.relation));
        Subject::from_parts(req.id, set)
    }
}

/// Tuple-shaped body shared by internal checks and relationship mutations.
#[derive(Debug, Deserialize)]
pub struct TupleRequest {
    pub namespace: String,
    pub object: String,
    pub relation: String,
    pub subject: SubjectRequest,
}

impl TryFrom<TupleRequest> for RelationTuple {
    type Error = SubjectError;

    fn try_from(req: TupleRequest) -> Result<Self, Self::Error> {
        let subject = Subject::try_from(req.subject)?;
        Ok(RelationTuple::new(req.namespace, req.object, req.relation, subject))
    }
}

impl TryFrom<TupleRequest> for PermissionCheck {
    type Error = SubjectError;

    fn try_from(req: TupleRequest) -> Result<Self, Self::Error> {
        RelationTuple::try_from(req).map(PermissionCheck::from)
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchCheckRequest {
    pub checks: Vec<TupleRequest>,
}

#[derive(Debug, Serialize)]
pub struct BatchCheckResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<PermissionResult> for BatchCheckResult {
    fn from(result: PermissionResult) -> Self {
        Self {
            allowed: result.allowed,
            error: result.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchCheckResponse {
    pub results: Vec<BatchCheckResult>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoleChangeRequest {
    #[serde(default)]
    pub admin: Option<bool>,
    #[serde(default)]
    pub banned: Option<bool>,
}

impl From<RoleChangeRequest> for RoleChange {
    fn from(req: RoleChangeRequest) -> Self {
        Self {
            admin: req.admin,
            banned: req.banned,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClaimsResponse {
    pub subject: String,
    pub authenticated: bool,
    pub admin: Option<bool>,
    pub banned: Option<bool>,
}

impl From<&RoleClaims> for ClaimsResponse {
    fn from(claims: &RoleClaims) -> Self {
        Self {
            subject: claims.subject().to_string(),
            authenticated: claims.is_authenticated(),
            admin: claims.admin(),
            banned: claims.banned(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkClaimsRequest {
    pub subject_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkClaimsResponse {
    pub claims: HashMap<String, ClaimsResponse>,
}
