use serde::{Deserialize, Serialize};
use warden_core::tuple::{PermissionCheck, RelationTuple, Subject, SubjectSet};

/// JSON shape of a relation tuple on the backend's read and write APIs.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WireTuple<'a> {
    pub namespace: &'a str,
    pub object: &'a str,
    pub relation: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_set: Option<WireSubjectSet<'a>>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WireSubjectSet<'a> {
    pub namespace: &'a str,
    pub object: &'a str,
    pub relation: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        match (self.error.message, self.error.reason) {
            (Some(message), Some(reason)) => Some(format!("{message}: {reason}")),
            (Some(message), None) => Some(message),
            (None, reason) => reason,
        }
    }
}

fn wire_tuple<'a>(
    namespace: &'a str,
    object: &'a str,
    relation: &'a str,
    subject: &'a Subject,
) -> WireTuple<'a> {
    let (subject_id, subject_set) = match subject {
        Subject::Id(id) => (Some(id.as_str()), None),
        Subject::Set(set) => (None, Some(wire_subject_set(set))),
    };

    WireTuple {
        namespace,
        object,
        relation,
        subject_id,
        subject_set,
    }
}

fn wire_subject_set(set: &SubjectSet) -> WireSubjectSet<'_> {
    WireSubjectSet {
        namespace: &set.namespace,
        object: &set.object,
        relation: &set.relation,
    }
}

pub fn check_to_wire(check: &PermissionCheck) -> WireTuple<'_> {
    wire_tuple(&check.namespace, &check.object, &check.relation, &check.subject)
}

pub fn tuple_to_wire(tuple: &RelationTuple) -> WireTuple<'_> {
    wire_tuple(&tuple.namespace, &tuple.object, &tuple.relation, &tuple.subject)
}

/// Query parameters identifying exactly one tuple for deletion.
pub fn tuple_to_query(tuple: &RelationTuple) -> Vec<(&'static str, &str)> {
    let mut query = vec![
        ("namespace", tuple.namespace.as_str()),
        ("object", tuple.object.as_str()),
        ("relation", tuple.relation.as_str()),
    ];

    match &tuple.subject {
        Subject::Id(id) => query.push(("subject_id", id.as_str())),
        Subject::Set(set) => {
            query.push(("subject_set.namespace", set.namespace.as_str()));
            query.push(("subject_set.object", set.object.as_str()));
            query.push(("subject_set.relation", set.relation.as_str()));
        }
    }

    query
}
