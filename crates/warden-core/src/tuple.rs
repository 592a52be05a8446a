use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubjectError {
    #[error("subject must be either an id or a subject set, not both")]
    Ambiguous,

    #[error("subject is missing both an id and a subject set")]
    Missing,

    #[error("subject id must not be empty")]
    EmptyId,

    #[error("subject set field '{0}' must not be empty")]
    EmptySetField(&'static str),
}

/// Another relation used as a subject, e.g. `groups:eng#member`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectSet {
    pub namespace: String,
    pub object: String,
    pub relation: String,
}

impl SubjectSet {
    pub fn new(
        namespace: impl Into<String>,
        object: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            object: object.into(),
            relation: relation.into(),
        }
    }

    fn validate(&self) -> Result<(), SubjectError> {
        if self.namespace.is_empty() {
            return Err(SubjectError::EmptySetField("namespace"));
        }
        if self.object.is_empty() {
            return Err(SubjectError::EmptySetField("object"));
        }
        if self.relation.is_empty() {
            return Err(SubjectError::EmptySetField("relation"));
        }
        Ok(())
    }
}

impl fmt::Display for SubjectSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.namespace, self.object, self.relation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    Id(String),
    Set(SubjectSet),
}

impl Subject {
    pub fn id(id: impl Into<String>) -> Result<Self, SubjectError> {
        let id = id.into();
        if id.is_empty() {
            return Err(SubjectError::EmptyId);
        }
        Ok(Self::Id(id))
    }

    pub fn set(set: SubjectSet) -> Result<Self, SubjectError> {
        set.validate()?;
        Ok(Self::Set(set))
    }

    /// Builds a subject from a wire descriptor where either half may be present.
    pub fn from_parts(id: Option<String>, set: Option<SubjectSet>) -> Result<Self, SubjectError> {
        match (id, set) {
            (Some(_), Some(_)) => Err(SubjectError::Ambiguous),
            (None, None) => Err(SubjectError::Missing),
            (Some(id), None) => Self::id(id),
            (None, Some(set)) => Self::set(set),
        }
    }

    /// Re-checks a subject that may have been built directly from its variants.
    pub fn validate(&self) -> Result<(), SubjectError> {
        match self {
            Subject::Id(id) if id.is_empty() => Err(SubjectError::EmptyId),
            Subject::Id(_) => Ok(()),
            Subject::Set(set) => set.validate(),
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            Subject::Id(id) => Some(id),
            Subject::Set(_) => None,
        }
    }

    pub fn as_set(&self) -> Option<&SubjectSet> {
        match self {
            Subject::Id(_) => None,
            Subject::Set(set) => Some(set),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Id(id) => write!(f, "{id}"),
            Subject::Set(set) => write!(f, "{set}"),
        }
    }
}

/// A relationship fact as stored by the remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationTuple {
    pub namespace: String,
    pub object: String,
    pub relation: String,
    pub subject: Subject,
}

impl RelationTuple {
    pub fn new(
        namespace: impl Into<String>,
        object: impl Into<String>,
        relation: impl Into<String>,
        subject: Subject,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            object: object.into(),
            relation: relation.into(),
            subject,
        }
    }

    /// Name of the first empty required field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        missing_field(&self.namespace, &self.object, &self.relation)
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}",
            self.namespace, self.object, self.relation, self.subject
        )
    }
}

/// A question for the authority: does `subject` hold `relation` on `namespace:object`?
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PermissionCheck {
    pub namespace: String,
    pub object: String,
    pub relation: String,
    pub subject: Subject,
}

impl PermissionCheck {
    pub fn new(
        namespace: impl Into<String>,
        object: impl Into<String>,
        relation: impl Into<String>,
        subject: Subject,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            object: object.into(),
            relation: relation.into(),
            subject,
        }
    }

    pub fn missing_field(&self) -> Option<&'static str> {
        missing_field(&self.namespace, &self.object, &self.relation)
    }
}

impl fmt::Display for PermissionCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}",
            self.namespace, self.object, self.relation, self.subject
        )
    }
}

impl From<RelationTuple> for PermissionCheck {
    fn from(tuple: RelationTuple) -> Self {
        Self {
            namespace: tuple.namespace,
            object: tuple.object,
            relation: tuple.relation,
            subject: tuple.subject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionResult {
    pub check: PermissionCheck,
    pub allowed: bool,
    pub error: Option<String>,
}

impl PermissionResult {
    pub fn allowed(check: PermissionCheck, allowed: bool) -> Self {
        Self {
            check,
            allowed,
            error: None,
        }
    }

    pub fn failed(check: PermissionCheck, error: impl Into<String>) -> Self {
        Self {
            check,
            allowed: false,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn missing_field(namespace: &str, object: &str, relation: &str) -> Option<&'static str> {
    if namespace.is_empty() {
        Some("namespace")
    } else if object.is_empty() {
        Some("object")
    } else if relation.is_empty() {
        Some("relation")
    } else {
        None
    }
}
