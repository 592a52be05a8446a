use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllowlistError {
    #[error("allowlist entry '{entry}' must have {expected} ':'-separated fields, found {found}")]
    FieldCount {
        entry: String,
        expected: usize,
        found: usize,
    },

    #[error("allowlist entry '{entry}' has an empty {field}")]
    EmptyField { entry: String, field: &'static str },
}

/// `(namespace, relation)` pairs that end users may ask about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicAllowlist {
    relations_by_namespace: HashMap<String, HashSet<String>>,
}

impl PublicAllowlist {
    /// Parses `namespace:relation[,namespace:relation...]`.
    ///
    /// Blank entries are skipped. Any malformed entry fails the whole parse.
    pub fn parse(spec: &str) -> Result<Self, AllowlistError> {
        let mut relations_by_namespace: HashMap<String, HashSet<String>> = HashMap::new();

        for entry in entries(spec) {
            let [namespace, relation] = split_fields::<2>(entry, &["namespace", "relation"])?;
            relations_by_namespace
                .entry(namespace.to_string())
                .or_default()
                .insert(relation.to_string());
        }

        Ok(Self {
            relations_by_namespace,
        })
    }

    pub fn allows(&self, namespace: &str, relation: &str) -> bool {
        self.relations_by_namespace
            .get(namespace)
            .is_some_and(|relations| relations.contains(relation))
    }

    pub fn len(&self) -> usize {
        self.relations_by_namespace.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.relations_by_namespace.is_empty()
    }
}

/// `(service, namespace, relation)` triples naming which tuples a calling
/// service may create or delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationAllowlist {
    by_service: HashMap<String, PublicAllowlist>,
}

impl MutationAllowlist {
    /// Parses `service:namespace:relation[,...]` with the same atomicity rules
    /// as [`PublicAllowlist::parse`].
    pub fn parse(spec: &str) -> Result<Self, AllowlistError> {
        let mut by_service: HashMap<String, PublicAllowlist> = HashMap::new();

        for entry in entries(spec) {
            let [service, namespace, relation] =
                split_fields::<3>(entry, &["service", "namespace", "relation"])?;
            by_service
                .entry(service.to_string())
                .or_default()
                .relations_by_namespace
                .entry(namespace.to_string())
                .or_default()
                .insert(relation.to_string());
        }

        Ok(Self { by_service })
    }

    pub fn allows(&self, service: &str, namespace: &str, relation: &str) -> bool {
        self.by_service
            .get(service)
            .is_some_and(|allowed| allowed.allows(namespace, relation))
    }

    pub fn len(&self) -> usize {
        self.by_service.values().map(PublicAllowlist::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_service.is_empty()
    }
}

/// Both allowlists, built once at startup and shared read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowlistPolicy {
    pub public: PublicAllowlist,
    pub mutation: MutationAllowlist,
}

impl AllowlistPolicy {
    pub fn from_specs(public: &str, mutation: &str) -> Result<Self, AllowlistError> {
        Ok(Self {
            public: PublicAllowlist::parse(public)?,
            mutation: MutationAllowlist::parse(mutation)?,
        })
    }

    pub fn allows_public(&self, namespace: &str, relation: &str) -> bool {
        self.public.allows(namespace, relation)
    }

    pub fn allows_mutation(&self, service: &str, namespace: &str, relation: &str) -> bool {
        self.mutation.allows(service, namespace, relation)
    }
}

fn entries(spec: &str) -> impl Iterator<Item = &str> {
    spec.split(',').map(str::trim).filter(|entry| !entry.is_empty())
}

fn split_fields<'a, const N: usize>(
    entry: &'a str,
    names: &[&'static str; N],
) -> Result<[&'a str; N], AllowlistError> {
    let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
    let fields: [&str; N] = parts
        .as_slice()
        .try_into()
        .map_err(|_| AllowlistError::FieldCount {
            entry: entry.to_string(),
            expected: N,
            found: parts.len(),
        })?;

    if let Some(i) = fields.iter().position(|f| f.is_empty()) {
        return Err(AllowlistError::EmptyField {
            entry: entry.to_string(),
            field: names[i],
        });
    }

    Ok(fields)
}
