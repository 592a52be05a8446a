//! In-memory stand-ins for the remote backend and the identity directory.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use warden_client::{ClientError, PermissionChecker, RelationManager};
use warden_core::tuple::{PermissionCheck, RelationTuple, Subject};

use crate::directory::{DirectoryError, UserDirectory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Delete,
}

#[derive(Default)]
pub struct FakeBackend {
    tuples: Mutex<HashSet<RelationTuple>>,
    failing_relations: Mutex<HashSet<String>>,
    fail_writes: AtomicBool,
    check_calls: AtomicUsize,
    writes: Mutex<Vec<(WriteOp, RelationTuple)>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, namespace: &str, object: &str, relation: &str, subject_id: &str) {
        self.tuples.lock().unwrap().insert(RelationTuple::new(
            namespace,
            object,
            relation,
            Subject::id(subject_id).unwrap(),
        ));
    }

    pub fn holds(&self, namespace: &str, object: &str, relation: &str, subject_id: &str) -> bool {
        self.tuples.lock().unwrap().contains(&RelationTuple::new(
            namespace,
            object,
            relation,
            Subject::id(subject_id).unwrap(),
        ))
    }

    /// Every check on `relation` fails from now on.
    pub fn fail_checks_on(&self, relation: &str) {
        self.failing_relations
            .lock()
            .unwrap()
            .insert(relation.to_string());
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(WriteOp, RelationTuple)> {
        self.writes.lock().unwrap().clone()
    }

    fn write(&self, op: WriteOp, tuple: &RelationTuple) -> Result<(), ClientError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ClientError::Connection("write api unreachable".to_string()));
        }
        self.writes.lock().unwrap().push((op, tuple.clone()));
        let mut tuples = self.tuples.lock().unwrap();
        match op {
            WriteOp::Create => tuples.insert(tuple.clone()),
            WriteOp::Delete => tuples.remove(tuple),
        };
        Ok(())
    }
}

impl PermissionChecker for FakeBackend {
    async fn check_permission(&self, check: &PermissionCheck) -> Result<bool, ClientError> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_relations
            .lock()
            .unwrap()
            .contains(&check.relation)
        {
            return Err(ClientError::Unexpected {
                status: 500,
                message: "backend exploded".to_string(),
            });
        }
        let tuple = RelationTuple::new(
            check.namespace.as_str(),
            check.object.as_str(),
            check.relation.as_str(),
            check.subject.clone(),
        );
        Ok(self.tuples.lock().unwrap().contains(&tuple))
    }
}

impl RelationManager for FakeBackend {
    async fn add_relation(&self, tuple: &RelationTuple) -> Result<(), ClientError> {
        self.write(WriteOp::Create, tuple)
    }

    async fn delete_relation(&self, tuple: &RelationTuple) -> Result<(), ClientError> {
        self.write(WriteOp::Delete, tuple)
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    users: HashSet<String>,
    fail: bool,
}

impl FakeDirectory {
    pub fn with_users(users: &[&str]) -> Self {
        Self {
            users: users.iter().map(|u| u.to_string()).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

impl UserDirectory for FakeDirectory {
    async fn exists(&self, subject_id: &str) -> Result<bool, DirectoryError> {
        if self.fail {
            return Err(DirectoryError::UnexpectedStatus(502));
        }
        Ok(self.users.contains(subject_id))
    }
}
