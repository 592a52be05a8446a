use std::future::Future;
use std::sync::Arc;

use warden_core::tuple::{PermissionCheck, RelationTuple};

use crate::error::ClientError;

/// Answers single permission questions against the remote authority.
///
/// A denial is `Ok(false)`; `Err` is reserved for cases where the authority
/// could not give an answer.
pub trait PermissionChecker: Send + Sync {
    fn check_permission(
        &self,
        check: &PermissionCheck,
    ) -> impl Future<Output = Result<bool, ClientError>> + Send;
}

/// Creates and deletes relation tuples on the remote authority.
pub trait RelationManager: Send + Sync {
    fn add_relation(
        &self,
        tuple: &RelationTuple,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    fn delete_relation(
        &self,
        tuple: &RelationTuple,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}

impl<T: PermissionChecker> PermissionChecker for Arc<T> {
    fn check_permission(
        &self,
        check: &PermissionCheck,
    ) -> impl Future<Output = Result<bool, ClientError>> + Send {
        (**self).check_permission(check)
    }
}

impl<T: RelationManager> RelationManager for Arc<T> {
    fn add_relation(
        &self,
        tuple: &RelationTuple,
    ) -> impl Future<Output = Result<(), ClientError>> + Send {
        (**self).add_relation(tuple)
    }

    fn delete_relation(
        &self,
        tuple: &RelationTuple,
    ) -> impl Future<Output = Result<(), ClientError>> + Send {
        (**self).delete_relation(tuple)
    }
}
