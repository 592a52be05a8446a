pub mod allowlist;
pub mod claims;
pub mod tuple;

pub use allowlist::{AllowlistError, AllowlistPolicy, MutationAllowlist, PublicAllowlist};
pub use claims::{GUEST_SUBJECT, RoleClaims, is_guest};
pub use tuple::{PermissionCheck, PermissionResult, RelationTuple, Subject, SubjectError, SubjectSet};
