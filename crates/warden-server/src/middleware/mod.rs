pub mod auth;

pub use auth::{
    CallingService, ServiceAuthState, UserIdentityState, UserSubject, service_auth_middleware,
    user_identity_middleware,
};
