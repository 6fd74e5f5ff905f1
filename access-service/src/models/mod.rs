//! Domain records of the access engine.

pub mod audit_event;
pub mod credential;
pub mod invite_code;
pub mod mac;
pub mod method_binding;
pub mod policy;
pub mod registration;

pub use audit_event::{AuditAction, AuditEvent};
pub use credential::{Credential, CredentialKind, CredentialStatus, OwnerRef};
pub use invite_code::InviteCode;
pub use mac::MacAddress;
pub use method_binding::{AuthOutcome, MethodBinding, MethodKind};
pub use policy::{
    AuthSubject, AuthorizationPolicy, ConditionMatch, PolicyAttributes, PolicyConditions,
    PolicyType, RadiusAttribute,
};
pub use registration::{AuthMethod, PendingRegistration, PendingStatus, RegistrationMode};
