pub mod audit;
pub mod certificate_authority;
pub mod error;
pub mod grant;
pub mod invites;
pub mod issuer;
pub mod metrics;
pub mod passphrase;
pub mod registration;
pub mod resolver;
pub mod session;
pub mod splash;
pub mod store;
pub mod sweeper;

pub use audit::AuditService;
pub use certificate_authority::{
    CertificateAuthority, CertificateFormat, HttpCertificateAuthority, MockCertificateAuthority,
};
pub use error::ServiceError;
pub use grant::{GrantMediator, GrantOutcome, GrantSettings, PortalGrant, PortalRequest};
pub use invites::InviteService;
pub use issuer::{CredentialIssuer, IssueOptions, IssuedCredential, IssuerSettings};
pub use passphrase::PassphraseCipher;
pub use registration::{
    Admission, RegistrationEvaluator, RegistrationOutcome, RegistrationRequest, RejectReason,
};
pub use resolver::{Decision, PolicyResolver, PolicyTest, Resolution};
pub use session::{SessionService, SessionStatus};
pub use splash::{HttpSplashController, MockSplashController, SplashController};
pub use store::{Database, MemoryStore, PolicyDraft, Stores};
pub use sweeper::ExpirySweeper;
