//! Services layer for loyalty-service.
//!
//! Account directory, identity (registration, login, sessions) and the
//! points ledger with its remote and in-process backends.

mod directory;
pub mod error;
mod identity;
mod ids;
mod jwt;
pub mod ledger;
pub mod metrics;
pub mod remote;
mod square;

pub use directory::AccountDirectory;
pub use error::ServiceError;
pub use identity::{IdentityService, Registration, Session};
pub use ids::{IdGenerator, RandomIdGenerator};
pub use jwt::{JwtService, SessionClaims};
pub use ledger::{LedgerBackend, LedgerService, TransactionLog};
pub use remote::{translate_event, RemoteError, RemoteEvent, RemoteEventKind, RemoteLedger};
pub use square::SquareLedger;
