pub mod context;
pub mod guard;
pub mod middleware;
pub mod token;

pub use context::{AccessContext, PrincipalRole};
pub use guard::GuardError;
