//! Company and membership records.
//!
//! These are plain records: the rules about who may create or change them
//! live in `companyhub-auth` (decisions) and `companyhub-infra` (orchestration).

pub mod company;
pub mod member;

pub use company::{Company, CompanyName, Plan};
pub use member::CompanyMember;
