//! Company creation: the company row and its founding Owner membership are
//! written as one unit.

use chrono::Utc;

use companyhub_companies::{Company, CompanyMember, CompanyName, Plan};
use companyhub_core::UserId;

use crate::identity_store::{IdentityStore, StoreError};
use crate::membership_service::MembershipError;

pub(crate) const NAME_TAKEN: &str = "company name already taken";

/// Create `name` with `founder` as its first Owner.
///
/// The name pre-check gives the common case a fast answer without opening a
/// transaction; the store's unique index still decides races between two
/// concurrent creations.
pub(crate) async fn found_company<S>(
    store: &S,
    founder: &UserId,
    name: CompanyName,
    plan: Plan,
) -> Result<Company, MembershipError>
where
    S: IdentityStore + ?Sized,
{
    if store.find_company_by_name(&name).await?.is_some() {
        tracing::debug!(%name, "company name already taken");
        return Err(MembershipError::Conflict(NAME_TAKEN.to_string()));
    }

    let now = Utc::now();
    let company = Company::new(name, plan, now);
    let owner = CompanyMember::founder(company.id, founder.clone(), now);

    match store.insert_company(company, owner).await {
        Ok(company) => {
            tracing::info!(company_id = %company.id, founder = %founder, "company created");
            Ok(company)
        }
        Err(StoreError::Conflict(msg)) => {
            tracing::debug!(reason = %msg, "lost company name race");
            Err(MembershipError::Conflict(msg))
        }
        Err(e) => Err(e.into()),
    }
}
