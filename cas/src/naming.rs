//! The out-of-band naming-system boundary used by `ipns://` and `key:`
//! remotes. Naming-system publication is explicitly out of scope for this
//! crate's core (spec.md §1); what's here is only the call across that
//! boundary, kept behind a trait so tests can supply a fake.

use crate::cas::{Address, Client};
use crate::error::Result;

pub trait Resolver {
    /// Resolve a name (an IPNS name or a local key reference) to the CAS
    /// address it currently points at.
    fn resolve(&self, name: &str) -> Result<Address>;

    /// Publish `address` under `local_key`, returning the resulting name.
    fn publish(&self, local_key: &str, address: &Address) -> Result<String>;
}

/// The default resolver: delegates to the same CAS daemon via its
/// `name_resolve`/`name_publish` calls.
pub struct DaemonResolver<'a> {
    pub cas: &'a Client,
}

impl Resolver for DaemonResolver<'_> {
    fn resolve(&self, name: &str) -> Result<Address> {
        self.cas.name_resolve(name)
    }

    fn publish(&self, local_key: &str, address: &Address) -> Result<String> {
        self.cas.name_publish(local_key, address)
    }
}
