//! Owner identity
//!
//! A lock owner is the pair of the client instance id and a per-handle
//! sequence number. Its string form is the hash field under which the store
//! counts this owner's reentrant units. Two handles minted by the same
//! client are distinct owners; clone a handle to share a hold instead of
//! minting a second one.

use std::fmt;

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerId {
    client: Uuid,
    handle: u64,
}

impl OwnerId {
    pub(crate) fn new(client: Uuid, handle: u64) -> Self {
        Self { client, handle }
    }

    /// Id of the client instance this owner belongs to.
    pub fn client(&self) -> Uuid {
        self.client
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.client, self.handle)
    }
}
