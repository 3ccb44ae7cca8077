//! Replica set identity and primary election ordering.
//!
//! Competing primary claims are totally ordered by the pair
//! `(setVersion, electionId)`. Both components are nullable, and an absent
//! component sorts before any present one.

use std::{collections::BTreeSet, fmt};

use crate::endpoint::EndPoint;

/// Wire version from which electionId takes priority over setVersion.
pub const ELECTION_ID_PRIORITY_WIRE_VERSION: i32 = 17;

/// Opaque, byte-wise ordered identifier of a replica set election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElectionId([u8; 12]);

impl ElectionId {
    /// Creates an election id from its raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Creates an election id whose trailing bytes encode `counter`.
    #[must_use]
    pub fn from_counter(counter: u64) -> Self {
        let mut bytes = [0u8; 12];
        bytes[4..].copy_from_slice(&counter.to_be_bytes());
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl fmt::Display for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Membership and identity of a replica set as reported by one member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicaSetConfig {
    members: BTreeSet<EndPoint>,
    name: Option<String>,
    primary: Option<EndPoint>,
    version: Option<i32>,
}

impl ReplicaSetConfig {
    /// Creates a replica set configuration.
    #[must_use]
    pub fn new(
        members: impl IntoIterator<Item = EndPoint>,
        name: Option<String>,
        primary: Option<EndPoint>,
        version: Option<i32>,
    ) -> Self {
        Self { members: members.into_iter().collect(), name, primary, version }
    }

    /// Returns the member endpoints.
    #[must_use]
    pub fn members(&self) -> &BTreeSet<EndPoint> {
        &self.members
    }

    /// Returns the replica set name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the member the reporter believes is primary.
    #[must_use]
    pub fn primary(&self) -> Option<&EndPoint> {
        self.primary.as_ref()
    }

    /// Returns the configuration version (setVersion).
    #[must_use]
    pub fn version(&self) -> Option<i32> {
        self.version
    }
}

/// The maximum `(setVersion, electionId)` observed for a replica set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElectionInfo {
    set_version: Option<i32>,
    election_id: Option<ElectionId>,
}

impl ElectionInfo {
    /// Creates an election info pair.
    #[must_use]
    pub fn new(set_version: Option<i32>, election_id: Option<ElectionId>) -> Self {
        Self { set_version, election_id }
    }

    /// Returns the tracked setVersion.
    #[must_use]
    pub fn set_version(&self) -> Option<i32> {
        self.set_version
    }

    /// Returns the tracked electionId.
    #[must_use]
    pub fn election_id(&self) -> Option<ElectionId> {
        self.election_id
    }

    /// Returns `true` if nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set_version.is_none() && self.election_id.is_none()
    }

    /// Compares a primary's claim against the tracked maximum.
    ///
    /// Returns the new maximum to track, or `None` if the claim is stale.
    /// Servers at [`ELECTION_ID_PRIORITY_WIRE_VERSION`] or newer order by
    /// electionId first; older servers order by setVersion first and only
    /// reject a claim when both components are present on both sides.
    #[must_use]
    pub fn compare(
        &self,
        set_version: Option<i32>,
        election_id: Option<ElectionId>,
        max_wire_version: i32,
    ) -> Option<ElectionInfo> {
        if max_wire_version >= ELECTION_ID_PRIORITY_WIRE_VERSION {
            let accepted = match self.election_id.cmp(&election_id) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Equal => set_version >= self.set_version,
                std::cmp::Ordering::Greater => false,
            };
            return accepted.then_some(ElectionInfo { set_version, election_id });
        }

        let mut next = *self;
        if let (Some(sv), Some(eid)) = (set_version, election_id) {
            if let (Some(max_sv), Some(max_eid)) = (self.set_version, self.election_id) {
                if max_sv > sv || (max_sv == sv && max_eid > eid) {
                    return None;
                }
            }
            next.election_id = Some(eid);
        }
        if set_version > self.set_version {
            next.set_version = set_version;
        }
        Some(next)
    }
}

impl fmt::Display for ElectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sv = self.set_version.map_or_else(|| "null".to_string(), |v| v.to_string());
        let eid = self.election_id.map_or_else(|| "null".to_string(), |e| e.to_string());
        write!(f, "({sv}, {eid})")
    }
}
