//! The trusted metadata set: every role the client currently trusts.
//!
//! The set enforces the role ordering root → timestamp → snapshot → targets
//! → delegated targets. Loads either succeed and replace the relevant entry,
//! or fail and leave the set exactly as it was.
//!
//! Bytes coming from the local cache are loaded with [`Source::LocalCache`].
//! They are still signature checked, but they skip the length/hash pins and
//! may be expired or older than the pinned version. Such entries never count
//! as final; they only serve as rollback baselines for the remote copies
//! loaded after them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{Error, Pin, Result};
use crate::keys::Authorization;
use crate::metadata::{
    Envelope, MetaFile, Payload, RoleType, Root, Snapshot, Targets, Timestamp,
};

/// How far the trust chain has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustState {
    HaveRoot,
    HaveTimestamp,
    HaveSnapshot,
    HaveTargets,
}

/// Where the bytes handed to a load came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Freshly downloaded from the repository.
    Repository,
    /// Previously verified and persisted by this client.
    LocalCache,
}

/// Whether a loaded entry may be used as final metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Accepted from the cache although its expiry has passed.
    Expired,
    /// Accepted from the cache although it is older than the pinned version.
    Outdated,
}

/// Verified metadata, keyed by role.
#[derive(Debug, Clone)]
pub struct TrustedMetadataSet {
    reference_time: DateTime<Utc>,
    root: Envelope<Root>,
    root_history: Vec<u64>,
    rotated: bool,
    timestamp: Option<Envelope<Timestamp>>,
    snapshot: Option<Envelope<Snapshot>>,
    targets: BTreeMap<String, Envelope<Targets>>,
}

impl TrustedMetadataSet {
    /// Bootstraps from a locally trusted root.
    ///
    /// The root must carry a threshold of its own root role signatures. Its
    /// expiry is not checked here; see [`Self::check_root_expiry`].
    pub fn new(root_bytes: &[u8], reference_time: DateTime<Utc>) -> Result<Self> {
        let root = Envelope::<Root>::from_slice("root", root_bytes)?;
        root.verify(&root.signed.authorization(RoleType::Root)?)?;
        info!(version = root.signed.version, "tuf: trusted root loaded");
        Ok(Self {
            reference_time,
            root_history: vec![root.signed.version],
            root,
            rotated: false,
            timestamp: None,
            snapshot: None,
            targets: BTreeMap::new(),
        })
    }

    pub fn state(&self) -> TrustState {
        if self.targets.contains_key(RoleType::Targets.as_str()) {
            TrustState::HaveTargets
        } else if self.snapshot.is_some() {
            TrustState::HaveSnapshot
        } else if self.timestamp.is_some() {
            TrustState::HaveTimestamp
        } else {
            TrustState::HaveRoot
        }
    }

    /// Time used for expiry checks during loads.
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time
    }

    pub fn set_reference_time(&mut self, reference_time: DateTime<Utc>) {
        self.reference_time = reference_time;
    }

    pub fn root(&self) -> &Envelope<Root> {
        &self.root
    }

    /// Versions of every root accepted by this set, oldest first.
    pub fn root_history(&self) -> &[u64] {
        &self.root_history
    }

    /// Returns `true` if a newer root was accepted after bootstrap.
    pub fn root_rotated(&self) -> bool {
        self.rotated
    }

    pub fn timestamp(&self) -> Option<&Envelope<Timestamp>> {
        self.timestamp.as_ref()
    }

    pub fn snapshot(&self) -> Option<&Envelope<Snapshot>> {
        self.snapshot.as_ref()
    }

    /// Any loaded instance of targets role `role`, final or not.
    pub fn targets(&self, role: &str) -> Option<&Envelope<Targets>> {
        self.targets.get(role)
    }

    /// Raw bytes of a trusted role, as they were loaded.
    pub fn raw_bytes(&self, role: &str) -> Option<&[u8]> {
        match role {
            "root" => Some(self.root.raw()),
            "timestamp" => self.timestamp.as_ref().map(Envelope::raw),
            "snapshot" => self.snapshot.as_ref().map(Envelope::raw),
            other => self.targets.get(other).map(Envelope::raw),
        }
    }

    /// Verifies and accepts root version N+1.
    ///
    /// The candidate must be signed by a threshold of the trusted root's root
    /// role and by a threshold of its own root role. Loading the trusted
    /// root's exact bytes again is a no-op.
    pub fn load_root(&mut self, bytes: &[u8]) -> Result<()> {
        if self.timestamp.is_some() {
            return Err(self.out_of_order("root"));
        }
        if bytes == self.root.raw() {
            debug!(version = self.root.signed.version, "tuf: root unchanged");
            return Ok(());
        }
        let candidate = Envelope::<Root>::from_slice("root", bytes)?;
        candidate.verify(&self.root.signed.authorization(RoleType::Root)?)?;
        candidate.verify(&candidate.signed.authorization(RoleType::Root)?)?;

        let trusted = self.root.signed.version;
        let received = candidate.signed.version;
        if received <= trusted {
            return Err(Error::Rollback {
                role: "root".to_string(),
                trusted,
                received,
            });
        }
        let expected = trusted.saturating_add(1);
        if received != expected {
            return Err(Error::PinMismatch {
                role: "root".to_string(),
                pin: Pin::Version {
                    expected,
                    actual: received,
                },
            });
        }

        info!(from = trusted, to = received, "tuf: root rotated");
        self.root = candidate;
        self.root_history.push(received);
        self.rotated = true;
        Ok(())
    }

    /// Fails with [`Error::Expired`] if the final root is expired.
    pub fn check_root_expiry(&self) -> Result<()> {
        if self.root.is_expired(self.reference_time) {
            return Err(Error::Expired {
                role: "root".to_string(),
                expires: self.root.signed.expires,
            });
        }
        Ok(())
    }

    /// Verifies and accepts a timestamp.
    pub fn load_timestamp(&mut self, bytes: &[u8], source: Source) -> Result<Freshness> {
        if self.snapshot.is_some() {
            return Err(self.out_of_order("timestamp"));
        }
        let candidate = Envelope::<Timestamp>::from_slice("timestamp", bytes)?;
        candidate.verify(&self.root.signed.authorization(RoleType::Timestamp)?)?;
        let freshness = self.expiry_freshness("timestamp", &candidate, source)?;

        if let Some(current) = &self.timestamp {
            let trusted = current.signed.version;
            let received = candidate.signed.version;
            if received < trusted || (received == trusted && candidate.raw() != current.raw()) {
                return Err(Error::Rollback {
                    role: "timestamp".to_string(),
                    trusted,
                    received,
                });
            }
            if received == trusted {
                debug!(version = received, "tuf: timestamp unchanged");
                return Ok(freshness);
            }
            let trusted_pin = current.signed.meta.snapshot.version;
            let received_pin = candidate.signed.meta.snapshot.version;
            if received_pin < trusted_pin {
                return Err(Error::Rollback {
                    role: "snapshot".to_string(),
                    trusted: trusted_pin,
                    received: received_pin,
                });
            }
        }

        info!(
            version = candidate.signed.version,
            snapshot_version = candidate.signed.meta.snapshot.version,
            ?source,
            "tuf: timestamp accepted"
        );
        self.timestamp = Some(candidate);
        Ok(freshness)
    }

    /// Verifies and accepts a snapshot.
    pub fn load_snapshot(&mut self, bytes: &[u8], source: Source) -> Result<Freshness> {
        if self.targets.contains_key(RoleType::Targets.as_str()) {
            return Err(self.out_of_order("snapshot"));
        }
        let pin = match &self.timestamp {
            Some(timestamp) => timestamp.signed.meta.snapshot.clone(),
            None => return Err(self.out_of_order("snapshot")),
        };
        self.check_final_timestamp()?;
        if source == Source::Repository {
            pin.verify_content("snapshot", bytes)?;
        }
        let candidate = Envelope::<Snapshot>::from_slice("snapshot", bytes)?;
        candidate.verify(&self.root.signed.authorization(RoleType::Snapshot)?)?;
        let version = pin_freshness("snapshot", &pin, candidate.signed.version, source)?;
        let expiry = self.expiry_freshness("snapshot", &candidate, source)?;

        if let Some(current) = &self.snapshot {
            check_version("snapshot", current, &candidate)?;
            for (file, trusted) in &current.signed.meta {
                let role = file.strip_suffix(".json").unwrap_or(file);
                match candidate.signed.meta.get(file) {
                    None if self.rotated => {
                        debug!(role, "tuf: role dropped from snapshot after root rotation");
                    }
                    None => {
                        return Err(Error::RoleRemoved {
                            role: role.to_string(),
                        })
                    }
                    Some(received) if received.version < trusted.version => {
                        return Err(Error::Rollback {
                            role: role.to_string(),
                            trusted: trusted.version,
                            received: received.version,
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        info!(version = candidate.signed.version, ?source, "tuf: snapshot accepted");
        self.snapshot = Some(candidate);
        Ok(worst(version, expiry))
    }

    /// Verifies and accepts the targets metadata of `role`.
    ///
    /// `delegator` is `None` for the top-level `targets` role and names the
    /// already trusted delegating role otherwise.
    pub fn load_targets(
        &mut self,
        bytes: &[u8],
        role: &str,
        delegator: Option<&str>,
        source: Source,
    ) -> Result<Freshness> {
        let pin = match &self.snapshot {
            Some(snapshot) => snapshot.signed.meta_for(role).cloned(),
            None => return Err(self.out_of_order(role)),
        };
        self.check_final_snapshot()?;
        let pin = pin.ok_or_else(|| Error::UnknownRole {
            role: role.to_string(),
            listed_in: "snapshot".to_string(),
        })?;
        if source == Source::Repository {
            pin.verify_content(role, bytes)?;
        }
        let candidate = Envelope::<Targets>::from_slice(role, bytes)?;

        let top_level = role == RoleType::Targets.as_str();
        match (top_level, delegator) {
            (true, _) => {
                candidate.verify(&self.root.signed.authorization(RoleType::Targets)?)?;
            }
            (false, Some(parent)) => {
                let parent_meta = self
                    .targets
                    .get(parent)
                    .ok_or_else(|| self.out_of_order(role))?;
                let authorization = parent_meta
                    .signed
                    .delegations
                    .as_ref()
                    .and_then(|delegations| delegations.authorization_for(role))
                    .ok_or_else(|| Error::UnknownRole {
                        role: role.to_string(),
                        listed_in: parent.to_string(),
                    })?;
                candidate.verify(&Authorization {
                    role_name: role,
                    ..authorization
                })?;
            }
            (false, None) => {
                return Err(Error::UnknownRole {
                    role: role.to_string(),
                    listed_in: "root".to_string(),
                })
            }
        }

        let version = pin_freshness(role, &pin, candidate.signed.version, source)?;
        let expiry = self.expiry_freshness(role, &candidate, source)?;
        if let Some(current) = self.targets.get(role) {
            check_version(role, current, &candidate)?;
        }

        info!(role, version = candidate.signed.version, ?source, "tuf: targets accepted");
        self.targets.insert(role.to_string(), candidate);
        Ok(worst(version, expiry))
    }

    /// Moves this set onto the newer root accepted by `rotated`.
    ///
    /// Returns `None` unless the newer root kept the keys and threshold of
    /// the timestamp, snapshot and targets roles, since only then do the
    /// metadata already trusted here remain authorized.
    pub fn carry_forward(&self, rotated: &TrustedMetadataSet) -> Option<TrustedMetadataSet> {
        if rotated.root.signed.version <= self.root.signed.version {
            return None;
        }
        let kept = [RoleType::Timestamp, RoleType::Snapshot, RoleType::Targets]
            .into_iter()
            .all(|role| {
                self.root.signed.roles.get(role.as_str())
                    == rotated.root.signed.roles.get(role.as_str())
            });
        if !kept {
            return None;
        }
        let mut carried = self.clone();
        carried.root = rotated.root.clone();
        carried.root_history = rotated.root_history.clone();
        carried.rotated = true;
        carried.reference_time = rotated.reference_time;
        Some(carried)
    }

    /// Returns `true` when the trusted snapshot matches the timestamp pin and is unexpired.
    pub fn has_final_snapshot(&self) -> bool {
        self.check_final_snapshot().is_ok()
    }

    /// The trusted instance of `role` if it matches its snapshot pin and is unexpired.
    pub fn final_targets(&self, role: &str) -> Option<&Envelope<Targets>> {
        let targets = self.targets.get(role)?;
        let pinned = self.snapshot.as_ref()?.signed.meta_for(role)?;
        if targets.signed.version != pinned.version || targets.is_expired(self.reference_time) {
            return None;
        }
        Some(targets)
    }

    /// Checks that the set is complete and unexpired at `now`.
    pub fn check_consumable(&self, now: DateTime<Utc>) -> Result<()> {
        if self.root.is_expired(now) {
            return Err(expired("root", self.root.signed.expires));
        }
        let timestamp = self
            .timestamp
            .as_ref()
            .ok_or_else(|| self.out_of_order("timestamp"))?;
        if timestamp.is_expired(now) {
            return Err(expired("timestamp", timestamp.signed.expires));
        }
        let snapshot = self
            .snapshot
            .as_ref()
            .ok_or_else(|| self.out_of_order("snapshot"))?;
        timestamp
            .signed
            .meta
            .snapshot
            .verify_version("snapshot", snapshot.signed.version)?;
        if snapshot.is_expired(now) {
            return Err(expired("snapshot", snapshot.signed.expires));
        }
        let targets = self
            .targets
            .get(RoleType::Targets.as_str())
            .ok_or_else(|| self.out_of_order("targets"))?;
        if let Some(pin) = snapshot.signed.meta_for(RoleType::Targets.as_str()) {
            pin.verify_version("targets", targets.signed.version)?;
        }
        if targets.is_expired(now) {
            return Err(expired("targets", targets.signed.expires));
        }
        Ok(())
    }

    fn check_final_timestamp(&self) -> Result<()> {
        let timestamp = self
            .timestamp
            .as_ref()
            .ok_or_else(|| self.out_of_order("snapshot"))?;
        if timestamp.is_expired(self.reference_time) {
            return Err(expired("timestamp", timestamp.signed.expires));
        }
        Ok(())
    }

    fn check_final_snapshot(&self) -> Result<()> {
        self.check_final_timestamp()?;
        let snapshot = self
            .snapshot
            .as_ref()
            .ok_or_else(|| self.out_of_order("targets"))?;
        if snapshot.is_expired(self.reference_time) {
            return Err(expired("snapshot", snapshot.signed.expires));
        }
        if let Some(timestamp) = &self.timestamp {
            timestamp
                .signed
                .meta
                .snapshot
                .verify_version("snapshot", snapshot.signed.version)?;
        }
        Ok(())
    }

    fn expiry_freshness<T: Payload>(
        &self,
        role: &str,
        envelope: &Envelope<T>,
        source: Source,
    ) -> Result<Freshness> {
        if !envelope.is_expired(self.reference_time) {
            return Ok(Freshness::Fresh);
        }
        match source {
            Source::Repository => Err(expired(role, envelope.signed.expires())),
            Source::LocalCache => {
                warn!(role, expires = %envelope.signed.expires(), "tuf: cached metadata is expired");
                Ok(Freshness::Expired)
            }
        }
    }

    fn out_of_order(&self, role: &str) -> Error {
        Error::OutOfOrder {
            role: role.to_string(),
            state: self.state(),
        }
    }
}

/// Compares a loaded version against its pin.
///
/// Cached copies older than the pin are kept as baselines; anything else
/// that differs from the pin is rejected.
/// A candidate may not lower the trusted version, nor change the content
/// at the trusted version.
fn check_version<T: Payload>(role: &str, current: &Envelope<T>, candidate: &Envelope<T>) -> Result<()> {
    let trusted = current.signed.version();
    let received = candidate.signed.version();
    if received < trusted || (received == trusted && candidate.raw() != current.raw()) {
        return Err(Error::Rollback {
            role: role.to_string(),
            trusted,
            received,
        });
    }
    Ok(())
}

fn pin_freshness(role: &str, pin: &MetaFile, actual: u64, source: Source) -> Result<Freshness> {
    if actual == pin.version {
        return Ok(Freshness::Fresh);
    }
    if source == Source::LocalCache && actual < pin.version {
        debug!(role, cached = actual, pinned = pin.version, "tuf: cached metadata is outdated");
        return Ok(Freshness::Outdated);
    }
    pin.verify_version(role, actual).map(|()| Freshness::Fresh)
}

fn worst(a: Freshness, b: Freshness) -> Freshness {
    if a == Freshness::Fresh {
        b
    } else {
        a
    }
}

fn expired(role: &str, expires: DateTime<Utc>) -> Error {
    Error::Expired {
        role: role.to_string(),
        expires,
    }
}
