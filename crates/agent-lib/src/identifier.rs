//! Identifier cache backing incremental reporting
//!
//! One cache exists per resource kind. Each entry remembers the
//! server-assigned Cid and the fingerprint of the last full snapshot, so
//! unchanged objects are reported as `{uid, exist, cid}` references and
//! vanished objects turn into tombstones.
//!
//! The decision logic lives in the free functions [`classify`] and
//! [`sweep_decision`]; [`IdentifierCache`] applies them to its entries.

use crate::models::Snapshot;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Cache entry for one observed object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceIdentifier {
    pub uid: String,
    /// Server-assigned id, empty until acknowledged
    pub cid: String,
    pub fingerprint: String,
    /// Seen during the current cycle
    pub curr: bool,
    pub name: String,
    /// Uid of the owning record for secondary caches
    pub parent: Option<String>,
}

/// How an observed snapshot is emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    Full,
    Reference { cid: String },
}

/// Outcome of sweeping one entry at the end of a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepDecision {
    Keep,
    Evict { tombstone: Option<Tombstone> },
}

/// Deletion notice for an acknowledged object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub uid: String,
    pub cid: String,
    pub parent: Option<String>,
}

/// Decide how a snapshot with `fingerprint` is emitted given its cache entry
pub fn classify(entry: Option<&ResourceIdentifier>, fingerprint: &str) -> Emission {
    match entry {
        Some(entry) if entry.fingerprint == fingerprint && !entry.cid.is_empty() => {
            Emission::Reference {
                cid: entry.cid.clone(),
            }
        }
        _ => Emission::Full,
    }
}

/// Decide whether an entry survives the sweep
pub fn sweep_decision(entry: &ResourceIdentifier) -> SweepDecision {
    if entry.curr {
        return SweepDecision::Keep;
    }
    let tombstone = (!entry.cid.is_empty()).then(|| Tombstone {
        uid: entry.uid.clone(),
        cid: entry.cid.clone(),
        parent: entry.parent.clone(),
    });
    SweepDecision::Evict { tombstone }
}

/// Hex SHA-256 over the snapshot's JSON form, excluding the Cid
pub fn fingerprint<S: Snapshot>(snapshot: &S) -> Result<String, serde_json::Error> {
    let mut probe = snapshot.clone();
    probe.common_mut().cid.clear();
    let bytes = serde_json::to_vec(&probe)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Result of observing one snapshot
#[derive(Debug, Clone)]
pub struct Observation<S> {
    pub snapshot: S,
    pub emission: Emission,
}

impl<S> Observation<S> {
    pub fn is_full(&self) -> bool {
        self.emission == Emission::Full
    }
}

/// Per-kind identifier cache keyed by Uid
#[derive(Debug, Default)]
pub struct IdentifierCache {
    entries: HashMap<String, ResourceIdentifier>,
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, uid: &str) -> Option<&ResourceIdentifier> {
        self.entries.get(uid)
    }

    /// Diff a freshly projected snapshot against the cache
    pub fn observe<S: Snapshot>(&mut self, snapshot: S) -> Observation<S> {
        self.observe_with_parent(snapshot, None)
    }

    /// Like [`observe`](Self::observe), recording the owning record's uid
    pub fn observe_with_parent<S: Snapshot>(
        &mut self,
        snapshot: S,
        parent: Option<&str>,
    ) -> Observation<S> {
        let uid = snapshot.uid().to_string();

        let hash = match fingerprint(&snapshot) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(uid = %uid, error = %e, "Failed to fingerprint snapshot, sending it in full");
                if let Some(entry) = self.entries.get_mut(&uid) {
                    entry.curr = true;
                }
                return Observation {
                    snapshot,
                    emission: Emission::Full,
                };
            }
        };

        if let Emission::Reference { cid } = classify(self.entries.get(&uid), &hash) {
            if let Some(entry) = self.entries.get_mut(&uid) {
                entry.curr = true;
            }
            return Observation {
                snapshot: S::reference(&uid, &cid, true),
                emission: Emission::Reference { cid },
            };
        }

        match self.entries.get_mut(&uid) {
            Some(entry) => {
                entry.fingerprint = hash;
                entry.curr = true;
                entry.name = snapshot.cache_name();
                entry.parent = parent.map(str::to_string);
            }
            None => {
                debug!(uid = %uid, "Caching new object");
                self.entries.insert(
                    uid.clone(),
                    ResourceIdentifier {
                        uid: uid.clone(),
                        cid: String::new(),
                        fingerprint: hash,
                        curr: true,
                        name: snapshot.cache_name(),
                        parent: parent.map(str::to_string),
                    },
                );
            }
        }

        Observation {
            snapshot,
            emission: Emission::Full,
        }
    }

    /// Apply `uid -> cid` acknowledgements to entries still cached
    pub fn acknowledge(&mut self, acks: &HashMap<String, String>) -> usize {
        let mut applied = 0;
        for (uid, cid) in acks {
            if let Some(entry) = self.entries.get_mut(uid) {
                entry.cid = cid.clone();
                applied += 1;
            }
        }
        applied
    }

    /// End-of-cycle sweep: evict unseen entries, reset `curr` on the rest
    pub fn sweep(&mut self) -> Vec<Tombstone> {
        let mut tombstones = Vec::new();
        self.entries.retain(|uid, entry| match sweep_decision(entry) {
            SweepDecision::Keep => {
                entry.curr = false;
                true
            }
            SweepDecision::Evict { tombstone } => {
                match tombstone {
                    Some(tombstone) => tombstones.push(tombstone),
                    None => debug!(uid = %uid, "Evicting unacknowledged object without tombstone"),
                }
                false
            }
        });
        tombstones
    }

    /// Drop every entry
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = &ResourceIdentifier> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommonInfo, NamespaceInfo, PodInfo};

    fn namespace(uid: &str, name: &str) -> NamespaceInfo {
        NamespaceInfo {
            common: CommonInfo {
                uid: uid.to_string(),
                name: name.to_string(),
                exist: true,
                ..Default::default()
            },
        }
    }

    fn acks(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(uid, cid)| (uid.to_string(), cid.to_string()))
            .collect()
    }

    #[test]
    fn test_classify_requires_matching_hash_and_cid() {
        let entry = ResourceIdentifier {
            uid: "u".into(),
            cid: "c".into(),
            fingerprint: "h".into(),
            ..Default::default()
        };
        assert_eq!(classify(None, "h"), Emission::Full);
        assert_eq!(classify(Some(&entry), "other"), Emission::Full);
        assert_eq!(
            classify(Some(&entry), "h"),
            Emission::Reference { cid: "c".into() }
        );

        let unacked = ResourceIdentifier {
            cid: String::new(),
            ..entry
        };
        assert_eq!(classify(Some(&unacked), "h"), Emission::Full);
    }

    #[test]
    fn test_sweep_decision() {
        let seen = ResourceIdentifier {
            curr: true,
            ..Default::default()
        };
        assert_eq!(sweep_decision(&seen), SweepDecision::Keep);

        let unacked = ResourceIdentifier::default();
        assert_eq!(
            sweep_decision(&unacked),
            SweepDecision::Evict { tombstone: None }
        );

        let acked = ResourceIdentifier {
            uid: "u".into(),
            cid: "c".into(),
            ..Default::default()
        };
        assert_eq!(
            sweep_decision(&acked),
            SweepDecision::Evict {
                tombstone: Some(Tombstone {
                    uid: "u".into(),
                    cid: "c".into(),
                    parent: None,
                })
            }
        );
    }

    #[test]
    fn test_fingerprint_ignores_cid() {
        let mut a = namespace("u1", "default");
        let b = a.clone();
        a.common.cid = "assigned".into();
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());

        let c = namespace("u1", "renamed");
        assert_ne!(fingerprint(&b).unwrap(), fingerprint(&c).unwrap());
    }

    #[test]
    fn test_unchanged_acknowledged_object_becomes_reference() {
        let mut cache = IdentifierCache::new();

        let first = cache.observe(namespace("u1", "default"));
        assert!(first.is_full());
        cache.acknowledge(&acks(&[("u1", "c1")]));
        assert!(cache.sweep().is_empty());

        let second = cache.observe(namespace("u1", "default"));
        assert_eq!(
            second.emission,
            Emission::Reference { cid: "c1".into() }
        );
        assert_eq!(second.snapshot, NamespaceInfo::reference("u1", "c1", true));
    }

    #[test]
    fn test_unacknowledged_object_stays_full() {
        let mut cache = IdentifierCache::new();
        cache.observe(namespace("u1", "default"));
        cache.sweep();

        let again = cache.observe(namespace("u1", "default"));
        assert!(again.is_full());
    }

    #[test]
    fn test_changed_object_updates_hash_and_keeps_cid() {
        let mut cache = IdentifierCache::new();
        cache.observe(namespace("u1", "default"));
        cache.acknowledge(&acks(&[("u1", "c1")]));
        cache.sweep();

        let changed = cache.observe(namespace("u1", "prod"));
        assert!(changed.is_full());
        let entry = cache.get("u1").unwrap();
        assert_eq!(entry.cid, "c1");
        assert_eq!(entry.name, "prod");
        assert!(entry.curr);
    }

    #[test]
    fn test_sweep_emits_tombstones_only_for_acknowledged() {
        let mut cache = IdentifierCache::new();
        cache.observe(namespace("u1", "a"));
        cache.observe(namespace("u2", "b"));
        cache.acknowledge(&acks(&[("u1", "c1")]));
        assert!(cache.sweep().is_empty());
        assert_eq!(cache.len(), 2);

        // neither object observed this cycle
        let tombstones = cache.sweep();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].uid, "u1");
        assert_eq!(tombstones[0].cid, "c1");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_acknowledge_ignores_unknown_uids() {
        let mut cache = IdentifierCache::new();
        cache.observe(namespace("u1", "a"));
        let applied = cache.acknowledge(&acks(&[("u1", "c1"), ("gone", "c9")]));
        assert_eq!(applied, 1);
        assert!(cache.get("gone").is_none());
    }

    #[test]
    fn test_reset_clears_entries() {
        let mut cache = IdentifierCache::new();
        cache.observe(namespace("u1", "a"));
        cache.reset();
        assert!(cache.is_empty());
        assert!(cache.observe(namespace("u1", "a")).is_full());
    }

    #[test]
    fn test_parent_recorded_on_tombstone() {
        let mut cache = IdentifierCache::new();
        let mut pod = PodInfo::default();
        pod.common.uid = "p1".into();
        cache.observe_with_parent(pod, Some("node-1"));
        cache.acknowledge(&acks(&[("p1", "pc1")]));
        cache.sweep();

        let tombstones = cache.sweep();
        assert_eq!(tombstones[0].parent.as_deref(), Some("node-1"));
    }

    #[test]
    fn test_entries_carry_cache_name() {
        let mut cache = IdentifierCache::new();
        cache.observe(namespace("u1", "kube-system"));
        let names: Vec<(&str, &str)> = cache
            .entries()
            .map(|entry| (entry.uid.as_str(), entry.name.as_str()))
            .collect();
        assert_eq!(names, vec![("u1", "kube-system")]);
    }
}
