//! Pod relationship links derived from label selectors
//!
//! Services and Deployments publish [`LinkMatcher`]s. The Pod collector
//! applies them to each pod snapshot before fingerprinting, so link
//! changes show up as snapshot changes.

use crate::models::PodInfo;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Resource a pod can be linked to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Service,
    Deployment,
    ReplicaSet,
    DaemonSet,
}

/// Target of relationship links
pub trait Linkable {
    fn namespace(&self) -> &str;

    fn labels(&self) -> &BTreeMap<String, String>;

    fn set_link(&mut self, kind: LinkKind, uid: &str);
}

impl Linkable for PodInfo {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.common.labels
    }

    fn set_link(&mut self, kind: LinkKind, uid: &str) {
        let slot = match kind {
            LinkKind::Service => &mut self.service_uid,
            LinkKind::Deployment => &mut self.deployment_uid,
            LinkKind::ReplicaSet => &mut self.replicaset_uid,
            LinkKind::DaemonSet => &mut self.daemonset_uid,
        };
        *slot = uid.to_string();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// One `matchExpressions` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: Vec<String>,
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::In => value.map_or(false, |v| self.values.contains(v)),
            Operator::NotIn => value.map_or(true, |v| !self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}

/// Equality labels plus set-based requirements, all of which must hold
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    match_labels: BTreeMap<String, String>,
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn from_labels(labels: BTreeMap<String, String>) -> Self {
        Self {
            match_labels: labels,
            requirements: Vec::new(),
        }
    }

    /// Convert an API label selector; `None` for unknown operators
    pub fn from_label_selector(selector: &LabelSelector) -> Option<Self> {
        let mut requirements = Vec::new();
        for expr in selector.match_expressions.iter().flatten() {
            let operator = match expr.operator.as_str() {
                "In" => Operator::In,
                "NotIn" => Operator::NotIn,
                "Exists" => Operator::Exists,
                "DoesNotExist" => Operator::DoesNotExist,
                other => {
                    debug!(operator = %other, "Unsupported selector operator");
                    return None;
                }
            };
            requirements.push(Requirement {
                key: expr.key.clone(),
                operator,
                values: expr.values.clone().unwrap_or_default(),
            });
        }
        Some(Self {
            match_labels: selector.match_labels.clone().unwrap_or_default(),
            requirements,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
            && self.requirements.iter().all(|req| req.matches(labels))
    }
}

/// Links pods in `namespace` selected by `selector` to `uid`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMatcher {
    namespace: String,
    selector: Selector,
    kind: LinkKind,
    uid: String,
}

impl LinkMatcher {
    /// Set the link on `target` if it is selected; returns whether it matched
    pub fn apply(&self, target: &mut dyn Linkable) -> bool {
        if target.namespace() != self.namespace || !self.selector.matches(target.labels()) {
            return false;
        }
        target.set_link(self.kind, &self.uid);
        true
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }
}

/// Matcher for a selector-bearing resource. Empty selectors select nothing.
pub fn build_links(
    namespace: &str,
    selector: Selector,
    kind: LinkKind,
    uid: &str,
) -> Option<LinkMatcher> {
    if selector.is_empty() {
        return None;
    }
    Some(LinkMatcher {
        namespace: namespace.to_string(),
        selector,
        kind,
        uid: uid.to_string(),
    })
}

/// Matchers published by one collector, guarded by their own lock
#[derive(Debug, Clone, Default)]
pub struct SelectorSet {
    matchers: Arc<RwLock<Vec<LinkMatcher>>>,
}

impl SelectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, matchers: Vec<LinkMatcher>) {
        *self.matchers.write().await = matchers;
    }

    pub async fn snapshot(&self) -> Vec<LinkMatcher> {
        self.matchers.read().await.clone()
    }
}

/// A collector that publishes pod link matchers
#[async_trait]
pub trait SelectorSource: Send + Sync {
    /// Rebuild the matchers from current state and return them
    async fn refresh_selectors(&self) -> Vec<LinkMatcher>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn pod(namespace: &str, pod_labels: &[(&str, &str)]) -> PodInfo {
        let mut pod = PodInfo::default();
        pod.namespace = namespace.to_string();
        pod.common.labels = labels(pod_labels);
        pod
    }

    #[test]
    fn test_service_selector_links_matching_pod() {
        let matcher = build_links(
            "shop",
            Selector::from_labels(labels(&[("app", "web")])),
            LinkKind::Service,
            "svc-1",
        )
        .unwrap();

        let mut selected = pod("shop", &[("app", "web"), ("tier", "frontend")]);
        assert!(matcher.apply(&mut selected));
        assert_eq!(selected.service_uid, "svc-1");

        let mut other_namespace = pod("billing", &[("app", "web")]);
        assert!(!matcher.apply(&mut other_namespace));
        assert!(other_namespace.service_uid.is_empty());

        let mut other_labels = pod("shop", &[("app", "api")]);
        assert!(!matcher.apply(&mut other_labels));
    }

    #[test]
    fn test_empty_selector_builds_nothing() {
        assert!(build_links("shop", Selector::default(), LinkKind::Service, "svc").is_none());
    }

    #[test]
    fn test_link_kinds_set_matching_field() {
        let mut target = pod("ns", &[]);
        target.set_link(LinkKind::Deployment, "d");
        target.set_link(LinkKind::ReplicaSet, "r");
        target.set_link(LinkKind::DaemonSet, "ds");
        assert_eq!(target.deployment_uid, "d");
        assert_eq!(target.replicaset_uid, "r");
        assert_eq!(target.daemonset_uid, "ds");
    }

    #[test]
    fn test_label_selector_expressions() {
        let selector = Selector::from_label_selector(&LabelSelector {
            match_labels: Some(labels(&[("app", "web")])),
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "env".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["prod".to_string(), "staging".to_string()]),
                },
                LabelSelectorRequirement {
                    key: "canary".to_string(),
                    operator: "DoesNotExist".to_string(),
                    values: None,
                },
            ]),
        })
        .unwrap();

        assert!(selector.matches(&labels(&[("app", "web"), ("env", "prod")])));
        assert!(!selector.matches(&labels(&[("app", "web"), ("env", "dev")])));
        assert!(!selector.matches(&labels(&[("app", "web"), ("env", "prod"), ("canary", "1")])));
        assert!(!selector.matches(&labels(&[("env", "prod")])));
    }

    #[test]
    fn test_not_in_matches_missing_key() {
        let req = Requirement {
            key: "env".to_string(),
            operator: Operator::NotIn,
            values: vec!["dev".to_string()],
        };
        assert!(req.matches(&labels(&[])));
        assert!(!req.matches(&labels(&[("env", "dev")])));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "x".to_string(),
                operator: "Gt".to_string(),
                values: None,
            }]),
        };
        assert!(Selector::from_label_selector(&selector).is_none());
    }

    #[tokio::test]
    async fn test_selector_set_replace() {
        let set = SelectorSet::new();
        assert!(set.snapshot().await.is_empty());

        let matcher = build_links(
            "ns",
            Selector::from_labels(labels(&[("a", "b")])),
            LinkKind::Service,
            "u",
        )
        .unwrap();
        set.replace(vec![matcher.clone()]).await;
        assert_eq!(set.snapshot().await, vec![matcher]);
    }
}
