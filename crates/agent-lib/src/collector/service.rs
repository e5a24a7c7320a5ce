//! Service collector

use super::base::{common_info, ResourceSync};
use super::links::{build_links, LinkKind, LinkMatcher, Selector, SelectorSet, SelectorSource};
use super::{CollectorContext, CycleReport, ResourceCollector};
use crate::models::{ResourceKind, ServiceInfo};
use crate::source::{namespaced_api, LazySource, ObjectStore, SourceParams};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LoadBalancerStatus, Service, ServicePort};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Placeholder values that never denote a usable address
const INVALID_EXTERNAL_IPS: [&str; 3] = ["<none>", "<pending>", "<unknown>"];

/// Load balancer ingress list longer than this is truncated in narrow output
const NARROW_WIDTH: usize = 16;

/// Unique, sorted load balancer IPs (or hostnames) joined with ","
pub fn load_balancer_ingress(status: Option<&LoadBalancerStatus>, wide: bool) -> String {
    let addresses: BTreeSet<&str> = status
        .and_then(|s| s.ingress.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|ingress| {
            ingress
                .ip
                .as_deref()
                .filter(|ip| !ip.is_empty())
                .or_else(|| ingress.hostname.as_deref().filter(|h| !h.is_empty()))
        })
        .collect();
    let joined = addresses.into_iter().collect::<Vec<_>>().join(",");

    if !wide && joined.len() > NARROW_WIDTH {
        let head: String = joined.chars().take(13).collect();
        return format!("{head}...");
    }
    joined
}

/// External address column as shown by `kubectl get svc`
pub fn service_external_ip(svc: &Service, wide: bool) -> String {
    let spec = svc.spec.as_ref();
    let external_ips = spec
        .and_then(|s| s.external_ips.clone())
        .unwrap_or_default();

    match spec.and_then(|s| s.type_.as_deref()).unwrap_or_default() {
        "ClusterIP" | "NodePort" => {
            if external_ips.is_empty() {
                "<none>".to_string()
            } else {
                external_ips.join(",")
            }
        }
        "LoadBalancer" => {
            let lb = load_balancer_ingress(
                svc.status.as_ref().and_then(|s| s.load_balancer.as_ref()),
                wide,
            );
            if !external_ips.is_empty() {
                let mut results: Vec<String> = Vec::new();
                if !lb.is_empty() {
                    results.extend(lb.split(',').map(str::to_string));
                }
                results.extend(external_ips);
                results.join(",")
            } else if !lb.is_empty() {
                lb
            } else {
                "<pending>".to_string()
            }
        }
        "ExternalName" => spec
            .and_then(|s| s.external_name.clone())
            .unwrap_or_default(),
        _ => "<unknown>".to_string(),
    }
}

/// `nodePort->port/protocol/name` for each port
pub fn service_ports(ports: &[ServicePort]) -> Vec<String> {
    ports
        .iter()
        .map(|p| {
            format!(
                "{}->{}/{}/{}",
                p.node_port.unwrap_or(0),
                p.port,
                p.protocol.as_deref().unwrap_or_default(),
                p.name.as_deref().unwrap_or_default()
            )
        })
        .collect()
}

pub fn project_service(svc: &Service, wide: bool) -> ServiceInfo {
    let spec = svc.spec.as_ref();
    ServiceInfo {
        common: common_info(&svc.metadata),
        namespace: svc.metadata.namespace.clone().unwrap_or_default(),
        cluster_ip: spec.and_then(|s| s.cluster_ip.clone()).unwrap_or_default(),
        external_ip: service_external_ip(svc, wide),
        ports: service_ports(spec.and_then(|s| s.ports.as_deref()).unwrap_or_default()),
        service_type: spec.and_then(|s| s.type_.clone()).unwrap_or_default(),
        selector: spec.and_then(|s| s.selector.clone()).unwrap_or_default(),
    }
}

/// First usable address from an external IP column
pub fn select_agent_ip(external_ip: &str) -> Option<&str> {
    if external_ip.is_empty() || INVALID_EXTERNAL_IPS.contains(&external_ip) {
        return None;
    }
    external_ip
        .split(',')
        .map(str::trim)
        .find(|ip| !ip.is_empty())
}

pub struct ServiceCollector {
    sync: ResourceSync,
    source: LazySource<Service>,
    selectors: SelectorSet,
    wide: bool,
}

impl ServiceCollector {
    pub fn new(ctx: &CollectorContext) -> Self {
        Self::with_source(
            ctx.sync(ResourceKind::Service),
            ctx.namespaced_source(ResourceKind::Service, SourceParams::default(), namespaced_api::<Service>),
        )
    }

    pub fn with_source(sync: ResourceSync, source: LazySource<Service>) -> Self {
        Self {
            sync,
            source,
            selectors: SelectorSet::new(),
            wide: true,
        }
    }

    fn store(&self) -> Option<&ObjectStore<Service>> {
        let store = self.source.get();
        if store.is_none() {
            warn!(kind = %ResourceKind::Service, "Kubernetes client not enabled");
        }
        store
    }

    /// Resolver from `(namespace, name)` to a service uid. Reported services
    /// are found in the identifier cache; the watch store covers services
    /// that are watched but not reported.
    pub async fn resolve_uids(&self) -> impl Fn(&str, &str) -> Option<String> {
        let cached: HashMap<String, String> = {
            let cache = self.sync.cache();
            let cache = cache.lock().await;
            cache
                .entries()
                .map(|entry| (entry.name.clone(), entry.uid.clone()))
                .collect()
        };
        let watched: HashMap<String, String> = self
            .source
            .get()
            .map(|store| {
                store
                    .list()
                    .iter()
                    .filter_map(|svc| {
                        let meta = &svc.metadata;
                        let key = format!(
                            "{}/{}",
                            meta.namespace.as_deref().unwrap_or_default(),
                            meta.name.as_deref()?
                        );
                        Some((key, meta.uid.clone()?))
                    })
                    .collect()
            })
            .unwrap_or_default();

        move |namespace: &str, name: &str| -> Option<String> {
            let key = format!("{namespace}/{name}");
            cached.get(&key).or_else(|| watched.get(&key)).cloned()
        }
    }

    /// Address of the service named `name`, if it has a usable one
    pub fn agent_external_ip(&self, name: &str) -> Option<String> {
        let store = self.store()?;
        store
            .list()
            .iter()
            .filter(|svc| svc.metadata.name.as_deref() == Some(name))
            .find_map(|svc| select_agent_ip(&service_external_ip(svc, true)).map(str::to_string))
    }
}

#[async_trait]
impl SelectorSource for ServiceCollector {
    async fn refresh_selectors(&self) -> Vec<LinkMatcher> {
        let Some(store) = self.store() else {
            return self.selectors.snapshot().await;
        };

        let matchers: Vec<LinkMatcher> = store
            .list()
            .iter()
            .filter_map(|svc| {
                let selector = svc.spec.as_ref()?.selector.clone()?;
                build_links(
                    svc.metadata.namespace.as_deref().unwrap_or_default(),
                    Selector::from_labels(selector),
                    LinkKind::Service,
                    svc.metadata.uid.as_deref().unwrap_or_default(),
                )
            })
            .collect();

        debug!(count = matchers.len(), "Refreshed service selectors");
        self.selectors.replace(matchers.clone()).await;
        matchers
    }
}

#[async_trait]
impl ResourceCollector for ServiceCollector {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    async fn report(&self) -> CycleReport {
        let Some(store) = self.store() else {
            return self.sync.skipped();
        };
        let snapshots = store
            .list()
            .iter()
            .map(|svc| project_service(svc, self.wide))
            .collect();
        self.sync.run_cycle(snapshots).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, ServiceSpec, ServiceStatus};

    fn service(type_: &str) -> Service {
        Service {
            spec: Some(ServiceSpec {
                type_: Some(type_.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn with_lb(mut svc: Service, entries: &[(&str, &str)]) -> Service {
        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(
                    entries
                        .iter()
                        .map(|(ip, host)| LoadBalancerIngress {
                            ip: (!ip.is_empty()).then(|| ip.to_string()),
                            hostname: (!host.is_empty()).then(|| host.to_string()),
                            ..Default::default()
                        })
                        .collect(),
                ),
            }),
            ..Default::default()
        });
        svc
    }

    fn with_external_ips(mut svc: Service, ips: &[&str]) -> Service {
        if let Some(spec) = svc.spec.as_mut() {
            spec.external_ips = Some(ips.iter().map(|s| s.to_string()).collect());
        }
        svc
    }

    #[test]
    fn test_cluster_ip_external_ip() {
        assert_eq!(service_external_ip(&service("ClusterIP"), true), "<none>");
        let svc = with_external_ips(service("NodePort"), &["1.1.1.1", "2.2.2.2"]);
        assert_eq!(service_external_ip(&svc, true), "1.1.1.1,2.2.2.2");
    }

    #[test]
    fn test_load_balancer_external_ip() {
        assert_eq!(service_external_ip(&service("LoadBalancer"), true), "<pending>");

        let svc = with_lb(service("LoadBalancer"), &[("10.0.0.2", ""), ("", "lb.example.com"), ("10.0.0.2", "")]);
        assert_eq!(service_external_ip(&svc, true), "10.0.0.2,lb.example.com");

        let svc = with_external_ips(with_lb(service("LoadBalancer"), &[("10.0.0.2", "")]), &["3.3.3.3"]);
        assert_eq!(service_external_ip(&svc, true), "10.0.0.2,3.3.3.3");
    }

    #[test]
    fn test_load_balancer_narrow_truncation() {
        let svc = with_lb(service("LoadBalancer"), &[("10.0.0.1", ""), ("10.0.0.2", "")]);
        assert_eq!(service_external_ip(&svc, false), "10.0.0.1,10.0...");
        assert_eq!(service_external_ip(&svc, true), "10.0.0.1,10.0.0.2");
    }

    #[test]
    fn test_external_name_and_unknown() {
        let mut svc = service("ExternalName");
        svc.spec.as_mut().unwrap().external_name = Some("db.example.com".to_string());
        assert_eq!(service_external_ip(&svc, true), "db.example.com");
        assert_eq!(service_external_ip(&Service::default(), true), "<unknown>");
    }

    #[test]
    fn test_service_ports() {
        let ports = vec![
            ServicePort {
                name: Some("http".to_string()),
                node_port: Some(30080),
                port: 80,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ServicePort {
                port: 53,
                protocol: Some("UDP".to_string()),
                ..Default::default()
            },
        ];
        assert_eq!(service_ports(&ports), vec!["30080->80/TCP/http", "0->53/UDP/"]);
    }

    #[test]
    fn test_select_agent_ip() {
        assert_eq!(select_agent_ip("<pending>"), None);
        assert_eq!(select_agent_ip("<none>"), None);
        assert_eq!(select_agent_ip(""), None);
        assert_eq!(select_agent_ip("1.2.3.4,5.6.7.8"), Some("1.2.3.4"));
    }
}
