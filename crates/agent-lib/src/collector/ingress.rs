//! Ingress collector
//!
//! Path backends are resolved to service uids through the Service
//! collector: its identifier cache when Services are reported first,
//! otherwise its watch store.

use super::base::{common_info, ResourceSync};
use super::service::ServiceCollector;
use super::{CollectorContext, CycleReport, ResourceCollector};
use crate::models::{
    HttpPathInfo, HttpRuleInfo, IngressBackendInfo, IngressInfo, IngressRuleInfo, IngressTlsInfo,
    ResourceKind,
};
use crate::source::{namespaced_api, LazySource, SourceParams};
use async_trait::async_trait;
use k8s_openapi::api::networking::v1::{Ingress, IngressBackend, IngressLoadBalancerStatus};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

/// Unique load balancer IPs (hostname when no IP) joined with ","
pub fn ingress_address(status: Option<&IngressLoadBalancerStatus>) -> String {
    let addresses: BTreeSet<&str> = status
        .and_then(|s| s.ingress.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|lb| {
            lb.ip
                .as_deref()
                .filter(|ip| !ip.is_empty())
                .or_else(|| lb.hostname.as_deref().filter(|h| !h.is_empty()))
        })
        .collect();
    addresses.into_iter().collect::<Vec<_>>().join(",")
}

/// Backend port as its number, or its name when only a name is set
fn backend_port(backend: &IngressBackend) -> String {
    let port = backend.service.as_ref().and_then(|s| s.port.as_ref());
    match port {
        Some(port) => match (port.number, port.name.as_deref()) {
            (Some(number), _) => number.to_string(),
            (None, Some(name)) => name.to_string(),
            (None, None) => String::new(),
        },
        None => String::new(),
    }
}

/// Project an ingress; `resolve(namespace, name)` maps a backend service
/// to its uid
pub fn project_ingress<F>(ingress: &Ingress, resolve: F) -> IngressInfo
where
    F: Fn(&str, &str) -> Option<String>,
{
    let namespace = ingress.metadata.namespace.clone().unwrap_or_default();
    let ingress_name = ingress.metadata.name.as_deref().unwrap_or_default();
    let spec = ingress.spec.as_ref();

    let tls = spec
        .and_then(|s| s.tls.as_ref())
        .into_iter()
        .flatten()
        .map(|t| IngressTlsInfo {
            hosts: t.hosts.clone().unwrap_or_default(),
            secret_name: t.secret_name.clone().unwrap_or_default(),
        })
        .collect();

    let rules = spec
        .and_then(|s| s.rules.as_ref())
        .into_iter()
        .flatten()
        .map(|rule| {
            let paths = rule
                .http
                .as_ref()
                .map(|http| http.paths.as_slice())
                .unwrap_or_default()
                .iter()
                .map(|p| {
                    let service_name = p
                        .backend
                        .service
                        .as_ref()
                        .map(|s| s.name.clone())
                        .unwrap_or_default();
                    let service_uid = if service_name.is_empty() {
                        None
                    } else {
                        resolve(&namespace, &service_name)
                    };
                    if service_uid.is_none() {
                        warn!(
                            ingress = %ingress_name,
                            namespace = %namespace,
                            service = %service_name,
                            "Ingress backend service uid not found"
                        );
                    }
                    HttpPathInfo {
                        path: p.path.clone().unwrap_or_default(),
                        backend: IngressBackendInfo {
                            service_port: backend_port(&p.backend),
                            service_uid: service_uid.unwrap_or_default(),
                            service_name,
                        },
                    }
                })
                .collect();

            IngressRuleInfo {
                host: rule.host.clone().unwrap_or_default(),
                http: HttpRuleInfo { paths },
            }
        })
        .collect();

    IngressInfo {
        common: common_info(&ingress.metadata),
        address: ingress_address(ingress.status.as_ref().and_then(|s| s.load_balancer.as_ref())),
        annotations: ingress.metadata.annotations.clone().unwrap_or_default(),
        namespace,
        tls,
        rules,
    }
}

pub struct IngressCollector {
    sync: ResourceSync,
    source: LazySource<Ingress>,
    services: Arc<ServiceCollector>,
}

impl IngressCollector {
    pub fn new(ctx: &CollectorContext, services: Arc<ServiceCollector>) -> Self {
        Self::with_source(
            ctx.sync(ResourceKind::Ingress),
            ctx.namespaced_source(ResourceKind::Ingress, SourceParams::default(), namespaced_api::<Ingress>),
            services,
        )
    }

    pub fn with_source(
        sync: ResourceSync,
        source: LazySource<Ingress>,
        services: Arc<ServiceCollector>,
    ) -> Self {
        Self {
            sync,
            source,
            services,
        }
    }
}

#[async_trait]
impl ResourceCollector for IngressCollector {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Ingress
    }

    async fn report(&self) -> CycleReport {
        let Some(store) = self.source.get() else {
            warn!(kind = %ResourceKind::Ingress, "Kubernetes client not enabled");
            return self.sync.skipped();
        };

        let resolve = self.services.resolve_uids().await;
        let snapshots = store
            .list()
            .iter()
            .map(|ing| project_ingress(ing, &resolve))
            .collect();
        self.sync.run_cycle(snapshots).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, IngressLoadBalancerIngress, IngressRule,
        IngressServiceBackend, IngressSpec, IngressStatus, IngressTLS, ServiceBackendPort,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn path(service: &str, number: Option<i32>, name: Option<&str>) -> HTTPIngressPath {
        HTTPIngressPath {
            path: Some("/api".to_string()),
            path_type: "Prefix".to_string(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: service.to_string(),
                    port: Some(ServiceBackendPort {
                        number,
                        name: name.map(str::to_string),
                    }),
                }),
                resource: None,
            },
        }
    }

    fn ingress() -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                name: Some("shop".to_string()),
                namespace: Some("shop".to_string()),
                uid: Some("ing-1".to_string()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                tls: Some(vec![IngressTLS {
                    hosts: Some(vec!["shop.example.com".to_string()]),
                    secret_name: Some("shop-tls".to_string()),
                }]),
                rules: Some(vec![
                    IngressRule {
                        host: Some("shop.example.com".to_string()),
                        http: Some(HTTPIngressRuleValue {
                            paths: vec![path("web", Some(80), None), path("api", None, Some("grpc"))],
                        }),
                    },
                    IngressRule {
                        host: Some("empty.example.com".to_string()),
                        http: None,
                    },
                ]),
                ..Default::default()
            }),
            status: Some(IngressStatus {
                load_balancer: Some(IngressLoadBalancerStatus {
                    ingress: Some(vec![
                        IngressLoadBalancerIngress {
                            ip: Some("10.0.0.9".to_string()),
                            ..Default::default()
                        },
                        IngressLoadBalancerIngress {
                            hostname: Some("lb.example.com".to_string()),
                            ..Default::default()
                        },
                    ]),
                }),
            }),
        }
    }

    #[test]
    fn test_project_ingress_resolves_backends() {
        let info = project_ingress(&ingress(), |namespace, name| {
            (namespace == "shop" && name == "web").then(|| "svc-web".to_string())
        });

        assert_eq!(info.address, "10.0.0.9,lb.example.com");
        assert_eq!(info.tls[0].secret_name, "shop-tls");
        assert_eq!(info.rules.len(), 2);

        let paths = &info.rules[0].http.paths;
        assert_eq!(paths[0].backend.service_uid, "svc-web");
        assert_eq!(paths[0].backend.service_port, "80");
        assert!(paths[1].backend.service_uid.is_empty());
        assert_eq!(paths[1].backend.service_port, "grpc");
        assert!(info.rules[1].http.paths.is_empty());
    }

    #[test]
    fn test_ingress_rules_always_carry_http() {
        let info = project_ingress(&ingress(), |_, _| None);
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["Rules"][1]["http"], serde_json::json!({"paths": []}));
        assert_eq!(value["Namespace"], "shop");
    }
}
