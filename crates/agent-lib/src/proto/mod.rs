//! Protobuf types for the topology sync service
//!
//! With the `proto-gen` feature the code is generated at build time by
//! tonic-build from `proto/topology/v1/topology.proto`. Without it the
//! equivalent hand-maintained definitions below are used.

#[cfg(feature = "proto-gen")]
pub mod topology {
    pub mod v1 {
        tonic::include_proto!("topology.v1");
    }
}

#[cfg(not(feature = "proto-gen"))]
pub mod topology {
    pub mod v1 {
        use prost::Message;

        #[derive(Clone, PartialEq, Message)]
        pub struct ReportRequest {
            #[prost(string, tag = "1")]
            pub agent_id: String,
            #[prost(string, tag = "2")]
            pub node_name: String,
            #[prost(string, tag = "3")]
            pub cluster_id: String,
            #[prost(string, tag = "4")]
            pub handler: String,
            #[prost(string, tag = "5")]
            pub resource: String,
            #[prost(string, tag = "6")]
            pub payload: String,
            #[prost(bool, tag = "7")]
            pub exists: bool,
            #[prost(uint32, tag = "8")]
            pub size: u32,
            #[prost(message, optional, tag = "9")]
            pub timestamp: Option<prost_types::Timestamp>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ReportResponse {
            #[prost(bool, tag = "1")]
            pub success: bool,
            #[prost(int32, tag = "2")]
            pub code: i32,
            #[prost(string, tag = "3")]
            pub error: String,
            #[prost(string, tag = "4")]
            pub result: String,
        }

        pub mod topology_sync_service_client {
            use super::*;
            use tonic::codegen::*;

            #[derive(Debug, Clone)]
            pub struct TopologySyncServiceClient<T> {
                inner: tonic::client::Grpc<T>,
            }

            impl TopologySyncServiceClient<tonic::transport::Channel> {
                pub fn new(channel: tonic::transport::Channel) -> Self {
                    let inner = tonic::client::Grpc::new(channel);
                    Self { inner }
                }
            }

            impl<T> TopologySyncServiceClient<T>
            where
                T: tonic::client::GrpcService<tonic::body::BoxBody>,
                T::Error: Into<StdError>,
                T::ResponseBody: Body<Data = Bytes> + Send + 'static,
                <T::ResponseBody as Body>::Error: Into<StdError> + Send,
            {
                pub async fn report(
                    &mut self,
                    request: impl tonic::IntoRequest<ReportRequest>,
                ) -> Result<tonic::Response<ReportResponse>, tonic::Status> {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/topology.v1.TopologySyncService/Report",
                    );
                    self.inner.unary(request.into_request(), path, codec).await
                }
            }
        }
    }
}

pub use topology::v1::topology_sync_service_client::TopologySyncServiceClient;
pub use topology::v1::*;
