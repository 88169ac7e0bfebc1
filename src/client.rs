//! gRPC client facade for the aggregator
//!
//! Composes the channel factory, retry pacing, identity validation, and
//! per-operation connection lifecycle into the operation set a collaborator
//! (or administrator) uses against the aggregator.
//!
//! Every operation runs as `lifecycle(resend(retry(call)))`: a fresh channel
//! is opened on entry and torn down on exit regardless of outcome, transient
//! transport failures are absorbed by the retry layer, and every headed
//! response is validated against the configured identities before its payload
//! reaches the caller.
//!
//! Operations on one client instance are serialized internally; the channel
//! slot is the only mutable state and is guarded for the whole
//! connect-call-disconnect span.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tonic::transport::Channel;
use tonic::{Code, Status};
use tracing::{debug, error, info};

use crate::channel::{AggregatorEndpoint, ChannelFactory, SecurityConfig};
use crate::codec::{proto_to_datastream, NoCompression, TensorCodec};
use crate::error::Error;
use crate::header::Identity;
use crate::proto::aggregator_client::AggregatorClient;
use crate::proto::{
    AddCollaboratorRequest, ConnectivityCheckRequest, GetAggregatedTensorRequest,
    GetExperimentStatusRequest, GetTasksRequest, GetTrainedModelRequest, ModelType, NamedTensor,
    RemoveCollaboratorRequest, SetStragglerCutoffTimeRequest, TaskResults,
};
use crate::retry::{retry_rpc, Backoff, ConstantBackoff, RetryPolicy};
use crate::Result;

/// Configuration for the aggregator client
pub struct AggregatorClientConfig {
    /// Aggregator hostname
    pub host: String,
    /// Aggregator port
    pub port: u16,
    /// Channel security posture
    pub security: SecurityConfig,
    /// Unique id of the aggregator
    pub aggregator_uuid: String,
    /// Unique id of the federation session
    pub federation_uuid: String,
    /// Shared certificate common name constraint, if any
    pub single_col_cert_common_name: Option<String>,
    /// Interval between reconnect attempts on transient failures
    pub reconnect_interval: Duration,
    /// Which transport failures are transient, and the optional attempt cap
    pub retry: RetryPolicy,
    /// Bound on facade-level resend attempts (0 = unbounded)
    pub max_resend_attempts: u32,
    /// Chunk size for streamed task-result payloads
    pub chunk_size: usize,
}

impl Default for AggregatorClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: crate::DEFAULT_AGGREGATOR_PORT,
            security: SecurityConfig::Insecure,
            aggregator_uuid: String::new(),
            federation_uuid: String::new(),
            single_col_cert_common_name: None,
            reconnect_interval: crate::DEFAULT_RECONNECT_INTERVAL,
            retry: RetryPolicy::default(),
            max_resend_attempts: 0, // unbounded
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Per-collaborator status inside an experiment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollaboratorState {
    /// Collaborator name
    pub name: String,
    /// Status string as reported by the aggregator
    pub status: String,
    /// Round the collaborator last reported
    pub round_number: u32,
}

/// Typed view of the aggregator's experiment status response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExperimentStatus {
    /// Experiment name
    pub experiment_name: String,
    /// Overall experiment status string
    pub status: String,
    /// Current federation round
    pub current_round: u32,
    /// Per-collaborator states
    pub collaborators: Vec<CollaboratorState>,
}

/// Client to the aggregator over gRPC-TLS.
///
/// Endpoint, security posture, and identities are fixed at construction; the
/// channel is replaced wholesale on every operation and never mutated in
/// place.
pub struct AggregatorGrpcClient {
    endpoint: AggregatorEndpoint,
    security: SecurityConfig,
    identity: Identity,
    retry: RetryPolicy,
    max_resend_attempts: u32,
    chunk_size: usize,
    backoff: Arc<dyn Backoff>,
    codec: Arc<dyn TensorCodec>,
    /// The only mutable shared state; guarded for the whole operation span
    channel: Mutex<Option<Channel>>,
}

/// An open connection for the duration of one operation.
///
/// Holds the channel-slot guard so concurrent operations on the same client
/// serialize, and clears the slot on drop so teardown happens on success and
/// failure alike.
struct Connection<'a> {
    slot: MutexGuard<'a, Option<Channel>>,
    channel: Channel,
}

impl Connection<'_> {
    fn stub(&self) -> AggregatorClient<Channel> {
        AggregatorClient::new(self.channel.clone())
    }
}

impl Drop for Connection<'_> {
    fn drop(&mut self) {
        self.slot.take();
        debug!("Disconnected from aggregator");
    }
}

impl AggregatorGrpcClient {
    /// Create a new client from the given configuration.
    ///
    /// Uses constant backoff at the configured reconnect interval and the
    /// passthrough tensor codec; both are replaceable via [`with_backoff`]
    /// and [`with_codec`].
    ///
    /// [`with_backoff`]: Self::with_backoff
    /// [`with_codec`]: Self::with_codec
    pub fn new(config: AggregatorClientConfig) -> Self {
        let endpoint = AggregatorEndpoint::new(config.host, config.port);
        let backoff = ConstantBackoff::new(config.reconnect_interval, endpoint.to_string());

        Self {
            identity: Identity {
                aggregator_uuid: config.aggregator_uuid,
                federation_uuid: config.federation_uuid,
                single_col_cert_common_name: config.single_col_cert_common_name,
            },
            security: config.security,
            retry: config.retry,
            max_resend_attempts: config.max_resend_attempts,
            chunk_size: config.chunk_size,
            backoff: Arc::new(backoff),
            codec: Arc::new(NoCompression),
            channel: Mutex::new(None),
            endpoint,
        }
    }

    /// Replace the backoff policy (tests inject a non-sleeping one)
    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Replace the tensor codec used by trained-model retrieval
    pub fn with_codec(mut self, codec: Arc<dyn TensorCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// The aggregator endpoint this client targets
    pub fn endpoint(&self) -> &AggregatorEndpoint {
        &self.endpoint
    }

    /// Close the current channel, if any.
    ///
    /// Idempotent; closing an already-closed channel is a no-op.
    pub async fn disconnect(&self) {
        let mut slot = self.channel.lock().await;
        slot.take();
        debug!(endpoint = %self.endpoint, "Disconnecting from aggregator");
    }

    /// Discard any existing channel and open a fresh one.
    ///
    /// Idempotent: a reconnect immediately after another reconnect never
    /// fails on account of the previous channel.
    pub async fn reconnect(&self) -> Result<()> {
        let mut slot = self.channel.lock().await;
        slot.take();
        *slot = Some(ChannelFactory::open(&self.endpoint, &self.security)?);
        debug!(endpoint = %self.endpoint, "Connecting to aggregator");
        Ok(())
    }

    /// Open a fresh channel for one operation, discarding any leftover one.
    async fn connect(&self) -> Result<Connection<'_>> {
        let mut slot = self.channel.lock().await;
        slot.take();
        let channel = ChannelFactory::open(&self.endpoint, &self.security)?;
        *slot = Some(channel.clone());
        debug!(endpoint = %self.endpoint, "Connecting to aggregator");
        Ok(Connection { slot, channel })
    }

    /// Resilient call path for collaborator operations.
    ///
    /// Inner layer: status-gated retry with backoff pacing. Outer layer: any
    /// remaining failure except an authentication rejection is resent
    /// (unbounded by default, capped by `max_resend_attempts`);
    /// authentication failures propagate immediately.
    async fn call_resilient<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, Status>>,
    {
        let mut resends = 0u32;

        loop {
            match retry_rpc(&self.retry, self.backoff.as_ref(), operation, &mut call).await {
                Ok(response) => return Ok(response),
                Err(status) if status.code() == Code::Unauthenticated => {
                    return Err(Error::Authentication(status.message().to_string()));
                }
                Err(status) => {
                    if status.code() == Code::Unknown {
                        info!(
                            endpoint = %self.endpoint,
                            "Attempting to resend data request to aggregator"
                        );
                    }
                    resends += 1;
                    if self.max_resend_attempts > 0 && resends >= self.max_resend_attempts {
                        return Err(Error::from_status(status));
                    }
                }
            }
        }
    }

    /// Terminal call path for connectivity and administrative operations.
    ///
    /// No retry: any transport failure is reported with its code and detail
    /// text and returned as a typed error for the embedding application to
    /// act on.
    fn call_terminal<T>(
        &self,
        operation: &str,
        result: std::result::Result<tonic::Response<T>, Status>,
    ) -> Result<T> {
        match result {
            Ok(response) => Ok(response.into_inner()),
            Err(status) => {
                error!(
                    operation = %operation,
                    code = ?status.code(),
                    details = %status.message(),
                    "gRPC error"
                );
                Err(Error::from_status(status))
            }
        }
    }

    /// Get tasks from the aggregator.
    ///
    /// Returns `(tasks, round_number, sleep_time, quit)`.
    pub async fn get_tasks(
        &self,
        collaborator_name: &str,
    ) -> Result<(Vec<String>, u32, u32, bool)> {
        let request = GetTasksRequest {
            header: Some(self.identity.stamp(collaborator_name)),
        };

        let conn = self.connect().await?;
        let stub = conn.stub();
        let response = self
            .call_resilient("get_tasks", move || {
                let mut stub = stub.clone();
                let request = request.clone();
                async move { Ok(stub.get_tasks(request).await?.into_inner()) }
            })
            .await?;

        self.identity
            .validate(response.header.as_ref(), collaborator_name)?;

        Ok((
            response.tasks,
            response.round_number,
            response.sleep_time,
            response.quit,
        ))
    }

    /// Get an aggregated tensor from the aggregator
    pub async fn get_aggregated_tensor(
        &self,
        collaborator_name: &str,
        tensor_name: &str,
        round_number: u32,
        report: bool,
        tags: &[String],
        require_lossless: bool,
    ) -> Result<NamedTensor> {
        let request = GetAggregatedTensorRequest {
            header: Some(self.identity.stamp(collaborator_name)),
            tensor_name: tensor_name.to_string(),
            round_number,
            report,
            tags: tags.to_vec(),
            require_lossless,
        };

        let conn = self.connect().await?;
        let stub = conn.stub();
        let response = self
            .call_resilient("get_aggregated_tensor", move || {
                let mut stub = stub.clone();
                let request = request.clone();
                async move { Ok(stub.get_aggregated_tensor(request).await?.into_inner()) }
            })
            .await?;

        self.identity
            .validate(response.header.as_ref(), collaborator_name)?;

        response
            .tensor
            .ok_or_else(|| Error::codec("aggregated tensor missing from response"))
    }

    /// Send local task results to the aggregator.
    ///
    /// The request may exceed a single frame; it is serialized and split into
    /// a sequence of stream chunks, reassembled server-side, and acknowledged
    /// with a single headed response.
    pub async fn send_local_task_results(
        &self,
        collaborator_name: &str,
        round_number: u32,
        task_name: &str,
        data_size: i32,
        named_tensors: Vec<NamedTensor>,
    ) -> Result<()> {
        let results = TaskResults {
            header: Some(self.identity.stamp(collaborator_name)),
            round_number,
            task_name: task_name.to_string(),
            data_size,
            tensors: named_tensors,
        };
        let frames = proto_to_datastream(&results, self.chunk_size);

        let conn = self.connect().await?;
        let stub = conn.stub();
        let response = self
            .call_resilient("send_local_task_results", move || {
                let mut stub = stub.clone();
                // The frame stream is rebuilt per attempt so a retried call
                // resends the whole payload
                let frames = frames.clone();
                async move {
                    Ok(stub
                        .send_local_task_results(tokio_stream::iter(frames))
                        .await?
                        .into_inner())
                }
            })
            .await?;

        self.identity
            .validate(response.header.as_ref(), collaborator_name)?;

        Ok(())
    }

    /// Check if the collaborator can reach the aggregator at all.
    ///
    /// Unlike the worker-loop operations this path does not retry: a
    /// transport failure is reported and returned so the caller can stop.
    pub async fn connectivity_check(&self, collaborator_name: &str) -> Result<()> {
        let request = ConnectivityCheckRequest {
            header: Some(self.identity.stamp(collaborator_name)),
        };

        let conn = self.connect().await?;
        let mut stub = conn.stub();
        let response =
            self.call_terminal("connectivity_check", stub.connectivity_check(request).await)?;

        self.identity
            .validate(response.header.as_ref(), collaborator_name)?;

        Ok(())
    }

    /// Register a collaborator with the aggregator (administrative)
    pub async fn add_collaborator(
        &self,
        admin_name: &str,
        collaborator_label: &str,
        collaborator_cn: &str,
    ) -> Result<()> {
        let request = AddCollaboratorRequest {
            header: Some(self.identity.stamp(admin_name)),
            collaborator_label: collaborator_label.to_string(),
            collaborator_cn: collaborator_cn.to_string(),
        };

        let conn = self.connect().await?;
        let mut stub = conn.stub();
        let response = self.call_terminal("add_collaborator", stub.add_collaborator(request).await)?;

        self.identity.validate(response.header.as_ref(), admin_name)?;

        Ok(())
    }

    /// Remove a collaborator from the aggregator (administrative)
    pub async fn remove_collaborator(
        &self,
        admin_name: &str,
        collaborator_label: &str,
        collaborator_cn: &str,
    ) -> Result<()> {
        let request = RemoveCollaboratorRequest {
            header: Some(self.identity.stamp(admin_name)),
            collaborator_label: collaborator_label.to_string(),
            collaborator_cn: collaborator_cn.to_string(),
        };

        let conn = self.connect().await?;
        let mut stub = conn.stub();
        let response =
            self.call_terminal("remove_collaborator", stub.remove_collaborator(request).await)?;

        self.identity.validate(response.header.as_ref(), admin_name)?;

        Ok(())
    }

    /// Fetch the current experiment status (administrative)
    pub async fn get_experiment_status(&self, admin_name: &str) -> Result<ExperimentStatus> {
        let request = GetExperimentStatusRequest {
            header: Some(self.identity.stamp(admin_name)),
        };

        let conn = self.connect().await?;
        let mut stub = conn.stub();
        let response = self.call_terminal(
            "get_experiment_status",
            stub.get_experiment_status(request).await,
        )?;

        self.identity.validate(response.header.as_ref(), admin_name)?;

        Ok(ExperimentStatus {
            experiment_name: response.experiment_name,
            status: response.status,
            current_round: response.current_round,
            collaborators: response
                .collaborators
                .into_iter()
                .map(|c| CollaboratorState {
                    name: c.name,
                    status: c.status,
                    round_number: c.round_number,
                })
                .collect(),
        })
    }

    /// Set the straggler cutoff time in seconds (administrative)
    pub async fn set_straggler_cutoff_time(
        &self,
        admin_name: &str,
        timeout_in_seconds: u32,
    ) -> Result<()> {
        let request = SetStragglerCutoffTimeRequest {
            header: Some(self.identity.stamp(admin_name)),
            timeout_in_seconds,
        };

        let conn = self.connect().await?;
        let mut stub = conn.stub();
        let response = self.call_terminal(
            "set_straggler_cutoff_time",
            stub.set_straggler_cutoff_time(request).await,
        )?;

        self.identity.validate(response.header.as_ref(), admin_name)?;

        Ok(())
    }

    /// Retrieve a trained model as a named-tensor mapping.
    ///
    /// This is the one unheaded operation: the request pair is addressed to
    /// the administrative stub and carries no identity header, so no header
    /// validation applies. Tensor payloads are decoded through the injected
    /// codec.
    pub async fn get_trained_model(
        &self,
        experiment_name: &str,
        model_type: ModelType,
    ) -> Result<HashMap<String, Vec<u8>>> {
        let request = GetTrainedModelRequest {
            experiment_name: experiment_name.to_string(),
            model_type: model_type as i32,
        };

        let conn = self.connect().await?;
        let mut stub = conn.stub();
        let response =
            self.call_terminal("get_trained_model", stub.get_trained_model(request).await)?;

        let model = response.model_proto.unwrap_or_default();
        let mut tensors = HashMap::with_capacity(model.tensors.len());
        for tensor in &model.tensors {
            tensors.insert(tensor.name.clone(), self.codec.decode(tensor)?);
        }

        Ok(tensors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::{Request, Response, Streaming};

    use crate::codec::datastream_to_proto;
    use crate::proto::aggregator_server::{Aggregator, AggregatorServer};
    use crate::proto::{
        AddCollaboratorResponse, CollaboratorStatusProto, ConnectivityCheckRequest,
        ConnectivityCheckResponse, DataStream, GetAggregatedTensorResponse,
        GetExperimentStatusResponse, GetTasksResponse, GetTrainedModelResponse, MessageHeader,
        ModelProto, RemoveCollaboratorResponse, SendLocalTaskResultsResponse,
        SetStragglerCutoffTimeResponse,
    };

    /// Backoff that never sleeps, only counts waits
    struct CountingBackoff {
        waits: AtomicU32,
    }

    impl CountingBackoff {
        fn new() -> Self {
            Self {
                waits: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl Backoff for CountingBackoff {
        async fn wait(&self) {
            self.waits.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Scriptable in-process aggregator
    struct FakeAggregator {
        aggregator_uuid: String,
        federation_uuid: String,
        received_results: Arc<StdMutex<Option<TaskResults>>>,
        /// Remaining injected failures for GetAggregatedTensor
        tensor_failures_left: Arc<AtomicU32>,
        tensor_failure_code: Code,
        connectivity_code: Option<Code>,
        /// Corrupt the receiver field of every reply header
        tamper_receiver: bool,
    }

    impl FakeAggregator {
        fn new() -> Self {
            Self {
                aggregator_uuid: "agg-uuid".to_string(),
                federation_uuid: "fed-uuid".to_string(),
                received_results: Arc::new(StdMutex::new(None)),
                tensor_failures_left: Arc::new(AtomicU32::new(0)),
                tensor_failure_code: Code::Unavailable,
                connectivity_code: None,
                tamper_receiver: false,
            }
        }

        fn reply_header(&self, request_header: &Option<MessageHeader>) -> MessageHeader {
            let requester = request_header
                .as_ref()
                .map(|h| h.sender.clone())
                .unwrap_or_default();
            MessageHeader {
                sender: self.aggregator_uuid.clone(),
                receiver: if self.tamper_receiver {
                    "someone-else".to_string()
                } else {
                    requester
                },
                federation_uuid: self.federation_uuid.clone(),
                single_col_cert_common_name: String::new(),
            }
        }
    }

    #[tonic::async_trait]
    impl Aggregator for FakeAggregator {
        async fn get_tasks(
            &self,
            request: Request<GetTasksRequest>,
        ) -> std::result::Result<Response<GetTasksResponse>, Status> {
            let header = self.reply_header(&request.into_inner().header);
            Ok(Response::new(GetTasksResponse {
                header: Some(header),
                round_number: 3,
                tasks: vec!["train".to_string(), "validate".to_string()],
                sleep_time: 0,
                quit: false,
            }))
        }

        async fn get_aggregated_tensor(
            &self,
            request: Request<GetAggregatedTensorRequest>,
        ) -> std::result::Result<Response<GetAggregatedTensorResponse>, Status> {
            if self.tensor_failures_left.load(Ordering::SeqCst) > 0 {
                self.tensor_failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(Status::new(self.tensor_failure_code, "injected failure"));
            }

            let request = request.into_inner();
            let header = self.reply_header(&request.header);
            Ok(Response::new(GetAggregatedTensorResponse {
                header: Some(header),
                round_number: request.round_number,
                tensor: Some(NamedTensor {
                    name: request.tensor_name,
                    round_number: request.round_number,
                    lossless: request.require_lossless,
                    report: request.report,
                    tags: request.tags,
                    transformer_metadata: Vec::new(),
                    data_bytes: vec![0x42; 16],
                }),
            }))
        }

        async fn send_local_task_results(
            &self,
            request: Request<Streaming<DataStream>>,
        ) -> std::result::Result<Response<SendLocalTaskResultsResponse>, Status> {
            let mut stream = request.into_inner();
            let mut frames = Vec::new();
            while let Some(frame) = stream.message().await? {
                frames.push(frame);
            }

            let results = datastream_to_proto(frames)
                .map_err(|e| Status::invalid_argument(e.to_string()))?;
            let header = self.reply_header(&results.header);
            *self.received_results.lock().unwrap() = Some(results);

            Ok(Response::new(SendLocalTaskResultsResponse {
                header: Some(header),
            }))
        }

        async fn connectivity_check(
            &self,
            request: Request<ConnectivityCheckRequest>,
        ) -> std::result::Result<Response<ConnectivityCheckResponse>, Status> {
            if let Some(code) = self.connectivity_code {
                return Err(Status::new(code, "injected failure"));
            }
            let header = self.reply_header(&request.into_inner().header);
            Ok(Response::new(ConnectivityCheckResponse {
                header: Some(header),
            }))
        }

        async fn add_collaborator(
            &self,
            request: Request<AddCollaboratorRequest>,
        ) -> std::result::Result<Response<AddCollaboratorResponse>, Status> {
            let header = self.reply_header(&request.into_inner().header);
            Ok(Response::new(AddCollaboratorResponse {
                header: Some(header),
            }))
        }

        async fn remove_collaborator(
            &self,
            request: Request<RemoveCollaboratorRequest>,
        ) -> std::result::Result<Response<RemoveCollaboratorResponse>, Status> {
            let header = self.reply_header(&request.into_inner().header);
            Ok(Response::new(RemoveCollaboratorResponse {
                header: Some(header),
            }))
        }

        async fn get_experiment_status(
            &self,
            request: Request<GetExperimentStatusRequest>,
        ) -> std::result::Result<Response<GetExperimentStatusResponse>, Status> {
            let header = self.reply_header(&request.into_inner().header);
            Ok(Response::new(GetExperimentStatusResponse {
                header: Some(header),
                experiment_name: "exp-1".to_string(),
                status: "running".to_string(),
                current_round: 3,
                collaborators: vec![CollaboratorStatusProto {
                    name: "collab-1".to_string(),
                    status: "training".to_string(),
                    round_number: 3,
                }],
            }))
        }

        async fn set_straggler_cutoff_time(
            &self,
            request: Request<SetStragglerCutoffTimeRequest>,
        ) -> std::result::Result<Response<SetStragglerCutoffTimeResponse>, Status> {
            let header = self.reply_header(&request.into_inner().header);
            Ok(Response::new(SetStragglerCutoffTimeResponse {
                header: Some(header),
            }))
        }

        async fn get_trained_model(
            &self,
            _request: Request<GetTrainedModelRequest>,
        ) -> std::result::Result<Response<GetTrainedModelResponse>, Status> {
            Ok(Response::new(GetTrainedModelResponse {
                model_proto: Some(ModelProto {
                    tensors: vec![
                        NamedTensor {
                            name: "layer0.weights".to_string(),
                            data_bytes: vec![1, 2, 3],
                            ..Default::default()
                        },
                        NamedTensor {
                            name: "layer0.bias".to_string(),
                            data_bytes: vec![4, 5],
                            ..Default::default()
                        },
                    ],
                }),
            }))
        }
    }

    async fn spawn_fake(fake: FakeAggregator) -> (u16, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let _ = tonic::transport::Server::builder()
                .add_service(AggregatorServer::new(fake))
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await;
        });

        // Give the server time to start
        tokio::time::sleep(Duration::from_millis(50)).await;

        (port, handle)
    }

    fn test_client(port: u16, backoff: Arc<CountingBackoff>) -> AggregatorGrpcClient {
        let config = AggregatorClientConfig {
            host: "127.0.0.1".to_string(),
            port,
            aggregator_uuid: "agg-uuid".to_string(),
            federation_uuid: "fed-uuid".to_string(),
            chunk_size: 64,
            ..Default::default()
        };
        AggregatorGrpcClient::new(config).with_backoff(backoff as Arc<dyn Backoff>)
    }

    #[tokio::test]
    async fn integration_get_tasks_round_trip() {
        let (port, server) = spawn_fake(FakeAggregator::new()).await;
        let client = test_client(port, Arc::new(CountingBackoff::new()));

        let (tasks, round, sleep, quit) = client.get_tasks("collab-1").await.unwrap();

        assert_eq!(tasks, vec!["train".to_string(), "validate".to_string()]);
        assert_eq!(round, 3);
        assert_eq!(sleep, 0);
        assert!(!quit);

        server.abort();
    }

    #[tokio::test]
    async fn integration_chunked_results_reassemble_byte_identically() {
        let fake = FakeAggregator::new();
        let received = fake.received_results.clone();
        let (port, server) = spawn_fake(fake).await;
        let client = test_client(port, Arc::new(CountingBackoff::new()));

        // Large enough to require many 64-byte chunks
        let tensors = vec![NamedTensor {
            name: "layer0.weights".to_string(),
            round_number: 5,
            lossless: true,
            tags: vec!["trained".to_string()],
            data_bytes: vec![0xAB; 4096],
            ..Default::default()
        }];

        client
            .send_local_task_results("collab-1", 5, "train", 1024, tensors.clone())
            .await
            .unwrap();

        let expected = TaskResults {
            header: Some(MessageHeader {
                sender: "collab-1".to_string(),
                receiver: "agg-uuid".to_string(),
                federation_uuid: "fed-uuid".to_string(),
                single_col_cert_common_name: String::new(),
            }),
            round_number: 5,
            task_name: "train".to_string(),
            data_size: 1024,
            tensors,
        };
        assert_eq!(received.lock().unwrap().as_ref(), Some(&expected));

        server.abort();
    }

    #[tokio::test]
    async fn integration_transient_failures_are_retried_with_backoff() {
        let fake = FakeAggregator::new();
        fake.tensor_failures_left.store(2, Ordering::SeqCst);
        let (port, server) = spawn_fake(fake).await;

        let backoff = Arc::new(CountingBackoff::new());
        let client = test_client(port, backoff.clone());

        let tensor = client
            .get_aggregated_tensor("collab-1", "layer0.weights", 3, false, &[], true)
            .await
            .unwrap();

        assert_eq!(tensor.name, "layer0.weights");
        // Exactly one backoff wait per injected transient failure
        assert_eq!(backoff.waits.load(Ordering::SeqCst), 2);

        server.abort();
    }

    #[tokio::test]
    async fn integration_authentication_failure_is_never_retried() {
        let mut fake = FakeAggregator::new();
        fake.tensor_failures_left.store(1, Ordering::SeqCst);
        fake.tensor_failure_code = Code::Unauthenticated;
        let (port, server) = spawn_fake(fake).await;

        let backoff = Arc::new(CountingBackoff::new());
        let client = test_client(port, backoff.clone());

        let result = client
            .get_aggregated_tensor("collab-1", "layer0.weights", 3, false, &[], true)
            .await;

        assert!(matches!(result, Err(Error::Authentication(_))));
        // No backoff wait even though the retryable set is non-empty
        assert_eq!(backoff.waits.load(Ordering::SeqCst), 0);

        server.abort();
    }

    #[tokio::test]
    async fn integration_connectivity_failure_is_terminal() {
        let mut fake = FakeAggregator::new();
        fake.connectivity_code = Some(Code::Internal);
        let (port, server) = spawn_fake(fake).await;

        let backoff = Arc::new(CountingBackoff::new());
        let client = test_client(port, backoff.clone());

        match client.connectivity_check("collab-1").await {
            Err(Error::Rpc { code, .. }) => assert_eq!(code, Code::Internal),
            other => panic!("expected Rpc error, got {other:?}"),
        }
        assert_eq!(backoff.waits.load(Ordering::SeqCst), 0);

        server.abort();
    }

    #[tokio::test]
    async fn integration_connectivity_check_succeeds() {
        let (port, server) = spawn_fake(FakeAggregator::new()).await;
        let client = test_client(port, Arc::new(CountingBackoff::new()));

        assert!(client.connectivity_check("collab-1").await.is_ok());

        server.abort();
    }

    #[tokio::test]
    async fn integration_tampered_header_is_rejected() {
        let mut fake = FakeAggregator::new();
        fake.tamper_receiver = true;
        let (port, server) = spawn_fake(fake).await;
        let client = test_client(port, Arc::new(CountingBackoff::new()));

        match client.get_tasks("collab-1").await {
            Err(Error::HeaderMismatch { field, .. }) => assert_eq!(field, "receiver"),
            other => panic!("expected HeaderMismatch, got {other:?}"),
        }

        server.abort();
    }

    #[tokio::test]
    async fn integration_admin_operations_round_trip() {
        let (port, server) = spawn_fake(FakeAggregator::new()).await;
        let client = test_client(port, Arc::new(CountingBackoff::new()));

        client
            .add_collaborator("admin", "collab-2", "collab-2.fed.local")
            .await
            .unwrap();
        client
            .remove_collaborator("admin", "collab-2", "collab-2.fed.local")
            .await
            .unwrap();
        client
            .set_straggler_cutoff_time("admin", 600)
            .await
            .unwrap();

        let status = client.get_experiment_status("admin").await.unwrap();
        assert_eq!(
            status,
            ExperimentStatus {
                experiment_name: "exp-1".to_string(),
                status: "running".to_string(),
                current_round: 3,
                collaborators: vec![CollaboratorState {
                    name: "collab-1".to_string(),
                    status: "training".to_string(),
                    round_number: 3,
                }],
            }
        );

        server.abort();
    }

    #[tokio::test]
    async fn integration_get_trained_model_decodes_tensor_mapping() {
        let (port, server) = spawn_fake(FakeAggregator::new()).await;
        let client = test_client(port, Arc::new(CountingBackoff::new()));

        let model = client
            .get_trained_model("exp-1", ModelType::BestModel)
            .await
            .unwrap();

        assert_eq!(model.len(), 2);
        assert_eq!(model["layer0.weights"], vec![1, 2, 3]);
        assert_eq!(model["layer0.bias"], vec![4, 5]);

        server.abort();
    }

    #[tokio::test]
    async fn reconnect_twice_never_fails() {
        // No server needed; channels dial lazily
        let client = test_client(50051, Arc::new(CountingBackoff::new()));

        client.reconnect().await.unwrap();
        client.reconnect().await.unwrap();

        client.disconnect().await;
        client.disconnect().await;
    }
}
