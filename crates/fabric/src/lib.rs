// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The AIPerf messaging fabric.
//!
//! An address-typed client factory offering PUB/SUB, PUSH/PULL, and
//! REQUEST/REPLY semantics over TCP or Unix domain sockets, plus the proxy
//! brokers that stitch the fleet together (XPUB/XSUB event bus, push-pull
//! work queues, dealer-router dataset requests).
//!
//! Sockets are never shared: each is owned by one task on one scheduler,
//! and clients front them with bounded channels. Bind-vs-connect follows
//! the fleet topology: proxies bind both sides, services connect, except
//! where a single producer (credit drops) or single consumer (credit
//! returns, records) binds.

use aiperf_config::ServiceConfig;
use tokio_util::sync::CancellationToken;

pub mod address;
pub mod error;
pub mod proxy;
pub mod pub_sub;
pub mod push_pull;
pub mod request_reply;
pub mod socket;

pub use address::{Address, Endpoint};
pub use error::Error;
pub use proxy::{DealerRouterProxy, ProxyHandle, PushPullProxy, XpubXsubProxy};
pub use pub_sub::{PubClient, PubHandle, SubClient, SubClientBuilder, SubHandler};
pub use push_pull::{PullClient, PushClient, SendRetryPolicy};
pub use request_reply::{ReplyClient, ReplyToken, RequestClient};

/// Address-typed client factory bound to one transport configuration.
///
/// Encodes the fleet's bind/connect topology so services cannot wire an
/// address backwards.
#[derive(Debug, Clone)]
pub struct Fabric {
    service_id: String,
    config: ServiceConfig,
}

impl Fabric {
    /// Fabric factory for the given service.
    #[must_use]
    pub fn new(service_id: impl Into<String>, config: ServiceConfig) -> Self {
        Self { service_id: service_id.into(), config }
    }

    /// The owning service's id.
    #[must_use]
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// The fleet-wide service configuration.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn endpoint(&self, address: Address) -> Endpoint {
        address.endpoint(&self.config.transport)
    }

    fn retry_policy(&self) -> SendRetryPolicy {
        SendRetryPolicy {
            max_retries: self.config.send_max_retries,
            backoff: self.config.send_retry_backoff,
        }
    }

    /// Publisher onto the event bus (connects to the proxy frontend).
    pub async fn event_bus_publisher(&self, cancel: CancellationToken) -> Result<PubClient, Error> {
        PubClient::connect(
            Address::EventBusProxyFrontend,
            &self.endpoint(Address::EventBusProxyFrontend),
            self.config.high_water_mark,
            cancel,
        )
        .await
    }

    /// Subscriber on the event bus (connects to the proxy backend).
    pub async fn event_bus_subscriber(
        &self,
        builder: SubClientBuilder,
        cancel: CancellationToken,
    ) -> Result<SubClient, Error> {
        builder
            .connect(
                Address::EventBusProxyBackend,
                &self.endpoint(Address::EventBusProxyBackend),
                cancel,
            )
            .await
    }

    /// Credit drop producer: the timing manager binds and load-balances
    /// drops across the worker pool.
    pub async fn credit_drop_producer(
        &self,
        cancel: CancellationToken,
    ) -> Result<PushClient, Error> {
        PushClient::bind(
            Address::CreditDrop,
            &self.endpoint(Address::CreditDrop),
            self.config.high_water_mark,
            self.retry_policy(),
            cancel,
        )
        .await
    }

    /// Credit drop consumer: workers connect and share the queue.
    pub async fn credit_drop_consumer(
        &self,
        cancel: CancellationToken,
    ) -> Result<PullClient, Error> {
        PullClient::connect(
            Address::CreditDrop,
            &self.endpoint(Address::CreditDrop),
            self.config.high_water_mark,
            cancel,
        )
        .await
    }

    /// Credit return publisher: workers connect to the bound timing manager.
    pub async fn credit_return_publisher(
        &self,
        cancel: CancellationToken,
    ) -> Result<PubClient, Error> {
        PubClient::connect(
            Address::CreditReturn,
            &self.endpoint(Address::CreditReturn),
            self.config.high_water_mark,
            cancel,
        )
        .await
    }

    /// Credit return subscriber: the single consumer binds.
    pub async fn credit_return_subscriber(
        &self,
        builder: SubClientBuilder,
        cancel: CancellationToken,
    ) -> Result<SubClient, Error> {
        builder
            .bind(Address::CreditReturn, &self.endpoint(Address::CreditReturn), cancel)
            .await
    }

    /// Metric records producer: record processors connect to the bound
    /// results processor.
    pub async fn records_producer(&self, cancel: CancellationToken) -> Result<PushClient, Error> {
        PushClient::connect(
            Address::Records,
            &self.endpoint(Address::Records),
            self.config.high_water_mark,
            self.retry_policy(),
            cancel,
        )
        .await
    }

    /// Metric records consumer: the results processor binds and fans in.
    pub async fn records_consumer(&self, cancel: CancellationToken) -> Result<PullClient, Error> {
        PullClient::bind(
            Address::Records,
            &self.endpoint(Address::Records),
            self.config.high_water_mark,
            cancel,
        )
        .await
    }

    /// Raw inference producer: workers connect to the proxy frontend.
    pub async fn raw_inference_producer(
        &self,
        cancel: CancellationToken,
    ) -> Result<PushClient, Error> {
        PushClient::connect(
            Address::RawInferenceProxyFrontend,
            &self.endpoint(Address::RawInferenceProxyFrontend),
            self.config.high_water_mark,
            self.retry_policy(),
            cancel,
        )
        .await
    }

    /// Raw inference consumer: record processors connect to the proxy
    /// backend and share the queue.
    pub async fn raw_inference_consumer(
        &self,
        cancel: CancellationToken,
    ) -> Result<PullClient, Error> {
        PullClient::connect(
            Address::RawInferenceProxyBackend,
            &self.endpoint(Address::RawInferenceProxyBackend),
            self.config.high_water_mark,
            cancel,
        )
        .await
    }

    /// Dataset requester: workers connect to the proxy frontend.
    pub async fn dataset_requester(
        &self,
        cancel: CancellationToken,
    ) -> Result<RequestClient, Error> {
        RequestClient::connect(
            Address::DatasetProxyFrontend,
            &self.endpoint(Address::DatasetProxyFrontend),
            self.service_id.clone(),
            self.config.high_water_mark,
            cancel,
        )
        .await
    }

    /// Dataset replier: the provider connects to the proxy backend.
    pub async fn dataset_replier(&self, cancel: CancellationToken) -> Result<ReplyClient, Error> {
        ReplyClient::connect(
            Address::DatasetProxyBackend,
            &self.endpoint(Address::DatasetProxyBackend),
            self.config.high_water_mark,
            cancel,
        )
        .await
    }

    /// Starts the event bus proxy (binds frontend and backend).
    pub async fn start_event_bus_proxy(
        &self,
        cancel: CancellationToken,
    ) -> Result<ProxyHandle, Error> {
        XpubXsubProxy::start(
            (Address::EventBusProxyFrontend, self.endpoint(Address::EventBusProxyFrontend)),
            (Address::EventBusProxyBackend, self.endpoint(Address::EventBusProxyBackend)),
            cancel,
        )
        .await
    }

    /// Starts the raw inference work queue proxy.
    pub async fn start_raw_inference_proxy(
        &self,
        cancel: CancellationToken,
    ) -> Result<ProxyHandle, Error> {
        PushPullProxy::start(
            (
                Address::RawInferenceProxyFrontend,
                self.endpoint(Address::RawInferenceProxyFrontend),
            ),
            (Address::RawInferenceProxyBackend, self.endpoint(Address::RawInferenceProxyBackend)),
            cancel,
        )
        .await
    }

    /// Starts the dataset request proxy.
    pub async fn start_dataset_proxy(
        &self,
        cancel: CancellationToken,
    ) -> Result<ProxyHandle, Error> {
        DealerRouterProxy::start(
            (Address::DatasetProxyFrontend, self.endpoint(Address::DatasetProxyFrontend)),
            (Address::DatasetProxyBackend, self.endpoint(Address::DatasetProxyBackend)),
            cancel,
        )
        .await
    }

    /// Removes IPC socket files for this transport, called once on shutdown.
    pub fn cleanup(&self) {
        if let aiperf_config::TransportConfig::Ipc { run_dir } = &self.config.transport {
            for address in Address::ALL {
                let path = run_dir.join(format!("{}.sock", address.as_str()));
                let _ = std::fs::remove_file(path);
            }
        }
    }
}
