//! HTTP flow state for Envoy network inspection
//!
//! This filter runs on raw TCP connections carrying HTTP. Each connection
//! gets a set of flow data slots; the first bytes seen in either direction
//! attach an HTTP [`FlowState`] that tracks both halves of the exchange
//! and pairs pipelined requests with their responses. When the connection
//! is done the slots are destroyed and every resource the flow state held
//! is released.
//!
//! Targets: wasm32-wasi (Envoy proxy-wasm ABI)

pub mod anomaly;
pub mod config;
pub mod decode;
pub mod enums;
pub mod flow;
pub mod section;
pub mod telemetry;
pub mod transaction;

pub use config::{ConfigError, FlowConfig};
pub use enums::{Direction, PerDirection, SectionType};
pub use flow::{BodyFraming, FlowData, FlowDataId, FlowDataRegistry, FlowState, HalfState};
pub use transaction::{Transaction, TransactionHandle};

use log::{debug, info, trace, warn};
use proxy_wasm::traits::{Context, RootContext, StreamContext};
use proxy_wasm::types::{Action, ContextType, LogLevel, PeerType};
use std::cell::RefCell;

// Thread-local storage for filter configuration
thread_local! {
    static CONFIG: RefCell<FlowConfig> = RefCell::new(FlowConfig::default());
}

/// Root context for filter lifecycle management
struct FlowRootContext {
    config: FlowConfig,
}

impl FlowRootContext {
    fn new() -> Self {
        Self {
            config: FlowConfig::default(),
        }
    }
}

impl Context for FlowRootContext {}

impl RootContext for FlowRootContext {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        if let Some(config_bytes) = self.get_plugin_configuration() {
            match FlowConfig::from_bytes(&config_bytes) {
                Ok(config) => self.config = config,
                Err(e) => warn!("Ignoring plugin configuration, using defaults: {}", e),
            }
        }

        // Store config in thread-local for stream contexts to access
        CONFIG.with(|c| {
            *c.borrow_mut() = self.config.clone();
        });

        info!(
            "HTTP flow filter initialized, pipeline depth {}",
            self.config.pipeline_depth
        );

        true
    }

    fn create_stream_context(&self, context_id: u32) -> Option<Box<dyn StreamContext>> {
        Some(Box::new(FlowStreamContext::new(context_id)))
    }

    fn get_type(&self) -> Option<ContextType> {
        Some(ContextType::StreamContext)
    }
}

/// Per-connection context
struct FlowStreamContext {
    context_id: u32,
    /// Extension data attached to this flow
    flow_data: FlowDataRegistry,
    /// Bytes seen per direction
    octets: PerDirection<u64>,
    /// Configuration snapshot for this flow
    config: FlowConfig,
}

impl FlowStreamContext {
    fn new(context_id: u32) -> Self {
        let config = CONFIG.with(|c| c.borrow().clone());

        Self {
            context_id,
            flow_data: FlowDataRegistry::new(),
            octets: PerDirection::default(),
            config,
        }
    }

    /// HTTP state of this flow, attached on first need
    fn flow_state(&mut self) -> Option<&mut FlowState> {
        let config = &self.config;
        self.flow_data
            .get_or_insert_with(FlowState::inspector_id(), || FlowState::new(config))
    }

    fn on_data(&mut self, direction: Direction, data_size: usize, end_of_stream: bool) -> Action {
        self.octets[direction] += data_size as u64;
        let context_id = self.context_id;
        let Some(flow) = self.flow_state() else {
            warn!("[context_id={}] no HTTP flow state attached", context_id);
            return Action::Continue;
        };

        trace!(
            "[context_id={}] flow {}: {} bytes from {}, expecting {}, end_of_stream: {}",
            context_id,
            flow.seq_num(),
            data_size,
            direction,
            flow.half(direction).type_expected(),
            end_of_stream
        );

        Action::Continue
    }

    /// Release everything attached to the flow. Safe to call twice.
    fn release_flow_data(&mut self) {
        if self.flow_data.is_empty() {
            return;
        }
        debug!(
            "[context_id={}] releasing flow data after {}/{} bytes",
            self.context_id, self.octets.client, self.octets.server
        );
        self.flow_data.clear();
    }
}

impl Context for FlowStreamContext {
    fn on_done(&mut self) -> bool {
        self.release_flow_data();
        true
    }
}

impl StreamContext for FlowStreamContext {
    fn on_downstream_data(&mut self, data_size: usize, end_of_stream: bool) -> Action {
        self.on_data(Direction::Client, data_size, end_of_stream)
    }

    fn on_upstream_data(&mut self, data_size: usize, end_of_stream: bool) -> Action {
        self.on_data(Direction::Server, data_size, end_of_stream)
    }

    fn on_downstream_close(&mut self, _peer_type: PeerType) {
        debug!("[context_id={}] downstream closed", self.context_id);
    }

    fn on_upstream_close(&mut self, _peer_type: PeerType) {
        debug!("[context_id={}] upstream closed", self.context_id);
    }

    fn on_log(&mut self) {
        self.release_flow_data();
    }
}

// Register the filter with proxy-wasm runtime
proxy_wasm::main! {{
    proxy_wasm::set_log_level(LogLevel::Debug);
    proxy_wasm::set_root_context(|_| -> Box<dyn RootContext> {
        Box::new(FlowRootContext::new())
    });
}}
