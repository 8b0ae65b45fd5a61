//! Routing semantics (spec §4.3), grounded in
//! `original_source/tests/stream_kernel/execution/test_runner_routing_integration.py`
//! (the only surviving ground truth for `RoutingService` — the original
//! `routing_service.py` itself was filtered out of the retrieved source, so
//! its contract is reconstructed here from the integration tests' observed
//! behavior):
//!
//! - default fan-out delivers to every registered consumer of the payload's
//!   type, *except* the node that emitted it (no accidental self-loop);
//! - an explicit target on the output always wins and is delivered even if
//!   it is the emitting node itself;
//! - strict mode turns "no consumers" and "only the emitter consumes this
//!   type" into errors; non-strict mode silently drops both;
//! - an explicit target that is not a registered consumer of the payload's
//!   type is an error in strict mode, a silent drop in non-strict mode.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::contract::{type_tag_of_payload, Payload};
use crate::envelope::{Envelope, NodeOutput, TerminalEvent};
use crate::error::RoutingError;
use crate::registry::ConsumerRegistry;

/// `{ local_deliveries, boundary_deliveries, terminal_outputs }` from spec §4.3.
///
/// `boundary_deliveries` holds deliveries to consumers the configured
/// [`NodeLocator`] reports as living in a different process group; the
/// `BootstrapSupervisor` (in `flowmesh-runtime`) is responsible for carrying
/// those across the boundary transport.
#[derive(Default)]
pub struct RoutingResult {
    pub local_deliveries: Vec<(String, Payload)>,
    pub boundary_deliveries: Vec<(String, Payload)>,
    pub terminal_outputs: Vec<TerminalEvent>,
}

/// Reports whether a node name lives in the current process or across a
/// process boundary. Single-process runs use [`AllLocal`]; the
/// multi-process supervisor installs one backed by its process-group table.
pub trait NodeLocator: Send + Sync {
    fn is_local(&self, node: &str) -> bool;
}

pub struct AllLocal;
impl NodeLocator for AllLocal {
    fn is_local(&self, _node: &str) -> bool {
        true
    }
}

pub trait RoutingService: Send + Sync {
    fn route(&self, outputs: Vec<NodeOutput>, source: Option<&str>) -> Result<RoutingResult, RoutingError>;
}

/// Default `RoutingService`: consumer-registry-backed fan-out with strict
/// or non-strict undeliverable handling (spec §4.3).
pub struct Router {
    registry: Arc<RwLock<ConsumerRegistry>>,
    strict: bool,
    locator: Arc<dyn NodeLocator>,
}

impl Router {
    pub fn new(registry: Arc<RwLock<ConsumerRegistry>>, strict: bool) -> Self {
        Self {
            registry,
            strict,
            locator: Arc::new(AllLocal),
        }
    }

    pub fn with_locator(mut self, locator: Arc<dyn NodeLocator>) -> Self {
        self.locator = locator;
        self
    }

    fn deliver(&self, result: &mut RoutingResult, target: String, payload: Payload) {
        if self.locator.is_local(&target) {
            result.local_deliveries.push((target, payload));
        } else {
            result.boundary_deliveries.push((target, payload));
        }
    }

    fn route_fan_out(&self, payload: Payload, source: Option<&str>, result: &mut RoutingResult) -> Result<(), RoutingError> {
        let ty = type_tag_of_payload(&payload);
        let consumers = self.registry.read().get_consumers(ty).to_vec();
        let targets: Vec<&String> = consumers.iter().filter(|name| Some(name.as_str()) != source).collect();

        if targets.is_empty() {
            if !self.strict {
                return Ok(());
            }
            return Err(if consumers.is_empty() {
                RoutingError::NoConsumers(ty.name())
            } else {
                RoutingError::SelfLoopRequiresTarget {
                    node: source.unwrap_or_default().to_string(),
                    type_name: ty.name(),
                }
            });
        }

        for target in targets {
            self.deliver(result, target.clone(), payload.clone());
        }
        Ok(())
    }

    fn route_targeted(
        &self,
        target: String,
        payload: Payload,
        result: &mut RoutingResult,
    ) -> Result<(), RoutingError> {
        let ty = type_tag_of_payload(&payload);
        let is_registered = self.registry.read().get_consumers(ty).iter().any(|name| name == &target);
        if !is_registered {
            if !self.strict {
                return Ok(());
            }
            return Err(RoutingError::UnknownTarget {
                target,
                type_name: ty.name(),
            });
        }
        self.deliver(result, target, payload);
        Ok(())
    }
}

impl RoutingService for Router {
    fn route(&self, outputs: Vec<NodeOutput>, source: Option<&str>) -> Result<RoutingResult, RoutingError> {
        let mut result = RoutingResult::default();
        for output in outputs {
            match output {
                NodeOutput::Terminal(event) => result.terminal_outputs.push(event),
                NodeOutput::Payload(payload) => self.route_fan_out(payload, source, &mut result)?,
                NodeOutput::Envelope(Envelope { payload, target: Some(target), .. }) => {
                    self.route_targeted(target, payload, &mut result)?
                }
                NodeOutput::Envelope(Envelope { payload, target: None, .. }) => {
                    self.route_fan_out(payload, source, &mut result)?
                }
            }
        }
        Ok(result)
    }
}
