//! Tool call routing between consumers and the active extension.
//!
//! Two call classes flow through [`ToolRouter::dispatch`]:
//!
//! - **Local tools** (`hub_status`, `resolve_assets`) are answered by
//!   the hub itself, synchronously, against the registry and the asset
//!   store.
//! - **Proxied tools** are forwarded to the active extension as a
//!   `toolCall` message and settled later through the correlation
//!   table. Declared specs are validated before forwarding; names the
//!   hub has no spec for are forwarded opaquely, since the full tool
//!   catalog lives in the extension.
//!
//! With no active extension a proxied call fails immediately and never
//! registers a pending entry, so churn against a hub without a canvas
//! attached leaves nothing behind to time out.

// Rust guideline compliant 2026-08

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;

use crate::assets::{AssetRecord, AssetStore};
use crate::constants::MAX_RESOLVE_BATCH;
use crate::correlation::CorrelationTable;
use crate::error::HubError;
use crate::extension::ExtensionRegistry;
use crate::wire::{HubMessage, ToolCallPayload, ToolRequest, ToolResponse};

/// Where a tool is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Answered by the hub without an extension round trip.
    Local,
    /// Forwarded to the active extension.
    Proxied,
}

/// Expected JSON kind of a declared argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// JSON string.
    String,
    /// JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
}

impl ArgKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Number => "a number",
            Self::Boolean => "a boolean",
            Self::Array => "an array",
            Self::Object => "an object",
        }
    }
}

/// Declared shape of a tool: its kind plus required arguments.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Tool name as consumers issue it.
    pub name: String,
    /// Where the tool runs.
    pub kind: ToolKind,
    /// Required arguments and their expected JSON kinds.
    pub required: Vec<(String, ArgKind)>,
}

impl ToolSpec {
    /// Spec for a hub-local tool.
    #[must_use]
    pub fn local(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ToolKind::Local,
            required: Vec::new(),
        }
    }

    /// Spec for a proxied extension tool.
    #[must_use]
    pub fn proxied(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ToolKind::Proxied,
            required: Vec::new(),
        }
    }

    /// Add a required argument.
    #[must_use]
    pub fn require(mut self, arg: &str, kind: ArgKind) -> Self {
        self.required.push((arg.to_string(), kind));
        self
    }

    fn check_args(&self, args: &Value) -> Result<(), HubError> {
        for (name, kind) in &self.required {
            match args.get(name) {
                None => {
                    return Err(HubError::InvalidArguments(format!(
                        "missing required argument {name:?}"
                    )))
                }
                Some(value) if !kind.matches(value) => {
                    return Err(HubError::InvalidArguments(format!(
                        "argument {name:?} must be {}",
                        kind.describe()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Routes consumer tool requests to their executor and replies on the
/// consumer's outbound channel.
#[derive(Debug)]
pub struct ToolRouter {
    tools: HashMap<String, ToolSpec>,
    correlation: CorrelationTable,
    store: Option<AssetStore>,
    asset_server_url: Option<String>,
    extension_port: u16,
    tool_timeout: Duration,
}

/// Descriptor returned by `resolve_assets`; bytes travel over the
/// transfer server, never through the tool channel.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssetDescriptor {
    hash: String,
    url: String,
    mime: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
}

impl AssetDescriptor {
    fn from_record(record: &AssetRecord, base_url: &str) -> Self {
        Self {
            hash: record.hash.clone(),
            url: record.url(base_url),
            mime: record.mime.clone(),
            size: record.size,
            width: record.width,
            height: record.height,
        }
    }
}

impl ToolRouter {
    /// Build a router with the built-in local tools declared.
    ///
    /// `store` and `asset_server_url` are `None` when the asset
    /// subsystem is disabled; asset tools then fail with
    /// [`HubError::AssetServerNotConfigured`].
    #[must_use]
    pub fn new(
        correlation: CorrelationTable,
        store: Option<AssetStore>,
        asset_server_url: Option<String>,
        extension_port: u16,
        tool_timeout: Duration,
    ) -> Self {
        let mut router = Self {
            tools: HashMap::new(),
            correlation,
            store,
            asset_server_url,
            extension_port,
            tool_timeout,
        };
        router.declare(ToolSpec::local("hub_status"));
        router.declare(ToolSpec::local("resolve_assets").require("hashes", ArgKind::Array));
        router
    }

    /// Declare (or replace) a tool spec.
    pub fn declare(&mut self, spec: ToolSpec) {
        self.tools.insert(spec.name.clone(), spec);
    }

    /// Route one request and reply on `reply`.
    ///
    /// Local tools answer before this returns; proxied calls are settled
    /// later by a spawned responder task. A closed `reply` channel is
    /// never an error: the consumer is simply gone.
    pub fn dispatch(
        &self,
        registry: &ExtensionRegistry,
        request: ToolRequest,
        reply: &UnboundedSender<ToolResponse>,
    ) {
        if let Err(reason) = request.validate() {
            let err = HubError::InvalidArguments(reason);
            send_response(reply, ToolResponse::fail(request.id, err.to_body()));
            return;
        }

        if let Some(spec) = self.tools.get(&request.name) {
            if let Err(err) = spec.check_args(&request.args) {
                log::info!("[Router] Rejecting {}: {err}", request.name);
                send_response(reply, ToolResponse::fail(request.id, err.to_body()));
                return;
            }
            if spec.kind == ToolKind::Local {
                let response = match self.run_local(registry, &request) {
                    Ok(payload) => ToolResponse::ok(request.id, payload),
                    Err(err) => {
                        log::info!("[Router] Local tool {} failed: {err}", request.name);
                        ToolResponse::fail(request.id, err.to_body())
                    }
                };
                send_response(reply, response);
                return;
            }
        }

        self.forward(registry, request, reply);
    }

    /// Forward a call to the active extension and spawn its responder.
    fn forward(
        &self,
        registry: &ExtensionRegistry,
        request: ToolRequest,
        reply: &UnboundedSender<ToolResponse>,
    ) {
        let Some(active) = registry.active() else {
            // Fail fast: no pending entry, no timer.
            log::info!("[Router] No active extension for tool {}", request.name);
            let err = HubError::NoActiveExtension;
            send_response(reply, ToolResponse::fail(request.id, err.to_body()));
            return;
        };

        let (call_id, result_rx) = self.correlation.register(&active.id, self.tool_timeout);
        log::debug!(
            "[Router] Forwarding {} as {call_id} to {}",
            request.name,
            active.id
        );

        // The responder settles the consumer whichever way the call ends:
        // result, timeout, disconnect, or shutdown.
        let consumer_id = request.id;
        let tool_name = request.name.clone();
        let reply = reply.clone();
        tokio::spawn(async move {
            let outcome = match result_rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(HubError::Internal("pending call dropped".to_string())),
            };
            let response = match outcome {
                Ok(payload) => ToolResponse::ok(consumer_id, payload),
                Err(err) => {
                    log::info!("[Router] Tool {tool_name} failed: {err}");
                    ToolResponse::fail(consumer_id, err.to_body())
                }
            };
            let _ = reply.send(response);
        });

        let sent = active.send(HubMessage::ToolCall {
            id: call_id.clone(),
            payload: ToolCallPayload {
                name: request.name,
                args: request.args,
            },
        });
        if !sent {
            // The entry was just registered; reject it through the same
            // responder path the success case uses.
            self.correlation.reject(&call_id, HubError::TransportNotConnected);
        }
    }

    fn run_local(
        &self,
        registry: &ExtensionRegistry,
        request: &ToolRequest,
    ) -> Result<Value, HubError> {
        match request.name.as_str() {
            "hub_status" => Ok(self.status(registry)),
            "resolve_assets" => self.resolve_assets(&request.args),
            other => Err(HubError::Internal(format!(
                "local tool {other} has no handler"
            ))),
        }
    }

    /// Snapshot of hub state for the `hub_status` tool.
    fn status(&self, registry: &ExtensionRegistry) -> Value {
        json!({
            "activeExtensionId": registry.active_id(),
            "extensionCount": registry.len(),
            "extensionPort": self.extension_port,
            "assetServerUrl": self.asset_server_url,
            "pendingCalls": self.correlation.len(),
        })
    }

    /// Resolve a batch of asset hashes to transfer-server descriptors.
    ///
    /// Partial misses never fail the batch; they come back under
    /// `missing`.
    fn resolve_assets(&self, args: &Value) -> Result<Value, HubError> {
        let store = self.store.as_ref().ok_or(HubError::AssetServerNotConfigured)?;
        let base_url = self
            .asset_server_url
            .as_deref()
            .ok_or(HubError::AssetServerNotConfigured)?;

        let hashes = parse_hashes(args)?;
        if hashes.len() > MAX_RESOLVE_BATCH {
            return Err(HubError::InvalidArguments(format!(
                "hashes has {} entries, limit is {MAX_RESOLVE_BATCH}",
                hashes.len()
            )));
        }

        let mut resolved = Vec::new();
        let mut missing = Vec::new();
        for (hash, record) in hashes.iter().zip(store.get_many(&hashes)) {
            match record {
                Some(record) => resolved.push(AssetDescriptor::from_record(&record, base_url)),
                None => missing.push(hash.clone()),
            }
        }
        log::debug!(
            "[Router] Resolved {} asset(s), {} missing",
            resolved.len(),
            missing.len()
        );
        Ok(json!({ "resolved": resolved, "missing": missing }))
    }
}

/// Extract `args.hashes` as a list of strings.
fn parse_hashes(args: &Value) -> Result<Vec<String>, HubError> {
    let items = args
        .get("hashes")
        .and_then(Value::as_array)
        .ok_or_else(|| HubError::InvalidArguments("missing required argument \"hashes\"".into()))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                HubError::InvalidArguments(format!("hashes[{i}] must be a string"))
            })
        })
        .collect()
}

fn send_response(reply: &UnboundedSender<ToolResponse>, response: ToolResponse) {
    if reply.send(response).is_err() {
        log::debug!("[Router] Consumer went away before the response was delivered");
    }
}
