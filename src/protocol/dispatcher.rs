use crate::error::{constants, ProtocolError, Result};
use crate::protocol::instance::InstanceType;
use crate::protocol::message::{Envelope, Message};
use crate::protocol::session::RemotePeer;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

type HandlerFn = dyn Fn(&HandlerContext) -> Result<Option<Message>> + Send + Sync + 'static;

/// Everything a handler may inspect about an inbound message
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub envelope: Envelope,
    pub remote: RemotePeer,
    pub authenticated: bool,
}

/// Registration parameters of a handler
#[derive(Debug, Clone)]
pub struct HandlerSpec {
    pub opcode: Cow<'static, str>,
    /// Only reachable on authenticated connections
    pub auth: bool,
    /// Remote instance types the handler serves
    pub instances: Vec<InstanceType>,
}

impl HandlerSpec {
    /// Unauthenticated handler serving every instance type
    pub fn new(opcode: impl Into<Cow<'static, str>>) -> Self {
        Self {
            opcode: opcode.into(),
            auth: false,
            instances: InstanceType::ALL.to_vec(),
        }
    }

    pub fn authenticated(mut self) -> Self {
        self.auth = true;
        self
    }

    pub fn instances(mut self, instances: &[InstanceType]) -> Self {
        self.instances = instances.to_vec();
        self
    }
}

/// Outcome of routing one message
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A handler ran and optionally produced a reply
    Handled(Option<Message>),
    /// No handler is registered for the opcode and remote instance type
    Unhandled,
}

#[derive(Clone)]
struct Entry {
    auth: bool,
    handler: Arc<HandlerFn>,
}

type Table = HashMap<Cow<'static, str>, Entry>;

/// Message dispatcher keyed by remote instance type, then opcode.
/// Built-in opcodes are borrowed keys so routing them never allocates.
pub struct Dispatcher {
    tables: Arc<RwLock<HashMap<InstanceType, Table>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, spec: HandlerSpec, handler: F) -> Result<()>
    where
        F: Fn(&HandlerContext) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        let mut tables = self.tables.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;

        let entry = Entry {
            auth: spec.auth,
            handler: Arc::new(handler),
        };

        for instance in &spec.instances {
            tables
                .entry(*instance)
                .or_default()
                .insert(spec.opcode.clone(), entry.clone());
        }

        debug!(opcode = %spec.opcode, instances = ?spec.instances, auth = spec.auth, "Registered handler");
        Ok(())
    }

    /// Remove a handler from every table; returns whether any was present
    pub fn unregister(&self, opcode: &str) -> Result<bool> {
        let mut tables = self.tables.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;

        let mut removed = false;
        for table in tables.values_mut() {
            removed |= table.remove(opcode).is_some();
        }
        Ok(removed)
    }

    /// Opcodes reachable from a remote instance type
    pub fn handlers(&self, instance: InstanceType) -> Result<Vec<String>> {
        let tables = self.tables.read().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string())
        })?;

        let mut opcodes: Vec<String> = tables
            .get(&instance)
            .map(|table| table.keys().map(|k| k.to_string()).collect())
            .unwrap_or_default();
        opcodes.sort();
        Ok(opcodes)
    }

    pub fn dispatch(&self, ctx: &HandlerContext) -> Result<Dispatch> {
        let opcode = ctx.envelope.message.opcode();

        // Release the lock before running the handler
        let entry = {
            let tables = self.tables.read().map_err(|_| {
                ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string())
            })?;

            tables
                .get(&ctx.remote.instance)
                .and_then(|table| table.get(opcode.as_ref()))
                .cloned()
        };

        let Some(entry) = entry else {
            return Ok(Dispatch::Unhandled);
        };

        if entry.auth && !ctx.authenticated {
            return Err(ProtocolError::Unauthorized(opcode.into_owned()));
        }

        (entry.handler)(ctx).map(Dispatch::Handled)
    }
}
