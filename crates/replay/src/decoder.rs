use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};

use common::traits::Compressor;
use common::{ApiCallId, ApiFamilyId, HandleId, ThreadId};
use trace_format::{
    decode_call_block, decode_meta_command, BlockReader, MetaCommand, MetaCommandKind,
    TraceReadError,
};
use tracing::{debug, trace, warn};

/// Handler invoked on each consumer for one meta-command kind.
pub type MetaHandler<C> = fn(&mut C, ThreadId, &MetaCommand);

/// Per-call routing data handed to call decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiCallInfo {
    pub thread_id: ThreadId,
}

/// What `process_trace` needs from a decoder, independent of its consumer type.
pub trait ApiDecoder {
    fn name(&self) -> &'static str;

    fn supports_family(&self, family: ApiFamilyId) -> bool;

    fn supports_api_call(&self, call_id: ApiCallId) -> bool {
        call_id
            .family()
            .is_some_and(|family| self.supports_family(family))
    }

    fn dispatch_meta_command(&self, thread_id: ThreadId, command: &MetaCommand);

    /// Per-call parameter decode is generated per API; the base ignores calls.
    fn decode_function_call(&self, _call_id: ApiCallId, _info: ApiCallInfo, _parameters: &[u8]) {}

    fn decode_method_call(
        &self,
        _call_id: ApiCallId,
        _object_id: HandleId,
        _info: ApiCallInfo,
        _parameters: &[u8],
    ) {
    }
}

/// Consumer list and meta-command capability map for one API surface.
///
/// Consumers are called in registration order. Meta commands whose kind has
/// no registered handler are ignored.
pub struct DecoderBase<C: ?Sized> {
    name: &'static str,
    families: &'static [ApiFamilyId],
    consumers: Vec<Arc<Mutex<C>>>,
    handlers: HashMap<MetaCommandKind, MetaHandler<C>>,
}

impl<C: ?Sized> DecoderBase<C> {
    pub fn new(name: &'static str, families: &'static [ApiFamilyId]) -> Self {
        Self {
            name,
            families,
            consumers: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn vulkan() -> Self {
        Self::new("vulkan", &[ApiFamilyId::Vulkan])
    }

    pub fn dx12() -> Self {
        Self::new("dx12", &[ApiFamilyId::Dxgi, ApiFamilyId::D3D12])
    }

    /// Registers the handler for `kind`, replacing any previous one.
    pub fn with_handler(mut self, kind: MetaCommandKind, handler: MetaHandler<C>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handles(&self, kind: MetaCommandKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Appends `consumer`. The same consumer may be added more than once and is
    /// then called once per registration.
    pub fn add_consumer(&mut self, consumer: Arc<Mutex<C>>) {
        self.consumers.push(consumer);
    }

    /// Removes every registration of `consumer`.
    pub fn remove_consumer(&mut self, consumer: &Arc<Mutex<C>>) {
        let before = self.consumers.len();
        self.consumers
            .retain(|registered| !Arc::ptr_eq(registered, consumer));
        if self.consumers.len() == before {
            debug!(decoder = self.name, "Consumer to remove was not registered");
        }
    }

    pub fn consumers(&self) -> &[Arc<Mutex<C>>] {
        &self.consumers
    }

    pub fn families(&self) -> &'static [ApiFamilyId] {
        self.families
    }
}

impl<C: ?Sized> ApiDecoder for DecoderBase<C> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supports_family(&self, family: ApiFamilyId) -> bool {
        self.families.contains(&family)
    }

    fn dispatch_meta_command(&self, thread_id: ThreadId, command: &MetaCommand) {
        let kind = command.kind();
        let Some(handler) = self.handlers.get(&kind) else {
            trace!(decoder = self.name, ?kind, "No handler registered");
            return;
        };

        for consumer in &self.consumers {
            match consumer.lock() {
                Ok(mut guard) => handler(&mut *guard, thread_id, command),
                Err(poisoned) => {
                    warn!(decoder = self.name, ?kind, "Consumer lock poisoned, dispatching anyway");
                    handler(&mut *poisoned.into_inner(), thread_id, command);
                }
            }
        }
    }
}

/// Counters reported by [`process_trace`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceStats {
    pub blocks: u64,
    pub meta_commands: u64,
    pub function_calls: u64,
    pub method_calls: u64,
    pub skipped: u64,
}

/// Reads every block from `reader` and routes it to the decoders that own its
/// family. State markers go to every decoder.
pub fn process_trace<R: Read>(
    reader: &mut BlockReader<R>,
    decoders: &[&dyn ApiDecoder],
    compressor: Option<&dyn Compressor>,
) -> Result<TraceStats, TraceReadError> {
    let mut stats = TraceStats::default();

    while let Some(block) = reader.next_block()? {
        stats.blocks += 1;

        if let Some(decoded) = decode_meta_command(&block, compressor)? {
            stats.meta_commands += 1;
            for decoder in decoders {
                if decoded
                    .family
                    .map_or(true, |family| decoder.supports_family(family))
                {
                    decoder.dispatch_meta_command(decoded.thread_id, &decoded.command);
                }
            }
            continue;
        }

        if let Some(call) = decode_call_block(&block, compressor)? {
            let info = ApiCallInfo {
                thread_id: call.thread_id,
            };
            if call.object_id.is_some() {
                stats.method_calls += 1;
            } else {
                stats.function_calls += 1;
            }
            for decoder in decoders
                .iter()
                .filter(|decoder| decoder.supports_api_call(call.call_id))
            {
                match call.object_id {
                    Some(object_id) => {
                        decoder.decode_method_call(call.call_id, object_id, info, &call.parameters)
                    }
                    None => decoder.decode_function_call(call.call_id, info, &call.parameters),
                }
            }
            continue;
        }

        trace!(
            offset = block.offset,
            block_type = block.block_type().name(),
            "Skipping block"
        );
        stats.skipped += 1;
    }

    debug!(?stats, "Trace processed");
    Ok(stats)
}
