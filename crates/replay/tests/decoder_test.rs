use std::io::Cursor;
use std::sync::{Arc, Mutex};

use capture::CommandWriter;
use common::traits::Compressor;
use common::{ApiCallId, ApiFamilyId, CompressionPolicy, HandleId, ThreadData, ThreadId};
use compression::BlockCompressor;
use replay::{process_trace, ApiDecoder, DecoderBase};
use storage::InMemoryStreamWriter;
use trace_format::{
    BlockHeader, BlockReader, BlockType, MarkerType, MetaCommand, MetaCommandKind,
};

/// Consumer interface a DX12 replay backend would implement.
trait InitConsumer: Send {
    fn process_init_buffer(&mut self, thread_id: ThreadId, buffer_id: HandleId, data: &[u8]);
    fn process_state_marker(&mut self, begin: bool, frame_number: u64);
}

type DynConsumer = dyn InitConsumer;

struct Recording {
    label: &'static str,
    events: Arc<Mutex<Vec<String>>>,
}

impl InitConsumer for Recording {
    fn process_init_buffer(&mut self, thread_id: ThreadId, buffer_id: HandleId, data: &[u8]) {
        self.events.lock().unwrap().push(format!(
            "{} init {} t{} {}b",
            self.label,
            buffer_id,
            thread_id.0,
            data.len()
        ));
    }

    fn process_state_marker(&mut self, begin: bool, frame_number: u64) {
        let edge = if begin { "begin" } else { "end" };
        self.events
            .lock()
            .unwrap()
            .push(format!("{} {edge} {frame_number}", self.label));
    }
}

fn on_init_buffer(consumer: &mut DynConsumer, thread_id: ThreadId, command: &MetaCommand) {
    if let MetaCommand::InitBuffer {
        buffer_id, data, ..
    } = command
    {
        consumer.process_init_buffer(thread_id, *buffer_id, data);
    }
}

fn on_state_marker(consumer: &mut DynConsumer, _thread_id: ThreadId, command: &MetaCommand) {
    match command {
        MetaCommand::StateBeginMarker { frame_number } => {
            consumer.process_state_marker(true, *frame_number)
        }
        MetaCommand::StateEndMarker { frame_number } => {
            consumer.process_state_marker(false, *frame_number)
        }
        _ => {}
    }
}

fn decoder(base: DecoderBase<DynConsumer>) -> DecoderBase<DynConsumer> {
    base.with_handler(MetaCommandKind::InitBuffer, on_init_buffer)
        .with_handler(MetaCommandKind::StateBeginMarker, on_state_marker)
        .with_handler(MetaCommandKind::StateEndMarker, on_state_marker)
}

fn consumer(label: &'static str, events: &Arc<Mutex<Vec<String>>>) -> Arc<Mutex<DynConsumer>> {
    Arc::new(Mutex::new(Recording {
        label,
        events: Arc::clone(events),
    }))
}

fn init_buffer_command(buffer: u64) -> MetaCommand {
    MetaCommand::InitBuffer {
        device_id: HandleId(1),
        buffer_id: HandleId(buffer),
        data: vec![0; 4],
    }
}

#[test]
fn consumers_run_in_registration_order_with_duplicates() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let a = consumer("a", &events);
    let b = consumer("b", &events);

    let mut dx12 = decoder(DecoderBase::dx12());
    dx12.add_consumer(Arc::clone(&a));
    dx12.add_consumer(Arc::clone(&b));
    dx12.add_consumer(Arc::clone(&a));
    assert_eq!(dx12.consumers().len(), 3);

    dx12.dispatch_meta_command(ThreadId(7), &init_buffer_command(2));
    assert_eq!(
        *events.lock().unwrap(),
        vec!["a init 0x2 t7 4b", "b init 0x2 t7 4b", "a init 0x2 t7 4b"]
    );
}

#[test]
fn remove_consumer_drops_every_registration() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let a = consumer("a", &events);
    let b = consumer("b", &events);

    let mut dx12 = decoder(DecoderBase::dx12());
    dx12.add_consumer(Arc::clone(&a));
    dx12.add_consumer(Arc::clone(&b));
    dx12.add_consumer(Arc::clone(&a));
    dx12.remove_consumer(&a);
    assert_eq!(dx12.consumers().len(), 1);

    dx12.remove_consumer(&a);
    assert_eq!(dx12.consumers().len(), 1);

    dx12.dispatch_meta_command(ThreadId(1), &init_buffer_command(3));
    assert_eq!(*events.lock().unwrap(), vec!["b init 0x3 t1 4b"]);
}

#[test]
fn process_trace_routes_by_family() {
    let sink = InMemoryStreamWriter::new();
    let compressor = BlockCompressor::from_policy(&CompressionPolicy::LZ4 { level: 1 }, true)
        .map(|compressor| Arc::new(compressor) as Arc<dyn Compressor>);
    let writer = CommandWriter::new(Arc::new(sink.clone()), compressor.clone());
    let mut ctx = ThreadData::new(ThreadId(3));
    let big = b"upload heap page ".repeat(128);

    writer.write_file_header().unwrap();
    writer.write_state_marker(MarkerType::Begin, 1).unwrap();
    writer
        .write_init_buffer_cmd(
            &mut ctx,
            ApiFamilyId::D3D12,
            HandleId(1),
            HandleId(0xa),
            0,
            16,
            &big,
        )
        .unwrap();
    writer
        .write_init_buffer_cmd(
            &mut ctx,
            ApiFamilyId::Vulkan,
            HandleId(1),
            HandleId(0xb),
            0,
            big.len() as u64,
            &big,
        )
        .unwrap();
    writer
        .write_init_buffer_cmd(
            &mut ctx,
            ApiFamilyId::Dxgi,
            HandleId(1),
            HandleId(0xc),
            0,
            big.len() as u64,
            &big,
        )
        .unwrap();
    writer.write_state_marker(MarkerType::End, 1).unwrap();

    let mut trace = sink.contents();
    let call = BlockHeader {
        size: 12,
        block_type: BlockType::FUNCTION_CALL,
    };
    trace.extend_from_slice(&call.to_bytes());
    trace.extend_from_slice(&ApiCallId::new(ApiFamilyId::D3D12, 1).0.to_le_bytes());
    trace.extend_from_slice(&3u32.to_le_bytes());
    trace.extend_from_slice(&[0; 4]);

    let events = Arc::new(Mutex::new(Vec::new()));
    let mut dx12 = decoder(DecoderBase::dx12());
    dx12.add_consumer(consumer("dx12", &events));
    let mut vulkan = decoder(DecoderBase::vulkan());
    vulkan.add_consumer(consumer("vk", &events));

    let mut reader = BlockReader::open(Cursor::new(trace)).unwrap();
    let decoders: [&dyn ApiDecoder; 2] = [&dx12, &vulkan];
    let stats = process_trace(&mut reader, &decoders, compressor.as_deref()).unwrap();

    assert_eq!(stats.blocks, 6);
    assert_eq!(stats.meta_commands, 5);
    assert_eq!(stats.function_calls, 1);
    assert_eq!(stats.skipped, 0);
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "dx12 begin 1".to_string(),
            "vk begin 1".to_string(),
            "dx12 init 0xa t3 16b".to_string(),
            format!("vk init 0xb t3 {}b", big.len()),
            format!("dx12 init 0xc t3 {}b", big.len()),
            "dx12 end 1".to_string(),
            "vk end 1".to_string(),
        ]
    );
}
