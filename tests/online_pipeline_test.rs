//! Integration tests for online sorting: acquisition thread, ring buffer and
//! sort daemon together.

use rust_sort::config::SortConfig;
use rust_sort::error::SortError;
use rust_sort::data::ring_buffer::BUFFER_SIZE;
use rust_sort::sort::{OnlinePipeline, ParameterTally, ScalerTotals, ThreadState};
use rust_sort::stream::caen;
use rust_sort::stream::l002::{
    BUFFER_END_MARKER, EVENT_END_MARKER, EVENT_PARAMETER_MARKER, RUN_END_MARKER,
};
use std::io::Cursor;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const EVENT_SIZE: usize = 8;
const TIMEOUT: Duration = Duration::from_secs(10);

fn test_config(format: &str) -> SortConfig {
    let toml_str = format!(
        r#"
        [ring]
        capacity = 8
        poll_interval = "10ms"
        overflow = "stall"

        [sort]
        input_format = "{format}"
        event_size = {EVENT_SIZE}
        "#
    );
    toml::from_str(&toml_str).expect("Failed to parse test config")
}

fn l002_buffer(words: &[u16]) -> Vec<u8> {
    let mut buffer: Vec<u8> = words
        .iter()
        .chain(std::iter::once(&BUFFER_END_MARKER))
        .flat_map(|word| word.to_be_bytes())
        .collect();
    buffer.resize(BUFFER_SIZE, 0);
    buffer
}

fn l002_event(parameters: &[(u16, u16)]) -> Vec<u16> {
    let mut words: Vec<u16> = parameters
        .iter()
        .flat_map(|&(index, value)| [EVENT_PARAMETER_MARKER | index, value])
        .collect();
    words.push(EVENT_END_MARKER);
    words
}

fn caen_buffer(words: &[u32]) -> Vec<u8> {
    let mut buffer: Vec<u8> = words
        .iter()
        .chain(std::iter::once(&caen::BUFFER_END))
        .flat_map(|word| word.to_be_bytes())
        .collect();
    while buffer.len() < BUFFER_SIZE {
        buffer.extend_from_slice(&caen::BUFFER_PAD.to_be_bytes());
    }
    buffer
}

/// One module (GEO 0) block with a single channel 0 hit.
fn caen_event(counter: u32, value: u32) -> [u32; 3] {
    [
        caen::HEADER_TYPE | (1 << 8),
        value,
        caen::END_OF_BLOCK_TYPE | counter,
    ]
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_l002_run_sorted_until_end_of_run() {
    let mut first = l002_event(&[(0, 10), (3, 30)]);
    first.extend(l002_event(&[(1, 11)]));
    let mut second = l002_event(&[(0, 12)]);
    second.extend(l002_event(&[(2048, 77), (2049, 78)]));
    let mut third = l002_event(&[(7, 99)]);
    third.push(RUN_END_MARKER);

    let mut source = l002_buffer(&first);
    source.extend(l002_buffer(&second));
    source.extend(l002_buffer(&third));

    let pipeline = OnlinePipeline::start(
        &test_config("l002"),
        Cursor::new(source),
        ParameterTally::new(EVENT_SIZE),
        ScalerTotals::new(),
    )
    .unwrap();
    pipeline.begin().unwrap();

    assert!(pipeline.wait_for_run_end(TIMEOUT));
    assert!(wait_until(|| pipeline.runs_ended() == 1));
    assert_eq!(pipeline.state(), ThreadState::Suspend);

    let counters = pipeline.counters();
    assert_eq!(counters.buffers_received, 3);
    assert_eq!(counters.buffers_sorted, 3);
    assert_eq!(counters.events_sorted, 4);
    assert_eq!(counters.scaler_blocks, 1);

    let parts = pipeline.join().unwrap();
    assert_eq!(parts.sorter.events(), 4);
    assert_eq!(parts.sorter.hits()[0], 2);
    assert_eq!(parts.sorter.hits()[7], 1);
    assert_eq!(parts.scalers.latest(), &[77, 78]);
}

#[test]
fn test_nothing_moves_before_begin() {
    let source = l002_buffer(&l002_event(&[(0, 1)]));
    let pipeline = OnlinePipeline::start(
        &test_config("l002"),
        Cursor::new(source),
        ParameterTally::new(EVENT_SIZE),
        ScalerTotals::new(),
    )
    .unwrap();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(pipeline.state(), ThreadState::Suspend);
    assert_eq!(pipeline.counters().buffers_received, 0);
    assert!(pipeline.ring().is_empty());

    pipeline.begin().unwrap();
    assert!(pipeline.wait_until_drained(TIMEOUT));
    assert_eq!(pipeline.counters().events_sorted, 1);

    pipeline.stop();
    assert_eq!(pipeline.state(), ThreadState::Stop);
    assert!(pipeline.begin().is_err());
    let parts = pipeline.join().unwrap();
    assert_eq!(parts.sorter.events(), 1);
}

#[test]
fn test_caen_events_reassembled_across_buffers_and_archived() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("raw.dat");

    // Counter 2 arrives before counter 1 and spans two buffers
    let mut first: Vec<u32> = caen_event(2, 20).to_vec();
    first.extend([
        caen::HEADER_TYPE | (1 << 27) | (1 << 8),
        (1 << 27) | (4 << 16) | 40,
        caen::END_OF_BLOCK_TYPE | (1 << 27) | 1,
    ]);
    let mut second: Vec<u32> = caen_event(1, 10).to_vec();
    second.extend([caen::SCALER_BLOCK, 2, 500, 600]);
    second.push(caen::END_PAD);

    let mut source = caen_buffer(&first);
    source.extend(caen_buffer(&second));

    let mut config = test_config("caen");
    config.sort.event_size = 64;
    config.online.archive = Some(archive.clone());

    let events = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&events);
    let sorter = move |event: &[i32]| -> anyhow::Result<()> {
        sink.lock().push((event[0], event[36]));
        Ok(())
    };

    let pipeline =
        OnlinePipeline::start(&config, Cursor::new(source.clone()), sorter, ScalerTotals::new())
            .unwrap();
    pipeline.begin().unwrap();
    assert!(wait_until(|| pipeline.runs_ended() == 1));

    let parts = pipeline.join().unwrap();
    // Events leave in the order their counters first appeared
    assert_eq!(*events.lock(), vec![(20, 0), (10, 40)]);
    assert_eq!(parts.scalers.latest(), &[500, 600]);
    assert_eq!(std::fs::read(&archive).unwrap(), source);
}

#[test]
fn test_zero_capacity_ring_is_rejected() {
    let mut config = test_config("l002");
    config.ring.capacity = 0;
    let result = OnlinePipeline::start(
        &config,
        Cursor::new(Vec::new()),
        ParameterTally::new(EVENT_SIZE),
        ScalerTotals::new(),
    );
    assert!(matches!(result, Err(SortError::Configuration(_))));
}
