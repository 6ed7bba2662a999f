//! A headless proof that the engine works end to end: no audio/MIDI
//! driver, no GUI, just a `FakeAudioBackend` standing in for both.
//!
//! Builds a small graph — two pass-through voices fed the same input and
//! summed into a mono output — then drives it for a handful of periods,
//! logging every `Notification` the `PostProcessor` emits along the way.

use std::thread;
use std::time::Duration;

use audiograph::backend::fake::FakeAudioBackend;
use audiograph::port::Direction;
use audiograph::{Command, Engine, EngineSettings, Executor, Op, Path, PluginRegistry, Response};
use audiograph_core::test_support::PassThroughFactory;
use audiograph_core::{HostInfo, PortType, SampleRate};

const SAMPLE_RATE: u32 = 48_000;
const BLOCK_LENGTH: u32 = 512;
const PERIODS_TO_RUN: usize = 8;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut registry = PluginRegistry::new();
    registry.register("test.passthrough", Box::new(PassThroughFactory));

    let (notify_tx, notify_rx) = crossbeam_channel::unbounded();
    let host_info = HostInfo::new("audiograph-test-host", "audiograph", env!("CARGO_PKG_VERSION"));
    let mut settings = EngineSettings::default();
    settings.sample_rate = SampleRate::new(SAMPLE_RATE as f64);
    settings.min_frames = 1;
    settings.max_frames = BLOCK_LENGTH as usize;

    let (mut engine, mut executor) = Engine::activate(settings, registry, host_info, notify_tx);
    let mut backend = FakeAudioBackend::new(SAMPLE_RATE, BLOCK_LENGTH, 1, 1);

    log::info!("activated engine at {} Hz, {} frames/period", SAMPLE_RATE, BLOCK_LENGTH);
    build_graph(&mut engine, &mut executor, &mut backend);

    for period in 0..PERIODS_TO_RUN {
        let nframes = backend.block_length() as usize;
        let phase_start = period * nframes;
        let samples: Vec<f32> = (0..nframes)
            .map(|i| {
                let t = (phase_start + i) as f32 / SAMPLE_RATE as f32;
                0.5 * (t * 220.0 * std::f32::consts::TAU).sin()
            })
            .collect();
        backend.set_input(0, &samples);

        executor.run_period(nframes, &mut backend);
        engine.drive();

        for notification in notify_rx.try_iter() {
            log::info!("{:?}", notification);
        }

        let output = backend.output(0);
        log::info!(
            "period {period}: input[0]={:.4} output[0]={:.4} output[last]={:.4}",
            samples[0],
            output[0],
            output[nframes - 1],
        );

        backend.advance(nframes as u64);
        thread::sleep(Duration::from_millis(1));
    }
}

/// Build the demo graph: `/in` and `/out` (mono audio), two `/a`/`/b`
/// pass-through blocks each wired from `/in`, both summed back into
/// `/out` (§8 "parallel blocks sum into shared output").
///
/// `CreateGraph`/`CreateBlock`/`CreatePort` are blocking commands: the
/// submitting call only returns once the Executor has applied it and the
/// PostProcessor has acked it, so building the graph from the same thread
/// that would also need to drive periods would deadlock. A scoped thread
/// submits while this function's own thread keeps `run_period`/`drive`
/// turning, mirroring this workspace's own test harness.
fn build_graph(engine: &mut Engine, executor: &mut Executor, backend: &mut FakeAudioBackend) {
    let cmds = vec![
        cmd(create_port("in", PortType::Audio, Direction::Input), 1),
        cmd(create_port("out", PortType::Audio, Direction::Output), 2),
        cmd(Op::CreateBlock { parent: Path::root(), symbol: "a".into(), plugin_id: "test.passthrough".into(), poly: 1 }, 3),
        cmd(Op::CreateBlock { parent: Path::root(), symbol: "b".into(), plugin_id: "test.passthrough".into(), poly: 1 }, 4),
    ];
    for resp in run_commands(engine, executor, backend, cmds) {
        if let Err(e) = resp.status {
            log::error!("request {} failed: {}", resp.request_id, e);
        }
    }

    let links = [
        (Path::parse("/in").unwrap(), Path::parse("/a/in").unwrap()),
        (Path::parse("/in").unwrap(), Path::parse("/b/in").unwrap()),
        (Path::parse("/a/out").unwrap(), Path::parse("/out").unwrap()),
        (Path::parse("/b/out").unwrap(), Path::parse("/out").unwrap()),
    ];
    for (i, (src, dst)) in links.into_iter().enumerate() {
        let resp = engine.submit(cmd(Op::Connect { src, dst }, 10 + i as u64));
        if let Err(e) = resp.status {
            log::error!("connect failed: {}", e);
        }
    }
    // Non-blocking Connects only enqueue; drain them before the caller's
    // first real period so the graph is fully wired from period 0.
    let nframes = backend.block_length() as usize;
    executor.run_period(nframes, backend);
    engine.drive();
}

fn cmd(op: Op, request_id: u64) -> Command {
    Command { op, request_id }
}

fn create_port(symbol: &str, port_type: PortType, direction: Direction) -> Op {
    Op::CreatePort { parent: Path::root(), symbol: symbol.into(), port_type, direction, poly: 1, min: -1.0, max: 1.0 }
}

/// Submit a batch of blocking commands, driving periods on this thread
/// until every one of them has a `Response`, in submission order.
fn run_commands(engine: &mut Engine, executor: &mut Executor, backend: &mut FakeAudioBackend, cmds: Vec<Command>) -> Vec<Response> {
    let expected = cmds.len();
    let (tx, rx) = std::sync::mpsc::channel::<Response>();
    let (pre, post) = engine.split_mut();

    let mut responses = Vec::with_capacity(expected);
    thread::scope(|scope| {
        scope.spawn(move || {
            for cmd in cmds {
                let resp = pre.prepare(cmd);
                if tx.send(resp).is_err() {
                    return;
                }
            }
        });

        while responses.len() < expected {
            let nframes = backend.block_length() as usize;
            executor.run_period(nframes, backend);
            post.run();
            if let Ok(resp) = rx.recv_timeout(Duration::from_millis(5)) {
                responses.push(resp);
            }
        }
    });

    responses
}
