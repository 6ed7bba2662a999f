//! End-to-end coverage driving a real `Engine`/`Executor` pair against a
//! `FakeAudioBackend`, one scenario per test.
//!
//! Every harness uses a block length generous enough that a single
//! `run_period` call always drains everything queued so far (§4.7's
//! per-period event cap is `nframes / min_event_frames`, and the default
//! `delivery_margin_frames` of 64 must also fit inside the first period's
//! window) — see `tests/common::new_harness`.
//!
//! Blocking commands (`CreateGraph`/`CreateBlock`/`CreatePort`/`Move`) go
//! through `Harness::run_commands`, which only returns once each has
//! actually been applied. Non-blocking ones (`Connect`, `SetPortValue`, ...)
//! are submitted directly via `Engine::submit` on the test's own thread —
//! safe since they never block waiting for an ack — followed by an
//! explicit `run_period()` so the test controls exactly which period
//! drains them, rather than racing the harness's own internal draining.

mod common;

use audiograph::port::Direction;
use audiograph::{Command, EngineError, Op, Path};
use audiograph_core::test_support::ConstantPerVoiceFactory;
use audiograph_core::PortType;

fn cmd(op: Op, request_id: u64) -> Command {
    Command { op, request_id }
}

fn create_port(parent: Path, symbol: &str, port_type: PortType, direction: Direction, poly: usize) -> Op {
    Op::CreatePort { parent, symbol: symbol.into(), port_type, direction, poly, min: -1.0, max: 1.0 }
}

#[test]
fn identity_graph_passes_audio_straight_through() {
    let mut h = common::new_harness(48_000, 4_096, 1, 1);

    let responses = h.run_commands(vec![
        cmd(create_port(Path::root(), "in", PortType::Audio, Direction::Input, 1), 1),
        cmd(create_port(Path::root(), "out", PortType::Audio, Direction::Output, 1), 2),
    ]);
    assert!(responses.iter().all(|r| r.status.is_ok()), "{:?}", responses);

    let connect = h.engine.submit(cmd(
        Op::Connect { src: Path::parse("/in").unwrap(), dst: Path::parse("/out").unwrap() },
        3,
    ));
    assert_eq!(connect.status, Ok(()));

    let nframes = h.backend.block_length() as usize;
    let samples: Vec<f32> = (0..nframes).map(|i| (i as f32) * 0.001 - 0.5).collect();
    h.backend.set_input(0, &samples);
    h.run_period();

    assert_eq!(h.backend.output(0), samples.as_slice());
}

#[test]
fn parallel_blocks_sum_into_shared_output() {
    let mut h = common::new_harness(48_000, 4_096, 1, 1);

    let creates = h.run_commands(vec![
        cmd(create_port(Path::root(), "in", PortType::Audio, Direction::Input, 1), 1),
        cmd(create_port(Path::root(), "out", PortType::Audio, Direction::Output, 1), 2),
        cmd(Op::CreateBlock { parent: Path::root(), symbol: "a".into(), plugin_id: "test.passthrough".into(), poly: 1 }, 3),
        cmd(Op::CreateBlock { parent: Path::root(), symbol: "b".into(), plugin_id: "test.passthrough".into(), poly: 1 }, 4),
    ]);
    assert!(creates.iter().all(|r| r.status.is_ok()), "{:?}", creates);

    let links = [
        (Path::parse("/in").unwrap(), Path::parse("/a/in").unwrap()),
        (Path::parse("/in").unwrap(), Path::parse("/b/in").unwrap()),
        (Path::parse("/a/out").unwrap(), Path::parse("/out").unwrap()),
        (Path::parse("/b/out").unwrap(), Path::parse("/out").unwrap()),
    ];
    for (i, (src, dst)) in links.into_iter().enumerate() {
        let resp = h.engine.submit(cmd(Op::Connect { src, dst }, 10 + i as u64));
        assert_eq!(resp.status, Ok(()));
    }

    let nframes = h.backend.block_length() as usize;
    let samples: Vec<f32> = vec![0.25; nframes];
    h.backend.set_input(0, &samples);
    h.run_period();

    let expected: Vec<f32> = samples.iter().map(|s| s * 2.0).collect();
    assert_eq!(h.backend.output(0), expected.as_slice());
}

#[test]
fn control_port_latches_last_written_value() {
    let mut h = common::new_harness(48_000, 128, 0, 0);

    let creates = h.run_commands(vec![cmd(
        create_port(Path::root(), "p", PortType::Control, Direction::Input, 1),
        1,
    )]);
    assert!(creates.iter().all(|r| r.status.is_ok()), "{:?}", creates);

    let p = Path::parse("/p").unwrap();

    let resp = h.engine.submit(cmd(Op::SetPortValue { path: p.clone(), value: 0.5, frame_offset: 0 }, 2));
    assert_eq!(resp.status, Ok(()));
    h.run_period();
    assert_eq!(h.executor.port_value(&p), Some(0.5));

    let resp = h.engine.submit(cmd(Op::SetPortValue { path: p.clone(), value: 0.75, frame_offset: 0 }, 3));
    assert_eq!(resp.status, Ok(()));
    h.run_period();
    assert_eq!(h.executor.port_value(&p), Some(0.75));

    // Idempotent: resubmitting the same value changes nothing.
    let resp = h.engine.submit(cmd(Op::SetPortValue { path: p.clone(), value: 0.75, frame_offset: 0 }, 4));
    assert_eq!(resp.status, Ok(()));
    h.run_period();
    assert_eq!(h.executor.port_value(&p), Some(0.75));
}

#[test]
fn cv_port_shows_mid_period_split_then_settles_next_period() {
    let block_length: u32 = 128;
    let mut h = common::new_harness(48_000, block_length, 0, 0);

    let creates = h.run_commands(vec![cmd(
        create_port(Path::root(), "p", PortType::Cv, Direction::Input, 1),
        1,
    )]);
    assert!(creates.iter().all(|r| r.status.is_ok()), "{:?}", creates);

    let p = Path::parse("/p").unwrap();

    // Settle at 0.0 first so the pre-change value is well defined.
    let resp = h.engine.submit(cmd(Op::SetPortValue { path: p.clone(), value: 0.0, frame_offset: 0 }, 2));
    assert_eq!(resp.status, Ok(()));
    h.run_period();
    assert_eq!(h.executor.port_value(&p), Some(0.0));

    let split_at = 32usize;
    let resp = h.engine.submit(cmd(Op::SetPortValue { path: p.clone(), value: 0.75, frame_offset: split_at }, 3));
    assert_eq!(resp.status, Ok(()));
    h.run_period();

    assert_eq!(h.executor.port_value(&p), Some(0.75));
    let samples = h.executor.port_samples(&p).expect("port exists");
    assert_eq!(samples.len(), block_length as usize);
    assert!(samples[..split_at].iter().all(|&s| s == 0.0), "{:?}", &samples[..split_at]);
    assert!(samples[split_at..].iter().all(|&s| s == 0.75), "{:?}", &samples[split_at..]);

    // The following period settles: the whole buffer now reads the new value.
    h.run_period();
    let samples = h.executor.port_samples(&p).expect("port exists");
    assert!(samples.iter().all(|&s| s == 0.75), "{:?}", samples);
}

#[test]
fn connecting_a_block_to_itself_is_rejected_as_a_cycle() {
    let mut h = common::new_harness(48_000, 4_096, 0, 0);

    let creates = h.run_commands(vec![
        cmd(Op::CreateBlock { parent: Path::root(), symbol: "a".into(), plugin_id: "test.passthrough".into(), poly: 1 }, 1),
        cmd(Op::CreateBlock { parent: Path::root(), symbol: "b".into(), plugin_id: "test.passthrough".into(), poly: 1 }, 2),
    ]);
    assert!(creates.iter().all(|r| r.status.is_ok()), "{:?}", creates);

    let forward = h.engine.submit(cmd(
        Op::Connect { src: Path::parse("/a/out").unwrap(), dst: Path::parse("/b/in").unwrap() },
        3,
    ));
    assert_eq!(forward.status, Ok(()));

    let backward = h.engine.submit(cmd(
        Op::Connect { src: Path::parse("/b/out").unwrap(), dst: Path::parse("/a/in").unwrap() },
        4,
    ));
    assert_eq!(backward.status, Err(EngineError::CycleDetected));
}

#[test]
fn polyphonic_voices_mix_down_to_mono() {
    let mut h = common::new_harness_with(48_000, 4_096, 0, 1, |registry| {
        registry.register("test.constant", Box::new(ConstantPerVoiceFactory::new()));
    });

    let creates = h.run_commands(vec![
        cmd(create_port(Path::root(), "out", PortType::Audio, Direction::Output, 1), 1),
        cmd(Op::CreateBlock { parent: Path::root(), symbol: "c".into(), plugin_id: "test.constant".into(), poly: 4 }, 2),
    ]);
    assert!(creates.iter().all(|r| r.status.is_ok()), "{:?}", creates);

    let connect = h.engine.submit(cmd(
        Op::Connect { src: Path::parse("/c/out").unwrap(), dst: Path::parse("/out").unwrap() },
        3,
    ));
    assert_eq!(connect.status, Ok(()));

    h.run_period();

    // test.constant hands out 1.0, 2.0, 3.0, 4.0 across its four voices
    // (§4.3 "a factory is instantiated once per voice, in order"); summed
    // into a mono sink that is 1+2+3+4.
    let expected: Vec<f32> = vec![10.0; h.backend.block_length() as usize];
    assert_eq!(h.backend.output(0), expected.as_slice());
}

#[test]
fn move_renames_a_block_without_disturbing_its_connections() {
    let mut h = common::new_harness(48_000, 4_096, 1, 1);

    let creates = h.run_commands(vec![
        cmd(create_port(Path::root(), "in", PortType::Audio, Direction::Input, 1), 1),
        cmd(create_port(Path::root(), "out", PortType::Audio, Direction::Output, 1), 2),
        cmd(Op::CreateBlock { parent: Path::root(), symbol: "a".into(), plugin_id: "test.passthrough".into(), poly: 1 }, 3),
    ]);
    assert!(creates.iter().all(|r| r.status.is_ok()), "{:?}", creates);

    for (i, (src, dst)) in [
        (Path::parse("/in").unwrap(), Path::parse("/a/in").unwrap()),
        (Path::parse("/a/out").unwrap(), Path::parse("/out").unwrap()),
    ]
    .into_iter()
    .enumerate()
    {
        let resp = h.engine.submit(cmd(Op::Connect { src, dst }, 10 + i as u64));
        assert_eq!(resp.status, Ok(()));
    }
    h.run_period();

    let moved = h.run_commands(vec![cmd(
        Op::Move { path: Path::parse("/a").unwrap(), new_path: Path::parse("/a2").unwrap() },
        20,
    )]);
    assert!(moved.iter().all(|r| r.status.is_ok()), "{:?}", moved);

    // The old path is gone; a fresh block may reuse it.
    let recreated = h.run_commands(vec![cmd(
        Op::CreateBlock { parent: Path::root(), symbol: "a".into(), plugin_id: "test.passthrough".into(), poly: 1 },
        21,
    )]);
    assert!(recreated.iter().all(|r| r.status.is_ok()), "{:?}", recreated);

    let nframes = h.backend.block_length() as usize;
    let samples: Vec<f32> = vec![0.42; nframes];
    h.backend.set_input(0, &samples);
    h.run_period();

    // The renamed block's connections (addressed by BlockId, never by
    // Path, §4.13) still carry audio straight through.
    assert_eq!(h.backend.output(0), samples.as_slice());
}

#[test]
fn disconnect_down_to_one_connection_still_delivers_signal() {
    let mut h = common::new_harness(48_000, 4_096, 1, 1);

    let creates = h.run_commands(vec![
        cmd(create_port(Path::root(), "in", PortType::Audio, Direction::Input, 1), 1),
        cmd(create_port(Path::root(), "out", PortType::Audio, Direction::Output, 1), 2),
        cmd(Op::CreateBlock { parent: Path::root(), symbol: "a".into(), plugin_id: "test.passthrough".into(), poly: 1 }, 3),
        cmd(Op::CreateBlock { parent: Path::root(), symbol: "b".into(), plugin_id: "test.passthrough".into(), poly: 1 }, 4),
    ]);
    assert!(creates.iter().all(|r| r.status.is_ok()), "{:?}", creates);

    let links = [
        (Path::parse("/in").unwrap(), Path::parse("/a/in").unwrap()),
        (Path::parse("/in").unwrap(), Path::parse("/b/in").unwrap()),
        (Path::parse("/a/out").unwrap(), Path::parse("/out").unwrap()),
        (Path::parse("/b/out").unwrap(), Path::parse("/out").unwrap()),
    ];
    for (i, (src, dst)) in links.into_iter().enumerate() {
        let resp = h.engine.submit(cmd(Op::Connect { src, dst }, 10 + i as u64));
        assert_eq!(resp.status, Ok(()));
    }

    let nframes = h.backend.block_length() as usize;
    let samples: Vec<f32> = vec![0.25; nframes];
    h.backend.set_input(0, &samples);
    h.run_period();
    let summed: Vec<f32> = samples.iter().map(|s| s * 2.0).collect();
    assert_eq!(h.backend.output(0), summed.as_slice());

    // Drop one of the two inbound connections into /out, leaving a single
    // ordinary (non-mixing) one.
    let disconnect = h.engine.submit(cmd(
        Op::Disconnect { src: Path::parse("/b/out").unwrap(), dst: Path::parse("/out").unwrap() },
        20,
    ));
    assert_eq!(disconnect.status, Ok(()));

    h.backend.set_input(0, &samples);
    h.run_period();

    // The surviving /a/out -> /out connection must still reach the sink: a
    // mix buffer left installed on /out would keep reading as silence since
    // nothing accumulates into it anymore, while the lone connection writes
    // straight to the port's own buffer.
    assert_eq!(h.backend.output(0), samples.as_slice());
}
