//! Track executor behaviour driven directly, without a player
//!
//! Covers seek correctness, stop delivery at every stage, failure
//! classification and marker callbacks.

mod helpers;

use helpers::{FailingDecoder, Gate, PanickingDecoder, ScriptedDecoder, FRAME_MS, TINY_PCM};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tonearm_player::error::{Error, FriendlyError, Severity};
use tonearm_player::playback::{
    ExecutorSettings, LocalExecutor, MarkerState, PlayerResources, TrackExecutor, TrackMarker, TrackState,
    TrackStateListener,
};
use tonearm_player::AudioTrack;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Exceptions(Mutex<Vec<FriendlyError>>);

impl TrackStateListener for Exceptions {
    fn on_track_exception(&self, _track: &Arc<AudioTrack>, error: FriendlyError) {
        self.0.lock().push(error);
    }
}

struct Running {
    track: Arc<AudioTrack>,
    executor: Arc<LocalExecutor>,
    exceptions: Arc<Exceptions>,
    handle: JoinHandle<()>,
}

fn executor_for(track: &Arc<AudioTrack>, ghosting: bool) -> Arc<LocalExecutor> {
    let settings = ExecutorSettings {
        format: TINY_PCM,
        frame_buffer_duration_ms: 200,
        use_seek_ghosting: ghosting,
    };
    let executor = Arc::new(LocalExecutor::new(
        track.identifier(),
        track.is_seekable(),
        settings,
        Arc::new(PlayerResources::new()),
    ));
    track.assign_executor(executor.clone(), true).unwrap();
    executor
}

fn run(track: Arc<AudioTrack>, ghosting: bool) -> Running {
    let executor = executor_for(&track, ghosting);
    spawn(track, executor)
}

fn spawn(track: Arc<AudioTrack>, executor: Arc<LocalExecutor>) -> Running {
    let exceptions = Arc::new(Exceptions::default());
    let handle = {
        let (track, executor, exceptions) = (track.clone(), executor.clone(), exceptions.clone());
        thread::spawn(move || executor.execute(&track, exceptions.as_ref()))
    };

    Running {
        track,
        executor,
        exceptions,
        handle,
    }
}

/// Timecodes up to and including the terminator
fn collect_timecodes(track: &AudioTrack) -> Vec<u64> {
    let mut timecodes = Vec::new();
    loop {
        let frame = track.provide_timeout(WAIT).unwrap().unwrap();
        if frame.is_terminator() {
            return timecodes;
        }
        timecodes.push(frame.timecode);
    }
}

fn wait_for_full_buffer(executor: &LocalExecutor) {
    let deadline = Instant::now() + WAIT;
    let buffer = executor.frame_buffer().unwrap();
    while buffer.stats().buffered < buffer.full_capacity() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
}

fn wait_for_buffered(executor: &LocalExecutor, frames: usize) -> bool {
    let deadline = Instant::now() + WAIT;
    let buffer = executor.frame_buffer().unwrap();
    while buffer.stats().buffered != frames {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    true
}

#[test]
fn test_plays_all_frames_in_order() {
    let running = run(ScriptedDecoder::new(1, 30).into_track("order"), false);

    let timecodes = collect_timecodes(&running.track);
    running.handle.join().unwrap();

    let expected: Vec<u64> = (0..30).map(|i| i * FRAME_MS).collect();
    assert_eq!(timecodes, expected);
    assert_eq!(running.executor.state(), TrackState::Finished);
    assert!(running.exceptions.0.lock().is_empty());
}

#[test]
fn test_seek_delivers_target_position_next() {
    for ghosting in [false, true] {
        let running = run(ScriptedDecoder::new(1, 200).into_track("seek"), ghosting);
        wait_for_full_buffer(&running.executor);

        running.track.set_position(2000);

        let timecodes = collect_timecodes(&running.track);
        running.handle.join().unwrap();

        // Stale frames may lead when ghosting; once the target shows up the rest follows it
        let first_new = timecodes.iter().position(|t| *t >= 2000).unwrap();
        let after: Vec<u64> = timecodes[first_new..].to_vec();
        let expected: Vec<u64> = (100..200).map(|i| i * FRAME_MS).collect();
        assert_eq!(after, expected, "ghosting={}", ghosting);

        if !ghosting {
            assert_eq!(first_new, 0, "cleared buffer must not serve stale frames");
        }
    }
}

#[test]
fn test_seek_queued_before_execute() {
    let track = ScriptedDecoder::new(1, 50).into_track("queued");
    let executor = executor_for(&track, false);

    track.set_position(700);
    assert_eq!(track.position(), 700);

    let running = spawn(track, executor);
    let timecodes = collect_timecodes(&running.track);
    running.handle.join().unwrap();

    assert_eq!(timecodes.first(), Some(&700));
    assert_eq!(timecodes.len(), 15);
    assert_eq!(running.track.position(), 980);
}

#[test]
fn test_seek_after_end_of_input_reads_again() {
    for ghosting in [false, true] {
        let running = run(ScriptedDecoder::new(1, 10).into_track("tail"), ghosting);

        // Whole track decoded, nothing pulled yet: the decoder waits on the end
        assert!(wait_for_buffered(&running.executor, 10), "ghosting={}", ghosting);

        running.track.set_position(100);
        if ghosting {
            // Stale frames stay until the first post-seek insert replaces them
            assert!(wait_for_buffered(&running.executor, 5), "ghosting={}", ghosting);
        }

        let timecodes = collect_timecodes(&running.track);
        running.handle.join().unwrap();

        assert_eq!(timecodes, vec![100, 120, 140, 160, 180], "ghosting={}", ghosting);
        assert_eq!(running.executor.state(), TrackState::Finished);
        assert!(running.exceptions.0.lock().is_empty());
    }
}

#[test]
fn test_seek_after_finish_is_ignored() {
    let running = run(ScriptedDecoder::new(1, 5).into_track("done"), false);

    let timecodes = collect_timecodes(&running.track);
    running.handle.join().unwrap();
    assert_eq!(timecodes.last(), Some(&80));

    running.track.set_position(20);
    assert_eq!(running.track.position(), 80);
    assert_eq!(running.executor.state(), TrackState::Finished);
}

#[test]
fn test_external_seek_restarts_reader() {
    let gate = Gate::new();
    let track = ScriptedDecoder::new(1, 100).without_seek().gated(&gate).into_track("external");
    let running = run(track, false);

    gate.release(5);
    for expected in 0..5 {
        assert_eq!(running.track.provide_timeout(WAIT).unwrap().unwrap().timecode, expected * FRAME_MS);
    }

    running.track.set_position(1000);
    gate.open();

    let timecodes = collect_timecodes(&running.track);
    running.handle.join().unwrap();
    assert_eq!(timecodes.first(), Some(&1000));
    assert_eq!(timecodes.len(), 50);
}

#[test]
fn test_stop_unblocks_full_buffer() {
    let running = run(ScriptedDecoder::new(1, 10_000).into_track("blocked"), false);
    wait_for_full_buffer(&running.executor);

    running.track.stop();
    running.handle.join().unwrap();

    assert_eq!(running.executor.state(), TrackState::Finished);
    assert!(running.exceptions.0.lock().is_empty());
    assert!(running.executor.frame_buffer().unwrap().is_locked());
}

#[test]
fn test_stop_while_waiting_on_gate() {
    let gate = Gate::new();
    let running = run(ScriptedDecoder::new(1, 100).gated(&gate).into_track("gated"), false);

    thread::sleep(Duration::from_millis(30));
    running.track.stop();
    running.handle.join().unwrap();

    assert_eq!(running.executor.state(), TrackState::Finished);
    assert!(running.exceptions.0.lock().is_empty());
}

#[test]
fn test_stop_before_execute_is_honoured() {
    let track = ScriptedDecoder::new(1, 100).into_track("early-stop");
    let executor = executor_for(&track, false);
    let markers = Arc::new(Mutex::new(Vec::new()));
    let sink = markers.clone();
    track.set_marker(Some(TrackMarker::new(500, move |state| sink.lock().push(state))));

    track.stop();
    let running = spawn(track, executor);
    running.handle.join().unwrap();

    assert_eq!(running.executor.state(), TrackState::Finished);
    assert!(!running.executor.frame_buffer().unwrap().has_received_frames());
    assert_eq!(*markers.lock(), vec![MarkerState::Stopped]);
}

#[test]
fn test_decode_error_is_classified_and_terminates_buffer() {
    let running = run(ScriptedDecoder::new(1, 100).failing_at(3).into_track("broken"), false);

    let timecodes = collect_timecodes(&running.track);
    running.handle.join().unwrap();

    assert_eq!(timecodes, vec![0, 20, 40]);
    let exceptions = running.exceptions.0.lock();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].message(), "Something went wrong when decoding the track.");
    assert_eq!(exceptions[0].severity(), Severity::Fault);
    assert!(matches!(exceptions[0].cause(), Some(Error::Decode(_))));
    assert!(!running.executor.failed_before_load());
}

#[test]
fn test_failure_before_first_frame_is_a_load_failure() {
    let running = run(FailingDecoder::new(Error::Decode("no such file".to_string())).into_track("missing"), false);
    running.handle.join().unwrap();

    assert!(running.executor.failed_before_load());
    let exceptions = running.exceptions.0.lock();
    assert_eq!(exceptions[0].message(), "Something broke when playing the track.");
    assert!(running.track.provide().unwrap().is_terminator());
}

#[test]
fn test_friendly_errors_keep_their_classification() {
    let error = FriendlyError::new("This video is unavailable", Severity::Common);
    let running = run(FailingDecoder::new(error.into()).into_track("unavailable"), false);
    running.handle.join().unwrap();

    let exceptions = running.exceptions.0.lock();
    assert_eq!(exceptions[0].message(), "This video is unavailable");
    assert_eq!(exceptions[0].severity(), Severity::Common);
}

#[test]
fn test_decoder_panic_is_reported_then_resumed() {
    let track = AudioTrack::new(tonearm_player::TrackInfo::new("panics", 1000), PanickingDecoder);
    let running = run(track, false);

    assert!(running.handle.join().is_err());
    assert_eq!(running.executor.state(), TrackState::Finished);

    let exceptions = running.exceptions.0.lock();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].severity(), Severity::Fault);
}

#[test]
fn test_second_execute_is_ignored() {
    let running = run(ScriptedDecoder::new(1, 3).into_track("once"), false);
    collect_timecodes(&running.track);
    running.handle.join().unwrap();

    let exceptions = Exceptions::default();
    running.executor.execute(&running.track, &exceptions);
    assert!(exceptions.0.lock().is_empty());
    assert_eq!(running.executor.state(), TrackState::Finished);
}

#[test]
fn test_marker_reached_during_playback_then_ended() {
    let track = ScriptedDecoder::new(1, 20).into_track("marker");
    let markers = Arc::new(Mutex::new(Vec::new()));

    let sink = markers.clone();
    track.set_marker(Some(TrackMarker::new(100, move |state| sink.lock().push(state))));
    let running = run(track, false);

    let mut reached_at = None;
    loop {
        let frame = running.track.provide_timeout(WAIT).unwrap().unwrap();
        if frame.is_terminator() {
            break;
        }
        if reached_at.is_none() && !markers.lock().is_empty() {
            reached_at = Some(frame.timecode);
        }
    }
    running.handle.join().unwrap();

    assert_eq!(*markers.lock(), vec![MarkerState::Reached]);
    assert_eq!(reached_at, Some(100));

    // Armed after the end: nothing left to reach it
    let sink = markers.clone();
    running
        .track
        .set_marker(Some(TrackMarker::new(10_000, move |state| sink.lock().push(state))));
    assert_eq!(markers.lock().len(), 1);
}

#[test]
fn test_marker_overtaken_by_seek() {
    let gate = Gate::new();
    let track = ScriptedDecoder::new(1, 100).gated(&gate).into_track("overtaken");
    let markers = Arc::new(Mutex::new(Vec::new()));
    let sink = markers.clone();
    track.set_marker(Some(TrackMarker::new(500, move |state| sink.lock().push(state))));

    let running = run(track, false);
    running.track.set_position(1000);
    gate.open();

    collect_timecodes(&running.track);
    running.handle.join().unwrap();
    assert_eq!(*markers.lock(), vec![MarkerState::Overtaken]);
}

#[test]
fn test_marker_ended_when_track_finishes_first() {
    let track = ScriptedDecoder::new(1, 5).into_track("short");
    let markers = Arc::new(Mutex::new(Vec::new()));
    let sink = markers.clone();
    track.set_marker(Some(TrackMarker::new(60_000, move |state| sink.lock().push(state))));

    let running = run(track, false);
    collect_timecodes(&running.track);
    running.handle.join().unwrap();
    assert_eq!(*markers.lock(), vec![MarkerState::Ended]);
}

#[test]
fn test_diagnostics_name_the_decode_thread() {
    let gate = Gate::new();
    let track = ScriptedDecoder::new(1, 100).gated(&gate).into_track("diag");
    let executor = executor_for(&track, false);

    let exceptions = Arc::new(Exceptions::default());
    let handle = {
        let (track, executor, exceptions) = (track.clone(), executor.clone(), exceptions.clone());
        thread::Builder::new()
            .name("decode-under-test".to_string())
            .spawn(move || executor.execute(&track, exceptions.as_ref()))
            .unwrap()
    };

    let deadline = Instant::now() + WAIT;
    while executor.state() != TrackState::Playing && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    let diagnostics = executor.diagnostics().unwrap();
    assert!(diagnostics.contains("thread=decode-under-test"), "{}", diagnostics);
    assert!(diagnostics.contains("state=Playing"), "{}", diagnostics);

    track.stop();
    handle.join().unwrap();
}
