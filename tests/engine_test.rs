//! End-to-end playback engine tests with a fake trigger source and a
//! recording key sink, covering the state machine's observable contract.

use demotype::emitter::{InputError, KeyEvent, KeySink};
use demotype::engine::{PlaybackEngine, PlaybackState, StartError, StartWarning, Status};
use demotype::hotkey::{HotkeyError, HotkeyId, TriggerFn, TriggerSource};
use demotype::script::{Role, Script, Step};
use demotype::speed::SpeedPreset;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// In-process trigger source; tests fire it by hand.
#[derive(Clone, Default)]
struct FakeTriggers {
    binding: Arc<Mutex<Option<(HotkeyId, TriggerFn)>>>,
}

impl FakeTriggers {
    /// Simulate a system-wide press of `hotkey`.
    fn fire(&self, hotkey: HotkeyId) {
        let callback = {
            let guard = self.binding.lock().unwrap();
            guard
                .as_ref()
                .filter(|(id, _)| *id == hotkey)
                .map(|(_, cb)| Arc::clone(cb))
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    fn registered(&self) -> Option<HotkeyId> {
        self.binding.lock().unwrap().as_ref().map(|(id, _)| *id)
    }
}

impl TriggerSource for FakeTriggers {
    fn register(&mut self, hotkey: HotkeyId, on_trigger: TriggerFn) -> Result<(), HotkeyError> {
        *self.binding.lock().unwrap() = Some((hotkey, on_trigger));
        Ok(())
    }

    fn unregister(&mut self) {
        *self.binding.lock().unwrap() = None;
    }
}

/// Trigger source standing in for an OS that denies the global hook.
struct DeniedTriggers;

impl TriggerSource for DeniedTriggers {
    fn register(&mut self, _hotkey: HotkeyId, _on_trigger: TriggerFn) -> Result<(), HotkeyError> {
        Err(HotkeyError::Unavailable("hook denied".into()))
    }

    fn unregister(&mut self) {}
}

#[derive(Clone, Default)]
struct RecordingSink {
    events: Arc<Mutex<Vec<KeyEvent>>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<KeyEvent> {
        self.events.lock().unwrap().clone()
    }

    fn return_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == KeyEvent::Return)
            .count()
    }
}

impl KeySink for RecordingSink {
    fn send(&mut self, event: KeyEvent) -> Result<(), InputError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

fn step(text: &str, press_enter: bool) -> Step {
    Step::new(Role::Agent, text, press_enter, 0.0)
}

fn test_engine() -> (PlaybackEngine<RecordingSink>, FakeTriggers, RecordingSink) {
    let sink = RecordingSink::default();
    let triggers = FakeTriggers::default();
    let engine = PlaybackEngine::new(sink.clone(), Box::new(triggers.clone()));
    (engine, triggers, sink)
}

fn wait_for(engine: &PlaybackEngine<RecordingSink>, state: PlaybackState, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while engine.state() != state {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {:?}, engine is {:?}",
            state,
            engine.state()
        );
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn wait_for_events(sink: &RecordingSink, min: usize, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while sink.events().len() < min {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {} key events",
            min
        );
        std::thread::sleep(Duration::from_millis(2));
    }
}

const WAIT: Duration = Duration::from_secs(10);

#[test]
fn round_trip_two_steps_two_triggers() {
    let (engine, triggers, sink) = test_engine();
    let script = Script::new(
        "round trip",
        vec![
            Step::new(Role::Agent, "Hi", true, 0.3),
            Step::new(Role::Customer, "Hello", false, 0.0),
        ],
    );
    engine
        .start(script, SpeedPreset::VeryFast, HotkeyId::F2)
        .unwrap();

    triggers.fire(HotkeyId::F2);
    wait_for(&engine, PlaybackState::Armed, WAIT);
    triggers.fire(HotkeyId::F2);
    wait_for(&engine, PlaybackState::Completed, WAIT);

    let status = engine.status();
    assert_eq!(status.step_index, Some(1));
    // Only step one presses Enter: "Hi" + Return, then "Hello" bare.
    assert_eq!(sink.return_count(), 1);
    assert_eq!(sink.events().len(), "Hi".len() + 1 + "Hello".len());
}

#[test]
fn exactly_n_triggers_reach_completed() {
    let (engine, triggers, _sink) = test_engine();
    let steps: Vec<Step> = (0..4).map(|i| step(&format!("s{}", i), false)).collect();
    engine
        .start(Script::new("four", steps), SpeedPreset::VeryFast, HotkeyId::F3)
        .unwrap();

    for i in 0..4 {
        triggers.fire(HotkeyId::F3);
        wait_for(&engine, PlaybackState::Armed, WAIT);
        assert_eq!(engine.status().step_index, Some(i));
    }
    assert_eq!(engine.state(), PlaybackState::Armed);
    triggers.fire(HotkeyId::F3);
    wait_for(&engine, PlaybackState::Completed, WAIT);
}

#[test]
fn triggers_while_typing_are_discarded() {
    let (engine, triggers, _sink) = test_engine();
    let script = Script::new(
        "debounce",
        vec![step("a somewhat longer line, enough to stay typing", false), step("second", false)],
    );
    engine
        .start(script, SpeedPreset::Normal, HotkeyId::F2)
        .unwrap();

    triggers.fire(HotkeyId::F2);
    wait_for(&engine, PlaybackState::Typing, WAIT);
    triggers.fire(HotkeyId::F2);
    triggers.fire(HotkeyId::F2);
    triggers.fire(HotkeyId::F2);
    assert_eq!(engine.status().step_index, Some(0));

    // The burst of mid-typing presses must not have queued an advance.
    wait_for(&engine, PlaybackState::Armed, WAIT);
    assert_eq!(engine.status().step_index, Some(0));
}

#[test]
fn stop_mid_emission_is_prompt_and_final() {
    let (engine, triggers, sink) = test_engine();
    let long_text = "a".repeat(500);
    engine
        .start(
            Script::new("long", vec![step(&long_text, true)]),
            SpeedPreset::Normal,
            HotkeyId::F2,
        )
        .unwrap();

    triggers.fire(HotkeyId::F2);
    wait_for(&engine, PlaybackState::Typing, WAIT);
    std::thread::sleep(Duration::from_millis(150));

    let before_stop = Instant::now();
    engine.stop();
    assert!(before_stop.elapsed() < Duration::from_secs(1));
    assert_eq!(engine.state(), PlaybackState::Stopped);

    let frozen = sink.events().len();
    assert!(frozen < long_text.len(), "emission ran to completion");
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(sink.events().len(), frozen, "characters emitted after stop");
    assert_eq!(sink.return_count(), 0);
}

#[test]
fn restart_after_stop_never_replays_the_old_step() {
    let (engine, triggers, sink) = test_engine();
    // Stop-then-restart in a tight loop; a worker left over from the old
    // session must never type into the new one.
    for round in 0..20 {
        let old = Script::new("old", vec![step(&"Z".repeat(300), false)]);
        engine.start(old, SpeedPreset::Normal, HotkeyId::F2).unwrap();
        triggers.fire(HotkeyId::F2);
        wait_for(&engine, PlaybackState::Typing, WAIT);
        engine.stop();
        let frozen = sink.events().len();

        engine
            .start(
                Script::new("new", vec![step("n", false)]),
                SpeedPreset::VeryFast,
                HotkeyId::F2,
            )
            .unwrap();
        triggers.fire(HotkeyId::F2);
        wait_for(&engine, PlaybackState::Completed, WAIT);

        let tail = &sink.events()[frozen..];
        assert!(
            !tail.contains(&KeyEvent::Char('Z')),
            "old step kept typing after stop (round {})",
            round
        );
        assert_eq!(
            tail.iter().filter(|e| **e == KeyEvent::Char('n')).count(),
            1
        );
    }
}

#[test]
fn reregistering_hotkey_swaps_identity_atomically() {
    let (engine, triggers, _sink) = test_engine();
    engine
        .start(
            Script::new("swap", vec![step("x", false)]),
            SpeedPreset::VeryFast,
            HotkeyId::F2,
        )
        .unwrap();

    engine.set_hotkey(HotkeyId::F5).unwrap();
    assert_eq!(triggers.registered(), Some(HotkeyId::F5));

    // The old identity must be dead.
    triggers.fire(HotkeyId::F2);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.state(), PlaybackState::Armed);
    assert_eq!(engine.status().step_index, None);

    triggers.fire(HotkeyId::F5);
    wait_for(&engine, PlaybackState::Completed, WAIT);
    assert_eq!(engine.status().step_index, Some(0));
}

#[test]
fn empty_script_starts_with_warning_and_completes_on_first_trigger() {
    let (engine, triggers, sink) = test_engine();
    let report = engine
        .start(Script::new("empty", vec![]), SpeedPreset::Fast, HotkeyId::F1)
        .unwrap();
    assert_eq!(report.warnings, vec![StartWarning::EmptyScript]);
    assert_eq!(engine.state(), PlaybackState::Armed);
    assert!(
        engine
            .status()
            .warnings
            .iter()
            .any(|w| w.contains("no steps"))
    );

    triggers.fire(HotkeyId::F1);
    wait_for(&engine, PlaybackState::Completed, WAIT);
    assert!(sink.events().is_empty());
}

#[test]
fn start_while_session_active_is_rejected() {
    let (engine, _triggers, _sink) = test_engine();
    engine
        .start(
            Script::new("one", vec![step("x", false)]),
            SpeedPreset::Fast,
            HotkeyId::F2,
        )
        .unwrap();

    let err = engine
        .start(
            Script::new("two", vec![step("y", false)]),
            SpeedPreset::Fast,
            HotkeyId::F3,
        )
        .unwrap_err();
    assert!(matches!(err, StartError::SessionActive));
    assert_eq!(engine.state(), PlaybackState::Armed);
}

#[test]
fn denied_hook_leaves_engine_idle() {
    let sink = RecordingSink::default();
    let engine = PlaybackEngine::new(sink, Box::new(DeniedTriggers));
    let err = engine
        .start(
            Script::new("never", vec![step("x", false)]),
            SpeedPreset::Fast,
            HotkeyId::F2,
        )
        .unwrap_err();
    assert!(matches!(err, StartError::Hotkey(HotkeyError::Unavailable(_))));
    assert_eq!(engine.state(), PlaybackState::Idle);
    assert_eq!(engine.status().state, PlaybackState::Idle);
}

#[test]
fn observer_sees_every_transition_and_status_matches() {
    let (engine, triggers, _sink) = test_engine();
    let seen: Arc<Mutex<Vec<Status>>> = Arc::default();
    let seen_push = Arc::clone(&seen);
    engine.set_observer(Box::new(move |status| {
        seen_push.lock().unwrap().push(status.clone());
    }));

    engine
        .start(
            Script::new("observe", vec![step("hi", false)]),
            SpeedPreset::VeryFast,
            HotkeyId::F2,
        )
        .unwrap();
    triggers.fire(HotkeyId::F2);
    wait_for(&engine, PlaybackState::Completed, WAIT);

    let states: Vec<PlaybackState> = seen.lock().unwrap().iter().map(|s| s.state).collect();
    assert_eq!(
        states,
        vec![
            PlaybackState::Armed,
            PlaybackState::Typing,
            PlaybackState::Completed,
        ]
    );
    // Late subscribers read the same last-known status.
    assert_eq!(engine.status(), seen.lock().unwrap().last().unwrap().clone());
}

#[test]
fn armed_status_previews_next_step() {
    let (engine, triggers, _sink) = test_engine();
    engine
        .start(
            Script::new(
                "preview",
                vec![step("first message", false), step("second message", false)],
            ),
            SpeedPreset::VeryFast,
            HotkeyId::F2,
        )
        .unwrap();
    assert_eq!(engine.status().next_preview.as_deref(), Some("first message"));

    triggers.fire(HotkeyId::F2);
    wait_for(&engine, PlaybackState::Armed, WAIT);
    assert_eq!(engine.status().next_preview.as_deref(), Some("second message"));

    triggers.fire(HotkeyId::F2);
    wait_for(&engine, PlaybackState::Completed, WAIT);
    assert_eq!(engine.status().next_preview, None);
}

#[test]
fn unsupported_characters_surface_as_session_warnings() {
    let (engine, triggers, sink) = test_engine();
    engine
        .start(
            Script::new("bell", vec![step("a\u{7}b", false)]),
            SpeedPreset::VeryFast,
            HotkeyId::F2,
        )
        .unwrap();
    triggers.fire(HotkeyId::F2);
    wait_for(&engine, PlaybackState::Completed, WAIT);

    let status = engine.status();
    assert_eq!(status.warnings.len(), 1);
    assert!(status.warnings[0].contains("unsupported character"));
    assert_eq!(
        sink.events(),
        vec![KeyEvent::Char('a'), KeyEvent::Char('b')]
    );
}

#[test]
fn warnings_from_a_cancelled_emission_still_surface() {
    let (engine, triggers, sink) = test_engine();
    let text = format!("\u{7}{}", "a".repeat(400));
    engine
        .start(
            Script::new("cancelled bell", vec![step(&text, false)]),
            SpeedPreset::Normal,
            HotkeyId::F2,
        )
        .unwrap();
    triggers.fire(HotkeyId::F2);
    // The first 'a' on the wire means the bell at index 0 was already
    // skipped and its warning recorded.
    wait_for_events(&sink, 1, WAIT);
    engine.stop();

    let status = engine.status();
    assert_eq!(status.state, PlaybackState::Stopped);
    assert!(
        status
            .warnings
            .iter()
            .any(|w| w.contains("unsupported character")),
        "warnings: {:?}",
        status.warnings
    );
}

#[test]
fn status_reports_the_session_hotkey() {
    let (engine, triggers, _sink) = test_engine();
    assert_eq!(engine.status().hotkey, None);

    engine
        .start(
            Script::new("keys", vec![step("x", false)]),
            SpeedPreset::VeryFast,
            HotkeyId::F2,
        )
        .unwrap();
    assert_eq!(engine.status().hotkey, Some(HotkeyId::F2));

    engine.set_hotkey(HotkeyId::F6).unwrap();
    assert_eq!(engine.status().hotkey, Some(HotkeyId::F6));
    assert_eq!(triggers.registered(), Some(HotkeyId::F6));
}

#[test]
fn stopped_session_ignores_triggers_and_allows_restart() {
    let (engine, triggers, _sink) = test_engine();
    engine
        .start(
            Script::new("restart", vec![step("x", false)]),
            SpeedPreset::VeryFast,
            HotkeyId::F2,
        )
        .unwrap();
    engine.stop();
    engine.stop(); // idempotent
    assert_eq!(engine.state(), PlaybackState::Stopped);

    triggers.fire(HotkeyId::F2);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.state(), PlaybackState::Stopped);

    engine
        .start(
            Script::new("again", vec![step("y", false)]),
            SpeedPreset::VeryFast,
            HotkeyId::F4,
        )
        .unwrap();
    assert_eq!(engine.state(), PlaybackState::Armed);
    triggers.fire(HotkeyId::F4);
    wait_for(&engine, PlaybackState::Completed, WAIT);
}
