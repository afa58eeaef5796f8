//! Turn controller
//!
//! The serialized context of the daemon. `run` drains the event inbox and
//! is the only code that touches turn state, the single-flight token, the
//! capture session and the speech ports. Engines, camera, encoder and
//! uploader work elsewhere and only post their results back.
//!
//! Turn flow: announce the intro, listen, dispatch the matched action,
//! then announce or listen again. At most one action holds the token at a
//! time; a trigger that arrives while it is held is rejected, not queued.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capture::{
    CameraCapture, CaptureEvent, CapturePipeline, Cue, EncodeError, ImageEncoder,
    PipelineSettings, SessionOutcome, Step, UploadTransport,
};
use crate::config::Config;
use crate::events::{Event, EventSink, RejectReason, TurnEvent};
use crate::gesture::{Gesture, GestureDetector};
use crate::haptics::{Haptics, Pulse};
use crate::lifecycle::HostCommand;
use crate::registry::{Action, ActionId, ActionRegistry, Trigger};
use crate::speech::{
    Completion, Recognition, RecognitionErrorKind, RecognizerFactory, Rejected, SpeechEngine,
    SpeechInput, SpeechOutcome, SpeechOutput,
};
use crate::state::{CaptureState, TurnState};
use crate::timers::{TimerFired, TimerKind, Timers};

/// Engines and devices the controller drives
pub struct Ports {
    pub speech: Box<dyn SpeechEngine>,
    pub recognizers: Box<dyn RecognizerFactory>,
    pub camera: Arc<dyn CameraCapture>,
    pub encoder: Arc<dyn ImageEncoder>,
    pub uploader: Arc<dyn UploadTransport>,
    pub haptics: Box<dyn Haptics>,
}

/// What to do once an utterance has been delivered
#[derive(Debug, Clone, PartialEq, Eq)]
enum AfterSpeech {
    /// Intro spoken: open the microphone after the settle delay
    Intro,
    /// Not-understood notice spoken: rebuild the recognizer and listen
    Relisten,
    Pipeline(Uuid, Cue),
    Handoff(ActionId),
    Exit,
    Nothing,
}

impl AfterSpeech {
    /// Whether the continuation still runs when newer speech cut it off
    fn survives_interruption(&self) -> bool {
        matches!(
            self,
            AfterSpeech::Pipeline(..) | AfterSpeech::Handoff(_) | AfterSpeech::Exit
        )
    }
}

pub struct TurnController {
    config: Arc<Config>,
    registry: ActionRegistry,
    settings: Arc<PipelineSettings>,

    output: SpeechOutput<AfterSpeech>,
    input: SpeechInput,
    camera: Arc<dyn CameraCapture>,
    encoder: Arc<dyn ImageEncoder>,
    uploader: Arc<dyn UploadTransport>,
    haptics: Box<dyn Haptics>,

    sink: EventSink,
    notify: broadcast::Sender<TurnEvent>,
    timers: Timers,
    detector: GestureDetector,

    state: TurnState,
    state_entered_at: Instant,
    /// Single-flight token: the action currently executing
    token: Option<ActionId>,
    pipeline: Option<CapturePipeline>,
    last_outcome: Option<SessionOutcome>,
    /// `activate` arrived before the speech engine was ready
    pending_activation: bool,
    /// Host is in the background
    paused: bool,
    /// The recognizer has run at least once; later attempts rebuild it
    mic_used: bool,
}

impl TurnController {
    pub fn new(
        config: Arc<Config>,
        registry: ActionRegistry,
        ports: Ports,
        sink: EventSink,
        notify: broadcast::Sender<TurnEvent>,
    ) -> Self {
        let settings = Arc::new(PipelineSettings::from_config(&config));
        Self {
            registry,
            settings,
            output: SpeechOutput::new(ports.speech),
            input: SpeechInput::new(ports.recognizers, sink.clone()),
            camera: ports.camera,
            encoder: ports.encoder,
            uploader: ports.uploader,
            haptics: ports.haptics,
            timers: Timers::new(sink.clone()),
            sink,
            notify,
            detector: GestureDetector::new(),
            state: TurnState::Idle,
            state_entered_at: Instant::now(),
            token: None,
            pipeline: None,
            last_outcome: None,
            pending_activation: false,
            paused: false,
            mic_used: false,
            config,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Action holding the single-flight token
    pub fn in_flight(&self) -> Option<&ActionId> {
        self.token.as_ref()
    }

    pub fn capture_state(&self) -> Option<CaptureState> {
        self.pipeline.as_ref().map(CapturePipeline::state)
    }

    pub fn last_outcome(&self) -> Option<&SessionOutcome> {
        self.last_outcome.as_ref()
    }

    /// Process events until teardown or until every sink is dropped
    pub async fn run(&mut self, mut inbox: mpsc::UnboundedReceiver<Event>) {
        info!("turn controller started in Idle state");

        while let Some(event) = inbox.recv().await {
            self.handle(event);
            if self.state == TurnState::Terminated {
                break;
            }
        }

        if self.state != TurnState::Terminated {
            self.teardown();
        }
        info!("turn controller stopped");
    }

    /// Apply one event, then deliver any speech completions it produced
    pub fn handle(&mut self, event: Event) {
        if self.state == TurnState::Terminated {
            debug!(?event, "event after teardown ignored");
            return;
        }

        match event {
            Event::Host(command) => self.on_host(command),
            Event::Speech(event) => {
                self.output.on_engine_event(event);
                if self.output.is_ready() && self.pending_activation {
                    self.activate();
                }
            }
            Event::Recognition(event) => match self.input.resolve(event) {
                Some(Recognition::Text(text)) => self.on_recognized(&text),
                Some(Recognition::Error(kind)) => self.on_recognition_error(kind),
                None => {}
            },
            Event::Pointer(event) => {
                if let Some(gesture) = self.detector.feed(event) {
                    self.on_gesture(gesture);
                }
            }
            Event::Gesture(gesture) => self.on_gesture(gesture),
            Event::Capture(event) => self.on_capture_event(event),
            Event::Timer(fired) => self.on_timer(fired),
        }

        self.drain_speech();
    }

    fn on_host(&mut self, command: HostCommand) {
        info!(%command, state = %self.state, "lifecycle hook");
        match command {
            HostCommand::Activate => self.activate(),
            HostCommand::Deactivate => self.deactivate(),
            HostCommand::Resume => self.activate_resume(),
            HostCommand::Teardown => self.teardown(),
        }
    }

    /// Start the first turn once speech output is ready
    pub fn activate(&mut self) {
        if !self.output.is_ready() {
            info!("speech engine not ready, activation deferred");
            self.pending_activation = true;
            return;
        }
        self.pending_activation = false;

        if self.state != TurnState::Idle {
            debug!(state = %self.state, "already active");
            return;
        }
        self.paused = false;
        self.transition_to(TurnState::Announcing);
        let intro = self.config.prompts.intro.clone();
        self.say(&intro, AfterSpeech::Intro);
    }

    /// Host went to the background: stop listening and speaking
    ///
    /// The single-flight token is kept. A running capture session carries
    /// on to its report and then leaves the turn Idle.
    pub fn deactivate(&mut self) {
        self.paused = true;
        self.pending_activation = false;
        self.input.stop();
        self.timers.cancel(TimerKind::ListenDelay);

        match self.output.stop() {
            // cut off by the host, counts as delivered
            Some(after) if after.survives_interruption() => self.after_speech(after),
            Some(after) => debug!(?after, "pending prompt discarded"),
            None => {}
        }

        if self.token.is_none() && !matches!(self.state, TurnState::Idle | TurnState::Terminated) {
            self.transition_to(TurnState::Idle);
        }
    }

    /// Host is back in the foreground
    ///
    /// Clears a stale selection and announces again. A capture session
    /// still running keeps its token and reports when it is done.
    pub fn activate_resume(&mut self) {
        self.paused = false;

        if self.pipeline.is_some() {
            debug!("capture session still running, resume deferred to its report");
            return;
        }

        if let Some(action) = self.token.take() {
            debug!(%action, "stale selection cleared");
        }
        self.input.stop();
        self.timers.cancel(TimerKind::ListenDelay);
        if let Some(after) = self.output.stop() {
            debug!(?after, "pending prompt discarded");
        }
        if self.state != TurnState::Idle {
            self.transition_to(TurnState::Idle);
        }
        self.activate();
    }

    /// Release every resource; the controller accepts nothing afterwards
    pub fn teardown(&mut self) {
        if self.state == TurnState::Terminated {
            return;
        }
        self.abort_session();
        self.timers.cancel_all();
        self.input.teardown();
        self.output.shutdown();
        self.token = None;
        self.pending_activation = false;
        self.transition_to(TurnState::Terminated);
        self.emit(TurnEvent::Terminated);
    }

    fn on_recognized(&mut self, text: &str) {
        if self.token.is_some() || !self.state.accepts_voice() {
            debug!(text, state = %self.state, "transcript ignored");
            return;
        }
        info!(text, "heard");

        match self.registry.resolve_voice(text).cloned() {
            Some(action) => self.dispatch(
                action,
                Trigger::Voice {
                    transcript: text.to_string(),
                },
            ),
            None => {
                self.emit(TurnEvent::NotUnderstood {
                    transcript: text.to_string(),
                });
                self.transition_to(TurnState::Announcing);
                let notice = self.config.prompts.not_understood.clone();
                self.say(&notice, AfterSpeech::Relisten);
            }
        }
    }

    fn on_recognition_error(&mut self, kind: RecognitionErrorKind) {
        if self.token.is_some() || self.state != TurnState::Listening || self.paused {
            debug!(?kind, state = %self.state, "recognition error ignored");
            return;
        }
        debug!(?kind, "recognition error, rebuilding recognizer");
        self.input.restart();
    }

    fn on_gesture(&mut self, gesture: Gesture) {
        let Some(action) = self.registry.resolve_gesture(gesture).cloned() else {
            debug!(%gesture, "gesture not bound");
            return;
        };
        let trigger = Trigger::Gesture { gesture };

        if self.token.is_some() {
            self.reject(trigger, RejectReason::Busy);
        } else if !self.state.accepts_gesture() {
            self.reject(trigger, RejectReason::NotListening);
        } else {
            self.dispatch(action, trigger);
        }
    }

    fn reject(&mut self, trigger: Trigger, reason: RejectReason) {
        debug!(?trigger, ?reason, "trigger rejected");
        self.emit(TurnEvent::TriggerRejected { trigger, reason });
    }

    /// Take the token and run `action`
    fn dispatch(&mut self, id: ActionId, trigger: Trigger) {
        let Some(action) = self.registry.action(&id).cloned() else {
            warn!(action = %id, "trigger resolved to an undefined action");
            return;
        };

        self.token = Some(id.clone());
        self.input.stop();
        self.timers.cancel(TimerKind::ListenDelay);
        self.transition_to(TurnState::Dispatching);
        self.haptics.pulse(Pulse::Long);
        info!(action = %id, ?trigger, "action dispatched");
        self.emit(TurnEvent::ActionDispatched {
            action: id.clone(),
            trigger,
        });

        match action {
            Action::Capture => {
                let pipeline = CapturePipeline::new(Arc::clone(&self.settings));
                self.pipeline = Some(pipeline);
                self.drive(CapturePipeline::start);
            }
            Action::Handoff { confirmation } => self.say(&confirmation, AfterSpeech::Handoff(id)),
            Action::RepeatIntro => {
                self.token = None;
                self.transition_to(TurnState::Announcing);
                let intro = self.config.prompts.intro.clone();
                self.say(&intro, AfterSpeech::Intro);
            }
            Action::Exit { farewell } => self.say(&farewell, AfterSpeech::Exit),
        }
    }

    fn on_capture_event(&mut self, event: CaptureEvent) {
        let session = event.session();
        if self.pipeline.as_ref().map(CapturePipeline::id) != Some(session) {
            debug!(%session, "result for inactive capture session dropped");
            return;
        }

        match event {
            CaptureEvent::Captured { result, .. } => self.drive(|p| p.on_captured(result)),
            CaptureEvent::Encoded { result, .. } => self.drive(|p| p.on_encoded(result)),
            CaptureEvent::Uploaded {
                attempt, result, ..
            } => self.drive(|p| p.on_uploaded(attempt, result)),
        }
    }

    fn on_timer(&mut self, fired: TimerFired) {
        if !self.timers.take_fired(fired) {
            return;
        }
        match fired.kind {
            TimerKind::ListenDelay => {
                if self.state == TurnState::Listening && self.token.is_none() && !self.paused {
                    self.open_microphone();
                }
            }
            TimerKind::CaptureCountdown => self.drive(CapturePipeline::on_capture_timer),
            TimerKind::WaitNotice => self.drive(CapturePipeline::on_wait_notice),
        }
    }

    fn open_microphone(&mut self) {
        if self.mic_used {
            self.input.restart();
        } else {
            self.mic_used = true;
            self.input.listen();
        }
    }

    /// Enter Listening; the recognizer opens after the settle delay
    fn listen_after_delay(&mut self) {
        self.transition_to(TurnState::Listening);
        self.timers
            .arm(TimerKind::ListenDelay, self.config.timing.listen_delay());
    }

    /// Feed the live pipeline and carry out the steps it returns
    fn drive(&mut self, f: impl FnOnce(&mut CapturePipeline) -> Vec<Step>) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        let before = pipeline.state();
        let steps = f(pipeline);
        let session = pipeline.id();
        let after = pipeline.state();

        if before != after {
            self.emit(TurnEvent::CaptureStateChanged {
                session,
                state: after,
            });
        }
        for step in steps {
            self.run_step(session, step);
        }
    }

    fn run_step(&mut self, session: Uuid, step: Step) {
        match step {
            Step::Speak { text, cue } => {
                let after = cue.map_or(AfterSpeech::Nothing, |cue| AfterSpeech::Pipeline(session, cue));
                self.say(&text, after);
            }
            Step::ArmCaptureTimer(delay) => self.timers.arm(TimerKind::CaptureCountdown, delay),
            Step::CaptureStill => {
                let camera = Arc::clone(&self.camera);
                let sink = self.sink.clone();
                tokio::spawn(async move {
                    let result = camera.capture_still().await;
                    sink.send(Event::Capture(CaptureEvent::Captured { session, result }));
                });
            }
            Step::Encode(frame) => {
                let encoder = Arc::clone(&self.encoder);
                let sink = self.sink.clone();
                tokio::spawn(async move {
                    let result = tokio::task::spawn_blocking(move || encoder.encode(frame))
                        .await
                        .unwrap_or_else(|e| Err(EncodeError::Corrupt(format!("encoder task failed: {e}"))));
                    sink.send(Event::Capture(CaptureEvent::Encoded { session, result }));
                });
            }
            Step::Upload { attempt, payload } => {
                self.emit(TurnEvent::UploadAttempt { session, attempt });
                let uploader = Arc::clone(&self.uploader);
                let sink = self.sink.clone();
                tokio::spawn(async move {
                    let result = uploader.post(payload).await;
                    if let Err(e) = &result {
                        error!(%session, attempt, error = %e, "upload failed");
                    }
                    sink.send(Event::Capture(CaptureEvent::Uploaded {
                        session,
                        attempt,
                        result,
                    }));
                });
            }
            Step::ArmWaitNotice(delay) => self.timers.arm(TimerKind::WaitNotice, delay),
            Step::CancelWaitNotice => {
                self.timers.cancel(TimerKind::WaitNotice);
            }
            Step::Pulse(pulse) => self.haptics.pulse(pulse),
            Step::Finish(outcome) => self.finish_session(session, outcome),
        }
    }

    /// The report was delivered: release the token and listen again
    fn finish_session(&mut self, session: Uuid, outcome: SessionOutcome) {
        self.pipeline = None;
        self.timers.cancel(TimerKind::CaptureCountdown);
        self.timers.cancel(TimerKind::WaitNotice);
        self.last_outcome = Some(outcome.clone());
        self.emit(TurnEvent::SessionFinished { session, outcome });
        self.release();
    }

    /// End a live session without a report
    fn abort_session(&mut self) {
        let Some(mut pipeline) = self.pipeline.take() else {
            return;
        };
        self.timers.cancel(TimerKind::CaptureCountdown);
        self.timers.cancel(TimerKind::WaitNotice);
        pipeline.abort();
        let session = pipeline.id();
        self.emit(TurnEvent::CaptureStateChanged {
            session,
            state: pipeline.state(),
        });
        self.emit(TurnEvent::SessionAborted { session });
        self.token = None;
    }

    /// Clear the token; listen again unless the host is away
    fn release(&mut self) {
        self.token = None;
        if self.paused {
            if self.state != TurnState::Idle {
                self.transition_to(TurnState::Idle);
            }
        } else {
            self.listen_after_delay();
        }
    }

    /// Speak; a refused utterance runs its continuation right away
    fn say(&mut self, text: &str, after: AfterSpeech) {
        if let Err(Rejected { reason, then }) = self.output.speak(text, after) {
            warn!(%reason, text, "utterance not spoken");
            self.after_speech(then);
        }
    }

    fn drain_speech(&mut self) {
        while let Some(Completion { id, outcome, then }) = self.output.take_completed() {
            if outcome == SpeechOutcome::Interrupted && !then.survives_interruption() {
                debug!(%id, ?then, "interrupted prompt dropped");
                continue;
            }
            self.after_speech(then);
        }
    }

    fn after_speech(&mut self, after: AfterSpeech) {
        match after {
            AfterSpeech::Intro => {
                if self.state != TurnState::Announcing || self.token.is_some() {
                    return;
                }
                self.haptics.pulse(Pulse::Short);
                self.listen_after_delay();
            }
            AfterSpeech::Relisten => {
                if self.state != TurnState::Announcing || self.token.is_some() {
                    return;
                }
                self.listen_after_delay();
            }
            AfterSpeech::Pipeline(session, cue) => {
                if self.pipeline.as_ref().map(CapturePipeline::id) == Some(session) {
                    self.drive(|p| p.on_speech_done(cue));
                } else {
                    debug!(%session, ?cue, "speech cue for inactive session dropped");
                }
            }
            AfterSpeech::Handoff(action) => {
                info!(%action, "handing off to host");
                self.emit(TurnEvent::Handoff { action });
            }
            AfterSpeech::Exit => self.teardown(),
            AfterSpeech::Nothing => {}
        }
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_state: TurnState) {
        let old_state = self.state;
        if old_state == new_state {
            return;
        }
        if !old_state.can_transition_to(new_state) {
            warn!(from = %old_state, to = %new_state, "invalid turn transition");
            return;
        }

        let duration_ms = self.state_entered_at.elapsed().as_millis() as u64;
        info!(from = %old_state, to = %new_state, duration_ms, "state transition");

        self.state = new_state;
        self.state_entered_at = Instant::now();
        self.emit(TurnEvent::StateChanged {
            from: old_state,
            to: new_state,
        });
    }

    fn emit(&self, event: TurnEvent) {
        debug!(%event, "emitting turn event");
        let _ = self.notify.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::capture::{
        CaptureError, Frame, FrameFormat, JpegPassthrough, Payload, TransportError,
        UploadOutcome, UploadResponse,
    };
    use crate::config::Prompts;
    use crate::speech::{AttemptId, RecognitionEvent, Recognizer, SpeechEvent, UtteranceId};

    const TOTAL_12000: &str = r#"{"success":true,"data":{"total_price":"12000"}}"#;

    #[derive(Default)]
    struct Record {
        spoken: Vec<String>,
        pulses: Vec<Pulse>,
        recognizers_created: u32,
        listening: Option<AttemptId>,
        captures: u32,
        uploads: u32,
    }

    type Shared = Arc<Mutex<Record>>;

    /// Finishes every utterance as soon as it starts
    struct FakeSpeech {
        sink: EventSink,
        record: Shared,
    }

    impl SpeechEngine for FakeSpeech {
        fn speak(&mut self, id: UtteranceId, text: &str) {
            self.record.lock().unwrap().spoken.push(text.to_string());
            self.sink.send(Event::Speech(SpeechEvent::Finished(id)));
        }

        fn stop(&mut self) {}

        fn shutdown(&mut self) {}
    }

    struct FakeRecognizers(Shared);

    impl RecognizerFactory for FakeRecognizers {
        fn create(&mut self, _sink: EventSink) -> Box<dyn Recognizer> {
            self.0.lock().unwrap().recognizers_created += 1;
            Box::new(FakeRecognizer(self.0.clone()))
        }
    }

    struct FakeRecognizer(Shared);

    impl Recognizer for FakeRecognizer {
        fn start(&mut self, attempt: AttemptId) {
            self.0.lock().unwrap().listening = Some(attempt);
        }

        fn stop(&mut self) {
            self.0.lock().unwrap().listening = None;
        }

        fn destroy(&mut self) {
            self.0.lock().unwrap().listening = None;
        }
    }

    struct FakeHaptics(Shared);

    impl Haptics for FakeHaptics {
        fn short_pulse(&mut self) {
            self.0.lock().unwrap().pulses.push(Pulse::Short);
        }

        fn long_pulse(&mut self) {
            self.0.lock().unwrap().pulses.push(Pulse::Long);
        }
    }

    struct FakeCamera(Shared);

    #[async_trait]
    impl CameraCapture for FakeCamera {
        async fn capture_still(&self) -> Result<Frame, CaptureError> {
            self.0.lock().unwrap().captures += 1;
            Ok(Frame {
                format: FrameFormat::Jpeg,
                bytes: vec![0xFF, 0xD8, 0x42, 0xFF, 0xD9],
            })
        }
    }

    struct FakeUploader {
        record: Shared,
        delay: Duration,
        script: Mutex<VecDeque<Result<UploadResponse, TransportError>>>,
    }

    #[async_trait]
    impl UploadTransport for FakeUploader {
        async fn post(&self, _payload: Payload) -> Result<UploadResponse, TransportError> {
            self.record.lock().unwrap().uploads += 1;
            tokio::time::sleep(self.delay).await;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Io("nothing scripted".into())))
        }
    }

    fn ok(body: &str) -> Result<UploadResponse, TransportError> {
        Ok(UploadResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    struct Harness {
        sink: EventSink,
        events: broadcast::Receiver<TurnEvent>,
        seen: Vec<TurnEvent>,
        record: Shared,
        prompts: Prompts,
        task: JoinHandle<TurnController>,
    }

    /// Controller wired to recording fakes, not yet running
    fn wired_controller(
        script: Vec<Result<UploadResponse, TransportError>>,
        upload_delay: Duration,
    ) -> (
        TurnController,
        mpsc::UnboundedReceiver<Event>,
        broadcast::Receiver<TurnEvent>,
        EventSink,
        Shared,
    ) {
        let config = Config::default();
        let registry = ActionRegistry::from_config(&config.commands).unwrap();
        let (sink, inbox) = EventSink::channel();
        let (notify, events) = broadcast::channel(256);
        let record = Shared::default();

        let ports = Ports {
            speech: Box::new(FakeSpeech {
                sink: sink.clone(),
                record: record.clone(),
            }),
            recognizers: Box::new(FakeRecognizers(record.clone())),
            camera: Arc::new(FakeCamera(record.clone())),
            encoder: Arc::new(JpegPassthrough),
            uploader: Arc::new(FakeUploader {
                record: record.clone(),
                delay: upload_delay,
                script: Mutex::new(script.into()),
            }),
            haptics: Box::new(FakeHaptics(record.clone())),
        };

        let controller = TurnController::new(Arc::new(config), registry, ports, sink.clone(), notify);
        (controller, inbox, events, sink, record)
    }

    impl Harness {
        fn new(
            script: Vec<Result<UploadResponse, TransportError>>,
            upload_delay: Duration,
        ) -> Self {
            let (mut controller, inbox, events, sink, record) = wired_controller(script, upload_delay);
            let prompts = Config::default().prompts;
            let task = tokio::spawn(async move {
                controller.run(inbox).await;
                controller
            });

            Self {
                sink,
                events,
                seen: Vec::new(),
                record,
                prompts,
                task,
            }
        }

        /// Ready the speech engine and activate
        fn start(&self) {
            self.sink.send(Event::Speech(SpeechEvent::Ready));
            self.sink.activate();
        }

        async fn wait_for(&mut self, pred: impl Fn(&TurnEvent) -> bool) -> TurnEvent {
            loop {
                let event = tokio::time::timeout(Duration::from_secs(600), self.events.recv())
                    .await
                    .expect("timed out waiting for turn event")
                    .expect("turn event channel closed");
                self.seen.push(event.clone());
                if pred(&event) {
                    return event;
                }
            }
        }

        /// Wait until a recognition attempt is open
        async fn mic_open(&self) -> AttemptId {
            for _ in 0..1000 {
                if let Some(attempt) = self.record.lock().unwrap().listening {
                    return attempt;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("recognizer never started");
        }

        /// Resolve the open attempt; the recognizer goes idle afterwards
        async fn hear(&self, text: &str) {
            let attempt = self.mic_open().await;
            self.record.lock().unwrap().listening = None;
            self.sink.send(Event::Recognition(RecognitionEvent::Result {
                attempt,
                text: text.to_string(),
            }));
        }

        fn spoken(&self, text: &str) -> usize {
            self.record
                .lock()
                .unwrap()
                .spoken
                .iter()
                .filter(|s| s.as_str() == text)
                .count()
        }

        fn count(&self, pred: impl Fn(&TurnEvent) -> bool) -> usize {
            self.seen.iter().filter(|e| pred(e)).count()
        }

        async fn finish(self) -> TurnController {
            self.sink.teardown();
            self.task.await.unwrap()
        }
    }

    fn is_finished(event: &TurnEvent) -> bool {
        matches!(event, TurnEvent::SessionFinished { .. })
    }

    fn entered(state: TurnState) -> impl Fn(&TurnEvent) -> bool {
        move |e: &TurnEvent| matches!(e, TurnEvent::StateChanged { to, .. } if *to == state)
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_waits_for_speech_engine() {
        let mut h = Harness::new(vec![], Duration::ZERO);
        h.sink.activate();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.record.lock().unwrap().spoken.is_empty());

        h.sink.send(Event::Speech(SpeechEvent::Ready));
        h.wait_for(entered(TurnState::Announcing)).await;
        h.wait_for(entered(TurnState::Listening)).await;
        h.mic_open().await;

        assert_eq!(h.spoken(&h.prompts.intro), 1);
        assert_eq!(h.record.lock().unwrap().pulses, vec![Pulse::Short]);
        let controller = h.finish().await;
        assert_eq!(controller.state(), TurnState::Terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_capture_reports_price() {
        let mut h = Harness::new(vec![ok(TOTAL_12000)], Duration::from_millis(200));
        h.start();
        h.hear("please take a picture").await;

        let event = h.wait_for(is_finished).await;
        match event {
            TurnEvent::SessionFinished { outcome, .. } => assert_eq!(
                outcome,
                SessionOutcome::Uploaded {
                    outcome: UploadOutcome::Success {
                        total_price: "12000".into()
                    }
                }
            ),
            other => panic!("unexpected {other:?}"),
        }
        assert!(h.count(|e| matches!(e, TurnEvent::CaptureStateChanged { state: CaptureState::Done, .. })) == 1);

        h.wait_for(entered(TurnState::Listening)).await;
        h.mic_open().await;
        {
            let record = h.record.lock().unwrap();
            assert!(record.spoken.iter().any(|s| s.contains("12000")));
            assert_eq!(record.captures, 1);
            assert_eq!(record.uploads, 1);
            // intro attempt, then a rebuilt recognizer after the report
            assert_eq!(record.recognizers_created, 2);
            assert_eq!(record.pulses.last(), Some(&Pulse::Short));
        }
        assert_eq!(h.spoken(&h.prompts.capture_complete), 1);

        let controller = h.finish().await;
        assert!(controller.last_outcome().is_some_and(SessionOutcome::is_success));
        assert_eq!(controller.in_flight(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gesture_and_voice_in_same_tick_dispatch_once() {
        let mut h = Harness::new(vec![ok(TOTAL_12000)], Duration::ZERO);
        h.start();
        let attempt = h.mic_open().await;

        h.sink.gesture(Gesture::DoubleTap);
        h.sink.send(Event::Recognition(RecognitionEvent::Result {
            attempt,
            text: "capture".into(),
        }));
        h.sink.gesture(Gesture::DoubleTap);

        h.wait_for(is_finished).await;
        assert_eq!(h.count(|e| matches!(e, TurnEvent::ActionDispatched { .. })), 1);
        assert_eq!(
            h.count(|e| matches!(e, TurnEvent::TriggerRejected { reason: RejectReason::Busy, .. })),
            1
        );
        assert_eq!(h.record.lock().unwrap().captures, 1);
        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_retry_then_report_once() {
        let script = vec![
            Err(TransportError::Timeout),
            Err(TransportError::Io("connection refused".into())),
            Err(TransportError::Timeout),
        ];
        let mut h = Harness::new(script, Duration::ZERO);
        h.start();
        h.mic_open().await;
        h.sink.gesture(Gesture::DoubleTap);

        let event = h.wait_for(is_finished).await;
        assert!(matches!(
            event,
            TurnEvent::SessionFinished {
                outcome: SessionOutcome::Uploaded {
                    outcome: UploadOutcome::TransportError
                },
                ..
            }
        ));
        h.wait_for(entered(TurnState::Listening)).await;

        assert_eq!(h.record.lock().unwrap().uploads, 3);
        assert_eq!(h.count(|e| matches!(e, TurnEvent::UploadAttempt { .. })), 3);
        assert_eq!(h.spoken(&h.prompts.retry_network), 2);
        assert_eq!(h.spoken(&h.prompts.transport_error), 1);
        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_notice_only_for_slow_uploads() {
        let mut slow = Harness::new(vec![ok(TOTAL_12000)], Duration::from_secs(5));
        slow.start();
        slow.mic_open().await;
        slow.sink.gesture(Gesture::DoubleTap);
        slow.wait_for(is_finished).await;
        assert_eq!(slow.spoken(&slow.prompts.please_wait), 1);
        slow.finish().await;

        let mut fast = Harness::new(vec![ok(TOTAL_12000)], Duration::from_secs(1));
        fast.start();
        fast.mic_open().await;
        fast.sink.gesture(Gesture::DoubleTap);
        fast.wait_for(is_finished).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fast.spoken(&fast.prompts.please_wait), 0);
        fast.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_transcript_rebuilds_recognizer() {
        let mut h = Harness::new(vec![], Duration::ZERO);
        h.start();
        h.hear("what is the weather").await;

        h.wait_for(|e| matches!(e, TurnEvent::NotUnderstood { .. })).await;
        h.wait_for(entered(TurnState::Listening)).await;
        h.mic_open().await;

        assert_eq!(h.spoken(&h.prompts.not_understood), 1);
        assert_eq!(h.record.lock().unwrap().recognizers_created, 2);
        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_recognition_error_rebuilds_recognizer() {
        let h = Harness::new(vec![], Duration::ZERO);
        h.start();
        let first = h.mic_open().await;
        h.sink.send(Event::Recognition(RecognitionEvent::Error {
            attempt: first,
            kind: RecognitionErrorKind::SpeechTimeout,
        }));

        let mut second = first;
        for _ in 0..100 {
            second = h.mic_open().await;
            if second != first {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_ne!(second, first);
        assert_eq!(h.record.lock().unwrap().recognizers_created, 2);
        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_during_countdown_keeps_session() {
        let mut h = Harness::new(vec![ok(TOTAL_12000)], Duration::ZERO);
        h.start();
        h.mic_open().await;
        h.sink.gesture(Gesture::DoubleTap);
        h.wait_for(|e| matches!(e, TurnEvent::ActionDispatched { .. })).await;

        h.sink.deactivate();
        // the token is still held while the session runs in the background
        h.sink.gesture(Gesture::DoubleTap);
        h.wait_for(|e| matches!(e, TurnEvent::TriggerRejected { reason: RejectReason::Busy, .. }))
            .await;

        h.wait_for(is_finished).await;
        h.wait_for(entered(TurnState::Idle)).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.count(|e| matches!(e, TurnEvent::SessionAborted { .. })), 0);
        {
            let record = h.record.lock().unwrap();
            assert_eq!(record.captures, 1);
            assert_eq!(record.uploads, 1);
            assert!(record.listening.is_none());
        }

        h.sink.activate_resume();
        h.wait_for(entered(TurnState::Announcing)).await;
        assert_eq!(h.spoken(&h.prompts.intro), 2);
        let controller = h.finish().await;
        assert_eq!(controller.in_flight(), None);
        assert!(controller.last_outcome().is_some_and(SessionOutcome::is_success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_keeps_token_and_session() {
        let (mut controller, _inbox, mut events, _sink, _record) =
            wired_controller(vec![ok(TOTAL_12000)], Duration::from_secs(5));
        controller.handle(Event::Speech(SpeechEvent::Ready));
        controller.activate();
        controller.handle(Event::Gesture(Gesture::DoubleTap));
        assert_eq!(controller.in_flight().map(ActionId::as_str), Some("capture"));

        controller.deactivate();
        assert_eq!(controller.in_flight().map(ActionId::as_str), Some("capture"));
        assert!(controller.capture_state().is_some());
        assert_eq!(controller.state(), TurnState::Dispatching);
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, TurnEvent::SessionAborted { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_finishing_while_paused_goes_idle() {
        let mut h = Harness::new(vec![ok(TOTAL_12000)], Duration::from_secs(5));
        h.start();
        h.mic_open().await;
        h.sink.gesture(Gesture::DoubleTap);
        h.wait_for(|e| matches!(e, TurnEvent::UploadAttempt { .. })).await;

        h.sink.deactivate();
        h.wait_for(is_finished).await;
        h.wait_for(entered(TurnState::Idle)).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.record.lock().unwrap().listening.is_none());

        h.sink.activate_resume();
        h.wait_for(entered(TurnState::Announcing)).await;
        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handoff_holds_token_until_resume() {
        let mut h = Harness::new(vec![], Duration::ZERO);
        h.start();
        h.mic_open().await;
        h.sink.gesture(Gesture::SwipeRight);

        let event = h.wait_for(|e| matches!(e, TurnEvent::Handoff { .. })).await;
        assert!(matches!(event, TurnEvent::Handoff { action } if action.as_str() == "navigate"));

        h.sink.gesture(Gesture::DoubleTap);
        h.wait_for(|e| matches!(e, TurnEvent::TriggerRejected { reason: RejectReason::Busy, .. }))
            .await;

        h.sink.activate_resume();
        h.wait_for(entered(TurnState::Idle)).await;
        h.wait_for(entered(TurnState::Announcing)).await;
        h.mic_open().await;
        assert_eq!(h.record.lock().unwrap().captures, 0);
        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_gesture_cuts_intro_short() {
        let mut h = Harness::new(vec![], Duration::ZERO);
        // no Ready yet: nothing is spoken, the turn stays Idle
        h.sink.gesture(Gesture::SwipeLeft);
        h.wait_for(|e| matches!(e, TurnEvent::TriggerRejected { reason: RejectReason::NotListening, .. }))
            .await;

        h.start();
        h.sink.gesture(Gesture::SwipeLeft);
        h.wait_for(|e| matches!(e, TurnEvent::ActionDispatched { .. })).await;
        h.wait_for(entered(TurnState::Listening)).await;
        h.mic_open().await;
        assert_eq!(h.spoken(&h.prompts.intro), 2);
        h.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_tears_down() {
        let mut h = Harness::new(vec![], Duration::ZERO);
        h.start();
        h.hear("exit").await;
        h.wait_for(|e| matches!(e, TurnEvent::Terminated)).await;

        let controller = h.task.await.unwrap();
        assert_eq!(controller.state(), TurnState::Terminated);
        assert_eq!(h.record.lock().unwrap().spoken.last().map(String::as_str), Some("Closing the app."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_for_unknown_session_dropped() {
        let h = Harness::new(vec![], Duration::ZERO);
        h.start();
        h.mic_open().await;
        h.sink.send(Event::Capture(CaptureEvent::Uploaded {
            session: Uuid::new_v4(),
            attempt: 1,
            result: ok(TOTAL_12000),
        }));

        let controller = h.finish().await;
        assert!(controller.last_outcome().is_none());
    }
}
