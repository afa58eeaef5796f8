//! Capture session state machine
//!
//! Every input returns the steps the controller has to carry out next.
//! The pipeline never performs I/O itself, which keeps attempt counting
//! and the order of notices testable without a runtime.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::outcome::{classify_response, SessionOutcome, UploadOutcome};
use super::ports::{CaptureError, EncodeError, Frame, Payload, TransportError, UploadResponse};
use super::retry::{RetryPolicy, Verdict};
use crate::config::{Config, Prompts};
use crate::haptics::Pulse;
use crate::state::CaptureState;

/// Result of capture I/O, tagged with the session that asked for it
#[derive(Debug)]
pub enum CaptureEvent {
    Captured {
        session: Uuid,
        result: Result<Frame, CaptureError>,
    },
    Encoded {
        session: Uuid,
        result: Result<Vec<u8>, EncodeError>,
    },
    Uploaded {
        session: Uuid,
        attempt: u32,
        result: Result<UploadResponse, TransportError>,
    },
}

impl CaptureEvent {
    pub fn session(&self) -> Uuid {
        match self {
            CaptureEvent::Captured { session, .. }
            | CaptureEvent::Encoded { session, .. }
            | CaptureEvent::Uploaded { session, .. } => *session,
        }
    }
}

/// Which pipeline utterance a speech completion belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Countdown,
    Report,
}

/// Work the controller performs on behalf of the pipeline
#[derive(Debug, Clone)]
pub enum Step {
    /// Speak; with a cue, report completion back through `on_speech_done`
    Speak { text: String, cue: Option<Cue> },
    ArmCaptureTimer(Duration),
    CaptureStill,
    Encode(Frame),
    Upload { attempt: u32, payload: Payload },
    ArmWaitNotice(Duration),
    CancelWaitNotice,
    Pulse(Pulse),
    /// The report was spoken; hand control back
    Finish(SessionOutcome),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub capture_delay: Duration,
    pub wait_notice: Duration,
    pub policy: RetryPolicy,
    pub recognition_marker: String,
    pub prompts: Prompts,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            capture_delay: config.timing.capture_delay(),
            wait_notice: config.timing.wait_notice(),
            policy: RetryPolicy::new(config.upload.max_attempts),
            recognition_marker: config.upload.recognition_marker.clone(),
            prompts: config.prompts.clone(),
        }
    }
}

/// Data carried across the attempts of one session
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub id: Uuid,
    /// Current upload attempt, 0 before the first one
    pub attempt: u32,
    pub max_attempts: u32,
    /// Encoded once, reused by every attempt
    pub payload: Option<Payload>,
    pub last_error: Option<String>,
}

pub struct CapturePipeline {
    settings: Arc<PipelineSettings>,
    session: CaptureSession,
    state: CaptureState,
    countdown_spoken: bool,
    outcome: Option<SessionOutcome>,
}

impl CapturePipeline {
    pub fn new(settings: Arc<PipelineSettings>) -> Self {
        let session = CaptureSession {
            id: Uuid::new_v4(),
            attempt: 0,
            max_attempts: settings.policy.max_attempts,
            payload: None,
            last_error: None,
        };
        Self {
            settings,
            session,
            state: CaptureState::Idle,
            countdown_spoken: false,
            outcome: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.session.id
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    fn enter(&mut self, next: CaptureState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(session = %self.session.id, from = %self.state, to = %next, "invalid capture transition");
            return false;
        }
        debug!(session = %self.session.id, from = %self.state, to = %next, "capture state");
        self.state = next;
        true
    }

    /// Speak the countdown notice
    pub fn start(&mut self) -> Vec<Step> {
        if !self.enter(CaptureState::Announcing) {
            return Vec::new();
        }
        info!(session = %self.session.id, "capture session started");
        vec![Step::Speak {
            text: self.settings.prompts.countdown.clone(),
            cue: Some(Cue::Countdown),
        }]
    }

    pub fn on_speech_done(&mut self, cue: Cue) -> Vec<Step> {
        match (cue, self.state) {
            (Cue::Countdown, CaptureState::Announcing) if !self.countdown_spoken => {
                self.countdown_spoken = true;
                vec![Step::ArmCaptureTimer(self.settings.capture_delay)]
            }
            (Cue::Report, CaptureState::Reporting) => {
                let Some(outcome) = self.outcome.clone() else {
                    return Vec::new();
                };
                self.enter(CaptureState::Done);
                info!(session = %self.session.id, %outcome, attempts = self.session.attempt, "capture session finished");
                vec![Step::Finish(outcome)]
            }
            _ => {
                debug!(session = %self.session.id, ?cue, state = %self.state, "speech cue ignored");
                Vec::new()
            }
        }
    }

    /// The countdown delay elapsed
    pub fn on_capture_timer(&mut self) -> Vec<Step> {
        if self.state != CaptureState::Announcing || !self.countdown_spoken {
            debug!(session = %self.session.id, state = %self.state, "capture timer ignored");
            return Vec::new();
        }
        self.enter(CaptureState::Capturing);
        vec![Step::CaptureStill]
    }

    pub fn on_captured(&mut self, result: Result<Frame, CaptureError>) -> Vec<Step> {
        if self.state != CaptureState::Capturing {
            debug!(session = %self.session.id, state = %self.state, "capture result ignored");
            return Vec::new();
        }
        match result {
            Ok(frame) => {
                self.enter(CaptureState::Encoding);
                vec![
                    Step::Speak {
                        text: self.settings.prompts.capture_complete.clone(),
                        cue: None,
                    },
                    Step::Encode(frame),
                ]
            }
            Err(error) => {
                error!(session = %self.session.id, %error, "capture failed");
                self.session.last_error = Some(error.to_string());
                self.report(SessionOutcome::CaptureFailed { error })
            }
        }
    }

    pub fn on_encoded(&mut self, result: Result<Vec<u8>, EncodeError>) -> Vec<Step> {
        if self.state != CaptureState::Encoding {
            debug!(session = %self.session.id, state = %self.state, "encode result ignored");
            return Vec::new();
        }
        match result {
            Ok(bytes) => {
                debug!(session = %self.session.id, bytes = bytes.len(), "image encoded");
                let payload: Payload = bytes.into();
                self.session.payload = Some(payload.clone());
                self.begin_attempt(1, payload)
            }
            Err(error) => {
                error!(session = %self.session.id, %error, "encoding failed");
                self.session.last_error = Some(error.to_string());
                self.report(SessionOutcome::EncodeFailed { error })
            }
        }
    }

    fn begin_attempt(&mut self, attempt: u32, payload: Payload) -> Vec<Step> {
        if !self.enter(CaptureState::Uploading { attempt }) {
            return Vec::new();
        }
        self.session.attempt = attempt;
        info!(session = %self.session.id, attempt, max_attempts = self.session.max_attempts, "uploading");
        vec![
            Step::Upload { attempt, payload },
            Step::ArmWaitNotice(self.settings.wait_notice),
        ]
    }

    /// The upload has been outstanding for a while
    pub fn on_wait_notice(&mut self) -> Vec<Step> {
        match self.state {
            CaptureState::Uploading { .. } => vec![Step::Speak {
                text: self.settings.prompts.please_wait.clone(),
                cue: None,
            }],
            _ => Vec::new(),
        }
    }

    pub fn on_uploaded(
        &mut self,
        attempt: u32,
        result: Result<UploadResponse, TransportError>,
    ) -> Vec<Step> {
        if self.state != (CaptureState::Uploading { attempt }) {
            debug!(session = %self.session.id, attempt, state = %self.state, "stale upload result ignored");
            return Vec::new();
        }

        let outcome = match result {
            Ok(response) => {
                debug!(session = %self.session.id, attempt, status = response.status, "upload response");
                classify_response(
                    response.status,
                    &response.body,
                    &self.settings.recognition_marker,
                )
            }
            Err(error) => {
                warn!(session = %self.session.id, attempt, %error, "upload attempt failed");
                self.session.last_error = Some(error.to_string());
                UploadOutcome::TransportError
            }
        };
        if let UploadOutcome::ServerError { code } = outcome {
            self.session.last_error = Some(format!("server responded with status {}", code));
        }

        let mut steps = vec![Step::CancelWaitNotice];
        match (self.settings.policy.verdict(attempt, &outcome), self.session.payload.clone()) {
            (Verdict::Retry { next_attempt }, Some(payload)) => {
                steps.push(Step::Speak {
                    text: self.settings.prompts.retry_notice(&outcome).to_string(),
                    cue: None,
                });
                steps.extend(self.begin_attempt(next_attempt, payload));
            }
            _ => steps.extend(self.report(SessionOutcome::Uploaded { outcome })),
        }
        steps
    }

    fn report(&mut self, outcome: SessionOutcome) -> Vec<Step> {
        if !self.enter(CaptureState::Reporting) {
            return Vec::new();
        }
        let pulse = if outcome.is_success() {
            Pulse::Short
        } else {
            Pulse::Long
        };
        let text = self.settings.prompts.report(&outcome);
        self.outcome = Some(outcome);
        vec![
            Step::Pulse(pulse),
            Step::Speak {
                text,
                cue: Some(Cue::Report),
            },
        ]
    }

    /// End the session without reporting; later results are stale
    pub fn abort(&mut self) {
        if self.state.is_finished() {
            return;
        }
        info!(session = %self.session.id, state = %self.state, "capture session aborted");
        self.state = CaptureState::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Arc<PipelineSettings> {
        Arc::new(PipelineSettings::from_config(&Config::default()))
    }

    fn jpeg() -> Frame {
        Frame {
            format: crate::capture::FrameFormat::Jpeg,
            bytes: vec![0xFF, 0xD8, 0x00, 0xFF, 0xD9],
        }
    }

    fn ok(status: u16, body: &str) -> Result<UploadResponse, TransportError> {
        Ok(UploadResponse {
            status,
            body: body.to_string(),
        })
    }

    /// Drive a fresh pipeline up to its first upload attempt
    fn uploading() -> (CapturePipeline, Payload) {
        let mut p = CapturePipeline::new(settings());
        p.start();
        p.on_speech_done(Cue::Countdown);
        p.on_capture_timer();
        p.on_captured(Ok(jpeg()));
        let steps = p.on_encoded(Ok(jpeg().bytes));
        let payload = match &steps[0] {
            Step::Upload { attempt: 1, payload } => payload.clone(),
            other => panic!("expected first upload, got {other:?}"),
        };
        (p, payload)
    }

    fn spoken(steps: &[Step]) -> Vec<(String, Option<Cue>)> {
        steps
            .iter()
            .filter_map(|s| match s {
                Step::Speak { text, cue } => Some((text.clone(), *cue)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_happy_path() {
        let mut p = CapturePipeline::new(settings());
        let steps = p.start();
        assert_eq!(spoken(&steps)[0].1, Some(Cue::Countdown));
        assert_eq!(p.state(), CaptureState::Announcing);

        let steps = p.on_speech_done(Cue::Countdown);
        assert!(matches!(steps[..], [Step::ArmCaptureTimer(d)] if d == Duration::from_secs(3)));

        assert!(matches!(p.on_capture_timer()[..], [Step::CaptureStill]));
        assert_eq!(p.state(), CaptureState::Capturing);

        let steps = p.on_captured(Ok(jpeg()));
        assert!(matches!(steps[..], [Step::Speak { cue: None, .. }, Step::Encode(_)]));
        assert_eq!(p.state(), CaptureState::Encoding);

        let steps = p.on_encoded(Ok(jpeg().bytes));
        assert!(matches!(steps[..], [Step::Upload { attempt: 1, .. }, Step::ArmWaitNotice(_)]));

        let steps = p.on_uploaded(1, ok(200, r#"{"success":true,"data":{"total_price":"12000"}}"#));
        assert!(matches!(steps[..2], [Step::CancelWaitNotice, Step::Pulse(Pulse::Short)]));
        let said = spoken(&steps);
        assert_eq!(said.len(), 1);
        assert!(said[0].0.contains("12000"));
        assert_eq!(said[0].1, Some(Cue::Report));
        assert_eq!(p.state(), CaptureState::Reporting);

        let steps = p.on_speech_done(Cue::Report);
        assert!(matches!(
            &steps[..],
            [Step::Finish(SessionOutcome::Uploaded { outcome: UploadOutcome::Success { total_price } })]
                if total_price == "12000"
        ));
        assert_eq!(p.state(), CaptureState::Done);
    }

    #[test]
    fn test_transport_errors_exhaust_attempts() {
        let (mut p, first) = uploading();
        let mut uploads = 1;
        let mut reports = 0;
        let mut attempt = 1;

        while !matches!(p.state(), CaptureState::Reporting) {
            let steps = p.on_uploaded(attempt, Err(TransportError::Timeout));
            for step in &steps {
                match step {
                    Step::Upload { attempt: next, payload } => {
                        uploads += 1;
                        attempt = *next;
                        assert!(Arc::ptr_eq(payload, &first));
                    }
                    Step::Speak { cue: Some(Cue::Report), .. } => reports += 1,
                    _ => {}
                }
            }
        }

        assert_eq!(uploads, 3);
        assert_eq!(reports, 1);
        assert_eq!(p.session().attempt, 3);
        assert_eq!(
            p.outcome(),
            Some(&SessionOutcome::Uploaded {
                outcome: UploadOutcome::TransportError
            })
        );
    }

    #[test]
    fn test_retry_notice_matches_failure() {
        let prompts = Prompts::default();
        let (mut p, _) = uploading();
        let steps = p.on_uploaded(1, Err(TransportError::Io("refused".into())));
        assert_eq!(spoken(&steps)[0].0, prompts.retry_network);

        let steps = p.on_uploaded(2, ok(502, "bad gateway"));
        assert_eq!(spoken(&steps)[0].0, prompts.retry_server);
        assert_eq!(p.state(), CaptureState::Uploading { attempt: 3 });
    }

    #[test]
    fn test_content_errors_are_not_retried() {
        let (mut p, _) = uploading();
        let steps = p.on_uploaded(1, ok(200, r#"{"success":true,"data":{"total_price":"0"}}"#));
        assert!(!steps.iter().any(|s| matches!(s, Step::Upload { .. })));
        assert_eq!(
            p.outcome(),
            Some(&SessionOutcome::Uploaded {
                outcome: UploadOutcome::ContentMissing
            })
        );

        let (mut p, _) = uploading();
        let steps = p.on_uploaded(1, ok(200, r#"{"success":false,"error":"OCR failed"}"#));
        let said = spoken(&steps);
        assert_eq!(said[0].0, Prompts::default().recognition_failed);
        assert!(steps.iter().any(|s| matches!(s, Step::Pulse(Pulse::Long))));
    }

    #[test]
    fn test_stale_attempt_ignored() {
        let (mut p, _) = uploading();
        p.on_uploaded(1, Err(TransportError::Timeout));
        assert_eq!(p.state(), CaptureState::Uploading { attempt: 2 });

        // late duplicate of attempt 1
        assert!(p.on_uploaded(1, ok(200, "{}")).is_empty());
        assert_eq!(p.state(), CaptureState::Uploading { attempt: 2 });
    }

    #[test]
    fn test_capture_failure_reports_once() {
        let mut p = CapturePipeline::new(settings());
        p.start();
        p.on_speech_done(Cue::Countdown);
        p.on_capture_timer();
        let steps = p.on_captured(Err(CaptureError::EngineNotReady));
        let said = spoken(&steps);
        assert_eq!(said, vec![(Prompts::default().camera_not_ready, Some(Cue::Report))]);
        assert_eq!(p.session().attempt, 0);

        assert!(matches!(p.on_speech_done(Cue::Report)[..], [Step::Finish(_)]));
        assert!(p.on_speech_done(Cue::Report).is_empty());
    }

    #[test]
    fn test_timer_before_countdown_ignored() {
        let mut p = CapturePipeline::new(settings());
        p.start();
        assert!(p.on_capture_timer().is_empty());
        assert_eq!(p.state(), CaptureState::Announcing);
    }

    #[test]
    fn test_wait_notice_only_while_uploading() {
        let (mut p, _) = uploading();
        assert_eq!(spoken(&p.on_wait_notice())[0].0, Prompts::default().please_wait);
        p.on_uploaded(1, ok(200, r#"{"success":true,"data":{"total_price":"5"}}"#));
        assert!(p.on_wait_notice().is_empty());
    }

    #[test]
    fn test_abort_makes_results_stale() {
        let (mut p, _) = uploading();
        p.abort();
        assert!(p.is_finished());
        assert!(p.on_uploaded(1, ok(200, "{}")).is_empty());
        assert!(p.on_speech_done(Cue::Report).is_empty());
    }
}
