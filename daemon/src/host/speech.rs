//! Speech engine that logs utterances instead of playing them

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::events::{Event, EventSink};
use crate::speech::{SpeechEngine, SpeechEvent, UtteranceId};

/// Simulates playback time from the text length, then reports completion
pub struct LoggingSpeech {
    sink: EventSink,
    ms_per_char: u64,
    playing: Option<JoinHandle<()>>,
}

impl LoggingSpeech {
    /// Build the engine and signal readiness
    pub fn new(sink: EventSink, ms_per_char: u64) -> Self {
        sink.send(Event::Speech(SpeechEvent::Ready));
        Self {
            sink,
            ms_per_char,
            playing: None,
        }
    }

    fn duration(&self, text: &str) -> Duration {
        Duration::from_millis(self.ms_per_char.saturating_mul(text.chars().count() as u64))
    }
}

impl SpeechEngine for LoggingSpeech {
    fn speak(&mut self, id: UtteranceId, text: &str) {
        self.stop();
        info!(%id, "say: {}", text);

        let sink = self.sink.clone();
        let after = self.duration(text);
        self.playing = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            sink.send(Event::Speech(SpeechEvent::Finished(id)));
        }));
    }

    fn stop(&mut self) {
        if let Some(handle) = self.playing.take() {
            handle.abort();
        }
    }

    fn shutdown(&mut self) {
        self.stop();
        info!("speech engine shut down");
    }
}
