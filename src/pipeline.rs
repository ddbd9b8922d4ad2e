//! Per-frame capture loop
//!
//! read → detect → recorder transition → status indicator → record → publish.
//! Runs on a blocking thread; the frame timestamp is the clock for every
//! event and duration.

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::FrameSource;
use crate::detect::{annotate_status, MotionDetector};
use crate::error::CaptureError;
use crate::recording::{RecordingController, Transition};
use crate::stream::StreamPublisher;

/// Counters for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub frames_processed: u64,
    pub motion_frames: u64,
    pub frames_recorded: u64,
    pub frames_skipped: u64,
    pub recordings_started: u64,
    pub recordings_kept: u64,
    pub recordings_discarded: u64,
}

/// How a pipeline run ended
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: PipelineSummary,
    /// The fatal capture error, `None` when the run was cancelled
    pub error: Option<CaptureError>,
}

impl RunOutcome {
    pub fn into_result(self) -> Result<PipelineSummary, CaptureError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.summary),
        }
    }
}

/// What one step did
#[derive(Debug)]
pub struct StepOutcome {
    pub sequence: u64,
    pub motion: bool,
    pub recorded: bool,
    pub transition: Transition,
}

pub struct Pipeline<S: FrameSource> {
    source: S,
    detector: MotionDetector,
    controller: RecordingController,
    publisher: StreamPublisher,
    summary: PipelineSummary,
    last_timestamp: Option<DateTime<Local>>,
}

impl<S: FrameSource> Pipeline<S> {
    pub fn new(
        source: S,
        detector: MotionDetector,
        controller: RecordingController,
        publisher: StreamPublisher,
    ) -> Self {
        Self {
            source,
            detector,
            controller,
            publisher,
            summary: PipelineSummary::default(),
            last_timestamp: None,
        }
    }

    pub fn summary(&self) -> &PipelineSummary {
        &self.summary
    }

    pub fn controller(&self) -> &RecordingController {
        &self.controller
    }

    /// Process the next frame
    pub fn step(&mut self) -> Result<StepOutcome, CaptureError> {
        let frame = self.source.read()?;
        self.last_timestamp = Some(frame.timestamp);

        let detection = match self.detector.process(&frame) {
            Ok(detection) => detection,
            Err(e) => {
                // the device changed geometry; start a fresh background
                warn!(frame = frame.sequence, "Frame skipped: {}", e);
                self.detector.reset();
                self.summary.frames_skipped += 1;
                return Ok(StepOutcome {
                    sequence: frame.sequence,
                    motion: false,
                    recorded: false,
                    transition: Transition::None,
                });
            }
        };

        let transition = self
            .controller
            .observe(detection.motion_detected, frame.timestamp);
        self.count(&transition);

        let mut output = detection.annotated;
        annotate_status(&mut output, self.controller.is_recording());

        let recorded = self.controller.record(&output);
        self.publisher.publish(&output);

        self.summary.frames_processed += 1;
        if detection.motion_detected {
            self.summary.motion_frames += 1;
        }
        if recorded {
            self.summary.frames_recorded += 1;
        }

        Ok(StepOutcome {
            sequence: frame.sequence,
            motion: detection.motion_detected,
            recorded,
            transition,
        })
    }

    /// Loop until cancelled or the source fails, then finalize any open
    /// recording and release the source. A source that runs dry ends with
    /// `EndOfStream`; only cancellation is a clean stop.
    pub fn run(mut self, cancel: &CancellationToken) -> RunOutcome {
        info!("Capture pipeline started");
        let error = loop {
            if cancel.is_cancelled() {
                debug!("Capture pipeline cancelled");
                break None;
            }
            match self.step() {
                Ok(_) => {}
                Err(CaptureError::EndOfStream) => {
                    warn!("Frame source stopped producing frames");
                    break Some(CaptureError::EndOfStream);
                }
                Err(e) => {
                    warn!("Frame read failed: {}", e);
                    break Some(e);
                }
            }
        };

        let summary = self.finish();
        info!(
            frames = summary.frames_processed,
            recordings = summary.recordings_kept,
            "Capture pipeline stopped"
        );
        RunOutcome { summary, error }
    }

    /// Close the open recording (if any) and the source
    pub fn finish(&mut self) -> PipelineSummary {
        let at = self.last_timestamp.unwrap_or_else(Local::now);
        if let Some(finished) = self.controller.shutdown(at) {
            self.count(&Transition::Stopped(finished));
        }
        self.source.close();
        self.summary.clone()
    }

    fn count(&mut self, transition: &Transition) {
        match transition {
            Transition::Started { .. } => self.summary.recordings_started += 1,
            Transition::Stopped(finished) if finished.kept => self.summary.recordings_kept += 1,
            Transition::Stopped(_) => self.summary.recordings_discarded += 1,
            Transition::None | Transition::StartFailed(_) => {}
        }
    }
}
