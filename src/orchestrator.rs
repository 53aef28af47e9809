//! The frame loop.
//!
//! Per frame, strictly in arrival order:
//! 1. detect collision and fire; sample the violent-act classifier when due
//! 2. derive each class trigger (thresholds, debounced signal)
//! 3. annotate the frame in place (outlines, banner)
//! 4. step the Collision, Fire and ViolentAct machines, in that order
//! 5. update the preview, then honour a quit from the preview or a stop request
//!
//! When the loop ends for any reason every active machine is forced through
//! its end transition so no clip is left open.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::detect::{scalar_score, Detection, DetectorAdapter};
use crate::frame::{Frame, BANNER_COLOR, OUTLINE_COLOR};
use crate::incident::{
    Arbiter, FinalizationQueue, IncidentMachine, MachineStats, RecordingSettings, SessionServices,
    Transition,
};
use crate::ingest::FrameSource;
use crate::preview::{Alarm, PreviewControl, PreviewOverlay, PreviewSink};
use crate::recorder::ClipCodec;
use crate::site::SiteProbe;
use crate::smoothing::{TemporalSmoother, DEFAULT_SAMPLE_EVERY, DEFAULT_THRESHOLD, DEFAULT_WINDOW};
use crate::IncidentClass;

/// Frames between health lines.
const HEALTH_LOG_EVERY: u64 = 300;

/// Trigger policy for the three classes.
#[derive(Clone, Copy, Debug)]
pub struct DetectionPolicy {
    /// A collision detection must score strictly above this.
    pub collision_threshold: f32,
    pub fire_threshold: f32,
    /// Mean of the smoothing window must reach this.
    pub violence_threshold: f32,
    pub smoothing_window: usize,
    pub sample_every: u64,
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        Self {
            collision_threshold: 0.65,
            fire_threshold: 0.70,
            violence_threshold: DEFAULT_THRESHOLD,
            smoothing_window: DEFAULT_WINDOW,
            sample_every: DEFAULT_SAMPLE_EVERY,
        }
    }
}

impl DetectionPolicy {
    fn discrete_threshold(&self, class: IncidentClass) -> f32 {
        match class {
            IncidentClass::Collision => self.collision_threshold,
            IncidentClass::Fire => self.fire_threshold,
            IncidentClass::ViolentAct => self.violence_threshold,
        }
    }
}

/// Where clips go and how long a session may run.
#[derive(Clone, Debug)]
pub struct RecordingPlan {
    pub dir: PathBuf,
    pub codec: ClipCodec,
    /// Zero disables the cap.
    pub max_session: Duration,
}

impl RecordingPlan {
    fn settings(&self, frame_rate: u32) -> RecordingSettings {
        RecordingSettings {
            dir: self.dir.clone(),
            codec: self.codec,
            frame_rate,
            max_session_frames: self.max_session.as_secs().saturating_mul(frame_rate as u64),
        }
    }
}

/// Everything the frame loop needs, built once at startup.
pub struct PipelineContext {
    pub adapter: DetectorAdapter,
    pub site: Box<dyn SiteProbe>,
    pub alarm: Box<dyn Alarm>,
    pub policy: DetectionPolicy,
    pub recording: RecordingPlan,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    StopRequested,
    FrameLimit,
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub frames: u64,
    pub stop_reason: StopReason,
    pub detector_failures: u64,
    /// Per class, indexed by `IncidentClass::index`.
    pub sessions: [MachineStats; 3],
}

impl RunSummary {
    pub fn stats(&self, class: IncidentClass) -> MachineStats {
        self.sessions[class.index()]
    }
}

pub struct Orchestrator {
    ctx: PipelineContext,
    smoother: TemporalSmoother,
    arbiter: Arbiter,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        let smoother = TemporalSmoother::new(
            ctx.policy.smoothing_window,
            ctx.policy.violence_threshold,
            ctx.policy.sample_every,
        );
        Self {
            ctx,
            smoother,
            arbiter: Arbiter::new(),
        }
    }

    /// Run until end of stream, `stop`, or `max_frames`.
    ///
    /// A source error ends the loop (after closing active sessions) and is
    /// returned. Every other failure is per frame or per incident.
    pub fn run<S>(
        &mut self,
        source: &mut S,
        preview: &mut dyn PreviewSink,
        queue: &dyn FinalizationQueue,
        stop: &AtomicBool,
        max_frames: Option<u64>,
    ) -> Result<RunSummary>
    where
        S: FrameSource + ?Sized,
    {
        let frame_rate = source.frame_rate().max(1);
        let mut machines = IncidentClass::ALL
            .map(|class| IncidentMachine::new(class, self.ctx.recording.settings(frame_rate)));
        log::info!(
            "frame loop starting at {} fps, detectors: {:?}",
            frame_rate,
            self.ctx.adapter.list()
        );

        let mut frames = 0u64;
        let outcome = loop {
            if max_frames.is_some_and(|limit| frames >= limit) {
                break Ok(StopReason::FrameLimit);
            }
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break Ok(StopReason::EndOfStream),
                Err(e) => break Err(e),
            };
            let control = self.process(frame, &mut machines, preview, queue);
            frames += 1;

            if frames % HEALTH_LOG_EVERY == 0 {
                log::info!(
                    "frames={} active={:?} detector_failures={}",
                    frames,
                    self.arbiter.active(),
                    self.ctx.adapter.failures()
                );
            }
            if control == PreviewControl::Quit {
                log::info!("quit requested from preview");
                break Ok(StopReason::StopRequested);
            }
            if stop.load(Ordering::SeqCst) {
                break Ok(StopReason::StopRequested);
            }
        };

        let mut services = SessionServices {
            arbiter: &mut self.arbiter,
            site: self.ctx.site.as_ref(),
            alarm: self.ctx.alarm.as_ref(),
            queue,
        };
        for machine in machines.iter_mut() {
            machine.force_end(&mut services);
        }

        let stop_reason = outcome?;
        log::info!("frame loop finished after {} frames ({:?})", frames, stop_reason);
        Ok(RunSummary {
            frames,
            stop_reason,
            detector_failures: self.ctx.adapter.failures(),
            sessions: machines.map(|m| m.stats()),
        })
    }

    fn process(
        &mut self,
        mut frame: Frame,
        machines: &mut [IncidentMachine; 3],
        preview: &mut dyn PreviewSink,
        queue: &dyn FinalizationQueue,
    ) -> PreviewControl {
        let policy = self.ctx.policy;
        let adapter = &mut self.ctx.adapter;
        let collision = adapter.detect(&frame, IncidentClass::Collision);
        let fire = adapter.detect(&frame, IncidentClass::Fire);
        let violence_signal = self.smoother.tick(|| {
            scalar_score(&adapter.detect(&frame, IncidentClass::ViolentAct))
        });

        let triggers = [
            any_above(&collision, policy.discrete_threshold(IncidentClass::Collision)),
            any_above(&fire, policy.discrete_threshold(IncidentClass::Fire)),
            violence_signal,
        ];

        let mut outlined = 0;
        for (detections, class) in [(&collision, IncidentClass::Collision), (&fire, IncidentClass::Fire)] {
            let threshold = policy.discrete_threshold(class);
            for detection in detections.iter() {
                if let Detection::Discrete { region, .. } = detection {
                    if detection.confidence() > threshold {
                        frame.outline(region, OUTLINE_COLOR);
                        outlined += 1;
                    }
                }
            }
        }
        let violent = &machines[IncidentClass::ViolentAct.index()];
        let banner = triggers[0]
            || triggers[1]
            || (triggers[2]
                && (violent.is_active() || self.arbiter.may_start(IncidentClass::ViolentAct)));
        if banner {
            frame.banner(BANNER_COLOR);
        }

        let mut services = SessionServices {
            arbiter: &mut self.arbiter,
            site: self.ctx.site.as_ref(),
            alarm: self.ctx.alarm.as_ref(),
            queue,
        };
        for machine in machines.iter_mut() {
            let transition = machine.step(triggers[machine.class().index()], &frame, &mut services);
            if transition == Transition::Aborted {
                log::warn!("{} session aborted at frame {}", machine.class(), frame.index);
            }
        }

        let overlay = PreviewOverlay {
            active: self.arbiter.active(),
            outlined,
            violence_mean: self.smoother.mean(),
        };
        match preview.show(&frame, &overlay) {
            Ok(control) => control,
            Err(e) => {
                log::warn!("preview update failed at frame {}: {:#}", frame.index, e);
                PreviewControl::Continue
            }
        }
    }
}

fn any_above(detections: &[Detection], threshold: f32) -> bool {
    detections.iter().any(|d| match d {
        Detection::Discrete { .. } => d.confidence() > threshold,
        Detection::Scalar { .. } => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingRegion;

    #[test]
    fn trigger_is_strictly_above_threshold() {
        let region = BoundingRegion::new(0.1, 0.1, 0.2, 0.2);
        let at = vec![Detection::discrete("car", 0.65, region)];
        let above = vec![Detection::discrete("car", 0.66, region)];
        assert!(!any_above(&at, 0.65));
        assert!(any_above(&above, 0.65));
        assert!(!any_above(&[Detection::scalar(0.99)], 0.65));
    }

    #[test]
    fn session_cap_scales_with_frame_rate() {
        let plan = RecordingPlan {
            dir: PathBuf::from("clips"),
            codec: ClipCodec::Raw,
            max_session: Duration::from_secs(300),
        };
        assert_eq!(plan.settings(30).max_session_frames, 9000);
        assert_eq!(plan.settings(1).max_session_frames, 300);
    }
}
