use std::path::PathBuf;

use crate::evidence::FinalizationRequest;
use crate::frame::Frame;
use crate::incident::{IncidentSession, IncidentState, SessionServices, Transition};
use crate::recorder::{ClipCodec, ClipRecorder, ClipSpec};
use crate::IncidentClass;

/// Where and how sessions are recorded.
#[derive(Clone, Debug)]
pub struct RecordingSettings {
    pub dir: PathBuf,
    pub codec: ClipCodec,
    pub frame_rate: u32,
    /// A session reaching this many frames is ended and finalized. 0 disables the cap.
    pub max_session_frames: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MachineStats {
    pub onsets: u64,
    pub suppressed: u64,
    /// Clips closed and handed to the finalization queue.
    pub finalized: u64,
    pub aborted: u64,
    /// Clips closed on disk that the finalization queue refused.
    pub handoff_failed: u64,
}

struct ActiveSession {
    session: IncidentSession,
    recorder: ClipRecorder,
}

/// Per-class incident state machine.
///
/// Step it once per frame with the class trigger for that frame. The frame
/// passed in should already be annotated; it is what the clip records.
pub struct IncidentMachine {
    class: IncidentClass,
    settings: RecordingSettings,
    state: IncidentState,
    active: Option<ActiveSession>,
    stats: MachineStats,
}

impl IncidentMachine {
    pub fn new(class: IncidentClass, settings: RecordingSettings) -> Self {
        Self {
            class,
            settings,
            state: IncidentState::Idle,
            active: None,
            stats: MachineStats::default(),
        }
    }

    pub fn class(&self) -> IncidentClass {
        self.class
    }

    pub fn state(&self) -> IncidentState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == IncidentState::Active
    }

    pub fn stats(&self) -> MachineStats {
        self.stats
    }

    /// Frames in the clip being recorded, if any.
    pub fn recorded_frames(&self) -> Option<u64> {
        self.active.as_ref().map(|a| a.recorder.frames())
    }

    pub fn step(
        &mut self,
        triggered: bool,
        frame: &Frame,
        services: &mut SessionServices<'_>,
    ) -> Transition {
        match (self.state, triggered) {
            (IncidentState::Idle, false) => Transition::None,
            (IncidentState::Idle, true) => {
                if !services.arbiter.may_start(self.class) {
                    self.stats.suppressed += 1;
                    log::debug!(
                        "{} onset suppressed at frame {} (active: {:?})",
                        self.class,
                        frame.index,
                        services.arbiter.active()
                    );
                    return Transition::Suppressed;
                }
                self.onset(frame, services)
            }
            (IncidentState::Active, true) => {
                services.alarm.sound(self.class);
                if let Err(transition) = self.record(frame, services) {
                    return transition;
                }
                if self.session_full() {
                    log::info!(
                        "{} session reached its maximum length, closing clip",
                        self.class
                    );
                    return self.end(services);
                }
                Transition::Continued
            }
            (IncidentState::Active, false) => self.end(services),
            // Finalizing is left within the same step that entered it.
            (IncidentState::Finalizing, _) => {
                self.state = IncidentState::Idle;
                Transition::None
            }
        }
    }

    /// End an active session at stream termination. No-op when idle.
    pub fn force_end(&mut self, services: &mut SessionServices<'_>) -> Transition {
        if self.state != IncidentState::Active {
            return Transition::None;
        }
        log::info!("{} session closed at end of stream", self.class);
        self.end(services)
    }

    fn onset(&mut self, frame: &Frame, services: &mut SessionServices<'_>) -> Transition {
        let site = services.site.probe();
        let session = IncidentSession::open(
            self.class,
            frame.index,
            site,
            &self.settings.dir,
            self.settings.codec,
        );
        let spec = ClipSpec {
            width: frame.width,
            height: frame.height,
            frame_rate: self.settings.frame_rate,
            codec: self.settings.codec,
        };
        let recorder = match ClipRecorder::start(&session.clip_path, spec) {
            Ok(recorder) => recorder,
            Err(e) => {
                self.stats.aborted += 1;
                log::error!("{} recording could not start: {:#}", self.class, e);
                return Transition::Aborted;
            }
        };

        services.arbiter.activate(self.class);
        self.state = IncidentState::Active;
        self.stats.onsets += 1;
        log::warn!(
            "{} at frame {} (location {}, device {}), recording {}",
            self.class.banner(),
            frame.index,
            session
                .metadata
                .location
                .map(|l| format!("{:.6}, {:.6}", l.latitude, l.longitude))
                .unwrap_or_else(|| "unknown".to_string()),
            session.metadata.device_id,
            session.clip_path.display()
        );
        self.active = Some(ActiveSession { session, recorder });
        services.alarm.sound(self.class);

        if let Err(transition) = self.record(frame, services) {
            return transition;
        }
        if self.session_full() {
            return self.end(services);
        }
        Transition::Onset
    }

    /// Append one frame; on failure the session is aborted and `Err` carries
    /// the transition to report.
    fn record(
        &mut self,
        frame: &Frame,
        services: &mut SessionServices<'_>,
    ) -> Result<(), Transition> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        match active.recorder.append(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!(
                    "{} recording failed at frame {}: {:#}",
                    self.class,
                    frame.index,
                    e
                );
                Err(self.abort(services))
            }
        }
    }

    fn session_full(&self) -> bool {
        self.settings.max_session_frames > 0
            && self
                .recorded_frames()
                .is_some_and(|n| n >= self.settings.max_session_frames)
    }

    fn abort(&mut self, services: &mut SessionServices<'_>) -> Transition {
        if let Some(active) = self.active.take() {
            log::warn!(
                "{} clip {} discarded",
                self.class,
                active.session.clip_path.display()
            );
            active.recorder.abort();
        }
        services.arbiter.release(self.class);
        self.state = IncidentState::Idle;
        self.stats.aborted += 1;
        Transition::Aborted
    }

    fn end(&mut self, services: &mut SessionServices<'_>) -> Transition {
        let Some(mut active) = self.active.take() else {
            self.state = IncidentState::Idle;
            services.arbiter.release(self.class);
            return Transition::None;
        };
        self.state = IncidentState::Finalizing;
        active.session.state = IncidentState::Finalizing;
        services.arbiter.release(self.class);

        let clip = match active.recorder.finalize() {
            Ok(clip) => clip,
            Err(e) => {
                log::error!(
                    "{} clip {} could not be closed: {:#}",
                    self.class,
                    active.session.clip_path.display(),
                    e
                );
                active.recorder.abort();
                self.state = IncidentState::Idle;
                self.stats.aborted += 1;
                return Transition::Aborted;
            }
        };

        log::info!(
            "{} ended: {} frames ({:.1}s) in {}",
            self.class,
            clip.frame_count,
            clip.duration().as_secs_f64(),
            clip.path.display()
        );
        let request = FinalizationRequest {
            clip,
            session: active.session.metadata,
        };
        match services.queue.enqueue(request) {
            Ok(()) => self.stats.finalized += 1,
            Err(e) => {
                log::error!("{} evidence hand-off failed: {:#}", self.class, e);
                self.stats.handoff_failed += 1;
            }
        }
        self.state = IncidentState::Idle;
        Transition::Ended
    }
}
