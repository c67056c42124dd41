//! Acquisition controller: the component that owns the lifecycle of a
//! connected sensor device.
//!
//! The controller reconciles configuration changes into the minimum
//! disruptive action (via [`classify`]), drives the timer-paced
//! trigger/read/append sampling loop, and keeps the buffer shape consistent
//! with the committed topology at all times.
//!
//! All mutable acquisition state lives in one [`Engine`] behind a single
//! mutex. The sampling thread and the user-facing API both go through that
//! lock, so a tick can never observe a buffer mid-resize or a link
//! mid-reopen, and snapshot reads are serialized against appends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::buffer::{AggregatePolicy, BufferSnapshot, SensorBuffers};
use crate::codec::{self, FrameAssembler, FrameFormat, Reading};
use crate::config::{classify, DeviceConfig};
use crate::errors::{OpenError, SessionError};
use crate::session::{DeviceSession, LinkOpener, SessionState};

/// Consecutive trigger-write failures tolerated before sampling is stopped.
const MAX_CONSECUTIVE_IO_ERRORS: u32 = 3;

/// Events reported upward to the GUI shell.
#[derive(Debug)]
pub enum Event {
    StateChanged(SessionState),
    NewReading(Reading),
    /// Plot-relevant parameters changed; existing buffers should be redrawn.
    Replot,
    /// The locale changed; series labels and UI strings need regeneration.
    Relabel { locale: String },
    Error {
        operation: &'static str,
        message: String,
    },
}

/// Counters for one sampling run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplingStats {
    /// Frames decoded and appended.
    pub frames: u64,
    /// Ticks abandoned: missed deadline, failed write or failed decode.
    pub skipped: u64,
    /// Subset of `skipped` caused by frame decode failures.
    pub decode_failures: u64,
}

enum TickOutcome {
    Continue,
    Stop,
}

// ============================================================================
// Engine (the single mutual-exclusion domain)
// ============================================================================

struct Engine {
    session: DeviceSession,
    buffers: SensorBuffers,
    assembler: FrameAssembler,
    config: DeviceConfig,
    state: SessionState,
    events: mpsc::Sender<Event>,
    stats: SamplingStats,
    consecutive_io_errors: u32,
    time_start: Option<Instant>,
    time_end: Option<Instant>,
}

impl Engine {
    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("state: {} -> {}", self.state, state);
            self.state = state;
            self.emit(Event::StateChanged(state));
        }
    }

    fn connect(&mut self) -> Result<(), OpenError> {
        if self.state != SessionState::Disconnected {
            return Ok(());
        }
        match self.session.open(&self.config) {
            Ok(()) => {
                self.set_state(SessionState::Open);
                Ok(())
            }
            Err(err) => {
                // No retry: the operator corrects the configuration and
                // tries again.
                warn!("connect failed: {err}");
                self.emit(Event::Error {
                    operation: "open",
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn begin_sampling(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Sampling => Ok(()),
            SessionState::Open => {
                self.time_start = Some(Instant::now());
                self.time_end = None;
                self.stats = SamplingStats::default();
                self.consecutive_io_errors = 0;
                self.assembler.clear();
                self.set_state(SessionState::Sampling);
                Ok(())
            }
            SessionState::Disconnected => Err(SessionError::InvalidState {
                operation: "start_sampling",
                state: self.state,
            }),
        }
    }

    /// `Sampling -> Open`: record the end timestamp, leave the link open,
    /// keep the buffers untouched.
    fn end_sampling(&mut self) {
        if self.state == SessionState::Sampling {
            self.time_end = Some(Instant::now());
            info!(
                "sampling stopped: {} frames, {} skipped",
                self.stats.frames, self.stats.skipped
            );
            self.set_state(SessionState::Open);
        }
    }

    fn disconnect(&mut self) {
        self.end_sampling();
        self.session.close();
        self.set_state(SessionState::Disconnected);
    }

    /// One sampling cycle: trigger write, deadline-bounded frame read,
    /// buffer append. Runs under the engine lock, so one tick always
    /// completes before the next fires.
    fn tick(&mut self, interval: Duration) -> TickOutcome {
        if self.state != SessionState::Sampling {
            return TickOutcome::Stop;
        }

        if let Err(err) = self.session.write(codec::TRIGGER) {
            self.consecutive_io_errors += 1;
            self.stats.skipped += 1;
            warn!(
                "trigger write failed ({}/{MAX_CONSECUTIVE_IO_ERRORS}): {err}",
                self.consecutive_io_errors
            );
            if self.consecutive_io_errors >= MAX_CONSECUTIVE_IO_ERRORS {
                self.emit(Event::Error {
                    operation: "write",
                    message: format!(
                        "{MAX_CONSECUTIVE_IO_ERRORS} consecutive trigger writes failed: {err}"
                    ),
                });
                self.end_sampling();
                return TickOutcome::Stop;
            }
            return TickOutcome::Continue;
        }
        self.consecutive_io_errors = 0;

        // The frame must arrive within this tick's own interval; otherwise
        // the tick is abandoned and partial bytes are dropped.
        let deadline = Instant::now() + interval;
        let mut chunk = [0u8; 64];
        loop {
            match self.session.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    self.assembler.extend(&chunk[..n]);
                    match self.assembler.next_frame() {
                        Ok(Some(values)) => return self.accept(values),
                        Ok(None) => {}
                        Err(err) => {
                            debug!("dropping frame: {err}");
                            self.assembler.clear();
                            self.stats.decode_failures += 1;
                            self.stats.skipped += 1;
                            return TickOutcome::Continue;
                        }
                    }
                }
                Err(err) => {
                    warn!("read failed: {err}");
                    self.assembler.clear();
                    self.stats.skipped += 1;
                    return TickOutcome::Continue;
                }
            }
            if Instant::now() >= deadline {
                debug!("no frame within the sampling interval, skipping tick");
                self.assembler.clear();
                self.stats.skipped += 1;
                return TickOutcome::Continue;
            }
        }
    }

    fn accept(&mut self, values: Vec<f64>) -> TickOutcome {
        let timestamp = self
            .time_start
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let reading = Reading { values, timestamp };
        match self.buffers.append(&reading) {
            Ok(()) => {
                self.stats.frames += 1;
                self.emit(Event::NewReading(reading));
                TickOutcome::Continue
            }
            Err(err) => {
                // Reaching this means a resize was not sequenced before the
                // timer resumed; that is an internal invariant failure, not
                // a user-facing condition.
                error!("buffer out of step with sampling: {err}");
                self.emit(Event::Error {
                    operation: "append",
                    message: err.to_string(),
                });
                self.end_sampling();
                TickOutcome::Stop
            }
        }
    }

    /// Apply a new configuration snapshot with minimal disruption.
    ///
    /// Ordering is the critical invariant: any buffer resize completes
    /// before the `Sampling` state is restored, so a tick can never append
    /// into stale-shaped buffers. A failed reopen still runs the buffer
    /// and assembler work before reporting the error, so the store never
    /// drifts out of step with the committed snapshot.
    fn apply_config(&mut self, new: DeviceConfig) -> crate::Result<()> {
        let diff = classify(&self.config, &new);
        debug!("applying config: {diff:?}");
        let resume = self.state == SessionState::Sampling && diff.reopen_device;
        let mut open_failure = None;

        if diff.reopen_device {
            // Link identity changed: force the transition through
            // Disconnected with the new locator.
            self.end_sampling();
            self.session.close();
            self.set_state(SessionState::Disconnected);
            match self.session.open(&new) {
                Ok(()) => self.set_state(SessionState::Open),
                Err(err) => {
                    self.emit(Event::Error {
                        operation: "open",
                        message: err.to_string(),
                    });
                    open_failure = Some(err);
                }
            }
        } else if self.session.is_open() {
            if diff.update_baud_rate {
                if let Err(err) = self.session.set_baud_rate(new.baud_rate) {
                    self.emit(Event::Error {
                        operation: "set_baud_rate",
                        message: err.to_string(),
                    });
                    return Err(err.into());
                }
            }
            if diff.update_data_characteristics {
                if let Err(err) =
                    self.session
                        .set_data_characteristics(new.data_bits, new.stop_bits, new.parity)
                {
                    self.emit(Event::Error {
                        operation: "set_data_characteristics",
                        message: err.to_string(),
                    });
                    return Err(err.into());
                }
            }
            if diff.update_flow_control {
                if let Err(err) =
                    self.session
                        .set_flow_control(new.flow_control, new.char_on, new.char_off)
                {
                    self.emit(Event::Error {
                        operation: "set_flow_control",
                        message: err.to_string(),
                    });
                    return Err(err.into());
                }
            }
        }

        if diff.reallocate_arrays {
            if let Err(err) = self.buffers.resize(new.sensors, new.window_points) {
                // Allocation failure is fatal for the session.
                self.emit(Event::Error {
                    operation: "resize",
                    message: err.to_string(),
                });
                self.disconnect();
                self.config = new;
                return Err(err.into());
            }
            self.assembler = FrameAssembler::new(FrameFormat::new(new.sensors));
            self.buffers.relabel(|i| sensor_label(&new.locale, i));
            self.emit(Event::Replot);
        } else if diff.replot_only {
            if new.window_points != self.config.window_points {
                self.buffers.set_window_points(new.window_points);
            }
            self.emit(Event::Replot);
        }

        if diff.relabel_ui {
            self.buffers.relabel(|i| sensor_label(&new.locale, i));
            self.emit(Event::Relabel {
                locale: new.locale.clone(),
            });
        }

        if resume && open_failure.is_none() {
            self.set_state(SessionState::Sampling);
        }
        self.config = new;
        match open_failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

/// Series legend text for the supported display locales.
fn sensor_label(locale: &str, index: usize) -> String {
    match locale {
        "es" => format!("Sensor n.º {index}"),
        _ => format!("Sensor #{index}"),
    }
}

// ============================================================================
// Controller
// ============================================================================

struct SamplerHandle {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

/// Public facade over the engine: arms/disarms the sampling timer thread
/// and exposes the connect/disconnect/reconfigure/snapshot API consumed by
/// the GUI shell.
pub struct AcquisitionController {
    engine: Arc<Mutex<Engine>>,
    sampler: Option<SamplerHandle>,
}

impl AcquisitionController {
    /// Create a controller for one device, pre-allocating buffers for the
    /// initial config. Returns the controller and the event receiver the
    /// shell listens on.
    pub fn new(
        opener: Box<dyn LinkOpener>,
        config: DeviceConfig,
    ) -> crate::Result<(Self, mpsc::Receiver<Event>)> {
        let (tx, rx) = mpsc::channel();
        let mut buffers =
            SensorBuffers::new(AggregatePolicy::Latest, AggregatePolicy::WindowMean);
        buffers.resize(config.sensors, config.window_points)?;
        let engine = Engine {
            session: DeviceSession::new(opener),
            buffers,
            assembler: FrameAssembler::new(FrameFormat::new(config.sensors)),
            config,
            state: SessionState::Disconnected,
            events: tx,
            stats: SamplingStats::default(),
            consecutive_io_errors: 0,
            time_start: None,
            time_end: None,
        };
        Ok((
            Self {
                engine: Arc::new(Mutex::new(engine)),
                sampler: None,
            },
            rx,
        ))
    }

    fn locked(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `Disconnected -> Open`. On failure the state stays `Disconnected`
    /// and the error is reported; no automatic retry.
    pub fn connect(&mut self) -> Result<(), OpenError> {
        self.locked().connect()
    }

    /// Stop sampling if active, close the link: `-> Disconnected`.
    pub fn disconnect(&mut self) {
        self.disarm();
        self.locked().disconnect();
    }

    /// `Open -> Sampling`: arm the periodic timer and start triggering.
    pub fn start_sampling(&mut self) -> crate::Result<()> {
        if let Some(sampler) = &self.sampler {
            if !sampler.handle.is_finished() {
                return Ok(());
            }
            // The thread stopped itself (e.g. repeated write failures).
            self.disarm();
        }
        let interval = {
            let mut engine = self.locked();
            engine.begin_sampling()?;
            engine.config.sampling_interval()
        };
        self.arm(interval);
        Ok(())
    }

    /// `Sampling -> Open`: disarm the timer, leave the link open and the
    /// buffer contents untouched.
    pub fn stop_sampling(&mut self) {
        self.disarm();
        self.locked().end_sampling();
    }

    /// Apply a new configuration snapshot.
    ///
    /// The sampler is paused only when the change actually touches the
    /// device link, the buffers or the timer period; a replot-only or
    /// locale-only change never interrupts an active sampling run.
    pub fn apply_config(&mut self, new: DeviceConfig) -> crate::Result<()> {
        let (diff, retime) = {
            let engine = self.locked();
            (
                classify(&engine.config, &new),
                engine.config.frequency != new.frequency,
            )
        };
        let pause = self.sampler.is_some()
            && (diff.reopen_device
                || diff.update_baud_rate
                || diff.update_data_characteristics
                || diff.update_flow_control
                || diff.reallocate_arrays
                || retime);

        if pause {
            self.disarm();
        }
        let result = self.locked().apply_config(new);
        if pause {
            // Resize has already completed under the lock; only now may the
            // timer resume. Exactly one sampler is ever armed.
            let (state, interval) = {
                let engine = self.locked();
                (engine.state, engine.config.sampling_interval())
            };
            if state == SessionState::Sampling {
                self.arm(interval);
            }
        }
        result
    }

    /// Read-only copy of the buffer tables for plotting.
    pub fn snapshot(&self) -> BufferSnapshot {
        self.locked().buffers.snapshot()
    }

    pub fn state(&self) -> SessionState {
        self.locked().state
    }

    pub fn stats(&self) -> SamplingStats {
        self.locked().stats
    }

    /// Wall time of the current or last sampling run.
    pub fn elapsed(&self) -> Option<Duration> {
        let engine = self.locked();
        let start = engine.time_start?;
        Some(match engine.time_end {
            Some(end) => end.duration_since(start),
            None => start.elapsed(),
        })
    }

    fn arm(&mut self, interval: Duration) {
        let stop = Arc::new(AtomicBool::new(false));
        let engine = Arc::clone(&self.engine);
        let stop_flag = Arc::clone(&stop);
        let handle = thread::spawn(move || sampler_loop(engine, stop_flag, interval));
        self.sampler = Some(SamplerHandle { stop, handle });
    }

    fn disarm(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.stop.store(true, Ordering::Relaxed);
            let _ = sampler.handle.join();
        }
    }
}

impl Drop for AcquisitionController {
    fn drop(&mut self) {
        self.disarm();
    }
}

fn sampler_loop(engine: Arc<Mutex<Engine>>, stop: Arc<AtomicBool>, interval: Duration) {
    debug!("sampler armed at {interval:?}");
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let next_tick = Instant::now() + interval;
        {
            let mut engine = engine.lock().unwrap_or_else(|e| e.into_inner());
            match engine.tick(interval) {
                TickOutcome::Continue => {}
                TickOutcome::Stop => break,
            }
        }
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        }
    }
    debug!("sampler disarmed");
}

// ============================================================================
// Tests
// ============================================================================
