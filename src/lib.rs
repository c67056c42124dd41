//! Acquisition core for serial multi-sensor luxmeters.
//!
//! This crate owns the lifecycle of a connected light-sensor device: it
//! opens the serial link, drives a timer-paced trigger/response sampling
//! protocol, keeps per-sensor sliding-window buffers sized to the committed
//! configuration, and reconciles configuration changes into the minimum
//! disruptive action (reopen, in-place link update, buffer reallocation,
//! replot or relabel). Rendering, dialogs, file formats and localization
//! lookup live in the surrounding shell, which talks to this core through
//! [`AcquisitionController`] and its event channel.
//!
//! # Timing
//!
//! The device is request/response driven and has no clock of its own: the
//! host timer paces the protocol at `1000 ms / frequency`, and a tick that
//! does not produce a full frame within its own interval is abandoned and
//! counted as a skipped sample. Timestamps on readings are reconstructed
//! from the start instant of the sampling run.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod controller;
pub mod errors;
pub mod logging;
pub mod session;

pub use buffer::{AggregatePolicy, BufferSnapshot, SensorBuffers};
pub use codec::{ByteOrder, FrameAssembler, FrameFormat, Reading, ValueKind, TRIGGER};
pub use config::{classify, DataBits, DeviceConfig, DiffResult, FlowControlMode, Parity, StopBits};
pub use controller::{AcquisitionController, Event, SamplingStats};
pub use errors::{AcqError, BufferError, DecodeError, OpenError, Result, SessionError};
pub use session::{DeviceSession, Link, LinkOpener, SerialOpener, SessionState};
