//! Device configuration snapshots and the settings diff classifier.
//!
//! A [`DeviceConfig`] is an immutable snapshot of every tunable that affects
//! acquisition: which device to address, how the serial link is parameterized,
//! how many sensors are attached, and how the plot buffers are sized. A new
//! snapshot supersedes the previous one; nothing mutates a snapshot in place.
//!
//! [`classify`] compares two snapshots field by field and reduces the change
//! to a small set of independent actions, so the controller can perform the
//! minimum disruptive one. Changing only the locale, for instance, must never
//! reopen the device or touch the buffers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Serial link parameters
// ============================================================================

/// Data bits per character on the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Seven,
    Eight,
}

impl DataBits {
    pub fn to_serial(self) -> serialport::DataBits {
        match self {
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Stop bits on the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    pub fn to_serial(self) -> serialport::StopBits {
        match self {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Parity {
    pub fn to_serial(self) -> serialport::Parity {
        match self {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Flow control mode. `char_on`/`char_off` in [`DeviceConfig`] only apply
/// to [`FlowControlMode::XonXoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControlMode {
    None,
    XonXoff,
    RtsCts,
}

impl FlowControlMode {
    pub fn to_serial(self) -> serialport::FlowControl {
        match self {
            FlowControlMode::None => serialport::FlowControl::None,
            FlowControlMode::XonXoff => serialport::FlowControl::Software,
            FlowControlMode::RtsCts => serialport::FlowControl::Hardware,
        }
    }
}

// ============================================================================
// DeviceConfig
// ============================================================================

/// Immutable configuration snapshot.
///
/// Created on controller start and each time a settings dialog commits.
/// Snapshots are only ever compared field by field (see [`classify`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial device locator (port path). Valid iff non-empty.
    pub locator: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControlMode,
    /// XON character for software flow control.
    pub char_on: u8,
    /// XOFF character for software flow control.
    pub char_off: u8,
    /// Number of sensor heads attached to the device.
    pub sensors: usize,
    /// Sampling frequency in Hz.
    pub frequency: f64,
    /// Points retained per sensor for display.
    pub window_points: usize,
    /// Total per-sensor array capacity.
    pub array_points: usize,
    /// Whether the distribution plot renders as a radar chart.
    pub radar_mode: bool,
    /// UI locale identifier (e.g. "en-US").
    pub locale: String,
}

impl Default for DeviceConfig {
    /// Factory parameters of the luxmeter head: 9600 baud 7E1, XON/XOFF.
    fn default() -> Self {
        Self {
            locator: String::new(),
            baud_rate: 9600,
            data_bits: DataBits::Seven,
            stop_bits: StopBits::One,
            parity: Parity::Even,
            flow_control: FlowControlMode::XonXoff,
            char_on: 0x11,
            char_off: 0x13,
            sensors: 1,
            frequency: 2.0,
            window_points: 20,
            array_points: 7200,
            radar_mode: false,
            locale: "en".to_string(),
        }
    }
}

impl DeviceConfig {
    /// Timer period for one sampling tick: `1000 ms / frequency`.
    /// Non-finite or non-positive frequencies clamp to 1 Hz.
    pub fn sampling_interval(&self) -> Duration {
        let hz = if self.frequency.is_finite() && self.frequency > 0.0 {
            self.frequency
        } else {
            1.0
        };
        Duration::from_secs_f64(1.0 / hz)
    }
}

// ============================================================================
// Diff classification
// ============================================================================

/// Independent actions required to move from one config snapshot to another.
///
/// Multiple flags may be set at once; the controller applies them in a fixed
/// order (reopen, link parameters, buffer reallocation, replot, relabel).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Locator changed to a valid one: the link must be closed and reopened.
    pub reopen_device: bool,
    /// Baud rate changed; applied to the already-open link.
    pub update_baud_rate: bool,
    /// Data bits, stop bits or parity changed; applied to the open link.
    pub update_data_characteristics: bool,
    /// Flow control mode or XON/XOFF characters changed.
    pub update_flow_control: bool,
    /// Sensor count or array capacity changed: buffers must be reallocated.
    pub reallocate_arrays: bool,
    /// A plot-relevant field changed but no reallocation is needed.
    pub replot_only: bool,
    /// The locale changed: series labels and UI strings need regeneration.
    pub relabel_ui: bool,
}

impl DiffResult {
    /// True when no action at all is required.
    pub fn is_noop(&self) -> bool {
        *self == DiffResult::default()
    }
}

/// Classify the change between two config snapshots.
///
/// Pure and deterministic; `classify(c, c)` yields the all-false result.
/// Rules are evaluated independently from field equality only.
pub fn classify(old: &DeviceConfig, new: &DeviceConfig) -> DiffResult {
    // Link identity cannot change on an open handle, so a locator change
    // always forces a full close+reopen and subsumes the per-parameter
    // updates (the reopen applies the new parameters anyway).
    let reopen_device = old.locator != new.locator && !new.locator.is_empty();

    let update_baud_rate = !reopen_device && old.baud_rate != new.baud_rate;
    let update_data_characteristics = !reopen_device
        && (old.data_bits != new.data_bits
            || old.stop_bits != new.stop_bits
            || old.parity != new.parity);
    let update_flow_control = !reopen_device
        && (old.flow_control != new.flow_control
            || old.char_on != new.char_on
            || old.char_off != new.char_off);

    let reallocate_arrays =
        old.sensors != new.sensors || old.array_points != new.array_points;

    let replot_only = !reallocate_arrays
        && (old.sensors != new.sensors
            || old.frequency != new.frequency
            || old.window_points != new.window_points
            || old.radar_mode != new.radar_mode
            || old.array_points != new.array_points);

    let relabel_ui = old.locale != new.locale;

    DiffResult {
        reopen_device,
        update_baud_rate,
        update_data_characteristics,
        update_flow_control,
        reallocate_arrays,
        replot_only,
        relabel_ui,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DeviceConfig {
        DeviceConfig {
            locator: "/dev/ttyUSB0".to_string(),
            sensors: 4,
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn identical_configs_classify_as_noop() {
        let cfg = base();
        let diff = classify(&cfg, &cfg);
        assert!(diff.is_noop());
    }

    #[test]
    fn classification_is_deterministic() {
        let old = base();
        let new = DeviceConfig {
            baud_rate: 19200,
            locale: "es".to_string(),
            ..base()
        };
        assert_eq!(classify(&old, &new), classify(&old, &new));
    }

    #[test]
    fn baud_change_alone_updates_baud_without_reopen() {
        let old = base();
        let new = DeviceConfig {
            baud_rate: 19200,
            ..base()
        };
        let diff = classify(&old, &new);
        assert!(!diff.reopen_device);
        assert!(diff.update_baud_rate);
        assert!(!diff.update_data_characteristics);
        assert!(!diff.update_flow_control);
        assert!(!diff.reallocate_arrays);
        assert!(!diff.replot_only);
        assert!(!diff.relabel_ui);
    }

    #[test]
    fn locator_change_forces_reopen_and_suppresses_link_updates() {
        let old = base();
        let new = DeviceConfig {
            locator: "/dev/ttyUSB1".to_string(),
            baud_rate: 19200,
            parity: Parity::None,
            ..base()
        };
        let diff = classify(&old, &new);
        assert!(diff.reopen_device);
        assert!(!diff.update_baud_rate);
        assert!(!diff.update_data_characteristics);
    }

    #[test]
    fn empty_locator_is_not_a_reopen() {
        let old = base();
        let new = DeviceConfig {
            locator: String::new(),
            ..base()
        };
        assert!(!classify(&old, &new).reopen_device);
    }

    #[test]
    fn sensor_count_change_reallocates() {
        let old = base();
        let new = DeviceConfig {
            sensors: 6,
            ..base()
        };
        let diff = classify(&old, &new);
        assert!(diff.reallocate_arrays);
        assert!(!diff.replot_only);
    }

    #[test]
    fn window_change_within_capacity_is_replot_only() {
        let old = base();
        let new = DeviceConfig {
            window_points: 50,
            ..base()
        };
        let diff = classify(&old, &new);
        assert!(!diff.reallocate_arrays);
        assert!(diff.replot_only);
    }

    #[test]
    fn radar_toggle_is_replot_only() {
        let old = base();
        let new = DeviceConfig {
            radar_mode: true,
            ..base()
        };
        let diff = classify(&old, &new);
        assert!(diff.replot_only);
        assert!(!diff.reallocate_arrays);
    }

    #[test]
    fn locale_change_only_relabels() {
        let old = base();
        let new = DeviceConfig {
            locale: "de".to_string(),
            ..base()
        };
        let diff = classify(&old, &new);
        assert!(diff.relabel_ui);
        assert!(!diff.reopen_device);
        assert!(!diff.reallocate_arrays);
        assert!(!diff.replot_only);
    }

    #[test]
    fn flow_control_characters_count_as_flow_change() {
        let old = base();
        let new = DeviceConfig {
            char_off: 0x14,
            ..base()
        };
        assert!(classify(&old, &new).update_flow_control);
    }

    #[test]
    fn sampling_interval_follows_frequency() {
        let cfg = DeviceConfig {
            frequency: 4.0,
            ..base()
        };
        assert_eq!(cfg.sampling_interval(), Duration::from_millis(250));

        let bad = DeviceConfig {
            frequency: 0.0,
            ..base()
        };
        assert_eq!(bad.sampling_interval(), Duration::from_secs(1));
    }
}
