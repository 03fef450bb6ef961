//! Effective device state.
//!
//! [`DeviceStatus`] is derived, never stored across snapshots: it combines the "is
//! accelerating" flag with the decoded status words into one in-use verdict and the
//! effective amplitude and phase handed to the model.
//!
//! For long-running consumers, [`DeviceMonitor`] folds discrete [`DeviceEvent`]s (one per
//! PV update) into a new [`DeviceStatus`] each time, and reports what changed.

use serde::Serialize;
use tracing::debug;

use crate::klystron::is_decommissioned;
use crate::status::{Fault, StatusWords, STATUS_PATCHES};

/// Raw inputs for one device, as read from one snapshot or accumulated from events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceReading {
    /// Amplitude, `None` when missing or non-numeric.
    pub amplitude: Option<f64>,
    /// Phase in degrees, `None` when missing or non-numeric.
    pub phase: Option<f64>,
    /// Whether the device contributes to acceleration.
    pub is_accelerating: bool,
    /// Status words, `None` when the device publishes no status.
    pub status: Option<StatusWords>,
}

/// Effective state of a device for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    /// Effective amplitude, 0 when unavailable.
    pub amplitude: f64,
    /// Effective phase, forced to 0 when the device is not in use.
    pub phase: f64,
    /// Accelerating and usable.
    pub in_use: bool,
    /// Trigger state.
    pub is_accelerating: bool,
    /// Status words allow trusting the readings.
    pub is_usable: bool,
    /// Decoded faults, most severe first. Empty when undetermined.
    pub faults: Vec<Fault>,
}

impl DeviceStatus {
    /// Resolve the effective state from a reading.
    ///
    /// Missing readings become 0, which the model reads as "off". A device that is not in
    /// use contributes no phase.
    pub fn from_reading(reading: &DeviceReading) -> Self {
        let (is_usable, faults) = match &reading.status {
            None => (true, Vec::new()),
            Some(words) => (words.is_usable(), words.faults().unwrap_or_default()),
        };
        let in_use = reading.is_accelerating && is_usable;

        let amplitude = reading.amplitude.filter(|v| !v.is_nan()).unwrap_or(0.0);
        let phase = match reading.phase.filter(|v| !v.is_nan()) {
            Some(_) if !in_use => 0.0,
            Some(phase) => phase,
            None => 0.0,
        };

        Self {
            amplitude,
            phase,
            in_use,
            is_accelerating: reading.is_accelerating,
            is_usable,
            faults,
        }
    }

    /// `in_use` as the 0/1 flag written into statements.
    pub fn in_use_flag(&self) -> u8 {
        u8::from(self.in_use)
    }
}

/// One PV update for a monitored station.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// New amplitude reading.
    Amplitude(Option<f64>),
    /// New phase reading.
    Phase(Option<f64>),
    /// New beam code trigger status (`1` = accelerating).
    Trigger(Option<f64>),
    /// New `SWRD`.
    Swrd(Option<u64>),
    /// New `STAT`.
    Stat(Option<u64>),
    /// New `HDSC`.
    Hdsc(Option<u64>),
    /// New `DSTA`.
    Dsta(Option<[u64; 2]>),
}

/// What an event changed.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    /// State before the event.
    pub previous: DeviceStatus,
    /// State after the event.
    pub current: DeviceStatus,
}

impl StatusChange {
    /// The fault list differs.
    pub fn faults_changed(&self) -> bool {
        self.previous.faults != self.current.faults
    }

    /// The in-use verdict flipped.
    pub fn in_use_changed(&self) -> bool {
        self.previous.in_use != self.current.in_use
    }
}

/// Event-driven view of one klystron station.
#[derive(Debug, Clone)]
pub struct DeviceMonitor {
    sector: u32,
    station: u32,
    reading: DeviceReading,
    status: DeviceStatus,
}

impl DeviceMonitor {
    /// Start from an initial reading.
    pub fn new(sector: u32, station: u32, reading: DeviceReading) -> Self {
        let reading = Self::normalize(sector, station, reading);
        let status = DeviceStatus::from_reading(&reading);
        Self {
            sector,
            station,
            reading,
            status,
        }
    }

    /// Current state.
    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    /// Current raw inputs.
    pub fn reading(&self) -> &DeviceReading {
        &self.reading
    }

    /// Apply an event, replace the state, and return the transition.
    pub fn apply(&mut self, event: DeviceEvent) -> StatusChange {
        let mut reading = self.reading.clone();
        match event {
            DeviceEvent::Amplitude(v) => reading.amplitude = v,
            DeviceEvent::Phase(v) => reading.phase = v,
            DeviceEvent::Trigger(v) => reading.is_accelerating = v == Some(1.0),
            DeviceEvent::Swrd(w) => reading.status.get_or_insert_with(StatusWords::default).swrd = w,
            DeviceEvent::Stat(w) => reading.status.get_or_insert_with(StatusWords::default).stat = w,
            DeviceEvent::Hdsc(w) => reading.status.get_or_insert_with(StatusWords::default).hdsc = w,
            DeviceEvent::Dsta(w) => reading.status.get_or_insert_with(StatusWords::default).dsta = w,
        }
        let reading = Self::normalize(self.sector, self.station, reading);
        let current = DeviceStatus::from_reading(&reading);
        let previous = std::mem::replace(&mut self.status, current.clone());
        self.reading = reading;

        let change = StatusChange { previous, current };
        if change.faults_changed() || change.in_use_changed() {
            debug!(
                sector = self.sector,
                station = self.station,
                in_use = change.current.in_use,
                faults = ?change.current.faults.iter().map(|f| f.name).collect::<Vec<_>>(),
                "Station status changed"
            );
        }
        change
    }

    fn normalize(sector: u32, station: u32, mut reading: DeviceReading) -> DeviceReading {
        if is_decommissioned(sector, station) {
            reading.is_accelerating = false;
        }
        reading.status = reading
            .status
            .map(|words| words.patched(STATUS_PATCHES, sector, station));
        reading
    }
}
