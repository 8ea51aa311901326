use std::time::Duration;

use crate::models::config::OutputConfiguration;
use crate::models::error::OutputError;
use crate::traits::device::{AudioBackend, MixerDevice};

/// Which of the two configured mixer elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerSlot {
    First,
    Second,
}

impl MixerSlot {
    fn index(self) -> usize {
        match self {
            MixerSlot::First => 0,
            MixerSlot::Second => 1,
        }
    }
}

#[derive(Debug)]
struct MixerChannel<E> {
    element: E,
    /// Last volume read from or written to the element, 0..=100.
    volume: u8,
}

/// Volume control over up to two named mixer elements.
///
/// Elements that are missing or unusable are left out. With neither
/// present the mixer device is dropped and volume calls report
/// [`OutputError::MixerUnavailable`]. Works in any session state.
pub struct MixerController<M: MixerDevice> {
    device: Option<M>,
    names: [String; 2],
    channels: [Option<MixerChannel<M::Element>>; 2],
    current: Option<MixerSlot>,
}

impl<M: MixerDevice> MixerController<M> {
    /// Attach to the mixer of the configured device and look up both elements.
    ///
    /// Never fails: every problem is logged and leaves the affected element
    /// (or the whole mixer) disabled.
    pub fn open<B>(backend: &mut B, config: &OutputConfiguration) -> Self
    where
        B: AudioBackend<Mixer = M>,
    {
        let names = [config.mixer_channel1.clone(), config.mixer_channel2.clone()];

        let mut device = match backend.open_mixer(&config.device) {
            Ok(device) => device,
            Err(e) => {
                log::error!("Can't attach mixer: {}", e);
                return Self::disabled(names);
            }
        };

        let first = init_channel(&mut device, &names[0]);
        let second = init_channel(&mut device, &names[1]);

        let current = if first.is_some() {
            Some(MixerSlot::First)
        } else if second.is_some() {
            Some(MixerSlot::Second)
        } else {
            None
        };

        if current.is_none() {
            log::warn!("No usable mixer element, volume control disabled");
            return Self::disabled(names);
        }

        Self {
            device: Some(device),
            names,
            channels: [first, second],
            current,
        }
    }

    /// A controller with no mixer attached.
    pub fn disabled(names: [String; 2]) -> Self {
        Self {
            device: None,
            names,
            channels: [None, None],
            current: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.device.is_some() && self.current.is_some()
    }

    pub fn current_slot(&self) -> Option<MixerSlot> {
        self.current
    }

    /// Volume last read from or written to the current element.
    pub fn last_known_volume(&self) -> Option<u8> {
        let slot = self.current?;
        self.channels[slot.index()].as_ref().map(|c| c.volume)
    }

    /// Read the current element's volume, noting external changes.
    pub fn read_volume(&mut self) -> Result<u8, OutputError> {
        let (Some(device), Some(slot)) = (self.device.as_mut(), self.current) else {
            return Err(OutputError::MixerUnavailable("no mixer".into()));
        };
        let Some(channel) = self.channels[slot.index()].as_mut() else {
            return Err(OutputError::MixerUnavailable("no mixer element".into()));
        };

        let volume = read_raw(device, &channel.element)?;
        if volume != channel.volume {
            log::info!("Mixer volume has changed since we last read it.");
            channel.volume = volume;
        }
        Ok(volume)
    }

    /// Set every sub-channel of the current element to `volume`.
    pub fn set_volume(&mut self, volume: i32) -> Result<(), OutputError> {
        if !(0..=100).contains(&volume) {
            return Err(OutputError::InvalidVolume(volume));
        }

        let (Some(device), Some(slot)) = (self.device.as_mut(), self.current) else {
            return Ok(());
        };
        let Some(channel) = self.channels[slot.index()].as_mut() else {
            return Ok(());
        };

        channel.volume = volume as u8;
        log::debug!("Setting vol to {}", volume);

        device
            .set_playback_volume_all(&channel.element, volume as i64)
            .map_err(|e| {
                log::error!("Can't set mixer: {}", e);
                OutputError::MixerUnavailable(e.to_string())
            })
    }

    /// Switch between the two elements. No-op unless both are present.
    pub fn toggle(&mut self) {
        let first = self.channels[0].is_some();
        let second = self.channels[1].is_some();

        self.current = match self.current {
            Some(MixerSlot::First) if second => Some(MixerSlot::Second),
            _ if first => Some(MixerSlot::First),
            unchanged => unchanged,
        };
    }

    /// Name of the current element, or the first configured name without one.
    pub fn channel_name(&self) -> String {
        match self.current {
            Some(MixerSlot::Second) => self.names[1].clone(),
            _ => self.names[0].clone(),
        }
    }

    /// Release the mixer device. Later volume calls report it unavailable.
    pub fn shutdown(&mut self) {
        if self.device.take().is_some() {
            log::debug!("Mixer closed");
        }
        self.channels = [None, None];
        self.current = None;
    }
}

/// Look up, validate and normalise one element, then take its first reading.
fn init_channel<M: MixerDevice>(device: &mut M, name: &str) -> Option<MixerChannel<M::Element>> {
    let Some(element) = device.find_element(name) else {
        log::error!("Can't find mixer {}", name);
        return None;
    };

    if !device.has_playback_volume(&element) {
        log::error!("Mixer device has no playback volume ({}).", name);
        return None;
    }

    if let Err(e) = device.set_playback_volume_range(&element, 0, 100) {
        log::error!("Cannot set playback volume range ({}): {}", name, e);
        return None;
    }

    match read_raw(device, &element) {
        Ok(volume) => {
            log::info!("Opened mixer ({})", name);
            Some(MixerChannel { element, volume })
        }
        Err(e) => {
            log::warn!("Mixer {} unusable: {}", name, e);
            None
        }
    }
}

/// Read an element as a single 0..=100 value.
///
/// Joined elements are read through their first present sub-channel; others
/// are averaged over every present sub-channel.
fn read_raw<M: MixerDevice>(device: &mut M, element: &M::Element) -> Result<u8, OutputError> {
    if let Err(e) = device.handle_pending_events(Duration::ZERO) {
        log::warn!("Handling mixer events failed: {}", e);
    }

    let mut channels = device.playback_channels(element);
    if channels.is_empty() {
        log::info!("Mixer has no channels");
        return Err(OutputError::MixerUnavailable("mixer has no channels".into()));
    }
    if device.playback_volume_joined(element) {
        channels.truncate(1);
    }

    let mut total = 0i64;
    for channel in &channels {
        let volume = device.playback_volume(element, *channel).map_err(|e| {
            log::error!("Can't read mixer: {}", e);
            OutputError::MixerUnavailable(e.to_string())
        })?;
        total += volume.clamp(0, 100);
    }

    Ok((total / channels.len() as i64) as u8)
}
