//! ALSA simple-mixer access.
//!
//! Elements are addressed by name and looked up again for every call, since
//! alsa-lib element handles borrow the mixer they belong to.

use std::time::Duration;

use alsa::mixer::{Mixer, Selem, SelemChannelId, SelemId};
use alsa::PollDescriptors;

use audio_output_core::traits::device::{DeviceError, MixerDevice};

use crate::alsa_pcm::device_error;

/// A loaded simple mixer attached to one card.
pub struct AlsaMixer {
    mixer: Mixer,
}

// SAFETY: the mixer is owned by one driver and only used from the thread
// currently driving it.
unsafe impl Send for AlsaMixer {}

impl AlsaMixer {
    /// Open, attach, register and load the mixer of `device`.
    pub fn open(device: &str) -> Result<Self, DeviceError> {
        let mixer = Mixer::new(device, false).map_err(|e| device_error(&e))?;
        Ok(Self { mixer })
    }

    fn selem(&self, name: &str) -> Option<Selem<'_>> {
        self.mixer.find_selem(&SelemId::new(name, 0))
    }

    fn existing(&self, name: &str) -> Result<Selem<'_>, DeviceError> {
        self.selem(name)
            .ok_or_else(|| DeviceError::other(format!("mixer element {} disappeared", name)))
    }
}

impl MixerDevice for AlsaMixer {
    type Element = String;

    fn find_element(&mut self, name: &str) -> Option<String> {
        self.selem(name).map(|_| name.to_string())
    }

    fn has_playback_volume(&self, element: &String) -> bool {
        self.selem(element).map_or(false, |s| s.has_playback_volume())
    }

    fn set_playback_volume_range(&mut self, element: &String, min: i64, max: i64) -> Result<(), DeviceError> {
        self.existing(element)?
            .set_playback_volume_range(min, max)
            .map_err(|e| device_error(&e))
    }

    fn playback_volume_joined(&self, element: &String) -> bool {
        self.selem(element).map_or(false, |s| s.has_playback_volume_joined())
    }

    fn playback_channels(&self, element: &String) -> Vec<usize> {
        let Some(selem) = self.selem(element) else {
            return Vec::new();
        };
        SelemChannelId::all()
            .iter()
            .enumerate()
            .filter(|(_, id)| selem.has_playback_channel(**id))
            .map(|(index, _)| index)
            .collect()
    }

    fn playback_volume(&self, element: &String, channel: usize) -> Result<i64, DeviceError> {
        let id = SelemChannelId::all()
            .get(channel)
            .copied()
            .ok_or_else(|| DeviceError::other(format!("no mixer channel {}", channel)))?;
        self.existing(element)?
            .get_playback_volume(id)
            .map_err(|e| device_error(&e))
    }

    fn set_playback_volume_all(&mut self, element: &String, value: i64) -> Result<(), DeviceError> {
        self.existing(element)?
            .set_playback_volume_all(value)
            .map_err(|e| device_error(&e))
    }

    fn handle_pending_events(&mut self, timeout: Duration) -> Result<u32, DeviceError> {
        let mut fds = PollDescriptors::get(&self.mixer).map_err(|e| device_error(&e))?;
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

        let ready = alsa::poll::poll(&mut fds, timeout_ms).map_err(|e| device_error(&e))?;
        if ready == 0 {
            return Ok(0);
        }
        self.mixer.handle_events().map_err(|e| device_error(&e))
    }
}
