//! Null backend: a virtual device that plays into memory.
//!
//! With default settings it accepts every format, rate and write. Written
//! audio is kept in [`NullDeviceState::played`] unless recording is turned
//! off, as [`null_output`] does for hosts without audio hardware. Tests
//! script its responses (short writes, zero writes, errors, recovery
//! outcomes, mixer contents) through the shared [`NullDeviceState`] and
//! inspect what the driver did afterwards.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::audio_models::SampleFormat;
use crate::models::config::OutputConfiguration;
use crate::session::pcm_output::PcmOutput;
use crate::traits::device::{AudioBackend, DeviceError, MixerDevice, PcmHandle, Recovery};

/// The driver over a null backend.
pub type NullOutput = PcmOutput<NullBackend>;

/// Format codes of the virtual device. `S24Packed` has no portable
/// counterpart and is never reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullFormat {
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    S24Packed,
}

const NULL_FORMAT_CODES: [(SampleFormat, NullFormat); 6] = [
    (SampleFormat::S8, NullFormat::S8),
    (SampleFormat::U8, NullFormat::U8),
    (SampleFormat::S16, NullFormat::S16),
    (SampleFormat::U16, NullFormat::U16),
    (SampleFormat::S32, NullFormat::S32),
    (SampleFormat::U32, NullFormat::U32),
];

/// Device calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullStep {
    Open,
    ChannelsMin,
    ChannelsMax,
    Access,
    Format,
    Channels,
    Rate,
    BufferTimeMax,
    PeriodTime,
    BufferTime,
    Apply,
    Prepare,
    Wait,
    Delay,
    Drop,
    MixerAttach,
}

/// Scripted response to one `write_frames` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Take every requested frame.
    Accept,
    /// Take at most this many frames.
    Frames(usize),
    /// Take nothing.
    Zero,
    Fail(DeviceError),
}

/// One element of the virtual mixer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullElement {
    pub name: String,
    pub has_playback_volume: bool,
    /// Whether the range can be rescaled to 0..=100.
    pub normalizable: bool,
    pub joined: bool,
    /// Per sub-channel volume; `None` marks a sub-channel that is absent.
    pub channels: Vec<Option<i64>>,
    pub read_fails: bool,
}

impl NullElement {
    /// A normal element with `channels` independent sub-channels at `volume`.
    pub fn new(name: &str, channels: usize, volume: i64) -> Self {
        Self {
            name: name.to_string(),
            has_playback_volume: true,
            normalizable: true,
            joined: false,
            channels: vec![Some(volume); channels],
            read_fails: false,
        }
    }

    pub fn joined(mut self) -> Self {
        self.joined = true;
        self
    }
}

/// Shared, inspectable state of the virtual device.
#[derive(Debug)]
pub struct NullDeviceState {
    pub channels_min: u32,
    pub channels_max: u32,
    pub supported_formats: Vec<NullFormat>,
    /// Rates the device can run at; empty means any rate.
    pub rates: Vec<u32>,
    pub buffer_time_max_us: u32,
    /// Period and buffer sizes are rounded down to multiples of this.
    pub frame_granularity: u64,
    /// Force the buffer to a single period on apply.
    pub single_period_buffer: bool,
    pub failing: Vec<NullStep>,
    pub writes: VecDeque<WriteOutcome>,
    pub recoveries: VecDeque<Recovery>,
    pub delay_frames: i64,
    /// Keep written audio in `played`. Off for the silent sink.
    pub record_played: bool,

    pub open_handles: usize,
    pub handles_opened: usize,
    pub played: Vec<u8>,
    pub write_calls: usize,
    pub frames_written: u64,
    pub recover_calls: usize,
    pub waits: usize,
    pub prepares: usize,
    pub drops: usize,

    pub elements: Vec<NullElement>,
    /// External volume changes applied when events are next handled.
    pub pending_events: VecDeque<(String, i64)>,
    pub mixer_accesses: usize,
}

impl Default for NullDeviceState {
    fn default() -> Self {
        Self {
            channels_min: 1,
            channels_max: 8,
            supported_formats: vec![
                NullFormat::S8,
                NullFormat::U8,
                NullFormat::S16,
                NullFormat::U16,
                NullFormat::S32,
                NullFormat::U32,
            ],
            rates: Vec::new(),
            buffer_time_max_us: 500_000,
            frame_granularity: 1,
            single_period_buffer: false,
            failing: Vec::new(),
            writes: VecDeque::new(),
            recoveries: VecDeque::new(),
            delay_frames: 0,
            record_played: true,
            open_handles: 0,
            handles_opened: 0,
            played: Vec::new(),
            write_calls: 0,
            frames_written: 0,
            recover_calls: 0,
            waits: 0,
            prepares: 0,
            drops: 0,
            elements: vec![
                NullElement::new("PCM", 2, 70),
                NullElement::new("Master", 2, 40).joined(),
            ],
            pending_events: VecDeque::new(),
            mixer_accesses: 0,
        }
    }
}

impl NullDeviceState {
    /// Default device that counts written frames but keeps no audio.
    pub fn sink() -> Self {
        Self {
            record_played: false,
            ..Self::default()
        }
    }

    fn check(&self, step: NullStep) -> Result<(), DeviceError> {
        if self.failing.contains(&step) {
            return Err(DeviceError::other(format!("{:?} failed", step)));
        }
        Ok(())
    }

    fn nearest_rate(&self, rate: u32) -> u32 {
        self.rates
            .iter()
            .copied()
            .min_by_key(|r| r.abs_diff(rate))
            .unwrap_or(rate)
    }

    fn round_frames(&self, frames: u64) -> u64 {
        let granularity = self.frame_granularity.max(1);
        (frames / granularity * granularity).max(granularity)
    }
}

/// Backend whose devices all map to one shared [`NullDeviceState`].
#[derive(Debug, Clone, Default)]
pub struct NullBackend {
    state: Arc<Mutex<NullDeviceState>>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: NullDeviceState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Handle on the device state for scripting and inspection.
    pub fn state(&self) -> Arc<Mutex<NullDeviceState>> {
        Arc::clone(&self.state)
    }
}

impl AudioBackend for NullBackend {
    type Pcm = NullPcm;
    type Mixer = NullMixer;

    fn open_pcm(&mut self, device: &str) -> Result<NullPcm, DeviceError> {
        let mut s = self.state.lock();
        s.check(NullStep::Open)
            .map_err(|_| DeviceError::other(format!("no such device: {}", device)))?;
        s.open_handles += 1;
        s.handles_opened += 1;
        Ok(NullPcm {
            state: Arc::clone(&self.state),
            rate: 0,
            period_frames: 0,
            buffer_frames: 0,
            applied: false,
        })
    }

    fn open_mixer(&mut self, device: &str) -> Result<NullMixer, DeviceError> {
        self.state
            .lock()
            .check(NullStep::MixerAttach)
            .map_err(|_| DeviceError::other(format!("can't attach mixer to {}", device)))?;
        Ok(NullMixer {
            state: Arc::clone(&self.state),
        })
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

/// Playback handle on the virtual device.
#[derive(Debug)]
pub struct NullPcm {
    state: Arc<Mutex<NullDeviceState>>,
    rate: u32,
    period_frames: u64,
    buffer_frames: u64,
    applied: bool,
}

impl NullPcm {
    fn us_to_frames(&self, us: u32) -> u64 {
        us as u64 * self.rate as u64 / 1_000_000
    }

    fn frames_to_us(&self, frames: u64) -> u32 {
        if self.rate == 0 {
            return 0;
        }
        (frames * 1_000_000 / self.rate as u64) as u32
    }
}

impl Drop for NullPcm {
    fn drop(&mut self) {
        let mut s = self.state.lock();
        s.open_handles = s.open_handles.saturating_sub(1);
    }
}

impl PcmHandle for NullPcm {
    type Format = NullFormat;

    const FORMAT_CODES: &'static [(SampleFormat, NullFormat)] = &NULL_FORMAT_CODES;

    fn channels_min(&self) -> Result<u32, DeviceError> {
        let s = self.state.lock();
        s.check(NullStep::ChannelsMin)?;
        Ok(s.channels_min)
    }

    fn channels_max(&self) -> Result<u32, DeviceError> {
        let s = self.state.lock();
        s.check(NullStep::ChannelsMax)?;
        Ok(s.channels_max)
    }

    fn supports_format(&self, format: NullFormat) -> bool {
        self.state.lock().supported_formats.contains(&format)
    }

    fn set_access_interleaved(&mut self) -> Result<(), DeviceError> {
        self.state.lock().check(NullStep::Access)
    }

    fn set_format(&mut self, format: NullFormat) -> Result<(), DeviceError> {
        let s = self.state.lock();
        s.check(NullStep::Format)?;
        if !s.supported_formats.contains(&format) {
            return Err(DeviceError::other(format!("format {:?} not available", format)));
        }
        Ok(())
    }

    fn set_channels(&mut self, channels: u32) -> Result<(), DeviceError> {
        let s = self.state.lock();
        s.check(NullStep::Channels)?;
        if channels < s.channels_min || channels > s.channels_max {
            return Err(DeviceError::other(format!("{} channels not available", channels)));
        }
        Ok(())
    }

    fn set_rate_near(&mut self, rate: u32) -> Result<u32, DeviceError> {
        let s = self.state.lock();
        s.check(NullStep::Rate)?;
        self.rate = s.nearest_rate(rate);
        Ok(self.rate)
    }

    fn buffer_time_max_us(&self) -> Result<u32, DeviceError> {
        let s = self.state.lock();
        s.check(NullStep::BufferTimeMax)?;
        Ok(s.buffer_time_max_us)
    }

    fn set_period_time_near(&mut self, period_us: u32) -> Result<u32, DeviceError> {
        self.state.lock().check(NullStep::PeriodTime)?;
        let frames = self.state.lock().round_frames(self.us_to_frames(period_us));
        self.period_frames = frames;
        Ok(self.frames_to_us(frames))
    }

    fn set_buffer_time_near(&mut self, buffer_us: u32) -> Result<u32, DeviceError> {
        self.state.lock().check(NullStep::BufferTime)?;
        let frames = self.state.lock().round_frames(self.us_to_frames(buffer_us));
        self.buffer_frames = frames;
        Ok(self.frames_to_us(frames))
    }

    fn apply_params(&mut self) -> Result<(), DeviceError> {
        let s = self.state.lock();
        s.check(NullStep::Apply)?;
        if s.single_period_buffer {
            self.buffer_frames = self.period_frames;
        }
        self.applied = true;
        Ok(())
    }

    fn period_frames(&self) -> Result<u64, DeviceError> {
        if !self.applied {
            return Err(DeviceError::other("parameters not applied"));
        }
        Ok(self.period_frames)
    }

    fn buffer_frames(&self) -> Result<u64, DeviceError> {
        if !self.applied {
            return Err(DeviceError::other("parameters not applied"));
        }
        Ok(self.buffer_frames)
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        let mut s = self.state.lock();
        s.check(NullStep::Prepare)?;
        s.prepares += 1;
        Ok(())
    }

    fn write_frames(&mut self, data: &[u8], frames: usize) -> Result<usize, DeviceError> {
        let mut s = self.state.lock();
        s.write_calls += 1;

        let taken = match s.writes.pop_front().unwrap_or(WriteOutcome::Accept) {
            WriteOutcome::Accept => frames,
            WriteOutcome::Frames(n) => n.min(frames),
            WriteOutcome::Zero => 0,
            WriteOutcome::Fail(err) => return Err(err),
        };

        if taken > 0 && frames > 0 {
            if s.record_played {
                let frame_size = data.len() / frames;
                s.played.extend_from_slice(&data[..taken * frame_size]);
            }
            s.frames_written += taken as u64;
        }
        Ok(taken)
    }

    fn recover(&mut self, _err: &DeviceError) -> Recovery {
        let mut s = self.state.lock();
        s.recover_calls += 1;
        s.recoveries.pop_front().unwrap_or(Recovery::Recovered)
    }

    fn wait(&mut self, _timeout: Duration) -> Result<bool, DeviceError> {
        let mut s = self.state.lock();
        s.waits += 1;
        s.check(NullStep::Wait)?;
        Ok(true)
    }

    fn delay_frames(&mut self) -> Result<i64, DeviceError> {
        let s = self.state.lock();
        s.check(NullStep::Delay)?;
        Ok(s.delay_frames)
    }

    fn drop_pending(&mut self) -> Result<(), DeviceError> {
        let mut s = self.state.lock();
        s.check(NullStep::Drop)?;
        s.drops += 1;
        Ok(())
    }
}

/// Mixer of the virtual device. Elements are addressed by index.
#[derive(Debug)]
pub struct NullMixer {
    state: Arc<Mutex<NullDeviceState>>,
}

impl NullMixer {
    fn with_element<T>(&self, element: &usize, f: impl FnOnce(&NullElement) -> T) -> Option<T> {
        self.state.lock().elements.get(*element).map(f)
    }
}

impl MixerDevice for NullMixer {
    type Element = usize;

    fn find_element(&mut self, name: &str) -> Option<usize> {
        self.state.lock().elements.iter().position(|e| e.name == name)
    }

    fn has_playback_volume(&self, element: &usize) -> bool {
        self.with_element(element, |e| e.has_playback_volume)
            .unwrap_or(false)
    }

    fn set_playback_volume_range(&mut self, element: &usize, _min: i64, _max: i64) -> Result<(), DeviceError> {
        match self.with_element(element, |e| e.normalizable) {
            Some(true) => Ok(()),
            _ => Err(DeviceError::other("range can't be set")),
        }
    }

    fn playback_volume_joined(&self, element: &usize) -> bool {
        self.with_element(element, |e| e.joined).unwrap_or(false)
    }

    fn playback_channels(&self, element: &usize) -> Vec<usize> {
        self.with_element(element, |e| {
            e.channels
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_some())
                .map(|(i, _)| i)
                .collect()
        })
        .unwrap_or_default()
    }

    fn playback_volume(&self, element: &usize, channel: usize) -> Result<i64, DeviceError> {
        let mut s = self.state.lock();
        s.mixer_accesses += 1;
        let e = s
            .elements
            .get(*element)
            .ok_or_else(|| DeviceError::other("no such element"))?;
        if e.read_fails {
            return Err(DeviceError::other("read failed"));
        }
        e.channels
            .get(channel)
            .copied()
            .flatten()
            .ok_or_else(|| DeviceError::other("no such channel"))
    }

    fn set_playback_volume_all(&mut self, element: &usize, value: i64) -> Result<(), DeviceError> {
        let mut s = self.state.lock();
        s.mixer_accesses += 1;
        let e = s
            .elements
            .get_mut(*element)
            .ok_or_else(|| DeviceError::other("no such element"))?;
        for v in e.channels.iter_mut().flatten() {
            *v = value;
        }
        Ok(())
    }

    fn handle_pending_events(&mut self, _timeout: Duration) -> Result<u32, DeviceError> {
        let mut s = self.state.lock();
        let mut handled = 0;
        while let Some((name, value)) = s.pending_events.pop_front() {
            if let Some(e) = s.elements.iter_mut().find(|e| e.name == name) {
                for v in e.channels.iter_mut().flatten() {
                    *v = value;
                }
            }
            handled += 1;
        }
        Ok(handled)
    }
}

/// A null driver that discards everything it plays.
pub fn null_output(config: OutputConfiguration) -> NullOutput {
    PcmOutput::new(NullBackend::with_state(NullDeviceState::sink()), config)
}
