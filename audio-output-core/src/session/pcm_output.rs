use std::thread;
use std::time::Duration;

use crate::models::audio_models::{DeviceCapabilities, NegotiatedStream, StreamParams};
use crate::models::config::OutputConfiguration;
use crate::models::error::OutputError;
use crate::models::state::SessionState;
use crate::processing::format_map::FormatMap;
use crate::processing::staging_buffer::{StagingBuffer, STAGING_CAPACITY};
use crate::session::mixer::MixerController;
use crate::session::negotiator::negotiate;
use crate::session::probe::probe_device;
use crate::session::write_loop::{flush_all, flush_chunks};
use crate::traits::device::{AudioBackend, PcmHandle};
use crate::traits::output_driver::OutputDriver;

/// An open device handle and the parameters it was negotiated with.
struct ActiveStream<P> {
    handle: P,
    stream: NegotiatedStream,
}

/// Buffered PCM output driver, generic over the device backend.
///
/// Owns at most one session. Data flow:
/// ```text
/// play(bytes) → [StagingBuffer] → whole chunks → [PcmHandle] → hardware
///                                      ↑ recovery on write errors
/// ```
/// The mixer is independent of the session and usable in any state.
pub struct PcmOutput<B: AudioBackend> {
    backend: B,
    config: OutputConfiguration,
    state: SessionState,
    active: Option<ActiveStream<B::Pcm>>,
    staging: StagingBuffer,
    // Wrapped chunks are assembled here
    scratch: Vec<u8>,
    mixer: MixerController<B::Mixer>,
}

impl<B: AudioBackend> PcmOutput<B> {
    pub fn new(backend: B, config: OutputConfiguration) -> Self {
        let names = [config.mixer_channel1.clone(), config.mixer_channel2.clone()];
        Self {
            backend,
            config,
            state: SessionState::Closed,
            active: None,
            staging: StagingBuffer::new(STAGING_CAPACITY),
            scratch: Vec::new(),
            mixer: MixerController::disabled(names),
        }
    }

    pub fn config(&self) -> &OutputConfiguration {
        &self.config
    }

    /// Bytes staged but not yet written to the device.
    pub fn staged_bytes(&self) -> usize {
        self.staging.fill()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn mixer(&self) -> &MixerController<B::Mixer> {
        &self.mixer
    }

    fn start_session(&mut self, params: &StreamParams) -> Result<ActiveStream<B::Pcm>, OutputError> {
        let map = FormatMap::new(<B::Pcm as PcmHandle>::FORMAT_CODES);
        let code = map
            .to_platform(params.format)
            .ok_or_else(|| OutputError::UnsupportedFormat(params.format.to_string()))?;
        params.validate().map_err(OutputError::OpenFailed)?;

        let mut handle = self
            .backend
            .open_pcm(&self.config.device)
            .map_err(|e| OutputError::OpenFailed(format!("can't open audio: {}", e)))?;

        let stream = negotiate(&mut handle, params, code, self.staging.capacity())?;
        Ok(ActiveStream { handle, stream })
    }

    /// Pad the staged partial chunk with silence, play everything staged and
    /// wait out the device delay.
    fn drain(active: &mut ActiveStream<B::Pcm>, staging: &mut StagingBuffer, scratch: &mut Vec<u8>) {
        let stream = active.stream;

        if !staging.is_empty() {
            let fill = staging.fill() % stream.chunk_bytes;
            if fill > 0 {
                let padded = staging.pad(stream.chunk_bytes - fill, stream.format.silence());
                log::debug!("Padded the last chunk with {} bytes of silence", padded);
            }
            if let Err(e) = flush_all(&mut active.handle, staging, scratch, &stream) {
                log::error!("Can't play the last chunk: {}", e);
            }
        }

        match active.handle.delay_frames() {
            Ok(delay) if stream.rate > 0 => {
                let frames = delay.max(0) as u64;
                let wait = Duration::from_micros(frames * 1_000_000 / stream.rate as u64);
                log::debug!("Waiting {:?} for the device to drain", wait);
                thread::sleep(wait);
            }
            Ok(_) => {}
            Err(e) => log::warn!("Can't get the device delay: {}", e),
        }
    }
}

impl<B: AudioBackend> OutputDriver for PcmOutput<B> {
    fn init(&mut self) -> Result<DeviceCapabilities, OutputError> {
        log::info!("Initialising {} device: {}", self.backend.name(), self.config.device);
        self.mixer = MixerController::open(&mut self.backend, &self.config);
        probe_device(&mut self.backend, &self.config.device)
    }

    fn capabilities(&mut self, device: &str) -> Result<DeviceCapabilities, OutputError> {
        probe_device(&mut self.backend, device)
    }

    fn open(&mut self, params: &StreamParams) -> Result<(), OutputError> {
        if self.active.is_some() {
            log::error!("Device is already open");
            return Err(OutputError::OpenFailed("already open".into()));
        }

        self.state = SessionState::Negotiating;
        match self.start_session(params) {
            Ok(active) => {
                log::info!(
                    "Opened {}: {}, {} channels, {}Hz",
                    self.config.device,
                    params.format,
                    active.stream.channels,
                    active.stream.rate
                );
                self.staging.reset();
                self.active = Some(active);
                self.state = SessionState::Streaming;
                Ok(())
            }
            Err(e) => {
                log::error!("{}", e);
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    fn play(&mut self, data: &[u8]) -> Result<usize, OutputError> {
        if let SessionState::Failed(e) = &self.state {
            return Err(e.clone());
        }
        let Some(active) = self.active.as_mut() else {
            return Err(OutputError::NotOpen);
        };

        log::debug!("Got {} bytes to play", data.len());

        let mut rest = data;
        while !rest.is_empty() {
            let copied = self.staging.write(rest);
            rest = &rest[copied..];

            if let Err(e) = flush_chunks(&mut active.handle, &mut self.staging, &mut self.scratch, &active.stream) {
                self.state = SessionState::Failed(e.clone());
                return Err(e);
            }
        }

        Ok(data.len())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        let Some(mut active) = self.active.take() else {
            return Err(OutputError::NotOpen);
        };

        if self.state.is_failed() {
            log::info!("Closing failed session without draining");
        } else {
            self.state = SessionState::Draining;
            Self::drain(&mut active, &mut self.staging, &mut self.scratch);
        }

        drop(active);
        self.staging.reset();
        self.state = SessionState::Closed;
        log::info!("Closed {}", self.config.device);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), OutputError> {
        let Some(active) = self.active.as_mut() else {
            log::debug!("Reset requested with the device closed");
            return Ok(());
        };

        let result = active
            .handle
            .drop_pending()
            .map_err(|e| OutputError::PlaybackError(format!("can't drop pending audio: {}", e)))
            .and_then(|()| {
                active
                    .handle
                    .prepare()
                    .map_err(|e| OutputError::PlaybackError(format!("can't prepare device: {}", e)))
            });
        self.staging.reset();

        match result {
            Ok(()) => {
                self.state = SessionState::Streaming;
                Ok(())
            }
            Err(e) => {
                log::error!("{}", e);
                self.state = SessionState::Failed(e.clone());
                Err(e)
            }
        }
    }

    fn buffered_frames(&mut self) -> u64 {
        let Some(active) = self.active.as_mut() else {
            return 0;
        };
        match active.handle.delay_frames() {
            Ok(delay) => delay.max(0) as u64,
            Err(e) => {
                log::debug!("Can't get the device delay: {}", e);
                0
            }
        }
    }

    fn buffered_bytes(&mut self) -> u64 {
        let frame_size = match &self.active {
            Some(active) => active.stream.frame_size as u64,
            None => return 0,
        };
        self.buffered_frames() * frame_size
    }

    fn negotiated_rate(&self) -> u32 {
        self.active.as_ref().map_or(0, |a| a.stream.rate)
    }

    fn negotiated_stream(&self) -> Option<NegotiatedStream> {
        self.active.as_ref().map(|a| a.stream)
    }

    fn state(&self) -> SessionState {
        self.state.clone()
    }

    fn read_volume(&mut self) -> Result<u8, OutputError> {
        self.mixer.read_volume()
    }

    fn set_volume(&mut self, volume: i32) -> Result<(), OutputError> {
        self.mixer.set_volume(volume)
    }

    fn toggle_mixer_channel(&mut self) {
        self.mixer.toggle();
    }

    fn mixer_channel_name(&self) -> String {
        self.mixer.channel_name()
    }

    fn shutdown(&mut self) {
        if self.active.is_some() {
            if let Err(e) = self.close() {
                log::warn!("Closing on shutdown failed: {}", e);
            }
        }
        self.mixer.shutdown();
        log::info!("{} output shut down", self.backend.name());
    }

    fn name(&self) -> &'static str {
        self.backend.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::null::{NullBackend, NullDeviceState, NullOutput, NullStep, WriteOutcome};
    use crate::models::audio_models::SampleFormat;
    use crate::traits::device::{DeviceError, Recovery};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn output(state: NullDeviceState) -> (NullOutput, Arc<Mutex<NullDeviceState>>) {
        let backend = NullBackend::with_state(state);
        let shared = backend.state();
        (PcmOutput::new(backend, OutputConfiguration::default()), shared)
    }

    // 8 kHz mono U8: 600-frame periods, 600-byte chunks.
    fn u8_params() -> StreamParams {
        StreamParams::new(SampleFormat::U8, 8000, 1)
    }

    fn fail_write_unrecoverably(state: &Arc<Mutex<NullDeviceState>>) {
        let mut s = state.lock();
        s.writes.push_back(WriteOutcome::Fail(DeviceError::other("EIO")));
        s.recoveries.push_back(Recovery::Failed(DeviceError::other("device gone")));
    }

    #[test]
    fn open_play_close() {
        let (mut out, shared) = output(NullDeviceState::default());

        out.open(&u8_params()).unwrap();
        assert!(out.state().is_streaming());
        assert_eq!(out.negotiated_rate(), 8000);
        assert_eq!(out.negotiated_stream().unwrap().chunk_bytes, 600);

        assert_eq!(out.play(&[1; 1000]).unwrap(), 1000);
        assert_eq!(out.staged_bytes(), 400);
        assert_eq!(shared.lock().played.len(), 600);

        out.close().unwrap();
        assert!(out.state().is_closed());
        assert_eq!(out.negotiated_rate(), 0);
        assert_eq!(shared.lock().open_handles, 0);
    }

    #[test]
    fn close_pads_with_format_silence() {
        let (mut out, shared) = output(NullDeviceState::default());
        out.open(&u8_params()).unwrap();

        out.play(&[1; 100]).unwrap();
        out.close().unwrap();

        let s = shared.lock();
        assert_eq!(s.played.len(), 600);
        assert!(s.played[..100].iter().all(|&b| b == 1));
        assert!(s.played[100..].iter().all(|&b| b == 0x80));
    }

    #[test]
    fn close_delivers_tail_after_short_write() {
        let (mut out, shared) = output(NullDeviceState::default());
        out.open(&u8_params()).unwrap();
        out.play(&[7; 300]).unwrap();
        shared.lock().writes.push_back(WriteOutcome::Frames(100));

        out.close().unwrap();

        let s = shared.lock();
        assert_eq!(s.played.len(), 600);
        assert_eq!(&s.played[..300], &[7; 300][..]);
        assert!(s.played[300..].iter().all(|&b| b == 0x80));
        assert_eq!(s.frames_written, 600);
        assert_eq!(s.write_calls, 2);
    }

    #[test]
    fn close_retries_zero_writes_in_tail() {
        let (mut out, shared) = output(NullDeviceState::default());
        out.open(&u8_params()).unwrap();
        out.play(&[5; 50]).unwrap();
        shared
            .lock()
            .writes
            .extend([WriteOutcome::Frames(20), WriteOutcome::Zero, WriteOutcome::Frames(10)]);

        out.close().unwrap();

        let s = shared.lock();
        assert_eq!(&s.played[..50], &[5; 50][..]);
        assert_eq!(s.played.len(), 600);
        assert_eq!(s.write_calls, 4);
    }

    #[test]
    fn close_stops_on_unrecoverable_tail_write() {
        let (mut out, shared) = output(NullDeviceState::default());
        out.open(&u8_params()).unwrap();
        out.play(&[1; 100]).unwrap();
        {
            let mut s = shared.lock();
            s.writes.push_back(WriteOutcome::Frames(10));
            s.writes.push_back(WriteOutcome::Fail(DeviceError::other("EIO")));
            s.recoveries.push_back(Recovery::Failed(DeviceError::other("device gone")));
        }

        assert_eq!(out.close(), Ok(()));

        let s = shared.lock();
        assert_eq!(s.played, vec![1; 10]);
        assert_eq!(s.open_handles, 0);
        assert!(out.state().is_closed());
    }

    #[test]
    fn close_with_nothing_staged_writes_nothing() {
        let (mut out, shared) = output(NullDeviceState::default());
        out.open(&u8_params()).unwrap();
        out.play(&[1; 600]).unwrap();

        out.close().unwrap();
        assert_eq!(shared.lock().write_calls, 1);
    }

    #[test]
    fn play_and_close_require_open() {
        let (mut out, _shared) = output(NullDeviceState::default());

        assert_eq!(out.play(&[0; 4]), Err(OutputError::NotOpen));
        assert_eq!(out.close(), Err(OutputError::NotOpen));
    }

    #[test]
    fn empty_play_is_accepted() {
        let (mut out, shared) = output(NullDeviceState::default());
        out.open(&u8_params()).unwrap();

        assert_eq!(out.play(&[]).unwrap(), 0);
        assert_eq!(shared.lock().write_calls, 0);
    }

    #[test]
    fn second_open_is_refused() {
        let (mut out, _shared) = output(NullDeviceState::default());
        out.open(&u8_params()).unwrap();
        let first = out.negotiated_stream();

        let err = out.open(&StreamParams::new(SampleFormat::S16, 44100, 2)).unwrap_err();

        assert_eq!(err, OutputError::OpenFailed("already open".into()));
        assert!(out.state().is_streaming());
        assert_eq!(out.negotiated_stream(), first);
    }

    #[test]
    fn invalid_params_rejected() {
        let (mut out, shared) = output(NullDeviceState::default());

        let err = out.open(&StreamParams::new(SampleFormat::S16, 0, 2)).unwrap_err();
        assert!(matches!(err, OutputError::OpenFailed(_)));
        assert!(out.state().is_closed());
        assert_eq!(shared.lock().handles_opened, 0);
    }

    #[test]
    fn failed_negotiation_releases_handle() {
        let state = NullDeviceState {
            failing: vec![NullStep::Apply],
            ..Default::default()
        };
        let (mut out, shared) = output(state);

        assert!(matches!(out.open(&u8_params()), Err(OutputError::OpenFailed(_))));
        assert!(out.state().is_closed());
        assert_eq!(shared.lock().open_handles, 0);

        shared.lock().failing.clear();
        out.open(&u8_params()).unwrap();
    }

    #[test]
    fn unrecoverable_write_fails_session_until_reset() {
        let (mut out, shared) = output(NullDeviceState::default());
        out.open(&u8_params()).unwrap();
        fail_write_unrecoverably(&shared);

        let err = out.play(&[1; 600]).unwrap_err();
        assert!(matches!(err, OutputError::PlaybackError(_)));
        assert!(out.state().is_failed());
        assert!(matches!(out.play(&[1; 10]), Err(OutputError::PlaybackError(_))));

        out.reset().unwrap();
        assert!(out.state().is_streaming());
        assert_eq!(out.staged_bytes(), 0);

        out.play(&[2; 600]).unwrap();
        assert_eq!(shared.lock().played, vec![2; 600]);
    }

    #[test]
    fn close_from_failed_skips_drain() {
        let (mut out, shared) = output(NullDeviceState::default());
        out.open(&u8_params()).unwrap();
        fail_write_unrecoverably(&shared);
        let _ = out.play(&[1; 700]);
        let calls = shared.lock().write_calls;

        out.close().unwrap();

        let s = shared.lock();
        assert_eq!(s.write_calls, calls);
        assert_eq!(s.open_handles, 0);
        assert!(out.state().is_closed());
    }

    #[test]
    fn reset_discards_staged_audio() {
        let (mut out, shared) = output(NullDeviceState::default());
        out.open(&u8_params()).unwrap();
        out.play(&[1; 300]).unwrap();

        out.reset().unwrap();

        assert_eq!(out.staged_bytes(), 0);
        let s = shared.lock();
        assert_eq!(s.drops, 1);
        assert_eq!(s.prepares, 2);
    }

    #[test]
    fn reset_when_closed_is_ok() {
        let (mut out, _shared) = output(NullDeviceState::default());
        assert_eq!(out.reset(), Ok(()));
        assert!(out.state().is_closed());
    }

    #[test]
    fn reset_drop_failure_is_playback_error() {
        let (mut out, shared) = output(NullDeviceState::default());
        out.open(&u8_params()).unwrap();
        shared.lock().failing.push(NullStep::Drop);

        assert!(matches!(out.reset(), Err(OutputError::PlaybackError(_))));
        assert!(out.state().is_failed());
    }

    #[test]
    fn buffered_reports_device_delay() {
        let (mut out, shared) = output(NullDeviceState::default());
        assert_eq!(out.buffered_frames(), 0);

        out.open(&StreamParams::new(SampleFormat::S16, 44100, 2)).unwrap();
        shared.lock().delay_frames = 100;
        assert_eq!(out.buffered_frames(), 100);
        assert_eq!(out.buffered_bytes(), 400);

        shared.lock().delay_frames = -5;
        assert_eq!(out.buffered_frames(), 0);

        shared.lock().failing.push(NullStep::Delay);
        assert_eq!(out.buffered_frames(), 0);
    }

    #[test]
    fn init_attaches_mixer_and_probes() {
        let (mut out, _shared) = output(NullDeviceState::default());

        let caps = out.init().unwrap();
        assert_eq!(caps.max_channels, 8);
        assert!(out.mixer().is_enabled());
        assert_eq!(out.read_volume().unwrap(), 70);
        assert_eq!(out.mixer_channel_name(), "PCM");
    }

    #[test]
    fn shutdown_closes_session_and_mixer() {
        let (mut out, shared) = output(NullDeviceState::default());
        out.init().unwrap();
        out.open(&u8_params()).unwrap();

        out.shutdown();

        assert!(out.state().is_closed());
        assert_eq!(shared.lock().open_handles, 0);
        assert!(out.read_volume().is_err());
    }
}
