use crate::models::audio_models::{NegotiatedStream, StreamParams};
use crate::models::error::OutputError;
use crate::traits::device::{DeviceError, PcmHandle};

/// Upper bound on the hardware buffer, to bound output latency.
pub const BUFFER_TIME_MAX_US: u32 = 300_000;

/// Negotiate hardware parameters on a freshly opened handle and prepare it.
///
/// Sequence:
/// 1. Access mode, format and channel count (each must be accepted as is)
/// 2. Nearest supported rate, read back as the negotiated rate
/// 3. Buffer time: the device maximum, clamped to [`BUFFER_TIME_MAX_US`]
/// 4. Period time: a quarter of the buffer time
/// 5. Apply, read back period/buffer frames, derive the chunk size
/// 6. Prepare for transfer
///
/// `max_chunk_bytes` is the staging capacity; a period larger than it could
/// never be written.
pub fn negotiate<P: PcmHandle>(
    handle: &mut P,
    params: &StreamParams,
    format: P::Format,
    max_chunk_bytes: usize,
) -> Result<NegotiatedStream, OutputError> {
    handle
        .set_access_interleaved()
        .map_err(|e| failed("can't set access type", e))?;

    handle
        .set_format(format)
        .map_err(|e| failed("can't set sample format", e))?;
    log::debug!("Set sample width: {} bytes", params.format.bytes_per_sample());

    handle
        .set_channels(params.channels)
        .map_err(|e| failed("can't set number of channels", e))?;
    log::debug!("Set channels: {}", params.channels);

    let rate = handle
        .set_rate_near(params.rate)
        .map_err(|e| failed("can't set sample rate", e))?;
    if rate != params.rate {
        log::warn!("Requested {}Hz but the device runs at {}Hz", params.rate, rate);
    }
    log::debug!("Set rate: {}Hz", rate);

    let buffer_time_max = handle
        .buffer_time_max_us()
        .map_err(|e| failed("can't get maximum buffer time", e))?;
    let buffer_time = buffer_time_max.min(BUFFER_TIME_MAX_US);
    let period_time = buffer_time / 4;

    handle
        .set_period_time_near(period_time)
        .map_err(|e| failed("can't set period time", e))?;
    handle
        .set_buffer_time_near(buffer_time)
        .map_err(|e| failed("can't set buffer time", e))?;

    handle
        .apply_params()
        .map_err(|e| failed("can't set audio parameters", e))?;

    let period_frames = handle
        .period_frames()
        .map_err(|e| failed("can't get period size", e))?;
    let buffer_frames = handle
        .buffer_frames()
        .map_err(|e| failed("can't get buffer size", e))?;
    log::debug!("Chunk size: {} frames", period_frames);
    log::debug!("Buffer size: {} frames", buffer_frames);

    if period_frames == 0 {
        return Err(OutputError::OpenFailed("device reported an empty period".into()));
    }
    if period_frames == buffer_frames {
        return Err(OutputError::OpenFailed(format!(
            "can't use period equal to buffer size ({} == {})",
            period_frames, buffer_frames
        )));
    }

    let frame_size = params.frame_size();
    let chunk_bytes = period_frames as usize * frame_size;
    log::debug!("Frame size: {} bytes", frame_size);

    if chunk_bytes > max_chunk_bytes {
        return Err(OutputError::OpenFailed(format!(
            "period of {} bytes exceeds the {} byte staging buffer",
            chunk_bytes, max_chunk_bytes
        )));
    }

    let stream = NegotiatedStream {
        format: params.format,
        rate,
        channels: params.channels,
        period_frames,
        buffer_frames,
        frame_size,
        chunk_bytes,
    };
    log::debug!("Buffer time: {}us", stream.buffer_time_us());

    handle
        .prepare()
        .map_err(|e| failed("can't prepare audio interface for use", e))?;

    Ok(stream)
}

fn failed(context: &str, err: DeviceError) -> OutputError {
    OutputError::OpenFailed(format!("{}: {}", context, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::null::{NullBackend, NullDeviceState, NullFormat, NullStep};
    use crate::models::audio_models::SampleFormat;
    use crate::traits::device::AudioBackend;

    fn cd_params() -> StreamParams {
        StreamParams::new(SampleFormat::S16, 44100, 2)
    }

    fn negotiate_with(state: NullDeviceState) -> Result<NegotiatedStream, OutputError> {
        let mut backend = NullBackend::with_state(state);
        let mut handle = backend.open_pcm("default").unwrap();
        negotiate(&mut handle, &cd_params(), NullFormat::S16, 512 * 1024)
    }

    #[test]
    fn clamps_buffer_and_takes_quarter_period() {
        let stream = negotiate_with(NullDeviceState::default()).unwrap();

        // 500ms max → 300ms → 13230 frames; period 75ms → 3307 frames
        assert_eq!(stream.buffer_frames, 13230);
        assert_eq!(stream.period_frames, 3307);
        assert_eq!(stream.frame_size, 4);
        assert_eq!(stream.chunk_bytes, 3307 * 4);
        assert_eq!(stream.rate, 44100);
    }

    #[test]
    fn short_device_buffer_is_not_stretched() {
        let state = NullDeviceState {
            buffer_time_max_us: 100_000,
            ..Default::default()
        };
        let stream = negotiate_with(state).unwrap();

        assert_eq!(stream.buffer_frames, 4410);
        assert_eq!(stream.period_frames, 1102);
    }

    #[test]
    fn granularity_rounds_period() {
        let state = NullDeviceState {
            frame_granularity: 64,
            ..Default::default()
        };
        let stream = negotiate_with(state).unwrap();

        assert_eq!(stream.period_frames, 3264);
        assert_eq!(stream.period_frames % 64, 0);
    }

    #[test]
    fn nearest_rate_is_reported() {
        let state = NullDeviceState {
            rates: vec![48000, 96000],
            ..Default::default()
        };
        let stream = negotiate_with(state).unwrap();
        assert_eq!(stream.rate, 48000);
    }

    #[test]
    fn period_equal_to_buffer_rejected() {
        let state = NullDeviceState {
            single_period_buffer: true,
            ..Default::default()
        };
        let err = negotiate_with(state).unwrap_err();
        assert!(matches!(err, OutputError::OpenFailed(ref msg) if msg.contains("period equal to buffer")));
    }

    #[test]
    fn oversized_chunk_rejected() {
        let mut backend = NullBackend::new();
        let mut handle = backend.open_pcm("default").unwrap();
        let err = negotiate(&mut handle, &cd_params(), NullFormat::S16, 1024).unwrap_err();
        assert!(matches!(err, OutputError::OpenFailed(_)));
    }

    #[test]
    fn each_setter_failure_is_terminal() {
        for step in [
            NullStep::Access,
            NullStep::Format,
            NullStep::Channels,
            NullStep::Rate,
            NullStep::BufferTimeMax,
            NullStep::PeriodTime,
            NullStep::BufferTime,
            NullStep::Apply,
            NullStep::Prepare,
        ] {
            let state = NullDeviceState {
                failing: vec![step],
                ..Default::default()
            };
            let err = negotiate_with(state).unwrap_err();
            assert!(matches!(err, OutputError::OpenFailed(_)), "{:?}", step);
        }
    }

    #[test]
    fn prepares_on_success() {
        let mut backend = NullBackend::new();
        let state = backend.state();
        let mut handle = backend.open_pcm("default").unwrap();
        negotiate(&mut handle, &cd_params(), NullFormat::S16, 512 * 1024).unwrap();
        assert_eq!(state.lock().prepares, 1);
    }
}
