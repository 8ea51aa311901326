use crate::models::audio_models::{DeviceCapabilities, FormatSet};
use crate::models::error::OutputError;
use crate::processing::format_map::FormatMap;
use crate::traits::device::{AudioBackend, PcmHandle};

/// Open `device` just long enough to read its channel range and formats.
///
/// The handle is a local and is released on every return path, including
/// the partial failures in between.
pub fn probe_device<B: AudioBackend>(
    backend: &mut B,
    device: &str,
) -> Result<DeviceCapabilities, OutputError> {
    let handle = backend
        .open_pcm(device)
        .map_err(|e| OutputError::ProbeFailed(format!("can't open {}: {}", device, e)))?;

    let min_channels = handle.channels_min().map_err(|e| {
        OutputError::ProbeFailed(format!("can't get the minimum number of channels: {}", e))
    })?;
    let max_channels = handle.channels_max().map_err(|e| {
        OutputError::ProbeFailed(format!("can't get the maximum number of channels: {}", e))
    })?;
    if min_channels > max_channels {
        return Err(OutputError::ProbeFailed(format!(
            "device reports {} minimum channels but {} maximum",
            min_channels, max_channels
        )));
    }

    let map = FormatMap::new(<B::Pcm as PcmHandle>::FORMAT_CODES);
    let formats = map.supported_set(|code| handle.supports_format(code)) | FormatSet::NATIVE_ENDIAN;

    drop(handle);

    log::debug!(
        "Device {} supports {}-{} channels, formats {:?}",
        device,
        min_channels,
        max_channels,
        formats.formats()
    );

    Ok(DeviceCapabilities {
        min_channels,
        max_channels,
        formats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::null::{NullBackend, NullDeviceState, NullFormat, NullStep};

    #[test]
    fn reports_channels_and_mapped_formats() {
        let state = NullDeviceState {
            channels_min: 2,
            channels_max: 6,
            supported_formats: vec![NullFormat::S16, NullFormat::U8, NullFormat::S24Packed],
            ..Default::default()
        };
        let mut backend = NullBackend::with_state(state);

        let caps = probe_device(&mut backend, "default").unwrap();

        assert_eq!(caps.min_channels, 2);
        assert_eq!(caps.max_channels, 6);
        assert!(caps.formats.contains(FormatSet::S16));
        assert!(caps.formats.contains(FormatSet::U8));
        assert!(!caps.formats.contains(FormatSet::S32));
        assert!(caps.formats.contains(FormatSet::NATIVE_ENDIAN));
        assert_eq!(caps.formats.formats().len(), 2);
    }

    #[test]
    fn packed_only_device_has_no_formats() {
        let state = NullDeviceState {
            supported_formats: vec![NullFormat::S24Packed],
            ..Default::default()
        };
        let mut backend = NullBackend::with_state(state);

        let caps = probe_device(&mut backend, "default").unwrap();
        assert!(caps.formats.has_no_formats());
        assert!(caps.formats.contains(FormatSet::NATIVE_ENDIAN));
    }

    #[test]
    fn handle_released_on_success() {
        let mut backend = NullBackend::new();
        let state = backend.state();

        probe_device(&mut backend, "default").unwrap();

        let s = state.lock();
        assert_eq!(s.handles_opened, 1);
        assert_eq!(s.open_handles, 0);
    }

    #[test]
    fn handle_released_on_every_failure() {
        for step in [NullStep::Open, NullStep::ChannelsMin, NullStep::ChannelsMax] {
            let state = NullDeviceState {
                failing: vec![step],
                ..Default::default()
            };
            let mut backend = NullBackend::with_state(state);
            let shared = backend.state();

            let err = probe_device(&mut backend, "hw:0").unwrap_err();

            assert!(matches!(err, OutputError::ProbeFailed(_)), "{:?}", step);
            assert_eq!(shared.lock().open_handles, 0, "{:?}", step);
        }
    }

    #[test]
    fn inverted_channel_range_rejected() {
        let state = NullDeviceState {
            channels_min: 4,
            channels_max: 2,
            ..Default::default()
        };
        let mut backend = NullBackend::with_state(state);
        let shared = backend.state();

        let err = probe_device(&mut backend, "default").unwrap_err();
        assert!(matches!(err, OutputError::ProbeFailed(_)));
        assert_eq!(shared.lock().open_handles, 0);
    }
}
