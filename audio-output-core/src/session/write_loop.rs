use std::thread;
use std::time::Duration;

use crate::models::audio_models::NegotiatedStream;
use crate::models::error::OutputError;
use crate::processing::staging_buffer::StagingBuffer;
use crate::traits::device::{PcmHandle, Recovery};

/// Longest wait for write readiness after a would-block recovery.
pub const WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Write whole chunks from `staging` to the device until less than one
/// chunk remains.
///
/// Short writes advance by the frames the device took; zero-frame writes
/// are retried after yielding. Write errors go through the handle's
/// recovery and only an unrecoverable error ends the loop. Returns the
/// number of bytes the device accepted.
pub fn flush_chunks<P: PcmHandle>(
    handle: &mut P,
    staging: &mut StagingBuffer,
    scratch: &mut Vec<u8>,
    stream: &NegotiatedStream,
) -> Result<usize, OutputError> {
    write_staged(handle, staging, scratch, stream, stream.chunk_bytes)
}

/// Write every whole frame left in `staging`, at most one chunk per call.
///
/// Used when closing: the tail a short write leaves behind is less than a
/// chunk and would never be picked up by [`flush_chunks`].
pub fn flush_all<P: PcmHandle>(
    handle: &mut P,
    staging: &mut StagingBuffer,
    scratch: &mut Vec<u8>,
    stream: &NegotiatedStream,
) -> Result<usize, OutputError> {
    write_staged(handle, staging, scratch, stream, stream.frame_size.max(1))
}

fn write_staged<P: PcmHandle>(
    handle: &mut P,
    staging: &mut StagingBuffer,
    scratch: &mut Vec<u8>,
    stream: &NegotiatedStream,
    min_fill: usize,
) -> Result<usize, OutputError> {
    let frame_size = stream.frame_size.max(1);
    let mut written = 0;
    let mut zero_streak = false;

    while staging.fill() >= min_fill {
        let frames = staging.fill().min(stream.chunk_bytes) / frame_size;
        if frames == 0 {
            break;
        }
        let result = {
            let chunk = staging.peek(frames * frame_size, scratch);
            handle.write_frames(chunk, frames)
        };

        match result {
            Ok(0) => {
                if !zero_streak {
                    log::debug!("Device accepted no frames, retrying");
                    zero_streak = true;
                }
                thread::yield_now();
            }
            Ok(taken) => {
                zero_streak = false;
                let bytes = taken.min(frames) * frame_size;
                staging.consume(bytes);
                written += bytes;
            }
            Err(err) => {
                zero_streak = false;
                match handle.recover(&err) {
                    Recovery::Recovered => {
                        log::debug!("Recovered from write error: {}", err);
                    }
                    Recovery::WouldBlock => {
                        if let Err(wait_err) = handle.wait(WAIT_TIMEOUT) {
                            log::warn!("Waiting for the device failed: {}", wait_err);
                        }
                    }
                    Recovery::Failed(fatal) => {
                        log::error!("Can't recover after underrun: {}", fatal);
                        return Err(OutputError::PlaybackError(fatal.to_string()));
                    }
                }
            }
        }
    }

    log::debug!("{} bytes left in the buffer", staging.fill());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::null::{NullBackend, NullDeviceState, NullPcm, WriteOutcome};
    use crate::models::audio_models::SampleFormat;
    use crate::traits::device::{AudioBackend, DeviceError, DeviceErrorKind};
    use parking_lot::Mutex;
    use std::sync::Arc;

    // 4-frame periods of 2-byte frames: 8-byte chunks.
    fn small_stream() -> NegotiatedStream {
        NegotiatedStream {
            format: SampleFormat::S16,
            rate: 8000,
            channels: 1,
            period_frames: 4,
            buffer_frames: 16,
            frame_size: 2,
            chunk_bytes: 8,
        }
    }

    fn setup(state: NullDeviceState) -> (NullPcm, Arc<Mutex<NullDeviceState>>) {
        let mut backend = NullBackend::with_state(state);
        let shared = backend.state();
        (backend.open_pcm("default").unwrap(), shared)
    }

    fn staged(bytes: &[u8]) -> StagingBuffer {
        let mut staging = StagingBuffer::new(64);
        staging.write(bytes);
        staging
    }

    #[test]
    fn writes_whole_chunks_and_keeps_remainder() {
        let (mut pcm, shared) = setup(NullDeviceState::default());
        let data: Vec<u8> = (0..20).collect();
        let mut staging = staged(&data);

        let written = flush_chunks(&mut pcm, &mut staging, &mut Vec::new(), &small_stream()).unwrap();

        assert_eq!(written, 16);
        assert_eq!(staging.fill(), 4);
        assert_eq!(shared.lock().played, data[..16].to_vec());
    }

    #[test]
    fn short_write_advances_by_frames_taken() {
        let mut state = NullDeviceState::default();
        state.writes.push_back(WriteOutcome::Frames(1));
        let (mut pcm, shared) = setup(state);
        let data: Vec<u8> = (0..10).collect();
        let mut staging = staged(&data);

        flush_chunks(&mut pcm, &mut staging, &mut Vec::new(), &small_stream()).unwrap();

        // 2 bytes taken first, then one full chunk; 0 bytes remain below a chunk
        assert_eq!(shared.lock().played, data.to_vec());
        assert_eq!(staging.fill(), 0);
    }

    #[test]
    fn zero_writes_are_retried() {
        let mut state = NullDeviceState::default();
        state.writes.extend([WriteOutcome::Zero, WriteOutcome::Zero, WriteOutcome::Zero]);
        let (mut pcm, shared) = setup(state);
        let mut staging = staged(&[7; 8]);

        flush_chunks(&mut pcm, &mut staging, &mut Vec::new(), &small_stream()).unwrap();

        let s = shared.lock();
        assert_eq!(s.write_calls, 4);
        assert_eq!(s.played, vec![7; 8]);
    }

    #[test]
    fn recovered_error_retries_same_chunk() {
        let mut state = NullDeviceState::default();
        state.writes.push_back(WriteOutcome::Fail(DeviceError::new(DeviceErrorKind::Underrun, "xrun")));
        let (mut pcm, shared) = setup(state);
        let data: Vec<u8> = (0..16).collect();
        let mut staging = staged(&data);

        flush_chunks(&mut pcm, &mut staging, &mut Vec::new(), &small_stream()).unwrap();

        let s = shared.lock();
        assert_eq!(s.recover_calls, 1);
        assert_eq!(s.played, data);
    }

    #[test]
    fn would_block_waits_then_resumes() {
        let mut state = NullDeviceState::default();
        state.writes.push_back(WriteOutcome::Fail(DeviceError::new(DeviceErrorKind::WouldBlock, "busy")));
        state.recoveries.push_back(Recovery::WouldBlock);
        state.failing.push(crate::backends::null::NullStep::Wait);
        let (mut pcm, shared) = setup(state);
        let mut staging = staged(&[1; 8]);

        flush_chunks(&mut pcm, &mut staging, &mut Vec::new(), &small_stream()).unwrap();

        let s = shared.lock();
        assert_eq!(s.waits, 1);
        assert_eq!(s.played, vec![1; 8]);
    }

    #[test]
    fn unrecoverable_error_is_playback_error() {
        let mut state = NullDeviceState::default();
        state.writes.push_back(WriteOutcome::Fail(DeviceError::other("gone")));
        state.recoveries.push_back(Recovery::Failed(DeviceError::other("device unplugged")));
        let (mut pcm, _shared) = setup(state);
        let mut staging = staged(&[1; 8]);

        let err = flush_chunks(&mut pcm, &mut staging, &mut Vec::new(), &small_stream()).unwrap_err();

        assert_eq!(err, OutputError::PlaybackError("device unplugged".into()));
        assert_eq!(staging.fill(), 8);
    }

    #[test]
    fn flush_all_writes_tail_after_short_write() {
        let mut state = NullDeviceState::default();
        state.writes.extend([WriteOutcome::Frames(1), WriteOutcome::Frames(2)]);
        let (mut pcm, shared) = setup(state);
        let data: Vec<u8> = (0..8).collect();
        let mut staging = staged(&data);

        let written = flush_all(&mut pcm, &mut staging, &mut Vec::new(), &small_stream()).unwrap();

        assert_eq!(written, 8);
        assert!(staging.is_empty());
        let s = shared.lock();
        assert_eq!(s.played, data);
        assert_eq!(s.frames_written, 4);
        assert_eq!(s.write_calls, 3);
    }

    #[test]
    fn flush_all_leaves_partial_frame() {
        let (mut pcm, shared) = setup(NullDeviceState::default());
        let mut staging = staged(&[3; 11]);

        flush_all(&mut pcm, &mut staging, &mut Vec::new(), &small_stream()).unwrap();

        assert_eq!(staging.fill(), 1);
        assert_eq!(shared.lock().played, vec![3; 10]);
    }

    #[test]
    fn wrapped_chunk_is_written_in_order() {
        let (mut pcm, shared) = setup(NullDeviceState::default());
        let mut staging = StagingBuffer::new(12);
        staging.write(&[0; 6]);
        staging.consume(6);
        let data: Vec<u8> = (10..18).collect();
        staging.write(&data);

        flush_chunks(&mut pcm, &mut staging, &mut Vec::new(), &small_stream()).unwrap();

        assert_eq!(shared.lock().played, data);
    }
}
