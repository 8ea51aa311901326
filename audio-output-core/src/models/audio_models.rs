use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

const U16_SILENCE: [u8; 2] = 0x8000u16.to_ne_bytes();
const U32_SILENCE: [u8; 4] = 0x8000_0000u32.to_ne_bytes();

/// Portable PCM sample format, always in native byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 6] = [
        SampleFormat::S8,
        SampleFormat::U8,
        SampleFormat::S16,
        SampleFormat::U16,
        SampleFormat::S32,
        SampleFormat::U32,
    ];

    /// Width of one sample in bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::S8 | Self::U8 => 1,
            Self::S16 | Self::U16 => 2,
            Self::S32 | Self::U32 => 4,
        }
    }

    /// Bytes of one silent sample.
    ///
    /// Signed formats are silent at zero, unsigned ones at the midpoint.
    pub fn silence(self) -> &'static [u8] {
        match self {
            Self::S8 => &[0],
            Self::U8 => &[0x80],
            Self::S16 => &[0, 0],
            Self::U16 => &U16_SILENCE,
            Self::S32 => &[0, 0, 0, 0],
            Self::U32 => &U32_SILENCE,
        }
    }

    /// The single-format bit of this format in a [`FormatSet`].
    pub fn as_set(self) -> FormatSet {
        match self {
            Self::S8 => FormatSet::S8,
            Self::U8 => FormatSet::U8,
            Self::S16 => FormatSet::S16,
            Self::U16 => FormatSet::U16,
            Self::S32 => FormatSet::S32,
            Self::U32 => FormatSet::U32,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::S8 => "8-bit signed",
            Self::U8 => "8-bit unsigned",
            Self::S16 => "16-bit signed",
            Self::U16 => "16-bit unsigned",
            Self::S32 => "32-bit signed",
            Self::U32 => "32-bit unsigned",
        };
        write!(f, "{}", name)
    }
}

/// Bitmask of portable sample formats plus byte-order flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatSet(u32);

impl FormatSet {
    pub const EMPTY: FormatSet = FormatSet(0);
    pub const S8: FormatSet = FormatSet(0x01);
    pub const U8: FormatSet = FormatSet(0x02);
    pub const S16: FormatSet = FormatSet(0x04);
    pub const U16: FormatSet = FormatSet(0x08);
    pub const S32: FormatSet = FormatSet(0x10);
    pub const U32: FormatSet = FormatSet(0x20);

    pub const LITTLE_ENDIAN: FormatSet = FormatSet(0x1000);
    pub const BIG_ENDIAN: FormatSet = FormatSet(0x2000);

    #[cfg(target_endian = "little")]
    pub const NATIVE_ENDIAN: FormatSet = Self::LITTLE_ENDIAN;
    #[cfg(target_endian = "big")]
    pub const NATIVE_ENDIAN: FormatSet = Self::BIG_ENDIAN;

    const FORMAT_MASK: u32 = 0x3f;

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(self, other: FormatSet) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn supports(self, format: SampleFormat) -> bool {
        self.contains(format.as_set())
    }

    /// The sample formats in the set, ignoring byte-order flags.
    pub fn formats(self) -> Vec<SampleFormat> {
        SampleFormat::ALL
            .iter()
            .copied()
            .filter(|f| self.supports(*f))
            .collect()
    }

    /// Whether no sample format bit is set.
    pub fn has_no_formats(self) -> bool {
        self.0 & Self::FORMAT_MASK == 0
    }
}

impl BitOr for FormatSet {
    type Output = FormatSet;

    fn bitor(self, rhs: FormatSet) -> FormatSet {
        FormatSet(self.0 | rhs.0)
    }
}

impl BitOrAssign for FormatSet {
    fn bitor_assign(&mut self, rhs: FormatSet) {
        self.0 |= rhs.0;
    }
}

/// What a device can play, as reported by the capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub min_channels: u32,
    pub max_channels: u32,
    pub formats: FormatSet,
}

/// Stream parameters requested by the owner when opening the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamParams {
    pub format: SampleFormat,
    pub rate: u32,
    pub channels: u32,
}

impl StreamParams {
    pub fn new(format: SampleFormat, rate: u32, channels: u32) -> Self {
        Self {
            format,
            rate,
            channels,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if self.channels == 0 {
            return Err("channel count must be positive".into());
        }
        Ok(())
    }

    /// Bytes in one frame (one sample for every channel).
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }
}

/// Parameters actually in effect after negotiation with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiatedStream {
    pub format: SampleFormat,
    /// Rate chosen by the device; may differ from the requested one.
    pub rate: u32,
    pub channels: u32,
    pub period_frames: u64,
    pub buffer_frames: u64,
    pub frame_size: usize,
    /// One period in bytes; the unit of every hardware write.
    pub chunk_bytes: usize,
}

impl NegotiatedStream {
    /// Buffer length as wall-clock microseconds at the negotiated rate.
    pub fn buffer_time_us(&self) -> u64 {
        if self.rate == 0 {
            return 0;
        }
        self.buffer_frames * 1_000_000 / self.rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_widths() {
        assert_eq!(SampleFormat::U8.bytes_per_sample(), 1);
        assert_eq!(SampleFormat::S16.bytes_per_sample(), 2);
        assert_eq!(SampleFormat::U32.bytes_per_sample(), 4);
    }

    #[test]
    fn silence_is_midpoint_for_unsigned() {
        assert_eq!(SampleFormat::S16.silence(), &[0, 0]);
        assert_eq!(SampleFormat::U8.silence(), &[0x80]);
        assert_eq!(
            u16::from_ne_bytes([SampleFormat::U16.silence()[0], SampleFormat::U16.silence()[1]]),
            0x8000
        );
        assert_eq!(SampleFormat::U32.silence().len(), 4);
    }

    #[test]
    fn format_set_membership() {
        let set = FormatSet::S16 | FormatSet::U8 | FormatSet::NATIVE_ENDIAN;
        assert!(set.supports(SampleFormat::S16));
        assert!(set.supports(SampleFormat::U8));
        assert!(!set.supports(SampleFormat::S32));
        assert!(set.contains(FormatSet::NATIVE_ENDIAN));
        assert_eq!(set.formats(), vec![SampleFormat::U8, SampleFormat::S16]);
        assert!(!set.has_no_formats());
        assert!(FormatSet::NATIVE_ENDIAN.has_no_formats());
    }

    #[test]
    fn empty_set_contains_nothing() {
        assert!(!FormatSet::EMPTY.contains(FormatSet::EMPTY));
        assert!(FormatSet::EMPTY.formats().is_empty());
    }

    #[test]
    fn format_set_serializes_as_bits() {
        let json = serde_json::to_string(&(FormatSet::S16 | FormatSet::S32)).unwrap();
        assert_eq!(json, "20");
    }

    #[test]
    fn stream_params_validation() {
        assert!(StreamParams::new(SampleFormat::S16, 44100, 2).validate().is_ok());
        assert!(StreamParams::new(SampleFormat::S16, 0, 2).validate().is_err());
        assert!(StreamParams::new(SampleFormat::S16, 44100, 0).validate().is_err());
        assert_eq!(StreamParams::new(SampleFormat::S32, 48000, 6).frame_size(), 24);
    }
}
