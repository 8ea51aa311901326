use std::fmt::Debug;

use crate::models::audio_models::{FormatSet, SampleFormat};

/// Translation between portable sample formats and a backend's format codes.
///
/// Built over a static table supplied by the backend. Device formats with no
/// entry in the table (packed 24-bit, float, ...) are invisible to callers.
#[derive(Debug, Clone, Copy)]
pub struct FormatMap<F: 'static> {
    codes: &'static [(SampleFormat, F)],
}

impl<F: Copy + PartialEq + Debug + 'static> FormatMap<F> {
    pub fn new(codes: &'static [(SampleFormat, F)]) -> Self {
        Self { codes }
    }

    /// Platform code for a portable format, if the backend has one.
    pub fn to_platform(&self, format: SampleFormat) -> Option<F> {
        self.codes
            .iter()
            .find(|(portable, _)| *portable == format)
            .map(|(_, code)| *code)
    }

    /// Portable format for a platform code, if there is one.
    pub fn to_portable(&self, code: F) -> Option<SampleFormat> {
        self.codes
            .iter()
            .find(|(_, platform)| *platform == code)
            .map(|(portable, _)| *portable)
    }

    /// Union of the portable formats whose platform code passes `supported`.
    ///
    /// Each table entry is tested independently.
    pub fn supported_set(&self, mut supported: impl FnMut(F) -> bool) -> FormatSet {
        let mut set = FormatSet::EMPTY;
        for (portable, code) in self.codes {
            if supported(*code) {
                set |= portable.as_set();
            }
        }
        set
    }
}
