//! Recover a frame from a notify stream that carries stray bytes.
//!
//! Notify-only devices push fixed-size frames that cannot be re-requested, and
//! notifications are often duplicated or cut short. The resynchronizer slides a
//! window over the buffered bytes and accepts the first window whose function
//! byte and CRC both check out. A coincidental CRC match in noise is possible,
//! so decoders still range-check what they extract.

use serde::Deserialize;
use tracing::trace;

use crate::frame::crc_matches;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Resynchronizer {
    /// Length of every frame the device pushes.
    pub min_length: usize,
    /// Function code expected at offset 1 of a frame.
    pub header_byte: u8,
}

impl Resynchronizer {
    pub const fn new(min_length: usize, header_byte: u8) -> Self {
        Self {
            min_length,
            header_byte,
        }
    }

    /// Return the lowest-offset window that looks like a valid frame.
    pub fn find_frame<'a>(&self, buffer: &'a [u8]) -> Option<&'a [u8]> {
        self.find(buffer).map(|(_, frame)| frame)
    }

    /// Like [`Self::find_frame`] but also reports the window's offset.
    pub fn find<'a>(&self, buffer: &'a [u8]) -> Option<(usize, &'a [u8])> {
        if self.min_length < 3 || buffer.len() < self.min_length {
            return None;
        }

        for i in 0..=buffer.len() - self.min_length {
            if buffer[i + 1] != self.header_byte {
                continue;
            }
            let candidate = &buffer[i..i + self.min_length];
            if crc_matches(candidate) {
                return Some((i, candidate));
            }
            trace!(offset = i, "CRC check failed for candidate window");
        }

        None
    }

    /// Bytes at the end of an unmatched buffer that could still begin a frame.
    pub(crate) fn retained_tail(&self) -> usize {
        self.min_length.saturating_sub(1)
    }
}
