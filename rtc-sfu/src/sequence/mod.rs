//! Per-leg sequence number remapping.
//!
//! A subscriber leg forwards only part of what the publisher sends: packets of inactive
//! layers are dropped and padding is injected. [`SequenceNumberTranslator`] rewrites the
//! publisher's sequence numbers so that the subscriber sees a contiguous space, and maps
//! the subscriber's feedback back to the publisher's numbering.
//!
//! # Example
//!
//! ```ignore
//! use rtc_sfu::{SequenceNumberKind, SequenceNumberTranslator};
//!
//! let mut translator = SequenceNumberTranslator::new();
//! assert_eq!(translator.get(5, false).output, 5);
//! assert_eq!(translator.get(6, true).kind, SequenceNumberKind::Skip);
//! assert_eq!(translator.get(7, false).output, 6);
//! assert_eq!(translator.reverse(6).input, 7);
//! ```

mod translator;

pub use translator::SequenceNumberTranslator;

/// Outcome of translating one input sequence number.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SequenceNumberKind {
    /// Forward with the assigned output.
    #[default]
    Valid,
    /// Drop the packet; the output slot is reused by the next valid packet.
    Skip,
    /// Late packet whose slot must not be forwarded.
    Discard,
    /// Synthesized output with no input, e.g. padding.
    Generated,
}

/// Result of one translator call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumber {
    pub input: u16,
    pub output: u16,
    pub kind: SequenceNumberKind,
}

impl SequenceNumber {
    pub fn new(input: u16, output: u16, kind: SequenceNumberKind) -> Self {
        Self {
            input,
            output,
            kind,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.kind == SequenceNumberKind::Valid
    }
}
