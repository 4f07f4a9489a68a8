use super::{SequenceNumber, SequenceNumberKind};
use crate::rtp_utils::number_less_than;
use log::trace;

/// Four full rollovers of a 16-bit space.
const DEFAULT_CAPACITY: usize = 4 * 65536;
const DEFAULT_MAX_DISTANCE: u16 = 500;
const DEFAULT_BITS: u8 = 16;

const PICTURE_ID_CAPACITY: usize = 4 * 32768;
const PICTURE_ID_MAX_DISTANCE: u16 = 250;
const PICTURE_ID_BITS: u8 = 15;

#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    /// Output with the rollovers counted, so entries from older cycles never alias.
    extended_output: u64,
    number: SequenceNumber,
}

/// Rewrites an input number space into a contiguous output space.
///
/// Inputs are recorded by their number, and only inputs within `max_distance` of the
/// newest one are translated. The output history is a ring of `capacity` entries keyed
/// by the unwrapped output, so it spans several rollovers and evicts oldest first. A
/// lookup for an evicted output misses instead of returning stale data.
///
/// All comparisons are modular over `bits` (16 for RTP sequence numbers, 15 for VP8
/// picture ids).
#[derive(Debug, Clone)]
pub struct SequenceNumberTranslator {
    in_out: Vec<SequenceNumber>,
    out_in: Vec<Option<HistoryEntry>>,
    newest_output: Option<u64>,
    first_input: u16,
    last_input: u16,
    last_output: u16,
    max_distance: u16,
    bits: u8,
    /// Outputs generated since the last valid packet.
    offset: u16,
    initialized: bool,
    reset: bool,
}

impl Default for SequenceNumberTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceNumberTranslator {
    /// Translator for 16-bit RTP sequence numbers.
    pub fn new() -> Self {
        Self::with_params(DEFAULT_CAPACITY, DEFAULT_MAX_DISTANCE, DEFAULT_BITS)
    }

    /// Translator for 15-bit VP8 picture ids.
    pub fn for_picture_ids() -> Self {
        Self::with_params(
            PICTURE_ID_CAPACITY,
            PICTURE_ID_MAX_DISTANCE,
            PICTURE_ID_BITS,
        )
    }

    /// `capacity` is the number of outputs kept for [`reverse`](Self::reverse).
    pub fn with_params(capacity: usize, max_distance: u16, bits: u8) -> Self {
        let bits = bits.clamp(1, 16);
        Self {
            in_out: vec![SequenceNumber::default(); 1usize << bits],
            out_in: vec![None; capacity.max(1)],
            newest_output: None,
            first_input: 0,
            last_input: 0,
            last_output: 0,
            max_distance,
            bits,
            offset: 0,
            initialized: false,
            reset: false,
        }
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn capacity(&self) -> usize {
        self.out_in.len()
    }

    fn bounded(&self, number: u16) -> u16 {
        if self.bits >= 16 {
            number
        } else {
            number % (1u16 << self.bits)
        }
    }

    fn modulus(&self) -> u64 {
        1u64 << self.bits
    }

    fn input_slot(&self, input: u16) -> usize {
        input as usize % self.in_out.len()
    }

    fn history_slot(&self, extended_output: u64) -> usize {
        (extended_output % self.out_in.len() as u64) as usize
    }

    /// Unwraps an output being written to the value closest to the newest one.
    ///
    /// The first output starts one cycle in so that a late output never underflows.
    fn extend_output(&self, output: u16) -> u64 {
        let modulus = self.modulus();
        let output = output as u64 % modulus;
        let Some(newest) = self.newest_output else {
            return modulus + output;
        };
        let ahead = (output + modulus - newest % modulus) % modulus;
        if ahead < modulus / 2 {
            newest + ahead
        } else {
            newest.saturating_sub(modulus - ahead)
        }
    }

    /// Most recent recorded occurrence of `output`, with its history slot.
    fn recorded_output(&self, output: u16) -> Option<(usize, SequenceNumber)> {
        let newest = self.newest_output?;
        let modulus = self.modulus();
        let behind = (newest % modulus + modulus - output as u64 % modulus) % modulus;
        let extended_output = newest.checked_sub(behind)?;
        let slot = self.history_slot(extended_output);
        match self.out_in[slot] {
            Some(entry) if entry.extended_output == extended_output => Some((slot, entry.number)),
            _ => None,
        }
    }

    fn record_output(&mut self, sequence_number: SequenceNumber) {
        let extended_output = self.extend_output(sequence_number.output);
        if self.newest_output.is_none_or(|newest| extended_output > newest) {
            self.newest_output = Some(extended_output);
        }
        let slot = self.history_slot(extended_output);
        self.out_in[slot] = Some(HistoryEntry {
            extended_output,
            number: sequence_number,
        });
    }

    fn less_than(&self, first: u16, second: u16) -> bool {
        number_less_than(first, second, self.bits)
    }

    fn add(&mut self, sequence_number: SequenceNumber) {
        let input_slot = self.input_slot(sequence_number.input);
        self.in_out[input_slot] = sequence_number;
        self.record_output(sequence_number);
    }

    /// Pre-assigns consecutive valid outputs to every input in `[first, last)` and
    /// returns the output the next packet gets.
    fn fill(&mut self, first: u16, last: u16) -> u16 {
        let last = self.bounded(last);
        let mut input = self.bounded(first);
        let mut output = self.bounded(
            self.last_output
                .wrapping_add(self.offset)
                .wrapping_add(1),
        );
        while self.less_than(input, last) {
            self.add(SequenceNumber::new(
                input,
                output,
                SequenceNumberKind::Valid,
            ));
            input = self.bounded(input.wrapping_add(1));
            output = self.bounded(output.wrapping_add(1));
        }
        output
    }

    fn update_last_output(&mut self, skip: bool, output: u16) {
        let first_packet = !self.initialized && !(self.reset || self.offset > 0);
        if !skip && (self.less_than(self.last_output, output) || first_packet) {
            self.last_output = output;
        }
    }

    /// Recorded mapping for `input`, without changing any state.
    ///
    /// Returns `Skip` with zeroed numbers when `input` is not recorded.
    pub fn get_existing(&self, input: u16) -> SequenceNumber {
        let result = self.in_out[self.input_slot(input)];
        if result.input == input {
            result
        } else {
            SequenceNumber::new(0, 0, SequenceNumberKind::Skip)
        }
    }

    /// Translates `input`, dropping it from the output space when `skip` is set.
    pub fn get(&mut self, input: u16, skip: bool) -> SequenceNumber {
        let kind = if skip {
            SequenceNumberKind::Skip
        } else {
            SequenceNumberKind::Valid
        };

        if !self.initialized {
            let output = if self.reset || self.offset > 0 {
                self.last_output
                    .wrapping_add(self.offset)
                    .wrapping_add(1)
            } else {
                input
            };
            let output = self.bounded(output);
            self.add(SequenceNumber::new(input, output, kind));
            self.update_last_output(skip, output);
            if !skip {
                self.last_input = input;
                self.first_input = input;
                self.initialized = true;
                self.reset = false;
                self.offset = 0;
            }
            return self.get_existing(input);
        }

        if self.less_than(input, self.first_input) {
            trace!(
                "input {} is behind the validity window starting at {}",
                input, self.first_input
            );
            return SequenceNumber::new(input, 0, SequenceNumberKind::Skip);
        }

        if self.less_than(self.last_input, input) {
            let output = self.fill(self.last_input.wrapping_add(1), input);
            self.update_last_output(skip, output);
            self.add(SequenceNumber::new(input, output, kind));
            self.last_input = input;

            let window_start = self.bounded(self.last_input.wrapping_sub(self.max_distance));
            if self.less_than(self.first_input, window_start) {
                self.first_input = window_start;
            }

            let result = self.get_existing(input);
            if !skip {
                self.offset = 0;
            }
            return result;
        }

        // late or retransmitted input: replay what was recorded
        let input_slot = self.input_slot(input);
        let mut result = self.in_out[input_slot];
        if result.kind == SequenceNumberKind::Valid {
            let kind = if skip {
                SequenceNumberKind::Discard
            } else {
                SequenceNumberKind::Valid
            };
            if let Some((slot, recorded)) = self.recorded_output(result.output) {
                if recorded.input == result.input {
                    if let Some(entry) = self.out_in[slot].as_mut() {
                        entry.number.kind = kind;
                    }
                }
            }
            result.kind = kind;
            self.in_out[input_slot] = result;
        }
        self.update_last_output(skip, result.output);
        result
    }

    /// Allocates an output with no input, e.g. for padding.
    pub fn generate(&mut self) -> SequenceNumber {
        self.offset = self.offset.wrapping_add(1);
        let output = self.bounded(self.last_output.wrapping_add(self.offset));
        let sequence_number = SequenceNumber::new(0, output, SequenceNumberKind::Generated);
        self.record_output(sequence_number);
        sequence_number
    }

    /// Maps an output back to its input.
    ///
    /// An output that occurs several times over the rollovers resolves to its most
    /// recent occurrence. Returns `Discard` with input 0 when the output is unknown or
    /// has been evicted from the history.
    pub fn reverse(&self, output: u16) -> SequenceNumber {
        match self.recorded_output(output) {
            Some((_, recorded)) => recorded,
            None => SequenceNumber::new(0, output, SequenceNumberKind::Discard),
        }
    }

    /// Forgets the input and output history. The next valid packet continues the
    /// output space.
    pub fn reset(&mut self) {
        if !self.initialized {
            return;
        }
        self.initialized = false;
        self.reset = true;
        self.first_input = 0;
        self.last_input = 0;
        self.newest_output = None;
        self.in_out.fill(SequenceNumber::default());
        self.out_in.fill(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::SequenceNumberKind as K;

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Forward,
        Skip,
        Generate,
        Reset,
    }

    fn run(translator: &mut SequenceNumberTranslator, steps: &[(u16, Op, u16, K)]) {
        for (i, &(input, op, expected_output, expected_kind)) in steps.iter().enumerate() {
            let result = match op {
                Op::Reset => {
                    translator.reset();
                    continue;
                }
                Op::Generate => translator.generate(),
                Op::Forward => translator.get(input, false),
                Op::Skip => translator.get(input, true),
            };
            assert_eq!(
                result.kind, expected_kind,
                "step {}: unexpected kind for input {}",
                i, input
            );
            if result.kind == K::Valid {
                assert_eq!(
                    result.output, expected_output,
                    "step {}: unexpected output for input {}",
                    i, input
                );
                assert_eq!(result.input, input, "step {}: input not preserved", i);
            }
            if result.kind == K::Generated {
                assert_eq!(
                    result.output, expected_output,
                    "step {}: unexpected generated output",
                    i
                );
            }
        }
    }

    fn run_all(steps: &[(u16, Op, u16, K)]) {
        run(&mut SequenceNumberTranslator::new(), steps);
        run(&mut SequenceNumberTranslator::for_picture_ids(), steps);
    }

    #[test]
    fn test_in_order_packets_keep_their_numbers() {
        run_all(&[
            (5, Op::Forward, 5, K::Valid),
            (6, Op::Forward, 6, K::Valid),
            (7, Op::Forward, 7, K::Valid),
            (8, Op::Forward, 8, K::Valid),
        ]);
    }

    #[test]
    fn test_reordered_packet_gets_its_gap_slot() {
        run_all(&[
            (5, Op::Forward, 5, K::Valid),
            (6, Op::Forward, 6, K::Valid),
            (8, Op::Forward, 8, K::Valid),
            (7, Op::Forward, 7, K::Valid),
        ]);
    }

    #[test]
    fn test_skip_does_not_advance_output() {
        run_all(&[
            (5, Op::Forward, 5, K::Valid),
            (6, Op::Forward, 6, K::Valid),
            (7, Op::Skip, 7, K::Skip),
            (8, Op::Forward, 7, K::Valid),
            (9, Op::Forward, 8, K::Valid),
        ]);
    }

    #[test]
    fn test_skip_output_equals_next_valid_output() {
        let mut translator = SequenceNumberTranslator::new();
        translator.get(5, false);
        translator.get(6, false);
        let skipped = translator.get(7, true);
        let next = translator.get(8, false);
        assert_eq!(skipped.output, 7);
        assert_eq!(next.output, 7);
    }

    #[test]
    fn test_late_skipped_packet_is_discarded() {
        run_all(&[
            (5, Op::Forward, 5, K::Valid),
            (6, Op::Forward, 6, K::Valid),
            (8, Op::Forward, 8, K::Valid),
            (7, Op::Skip, 7, K::Discard),
            (9, Op::Forward, 9, K::Valid),
        ]);
    }

    #[test]
    fn test_retransmissions_replay_recorded_mapping() {
        run_all(&[
            (5, Op::Forward, 5, K::Valid),
            (6, Op::Forward, 6, K::Valid),
            (7, Op::Forward, 7, K::Valid),
            (8, Op::Forward, 8, K::Valid),
            (7, Op::Forward, 7, K::Valid),
        ]);
        run_all(&[
            (5, Op::Forward, 5, K::Valid),
            (6, Op::Forward, 6, K::Valid),
            (7, Op::Skip, 7, K::Skip),
            (8, Op::Forward, 7, K::Valid),
            (7, Op::Skip, 7, K::Skip),
        ]);
    }

    #[test]
    fn test_rollover() {
        let mut translator = SequenceNumberTranslator::new();
        run(
            &mut translator,
            &[
                (65535, Op::Forward, 65535, K::Valid),
                (0, Op::Forward, 0, K::Valid),
            ],
        );

        let mut translator = SequenceNumberTranslator::new();
        run(
            &mut translator,
            &[
                (65535, Op::Forward, 65535, K::Valid),
                (1, Op::Forward, 1, K::Valid),
                (0, Op::Forward, 0, K::Valid),
            ],
        );
    }

    #[test]
    fn test_rollover_with_skipped_packets() {
        run(
            &mut SequenceNumberTranslator::new(),
            &[
                (65535, Op::Forward, 65535, K::Valid),
                (0, Op::Skip, 0, K::Skip),
                (1, Op::Forward, 0, K::Valid),
                (2, Op::Forward, 1, K::Valid),
            ],
        );
        run(
            &mut SequenceNumberTranslator::new(),
            &[
                (65535, Op::Forward, 65535, K::Valid),
                (1, Op::Forward, 1, K::Valid),
                (0, Op::Skip, 0, K::Discard),
                (2, Op::Forward, 2, K::Valid),
            ],
        );
    }

    #[test]
    fn test_picture_id_rollover() {
        run(
            &mut SequenceNumberTranslator::for_picture_ids(),
            &[
                (32767, Op::Forward, 32767, K::Valid),
                (0, Op::Forward, 0, K::Valid),
            ],
        );
        run(
            &mut SequenceNumberTranslator::for_picture_ids(),
            &[
                (32767, Op::Forward, 32767, K::Valid),
                (1, Op::Forward, 1, K::Valid),
                (0, Op::Forward, 0, K::Valid),
            ],
        );
        run(
            &mut SequenceNumberTranslator::for_picture_ids(),
            &[
                (32767, Op::Forward, 32767, K::Valid),
                (0, Op::Skip, 0, K::Skip),
                (1, Op::Forward, 0, K::Valid),
                (2, Op::Forward, 1, K::Valid),
            ],
        );
    }

    #[test]
    fn test_reset_after_skipped_packets() {
        run(
            &mut SequenceNumberTranslator::new(),
            &[
                (5059, Op::Skip, 5059, K::Skip),
                (0, Op::Reset, 0, K::Skip),
                (1032, Op::Skip, 1032, K::Skip),
                (0, Op::Reset, 0, K::Skip),
                (23537, Op::Forward, 23537, K::Valid),
            ],
        );
        run(
            &mut SequenceNumberTranslator::new(),
            &[
                (5058, Op::Forward, 5058, K::Valid),
                (5059, Op::Skip, 5059, K::Skip),
                (0, Op::Reset, 0, K::Skip),
                (23537, Op::Forward, 5059, K::Valid),
            ],
        );
    }

    #[test]
    fn test_reset_continues_output_space() {
        run(
            &mut SequenceNumberTranslator::new(),
            &[
                (50000, Op::Forward, 50000, K::Valid),
                (0, Op::Reset, 0, K::Skip),
                (23537, Op::Forward, 50001, K::Valid),
                (23538, Op::Forward, 50002, K::Valid),
            ],
        );
        run(
            &mut SequenceNumberTranslator::new(),
            &[
                (6, Op::Forward, 6, K::Valid),
                (10, Op::Skip, 10, K::Skip),
                (0, Op::Reset, 0, K::Skip),
                (301, Op::Skip, 7, K::Skip),
                (0, Op::Reset, 0, K::Skip),
                (901, Op::Forward, 7, K::Valid),
            ],
        );
        run(
            &mut SequenceNumberTranslator::new(),
            &[
                (6, Op::Forward, 6, K::Valid),
                (10, Op::Skip, 10, K::Skip),
                (9, Op::Forward, 9, K::Valid),
                (0, Op::Reset, 0, K::Skip),
                (301, Op::Skip, 10, K::Skip),
                (0, Op::Reset, 0, K::Skip),
                (901, Op::Forward, 10, K::Valid),
            ],
        );
    }

    #[test]
    fn test_generated_outputs() {
        run(
            &mut SequenceNumberTranslator::new(),
            &[
                (0, Op::Generate, 1, K::Generated),
                (6, Op::Forward, 2, K::Valid),
                (7, Op::Forward, 3, K::Valid),
                (8, Op::Forward, 4, K::Valid),
            ],
        );
        run(
            &mut SequenceNumberTranslator::new(),
            &[
                (5, Op::Forward, 5, K::Valid),
                (0, Op::Generate, 6, K::Generated),
                (0, Op::Generate, 7, K::Generated),
                (6, Op::Forward, 8, K::Valid),
                (0, Op::Generate, 9, K::Generated),
                (0, Op::Generate, 10, K::Generated),
                (7, Op::Forward, 11, K::Valid),
            ],
        );
        run(
            &mut SequenceNumberTranslator::new(),
            &[
                (5, Op::Forward, 5, K::Valid),
                (6, Op::Skip, 6, K::Skip),
                (0, Op::Generate, 6, K::Generated),
                (7, Op::Skip, 7, K::Skip),
                (8, Op::Forward, 7, K::Valid),
            ],
        );
    }

    #[test]
    fn test_generated_outputs_survive_reset() {
        run(
            &mut SequenceNumberTranslator::new(),
            &[
                (6, Op::Forward, 6, K::Valid),
                (10, Op::Skip, 10, K::Skip),
                (0, Op::Generate, 7, K::Generated),
                (0, Op::Reset, 0, K::Skip),
                (301, Op::Skip, 301, K::Skip),
                (0, Op::Reset, 0, K::Skip),
                (901, Op::Forward, 8, K::Valid),
            ],
        );
        run(
            &mut SequenceNumberTranslator::new(),
            &[
                (5059, Op::Skip, 5059, K::Skip),
                (30, Op::Forward, 30, K::Valid),
                (0, Op::Generate, 31, K::Generated),
                (0, Op::Reset, 0, K::Skip),
                (0, Op::Generate, 32, K::Generated),
                (0, Op::Reset, 0, K::Skip),
                (6, Op::Forward, 33, K::Valid),
            ],
        );
    }

    #[test]
    fn test_multiple_loops_of_valid_packets() {
        let mut translator = SequenceNumberTranslator::new();
        for i in 0..=(65536u32 * 2) {
            let input = (i % 65536) as u16;
            let result = translator.get(input, false);
            assert_eq!(result.kind, K::Valid);
            assert_eq!(result.output, input, "iteration {}", i);
        }
    }

    #[test]
    fn test_multiple_loops_of_skipped_packets() {
        let mut translator = SequenceNumberTranslator::new();
        translator.get(5, false);
        for i in 0..=(65536u32 * 2) {
            let input = ((i + 6) % 65536) as u16;
            assert_eq!(translator.get(input, true).kind, K::Skip, "iteration {}", i);
        }
        let mut with_generate = translator.clone();

        let result = translator.get(7, false);
        assert_eq!((result.output, result.kind), (6, K::Valid));

        assert_eq!(with_generate.generate().output, 6);
        let result = with_generate.get(7, false);
        assert_eq!((result.output, result.kind), (7, K::Valid));
    }

    #[test]
    fn test_multiple_loops_of_generated_packets() {
        let mut translator = SequenceNumberTranslator::new();
        translator.get(5, false);
        for _ in 0..=(65535u32 * 2) {
            assert_eq!(translator.generate().kind, K::Generated);
        }
        assert_eq!(translator.get(6, true).kind, K::Skip);
        let result = translator.get(7, false);
        assert_eq!((result.output, result.kind), (5, K::Valid));
    }

    #[test]
    fn test_reverse_reproduces_unskipped_inputs() {
        let mut translator = SequenceNumberTranslator::new();
        let mut forwarded = vec![];
        for input in 100u16..160 {
            let skip = input % 7 == 0;
            let result = translator.get(input, skip);
            if !skip {
                forwarded.push(result);
            }
        }
        for original in forwarded {
            assert_eq!(translator.reverse(original.output), original);
        }
    }

    #[test]
    fn test_reverse_of_unknown_or_old_output() {
        let mut translator = SequenceNumberTranslator::new();
        translator.get(5, false);
        assert_eq!(
            translator.reverse(900),
            SequenceNumber::new(0, 900, K::Discard)
        );

        // evicted once the history wraps
        let mut translator = SequenceNumberTranslator::with_params(64, 500, 16);
        for input in 0u16..=1000 {
            translator.get(input, false);
        }
        assert_eq!(
            translator.reverse(10),
            SequenceNumber::new(0, 10, K::Discard)
        );
        assert_eq!(translator.reverse(990).input, 990);
        assert_eq!(translator.reverse(937).input, 937);
        assert_eq!(translator.reverse(936).kind, K::Discard);
    }

    #[test]
    fn test_reverse_outlives_input_window() {
        let mut translator = SequenceNumberTranslator::new();
        for input in 10000u16..12000 {
            translator.get(input, false);
        }
        assert_eq!(
            translator.reverse(10000),
            SequenceNumber::new(10000, 10000, K::Valid)
        );
        assert_eq!(translator.reverse(11999).input, 11999);
    }

    #[test]
    fn test_reverse_across_rollovers() {
        let mut translator = SequenceNumberTranslator::new();
        let mut input = 0u16;
        for _ in 0..(3 * 65536 + 100) {
            translator.get(input, input % 10 == 0);
            input = input.wrapping_add(1);
        }
        // the newest occurrence of an output wins over older cycles
        let newest = translator.reverse(translator.get_existing(input.wrapping_sub(1)).output);
        assert_eq!(newest.input, input.wrapping_sub(1));
        assert_eq!(newest.kind, K::Valid);
        assert_eq!(translator.capacity(), 4 * 65536);
    }

    #[test]
    fn test_inputs_behind_window_are_skipped() {
        let mut translator = SequenceNumberTranslator::new();
        for input in 0u16..=1000 {
            translator.get(input, false);
        }
        assert_eq!(
            translator.get(100, false),
            SequenceNumber::new(100, 0, K::Skip)
        );
    }

    #[test]
    fn test_get_existing() {
        let mut translator = SequenceNumberTranslator::new();
        translator.get(5, false);
        assert_eq!(translator.get_existing(5), SequenceNumber::new(5, 5, K::Valid));
        assert_eq!(translator.get_existing(6), SequenceNumber::new(0, 0, K::Skip));
    }
}
