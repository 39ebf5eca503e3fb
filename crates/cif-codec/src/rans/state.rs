//! The 64-bit rANS encode/decode state machine.
//!
//! Both sides share the same renormalization invariant: the state always
//! lives in `[STATE_MIN, STATE_MAX]` outside of the brief window where a
//! symbol is being folded in. Encoding pushes one 16-bit block at a time to
//! keep the *post-encode* state in range; decoding pops blocks to keep the
//! *post-decode* state in range. Because the encoder appends to a
//! [`ReverseBlockStream`] and the decoder pops from its tail, a stream the
//! encoder produced can be handed to the decoder with no copy or
//! re-reversal — see [`crate::io::ReverseBlockStream`] for why that works.
//!
//! Neither side stores the [`CdfTable`] it's coding against: tiles share one
//! table across many lazily-resumed decode sessions, so the table is passed
//! in per call rather than borrowed for the encoder/decoder's own lifetime —
//! see the "Rc not Arc" note in the design ledger for why the owner (`Tile`)
//! holds the table instead.

use crate::io::ReverseBlockStream;
use crate::rans::table::{CdfTable, Lookup, SymbolLocation};
use crate::rans::PROBABILITY_RANGE as M;

const STATE_MIN: u64 = M as u64;

/// Encodes a sequence of symbols against a [`CdfTable`] into a rANS stream.
///
/// Symbols must be added in the **reverse** of the order the decoder should
/// read them, since rANS is a stack: the first symbol added is the last one
/// a decoder reads off. Callers that already produce symbols top-layer-first
/// (as [`crate::wavelet::encode::EncodePyramid::wavelet_values`] does) feed
/// them here in that same order and get a stream whose decode order matches
/// — see the module-level note on why the two reversals cancel out.
#[derive(Debug, Default)]
pub struct RansEncoder {
    state: u64,
    stream: ReverseBlockStream,
}

impl RansEncoder {
    /// Starts a new encoder at the canonical initial state.
    pub fn new() -> Self {
        Self { state: STATE_MIN, stream: ReverseBlockStream::new() }
    }

    /// Folds one symbol into the state, renormalizing first if needed.
    ///
    /// A slow-path symbol folds in two distributions: the sub-index first,
    /// then the group. The decoder undoes the *last*-applied transform
    /// first, so it reads the group before the sub-index — see
    /// [`RansDecoder::read_symbol`].
    pub fn add_symbol(&mut self, table: &CdfTable, symbol: u16) {
        match table.symbol_location(symbol) {
            SymbolLocation::Fast(idx) => {
                let (pdf, cdf) = table.group_pdf_cdf(idx);
                self.encode_step(pdf, cdf);
            }
            SymbolLocation::Slow(idx) => {
                let members = table.group_members(idx);
                let count = members.len() as u32;
                let sub_pdf = (M - 1) / count;
                let sub_index = members.iter().position(|&s| s == symbol).unwrap() as u32;
                self.encode_step(sub_pdf, sub_index * sub_pdf);

                let (pdf, cdf) = table.group_pdf_cdf(idx);
                self.encode_step(pdf, cdf);
            }
            SymbolLocation::Raw => {
                let (pdf, cdf) = table.raw_pdf_cdf();
                self.encode_step(pdf, cdf);
                self.stream.push(symbol);
            }
        }
    }

    /// Folds one `(pdf, cdf)` distribution into the rANS state, renormalizing
    /// the *current* state down into range first so the post-encode state
    /// lands within `[STATE_MIN, STATE_MAX]`.
    fn encode_step(&mut self, pdf: u32, cdf: u32) {
        let pdf = pdf as u64;
        let cdf = cdf as u64;
        let x_max = (M as u64) * pdf;
        while self.state >= x_max {
            self.stream.push((self.state & 0xFFFF) as u16);
            self.state >>= 16;
        }
        self.state = (self.state / pdf) * (M as u64) + cdf + (self.state % pdf);
    }

    /// Finishes encoding, returning the final state (stored in the block
    /// header) and the renormalization block stream (the block body, written
    /// via [`crate::io::write_block_run`] on `stream.into_blocks()`).
    pub fn finish(self) -> (u64, ReverseBlockStream) {
        (self.state, self.stream)
    }
}

/// Decodes a rANS stream back into its original symbol sequence.
#[derive(Debug)]
pub struct RansDecoder {
    state: u64,
    stream: ReverseBlockStream,
}

impl RansDecoder {
    /// Resumes decoding from a block's final encoder state and its
    /// renormalization block stream.
    pub fn new(final_state: u64, stream: ReverseBlockStream) -> Self {
        Self { state: final_state, stream }
    }

    /// Decodes one symbol against `table`, renormalizing after to restore
    /// the invariant.
    pub fn read_symbol(&mut self, table: &CdfTable) -> u16 {
        let p = (self.state % M as u64) as u32;
        match table.lookup(p) {
            Lookup::Fast { symbol } => {
                let (pdf, cdf) = match table.symbol_location(symbol) {
                    SymbolLocation::Fast(idx) => table.group_pdf_cdf(idx),
                    _ => unreachable!("lookup(p) and symbol_location disagree"),
                };
                self.decode_step(p, pdf, cdf);
                symbol
            }
            Lookup::Slow { start, count } => {
                let group_idx = table.group_at_start(start);
                let (pdf, cdf) = table.group_pdf_cdf(group_idx);
                self.decode_step(p, pdf, cdf);

                let p2 = (self.state % M as u64) as u32;
                let sub_pdf = (M - 1) / count as u32;
                let sub_index = (p2 / sub_pdf).min(count as u32 - 1);
                self.decode_step(p2, sub_pdf, sub_index * sub_pdf);

                table.group_members(group_idx)[sub_index as usize]
            }
            Lookup::Raw => {
                let (pdf, cdf) = table.raw_pdf_cdf();
                self.decode_step(p, pdf, cdf);
                self.stream.pop().expect("raw-escape symbol with no literal block left")
            }
        }
    }

    /// True while there's still state or renormalization data to read a
    /// symbol from.
    pub fn has_data(&self) -> bool {
        self.state != STATE_MIN || !self.stream.is_empty()
    }

    fn decode_step(&mut self, p: u32, pdf: u32, cdf: u32) {
        self.state = (self.state / M as u64) * pdf as u64 + p as u64 - cdf as u64;
        while self.state < STATE_MIN {
            let block = self.stream.pop().unwrap_or(0) as u64;
            self.state = (self.state << 16) | block;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn table_from(symbols: &[u16]) -> CdfTable {
        let mut hist = HashMap::new();
        for &s in symbols {
            *hist.entry(s).or_insert(0u64) += 1;
        }
        CdfTable::build(&hist)
    }

    fn roundtrip(symbols: &[u16]) {
        let table = table_from(symbols);
        let mut encoder = RansEncoder::new();
        // push in reverse so the decoder reads them back in original order
        for &s in symbols.iter().rev() {
            encoder.add_symbol(&table, s);
        }
        let (final_state, stream) = encoder.finish();

        let mut decoder = RansDecoder::new(final_state, stream);
        let mut decoded = Vec::with_capacity(symbols.len());
        for _ in 0..symbols.len() {
            decoded.push(decoder.read_symbol(&table));
        }
        assert_eq!(decoded, symbols);
    }

    #[test]
    fn roundtrips_a_skewed_distribution() {
        let mut symbols = vec![0u16; 900];
        symbols.extend(std::iter::repeat(1u16).take(90));
        symbols.extend(std::iter::repeat(2u16).take(10));
        roundtrip(&symbols);
    }

    #[test]
    fn roundtrips_a_uniform_distribution() {
        let symbols: Vec<u16> = (0..64).cycle().take(256).collect();
        roundtrip(&symbols);
    }

    #[test]
    fn roundtrips_through_the_raw_escape_band() {
        let mut symbols = vec![0u16; 5000];
        for s in 1..300u16 {
            symbols.push(s);
        }
        roundtrip(&symbols);
    }

    #[test]
    fn roundtrips_a_single_symbol_repeated() {
        roundtrip(&[7u16; 50]);
    }
}
