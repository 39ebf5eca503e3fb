//! The two-level CDF table: fast-path groups (one symbol each), slow-path
//! groups (several equally-likely symbols sharing one modeled probability,
//! disambiguated by a uniform sub-index), and a raw-escape band for the
//! long tail of rare symbols that aren't worth modeling at all.
//!
//! Construction (`CdfTable::build`) follows the original encoder's five
//! passes: sort symbols by frequency, bin equal-frequency symbols into
//! groups, peel the least-frequent groups into the raw band while the
//! entropy cost of doing so stays small, quantize every remaining group's
//! probability to a 16-bit fixed point, and correct the quantized sum back
//! to exactly `M` by nudging the least-harmful group up or down one unit at
//! a time.

use std::collections::HashMap;
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::io::{read_u16, read_u32, write_u16, write_u32};
use crate::rans::{BLOCK_BITS, PROBABILITY_RANGE as M};

/// The fraction of the pre-raw-escape entropy cost an encoder is willing to
/// spend moving low-frequency groups into the raw band, in exchange for a
/// smaller, simpler symbol table. This is a tuning constant, not something a
/// decoder needs to know or agree with — different encoders may choose
/// differently and still produce streams this decoder reads correctly.
const RAW_ESCAPE_THRESHOLD_FRACTION: f64 = 0.01;

/// Where a symbol's probability mass lives within a [`CdfTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolLocation {
    /// A fast-path group: `group_idx` has exactly one member, itself.
    Fast(usize),
    /// A slow-path group: `group_idx` has more than one member, sharing
    /// `group_idx`'s modeled probability via a uniform sub-index.
    Slow(usize),
    /// Not modeled: encoded as a literal 16-bit block alongside the raw
    /// group's own (usually small) modeled probability.
    Raw,
}

/// What a decoder's cumulative-probability lookup resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// `symbol` decoded directly, no sub-index needed.
    Fast { symbol: u16 },
    /// `group_idx` decoded; the caller must still decode a uniform sub-index
    /// over `count` members starting at `start` in [`CdfTable::symbols`].
    Slow { start: usize, count: usize },
    /// The raw-escape band: the caller must read a literal block.
    Raw,
}

/// A built or deserialized two-level symbol table for one rANS stream.
#[derive(Debug, Clone)]
pub struct CdfTable {
    /// CDF of each real group, length `groups + 1`; the last entry is
    /// `raw_cdf`, so `group_cdfs[i+1] - group_cdfs[i]` is group `i`'s PDF.
    group_cdfs: Vec<u32>,
    /// Index of the first slow-path (multi-member) group. Groups before this
    /// are fast-path.
    pivot: usize,
    /// CDF at which the raw-escape band begins; `M - raw_cdf` is its PDF.
    raw_cdf: u32,
    /// Every group's members, concatenated in group order.
    symbols: Vec<u16>,
    /// Start offset into `symbols` for each group, length `groups + 1`.
    group_starts: Vec<usize>,
    /// Reverse index from symbol to its owning group, built from `symbols`.
    /// A symbol absent from this map lives in the raw-escape band.
    symbol_to_group: HashMap<u16, usize>,
}

impl CdfTable {
    /// Builds a table from a symbol frequency histogram.
    pub fn build(histogram: &HashMap<u16, u64>) -> Self {
        let total: u64 = histogram.values().sum();
        debug_assert!(total > 0, "cannot build a CDF table for an empty histogram");

        let mut sorted: Vec<(u16, u64)> = histogram.iter().map(|(&s, &c)| (s, c)).collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut groups = bin_by_equal_count(sorted);
        let raw_symbols = peel_raw_escape_tail(&mut groups, total);

        let mut qgroups = quantize(&groups, total);
        // Even when no symbol is actually retained for the raw band, its PDF is
        // floored to 1 rather than 0: `cdfStart` is serialized as `u16`, and a
        // raw band that starts exactly at `M` (65536) would overflow that field.
        // Reserving one unit of probability mass keeps `raw_cdf < M` always
        // representable, at the cost of a single unit of coding efficiency that
        // no real symbol ever spends (see the lookup table's `Raw` arm, which is
        // unreachable for this table's own encoder output in that case).
        let mut raw_pdf = quantize_one(
            raw_symbols.iter().map(|&s| histogram[&s]).sum::<u64>().max(1),
            total,
        );
        correct_to_exact_sum(&mut qgroups, &mut raw_pdf);

        merge_equal_pdf_groups(&mut qgroups);
        // fast-path (single member) groups first, then slow-path, each class
        // keeping its existing (frequency-descending) relative order.
        qgroups.sort_by_key(|g| g.symbols.len() > 1);

        let mut symbols = Vec::new();
        let mut group_starts = Vec::with_capacity(qgroups.len() + 1);
        let mut group_cdfs = Vec::with_capacity(qgroups.len() + 1);
        let mut cdf = 0u32;
        for g in &qgroups {
            group_starts.push(symbols.len());
            group_cdfs.push(cdf);
            symbols.extend_from_slice(&g.symbols);
            cdf += g.pdf;
        }
        group_starts.push(symbols.len());
        group_cdfs.push(cdf); // raw_cdf, duplicated as the trailing sentinel

        let pivot = qgroups.iter().take_while(|g| g.symbols.len() == 1).count();

        let symbol_to_group = symbols
            .iter()
            .enumerate()
            .fold(HashMap::new(), |mut map, (sym_idx, &sym)| {
                let group_idx = group_starts.partition_point(|&s| s <= sym_idx) - 1;
                map.insert(sym, group_idx);
                map
            });

        CdfTable { group_cdfs, pivot, raw_cdf: cdf, symbols, group_starts, symbol_to_group }
    }

    /// Where `symbol`'s probability mass lives.
    pub fn symbol_location(&self, symbol: u16) -> SymbolLocation {
        match self.symbol_to_group.get(&symbol) {
            Some(&idx) if idx < self.pivot => SymbolLocation::Fast(idx),
            Some(&idx) => SymbolLocation::Slow(idx),
            None => SymbolLocation::Raw,
        }
    }

    /// A group's `(pdf, cdf)`.
    pub fn group_pdf_cdf(&self, group_idx: usize) -> (u32, u32) {
        let cdf = self.group_cdfs[group_idx];
        let pdf = self.group_cdfs[group_idx + 1] - cdf;
        (pdf, cdf)
    }

    /// A group's member symbols.
    pub fn group_members(&self, group_idx: usize) -> &[u16] {
        &self.symbols[self.group_starts[group_idx]..self.group_starts[group_idx + 1]]
    }

    /// The group index whose members begin at `start` in [`CdfTable::symbols`],
    /// as returned by [`Lookup::Slow`].
    pub fn group_at_start(&self, start: usize) -> usize {
        self.group_starts[..self.group_starts.len() - 1]
            .binary_search(&start)
            .expect("start offset must belong to a real group")
    }

    /// The raw-escape band's `(pdf, cdf)`.
    pub fn raw_pdf_cdf(&self) -> (u32, u32) {
        (M - self.raw_cdf, self.raw_cdf)
    }

    /// An approximate resident size of this table, for cache accounting.
    pub fn memory_footprint(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.group_cdfs.len() * std::mem::size_of::<u32>()
            + self.symbols.len() * std::mem::size_of::<u16>()
            + self.group_starts.len() * std::mem::size_of::<usize>()
            + self.symbol_to_group.len() * (std::mem::size_of::<u16>() + std::mem::size_of::<usize>())
    }

    /// Resolves a decoder's cumulative probability `p` (`0 <= p < M`) to a
    /// [`Lookup`].
    pub fn lookup(&self, p: u32) -> Lookup {
        if p >= self.raw_cdf {
            return Lookup::Raw;
        }
        let search_from = if p >= self.group_cdfs[self.pivot] { self.pivot } else { 0 };
        let idx = self.group_cdfs[search_from..]
            .partition_point(|&cdf| cdf <= p)
            - 1
            + search_from;
        if idx < self.pivot {
            Lookup::Fast { symbol: self.symbols[self.group_starts[idx]] }
        } else {
            let start = self.group_starts[idx];
            let count = self.group_starts[idx + 1] - start;
            Lookup::Slow { start, count }
        }
    }

    /// Writes this table in its on-disk form: a group count followed by each
    /// group's `(cdfStart, memberCount, members[])`, with the raw band and a
    /// trailing sentinel appended as zero-member pseudo-groups.
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        let num_groups = self.group_starts.len() - 1;
        write_u16(w, (num_groups + 2) as u16)?;
        for idx in 0..num_groups {
            write_u16(w, self.group_cdfs[idx] as u16)?;
            let members = self.group_members(idx);
            write_u32(w, members.len() as u32)?;
            for &sym in members {
                write_u16(w, sym)?;
            }
        }
        write_u16(w, self.raw_cdf as u16)?;
        write_u32(w, 0)?;
        write_u16(w, (M - 1) as u16)?;
        write_u32(w, 0)?;
        Ok(())
    }

    /// Reads a table back from its on-disk form.
    pub fn read(r: &mut impl Read) -> Result<Self> {
        let group_count = read_u16(r)? as usize;
        if group_count < 2 {
            return Err(Error::Format { reason: format!("symbol table has {group_count} groups, need at least 2 (raw + sentinel)") });
        }
        let real_groups = group_count - 2;

        let mut symbols = Vec::new();
        let mut group_starts = Vec::with_capacity(real_groups + 1);
        let mut group_cdfs = Vec::with_capacity(real_groups + 1);
        for _ in 0..real_groups {
            let cdf = read_u16(r)? as u32;
            let member_count = read_u32(r)? as usize;
            group_starts.push(symbols.len());
            group_cdfs.push(cdf);
            for _ in 0..member_count {
                symbols.push(read_u16(r)?);
            }
        }
        group_starts.push(symbols.len());

        let raw_cdf = read_u16(r)? as u32;
        let raw_member_count = read_u32(r)? as usize;
        if raw_member_count != 0 {
            return Err(Error::Format { reason: "raw-escape group must have no members".into() });
        }
        group_cdfs.push(raw_cdf);

        let _sentinel_cdf = read_u16(r)?;
        let sentinel_member_count = read_u32(r)? as usize;
        if sentinel_member_count != 0 {
            return Err(Error::Format { reason: "sentinel group must have no members".into() });
        }

        let pivot = (0..real_groups)
            .take_while(|&idx| group_starts[idx + 1] - group_starts[idx] == 1)
            .count();

        let symbol_to_group = symbols
            .iter()
            .enumerate()
            .fold(HashMap::new(), |mut map, (sym_idx, &sym)| {
                let group_idx = group_starts.partition_point(|&s| s <= sym_idx) - 1;
                map.insert(sym, group_idx);
                map
            });

        Ok(CdfTable { group_cdfs, pivot, raw_cdf, symbols, group_starts, symbol_to_group })
    }
}

/// One group before final quantization: a set of symbols sharing a raw
/// occurrence count, and the total number of occurrences across all of them.
struct RawGroup {
    occurrences: u64,
    symbols: Vec<u16>,
}

/// One group after quantization: its final 16-bit PDF.
struct QGroup {
    pdf: u32,
    symbols: Vec<u16>,
}

fn bin_by_equal_count(sorted: Vec<(u16, u64)>) -> Vec<RawGroup> {
    let mut groups: Vec<RawGroup> = Vec::new();
    for (symbol, count) in sorted {
        match groups.last_mut() {
            Some(g) if g.occurrences / (g.symbols.len() as u64) == count => {
                g.occurrences += count;
                g.symbols.push(symbol);
            }
            _ => groups.push(RawGroup { occurrences: count, symbols: vec![symbol] }),
        }
    }
    groups
}

/// Moves the least-frequent tail of `groups` into the raw-escape band,
/// stopping once doing so further would cost more than
/// [`RAW_ESCAPE_THRESHOLD_FRACTION`] of the pre-raw-escape entropy.
fn peel_raw_escape_tail(groups: &mut Vec<RawGroup>, total: u64) -> Vec<u16> {
    let total_f = total as f64;
    // `g.occurrences` is already the group's total occurrence count, so the
    // per-symbol probability is `(occurrences / n) / total`.
    let entropy_bits: f64 = groups
        .iter()
        .map(|g| {
            let p = (g.occurrences as f64 / g.symbols.len() as f64) / total_f;
            g.occurrences as f64 * -p.log2()
        })
        .sum();
    let threshold = RAW_ESCAPE_THRESHOLD_FRACTION * entropy_bits;

    let mut cumulative_extra = 0.0f64;
    let mut raw_group_count = 0usize;
    for g in groups.iter().rev() {
        let p = (g.occurrences as f64 / g.symbols.len() as f64) / total_f;
        let entropy_cost = g.occurrences as f64 * -p.log2();
        let raw_cost = g.occurrences as f64 * BLOCK_BITS as f64;
        let extra = raw_cost - entropy_cost;
        if cumulative_extra + extra > threshold {
            break;
        }
        cumulative_extra += extra;
        raw_group_count += 1;
    }

    let split_at = groups.len() - raw_group_count;
    groups.split_off(split_at).into_iter().flat_map(|g| g.symbols).collect()
}

fn quantize_one(occurrences: u64, total: u64) -> u32 {
    ((occurrences * M as u64) / total).max(1) as u32
}

fn quantize(groups: &[RawGroup], total: u64) -> Vec<QGroup> {
    groups
        .iter()
        .map(|g| QGroup { pdf: quantize_one(g.occurrences, total), symbols: g.symbols.clone() })
        .collect()
}

/// Nudges quantized PDFs (including the raw band, passed separately since it
/// has no member symbols) until they sum to exactly `M`, each step picking
/// whichever group the adjustment costs the least entropy.
fn correct_to_exact_sum(groups: &mut [QGroup], raw_pdf: &mut u32) {
    let sum = |groups: &[QGroup], raw: u32| -> i64 {
        groups.iter().map(|g| g.pdf as i64).sum::<i64>() + raw as i64
    };

    loop {
        let current = sum(groups, *raw_pdf);
        if current == M as i64 {
            break;
        }
        if current > M as i64 {
            // decrement whichever unit-sized group has the smallest entropy increase.
            let mut best: Option<(usize, f64)> = None;
            for (idx, g) in groups.iter().enumerate() {
                if g.pdf <= 1 {
                    continue;
                }
                let cost = (g.pdf as f64).log2() - (g.pdf as f64 - 1.0).log2();
                if best.map_or(true, |(_, b)| cost < b) {
                    best = Some((idx, cost));
                }
            }
            let raw_cost = if *raw_pdf > 1 {
                Some((*raw_pdf as f64).log2() - (*raw_pdf as f64 - 1.0).log2())
            } else {
                None
            };
            match (best, raw_cost) {
                (Some((idx, cost)), Some(rc)) if cost <= rc => groups[idx].pdf -= 1,
                (Some((idx, _)), None) => groups[idx].pdf -= 1,
                (_, Some(_)) => *raw_pdf -= 1,
                (None, None) => unreachable!("cannot shrink a table already at its minimum"),
            }
        } else {
            // increment whichever group currently carries the most probability mass.
            let best_idx = groups
                .iter()
                .enumerate()
                .max_by_key(|(_, g)| g.pdf)
                .map(|(idx, _)| idx);
            match best_idx {
                Some(idx) if groups[idx].pdf >= *raw_pdf => groups[idx].pdf += 1,
                _ => *raw_pdf += 1,
            }
        }
    }
}

fn merge_equal_pdf_groups(groups: &mut Vec<QGroup>) {
    let mut merged: Vec<QGroup> = Vec::with_capacity(groups.len());
    for g in groups.drain(..) {
        match merged.last_mut() {
            Some(last) if last.pdf == g.pdf => last.symbols.extend(g.symbols),
            _ => merged.push(g),
        }
    }
    *groups = merged;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn histogram(pairs: &[(u16, u64)]) -> HashMap<u16, u64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn quantized_pdfs_sum_to_m() {
        let hist = histogram(&[(0, 1000), (1, 500), (2, 250), (3, 1), (4, 1), (5, 1)]);
        let table = CdfTable::build(&hist);
        let (raw_pdf, raw_cdf) = table.raw_pdf_cdf();
        assert_eq!(raw_cdf, table.group_cdfs[table.group_cdfs.len() - 1]);
        let real_sum: u32 = (0..table.group_starts.len() - 1)
            .map(|idx| table.group_pdf_cdf(idx).0)
            .sum();
        assert_eq!(real_sum + raw_pdf, M);
    }

    #[test]
    fn fast_path_symbols_resolve_to_their_own_group() {
        let hist = histogram(&[(10, 10_000), (20, 1), (21, 1)]);
        let table = CdfTable::build(&hist);
        match table.symbol_location(10) {
            SymbolLocation::Fast(idx) => {
                assert_eq!(table.group_members(idx), &[10]);
            }
            other => panic!("expected Fast, got {other:?}"),
        }
    }

    #[test]
    fn lookup_resolves_every_cdf_value_consistently() {
        let hist = histogram(&[(0, 500), (1, 500), (2, 10), (3, 10), (4, 1)]);
        let table = CdfTable::build(&hist);
        for p in (0..M).step_by(257) {
            match table.lookup(p) {
                Lookup::Fast { symbol } => {
                    assert!(matches!(table.symbol_location(symbol), SymbolLocation::Fast(_)));
                }
                Lookup::Slow { count, .. } => assert!(count > 1),
                Lookup::Raw => {}
            }
        }
    }

    #[test]
    fn every_p_in_a_groups_cdf_range_resolves_to_that_group() {
        // For every group (including raw), every cumulative probability in its
        // [cdf, cdf+pdf) range must resolve back to exactly that group.
        let hist = histogram(&[(0, 500), (1, 500), (2, 10), (3, 10), (4, 1), (5, 1), (6, 1)]);
        let table = CdfTable::build(&hist);

        for idx in 0..table.group_starts.len() - 1 {
            let (pdf, cdf) = table.group_pdf_cdf(idx);
            for p in cdf..cdf + pdf {
                match table.lookup(p) {
                    Lookup::Fast { symbol } => {
                        assert_eq!(table.symbol_location(symbol), SymbolLocation::Fast(idx));
                    }
                    Lookup::Slow { start, .. } => assert_eq!(table.group_at_start(start), idx),
                    Lookup::Raw => panic!("p={p} in group {idx}'s range resolved to raw"),
                }
            }
        }

        let (raw_pdf, raw_cdf) = table.raw_pdf_cdf();
        for p in raw_cdf..raw_cdf + raw_pdf {
            assert!(matches!(table.lookup(p), Lookup::Raw));
        }
    }

    #[test]
    fn serialization_roundtrips() {
        let hist = histogram(&[(0, 500), (1, 500), (2, 10), (3, 10), (4, 1), (5, 1), (6, 1)]);
        let table = CdfTable::build(&hist);
        let mut buf = Vec::new();
        table.write(&mut buf).unwrap();
        let read_back = CdfTable::read(&mut buf.as_slice()).unwrap();
        assert_eq!(read_back.raw_cdf, table.raw_cdf);
        assert_eq!(read_back.symbols, table.symbols);
        assert_eq!(read_back.group_cdfs, table.group_cdfs);
    }

    #[test]
    fn raw_band_can_end_up_empty_of_real_symbols() {
        // A handful of roughly-equally-frequent symbols, no long tail: peeling
        // even the least-frequent group into the raw band costs more than 1%
        // of the pre-raw entropy, so nothing gets absorbed. The raw band still
        // carries a one-unit floor PDF (see the comment in `build`), but no
        // known symbol resolves to it.
        let hist = histogram(&[(0, 1000), (1, 1000), (2, 1000), (3, 1000)]);
        let table = CdfTable::build(&hist);
        for symbol in 0..4u16 {
            assert_ne!(table.symbol_location(symbol), SymbolLocation::Raw);
        }
        let (raw_pdf, raw_cdf) = table.raw_pdf_cdf();
        assert!(raw_cdf < M, "raw_cdf must stay representable in a u16 cdfStart");
        assert!(raw_pdf >= 1);
    }

    #[test]
    fn rare_symbols_can_end_up_in_the_raw_band() {
        let mut hist = HashMap::new();
        hist.insert(0u16, 100_000u64);
        for s in 1..200u16 {
            hist.insert(s, 1);
        }
        let table = CdfTable::build(&hist);
        assert!(matches!(table.symbol_location(150), SymbolLocation::Raw));
    }
}
