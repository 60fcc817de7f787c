//! Fee-rate estimation from the mempool histogram and historical estimates.
//!
//! Fee rates are integers in sat/vB. The fast rate comes from the mempool
//! histogram (what it takes to land in the next block); medium and slow are
//! scaled from the historical `estimatefee` ratios so they track the fast
//! rate without ever exceeding it.

use serde::{Deserialize, Serialize};

use brook_core::constants::{
    FEE_HISTOGRAM_SANITY_LIMIT, HISTOGRAM_FLATTEN_STEP, MIN_FAST_FEE_RATE, MIN_FEE_RATE,
    VBYTES_PER_BLOCK,
};

/// Mempool fee histogram: `(fee rate sat/vB, vsize)` pairs, highest rate first.
pub type FeeHistogram = Vec<(f64, u64)>;

/// Fee rates for three confirmation targets, sat/vB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimates {
    pub fast: u64,
    pub medium: u64,
    pub slow: u64,
}

/// Convert an `estimatefee` result in BTC/kB to sat/vB.
///
/// `-1` (no estimate available) and any other negative value map to 1.
pub fn btc_per_kb_to_sat_per_vbyte(btc_per_kb: f64) -> u64 {
    if !btc_per_kb.is_finite() || btc_per_kb < 0.0 {
        return MIN_FEE_RATE;
    }
    (btc_per_kb / 1024.0 * 100_000_000.0).round() as u64
}

/// `blockchain.relayfee` BTC/kB → sat/kvB.
pub fn btc_per_kb_to_sat_per_kvb(btc_per_kb: f64) -> u64 {
    if !btc_per_kb.is_finite() || btc_per_kb < 0.0 {
        return 0;
    }
    (btc_per_kb * 100_000_000.0).round() as u64
}

/// Median fee rate of the transactions that fit in the next `blocks` blocks.
pub fn fee_from_histogram(blocks: u32, histogram: &[(f64, u64)]) -> u64 {
    let budget = VBYTES_PER_BLOCK.saturating_mul(u64::from(blocks));
    let mut total = 0u64;
    let mut taken: Vec<(f64, u64)> = Vec::new();
    for &(fee, vsize) in histogram {
        if total >= budget {
            break;
        }
        let room = budget - total;
        let used = vsize.min(room);
        total += used;
        taken.push((fee, used));
    }

    // Weight each bucket by its size in flatten steps.
    let mut flat: Vec<f64> = Vec::new();
    for (fee, vsize) in taken {
        let copies = (vsize as f64 / HISTOGRAM_FLATTEN_STEP as f64).round() as usize;
        flat.extend(std::iter::repeat_n(fee, copies));
    }
    flat.sort_by(f64::total_cmp);

    let median = percentile(&flat, 0.5);
    let rounded = median.round();
    if rounded < 1.0 { 1 } else { rounded as u64 }
}

/// Linear-interpolated percentile of a sorted slice. Empty input gives 0.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (sorted.len() - 1) as f64 * p;
    let lower = index.floor() as usize;
    let upper = lower + 1;
    let weight = index % 1.0;
    if upper >= sorted.len() {
        return sorted[lower];
    }
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Blend the histogram-derived fast rate with historical estimates.
///
/// If the histogram is missing or its first bucket exceeds the sanity
/// limit, `historical` is returned as-is. Buckets arrive highest fee rate
/// first, so the first bucket bounds every other one: when it passes, the
/// lowest bucket passes too. Otherwise `fast >= 2`, and
/// `slow <= medium <= fast` with both at least 1.
pub fn blend(histogram: Option<&[(f64, u64)]>, historical: FeeEstimates) -> FeeEstimates {
    let Some(histogram) = histogram else {
        return historical;
    };
    if histogram
        .first()
        .is_some_and(|(fee, _)| *fee > FEE_HISTOGRAM_SANITY_LIMIT)
    {
        return historical;
    }

    let fast = fee_from_histogram(1, histogram).max(MIN_FAST_FEE_RATE);
    let medium = scale(fast, historical.medium, historical.fast)
        .max(MIN_FEE_RATE)
        .min(fast);
    let slow = scale(fast, historical.slow, historical.fast)
        .max(MIN_FEE_RATE)
        .min(medium);

    FeeEstimates { fast, medium, slow }
}

fn scale(fast: u64, part: u64, whole: u64) -> u64 {
    if whole == 0 {
        return fast;
    }
    (fast as f64 * part as f64 / whole as f64).round() as u64
}
