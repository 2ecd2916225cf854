/// bars.rs — Minute bars and timestamp alignment
use ahash::AHashMap;
use serde::Deserialize;

use crate::session::{self, Session};

/// One minute aggregate bar.
#[derive(Debug, Clone, Deserialize)]
pub struct Bar {
    /// Epoch milliseconds of the bar open.
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A reference-asset bar matched to a symbol bar at the same timestamp.
#[derive(Debug, Clone)]
pub struct AlignedBar {
    pub timestamp: i64,
    pub reference_close: f64,
    pub reference_volume: f64,
    pub symbol_close: f64,
    pub symbol_volume: f64,
    /// reference_close / symbol_close
    pub ratio: f64,
}

/// Split a day's bars into session buckets; bars outside both windows are
/// discarded.
pub fn split_sessions(bars: &[Bar]) -> (Vec<Bar>, Vec<Bar>) {
    let mut core = Vec::new();
    let mut extended = Vec::new();
    for bar in bars {
        match session::session_for_bar(bar.timestamp) {
            Some(Session::Core) => core.push(bar.clone()),
            Some(Session::Extended) => extended.push(bar.clone()),
            None => {}
        }
    }
    (core, extended)
}

/// Join reference and symbol bars on exact timestamps.  Timestamps missing on
/// either side, and bars with a non-positive close, are dropped.
pub fn align(reference: &[Bar], symbol: &[Bar]) -> Vec<AlignedBar> {
    let by_ts: AHashMap<i64, &Bar> = symbol.iter().map(|b| (b.timestamp, b)).collect();

    let mut aligned = Vec::with_capacity(reference.len().min(symbol.len()));
    for ref_bar in reference {
        let Some(sym_bar) = by_ts.get(&ref_bar.timestamp) else {
            continue;
        };
        if ref_bar.close <= 0.0 || sym_bar.close <= 0.0 {
            continue;
        }
        aligned.push(AlignedBar {
            timestamp: ref_bar.timestamp,
            reference_close: ref_bar.close,
            reference_volume: ref_bar.volume,
            symbol_close: sym_bar.close,
            symbol_volume: sym_bar.volume,
            ratio: ref_bar.close / sym_bar.close,
        });
    }
    aligned
}
