/// baseline.rs — Daily baseline-ratio statistics
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// Input: aligned minute bars for one (day, session), each carrying
///   r_i = reference_close_i / symbol_close_i   and volumes v_ref_i, v_sym_i.
///
/// EQUAL_MEAN
///   B = (1/n) Σ r_i
///
/// MEDIAN
///   r sorted ascending; middle element, or the mean of the two middle
///   elements on even n.
///
/// VWAP_RATIO
///   VWAP_ref = Σ(close_ref_i · v_ref_i) / Σ v_ref_i
///   VWAP_sym = Σ(close_sym_i · v_sym_i) / Σ v_sym_i
///   B = VWAP_ref / VWAP_sym
///   This is the ratio of VWAPs, NOT the mean of per-bar ratios; a single
///   high-volume bar moves it where EQUAL_MEAN barely notices.
///
/// VOL_WEIGHTED
///   B = Σ(r_i · v_sym_i) / Σ v_sym_i     (symbol bar volume as weight)
///
/// WINSORIZED
///   r sorted ascending; drop the lowest ⌊0.05·n⌋ and highest ⌊0.05·n⌋
///   elements by index, then average the remainder.
///
/// Every statistic yields None on empty input (or a zero weight sum) rather
/// than an error; only strictly positive values are persisted.  A missing
/// statistic is an absent row, never an error row.
/// ─────────────────────────────────────────────────────────────────────────
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::bars::{self, AlignedBar, Bar};
use crate::broker::MarketData;
use crate::error::{EngineError, Result};
use crate::models::{BaselineMethod, BaselineRow, ExecutionErrorRecord};
use crate::session::Session;
use crate::store::{AuditStore, BaselineStore};

pub fn equal_mean(aligned: &[AlignedBar]) -> Option<f64> {
    if aligned.is_empty() {
        return None;
    }
    let sum: f64 = aligned.iter().map(|b| b.ratio).sum();
    Some(sum / aligned.len() as f64)
}

pub fn median(aligned: &[AlignedBar]) -> Option<f64> {
    if aligned.is_empty() {
        return None;
    }
    let mut ratios: Vec<f64> = aligned.iter().map(|b| b.ratio).collect();
    ratios.sort_by(|a, b| a.partial_cmp(b).expect("ratios are finite"));
    let mid = ratios.len() / 2;
    if ratios.len() % 2 == 0 {
        Some((ratios[mid - 1] + ratios[mid]) / 2.0)
    } else {
        Some(ratios[mid])
    }
}

pub fn vwap_ratio(aligned: &[AlignedBar]) -> Option<f64> {
    if aligned.is_empty() {
        return None;
    }
    let mut ref_num = 0.0;
    let mut ref_den = 0.0;
    let mut sym_num = 0.0;
    let mut sym_den = 0.0;
    for bar in aligned {
        ref_num += bar.reference_close * bar.reference_volume;
        ref_den += bar.reference_volume;
        sym_num += bar.symbol_close * bar.symbol_volume;
        sym_den += bar.symbol_volume;
    }
    if ref_den == 0.0 || sym_den == 0.0 {
        return None;
    }
    let sym_vwap = sym_num / sym_den;
    if sym_vwap <= 0.0 {
        return None;
    }
    Some((ref_num / ref_den) / sym_vwap)
}

pub fn vol_weighted(aligned: &[AlignedBar]) -> Option<f64> {
    if aligned.is_empty() {
        return None;
    }
    let mut num = 0.0;
    let mut den = 0.0;
    for bar in aligned {
        num += bar.ratio * bar.symbol_volume;
        den += bar.symbol_volume;
    }
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}

pub fn winsorized(aligned: &[AlignedBar]) -> Option<f64> {
    if aligned.is_empty() {
        return None;
    }
    let mut ratios: Vec<f64> = aligned.iter().map(|b| b.ratio).collect();
    ratios.sort_by(|a, b| a.partial_cmp(b).expect("ratios are finite"));
    let cut = (ratios.len() as f64 * 0.05).floor() as usize;
    let kept = &ratios[cut..ratios.len() - cut];
    if kept.is_empty() {
        return None;
    }
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

pub fn compute(method: BaselineMethod, aligned: &[AlignedBar]) -> Option<f64> {
    match method {
        BaselineMethod::EqualMean => equal_mean(aligned),
        BaselineMethod::Median => median(aligned),
        BaselineMethod::VwapRatio => vwap_ratio(aligned),
        BaselineMethod::VolWeighted => vol_weighted(aligned),
        BaselineMethod::Winsorized => winsorized(aligned),
    }
}

/// One computed value for a (session, method).
#[derive(Debug, Clone)]
pub struct BaselineValue {
    pub session: Session,
    pub method: BaselineMethod,
    pub baseline: f64,
    pub sample_count: usize,
}

/// All strictly positive statistics for one session bucket.
pub fn session_baselines(session: Session, aligned: &[AlignedBar]) -> Vec<BaselineValue> {
    BaselineMethod::ALL
        .iter()
        .filter_map(|&method| {
            compute(method, aligned)
                .filter(|b| *b > 0.0)
                .map(|baseline| BaselineValue {
                    session,
                    method,
                    baseline,
                    sample_count: aligned.len(),
                })
        })
        .collect()
}

/// Session-split, align, and compute both buckets for one trading day.
///
/// A day with no aligned bars in either session is a hard failure for the
/// symbol; a single absent statistic is not.
pub fn compute_day(
    symbol: &str,
    day: NaiveDate,
    reference_bars: &[Bar],
    symbol_bars: &[Bar],
) -> Result<Vec<BaselineValue>> {
    let (ref_core, ref_ext) = bars::split_sessions(reference_bars);
    let (sym_core, sym_ext) = bars::split_sessions(symbol_bars);

    let core = bars::align(&ref_core, &sym_core);
    let extended = bars::align(&ref_ext, &sym_ext);

    if core.is_empty() && extended.is_empty() {
        return Err(EngineError::Data(format!("no aligned bars for {symbol} on {day}")));
    }

    let mut values = session_baselines(Session::Core, &core);
    values.extend(session_baselines(Session::Extended, &extended));
    Ok(values)
}

/// Outcome of one symbol's baseline computation.
#[derive(Debug)]
pub struct SymbolBaselineOutcome {
    pub symbol: String,
    pub trading_day: NaiveDate,
    pub values: Vec<BaselineValue>,
}

/// Fetch one day of minute bars for the reference asset and the symbol,
/// compute every session/method statistic, and upsert the positive ones.
pub async fn compute_symbol_baselines(
    market: &dyn MarketData,
    baselines: &dyn BaselineStore,
    audit: &dyn AuditStore,
    user_id: &str,
    wallet_id: Option<&str>,
    reference_ticker: &str,
    symbol: &str,
    day: NaiveDate,
) -> Result<SymbolBaselineOutcome> {
    let result: Result<SymbolBaselineOutcome> = async {
        let reference_bars = market.minute_bars(reference_ticker, day).await?;
        let symbol_bars = market.minute_bars(symbol, day).await?;
        info!(
            symbol,
            %day,
            reference_bars = reference_bars.len(),
            symbol_bars = symbol_bars.len(),
            "fetched minute bars"
        );

        let values = compute_day(symbol, day, &reference_bars, &symbol_bars)?;
        for value in &values {
            let row = BaselineRow {
                trading_day: day,
                symbol: symbol.to_string(),
                session: value.session,
                method: value.method,
                baseline: value.baseline,
                sample_count: value.sample_count as i64,
                source: "polygon".to_string(),
            };
            baselines.upsert(&row).await?;
            info!(
                symbol,
                session = %value.session,
                method = %value.method,
                baseline = format!("{:.4}", value.baseline),
                samples = value.sample_count,
                "baseline stored"
            );
        }
        Ok(SymbolBaselineOutcome {
            symbol: symbol.to_string(),
            trading_day: day,
            values,
        })
    }
    .await;

    if let Err(ref e) = result {
        let record = ExecutionErrorRecord {
            user_id: Some(user_id.to_string()),
            wallet_id: wallet_id.map(str::to_string),
            symbol: Some(symbol.to_string()),
            error_type: "BASELINE_ERROR".to_string(),
            message: e.to_string(),
            function: "compute_symbol_baselines".to_string(),
            severity: "ERROR".to_string(),
        };
        if let Err(log_err) = audit.record_error(&record).await {
            warn!("failed to record baseline error: {log_err}");
        }
    }

    result
}
