// =============================================================================
// Layer 2 — Processing: outliers, cleaning, standardization, basic metrics
// =============================================================================
//
// Maintains per-symbol rolling history and enriches validated events with
// derived metrics. Outliers are flagged against the rolling window (z-score
// or IQR rule); duplicates within the last five (symbol, timestamp) pairs
// are suppressed; missing values are filled from the last valid record.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::indicators::ema::ema_volume_trend;
use crate::market_data::types::{MarketEvent, OrderBookSnapshot};

/// Rolling-history depth for outlier detection and basic computation.
const HISTORY_WINDOW: usize = 20;

/// Number of recent (symbol, timestamp) pairs checked for duplicates.
const DEDUP_WINDOW: usize = 5;

/// Volume above `3 × mean(last 20)` is anomalous.
const VOLUME_ANOMALY_FACTOR: f64 = 3.0;

/// Per-symbol rolling state.
#[derive(Default)]
struct SymbolHistory {
    closes: VecDeque<f64>,
    volumes: VecDeque<f64>,
    /// (event kind, timestamp) pairs — dedup is per wire type so a trade and
    /// a ticker landing on the same millisecond do not collide.
    recent_keys: VecDeque<(u8, i64)>,
    last_close: Option<f64>,
    last_book: Option<OrderBookSnapshot>,
    /// 24-hour aggregates used for standardization.
    day_min: f64,
    day_max: f64,
    day_volume_sum: f64,
    day_volume_count: u64,
}

impl SymbolHistory {
    fn push_close(&mut self, close: f64) {
        self.closes.push_back(close);
        while self.closes.len() > HISTORY_WINDOW {
            self.closes.pop_front();
        }
        self.last_close = Some(close);
        if self.day_min == 0.0 || close < self.day_min {
            self.day_min = close;
        }
        if close > self.day_max {
            self.day_max = close;
        }
    }

    fn push_volume(&mut self, volume: f64) {
        self.volumes.push_back(volume);
        while self.volumes.len() > HISTORY_WINDOW {
            self.volumes.pop_front();
        }
        self.day_volume_sum += volume;
        self.day_volume_count += 1;
    }

    fn avg_volume(&self) -> f64 {
        if self.day_volume_count == 0 {
            0.0
        } else {
            self.day_volume_sum / self.day_volume_count as f64
        }
    }
}

/// The stage-2 processor shared by the pipeline task.
pub struct Processor {
    state: RwLock<HashMap<String, SymbolHistory>>,
}

/// Outcome of a processing pass.
pub enum Processed {
    /// Enriched event, ready for distribution.
    Event(Box<MarketEvent>),
    /// Duplicate of a recently seen (symbol, timestamp); suppressed.
    Duplicate,
}

impl Processor {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Run the full Layer-2 pass on one event.
    pub fn process(&self, mut event: MarketEvent) -> Processed {
        let symbol = event.symbol().to_string();
        let timestamp = event.timestamp();
        let kind = event_kind(&event);

        let mut state = self.state.write();
        let history = state.entry(symbol).or_default();

        // De-duplication on (symbol, timestamp) within the last 5 messages.
        if history.recent_keys.iter().any(|&k| k == (kind, timestamp)) {
            return Processed::Duplicate;
        }
        history.recent_keys.push_back((kind, timestamp));
        while history.recent_keys.len() > DEDUP_WINDOW {
            history.recent_keys.pop_front();
        }

        match &mut event {
            MarketEvent::Ticker(snap) => {
                // Missing-value fill: a zero price falls back to last close.
                if snap.price <= 0.0 {
                    if let Some(last) = history.last_close {
                        snap.price = last;
                        snap.is_anomaly = true;
                        snap.anomaly_type = Some("filled_price".into());
                    }
                }

                if is_outlier(snap.price, &history.closes) {
                    snap.is_anomaly = true;
                    snap.anomaly_type.get_or_insert_with(|| "price_outlier".into());
                }

                // Standardization.
                if let Some(prev) = history.last_close {
                    if prev > 0.0 && snap.price > 0.0 {
                        snap.price_change_pct = (snap.price - prev) / prev;
                    }
                }
                let avg_vol = history.avg_volume();
                snap.volume_ratio = if avg_vol > 0.0 { snap.volume / avg_vol } else { 1.0 };
                snap.volatility = rolling_volatility(&history.closes);
                if let Some(book) = &history.last_book {
                    snap.liquidity_ratio = book.liquidity_ratio;
                }

                history.push_close(snap.price);
                history.push_volume(snap.volume);
            }

            MarketEvent::Kline(kline) => {
                // Missing-value fill: previous close for a zero close.
                if kline.close <= 0.0 {
                    if let Some(last) = history.last_close {
                        kline.close = last;
                        kline.anomaly_flag = true;
                        kline.anomaly_type = Some("filled_close".into());
                    }
                }

                if is_outlier(kline.close, &history.closes) {
                    kline.anomaly_flag = true;
                    kline.anomaly_type.get_or_insert_with(|| "price_outlier".into());
                }

                // Basic computation.
                kline.price_momentum = price_momentum(&history.closes, kline.close);
                if kline.close > 0.0 {
                    kline.price_range_pct = (kline.high - kline.low) / kline.close;
                }
                if history.volumes.len() >= HISTORY_WINDOW {
                    let mean: f64 =
                        history.volumes.iter().sum::<f64>() / history.volumes.len() as f64;
                    kline.volume_anomaly = kline.volume > VOLUME_ANOMALY_FACTOR * mean;
                }

                // Closed candles advance the rolling history; partial updates
                // only refresh the last-close reference.
                if kline.is_closed {
                    history.push_close(kline.close);
                    history.push_volume(kline.volume);
                } else {
                    history.last_close = Some(kline.close);
                }
            }

            MarketEvent::OrderBook(book) => {
                // Missing-value fill: an empty side falls back to the last
                // snapshot's levels.
                if book.bids.is_empty() || book.asks.is_empty() {
                    if let Some(last) = &history.last_book {
                        if book.bids.is_empty() {
                            book.bids = last.bids.clone();
                        }
                        if book.asks.is_empty() {
                            book.asks = last.asks.clone();
                        }
                        book.anomaly_flag = true;
                        book.anomaly_type = Some("filled_book".into());
                    }
                }
                enrich_book(book, history.avg_volume());
                history.last_book = Some(book.clone());
            }

            MarketEvent::Trade(trade) => {
                if trade.price <= 0.0 && trade.quantity <= 0.0 {
                    // No prints in the window — forward the marker.
                    trade.no_trades = true;
                } else {
                    if is_outlier(trade.price, &history.closes) {
                        trade.anomaly_flag = true;
                        trade.anomaly_type.get_or_insert_with(|| "price_outlier".into());
                    }
                    history.last_close = Some(trade.price);
                }
            }

            MarketEvent::MarkPrice(mark) => {
                if is_outlier(mark.mark_price, &history.closes) {
                    mark.anomaly_flag = true;
                    mark.anomaly_type.get_or_insert_with(|| "price_outlier".into());
                }
            }
        }

        Processed::Event(Box::new(event))
    }

    /// Min-max normalized price within the rolling 24 h range, if known.
    pub fn normalized_price(&self, symbol: &str, price: f64) -> Option<f64> {
        let state = self.state.read();
        let history = state.get(symbol)?;
        if history.day_max > history.day_min {
            Some(((price - history.day_min) / (history.day_max - history.day_min)).clamp(0.0, 1.0))
        } else {
            None
        }
    }

    /// Log-return of `price` vs the last observed close.
    pub fn log_return(&self, symbol: &str, price: f64) -> Option<f64> {
        let state = self.state.read();
        let last = state.get(symbol)?.last_close?;
        if last > 0.0 && price > 0.0 {
            Some((price / last).ln())
        } else {
            None
        }
    }

    /// EMA-5 / EMA-20 volume trend for the symbol's rolling volume history.
    pub fn volume_trend(&self, symbol: &str) -> Option<f64> {
        let state = self.state.read();
        let history = state.get(symbol)?;
        let volumes: Vec<f64> = history.volumes.iter().copied().collect();
        ema_volume_trend(&volumes)
    }

    /// `money_flow = price_change × volume` for the latest state.
    pub fn money_flow(&self, symbol: &str, price: f64, volume: f64) -> f64 {
        let state = self.state.read();
        let prev = state.get(symbol).and_then(|h| h.last_close).unwrap_or(price);
        (price - prev) * volume
    }
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Pure helpers
// =============================================================================

fn event_kind(event: &MarketEvent) -> u8 {
    match event {
        MarketEvent::Ticker(_) => 0,
        MarketEvent::Kline(_) => 1,
        MarketEvent::OrderBook(_) => 2,
        MarketEvent::Trade(_) => 3,
        MarketEvent::MarkPrice(_) => 4,
    }
}

/// Outlier test against the rolling window: z-score > 3 or the IQR rule.
/// Requires at least 5 observations.
fn is_outlier(value: f64, history: &VecDeque<f64>) -> bool {
    if history.len() < 5 || !value.is_finite() {
        return false;
    }

    let n = history.len() as f64;
    let mean: f64 = history.iter().sum::<f64>() / n;
    let variance: f64 = history.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev > 0.0 {
        let z = (value - mean).abs() / std_dev;
        if z > 3.0 {
            return true;
        }
    }

    // IQR rule.
    let mut sorted: Vec<f64> = history.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q1 = sorted[sorted.len() / 4];
    let q3 = sorted[(sorted.len() * 3) / 4];
    let iqr = q3 - q1;
    if iqr > 0.0 {
        return value < q1 - 1.5 * iqr || value > q3 + 1.5 * iqr;
    }

    false
}

/// Price momentum: close vs close five observations ago.
fn price_momentum(closes: &VecDeque<f64>, current: f64) -> f64 {
    if closes.len() < 5 {
        return 0.0;
    }
    let past = closes[closes.len() - 5];
    if past > 0.0 {
        (current - past) / past
    } else {
        0.0
    }
}

/// Rolling volatility: standard deviation of simple returns over the window.
fn rolling_volatility(closes: &VecDeque<f64>) -> f64 {
    if closes.len() < 3 {
        return 0.0;
    }
    let values: Vec<f64> = closes.iter().copied().collect();
    let returns: Vec<f64> = values
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let mean: f64 = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance: f64 =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    variance.sqrt()
}

/// Derive spread / depth / liquidity / imbalance for an order book.
fn enrich_book(book: &mut OrderBookSnapshot, avg_volume: f64) {
    let best_bid = book.best_bid();
    let best_ask = book.best_ask();
    let mid = (best_bid + best_ask) / 2.0;
    if mid > 0.0 {
        book.bid_ask_spread = (best_ask - best_bid) / mid;
    }

    let bid_depth: f64 = book.bids.iter().map(|(_, q)| q).sum();
    let ask_depth: f64 = book.asks.iter().map(|(_, q)| q).sum();
    book.book_depth = bid_depth + ask_depth;

    if book.book_depth > 0.0 {
        book.liquidity_ratio = avg_volume / book.book_depth;
        book.depth_imbalance = (bid_depth - ask_depth) / book.book_depth;
    }
}

// =============================================================================
// Tests
// =============================================================================
