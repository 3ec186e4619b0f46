// =============================================================================
// Layer 1 — Ingestion: parsing, schema validation, anomaly flagging
// =============================================================================
//
// Inbound JSON is exchange-specific; parsing tolerates unknown fields.
// Records failing validation (timestamp window, price sanity, cross-exchange
// deviation) are flagged anomalous and forwarded for cleaning — never
// discarded here.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::market_data::types::{
    KlineData, MarkPriceData, MarketDataSnapshot, MarketEvent, OrderBookSnapshot, TradeData,
};

/// Timestamp must be within ±5 minutes of receipt.
const TIMESTAMP_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Cross-exchange deviation above this fraction flags the record.
const CROSS_EXCHANGE_DEVIATION: f64 = 0.01;

/// Single-exchange price change above this fraction within a minute flags the
/// record in normal market conditions.
const SINGLE_EXCHANGE_MOVE: f64 = 0.10;

// =============================================================================
// Parsing
// =============================================================================

/// Parse one inbound WebSocket text frame from `exchange` into a normalized
/// event. Returns `Ok(None)` for frames that carry no market data
/// (subscription acks, pings, heartbeats).
pub fn parse_message(exchange: &str, text: &str, received_ms: i64) -> Result<Option<MarketEvent>> {
    let root: Value = serde_json::from_str(text).context("inbound frame is not valid JSON")?;

    match exchange {
        "binance" => parse_binance(&root, received_ms),
        "okx" => parse_okx(&root, received_ms),
        "bybit" => parse_bybit(&root, received_ms),
        other => anyhow::bail!("unsupported exchange: {other}"),
    }
}

/// Binance frames carry an `e` event-type discriminator (single-stream) or a
/// `data` envelope (combined stream).
fn parse_binance(root: &Value, received_ms: i64) -> Result<Option<MarketEvent>> {
    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        root
    };

    // Partial-depth frames have no event type, only bids/asks.
    if data.get("e").is_none() {
        if data.get("bids").is_some() && data.get("asks").is_some() {
            return Ok(Some(parse_binance_depth(data, received_ms)?));
        }
        return Ok(None);
    }

    match data["e"].as_str() {
        Some("24hrTicker") => {
            let symbol = data["s"].as_str().context("ticker missing field s")?.to_uppercase();
            let timestamp = data["E"].as_i64().unwrap_or(received_ms);
            let price = field_f64(&data["c"], "c")?;
            let volume = field_f64(&data["v"], "v")?;
            let bid = field_f64_or(&data["b"], 0.0);
            let ask = field_f64_or(&data["a"], 0.0);
            Ok(Some(MarketEvent::Ticker(MarketDataSnapshot {
                symbol,
                timestamp,
                price,
                volume,
                bid,
                ask,
                source_exchange: "binance".into(),
                ingestion_latency_ms: (received_ms - timestamp).max(0) as f64,
                data_quality: 1.0,
                price_change_pct: field_f64_or(&data["P"], 0.0) / 100.0,
                volume_ratio: 1.0,
                volatility: 0.0,
                liquidity_ratio: 0.0,
                is_anomaly: false,
                anomaly_type: None,
            })))
        }
        Some("kline") => {
            let k = &data["k"];
            let symbol = data["s"].as_str().context("kline missing field s")?.to_uppercase();
            Ok(Some(MarketEvent::Kline(KlineData {
                symbol,
                timeframe: k["i"].as_str().context("kline missing field k.i")?.to_string(),
                timestamp: k["t"].as_i64().context("kline missing field k.t")?,
                open: field_f64(&k["o"], "k.o")?,
                high: field_f64(&k["h"], "k.h")?,
                low: field_f64(&k["l"], "k.l")?,
                close: field_f64(&k["c"], "k.c")?,
                volume: field_f64(&k["v"], "k.v")?,
                quote_volume: field_f64(&k["q"], "k.q")?,
                is_closed: k["x"].as_bool().unwrap_or(false),
                price_momentum: 0.0,
                price_range_pct: 0.0,
                volume_anomaly: false,
                anomaly_flag: false,
                anomaly_type: None,
            })))
        }
        Some("aggTrade") | Some("trade") => {
            let symbol = data["s"].as_str().context("trade missing field s")?.to_uppercase();
            Ok(Some(MarketEvent::Trade(TradeData {
                symbol,
                timestamp: data["T"].as_i64().unwrap_or(received_ms),
                price: field_f64(&data["p"], "p")?,
                quantity: field_f64(&data["q"], "q")?,
                is_buyer_maker: data["m"].as_bool().unwrap_or(false),
                source_exchange: "binance".into(),
                no_trades: false,
                anomaly_flag: false,
                anomaly_type: None,
            })))
        }
        Some("markPriceUpdate") => {
            let symbol = data["s"].as_str().context("mark price missing field s")?.to_uppercase();
            Ok(Some(MarketEvent::MarkPrice(MarkPriceData {
                symbol,
                timestamp: data["E"].as_i64().unwrap_or(received_ms),
                mark_price: field_f64(&data["p"], "p")?,
                source_exchange: "binance".into(),
                anomaly_flag: false,
                anomaly_type: None,
            })))
        }
        _ => Ok(None),
    }
}

fn parse_binance_depth(data: &Value, received_ms: i64) -> Result<MarketEvent> {
    let symbol = data["s"]
        .as_str()
        .map(|s| s.to_uppercase())
        .unwrap_or_default();
    let bids = parse_levels(&data["bids"])?;
    let asks = parse_levels(&data["asks"])?;
    Ok(MarketEvent::OrderBook(OrderBookSnapshot {
        symbol,
        timestamp: data["E"].as_i64().unwrap_or(received_ms),
        bids,
        asks,
        source_exchange: "binance".into(),
        bid_ask_spread: 0.0,
        book_depth: 0.0,
        liquidity_ratio: 0.0,
        depth_imbalance: 0.0,
        anomaly_flag: false,
        anomaly_type: None,
    }))
}

/// OKX frames wrap data in `{ "arg": { "channel", "instId" }, "data": [...] }`.
fn parse_okx(root: &Value, received_ms: i64) -> Result<Option<MarketEvent>> {
    let channel = root["arg"]["channel"].as_str().unwrap_or_default();
    let inst = root["arg"]["instId"].as_str().unwrap_or_default();
    let symbol = inst.replace('-', "").to_uppercase();
    let Some(item) = root["data"].as_array().and_then(|a| a.first()) else {
        return Ok(None); // Subscription ack or event frame.
    };

    match channel {
        "tickers" => Ok(Some(MarketEvent::Ticker(MarketDataSnapshot {
            symbol,
            timestamp: field_i64_or(&item["ts"], received_ms),
            price: field_f64(&item["last"], "last")?,
            volume: field_f64_or(&item["vol24h"], 0.0),
            bid: field_f64_or(&item["bidPx"], 0.0),
            ask: field_f64_or(&item["askPx"], 0.0),
            source_exchange: "okx".into(),
            ingestion_latency_ms: 0.0,
            data_quality: 1.0,
            price_change_pct: 0.0,
            volume_ratio: 1.0,
            volatility: 0.0,
            liquidity_ratio: 0.0,
            is_anomaly: false,
            anomaly_type: None,
        }))),
        "trades" => Ok(Some(MarketEvent::Trade(TradeData {
            symbol,
            timestamp: field_i64_or(&item["ts"], received_ms),
            price: field_f64(&item["px"], "px")?,
            quantity: field_f64(&item["sz"], "sz")?,
            is_buyer_maker: item["side"].as_str() == Some("sell"),
            source_exchange: "okx".into(),
            no_trades: false,
            anomaly_flag: false,
            anomaly_type: None,
        }))),
        _ => Ok(None),
    }
}

/// Bybit frames wrap data in `{ "topic": "...", "data": {...} }`.
fn parse_bybit(root: &Value, received_ms: i64) -> Result<Option<MarketEvent>> {
    let topic = root["topic"].as_str().unwrap_or_default();
    if topic.starts_with("tickers.") {
        let data = &root["data"];
        let symbol = data["symbol"].as_str().unwrap_or_default().to_uppercase();
        if symbol.is_empty() {
            return Ok(None);
        }
        return Ok(Some(MarketEvent::Ticker(MarketDataSnapshot {
            symbol,
            timestamp: root["ts"].as_i64().unwrap_or(received_ms),
            price: field_f64(&data["lastPrice"], "lastPrice")?,
            volume: field_f64_or(&data["volume24h"], 0.0),
            bid: field_f64_or(&data["bid1Price"], 0.0),
            ask: field_f64_or(&data["ask1Price"], 0.0),
            source_exchange: "bybit".into(),
            ingestion_latency_ms: 0.0,
            data_quality: 1.0,
            price_change_pct: 0.0,
            volume_ratio: 1.0,
            volatility: 0.0,
            liquidity_ratio: 0.0,
            is_anomaly: false,
            anomaly_type: None,
        })));
    }
    Ok(None)
}

// =============================================================================
// Validation — anomalies flag, never drop
// =============================================================================

/// Apply Layer-1 validation rules to `event`, flagging violations in place.
///
/// `exchange_prices` holds the latest price per exchange for the event's
/// symbol; `last_price` the previous price seen from the same exchange.
pub fn validate_event(
    event: &mut MarketEvent,
    received_ms: i64,
    last_price: Option<f64>,
    exchange_prices: &HashMap<String, f64>,
) {
    // Timestamp window check.
    if (event.timestamp() - received_ms).abs() > TIMESTAMP_WINDOW_MS {
        event.flag_anomaly("stale_timestamp");
    }

    let price = match event {
        MarketEvent::Ticker(s) => Some((s.price, s.bid, s.ask)),
        MarketEvent::Kline(k) => Some((k.close, 0.0, 0.0)),
        MarketEvent::Trade(t) => Some((t.price, 0.0, 0.0)),
        MarketEvent::MarkPrice(m) => Some((m.mark_price, 0.0, 0.0)),
        MarketEvent::OrderBook(o) => {
            let (bid, ask) = (o.best_bid(), o.best_ask());
            if bid > 0.0 && ask > 0.0 && bid > ask {
                o.anomaly_flag = true;
                o.anomaly_type = Some("crossed_book".to_string());
            }
            return;
        }
    };

    if let Some((p, bid, ask)) = price {
        if p <= 0.0 {
            event.flag_anomaly("non_positive_price");
            return;
        }
        if bid > 0.0 && ask > 0.0 && bid > ask {
            event.flag_anomaly("bid_above_ask");
        }
        // Single-exchange sanity: > 10% move vs the previous observation.
        if let Some(last) = last_price {
            if last > 0.0 && (p - last).abs() / last > SINGLE_EXCHANGE_MOVE {
                event.flag_anomaly("price_jump");
            }
        }
        // Cross-exchange sanity: > 1% deviation from the peer average.
        if !exchange_prices.is_empty() {
            let avg: f64 = exchange_prices.values().sum::<f64>() / exchange_prices.len() as f64;
            if avg > 0.0 && (p - avg).abs() / avg > CROSS_EXCHANGE_DEVIATION {
                event.flag_anomaly("cross_exchange_deviation");
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Exchanges send numeric values either as JSON strings or numbers.
fn field_f64(val: &Value, name: &str) -> Result<f64> {
    match val {
        Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

fn field_f64_or(val: &Value, default: f64) -> f64 {
    field_f64(val, "").unwrap_or(default)
}

fn field_i64_or(val: &Value, default: i64) -> i64 {
    match val {
        Value::String(s) => s.parse::<i64>().unwrap_or(default),
        Value::Number(n) => n.as_i64().unwrap_or(default),
        _ => default,
    }
}

fn parse_levels(val: &Value) -> Result<Vec<(f64, f64)>> {
    let arr = val.as_array().context("depth levels missing")?;
    let mut out = Vec::with_capacity(arr.len());
    for level in arr {
        let price = level
            .get(0)
            .map(|v| field_f64_or(v, 0.0))
            .unwrap_or(0.0);
        let qty = level
            .get(1)
            .map(|v| field_f64_or(v, 0.0))
            .unwrap_or(0.0);
        out.push((price, qty));
    }
    Ok(out)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn parse_binance_kline() {
        let json = r#"{
            "e": "kline", "s": "BTCUSDT",
            "k": {
                "t": 1700000000000, "T": 1700000059999, "i": "1m",
                "o": "37000.00", "h": "37050.00", "l": "36990.00", "c": "37020.00",
                "v": "123.456", "q": "4567890.12", "n": 1500, "x": false
            }
        }"#;
        let event = parse_message("binance", json, NOW).unwrap().unwrap();
        match event {
            MarketEvent::Kline(k) => {
                assert_eq!(k.symbol, "BTCUSDT");
                assert_eq!(k.timeframe, "1m");
                assert!((k.close - 37020.0).abs() < f64::EPSILON);
                assert!(!k.is_closed);
            }
            other => panic!("expected kline, got {other:?}"),
        }
    }

    #[test]
    fn parse_binance_combined_stream_envelope() {
        let json = r#"{
            "stream": "btcusdt@aggTrade",
            "data": { "e": "aggTrade", "s": "BTCUSDT", "T": 1700000000000,
                      "p": "37000.5", "q": "0.12", "m": true }
        }"#;
        let event = parse_message("binance", json, NOW).unwrap().unwrap();
        match event {
            MarketEvent::Trade(t) => {
                assert_eq!(t.symbol, "BTCUSDT");
                assert!(t.is_buyer_maker);
                assert!((t.price - 37000.5).abs() < f64::EPSILON);
            }
            other => panic!("expected trade, got {other:?}"),
        }
    }

    #[test]
    fn parse_binance_depth_without_event_type() {
        let json = r#"{
            "lastUpdateId": 12345, "s": "ETHUSDT", "E": 1700000000000,
            "bids": [["2000.0", "1.5"], ["1999.0", "2.0"]],
            "asks": [["2001.0", "1.2"]]
        }"#;
        let event = parse_message("binance", json, NOW).unwrap().unwrap();
        match event {
            MarketEvent::OrderBook(o) => {
                assert_eq!(o.bids.len(), 2);
                assert_eq!(o.asks.len(), 1);
                assert!((o.best_bid() - 2000.0).abs() < f64::EPSILON);
            }
            other => panic!("expected orderbook, got {other:?}"),
        }
    }

    #[test]
    fn parse_okx_ticker() {
        let json = r#"{
            "arg": { "channel": "tickers", "instId": "BTC-USDT" },
            "data": [{ "last": "37000", "vol24h": "9000", "bidPx": "36999",
                       "askPx": "37001", "ts": "1700000000000" }]
        }"#;
        let event = parse_message("okx", json, NOW).unwrap().unwrap();
        match event {
            MarketEvent::Ticker(s) => {
                assert_eq!(s.symbol, "BTCUSDT");
                assert_eq!(s.source_exchange, "okx");
                assert!((s.price - 37000.0).abs() < f64::EPSILON);
            }
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    #[test]
    fn subscription_ack_yields_none() {
        let json = r#"{ "event": "subscribe", "arg": { "channel": "tickers" } }"#;
        assert!(parse_message("okx", json, NOW).unwrap().is_none());
        let json = r#"{ "result": null, "id": 1 }"#;
        assert!(parse_message("binance", json, NOW).unwrap().is_none());
    }

    #[test]
    fn unknown_exchange_errors() {
        assert!(parse_message("kraken", "{}", NOW).is_err());
    }

    #[test]
    fn validate_flags_stale_timestamp() {
        let json = r#"{ "e": "aggTrade", "s": "BTCUSDT", "T": 1, "p": "100", "q": "1", "m": false }"#;
        let mut event = parse_message("binance", json, NOW).unwrap().unwrap();
        validate_event(&mut event, NOW, None, &HashMap::new());
        assert!(event.is_anomalous());
    }

    #[test]
    fn validate_flags_price_jump() {
        let json = format!(
            r#"{{ "e": "aggTrade", "s": "BTCUSDT", "T": {NOW}, "p": "120", "q": "1", "m": false }}"#
        );
        let mut event = parse_message("binance", &json, NOW).unwrap().unwrap();
        validate_event(&mut event, NOW, Some(100.0), &HashMap::new());
        assert!(event.is_anomalous());
    }

    #[test]
    fn validate_flags_cross_exchange_deviation() {
        let json = format!(
            r#"{{ "e": "aggTrade", "s": "BTCUSDT", "T": {NOW}, "p": "102", "q": "1", "m": false }}"#
        );
        let mut event = parse_message("binance", &json, NOW).unwrap().unwrap();
        let peers = HashMap::from([("okx".to_string(), 100.0)]);
        validate_event(&mut event, NOW, None, &peers);
        assert!(event.is_anomalous());
    }

    #[test]
    fn validate_accepts_clean_event() {
        let json = format!(
            r#"{{ "e": "aggTrade", "s": "BTCUSDT", "T": {NOW}, "p": "100.2", "q": "1", "m": false }}"#
        );
        let mut event = parse_message("binance", &json, NOW).unwrap().unwrap();
        let peers = HashMap::from([("okx".to_string(), 100.0)]);
        validate_event(&mut event, NOW, Some(100.0), &peers);
        assert!(!event.is_anomalous());
    }
}
