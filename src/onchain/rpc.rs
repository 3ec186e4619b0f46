// =============================================================================
// JSON-RPC Client — eth_call with multicall batching and ABI helpers
// =============================================================================
//
// Reads factory and pool contracts over standard JSON-RPC. Calls rotate
// across the configured endpoints; the first successful response wins.
// Reserve-ratio and sqrtPriceX96 math runs in wide integers (BigUint) and
// converts to f64 only at the reporting boundary.

use anyhow::{Context, Result};
use num_bigint::BigUint;
use serde_json::{json, Value};
use tracing::debug;

// Well-known 4-byte function selectors.
pub const SEL_GET_RESERVES: [u8; 4] = [0x09, 0x02, 0xf1, 0xac]; // getReserves()
pub const SEL_SLOT0: [u8; 4] = [0x38, 0x50, 0xc7, 0xbd]; // slot0()
pub const SEL_TOKEN0: [u8; 4] = [0x0d, 0xfe, 0x16, 0x81]; // token0()
pub const SEL_TOKEN1: [u8; 4] = [0xd2, 0x12, 0x20, 0xa7]; // token1()
pub const SEL_GET_PAIR: [u8; 4] = [0xe6, 0xa4, 0x39, 0x05]; // getPair(address,address)
pub const SEL_GET_POOL: [u8; 4] = [0x16, 0x98, 0xee, 0x82]; // getPool(address,address,uint24)
pub const SEL_BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31]; // balanceOf(address)
pub const SEL_AGGREGATE: [u8; 4] = [0x25, 0x2d, 0xba, 0x42]; // aggregate((address,bytes)[])

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Minimal JSON-RPC client over the configured endpoint pool.
pub struct RpcClient {
    endpoints: Vec<String>,
    client: reqwest::Client,
}

impl RpcClient {
    pub fn new(endpoints: Vec<String>, timeout_s: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_s.max(1)))
            .build()
            .context("failed to build RPC HTTP client")?;
        Ok(Self { endpoints, client })
    }

    /// `eth_call` against `to` with raw `data`; rotates endpoints, first
    /// success wins.
    pub async fn eth_call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "eth_call",
            "params": [ { "to": to, "data": format!("0x{}", hex::encode(data)) }, "latest" ],
            "id": 1,
        });

        let mut last_err = anyhow::anyhow!("no RPC endpoints configured");
        for endpoint in &self.endpoints {
            match self.call_endpoint(endpoint, &payload).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    debug!(endpoint = %endpoint, error = %e, "RPC endpoint failed, rotating");
                    last_err = e;
                }
            }
        }
        Err(last_err.context("all RPC endpoints failed"))
    }

    async fn call_endpoint(&self, endpoint: &str, payload: &Value) -> Result<Vec<u8>> {
        let resp: Value = self
            .client
            .post(endpoint)
            .json(payload)
            .send()
            .await
            .context("RPC request failed")?
            .json()
            .await
            .context("RPC response is not JSON")?;

        if let Some(err) = resp.get("error") {
            anyhow::bail!("RPC error: {err}");
        }
        let result = resp["result"]
            .as_str()
            .context("RPC response missing result")?;
        decode_hex(result)
    }
}

// =============================================================================
// ABI encoding
// =============================================================================

/// Left-pad a 20-byte address into a 32-byte word.
pub fn encode_address(address: &str) -> Result<[u8; 32]> {
    let raw = decode_hex(address)?;
    if raw.len() != 20 {
        anyhow::bail!("address must be 20 bytes, got {}", raw.len());
    }
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&raw);
    Ok(word)
}

/// Encode a u32 into a 32-byte big-endian word (uint24 / uint256 heads).
pub fn encode_u32(value: u32) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[28..].copy_from_slice(&value.to_be_bytes());
    word
}

/// `getPair(tokenA, tokenB)` calldata.
pub fn encode_get_pair(token_a: &str, token_b: &str) -> Result<Vec<u8>> {
    let mut data = SEL_GET_PAIR.to_vec();
    data.extend_from_slice(&encode_address(token_a)?);
    data.extend_from_slice(&encode_address(token_b)?);
    Ok(data)
}

/// `getPool(tokenA, tokenB, fee)` calldata.
pub fn encode_get_pool(token_a: &str, token_b: &str, fee: u32) -> Result<Vec<u8>> {
    let mut data = SEL_GET_POOL.to_vec();
    data.extend_from_slice(&encode_address(token_a)?);
    data.extend_from_slice(&encode_address(token_b)?);
    data.extend_from_slice(&encode_u32(fee));
    Ok(data)
}

/// `balanceOf(owner)` calldata.
pub fn encode_balance_of(owner: &str) -> Result<Vec<u8>> {
    let mut data = SEL_BALANCE_OF.to_vec();
    data.extend_from_slice(&encode_address(owner)?);
    Ok(data)
}

/// `aggregate((address,bytes)[])` calldata for multicall3.
///
/// Layout: selector, offset to the array (0x20), array length, per-element
/// offsets (relative to the array data area), then each (address, bytes)
/// tuple tail.
pub fn encode_aggregate(calls: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut data = SEL_AGGREGATE.to_vec();
    data.extend_from_slice(&encode_u32(0x20)); // offset to array

    let n = calls.len();
    data.extend_from_slice(&encode_u32(n as u32)); // array length

    // Element tails, assembled first so head offsets are known.
    let mut tails: Vec<Vec<u8>> = Vec::with_capacity(n);
    for (target, calldata) in calls {
        let mut tail = Vec::new();
        tail.extend_from_slice(&encode_address(target)?);
        tail.extend_from_slice(&encode_u32(0x40)); // offset of bytes within tuple
        tail.extend_from_slice(&encode_u32(calldata.len() as u32));
        tail.extend_from_slice(calldata);
        // Pad bytes payload to a 32-byte boundary.
        let pad = (32 - calldata.len() % 32) % 32;
        tail.extend(std::iter::repeat(0u8).take(pad));
        tails.push(tail);
    }

    // Head: element offsets relative to the start of the array data area.
    let mut offset = 32 * n;
    for tail in &tails {
        data.extend_from_slice(&encode_u32(offset as u32));
        offset += tail.len();
    }
    for tail in &tails {
        data.extend_from_slice(tail);
    }

    Ok(data)
}

// =============================================================================
// ABI decoding
// =============================================================================

/// Decode a 32-byte word at `index` as an address string.
pub fn decode_address(data: &[u8], index: usize) -> Result<String> {
    let start = index * 32;
    if data.len() < start + 32 {
        anyhow::bail!("return data too short for address at word {index}");
    }
    Ok(format!("0x{}", hex::encode(&data[start + 12..start + 32])))
}

/// Decode a 32-byte word at `index` as an unsigned big integer.
pub fn decode_u256(data: &[u8], index: usize) -> Result<BigUint> {
    let start = index * 32;
    if data.len() < start + 32 {
        anyhow::bail!("return data too short for uint at word {index}");
    }
    Ok(BigUint::from_bytes_be(&data[start..start + 32]))
}

/// Decode the `aggregate` return: `(uint256 blockNumber, bytes[] returnData)`.
pub fn decode_aggregate(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    if data.len() < 64 {
        anyhow::bail!("aggregate return too short");
    }
    let array_offset = biguint_to_usize(&decode_u256(data, 1)?)?;
    let array = &data[array_offset..];
    if array.len() < 32 {
        anyhow::bail!("aggregate return truncated at array length");
    }
    let n = biguint_to_usize(&BigUint::from_bytes_be(&array[..32]))?;

    let items_area = &array[32..];
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let head = i * 32;
        if items_area.len() < head + 32 {
            anyhow::bail!("aggregate return truncated at element {i} head");
        }
        let item_offset =
            biguint_to_usize(&BigUint::from_bytes_be(&items_area[head..head + 32]))?;
        if items_area.len() < item_offset + 32 {
            anyhow::bail!("aggregate return truncated at element {i} length");
        }
        let len = biguint_to_usize(&BigUint::from_bytes_be(
            &items_area[item_offset..item_offset + 32],
        ))?;
        let start = item_offset + 32;
        if items_area.len() < start + len {
            anyhow::bail!("aggregate return truncated at element {i} payload");
        }
        out.push(items_area[start..start + len].to_vec());
    }
    Ok(out)
}

// =============================================================================
// Fixed-point price math
// =============================================================================

/// Scale used for wide-integer division before the f64 conversion.
fn scale() -> BigUint {
    BigUint::from(10u64).pow(18)
}

/// V2 price from raw reserves: `(usdt / 10^usdt_dec) / (token / 10^token_dec)`
/// with the direction determined by which side is USDT.
pub fn v2_price(
    reserve0: &BigUint,
    reserve1: &BigUint,
    token0_is_usdt: bool,
    token_decimals: u32,
    usdt_decimals: u32,
) -> Option<f64> {
    let (usdt_reserve, token_reserve) = if token0_is_usdt {
        (reserve0, reserve1)
    } else {
        (reserve1, reserve0)
    };
    if token_reserve == &BigUint::from(0u8) {
        return None;
    }

    // price = usdt * 10^token_dec / (token * 10^usdt_dec), carried at 1e18.
    let numerator = usdt_reserve * BigUint::from(10u64).pow(token_decimals) * scale();
    let denominator = token_reserve * BigUint::from(10u64).pow(usdt_decimals);
    let scaled = numerator / denominator;
    let price = biguint_to_f64(&scaled) / 1e18;
    (price.is_finite() && price > 0.0).then_some(price)
}

/// V3 price from `sqrtPriceX96`: `price_raw = sqrtPriceX96² / 2¹⁹²`,
/// inverted when USDT is token0.
pub fn v3_price(sqrt_price_x96: &BigUint, token0_is_usdt: bool) -> Option<f64> {
    if sqrt_price_x96 == &BigUint::from(0u8) {
        return None;
    }
    let squared = sqrt_price_x96 * sqrt_price_x96;
    let two_pow_192 = BigUint::from(1u8) << 192;

    // price_raw carried at 1e18 through the division.
    let scaled = (&squared * scale()) / &two_pow_192;
    let price_raw = biguint_to_f64(&scaled) / 1e18;
    if !price_raw.is_finite() || price_raw <= 0.0 {
        return None;
    }

    let price = if token0_is_usdt {
        1.0 / price_raw
    } else {
        price_raw
    };
    (price.is_finite() && price > 0.0).then_some(price)
}

/// Convert an 18-decimal raw token amount to a float USDT value.
pub fn raw_to_f64(amount: &BigUint, decimals: u32) -> f64 {
    let scaled = (amount * scale()) / BigUint::from(10u64).pow(decimals);
    biguint_to_f64(&scaled) / 1e18
}

fn biguint_to_f64(value: &BigUint) -> f64 {
    // f64 parse of the decimal string rounds correctly for our magnitudes.
    value.to_string().parse::<f64>().unwrap_or(f64::INFINITY)
}

fn biguint_to_usize(value: &BigUint) -> Result<usize> {
    let s = value.to_string();
    s.parse::<usize>()
        .with_context(|| format!("offset {s} does not fit in usize"))
}

fn decode_hex(input: &str) -> Result<Vec<u8>> {
    let stripped = input.trim_start_matches("0x");
    hex::decode(stripped).context("invalid hex in RPC data")
}

// =============================================================================
// Tests
// =============================================================================
