//! Correlation cache
//! Mission: windowed Pearson correlation between symbol return series,
//! cached with a TTL and keyed by the sorted symbol pair so corr(A,B) and
//! corr(B,A) always hit the same cache slot (testable property #10).

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Per-symbol ring buffer of (price, ts), capped at `RING_CAPACITY`.
const RING_CAPACITY: usize = 100;

struct PriceRing {
    samples: VecDeque<(f64, DateTime<Utc>)>,
}

impl PriceRing {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(RING_CAPACITY),
        }
    }

    fn push(&mut self, price: f64, ts: DateTime<Utc>) {
        if self.samples.len() >= RING_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back((price, ts));
    }

    fn returns(&self) -> Vec<f64> {
        self.samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .filter_map(|((p0, _), (p1, _))| {
                if *p0 != 0.0 {
                    Some((p1 - p0) / p0)
                } else {
                    None
                }
            })
            .collect()
    }

    fn last_price(&self) -> Option<f64> {
        self.samples.back().map(|(p, _)| *p)
    }
}

fn stddev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt())
}

struct CacheEntry {
    value: f64,
    computed_at: DateTime<Utc>,
}

/// Maintains per-symbol price history and a TTL'd pairwise correlation
/// cache, as described in spec.md 4.3.
pub struct CorrelationCache {
    ttl: Duration,
    rings: Mutex<HashMap<String, PriceRing>>,
    cache: Mutex<HashMap<(String, String), CacheEntry>>,
}

fn sorted_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl CorrelationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            rings: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_price(&self, symbol: &str, price: f64, ts: DateTime<Utc>) {
        self.rings
            .lock()
            .entry(symbol.to_string())
            .or_insert_with(PriceRing::new)
            .push(price, ts);
    }

    /// Pearson correlation of aligned return series for `(a, b)`. Returns
    /// 0.5 (neutral) when either series has fewer than 2 returns. Cached
    /// for `ttl`; refreshed on expiry.
    pub fn correlation(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        let key = sorted_pair(a, b);

        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(&key) {
                if Utc::now() - entry.computed_at < self.ttl {
                    return entry.value;
                }
            }
        }

        let value = self.compute(&key.0, &key.1);

        self.cache.lock().insert(
            key,
            CacheEntry {
                value,
                computed_at: Utc::now(),
            },
        );
        value
    }

    /// Derives volatility for `symbol` as `stddev(returns) * last price`
    /// when no explicit volatility was supplied on the signal. `None` until
    /// the ring holds at least two samples.
    pub fn derived_volatility(&self, symbol: &str) -> Option<f64> {
        let rings = self.rings.lock();
        let ring = rings.get(symbol)?;
        let sigma = stddev(&ring.returns())?;
        let last_price = ring.last_price()?;
        Some(sigma * last_price)
    }

    fn compute(&self, a: &str, b: &str) -> f64 {
        let rings = self.rings.lock();
        let ra = rings.get(a).map(|r| r.returns());
        let rb = rings.get(b).map(|r| r.returns());

        let (ra, rb) = match (ra, rb) {
            (Some(ra), Some(rb)) => (ra, rb),
            _ => return 0.5,
        };

        let n = ra.len().min(rb.len());
        if n < 2 {
            return 0.5;
        }
        let ra = &ra[ra.len() - n..];
        let rb = &rb[rb.len() - n..];

        pearson(ra, rb)
    }
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }

    (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_is_symmetric() {
        let cache = CorrelationCache::new(Duration::seconds(60));
        let base = Utc::now();
        for i in 0..10 {
            let t = base + Duration::seconds(i);
            cache.record_price("BTCUSDT", 100.0 + i as f64, t);
            cache.record_price("ETHUSDT", 50.0 + (i as f64) * 0.5, t);
        }
        let ab = cache.correlation("BTCUSDT", "ETHUSDT");
        let ba = cache.correlation("ETHUSDT", "BTCUSDT");
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn insufficient_data_returns_neutral() {
        let cache = CorrelationCache::new(Duration::seconds(60));
        assert_eq!(cache.correlation("AAA", "BBB"), 0.5);
    }

    #[test]
    fn perfectly_correlated_series_returns_one() {
        let cache = CorrelationCache::new(Duration::seconds(60));
        let base = Utc::now();
        for i in 0..10 {
            let t = base + Duration::seconds(i);
            let p = 100.0 + i as f64 * 2.0;
            cache.record_price("A", p, t);
            cache.record_price("B", p * 2.0, t);
        }
        let corr = cache.correlation("A", "B");
        assert!(corr > 0.99);
    }

    #[test]
    fn derived_volatility_needs_two_samples() {
        let cache = CorrelationCache::new(Duration::seconds(60));
        assert_eq!(cache.derived_volatility("AAA"), None);
        cache.record_price("AAA", 100.0, Utc::now());
        assert_eq!(cache.derived_volatility("AAA"), None);
    }

    #[test]
    fn derived_volatility_scales_with_last_price() {
        let cache = CorrelationCache::new(Duration::seconds(60));
        let base = Utc::now();
        for (i, price) in [100.0, 102.0, 99.0, 101.0].into_iter().enumerate() {
            cache.record_price("AAA", price, base + Duration::seconds(i as i64));
        }
        let vol = cache.derived_volatility("AAA").unwrap();
        assert!(vol > 0.0);
    }

    #[test]
    fn cache_entry_refreshes_after_ttl() {
        let cache = CorrelationCache::new(Duration::milliseconds(-1));
        let base = Utc::now();
        for i in 0..5 {
            cache.record_price("A", 100.0 + i as f64, base + Duration::seconds(i));
            cache.record_price("B", 100.0 + i as f64, base + Duration::seconds(i));
        }
        // TTL already elapsed (negative duration) -> every call recomputes
        // rather than serving a stale cached value.
        let first = cache.correlation("A", "B");
        let second = cache.correlation("A", "B");
        assert_eq!(first, second);
    }
}
