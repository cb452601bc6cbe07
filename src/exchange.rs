//! External venue interfaces
//! Mission: the two boundaries the rest of the crate crosses to talk to the
//! outside world - moving capital between wallets, and reading live market
//! state for a symbol. Production implementations talk to an exchange's
//! REST/WS APIs; the in-memory fakes here back the test scenarios.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::BrainResult;
use crate::models::MarketSnapshot;

/// Moves capital between the trading wallet and cold storage. `transfer`
/// must be idempotent-safe to retry: callers (the treasury sweep loop) will
/// retry on `TransientExchange` errors with backoff.
#[async_trait]
pub trait ExchangeWalletAPI: Send + Sync {
    async fn transfer(&self, from_wallet: &str, to_wallet: &str, amount: f64) -> BrainResult<()>;
    async fn wallet_balance(&self, wallet: &str) -> BrainResult<f64>;
}

/// Live or replayed market data for one symbol.
#[async_trait]
pub trait VenueMarketDataSource: Send + Sync {
    async fn snapshot(&self, symbol: &str) -> BrainResult<MarketSnapshot>;
}

/// In-memory wallet ledger. `fail_next_n` lets tests force the retry path
/// in the sweep loop without a real flaky exchange.
pub struct FakeWalletApi {
    balances: parking_lot::Mutex<HashMap<String, f64>>,
    fail_next_n: std::sync::atomic::AtomicUsize,
}

impl FakeWalletApi {
    pub fn new() -> Self {
        Self {
            balances: parking_lot::Mutex::new(HashMap::new()),
            fail_next_n: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn with_balance(wallet: &str, amount: f64) -> Self {
        let api = Self::new();
        api.balances.lock().insert(wallet.to_string(), amount);
        api
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_next_n.store(n, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for FakeWalletApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeWalletAPI for FakeWalletApi {
    async fn transfer(&self, from_wallet: &str, to_wallet: &str, amount: f64) -> BrainResult<()> {
        use std::sync::atomic::Ordering;
        let remaining = self.fail_next_n.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_n.store(remaining - 1, Ordering::SeqCst);
            return Err(crate::error::BrainError::TransientExchange(
                "simulated transfer failure".to_string(),
            ));
        }
        let mut balances = self.balances.lock();
        *balances.entry(from_wallet.to_string()).or_insert(0.0) -= amount;
        *balances.entry(to_wallet.to_string()).or_insert(0.0) += amount;
        Ok(())
    }

    async fn wallet_balance(&self, wallet: &str) -> BrainResult<f64> {
        Ok(*self.balances.lock().get(wallet).unwrap_or(&0.0))
    }
}

/// Fixed or pre-seeded market snapshots for deterministic tests.
pub struct FakeMarketDataSource {
    snapshots: parking_lot::Mutex<HashMap<String, MarketSnapshot>>,
}

impl FakeMarketDataSource {
    pub fn new() -> Self {
        Self {
            snapshots: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, symbol: &str, snapshot: MarketSnapshot) {
        self.snapshots.lock().insert(symbol.to_string(), snapshot);
    }
}

impl Default for FakeMarketDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueMarketDataSource for FakeMarketDataSource {
    async fn snapshot(&self, symbol: &str) -> BrainResult<MarketSnapshot> {
        self.snapshots
            .lock()
            .get(symbol)
            .cloned()
            .ok_or_else(|| crate::error::BrainError::TransientExchange(format!("no snapshot for {symbol}")))
    }
}
