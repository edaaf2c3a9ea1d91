use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use tracing::trace;

use crate::types::{BookSnapshot, PriceLevel, Side};

/// Fraction of mid price used by [`OrderBook::imbalance`].
const IMBALANCE_BAND: f64 = 0.01;

/// Latest best-of-book view for one symbol.
///
/// The book holds exactly one snapshot at a time: `replace` swaps both sides
/// under the write lock, so a reader never observes bids from one snapshot
/// and asks from another. Fills never decrement the book; every match is
/// computed fresh from the latest snapshot.
pub struct OrderBook {
    inner: RwLock<BookState>,
}

#[derive(Debug, Default)]
struct BookState {
    symbol: String,
    last_updated: Option<DateTime<Utc>>,
    /// Sorted strictly descending by price.
    bids: Vec<PriceLevel>,
    /// Sorted strictly ascending by price.
    asks: Vec<PriceLevel>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BookState::default()),
        }
    }

    /// Replace the whole book with a fresh snapshot, sorting both sides.
    pub fn replace(&self, snapshot: BookSnapshot) {
        let mut bids = snapshot.bids;
        let mut asks = snapshot.asks;
        bids.sort_by_key(|level| std::cmp::Reverse(OrderedFloat(level.price)));
        asks.sort_by_key(|level| OrderedFloat(level.price));

        let mut state = self.inner.write();
        state.symbol = snapshot.symbol;
        state.last_updated = Some(snapshot.timestamp);
        state.bids = bids;
        state.asks = asks;
        trace!(
            symbol = %state.symbol,
            bids = state.bids.len(),
            asks = state.asks.len(),
            "book replaced"
        );
    }

    pub fn symbol(&self) -> String {
        self.inner.read().symbol.clone()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_updated
    }

    /// Highest bid as (price, quantity); `None` when the bid side is empty.
    pub fn best_bid(&self) -> Option<(f64, f64)> {
        self.inner.read().best_bid()
    }

    /// Lowest ask as (price, quantity); `None` when the ask side is empty.
    pub fn best_ask(&self) -> Option<(f64, f64)> {
        self.inner.read().best_ask()
    }

    pub fn spread(&self) -> Option<f64> {
        self.inner.read().spread()
    }

    pub fn mid_price(&self) -> Option<f64> {
        self.inner.read().mid_price()
    }

    /// Total quantity resting at levels at-or-better than `price_level`:
    /// bids priced >= the level for `Side::Buy`, asks priced <= it for
    /// `Side::Sell`.
    pub fn cumulative_depth(&self, side: Side, price_level: f64) -> f64 {
        self.inner.read().cumulative_depth(side, price_level)
    }

    /// (bid, ask) quantity within ±`pct_from_mid` of the mid price.
    /// Both are zero when the mid is undefined.
    pub fn liquidity(&self, pct_from_mid: f64) -> (f64, f64) {
        self.inner.read().liquidity(pct_from_mid)
    }

    /// (bidLiq − askLiq) / (bidLiq + askLiq) over a fixed 1% band around
    /// mid. Zero when there is no liquidity in the band.
    pub fn imbalance(&self) -> f64 {
        self.inner.read().imbalance()
    }

    /// Whether `quantity` is reachable at-or-better than `price`.
    pub fn can_fill(&self, side: Side, price: f64, quantity: f64) -> bool {
        self.inner.read().can_fill(side, price, quantity)
    }

    /// Quantity-weighted average price of a market order for `quantity`,
    /// walking levels from the best outward. `None` when the side's total
    /// depth cannot cover the quantity.
    pub fn fill_price(&self, side: Side, quantity: f64) -> Option<f64> {
        self.inner.read().fill_price(side, quantity)
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl BookState {
    fn best_bid(&self) -> Option<(f64, f64)> {
        self.bids.first().map(|level| (level.price, level.quantity))
    }

    fn best_ask(&self) -> Option<(f64, f64)> {
        self.asks.first().map(|level| (level.price, level.quantity))
    }

    fn spread(&self) -> Option<f64> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        Some(ask - bid)
    }

    fn mid_price(&self) -> Option<f64> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        Some((bid + ask) / 2.0)
    }

    fn cumulative_depth(&self, side: Side, price_level: f64) -> f64 {
        match side {
            Side::Buy => self
                .bids
                .iter()
                .filter(|level| level.price >= price_level)
                .map(|level| level.quantity)
                .sum(),
            Side::Sell => self
                .asks
                .iter()
                .filter(|level| level.price <= price_level)
                .map(|level| level.quantity)
                .sum(),
        }
    }

    fn liquidity(&self, pct_from_mid: f64) -> (f64, f64) {
        let Some(mid) = self.mid_price() else {
            return (0.0, 0.0);
        };

        let min_bid = mid * (1.0 - pct_from_mid);
        let bid_liquidity = self
            .bids
            .iter()
            .filter(|level| level.price >= min_bid)
            .map(|level| level.quantity)
            .sum();

        let max_ask = mid * (1.0 + pct_from_mid);
        let ask_liquidity = self
            .asks
            .iter()
            .filter(|level| level.price <= max_ask)
            .map(|level| level.quantity)
            .sum();

        (bid_liquidity, ask_liquidity)
    }

    fn imbalance(&self) -> f64 {
        let (bid_liquidity, ask_liquidity) = self.liquidity(IMBALANCE_BAND);
        let total = bid_liquidity + ask_liquidity;
        if total == 0.0 {
            return 0.0;
        }
        (bid_liquidity - ask_liquidity) / total
    }

    fn can_fill(&self, side: Side, price: f64, quantity: f64) -> bool {
        let mut available = 0.0;
        match side {
            // Buying consumes asks priced at or below the limit.
            Side::Buy => {
                for ask in &self.asks {
                    if ask.price <= price {
                        available += ask.quantity;
                        if available >= quantity {
                            return true;
                        }
                    }
                }
            }
            // Selling consumes bids priced at or above the limit.
            Side::Sell => {
                for bid in &self.bids {
                    if bid.price >= price {
                        available += bid.quantity;
                        if available >= quantity {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    fn fill_price(&self, side: Side, quantity: f64) -> Option<f64> {
        let levels = match side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };

        let mut remaining = quantity;
        let mut total_cost = 0.0;
        for level in levels {
            if remaining <= 0.0 {
                break;
            }
            let consumed = level.quantity.min(remaining);
            total_cost += consumed * level.price;
            remaining -= consumed;
        }

        if remaining > 0.0 {
            return None;
        }
        Some(total_cost / quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: f64, quantity: f64) -> PriceLevel {
        PriceLevel { price, quantity }
    }

    fn snapshot(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> BookSnapshot {
        BookSnapshot {
            symbol: "BTCUSD".to_string(),
            timestamp: Utc::now(),
            bids,
            asks,
        }
    }

    fn populated_book() -> OrderBook {
        let book = OrderBook::new();
        book.replace(snapshot(
            vec![level(49950.0, 2.0), level(50000.0, 1.0), level(49900.0, 1.5)],
            vec![level(50150.0, 2.0), level(50100.0, 1.0), level(50200.0, 1.5)],
        ));
        book
    }

    #[test]
    fn replace_sorts_both_sides() {
        let book = populated_book();
        let state = book.inner.read();
        let bid_prices: Vec<f64> = state.bids.iter().map(|l| l.price).collect();
        let ask_prices: Vec<f64> = state.asks.iter().map(|l| l.price).collect();
        assert_eq!(bid_prices, vec![50000.0, 49950.0, 49900.0]);
        assert_eq!(ask_prices, vec![50100.0, 50150.0, 50200.0]);
    }

    #[test]
    fn best_of_book_present_iff_side_nonempty() {
        let empty = OrderBook::new();
        assert_eq!(empty.best_bid(), None);
        assert_eq!(empty.best_ask(), None);

        let book = populated_book();
        assert_eq!(book.best_bid(), Some((50000.0, 1.0)));
        assert_eq!(book.best_ask(), Some((50100.0, 1.0)));

        let one_sided = OrderBook::new();
        one_sided.replace(snapshot(vec![level(100.0, 1.0)], vec![]));
        assert_eq!(one_sided.best_bid(), Some((100.0, 1.0)));
        assert_eq!(one_sided.best_ask(), None);
    }

    #[test]
    fn spread_and_mid() {
        let book = populated_book();
        assert_eq!(book.spread(), Some(100.0));
        assert_eq!(book.mid_price(), Some(50050.0));

        let empty = OrderBook::new();
        assert_eq!(empty.spread(), None);
        assert_eq!(empty.mid_price(), None);
    }

    #[test]
    fn cumulative_depth_at_or_better() {
        let book = populated_book();
        assert_eq!(book.cumulative_depth(Side::Buy, 49950.0), 3.0);
        assert_eq!(book.cumulative_depth(Side::Sell, 50150.0), 3.0);
        assert_eq!(book.cumulative_depth(Side::Buy, 50001.0), 0.0);
    }

    #[test]
    fn can_fill_checks_reachable_depth() {
        let book = populated_book();
        assert!(book.can_fill(Side::Buy, 50150.0, 2.5));
        assert!(!book.can_fill(Side::Buy, 50150.0, 4.0));
        assert!(book.can_fill(Side::Sell, 49950.0, 2.5));
        assert!(!book.can_fill(Side::Sell, 49950.0, 4.0));
        // Below every ask: nothing reachable.
        assert!(!book.can_fill(Side::Buy, 49000.0, 0.5));
    }

    #[test]
    fn fill_price_walks_best_levels_first() {
        let book = populated_book();
        // 1.0 @ 50100 then 1.0 @ 50150.
        assert_eq!(book.fill_price(Side::Buy, 2.0), Some(50125.0));
        // 1.0 @ 50000 then 1.0 @ 49950.
        assert_eq!(book.fill_price(Side::Sell, 2.0), Some(49975.0));
        // Total ask depth is 4.5.
        assert_eq!(book.fill_price(Side::Buy, 5.0), None);
    }

    #[test]
    fn fill_price_weighted_average_example() {
        let book = OrderBook::new();
        book.replace(snapshot(
            vec![],
            vec![level(101.0, 1.0), level(101.5, 2.0), level(102.0, 1.5)],
        ));
        let price = book.fill_price(Side::Buy, 2.5).expect("fillable");
        assert!((price - 101.30).abs() < 1e-9);
    }

    #[test]
    fn liquidity_within_band() {
        let book = OrderBook::new();
        book.replace(snapshot(
            vec![level(50000.0, 1.0), level(49500.0, 2.0)],
            vec![level(50100.0, 1.0), level(50600.0, 2.0)],
        ));
        // Mid 50050; the 1% band keeps only the inner levels.
        let (bid_liquidity, ask_liquidity) = book.liquidity(0.01);
        assert_eq!(bid_liquidity, 1.0);
        assert_eq!(ask_liquidity, 1.0);
    }

    #[test]
    fn imbalance_over_fixed_band() {
        let book = OrderBook::new();
        book.replace(snapshot(
            vec![level(50000.0, 3.0)],
            vec![level(50100.0, 1.0)],
        ));
        assert_eq!(book.imbalance(), 0.5);

        let empty = OrderBook::new();
        assert_eq!(empty.imbalance(), 0.0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn unique_levels() -> impl Strategy<Value = Vec<PriceLevel>> {
            proptest::collection::vec((1.0f64..10_000.0, 0.01f64..100.0), 0..32).prop_map(
                |raw| {
                    let mut seen = std::collections::BTreeSet::new();
                    raw.into_iter()
                        .filter(|(price, _)| seen.insert(OrderedFloat(*price)))
                        .map(|(price, quantity)| level(price, quantity))
                        .collect()
                },
            )
        }

        proptest! {
            #[test]
            fn replace_leaves_sides_strictly_sorted(
                bids in unique_levels(),
                asks in unique_levels(),
            ) {
                let book = OrderBook::new();
                book.replace(snapshot(bids, asks));
                let state = book.inner.read();
                prop_assert!(state
                    .bids
                    .windows(2)
                    .all(|pair| pair[0].price > pair[1].price));
                prop_assert!(state
                    .asks
                    .windows(2)
                    .all(|pair| pair[0].price < pair[1].price));
            }

            #[test]
            fn fill_price_defined_iff_depth_covers_quantity(
                asks in unique_levels(),
                quantity in 0.01f64..500.0,
            ) {
                let book = OrderBook::new();
                let total: f64 = asks.iter().map(|l| l.quantity).sum();
                // Keep the comparison away from float-summation noise.
                prop_assume!((total - quantity).abs() > 1e-6);
                book.replace(snapshot(vec![], asks));
                let price = book.fill_price(Side::Buy, quantity);
                prop_assert_eq!(price.is_some(), total >= quantity);
            }
        }
    }
}
