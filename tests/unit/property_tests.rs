//! Property-based checks: codec round trips, ladder ordering, coalescing
//! conservation, and FIFO priority.

use crate::support::{RecordingClient, fx, registry_with_ibm, session_order};
use exchange_rs::TradeIds;
use exchange_rs::prelude::*;
use exchange_rs::wire::{
    Reader, read_fixed, read_uvarint, read_varint, write_fixed, write_uvarint, write_varint,
};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Codec round trips
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn uvarint_round_trips(x in any::<u64>()) {
        let mut buf = Vec::new();
        write_uvarint(&mut buf, x);
        prop_assert_eq!(read_uvarint(&mut Reader::new(&buf)).unwrap(), x);
    }

    #[test]
    fn varint_round_trips(x in any::<i64>()) {
        let mut buf = Vec::new();
        write_varint(&mut buf, x);
        prop_assert_eq!(read_varint(&mut Reader::new(&buf)).unwrap(), x);
    }

    #[test]
    fn fixed_round_trips(mantissa in any::<i64>()) {
        let value = Fixed::from_mantissa(mantissa);
        let mut buf = Vec::new();
        write_fixed(&mut buf, value);
        prop_assert_eq!(read_fixed(&mut Reader::new(&buf)).unwrap(), value);
    }
}

// ---------------------------------------------------------------------------
// Ladder ordering (adds and removes keep prices monotonic, levels non-empty)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Add { buy: bool, price: u8, quantity: u8 },
    Remove { index: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<bool>(), 1u8..=20, 1u8..=9).prop_map(|(buy, price, quantity)| Op::Add {
            buy,
            price,
            quantity
        }),
        (0usize..64).prop_map(|index| Op::Remove { index }),
    ]
}

fn assert_ladder_invariants(book: &OrderBook) {
    let bid_prices: Vec<Fixed> = book.bids().iter().map(|l| l.price()).collect();
    let ask_prices: Vec<Fixed> = book.asks().iter().map(|l| l.price()).collect();

    assert!(
        bid_prices.windows(2).all(|w| w[0] > w[1]),
        "bid ladder not strictly descending: {bid_prices:?}"
    );
    assert!(
        ask_prices.windows(2).all(|w| w[0] < w[1]),
        "ask ladder not strictly ascending: {ask_prices:?}"
    );
    assert!(
        book.bids().iter().chain(book.asks()).all(|l| !l.is_empty()),
        "empty level retained"
    );
    if let (Some(best_bid), Some(best_ask)) = (bid_prices.first(), ask_prices.first()) {
        assert!(
            best_bid < best_ask,
            "book at rest is crossed: {best_bid} >= {best_ask}"
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ladder_stays_ordered_under_random_ops(ops in proptest::collection::vec(op_strategy(), 1..60)) {
        let (_registry, instrument) = registry_with_ibm();
        let client = RecordingClient::new("prop");
        let mut book = OrderBook::new(instrument.clone());
        let ids = TradeIds::new();
        let mut live: Vec<SessionOrder> = Vec::new();
        let mut next_id = 0;

        for op in ops {
            match op {
                Op::Add { buy, price, quantity } => {
                    next_id += 1;
                    let side = if buy { Side::Buy } else { Side::Sell };
                    let order = Order::limit(
                        instrument.clone(),
                        OrderId(next_id),
                        side,
                        Fixed::from_i64(i64::from(price)),
                        Fixed::from_i64(i64::from(quantity)),
                    );
                    let so = session_order(&client, order);
                    book.add(so.clone(), &ids);
                    live.push(so);
                }
                Op::Remove { index } => {
                    if live.is_empty() {
                        continue;
                    }
                    let so = live.remove(index % live.len());
                    // removal may race a fill; both outcomes are legal
                    let _ = book.remove(&so);
                }
            }

            assert_ladder_invariants(&book);

            // remaining/state invariant across every order ever admitted
            for so in &live {
                let order = so.order.lock().unwrap();
                prop_assert!(!order.remaining.is_negative());
                prop_assert!(order.remaining <= order.quantity);
                prop_assert_eq!(
                    order.remaining.is_zero(),
                    order.state == OrderState::Filled
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Coalescing conserves quantity per instrument
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn coalescing_conserves_quantity(
        fills in proptest::collection::vec((1u8..=5, 1u8..=100), 1..20)
    ) {
        let (_registry, instrument) = registry_with_ibm();
        let client = RecordingClient::new("prop");
        let trades: Vec<Trade> = fills
            .iter()
            .map(|(price, quantity)| {
                let price = Fixed::from_i64(i64::from(*price) * 10);
                let quantity = Fixed::from_i64(i64::from(*quantity));
                let buy = session_order(
                    &client,
                    Order::limit(instrument.clone(), OrderId(1), Side::Buy, price, quantity),
                );
                let sell = session_order(
                    &client,
                    Order::limit(instrument.clone(), OrderId(2), Side::Sell, price, quantity),
                );
                Trade {
                    buyer: buy,
                    seller: sell,
                    price,
                    quantity,
                    trade_id: 1,
                    when: std::time::SystemTime::now(),
                    buy_remaining: Fixed::ZERO,
                    sell_remaining: Fixed::ZERO,
                }
            })
            .collect();

        let wire = exchange_rs::coalesce_trades(&trades);

        let engine_total: Fixed = trades.iter().map(|t| t.quantity).sum();
        let wire_total: Fixed = wire.iter().map(|t| t.quantity).sum();
        prop_assert_eq!(engine_total, wire_total);

        // coalescing only ever shrinks the list and keeps prices in order
        prop_assert!(wire.len() <= trades.len());
        for window in wire.windows(2) {
            prop_assert!(window[0].price != window[1].price);
        }
    }
}

// ---------------------------------------------------------------------------
// FIFO within a level
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn resting_orders_fill_in_admission_order(quantities in proptest::collection::vec(1u8..=9, 2..6)) {
        let (_registry, instrument) = registry_with_ibm();
        let client = RecordingClient::new("prop");
        let mut book = OrderBook::new(instrument.clone());
        let ids = TradeIds::new();

        let mut resting = Vec::new();
        let mut total: i64 = 0;
        for (i, quantity) in quantities.iter().enumerate() {
            total += i64::from(*quantity);
            let so = session_order(
                &client,
                Order::limit(
                    instrument.clone(),
                    OrderId(i as i32),
                    Side::Buy,
                    fx("100"),
                    Fixed::from_i64(i64::from(*quantity)),
                ),
            );
            book.add(so.clone(), &ids);
            resting.push(so);
        }

        let sweep = session_order(
            &client,
            Order::limit(
                instrument.clone(),
                OrderId(99),
                Side::Sell,
                fx("100"),
                Fixed::from_i64(total),
            ),
        );
        let trades = book.add(sweep, &ids);

        prop_assert_eq!(trades.len(), resting.len());
        for (trade, expected) in trades.iter().zip(&resting) {
            prop_assert!(trade.buyer.same_order(expected));
        }
        prop_assert!(book.build_book().is_empty());
    }
}
