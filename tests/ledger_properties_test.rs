use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tradebot::accounting::{quantize, recompute, EventType, LedgerError, LedgerEvent};
use tradebot::Side;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

fn event_log() -> Vec<LedgerEvent> {
    vec![
        LedgerEvent::fill("b1", at(0), "BTCTRY", Side::Buy, dec!(0.01), dec!(2000000)),
        LedgerEvent::fill("b2", at(10), "BTCTRY", Side::Buy, dec!(0.02), dec!(2050000.5)),
        LedgerEvent::cash("f1", at(10), EventType::Fee, dec!(4.1001)).with_symbol("BTCTRY"),
        LedgerEvent::fill("e1", at(15), "ETHTRY", Side::Buy, dec!(1.333333333), dec!(110000)),
        LedgerEvent::fill("s1", at(20), "BTCTRY", Side::Sell, dec!(0.015), dec!(2100000)),
        LedgerEvent::cash("f2", at(20), EventType::Fee, dec!(3.15)).with_symbol("BTCTRY"),
        LedgerEvent::cash("fc", at(25), EventType::FundingCost, dec!(0.75)).with_symbol("ETHTRY"),
        LedgerEvent::cash("sl", at(25), EventType::Slippage, dec!(12.5)).with_symbol("ETHTRY"),
        LedgerEvent::fill("e2", at(30), "ETHTRY", Side::Sell, dec!(0.333333333), dec!(115000)),
        LedgerEvent::cash("tr", at(40), EventType::Transfer, dec!(-250)),
        LedgerEvent::cash("rb", at(45), EventType::Rebalance, dec!(100)),
        LedgerEvent::cash("fx", at(50), EventType::Fee, dec!(0.00001)).with_fee_currency("BNB"),
    ]
}

fn marks() -> HashMap<String, Decimal> {
    HashMap::from([
        ("BTCTRY".to_string(), dec!(2080000)),
        ("ETHTRY".to_string(), dec!(112000.123456789)),
    ])
}

fn snapshot(events: &[LedgerEvent]) -> String {
    let state = recompute(events, at(3600), &marks(), dec!(100000), dec!(5000)).unwrap();
    serde_json::to_string(&state).unwrap()
}

#[test]
fn test_recompute_is_order_and_duplication_invariant() {
    let baseline = snapshot(&event_log());

    for seed in 0..25u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut events = event_log();

        // Duplicate a random subset, then shuffle
        let extra: Vec<LedgerEvent> = events
            .iter()
            .filter(|_| rng.gen_bool(0.4))
            .cloned()
            .collect();
        events.extend(extra);
        events.shuffle(&mut rng);

        assert_eq!(snapshot(&events), baseline, "seed {seed}");
    }
}

#[test]
fn test_every_output_value_is_quantized() {
    let state = recompute(&event_log(), at(3600), &marks(), dec!(100000), dec!(5000)).unwrap();

    let mut values = vec![
        state.cash_try,
        state.treasury_try,
        state.equity_try,
        state.realized_pnl_try,
        state.unrealized_pnl_try,
        state.fees_try,
        state.inventory_cost_try,
    ];
    for symbol in state.symbols.values() {
        values.extend([symbol.qty, symbol.cost_basis, symbol.avg_cost, symbol.realized_pnl]);
    }
    for value in values {
        assert_eq!(quantize(value), value);
        assert_eq!(value.scale(), 8, "{value}");
    }
}

#[test]
fn test_oversell_errors_in_every_ordering() {
    let mut base = vec![
        LedgerEvent::fill("b1", at(0), "BTCTRY", Side::Buy, dec!(1), dec!(100)),
        LedgerEvent::fill("s1", at(5), "BTCTRY", Side::Sell, dec!(0.7), dec!(110)),
        LedgerEvent::fill("s2", at(9), "BTCTRY", Side::Sell, dec!(0.4), dec!(120)),
        LedgerEvent::cash("f1", at(3), EventType::Fee, dec!(0.1)),
    ];

    for seed in 0..10u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        base.shuffle(&mut rng);
        let err = recompute(&base, at(60), &HashMap::new(), dec!(1000), dec!(0)).unwrap_err();
        match err {
            LedgerError::Oversell {
                symbol,
                event_id,
                requested,
                available,
            } => {
                assert_eq!(symbol, "BTCTRY");
                assert_eq!(event_id, "s2");
                assert_eq!(requested, dec!(0.4));
                assert_eq!(available, dec!(0.3));
            }
            other => panic!("expected oversell, got {other:?}"),
        }
    }
}

#[test]
fn test_oversell_outside_window_is_not_applied() {
    let events = vec![
        LedgerEvent::fill("b1", at(0), "BTCTRY", Side::Buy, dec!(1), dec!(100)),
        LedgerEvent::fill("s1", at(500), "BTCTRY", Side::Sell, dec!(5), dec!(110)),
    ];
    assert!(recompute(&events, at(60), &HashMap::new(), dec!(1000), dec!(0)).is_ok());
    assert!(recompute(&events, at(600), &HashMap::new(), dec!(1000), dec!(0)).is_err());
}

#[test]
fn test_fifo_partial_sell_scenario() {
    let events = vec![
        LedgerEvent::fill("buy", at(0), "BTCTRY", Side::Buy, dec!(1), dec!(100)),
        LedgerEvent::fill("sell", at(1), "BTCTRY", Side::Sell, dec!(0.4), dec!(130)),
    ];
    let state = recompute(&events, at(60), &HashMap::new(), dec!(1000), dec!(0)).unwrap();
    let btc = &state.symbols["BTCTRY"];

    assert_eq!(btc.realized_pnl.to_string(), "12.00000000");
    assert_eq!(btc.lots.len(), 1);
    assert_eq!(btc.lots[0].qty.to_string(), "0.60000000");
    assert_eq!(btc.lots[0].unit_cost.to_string(), "100.00000000");
}

#[test]
fn test_fee_total_independent_of_order() {
    let a = LedgerEvent::cash("fee-a", at(1), EventType::Fee, dec!(0.1)).with_symbol("ETHTRY");
    let b = LedgerEvent::cash("fee-b", at(2), EventType::Fee, dec!(0.05)).with_symbol("ETHTRY");

    for events in [vec![a.clone(), b.clone()], vec![b, a]] {
        let state = recompute(&events, at(60), &HashMap::new(), dec!(10), dec!(0)).unwrap();
        assert_eq!(state.symbols["ETHTRY"].fees.to_string(), "0.15000000");
    }
}
