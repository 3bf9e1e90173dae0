//! Cross-module properties of the engine: cash conservation, lot consistency,
//! FIFO realization, fill-or-kill and IOC semantics, expiry flattening and
//! snapshot purity.

use std::collections::HashMap;

use chrono::NaiveDate;
use contract_backtest::backtest::{
    run_session, BacktestEngine, CommissionModel, MarkSource, SessionData, SlippageModel,
};
use contract_backtest::{
    Bar, ContractSpec, EngineConfig, OptionType, OrderRequest, OrderSide, OrderStatus, OrderType,
    TimeInForce,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(d as i64)
}

fn ohlc(d: u32, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
    Bar::new(day(d), open, high, low, close)
}

fn random_request(rng: &mut ChaCha8Rng, symbol: &str, price: Decimal) -> OrderRequest {
    let side = if rng.gen_bool(0.5) { OrderSide::Buy } else { OrderSide::Sell };
    let quantity = rng.gen_range(1..=5);
    let offset = Decimal::from(rng.gen_range(-2..=2));
    let tif = match rng.gen_range(0..4) {
        0 => TimeInForce::Day,
        1 => TimeInForce::Gtc,
        2 => TimeInForce::Ioc,
        _ => TimeInForce::Fok,
    };

    let request = match rng.gen_range(0..4) {
        0 => OrderRequest::market(symbol, side, quantity),
        1 => OrderRequest::limit(symbol, side, quantity, price + offset),
        2 => OrderRequest::stop(symbol, side, quantity, price + offset),
        _ => OrderRequest::stop_limit(symbol, side, quantity, price + offset, price + offset),
    }
    .with_time_in_force(tif);

    if rng.gen_ratio(1, 5) {
        request.reduce_only()
    } else {
        request
    }
}

const OPTION_EXPIRY_STEP: u32 = 90;
const FUTURE_EXPIRY_STEP: u32 = 150;

#[test]
fn test_cash_conservation_and_lot_consistency() {
    init_tracing();

    let mut config = EngineConfig::default();
    config.commission = CommissionModel::new(dec!(0.65));
    config.slippage = SlippageModel::bps(dec!(5));
    config.max_participation = Some(dec!(0.5));
    let initial = config.initial_cash;
    let mut engine = BacktestEngine::new(config);
    engine
        .upsert_contract(ContractSpec::option("OPT", "UND", OptionType::Put, dec!(100), day(365), dec!(100)))
        .unwrap();
    engine
        .upsert_contract(ContractSpec::option(
            "EXP",
            "EXPU",
            OptionType::Put,
            dec!(50),
            day(OPTION_EXPIRY_STEP),
            dec!(100),
        ))
        .unwrap();
    engine
        .upsert_contract(ContractSpec::future("FUT", "FUTU", day(FUTURE_EXPIRY_STEP), dec!(50)))
        .unwrap();

    let symbols = ["OPT", "PLAIN", "EXP", "FUT"];
    let underlying_prices = HashMap::from([
        ("EXPU".to_string(), dec!(47)),
        ("FUTU".to_string(), dec!(52)),
    ]);
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut last_close = dec!(50);
    let mut expected_cash = initial;
    let mut expected_qty: HashMap<&str, i64> = HashMap::new();
    // Last price the futures position was marked to.
    let mut future_mark = Decimal::ZERO;

    for step in 0..200u32 {
        let symbol = symbols[(step % 4) as usize];
        let expired = match symbol {
            "EXP" => step > OPTION_EXPIRY_STEP,
            "FUT" => step > FUTURE_EXPIRY_STEP,
            _ => false,
        };

        if !expired {
            for _ in 0..rng.gen_range(0..3) {
                engine.submit(random_request(&mut rng, symbol, last_close));
            }

            let open = (last_close + Decimal::from(rng.gen_range(-3..=3))).max(dec!(5));
            let close = (open + Decimal::from(rng.gen_range(-3..=3))).max(dec!(5));
            let high = open.max(close) + Decimal::from(rng.gen_range(0..3));
            let low = (open.min(close) - Decimal::from(rng.gen_range(0..3))).max(dec!(1));
            let bar = ohlc(step, open, high, low, close).with_volume(rng.gen_range(0..12));
            last_close = close;

            let multiplier = engine.contracts().multiplier(symbol);
            for fill in engine.process_bar(symbol, &bar) {
                let held = expected_qty.get(symbol).copied().unwrap_or(0);
                if symbol == "FUT" {
                    // Open quantity is marked to the fill before the trade.
                    expected_cash += (fill.price - future_mark) * multiplier * Decimal::from(held);
                    future_mark = fill.price;
                } else {
                    let notional = fill.price * multiplier * Decimal::from(fill.quantity);
                    expected_cash -= Decimal::from(fill.side.sign()) * notional;
                }
                expected_cash -= fill.fee_or_zero();
                *expected_qty.entry(symbol).or_default() += fill.signed_quantity();
            }

            if symbol == "FUT" {
                let held = expected_qty.get("FUT").copied().unwrap_or(0);
                let settles = HashMap::from([("FUT".to_string(), bar.close)]);
                let posted: Decimal = engine
                    .post_variation_margin(day(step), &settles)
                    .iter()
                    .map(|entry| entry.amount)
                    .sum();
                let owed = (bar.close - future_mark) * dec!(50) * Decimal::from(held);
                assert_eq!(posted, owed);
                expected_cash += owed;
                if held != 0 {
                    future_mark = bar.close;
                }
            }
        }

        for settlement in engine.settle_expiries(day(step), &underlying_prices) {
            let held = expected_qty.get(settlement.symbol.as_str()).copied().unwrap_or(0);
            assert_eq!(settlement.quantity, held);
            let owed = match settlement.symbol.as_str() {
                // Put struck at 50 with the underlying at 47.
                "EXP" => dec!(3) * dec!(100) * Decimal::from(held),
                "FUT" => (dec!(52) - future_mark) * dec!(50) * Decimal::from(held),
                other => panic!("unexpected settlement for {}", other),
            };
            assert_eq!(settlement.cash_amount, owed);
            expected_cash += owed;
            if let Some(qty) = expected_qty.get_mut(settlement.symbol.as_str()) {
                *qty = 0;
            }
        }
        if step == OPTION_EXPIRY_STEP {
            engine.cancel_all(Some("EXP"));
        }
        if step == FUTURE_EXPIRY_STEP {
            engine.cancel_all(Some("FUT"));
        }
        if step % 3 == 2 {
            engine.end_of_session();
        }

        let account = engine.account();
        assert_eq!(account.cash, account.journal_total());
        assert_eq!(account.cash, expected_cash);

        for symbol in symbols {
            assert_eq!(
                engine.net_quantity(symbol),
                expected_qty.get(symbol).copied().unwrap_or(0)
            );
            if let Some(position) = engine.position(symbol) {
                position.check_invariants();
                let lot_sum: i64 = position.lots.iter().map(|l| l.quantity).sum();
                assert_eq!(lot_sum, position.quantity);
                assert!(position
                    .lots
                    .iter()
                    .all(|l| l.quantity.signum() == position.quantity.signum()));
            }
        }
    }

    assert_eq!(engine.net_quantity("EXP"), 0);
    assert_eq!(engine.net_quantity("FUT"), 0);
    for order in engine.active_orders() {
        assert!(order.filled_qty < order.quantity);
        assert!(!order.status.is_terminal());
    }
}

#[test]
fn test_fifo_realization() {
    init_tracing();
    let mut engine = BacktestEngine::new(EngineConfig::frictionless(dec!(1_000)));

    for (d, price) in [(1, dec!(10)), (2, dec!(12)), (3, dec!(14))] {
        engine.submit(OrderRequest::market("X", OrderSide::Buy, 1));
        engine.process_bar("X", &Bar::flat(day(d), price));
    }
    engine.submit(OrderRequest::market("X", OrderSide::Sell, 2));
    engine.process_bar("X", &Bar::flat(day(4), dec!(15)));

    let position = engine.position("X").unwrap();
    assert_eq!(engine.realized_pnl("X"), dec!(8));
    assert_eq!(position.quantity, 1);
    assert_eq!(position.lots.len(), 1);
    assert_eq!(position.lots[0].price, dec!(14));
    assert_eq!(position.avg_price, dec!(14));
}

#[test]
fn test_market_and_gap_limit_average() {
    init_tracing();
    let mut engine = BacktestEngine::new(EngineConfig::frictionless(dec!(10_000)));

    engine.submit(OrderRequest::market("X", OrderSide::Buy, 5));
    let first = engine.process_bar("X", &ohlc(1, dec!(100), dec!(102), dec!(99), dec!(101)));
    engine.submit(OrderRequest::limit("X", OrderSide::Buy, 5, dec!(95)));
    let second = engine.process_bar("X", &ohlc(2, dec!(94), dec!(96), dec!(90), dec!(95)));

    assert_eq!(first[0].price, dec!(100));
    assert_eq!(second[0].price, dec!(94));
    assert_eq!(engine.net_quantity("X"), 10);
    assert_eq!(engine.avg_price("X"), dec!(97));
}

#[test]
fn test_fok_is_all_or_nothing() {
    init_tracing();
    let mut config = EngineConfig::frictionless(dec!(10_000));
    config.max_participation = Some(dec!(0.5));
    let mut engine = BacktestEngine::new(config);

    let thin = engine
        .submit(OrderRequest::market("X", OrderSide::Buy, 10).with_time_in_force(TimeInForce::Fok))
        .id;
    let fills = engine.process_bar("X", &Bar::flat(day(1), dec!(10)).with_volume(8));
    assert!(fills.is_empty());
    let order = engine.order(thin).unwrap();
    assert_eq!(order.status, OrderStatus::Expired);
    assert_eq!(order.filled_qty, 0);
    assert_eq!(engine.cash(), dec!(10_000));

    let deep = engine
        .submit(OrderRequest::market("X", OrderSide::Buy, 10).with_time_in_force(TimeInForce::Fok))
        .id;
    engine.process_bar("X", &Bar::flat(day(2), dec!(10)).with_volume(40));
    let order = engine.order(deep).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_qty, 10);
}

#[test]
fn test_ioc_residual_expires() {
    init_tracing();
    let mut config = EngineConfig::frictionless(dec!(10_000));
    config.max_participation = Some(dec!(0.5));
    let mut engine = BacktestEngine::new(config);

    let id = engine
        .submit(OrderRequest::market("X", OrderSide::Buy, 10).with_time_in_force(TimeInForce::Ioc))
        .id;
    engine.process_bar("X", &Bar::flat(day(1), dec!(10)).with_volume(8));

    let report = engine.order_report(id).unwrap();
    assert_eq!(report.status, OrderStatus::Expired);
    assert_eq!(report.filled_qty, 4);
    assert_eq!(report.remaining_qty, 0);
    assert!(engine.active_orders().is_empty());
}

#[test]
fn test_expiry_flattens_options_and_futures() {
    init_tracing();
    let mut engine = BacktestEngine::new(EngineConfig::frictionless(dec!(100_000)));
    let expiry = day(10);
    engine
        .upsert_contract(ContractSpec::option("P100", "UND", OptionType::Put, dec!(100), expiry, dec!(100)))
        .unwrap();
    engine
        .upsert_contract(ContractSpec::future("FUT", "ES", expiry, dec!(50)))
        .unwrap();

    engine.submit(OrderRequest::market("P100", OrderSide::Sell, 3));
    engine.process_bar("P100", &Bar::flat(day(1), dec!(4)));
    engine.submit(OrderRequest::market("FUT", OrderSide::Buy, 2));
    engine.process_bar("FUT", &Bar::flat(day(1), dec!(5000)));
    // Received 4 * 100 * 3 premium; the future posts nothing at fill.
    assert_eq!(engine.cash(), dec!(101_200));

    let settles = HashMap::from([("FUT".to_string(), dec!(5010))]);
    engine.post_variation_margin(day(9), &settles);
    assert_eq!(engine.cash(), dec!(102_200));

    let prices = HashMap::from([
        ("UND".to_string(), dec!(97)),
        ("ES".to_string(), dec!(5020)),
    ]);
    let settlements = engine.settle_expiries(expiry, &prices);
    assert_eq!(settlements.len(), 2);

    // Short put pays 3 intrinsic on 3 contracts; future takes 5020 - 5010.
    let put = settlements.iter().find(|s| s.symbol == "P100").unwrap();
    assert_eq!(put.cash_amount, dec!(-900));
    assert_eq!(put.realized_pnl, dec!(-900));

    let future = settlements.iter().find(|s| s.symbol == "FUT").unwrap();
    assert_eq!(future.cash_amount, dec!(1_000));
    assert_eq!(future.realized_pnl, dec!(2_000));

    assert_eq!(engine.net_quantity("P100"), 0);
    assert_eq!(engine.net_quantity("FUT"), 0);
    assert!(engine.snapshot(expiry, &HashMap::new()).positions.is_empty());
    assert_eq!(engine.cash(), dec!(102_300));
    assert_eq!(engine.cash(), engine.account().journal_total());
}

#[test]
fn test_snapshot_is_idempotent() {
    init_tracing();
    let mut engine = BacktestEngine::new(EngineConfig::frictionless(dec!(10_000)));
    engine.submit(OrderRequest::market("X", OrderSide::Buy, 3));
    engine.process_bar("X", &ohlc(1, dec!(20), dec!(21), dec!(19), dec!(20.5)));

    let bars = HashMap::from([(
        "X".to_string(),
        ohlc(2, dec!(21), dec!(23), dec!(20), dec!(22)).with_settle(dec!(22.25)),
    )]);
    let cash_before = engine.cash();
    let journal_before = engine.account().journal().len();

    let first = engine.snapshot(day(2), &bars);
    let second = engine.snapshot(day(2), &bars);
    assert_eq!(first, second);
    assert_eq!(engine.cash(), cash_before);
    assert_eq!(engine.account().journal().len(), journal_before);

    let position = first.position("X").unwrap();
    assert_eq!(position.mark, dec!(22.25));
    assert_eq!(position.mark_source, MarkSource::Supplied);
    assert_eq!(first.unrealized_pnl, dec!(6.75));
    assert_eq!(first.equity, dec!(9_946.75));
    assert_eq!(first.equity, first.cash + first.unrealized_pnl);
}

#[test]
fn test_snapshot_serializes() {
    init_tracing();
    let mut engine = BacktestEngine::new(EngineConfig::frictionless(dec!(1_000)));
    let session = SessionData::new(day(1))
        .with_order(OrderRequest::market("X", OrderSide::Buy, 2))
        .with_bar("X", Bar::flat(day(1), dec!(7)));
    let report = run_session(&mut engine, &session);

    let json = serde_json::to_value(&report.snapshot).unwrap();
    assert_eq!(json["date"], "2024-01-02");
    assert_eq!(json["positions"][0]["symbol"], "X");
    assert_eq!(json["positions"][0]["mark_source"], "supplied");

    let order = serde_json::to_value(&report.submitted[0]).unwrap();
    assert_eq!(order["status"], serde_json::to_value(OrderStatus::New).unwrap());
}

#[test]
fn test_rejected_orders_never_queue() {
    init_tracing();
    let mut engine = BacktestEngine::new(EngineConfig::frictionless(dec!(1_000)));
    let reports = [
        engine.submit(OrderRequest::market("X", OrderSide::Buy, 0)),
        engine.submit(OrderRequest::new("X", OrderSide::Buy, 1, OrderType::Limit)),
        engine.submit(OrderRequest::new("X", OrderSide::Sell, 1, OrderType::Stop)),
        engine.submit(OrderRequest::market("", OrderSide::Buy, 1)),
    ];
    assert!(reports.iter().all(|r| r.status == OrderStatus::Rejected));
    assert!(engine.active_orders().is_empty());
    assert!(engine.process_bar("X", &Bar::flat(day(1), dec!(1))).is_empty());
}
