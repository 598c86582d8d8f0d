//! Position ledger tests

use super::*;
use crate::types::Direction;
use rust_decimal_macros::dec;

fn fill(direction: Direction, price: Decimal, volume: i64) -> Fill {
    Fill {
        instrument: "SIM-RB".to_string(),
        direction,
        price,
        volume,
    }
}

#[test]
fn test_open_then_close_leaves_no_position() {
    let mut book = ModuleBook::new("TESTM");
    book.apply(&fill(Direction::OpenLong, dec!(3500), 1)).unwrap();
    let outcome = book.apply(&fill(Direction::CloseLong, dec!(3510), 1)).unwrap();

    assert!(outcome.position.is_none());
    assert!(book.positions().is_empty());
    assert_eq!(outcome.deals.len(), 1);
    assert_eq!(outcome.deals[0].profit, dec!(10));
}

#[test]
fn test_two_opens_two_closes() {
    let mut book = ModuleBook::new("TESTM");
    book.apply(&fill(Direction::OpenLong, dec!(100), 1)).unwrap();
    let outcome = book.apply(&fill(Direction::OpenLong, dec!(100), 1)).unwrap();
    assert_eq!(outcome.position.unwrap().net_volume, 2);

    let outcome = book.apply(&fill(Direction::CloseLong, dec!(100), 1)).unwrap();
    assert_eq!(outcome.position.unwrap().net_volume, 1);

    let outcome = book.apply(&fill(Direction::CloseLong, dec!(100), 1)).unwrap();
    assert!(outcome.position.is_none());
    assert!(book.positions().is_empty());
}

#[test]
fn test_short_side_signs() {
    let mut book = ModuleBook::new("TESTM");
    let outcome = book.apply(&fill(Direction::OpenShort, dec!(200), 3)).unwrap();
    let position = outcome.position.unwrap();
    assert_eq!(position.net_volume, -3);
    assert_eq!(position.side(), Some(PositionSide::Short));

    let outcome = book.apply(&fill(Direction::CloseShort, dec!(190), 2)).unwrap();
    assert_eq!(outcome.position.unwrap().net_volume, -1);
    // short profits when price falls
    assert_eq!(outcome.deals[0].profit, dec!(20));
}

#[test]
fn test_avg_price_weighted_on_open_unchanged_on_close() {
    let mut book = ModuleBook::new("TESTM");
    book.apply(&fill(Direction::OpenLong, dec!(100), 1)).unwrap();
    let outcome = book.apply(&fill(Direction::OpenLong, dec!(130), 2)).unwrap();
    assert_eq!(outcome.position.unwrap().avg_price, dec!(120));

    let outcome = book.apply(&fill(Direction::CloseLong, dec!(150), 1)).unwrap();
    assert_eq!(outcome.position.unwrap().avg_price, dec!(120));
}

#[test]
fn test_close_exceeding_position_rejected() {
    let mut book = ModuleBook::new("TESTM");
    book.apply(&fill(Direction::OpenLong, dec!(100), 1)).unwrap();

    let err = book.apply(&fill(Direction::CloseLong, dec!(100), 2));
    assert!(matches!(err, Err(DeskError::Validation(_))));
    assert_eq!(book.positions()[0].net_volume, 1);
}

#[test]
fn test_close_without_position_rejected() {
    let mut book = ModuleBook::new("TESTM");
    assert!(matches!(
        book.apply(&fill(Direction::CloseLong, dec!(100), 1)),
        Err(DeskError::Validation(_))
    ));

    book.apply(&fill(Direction::OpenLong, dec!(100), 1)).unwrap();
    // closing the short side of a long position
    assert!(matches!(
        book.apply(&fill(Direction::CloseShort, dec!(100), 1)),
        Err(DeskError::Validation(_))
    ));
}

#[test]
fn test_open_opposite_side_rejected() {
    let mut book = ModuleBook::new("TESTM");
    book.apply(&fill(Direction::OpenLong, dec!(100), 1)).unwrap();

    assert!(matches!(
        book.apply(&fill(Direction::OpenShort, dec!(100), 1)),
        Err(DeskError::Validation(_))
    ));
}

#[test]
fn test_invalid_price_and_volume() {
    let mut book = ModuleBook::new("TESTM");
    assert!(book.apply(&fill(Direction::OpenLong, dec!(100), 0)).is_err());
    assert!(book.apply(&fill(Direction::OpenLong, dec!(100), -1)).is_err());
    assert!(book.apply(&fill(Direction::OpenLong, dec!(0), 1)).is_err());
    assert!(book.positions().is_empty());
}

#[test]
fn test_fifo_matching_splits_lots() {
    let mut book = ModuleBook::new("TESTM");
    book.apply(&fill(Direction::OpenLong, dec!(100), 2)).unwrap();
    book.apply(&fill(Direction::OpenLong, dec!(110), 2)).unwrap();

    let outcome = book.apply(&fill(Direction::CloseLong, dec!(120), 3)).unwrap();
    assert_eq!(outcome.deals.len(), 2);
    assert_eq!(outcome.deals[0].open_price, dec!(100));
    assert_eq!(outcome.deals[0].volume, 2);
    assert_eq!(outcome.deals[0].profit, dec!(40));
    assert_eq!(outcome.deals[1].open_price, dec!(110));
    assert_eq!(outcome.deals[1].volume, 1);
    assert_eq!(outcome.deals[1].profit, dec!(10));

    let outcome = book.apply(&fill(Direction::CloseLong, dec!(105), 1)).unwrap();
    assert_eq!(outcome.deals[0].open_price, dec!(110));
    assert_eq!(outcome.deals[0].profit, dec!(-5));
    assert_eq!(book.deals().len(), 3);
}

#[test]
fn test_stats_track_peak_and_drawdown() {
    let mut book = ModuleBook::new("TESTM");
    book.apply(&fill(Direction::OpenLong, dec!(100), 1)).unwrap();
    book.apply(&fill(Direction::CloseLong, dec!(150), 1)).unwrap();
    book.apply(&fill(Direction::OpenLong, dec!(150), 1)).unwrap();
    book.apply(&fill(Direction::CloseLong, dec!(120), 1)).unwrap();

    let stats = book.stats();
    assert_eq!(stats.acc_close_profit, dec!(20));
    assert_eq!(stats.acc_deal_volume, 2);
    assert_eq!(stats.max_profit, dec!(50));
    assert_eq!(stats.max_drawdown, dec!(30));
}

#[test]
fn test_reset_clears_everything() {
    let mut book = ModuleBook::new("TESTM");
    book.apply(&fill(Direction::OpenLong, dec!(100), 2)).unwrap();
    book.apply(&fill(Direction::CloseLong, dec!(101), 1)).unwrap();

    book.reset();
    assert!(book.positions().is_empty());
    assert!(book.deals().is_empty());
    assert_eq!(book.stats(), &BookStats::default());
    // no stale lots left to match against
    assert!(book.apply(&fill(Direction::CloseLong, dec!(100), 1)).is_err());
}

#[test]
fn test_open_overflow_leaves_book_unchanged() {
    let mut book = ModuleBook::new("TESTM");
    book.apply(&fill(Direction::OpenLong, Decimal::MAX, 1)).unwrap();

    let err = book.apply(&fill(Direction::OpenLong, Decimal::MAX, 1)).unwrap_err();
    assert!(matches!(err, DeskError::Validation(_)));
    let positions = book.positions();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].net_volume, 1);
    assert_eq!(positions[0].avg_price, Decimal::MAX);
}

#[test]
fn test_open_volume_overflow_rejected() {
    let mut book = ModuleBook::new("TESTM");
    book.apply(&fill(Direction::OpenShort, dec!(1), i64::MAX)).unwrap();

    let err = book.apply(&fill(Direction::OpenShort, dec!(1), 1)).unwrap_err();
    assert!(matches!(err, DeskError::Validation(_)));
    assert_eq!(book.positions()[0].net_volume, -i64::MAX);
}

#[test]
fn test_close_overflow_consumes_no_lots() {
    let mut book = ModuleBook::new("TESTM");
    book.apply(&fill(Direction::OpenLong, dec!(100), 1)).unwrap();
    book.apply(&fill(Direction::OpenLong, dec!(100), 1)).unwrap();

    // the first lot fits, the running total of the second does not
    let err = book.apply(&fill(Direction::CloseLong, Decimal::MAX, 2)).unwrap_err();
    assert!(matches!(err, DeskError::Validation(_)));
    assert_eq!(book.positions()[0].net_volume, 2);
    assert!(book.deals().is_empty());
    assert_eq!(book.stats(), &BookStats::default());

    let outcome = book.apply(&fill(Direction::CloseLong, dec!(110), 2)).unwrap();
    assert!(outcome.position.is_none());
    assert_eq!(outcome.deals.len(), 2);
    assert_eq!(book.stats().acc_close_profit, dec!(20));
}

#[test]
fn test_ledger_unknown_module() {
    let ledger = PositionLedger::new();
    assert!(matches!(ledger.positions("nope"), Err(DeskError::NotFound(_))));
    assert!(matches!(
        ledger.apply_fill("nope", &fill(Direction::OpenLong, dec!(1), 1)),
        Err(DeskError::NotFound(_))
    ));
}

#[test]
fn test_ledger_books_are_independent() {
    let ledger = PositionLedger::new();
    ledger.open_book("A");
    ledger.open_book("B");

    ledger.apply_fill("A", &fill(Direction::OpenLong, dec!(10), 1)).unwrap();
    assert_eq!(ledger.positions("A").unwrap().len(), 1);
    assert!(ledger.positions("B").unwrap().is_empty());

    ledger.remove("A");
    assert!(ledger.positions("A").is_err());
    assert_eq!(ledger.export().len(), 1);
}

#[test]
fn test_open_book_keeps_existing() {
    let ledger = PositionLedger::new();
    ledger.open_book("A");
    ledger.apply_fill("A", &fill(Direction::OpenLong, dec!(10), 1)).unwrap();
    ledger.open_book("A");

    assert_eq!(ledger.positions("A").unwrap()[0].net_volume, 1);
}

#[test]
fn test_concurrent_fills_serialise() {
    let ledger = Arc::new(PositionLedger::new());
    ledger.open_book("TESTM");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    ledger
                        .apply_fill("TESTM", &fill(Direction::OpenLong, dec!(100), 1))
                        .unwrap();
                    ledger
                        .apply_fill("TESTM", &fill(Direction::CloseLong, dec!(101), 1))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(ledger.positions("TESTM").unwrap().is_empty());
    let book = ledger.book("TESTM").unwrap();
    let book = book.lock();
    assert_eq!(book.deals().len(), 400);
    assert_eq!(book.stats().acc_close_profit, dec!(400));
}
