//! Tests for identifiers

use std::str::FromStr;

use crate::{Generator, Uid};

#[test]
fn zero_is_absent() {
    assert!(Uid::ZERO.is_zero());
    assert!(!Uid::new().is_zero());
    assert_eq!(Uid::default(), Uid::ZERO);
}

#[test]
fn roundtrip_string() {
    let uid = Uid::new();
    let parsed = Uid::from_str(&uid.to_string()).unwrap();
    assert_eq!(uid, parsed);
}

#[test]
fn roundtrip_bytes() {
    let uid = Uid::new();
    assert_eq!(Uid::from_bytes(uid.to_bytes()), uid);
}

#[test]
fn generator_is_monotonic() {
    let mut generator = Generator::new();
    let mut prev = generator.uid();
    for _ in 0..1000 {
        let next = generator.uid();
        assert!(next > prev, "{next} should sort after {prev}");
        prev = next;
    }
}

#[test]
fn byte_order_matches_sort_order() {
    let mut generator = Generator::new();
    let a = generator.uid();
    let b = generator.uid();
    assert!(b.to_bytes() > a.to_bytes());
}
