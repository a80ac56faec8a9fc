//! GTID algebra laws across the public API.

use binrep::{Interval, IntervalSlice, MariadbGtidSet, MysqlGtidSet};

const SID1: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";
const SID2: &str = "519ce0f4-4c49-11e9-8705-0242ac110002";

fn slice(ivs: &[(i64, i64)]) -> IntervalSlice {
    ivs.iter()
        .map(|&(a, b)| Interval { start: a, stop: b })
        .collect::<Vec<_>>()
        .into()
}

fn parse(s: &str) -> MysqlGtidSet {
    s.parse().unwrap()
}

#[test]
fn interval_parse_round_trip() {
    for text in ["1", "1-5", "42", "7-1000000"] {
        let interval: Interval = text.parse().unwrap();
        assert_eq!(interval.to_string(), text);
        assert_eq!(
            interval.to_string().parse::<Interval>().unwrap(),
            interval
        );
    }
}

#[test]
fn normalization_is_idempotent() {
    let cases = [
        slice(&[(1, 3), (2, 5), (7, 8), (8, 9)]),
        slice(&[(5, 6), (1, 2), (3, 4)]),
        slice(&[]),
        slice(&[(1, 2), (1, 2), (1, 2)]),
    ];
    for s in cases {
        let once = s.normalize();
        assert_eq!(once.normalize(), once);
    }
}

#[test]
fn normalization_preserves_membership() {
    let raw = slice(&[(1, 3), (2, 5), (7, 8), (8, 9), (20, 25)]);
    let normalized = raw.normalize();

    let covered = |s: &IntervalSlice, p: i64| {
        s.as_slice().iter().any(|iv| p >= iv.start && p < iv.stop)
    };
    for p in 0..30 {
        assert_eq!(covered(&raw, p), covered(&normalized, p), "point {p}");
    }
}

#[test]
fn minus_laws() {
    let a = slice(&[(1, 10), (20, 30)]);
    let b = slice(&[(3, 5), (7, 8), (25, 40)]);

    let d = a.minus(&b);
    // a \ b is contained in a
    assert!(a.contain(&d));
    // (a \ b) is disjoint from b: subtracting b again changes nothing
    assert_eq!(d.minus(&b), d);
}

#[test]
fn contain_reflexivity() {
    for s in [
        slice(&[(1, 10)]),
        slice(&[(1, 2), (5, 9), (100, 200)]),
        slice(&[]),
    ] {
        assert!(s.contain(&s));
    }
}

#[test]
fn gtid_binary_round_trip() {
    for text in [
        String::new(),
        format!("{SID1}:1-5"),
        format!("{SID1}:1-5:10:20-30,{SID2}:1"),
    ] {
        let set = parse(&text);
        let decoded = MysqlGtidSet::decode(&set.encode()).unwrap();
        assert_eq!(decoded, set);
    }
}

#[test]
fn gtid_text_round_trip_canonical() {
    // uppercase input, unsorted sets, redundant uuids: the canonical
    // print is a fixed point of parse-then-print
    for text in [
        format!("{SID2}:5-9,{}:1-5:7", SID1.to_uppercase()),
        format!("{SID1}:1-3,{SID1}:2-10"),
        format!("{SID1}:10:1-5"),
    ] {
        let printed = parse(&text).to_string();
        assert_eq!(parse(&printed).to_string(), printed);
    }
}

#[test]
fn gtid_set_operations_compose() {
    let mut executed = parse(&format!("{SID1}:1-100"));
    let purged = parse(&format!("{SID1}:1-40"));

    executed.minus(&purged);
    assert_eq!(executed.to_string(), format!("{SID1}:41-100"));

    executed.update(&format!("{SID1}:1-40,{SID2}:1")).unwrap();
    assert_eq!(
        executed.to_string(),
        format!("{SID1}:1-100,{SID2}:1")
    );

    assert!(executed.contain(&purged));
    assert!(!parse("").contain(&purged));
    assert!(executed.contain(&parse("")));
}

#[test]
fn mariadb_set_tracks_latest_per_domain() {
    let mut set: MariadbGtidSet = "0-1-100,1-1-20".parse().unwrap();
    set.update("0-2-150,2-1-1").unwrap();
    set.update("1-1-10").unwrap();

    assert_eq!(set.to_string(), "0-2-150,1-1-20,2-1-1");
    assert!(set.contain(&"0-1-120".parse().unwrap()));
    assert!(!set.contain(&"0-1-160".parse().unwrap()));
}
