use std::collections::HashSet;

use anyhow::Result;
use nsproxy::error::ConfigError;
use nsproxy::nameserver::{
    Nameserver, NameserverPool, NameserverSelector, RandomSelector, RoundRobinSelector,
};

fn endpoints(list: &[&str]) -> Result<Vec<Nameserver>> {
    Ok(list
        .iter()
        .map(|s| s.parse::<Nameserver>())
        .collect::<Result<Vec<Nameserver>, _>>()?)
}

#[test]
fn test_parse_host_port() -> Result<()> {
    let ns: Nameserver = "ns1.jimdo.com:53".parse()?;
    assert_eq!(ns, Nameserver::new("ns1.jimdo.com", 53));
    assert_eq!(ns.to_string(), "ns1.jimdo.com:53");

    let ns: Nameserver = "192.0.2.10:5353".parse()?;
    assert_eq!(ns.host, "192.0.2.10");
    assert_eq!(ns.port, 5353);

    let ns: Nameserver = "[2001:db8::53]:53".parse()?;
    assert_eq!(ns.host, "2001:db8::53");
    assert_eq!(ns.to_string(), "[2001:db8::53]:53");

    Ok(())
}

#[test]
fn test_parse_rejects_malformed_endpoints() {
    for raw in ["ns1.example", ":53", "ns1.example:", "ns1.example:dns", "ns1.example:0", "2001:db8::53:53"] {
        assert!(
            matches!(raw.parse::<Nameserver>(), Err(ConfigError::InvalidNameserver(_))),
            "{:?} should be rejected",
            raw
        );
    }
}

#[test]
fn test_empty_pool_is_rejected() {
    let result = NameserverPool::random(Vec::new());
    assert!(matches!(result, Err(ConfigError::NoNameservers)));
}

#[test]
fn test_single_nameserver_is_always_selected() -> Result<()> {
    let pool = NameserverPool::random(endpoints(&["ns1.example:53"])?)?;
    for _ in 0..100 {
        assert_eq!(pool.select().host, "ns1.example");
    }
    Ok(())
}

#[test]
fn test_random_selection_reaches_every_nameserver() -> Result<()> {
    let list = endpoints(&["ns1.example:53", "ns2.example:53", "ns3.example:53", "ns4.example:53"])?;
    let pool = NameserverPool::random(list.clone())?;

    let mut seen = HashSet::new();
    for _ in 0..2000 {
        seen.insert(pool.select().clone());
    }

    // 2000 uniform draws over 4 entries miss one with probability ~4 * 0.75^2000
    assert_eq!(seen.len(), list.len());
    Ok(())
}

#[test]
fn test_random_selector_stays_in_range() {
    let selector = RandomSelector;
    for len in 1..10 {
        for _ in 0..100 {
            assert!(selector.select(len) < len);
        }
    }
}

#[test]
fn test_round_robin_cycles_in_order() -> Result<()> {
    let list = endpoints(&["ns1.example:53", "ns2.example:53", "ns3.example:53"])?;
    let pool = NameserverPool::new(list, Box::new(RoundRobinSelector::default()))?;

    let picked: Vec<String> = (0..6).map(|_| pool.select().host.clone()).collect();
    assert_eq!(
        picked,
        ["ns1.example", "ns2.example", "ns3.example", "ns1.example", "ns2.example", "ns3.example"]
    );
    Ok(())
}

#[derive(Debug)]
struct OutOfRange;

impl NameserverSelector for OutOfRange {
    fn select(&self, len: usize) -> usize {
        len + 1
    }
}

#[test]
fn test_pool_tolerates_out_of_range_selector() -> Result<()> {
    let pool = NameserverPool::new(endpoints(&["ns1.example:53", "ns2.example:53"])?, Box::new(OutOfRange))?;
    assert_eq!(pool.select().host, "ns2.example");
    Ok(())
}
