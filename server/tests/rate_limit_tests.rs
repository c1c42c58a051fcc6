use shop_server::middleware::RateLimiter;
use std::net::{IpAddr, Ipv4Addr};
use std::thread;
use std::time::Duration;

fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

#[test]
fn test_rate_limit_allows_under_limit() {
    let limiter = RateLimiter::new(5, Duration::from_secs(60));

    for _ in 0..5 {
        assert!(
            limiter.check_rate_limit(localhost()),
            "Should allow login attempts under limit"
        );
    }
}

#[test]
fn test_rate_limit_blocks_over_limit() {
    let limiter = RateLimiter::new(5, Duration::from_secs(60));

    for _ in 0..5 {
        limiter.check_rate_limit(localhost());
    }

    assert!(
        !limiter.check_rate_limit(localhost()),
        "Should block login attempts over limit"
    );
}

#[test]
fn test_rate_limit_per_ip() {
    let limiter = RateLimiter::new(3, Duration::from_secs(60));
    let ip1 = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
    let ip2 = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2));

    for _ in 0..3 {
        limiter.check_rate_limit(ip1);
    }

    assert!(!limiter.check_rate_limit(ip1));
    assert!(limiter.check_rate_limit(ip2));
    assert_eq!(limiter.tracked_clients(), 2);
}

#[test]
fn test_window_expiration() {
    let limiter = RateLimiter::new(2, Duration::from_millis(50));

    assert!(limiter.check_rate_limit(localhost()));
    assert!(limiter.check_rate_limit(localhost()));
    assert!(!limiter.check_rate_limit(localhost()));

    thread::sleep(Duration::from_millis(80));

    assert!(limiter.check_rate_limit(localhost()));
}

#[test]
fn test_cleanup_keeps_recent_entries() {
    let limiter = RateLimiter::new(10, Duration::from_secs(60));

    for _ in 0..5 {
        limiter.check_rate_limit(localhost());
    }

    assert_eq!(limiter.cleanup_old_entries(), 0);
    assert_eq!(limiter.tracked_clients(), 1);
}

#[test]
fn test_cleanup_drops_idle_clients() {
    let limiter = RateLimiter::new(10, Duration::from_millis(20));

    limiter.check_rate_limit(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    limiter.check_rate_limit(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
    thread::sleep(Duration::from_millis(40));

    assert_eq!(limiter.cleanup_old_entries(), 2);
    assert_eq!(limiter.tracked_clients(), 0);
}

#[test]
fn test_concurrent_rate_limiting() {
    use std::sync::Arc;

    let limiter = Arc::new(RateLimiter::new(10, Duration::from_secs(60)));
    let mut handles = vec![];

    for _ in 0..5 {
        let limiter_clone = Arc::clone(&limiter);
        let handle = thread::spawn(move || {
            for _ in 0..3 {
                limiter_clone.check_rate_limit(localhost());
                thread::sleep(Duration::from_millis(1));
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }

    // 15 attempts against a limit of 10
    assert!(!limiter.check_rate_limit(localhost()));
}

#[test]
fn test_default_implementation() {
    let limiter = RateLimiter::default();

    for _ in 0..10 {
        assert!(limiter.check_rate_limit(localhost()));
    }
    assert!(!limiter.check_rate_limit(localhost()));
}
