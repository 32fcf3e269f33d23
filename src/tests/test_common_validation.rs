use std::time::Duration;

use crate::{KeyPrefix, MaxRequests, RateLimiterOptions, SlidegateError, WindowSize};

#[test]
fn window_size_try_from_validates_positive_and_finite() {
    let w = WindowSize::try_from(30f64).unwrap();
    assert_eq!(*w, 30f64);

    let w = WindowSize::try_from(2u64).unwrap();
    assert_eq!(*w, 2f64);

    assert_eq!(
        WindowSize::try_from(0f64).unwrap_err(),
        "Window size must be greater than 0"
    );
    assert_eq!(
        WindowSize::try_from(-1f64).unwrap_err(),
        "Window size must be greater than 0"
    );
    assert_eq!(
        WindowSize::try_from(f64::NAN).unwrap_err(),
        "Window size must be finite"
    );
    assert_eq!(
        WindowSize::try_from(f64::INFINITY).unwrap_err(),
        "Window size must be finite"
    );
}

#[test]
fn window_size_ttl_rounds_up_to_whole_millis() {
    assert_eq!(
        WindowSize::try_from(30f64).unwrap().ttl(),
        Duration::from_secs(30)
    );
    assert_eq!(
        WindowSize::try_from(0.0015).unwrap().ttl(),
        Duration::from_millis(2)
    );
    assert_eq!(
        WindowSize::try_from(0.0001).unwrap().ttl(),
        Duration::from_millis(1)
    );
}

#[test]
fn window_size_is_capped_so_expiry_stays_representable() {
    let w = WindowSize::try_from(WindowSize::MAX).unwrap();
    assert_eq!(w.ttl(), Duration::from_millis(1_000_000_000_000_000));

    assert_eq!(
        WindowSize::try_from(1e16).unwrap_err(),
        "Window size must not exceed 1e12"
    );
    assert_eq!(
        WindowSize::try_from(u64::MAX).unwrap_err(),
        "Window size must not exceed 1e12"
    );

    let err = RateLimiterOptions::new(1e16, 3).unwrap_err();
    assert!(matches!(err, SlidegateError::InvalidConfig(msg) if msg == "Window size must not exceed 1e12"));
}

#[test]
fn max_requests_try_from_validates_min_1() {
    let n = MaxRequests::try_from(1u64).unwrap();
    assert_eq!(*n, 1u64);

    assert_eq!(
        MaxRequests::try_from(0u64).unwrap_err(),
        "Max requests must be at least 1"
    );
}

#[test]
fn key_prefix_try_from_validates_shape() {
    assert_eq!(&*KeyPrefix::try_from("rate_limit").unwrap(), "rate_limit");
    assert_eq!(&*KeyPrefix::default(), "slidegate");

    assert_eq!(
        KeyPrefix::try_from("").unwrap_err(),
        "Key prefix must not be empty"
    );
    assert_eq!(
        KeyPrefix::try_from("a:b").unwrap_err(),
        "Key prefix must not contain colons"
    );
    assert_eq!(
        KeyPrefix::try_from("x".repeat(256)).unwrap_err(),
        "Key prefix must not be longer than 255 bytes"
    );
}

#[test]
fn options_reject_invalid_configuration_at_construction() {
    assert!(RateLimiterOptions::new(30f64, 3).is_ok());

    assert!(matches!(
        RateLimiterOptions::new(0f64, 3),
        Err(SlidegateError::InvalidConfig(_))
    ));
    assert!(matches!(
        RateLimiterOptions::new(-5f64, 3),
        Err(SlidegateError::InvalidConfig(_))
    ));
    assert!(matches!(
        RateLimiterOptions::new(30f64, 0),
        Err(SlidegateError::InvalidConfig(_))
    ));
}
