//! Tests for `config` module

use super::config::*;
use std::str::FromStr;

// ========== Defaults and parsing ==========

#[test]
fn test_default_config_is_valid() {
    let config = CacheConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.cache_type, ReuseCacheType::Full);
    assert_eq!(config.policy, EvictionPolicy::CostNSize);
    assert!(config.spill_enabled);
    assert!(!config.comp_assisted_rw);
}

#[test]
fn test_from_toml() {
    let config = CacheConfig::from_toml(
        r#"
            cache_type = "multilevel"
            policy = "dagheight"
            spill_enabled = false
            cache_fraction = 0.1
        "#,
    )
    .unwrap();
    assert_eq!(config.cache_type, ReuseCacheType::Multilevel);
    assert_eq!(config.policy, EvictionPolicy::DagHeight);
    assert!(!config.spill_enabled);
    assert!((config.cache_fraction - 0.1).abs() < 1e-9);
}

#[test]
fn test_toml_round_trip() {
    let config = CacheConfig {
        policy: EvictionPolicy::Hybrid,
        ..CacheConfig::default()
    };
    let toml = config.to_toml().unwrap();
    let parsed = CacheConfig::from_toml(&toml).unwrap();
    assert_eq!(parsed.policy, EvictionPolicy::Hybrid);
}

#[test]
fn test_policy_from_str() {
    assert_eq!(EvictionPolicy::from_str("lru").unwrap(), EvictionPolicy::Lru);
    assert_eq!(
        EvictionPolicy::from_str("costnsize").unwrap(),
        EvictionPolicy::CostNSize
    );
    assert!(EvictionPolicy::from_str("mru").is_err());
}

#[test]
fn test_cache_type_from_str_accepts_aliases() {
    assert_eq!(
        ReuseCacheType::from_str("full_reuse").unwrap(),
        ReuseCacheType::Full
    );
    assert_eq!(
        ReuseCacheType::from_str("multilevel").unwrap(),
        ReuseCacheType::Multilevel
    );
    assert!(ReuseCacheType::from_str("bogus").is_err());
}

#[test]
fn test_cache_type_predicates() {
    assert!(ReuseCacheType::None.is_none());
    assert!(ReuseCacheType::Multilevel.is_full_reuse());
    assert!(ReuseCacheType::Multilevel.is_multilevel_reuse());
    assert!(ReuseCacheType::Hybrid.is_partial_reuse());
    assert!(!ReuseCacheType::Full.is_partial_reuse());
}

// ========== Validation ==========

#[test]
fn test_validate_rejects_bad_fraction() {
    let mut config = CacheConfig::default();
    config.cache_fraction = 0.0;
    assert!(config.validate().is_err());
    config.cache_fraction = 0.9;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_empty_opcode_override() {
    let config = CacheConfig {
        reusable_opcodes: Some(vec!["tsmm".into(), String::new()]),
        ..CacheConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_zero_hybrid_weights() {
    let config = CacheConfig {
        hybrid_weights: HybridWeights {
            recency: 0.0,
            cost_size: 0.0,
            height: 0.0,
        },
        ..CacheConfig::default()
    };
    assert!(config.validate().is_err());
}

// ========== Limit derivation ==========

#[test]
fn test_cache_limit_from_override() {
    let config = CacheConfig {
        max_memory_bytes: Some(1_000_000),
        cache_fraction: 0.05,
        ..CacheConfig::default()
    };
    assert_eq!(config.cache_limit_bytes(), 50_000);
}

#[test]
fn test_cache_limit_from_detected_memory() {
    let config = CacheConfig::default();
    // 5% of whatever the host has is never zero
    assert!(config.cache_limit_bytes() > 0);
}
