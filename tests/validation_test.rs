//! Unit tests for validation.rs module

use chrono::NaiveDate;
use channel_analytics::validation::InputValidator;
use std::path::Path;

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

#[test]
fn test_validate_channel_username_valid() {
    assert!(InputValidator::validate_channel_username("tikvahpharma").is_ok());
}

#[test]
fn test_validate_channel_username_with_at_sign() {
    assert!(InputValidator::validate_channel_username("@lobelia4cosmetics").is_ok());
}

#[test]
fn test_validate_channel_username_empty() {
    assert!(InputValidator::validate_channel_username("").is_err());
    assert!(InputValidator::validate_channel_username("  @ ").is_err());
}

#[test]
fn test_validate_channel_username_too_long() {
    let name = "a".repeat(65);
    assert!(InputValidator::validate_channel_username(&name).is_err());
    assert!(InputValidator::validate_channel_username(&name[..64]).is_ok());
}

#[test]
fn test_validate_channel_username_invalid_chars() {
    assert!(InputValidator::validate_channel_username("che med").is_err());
    assert!(InputValidator::validate_channel_username("chemed/../x").is_err());
}

#[test]
fn test_validate_file_path_valid() {
    assert!(InputValidator::validate_file_path(Path::new("data/raw/telegram_messages")).is_ok());
}

#[test]
fn test_validate_file_path_traversal() {
    assert!(InputValidator::validate_file_path(Path::new("../etc/passwd")).is_err());
    assert!(InputValidator::validate_file_path(Path::new("~/data")).is_err());
}

#[test]
fn test_validate_file_path_empty() {
    assert!(InputValidator::validate_file_path(Path::new("")).is_err());
}

#[test]
fn test_validate_date_range_valid() {
    assert!(InputValidator::validate_date_range(Some(day(2024, 1, 1)), Some(day(2024, 12, 31))).is_ok());
}

#[test]
fn test_validate_date_range_single_day() {
    assert!(InputValidator::validate_date_range(Some(day(2024, 1, 1)), Some(day(2024, 1, 1))).is_ok());
}

#[test]
fn test_validate_date_range_reversed() {
    assert!(InputValidator::validate_date_range(Some(day(2024, 2, 1)), Some(day(2024, 1, 1))).is_err());
}

#[test]
fn test_validate_date_range_open_ended() {
    assert!(InputValidator::validate_date_range(Some(day(2024, 2, 1)), None).is_ok());
    assert!(InputValidator::validate_date_range(None, None).is_ok());
}

#[test]
fn test_validate_date_range_too_large() {
    assert!(InputValidator::validate_date_range(Some(day(1900, 1, 1)), Some(day(2024, 1, 1))).is_err());
}

#[test]
fn test_validate_limit() {
    assert!(InputValidator::validate_limit(10).is_ok());
    assert!(InputValidator::validate_limit(0).is_err());
    assert!(InputValidator::validate_limit(10_001).is_err());
}

#[test]
fn test_validate_database_url() {
    assert!(InputValidator::validate_database_url("sqlite:data/analytics.db").is_ok());
    assert!(InputValidator::validate_database_url("sqlite::memory:").is_ok());
    assert!(InputValidator::validate_database_url("postgres://localhost/db").is_err());
    assert!(InputValidator::validate_database_url("   ").is_err());
}
