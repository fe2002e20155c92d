use crate::error::{FetchError, Result};

use super::{ClientConfig, ISS_PAGE_SIZE};

/// Validate a client configuration and surface every issue at once.
pub fn validate_client_config(config: &ClientConfig) -> Result<()> {
    let mut issues = Vec::new();

    validate_paging(config, &mut issues);
    validate_retry(config, &mut issues);
    validate_endpoints(config, &mut issues);
    validate_count_walk(config, &mut issues);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(FetchError::message(format!(
            "client config invalid:\n  - {}",
            issues.join("\n  - ")
        )))
    }
}

fn validate_paging(config: &ClientConfig, issues: &mut Vec<String>) {
    if config.page_size == 0 {
        issues.push("page_size must be greater than zero".to_string());
    } else if config.page_size > ISS_PAGE_SIZE {
        issues.push(format!(
            "page_size {} exceeds the {ISS_PAGE_SIZE} rows ISS returns per call",
            config.page_size
        ));
    }
    if config.max_in_flight == 0 {
        issues.push("max_in_flight must be greater than zero".to_string());
    }
    if config.base_url.trim().is_empty() {
        issues.push("base_url must not be empty".to_string());
    }
    if config.engine.trim().is_empty() || config.market.trim().is_empty() {
        issues.push("engine and market must not be empty".to_string());
    }
}

fn validate_retry(config: &ClientConfig, issues: &mut Vec<String>) {
    if config.retry.attempts == 0 {
        issues.push("retry.attempts must be at least 1".to_string());
    }
}

fn validate_endpoints(config: &ClientConfig, issues: &mut Vec<String>) {
    let endpoints = &config.endpoints;
    let required: Vec<(&str, &str, &[&str])> = vec![
        (
            "endpoints.candles",
            endpoints.candles.as_str(),
            &["{security}"][..],
        ),
        (
            "endpoints.candles_board",
            endpoints.candles_board.as_str(),
            &["{security}", "{board}"][..],
        ),
        (
            "endpoints.candle_borders",
            endpoints.candle_borders.as_str(),
            &["{security}"][..],
        ),
        ("endpoints.securities", endpoints.securities.as_str(), &[][..]),
        (
            "endpoints.board_group_securities",
            endpoints.board_group_securities.as_str(),
            &["{board_group}"][..],
        ),
    ];

    for (label, template, placeholders) in required {
        if template.trim().is_empty() {
            issues.push(format!("{label} must not be empty"));
            continue;
        }
        for placeholder in placeholders {
            if !template.contains(placeholder) {
                issues.push(format!("{label} should reference `{placeholder}`"));
            }
        }
    }
}

fn validate_count_walk(config: &ClientConfig, issues: &mut Vec<String>) {
    if config.count_walk.empty_gap_days <= 0 {
        issues.push("count_mode.empty_gap_days must be positive".to_string());
    }
    if config.count_walk.leading_gap_days <= 0 {
        issues.push("count_mode.leading_gap_days must be positive".to_string());
    }
}
