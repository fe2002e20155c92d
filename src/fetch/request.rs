use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::config::ClientConfig;
use crate::error::{Context, FetchError};
use crate::utils::iss_date;

use super::{FetchResult, PageDescriptor};

pub const CANDLES_SECTION: &str = "candles";
pub const BORDERS_SECTION: &str = "borders";
pub const SECURITIES_SECTION: &str = "securities";

pub type QueryParams = Vec<(String, String)>;

/// Resolve the candles URL for one security, honouring a configured board.
pub fn candles_url(config: &ClientConfig, security: &str) -> FetchResult<String> {
    let security = security.trim();
    match &config.board {
        Some(board) => endpoint_url(
            config,
            &config.endpoints.candles_board,
            &[("security", security), ("board", board.as_str())],
        ),
        None => endpoint_url(config, &config.endpoints.candles, &[("security", security)]),
    }
}

pub fn candle_borders_url(config: &ClientConfig, security: &str) -> FetchResult<String> {
    endpoint_url(
        config,
        &config.endpoints.candle_borders,
        &[("security", security.trim())],
    )
}

pub fn securities_url(config: &ClientConfig, board_group: Option<u32>) -> FetchResult<String> {
    match board_group {
        Some(group) => endpoint_url(
            config,
            &config.endpoints.board_group_securities,
            &[("board_group", group.to_string().as_str())],
        ),
        None => endpoint_url(config, &config.endpoints.securities, &[]),
    }
}

/// Query string for one candle page: interval, window bounds, offset and row limit.
pub fn candle_query(descriptor: &PageDescriptor, page_size: usize) -> QueryParams {
    let mut query = vec![
        ("interval".to_string(), descriptor.interval.remote_code().to_string()),
        ("start".to_string(), descriptor.offset.to_string()),
        ("limit".to_string(), page_size.to_string()),
    ];
    if let Some(from) = descriptor.window_start {
        query.push(("from".to_string(), iss_date(from)));
    }
    if let Some(till) = descriptor.window_end {
        query.push(("till".to_string(), iss_date(till)));
    }
    query.extend(section_only(CANDLES_SECTION));
    query
}

pub fn securities_query() -> QueryParams {
    section_only(SECURITIES_SECTION)
}

pub fn borders_query() -> QueryParams {
    section_only(BORDERS_SECTION)
}

fn section_only(section: &str) -> QueryParams {
    vec![
        ("iss.meta".to_string(), "off".to_string()),
        ("iss.only".to_string(), section.to_string()),
    ]
}

/// Fill an endpoint template. `base_url`, `engine`, `market` and `format` come
/// from the config; anything else must be supplied by the caller.
fn endpoint_url(
    config: &ClientConfig,
    template: &str,
    params: &[(&str, &str)],
) -> FetchResult<String> {
    let base_url = config.base_url.trim_end_matches('/');
    substitute(template, "{", |name| {
        let value = match name {
            "base_url" => base_url,
            "engine" => config.engine.as_str(),
            "market" => config.market.as_str(),
            "format" => config.format.extension(),
            _ => params
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| *value)
                .ok_or_else(|| {
                    FetchError::message(format!(
                        "endpoint `{template}` uses unknown placeholder `{{{name}}}`"
                    ))
                })?,
        };
        Ok(value.to_string())
    })
}

/// Replace each `<open>name}` placeholder in `text` with whatever `resolve` returns for it.
fn substitute<F>(text: &str, open: &str, mut resolve: F) -> FetchResult<String>
where
    F: FnMut(&str) -> FetchResult<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(at) = rest.find(open) {
        out.push_str(&rest[..at]);
        let tail = &rest[at + open.len()..];
        let close = tail
            .find('}')
            .ok_or_else(|| FetchError::message(format!("unterminated placeholder in `{text}`")))?;
        let name = tail[..close].trim();
        if name.is_empty() {
            return Err(FetchError::message(format!("empty placeholder in `{text}`")));
        }
        out.push_str(&resolve(name)?);
        rest = &tail[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Default request headers; `${NAME}` in a value is read from the environment.
pub fn build_headers(headers: &HashMap<String, String>) -> FetchResult<HeaderMap> {
    headers
        .iter()
        .map(|(name, value)| -> FetchResult<(HeaderName, HeaderValue)> {
            let header = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name `{name}`"))?;
            let expanded = substitute(value, "${", |var| {
                std::env::var(var)
                    .with_context(|| format!("header `{name}` needs environment variable {var}"))
                    .map_err(FetchError::from)
            })?;
            let header_value = HeaderValue::from_str(&expanded)
                .with_context(|| format!("invalid value for header `{name}`"))?;
            Ok((header, header_value))
        })
        .collect()
}
