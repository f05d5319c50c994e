use std::str::FromStr;

use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use presenca_attendance::HistoryStatus;
use presenca_core::{SessionId, UserId};
use presenca_infra::{Page, PageRequest, SessionFilter};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Query values arrive as raw strings so malformed input yields a JSON 400.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListClassesQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub status: Option<String>,
}

/// `days`/`times` are comma-separated; absent values fall back to the caller's profile.
#[derive(Debug, Default, Deserialize)]
pub struct NextClassesQuery {
    pub days: Option<String>,
    pub times: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub confirmed: bool,
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_session_id(raw: &str) -> Result<SessionId, axum::response::Response> {
    raw.parse().map_err(|_| {
        errors::json_error_with_details(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            "ID inválido",
            json!({ "field": "id", "value": raw }),
        )
    })
}

pub fn parse_user_id(raw: &str) -> Result<UserId, axum::response::Response> {
    raw.parse().map_err(|_| {
        errors::json_error_with_details(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            "ID inválido",
            json!({ "field": "id", "value": raw }),
        )
    })
}

fn parse_field<T: FromStr>(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<T>, axum::response::Response> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<T>().map_err(|_| {
                errors::json_error_with_details(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    format!("invalid value for {field}"),
                    json!({ "field": field, "value": v }),
                )
            })
        })
        .transpose()
}

pub fn page_request(
    page: Option<&str>,
    limit: Option<&str>,
) -> Result<PageRequest, axum::response::Response> {
    let page = parse_field::<u32>("page", page)?;
    let limit = parse_field::<u32>("limit", limit)?;
    PageRequest::new(page, limit).map_err(errors::validation_error)
}

impl PageQuery {
    pub fn page_request(&self) -> Result<PageRequest, axum::response::Response> {
        page_request(self.page.as_deref(), self.limit.as_deref())
    }
}

impl ListClassesQuery {
    pub fn page_request(&self) -> Result<PageRequest, axum::response::Response> {
        page_request(self.page.as_deref(), self.limit.as_deref())
    }

    pub fn filter(&self) -> Result<SessionFilter, axum::response::Response> {
        let from = parse_field::<NaiveDate>("date_from", self.date_from.as_deref())?;
        let to = parse_field::<NaiveDate>("date_to", self.date_to.as_deref())?;
        SessionFilter::new(from, to).map_err(errors::validation_error)
    }
}

impl HistoryQuery {
    pub fn page_request(&self) -> Result<PageRequest, axum::response::Response> {
        page_request(self.page.as_deref(), self.limit.as_deref())
    }

    pub fn status(&self) -> Result<HistoryStatus, axum::response::Response> {
        self.status
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(errors::validation_error)
    }
}

pub const DEFAULT_NEXT_LIMIT: usize = 5;
const MAX_NEXT_LIMIT: usize = 50;

impl NextClassesQuery {
    pub fn limit(&self) -> Result<usize, axum::response::Response> {
        let limit = parse_field::<usize>("limit", self.limit.as_deref())?.unwrap_or(DEFAULT_NEXT_LIMIT);
        if limit == 0 || limit > MAX_NEXT_LIMIT {
            return Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                format!("limit must be between 1 and {MAX_NEXT_LIMIT}"),
            ));
        }
        Ok(limit)
    }

    pub fn days(&self) -> Option<Vec<String>> {
        split_list(self.days.as_deref())
    }

    pub fn times(&self) -> Option<Vec<String>> {
        split_list(self.times.as_deref())
    }
}

fn split_list(raw: Option<&str>) -> Option<Vec<String>> {
    let items: Vec<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub message: &'static str,
    pub confirmed: bool,
    pub confirmed_count: u32,
}

impl ConfirmResponse {
    pub fn new(confirmed: bool, confirmed_count: u32) -> Self {
        Self {
            message: if confirmed {
                "Presença confirmada"
            } else {
                "Presença cancelada"
            },
            confirmed,
            confirmed_count,
        }
    }
}

/// `{ <key>: [...], "pagination": {page, limit, total, pages} }`
pub fn paginated<T: Serialize>(key: &str, page: Page<T>) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert(key.to_string(), json!(page.items));
    body.insert("pagination".to_string(), json!(page.info));
    serde_json::Value::Object(body)
}
