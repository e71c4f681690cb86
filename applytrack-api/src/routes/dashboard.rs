/// Dashboard analytics
///
/// - `GET /v1/dashboard/stats`
/// - `GET /v1/dashboard/calendar?from&to` - `from`/`to` as `YYYY-MM-DD` or
///   RFC 3339; defaults to the next 30 days, at most 93

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::ApiQuery,
    routes::DataResponse,
};
use applytrack_shared::{
    auth::middleware::AuthContext,
    csv_io::parse_date,
    models::dashboard::{CalendarEvent, Dashboard, DashboardStats, MAX_CALENDAR_DAYS},
};
use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

const DEFAULT_CALENDAR_DAYS: i64 = 30;

#[derive(Debug, Default, Deserialize)]
pub struct CalendarParams {
    pub from: Option<String>,
    pub to: Option<String>,
}

fn parse_bound(field: &'static str, value: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| parse_date(v).ok_or_else(|| ApiError::field(field, format!("'{}' is not a valid date", v))))
        .transpose()
}

impl CalendarParams {
    /// Resolves the half-open `[from, to)` window
    fn window(&self, now: DateTime<Utc>) -> ApiResult<(DateTime<Utc>, DateTime<Utc>)> {
        let from = match parse_bound("from", self.from.as_deref())? {
            Some(from) => from,
            None => now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .unwrap_or(now),
        };
        let to = parse_bound("to", self.to.as_deref())?
            .unwrap_or(from + Duration::days(DEFAULT_CALENDAR_DAYS));

        if to <= from {
            return Err(ApiError::field("to", "to must be after from"));
        }
        if to - from > Duration::days(MAX_CALENDAR_DAYS) {
            return Err(ApiError::field(
                "to",
                format!("Range must be at most {} days", MAX_CALENDAR_DAYS),
            ));
        }

        Ok((from, to))
    }
}

pub async fn stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<DashboardStats>> {
    Ok(Json(Dashboard::stats(&state.db, auth.user_id).await?))
}

pub async fn calendar(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    ApiQuery(params): ApiQuery<CalendarParams>,
) -> ApiResult<Json<DataResponse<CalendarEvent>>> {
    let (from, to) = params.window(Utc::now())?;

    Ok(Json(DataResponse {
        data: Dashboard::calendar(&state.db, auth.user_id, from, to).await?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-05-14T10:30:00Z".parse().unwrap()
    }

    fn params(from: Option<&str>, to: Option<&str>) -> CalendarParams {
        CalendarParams {
            from: from.map(str::to_string),
            to: to.map(str::to_string),
        }
    }

    #[test]
    fn test_default_window() {
        let (from, to) = params(None, None).window(now()).unwrap();
        assert_eq!(from, "2026-05-14T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(to - from, Duration::days(30));
    }

    #[test]
    fn test_explicit_dates() {
        let (from, to) = params(Some("2026-06-01"), Some("2026-06-30T12:00:00Z"))
            .window(now())
            .unwrap();
        assert_eq!(from, "2026-06-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(to, "2026-06-30T12:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_range_limits() {
        assert!(params(Some("2026-01-01"), Some("2026-04-04")).window(now()).is_ok());
        assert!(matches!(
            params(Some("2026-01-01"), Some("2026-04-05")).window(now()),
            Err(ApiError::ValidationError(_))
        ));
        assert!(params(Some("2026-02-01"), Some("2026-01-01")).window(now()).is_err());
        assert!(params(Some("soon"), None).window(now()).is_err());
    }
}
