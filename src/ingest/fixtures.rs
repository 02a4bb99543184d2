//! Test fixtures: representative upstream payloads and a scripted fetcher.
//!
//! Payloads are truncated to the minimum needed to exercise the parsers but
//! keep the real envelope of each service:
//!
//! NOAA CO-OPS datagetter (`format=json`, `units=english`, `time_zone=gmt`):
//!   `{ "metadata": {...}, "data": [ { "t": "YYYY-MM-DD HH:MM", "v": "1.234", ... } ] }`
//!   values are JSON strings; missing values are empty strings. Requests
//!   for a product the station does not carry return
//!   `{ "error": { "message": "No data was found..." } }` with HTTP 200.
//!
//! NDBC realtime2 standard meteorological text feed:
//!   two `#` header lines (names, units), newest observation first, `MM`
//!   marks a missing value.
//!
//! SMN latest-observation JSON, SI units: wind m/s, visibility km, waves m.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::FetchError;
use crate::http::Fetch;

/// Water level at Newport (8452660), 2024-05-01 12Z, 6-minute samples.
/// Mean of the 12Z samples is 2.0 ft; the 13:00 sample belongs to the next hour.
pub(crate) const NOAA_WATER_LEVEL_JSON: &str = r#"{
  "metadata": { "id": "8452660", "name": "Newport", "lat": "41.5043", "lon": "-71.3261" },
  "data": [
    { "t": "2024-05-01 11:54", "v": "9.000", "s": "0.003", "f": "0,0,0,0", "q": "p" },
    { "t": "2024-05-01 12:00", "v": "1.500", "s": "0.003", "f": "0,0,0,0", "q": "p" },
    { "t": "2024-05-01 12:06", "v": "1.800", "s": "0.003", "f": "0,0,0,0", "q": "p" },
    { "t": "2024-05-01 12:12", "v": "", "s": "", "f": "1,1,1,1", "q": "p" },
    { "t": "2024-05-01 12:18", "v": "2.700", "s": "0.004", "f": "0,0,0,0", "q": "p" },
    { "t": "2024-05-01 13:00", "v": "7.000", "s": "0.003", "f": "0,0,0,0", "q": "p" }
  ]
}"#;

/// Currents straddling north inside one hour: naive mean direction is 180.
pub(crate) const NOAA_CURRENTS_JSON: &str = r#"{
  "metadata": { "id": "8452660", "name": "Newport" },
  "data": [
    { "t": "2024-05-01 12:00", "s": "1.20", "d": "350", "b": "3" },
    { "t": "2024-05-01 12:30", "s": "1.60", "d": "10", "b": "3" }
  ]
}"#;

/// Wind: first in-hour sample wins, no averaging.
pub(crate) const NOAA_WIND_JSON: &str = r#"{
  "metadata": { "id": "8452660", "name": "Newport" },
  "data": [
    { "t": "2024-05-01 12:00", "s": "10.50", "d": "225.00", "dr": "SW", "g": "14.00", "f": "0,0" },
    { "t": "2024-05-01 12:06", "s": "30.00", "d": "90.00", "dr": "E", "g": "35.00", "f": "0,0" }
  ]
}"#;

/// Visibility in nautical miles.
pub(crate) const NOAA_VISIBILITY_JSON: &str = r#"{
  "metadata": { "id": "8452660", "name": "Newport" },
  "data": [
    { "t": "2024-05-01 12:00", "v": "5.40", "f": "0,0,0" }
  ]
}"#;

pub(crate) const NOAA_NO_DATA_JSON: &str = r#"{
  "error": { "message": "No data was found. This product may not be offered at this station at the requested time." }
}"#;

/// NDBC 44013: two readings in 2024-05-01 12Z, one in 11Z.
/// 12Z means: WSPD 5.0 m/s, WVHT 1.0 m, WDIR 200, VIS one reading of 10 nmi.
pub(crate) const NDBC_FEED: &str = "\
#YY  MM DD hh mm WDIR WSPD GST  WVHT   DPD   APD MWD   PRES  ATMP  WTMP  DEWP  VIS PTDY  TIDE
#yr  mo dy hr mn degT m/s  m/s     m   sec   sec degT   hPa  degC  degC  degC  nmi  hPa    ft
2024 05 01 12 50 210  6.0  7.0   1.2     6   4.1 190 1015.2  11.2  10.1   8.9   MM   MM    MM
2024 05 01 12 20 190  4.0  5.0   0.8     5   3.9 190 1015.4  11.1  10.1   8.8 10.0   MM    MM
2024 05 01 11 50  MM   MM   MM    MM    MM    MM  MM 1015.6  11.0  10.0   8.8   MM   MM    MM
";

/// SMN latest observation.
pub(crate) const SMN_LATEST_JSON: &str = r#"{
  "date": "2024-05-01T12:10:00-03:00",
  "station_id": "87692",
  "wind": { "speed": 5.0, "deg": 360.0 },
  "visibility": 10.0,
  "wave_height": 1.5,
  "cloud_cover": 75.0,
  "temperature": 14.2
}"#;

// ---------------------------------------------------------------------------
// Scripted fetcher
// ---------------------------------------------------------------------------

/// `Fetch` double: answers by the first registered URL fragment the request
/// contains, and records every URL it was asked for.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    routes: Vec<(String, Result<String, FetchError>)>,
    calls: Mutex<Vec<String>>,
    bearers: Mutex<HashMap<String, Option<String>>>,
}

impl ScriptedFetcher {
    pub(crate) fn route(mut self, fragment: &str, body: &str) -> Self {
        self.routes.push((fragment.to_string(), Ok(body.to_string())));
        self
    }

    pub(crate) fn fail(mut self, fragment: &str, error: FetchError) -> Self {
        self.routes.push((fragment.to_string(), Err(error)));
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn bearer_for(&self, fragment: &str) -> Option<String> {
        self.bearers
            .lock()
            .unwrap()
            .iter()
            .find(|(url, _)| url.contains(fragment))
            .and_then(|(_, bearer)| bearer.clone())
    }
}

impl Fetch for ScriptedFetcher {
    fn get_text(&self, url: &str, bearer: Option<&str>) -> Result<String, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.bearers
            .lock()
            .unwrap()
            .insert(url.to_string(), bearer.map(str::to_string));
        self.routes
            .iter()
            .find(|(fragment, _)| url.contains(fragment.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or(Err(FetchError::NotFound))
    }
}
