//! Location sources: producers of raw fixes.
//!
//! A source turns some input into a stream of [`Fix`] values. Unparseable
//! input is reported as an `Err` item and the stream keeps going; an I/O
//! failure ends the stream after reporting it.
//!
//! - [`LineSource`]: `lat,lon[,timestamp]` text lines
//! - [`NmeaSource`]: NMEA 0183 `RMC` and `GGA` sentences from a GPS receiver
//! - [`SimulatedSource`]: a seeded random walk for demos and tests

use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime, Time};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::trace;

use gpslog_types::types::EARTH_RADIUS_M;
use gpslog_types::{Coordinate, Fix};

use crate::error::{Error, Result};

/// Something that produces location fixes.
pub trait LocationSource: Send {
    /// Consume the source into a stream of fixes.
    fn into_stream(self) -> BoxStream<'static, Result<Fix>>;
}

/// Drive a line reader through a per-line parser.
///
/// The parser gets the 1-based line number and returns `Ok(None)` for lines
/// that carry no fix.
fn parse_lines<R, P>(reader: R, parse: P) -> BoxStream<'static, Result<Fix>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    P: FnMut(&str, usize) -> Result<Option<Fix>> + Send + 'static,
{
    struct State<R, P> {
        lines: Option<Lines<R>>,
        line_no: usize,
        parse: P,
    }

    let state = State {
        lines: Some(reader.lines()),
        line_no: 0,
        parse,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            let lines = state.lines.as_mut()?;
            match lines.next_line().await {
                Ok(Some(line)) => {
                    state.line_no += 1;
                    match (state.parse)(&line, state.line_no) {
                        Ok(Some(fix)) => return Some((Ok(fix), state)),
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), state)),
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    state.lines = None;
                    return Some((Err(Error::Io(e)), state));
                }
            }
        }
    })
    .boxed()
}

// ==========================================================================
// Text lines
// ==========================================================================

/// Reads `lat,lon[,timestamp]` lines.
///
/// The optional timestamp is RFC 3339 or integer Unix seconds; without one
/// the fix is stamped with the time it was read. Blank lines and lines
/// starting with `#` are skipped.
///
/// ```
/// use futures::StreamExt;
/// use gpslog_core::{LineSource, LocationSource};
///
/// # #[tokio::main]
/// # async fn main() {
/// let input = "35.681,139.767\n# comment\n35.690,139.700,2024-05-01T10:00:00Z\n";
/// let fixes: Vec<_> = LineSource::new(input.as_bytes()).into_stream().collect().await;
/// assert_eq!(fixes.len(), 2);
/// # }
/// ```
pub struct LineSource<R> {
    reader: R,
}

impl<R> LineSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// Read lines from `reader`.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R> LocationSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn into_stream(self) -> BoxStream<'static, Result<Fix>> {
        parse_lines(self.reader, parse_line)
    }
}

/// Parse one `lat,lon[,timestamp]` line.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<Fix>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(Error::source(line_no, "expected 'lat,lon[,timestamp]'"));
    }

    let latitude: f64 = parts[0]
        .parse()
        .map_err(|_| Error::source(line_no, format!("invalid latitude '{}'", parts[0])))?;
    let longitude: f64 = parts[1]
        .parse()
        .map_err(|_| Error::source(line_no, format!("invalid longitude '{}'", parts[1])))?;

    let captured_at = match parts.get(2) {
        Some(raw) => parse_timestamp(raw)
            .ok_or_else(|| Error::source(line_no, format!("invalid timestamp '{raw}'")))?,
        None => OffsetDateTime::now_utc(),
    };

    Fix::new(latitude, longitude, captured_at)
        .map(Some)
        .map_err(|e| Error::source(line_no, e.to_string()))
}

fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(secs) = raw.parse::<i64>() {
        return OffsetDateTime::from_unix_timestamp(secs).ok();
    }
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

// ==========================================================================
// NMEA 0183
// ==========================================================================

/// Reads NMEA 0183 sentences, emitting a fix for each valid `RMC` or `GGA`.
///
/// Any talker id is accepted (`$GPRMC`, `$GNRMC`, ...). Checksums are
/// verified when present. Other sentence types are ignored. `GGA` carries no
/// date, so it uses the date of the last `RMC` seen, or today's UTC date.
pub struct NmeaSource<R> {
    reader: R,
}

impl<R> NmeaSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// Read sentences from `reader`.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R> LocationSource for NmeaSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn into_stream(self) -> BoxStream<'static, Result<Fix>> {
        let mut parser = NmeaParser::default();
        parse_lines(self.reader, move |line, line_no| {
            parser.parse(line).map_err(|reason| Error::source(line_no, reason))
        })
    }
}

/// Stateful NMEA sentence parser.
#[derive(Debug, Default, Clone)]
pub struct NmeaParser {
    last_date: Option<Date>,
}

impl NmeaParser {
    /// Create a parser with no date context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one sentence. `Ok(None)` means the sentence holds no usable fix.
    pub fn parse(&mut self, sentence: &str) -> std::result::Result<Option<Fix>, String> {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            return Ok(None);
        }

        let payload = verify_checksum(sentence)?;
        let fields: Vec<&str> = payload.split(',').collect();
        let kind = fields[0];
        let Some(sentence_type) = kind.len().checked_sub(3).and_then(|at| kind.get(at..)) else {
            return Err(format!("unknown sentence '{kind}'"));
        };

        match sentence_type {
            "RMC" => self.parse_rmc(&fields),
            "GGA" => self.parse_gga(&fields),
            other => {
                trace!("Ignoring {} sentence", other);
                Ok(None)
            }
        }
    }

    /// `$--RMC,hhmmss.ss,A,llll.ll,a,yyyyy.yy,a,x.x,x.x,ddmmyy,...`
    fn parse_rmc(&mut self, fields: &[&str]) -> std::result::Result<Option<Fix>, String> {
        if fields.len() < 10 {
            return Err("RMC sentence too short".to_string());
        }
        if fields[2] != "A" || fields[3].is_empty() {
            return Ok(None);
        }

        let date = parse_date(fields[9])?;
        self.last_date = Some(date);
        let time = parse_time(fields[1])?;
        let latitude = parse_degrees(fields[3], fields[4], ('N', 'S'))?;
        let longitude = parse_degrees(fields[5], fields[6], ('E', 'W'))?;

        Fix::new(latitude, longitude, date.with_time(time).assume_utc())
            .map(Some)
            .map_err(|e| e.to_string())
    }

    /// `$--GGA,hhmmss.ss,llll.ll,a,yyyyy.yy,a,q,...`
    fn parse_gga(&mut self, fields: &[&str]) -> std::result::Result<Option<Fix>, String> {
        if fields.len() < 7 {
            return Err("GGA sentence too short".to_string());
        }
        if fields[6].is_empty() || fields[6] == "0" || fields[2].is_empty() {
            return Ok(None);
        }

        let date = self
            .last_date
            .unwrap_or_else(|| OffsetDateTime::now_utc().date());
        let time = parse_time(fields[1])?;
        let latitude = parse_degrees(fields[2], fields[3], ('N', 'S'))?;
        let longitude = parse_degrees(fields[4], fields[5], ('E', 'W'))?;

        Fix::new(latitude, longitude, date.with_time(time).assume_utc())
            .map(Some)
            .map_err(|e| e.to_string())
    }
}

fn verify_checksum(sentence: &str) -> std::result::Result<&str, String> {
    let body = sentence
        .strip_prefix('$')
        .ok_or_else(|| "not an NMEA sentence".to_string())?;

    let Some((payload, checksum)) = body.split_once('*') else {
        return Ok(body);
    };
    let expected = u8::from_str_radix(checksum.trim(), 16)
        .map_err(|_| format!("invalid checksum '{checksum}'"))?;
    let actual = payload.bytes().fold(0u8, |acc, b| acc ^ b);
    if actual != expected {
        return Err(format!(
            "checksum mismatch: expected {expected:02X}, computed {actual:02X}"
        ));
    }
    Ok(payload)
}

/// `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere to signed decimal degrees.
fn parse_degrees(
    value: &str,
    hemisphere: &str,
    (positive, negative): (char, char),
) -> std::result::Result<f64, String> {
    let raw: f64 = value
        .parse()
        .map_err(|_| format!("invalid coordinate '{value}'"))?;
    let degrees = (raw / 100.0).trunc();
    let decimal = degrees + (raw - degrees * 100.0) / 60.0;

    match hemisphere.chars().next() {
        Some(c) if c == positive => Ok(decimal),
        Some(c) if c == negative => Ok(-decimal),
        _ => Err(format!("invalid hemisphere '{hemisphere}'")),
    }
}

fn parse_time(field: &str) -> std::result::Result<Time, String> {
    let invalid = || format!("invalid time '{field}'");
    let hour: u8 = field.get(0..2).and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
    let minute: u8 = field.get(2..4).and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
    let seconds: f64 = field.get(4..).and_then(|s| s.parse().ok()).ok_or_else(invalid)?;

    let nanos = ((seconds.fract() * 1e9).round() as u32).min(999_999_999);
    Time::from_hms_nano(hour, minute, seconds.trunc() as u8, nanos).map_err(|_| invalid())
}

fn parse_date(field: &str) -> std::result::Result<Date, String> {
    let invalid = || format!("invalid date '{field}'");
    if field.len() != 6 || !field.is_ascii() {
        return Err(invalid());
    }
    let day: u8 = field[0..2].parse().map_err(|_| invalid())?;
    let month: u8 = field[2..4].parse().map_err(|_| invalid())?;
    let yy: i32 = field[4..6].parse().map_err(|_| invalid())?;
    let year = if yy >= 80 { 1900 + yy } else { 2000 + yy };

    let month = Month::try_from(month).map_err(|_| invalid())?;
    Date::from_calendar_date(year, month, day).map_err(|_| invalid())
}

// ==========================================================================
// Simulation
// ==========================================================================

/// A seeded random walk, for demos and tests.
///
/// Each step moves between half and one and a half times `step_m` in a
/// random direction. The same seed always produces the same path.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    start: Coordinate,
    step_m: f64,
    interval: Duration,
    count: Option<usize>,
    seed: u64,
}

impl SimulatedSource {
    /// Start walking from `start`: 150 m steps, one per second, forever.
    pub fn new(start: Coordinate) -> Self {
        Self {
            start,
            step_m: 150.0,
            interval: Duration::from_secs(1),
            count: None,
            seed: 0,
        }
    }

    /// Set the mean step length in meters.
    #[must_use]
    pub fn step_m(mut self, step_m: f64) -> Self {
        self.step_m = step_m.max(0.0);
        self
    }

    /// Set the delay between fixes. Zero emits as fast as polled.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Stop after `count` fixes.
    #[must_use]
    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Set the random seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

fn walk(rng: &mut StdRng, from: Coordinate, step_m: f64) -> Coordinate {
    let bearing = rng.random_range(0.0..std::f64::consts::TAU);
    let angular = step_m * rng.random_range(0.5..1.5) / EARTH_RADIUS_M;

    let lat1 = from.latitude.to_radians();
    let lon1 = from.longitude.to_radians();
    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * angular.sin() * lat1.cos()).atan2(angular.cos() - lat1.sin() * lat2.sin());

    Coordinate {
        latitude: lat2.to_degrees().clamp(-90.0, 90.0),
        longitude: (lon2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0,
    }
}

impl LocationSource for SimulatedSource {
    fn into_stream(self) -> BoxStream<'static, Result<Fix>> {
        let Self {
            start,
            step_m,
            interval,
            count,
            seed,
        } = self;
        let state = (StdRng::seed_from_u64(seed), start, 0usize);

        stream::unfold(state, move |(mut rng, current, emitted)| async move {
            if count.is_some_and(|count| emitted >= count) {
                return None;
            }
            if emitted > 0 && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }

            let fix = Fix {
                coordinate: current,
                captured_at: OffsetDateTime::now_utc(),
            };
            let next = walk(&mut rng, current, step_m);
            Some((Ok(fix), (rng, next, emitted + 1)))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_parse_line_formats() {
        let fix = parse_line("35.5, 139.25, 2024-05-01T10:00:00Z", 1).unwrap().unwrap();
        assert_eq!(fix.coordinate.latitude, 35.5);
        assert_eq!(fix.captured_at, datetime!(2024-05-01 10:00 UTC));

        let fix = parse_line("1,2,1714557600", 1).unwrap().unwrap();
        assert_eq!(fix.captured_at, datetime!(2024-05-01 10:00 UTC));

        assert!(parse_line("   ", 1).unwrap().is_none());
        assert!(parse_line("# header", 1).unwrap().is_none());
    }

    #[test]
    fn test_parse_line_errors_name_the_line() {
        let err = parse_line("north,139", 7).unwrap_err();
        assert!(matches!(err, Error::Source { line: 7, ref reason } if reason.contains("latitude")));

        let err = parse_line("95.0,139.0", 2).unwrap_err();
        assert!(matches!(err, Error::Source { line: 2, .. }));

        assert!(parse_line("1,2,3,4", 1).is_err());
        assert!(parse_line("1,2,yesterday", 1).is_err());
    }

    #[tokio::test]
    async fn test_line_source_keeps_going_after_bad_line() {
        let input = "1,1\nbad\n2,2\n";
        let items: Vec<_> = LineSource::new(input.as_bytes()).into_stream().collect().await;

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(Error::Source { line: 2, .. })));
        assert_eq!(items[2].as_ref().unwrap().coordinate.latitude, 2.0);
    }

    #[test]
    fn test_nmea_rmc() {
        let mut parser = NmeaParser::new();
        let fix = parser
            .parse("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A")
            .unwrap()
            .unwrap();

        assert!((fix.coordinate.latitude - 48.1173).abs() < 1e-4);
        assert!((fix.coordinate.longitude - 11.516_666).abs() < 1e-4);
        assert_eq!(fix.captured_at, datetime!(1994-03-23 12:35:19 UTC));
    }

    #[test]
    fn test_nmea_gga_uses_last_rmc_date() {
        let mut parser = NmeaParser::new();
        parser
            .parse("$GNRMC,101500.00,A,3540.8741,N,13946.0275,E,0.0,0.0,010524,,,A")
            .unwrap();
        let fix = parser
            .parse("$GNGGA,101600.50,3541.4553,N,13942.0155,W,1,08,0.9,40.0,M,39.4,M,,")
            .unwrap()
            .unwrap();

        assert!(fix.coordinate.longitude < 0.0);
        assert_eq!(fix.captured_at, datetime!(2024-05-01 10:16:00.5 UTC));
    }

    #[test]
    fn test_nmea_skips_no_fix_and_other_sentences() {
        let mut parser = NmeaParser::new();
        assert!(parser.parse("$GPRMC,123519,V,,,,,,,230394,,").unwrap().is_none());
        assert!(parser.parse("$GPGGA,123519,,,,,0,00,,,M,,M,,").unwrap().is_none());
        assert!(parser.parse("$GPGSV,3,1,11,03,03,111,00").unwrap().is_none());
    }

    #[test]
    fn test_nmea_checksum_mismatch() {
        let mut parser = NmeaParser::new();
        let err = parser
            .parse("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*00")
            .unwrap_err();
        assert!(err.contains("checksum mismatch"));
        assert!(parser.parse("GPRMC,no dollar").is_err());
    }

    #[test]
    fn test_nmea_malformed_fields_are_errors() {
        let mut parser = NmeaParser::new();
        for sentence in [
            "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,1\u{e9}234,003.1,W",
            "$GPRMC,1\u{e9}519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W",
            "$GPRMC,123519,A,4807.038,X,01131.000,E,022.4,084.4,230394,003.1,W",
            "$GPRMC,123519,A,48x7.038,N,01131.000,E,022.4,084.4,230394,003.1,W",
            "$GPRMC,123519,A,4807.038,N",
            "$\u{e9}\u{e9}",
        ] {
            assert!(parser.parse(sentence).is_err(), "accepted {sentence:?}");
        }
    }

    #[tokio::test]
    async fn test_simulated_source_is_deterministic() {
        let start = Coordinate::new(35.0, 139.0).unwrap();
        let walk_a: Vec<_> = SimulatedSource::new(start)
            .interval(Duration::ZERO)
            .count(5)
            .seed(42)
            .into_stream()
            .map(|fix| fix.unwrap().coordinate)
            .collect()
            .await;
        let walk_b: Vec<_> = SimulatedSource::new(start)
            .interval(Duration::ZERO)
            .count(5)
            .seed(42)
            .into_stream()
            .map(|fix| fix.unwrap().coordinate)
            .collect()
            .await;

        assert_eq!(walk_a.len(), 5);
        assert_eq!(walk_a, walk_b);
        assert_eq!(walk_a[0], start);
        for pair in walk_a.windows(2) {
            let d = pair[0].distance_m(&pair[1]);
            assert!((70.0..=230.0).contains(&d), "step was {d} m");
        }
    }
}
