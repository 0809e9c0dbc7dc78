use time::{Date, Month, OffsetDateTime, Time};
use trail_proto::RawFix;

const KNOTS_TO_MPS: f32 = 0.514_444;
// Typical user-equivalent range error for consumer receivers.
const UERE_M: f32 = 5.0;

#[derive(Debug, Clone, Copy)]
struct GgaData {
    sats: u8,
    hdop: f32,
    altitude_m: Option<f64>,
}

/// Stateful NMEA 0183 reader: GGA sentences carry quality and altitude,
/// RMC sentences carry position, speed and course and complete a fix.
#[derive(Debug)]
pub(crate) struct NmeaParser {
    provider: &'static str,
    last_gga: Option<GgaData>,
}

impl NmeaParser {
    pub(crate) fn new(provider: &'static str) -> Self {
        Self { provider, last_gga: None }
    }

    pub(crate) fn feed(&mut self, line: &str) -> Option<RawFix> {
        let body = checked_body(line.trim())?;
        let parts: Vec<&str> = body.split(',').collect();
        let kind = parts.first()?;

        if kind.ends_with("GGA") {
            if parts.len() > 9 {
                // quality 0 means no fix
                if parts[6] == "0" || parts[6].is_empty() {
                    self.last_gga = None;
                    return None;
                }
                self.last_gga = Some(GgaData {
                    sats: parts[7].parse().unwrap_or(0),
                    hdop: parts[8].parse().unwrap_or(99.9),
                    altitude_m: parts[9].parse().ok(),
                });
            }
            return None;
        }

        if kind.ends_with("RMC") && parts.len() > 9 {
            if parts[2] != "A" {
                return None;
            }
            let lat = parse_deg_min(parts[3], parts[4])?;
            let lon = parse_deg_min(parts[5], parts[6])?;
            let ts = parse_utc(parts[1], parts[9]).unwrap_or_else(OffsetDateTime::now_utc);
            let gga = self.last_gga;

            return Some(RawFix {
                lat,
                lon,
                ts,
                accuracy_m: gga.filter(|g| g.sats > 0).map(|g| g.hdop * UERE_M),
                altitude_m: gga.and_then(|g| g.altitude_m),
                speed_mps: parts[7].parse::<f32>().ok().map(|kn| kn * KNOTS_TO_MPS),
                bearing_deg: parts[8].parse().ok(),
                provider: Some(self.provider.to_string()),
            });
        }

        None
    }
}

// Strips `$` and the `*hh` checksum, rejecting sentences whose checksum is wrong.
fn checked_body(s: &str) -> Option<&str> {
    let s = s.strip_prefix('$')?;
    match s.split_once('*') {
        Some((body, sum)) => {
            let want = u8::from_str_radix(sum.get(..2)?, 16).ok()?;
            let got = body.bytes().fold(0u8, |acc, b| acc ^ b);
            (want == got).then_some(body)
        }
        None => Some(s),
    }
}

fn parse_deg_min(v: &str, hemi: &str) -> Option<f64> {
    if v.is_empty() {
        return None;
    }
    // lat: ddmm.mmmm, lon: dddmm.mmmm
    let dot = v.find('.').unwrap_or(v.len());
    let deg_len = if dot > 4 { 3 } else { 2 };
    let deg: f64 = v.get(..deg_len)?.parse().ok()?;
    let min: f64 = v.get(deg_len..)?.parse().ok()?;
    let mut out = deg + (min / 60.0);
    if hemi == "S" || hemi == "W" {
        out = -out;
    }
    Some(out)
}

// hhmmss.sss + ddmmyy
fn parse_utc(hms: &str, dmy: &str) -> Option<OffsetDateTime> {
    if hms.len() < 6 || dmy.len() != 6 {
        return None;
    }
    let h: u8 = hms.get(0..2)?.parse().ok()?;
    let m: u8 = hms.get(2..4)?.parse().ok()?;
    let sec: f64 = hms.get(4..)?.parse().ok()?;
    let day: u8 = dmy.get(0..2)?.parse().ok()?;
    let month: u8 = dmy.get(2..4)?.parse().ok()?;
    let yy: i32 = dmy.get(4..6)?.parse().ok()?;
    let year = if yy < 80 { 2000 + yy } else { 1900 + yy };

    let date = Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()?;
    let millis = ((sec.fract() * 1000.0).round() as u16).min(999);
    let time = Time::from_hms_milli(h, m, sec.trunc() as u8, millis).ok()?;
    Some(date.with_time(time).assume_utc())
}
