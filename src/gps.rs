use chrono::{DateTime, Duration, TimeZone, Utc};

/// Seconds between the Unix epoch and the GPS epoch (1980-01-06T00:00:00Z).
pub const GPS_UNIX_DELTA_SECS: i64 = 315_964_800;

/// The GPS epoch as a UTC timestamp.
pub fn gps_epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(GPS_UNIX_DELTA_SECS, 0).unwrap()
}

/// Decodes a 6-octet coarse/fine timestamp against the Unix epoch. `coarse`
/// counts whole seconds, `fine` counts 1/65536 fractions, truncated to
/// millisecond precision on the wire displays.
pub fn unix_time6(coarse: u32, fine: u16) -> DateTime<Utc> {
    let millis = (fine as f64 / 65536.0 * 1000.0) as i64;
    Utc.timestamp_opt(coarse as i64, 0).unwrap() + Duration::milliseconds(millis)
}

/// Same as [`unix_time6`] but for clocks counting from the GPS epoch, as the
/// HRDL header does.
pub fn gps_time6(coarse: u32, fine: u16) -> DateTime<Utc> {
    unix_time6(coarse, fine) + Duration::seconds(GPS_UNIX_DELTA_SECS)
}

/// Resolves a signed nanosecond count since the GPS epoch.
pub fn gps_nanos(nanos: i64) -> DateTime<Utc> {
    gps_epoch() + Duration::nanoseconds(nanos)
}

/// Reception timestamp carried by an HRDFE capture prefix: GPS seconds plus
/// microseconds.
pub fn hrdfe_timestamp(coarse: u32, fine_us: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(coarse as i64 + GPS_UNIX_DELTA_SECS, 0).unwrap()
        + Duration::microseconds(fine_us as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_1980_01_06() {
        assert_eq!(gps_epoch().to_rfc3339(), "1980-01-06T00:00:00+00:00");
    }

    #[test]
    fn time6_fraction_truncates_to_millis() {
        // 0x8000 / 65536 = 0.5 s exactly.
        let t = unix_time6(10, 0x8000);
        assert_eq!(t.timestamp(), 10);
        assert_eq!(t.timestamp_subsec_millis(), 500);
        // 1/65536 s is below a millisecond and truncates away.
        let t = unix_time6(10, 1);
        assert_eq!(t.timestamp_subsec_millis(), 0);
    }

    #[test]
    fn gps_time6_shifts_by_delta() {
        let unix = unix_time6(100, 0);
        let gps = gps_time6(100, 0);
        assert_eq!((gps - unix).num_seconds(), GPS_UNIX_DELTA_SECS);
    }

    #[test]
    fn hrdfe_microseconds() {
        let t = hrdfe_timestamp(0, 250_000);
        assert_eq!(t, gps_epoch() + Duration::milliseconds(250));
    }
}
