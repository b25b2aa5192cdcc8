//! ISO 8601 duration parsing (`PT1H2M3.4S`) and .NET tick conversion.

/// One tick is 100 ns.
const TICKS_PER_SECOND: f64 = 10_000_000.0;

/// Parses an ISO 8601 time duration into seconds.
///
/// Supports an optional day component (`P1DT2H`) and fractional values on
/// any component. Returns `None` for anything that is not a duration.
pub fn parse_iso8601(value: &str) -> Option<f64> {
    let rest = value.trim().strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((date, time)) => {
            if time.is_empty() {
                return None;
            }
            (date, time)
        }
        None => (rest, ""),
    };

    let mut total = 0.0;
    total += sum_components(date_part, &[('D', 86_400.0)])?;
    total += sum_components(time_part, &[('H', 3_600.0), ('M', 60.0), ('S', 1.0)])?;
    total.is_finite().then_some(total)
}

/// Converts a tick count into seconds.
pub fn ticks_to_seconds(ticks: u64) -> f64 {
    ticks as f64 / TICKS_PER_SECOND
}

/// Sums `<number><unit>` pairs. Units must appear in the given order,
/// each at most once.
fn sum_components(mut input: &str, units: &[(char, f64)]) -> Option<f64> {
    let mut total = 0.0;
    let mut allowed = units;

    while !input.is_empty() {
        let split = input.find(|c: char| c.is_ascii_alphabetic())?;
        let (number, tail) = input.split_at(split);
        let unit = tail.chars().next()?;

        let position = allowed.iter().position(|(u, _)| *u == unit)?;
        let amount: f64 = number.parse().ok()?;
        if !amount.is_finite() || amount < 0.0 {
            return None;
        }
        total += amount * allowed[position].1;
        if !total.is_finite() {
            return None;
        }

        allowed = &allowed[position + 1..];
        input = &tail[unit.len_utf8()..];
    }

    Some(total)
}
