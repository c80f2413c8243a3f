//! Malay-odds arithmetic and the parsing rules applied to feed prices and line keys.
//!
//! Every feed quotes malay odds: a positive price pays that multiple of the stake, a negative
//! price risks `|price|` to win one unit.

/// Decimal odds for a malay price.
pub fn decimal(malay: f64) -> f64 {
    if malay >= 0.0 {
        1.0 + malay
    } else {
        1.0 + 1.0 / malay.abs()
    }
}

/// Implied probability of a malay price.
pub fn prob(malay: f64) -> f64 {
    if malay >= 0.0 {
        1.0 / (1.0 + malay)
    } else {
        malay.abs() / (1.0 - malay)
    }
}

/// Malay price for an implied probability in (0, 1).
pub fn malay(p: f64) -> f64 {
    let inv = 1.0 / p;
    if inv > 2.0 {
        -1.0 / (inv - 1.0)
    } else {
        inv - 1.0
    }
}

/// Price movement from `old` to `new` in points; positive means the price dropped.
///
/// A move from a non-negative to a negative price has no defined direction and reports 0.
pub fn points(old: f64, new: f64) -> f64 {
    match (old < 0.0, new < 0.0) {
        (true, true) => (new * 100.0).abs() - (old * 100.0).abs(),
        (true, false) => (100.0 - (old * 100.0).abs()) + (100.0 - new * 100.0),
        (false, false) => old * 100.0 - new * 100.0,
        (false, true) => 0.0,
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Reads a price from a feed value. Anything that is not a finite number is absent.
pub fn parse_price(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64().filter(|p| p.is_finite()),
        serde_json::Value::String(s) => parse_price_str(s),
        _ => None,
    }
}

pub fn parse_price_str(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().trim_matches('*');
    if cleaned.is_empty() || !cleaned.chars().all(|c| "0123456789./-+".contains(c)) {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Canonical line text for a feed line key, or None when the key is not a line.
///
/// Strips a leading `+`, turns split lines such as `-0.5/1` into their midpoint (`-0.75`) and
/// renders integral values without a fraction.
pub fn clean_line(raw: &str) -> Option<String> {
    line_value(raw).map(format_line)
}

pub fn line_value(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().trim_matches('*');
    let (negative, body) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.strip_prefix('+').unwrap_or(cleaned)),
    };
    let magnitude = match body.split_once('/') {
        Some((a, b)) => (parse_unsigned(a)? + parse_unsigned(b)?) / 2.0,
        None => parse_unsigned(body)?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn parse_unsigned(s: &str) -> Option<f64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn format_line(v: f64) -> String {
    if v == 0.0 {
        "0".to_string()
    } else {
        v.to_string()
    }
}

/// The line on the other side of a handicap: `-0.5 → 0.5`, `0 → 0`.
pub fn opposite_line(line: &str) -> Option<String> {
    line_value(line).map(|v| format_line(-v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_of_malay_inverts_probability() {
        for i in 1..100 {
            let p = i as f64 / 100.0;
            let d = decimal(malay(p));
            assert!((d - 1.0 / p).abs() < 1e-9, "p={p} decimal={d}");
        }
    }

    #[test]
    fn prob_matches_decimal() {
        for m in [-0.95, -0.5, 0.0, 0.45, 0.9] {
            assert!((prob(m) - 1.0 / decimal(m)).abs() < 1e-9, "m={m}");
        }
    }

    #[test]
    fn points_examples() {
        assert!((points(-0.6, -0.9) - 30.0).abs() < 1e-9);
        assert!((points(0.9, 0.6) - 30.0).abs() < 1e-9);
        assert_eq!(points(0.5, -0.1), 0.0);
        // -0.9 → 0.95: 10 points to even, 5 more past it
        assert!((points(-0.9, 0.95) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn parses_prices_leniently() {
        assert_eq!(parse_price(&serde_json::json!("0.94")), Some(0.94));
        assert_eq!(parse_price(&serde_json::json!(" -1.05* ")), Some(-1.05));
        assert_eq!(parse_price(&serde_json::json!(0.8)), Some(0.8));
        assert_eq!(parse_price(&serde_json::json!("N/A")), None);
        assert_eq!(parse_price(&serde_json::json!("")), None);
        assert_eq!(parse_price(&serde_json::json!("0.9/1")), None);
        assert_eq!(parse_price(&serde_json::Value::Null), None);
    }

    #[test]
    fn cleans_line_keys() {
        assert_eq!(clean_line("+0.5").as_deref(), Some("0.5"));
        assert_eq!(clean_line("-0.5/1").as_deref(), Some("-0.75"));
        assert_eq!(clean_line("0/0.5").as_deref(), Some("0.25"));
        assert_eq!(clean_line("2.5/3").as_deref(), Some("2.75"));
        assert_eq!(clean_line("-1.0").as_deref(), Some("-1"));
        assert_eq!(clean_line("-0").as_deref(), Some("0"));
        assert_eq!(clean_line("abc"), None);
        assert_eq!(clean_line("+-1"), None);
    }

    #[test]
    fn opposite_line_negates() {
        assert_eq!(opposite_line("-0.5").as_deref(), Some("0.5"));
        assert_eq!(opposite_line("1.25").as_deref(), Some("-1.25"));
        assert_eq!(opposite_line("0").as_deref(), Some("0"));
    }
}
