//! Display helpers shared by the HTML page and the AI prompts.

pub fn comma(value: i64) -> String {
    let digits = group_digits(value.unsigned_abs());
    if value < 0 { format!("-{digits}") } else { digits }
}

fn group_digits(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn money(value: f64) -> String {
    // `as` saturates, so huge or non-finite values clamp instead of wrapping.
    let rounded = value.round() as i64;
    let sign = if rounded < 0 { "-" } else { "" };
    format!("{sign}${}", group_digits(rounded.unsigned_abs()))
}

pub fn ecpm(value: f64) -> String {
    format!("${value:.2}")
}

pub fn count(value: f64) -> String {
    comma(value.round() as i64)
}

pub fn percent(value: Option<f64>) -> String {
    match value {
        // Adding 0.0 turns -0 into 0.
        Some(value) => format!("{:.0}%", value.round() + 0.0),
        None => "new".to_string(),
    }
}

pub fn signed_percent(value: Option<i64>) -> String {
    match value {
        Some(value) if value > 0 => format!("+{value}%"),
        Some(value) => format!("{value}%"),
        None => "new".to_string(),
    }
}

/// Renders a 0..1 fraction as a whole percentage.
pub fn rate(value: f64) -> String {
    format!("{:.0}%", (value * 100.0).round())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_groups_thousands() {
        assert_eq!(comma(0), "0");
        assert_eq!(comma(999), "999");
        assert_eq!(comma(1000), "1,000");
        assert_eq!(comma(1234567), "1,234,567");
        assert_eq!(comma(-45000), "-45,000");
    }

    #[test]
    fn money_rounds_to_whole_dollars() {
        assert_eq!(money(24000.4), "$24,000");
        assert_eq!(money(-1400.0), "-$1,400");
        assert_eq!(money(0.2), "$0");
        assert_eq!(money(-0.4), "$0");
    }

    #[test]
    fn extreme_amounts_clamp_instead_of_overflowing() {
        assert_eq!(money(-1e30), "-$9,223,372,036,854,775,808");
        assert_eq!(money(1e30), "$9,223,372,036,854,775,807");
        assert_eq!(comma(i64::MIN), "-9,223,372,036,854,775,808");
    }

    #[test]
    fn percents_show_sentinel_for_missing_base() {
        assert_eq!(percent(Some(242.86)), "243%");
        assert_eq!(percent(None), "new");
        assert_eq!(signed_percent(Some(12)), "+12%");
        assert_eq!(signed_percent(Some(-40)), "-40%");
        assert_eq!(signed_percent(Some(0)), "0%");
        assert_eq!(rate(0.954), "95%");
        assert_eq!(ecpm(1.5), "$1.50");
    }
}
