use regex::Regex;

/// Largest chip amount accepted from a read; anything above is a misread
pub const MAX_AMOUNT: f64 = 1.0e12;

/// Parse a chip amount from OCR text.
/// Accepts forms like "1,250", "$12.50", "Pot: 3,400", "1.5K", "2M".
pub fn parse_amount(text: &str) -> Result<f64, String> {
    let re = Regex::new(r"(\d{1,3}(?:,\d{3})+|\d+)(?:\.(\d+))?\s*([kKmMbB])?")
        .map_err(|e| format!("Invalid amount pattern: {}", e))?;

    let captures = re
        .captures(text.trim())
        .ok_or_else(|| format!("Could not parse amount from: {}", text))?;

    let whole = captures
        .get(1)
        .ok_or("No digits found")?
        .as_str()
        .replace(',', "");
    let number = match captures.get(2) {
        Some(fraction) => format!("{}.{}", whole, fraction.as_str()),
        None => whole,
    };

    let mut amount: f64 = number
        .parse()
        .map_err(|e| format!("Failed to parse amount '{}': {}", number, e))?;

    if let Some(suffix) = captures.get(3) {
        amount *= match suffix.as_str() {
            "k" | "K" => 1_000.0,
            "m" | "M" => 1_000_000.0,
            _ => 1_000_000_000.0,
        };
    }

    if !validate_amount(amount) {
        return Err(format!("Amount {} out of valid range", amount));
    }

    Ok(amount)
}

/// Parse a player name from OCR text
pub fn parse_name(text: &str) -> Result<String, String> {
    let name: String = text
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .collect();

    if name.is_empty() {
        return Err("Name is empty".to_string());
    }

    Ok(name)
}

pub fn validate_amount(amount: f64) -> bool {
    amount.is_finite() && (0.0..=MAX_AMOUNT).contains(&amount)
}
