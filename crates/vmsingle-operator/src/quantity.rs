//! Kubernetes resource quantities: grammar check and value comparison.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;

/// `<number><suffix>`, where suffix is a binary SI, decimal SI or `e<exp>` suffix.
static QUANTITY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<number>[+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+))(?P<suffix>Ki|Mi|Gi|Ti|Pi|Ei|n|u|m|k|M|G|T|P|E|[eE][+-]?[0-9]+)?$",
    )
    .expect("quantity regex is valid")
});

const MAX_DIGITS: usize = 30;

/// Checks the quantity grammar, e.g. `500Mi`, `0.5`, `150m`, `1e3`.
pub fn parse_quantity(raw: &str) -> Result<Quantity, &'static str> {
    let s = raw.trim();
    if s.is_empty() {
        return Err("quantity must not be empty");
    }
    if !QUANTITY_REGEX.is_match(s) {
        return Err("not a valid resource quantity");
    }
    Ok(Quantity(s.to_string()))
}

/// Exact value of a quantity as `mantissa * 10^exponent`, with trailing
/// zeros moved into the exponent so equal values compare equal.
pub fn canonical(raw: &str) -> Option<(i128, i32)> {
    let caps = QUANTITY_REGEX.captures(raw.trim())?;
    let number = &caps["number"];
    let (negative, unsigned) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let digits = format!("{int_part}{frac_part}");
    if digits.len() > MAX_DIGITS {
        return None;
    }
    let mut mantissa: i128 = digits.parse().ok()?;
    let mut exponent = -i32::try_from(frac_part.len()).ok()?;

    match caps.name("suffix").map(|m| m.as_str()).unwrap_or("") {
        "" => {}
        "Ki" => mantissa = mantissa.checked_mul(1 << 10)?,
        "Mi" => mantissa = mantissa.checked_mul(1 << 20)?,
        "Gi" => mantissa = mantissa.checked_mul(1 << 30)?,
        "Ti" => mantissa = mantissa.checked_mul(1 << 40)?,
        "Pi" => mantissa = mantissa.checked_mul(1 << 50)?,
        "Ei" => mantissa = mantissa.checked_mul(1 << 60)?,
        "n" => exponent -= 9,
        "u" => exponent -= 6,
        "m" => exponent -= 3,
        "k" => exponent += 3,
        "M" => exponent += 6,
        "G" => exponent += 9,
        "T" => exponent += 12,
        "P" => exponent += 15,
        "E" => exponent += 18,
        exp => exponent = exponent.checked_add(exp[1..].parse::<i32>().ok()?)?,
    }

    if mantissa == 0 {
        return Some((0, 0));
    }
    while mantissa % 10 == 0 {
        mantissa /= 10;
        exponent += 1;
    }
    Some((if negative { -mantissa } else { mantissa }, exponent))
}

/// Value equality; unparsable quantities fall back to string equality.
pub fn quantities_equal(a: &Quantity, b: &Quantity) -> bool {
    match (canonical(&a.0), canonical(&b.0)) {
        (Some(x), Some(y)) => x == y,
        _ => a.0.trim() == b.0.trim(),
    }
}

/// Compares two resource maps by value. An absent map equals an empty one.
pub fn resource_maps_equal(
    a: Option<&BTreeMap<String, Quantity>>,
    b: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let empty = BTreeMap::new();
    let (a, b) = (a.unwrap_or(&empty), b.unwrap_or(&empty));
    a.len() == b.len()
        && a
            .iter()
            .all(|(key, qa)| b.get(key).is_some_and(|qb| quantities_equal(qa, qb)))
}
