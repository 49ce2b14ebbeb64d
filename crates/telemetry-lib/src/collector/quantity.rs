//! Kubernetes resource quantity parsing

use anyhow::{bail, Context, Result};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Parse a Kubernetes quantity (`250m`, `1.5`, `128Mi`, `2G`, `1e3`) into
/// its value in base units.
pub fn parse_quantity(quantity: &str) -> Result<f64> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        bail!("empty quantity");
    }

    let split = quantity
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphabetic())
        .last()
        .map(|(i, _)| i)
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0_f64.powi(2),
        "Gi" => 1024.0_f64.powi(3),
        "Ti" => 1024.0_f64.powi(4),
        "Pi" => 1024.0_f64.powi(5),
        "Ei" => 1024.0_f64.powi(6),
        other => bail!("unknown quantity suffix {:?} in {:?}", other, quantity),
    };

    let value: f64 = number
        .parse()
        .with_context(|| format!("invalid quantity {:?}", quantity))?;
    if !value.is_finite() || value < 0.0 {
        bail!("invalid quantity {:?}", quantity);
    }

    Ok(value * multiplier)
}

/// CPU quantity in millicores
pub fn parse_cpu_millicores(quantity: &str) -> Result<f64> {
    Ok(parse_quantity(quantity)? * 1000.0)
}

/// Memory quantity in MiB
pub fn parse_memory_mib(quantity: &str) -> Result<f64> {
    Ok(parse_quantity(quantity)? / BYTES_PER_MIB)
}
