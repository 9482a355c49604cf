use crate::error::NodeError;

/// Value the DS18B20 family reports for a missing or disconnected probe.
pub const DS18B20_DISCONNECTED_C: f32 = -127.0;
pub const DS18B20_MIN_C: f32 = -55.0;
pub const DS18B20_MAX_C: f32 = 125.0;

/// Rejects sentinels and out-of-range values so they never reach the service.
pub fn checked_celsius(temp_c: f32) -> Result<f32, NodeError> {
    if !temp_c.is_finite() {
        return Err(NodeError::Sensor(format!("non-finite reading {temp_c}")));
    }
    if (temp_c - DS18B20_DISCONNECTED_C).abs() < f32::EPSILON {
        return Err(NodeError::Sensor("sensor disconnected".to_string()));
    }
    if !(DS18B20_MIN_C..=DS18B20_MAX_C).contains(&temp_c) {
        return Err(NodeError::Sensor(format!(
            "reading {temp_c:.2}C outside {DS18B20_MIN_C}..={DS18B20_MAX_C}"
        )));
    }
    Ok(temp_c)
}

pub fn celsius_to_fahrenheit(temp_c: f32) -> f32 {
    temp_c * 9.0 / 5.0 + 32.0
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn passes_plausible_readings() {
        assert_eq!(checked_celsius(23.5), Ok(23.5));
        assert_eq!(checked_celsius(-55.0), Ok(-55.0));
    }

    #[test]
    fn rejects_disconnected_sentinel() {
        assert!(matches!(
            checked_celsius(DS18B20_DISCONNECTED_C),
            Err(NodeError::Sensor(_))
        ));
    }

    #[test]
    fn rejects_nan_and_out_of_range() {
        assert!(checked_celsius(f32::NAN).is_err());
        assert!(checked_celsius(126.0).is_err());
        assert!(checked_celsius(-60.0).is_err());
    }

    #[test]
    fn converts_to_fahrenheit() {
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
    }
}
