//! Recipient address normalization into the network's canonical form.
//!
//! `0812-3456-7890` → `6281234567890@s.whatsapp.net` with the default settings.

use nudge_core::config::DispatchConfig;
use nudge_core::error::{NudgeError, Result};

/// Deployment-specific address rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressFormat {
    country_code: String,
    trunk_prefix: char,
    suffix: String,
}

impl AddressFormat {
    pub fn new(country_code: impl Into<String>, trunk_prefix: char, suffix: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
            trunk_prefix,
            suffix: suffix.into(),
        }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(
            config.country_code.clone(),
            config.trunk_prefix,
            config.address_suffix.clone(),
        )
    }

    /// Strip non-digits, swap a leading trunk prefix for the country code,
    /// append the network suffix. Canonical input comes back unchanged.
    pub fn normalize(&self, raw: &str) -> Result<String> {
        let raw = raw.trim();
        let local = raw.strip_suffix(self.suffix.as_str()).unwrap_or(raw);
        let digits: String = local.chars().filter(|c| c.is_ascii_digit()).collect();

        let Some(first) = digits.chars().next() else {
            return Err(NudgeError::InvalidAddress(raw.to_string()));
        };

        let number = if first == self.trunk_prefix {
            format!("{}{}", self.country_code, &digits[first.len_utf8()..])
        } else {
            digits
        };

        Ok(format!("{number}{}", self.suffix))
    }
}

impl Default for AddressFormat {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}
