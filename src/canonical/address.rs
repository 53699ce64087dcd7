//! Address blob splitting.

use regex::Regex;

use crate::error::Result;
use crate::models::AddressParts;

/// Splits free-form address blobs into [`AddressParts`].
#[derive(Debug, Clone)]
pub struct AddressParser {
    phone: Regex,
    region_postal: Regex,
    city_region_postal: Regex,
}

impl AddressParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            phone: Regex::new(r"^(\+?1[\s.-]*)?\(?\d{3}\)?[\s.-]*\d{3}[\s.-]*\d{4}\b")?,
            region_postal: Regex::new(r"^([A-Za-z]{2})(?:\s+(\d{5}(?:-\d{4})?))?$")?,
            city_region_postal: Regex::new(r"^(.+?)\s+([A-Za-z]{2})\s+(\d{5}(?:-\d{4})?)$")?,
        })
    }

    /// Parse a multi-line or comma-delimited blob.
    ///
    /// Lines are tried first: street, then city (unless the line is already a
    /// region/postal pair), then region and postal. Fewer than three usable
    /// lines switches to a comma split of the whole blob. Non-empty hints
    /// replace whatever was parsed for that part.
    pub fn parse(
        &self,
        raw: &str,
        city_hint: &str,
        region_hint: &str,
        postal_hint: &str,
    ) -> AddressParts {
        let lines: Vec<&str> = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !self.is_junk(l))
            .collect();

        let mut parts = if lines.len() >= 3 {
            self.from_lines(&lines)
        } else {
            self.from_commas(raw)
        };

        for (slot, hint) in [
            (&mut parts.city, city_hint),
            (&mut parts.region, region_hint),
            (&mut parts.postal, postal_hint),
        ] {
            let hint = hint.trim();
            if !hint.is_empty() {
                *slot = hint.to_string();
            }
        }
        parts.region = parts.region.to_uppercase();
        parts
    }

    fn is_junk(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        lower.starts_with("directions")
            || lower.contains("last updated")
            || lower.contains("updated on")
            || self.phone.is_match(line)
    }

    fn from_lines(&self, lines: &[&str]) -> AddressParts {
        let mut parts = AddressParts {
            street: lines[0].to_string(),
            ..AddressParts::default()
        };

        if self.fill_region_postal(lines[1], &mut parts) {
            return parts;
        }
        parts.city = lines[1].trim_end_matches(',').to_string();
        self.fill_region_postal(lines[2], &mut parts);
        parts
    }

    fn from_commas(&self, raw: &str) -> AddressParts {
        let pieces: Vec<&str> = raw
            .split([',', '\n'])
            .map(str::trim)
            .filter(|p| !p.is_empty() && !self.is_junk(p))
            .collect();

        let Some((street, rest)) = pieces.split_first() else {
            return AddressParts::default();
        };
        let mut parts = AddressParts {
            street: street.to_string(),
            ..AddressParts::default()
        };

        match rest {
            [] => {}
            [only] => {
                if !self.fill_region_postal(only, &mut parts) {
                    self.fill_city_region_postal(only, &mut parts);
                }
            }
            [city, tail, ..] => {
                if self.fill_region_postal(tail, &mut parts) {
                    parts.city = city.to_string();
                } else if !self.fill_city_region_postal(tail, &mut parts) {
                    parts.city = city.to_string();
                }
            }
        }
        parts
    }

    /// `AZ` or `AZ 85001`.
    fn fill_region_postal(&self, text: &str, parts: &mut AddressParts) -> bool {
        let Some(caps) = self.region_postal.captures(text.trim()) else {
            return false;
        };
        parts.region = caps[1].to_string();
        parts.postal = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
        true
    }

    /// `Phoenix AZ 85001`.
    fn fill_city_region_postal(&self, text: &str, parts: &mut AddressParts) -> bool {
        let Some(caps) = self.city_region_postal.captures(text.trim()) else {
            parts.city = text.trim().to_string();
            return false;
        };
        parts.city = caps[1].to_string();
        parts.region = caps[2].to_string();
        parts.postal = caps[3].to_string();
        true
    }
}
