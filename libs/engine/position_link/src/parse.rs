// This file is part of Orthos.
//
// Orthos is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Orthos is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Orthos.  If not, see <http://www.gnu.org/licenses/>.

//! A minimal scanner for the property dump responses. The format is
//! XML-shaped but fixed and flat enough that a real XML decoder buys
//! nothing; we key directly on the known tag names.

/// Extract the numeric value of `<name ...>value</name>` from a property
/// listing. Returns None when the tag is absent or non-numeric.
pub fn parse_property(body: &str, name: &str) -> Option<f64> {
    let open = format!("<{}", name);
    let close = format!("</{}>", name);
    let start = body.find(&open)?;
    let rest = &body[start..];
    let value_start = rest.find('>')? + 1;
    let value_end = rest.find(&close)?;
    if value_end <= value_start {
        return None;
    }
    rest[value_start..value_end].trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<PropertyList>
  <latitude-deg type="double">47.260830</latitude-deg>
  <longitude-deg type="double">11.343964</longitude-deg>
  <altitude-ft type="double">1906.7</altitude-ft>
  <ground-elev-ft type="double">1893.3</ground-elev-ft>
  <empty type="double"></empty>
</PropertyList>
"#;

    #[test]
    fn test_extracts_typed_values() {
        assert!((parse_property(SAMPLE, "latitude-deg").unwrap() - 47.260830).abs() < 1e-9);
        assert!((parse_property(SAMPLE, "longitude-deg").unwrap() - 11.343964).abs() < 1e-9);
        assert!((parse_property(SAMPLE, "altitude-ft").unwrap() - 1906.7).abs() < 1e-9);
    }

    #[test]
    fn test_missing_or_empty_tags() {
        assert_eq!(parse_property(SAMPLE, "heading-deg"), None);
        assert_eq!(parse_property(SAMPLE, "empty"), None);
    }

    #[test]
    fn test_fragmented_reassembly_parses_whole() {
        // Values split across reads still parse once the listing closes.
        let mut body = String::new();
        for piece in ["<PropertyList>\n  <heading-d", "eg>271.5</heading-deg>\n</PropertyList>"] {
            body.push_str(piece);
        }
        assert!((parse_property(&body, "heading-deg").unwrap() - 271.5).abs() < 1e-9);
    }
}
