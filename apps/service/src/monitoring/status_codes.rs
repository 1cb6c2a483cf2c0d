use std::ops::RangeInclusive;

/// Parsed set of accepted HTTP status codes.
///
/// Entries are single codes ("301") or inclusive ranges ("200-299").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedStatusCodes {
    ranges: Vec<RangeInclusive<u16>>,
}

impl AcceptedStatusCodes {
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, String> {
        let mut ranges = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = entry.as_ref().trim();
            let range = match entry.split_once('-') {
                Some((low, high)) => parse_code(low)?..=parse_code(high)?,
                None => {
                    let code = parse_code(entry)?;
                    code..=code
                }
            };
            if range.is_empty() {
                return Err(format!("empty status code range `{entry}`"));
            }
            ranges.push(range);
        }
        if ranges.is_empty() {
            return Err("no accepted status codes configured".to_string());
        }
        Ok(Self { ranges })
    }

    pub fn contains(&self, code: u16) -> bool {
        self.ranges.iter().any(|range| range.contains(&code))
    }
}

fn parse_code(raw: &str) -> Result<u16, String> {
    let code: u16 = raw.trim().parse().map_err(|_| format!("invalid status code `{}`", raw.trim()))?;
    if !(100..=999).contains(&code) {
        return Err(format!("status code out of range `{code}`"));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_and_single_codes() {
        let accepted = AcceptedStatusCodes::parse(&["200-299", "301"]).unwrap();
        assert!(accepted.contains(200));
        assert!(accepted.contains(299));
        assert!(accepted.contains(301));
        assert!(!accepted.contains(302));
        assert!(!accepted.contains(404));
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(AcceptedStatusCodes::parse(&["abc"]).is_err());
        assert!(AcceptedStatusCodes::parse(&["299-200"]).is_err());
        assert!(AcceptedStatusCodes::parse(&["42"]).is_err());
        assert!(AcceptedStatusCodes::parse::<&str>(&[]).is_err());
    }
}
