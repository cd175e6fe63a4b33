//! Vendor endpoint configuration and the vendor id slug rule (§3).

/// One configured vendor backend. The set is read once at process start and
/// is stable for the process lifetime (§3 "VendorEndpoint").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorEndpoint {
    pub host: String,
    pub port: u16,
    pub display_name: String,
}

impl VendorEndpoint {
    /// `vendor_id` is a slug of the display name: lowercased, non-alphanumerics
    /// stripped (§3 "PriceQuote").
    pub fn vendor_id(&self) -> String {
        slugify(&self.display_name)
    }

    pub fn addr(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Parse the `VENDORS` env var: comma-separated `host:port:display_name`.
    pub fn parse_list(raw: &str) -> anyhow::Result<Vec<VendorEndpoint>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(VendorEndpoint::parse_one)
            .collect()
    }

    fn parse_one(entry: &str) -> anyhow::Result<VendorEndpoint> {
        let mut parts = entry.splitn(3, ':');
        let host = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("vendor entry '{entry}' missing host"))?
            .to_string();
        let port: u16 = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("vendor entry '{entry}' missing port"))?
            .parse()
            .map_err(|e| anyhow::anyhow!("vendor entry '{entry}' has invalid port: {e}"))?;
        let display_name = parts
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&host)
            .to_string();
        Ok(VendorEndpoint {
            host,
            port,
            display_name,
        })
    }
}

pub fn slugify(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
