//! Version information for viewgate.

/// Viewgate version from Cargo.toml
pub const VIEWGATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VersionInfo {
    pub viewgate: &'static str,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            viewgate: VIEWGATE_VERSION,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_crate_version() {
        assert_eq!(VersionInfo::new().viewgate, VIEWGATE_VERSION);
    }

    #[test]
    fn version_info_serializes() {
        let info = VersionInfo { viewgate: "0.1.0" };
        insta::assert_json_snapshot!(info, @r#"
        {
          "viewgate": "0.1.0"
        }
        "#);
    }
}
