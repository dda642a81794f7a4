use serde::{Deserialize, Serialize};

/// Version, commit and build date of the running operator. Stamped on scan
/// jobs and reports so results can be traced back to the build that made
/// them.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
    pub date: String,
}

impl BuildInfo {
    /// Reads `VULNWATCH_GIT_COMMIT` and `VULNWATCH_BUILD_DATE` at compile
    /// time; release pipelines set them.
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: option_env!("VULNWATCH_GIT_COMMIT")
                .unwrap_or("none")
                .to_string(),
            date: option_env!("VULNWATCH_BUILD_DATE")
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_build_falls_back_when_unset() {
        let build = BuildInfo::current();
        assert_eq!(build.version, env!("CARGO_PKG_VERSION"));
        assert!(!build.commit.is_empty());
        assert!(!build.date.is_empty());
    }

    #[test]
    fn missing_fields_decode_as_empty() {
        let build: BuildInfo = serde_json::from_str(r#"{"version":"0.3.0"}"#).unwrap();
        assert_eq!(build.version, "0.3.0");
        assert_eq!(build.commit, "");
    }
}
