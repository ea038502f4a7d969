//! Kubernetes version parsing.

use crate::error::CoreError;
use std::fmt;
use std::str::FromStr;

/// `major.minor.patch` of a Kubernetes release. Pre-release and build
/// suffixes are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KubeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl KubeVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// True when this version is older than `major.minor`.
    pub fn lt_minor(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) < (major, minor)
    }
}

impl FromStr for KubeVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::Validation(format!("invalid Kubernetes version {s:?}"));
        let core = s.trim().trim_start_matches('v');
        let core = core.split(['-', '+']).next().unwrap_or(core);
        let mut parts = core.split('.');
        let mut next = || -> Result<u32, CoreError> {
            parts
                .next()
                .ok_or_else(invalid)?
                .parse()
                .map_err(|_| invalid())
        };
        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        assert_eq!("v1.29.2".parse::<KubeVersion>().unwrap(), KubeVersion::new(1, 29, 2));
        assert_eq!(
            "v1.30.0-alpha.1+abc".parse::<KubeVersion>().unwrap(),
            KubeVersion::new(1, 30, 0)
        );
        assert_eq!("1.14.10\n".parse::<KubeVersion>().unwrap(), KubeVersion::new(1, 14, 10));
        assert!("v1.29".parse::<KubeVersion>().is_err());
        assert!("latest".parse::<KubeVersion>().is_err());
    }

    #[test]
    fn test_lt_minor() {
        let v = KubeVersion::new(1, 24, 7);
        assert!(v.lt_minor(1, 25));
        assert!(!v.lt_minor(1, 24));
        assert_eq!(v.to_string(), "v1.24.7");
    }
}
