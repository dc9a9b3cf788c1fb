use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// `\d` is ASCII-only here; versions become path components.
static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(v|V)?(?-u:\d)+\.(?-u:\d)+\.(?-u:\d)+([0-9A-Za-z_.-]+)?$")
        .expect("version regex is valid")
});

/// Check that `version` is a well-formed `major.minor.patch` string with an
/// optional `v` prefix and suffix. Version strings become path components,
/// so this runs before anything touches the network or the staging area.
pub fn validate(version: &str) -> Result<()> {
    if VERSION_REGEX.is_match(version) {
        Ok(())
    } else {
        Err(Error::InvalidVersion(version.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accepts_plain_and_prefixed() {
        for v in ["1.2.3", "v1.2.0", "V10.0.42", "v1.0.0-rc.1", "2.0.0_beta", "0.0.0"] {
            assert!(validate(v).is_ok(), "{v} should be valid");
        }
    }

    #[test]
    fn test_rejects_malformed() {
        for v in [
            "",
            "v1.2",
            "1",
            "x1.2.3",
            "../1.2.3",
            "1.2.3/../../etc",
            "1.2.3 ",
            "v1.2.3+build",
            "1..2.3",
            "v١.2.3",
        ] {
            assert!(
                matches!(validate(v), Err(Error::InvalidVersion(_))),
                "{v:?} should be rejected"
            );
        }
    }

    proptest! {
        #[test]
        fn prop_numeric_triples_are_valid(
            prefix in "(v|V)?",
            major in 0u32..10_000,
            minor in 0u32..10_000,
            patch in 0u32..10_000,
            suffix in "[0-9A-Za-z_.-]{0,12}"
        ) {
            let version = format!("{prefix}{major}.{minor}.{patch}{suffix}");
            prop_assert!(validate(&version).is_ok());
        }

        #[test]
        fn prop_missing_triple_is_invalid(
            major in 0u32..10_000,
            minor in 0u32..10_000,
            suffix in "[A-Za-z_-]{0,8}"
        ) {
            let version = format!("v{major}.{minor}{suffix}");
            prop_assert!(validate(&version).is_err());
        }
    }
}
