//! The `<scheme>://<hostname>` provider-ID format (spec.md §6, invariant 3
//! in §8).

use crate::annotations::PROVIDER_SCHEME;
use crate::error::{Error, Result};
use once_cell_lite::OnceRegex;
use regex::Regex;

/// Build the canonical provider-ID for a host name.
pub fn format(host_name: &str) -> String {
    format!("{}://{}", PROVIDER_SCHEME, host_name)
}

/// Validate that `provider_id` is well-formed for `host_name` under the
/// regex from spec.md §6: `^<scheme>://<hostname>(/.+)?$`.
pub fn validate(provider_id: &str, host_name: &str) -> Result<()> {
    let pattern = format!(
        "^{}://{}(/.+)?$",
        regex::escape(PROVIDER_SCHEME),
        regex::escape(host_name)
    );
    let re = Regex::new(&pattern).map_err(|e| Error::Other(anyhow::anyhow!(e)))?;
    if re.is_match(provider_id) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "provider ID {:?} is not well-formed for host {:?}",
            provider_id, host_name
        )))
    }
}

/// A lazily-compiled regex matching *any* well-formed provider ID,
/// regardless of host name, used to distinguish "empty" from "malformed"
/// during provider-ID propagation (spec.md 4.E).
pub fn is_well_formed(provider_id: &str) -> bool {
    static RE: OnceRegex = OnceRegex::new(r"^[a-z]{4,8}://[^/]+(/.+)?$");
    RE.get().is_match(provider_id)
}

/// Tiny `OnceLock`-backed regex cache so modules that only need one or two
/// patterns don't have to pull in `lazy_static` for it.
mod once_cell_lite {
    use regex::Regex;
    use std::sync::OnceLock;

    pub struct OnceRegex {
        pattern: &'static str,
        cell: OnceLock<Regex>,
    }

    impl OnceRegex {
        pub const fn new(pattern: &'static str) -> Self {
            Self {
                pattern,
                cell: OnceLock::new(),
            }
        }

        pub fn get(&self) -> &Regex {
            self.cell
                .get_or_init(|| Regex::new(self.pattern).expect("static regex is valid"))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formats_and_validates_round_trip() {
        let id = format("host-1");
        assert_eq!(id, "hostlet://host-1");
        assert!(validate(&id, "host-1").is_ok());
    }

    #[test]
    fn rejects_mismatched_host_name() {
        let id = format("host-1");
        assert!(validate(&id, "host-2").is_err());
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert!(validate("other://host-1", "host-1").is_err());
    }

    #[test]
    fn accepts_trailing_path_segment() {
        let id = format("host-1") + "/extra";
        assert!(validate(&id, "host-1").is_ok());
    }

    #[test]
    fn is_well_formed_rejects_empty() {
        assert!(!is_well_formed(""));
        assert!(is_well_formed("hostlet://host-1"));
    }
}
