//! Name charset validation for datasets, fields, and aliases (§6)

use crate::error::Error;

/// Validate that `name` is non-empty and matches `[A-Za-z0-9_]+`.
pub fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || !name.bytes().all(is_safe_byte) {
        return Err(Error::InvalidFieldName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn is_safe_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alnum_and_underscore() {
        assert!(validate_name("site_id_42").is_ok());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(validate_name("").is_err());
    }

    #[test]
    fn rejects_disallowed_characters() {
        for bad in ["has space", "dash-name", "dot.name", "slash/name"] {
            assert!(validate_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
