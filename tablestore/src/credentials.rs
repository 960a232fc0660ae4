//! Access credentials (spec.md section 6, "Credentials").

use crate::error::Error;

fn reject_cr_lf(field: &str, value: &str) -> Result<(), Error> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::validation(format!("{field} must not contain CR or LF")));
    }
    Ok(())
}

/// `(access_key_id, access_key_secret, optional security_token)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub security_token: Option<String>,
}

impl Credentials {
    /// `access_key_id`/`access_key_secret` must be non-empty and free of
    /// CR/LF; `security_token` may be empty but must also be CR/LF-free.
    pub fn new(
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
        security_token: Option<String>,
    ) -> Result<Self, Error> {
        let access_key_id = access_key_id.into();
        let access_key_secret = access_key_secret.into();
        if access_key_id.is_empty() {
            return Err(Error::validation("access_key_id must not be empty"));
        }
        if access_key_secret.is_empty() {
            return Err(Error::validation("access_key_secret must not be empty"));
        }
        reject_cr_lf("access_key_id", &access_key_id)?;
        reject_cr_lf("access_key_secret", &access_key_secret)?;
        if let Some(ref token) = security_token {
            reject_cr_lf("security_token", token)?;
        }
        Ok(Self { access_key_id, access_key_secret, security_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_access_key_id() {
        assert!(Credentials::new("", "secret", None).is_err());
    }

    #[test]
    fn rejects_cr_lf_in_secret() {
        assert!(Credentials::new("id", "sec\rret", None).is_err());
    }

    #[test]
    fn accepts_empty_security_token() {
        assert!(Credentials::new("id", "secret", Some(String::new())).is_ok());
    }
}
