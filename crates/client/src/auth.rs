//! SASL authentication collaborator.

use bytes::Bytes;

/// Drives the client side of a SASL exchange.
///
/// The pipeline runs it once per connection, before the first command.
pub trait Authenticator: Send + Sync {
    /// Mechanism name sent with the start request, e.g. `PLAIN`.
    fn mechanism(&self) -> &str;

    /// Payload of the start request.
    fn initial_response(&self) -> Bytes;

    /// Answer a server challenge; `None` abandons the exchange.
    fn step(&self, _challenge: &[u8]) -> Option<Bytes> {
        None
    }
}

/// Fixed mechanism and credential payload, for single-step mechanisms.
#[derive(Clone)]
pub struct SaslCredentials {
    mechanism: String,
    payload: Bytes,
}

impl std::fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("mechanism", &self.mechanism)
            .finish_non_exhaustive()
    }
}

impl SaslCredentials {
    pub fn new(mechanism: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            mechanism: mechanism.into(),
            payload: payload.into(),
        }
    }

    /// `PLAIN` credentials: `\0user\0password`.
    pub fn plain(user: &str, password: &str) -> Self {
        let mut payload = Vec::with_capacity(user.len() + password.len() + 2);
        payload.push(0);
        payload.extend_from_slice(user.as_bytes());
        payload.push(0);
        payload.extend_from_slice(password.as_bytes());
        Self::new("PLAIN", payload)
    }
}

impl Authenticator for SaslCredentials {
    fn mechanism(&self) -> &str {
        &self.mechanism
    }

    fn initial_response(&self) -> Bytes {
        self.payload.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_payload() {
        let creds = SaslCredentials::plain("bob", "pw");
        assert_eq!(creds.mechanism(), "PLAIN");
        assert_eq!(&creds.initial_response()[..], b"\0bob\0pw");
        assert_eq!(creds.step(b"challenge"), None);
        assert!(!format!("{creds:?}").contains("pw"));
    }
}
