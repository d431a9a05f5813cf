use std::sync::Mutex;

/// Session-level conditions the embedding shell must act on (sign-in screen,
/// billing page). The gateway reports them; it never navigates anywhere itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    LoginRequired,
    BillingRequired,
}

/// Token source injected into the gateway at construction. Keeping this behind
/// a trait (instead of reading shared storage directly) lets tests run the
/// gateway against a plain in-memory store.
pub trait CredentialStore: Send + Sync {
    fn access_token(&self) -> Option<String>;
    fn refresh_token(&self) -> Option<String>;
    fn store_tokens(&self, access: &str, refresh: Option<&str>);
    fn clear(&self);
}

#[derive(Debug, Default)]
struct TokenState {
    access: Option<String>,
    refresh: Option<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryCredentials {
    inner: Mutex<TokenState>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(access: &str, refresh: Option<&str>) -> Self {
        let store = Self::new();
        store.store_tokens(access, refresh);
        store
    }
}

impl CredentialStore for InMemoryCredentials {
    fn access_token(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|g| g.access.clone())
    }

    fn refresh_token(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|g| g.refresh.clone())
    }

    fn store_tokens(&self, access: &str, refresh: Option<&str>) {
        if let Ok(mut g) = self.inner.lock() {
            g.access = Some(access.to_string());
            // A refresh response may rotate only the access token.
            if let Some(r) = refresh {
                g.refresh = Some(r.to_string());
            }
        }
    }

    fn clear(&self) {
        if let Ok(mut g) = self.inner.lock() {
            g.access = None;
            g.refresh = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_read_tokens() {
        let creds = InMemoryCredentials::new();
        assert_eq!(creds.access_token(), None);

        creds.store_tokens("acc-1", Some("ref-1"));
        assert_eq!(creds.access_token().as_deref(), Some("acc-1"));
        assert_eq!(creds.refresh_token().as_deref(), Some("ref-1"));
    }

    #[test]
    fn rotation_without_refresh_keeps_old_refresh_token() {
        let creds = InMemoryCredentials::with_tokens("acc-1", Some("ref-1"));
        creds.store_tokens("acc-2", None);
        assert_eq!(creds.access_token().as_deref(), Some("acc-2"));
        assert_eq!(creds.refresh_token().as_deref(), Some("ref-1"));
    }

    #[test]
    fn clear_drops_both_tokens() {
        let creds = InMemoryCredentials::with_tokens("acc-1", Some("ref-1"));
        creds.clear();
        assert_eq!(creds.access_token(), None);
        assert_eq!(creds.refresh_token(), None);
    }
}
