//! Round-robin credential pools for keyed providers.
//!
//! Each keyed provider owns one [`CredentialPool`]. A lookup walks the pool
//! starting at the shared cursor, trying every credential at most once, and
//! leaves the cursor on the credential that found a place so the next
//! independent lookup starts there instead of on an exhausted key. Misses and
//! exhaustion leave the cursor where it was.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use secrecy::SecretString;
use tracing::{debug, trace};

use crate::providers::Resolution;

#[derive(Clone, Debug)]
pub struct ProviderCredential {
    key: SecretString,
    host: Option<String>,
}

impl ProviderCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: SecretString::from(key.into()),
            host: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn key(&self) -> &SecretString {
        &self.key
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

/// Outcome of one request made with one credential.
#[derive(Debug)]
pub enum KeyAttempt {
    /// The provider answered with a usable result.
    Found(crate::providers::PlaceResult),
    /// The provider answered authoritatively with nothing; other keys would
    /// not change the answer.
    Empty,
    /// Quota exhausted, rate limited, or the request failed. Try the next key.
    Rejected,
}

#[derive(Clone)]
pub struct CredentialPool {
    provider: &'static str,
    credentials: Arc<Vec<ProviderCredential>>,
    cursor: Arc<Mutex<usize>>,
}

impl CredentialPool {
    pub fn new(provider: &'static str, credentials: Vec<ProviderCredential>) -> Self {
        Self {
            provider,
            credentials: Arc::new(credentials),
            cursor: Arc::new(Mutex::new(0)),
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn cursor(&self) -> usize {
        *self.cursor.lock()
    }

    /// Credential at `attempt` slots past the cursor.
    pub fn next(&self, attempt: usize) -> Option<ProviderCredential> {
        if self.credentials.is_empty() {
            return None;
        }
        let start = *self.cursor.lock();
        Some(self.credentials[(start + attempt) % self.credentials.len()].clone())
    }

    fn advance_from(&self, start: usize, offset: usize) {
        let len = self.credentials.len();
        if len == 0 {
            return;
        }
        let mut cursor = self.cursor.lock();
        *cursor = (start + offset) % len;
    }

    /// Calls `attempt` with each credential in rotation order until one
    /// produces a definitive answer. Every credential is used at most once.
    pub async fn try_each<F, Fut>(&self, mut attempt: F) -> Resolution
    where
        F: FnMut(ProviderCredential) -> Fut,
        Fut: Future<Output = KeyAttempt>,
    {
        let len = self.credentials.len();
        if len == 0 {
            debug!(provider = self.provider, "credential pool is empty; skipping");
            return Resolution::NotFound;
        }

        let start = *self.cursor.lock();
        for offset in 0..len {
            let credential = self.credentials[(start + offset) % len].clone();
            match attempt(credential).await {
                KeyAttempt::Found(result) => {
                    self.advance_from(start, offset);
                    trace!(
                        provider = self.provider,
                        slot = (start + offset) % len,
                        "credential answered; cursor advanced"
                    );
                    return Resolution::Found(result);
                }
                KeyAttempt::Empty => return Resolution::NotFound,
                KeyAttempt::Rejected => {
                    debug!(
                        provider = self.provider,
                        slot = (start + offset) % len,
                        "credential rejected; rotating"
                    );
                }
            }
        }

        debug!(provider = self.provider, tried = len, "credential pool exhausted");
        Resolution::NotFound
    }
}
