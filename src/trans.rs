use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::{
    acc::AccountKey,
    error::{Error, Result},
    jws::{self, KeyBinding, ProtectedTemplate},
    req::{expect_header, handle_error, HttpClient, HttpRequest, HttpResponse},
};

/// Nonces older than this are discarded when read.
pub(crate) const NONCE_TTL: Duration = Duration::from_secs(15 * 60);

/// Extra attempts after the CA rejects a nonce.
pub(crate) const BAD_NONCE_RETRIES: u32 = 2;

/// JWS payload and nonce handling for requests to the API.
///
/// Setup is:
///
/// 1. `Transport::new()`
/// 2. `call_jwk()` against newAccount url
/// 3. `set_key_id` from the returned `Location` header.
/// 4. `call_kid()` / `post_as_get()` for all calls after that.
#[derive(Clone)]
pub(crate) struct Transport {
    client: Arc<dyn HttpClient>,
    nonce_pool: Arc<NoncePool>,
    account_key: AccountKey,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("nonce_pool", &self.nonce_pool)
            .field("account_key", &self.account_key)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(
        client: Arc<dyn HttpClient>,
        nonce_pool: Arc<NoncePool>,
        account_key: AccountKey,
    ) -> Self {
        Transport {
            client,
            nonce_pool,
            account_key,
        }
    }

    /// Update the key ID once it is known (part of setting up the transport).
    pub fn set_key_id(&mut self, kid: String) {
        self.account_key.set_key_id(kid);
    }

    /// The key used in the transport
    pub fn account_key(&self) -> &AccountKey {
        &self.account_key
    }

    pub fn client(&self) -> &Arc<dyn HttpClient> {
        &self.client
    }

    /// Make call using the full JWK.
    ///
    /// Only needed for the first newAccount request.
    pub async fn call_jwk<T>(&self, url: &str, body: &T) -> Result<HttpResponse>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body)?;
        self.do_call(url, &payload, KeyBinding::Jwk).await
    }

    /// Make call using the key ID.
    pub async fn call_kid<T>(&self, url: &str, body: &T) -> Result<HttpResponse>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body)?;
        self.do_call(url, &payload, self.kid()?).await
    }

    /// Signed request with an empty payload, see [RFC 8555 §6.3].
    ///
    /// [RFC 8555 §6.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.3
    pub async fn post_as_get(&self, url: &str) -> Result<HttpResponse> {
        self.do_call(url, b"", self.kid()?).await
    }

    /// Unsigned GET, used for challenge status polling.
    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        log::debug!("Get endpoint: {url}");

        let res = self.client.send(HttpRequest::get(url)).await?;
        self.nonce_pool.extract_nonce(&res);

        Ok(handle_error(res)?)
    }

    fn kid(&self) -> Result<KeyBinding> {
        self.account_key
            .key_id()
            .map(|kid| KeyBinding::Kid(kid.to_owned()))
            .ok_or_else(|| Error::config("account key ID is unknown; register the account first"))
    }

    async fn do_call(&self, url: &str, payload: &[u8], binding: KeyBinding) -> Result<HttpResponse> {
        let mut retries = 0;

        // The ACME API may at any point invalidate all nonces. If we detect such an
        // error, we retry with a fresh nonce a bounded number of times.
        loop {
            // Either get a new nonce, or reuse one from a previous request.
            let nonce = self.nonce_pool.next_nonce(self.client.as_ref()).await?;

            // Sign the body.
            let template = ProtectedTemplate::new(url, nonce, binding.clone());
            let jws = jws::sign(self.account_key.jwk(), &template, payload)?;
            let body = serde_json::to_vec(&jws)?;

            log::debug!("Call endpoint: {url}");

            // Post it to the URL
            let res = self.client.send(HttpRequest::post_jose(url, body)).await?;

            // Regardless of the request being a success or not, there might be a nonce in the
            // response.
            self.nonce_pool.extract_nonce(&res);

            match handle_error(res) {
                Ok(res) => return Ok(res),

                Err(problem) if problem.is_bad_nonce() && retries < BAD_NONCE_RETRIES => {
                    retries += 1;
                    log::debug!("Retrying on bad nonce ({retries}/{BAD_NONCE_RETRIES})");
                }

                Err(problem) => return Err(problem.into()),
            }
        }
    }
}

/// Shared pool of nonces, freshest first.
#[derive(Debug)]
pub(crate) struct NoncePool {
    nonce_url: String,
    pool: Mutex<VecDeque<(String, Instant)>>,
}

impl NoncePool {
    pub fn new(nonce_url: &str) -> Self {
        NoncePool {
            nonce_url: nonce_url.to_owned(),
            pool: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, nonce: &str) {
        // see https://datatracker.ietf.org/doc/html/rfc8555#section-6.5.1
        if !is_valid_nonce(nonce) {
            log::debug!("Ignoring malformed replay-nonce {nonce:?}");
            return;
        }

        log::trace!("Recording new nonce");
        self.pool
            .lock()
            .push_front((nonce.to_owned(), Instant::now()));
    }

    fn extract_nonce(&self, res: &HttpResponse) {
        if let Some(nonce) = res.header("replay-nonce") {
            self.record(nonce);
        }
    }

    /// Pops the freshest unexpired nonce; expired entries are dropped on the way.
    fn take(&self) -> Option<String> {
        let mut pool = self.pool.lock();

        while let Some((nonce, created)) = pool.pop_front() {
            if created.elapsed() < NONCE_TTL {
                return Some(nonce);
            }

            log::trace!("Discarding expired nonce");
        }

        None
    }

    pub async fn next_nonce(&self, client: &dyn HttpClient) -> Result<String> {
        if let Some(nonce) = self.take() {
            log::trace!("Use previous nonce");
            return Ok(nonce);
        }

        log::debug!("Request new nonce");
        let res = client.send(HttpRequest::head(&self.nonce_url)).await?;
        let res = handle_error(res)?;

        expect_header(&res, "replay-nonce")
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pool.lock().len()
    }
}

fn is_valid_nonce(nonce: &str) -> bool {
    !nonce.is_empty()
        && nonce
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
