use std::fmt::Formatter;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::StatusCode;

use crate::collector::rate_limiter::RateLimiter;
use crate::data::models::AddressRecord;
use crate::postcode::Cep;

pub use self::awesomeapi::AwesomeApi;
pub use self::brasilapi::BrasilApi;
pub use self::viacep::ViaCep;

pub mod awesomeapi;
pub mod brasilapi;
pub mod viacep;

const USER_AGENT: &str = concat!("cep-collector/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Timeout, connection failure, 5xx or 429. Worth retrying.
    Transient(String),
    /// Any other failure, e.g. a 400 or a payload that doesn't decode.
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ProviderError::Transient(msg) => write!(f, "transient provider error: {}", msg),
            ProviderError::Permanent(msg) => write!(f, "provider error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() || error.is_builder() {
            ProviderError::Permanent(error.to_string())
        } else {
            ProviderError::Transient(error.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(error: serde_json::Error) -> Self {
        ProviderError::Permanent(format!("undecodable payload: {}", error))
    }
}

/// One upstream CEP lookup service.
///
/// `Ok(None)` is the provider's definitive "this code does not exist".
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, code: Cep) -> Result<Option<AddressRecord>, ProviderError>;
}

pub fn classify_status(status: StatusCode) -> Result<bool, ProviderError> {
    if status.is_success() {
        Ok(true)
    } else if status == StatusCode::NOT_FOUND {
        Ok(false)
    } else if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Err(ProviderError::Transient(format!("HTTP {}", status)))
    } else {
        Err(ProviderError::Permanent(format!("HTTP {}", status)))
    }
}

/// GETs `url`, returning the body of a successful response and `None` on 404.
pub(crate) async fn get_body(
    client: &reqwest::Client,
    url: &str,
) -> Result<Option<String>, ProviderError> {
    let response = client.get(url).send().await?;
    if !classify_status(response.status())? {
        return Ok(None);
    }
    Ok(Some(response.text().await?))
}

pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
}

pub(crate) fn trimmed(value: Option<String>) -> String {
    value.map(|v| v.trim().to_owned()).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    ViaCep,
    BrasilApi,
    AwesomeApi,
}

impl ProviderKind {
    pub fn build(self, client: reqwest::Client) -> Box<dyn Provider> {
        match self {
            ProviderKind::ViaCep => Box::new(ViaCep::new(client)),
            ProviderKind::BrasilApi => Box::new(BrasilApi::new(client)),
            ProviderKind::AwesomeApi => Box::new(AwesomeApi::new(client)),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viacep" => Ok(ProviderKind::ViaCep),
            "brasilapi" => Ok(ProviderKind::BrasilApi),
            "awesomeapi" => Ok(ProviderKind::AwesomeApi),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt, per provider and code
    pub max_retries: u32,
    /// Wait after failed attempt `n` is `backoff_base * n`
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            backoff_base: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found(AddressRecord),
    NotFound,
    /// No provider gave a definitive answer. Not the same as `NotFound`.
    AllProvidersFailed,
}

enum ProviderAnswer {
    Data(AddressRecord),
    Missing,
    Failed(ProviderError),
}

/// Providers in priority order, with per-provider retries.
pub struct ProviderChain {
    providers: Vec<Box<dyn Provider>>,
    retry: RetryPolicy,
}

impl ProviderChain {
    /// `None` when `providers` is empty.
    pub fn new(providers: Vec<Box<dyn Provider>>, retry: RetryPolicy) -> Option<ProviderChain> {
        if providers.is_empty() {
            return None;
        }
        Some(ProviderChain { providers, retry })
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Every upstream attempt, retries and fallbacks included, takes a
    /// permit from `limiter` first.
    pub async fn lookup(&self, code: Cep, limiter: &mut RateLimiter) -> LookupOutcome {
        let mut definitive_miss = false;
        for provider in self.providers.iter() {
            match self.ask(provider.as_ref(), code, limiter).await {
                ProviderAnswer::Data(record) => return LookupOutcome::Found(record),
                ProviderAnswer::Missing => {
                    debug!("{} has no data for {}", provider.name(), code);
                    definitive_miss = true;
                }
                ProviderAnswer::Failed(err) => {
                    warn!("Skipping {} for {}: {}", provider.name(), code, err);
                }
            }
        }

        if definitive_miss {
            LookupOutcome::NotFound
        } else {
            LookupOutcome::AllProvidersFailed
        }
    }

    async fn ask(&self, provider: &dyn Provider, code: Cep, limiter: &mut RateLimiter) -> ProviderAnswer {
        let attempts = self.retry.max_retries + 1;
        let mut attempt = 1;
        loop {
            limiter.acquire().await;
            match provider.fetch(code).await {
                Ok(Some(record)) => return ProviderAnswer::Data(record),
                Ok(None) => return ProviderAnswer::Missing,
                Err(err) if err.is_transient() && attempt < attempts => {
                    let wait = self.retry.backoff(attempt);
                    debug!(
                        "{} attempt {}/{} for {} failed ({}), retrying in {:?}",
                        provider.name(), attempt, attempts, code, err, wait
                    );
                    actix_rt::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return ProviderAnswer::Failed(err),
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::*;
    use super::*;
    use crate::collector::rate_limiter::RateLimitPolicy;

    fn cep(s: &str) -> Cep {
        s.parse().unwrap()
    }

    fn no_wait(max_retries: u32) -> RetryPolicy {
        RetryPolicy { max_retries, backoff_base: Duration::from_millis(0) }
    }

    fn unlimited() -> RateLimiter {
        RateLimiter::new(RateLimitPolicy {
            min_delay: Duration::from_millis(0),
            window: Duration::from_secs(60),
            max_per_window: 10_000,
        })
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), Ok(true));
        assert_eq!(classify_status(StatusCode::NOT_FOUND), Ok(false));
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE).unwrap_err().is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS).unwrap_err().is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST).unwrap_err().is_transient());
    }

    #[test]
    fn test_backoff_grows_with_attempt() {
        let policy = RetryPolicy { max_retries: 3, backoff_base: Duration::from_millis(500) };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_millis(1500));
    }

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!("ViaCEP".parse::<ProviderKind>(), Ok(ProviderKind::ViaCep));
        assert_eq!(" brasilapi ".parse::<ProviderKind>(), Ok(ProviderKind::BrasilApi));
        assert!("postmon".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_empty_chain_is_rejected() {
        assert!(ProviderChain::new(vec![], RetryPolicy::default()).is_none());
    }

    #[actix_rt::test]
    async fn test_primary_answer_wins() {
        let code = cep("38400-001");
        let primary = ScriptedProvider::new("primary").city(code, "Uberlândia");
        let secondary = ScriptedProvider::new("secondary").city(code, "Uberlândia");
        let secondary_calls = secondary.calls();
        let chain = ProviderChain::new(vec![Box::new(primary), Box::new(secondary)], no_wait(2)).unwrap();

        match chain.lookup(code, &mut unlimited()).await {
            LookupOutcome::Found(record) => assert_eq!(record.source, "primary"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
    }

    #[actix_rt::test]
    async fn test_transient_errors_are_retried_then_fall_back() {
        let code = cep("38400-005");
        let primary = ScriptedProvider::new("primary").otherwise(Err(timeout()));
        let primary_calls = primary.calls();
        let secondary = ScriptedProvider::new("secondary").city(code, "Uberlândia");
        let chain = ProviderChain::new(vec![Box::new(primary), Box::new(secondary)], no_wait(2)).unwrap();

        match chain.lookup(code, &mut unlimited()).await {
            LookupOutcome::Found(record) => assert_eq!(record.source, "secondary"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(primary_calls.load(Ordering::SeqCst), 3);
    }

    #[actix_rt::test]
    async fn test_recovers_after_a_transient_error() {
        let code = cep("38400-005");
        let primary = ScriptedProvider::new("primary").script(
            code,
            vec![Err(timeout()), Ok(Some(record("primary", code, "Uberlândia")))],
        );
        let primary_calls = primary.calls();
        let chain = ProviderChain::new(vec![Box::new(primary)], no_wait(2)).unwrap();

        assert!(matches!(chain.lookup(code, &mut unlimited()).await, LookupOutcome::Found(_)));
        assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
    }

    #[actix_rt::test]
    async fn test_not_found_is_not_retried_but_falls_through() {
        let code = cep("38400-003");
        let primary = ScriptedProvider::new("primary");
        let primary_calls = primary.calls();
        let secondary = ScriptedProvider::new("secondary");
        let secondary_calls = secondary.calls();
        let chain = ProviderChain::new(vec![Box::new(primary), Box::new(secondary)], no_wait(2)).unwrap();

        assert_eq!(chain.lookup(code, &mut unlimited()).await, LookupOutcome::NotFound);
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
    }

    #[actix_rt::test]
    async fn test_permanent_error_is_not_retried() {
        let code = cep("38400-003");
        let primary = ScriptedProvider::new("primary")
            .otherwise(Err(ProviderError::Permanent("HTTP 400".to_string())));
        let primary_calls = primary.calls();
        let chain = ProviderChain::new(vec![Box::new(primary)], no_wait(2)).unwrap();

        assert_eq!(chain.lookup(code, &mut unlimited()).await, LookupOutcome::AllProvidersFailed);
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
    }

    #[actix_rt::test]
    async fn test_all_failed_is_distinct_from_not_found() {
        let code = cep("38400-003");
        let primary = ScriptedProvider::new("primary").otherwise(Err(timeout()));
        let secondary = ScriptedProvider::new("secondary").otherwise(Err(timeout()));
        let chain = ProviderChain::new(vec![Box::new(primary), Box::new(secondary)], no_wait(1)).unwrap();
        assert_eq!(chain.lookup(code, &mut unlimited()).await, LookupOutcome::AllProvidersFailed);

        let failing = ScriptedProvider::new("failing").otherwise(Err(timeout()));
        let empty = ScriptedProvider::new("empty");
        let chain = ProviderChain::new(vec![Box::new(failing), Box::new(empty)], no_wait(1)).unwrap();
        assert_eq!(chain.lookup(code, &mut unlimited()).await, LookupOutcome::NotFound);
    }
}
