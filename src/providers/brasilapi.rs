use async_trait::async_trait;
use serde::Deserialize;

use crate::data::models::AddressRecord;
use crate::postcode::Cep;
use crate::providers::{get_body, trimmed, Provider, ProviderError};

const BRASILAPI_URL: &str = "https://brasilapi.com.br";

#[derive(Debug, Deserialize)]
struct BrasilApiResponse {
    street: Option<String>,
    neighborhood: Option<String>,
    city: Option<String>,
    state: Option<String>,
}

pub struct BrasilApi {
    client: reqwest::Client,
    base_url: String,
}

impl BrasilApi {
    pub fn new(client: reqwest::Client) -> BrasilApi {
        BrasilApi::with_base_url(client, BRASILAPI_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: &str) -> BrasilApi {
        BrasilApi { client, base_url: base_url.trim_end_matches('/').to_owned() }
    }
}

pub fn parse_response(code: Cep, body: &str) -> Result<Option<AddressRecord>, ProviderError> {
    let response: BrasilApiResponse = serde_json::from_str(body)?;

    Ok(Some(AddressRecord {
        postcode: code,
        street: trimmed(response.street),
        neighborhood: trimmed(response.neighborhood),
        city: trimmed(response.city),
        state: trimmed(response.state),
        complement: String::new(),
        source: "brasilapi".to_owned(),
    }))
}

#[async_trait]
impl Provider for BrasilApi {
    fn name(&self) -> &str {
        "brasilapi"
    }

    async fn fetch(&self, code: Cep) -> Result<Option<AddressRecord>, ProviderError> {
        let url = format!("{}/api/cep/v1/{}", self.base_url, code.digits());
        match get_body(&self.client, &url).await? {
            Some(body) => parse_response(code, &body),
            None => Ok(None),
        }
    }
}
