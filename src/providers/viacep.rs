use async_trait::async_trait;
use serde::Deserialize;

use crate::data::models::AddressRecord;
use crate::postcode::Cep;
use crate::providers::{get_body, trimmed, Provider, ProviderError};

const VIACEP_URL: &str = "https://viacep.com.br";

#[derive(Debug, Deserialize)]
struct ViaCepResponse {
    logradouro: Option<String>,
    complemento: Option<String>,
    bairro: Option<String>,
    localidade: Option<String>,
    uf: Option<String>,
    /// Present for unknown codes. Older deployments send `true`, newer
    /// ones the string `"true"`.
    erro: Option<serde_json::Value>,
}

pub struct ViaCep {
    client: reqwest::Client,
    base_url: String,
}

impl ViaCep {
    pub fn new(client: reqwest::Client) -> ViaCep {
        ViaCep::with_base_url(client, VIACEP_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: &str) -> ViaCep {
        ViaCep { client, base_url: base_url.trim_end_matches('/').to_owned() }
    }
}

pub fn parse_response(code: Cep, body: &str) -> Result<Option<AddressRecord>, ProviderError> {
    let response: ViaCepResponse = serde_json::from_str(body)?;

    let missing = match &response.erro {
        Some(serde_json::Value::Bool(flag)) => *flag,
        Some(serde_json::Value::String(flag)) => flag == "true",
        _ => false,
    };
    if missing {
        return Ok(None);
    }

    Ok(Some(AddressRecord {
        postcode: code,
        street: trimmed(response.logradouro),
        neighborhood: trimmed(response.bairro),
        city: trimmed(response.localidade),
        state: trimmed(response.uf),
        complement: trimmed(response.complemento),
        source: "viacep".to_owned(),
    }))
}

#[async_trait]
impl Provider for ViaCep {
    fn name(&self) -> &str {
        "viacep"
    }

    async fn fetch(&self, code: Cep) -> Result<Option<AddressRecord>, ProviderError> {
        let url = format!("{}/ws/{}/json/", self.base_url, code.digits());
        match get_body(&self.client, &url).await? {
            Some(body) => parse_response(code, &body),
            None => Ok(None),
        }
    }
}
