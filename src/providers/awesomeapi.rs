use async_trait::async_trait;
use serde::Deserialize;

use crate::data::models::AddressRecord;
use crate::postcode::Cep;
use crate::providers::{get_body, trimmed, Provider, ProviderError};

const AWESOMEAPI_URL: &str = "https://cep.awesomeapi.com.br";

#[derive(Debug, Deserialize)]
struct AwesomeApiResponse {
    address: Option<String>,
    district: Option<String>,
    city: Option<String>,
    state: Option<String>,
}

pub struct AwesomeApi {
    client: reqwest::Client,
    base_url: String,
}

impl AwesomeApi {
    pub fn new(client: reqwest::Client) -> AwesomeApi {
        AwesomeApi::with_base_url(client, AWESOMEAPI_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: &str) -> AwesomeApi {
        AwesomeApi { client, base_url: base_url.trim_end_matches('/').to_owned() }
    }
}

pub fn parse_response(code: Cep, body: &str) -> Result<Option<AddressRecord>, ProviderError> {
    let response: AwesomeApiResponse = serde_json::from_str(body)?;

    Ok(Some(AddressRecord {
        postcode: code,
        street: trimmed(response.address),
        neighborhood: trimmed(response.district),
        city: trimmed(response.city),
        state: trimmed(response.state),
        complement: String::new(),
        source: "awesomeapi".to_owned(),
    }))
}

#[async_trait]
impl Provider for AwesomeApi {
    fn name(&self) -> &str {
        "awesomeapi"
    }

    async fn fetch(&self, code: Cep) -> Result<Option<AddressRecord>, ProviderError> {
        let url = format!("{}/json/{}", self.base_url, code.digits());
        match get_body(&self.client, &url).await? {
            Some(body) => parse_response(code, &body),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{serve_once, test_client};

    #[test]
    fn test_parse_found() {
        let code: Cep = "38400-100".parse().unwrap();
        let body = r#"{
            "cep": "38400100",
            "address_type": "Avenida",
            "address_name": "Afonso Pena",
            "address": "Avenida Afonso Pena",
            "state": "MG",
            "district": "Centro",
            "lat": "-18.9186",
            "lng": "-48.2772",
            "city": "Uberlândia",
            "city_ibge": "3170206",
            "ddd": "34"
        }"#;
        let record = parse_response(code, body).unwrap().unwrap();
        assert_eq!(record.street, "Avenida Afonso Pena");
        assert_eq!(record.neighborhood, "Centro");
        assert_eq!(record.city, "Uberlândia");
        assert_eq!(record.source, "awesomeapi");
    }

    #[actix_rt::test]
    async fn test_fetch_found() {
        let body = r#"{"address": "Rua Goiás", "district": "Centro", "city": "Uberlândia", "state": "MG"}"#;
        let (base_url, requests) = serve_once("200 OK", body);
        let provider = AwesomeApi::with_base_url(test_client(), &base_url);

        let code: Cep = "38400-027".parse().unwrap();
        let record = provider.fetch(code).await.unwrap().unwrap();
        assert_eq!(record.postcode, code);
        assert_eq!(record.street, "Rua Goiás");
        assert_eq!(requests.recv().unwrap(), "GET /json/38400027 HTTP/1.1");
    }

    #[actix_rt::test]
    async fn test_fetch_rate_limited_is_transient() {
        let (base_url, _requests) = serve_once("429 Too Many Requests", "");
        let provider = AwesomeApi::with_base_url(test_client(), &base_url);

        let code: Cep = "38400-027".parse().unwrap();
        assert!(provider.fetch(code).await.unwrap_err().is_transient());
    }
}
