use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{DerivationOracle, DerivedKey, FromChainCode};
use crate::error::OracleError;
use crate::scheme::{Network, Scheme};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeriveExtendedKeyRequest {
    pub extended_key: String,
    pub derivation: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeAddressRequest {
    pub public_key: String,
    pub scheme: Scheme,
    pub network: Network,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeAddressResponse {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountExtendedKeyRequest {
    #[serde(flatten)]
    pub key: FromChainCode,
    pub network: Network,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountExtendedKeyResponse {
    pub extended_key: String,
}

/// Error body returned by the oracle service on non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Client for a remote derivation oracle service
pub struct HttpDerivationOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDerivationOracle {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req, Resp>(&self, route: &str, body: &Req) -> Result<Resp, OracleError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, route);
        log::trace!("POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            return Err(OracleError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl DerivationOracle for HttpDerivationOracle {
    async fn derive_extended_key(
        &self,
        extended_key: &str,
        derivation: &[u32],
    ) -> Result<DerivedKey, OracleError> {
        let request = DeriveExtendedKeyRequest {
            extended_key: extended_key.to_string(),
            derivation: derivation.to_vec(),
        };
        self.post("/derive-extended-key", &request).await
    }

    async fn encode_address(
        &self,
        public_key: &str,
        scheme: Scheme,
        network: Network,
    ) -> Result<String, OracleError> {
        let request = EncodeAddressRequest {
            public_key: public_key.to_string(),
            scheme,
            network,
        };
        let response: EncodeAddressResponse = self.post("/encode-address", &request).await?;
        Ok(response.address)
    }

    async fn account_extended_key(
        &self,
        request: &FromChainCode,
        network: Network,
    ) -> Result<String, OracleError> {
        let request = AccountExtendedKeyRequest {
            key: request.clone(),
            network,
        };
        let response: AccountExtendedKeyResponse =
            self.post("/account-extended-key", &request).await?;
        Ok(response.extended_key)
    }
}
