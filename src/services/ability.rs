//! HTTP client for the delegated-signer ability service
//!
//! Every relay-wallet action is a two-call exchange with the service:
//! `POST {base}/abilities/{ability}/precheck` followed by
//! `POST {base}/abilities/{ability}/execute`, authenticated with the session's
//! bearer credential. Responses share one envelope, `{ success, data, error }`.

use crate::error::{OrchestratorError, OrchestratorResult, ServiceError};
use crate::operations::{
    BridgeParams, BridgeQuote, BridgeReceipt, BridgeService, DexService, SwapParams, SwapQuote,
    SwapReceipt, TransferParams, TransferReceipt, TransferService, VaultAction, VaultCall,
    VaultReceipt, VaultService,
};
use crate::session::{Ability, Session};

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::Address;
use reqwest::Client;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
enum Phase {
    Precheck,
    Execute,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Precheck => f.write_str("precheck"),
            Phase::Execute => f.write_str("execute"),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AbilityRequest<'a, P> {
    pkp_address: Address,
    params: &'a P,
}

/// Response envelope shared by every ability endpoint
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

pub struct AbilityClient {
    client: Client,
    base_url: String,
    session: Session,
}

impl AbilityClient {
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        session: Session,
    ) -> OrchestratorResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| OrchestratorError::Config(format!("ability client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    async fn request<P, T>(
        &self,
        ability: Ability,
        phase: Phase,
        params: &P,
    ) -> Result<ApiResponse<T>, ServiceError>
    where
        P: Serialize + Sync,
        T: DeserializeOwned,
    {
        let credential = self
            .session
            .authorize(Utc::now())
            .map_err(|e| ServiceError::Rejected(e.to_string()))?;

        let url = format!("{}/abilities/{}/{}", self.base_url, ability, phase);
        debug!("Calling ability service: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(credential.token())
            .json(&AbilityRequest {
                pkp_address: self.session.relay_address(),
                params,
            })
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let envelope: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(ServiceError::Transport(format!(
                    "{} {}: malformed response: {}",
                    ability, phase, e
                )))
            }
            Err(_) if status.is_client_error() => {
                return Err(ServiceError::Rejected(format!(
                    "{} {} failed with status {}: {}",
                    ability, phase, status, body
                )))
            }
            Err(_) => {
                return Err(ServiceError::Transport(format!(
                    "{} {} failed with status {}",
                    ability, phase, status
                )))
            }
        };

        if !envelope.success {
            let reason = envelope
                .error
                .unwrap_or_else(|| format!("{} {} failed with status {}", ability, phase, status));
            warn!("Ability {} {} refused: {}", ability, phase, reason);
            return Err(ServiceError::Rejected(reason));
        }

        Ok(envelope)
    }

    /// Call and require a `data` payload
    async fn call<P, T>(&self, ability: Ability, phase: Phase, params: &P) -> Result<T, ServiceError>
    where
        P: Serialize + Sync,
        T: DeserializeOwned,
    {
        self.request(ability, phase, params)
            .await?
            .data
            .ok_or_else(|| {
                ServiceError::Transport(format!("{} {} returned no data", ability, phase))
            })
    }

    /// Call where only success matters
    async fn acknowledge<P>(&self, ability: Ability, phase: Phase, params: &P) -> Result<(), ServiceError>
    where
        P: Serialize + Sync,
    {
        self.request::<P, IgnoredAny>(ability, phase, params)
            .await
            .map(|_| ())
    }
}

fn vault_ability(action: VaultAction) -> Ability {
    match action {
        VaultAction::Deposit => Ability::VaultDeposit,
        VaultAction::Withdraw => Ability::VaultWithdraw,
    }
}

#[async_trait]
impl DexService for AbilityClient {
    async fn precheck(&self, params: &SwapParams) -> Result<SwapQuote, ServiceError> {
        self.call(Ability::Swap, Phase::Precheck, params).await
    }

    async fn execute(&self, params: &SwapParams) -> Result<SwapReceipt, ServiceError> {
        self.call(Ability::Swap, Phase::Execute, params).await
    }
}

#[async_trait]
impl BridgeService for AbilityClient {
    async fn precheck(&self, params: &BridgeParams) -> Result<BridgeQuote, ServiceError> {
        self.call(Ability::Bridge, Phase::Precheck, params).await
    }

    async fn execute(&self, params: &BridgeParams) -> Result<BridgeReceipt, ServiceError> {
        self.call(Ability::Bridge, Phase::Execute, params).await
    }
}

#[async_trait]
impl VaultService for AbilityClient {
    async fn precheck(&self, call: &VaultCall) -> Result<(), ServiceError> {
        self.acknowledge(vault_ability(call.action), Phase::Precheck, call)
            .await
    }

    async fn execute(&self, call: &VaultCall) -> Result<VaultReceipt, ServiceError> {
        self.call(vault_ability(call.action), Phase::Execute, call).await
    }
}

/// Relay wallet to owner transfers
#[async_trait]
impl TransferService for AbilityClient {
    async fn precheck(&self, params: &TransferParams) -> Result<(), ServiceError> {
        self.acknowledge(Ability::Transfer, Phase::Precheck, params)
            .await
    }

    async fn execute(&self, params: &TransferParams) -> Result<TransferReceipt, ServiceError> {
        self.call(Ability::Transfer, Phase::Execute, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionCredential, StaticSigner};
    use crate::testing::{test_session, BASE, RELAY, USDC, WETH_BASE};
    use ethers::types::{TxHash, U256};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TX: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    fn client(server: &MockServer) -> AbilityClient {
        AbilityClient::new(server.uri(), Duration::from_secs(5), test_session()).unwrap()
    }

    fn swap_params() -> SwapParams {
        SwapParams {
            chain_id: BASE,
            token_in: USDC,
            token_out: WETH_BASE,
            amount_in: U256::from(1_000_000u64),
            slippage_bps: 50,
            recipient: RELAY,
        }
    }

    #[tokio::test]
    async fn swap_precheck_returns_quote() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/abilities/swap/precheck"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_partial_json(json!({
                "pkpAddress": format!("{:?}", RELAY),
                "params": { "chainId": BASE, "slippageBps": 50 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "amountOut": "0x3e8", "minAmountOut": "0x3e0" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let quote = DexService::precheck(&client(&server), &swap_params())
            .await
            .unwrap();
        assert_eq!(quote.amount_out, U256::from(1000));
        assert_eq!(quote.min_amount_out, U256::from(992));
    }

    #[tokio::test]
    async fn bridge_execute_returns_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/abilities/bridge/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "txHash": TX,
                    "orderId": "order-7",
                    "estimatedArrivalSecs": 45
                }
            })))
            .mount(&server)
            .await;

        let receipt = BridgeService::execute(
            &client(&server),
            &BridgeParams {
                source_chain: 421614,
                destination_chain: BASE,
                token: WETH_BASE,
                amount: U256::from(5),
                recipient: RELAY,
            },
        )
        .await
        .unwrap();

        assert_eq!(receipt.order_id, "order-7");
        assert_eq!(receipt.estimated_arrival_secs, 45);
        assert_eq!(receipt.tx_hash, TX.parse::<TxHash>().unwrap());
    }

    #[tokio::test]
    async fn envelope_failure_is_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/abilities/vault-withdraw/precheck"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error": "execution reverted: insufficient shares"
            })))
            .mount(&server)
            .await;

        let call = VaultCall {
            chain_id: BASE,
            vault: WETH_BASE,
            action: VaultAction::Withdraw,
            token: USDC,
            amount: U256::from(1),
            native: false,
        };
        let err = VaultService::precheck(&client(&server), &call)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::Rejected("execution reverted: insufficient shares".into())
        );
    }

    #[tokio::test]
    async fn server_error_without_envelope_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = DexService::execute(&client(&server), &swap_params())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)));
    }

    #[tokio::test]
    async fn acknowledged_precheck_ignores_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/abilities/transfer/precheck"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": null })),
            )
            .mount(&server)
            .await;

        let params = TransferParams {
            chain_id: BASE,
            from: RELAY,
            to: Address::repeat_byte(0xaa),
            token: Some(USDC),
            amount: U256::from(10),
        };
        assert!(TransferService::precheck(&client(&server), &params)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn expired_session_never_reaches_the_service() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let session = Session::new(
            Arc::new(StaticSigner::new(RELAY, [Ability::Swap])),
            Some(SessionCredential::new(
                "stale",
                Utc::now() - chrono::Duration::minutes(5),
            )),
        );
        let client = AbilityClient::new(server.uri(), Duration::from_secs(5), session).unwrap();

        let err = DexService::precheck(&client, &swap_params())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Rejected(_)));
    }
}
