//! Token acquisition with a panel's client credentials.

use crate::api::{Envelope, TokenData};
use crate::error::PanelError;
use crate::PANEL_USER_AGENT;

/// Exchange a client id / secret pair for a bearer token via
/// `GET {base_url}/open/auth/token`.
pub async fn fetch_token(
    http: &reqwest::Client,
    base_url: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenData, PanelError> {
    let response = http
        .get(format!("{}/open/auth/token", base_url.trim_end_matches('/')))
        .query(&[("client_id", client_id), ("client_secret", client_secret)])
        .header(reqwest::header::USER_AGENT, PANEL_USER_AGENT)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(PanelError::Http {
            status: status.as_u16(),
            body,
        });
    }

    let envelope: Envelope<TokenData> = response
        .json()
        .await
        .map_err(|e| PanelError::Decode(e.to_string()))?;
    envelope
        .into_result()?
        .filter(|data| !data.token.is_empty())
        .ok_or_else(|| PanelError::Decode("token response carried no token".to_string()))
}
