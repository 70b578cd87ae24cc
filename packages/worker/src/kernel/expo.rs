use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::traits::BasePushNotificationService;

const EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

/// Expo Push Notification Client
///
/// Sends notification payloads to the user's registered Expo device tokens.
pub struct ExpoClient {
    client: Client,
    access_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExpoMessage {
    to: String,
    title: String,
    body: String,
    data: serde_json::Value,
    sound: &'static str,
}

#[derive(Debug, Deserialize)]
struct ExpoResponse {
    data: Vec<ExpoTicket>,
}

#[derive(Debug, Deserialize)]
struct ExpoTicket {
    status: String,
    #[allow(dead_code)]
    id: Option<String>,
    message: Option<String>,
}

impl ExpoClient {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            access_token,
        }
    }
}

#[async_trait]
impl BasePushNotificationService for ExpoClient {
    async fn send_notification(
        &self,
        push_token: &str,
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> Result<()> {
        let message = ExpoMessage {
            to: push_token.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            data,
            sound: "default",
        };

        let mut request = self.client.post(EXPO_PUSH_URL).json(&message);

        // Access token raises rate limits; optional otherwise.
        if let Some(token) = &self.access_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(%status, "Expo push failed: {}", body);
            anyhow::bail!("Expo push API error {}: {}", status, body);
        }

        let expo_response: ExpoResponse = response.json().await?;
        for ticket in &expo_response.data {
            if ticket.status == "error" {
                anyhow::bail!(
                    "Expo ticket error: {}",
                    ticket.message.as_deref().unwrap_or("unknown")
                );
            }
        }

        debug!(token = %push_token, "push notification sent");
        Ok(())
    }
}
