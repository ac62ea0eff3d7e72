//! Business support system (BSS): orders of prepaid resources

use crate::client::Client;
use crate::error::{HuaweiError, Result};
use hcflow_cloud::{Observation, StateChangeConf};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Order states that mean the order is still being processed:
/// pending approval, processing, pending payment, pending confirmation
pub const ORDER_PENDING: &[&str] = &["1", "3", "6", "9"];

/// Order completed
pub const ORDER_COMPLETED: &str = "5";

#[derive(Debug, Clone, Deserialize)]
pub struct OrderInfo {
    pub order_id: String,
    pub status: i32,
}

#[derive(Debug, Deserialize)]
struct OrderDetail {
    order_info: OrderInfo,
}

#[derive(Debug, Serialize)]
struct UnsubscribeRequest<'a> {
    resource_ids: &'a [String],
    /// 1: unsubscribe the resource and its renewal periods
    unsubscribe_type: u8,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnsubscribeResponse {
    #[serde(default)]
    pub order_ids: Vec<String>,
}

pub async fn get_order(client: &Client, order_id: &str) -> Result<OrderInfo> {
    let detail: OrderDetail = client
        .service("bss")
        .get(&format!("/v2/orders/customer-orders/details/{order_id}"))
        .await?;
    Ok(detail.order_info)
}

/// Wait until an order is completed
pub async fn wait_for_order_success(
    client: &Client,
    order_id: &str,
    timeout: Duration,
) -> Result<OrderInfo> {
    tracing::info!(order_id, "Waiting for order");
    let conf = client.state_change(
        StateChangeConf::new([ORDER_COMPLETED], timeout)
            .pending(ORDER_PENDING.iter().copied())
            .delay(Duration::from_secs(5))
            .poll_interval(Duration::from_secs(5)),
    );

    let observation = conf
        .wait_for_state(move || async move {
            let order = get_order(client, order_id).await?;
            let state = order.status.to_string();
            Ok::<_, HuaweiError>(Observation::new(order, state))
        })
        .await?;

    observation.into_value().ok_or_else(|| {
        HuaweiError::UnexpectedResponse(format!("order {order_id} has no details"))
    })
}

/// Unsubscribe prepaid resources
pub async fn unsubscribe(client: &Client, resource_ids: &[String]) -> Result<UnsubscribeResponse> {
    tracing::info!(?resource_ids, "Unsubscribing prepaid resources");
    let request = UnsubscribeRequest {
        resource_ids,
        unsubscribe_type: 1,
    };
    let response: Option<UnsubscribeResponse> = client
        .service("bss")
        .post("/v2/orders/subscriptions/resources/unsubscribe", &request)
        .await?;
    Ok(response.unwrap_or_default())
}

/// Enable or disable automatic renewal of a prepaid resource
pub async fn update_auto_renew(client: &Client, resource_id: &str, enabled: bool) -> Result<()> {
    let bss = client.service("bss");
    let path = format!("/v2/orders/subscriptions/resources/autorenew/{resource_id}");
    if enabled {
        let _: Option<serde_json::Value> = bss
            .post(&path, &serde_json::json!({"action_id": "autorenew"}))
            .await?;
    } else {
        let _: Option<serde_json::Value> =
            bss.delete(&format!("{path}?action_id=autorenew")).await?;
    }
    tracing::info!(resource_id, enabled, "Updated auto-renew");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use hcflow_cloud::CloudError;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> Client {
        let config =
            ProviderConfig::new("test-region", "proj", "token").with_endpoint("bss", server.uri());
        Client::new(config)
            .unwrap()
            .with_poll_override(Duration::from_millis(5))
    }

    fn order(status: i32) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "order_info": {"order_id": "CS2401", "status": status}
        }))
    }

    #[tokio::test]
    async fn test_wait_for_order_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/orders/customer-orders/details/CS2401"))
            .respond_with(order(3))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/orders/customer-orders/details/CS2401"))
            .respond_with(order(5))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let info = wait_for_order_success(&client, "CS2401", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(info.status, 5);
    }

    #[tokio::test]
    async fn test_cancelled_order_is_unexpected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/orders/customer-orders/details/CS2401"))
            .respond_with(order(4))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let err = wait_for_order_success(&client, "CS2401", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HuaweiError::CloudError(CloudError::UnexpectedState { ref state, .. }) if state == "4"
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/orders/subscriptions/resources/unsubscribe"))
            .and(body_json(json!({"resource_ids": ["inst-1"], "unsubscribe_type": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"order_ids": ["CS9"]})))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server);
        let response = unsubscribe(&client, &["inst-1".to_string()]).await.unwrap();
        assert_eq!(response.order_ids, vec!["CS9".to_string()]);
    }
}
