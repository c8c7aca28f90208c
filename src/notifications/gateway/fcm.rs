use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{
    Client, StatusCode,
    header::{AUTHORIZATION, RETRY_AFTER},
};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tracing::{debug, instrument, warn};

use super::{NotificationError, NotificationGateway, session::GatewaySession};
use crate::devices::entities::Platform;
use crate::notifications::entities::{DispatchOutcome, NotificationPayload, PushMessage};

pub const FCM_DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

/// FCM rejects multicast requests with more registration ids than this.
const MAX_MULTICAST_TOKENS: usize = 1000;

#[derive(Debug, Serialize)]
struct MulticastRequest<'a> {
    registration_ids: Vec<&'a str>,
    priority: &'static str,
    notification: FcmNotification<'a>,
}

#[derive(Debug, Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
    badge: String,
}

#[derive(Debug, Default, Deserialize)]
struct MulticastResponse {
    #[serde(default)]
    multicast_id: Option<i64>,
    #[serde(default)]
    success: u32,
    #[serde(default)]
    failure: u32,
    #[serde(default)]
    results: Vec<MulticastResult>,
}

#[derive(Debug, Default, Deserialize)]
struct MulticastResult {
    message_id: Option<String>,
    registration_id: Option<String>,
    error: Option<String>,
}

/// FCM (Firebase Cloud Messaging) gateway speaking the HTTP multicast protocol
pub struct FcmNotificationGateway {
    api_key: String,
    endpoint: String,
    request_timeout: Duration,
    concurrency: usize,
}

impl FcmNotificationGateway {
    pub fn new(
        api_key: &str,
        endpoint: &str,
        request_timeout: Duration,
        concurrency: usize,
    ) -> Result<Self, NotificationError> {
        if api_key.trim().is_empty() {
            return Err(NotificationError::InitializationFailed(
                "FCM api key is empty".to_string(),
            ));
        }

        Ok(FcmNotificationGateway {
            api_key: api_key.to_string(),
            endpoint: endpoint.to_string(),
            request_timeout,
            concurrency: concurrency.max(1),
        })
    }

    fn connect(&self) -> Result<Client, NotificationError> {
        Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|err| NotificationError::InitializationFailed(err.to_string()))
    }

    async fn send_multicast(
        &self,
        client: &Client,
        payload: &NotificationPayload,
        chunk: &[&PushMessage],
    ) -> Vec<DispatchOutcome> {
        let request = MulticastRequest {
            registration_ids: chunk.iter().map(|m| m.token.as_str()).collect(),
            priority: "high",
            notification: FcmNotification {
                title: &payload.title,
                body: &payload.body,
                badge: payload.badge_count.to_string(),
            },
        };

        let response = match client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("key={}", self.api_key))
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return fail_all(chunk, format!("FCM transport error: {}", err)),
        };

        let status = response.status();
        let retry_after = parse_retry_after(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok()),
            Utc::now(),
        );

        if status == StatusCode::TOO_MANY_REQUESTS
            || (status.is_server_error() && retry_after.is_some())
        {
            warn!(%status, ?retry_after, "FCM rate limited the multicast request");
            return chunk
                .iter()
                .map(|message| {
                    DispatchOutcome::rate_limited(
                        message,
                        Platform::Android,
                        retry_after,
                        format!("FCM responded {}", status),
                    )
                })
                .collect();
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return fail_all(
                chunk,
                format!("FCM responded {}: {}", status, error_text.trim()),
            );
        }

        let body: MulticastResponse = match response.json().await {
            Ok(body) => body,
            Err(err) => return fail_all(chunk, format!("Unreadable FCM response: {}", err)),
        };

        if body.failure > 0 {
            warn!(
                multicast_id = ?body.multicast_id,
                succeeded = body.success,
                failed = body.failure,
                "FCM multicast partially failed"
            );
        }

        classify_multicast(chunk, &body, retry_after)
    }
}

#[async_trait]
impl NotificationGateway for FcmNotificationGateway {
    #[instrument(skip_all, fields(batch_size = messages.len()))]
    async fn send_batch(
        &self,
        messages: Vec<PushMessage>,
    ) -> Result<Vec<DispatchOutcome>, NotificationError> {
        let session = GatewaySession::open(Platform::Android, self.connect()?);
        let client: &Client = &session;

        let groups = group_by_payload(&messages);
        let requests = groups.iter().flat_map(|(payload, group)| {
            group
                .chunks(MAX_MULTICAST_TOKENS)
                .map(move |chunk| (*payload, chunk))
        }).collect::<Vec<(&NotificationPayload, &[&PushMessage])>>();

        // One request per payload group and chunk, overlapping up to `concurrency`
        let requests = requests
            .into_iter()
            .map(|(payload, chunk)| async move {
                debug!(tokens = chunk.len(), "Sending FCM multicast");
                self.send_multicast(client, payload, chunk).await
            })
            .collect::<Vec<_>>();
        let outcomes = stream::iter(requests)
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(outcomes.into_iter().flatten().collect())
    }
}

/// Multicast shares one payload per request, so messages are grouped by payload
/// keeping first-seen order.
fn group_by_payload(messages: &[PushMessage]) -> Vec<(&NotificationPayload, Vec<&PushMessage>)> {
    let mut groups: Vec<(&NotificationPayload, Vec<&PushMessage>)> = Vec::new();
    let mut slots: HashMap<&NotificationPayload, usize> = HashMap::new();

    for message in messages {
        match slots.get(&message.payload) {
            Some(&slot) => groups[slot].1.push(message),
            None => {
                slots.insert(&message.payload, groups.len());
                groups.push((&message.payload, vec![message]));
            }
        }
    }

    groups
}

fn fail_all(chunk: &[&PushMessage], detail: String) -> Vec<DispatchOutcome> {
    chunk
        .iter()
        .map(|message| DispatchOutcome::failed(message, Platform::Android, detail.clone()))
        .collect()
}

/// Results are positional: the n-th result belongs to the n-th registration id.
fn classify_multicast(
    chunk: &[&PushMessage],
    response: &MulticastResponse,
    retry_after: Option<DateTime<Utc>>,
) -> Vec<DispatchOutcome> {
    chunk
        .iter()
        .enumerate()
        .map(|(idx, message)| match response.results.get(idx) {
            Some(result) => classify_result(message, result, retry_after),
            None => DispatchOutcome::failed(
                message,
                Platform::Android,
                "FCM response carried no result for this token",
            ),
        })
        .collect()
}

fn classify_result(
    message: &PushMessage,
    result: &MulticastResult,
    retry_after: Option<DateTime<Utc>>,
) -> DispatchOutcome {
    let platform = Platform::Android;

    match (&result.message_id, &result.error) {
        (Some(message_id), None) => match &result.registration_id {
            Some(replacement) => DispatchOutcome::expired(
                message,
                platform,
                Some(replacement.clone()),
                "Delivered, token superseded by canonical registration id",
            )
            .with_message_id(Some(message_id.clone())),
            None => DispatchOutcome::succeeded(message, platform, Some(message_id.clone())),
        },
        (message_id, Some(error)) => {
            let outcome = match error.as_str() {
                "NotRegistered" | "InvalidRegistration" => {
                    DispatchOutcome::expired(message, platform, None, error.as_str())
                }
                "DeviceMessageRateExceeded" | "TopicsMessageRateExceeded" => {
                    DispatchOutcome::rate_limited(message, platform, retry_after, error.as_str())
                }
                _ => DispatchOutcome::failed(message, platform, error.as_str()),
            };
            outcome.with_message_id(message_id.clone())
        }
        (None, None) => DispatchOutcome::failed(message, platform, "Empty FCM result"),
    }
}

/// Accepts both forms of the header: delta seconds or an HTTP date.
fn parse_retry_after(value: Option<&str>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value = value?.trim();

    if let Ok(seconds) = value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return TimeDelta::try_seconds(seconds).and_then(|delta| now.checked_add_signed(delta));
    }

    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::entities::DispatchStatus;
    use axum::{
        Json, Router,
        http::{HeaderMap, StatusCode as AxumStatus, header},
        response::{IntoResponse, Response},
        routing::post,
    };
    use chrono::TimeZone;
    use serde_json::{Value, json};
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };
    use tokio::net::TcpListener;

    struct CapturedRequest {
        authorization: Option<String>,
        body: Value,
    }

    type Captured = Arc<Mutex<Vec<CapturedRequest>>>;

    async fn spawn_fake_fcm(responder: fn(&Value) -> Response) -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let captured_handler = captured.clone();

        let app = Router::new().route(
            "/fcm/send",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let captured = captured_handler.clone();
                async move {
                    let response = responder(&body);
                    captured.lock().unwrap().push(CapturedRequest {
                        authorization: headers
                            .get(header::AUTHORIZATION)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string),
                        body,
                    });
                    response
                }
            }),
        );

        (serve(app).await, captured)
    }

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}/fcm/send", addr)
    }

    fn token_count(body: &Value) -> usize {
        body["registration_ids"]
            .as_array()
            .map(|ids| ids.len())
            .unwrap_or_default()
    }

    fn all_delivered(body: &Value) -> Response {
        let results: Vec<Value> = (0..token_count(body))
            .map(|idx| json!({ "message_id": format!("0:{}", idx) }))
            .collect();
        Json(json!({
            "multicast_id": 1,
            "success": results.len(),
            "failure": 0,
            "canonical_ids": 0,
            "results": results
        }))
        .into_response()
    }

    fn message(device_id: i64, token: &str) -> PushMessage {
        PushMessage {
            device_id,
            token: token.to_string(),
            payload: NotificationPayload {
                title: "Title".to_string(),
                body: "Body".to_string(),
                badge_count: 1,
            },
        }
    }

    fn gateway(endpoint: &str) -> FcmNotificationGateway {
        FcmNotificationGateway::new("test-key", endpoint, Duration::from_secs(5), 4).unwrap()
    }

    #[test]
    fn test_empty_api_key_is_rejected() {
        let result =
            FcmNotificationGateway::new(" ", FCM_DEFAULT_ENDPOINT, Duration::from_secs(1), 1);
        assert!(matches!(
            result,
            Err(NotificationError::InitializationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_multicast_partial_failure() {
        let (endpoint, captured) = spawn_fake_fcm(|_| {
            Json(json!({
                "multicast_id": 216,
                "success": 3,
                "failure": 2,
                "canonical_ids": 0,
                "results": [
                    { "message_id": "1:0408" },
                    { "error": "Unavailable" },
                    { "message_id": "1:1516" },
                    { "message_id": "1:2342" },
                    { "error": "InternalServerError" }
                ]
            }))
            .into_response()
        })
        .await;

        let messages: Vec<PushMessage> = (1..=5)
            .map(|id| message(id, &format!("token-{}", id)))
            .collect();
        let outcomes = gateway(&endpoint).send_batch(messages).await.unwrap();

        let succeeded: Vec<i64> = outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| o.device_id)
            .collect();
        let failed: Vec<i64> = outcomes
            .iter()
            .filter(|o| o.status == DispatchStatus::Failed)
            .map(|o| o.device_id)
            .collect();

        assert_eq!(succeeded, vec![1, 3, 4]);
        assert_eq!(failed, vec![2, 5]);
        assert_eq!(outcomes[0].message_id.as_deref(), Some("1:0408"));
        assert_eq!(outcomes[1].detail, "Unavailable");

        let requests = captured.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].authorization.as_deref(), Some("key=test-key"));
        assert_eq!(requests[0].body["notification"]["title"], "Title");
        assert_eq!(requests[0].body["notification"]["badge"], "1");
    }

    #[tokio::test]
    async fn test_canonical_registration_id_is_reported_as_rotation() {
        let (endpoint, _) = spawn_fake_fcm(|_| {
            Json(json!({
                "success": 1,
                "failure": 0,
                "canonical_ids": 1,
                "results": [{ "message_id": "1:77", "registration_id": "rotated-token" }]
            }))
            .into_response()
        })
        .await;

        let outcomes = gateway(&endpoint)
            .send_batch(vec![message(9, "old-token")])
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            outcomes[0].status,
            DispatchStatus::Expired {
                replacement_token: Some("rotated-token".to_string())
            }
        );
        assert_eq!(outcomes[0].message_id.as_deref(), Some("1:77"));
    }

    #[tokio::test]
    async fn test_too_many_requests_marks_chunk_rate_limited() {
        let (endpoint, _) = spawn_fake_fcm(|_| {
            (
                AxumStatus::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, "120")],
                "slow down",
            )
                .into_response()
        })
        .await;

        let before = Utc::now();
        let outcomes = gateway(&endpoint)
            .send_batch(vec![message(1, "a"), message(2, "b")])
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes {
            let DispatchStatus::RateLimited { retry_after } = outcome.status else {
                panic!("expected rate limited outcome, got {:?}", outcome.status);
            };
            let retry_after = retry_after.expect("retry-after should be parsed");
            assert!(retry_after >= before + TimeDelta::seconds(119));
        }
    }

    #[tokio::test]
    async fn test_unauthorized_fails_every_token() {
        let (endpoint, _) =
            spawn_fake_fcm(|_| (AxumStatus::UNAUTHORIZED, "bad key").into_response()).await;

        let outcomes = gateway(&endpoint)
            .send_batch(vec![message(1, "a"), message(2, "b")])
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.status == DispatchStatus::Failed));
        assert!(outcomes[0].detail.contains("401"));
    }

    #[tokio::test]
    async fn test_distinct_payloads_and_large_batches_are_split() {
        let (endpoint, captured) = spawn_fake_fcm(all_delivered).await;

        let mut messages: Vec<PushMessage> = (0..1500)
            .map(|id| message(id, &format!("token-{}", id)))
            .collect();
        let mut personalised = message(5000, "token-personal");
        personalised.payload.title = "Hi Ada".to_string();
        messages.push(personalised);

        let outcomes = gateway(&endpoint).send_batch(messages).await.unwrap();
        assert_eq!(outcomes.len(), 1501);
        assert!(outcomes.iter().all(|o| o.is_success()));

        let requests = captured.lock().unwrap();
        let mut sizes: Vec<usize> = requests.iter().map(|r| token_count(&r.body)).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 500, 1000]);
    }

    #[tokio::test]
    async fn test_personalised_payloads_are_sent_concurrently() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (in_flight_handler, peak_handler) = (in_flight.clone(), peak.clone());

        let app = Router::new().route(
            "/fcm/send",
            post(move |Json(body): Json<Value>| {
                let in_flight = in_flight_handler.clone();
                let peak = peak_handler.clone();
                async move {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    all_delivered(&body)
                }
            }),
        );
        let endpoint = serve(app).await;

        let messages: Vec<PushMessage> = (1..=4)
            .map(|id| {
                let mut message = message(id, &format!("token-{}", id));
                message.payload.title = format!("Hello device {}", id);
                message
            })
            .collect();

        let outcomes = gateway(&endpoint).send_batch(messages).await.unwrap();

        assert!(outcomes.iter().all(|o| o.is_success()));
        let ids: Vec<i64> = outcomes.iter().map(|o| o.device_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_every_token() {
        let outcomes = gateway("http://127.0.0.1:9/fcm/send")
            .send_batch(vec![message(1, "a")])
            .await
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, DispatchStatus::Failed);
    }

    #[test]
    fn test_classify_expired_and_rate_limited_errors() {
        let chunk_messages = [message(1, "a"), message(2, "b"), message(3, "c")];
        let chunk: Vec<&PushMessage> = chunk_messages.iter().collect();
        let response = MulticastResponse {
            results: vec![
                MulticastResult {
                    error: Some("NotRegistered".to_string()),
                    ..Default::default()
                },
                MulticastResult {
                    error: Some("DeviceMessageRateExceeded".to_string()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let outcomes = classify_multicast(&chunk, &response, None);

        assert_eq!(
            outcomes[0].status,
            DispatchStatus::Expired {
                replacement_token: None
            }
        );
        assert_eq!(
            outcomes[1].status,
            DispatchStatus::RateLimited { retry_after: None }
        );
        // No result for the third token
        assert_eq!(outcomes[2].status, DispatchStatus::Failed);
    }

    #[test]
    fn test_parse_retry_after() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 0, 0).unwrap();

        assert_eq!(
            parse_retry_after(Some("30"), now),
            Some(now + TimeDelta::seconds(30))
        );
        assert_eq!(
            parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT"), now),
            Some(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap())
        );
        assert_eq!(parse_retry_after(Some("soon"), now), None);
        assert_eq!(parse_retry_after(None, now), None);
    }

    #[test]
    fn test_out_of_range_retry_after_is_ignored() {
        let now = Utc::now();

        assert_eq!(parse_retry_after(Some("99999999999999"), now), None);
        assert_eq!(parse_retry_after(Some(&i64::MAX.to_string()), now), None);
        assert_eq!(parse_retry_after(Some("-5"), now), None);
    }
}
