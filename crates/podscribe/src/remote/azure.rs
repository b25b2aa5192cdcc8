//! Azure Speech batch transcription client (`speechtotext` REST API).

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::{RemoteError, RemoteStatus, RetrievalClient, StatusClient, Submission, SubmissionClient};
use crate::config::schema::{AzureConfig, LifecycleConfig};

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Result documents can be large; their download gets a longer timeout.
const RESULT_TIMEOUT_FACTOR: u32 = 2;

/// Client settings that do not depend on the region or key.
#[derive(Debug, Clone)]
pub struct AzureClientOptions {
    pub api_version: String,
    /// Locales offered to automatic language identification.
    pub candidate_locales: Vec<String>,
    pub delete_after_completion: bool,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl AzureClientOptions {
    pub fn from_config(azure: &AzureConfig, lifecycle: &LifecycleConfig) -> Self {
        Self {
            api_version: azure.api_version.clone(),
            candidate_locales: azure.candidate_locales.clone(),
            delete_after_completion: azure.delete_after_completion,
            request_timeout: Duration::from_secs(lifecycle.request_timeout_secs),
            connect_timeout: Duration::from_secs(lifecycle.connect_timeout_secs),
        }
    }
}

/// Batch transcription client for one Azure Speech resource.
pub struct AzureBatchClient {
    client: Client,
    base_url: String,
    key: SecretString,
    options: AzureClientOptions,
}

impl AzureBatchClient {
    /// Creates a client for the regional endpoint.
    pub fn new(
        region: &str,
        key: SecretString,
        options: AzureClientOptions,
    ) -> Result<Self, RemoteError> {
        let base_url = format!(
            "https://{}.api.cognitive.microsoft.com/speechtotext/{}",
            region.trim(),
            options.api_version
        );
        Self::with_base_url(base_url, key, options)
    }

    /// Creates a client against an explicit API root.
    pub fn with_base_url(
        base_url: impl Into<String>,
        key: SecretString,
        options: AzureClientOptions,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| {
                RemoteError::InvalidResponse(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key,
            options,
        })
    }

    fn transcriptions_url(&self) -> String {
        format!("{}/transcriptions", self.base_url)
    }

    fn transcription_url(&self, remote_job_id: &str) -> String {
        format!("{}/transcriptions/{}", self.base_url, remote_job_id)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(KEY_HEADER, self.key.expose_secret())
    }

    /// Sends a request and reads a JSON body from a successful response.
    async fn send_json(&self, request: RequestBuilder) -> Result<Value, RemoteError> {
        let response = request.send().await.map_err(transport_error)?;
        let response = check_status(response).await?;
        read_json(response).await
    }
}

/// Reads the whole body, then parses it. A body that stalls or breaks off is
/// transient; only a complete body that is not JSON is invalid.
async fn read_json(response: Response) -> Result<Value, RemoteError> {
    let body = response
        .bytes()
        .await
        .map_err(|e| {
            RemoteError::Transient(format!("Failed to read response body: {}", e.without_url()))
        })?;
    serde_json::from_slice(&body)
        .map_err(|e| RemoteError::InvalidResponse(format!("Failed to parse response: {}", e)))
}

/// Maps a transport failure. Everything that never produced a response is
/// worth retrying.
fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::InvalidResponse(e.to_string())
    } else {
        RemoteError::Transient(e.without_url().to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::from_status(status.as_u16(), &body))
}

/// Builds the body of a create-transcription request.
pub fn build_submission_body(submission: &Submission<'_>, candidate_locales: &[String]) -> Value {
    let mut properties = json!({
        "wordLevelTimestampsEnabled": true,
        "punctuationMode": "DictatedAndAutomatic",
        "profanityFilterMode": "None",
    });

    let auto = submission.language.trim().is_empty()
        || submission.language.eq_ignore_ascii_case("auto");
    let locale = if auto {
        properties["languageIdentification"] = json!({ "candidateLocales": candidate_locales });
        candidate_locales
            .first()
            .cloned()
            .unwrap_or_else(|| "en-US".to_string())
    } else {
        submission.language.to_string()
    };

    json!({
        "contentUrls": [submission.audio_locator],
        "displayName": submission.display_name,
        "locale": locale,
        "properties": properties,
    })
}

/// Extracts the job id from the `self` link of a transcription resource.
pub fn remote_id_from_resource(resource: &Value) -> Result<String, RemoteError> {
    let link = resource
        .get("self")
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::InvalidResponse("missing 'self' link".to_string()))?;

    link.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RemoteError::InvalidResponse(format!("bad 'self' link '{}'", link)))
}

/// Interprets a transcription resource's `status`.
pub fn parse_status(resource: &Value) -> Result<RemoteStatus, RemoteError> {
    let status = resource
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::InvalidResponse("missing 'status'".to_string()))?;

    match status {
        "NotStarted" | "Running" => Ok(RemoteStatus::Running),
        "Succeeded" => Ok(RemoteStatus::Succeeded),
        "Failed" => {
            let error = &resource["properties"]["error"];
            let message = error["message"]
                .as_str()
                .or_else(|| error["code"].as_str())
                .unwrap_or("Unknown error");
            Ok(RemoteStatus::Failed(message.to_string()))
        }
        other => Err(RemoteError::InvalidResponse(format!(
            "unknown status '{}'",
            other
        ))),
    }
}

/// Picks the content URL of the transcription result from a files listing.
pub fn transcription_content_url(files: &Value) -> Result<String, RemoteError> {
    files
        .get("values")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|file| file.get("kind").and_then(Value::as_str) == Some("Transcription"))
        .and_then(|file| file["links"]["contentUrl"].as_str())
        .map(str::to_string)
        .ok_or_else(|| RemoteError::Retrieval("no transcription file in result listing".to_string()))
}

#[async_trait]
impl SubmissionClient for AzureBatchClient {
    async fn submit(&self, submission: Submission<'_>) -> Result<String, RemoteError> {
        let body = build_submission_body(&submission, &self.options.candidate_locales);
        let request = self
            .authorized(self.client.post(self.transcriptions_url()))
            .json(&body);

        let resource = self
            .send_json(request)
            .await
            .map_err(|e| RemoteError::Submission(e.to_string()))?;
        let id = remote_id_from_resource(&resource)
            .map_err(|e| RemoteError::Submission(e.to_string()))?;

        debug!("Created transcription {}", id);
        Ok(id)
    }
}

#[async_trait]
impl StatusClient for AzureBatchClient {
    async fn status(&self, remote_job_id: &str) -> Result<RemoteStatus, RemoteError> {
        let request = self.authorized(self.client.get(self.transcription_url(remote_job_id)));
        let resource = self.send_json(request).await?;
        parse_status(&resource)
    }
}

#[async_trait]
impl RetrievalClient for AzureBatchClient {
    async fn fetch_result(&self, remote_job_id: &str) -> Result<Value, RemoteError> {
        let files_url = format!("{}/files", self.transcription_url(remote_job_id));
        let files = self
            .send_json(self.authorized(self.client.get(files_url)))
            .await?;
        let content_url = transcription_content_url(&files)?;

        // The content URL is pre-signed; it must not receive the key.
        let request = self
            .client
            .get(&content_url)
            .timeout(self.options.request_timeout * RESULT_TIMEOUT_FACTOR);
        self.send_json(request).await.map_err(|e| match e {
            RemoteError::Transient(_) => e,
            other => RemoteError::Retrieval(other.to_string()),
        })
    }

    async fn discard(&self, remote_job_id: &str) -> Result<(), RemoteError> {
        if !self.options.delete_after_completion {
            return Ok(());
        }

        let request = self.authorized(self.client.delete(self.transcription_url(remote_job_id)));
        let response = request.send().await.map_err(transport_error)?;
        match check_status(response).await {
            Ok(_) => Ok(()),
            Err(RemoteError::Rejected { status: 404, .. }) => {
                warn!("Transcription {} was already deleted", remote_job_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn locales() -> Vec<String> {
        vec!["en-US".to_string(), "zh-CN".to_string()]
    }

    fn submission(language: &str) -> Submission<'_> {
        Submission {
            audio_locator: "https://cdn.example.com/ep1.mp3",
            language,
            display_name: "podscribe-show-ep1",
        }
    }

    #[test]
    fn test_submission_body_with_locale() {
        let body = build_submission_body(&submission("de-DE"), &locales());
        assert_eq!(body["locale"], "de-DE");
        assert_eq!(body["contentUrls"][0], "https://cdn.example.com/ep1.mp3");
        assert_eq!(body["displayName"], "podscribe-show-ep1");
        assert_eq!(body["properties"]["wordLevelTimestampsEnabled"], true);
        assert_eq!(body["properties"]["punctuationMode"], "DictatedAndAutomatic");
        assert!(body["properties"].get("languageIdentification").is_none());
    }

    #[test]
    fn test_submission_body_with_auto_language() {
        let body = build_submission_body(&submission("auto"), &locales());
        assert_eq!(body["locale"], "en-US");
        assert_eq!(
            body["properties"]["languageIdentification"]["candidateLocales"],
            json!(["en-US", "zh-CN"])
        );
    }

    #[test]
    fn test_remote_id_from_self_link() {
        let resource = json!({
            "self": "https://westus.api.cognitive.microsoft.com/speechtotext/v3.1/transcriptions/9b1c-42"
        });
        assert_eq!(remote_id_from_resource(&resource).unwrap(), "9b1c-42");
        assert!(remote_id_from_resource(&json!({})).is_err());
        assert!(remote_id_from_resource(&json!({"self": ""})).is_err());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(
            parse_status(&json!({"status": "NotStarted"})).unwrap(),
            RemoteStatus::Running
        );
        assert_eq!(
            parse_status(&json!({"status": "Running"})).unwrap(),
            RemoteStatus::Running
        );
        assert_eq!(
            parse_status(&json!({"status": "Succeeded"})).unwrap(),
            RemoteStatus::Succeeded
        );
        assert_eq!(
            parse_status(&json!({
                "status": "Failed",
                "properties": {"error": {"code": "InvalidData", "message": "audio unreadable"}}
            }))
            .unwrap(),
            RemoteStatus::Failed("audio unreadable".to_string())
        );
        assert_eq!(
            parse_status(&json!({"status": "Failed"})).unwrap(),
            RemoteStatus::Failed("Unknown error".to_string())
        );
        assert!(parse_status(&json!({"status": "Paused"})).is_err());
    }

    #[test]
    fn test_transcription_content_url() {
        let files = json!({
            "values": [
                {"kind": "TranscriptionReport", "links": {"contentUrl": "https://blob/report"}},
                {"kind": "Transcription", "links": {"contentUrl": "https://blob/result"}}
            ]
        });
        assert_eq!(transcription_content_url(&files).unwrap(), "https://blob/result");

        let empty = json!({"values": []});
        assert!(matches!(
            transcription_content_url(&empty),
            Err(RemoteError::Retrieval(_))
        ));
    }

    fn options(request_timeout: Duration) -> AzureClientOptions {
        AzureClientOptions {
            api_version: "v3.1".to_string(),
            candidate_locales: locales(),
            delete_after_completion: true,
            request_timeout,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Client for a loopback server, bypassing any proxy from the environment.
    fn local_client(base_url: &str) -> AzureBatchClient {
        let options = options(Duration::from_secs(1));
        let client = Client::builder()
            .no_proxy()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()
            .unwrap();
        AzureBatchClient {
            client,
            base_url: base_url.to_string(),
            key: SecretString::from("key".to_string()),
            options,
        }
    }

    /// Answers one connection with `response`, then keeps the socket open for
    /// `hold` without sending anything else.
    async fn serve_once(response: String, hold: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            tokio::time::sleep(hold).await;
        });
        format!("http://{}", addr)
    }

    /// Headers announcing 100 bytes of JSON, followed by only a fragment.
    fn truncated_json_response() -> String {
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n{\"status\":"
            .to_string()
    }

    fn complete_response(body: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    }

    #[tokio::test]
    async fn test_stalled_status_body_is_transient() {
        let base = serve_once(truncated_json_response(), Duration::from_secs(10)).await;
        let err = local_client(&base).status("R1").await.unwrap_err();
        assert!(err.is_transient(), "unexpected {:?}", err);
    }

    #[tokio::test]
    async fn test_complete_non_json_body_is_invalid() {
        let base = serve_once(complete_response("<html>oops</html>"), Duration::ZERO).await;
        let err = local_client(&base).status("R1").await.unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResponse(_)), "unexpected {:?}", err);
    }

    #[tokio::test]
    async fn test_stalled_result_download_is_transient() {
        let content = serve_once(truncated_json_response(), Duration::from_secs(10)).await;
        let listing = json!({
            "values": [
                {"kind": "Transcription", "links": {"contentUrl": format!("{}/result.json", content)}}
            ]
        })
        .to_string();
        let base = serve_once(complete_response(&listing), Duration::ZERO).await;

        let err = local_client(&base).fetch_result("R1").await.unwrap_err();
        assert!(err.is_transient(), "unexpected {:?}", err);
    }

    #[test]
    fn test_client_urls() {
        let client = AzureBatchClient::new(
            " westus ",
            SecretString::from("key".to_string()),
            options(Duration::from_secs(30)),
        )
        .unwrap();
        assert_eq!(
            client.transcription_url("abc"),
            "https://westus.api.cognitive.microsoft.com/speechtotext/v3.1/transcriptions/abc"
        );
    }
}
