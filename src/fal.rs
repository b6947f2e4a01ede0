use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::category::Category;

const FAL_RUN_URL: &str = "https://api.fal.ai/v1/run/fal-ai/nano-banana/edit";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// One generation call: both images as publicly fetchable URLs plus the
/// prompt inputs. Exactly one provider call per try-on request, no retry.
#[derive(Clone, Debug)]
pub struct TryOnJob {
    pub person_url: String,
    pub garment_url: String,
    pub category: Option<Category>,
    pub prompt_extra: Option<String>,
}

/// A successful generation, already downloaded from the provider.
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub description: String,
    pub request_id: String,
}

/// Seam between the endpoint and the external generation service, so
/// handler tests can run against a stub.
#[async_trait]
pub trait TryOnProvider: Send + Sync {
    async fn try_on(&self, job: TryOnJob) -> Result<GeneratedImage>;
}

pub fn build_prompt(category: Option<Category>, extra: Option<&str>) -> String {
    let garment = category.map(|c| c.as_str()).unwrap_or("clothes");
    let mut prompt = format!(
        "Replace the person's current {garment} with the garment shown in the second image. \
         Preserve the person's identity, face, hairstyle, skin tone, body shape, pose and background. \
         Make the fit realistic and natural with correct lighting and fabric drape. \
         Keep hands and accessories intact. Avoid changing facial features."
    );
    if let Some(extra) = extra.map(str::trim).filter(|extra| !extra.is_empty()) {
        prompt.push_str("\nExtra style guidance: ");
        prompt.push_str(extra);
    }
    prompt
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    images: Option<Vec<FalImage>>,
    description: Option<String>,
    request_id: Option<String>,
    status_url: Option<String>,
    data: Option<RunData>,
    request: Option<RunRequest>,
    logs: Option<Vec<FalLog>>,
}

#[derive(Debug, Deserialize)]
struct RunData {
    images: Option<Vec<FalImage>>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    id: Option<String>,
    status_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FalImage {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FalLog {
    message: Option<String>,
}

impl RunResponse {
    // Some FAL variants nest the payload under `data`; accept both.
    fn first_image_url(&self) -> Option<&str> {
        let inline = self.images.as_deref().and_then(first_url);
        inline.or_else(|| {
            self.data
                .as_ref()
                .and_then(|data| data.images.as_deref())
                .and_then(first_url)
        })
    }

    fn description(&self) -> Option<&str> {
        self.description
            .as_deref()
            .or_else(|| self.data.as_ref().and_then(|data| data.description.as_deref()))
    }

    fn request_id(&self) -> Option<&str> {
        self.request_id
            .as_deref()
            .or_else(|| self.request.as_ref().and_then(|request| request.id.as_deref()))
    }

    fn status_url(&self) -> Option<&str> {
        self.status_url.as_deref().or_else(|| {
            self.request
                .as_ref()
                .and_then(|request| request.status_url.as_deref())
        })
    }
}

fn first_url(images: &[FalImage]) -> Option<&str> {
    images.first().and_then(|image| image.url.as_deref())
}

async fn assert_ok_response(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(anyhow!("provider request failed: {status} {text}"))
}

/// REST client for FAL's `nano-banana/edit` run API.
#[derive(Clone)]
pub struct FalClient {
    client: Client,
    api_key: String,
    timeout: Duration,
}

impl FalClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let response = assert_ok_response(response).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(anyhow!("provider returned an empty image"));
        }
        Ok(bytes.to_vec())
    }

    async fn poll_until_image(
        &self,
        status_url: &str,
        request_id: &str,
    ) -> Result<(String, Option<String>)> {
        let deadline = Instant::now() + self.timeout;
        while Instant::now() <= deadline {
            let response = self
                .client
                .get(status_url)
                .bearer_auth(&self.api_key)
                .send()
                .await?;
            let response = assert_ok_response(response).await?;
            let payload: RunResponse = response.json().await?;

            for log in payload.logs.iter().flatten() {
                if let Some(message) = log.message.as_deref() {
                    debug!(request_id, "provider: {message}");
                }
            }

            if let Some(url) = payload.first_image_url() {
                return Ok((url.to_string(), payload.description().map(str::to_string)));
            }
            sleep(POLL_INTERVAL).await;
        }
        Err(anyhow!("generation timed out (request_id={request_id})"))
    }
}

#[async_trait]
impl TryOnProvider for FalClient {
    async fn try_on(&self, job: TryOnJob) -> Result<GeneratedImage> {
        if self.api_key.trim().is_empty() {
            return Err(anyhow!("FAL_KEY not configured"));
        }

        let body = json!({
            "input": {
                "prompt": build_prompt(job.category, job.prompt_extra.as_deref()),
                "image_urls": [job.person_url, job.garment_url],
                "output_format": "jpeg",
                "num_images": 1,
            }
        });

        let response = self
            .client
            .post(FAL_RUN_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = assert_ok_response(response).await?;
        let payload: RunResponse = response.json().await?;

        let request_id = payload.request_id().unwrap_or("unknown").to_string();
        let mut description = payload.description().map(str::to_string);

        let image_url = match payload.first_image_url() {
            Some(url) => url.to_string(),
            None => {
                let status_url = payload
                    .status_url()
                    .ok_or_else(|| anyhow!("provider returned neither images nor a status_url"))?
                    .to_string();
                let (url, polled_description) =
                    self.poll_until_image(&status_url, &request_id).await?;
                if polled_description.is_some() {
                    description = polled_description;
                }
                url
            }
        };

        let bytes = self.download(&image_url).await?;
        Ok(GeneratedImage {
            bytes,
            description: description.unwrap_or_default(),
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_the_category() {
        let prompt = build_prompt(Some(Category::Outerwear), None);
        assert!(prompt.contains("current outerwear"));
        assert!(!prompt.contains("Extra style guidance"));
    }

    #[test]
    fn prompt_defaults_to_clothes() {
        assert!(build_prompt(None, None).contains("current clothes"));
    }

    #[test]
    fn prompt_appends_extra_guidance() {
        let prompt = build_prompt(Some(Category::Top), Some("rolled-up sleeves"));
        assert!(prompt.ends_with("Extra style guidance: rolled-up sleeves"));
    }

    #[test]
    fn blank_extra_guidance_is_ignored() {
        assert!(!build_prompt(None, Some("   ")).contains("Extra style guidance"));
    }

    #[test]
    fn inline_images_are_found() {
        let payload: RunResponse = serde_json::from_str(
            r#"{"images":[{"url":"https://cdn.fal.ai/out.jpg"}],"request_id":"req-1","description":"done"}"#,
        )
        .expect("parse");
        assert_eq!(payload.first_image_url(), Some("https://cdn.fal.ai/out.jpg"));
        assert_eq!(payload.request_id(), Some("req-1"));
        assert_eq!(payload.description(), Some("done"));
    }

    #[test]
    fn nested_data_images_are_found() {
        let payload: RunResponse = serde_json::from_str(
            r#"{"data":{"images":[{"url":"https://cdn.fal.ai/nested.jpg"}],"description":"nested"}}"#,
        )
        .expect("parse");
        assert_eq!(
            payload.first_image_url(),
            Some("https://cdn.fal.ai/nested.jpg")
        );
        assert_eq!(payload.description(), Some("nested"));
    }

    #[test]
    fn status_url_fallbacks_are_found() {
        let payload: RunResponse = serde_json::from_str(
            r#"{"request":{"id":"req-2","status_url":"https://api.fal.ai/status/req-2"}}"#,
        )
        .expect("parse");
        assert_eq!(payload.first_image_url(), None);
        assert_eq!(payload.request_id(), Some("req-2"));
        assert_eq!(
            payload.status_url(),
            Some("https://api.fal.ai/status/req-2")
        );
    }

    #[test]
    fn empty_image_list_is_not_a_result() {
        let payload: RunResponse =
            serde_json::from_str(r#"{"images":[],"status_url":"https://api.fal.ai/s"}"#)
                .expect("parse");
        assert_eq!(payload.first_image_url(), None);
        assert_eq!(payload.status_url(), Some("https://api.fal.ai/s"));
    }
}
