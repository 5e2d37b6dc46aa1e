//! `reqwest`-backed transport.

use super::{AttemptRequest, ProgressReporter, Transport};
use crate::errors::TransportError;
use crate::request::{HttpMethod, PartType};
use async_trait::async_trait;
use reqwest::{multipart, Client};

/// Sends attempts over HTTP(S) with a shared `reqwest` client.
///
/// GET attempts carry their parameters in the query string. POST attempts
/// carry parameters in the query string and media as a multipart body.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport around an existing client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn form(request: &AttemptRequest) -> multipart::Form {
        let part_type = request.part_type.unwrap_or(PartType::File);
        request
            .media
            .iter()
            .enumerate()
            .fold(multipart::Form::new(), |form, (index, media)| {
                let part = multipart::Part::bytes(media.data().to_vec()).file_name(media.file_name());
                form.part(part_type.field_name(index), part)
            })
    }
}

fn map_error(e: &reqwest::Error, request: &AttemptRequest) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(request.timeout)
    } else {
        TransportError::Connection(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn attempt(
        &self,
        request: AttemptRequest,
        progress: ProgressReporter,
    ) -> Result<Vec<u8>, TransportError> {
        let total = request.media_bytes();

        let builder = match request.http_method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => {
                progress.report(0, total);
                self.client.post(&request.url).multipart(Self::form(&request))
            }
        };

        let response = builder
            .query(&request.parameters)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| map_error(&e, &request))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        if request.http_method == HttpMethod::Post {
            progress.report(total, total);
        }

        let body = response.bytes().await.map_err(|e| map_error(&e, &request))?;
        Ok(body.to_vec())
    }
}
