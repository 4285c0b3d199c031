//! Network access used by the proxy.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use url::Url;

use crate::error::ProxyError;
use crate::http::{Headers, Request, RequestMode, Response, ResponseType};

/// Anything that can perform a request against the network.
///
/// A transport failure is an `Err`; any HTTP status, including 4xx/5xx, is an `Ok`.
pub trait Fetcher: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// Fetcher backed by reqwest.
///
/// No request timeout is configured: a hung fetch stalls the caller.
#[derive(Clone)]
pub struct ReqwestFetcher {
  client: reqwest::Client,
  origin: Url,
}

impl ReqwestFetcher {
  /// Create a fetcher for an application served from `origin`.
  pub fn new(origin: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("encore-offline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  fn response_type(&self, request: &Request, final_url: &Url) -> ResponseType {
    if final_url.origin() == self.origin.origin() {
      ResponseType::Basic
    } else if request.mode == RequestMode::NoCors {
      ResponseType::Opaque
    } else {
      ResponseType::Cors
    }
  }
}

impl Fetcher for ReqwestFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let network_error = |reason: String| ProxyError::Network {
      url: request.url.to_string(),
      reason,
    };

    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| network_error(e.to_string()))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| network_error(e.to_string()))?;

    let status = response.status().as_u16();
    let response_type = self.response_type(request, response.url());

    let mut headers = Headers::new();
    for (name, value) in response.headers() {
      if let Ok(value) = value.to_str() {
        headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
      }
    }

    let body = response
      .bytes()
      .await
      .map_err(|e| network_error(e.to_string()))?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
      response_type,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_response_type_by_origin() {
    let fetcher = ReqwestFetcher::new(Url::parse("https://app.test/").unwrap()).unwrap();
    let same = Url::parse("https://app.test/logo.png").unwrap();
    let other = Url::parse("https://cdn.test/logo.png").unwrap();

    let request = Request::get(same.clone());
    assert_eq!(fetcher.response_type(&request, &same), ResponseType::Basic);
    assert_eq!(fetcher.response_type(&request, &other), ResponseType::Cors);

    let mut opaque = Request::get(other.clone());
    opaque.mode = RequestMode::NoCors;
    assert_eq!(fetcher.response_type(&opaque, &other), ResponseType::Opaque);
  }
}
