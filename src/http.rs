//! Request and response descriptors exchanged between the host, the network and the cache.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Header map with lowercase names.
pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Method {
  #[default]
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      "OPTIONS" => Ok(Method::Options),
      other => Err(eyre!("Unsupported method: {}", other)),
    }
  }
}

/// Declared resource kind of a request (what the host is loading it as).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  Document,
  Image,
  Style,
  Script,
  Font,
  /// fetch()/XHR style requests
  #[default]
  Empty,
}

impl Destination {
  /// Image, style and script loads are always treated as static assets.
  pub fn is_static_kind(&self) -> bool {
    matches!(self, Destination::Image | Destination::Style | Destination::Script)
  }
}

impl FromStr for Destination {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "document" => Ok(Destination::Document),
      "image" => Ok(Destination::Image),
      "style" => Ok(Destination::Style),
      "script" => Ok(Destination::Script),
      "font" => Ok(Destination::Font),
      "" | "empty" => Ok(Destination::Empty),
      other => Err(eyre!("Unknown destination: {}", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Full-page navigation
  Navigate,
  SameOrigin,
  #[default]
  Cors,
  NoCors,
}

/// An intercepted outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub destination: Destination,
  pub mode: RequestMode,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      headers: Headers::new(),
      destination: Destination::Empty,
      mode: RequestMode::Cors,
    }
  }

  /// A full-page navigation to `url`.
  pub fn navigate(url: Url) -> Self {
    Self {
      destination: Destination::Document,
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  /// Only http(s) requests are ever intercepted.
  pub fn is_http(&self) -> bool {
    matches!(self.url.scheme(), "http" | "https")
  }
}

/// How a response relates to the requesting origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin
  Basic,
  Cors,
  Opaque,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseType::Basic => "basic",
      ResponseType::Cors => "cors",
      ResponseType::Opaque => "opaque",
    }
  }
}

impl FromStr for ResponseType {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(ResponseType::Basic),
      "cors" => Ok(ResponseType::Cors),
      "opaque" => Ok(ResponseType::Opaque),
      other => Err(eyre!("Unknown response type: {}", other)),
    }
  }
}

/// Snapshot of a response: status, headers and the full body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
  pub response_type: ResponseType,
}

impl Response {
  /// A same-origin response.
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: body.into(),
      response_type: ResponseType::Basic,
    }
  }

  /// The fixed response returned for API calls when neither network nor cache can answer.
  pub fn offline(message: &str) -> Self {
    let body = serde_json::json!({
      "error": "Offline",
      "message": message,
    });
    Response::new(503, body.to_string()).with_header("content-type", "application/json")
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn with_type(mut self, response_type: ResponseType) -> Self {
    self.response_type = response_type;
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(String::as_str)
  }

  /// Only exact 200s from our own origin are worth keeping.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.response_type == ResponseType::Basic
  }

  /// Request header names this response varies on, lowercased.
  pub fn vary(&self) -> Vec<String> {
    self
      .header("vary")
      .map(|v| {
        v.split(',')
          .map(|name| name.trim().to_ascii_lowercase())
          .filter(|name| !name.is_empty())
          .collect()
      })
      .unwrap_or_default()
  }

  #[cfg(test)]
  pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Failed to parse response body: {}", e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_offline_response_contract() {
    let response = Response::offline("No connection");
    assert_eq!(response.status, 503);
    assert_eq!(response.header("Content-Type"), Some("application/json"));

    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["error"], "Offline");
    assert_eq!(body["message"], "No connection");
    assert_eq!(body.as_object().unwrap().len(), 2);
  }

  #[test]
  fn test_cacheable_requires_exact_200_and_basic() {
    assert!(Response::new(200, "ok").is_cacheable());
    assert!(!Response::new(204, "").is_cacheable());
    assert!(!Response::new(404, "nope").is_cacheable());
    assert!(!Response::new(200, "ok")
      .with_type(ResponseType::Cors)
      .is_cacheable());
    assert!(!Response::new(200, "")
      .with_type(ResponseType::Opaque)
      .is_cacheable());
  }

  #[test]
  fn test_vary_parsing() {
    let response = Response::new(200, "").with_header("Vary", "Accept, Accept-Language,");
    assert_eq!(response.vary(), vec!["accept", "accept-language"]);
    assert!(Response::new(200, "").vary().is_empty());
  }

  #[test]
  fn test_request_scheme_and_navigation() {
    let page = Request::navigate(Url::parse("https://app.test/").unwrap());
    assert!(page.is_navigation());
    assert!(page.is_http());

    let ext = Request::get(Url::parse("chrome-extension://abc/script.js").unwrap());
    assert!(!ext.is_http());
    assert!(!ext.is_navigation());
  }

  #[test]
  fn test_parse_method_and_destination() {
    assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
    assert!("BREW".parse::<Method>().is_err());
    assert_eq!("Image".parse::<Destination>().unwrap(), Destination::Image);
    assert!(Destination::Script.is_static_kind());
    assert!(!Destination::Font.is_static_kind());
  }
}
