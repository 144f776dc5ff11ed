//! HTTP request helper shared by the auth, table and geocoding clients

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, RequestBuilder,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::error::{ApiError, Error};

/// One outgoing JSON request. Non-2xx answers become [`Error::Api`].
pub struct FetchBuilder<'a> {
    client: &'a Client,
    url: String,
    method: Method,
    headers: HeaderMap,
    query_params: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl<'a> FetchBuilder<'a> {
    pub fn new(client: &'a Client, url: &str, method: Method) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            client,
            url: url.to_string(),
            method,
            headers,
            query_params: Vec::new(),
            body: None,
        }
    }

    /// Set a header. Names or values that are not valid HTTP are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn bearer_auth(self, token: &str) -> Self {
        let value = format!("Bearer {}", token);
        self.header(AUTHORIZATION.as_str(), &value)
    }

    /// Append query parameters; repeated keys are kept
    pub fn query<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query_params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, Error> {
        self.body = Some(serde_json::to_vec(body)?);
        Ok(self)
    }

    fn build(&self) -> Result<RequestBuilder, Error> {
        let mut url = Url::parse(&self.url)?;

        if !self.query_params.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query_params);
        }
        trace!("{} {}", self.method, url);

        let request = self
            .client
            .request(self.method.clone(), url)
            .headers(self.headers.clone());
        Ok(match &self.body {
            Some(body) => request.body(body.clone()),
            None => request,
        })
    }

    async fn send_checked(&self) -> Result<reqwest::Response, Error> {
        let response = self.build()?.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let api = ApiError::from_body(status.as_u16(), &text);
            debug!("{} {} failed: {}", self.method, self.url, api);
            return Err(Error::Api(api));
        }
        Ok(response)
    }

    /// Send and decode the JSON answer
    pub async fn execute<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let response = self.send_checked().await?;
        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }

    /// Send, ignoring any answer body
    pub async fn execute_empty(&self) -> Result<(), Error> {
        self.send_checked().await?;
        Ok(())
    }
}

/// Entry points for [`FetchBuilder`]
pub struct Fetch;

impl Fetch {
    pub fn get<'a>(client: &'a Client, url: &str) -> FetchBuilder<'a> {
        FetchBuilder::new(client, url, Method::GET)
    }

    pub fn post<'a>(client: &'a Client, url: &str) -> FetchBuilder<'a> {
        FetchBuilder::new(client, url, Method::POST)
    }

    pub fn patch<'a>(client: &'a Client, url: &str) -> FetchBuilder<'a> {
        FetchBuilder::new(client, url, Method::PATCH)
    }
}
