//! Token exchange client.
//!
//! Performs the per-tenant credential exchange described by the tenant's
//! `AuthBody`: request body shaped by `contentType` (JSON object or
//! form-urlencoded pairs), response parsed per `returnType` (JSON or XML),
//! token extracted at `tokenKeyPath`.
use crate::Credential;
use courier_core::{AuthContentType, AuthReturnType, Error, TenantConfig};
use reqwest::StatusCode;

#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
}

impl TokenClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Exchanges the tenant's client credentials for a fresh token.
    pub async fn fetch(&self, cfg: &TenantConfig) -> Result<Credential, Error> {
        if cfg.auth_endpoint.trim().is_empty() {
            return Err(Error::InvalidRequest(format!(
                "tenant {} has no authEndpoint configured",
                cfg.business_unit
            )));
        }
        let method: reqwest::Method = cfg
            .auth_method
            .parse()
            .map_err(|_| Error::InvalidRequest(format!("invalid authMethod {}", cfg.auth_method)))?;

        let body = &cfg.auth_body;
        let request = self
            .http
            .request(method, &cfg.auth_endpoint)
            .timeout(cfg.api_timeout());
        let request = match body.content_type {
            AuthContentType::Json => request.json(&serde_json::json!({
                "grant_type": body.grant_type,
                "client_id": body.client_id,
                "client_secret": body.client_secret,
                "scope": body.scope,
            })),
            AuthContentType::Form => request.form(&[
                ("grant_type", body.grant_type.as_str()),
                ("client_id", body.client_id.as_str()),
                ("client_secret", body.client_secret.as_str()),
                ("scope", body.scope.as_str()),
            ]),
        };

        let response = request.send().await.map_err(|err| {
            Error::Transient(format!(
                "token request to {} failed: {err}",
                cfg.auth_endpoint
            ))
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &cfg.auth_endpoint));
        }
        let text = response
            .text()
            .await
            .map_err(|err| Error::Transient(format!("token response read failed: {err}")))?;

        let token = match body.return_type {
            AuthReturnType::Json => extract_json_path(&text, &body.token_key_path),
            AuthReturnType::Xml => extract_xml_path(&text, &body.token_key_path),
        }
        .ok_or_else(|| {
            Error::Auth(format!(
                "token not found at {} in {} response",
                body.token_key_path,
                match body.return_type {
                    AuthReturnType::Json => "json",
                    AuthReturnType::Xml => "xml",
                }
            ))
        })?;

        let refresh_token = match body.return_type {
            AuthReturnType::Json => extract_json_path(&text, "refresh_token"),
            AuthReturnType::Xml => extract_xml_path(&text, "refresh_token"),
        };
        Ok(Credential::new(token, refresh_token, cfg.token_lifetime()))
    }
}

impl Default for TokenClient {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

fn classify_status(status: StatusCode, endpoint: &str) -> Error {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Error::Auth(format!("token endpoint {endpoint} returned {status}"))
    } else if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Error::Transient(format!("token endpoint {endpoint} returned {status}"))
    } else {
        Error::Internal(format!("token endpoint {endpoint} returned {status}"))
    }
}

/// Looks up a dotted path (`data.access_token`) in a JSON document.
/// Scalar leaves are rendered to their string form.
fn extract_json_path(body: &str, path: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(body).ok()?;
    let mut node = &root;
    for key in path.split('.').filter(|key| !key.is_empty()) {
        node = node.get(key)?;
    }
    match node {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Looks up a dotted element path (`response.token`) in an XML document and
/// returns the inner text of the final element.
///
/// This is a deliberately small scanner, not a full XML parser: tenant token
/// responses are flat envelopes, and the path addresses nested elements by
/// local name. Attributes and namespaces on matched elements are ignored.
fn extract_xml_path(body: &str, path: &str) -> Option<String> {
    let mut scope = body;
    for name in path.split('.').filter(|name| !name.is_empty()) {
        scope = element_inner(scope, name)?;
    }
    let text = scope.trim();
    if text.is_empty() || text.contains('<') {
        None
    } else {
        Some(text.to_string())
    }
}

fn element_inner<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let open_plain = format!("<{name}>");
    let open_attrs = format!("<{name} ");
    let close = format!("</{name}>");
    let start = match xml.find(&open_plain) {
        Some(at) => at + open_plain.len(),
        None => {
            let at = xml.find(&open_attrs)?;
            let tag_end = xml[at..].find('>')? + at + 1;
            tag_end
        }
    };
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}
