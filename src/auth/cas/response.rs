//! CAS `serviceValidate` response codecs
//!
//! CAS answers a validation request with either an XML or a JSON document.
//! Which one is expected is fixed when the provider is built; the body is
//! never sniffed. Both codecs produce the same [`CasResponse`].

use crate::auth::UserInfo;
use crate::error::CasError;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::Deserialize;
use std::collections::HashMap;

/// Attribute bag released by CAS; every attribute may be multi-valued
pub type Attributes = HashMap<String, Vec<String>>;

/// Decoded validation outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResponse {
    Success { user: String, attributes: Attributes },
    Failure { code: String, description: String },
}

/// Encoding of validation responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Xml,
    Json,
}

impl ResponseFormat {
    pub fn from_use_json(use_json: bool) -> Self {
        if use_json {
            ResponseFormat::Json
        } else {
            ResponseFormat::Xml
        }
    }

    pub fn decode(self, body: &str) -> Result<CasResponse, CasError> {
        match self {
            ResponseFormat::Xml => decode_xml(body),
            ResponseFormat::Json => decode_json(body),
        }
    }

    /// Turns a decoded response into an identity.
    ///
    /// JSON prefers the first `oaid` attribute and falls back to `user`;
    /// XML always uses `user`. A success without any identifier is an error.
    pub fn user_info(self, response: CasResponse) -> Result<UserInfo, CasError> {
        let (user, attributes) = match response {
            CasResponse::Failure { code, description } => {
                return Err(CasError::AuthenticationFailure { code, description });
            }
            CasResponse::Success { user, attributes } => (user, attributes),
        };

        let first = |name: &str| {
            attributes
                .get(name)
                .and_then(|values| values.first())
                .filter(|v| !v.is_empty())
                .cloned()
        };
        let user = Some(user.trim().to_string()).filter(|u| !u.is_empty());

        let (oaid, employee_name) = match self {
            ResponseFormat::Json => (first("oaid").or(user), first("employeeName")),
            ResponseFormat::Xml => (user, first("displayName")),
        };

        let oaid = oaid.ok_or(CasError::MalformedResponse(
            "authenticationSuccess carries no usable identifier",
        ))?;

        Ok(UserInfo {
            oaid,
            employee_name,
            extra: attributes,
        })
    }
}

/// Decodes a CAS 2.0/3.0 XML response, ignoring namespace prefixes.
pub fn decode_xml(body: &str) -> Result<CasResponse, CasError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut doc = XmlDocument::default();
    let mut stack: Vec<String> = Vec::new();
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                doc.open(&name, &e, &stack)?;
                stack.push(name);
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(&e);
                doc.open(&name, &e, &stack)?;
                doc.close(&name, "", &stack);
                text.clear();
            }
            Ok(Event::Text(t)) => {
                let unescaped = t.unescape().map_err(|e| CasError::MalformedXml(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(c)) => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(_)) => {
                let name = stack
                    .pop()
                    .ok_or_else(|| CasError::MalformedXml("unbalanced end tag".to_string()))?;
                doc.close(&name, text.trim(), &stack);
                text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(CasError::MalformedXml(e.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(CasError::MalformedXml(format!(
            "document ended inside <{}>",
            stack.join("><")
        )));
    }
    if !doc.saw_root {
        return Err(CasError::MalformedXml("missing serviceResponse element".to_string()));
    }

    doc.into_response()
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

#[derive(Default)]
struct XmlDocument {
    saw_root: bool,
    success: Option<(String, Attributes)>,
    failure: Option<(String, String)>,
}

impl XmlDocument {
    fn open(&mut self, name: &str, e: &BytesStart<'_>, stack: &[String]) -> Result<(), CasError> {
        let parent = stack.last().map(String::as_str);

        match (parent, name) {
            (None, "serviceResponse") => self.saw_root = true,
            (None, other) => {
                return Err(CasError::MalformedXml(format!(
                    "unexpected root element <{other}>"
                )));
            }
            (Some("serviceResponse"), "authenticationSuccess") => {
                self.success = Some((String::new(), Attributes::new()));
            }
            (Some("serviceResponse"), "authenticationFailure") => {
                let mut code = String::new();
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| CasError::MalformedXml(e.to_string()))?;
                    if attr.key.local_name().as_ref() == b"code" {
                        code = attr
                            .unescape_value()
                            .map_err(|e| CasError::MalformedXml(e.to_string()))?
                            .trim()
                            .to_string();
                    }
                }
                self.failure = Some((code, String::new()));
            }
            _ => {}
        }
        Ok(())
    }

    /// `stack` no longer contains the element being closed
    fn close(&mut self, name: &str, text: &str, stack: &[String]) {
        let parent = stack.last().map(String::as_str);
        let grandparent = stack.len().checked_sub(2).map(|i| stack[i].as_str());

        match (grandparent, parent, name) {
            (_, Some("serviceResponse"), "authenticationFailure") => {
                if let Some((_, description)) = self.failure.as_mut() {
                    *description = text.to_string();
                }
            }
            (_, Some("authenticationSuccess"), "user") => {
                if let Some((user, _)) = self.success.as_mut() {
                    *user = text.to_string();
                }
            }
            (Some("authenticationSuccess"), Some("attributes"), attribute) => {
                if let Some((_, attributes)) = self.success.as_mut() {
                    attributes
                        .entry(attribute.to_string())
                        .or_default()
                        .push(text.to_string());
                }
            }
            _ => {}
        }
    }

    fn into_response(self) -> Result<CasResponse, CasError> {
        match (self.success, self.failure) {
            (Some(_), Some(_)) => Err(CasError::MalformedResponse(
                "response carries both success and failure",
            )),
            (None, Some((code, description))) => Ok(CasResponse::Failure { code, description }),
            (Some((user, attributes)), None) => Ok(CasResponse::Success { user, attributes }),
            (None, None) => Err(CasError::MalformedResponse(
                "response carries neither success nor failure",
            )),
        }
    }
}

#[derive(Deserialize)]
struct JsonEnvelope {
    #[serde(rename = "serviceResponse")]
    service_response: JsonServiceResponse,
}

#[derive(Deserialize)]
struct JsonServiceResponse {
    #[serde(rename = "authenticationSuccess", default)]
    success: Option<JsonSuccess>,
    #[serde(rename = "authenticationFailure", default)]
    failure: Option<JsonFailure>,
}

#[derive(Deserialize)]
struct JsonSuccess {
    #[serde(default)]
    user: String,
    #[serde(default)]
    attributes: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct JsonFailure {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

/// Decodes a CAS `format=json` response.
pub fn decode_json(body: &str) -> Result<CasResponse, CasError> {
    let envelope: JsonEnvelope =
        serde_json::from_str(body).map_err(|e| CasError::MalformedJson(e.to_string()))?;

    match (
        envelope.service_response.success,
        envelope.service_response.failure,
    ) {
        (Some(_), Some(_)) => Err(CasError::MalformedResponse(
            "response carries both success and failure",
        )),
        (None, Some(failure)) => Ok(CasResponse::Failure {
            code: failure.code,
            description: failure.description,
        }),
        (Some(success), None) => Ok(CasResponse::Success {
            user: success.user,
            attributes: success
                .attributes
                .into_iter()
                .map(|(name, value)| (name, json_values(value)))
                .collect(),
        }),
        (None, None) => Err(CasError::MalformedResponse(
            "response carries neither success nor failure",
        )),
    }
}

fn json_values(value: serde_json::Value) -> Vec<String> {
    use serde_json::Value;

    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s],
        Value::Array(items) => items.into_iter().flat_map(json_values).collect(),
        other => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_scalars_and_arrays_flatten() {
        let values = json_values(serde_json::json!(["a", 1, null, ["b"]]));
        assert_eq!(values, vec!["a", "1", "b"]);
    }

    #[test]
    fn xml_attributes_are_collected() {
        let body = r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
            <cas:authenticationSuccess>
                <cas:user>u3</cas:user>
                <cas:attributes>
                    <cas:memberOf>a</cas:memberOf>
                    <cas:memberOf>b</cas:memberOf>
                </cas:attributes>
            </cas:authenticationSuccess>
        </cas:serviceResponse>"#;

        let CasResponse::Success { user, attributes } = decode_xml(body).unwrap() else {
            panic!("expected success");
        };
        assert_eq!(user, "u3");
        assert_eq!(attributes["memberOf"], vec!["a", "b"]);
    }
}
