use tracing::{debug, trace};

use crate::error::{Result, VsphereError};
use crate::types::ManagedObjectRef;
use crate::xml::Element;

/// `SOAPAction` version sent with every request. Servers accept any version they support
/// at or above the one a client names.
const VIM_VERSION: &str = "urn:vim25/7.0";

const ENVELOPE_OPEN: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" "#,
    r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema" "#,
    r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
    "<soapenv:Body>"
);
const ENVELOPE_CLOSE: &str = "</soapenv:Body></soapenv:Envelope>";

/// Minimal client for the vim25 SOAP endpoint at `https://<host>/sdk`.
///
/// Session state is carried by the `vmware_soap_session` cookie, kept in the
/// client's cookie store after `Login`.
pub struct SoapClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SoapClient {
    pub fn new(host: &str, insecure: bool) -> Result<Self> {
        let endpoint = format!("https://{host}/sdk");
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(insecure)
            .user_agent(concat!("vsphctl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| VsphereError::Http {
                url: endpoint.clone(),
                source,
            })?;
        Ok(Self { http, endpoint })
    }

    /// The underlying HTTP client, shared for datastore file transfers.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Invoke `method` on `this` and return its `<methodResponse>` element.
    pub async fn invoke(
        &self,
        method: &str,
        this: &ManagedObjectRef,
        args: Vec<Element>,
    ) -> Result<Element> {
        let body = Element::new(method)
            .with_attr("xmlns", "urn:vim25")
            .with_child(this.to_element("_this"))
            .with_children(args);
        let envelope = envelope(&body)?;

        debug!(method, this = %this, "SOAP request");
        trace!(body = %loggable_body(method, &envelope), "SOAP request body");

        let resp = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", VIM_VERSION)
            .body(envelope)
            .send()
            .await
            .map_err(|source| VsphereError::Http {
                url: self.endpoint.clone(),
                source,
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|source| VsphereError::Http {
            url: self.endpoint.clone(),
            source,
        })?;
        trace!(status = status.as_u16(), body = %text, "SOAP response body");

        let body = match Element::parse(&text).map(|root| response_body(root, method)) {
            Ok(body) => body?,
            Err(_) if !status.is_success() => {
                return Err(VsphereError::unexpected(
                    method,
                    format!("HTTP status {status}"),
                ));
            }
            Err(e) => return Err(e),
        };

        if !status.is_success() {
            return Err(VsphereError::unexpected(
                method,
                format!("HTTP status {status} without a SOAP fault"),
            ));
        }
        Ok(body)
    }
}

fn envelope(body: &Element) -> Result<String> {
    Ok(format!("{ENVELOPE_OPEN}{}{ENVELOPE_CLOSE}", body.to_xml()?))
}

/// Request bodies that carry credentials are not logged.
fn loggable_body<'a>(method: &str, envelope: &'a str) -> &'a str {
    match method {
        "Login" => "<redacted>",
        _ => envelope,
    }
}

/// Extract `<methodResponse>` from an envelope, turning a `<Fault>` into an error.
fn response_body(envelope: Element, method: &str) -> Result<Element> {
    let body = envelope
        .children
        .into_iter()
        .find(|c| c.name == "Body")
        .ok_or_else(|| VsphereError::unexpected(method, "envelope has no Body"))?;

    if let Some(fault) = body.child("Fault") {
        return Err(fault_error(method, fault));
    }

    let expected = format!("{method}Response");
    body.children
        .into_iter()
        .find(|c| c.name == expected)
        .ok_or_else(|| VsphereError::unexpected(method, format!("missing <{expected}>")))
}

fn fault_error(method: &str, fault: &Element) -> VsphereError {
    let message = fault
        .text_of("faultstring")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("no fault message")
        .to_string();

    let fault_type = fault
        .child("detail")
        .and_then(|d| d.children.first())
        .map(|f| {
            f.xsi_type
                .clone()
                .unwrap_or_else(|| f.name.trim_end_matches("Fault").to_string())
        })
        .unwrap_or_else(|| {
            fault
                .text_of("faultcode")
                .unwrap_or("ServerFaultCode")
                .to_string()
        });

    VsphereError::Fault {
        method: method.to_string(),
        fault: fault_type,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wraps_body() {
        let body = Element::new("Logout")
            .with_attr("xmlns", "urn:vim25")
            .with_child(ManagedObjectRef::new("SessionManager", "SessionManager").to_element("_this"));
        let xml = envelope(&body).unwrap();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><soapenv:Envelope"#));
        assert!(xml.contains(
            r#"<soapenv:Body><Logout xmlns="urn:vim25"><_this type="SessionManager">SessionManager</_this></Logout></soapenv:Body>"#
        ));
        assert!(xml.ends_with("</soapenv:Envelope>"));
    }

    #[test]
    fn response_body_returns_method_response() {
        let root = Element::parse(
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
                 <soapenv:Body>
                   <CurrentTimeResponse xmlns="urn:vim25">
                     <returnval>2024-05-01T10:00:00.5Z</returnval>
                   </CurrentTimeResponse>
                 </soapenv:Body>
               </soapenv:Envelope>"#,
        )
        .unwrap();
        let body = response_body(root, "CurrentTime").unwrap();
        assert_eq!(body.text_of("returnval"), Some("2024-05-01T10:00:00.5Z"));
    }

    #[test]
    fn fault_envelope_becomes_fault_error() {
        let root = Element::parse(
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/"
                                 xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
                 <soapenv:Body>
                   <soapenv:Fault>
                     <faultcode>ServerFaultCode</faultcode>
                     <faultstring>Cannot complete login due to an incorrect user name or password.</faultstring>
                     <detail>
                       <InvalidLoginFault xmlns="urn:vim25" xsi:type="InvalidLogin"></InvalidLoginFault>
                     </detail>
                   </soapenv:Fault>
                 </soapenv:Body>
               </soapenv:Envelope>"#,
        )
        .unwrap();

        match response_body(root, "Login") {
            Err(VsphereError::Fault {
                method,
                fault,
                message,
            }) => {
                assert_eq!(method, "Login");
                assert_eq!(fault, "InvalidLogin");
                assert!(message.starts_with("Cannot complete login"));
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn fault_without_detail_uses_fault_code() {
        let fault = Element::new("Fault")
            .with_child(Element::leaf("faultcode", "ClientFaultCode"))
            .with_child(Element::leaf("faultstring", "bad request"));
        match fault_error("CreateFilter", &fault) {
            VsphereError::Fault { fault, message, .. } => {
                assert_eq!(fault, "ClientFaultCode");
                assert_eq!(message, "bad request");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_response_element_is_unexpected() {
        let root = Element::new("Envelope").with_child(Element::new("Body"));
        assert!(matches!(
            response_body(root, "Login"),
            Err(VsphereError::UnexpectedResponse { .. })
        ));
    }

    #[test]
    fn login_body_is_not_logged() {
        let body = Element::new("Login")
            .with_child(Element::leaf("userName", "admin"))
            .with_child(Element::leaf("password", "s3cret"));
        let xml = envelope(&body).unwrap();
        assert!(!loggable_body("Login", &xml).contains("s3cret"));
        assert_eq!(loggable_body("Logout", &xml), xml);
    }
}
