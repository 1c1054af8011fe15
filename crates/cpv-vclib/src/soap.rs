//! vim25 SOAP client over HTTPS.
//!
//! Talks to `https://{host}:{port}/sdk`. Builds SOAP 1.1 envelopes by hand,
//! parses responses into an [`XmlElement`] tree and maps SOAP faults onto
//! [`VclibError`] kinds. The session cookie set by `Login` is kept by
//! reqwest's cookie store.

use crate::error::{VclibError, VclibResult};
use crate::types::{
    AboutInfo, Credentials, ManagedObjectReference, ObjectContent, VimValue, DATACENTER_TYPE, FOLDER_TYPE,
    VIRTUAL_MACHINE_TYPE,
};
use crate::vim::VimClient;
use crate::xml::{self, escape, XmlElement};

use async_trait::async_trait;
use log::{debug, trace};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

// ─── Constants ───────────────────────────────────────────────────────

const NS_SOAPENV: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const NS_XSD: &str = "http://www.w3.org/2001/XMLSchema";
const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
const NS_VIM25: &str = "urn:vim25";
const SOAP_ACTION: &str = "urn:vim25/7.0.3.0";
const BODY_EXCERPT_CHARS: usize = 200;

// ─── Service content ─────────────────────────────────────────────────

/// Well-known managers from `RetrieveServiceContent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContent {
    pub root_folder: ManagedObjectReference,
    pub property_collector: ManagedObjectReference,
    pub search_index: ManagedObjectReference,
    pub session_manager: ManagedObjectReference,
    pub virtual_disk_manager: Option<ManagedObjectReference>,
    pub about: AboutInfo,
}

impl ServiceContent {
    fn from_xml(el: &XmlElement) -> VclibResult<Self> {
        let moref = |name: &str| {
            el.child(name)
                .and_then(reference_from_xml)
                .ok_or_else(|| VclibError::parse(format!("ServiceContent is missing {name}")))
        };
        let about = el
            .child("about")
            .map(|a| AboutInfo {
                full_name: a.child_text("fullName").unwrap_or_default().to_string(),
                api_type: a.child_text("apiType").unwrap_or_default().to_string(),
                api_version: a.child_text("apiVersion").unwrap_or_default().to_string(),
                instance_uuid: a.child_text("instanceUuid").map(str::to_string),
            })
            .unwrap_or_default();

        Ok(Self {
            root_folder: moref("rootFolder")?,
            property_collector: moref("propertyCollector")?,
            search_index: moref("searchIndex")?,
            session_manager: moref("sessionManager")?,
            virtual_disk_manager: el.child("virtualDiskManager").and_then(reference_from_xml),
            about,
        })
    }
}

// ─── Client ──────────────────────────────────────────────────────────

/// vim25 SOAP client bound to one endpoint.
#[derive(Debug)]
pub struct SoapClient {
    client: reqwest::Client,
    url: Url,
    service: ServiceContent,
    request_counter: AtomicU64,
}

impl SoapClient {
    /// Fetch the service content. No authentication happens yet.
    pub async fn new(client: reqwest::Client, url: Url) -> VclibResult<Self> {
        let service_instance = ManagedObjectReference::new("ServiceInstance", "ServiceInstance");
        let body = format!(
            "<RetrieveServiceContent xmlns=\"{NS_VIM25}\">{}</RetrieveServiceContent>",
            this_xml(&service_instance)
        );
        let resp = send(&client, &url, "RetrieveServiceContent", 0, &envelope(&body)).await?;
        let returnval = resp
            .child("returnval")
            .ok_or_else(|| VclibError::parse("RetrieveServiceContent returned no content"))?;
        let service = ServiceContent::from_xml(returnval)?;
        debug!(
            "Connected to {} ({} API {})",
            url, service.about.full_name, service.about.api_version
        );

        Ok(Self {
            client,
            url,
            service,
            request_counter: AtomicU64::new(1),
        })
    }

    pub fn service_content(&self) -> &ServiceContent {
        &self.service
    }

    pub fn about(&self) -> &AboutInfo {
        &self.service.about
    }

    /// SessionManager.Login. Returns the server's view of the user name.
    pub async fn login(&self, credentials: &Credentials) -> VclibResult<String> {
        let body = format!(
            "<Login xmlns=\"{NS_VIM25}\">{}<userName>{}</userName><password>{}</password></Login>",
            this_xml(&self.service.session_manager),
            escape(&credentials.username),
            escape(&credentials.password),
        );
        let resp = self.call("Login", &body).await?;
        Ok(resp
            .child("returnval")
            .and_then(|r| r.child_text("userName"))
            .unwrap_or(&credentials.username)
            .to_string())
    }

    async fn call(&self, method: &str, body: &str) -> VclibResult<XmlElement> {
        let req_id = self.request_counter.fetch_add(1, Ordering::Relaxed);
        send(&self.client, &self.url, method, req_id, &envelope(body)).await
    }

    async fn retrieve_page(&self, method: &str, body: &str) -> VclibResult<(Vec<ObjectContent>, Option<String>)> {
        let resp = self.call(method, body).await?;
        let Some(ret) = resp.child("returnval") else {
            return Ok((Vec::new(), None));
        };
        let objects = ret
            .children_named("objects")
            .map(object_content_from_xml)
            .collect::<VclibResult<Vec<_>>>()?;
        Ok((objects, ret.child_text("token").map(str::to_string)))
    }

    /// RetrievePropertiesEx followed by ContinueRetrievePropertiesEx until the token runs out.
    async fn retrieve_all(&self, body: &str) -> VclibResult<Vec<ObjectContent>> {
        let collector = this_xml(&self.service.property_collector);
        let (mut results, mut token) = self.retrieve_page("RetrievePropertiesEx", body).await?;

        while let Some(t) = token.take() {
            let body = format!(
                "<ContinueRetrievePropertiesEx xmlns=\"{NS_VIM25}\">{collector}<token>{}</token></ContinueRetrievePropertiesEx>",
                escape(&t),
            );
            let (more, next) = self.retrieve_page("ContinueRetrievePropertiesEx", &body).await?;
            results.extend(more);
            token = next;
        }
        Ok(results)
    }
}

#[async_trait]
impl VimClient for SoapClient {
    async fn find_by_inventory_path(&self, path: &str) -> VclibResult<Option<ManagedObjectReference>> {
        let body = format!(
            "<FindByInventoryPath xmlns=\"{NS_VIM25}\">{}<inventoryPath>{}</inventoryPath></FindByInventoryPath>",
            this_xml(&self.service.search_index),
            escape(path),
        );
        let resp = self.call("FindByInventoryPath", &body).await?;
        Ok(resp.child("returnval").and_then(reference_from_xml))
    }

    async fn find_by_uuid(
        &self,
        datacenter: &ManagedObjectReference,
        uuid: &str,
        vm_search: bool,
    ) -> VclibResult<Option<ManagedObjectReference>> {
        let body = format!(
            "<FindByUuid xmlns=\"{NS_VIM25}\">{}{}<uuid>{}</uuid><vmSearch>{}</vmSearch></FindByUuid>",
            this_xml(&self.service.search_index),
            moref_xml("datacenter", datacenter),
            escape(uuid),
            vm_search,
        );
        let resp = self.call("FindByUuid", &body).await?;
        Ok(resp.child("returnval").and_then(reference_from_xml))
    }

    async fn retrieve_properties(
        &self,
        objects: &[ManagedObjectReference],
        properties: &[&str],
    ) -> VclibResult<Vec<ObjectContent>> {
        let body = format!(
            "<RetrievePropertiesEx xmlns=\"{NS_VIM25}\">{}<specSet>{}</specSet><options/></RetrievePropertiesEx>",
            this_xml(&self.service.property_collector),
            property_filter_spec(objects, properties),
        );
        self.retrieve_all(&body).await
    }

    async fn retrieve_vm_folder_tree(
        &self,
        datacenter: &ManagedObjectReference,
        properties: &[&str],
    ) -> VclibResult<Vec<ObjectContent>> {
        let body = format!(
            "<RetrievePropertiesEx xmlns=\"{NS_VIM25}\">{}<specSet>{}</specSet><options/></RetrievePropertiesEx>",
            this_xml(&self.service.property_collector),
            vm_folder_tree_spec(datacenter, properties),
        );
        self.retrieve_all(&body).await
    }

    async fn query_virtual_disk_uuid(
        &self,
        datacenter: &ManagedObjectReference,
        disk_path: &str,
    ) -> VclibResult<String> {
        let manager = self
            .service
            .virtual_disk_manager
            .as_ref()
            .ok_or_else(|| VclibError::fault("NotSupported", "endpoint has no VirtualDiskManager"))?;
        let body = format!(
            "<QueryVirtualDiskUuid xmlns=\"{NS_VIM25}\">{}<name>{}</name>{}</QueryVirtualDiskUuid>",
            this_xml(manager),
            escape(disk_path),
            moref_xml("datacenter", datacenter),
        );
        let resp = self.call("QueryVirtualDiskUuid", &body).await?;
        resp.child_text("returnval")
            .map(str::to_string)
            .ok_or_else(|| VclibError::parse("QueryVirtualDiskUuid returned no UUID"))
    }

    async fn logout(&self) -> VclibResult<()> {
        let body = format!(
            "<Logout xmlns=\"{NS_VIM25}\">{}</Logout>",
            this_xml(&self.service.session_manager)
        );
        self.call("Logout", &body).await?;
        Ok(())
    }
}

// ─── Request building ────────────────────────────────────────────────

fn envelope(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="{NS_SOAPENV}" xmlns:xsd="{NS_XSD}" xmlns:xsi="{NS_XSI}">
  <soapenv:Body>{body}</soapenv:Body>
</soapenv:Envelope>"#
    )
}

fn moref_xml(tag: &str, r: &ManagedObjectReference) -> String {
    format!(
        "<{tag} type=\"{}\">{}</{tag}>",
        escape(&r.type_name),
        escape(&r.value)
    )
}

fn this_xml(r: &ManagedObjectReference) -> String {
    moref_xml("_this", r)
}

/// One `PropertyFilterSpec`: a `propSet` per object type, an `objectSet` per object.
fn property_filter_spec(objects: &[ManagedObjectReference], properties: &[&str]) -> String {
    let mut types: Vec<&str> = objects.iter().map(|o| o.type_name.as_str()).collect();
    types.sort_unstable();
    types.dedup();

    let mut spec = String::new();
    for t in types {
        spec.push_str(&format!("<propSet><type>{}</type>", escape(t)));
        for p in properties {
            spec.push_str(&format!("<pathSet>{}</pathSet>", escape(p)));
        }
        spec.push_str("</propSet>");
    }
    for obj in objects {
        spec.push_str(&format!("<objectSet>{}<skip>false</skip></objectSet>", moref_xml("obj", obj)));
    }
    spec
}

/// `PropertyFilterSpec` selecting Folders and VirtualMachines below a
/// datacenter's `vmFolder`, the datacenter itself skipped.
fn vm_folder_tree_spec(datacenter: &ManagedObjectReference, properties: &[&str]) -> String {
    let mut spec = String::new();
    for t in [FOLDER_TYPE, VIRTUAL_MACHINE_TYPE] {
        spec.push_str(&format!("<propSet><type>{t}</type>"));
        for p in properties {
            spec.push_str(&format!("<pathSet>{}</pathSet>", escape(p)));
        }
        spec.push_str("</propSet>");
    }
    spec.push_str(&format!(
        "<objectSet>{}<skip>true</skip>\
         <selectSet xsi:type=\"TraversalSpec\"><name>datacenterVmFolder</name><type>{DATACENTER_TYPE}</type><path>vmFolder</path><skip>false</skip><selectSet><name>folderChildren</name></selectSet></selectSet>\
         <selectSet xsi:type=\"TraversalSpec\"><name>folderChildren</name><type>{FOLDER_TYPE}</type><path>childEntity</path><skip>false</skip><selectSet><name>folderChildren</name></selectSet></selectSet>\
         </objectSet>",
        moref_xml("obj", datacenter),
    ));
    spec
}

// ─── Transport ───────────────────────────────────────────────────────

/// POST one envelope; return the element inside `<Body>` or the mapped fault.
async fn send(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    req_id: u64,
    envelope: &str,
) -> VclibResult<XmlElement> {
    debug!("vim25 request #{req_id} {method} ({} bytes)", envelope.len());

    let resp = client
        .post(url.clone())
        .header(CONTENT_TYPE, HeaderValue::from_static("text/xml; charset=utf-8"))
        .header("SOAPAction", SOAP_ACTION)
        .body(envelope.to_string())
        .send()
        .await?;

    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| VclibError::connection(format!("Failed to read {method} response: {e}")))?;
    trace!("vim25 response #{req_id}: status={status}, {} bytes", text.len());

    if !text.trim_start().starts_with('<') {
        return Err(VclibError::new(
            crate::error::VclibErrorKind::Http(status.as_u16()),
            format!("{method} failed (HTTP {}): {}", status.as_u16(), excerpt(&text)),
        ));
    }

    let doc = xml::parse(&text)?;
    let body = doc
        .child("Body")
        .ok_or_else(|| VclibError::parse(format!("{method} response has no SOAP body")))?;

    if let Some(fault) = body.child("Fault") {
        return Err(fault_from_xml(fault));
    }
    if !status.is_success() {
        return Err(VclibError::new(
            crate::error::VclibErrorKind::Http(status.as_u16()),
            format!("{method} failed (HTTP {})", status.as_u16()),
        ));
    }

    body.children
        .first()
        .cloned()
        .ok_or_else(|| VclibError::parse(format!("{method} response body is empty")))
}

// ─── Response parsing ────────────────────────────────────────────────

/// The first characters of a non-SOAP response body, for error messages.
fn excerpt(text: &str) -> String {
    text.chars().take(BODY_EXCERPT_CHARS).collect()
}

fn fault_from_xml(fault: &XmlElement) -> VclibError {
    let message = fault.child_text("faultstring").unwrap_or_default().to_string();
    let fault_type = fault
        .child("detail")
        .and_then(|d| d.children.first())
        .map(|f| {
            f.xsi_type()
                .map(str::to_string)
                .unwrap_or_else(|| f.name.trim_end_matches("Fault").to_string())
        })
        .unwrap_or_else(|| "SystemError".to_string());
    debug!("vim25 fault {fault_type}: {message}");
    VclibError::fault(&fault_type, message)
}

fn reference_from_xml(el: &XmlElement) -> Option<ManagedObjectReference> {
    let type_name = el.attr("type")?;
    if el.text.is_empty() {
        return None;
    }
    Some(ManagedObjectReference::new(type_name, el.text.clone()))
}

/// Decode a property value. `xsd:*` scalars and enum values stay text,
/// elements carrying a `type` attribute are references, everything else is
/// a data object.
pub(crate) fn value_from_xml(el: &XmlElement) -> VimValue {
    let xsi = el.xsi_type();
    if el.children.is_empty() {
        if let Some(r) = reference_from_xml(el) {
            return VimValue::Reference(r);
        }
        let scalar = !el.text.is_empty() || xsi.map_or(true, |t| t.starts_with("xsd:"));
        if scalar {
            return VimValue::Text(el.text.clone());
        }
    }
    VimValue::Object {
        type_name: xsi.map(str::to_string),
        fields: el
            .children
            .iter()
            .map(|c| (c.name.clone(), value_from_xml(c)))
            .collect(),
    }
}

fn object_content_from_xml(el: &XmlElement) -> VclibResult<ObjectContent> {
    let obj = el
        .child("obj")
        .and_then(reference_from_xml)
        .ok_or_else(|| VclibError::parse("ObjectContent without obj"))?;

    let mut properties = BTreeMap::new();
    for prop in el.children_named("propSet") {
        let Some(name) = prop.child_text("name") else { continue };
        if let Some(val) = prop.child("val") {
            properties.insert(name.to_string(), value_from_xml(val));
        }
    }
    for missing in el.children_named("missingSet") {
        debug!(
            "Property {} of {obj} unavailable",
            missing.child_text("path").unwrap_or_default()
        );
    }
    Ok(ObjectContent { obj, properties })
}
