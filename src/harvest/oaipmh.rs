//! OAI-PMH adapter: `ListRecords` with resumption-token paging.
//!
//! Elements are matched on local names, so both namespace-qualified
//! (`dc:title`) and unqualified (`title`) documents resolve identically.
//! Repository identifiers found inside `<metadata>` are preferred over
//! the OAI `<header>` identifier when picking a record URL.

use std::collections::HashMap;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, instrument, warn};

use crate::http::RetryClient;
use crate::model::{NormalizedRecord, Protocol, Source};
use crate::normalize::{classify_resource_type, normalize_language, normalize_url};

use super::{FetchOutcome, HarvestError, Harvester};

/// Default `metadataPrefix` when the source does not configure one.
const DEFAULT_METADATA_PREFIX: &str = "oai_dc";

/// Harvests an OAI-PMH repository.
pub struct OaiPmhHarvester {
    endpoint: String,
    metadata_prefix: String,
    headers: HashMap<String, String>,
    params: Vec<(String, String)>,
    client: RetryClient,
}

impl OaiPmhHarvester {
    /// Builds the adapter from a source row.
    #[must_use]
    pub fn from_source(source: &Source, client: RetryClient) -> Self {
        Self {
            endpoint: source.endpoint.clone(),
            metadata_prefix: source
                .metadata_prefix
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_METADATA_PREFIX.to_string()),
            headers: source.headers(),
            params: source.params().into_iter().collect(),
            client,
        }
    }

    async fn fetch_page(
        &self,
        query: &[(String, String)],
    ) -> Result<ParsedPage, HarvestError> {
        let response = self.client.get(&self.endpoint, &self.headers, query).await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !response.status().is_success() {
            return Err(HarvestError::Endpoint {
                url: self.endpoint.clone(),
                status,
                content_type,
            });
        }

        let body = response.bytes().await.map_err(|e| {
            HarvestError::parse(&self.endpoint, e.to_string(), Some(status), content_type.clone())
        })?;

        // Some repositories front their OAI endpoint with an HTML shell;
        // the envelope is still embedded and can be recovered.
        let looks_html = content_type.as_deref().is_some_and(|ct| ct.contains("html"))
            || looks_like_html(&body);
        let xml: &[u8] = if looks_html {
            match extract_oai_envelope(&body) {
                Some(envelope) => {
                    warn!("recovered OAI-PMH envelope from HTML response");
                    envelope
                }
                None => {
                    return Err(HarvestError::parse(
                        &self.endpoint,
                        "non-XML response with no OAI-PMH envelope",
                        Some(status),
                        content_type,
                    ));
                }
            }
        } else {
            &body
        };

        parse_list_records(xml).map_err(|detail| {
            HarvestError::parse(&self.endpoint, detail, Some(status), content_type)
        })
    }
}

#[async_trait]
impl Harvester for OaiPmhHarvester {
    fn name(&self) -> &'static str {
        "oai_pmh"
    }

    fn protocol(&self) -> Protocol {
        Protocol::OaiPmh
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn fetch_records(&self) -> Result<FetchOutcome, HarvestError> {
        let mut outcome = FetchOutcome::default();
        let mut token: Option<String> = None;

        loop {
            // Continuation requests carry only the token, per protocol.
            let query: Vec<(String, String)> = match &token {
                Some(value) => vec![
                    ("verb".to_string(), "ListRecords".to_string()),
                    ("resumptionToken".to_string(), value.clone()),
                ],
                None => {
                    let mut q = vec![
                        ("verb".to_string(), "ListRecords".to_string()),
                        ("metadataPrefix".to_string(), self.metadata_prefix.clone()),
                    ];
                    q.extend(self.params.iter().cloned());
                    q
                }
            };

            let page = self.fetch_page(&query).await?;
            outcome.pages_processed += 1;

            if let Some(code) = page.error_code {
                // An empty result set is a valid outcome, not a failure.
                if code == "noRecordsMatch" {
                    debug!("repository reported noRecordsMatch");
                    break;
                }
                return Err(HarvestError::parse(
                    &self.endpoint,
                    format!("OAI-PMH error '{code}': {}", page.error_message),
                    None,
                    None,
                ));
            }

            debug!(
                page = outcome.pages_processed,
                records = page.records.len(),
                "parsed OAI-PMH page"
            );
            outcome.records.extend(page.records);
            outcome.skipped += page.skipped;

            match page.resumption_token.filter(|t| !t.is_empty()) {
                Some(next) => {
                    if token.as_deref() == Some(next.as_str()) {
                        warn!("repository repeated its resumption token, stopping");
                        break;
                    }
                    token = Some(next);
                }
                None => break,
            }
        }

        Ok(outcome)
    }

    /// Sends `verb=Identify`, the cheapest valid OAI-PMH request.
    async fn test_connection(&self) -> bool {
        let query = vec![("verb".to_string(), "Identify".to_string())];
        match self.client.get(&self.endpoint, &self.headers, &query).await {
            Ok(response) => response.status().as_u16() == 200,
            Err(error) => {
                warn!(error = %error, "OAI-PMH connection test failed");
                false
            }
        }
    }
}

/// One parsed `ListRecords` response.
#[derive(Debug, Default)]
struct ParsedPage {
    records: Vec<NormalizedRecord>,
    skipped: i64,
    resumption_token: Option<String>,
    error_code: Option<String>,
    error_message: String,
}

/// Dublin Core fields accumulated for one `<record>`.
#[derive(Debug, Default)]
struct RecordBuilder {
    title: String,
    description: String,
    publisher: String,
    language: String,
    rights: String,
    subject: String,
    raw_type: String,
    creators: Vec<String>,
    metadata_identifiers: Vec<String>,
    header_identifiers: Vec<String>,
}

impl RecordBuilder {
    fn finish(self) -> NormalizedRecord {
        let url = pick_url(&self.metadata_identifiers)
            .or_else(|| pick_url(&self.header_identifiers))
            .unwrap_or_default();
        NormalizedRecord {
            title: self.title,
            url,
            description: self.description,
            license: self.rights,
            publisher: self.publisher,
            author: self.creators.join(", "),
            language: normalize_language(&self.language),
            subject: self.subject,
            normalized_type: classify_resource_type(&self.raw_type),
            resource_type: self.raw_type,
            ..NormalizedRecord::default()
        }
    }
}

/// Element currently capturing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Title,
    Identifier,
    Description,
    Creator,
    Publisher,
    Language,
    Rights,
    Subject,
    Type,
    ResumptionToken,
    Error,
}

/// Streaming parse of a `ListRecords` response.
fn parse_list_records(xml: &[u8]) -> Result<ParsedPage, String> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut page = ParsedPage::default();
    let mut buf = Vec::new();
    let mut builder: Option<RecordBuilder> = None;
    let mut in_header = false;
    let mut in_metadata = false;
    let mut capture: Option<Capture> = None;
    let mut saw_envelope = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"OAI-PMH" => saw_envelope = true,
                    b"record" => builder = Some(RecordBuilder::default()),
                    b"header" => in_header = true,
                    b"metadata" => in_metadata = true,
                    b"resumptionToken" => capture = Some(Capture::ResumptionToken),
                    b"error" => {
                        capture = Some(Capture::Error);
                        for attr in e.attributes().flatten() {
                            if attr.key.local_name().as_ref() == b"code" {
                                page.error_code = Some(
                                    String::from_utf8_lossy(&attr.value).into_owned(),
                                );
                            }
                        }
                    }
                    other if builder.is_some() => {
                        capture = match other {
                            b"title" => Some(Capture::Title),
                            b"identifier" => Some(Capture::Identifier),
                            b"description" => Some(Capture::Description),
                            b"creator" | b"contributor" => Some(Capture::Creator),
                            b"publisher" => Some(Capture::Publisher),
                            b"language" => Some(Capture::Language),
                            b"rights" => Some(Capture::Rights),
                            b"subject" => Some(Capture::Subject),
                            b"type" => Some(Capture::Type),
                            _ => None,
                        };
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref t)) => {
                let Some(field) = capture else { continue };
                let text = t.unescape().map_err(|e| e.to_string())?.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                match field {
                    Capture::ResumptionToken => page.resumption_token = Some(text),
                    Capture::Error => page.error_message = text,
                    _ => {
                        if let Some(b) = builder.as_mut() {
                            apply_field(b, field, text, in_header, in_metadata);
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                match e.local_name().as_ref() {
                    b"record" => {
                        if let Some(b) = builder.take() {
                            let record = b.finish();
                            if record.is_acceptable() {
                                page.records.push(record);
                            } else {
                                page.skipped += 1;
                            }
                        }
                    }
                    b"header" => in_header = false,
                    b"metadata" => in_metadata = false,
                    _ => {}
                }
                capture = None;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(format!("malformed XML: {e}")),
        }
        buf.clear();
    }

    if !saw_envelope {
        return Err("missing OAI-PMH envelope".to_string());
    }
    Ok(page)
}

fn apply_field(b: &mut RecordBuilder, field: Capture, text: String, in_header: bool, in_metadata: bool) {
    match field {
        Capture::Title if b.title.is_empty() => b.title = text,
        Capture::Identifier => {
            if in_metadata {
                b.metadata_identifiers.push(text);
            } else if in_header {
                b.header_identifiers.push(text);
            } else {
                b.metadata_identifiers.push(text);
            }
        }
        Capture::Description if b.description.is_empty() => b.description = text,
        Capture::Creator => b.creators.push(text),
        Capture::Publisher if b.publisher.is_empty() => b.publisher = text,
        Capture::Language if b.language.is_empty() => b.language = text,
        Capture::Rights if b.rights.is_empty() => b.rights = text,
        Capture::Subject if b.subject.is_empty() => b.subject = text,
        Capture::Type if b.raw_type.is_empty() => b.raw_type = text,
        _ => {}
    }
}

/// Picks a record URL from DC identifiers: http(s) only, PDF preferred.
fn pick_url(identifiers: &[String]) -> Option<String> {
    let web: Vec<String> = identifiers
        .iter()
        .map(|id| normalize_url(id))
        .filter(|u| !u.is_empty())
        .collect();
    web.iter()
        .find(|u| u.to_lowercase().contains(".pdf"))
        .or_else(|| web.first())
        .cloned()
}

fn looks_like_html(body: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&body[..body.len().min(256)]).to_lowercase();
    head.contains("<html") || head.contains("<!doctype html")
}

/// Recovers the `<OAI-PMH>...</OAI-PMH>` envelope embedded in HTML.
fn extract_oai_envelope(body: &[u8]) -> Option<&[u8]> {
    let text = std::str::from_utf8(body).ok()?;
    let start = text.find("<OAI-PMH")?;
    let end = text.find("</OAI-PMH>")?;
    if end < start {
        return None;
    }
    Some(&body[start..end + "</OAI-PMH>".len()])
}
