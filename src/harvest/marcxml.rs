//! MARC21-XML adapter.
//!
//! Two-tier parse: a strict pass first, then a lenient pass that keeps
//! whatever parsed before the first structural error. Feeds from book
//! dump endpoints, so records default to the book type.

use std::collections::HashMap;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Method;
use tracing::{debug, instrument, warn};

use crate::http::RetryClient;
use crate::model::{NormalizedRecord, Protocol, Source};
use crate::normalize::{classify_resource_type, normalize_language, normalize_url};

use super::{FetchOutcome, HarvestError, Harvester};

/// Datafield tags the normalizer consumes.
const INTERESTING_TAGS: [&str; 8] = ["245", "100", "700", "264", "260", "856", "020", "520"];

/// Harvests a MARC21-XML dump.
pub struct MarcxmlHarvester {
    endpoint: String,
    headers: HashMap<String, String>,
    params: Vec<(String, String)>,
    client: RetryClient,
}

impl MarcxmlHarvester {
    /// Builds the adapter from a source row.
    #[must_use]
    pub fn from_source(source: &Source, client: RetryClient) -> Self {
        let mut headers = source.headers();
        headers
            .entry("Accept".to_string())
            .or_insert_with(|| "application/xml".to_string());
        Self {
            endpoint: source.endpoint.clone(),
            headers,
            params: source.params().into_iter().collect(),
            client,
        }
    }
}

#[async_trait]
impl Harvester for MarcxmlHarvester {
    fn name(&self) -> &'static str {
        "marcxml"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Marcxml
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn fetch_records(&self) -> Result<FetchOutcome, HarvestError> {
        let response = self.client.get(&self.endpoint, &self.headers, &self.params).await?;
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

        let (records, skipped) = match parse_records(&body, ParseMode::Strict) {
            Ok(parsed) => parsed,
            Err(strict_error) => {
                warn!(error = %strict_error, "strict MARCXML parse failed, retrying leniently");
                let (records, skipped) = parse_records(&body, ParseMode::Lenient)
                    .map_err(|_| {
                        HarvestError::parse(
                            &self.endpoint,
                            format!("unparseable MARCXML: {strict_error}"),
                            Some(status),
                            content_type.clone(),
                        )
                    })?;
                if records.is_empty() {
                    return Err(HarvestError::parse(
                        &self.endpoint,
                        format!("unparseable MARCXML: {strict_error}"),
                        Some(status),
                        content_type,
                    ));
                }
                (records, skipped)
            }
        };

        debug!(records = records.len(), skipped, "parsed MARCXML dump");
        Ok(FetchOutcome {
            records,
            pages_processed: 1,
            skipped,
        })
    }

    /// Probes with HEAD first; falls back to sniffing a GET body for
    /// MARC markers when the server rejects or mislabels HEAD.
    async fn test_connection(&self) -> bool {
        if let Ok(response) = self
            .client
            .execute(Method::HEAD, &self.endpoint, &self.headers, &self.params)
            .await
        {
            let ct = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if response.status().as_u16() == 200 && (ct.contains("xml") || ct.contains("text")) {
                return true;
            }
        }

        match self.client.get(&self.endpoint, &self.headers, &self.params).await {
            Ok(response) if response.status().as_u16() == 200 => {
                let Ok(body) = response.bytes().await else { return false };
                let head = String::from_utf8_lossy(&body[..body.len().min(4096)]).to_lowercase();
                head.contains("<record") || head.contains("<collection") || head.contains("<marc")
            }
            Ok(_) => false,
            Err(error) => {
                warn!(error = %error, "MARCXML connection test failed");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseMode {
    /// Any XML error aborts the parse.
    Strict,
    /// Mismatched end tags are tolerated; a fatal error keeps the
    /// records parsed so far.
    Lenient,
}

/// Raw fields gathered for one `<record>`.
#[derive(Debug, Default)]
struct MarcFields {
    /// (tag, subfield code, text) triples for interesting datafields.
    subfields: Vec<(String, String, String)>,
    /// Fixed-length control field 008.
    control_008: String,
}

/// Streams `<record>` elements out of a MARCXML document.
fn parse_records(xml: &[u8], mode: ParseMode) -> Result<(Vec<NormalizedRecord>, i64), String> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    if mode == ParseMode::Lenient {
        reader.config_mut().check_end_names = false;
    }

    let mut records = Vec::new();
    let mut skipped: i64 = 0;
    let mut buf = Vec::new();
    let mut current: Option<MarcFields> = None;
    let mut datafield_tag: Option<String> = None;
    let mut subfield_code: Option<String> = None;
    let mut in_control_008 = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"record" => current = Some(MarcFields::default()),
                b"datafield" if current.is_some() => {
                    let tag = attribute(e, b"tag");
                    datafield_tag = INTERESTING_TAGS
                        .contains(&tag.as_str())
                        .then_some(tag);
                }
                b"subfield" if datafield_tag.is_some() => {
                    subfield_code = Some(attribute(e, b"code"));
                }
                b"controlfield" if current.is_some() => {
                    in_control_008 = attribute(e, b"tag") == "008";
                }
                _ => {}
            },
            Ok(Event::Text(ref t)) => {
                let text = match t.unescape() {
                    Ok(cow) => cow.trim().to_string(),
                    Err(e) if mode == ParseMode::Strict => return Err(e.to_string()),
                    Err(_) => continue,
                };
                let Some(fields) = current.as_mut() else { continue };
                if in_control_008 {
                    fields.control_008 = text;
                } else if let (Some(tag), Some(code)) = (&datafield_tag, &subfield_code) {
                    if !text.is_empty() {
                        fields.subfields.push((tag.clone(), code.clone(), text));
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"record" => {
                    if let Some(fields) = current.take() {
                        match build_record(&fields) {
                            Some(record) => records.push(record),
                            None => skipped += 1,
                        }
                    }
                    datafield_tag = None;
                    subfield_code = None;
                    in_control_008 = false;
                }
                b"datafield" => datafield_tag = None,
                b"subfield" => subfield_code = None,
                b"controlfield" => in_control_008 = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                if mode == ParseMode::Strict {
                    return Err(format!("malformed XML: {e}"));
                }
                warn!(error = %e, "lenient MARCXML parse stopped early");
                break;
            }
        }
        buf.clear();
    }

    Ok((records, skipped))
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> String {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
        .unwrap_or_default()
}

/// Assembles a normalized record from MARC fields.
///
/// Records without a usable 856$u web link are rejected; title falls
/// back to the ISBN so identifier-only records stay recognizable.
fn build_record(fields: &MarcFields) -> Option<NormalizedRecord> {
    let first = |tag: &str, code: &str| {
        fields
            .subfields
            .iter()
            .find(|(t, c, _)| t == tag && c == code)
            .map(|(_, _, v)| v.clone())
    };

    let url = first("856", "u").map(|u| normalize_url(&u)).unwrap_or_default();
    if url.is_empty() {
        return None;
    }

    let isbn = first("020", "a")
        .map(|v| v.split_whitespace().next().unwrap_or("").to_string())
        .unwrap_or_default();

    let title = first("245", "a")
        .map(|t| t.trim_end_matches(['/', ':', ' ']).to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| (!isbn.is_empty()).then(|| isbn.clone()))
        .unwrap_or_else(|| "Untitled".to_string());

    let authors: Vec<String> = fields
        .subfields
        .iter()
        .filter(|(t, c, _)| (t == "100" || t == "700") && c == "a")
        .map(|(_, _, v)| v.trim_end_matches([',', ' ']).to_string())
        .collect();

    let publisher = first("264", "b")
        .or_else(|| first("260", "b"))
        .or_else(|| first("264", "c"))
        .or_else(|| first("260", "c"))
        .unwrap_or_default();

    let language_code: String = fields.control_008.chars().skip(35).take(3).collect();

    Some(NormalizedRecord {
        title,
        url,
        description: first("520", "a").unwrap_or_default(),
        publisher,
        author: authors.join(", "),
        language: normalize_language(&language_code),
        isbn,
        normalized_type: classify_resource_type("book"),
        resource_type: "book".to_string(),
        ..NormalizedRecord::default()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::normalize::ResourceType;

    const DUMP: &str = r#"<?xml version="1.0"?>
<collection xmlns="http://www.loc.gov/MARC21/slim">
  <record>
    <controlfield tag="008">210101s2021    xxu           000 0 eng d</controlfield>
    <datafield tag="020" ind1=" " ind2=" ">
      <subfield code="a">9783161484100 (pbk.)</subfield>
    </datafield>
    <datafield tag="100" ind1="1" ind2=" ">
      <subfield code="a">Doe, Jan,</subfield>
    </datafield>
    <datafield tag="245" ind1="1" ind2="0">
      <subfield code="a">Open Linguistics :</subfield>
      <subfield code="b">an introduction /</subfield>
    </datafield>
    <datafield tag="264" ind1=" " ind2="1">
      <subfield code="b">Language Science Press,</subfield>
      <subfield code="c">2021.</subfield>
    </datafield>
    <datafield tag="520" ind1=" " ind2=" ">
      <subfield code="a">A free introduction to linguistics.</subfield>
    </datafield>
    <datafield tag="700" ind1="1" ind2=" ">
      <subfield code="a">Roe, Sam</subfield>
    </datafield>
    <datafield tag="856" ind1="4" ind2="0">
      <subfield code="u">https://langsci-press.org/catalog/book/1</subfield>
    </datafield>
  </record>
  <record>
    <datafield tag="245" ind1="1" ind2="0">
      <subfield code="a">No Link Record</subfield>
    </datafield>
  </record>
</collection>"#;

    #[test]
    fn test_parse_strict_extracts_marc_fields() {
        let (records, skipped) = parse_records(DUMP.as_bytes(), ParseMode::Strict).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(skipped, 1);

        let record = &records[0];
        assert_eq!(record.title, "Open Linguistics");
        assert_eq!(record.url, "https://langsci-press.org/catalog/book/1");
        assert_eq!(record.author, "Doe, Jan, Roe, Sam");
        assert_eq!(record.publisher, "Language Science Press,");
        assert_eq!(record.isbn, "9783161484100");
        assert_eq!(record.language, "en");
        assert_eq!(record.description, "A free introduction to linguistics.");
        assert_eq!(record.normalized_type, ResourceType::Book);
    }

    #[test]
    fn test_strict_rejects_malformed_lenient_recovers() {
        // First record complete, then a mismatched end tag.
        let broken = DUMP.replace("</collection>", "<record><datafield></record></collection>");
        assert!(parse_records(broken.as_bytes(), ParseMode::Strict).is_err());

        let (records, _) = parse_records(broken.as_bytes(), ParseMode::Lenient).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Open Linguistics");
    }

    #[test]
    fn test_title_falls_back_to_isbn() {
        let fields = MarcFields {
            subfields: vec![
                ("020".into(), "a".into(), "9781234567897".into()),
                ("856".into(), "u".into(), "https://example.org/book".into()),
            ],
            control_008: String::new(),
        };
        let record = build_record(&fields).unwrap();
        assert_eq!(record.title, "9781234567897");
        assert_eq!(record.language, "en");
    }

    #[test]
    fn test_record_without_web_link_rejected() {
        let fields = MarcFields {
            subfields: vec![
                ("245".into(), "a".into(), "Title".into()),
                ("856".into(), "u".into(), "ftp://example.org/book".into()),
            ],
            control_008: String::new(),
        };
        assert!(build_record(&fields).is_none());
    }

    #[test]
    fn test_language_from_control_008() {
        let fields = MarcFields {
            subfields: vec![("856".into(), "u".into(), "https://x.org".into())],
            control_008: "210101s2021    gw            000 0 ger d".to_string(),
        };
        let record = build_record(&fields).unwrap();
        assert_eq!(record.language, "de");
    }
}
