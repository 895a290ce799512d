// Blocking HTTP layer + directory-listing helpers
//
// The portal serves plain autoindex pages; the only HTML the pipeline needs
// to understand is "every href attribute on the page". Parent-reference and
// query-string links are sort/navigation noise and are excluded up front.

use std::time::Duration;

use encoding_rs::WINDOWS_1252;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

pub struct HttpClient {
    /// 30s class: directory listings and metadata
    listing: reqwest::blocking::Client,
    /// 60s class: archives and the registry snapshot
    bulk: reqwest::blocking::Client,
}

impl HttpClient {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let build = |secs: u64| {
            reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(secs))
                .build()
        };
        let listing = build(config.listing_timeout_secs)
            .map_err(|e| PipelineError::fetch(&config.base_url, e))?;
        let bulk = build(config.download_timeout_secs)
            .map_err(|e| PipelineError::fetch(&config.base_url, e))?;
        Ok(HttpClient { listing, bulk })
    }

    /// Fetch a listing/metadata page as text (30s timeout class).
    pub fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .listing
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::fetch(url, e))?;
        response.text().map_err(|e| PipelineError::fetch(url, e))
    }

    /// Fetch a bulk resource as raw bytes (60s timeout class).
    pub fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .bulk
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::fetch(url, e))?;
        let bytes = response.bytes().map_err(|e| PipelineError::fetch(url, e))?;
        Ok(bytes.to_vec())
    }

    /// List the usable links of a directory page.
    pub fn list_links(&self, url: &str) -> Result<Vec<String>> {
        let body = self.get_text(url)?;
        Ok(extract_hrefs(&body))
    }
}

/// Pull every href attribute out of an HTML page, excluding parent-reference
/// (`../`) and query-string (`?C=M;O=A` style) links.
pub fn extract_hrefs(html: &str) -> Vec<String> {
    let lower = html.to_ascii_lowercase();
    let bytes = html.as_bytes();
    let mut links = Vec::new();
    let mut pos = 0;

    while let Some(found) = lower[pos..].find("href=") {
        let mut i = pos + found + "href=".len();
        pos = i;
        if i >= bytes.len() {
            break;
        }
        let quote = bytes[i];
        let end = if quote == b'"' || quote == b'\'' {
            i += 1;
            match html[i..].find(quote as char) {
                Some(q) => i + q,
                None => continue,
            }
        } else {
            // Unquoted attribute value: runs to whitespace or tag close
            match html[i..].find(|c: char| c.is_ascii_whitespace() || c == '>') {
                Some(q) => i + q,
                None => html.len(),
            }
        };
        let href = html[i..end].trim();
        if href.is_empty() || href == "../" || href.starts_with('?') {
            continue;
        }
        links.push(href.to_string());
        pos = end;
    }

    links
}

/// Resolve a listing href against its page URL. Directory pages always end
/// in `/`, so relative resolution is plain concatenation.
pub fn join_url(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if let Some(rest) = href.strip_prefix('/') {
        // Host-absolute path: keep scheme + authority from the base
        if let Some(scheme_end) = base.find("://") {
            let authority_end = base[scheme_end + 3..]
                .find('/')
                .map(|i| scheme_end + 3 + i)
                .unwrap_or(base.len());
            return format!("{}/{}", &base[..authority_end], rest);
        }
    }
    if base.ends_with('/') {
        format!("{}{}", base, href)
    } else {
        format!("{}/{}", base, href)
    }
}

/// Decode a downloaded body with an ordered candidate list: strict Latin-1
/// (the portal's documented encoding) first, then Windows-1252 with
/// replacement of undecodable bytes. The publisher's encoding is not stable
/// across runs, so the final candidate never fails.
pub fn decode_body(bytes: &[u8]) -> (String, &'static str) {
    if let Some(text) = WINDOWS_1252.decode_without_bom_handling_and_without_replacement(bytes) {
        return (text.into_owned(), "latin-1");
    }
    let (text, _, _) = WINDOWS_1252.decode(bytes);
    (text.into_owned(), "windows-1252 (lossy)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_hrefs_basic() {
        let html = r#"<html><body>
            <a href="../">Parent Directory</a>
            <a href="?C=N;O=D">Name</a>
            <a href="2023/">2023/</a>
            <a href="2024/">2024/</a>
            <a href='demonstracoes_contabeis/'>demo</a>
        </body></html>"#;
        let links = extract_hrefs(html);
        assert_eq!(
            links,
            vec!["2023/", "2024/", "demonstracoes_contabeis/"]
        );
    }

    #[test]
    fn test_extract_hrefs_excludes_parent_and_query() {
        let links = extract_hrefs(r#"<a href="../"></a><a href="?sort=asc"></a>"#);
        assert!(links.is_empty());
    }

    #[test]
    fn test_extract_hrefs_unquoted() {
        let links = extract_hrefs("<a href=1T2024.zip>zip</a>");
        assert_eq!(links, vec!["1T2024.zip"]);
    }

    #[test]
    fn test_join_url_relative() {
        assert_eq!(
            join_url("https://example.org/FTP/PDA/", "2024/"),
            "https://example.org/FTP/PDA/2024/"
        );
    }

    #[test]
    fn test_join_url_absolute_passthrough() {
        assert_eq!(
            join_url("https://example.org/FTP/", "https://mirror.org/file.zip"),
            "https://mirror.org/file.zip"
        );
    }

    #[test]
    fn test_join_url_host_absolute() {
        assert_eq!(
            join_url("https://example.org/FTP/PDA/", "/FTP/other/file.csv"),
            "https://example.org/FTP/other/file.csv"
        );
    }

    #[test]
    fn test_decode_body_latin1() {
        // "OPERADORA SAÚDE" in Latin-1
        let bytes = b"OPERADORA SA\xDADE";
        let (text, encoding) = decode_body(bytes);
        assert_eq!(text, "OPERADORA SAÚDE");
        assert_eq!(encoding, "latin-1");
    }
}
