//! Catalog retrieval, caching and merging.
//!
//! Locations are processed in configuration order: plain `overlays` entries,
//! then clear-signed lists, then detached-signature pairs. Each one is merged
//! into the catalog after the ones before it, so a later location overrides
//! an earlier one for the same overlay name.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::common::fs::write_atomic;
use crate::common::progress;
use crate::overlay::catalog::Catalog;
use crate::overlay::config::Config;
use crate::overlay::document::{ParsedDocument, parse_document};
use crate::overlay::error::{LocationFailure, OverlayError, OverlayResult};
use crate::overlay::signature::SignatureVerifier;
use crate::overlay::transport::{FetchOutcome, Transport, local_path};
use crate::ui::prelude::*;

/// One configured catalog location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogLocation {
    Plain(String),
    ClearSigned(String),
    Detached { list: String, signature: String },
}

impl CatalogLocation {
    pub fn url(&self) -> &str {
        match self {
            CatalogLocation::Plain(url) | CatalogLocation::ClearSigned(url) => url,
            CatalogLocation::Detached { list, .. } => list,
        }
    }

    pub fn all(config: &Config) -> Vec<CatalogLocation> {
        let plain = config.overlays.iter().cloned().map(CatalogLocation::Plain);
        let signed = config
            .gpg_signed_lists
            .iter()
            .cloned()
            .map(CatalogLocation::ClearSigned);
        let detached = config
            .gpg_detached_lists
            .iter()
            .map(|(list, signature)| CatalogLocation::Detached {
                list: list.clone(),
                signature: signature.clone(),
            });
        plain.chain(signed).chain(detached).collect()
    }
}

/// Merged catalog plus what went wrong along the way.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub catalog: Catalog,
    /// Recoverable problems: stale caches, skipped entries
    pub warnings: Vec<String>,
    /// Locations that contributed nothing
    pub failures: Vec<LocationFailure>,
    /// Locations whose cache was refreshed with new content
    pub refreshed: usize,
}

impl FetchReport {
    fn absorb(&mut self, parsed: ParsedDocument) {
        for skipped in &parsed.skipped {
            emit(Level::Warn, "overlay.fetch.entry_skipped", skipped, None);
        }
        self.warnings.extend(parsed.skipped);
        self.catalog.merge(parsed.overlays.into_iter().collect());
    }
}

enum RefreshError {
    Signature(String),
    Other(String),
}

/// Cache file paths for a location.
pub fn cache_paths(cache_dir: &Path, url: &str) -> (PathBuf, PathBuf) {
    let key = format!("{:x}", Sha256::digest(url.as_bytes()));
    (
        cache_dir.join(format!("{key}.xml")),
        cache_dir.join(format!("{key}.timestamp")),
    )
}

pub struct CatalogFetcher<'a> {
    config: &'a Config,
    transport: &'a dyn Transport,
    verifier: &'a dyn SignatureVerifier,
}

impl<'a> CatalogFetcher<'a> {
    pub fn new(
        config: &'a Config,
        transport: &'a dyn Transport,
        verifier: &'a dyn SignatureVerifier,
    ) -> Self {
        Self {
            config,
            transport,
            verifier,
        }
    }

    /// Build the merged catalog. With `refresh` unset only cached copies and
    /// local directories are read.
    pub fn fetch(&self, refresh: bool) -> OverlayResult<FetchReport> {
        let locations = CatalogLocation::all(self.config);
        let mut report = FetchReport::default();
        let mut contributed = 0usize;

        for location in &locations {
            let url = location.url();

            if let CatalogLocation::Plain(raw) = location
                && let Some(dir) = local_path(raw).filter(|p| p.is_dir())
            {
                if self.merge_directory(&dir, &mut report) {
                    contributed += 1;
                } else {
                    report.failures.push(LocationFailure {
                        location: url.to_string(),
                        reason: "directory holds no readable overlay definitions".into(),
                    });
                }
                continue;
            }

            let (cache_file, _) = cache_paths(&self.config.cache, url);
            let fresh = if refresh {
                match self.refresh_location(location) {
                    Ok(text) => text,
                    Err(RefreshError::Signature(message)) => {
                        let err = OverlayError::Signature {
                            location: url.to_string(),
                            message: message.clone(),
                        };
                        emit(Level::Error, "overlay.fetch.signature", &err.to_string(), None);
                        report.failures.push(LocationFailure {
                            location: url.to_string(),
                            reason: format!("signature verification failed: {message}"),
                        });
                        continue;
                    }
                    Err(RefreshError::Other(reason)) => {
                        let warning = format!("Failed to fetch {url}: {reason}");
                        emit(Level::Warn, "overlay.fetch.failed", &warning, None);
                        report.warnings.push(warning);
                        None
                    }
                }
            } else {
                None
            };

            if fresh.is_some() {
                report.refreshed += 1;
            }

            let text = match fresh {
                Some(text) => text,
                None => match fs::read_to_string(&cache_file) {
                    Ok(text) => text,
                    Err(_) => {
                        let reason = if refresh {
                            "download failed and no cached copy exists".to_string()
                        } else {
                            "not fetched yet (no cached copy)".to_string()
                        };
                        report.failures.push(LocationFailure {
                            location: url.to_string(),
                            reason,
                        });
                        continue;
                    }
                },
            };

            match parse_document(&text, url) {
                Ok(parsed) => {
                    report.absorb(parsed);
                    contributed += 1;
                }
                Err(e) => report.failures.push(LocationFailure {
                    location: url.to_string(),
                    reason: e.to_string(),
                }),
            }
        }

        if contributed == 0 {
            if locations.is_empty() {
                return Err(OverlayError::CatalogUnavailable(vec![LocationFailure {
                    location: "(none)".into(),
                    reason: "no catalog locations are configured".into(),
                }]));
            }
            return Err(OverlayError::CatalogUnavailable(report.failures));
        }

        emit(
            Level::Debug,
            "overlay.fetch.merged",
            &format!(
                "Merged {} overlays from {contributed} of {} locations",
                report.catalog.len(),
                locations.len()
            ),
            Some(json!({
                "overlays": report.catalog.len(),
                "locations": locations.len(),
                "contributed": contributed,
            })),
        );
        Ok(report)
    }

    /// Merge each file of a definition directory, in filesystem order.
    fn merge_directory(&self, dir: &Path, report: &mut FetchReport) -> bool {
        let mut merged_any = false;
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let origin = path.display().to_string();
            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    report.warnings.push(format!("{origin}: {e}"));
                    continue;
                }
            };
            match parse_document(&text, &origin) {
                Ok(parsed) => {
                    report.absorb(parsed);
                    merged_any = true;
                }
                Err(e) => report.warnings.push(e.to_string()),
            }
        }
        merged_any
    }

    /// Download a location. `Ok(None)` means the cached copy is current.
    fn refresh_location(&self, location: &CatalogLocation) -> Result<Option<String>, RefreshError> {
        let url = location.url();
        let (cache_file, stamp_file) = cache_paths(&self.config.cache, url);

        let since = if cache_file.exists() {
            fs::read_to_string(&stamp_file)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        } else {
            None
        };

        let pb = progress::create_spinner(format!("Fetching {url}"));
        let outcome = self.transport.fetch(url, since.as_deref());
        progress::finish_spinner(pb);

        let (body, timestamp) = match outcome.map_err(|e| RefreshError::Other(format!("{e:#}")))? {
            FetchOutcome::NotModified => {
                emit(
                    Level::Debug,
                    "overlay.fetch.not_modified",
                    &format!("{url} is unchanged, using cached copy"),
                    None,
                );
                return Ok(None);
            }
            FetchOutcome::Fresh { body, timestamp } => (body, timestamp),
        };

        let body = match location {
            CatalogLocation::Plain(_) => body,
            CatalogLocation::ClearSigned(_) => self
                .verifier
                .verify_clearsigned(&body)
                .map_err(RefreshError::Signature)?,
            CatalogLocation::Detached { signature, .. } => {
                let sig = match self
                    .transport
                    .fetch(signature, None)
                    .map_err(|e| RefreshError::Signature(format!("cannot fetch signature {signature}: {e:#}")))?
                {
                    FetchOutcome::Fresh { body, .. } => body,
                    FetchOutcome::NotModified => {
                        return Err(RefreshError::Signature(format!(
                            "server returned no content for signature {signature}"
                        )));
                    }
                };
                self.verifier
                    .verify_detached(&body, &sig)
                    .map_err(RefreshError::Signature)?;
                body
            }
        };

        let text = String::from_utf8_lossy(&body).into_owned();
        parse_document(&text, url).map_err(|e| RefreshError::Other(e.to_string()))?;

        if let Err(e) = write_atomic(&cache_file, text.as_bytes()) {
            emit(
                Level::Warn,
                "overlay.fetch.cache_write",
                &format!("Could not update cache {}: {e}", cache_file.display()),
                None,
            );
            return Ok(Some(text));
        }
        let stamp_result = match timestamp {
            Some(ts) => write_atomic(&stamp_file, ts.as_bytes()),
            None => match fs::remove_file(&stamp_file) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        };
        if let Err(e) = stamp_result {
            emit(
                Level::Debug,
                "overlay.fetch.timestamp_write",
                &format!("Could not update {}: {e}", stamp_file.display()),
                None,
            );
        }

        emit(
            Level::Debug,
            "overlay.fetch.cached",
            &format!("Cached {url} at {}", cache_file.display()),
            None,
        );
        Ok(Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::{TempDir, tempdir};

    fn repo(name: &str, url: &str) -> String {
        format!(
            r#"<repo><name>{name}</name><description>d</description>
               <owner><email>a@b</email></owner>
               <source type="git">{url}</source></repo>"#
        )
    }

    fn list(entries: &[String]) -> Vec<u8> {
        format!("<repositories>{}</repositories>", entries.join("")).into_bytes()
    }

    #[derive(Default)]
    struct FakeTransport {
        responses: HashMap<String, Result<FetchOutcome, String>>,
        requests: RefCell<Vec<(String, Option<String>)>>,
    }

    impl FakeTransport {
        fn serve(mut self, url: &str, body: Vec<u8>, timestamp: Option<&str>) -> Self {
            self.responses.insert(
                url.to_string(),
                Ok(FetchOutcome::Fresh {
                    body,
                    timestamp: timestamp.map(String::from),
                }),
            );
            self
        }

        fn not_modified(mut self, url: &str) -> Self {
            self.responses
                .insert(url.to_string(), Ok(FetchOutcome::NotModified));
            self
        }

        fn fail(mut self, url: &str) -> Self {
            self.responses
                .insert(url.to_string(), Err("connection refused".into()));
            self
        }
    }

    impl Transport for FakeTransport {
        fn fetch(&self, url: &str, since: Option<&str>) -> Result<FetchOutcome> {
            self.requests
                .borrow_mut()
                .push((url.to_string(), since.map(String::from)));
            match self.responses.get(url) {
                Some(Ok(outcome)) => Ok(outcome.clone()),
                Some(Err(e)) => Err(anyhow!(e.clone())),
                None => Err(anyhow!("404 Not Found")),
            }
        }
    }

    struct FakeVerifier {
        accept: bool,
    }

    impl SignatureVerifier for FakeVerifier {
        fn verify_clearsigned(&self, signed: &[u8]) -> Result<Vec<u8>, String> {
            if self.accept {
                Ok(signed.to_vec())
            } else {
                Err("BAD signature".into())
            }
        }

        fn verify_detached(&self, _data: &[u8], _signature: &[u8]) -> Result<(), String> {
            if self.accept {
                Ok(())
            } else {
                Err("BAD signature".into())
            }
        }
    }

    fn config(overlays: &[&str]) -> (TempDir, Config) {
        let dir = tempdir().unwrap();
        let mut config = Config::with_storage(dir.path());
        config.overlays = overlays.iter().map(|s| s.to_string()).collect();
        (dir, config)
    }

    const ACCEPT: FakeVerifier = FakeVerifier { accept: true };

    #[test]
    fn later_location_overrides_earlier_one() {
        let (_dir, config) = config(&["https://a/list.xml", "https://b/list.xml"]);
        let transport = FakeTransport::default()
            .serve("https://a/list.xml", list(&[repo("dup", "https://a/dup"), repo("a-only", "https://a/x")]), None)
            .serve("https://b/list.xml", list(&[repo("dup", "https://b/dup")]), None);

        let report = CatalogFetcher::new(&config, &transport, &ACCEPT)
            .fetch(true)
            .unwrap();
        assert_eq!(report.catalog.len(), 2);
        assert_eq!(report.catalog.get("dup").unwrap().sources[0].url, "https://b/dup");
        assert_eq!(report.refreshed, 2);
    }

    #[test]
    fn one_failing_location_is_not_fatal() {
        let (_dir, config) = config(&["https://down/list.xml", "https://up/list.xml"]);
        let transport = FakeTransport::default()
            .fail("https://down/list.xml")
            .serve("https://up/list.xml", list(&[repo("ok", "https://up/ok")]), None);

        let report = CatalogFetcher::new(&config, &transport, &ACCEPT)
            .fetch(true)
            .unwrap();
        assert!(report.catalog.get("ok").is_some());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].location, "https://down/list.xml");
        assert!(report.warnings.iter().any(|w| w.contains("connection refused")));
    }

    #[test]
    fn no_usable_location_is_catalog_unavailable() {
        let (_dir, config) = config(&["https://down/list.xml"]);
        let transport = FakeTransport::default().fail("https://down/list.xml");
        let err = CatalogFetcher::new(&config, &transport, &ACCEPT)
            .fetch(true)
            .unwrap_err();
        match err {
            OverlayError::CatalogUnavailable(failures) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].reason.contains("no cached copy"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn falls_back_to_cache_when_download_fails() {
        let (_dir, config) = config(&["https://a/list.xml"]);
        let good = FakeTransport::default().serve(
            "https://a/list.xml",
            list(&[repo("cached", "https://a/c")]),
            Some("Tue, 01 Oct 2024 10:00:00 GMT"),
        );
        CatalogFetcher::new(&config, &good, &ACCEPT).fetch(true).unwrap();

        let broken = FakeTransport::default().fail("https://a/list.xml");
        let report = CatalogFetcher::new(&config, &broken, &ACCEPT)
            .fetch(true)
            .unwrap();
        assert!(report.catalog.get("cached").is_some());
        assert_eq!(report.refreshed, 0);
    }

    #[test]
    fn conditional_refresh_sends_cached_timestamp() {
        let (_dir, config) = config(&["https://a/list.xml"]);
        let first = FakeTransport::default().serve(
            "https://a/list.xml",
            list(&[repo("x", "https://a/x")]),
            Some("Tue, 01 Oct 2024 10:00:00 GMT"),
        );
        CatalogFetcher::new(&config, &first, &ACCEPT).fetch(true).unwrap();

        let second = FakeTransport::default().not_modified("https://a/list.xml");
        let report = CatalogFetcher::new(&config, &second, &ACCEPT)
            .fetch(true)
            .unwrap();
        assert!(report.catalog.get("x").is_some());
        assert_eq!(
            second.requests.borrow()[0].1.as_deref(),
            Some("Tue, 01 Oct 2024 10:00:00 GMT")
        );
    }

    #[test]
    fn unparseable_download_does_not_replace_cache() {
        let (_dir, config) = config(&["https://a/list.xml"]);
        let good = FakeTransport::default().serve("https://a/list.xml", list(&[repo("x", "https://a/x")]), None);
        CatalogFetcher::new(&config, &good, &ACCEPT).fetch(true).unwrap();

        let garbage = FakeTransport::default().serve("https://a/list.xml", b"<html><body>".to_vec(), None);
        let report = CatalogFetcher::new(&config, &garbage, &ACCEPT)
            .fetch(true)
            .unwrap();
        assert!(report.catalog.get("x").is_some());
    }

    #[test]
    fn signature_failure_fails_closed_even_with_cache() {
        let (_dir, mut config) = config(&[]);
        config.gpg_signed_lists = vec!["https://signed/list.xml".into()];
        let transport = FakeTransport::default().serve(
            "https://signed/list.xml",
            list(&[repo("s", "https://s")]),
            None,
        );
        CatalogFetcher::new(&config, &transport, &ACCEPT).fetch(true).unwrap();

        let reject = FakeVerifier { accept: false };
        let err = CatalogFetcher::new(&config, &transport, &reject)
            .fetch(true)
            .unwrap_err();
        match err {
            OverlayError::CatalogUnavailable(failures) => {
                assert!(failures[0].reason.contains("signature verification failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn detached_signature_is_fetched_and_checked() {
        let (_dir, mut config) = config(&[]);
        config.gpg_detached_lists = vec![("https://d/list.xml".into(), "https://d/list.xml.asc".into())];
        let transport = FakeTransport::default()
            .serve("https://d/list.xml", list(&[repo("d", "https://d")]), None)
            .serve("https://d/list.xml.asc", b"sig".to_vec(), None);

        let report = CatalogFetcher::new(&config, &transport, &ACCEPT)
            .fetch(true)
            .unwrap();
        assert!(report.catalog.get("d").is_some());
        let requested: Vec<String> = transport.requests.borrow().iter().map(|(u, _)| u.clone()).collect();
        assert_eq!(requested, vec!["https://d/list.xml", "https://d/list.xml.asc"]);
    }

    #[test]
    fn nofetch_reads_only_the_cache() {
        let (_dir, config) = config(&["https://a/list.xml"]);
        let transport = FakeTransport::default();
        let err = CatalogFetcher::new(&config, &transport, &ACCEPT)
            .fetch(false)
            .unwrap_err();
        assert!(matches!(err, OverlayError::CatalogUnavailable(_)));
        assert!(transport.requests.borrow().is_empty());
    }

    #[test]
    fn directory_location_merges_each_definition_file() {
        let defs = tempdir().unwrap();
        fs::write(defs.path().join("one.xml"), repo("one", "https://one")).unwrap();
        fs::write(defs.path().join("two.xml"), list(&[repo("two", "https://two")])).unwrap();
        fs::write(defs.path().join("broken.xml"), "<repo>").unwrap();

        let location = defs.path().to_string_lossy().into_owned();
        let (_dir, config) = config(&[location.as_str()]);
        let transport = FakeTransport::default();
        let report = CatalogFetcher::new(&config, &transport, &ACCEPT)
            .fetch(false)
            .unwrap();
        assert_eq!(report.catalog.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(), vec!["one", "two"]);
        assert!(report.warnings.iter().any(|w| w.contains("broken.xml")));
    }

    #[test]
    fn cache_paths_are_keyed_by_url_hash() {
        let (xml, stamp) = cache_paths(Path::new("/cache"), "https://a/list.xml");
        let stem = xml.file_stem().unwrap().to_string_lossy().into_owned();
        assert_eq!(stem.len(), 64);
        assert_eq!(stamp, PathBuf::from(format!("/cache/{stem}.timestamp")));
    }
}
