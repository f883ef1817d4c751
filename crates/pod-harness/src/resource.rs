//! Protocol-level resource operations, including recursive deletion.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::header::HeaderMap;
use url::Url;

use crate::client::Client;
use crate::config::defaults;
use crate::error::{ClientError, ClientResult};
use crate::headers::{find_acl_link, parse_link_headers, parse_wac_allow};

// Containment triples in either full-IRI or prefixed predicate form; the
// object list is a run of IRI refs, optionally comma-separated.
static CONTAINS_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(?:<http://www\.w3\.org/ns/ldp#contains>|ldp:contains)\s*((?:<[^>]*>\s*,?\s*)+)")
        .expect("valid containment regex")
});

static IRI_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^>]*)>").expect("valid IRI regex"));

/// Outcome of a recursive delete: which deletions were attempted and which
/// came back unsuccessful. Failures never abort the rest of the tree, so the
/// overall operation reports rather than errors.
#[derive(Debug, Default, Clone)]
pub struct DeleteOutcome {
    /// Every URL a DELETE was issued for.
    pub attempted: Vec<Url>,
    /// The subset whose deletion did not succeed.
    pub failed: Vec<Url>,
}

impl DeleteOutcome {
    /// Whether every attempted deletion succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn merge(&mut self, other: Self) {
        self.attempted.extend(other.attempted);
        self.failed.extend(other.failed);
    }
}

/// Issues protocol operations against a storage server on behalf of one
/// authenticated [`Client`].
#[derive(Debug, Clone)]
pub struct ResourceClient {
    client: Arc<Client>,
}

impl ResourceClient {
    /// Wrap an authenticated client for protocol use.
    #[must_use]
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// The underlying HTTP client.
    #[must_use]
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Create or replace a resource, returning the response headers.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnexpectedStatus`] on a non-success response.
    pub async fn create(
        &self,
        url: &Url,
        body: impl Into<String>,
        content_type: &str,
    ) -> ClientResult<HeaderMap> {
        let response = self.client.put(url, body.into(), content_type).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::unexpected_status(status.as_u16(), url.as_str()));
        }
        Ok(response.headers().clone())
    }

    /// HEAD a resource, returning its response headers.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnexpectedStatus`] on a non-success response.
    pub async fn head(&self, url: &Url) -> ClientResult<HeaderMap> {
        let response = self.client.head(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::unexpected_status(status.as_u16(), url.as_str()));
        }
        Ok(response.headers().clone())
    }

    /// Locate the access-control document governing a resource, following
    /// the `acl` (or ACP) link relation from a HEAD response.
    ///
    /// # Errors
    ///
    /// Returns an error if the HEAD request fails outright.
    pub async fn acl_link(&self, url: &Url) -> ClientResult<Option<Url>> {
        let response = self.client.head(url).await?;
        let links = parse_link_headers(response.headers());
        Ok(find_acl_link(&links).and_then(|link| url.join(&link.uri).ok()))
    }

    /// Fetch the permission sets advertised for a resource via `WAC-Allow`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HEAD request fails outright.
    pub async fn access_controls(
        &self,
        url: &Url,
    ) -> ClientResult<HashMap<String, HashSet<String>>> {
        let response = self.client.head(url).await?;
        Ok(parse_wac_allow(response.headers()))
    }

    /// List the members of a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be fetched or interpreted.
    pub async fn containment(&self, url: &Url) -> ClientResult<Vec<Url>> {
        let response = self.client.get_turtle(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::unexpected_status(status.as_u16(), url.as_str()));
        }
        let body = response.text().await?;
        parse_members(&body, url)
    }

    /// Delete a resource and, for a container, everything beneath it.
    pub async fn delete_resource_recursively(&self, url: &Url) -> DeleteOutcome {
        self.delete_recursive(url.clone(), None).await
    }

    /// Delete everything beneath a container, preserving the container
    /// itself.
    pub async fn delete_contents_recursively(&self, url: &Url) -> DeleteOutcome {
        self.delete_recursive(url.clone(), Some(0)).await
    }

    // Fan out over a container's members, join them all, then delete the
    // resource itself unless depth tracking says it is the preserved root. A
    // container whose contents cannot be enumerated is a no-op, not a
    // failure: it may have been deleted concurrently.
    fn delete_recursive(&self, url: Url, depth: Option<u32>) -> BoxFuture<'_, DeleteOutcome> {
        Box::pin(async move {
            let mut outcome = DeleteOutcome::default();

            if is_container(&url) {
                let members = match self.containment(&url).await {
                    Ok(members) => members,
                    Err(err) => {
                        tracing::error!(%url, %err, "failed to get container members");
                        return outcome;
                    }
                };
                tracing::debug!(%url, count = members.len(), "deleting members");

                let child_depth = depth.map(|d| d + 1);
                let children = stream::iter(
                    members.into_iter().map(|member| self.delete_recursive(member, child_depth)),
                )
                .buffer_unordered(defaults::MAX_DELETE_CONCURRENCY)
                .collect::<Vec<_>>()
                .await;
                for child in children {
                    outcome.merge(child);
                }
            }

            if depth.is_none_or(|d| d > 0) {
                outcome.attempted.push(url.clone());
                match self.client.delete(&url).await {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => {
                        tracing::debug!(%url, status = %response.status(), "delete failed");
                        outcome.failed.push(url);
                    }
                    Err(err) => {
                        tracing::error!(%url, %err, "delete request failed");
                        outcome.failed.push(url);
                    }
                }
            }
            outcome
        })
    }
}

fn is_container(url: &Url) -> bool {
    url.path().ends_with('/')
}

// Extract member IRIs named by the fixed containment predicate, resolved
// against the container URL.
fn parse_members(body: &str, base: &Url) -> ClientResult<Vec<Url>> {
    let mut members = Vec::new();
    for statement in CONTAINS_STATEMENT.captures_iter(body) {
        for iri in IRI_REF.captures_iter(&statement[1]) {
            let member = base.join(&iri[1]).map_err(|e| ClientError::BadContainerListing {
                url: base.to_string(),
                detail: e.to_string(),
            })?;
            members.push(member);
        }
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://server.test/storage/").unwrap()
    }

    #[test]
    fn container_detection_by_trailing_slash() {
        assert!(is_container(&base()));
        assert!(!is_container(&Url::parse("https://server.test/storage/file.ttl").unwrap()));
        // a query string does not make a resource a container
        assert!(!is_container(&Url::parse("https://server.test/file?x=/").unwrap()));
    }

    #[test]
    fn parses_members_with_full_predicate() {
        let body = r#"
            <https://server.test/storage/>
                <http://www.w3.org/ns/ldp#contains> <https://server.test/storage/a.ttl> ;
                <http://www.w3.org/ns/ldp#contains> <child/> .
        "#;
        let members = parse_members(body, &base()).unwrap();
        assert_eq!(
            members,
            vec![
                Url::parse("https://server.test/storage/a.ttl").unwrap(),
                Url::parse("https://server.test/storage/child/").unwrap(),
            ]
        );
    }

    #[test]
    fn parses_object_lists_with_prefixed_predicate() {
        let body = r"
            @prefix ldp: <http://www.w3.org/ns/ldp#> .
            <> a ldp:BasicContainer ;
                ldp:contains <a.ttl>, <b.ttl> .
        ";
        let members = parse_members(body, &base()).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].as_str(), "https://server.test/storage/b.ttl");
    }

    #[test]
    fn listing_without_containment_is_empty() {
        let body = "<> a <http://www.w3.org/ns/ldp#BasicContainer> .";
        assert!(parse_members(body, &base()).unwrap().is_empty());
    }

    #[test]
    fn outcome_merge_accumulates() {
        let mut outcome = DeleteOutcome::default();
        outcome.merge(DeleteOutcome {
            attempted: vec![base()],
            failed: vec![],
        });
        outcome.merge(DeleteOutcome {
            attempted: vec![base().join("x").unwrap()],
            failed: vec![base().join("x").unwrap()],
        });
        assert_eq!(outcome.attempted.len(), 2);
        assert_eq!(outcome.failed.len(), 1);
        assert!(!outcome.is_complete());
    }
}
